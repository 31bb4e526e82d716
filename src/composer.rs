//! Template/overlay composition.
//!
//! The first overlay page is stamped on top of the first template page as a form XObject, so the
//! template stays underneath as background. Overlay pages 2..N are appended after it unchanged.
//! Any further template pages are dropped.

use std::fs;
use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use log::{debug, info};

use crate::error::{Result, SurveyError};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// A4 in PDF points, used when the overlay page carries no media box.
const A4_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 595.28, 841.89];

const OVERLAY_XOBJECT_NAME: &str = "SurveyOverlay";

/// Merges overlay page 1 onto template page 1 and appends overlay pages 2..N.
///
/// Fails with [`SurveyError::Compose`] when either document has no pages.
pub fn compose(template: &[u8], overlay: &[u8]) -> Result<Vec<u8>> {
    let mut base = Document::load_mem(template)?;
    let mut overlay = Document::load_mem(overlay)?;

    let template_pages = page_references(&base);
    let overlay_pages = page_references(&overlay);
    let template_page = *template_pages
        .first()
        .ok_or_else(|| SurveyError::Compose("template has no pages".into()))?;
    let overlay_first = *overlay_pages
        .first()
        .ok_or_else(|| SurveyError::Compose("overlay has no pages".into()))?;

    // Pages are re-parented below, so inherited attributes must live on the pages themselves.
    materialize_inherited(&mut base, template_page)?;
    for &page in &overlay_pages {
        materialize_inherited(&mut overlay, page)?;
    }

    let content = overlay.get_page_content(overlay_first)?;
    let overlay_page = overlay.get_dictionary(overlay_first)?;
    let resources = overlay_page
        .get(b"Resources")
        .cloned()
        .unwrap_or_else(|_| Object::Dictionary(Dictionary::new()));
    let bbox = overlay_page
        .get(b"MediaBox")
        .cloned()
        .unwrap_or_else(|_| Object::Array(A4_MEDIA_BOX.iter().map(|v| Object::Real(*v)).collect()));

    let offset = base.max_id;
    for (id, object) in std::mem::take(&mut overlay.objects) {
        base.objects
            .insert((id.0 + offset, id.1), remap_object_refs(object, offset));
    }
    base.max_id = base.max_id.max(overlay.max_id + offset);

    let mut form = Dictionary::new();
    form.set("Type", Object::Name(b"XObject".to_vec()));
    form.set("Subtype", Object::Name(b"Form".to_vec()));
    form.set("BBox", remap_object_refs(bbox, offset));
    form.set("Resources", remap_object_refs(resources, offset));
    let form_id = base.add_object(Stream::new(form, content));

    stamp_form(&mut base, template_page, form_id)?;

    let mut kids = vec![template_page];
    kids.extend(
        overlay_pages
            .iter()
            .skip(1)
            .map(|id| (id.0 + offset, id.1)),
    );
    debug!(
        "Composed {} page(s): template page 1 plus {} appended overlay page(s)",
        kids.len(),
        kids.len() - 1
    );
    update_page_tree(&mut base, &kids)?;

    base.prune_objects();
    base.renumber_objects();
    base.compress();

    let mut buffer = Vec::new();
    base.save_to(&mut buffer)?;
    Ok(buffer)
}

/// Reads both files, composes them and writes the result to `output`.
pub fn compose_files(template: &Path, overlay: &Path, output: &Path) -> Result<()> {
    let template_bytes = fs::read(template)?;
    let overlay_bytes = fs::read(overlay)?;
    let composed = compose(&template_bytes, &overlay_bytes).map_err(|err| match err {
        SurveyError::Compose(message) => {
            SurveyError::Compose(format!("{}: {}", overlay.display(), message))
        }
        other => other,
    })?;

    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, composed)?;
    info!("Final document written to {}", output.display());
    Ok(())
}

/// Page ids in document order.
fn page_references(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().values().copied().collect()
}

fn inherited_attribute(doc: &Document, page: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = Some(page);
    let mut depth = 0;
    while let Some(id) = current {
        let dict = doc.get_dictionary(id).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
        if depth > 64 {
            break;
        }
    }
    None
}

fn materialize_inherited(doc: &mut Document, page: ObjectId) -> Result<()> {
    let mut found = Vec::new();
    {
        let dict = doc.get_dictionary(page)?;
        for key in INHERITABLE {
            if !dict.has(key) {
                if let Some(value) = inherited_attribute(doc, page, key) {
                    found.push((key, value));
                }
            }
        }
    }

    let dict = dictionary_mut(doc, page)?;
    for (key, value) in found {
        dict.set(key.to_vec(), value);
    }
    Ok(())
}

fn dictionary_mut(doc: &mut Document, id: ObjectId) -> Result<&mut Dictionary> {
    Ok(doc.get_object_mut(id)?.as_dict_mut()?)
}

fn resolve_dictionary(doc: &Document, object: Option<&Object>) -> Dictionary {
    match object {
        Some(Object::Dictionary(dict)) => dict.clone(),
        Some(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_else(|_| Dictionary::new()),
        _ => Dictionary::new(),
    }
}

/// Registers the form on `page` and draws it after the page's own content.
fn stamp_form(doc: &mut Document, page: ObjectId, form_id: ObjectId) -> Result<()> {
    let page_dict = doc.get_dictionary(page)?;

    let mut resources = resolve_dictionary(doc, page_dict.get(b"Resources").ok());
    let mut xobjects = resolve_dictionary(doc, resources.get(b"XObject").ok());
    let mut name = OVERLAY_XOBJECT_NAME.to_string();
    let mut suffix = 1;
    while xobjects.has(name.as_bytes()) {
        suffix += 1;
        name = format!("{}{}", OVERLAY_XOBJECT_NAME, suffix);
    }
    xobjects.set(name.as_bytes().to_vec(), Object::Reference(form_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    let existing: Vec<Object> = match page_dict.get(b"Contents") {
        Ok(Object::Array(items)) => items.clone(),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        _ => Vec::new(),
    };

    let open = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let close = doc.add_object(Stream::new(
        Dictionary::new(),
        format!("Q\nq /{} Do Q\n", name).into_bytes(),
    ));
    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open));
    contents.extend(existing);
    contents.push(Object::Reference(close));

    let page_dict = dictionary_mut(doc, page)?;
    page_dict.set("Resources", Object::Dictionary(resources));
    page_dict.set("Contents", Object::Array(contents));
    Ok(())
}

/// Shifts every object reference by `offset`.
fn remap_object_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(items) => Object::Array(
            items
                .into_iter()
                .map(|item| remap_object_refs(item, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_object_refs(value.clone(), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}

/// Points the root page node at `kids`, in order.
fn update_page_tree(doc: &mut Document, kids: &[ObjectId]) -> Result<()> {
    let catalog_id = doc
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .map_err(|_| SurveyError::Compose("trailer has no Root reference".into()))?;
    let pages_id = doc
        .get_dictionary(catalog_id)?
        .get(b"Pages")
        .and_then(Object::as_reference)
        .map_err(|_| SurveyError::Compose("catalog has no Pages reference".into()))?;

    for kid in kids {
        dictionary_mut(doc, *kid)?.set("Parent", Object::Reference(pages_id));
    }

    let pages = dictionary_mut(doc, pages_id)?;
    pages.set(
        "Kids",
        Object::Array(kids.iter().map(|id| Object::Reference(*id)).collect()),
    );
    pages.set("Count", Object::Integer(kids.len() as i64));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a PDF whose page `n` draws the text `<prefix>-Page-<n>`.
    fn create_test_pdf(num_pages: u32, content_prefix: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let catalog_id = doc.new_object_id();

        let mut page_ids = Vec::new();
        for page_num in 0..num_pages {
            let page_id = doc.new_object_id();
            let content_id = doc.new_object_id();
            let content = format!(
                "BT /F1 12 Tf 50 700 Td ({}-Page-{}) Tj ET",
                content_prefix,
                page_num + 1
            );
            doc.objects.insert(
                content_id,
                Object::Stream(Stream::new(Dictionary::new(), content.into_bytes())),
            );

            let mut page_dict = Dictionary::new();
            page_dict.set("Type", Object::Name(b"Page".to_vec()));
            page_dict.set("Parent", Object::Reference(pages_id));
            page_dict.set("Contents", Object::Reference(content_id));
            doc.objects.insert(page_id, Object::Dictionary(page_dict));
            page_ids.push(Object::Reference(page_id));
        }

        let mut pages_dict = Dictionary::new();
        pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
        pages_dict.set("Count", Object::Integer(num_pages as i64));
        pages_dict.set("Kids", Object::Array(page_ids));
        pages_dict.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ]),
        );
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

        let mut catalog_dict = Dictionary::new();
        catalog_dict.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog_dict.set("Pages", Object::Reference(pages_id));
        doc.objects.insert(catalog_id, Object::Dictionary(catalog_dict));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn page_text(doc: &Document, page: ObjectId) -> String {
        String::from_utf8_lossy(&doc.get_page_content(page).unwrap()).into_owned()
    }

    #[test]
    fn single_page_overlay_yields_single_page() {
        let composed = compose(&create_test_pdf(1, "Template"), &create_test_pdf(1, "Overlay")).unwrap();
        let doc = Document::load_mem(&composed).unwrap();
        let pages = page_references(&doc);
        assert_eq!(pages.len(), 1);

        let text = page_text(&doc, pages[0]);
        assert!(text.contains("Template-Page-1"));
        assert!(text.contains(OVERLAY_XOBJECT_NAME));
        assert!(text.trim_end().ends_with("Q"));
    }

    #[test]
    fn extra_overlay_pages_are_appended_without_template() {
        let composed = compose(&create_test_pdf(2, "Template"), &create_test_pdf(3, "Overlay")).unwrap();
        let doc = Document::load_mem(&composed).unwrap();
        let pages = page_references(&doc);
        assert_eq!(pages.len(), 3);

        assert!(page_text(&doc, pages[0]).contains("Template-Page-1"));
        for (index, page) in pages.iter().enumerate().skip(1) {
            let text = page_text(&doc, *page);
            assert!(text.contains(&format!("Overlay-Page-{}", index + 1)));
            assert!(!text.contains("Template"));
        }
        let leftover = doc.objects.values().filter_map(|object| object.as_stream().ok()).any(|stream| {
            let content = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            String::from_utf8_lossy(&content).contains("Template-Page-2")
        });
        assert!(!leftover, "second template page should be dropped");
    }

    #[test]
    fn appended_pages_keep_their_media_box() {
        let composed = compose(&create_test_pdf(1, "Template"), &create_test_pdf(2, "Overlay")).unwrap();
        let doc = Document::load_mem(&composed).unwrap();
        let pages = page_references(&doc);
        assert!(inherited_attribute(&doc, pages[1], b"MediaBox").is_some());
    }

    #[test]
    fn empty_documents_are_rejected() {
        let empty = create_test_pdf(0, "Empty");
        let page = create_test_pdf(1, "Page");
        assert!(matches!(compose(&empty, &page), Err(SurveyError::Compose(_))));
        assert!(matches!(compose(&page, &empty), Err(SurveyError::Compose(_))));
    }

    #[test]
    fn compose_files_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.pdf");
        let overlay = dir.path().join("overlay_Ana.pdf");
        let output = dir.path().join("out").join("Relatório - Ana.pdf");
        fs::write(&template, create_test_pdf(1, "Template")).unwrap();
        fs::write(&overlay, create_test_pdf(2, "Overlay")).unwrap();

        compose_files(&template, &overlay, &output).unwrap();
        let doc = Document::load_mem(&fs::read(&output).unwrap()).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }
}
