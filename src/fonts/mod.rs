//! Font loading for the report overlays.
//!
//! The overlay uses three weights of one condensed typeface. Each weight is installed as its own
//! `genpdf` family so a [`TextStyle`] maps to a family directly.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use genpdf::error::Error;
use genpdf::fonts::{Font, FontData, FontFamily};
use genpdf::style::{Color, Style};
use genpdf::Document;
use log::{debug, warn};

use crate::layout::{FontWeight, TextStyle};

/// Environment variable naming a directory with the font files.
pub const FONT_DIR_ENV: &str = "SURVEY_FONTS_DIR";

/// Grey used for every overlay text run.
pub const TEXT_COLOR: Color = Color::Rgb(98, 98, 98);

const FONT_FILES: [(FontWeight, &str); 3] = [
    (FontWeight::Bold, "OpenSans_Condensed-Bold.ttf"),
    (FontWeight::Medium, "OpenSans_Condensed-Medium.ttf"),
    (FontWeight::Light, "OpenSans_Condensed-Light.ttf"),
];

/// Directories searched for fonts, in order: `explicit`, `$SURVEY_FONTS_DIR`, `assets/fonts`
/// next to the executable and `assets/fonts` in the crate sources.
pub fn candidate_directories(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = explicit {
        candidates.push(dir.to_path_buf());
    }
    if let Some(dir) = env::var_os(FONT_DIR_ENV).filter(|value| !value.is_empty()) {
        candidates.push(PathBuf::from(dir));
    }
    if let Some(dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|parent| parent.join("assets").join("fonts")))
    {
        candidates.push(dir);
    }
    candidates.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets").join("fonts"));
    candidates
}

fn has_all_fonts(directory: &Path) -> bool {
    FONT_FILES
        .iter()
        .all(|(_, name)| directory.join(name).is_file())
}

/// First candidate directory holding all three font files.
pub fn resolve_font_directory(explicit: Option<&Path>) -> Result<PathBuf, Error> {
    let candidates = candidate_directories(explicit);
    if let Some(found) = candidates.iter().find(|dir| has_all_fonts(dir)) {
        debug!("Using fonts from {}", found.display());
        return Ok(found.clone());
    }

    if let Some(dir) = explicit.filter(|dir| dir.exists()) {
        warn!("Font directory {} is missing some font files", dir.display());
    }

    let searched = candidates
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let expected = FONT_FILES
        .iter()
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ");
    Err(Error::new(
        format!(
            "Fonts not found. Looked for {} in: {}. Set {} to a directory containing them.",
            expected, searched, FONT_DIR_ENV
        ),
        io::Error::new(io::ErrorKind::NotFound, "font files missing"),
    ))
}

/// Indicates whether all three font files can be found.
pub fn fonts_available(explicit: Option<&Path>) -> bool {
    candidate_directories(explicit)
        .iter()
        .any(|dir| has_all_fonts(dir))
}

/// Loaded font files, one single-face family per weight.
#[derive(Clone)]
pub struct FontSetData {
    pub bold: FontFamily<FontData>,
    pub medium: FontFamily<FontData>,
    pub light: FontFamily<FontData>,
}

fn single_face_family(path: &Path) -> Result<FontFamily<FontData>, Error> {
    let data = FontData::load(path, None).map_err(|err| {
        Error::new(
            format!("Failed to load font {}: {}", path.display(), err),
            io::Error::new(io::ErrorKind::Other, err.to_string()),
        )
    })?;
    Ok(FontFamily {
        regular: data.clone(),
        bold: data.clone(),
        italic: data.clone(),
        bold_italic: data,
    })
}

/// Loads the three weights from the resolved font directory.
pub fn load_font_set(explicit: Option<&Path>) -> Result<FontSetData, Error> {
    let directory = resolve_font_directory(explicit)?;
    let mut bold = None;
    let mut medium = None;
    let mut light = None;
    for (weight, name) in FONT_FILES {
        let family = single_face_family(&directory.join(name))?;
        match weight {
            FontWeight::Bold => bold = Some(family),
            FontWeight::Medium => medium = Some(family),
            FontWeight::Light => light = Some(family),
        }
    }

    match (bold, medium, light) {
        (Some(bold), Some(medium), Some(light)) => Ok(FontSetData {
            bold,
            medium,
            light,
        }),
        _ => Err(Error::new(
            "Incomplete font set",
            io::Error::new(io::ErrorKind::NotFound, "font weight missing"),
        )),
    }
}

/// Font families installed in a document's font cache.
#[derive(Clone, Copy, Debug)]
pub struct FontSet {
    pub bold: FontFamily<Font>,
    pub medium: FontFamily<Font>,
    pub light: FontFamily<Font>,
}

impl FontSet {
    /// Creates a document whose default family is the medium weight and installs the others.
    pub fn install(data: FontSetData) -> (Document, FontSet) {
        let mut document = Document::new(data.medium);
        let medium = document.font_cache().default_font_family();
        let bold = document.add_font_family(data.bold);
        let light = document.add_font_family(data.light);
        (
            document,
            FontSet {
                bold,
                medium,
                light,
            },
        )
    }

    pub fn family(&self, weight: FontWeight) -> FontFamily<Font> {
        match weight {
            FontWeight::Bold => self.bold,
            FontWeight::Medium => self.medium,
            FontWeight::Light => self.light,
        }
    }

    /// `genpdf` style for an overlay text run.
    pub fn style(&self, text_style: TextStyle) -> Style {
        Style::new()
            .with_font_family(self.family(text_style.weight))
            .with_font_size(text_style.size_pt)
            .with_color(TEXT_COLOR)
    }
}
