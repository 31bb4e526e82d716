//! Renders laid-out pages into an overlay PDF with `genpdf`.

use std::fs;
use std::path::{Path, PathBuf};

use genpdf::error::Error;
use genpdf::fonts::FontCache;
use genpdf::style::Style;
use genpdf::{render, Element, Mm, PaperSize, Position, RenderResult};
use log::{debug, info};

use crate::error::Result;
use crate::fonts::{FontSet, FontSetData};
use crate::layout::{
    GridLayoutEngine, GridSpec, Page, Period, TextMeasure, TextStyle, PAGE_HEIGHT_MM,
    PAGE_WIDTH_MM,
};
use crate::normalizer::{CanonicalRecord, QuestionMap};

fn mm_from_f64(value: f64) -> Mm {
    Mm::from(printpdf::Mm(value))
}

fn mm_to_f64(value: Mm) -> f64 {
    let mm: printpdf::Mm = value.into();
    mm.0
}

/// Measures text with the glyph metrics of the installed fonts.
pub struct GenpdfMeasure<'a> {
    font_cache: &'a FontCache,
    fonts: FontSet,
}

impl<'a> GenpdfMeasure<'a> {
    pub fn new(font_cache: &'a FontCache, fonts: FontSet) -> Self {
        Self { font_cache, fonts }
    }
}

impl TextMeasure for GenpdfMeasure<'_> {
    fn width_mm(&self, text: &str, style: TextStyle) -> f64 {
        mm_to_f64(self.fonts.style(style).str_width(self.font_cache, text))
    }

    fn glyph_height_mm(&self, style: TextStyle) -> f64 {
        let style = self.fonts.style(style);
        mm_to_f64(style.font(self.font_cache).glyph_height(style.font_size()))
    }
}

/// Draws one pre-positioned page per render call and asks for a new page while pages remain.
struct OverlayPages {
    pages: Vec<Page>,
    next: usize,
    fonts: FontSet,
}

impl Element for OverlayPages {
    fn render(
        &mut self,
        context: &genpdf::Context,
        area: render::Area<'_>,
        _style: Style,
    ) -> std::result::Result<RenderResult, Error> {
        let mut result = RenderResult::default();
        let Some(page) = self.pages.get(self.next) else {
            return Ok(result);
        };

        for text in page.texts() {
            if text.text.is_empty() {
                continue;
            }
            let style = self.fonts.style(text.style);
            let position = Position::new(mm_from_f64(text.x_mm), mm_from_f64(text.top_mm));
            match area.text_section(&context.font_cache, position, style) {
                Some(mut section) => section.print_str(&text.text, style)?,
                None => debug!(
                    "Skipped text outside page {} at ({:.1}, {:.1})",
                    page.number, text.x_mm, text.top_mm
                ),
            }
        }

        self.next += 1;
        result.size = area.size();
        result.has_more = self.next < self.pages.len();
        Ok(result)
    }
}

/// Turns a canonical record into a standalone multi-page overlay PDF.
pub struct OverlayRenderer {
    fonts: FontSetData,
    grid: GridSpec,
}

impl OverlayRenderer {
    pub fn new(fonts: FontSetData) -> Self {
        Self {
            fonts,
            grid: GridSpec::default(),
        }
    }

    pub fn with_grid(mut self, grid: GridSpec) -> Self {
        self.grid = grid;
        self
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Lays out `record` and renders it. The result has one page per layout page.
    pub fn render(
        &self,
        record: &CanonicalRecord,
        questions: &QuestionMap,
        period: &Period,
    ) -> Result<Vec<u8>> {
        let (mut document, fonts) = FontSet::install(self.fonts.clone());
        document.set_paper_size(PaperSize::A4);
        document.set_title(format!("Overlay {}", record.name.trim()));

        let pages = {
            let measure = GenpdfMeasure::new(document.font_cache(), fonts);
            GridLayoutEngine::new(self.grid.clone(), &measure).layout(record, questions, period)
        };
        debug!(
            "Laid out {} page(s) for {} on {:.0}x{:.0} mm",
            pages.len(),
            record.name,
            PAGE_WIDTH_MM,
            PAGE_HEIGHT_MM
        );

        document.push(OverlayPages {
            pages,
            next: 0,
            fonts,
        });

        let mut buffer = Vec::new();
        document.render(&mut buffer)?;
        Ok(buffer)
    }

    /// Renders `record` into `dest`, replacing any previous overlay.
    pub fn render_to_file(
        &self,
        record: &CanonicalRecord,
        questions: &QuestionMap,
        period: &Period,
        dest: &Path,
    ) -> Result<PathBuf> {
        let bytes = self.render(record, questions, period)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, bytes)?;
        info!("Overlay written to {}", dest.display());
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genpdf::Size;

    #[test]
    fn millimetre_conversion_round_trips() {
        assert!((mm_to_f64(mm_from_f64(42.5)) - 42.5).abs() < 1e-9);
        let size = Size::new(mm_from_f64(PAGE_WIDTH_MM), mm_from_f64(PAGE_HEIGHT_MM));
        assert!((mm_to_f64(size.width) - 210.0).abs() < 1e-9);
        assert!((mm_to_f64(size.height) - 297.0).abs() < 1e-9);
    }
}
