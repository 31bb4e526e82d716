//! Grid layout of question/answer pairs on fixed-size overlay pages.
//!
//! All geometry is in millimetres measured from the top-left corner of an A4 page. Rows are
//! placed top-down: every row starts where the previous one ended, so a height override only
//! shifts the rows below it. The renderer converts the positions into the PDF engine's units.

use std::collections::BTreeMap;

use log::debug;

use crate::normalizer::{CanonicalRecord, QuestionAlias, QuestionEntry, QuestionMap};
use crate::text::{self, clean_cell_text};

pub const PAGE_WIDTH_MM: f64 = 210.0;
pub const PAGE_HEIGHT_MM: f64 = 297.0;

/// Millimetres per typographic point.
pub const MM_PER_PT: f64 = 0.3528;

/// Weight variant of the report typeface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FontWeight {
    Bold,
    Medium,
    Light,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextStyle {
    pub weight: FontWeight,
    pub size_pt: u8,
}

impl TextStyle {
    pub const fn new(weight: FontWeight, size_pt: u8) -> Self {
        Self { weight, size_pt }
    }
}

pub const QUESTION_STYLE: TextStyle = TextStyle::new(FontWeight::Medium, 8);
pub const ANSWER_STYLE: TextStyle = TextStyle::new(FontWeight::Light, 8);

/// Leading shared by question and answer paragraphs, in points.
pub const PARAGRAPH_LEADING_PT: f64 = 11.0;

/// Measures rendered text widths so the layout can wrap without knowing about fonts.
pub trait TextMeasure {
    /// Width of `text` set in `style`, in millimetres.
    fn width_mm(&self, text: &str, style: TextStyle) -> f64;

    /// Distance from the top of a line to its baseline, in millimetres. The renderer sets the
    /// baseline of every positioned text this far below its `top_mm`.
    fn glyph_height_mm(&self, style: TextStyle) -> f64;
}

/// Header field anchored at a baseline measured from the bottom of the page.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeaderField {
    pub x_mm: f64,
    pub baseline_mm: f64,
    pub style: TextStyle,
}

impl HeaderField {
    const fn new(x_mm: f64, baseline_mm: f64, style: TextStyle) -> Self {
        Self {
            x_mm,
            baseline_mm,
            style,
        }
    }

    fn place(&self, text: &str, measure: &dyn TextMeasure) -> PositionedText {
        PositionedText {
            text: text.trim().to_string(),
            x_mm: self.x_mm,
            top_mm: PAGE_HEIGHT_MM - self.baseline_mm - measure.glyph_height_mm(self.style),
            style: self.style,
        }
    }
}

/// Positions of the respondent header repeated on every page.
#[derive(Clone, Debug, PartialEq)]
pub struct HeaderSpec {
    pub name: HeaderField,
    pub sis_id: HeaderField,
    pub submitted: HeaderField,
    /// Month/year caption, printed under the submission date.
    pub caption: HeaderField,
}

impl Default for HeaderSpec {
    fn default() -> Self {
        Self {
            name: HeaderField::new(33.0, 270.0, TextStyle::new(FontWeight::Bold, 12)),
            sis_id: HeaderField::new(33.0, 264.0, TextStyle::new(FontWeight::Medium, 11)),
            submitted: HeaderField::new(160.0, 270.0, TextStyle::new(FontWeight::Medium, 11)),
            caption: HeaderField::new(160.0, 264.0, TextStyle::new(FontWeight::Medium, 11)),
        }
    }
}

/// Geometry of the two-column question grid.
#[derive(Clone, Debug, PartialEq)]
pub struct GridSpec {
    /// Left edge of the question column.
    pub x_left: f64,
    pub w_left: f64,
    pub gutter: f64,
    /// Left edge of the answer column; defaults to `x_left + w_left + gutter`.
    pub x_right: Option<f64>,
    pub w_right: f64,
    /// Top of the first row, from the top of the page.
    pub top: f64,
    pub row_height: f64,
    pub rows_per_page: usize,
    pub pad_x: f64,
    pub pad_y: f64,
    pub line_height: f64,
    /// Row heights keyed by 1-based question ordinal.
    pub height_overrides: BTreeMap<usize, f64>,
    pub header: HeaderSpec,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            x_left: 5.0,
            w_left: 135.0,
            gutter: 0.0,
            x_right: None,
            w_right: 65.0,
            top: PAGE_HEIGHT_MM - 255.0,
            row_height: 15.5,
            rows_per_page: 15,
            pad_x: 0.6,
            pad_y: 0.4,
            line_height: PARAGRAPH_LEADING_PT * MM_PER_PT,
            height_overrides: BTreeMap::from([(10, 20.0)]),
            header: HeaderSpec::default(),
        }
    }
}

impl GridSpec {
    pub fn with_height_override(mut self, ordinal: usize, height_mm: f64) -> Self {
        self.height_overrides.insert(ordinal, height_mm);
        self
    }

    pub fn with_rows_per_page(mut self, rows: usize) -> Self {
        self.rows_per_page = rows;
        self
    }

    /// Height of the row holding question `ordinal`.
    pub fn row_height_for(&self, ordinal: usize) -> f64 {
        self.height_overrides
            .get(&ordinal)
            .copied()
            .unwrap_or(self.row_height)
    }

    fn answer_x(&self) -> f64 {
        self.x_right
            .unwrap_or(self.x_left + self.w_left + self.gutter)
    }

    /// Usable text height inside a row; never less than one line.
    fn inner_height(&self, row_height: f64) -> f64 {
        (row_height - 2.0 * self.pad_y).max(self.line_height + 0.2)
    }
}

/// Month and year printed in the header and used in file names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Period {
    pub month: Option<String>,
    pub year: Option<String>,
}

impl Period {
    /// Blank values count as missing; recognised month names get their display spelling.
    pub fn new(month: Option<String>, year: Option<String>) -> Self {
        let month = month
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .map(|m| text::canonical_month(&m).map(str::to_string).unwrap_or(m));
        let year = year
            .map(|y| y.trim().to_string())
            .filter(|y| !y.is_empty());
        Self { month, year }
    }

    /// Uses the explicit values and fills whatever is missing from `source_name`.
    pub fn resolve(month: Option<String>, year: Option<String>, source_name: Option<&str>) -> Self {
        let explicit = Self::new(month, year);
        if explicit.is_known() {
            return explicit;
        }
        let (inferred_month, inferred_year) = source_name
            .map(text::infer_month_year)
            .unwrap_or((None, None));
        Self::new(
            explicit.month.or(inferred_month),
            explicit.year.or(inferred_year),
        )
    }

    /// Keeps the parts already set and infers the rest from `source_name`.
    pub fn fill_from(&self, source_name: &str) -> Self {
        Self::resolve(self.month.clone(), self.year.clone(), Some(source_name))
    }

    pub fn is_known(&self) -> bool {
        self.month.is_some() && self.year.is_some()
    }

    /// `"<Month> de <Year>"`, or `None` when either part is unknown.
    pub fn caption(&self) -> Option<String> {
        let caption = text::format_month_year(self.month.as_deref(), self.year.as_deref());
        (!caption.is_empty()).then_some(caption)
    }
}

/// A single line of text anchored at the top-left corner of its line box.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionedText {
    pub text: String,
    pub x_mm: f64,
    pub top_mm: f64,
    pub style: TextStyle,
}

/// Wrapped text confined to a box.
#[derive(Clone, Debug, PartialEq)]
pub struct TextBlock {
    pub x_mm: f64,
    pub top_mm: f64,
    pub width_mm: f64,
    pub height_mm: f64,
    pub line_height_mm: f64,
    pub style: TextStyle,
    pub lines: Vec<String>,
    /// Whether lines were dropped because the box is too short.
    pub truncated: bool,
}

impl TextBlock {
    pub fn positioned_lines(&self) -> impl Iterator<Item = PositionedText> + '_ {
        self.lines.iter().enumerate().map(move |(index, line)| PositionedText {
            text: line.clone(),
            x_mm: self.x_mm,
            top_mm: self.top_mm + index as f64 * self.line_height_mm,
            style: self.style,
        })
    }
}

/// Content of one grid row.
#[derive(Clone, Debug, PartialEq)]
pub struct LayoutCell {
    pub alias: QuestionAlias,
    pub question_text: String,
    pub answer_text: String,
    pub row_height_mm: f64,
}

/// A row placed on a page together with its wrapped text.
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedCell {
    pub cell: LayoutCell,
    pub row_top_mm: f64,
    pub question: TextBlock,
    pub answer: TextBlock,
}

/// One overlay page: the repeated header followed by a run of rows.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    pub header: Vec<PositionedText>,
    pub cells: Vec<PlacedCell>,
}

impl Page {
    /// Every line of text on the page in drawing order.
    pub fn texts(&self) -> impl Iterator<Item = PositionedText> + '_ {
        self.header.iter().cloned().chain(
            self.cells
                .iter()
                .flat_map(|placed| placed.question.positioned_lines().chain(placed.answer.positioned_lines())),
        )
    }
}

/// Paginates a record's questions into rows of two side-by-side columns.
pub struct GridLayoutEngine<'m> {
    spec: GridSpec,
    measure: &'m dyn TextMeasure,
}

impl<'m> GridLayoutEngine<'m> {
    pub fn new(spec: GridSpec, measure: &'m dyn TextMeasure) -> Self {
        Self { spec, measure }
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// Lays out every question of `questions` for `record` in ascending ordinal order.
    ///
    /// Always yields at least one page. Each page repeats the header and holds up to
    /// `rows_per_page` rows; no question is split across pages or dropped.
    pub fn layout(
        &self,
        record: &CanonicalRecord,
        questions: &QuestionMap,
        period: &Period,
    ) -> Vec<Page> {
        let header = self.header_texts(record, period);

        let mut ordered: Vec<&QuestionEntry> = questions.entries().iter().collect();
        ordered.sort_by_key(|entry| entry.alias.ordinal());

        let rows_per_page = self.spec.rows_per_page.max(1);
        let mut pages = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + rows_per_page).min(ordered.len());
            pages.push(Page {
                number: pages.len() + 1,
                header: header.clone(),
                cells: self.place_rows(&ordered[start..end], record),
            });
            start = end;
            if start >= ordered.len() {
                break;
            }
        }
        pages
    }

    fn header_texts(&self, record: &CanonicalRecord, period: &Period) -> Vec<PositionedText> {
        let fields = &self.spec.header;
        let mut texts = vec![
            fields.name.place(&record.name, self.measure),
            fields.sis_id.place(&record.sis_id, self.measure),
            fields.submitted.place(&record.submitted, self.measure),
        ];
        if let Some(caption) = period.caption() {
            texts.push(fields.caption.place(&caption, self.measure));
        }
        texts
    }

    fn place_rows(&self, entries: &[&QuestionEntry], record: &CanonicalRecord) -> Vec<PlacedCell> {
        let spec = &self.spec;
        let mut row_top = spec.top;
        let mut placed = Vec::with_capacity(entries.len());

        for entry in entries {
            let row_height = spec.row_height_for(entry.alias.ordinal());
            let question_text = clean_cell_text(&entry.label);
            let question_text = if question_text.is_empty() {
                entry.alias.to_string()
            } else {
                question_text
            };
            let answer_text = clean_cell_text(record.answer(&entry.alias).unwrap_or(""));

            let inner_height = spec.inner_height(row_height);
            let block_top = row_top + row_height - spec.pad_y - inner_height;

            let question = self.flow(
                &question_text,
                spec.x_left + spec.pad_x,
                block_top,
                spec.w_left - 2.0 * spec.pad_x,
                inner_height,
                QUESTION_STYLE,
            );
            let answer = self.flow(
                &answer_text,
                spec.answer_x() + spec.pad_x,
                block_top,
                spec.w_right - 2.0 * spec.pad_x,
                inner_height,
                ANSWER_STYLE,
            );
            if question.truncated || answer.truncated {
                debug!(
                    "Text for {} does not fit a {:.1} mm row and was clipped",
                    entry.alias, row_height
                );
            }

            placed.push(PlacedCell {
                cell: LayoutCell {
                    alias: entry.alias.clone(),
                    question_text,
                    answer_text,
                    row_height_mm: row_height,
                },
                row_top_mm: row_top,
                question,
                answer,
            });
            row_top += row_height;
        }

        placed
    }

    fn flow(
        &self,
        text: &str,
        x_mm: f64,
        top_mm: f64,
        width_mm: f64,
        height_mm: f64,
        style: TextStyle,
    ) -> TextBlock {
        let line_height = self.spec.line_height;
        let max_lines = ((height_mm + 1e-9) / line_height).floor().max(1.0) as usize;
        let mut lines = self.wrap(text, width_mm, style);
        let truncated = lines.len() > max_lines;
        lines.truncate(max_lines);

        TextBlock {
            x_mm,
            top_mm,
            width_mm,
            height_mm,
            line_height_mm: line_height,
            style,
            lines,
            truncated,
        }
    }

    /// Greedy word wrap; words wider than the box are broken between characters.
    fn wrap(&self, text: &str, width_mm: f64, style: TextStyle) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = String::new();

        for word in text.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if self.measure.width_mm(&candidate, style) <= width_mm {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if self.measure.width_mm(word, style) <= width_mm {
                current = word.to_string();
            } else {
                let mut pieces = self.split_word(word, width_mm, style);
                current = pieces.pop().unwrap_or_default();
                lines.extend(pieces);
            }
        }

        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }

    fn split_word(&self, word: &str, width_mm: f64, style: TextStyle) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut piece = String::new();
        for ch in word.chars() {
            piece.push(ch);
            if piece.chars().count() > 1 && self.measure.width_mm(&piece, style) > width_mm {
                piece.pop();
                pieces.push(std::mem::take(&mut piece));
                piece.push(ch);
            }
        }
        if !piece.is_empty() {
            pieces.push(piece);
        }
        pieces
    }
}
