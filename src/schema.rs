//! Column layout of the survey system's `student_analysis` CSV export.

use std::ops::Range;

/// Describes which columns of a raw export are kept and how their headers are cleaned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportSchema {
    /// Identifier recorded in logs when a file is normalized with this schema.
    pub version: &'static str,
    /// Ordinal positions read from the raw export, in output order.
    pub columns: &'static [usize],
    /// Positions (within `columns`) whose headers carry the export-tool prefix.
    pub renamed: Range<usize>,
    /// Number of leading characters removed from each renamed header.
    pub prefix_chars: usize,
    pub name_column: &'static str,
    pub id_column: &'static str,
    pub submitted_column: &'static str,
}

/// Student-analysis export: name, SIS id and submission time followed by fifteen question text
/// columns, each separated from the next by a score column.
pub const STUDENT_ANALYSIS_V1: ExportSchema = ExportSchema {
    version: "student_analysis/v1",
    columns: &[
        0, 2, 6, 7, 9, 11, 13, 15, 17, 19, 21, 23, 25, 27, 29, 31, 33, 35,
    ],
    renamed: 3..18,
    prefix_chars: 9,
    name_column: "name",
    id_column: "sis_id",
    submitted_column: "submitted",
};

impl ExportSchema {
    /// Smallest number of raw columns an export must have to satisfy this schema.
    pub fn required_width(&self) -> usize {
        self.columns.iter().max().map_or(0, |max| max + 1)
    }

    /// Whether `name` is one of the respondent metadata columns.
    pub fn is_metadata(&self, name: &str) -> bool {
        name == self.name_column || name == self.id_column || name == self.submitted_column
    }

    /// Header cleanup for the selected column at `position`.
    pub fn clean_header(&self, position: usize, raw: &str) -> String {
        let trimmed = raw.trim();
        if self.renamed.contains(&position) {
            trimmed
                .chars()
                .skip(self.prefix_chars)
                .collect::<String>()
                .trim()
                .to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl Default for ExportSchema {
    fn default() -> Self {
        STUDENT_ANALYSIS_V1
    }
}
