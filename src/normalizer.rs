//! Turns the raw survey export into canonical per-respondent records.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::{debug, info};

use crate::error::{Result, SaveOutcome, SurveyError};
use crate::schema::ExportSchema;
use crate::text::{self, question_alias};

/// Stable identifier `q<NN>_<slug>` of a question column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuestionAlias(String);

impl QuestionAlias {
    /// Builds the alias of the question at 1-based `ordinal` from its header text.
    pub fn new(ordinal: usize, header: &str) -> Self {
        Self(question_alias(ordinal, header))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 1-based position of the question among the detected question columns.
    pub fn ordinal(&self) -> usize {
        text::alias_ordinal(&self.0).unwrap_or(0)
    }
}

impl std::fmt::Display for QuestionAlias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A detected question column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuestionEntry {
    pub alias: QuestionAlias,
    /// Column name in the canonical file.
    pub column: String,
    /// Full header text shown next to the answer; never truncated.
    pub label: String,
}

/// Question columns of a canonical file in source order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuestionMap {
    entries: Vec<QuestionEntry>,
}

impl QuestionMap {
    /// Every header that is not respondent metadata becomes a question, numbered from 1.
    pub fn from_headers<'a, I>(headers: I, schema: &ExportSchema) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let entries = headers
            .into_iter()
            .filter(|header| !schema.is_metadata(header))
            .enumerate()
            .map(|(index, header)| QuestionEntry {
                alias: QuestionAlias::new(index + 1, header),
                column: header.to_string(),
                label: header.to_string(),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[QuestionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, alias: &QuestionAlias) -> Option<&QuestionEntry> {
        self.entries.iter().find(|entry| &entry.alias == alias)
    }
}

/// One respondent's answer to one question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub alias: QuestionAlias,
    pub answer: String,
}

/// One respondent's cleaned row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalRecord {
    /// Title-cased respondent name.
    pub name: String,
    /// Kept as text so leading zeros survive.
    pub sis_id: String,
    /// Submission date as `DD/MM/YYYY`, or empty when the source value was unparseable.
    pub submitted: String,
    /// Answers in question order.
    pub responses: Vec<Response>,
}

impl CanonicalRecord {
    pub fn answer(&self, alias: &QuestionAlias) -> Option<&str> {
        self.responses
            .iter()
            .find(|response| &response.alias == alias)
            .map(|response| response.answer.as_str())
    }
}

/// Normalized report: canonical headers, detected questions and one record per source row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanReport {
    pub headers: Vec<String>,
    pub questions: QuestionMap,
    pub records: Vec<CanonicalRecord>,
}

impl CleanReport {
    fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>, schema: &ExportSchema) -> Result<Self> {
        let column = |name: &str| {
            headers
                .iter()
                .position(|header| header == name)
                .ok_or_else(|| SurveyError::Parse(format!("column `{}` not found", name)))
        };
        let name_idx = column(schema.name_column)?;
        let id_idx = column(schema.id_column)?;
        let submitted_idx = column(schema.submitted_column)?;

        let questions = QuestionMap::from_headers(headers.iter().map(String::as_str), schema);
        let question_positions: Vec<usize> = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !schema.is_metadata(header))
            .map(|(index, _)| index)
            .collect();

        let records = rows
            .into_iter()
            .map(|row| {
                let cell = |index: usize| row.get(index).cloned().unwrap_or_default();
                CanonicalRecord {
                    name: cell(name_idx),
                    sis_id: cell(id_idx),
                    submitted: cell(submitted_idx),
                    responses: questions
                        .entries()
                        .iter()
                        .zip(&question_positions)
                        .map(|(entry, &index)| Response {
                            alias: entry.alias.clone(),
                            answer: cell(index),
                        })
                        .collect(),
                }
            })
            .collect();

        Ok(Self {
            headers,
            questions,
            records,
        })
    }

    /// Canonical row for `record` in header order.
    fn row_of(&self, record: &CanonicalRecord, schema: &ExportSchema) -> Vec<String> {
        let mut answers = record.responses.iter();
        self.headers
            .iter()
            .map(|header| {
                if header == schema.name_column {
                    record.name.clone()
                } else if header == schema.id_column {
                    record.sis_id.clone()
                } else if header == schema.submitted_column {
                    record.submitted.clone()
                } else {
                    answers
                        .next()
                        .map(|response| response.answer.clone())
                        .unwrap_or_default()
                }
            })
            .collect()
    }
}

/// Loads a raw comma-separated export and cleans it according to `schema`.
///
/// Only the schema's ordinal columns are read. Headers are trimmed, renamed headers lose their
/// export prefix, blank cells become empty strings, submission times are reformatted to
/// `DD/MM/YYYY` and names are title-cased. Row order is preserved.
pub fn load_and_clean(path: impl AsRef<Path>, schema: &ExportSchema) -> Result<CleanReport> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| SurveyError::Parse(format!("{}: {}", path.display(), err)))?;

    let raw_headers = reader
        .headers()
        .map_err(|err| SurveyError::Parse(format!("{}: {}", path.display(), err)))?
        .clone();
    if raw_headers.len() < schema.required_width() {
        return Err(SurveyError::Parse(format!(
            "{}: expected at least {} columns for {}, found {}",
            path.display(),
            schema.required_width(),
            schema.version,
            raw_headers.len()
        )));
    }

    let headers: Vec<String> = schema
        .columns
        .iter()
        .enumerate()
        .map(|(position, &ordinal)| schema.clean_header(position, &raw_headers[ordinal]))
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|err| SurveyError::Parse(format!("{}: {}", path.display(), err)))?;
        let row: Vec<String> = schema
            .columns
            .iter()
            .map(|&ordinal| record.get(ordinal).unwrap_or("").to_string())
            .collect();
        rows.push(row);
    }

    info!(
        "Loaded {} with {} rows and {} columns ({})",
        path.display(),
        rows.len(),
        headers.len(),
        schema.version
    );

    let mut report = CleanReport::from_rows(headers, rows, schema)?;
    for record in &mut report.records {
        record.submitted = format_submitted(&record.submitted).unwrap_or_default();
        record.name = text::title_case(&record.name);
    }
    debug!("Detected {} question columns", report.questions.len());

    Ok(report)
}

/// Reads a canonical semicolon-separated file written by [`save`].
pub fn load_processed(path: impl AsRef<Path>, schema: &ExportSchema) -> Result<CleanReport> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| SurveyError::Parse(format!("{}: {}", path.display(), err)))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| SurveyError::Parse(format!("{}: {}", path.display(), err)))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|err| SurveyError::Parse(format!("{}: {}", path.display(), err)))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    CleanReport::from_rows(headers, rows, schema)
}

/// Writes `report` as a semicolon-separated file, skipping when `destination` already exists.
pub fn save(
    report: &CleanReport,
    destination: impl AsRef<Path>,
    schema: &ExportSchema,
) -> Result<SaveOutcome> {
    let destination = destination.as_ref();
    if destination.exists() {
        info!("Processed file already present at {}", destination.display());
        return Ok(SaveOutcome::Skipped(destination.to_path_buf()));
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(destination)?;
    writer.write_record(&report.headers)?;
    for record in &report.records {
        writer.write_record(report.row_of(record, schema))?;
    }
    writer.flush()?;

    info!("Processed file saved to {}", destination.display());
    Ok(SaveOutcome::Written(destination.to_path_buf()))
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Reformats a submission timestamp as `DD/MM/YYYY`; `None` when it cannot be parsed.
pub fn format_submitted(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let trimmed_zone = value
        .strip_suffix(" UTC")
        .or_else(|| value.strip_suffix('Z'))
        .unwrap_or(value);

    let date = DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.date_naive())
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z").map(|dt| dt.date_naive()))
        .ok()
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(trimmed_zone, format).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(trimmed_zone, format).ok())
        })?;

    Some(date.format("%d/%m/%Y").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::STUDENT_ANALYSIS_V1;

    #[test]
    fn formats_common_timestamps() {
        assert_eq!(
            format_submitted("2025-06-10 14:32:11 UTC").as_deref(),
            Some("10/06/2025")
        );
        assert_eq!(
            format_submitted("2025-06-10T14:32:11-03:00").as_deref(),
            Some("10/06/2025")
        );
        assert_eq!(format_submitted("2025-06-10").as_deref(), Some("10/06/2025"));
        assert_eq!(format_submitted("not a date"), None);
        assert_eq!(format_submitted(""), None);
    }

    #[test]
    fn question_map_skips_metadata_and_keeps_labels() {
        let headers = ["name", "sis_id", "submitted", "Como você avalia o curso?", "Comentários"];
        let map = QuestionMap::from_headers(headers, &STUDENT_ANALYSIS_V1);
        assert_eq!(map.len(), 2);
        assert_eq!(map.entries()[0].alias.as_str(), "q01_como_voce_avalia_o_curso");
        assert_eq!(map.entries()[0].label, "Como você avalia o curso?");
        assert_eq!(map.entries()[1].alias.ordinal(), 2);
    }
}
