//! End-to-end pipeline: search, report fetch, normalization, overlays and final documents.
//!
//! Batch stages isolate failures per item: a record or overlay that fails is logged, recorded in
//! the returned [`BatchReport`] and the batch moves on.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{error, info, warn};
use regex::Regex;

use crate::api::{Assignment, ReportFile, SurveyApi};
use crate::composer;
use crate::config::Config;
use crate::error::{Result, SaveOutcome, SurveyError};
use crate::fonts;
use crate::layout::Period;
use crate::normalizer::{self, CanonicalRecord};
use crate::poller::{Clock, JobStatus, ReportJobPoller, SystemClock};
use crate::render::OverlayRenderer;
use crate::schema::ExportSchema;
use crate::text;

const OVERLAY_PREFIX: &str = "overlay_";

/// Picks one assignment out of the search results.
pub trait AssignmentPolicy {
    fn select<'a>(&self, matches: &'a [Assignment]) -> Option<&'a Assignment>;
}

/// Takes the first search result.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstMatchPolicy;

impl AssignmentPolicy for FirstMatchPolicy {
    fn select<'a>(&self, matches: &'a [Assignment]) -> Option<&'a Assignment> {
        matches.first()
    }
}

/// Takes the n-th search result, counting from 1.
#[derive(Clone, Copy, Debug)]
pub struct IndexPolicy(pub usize);

impl AssignmentPolicy for IndexPolicy {
    fn select<'a>(&self, matches: &'a [Assignment]) -> Option<&'a Assignment> {
        self.0.checked_sub(1).and_then(|index| matches.get(index))
    }
}

/// Picks the record rendered in preview mode.
pub trait RecordSelectionPolicy {
    fn select<'a>(&self, records: &'a [CanonicalRecord]) -> Option<&'a CanonicalRecord>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FirstRecordPolicy;

impl RecordSelectionPolicy for FirstRecordPolicy {
    fn select<'a>(&self, records: &'a [CanonicalRecord]) -> Option<&'a CanonicalRecord> {
        records.first()
    }
}

/// Outcome of a batch stage.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<PathBuf>,
    /// Item label and error message of every item that failed.
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    fn record_failure(&mut self, item: impl Into<String>, err: &SurveyError) {
        let item = item.into();
        error!("{} failed: {}", item, err);
        self.failed.push((item, err.to_string()));
    }
}

/// Files produced by the extraction stage.
#[derive(Debug)]
pub struct Extraction {
    pub assignment: Assignment,
    pub report: ReportFile,
    pub raw: SaveOutcome,
    pub processed: SaveOutcome,
}

/// Summary of a full pipeline run.
#[derive(Debug)]
pub struct RunSummary {
    pub extraction: Extraction,
    pub period: Period,
    pub overlays: BatchReport,
    pub documents: BatchReport,
}

/// Respondent name made safe for use inside a file name.
pub fn respondent_file_stem(name: &str) -> String {
    name.replace('/', "-").trim().to_string()
}

/// `overlay_<Name>_<Month>_<Year>.pdf`, or `overlay_<Name>.pdf` when the period is unknown.
pub fn overlay_file_name(name: &str, period: &Period) -> String {
    let name = respondent_file_stem(name);
    match (&period.month, &period.year) {
        (Some(month), Some(year)) => format!("{}{}_{}_{}.pdf", OVERLAY_PREFIX, name, month, year),
        _ => format!("{}{}.pdf", OVERLAY_PREFIX, name),
    }
}

/// `Relatório <Month> <Year> - <Name>.pdf`, or `Relatório - <Name>.pdf` when the period is unknown.
pub fn final_file_name(name: &str, period: &Period) -> String {
    let name = respondent_file_stem(name);
    match (&period.month, &period.year) {
        (Some(month), Some(year)) => format!("Relatório {} {} - {}.pdf", month, year, name),
        _ => format!("Relatório - {}.pdf", name),
    }
}

fn overlay_suffix() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)_(janeiro|fevereiro|mar[cç]o|abril|maio|junho|julho|agosto|setembro|outubro|novembro|dezembro)_(\d{4})$",
        )
        .expect("overlay suffix pattern is valid")
    })
}

/// Splits an overlay file stem into the respondent name and the period encoded in it.
pub fn parse_overlay_stem(stem: &str) -> (String, Period) {
    let rest = stem.strip_prefix(OVERLAY_PREFIX).unwrap_or(stem);
    match overlay_suffix().captures(rest) {
        Some(caps) => {
            let start = caps.get(0).map_or(rest.len(), |m| m.start());
            let period = Period::new(Some(caps[1].to_string()), Some(caps[2].to_string()));
            (rest[..start].trim().to_string(), period)
        }
        None => (rest.trim().to_string(), Period::default()),
    }
}

/// Marker for a pipeline that only runs the local stages (overlays, preview, compose).
#[derive(Clone, Copy, Debug, Default)]
pub struct Offline;

/// Runs the pipeline stages. Stages that talk to the survey system need `A: SurveyApi`.
pub struct Pipeline<A> {
    config: Config,
    api: A,
    schema: ExportSchema,
    clock: Box<dyn Clock>,
}

impl Pipeline<Offline> {
    pub fn offline(config: Config) -> Self {
        Self::new(config, Offline)
    }
}

impl<A> Pipeline<A> {
    pub fn new(config: Config, api: A) -> Self {
        Self {
            config,
            api,
            schema: ExportSchema::default(),
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_schema(mut self, schema: ExportSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    fn renderer(&self) -> Result<OverlayRenderer> {
        let fonts = fonts::load_font_set(self.config.fonts_dir.as_deref())?;
        Ok(OverlayRenderer::new(fonts))
    }

    /// Renders one overlay per record of the processed file `csv`.
    ///
    /// Missing month/year parts of `period` are inferred from the file name.
    pub fn render_overlays(&self, csv: &Path, period: &Period) -> Result<BatchReport> {
        let report = normalizer::load_processed(csv, &self.schema)?;
        if report.records.is_empty() {
            return Err(SurveyError::NotFound(format!(
                "{} has no records",
                csv.display()
            )));
        }
        let period = period.fill_from(&source_name(csv));
        let renderer = self.renderer()?;

        let mut batch = BatchReport::default();
        for record in &report.records {
            let dest = self
                .config
                .overlay_dir
                .join(overlay_file_name(&record.name, &period));
            match renderer.render_to_file(record, &report.questions, &period, &dest) {
                Ok(path) => batch.succeeded.push(path),
                Err(err) => batch.record_failure(format!("overlay for {}", record.name), &err),
            }
        }
        info!(
            "{} overlay(s) written, {} failed",
            batch.succeeded.len(),
            batch.failed.len()
        );
        Ok(batch)
    }

    /// Renders the overlay of the single record chosen by `policy`.
    pub fn build_overlay_preview(
        &self,
        csv: &Path,
        period: &Period,
        policy: &dyn RecordSelectionPolicy,
    ) -> Result<PathBuf> {
        let report = normalizer::load_processed(csv, &self.schema)?;
        let record = policy.select(&report.records).ok_or_else(|| {
            SurveyError::NotFound(format!("{} has no record to preview", csv.display()))
        })?;
        let period = period.fill_from(&source_name(csv));
        let dest = self
            .config
            .overlay_dir
            .join(overlay_file_name(&record.name, &period));
        self.renderer()?
            .render_to_file(record, &report.questions, &period, &dest)
    }

    /// Composes every `overlay_*.pdf` in the overlay directory with the template.
    ///
    /// An empty overlay directory yields an empty report.
    pub fn compose_all(&self, period: &Period) -> Result<BatchReport> {
        let overlays = list_overlays(&self.config.overlay_dir)?;
        if overlays.is_empty() {
            warn!(
                "No overlays found in {}",
                self.config.overlay_dir.display()
            );
            return Ok(BatchReport::default());
        }
        self.compose_overlays(&overlays, period)
    }

    /// Composes `overlays` with the template, one final document each.
    ///
    /// An overlay whose name carries a month and year keeps them; `period` only names the
    /// overlays that carry none.
    pub fn compose_overlays(&self, overlays: &[PathBuf], period: &Period) -> Result<BatchReport> {
        let mut batch = BatchReport::default();
        fs::create_dir_all(&self.config.output_dir)?;

        for overlay in overlays {
            let stem = overlay
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            let (respondent, detected) = parse_overlay_stem(&stem);
            let period = if detected.is_known() {
                if period.is_known() && detected != *period {
                    warn!(
                        "{} belongs to {}, not {}",
                        overlay.display(),
                        detected.caption().unwrap_or_default(),
                        period.caption().unwrap_or_default()
                    );
                }
                detected
            } else {
                period.clone()
            };
            let output = self
                .config
                .output_dir
                .join(final_file_name(&respondent, &period));

            match composer::compose_files(&self.config.template_path, overlay, &output) {
                Ok(()) => batch.succeeded.push(output),
                Err(err) => batch.record_failure(overlay.display().to_string(), &err),
            }
        }
        info!(
            "{} document(s) composed, {} failed",
            batch.succeeded.len(),
            batch.failed.len()
        );
        Ok(batch)
    }
}

impl<A: SurveyApi> Pipeline<A> {
    /// Searches assignments for `term` and applies `policy` to the results.
    pub fn resolve_assignment(
        &self,
        term: &str,
        policy: &dyn AssignmentPolicy,
    ) -> Result<Assignment> {
        let matches = self.api.search_assignments(term)?;
        if matches.is_empty() {
            warn!("No assignment found for {:?}", term);
            return Err(SurveyError::NotFound(format!(
                "no assignment matches {:?}",
                term
            )));
        }
        for (index, assignment) in matches.iter().enumerate() {
            info!(
                "{}. {} (quiz_id: {})",
                index + 1,
                assignment.name,
                assignment.quiz_id
            );
        }

        let selected = policy.select(&matches).cloned().ok_or_else(|| {
            SurveyError::NotFound(format!(
                "selection is outside the {} assignment(s) found for {:?}",
                matches.len(),
                term
            ))
        })?;
        info!("Using {} (quiz_id: {})", selected.name, selected.quiz_id);
        Ok(selected)
    }

    /// Submits a report for `quiz_id` and waits for its file.
    pub fn fetch_report(&self, quiz_id: u64) -> Result<ReportFile> {
        let job = ReportJobPoller::new(&self.api)
            .with_clock(&*self.clock)
            .submit_and_wait(quiz_id, self.config.max_wait, self.config.poll_interval)?;

        match job.status {
            JobStatus::Ready => job.file.ok_or_else(|| {
                SurveyError::NotFound(format!("report {} has no file", job.report_id))
            }),
            JobStatus::Failed => Err(SurveyError::transport(
                format!("quizzes/{}/reports/{}", quiz_id, job.report_id),
                "report generation failed",
            )),
            JobStatus::TimedOut | JobStatus::Pending => Err(SurveyError::Timeout {
                quiz_id,
                waited: self.config.max_wait,
            }),
        }
    }

    /// Saves the report file under its display name in the raw directory.
    pub fn download_report(&self, file: &ReportFile) -> Result<SaveOutcome> {
        let dest = self
            .config
            .raw_dir
            .join(text::sanitize_file_name(&file.display_name));
        if dest.exists() {
            info!("{} already downloaded, skipping", dest.display());
            return Ok(SaveOutcome::Skipped(dest));
        }

        let bytes = self.api.download(&file.url)?;
        fs::create_dir_all(&self.config.raw_dir)?;
        fs::write(&dest, bytes)?;
        info!("Report saved to {}", dest.display());
        Ok(SaveOutcome::Written(dest))
    }

    /// Search, fetch, download and normalize. The processed file keeps the raw file's name.
    pub fn extract(&self, term: &str, policy: &dyn AssignmentPolicy) -> Result<Extraction> {
        let assignment = self.resolve_assignment(term, policy)?;
        let report = self.fetch_report(assignment.quiz_id)?;
        let raw = self.download_report(&report)?;

        let file_name = raw
            .path()
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| SurveyError::Parse(format!("{} has no file name", raw.path().display())))?;
        let processed_path = self.config.processed_dir.join(file_name);
        let processed = if processed_path.exists() {
            info!("{} already normalized, skipping", processed_path.display());
            SaveOutcome::Skipped(processed_path)
        } else {
            let cleaned = normalizer::load_and_clean(raw.path(), &self.schema)?;
            normalizer::save(&cleaned, &processed_path, &self.schema)?
        };

        Ok(Extraction {
            assignment,
            report,
            raw,
            processed,
        })
    }

    /// Extraction followed by overlays and final documents for every respondent of this run.
    pub fn run(
        &self,
        term: &str,
        period: &Period,
        policy: &dyn AssignmentPolicy,
    ) -> Result<RunSummary> {
        let extraction = self.extract(term, policy)?;
        let period = period.fill_from(&extraction.report.display_name);
        let overlays = self.render_overlays(extraction.processed.path(), &period)?;
        let documents = self.compose_overlays(&overlays.succeeded, &period)?;
        Ok(RunSummary {
            extraction,
            period,
            overlays,
            documents,
        })
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `overlay_*.pdf` files of `dir`, sorted by path.
fn list_overlays(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut overlays = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path.is_file()
            && path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| {
                    name.starts_with(OVERLAY_PREFIX) && name.to_lowercase().ends_with(".pdf")
                });
        if matches {
            overlays.push(path);
        }
    }
    overlays.sort();
    Ok(overlays)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(id: u64) -> Assignment {
        Assignment {
            id,
            name: format!("Avaliação {}", id),
            quiz_id: id * 10,
        }
    }

    #[test]
    fn selection_policies() {
        let matches = vec![assignment(1), assignment(2)];
        assert_eq!(FirstMatchPolicy.select(&matches).map(|a| a.id), Some(1));
        assert_eq!(IndexPolicy(2).select(&matches).map(|a| a.id), Some(2));
        assert!(IndexPolicy(0).select(&matches).is_none());
        assert!(IndexPolicy(3).select(&matches).is_none());
        assert!(FirstMatchPolicy.select(&[]).is_none());
    }

    #[test]
    fn file_names_follow_period() {
        let known = Period::new(Some("Junho".into()), Some("2025".into()));
        assert_eq!(overlay_file_name("Ana/Souza", &known), "overlay_Ana-Souza_Junho_2025.pdf");
        assert_eq!(final_file_name("Ana Souza", &known), "Relatório Junho 2025 - Ana Souza.pdf");

        let unknown = Period::default();
        assert_eq!(overlay_file_name("Ana Souza", &unknown), "overlay_Ana Souza.pdf");
        assert_eq!(final_file_name("Ana Souza", &unknown), "Relatório - Ana Souza.pdf");
    }

    #[test]
    fn overlay_stem_round_trips_name_and_period() {
        let (name, period) = parse_overlay_stem("overlay_Ana Souza_Março_2025");
        assert_eq!(name, "Ana Souza");
        assert_eq!(period.month.as_deref(), Some("Março"));
        assert_eq!(period.year.as_deref(), Some("2025"));

        let (name, period) = parse_overlay_stem("overlay_joao_marco_2024");
        assert_eq!(name, "joao");
        assert_eq!(period.month.as_deref(), Some("Março"));

        let (name, period) = parse_overlay_stem("overlay_Ana Souza");
        assert_eq!(name, "Ana Souza");
        assert!(!period.is_known());
    }

    #[test]
    fn batch_report_counts_items() {
        let mut batch = BatchReport::default();
        batch.succeeded.push(PathBuf::from("a.pdf"));
        batch.record_failure("b.pdf", &SurveyError::Compose("overlay has no pages".into()));
        assert_eq!(batch.total(), 2);
        assert!(batch.has_failures());
    }
}
