//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::time::{Duration, Instant};

use lopdf::{Dictionary, Document, Object, Stream};

use survey_report::api::{Assignment, ReportFile, ReportSnapshot, SurveyApi};
use survey_report::poller::Clock;
use survey_report::{Result, SurveyError};

pub const REPORT_NAME: &str = "Relatório Junho 2025 - Turma A.csv";

/// Builds a PDF whose page `n` draws the text `<prefix>-Page-<n>`.
pub fn create_test_pdf(num_pages: u32, content_prefix: &str) -> Vec<u8> {
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
        page_dict.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ]),
        );
        doc.objects.insert(page_id, Object::Dictionary(page_dict));
        page_ids.push(Object::Reference(page_id));
    }

    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set("Count", Object::Integer(num_pages as i64));
    pages_dict.set("Kids", Object::Array(page_ids));
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

/// Raw student-analysis export: 36 columns, fifteen prefixed question headers at the odd
/// positions from 7 on, one row per respondent.
pub fn raw_export_csv(respondents: &[(&str, &str)]) -> String {
    let mut headers: Vec<String> = (0..36).map(|i| format!("extra_{}", i)).collect();
    headers[0] = "name".to_string();
    headers[2] = "sis_id".to_string();
    headers[6] = "submitted".to_string();
    for (n, ordinal) in (7..36).step_by(2).enumerate() {
        headers[ordinal] = format!("{:07}: Pergunta {} sobre o curso?", 1000 + n, n + 1);
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&headers).unwrap();
    for (name, sis_id) in respondents {
        let mut row: Vec<String> = (0..36).map(|i| format!("score {}", i)).collect();
        row[0] = name.to_string();
        row[2] = sis_id.to_string();
        row[6] = "2025-06-10 14:32:00 UTC".to_string();
        for (n, ordinal) in (7..36).step_by(2).enumerate() {
            row[ordinal] = format!("Resposta {} de {}", n + 1, name);
        }
        writer.write_record(&row).unwrap();
    }
    String::from_utf8(writer.into_inner().unwrap()).unwrap()
}

/// Clock that only moves when the poller sleeps.
pub struct ManualClock {
    start: Instant,
    offset: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.offset.get()
    }

    fn sleep(&self, duration: Duration) {
        self.offset.set(self.offset.get() + duration);
    }
}

/// In-memory survey system.
pub struct FakeApi {
    pub assignments: Vec<Assignment>,
    /// Status polls answered with "pending" before the file shows up; `None` never finishes.
    pub pending_polls: Option<u32>,
    pub export: Vec<u8>,
    pub polls: Cell<u32>,
    pub downloads: Cell<u32>,
    pub submitted: RefCell<Vec<u64>>,
}

impl FakeApi {
    pub fn with_export(export: String) -> Self {
        Self {
            assignments: vec![
                Assignment {
                    id: 1,
                    name: "Avaliação Docente 2025".to_string(),
                    quiz_id: 501,
                },
                Assignment {
                    id: 2,
                    name: "Avaliação Coordenação 2025".to_string(),
                    quiz_id: 502,
                },
            ],
            pending_polls: Some(1),
            export: export.into_bytes(),
            polls: Cell::new(0),
            downloads: Cell::new(0),
            submitted: RefCell::new(Vec::new()),
        }
    }
}

impl SurveyApi for FakeApi {
    fn search_assignments(&self, term: &str) -> Result<Vec<Assignment>> {
        Ok(self
            .assignments
            .iter()
            .filter(|assignment| assignment.name.contains(term))
            .cloned()
            .collect())
    }

    fn submit_report(&self, quiz_id: u64) -> Result<u64> {
        self.submitted.borrow_mut().push(quiz_id);
        Ok(9000 + quiz_id)
    }

    fn report_status(&self, _quiz_id: u64, _report_id: u64) -> Result<ReportSnapshot> {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        match self.pending_polls {
            Some(pending) if polls > pending => Ok(ReportSnapshot {
                file: Some(ReportFile {
                    display_name: REPORT_NAME.to_string(),
                    url: "https://files.example/report.csv".to_string(),
                }),
                progress: None,
            }),
            _ => Ok(ReportSnapshot::default()),
        }
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.downloads.set(self.downloads.get() + 1);
        if url.is_empty() {
            return Err(SurveyError::Transport {
                endpoint: url.to_string(),
                message: "empty url".to_string(),
            });
        }
        Ok(self.export.clone())
    }
}
