//! Client for the survey system's REST API.
//!
//! [`SurveyApi`] is the seam the poller and the pipeline talk to; [`HttpSurveyApi`] implements it
//! over blocking HTTP with bearer authentication.

use std::fs;

use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Certificate;
use serde::Deserialize;

use crate::config::Config;
use crate::error::{Result, SurveyError};

/// An assignment linked to a quiz.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Assignment {
    pub id: u64,
    pub name: String,
    pub quiz_id: u64,
}

/// Attachment of a finished report job.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ReportFile {
    pub display_name: String,
    pub url: String,
}

/// Server-side progress of a report job.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ReportProgress {
    #[serde(default)]
    pub workflow_state: Option<String>,
    #[serde(default)]
    pub completion: Option<f64>,
}

impl ReportProgress {
    pub fn is_failed(&self) -> bool {
        self.workflow_state.as_deref() == Some("failed")
    }
}

/// One status observation of a report job.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ReportSnapshot {
    #[serde(default)]
    pub file: Option<ReportFile>,
    #[serde(default)]
    pub progress: Option<ReportProgress>,
}

/// Operations the pipeline needs from the survey system.
pub trait SurveyApi {
    /// Assignments whose title matches `term`. Assignments without a quiz are left out.
    fn search_assignments(&self, term: &str) -> Result<Vec<Assignment>>;

    /// Starts a student-analysis report for `quiz_id` and returns the report id.
    fn submit_report(&self, quiz_id: u64) -> Result<u64>;

    fn report_status(&self, quiz_id: u64, report_id: u64) -> Result<ReportSnapshot>;

    /// Raw bytes behind an artifact URL.
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Deserialize)]
struct RawAssignment {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    quiz_id: Option<u64>,
}

#[derive(Deserialize)]
struct CreatedReport {
    id: u64,
}

/// [`SurveyApi`] over HTTPS.
pub struct HttpSurveyApi {
    client: Client,
    config: Config,
}

impl HttpSurveyApi {
    /// Builds a client with the configured timeout and optional extra CA bundle.
    pub fn new(config: Config) -> Result<Self> {
        config.validate_credentials()?;

        let mut builder = Client::builder().timeout(config.request_timeout);
        if let Some(path) = &config.ca_bundle {
            let pem = fs::read(path)?;
            let certificate = Certificate::from_pem(&pem).map_err(|err| {
                SurveyError::Config(format!("invalid CA bundle {}: {}", path.display(), err))
            })?;
            builder = builder.add_root_certificate(certificate);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    fn submit_request(&self, quiz_id: u64) -> (String, RequestBuilder) {
        let endpoint = self
            .config
            .course_url(&format!("quizzes/{}/reports", quiz_id));
        let request = self.client.post(&endpoint).query(&[
            ("quiz_report[report_type]", "student_analysis"),
            ("include", "file"),
        ]);
        (endpoint, request)
    }

    fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<Response> {
        debug!("Requesting {}", endpoint);
        let response = request
            .bearer_auth(&self.config.token)
            .send()
            .map_err(|err| SurveyError::transport(endpoint, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SurveyError::transport(
                endpoint,
                format!("{}: {}", status, body.trim()),
            ));
        }
        Ok(response)
    }
}

impl SurveyApi for HttpSurveyApi {
    fn search_assignments(&self, term: &str) -> Result<Vec<Assignment>> {
        let endpoint = self.config.course_url("assignments");
        let request = self
            .client
            .get(&endpoint)
            .query(&[("search_term", term), ("per_page", "100")]);

        let raw: Vec<RawAssignment> = self
            .send(&endpoint, request)?
            .json()
            .map_err(|err| SurveyError::transport(&endpoint, err.to_string()))?;

        Ok(raw
            .into_iter()
            .filter_map(|item| {
                item.quiz_id.map(|quiz_id| Assignment {
                    id: item.id,
                    name: item.name,
                    quiz_id,
                })
            })
            .collect())
    }

    fn submit_report(&self, quiz_id: u64) -> Result<u64> {
        let (endpoint, request) = self.submit_request(quiz_id);

        let created: CreatedReport = self
            .send(&endpoint, request)?
            .json()
            .map_err(|err| SurveyError::transport(&endpoint, err.to_string()))?;
        Ok(created.id)
    }

    fn report_status(&self, quiz_id: u64, report_id: u64) -> Result<ReportSnapshot> {
        let endpoint = self
            .config
            .course_url(&format!("quizzes/{}/reports/{}", quiz_id, report_id));
        let request = self
            .client
            .get(&endpoint)
            .query(&[("include[]", "file"), ("include[]", "progress")]);

        self.send(&endpoint, request)?
            .json()
            .map_err(|err| SurveyError::transport(&endpoint, err.to_string()))
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .send(url, self.client.get(url))?
            .bytes()
            .map_err(|err| SurveyError::transport(url, err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_tolerates_missing_fields() {
        let snapshot: ReportSnapshot = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        assert!(snapshot.file.is_none());
        assert!(snapshot.progress.is_none());

        let snapshot: ReportSnapshot = serde_json::from_str(
            r#"{"file": {"display_name": "Relatório Junho 2025.csv", "url": "https://files/1"},
                "progress": {"workflow_state": "completed", "completion": 100}}"#,
        )
        .unwrap();
        assert_eq!(snapshot.file.unwrap().display_name, "Relatório Junho 2025.csv");
        assert!(!snapshot.progress.unwrap().is_failed());
    }

    #[test]
    fn client_requires_token() {
        let result = HttpSurveyApi::new(Config::default());
        assert!(matches!(result, Err(SurveyError::Config(_))));
    }

    #[test]
    fn report_parameters_travel_in_the_query() {
        let config = Config {
            token: "secret".to_string(),
            ..Config::default()
        };
        let api = HttpSurveyApi::new(config).unwrap();
        let (endpoint, request) = api.submit_request(42);
        let request = request.build().unwrap();

        assert!(endpoint.ends_with("/quizzes/42/reports"));
        assert_eq!(
            request.url().query(),
            Some("quiz_report%5Breport_type%5D=student_analysis&include=file")
        );
        assert!(request.body().is_none());
    }
}
