//! Survey report pipeline: fetches student-analysis exports from the survey system, normalizes
//! them and renders one templated PDF per respondent.

pub mod api;
pub mod composer;
pub mod config;
pub mod error;
pub mod fonts;
pub mod layout;
pub mod normalizer;
pub mod orchestrator;
pub mod poller;
pub mod render;
pub mod schema;
pub mod text;

pub use api::{Assignment, HttpSurveyApi, ReportFile, SurveyApi};
pub use config::Config;
pub use error::{Result, SaveOutcome, SurveyError};
pub use layout::{GridLayoutEngine, GridSpec, Period};
pub use normalizer::{CanonicalRecord, CleanReport, QuestionMap};
pub use orchestrator::{BatchReport, FirstMatchPolicy, FirstRecordPolicy, IndexPolicy, Pipeline};
pub use poller::{JobStatus, ReportJob, ReportJobPoller};
pub use schema::{ExportSchema, STUDENT_ANALYSIS_V1};
