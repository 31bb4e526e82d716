//! Runtime configuration passed explicitly into every component.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SurveyError};

const DEFAULT_API_URL: &str = "https://famonline.instructure.com";
const DEFAULT_COURSE_ID: u64 = 15812;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(120);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Settings for the survey API client and the on-disk layout of the pipeline.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the survey system, without the `/api/v1` suffix.
    pub api_base_url: String,
    pub course_id: u64,
    /// Bearer token sent with every request.
    pub token: String,
    /// PEM bundle used to verify the server certificate, in addition to the system roots.
    pub ca_bundle: Option<PathBuf>,
    pub request_timeout: Duration,
    /// Longest time to wait for a report job to attach its file.
    pub max_wait: Duration,
    pub poll_interval: Duration,
    /// Downloaded report exports.
    pub raw_dir: PathBuf,
    /// Normalized semicolon-separated files.
    pub processed_dir: PathBuf,
    pub overlay_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Directory holding the three font weights. `None` uses the default search order.
    pub fonts_dir: Option<PathBuf>,
    pub template_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_data_dir(PathBuf::from("data"))
    }
}

impl Config {
    /// Builds the default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            course_id: DEFAULT_COURSE_ID,
            token: String::new(),
            ca_bundle: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_wait: DEFAULT_MAX_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            raw_dir: data_dir.join("raw"),
            processed_dir: data_dir.join("processed"),
            overlay_dir: data_dir.join("overlays"),
            output_dir: data_dir.join("output"),
            fonts_dir: None,
            template_path: data_dir.join("template").join("template.pdf"),
        }
    }

    /// Reads the configuration from `SURVEY_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let default = match env_path("SURVEY_DATA_DIR") {
            Some(dir) => Self::with_data_dir(dir),
            None => Self::default(),
        };

        Self {
            api_base_url: env::var("SURVEY_API_URL").unwrap_or(default.api_base_url),
            course_id: env::var("SURVEY_COURSE_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.course_id),
            token: env::var("SURVEY_API_TOKEN").unwrap_or(default.token),
            ca_bundle: env_path("SURVEY_CA_BUNDLE").or(default.ca_bundle),
            max_wait: env_secs("SURVEY_MAX_WAIT_SECS").unwrap_or(default.max_wait),
            poll_interval: env_secs("SURVEY_POLL_INTERVAL_SECS").unwrap_or(default.poll_interval),
            fonts_dir: env_path("SURVEY_FONTS_DIR").or(default.fonts_dir),
            template_path: env_path("SURVEY_TEMPLATE").unwrap_or(default.template_path),
            ..default
        }
    }

    /// Moves every storage path under `data_dir`, keeping the other settings.
    pub fn rebase(self, data_dir: PathBuf) -> Self {
        let paths = Self::with_data_dir(data_dir);
        Self {
            raw_dir: paths.raw_dir,
            processed_dir: paths.processed_dir,
            overlay_dir: paths.overlay_dir,
            output_dir: paths.output_dir,
            template_path: paths.template_path,
            ..self
        }
    }

    /// Fails when no API token is configured.
    pub fn validate_credentials(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(SurveyError::Config(
                "API token missing; set SURVEY_API_TOKEN or pass --token".to_string(),
            ));
        }
        Ok(())
    }

    /// URL of a course-scoped API endpoint.
    pub fn course_url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/courses/{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.course_id,
            path.trim_start_matches('/')
        )
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    env::var_os(var).and_then(|value| {
        let path = PathBuf::from(value);
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    })
}

fn env_secs(var: &str) -> Option<Duration> {
    env::var(var)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn course_url_joins_segments() {
        let config = Config {
            api_base_url: "https://lms.example.com/".to_string(),
            course_id: 42,
            ..Config::default()
        };
        assert_eq!(
            config.course_url("/assignments"),
            "https://lms.example.com/api/v1/courses/42/assignments"
        );
    }

    #[test]
    fn data_dir_drives_storage_paths() {
        let config = Config::with_data_dir(PathBuf::from("/tmp/reports"));
        assert_eq!(config.raw_dir, PathBuf::from("/tmp/reports/raw"));
        assert_eq!(config.processed_dir, PathBuf::from("/tmp/reports/processed"));
        assert_eq!(config.overlay_dir, PathBuf::from("/tmp/reports/overlays"));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/reports/output"));
    }

    #[test]
    fn rebase_keeps_api_settings() {
        let config = Config {
            token: "secret".to_string(),
            course_id: 7,
            ..Config::default()
        }
        .rebase(PathBuf::from("/srv/survey"));
        assert_eq!(config.token, "secret");
        assert_eq!(config.course_id, 7);
        assert_eq!(config.raw_dir, PathBuf::from("/srv/survey/raw"));
        assert_eq!(
            config.template_path,
            PathBuf::from("/srv/survey/template/template.pdf")
        );
    }

    #[test]
    fn missing_token_is_reported() {
        let config = Config::default();
        assert!(matches!(
            config.validate_credentials(),
            Err(SurveyError::Config(_))
        ));
    }
}
