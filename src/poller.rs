//! Submits report jobs and waits for their artifact.

use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::api::{ReportFile, SurveyApi};
use crate::error::Result;

/// Source of time for the polling loop.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

/// Wall clock backed by [`std::thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Ready,
    /// The wait budget ran out before a file was attached.
    TimedOut,
    /// The server reported the job as failed.
    Failed,
}

/// A submitted report job. `file` is set exactly when `status` is [`JobStatus::Ready`].
#[derive(Clone, Debug, PartialEq)]
pub struct ReportJob {
    pub quiz_id: u64,
    pub report_id: u64,
    pub status: JobStatus,
    pub file: Option<ReportFile>,
    /// Status requests issued, including failed ones.
    pub polls: u32,
}

impl ReportJob {
    pub fn artifact(&self) -> Option<&ReportFile> {
        self.file.as_ref()
    }
}

/// Submits a report and polls it until the file is attached or the wait budget is spent.
pub struct ReportJobPoller<'a, A: SurveyApi + ?Sized> {
    api: &'a A,
    clock: Box<dyn Clock + 'a>,
}

impl<'a, A: SurveyApi + ?Sized> ReportJobPoller<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            clock: Box::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Submits a report for `quiz_id` and waits for it.
    ///
    /// Submission errors are returned. Errors while polling are logged and the loop keeps going
    /// until `max_wait` has elapsed. Running out of time is not an error: the job comes back with
    /// [`JobStatus::TimedOut`] and no file.
    pub fn submit_and_wait(
        &self,
        quiz_id: u64,
        max_wait: Duration,
        interval: Duration,
    ) -> Result<ReportJob> {
        let report_id = self.api.submit_report(quiz_id)?;
        info!("Report {} submitted for quiz {}", report_id, quiz_id);

        let mut job = ReportJob {
            quiz_id,
            report_id,
            status: JobStatus::Pending,
            file: None,
            polls: 0,
        };

        let started = self.clock.now();
        while self.clock.now().duration_since(started) < max_wait {
            job.polls += 1;
            match self.api.report_status(quiz_id, report_id) {
                Ok(snapshot) => {
                    if let Some(file) = snapshot.file {
                        info!("Report {} ready: {}", report_id, file.display_name);
                        job.status = JobStatus::Ready;
                        job.file = Some(file);
                        return Ok(job);
                    }
                    match snapshot.progress {
                        Some(progress) if progress.is_failed() => {
                            warn!("Report {} failed on the server", report_id);
                            job.status = JobStatus::Failed;
                            return Ok(job);
                        }
                        Some(progress) => info!(
                            "Report {} pending ({})",
                            report_id,
                            progress.workflow_state.as_deref().unwrap_or("unknown")
                        ),
                        None => info!("Report {} pending", report_id),
                    }
                }
                Err(err) => warn!("Status check for report {} failed: {}", report_id, err),
            }
            self.clock.sleep(interval);
        }

        warn!(
            "Report {} not ready after {}s",
            report_id,
            max_wait.as_secs()
        );
        job.status = JobStatus::TimedOut;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Assignment, ReportProgress, ReportSnapshot};
    use crate::error::SurveyError;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Clock that only moves when the poller sleeps.
    struct ManualClock {
        start: Instant,
        offset: Cell<Duration>,
    }

    impl ManualClock {
        fn new() -> Self {
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

    #[derive(Default)]
    struct ScriptedApi {
        submit_fails: bool,
        responses: RefCell<VecDeque<Result<ReportSnapshot>>>,
        status_calls: Cell<u32>,
    }

    impl ScriptedApi {
        fn with_responses(responses: Vec<Result<ReportSnapshot>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                ..Self::default()
            }
        }
    }

    impl SurveyApi for ScriptedApi {
        fn search_assignments(&self, _term: &str) -> Result<Vec<Assignment>> {
            Ok(Vec::new())
        }

        fn submit_report(&self, _quiz_id: u64) -> Result<u64> {
            if self.submit_fails {
                Err(SurveyError::transport("reports", "500 Internal Server Error"))
            } else {
                Ok(77)
            }
        }

        fn report_status(&self, _quiz_id: u64, _report_id: u64) -> Result<ReportSnapshot> {
            self.status_calls.set(self.status_calls.get() + 1);
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(ReportSnapshot::default()))
        }

        fn download(&self, _url: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn ready() -> ReportSnapshot {
        ReportSnapshot {
            file: Some(ReportFile {
                display_name: "Relatório Junho 2025.csv".to_string(),
                url: "https://files.example/1".to_string(),
            }),
            progress: None,
        }
    }

    #[test]
    fn times_out_after_budget_with_expected_poll_count() {
        let api = ScriptedApi::default();
        let clock = ManualClock::new();
        let job = ReportJobPoller::new(&api)
            .with_clock(&clock)
            .submit_and_wait(5, Duration::from_secs(10), Duration::from_secs(5))
            .unwrap();

        assert_eq!(job.status, JobStatus::TimedOut);
        assert!(job.artifact().is_none());
        assert_eq!(api.status_calls.get(), 2);
        assert_eq!(job.polls, 2);
    }

    #[test]
    fn returns_ready_job_with_artifact() {
        let api = ScriptedApi::with_responses(vec![Ok(ReportSnapshot::default()), Ok(ready())]);
        let clock = ManualClock::new();
        let job = ReportJobPoller::new(&api)
            .with_clock(&clock)
            .submit_and_wait(5, Duration::from_secs(120), Duration::from_secs(5))
            .unwrap();

        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(job.report_id, 77);
        assert_eq!(job.artifact().unwrap().url, "https://files.example/1");
        assert_eq!(job.polls, 2);
    }

    #[test]
    fn transient_status_errors_are_tolerated() {
        let api = ScriptedApi::with_responses(vec![
            Err(SurveyError::transport("status", "connection reset")),
            Ok(ready()),
        ]);
        let clock = ManualClock::new();
        let job = ReportJobPoller::new(&api)
            .with_clock(&clock)
            .submit_and_wait(5, Duration::from_secs(120), Duration::from_secs(5))
            .unwrap();

        assert_eq!(job.status, JobStatus::Ready);
    }

    #[test]
    fn failed_workflow_stops_polling() {
        let failed = ReportSnapshot {
            file: None,
            progress: Some(ReportProgress {
                workflow_state: Some("failed".to_string()),
                completion: None,
            }),
        };
        let api = ScriptedApi::with_responses(vec![Ok(failed)]);
        let clock = ManualClock::new();
        let job = ReportJobPoller::new(&api)
            .with_clock(&clock)
            .submit_and_wait(5, Duration::from_secs(120), Duration::from_secs(5))
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(api.status_calls.get(), 1);
    }

    #[test]
    fn submission_failure_is_an_error() {
        let api = ScriptedApi {
            submit_fails: true,
            ..ScriptedApi::default()
        };
        let result = ReportJobPoller::new(&api).submit_and_wait(
            5,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(SurveyError::Transport { .. })));
        assert_eq!(api.status_calls.get(), 0);
    }
}
