// Copyright (c) 2022 pud developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Job execution logging middleware

use crate::{
    config::Configuration,
    constants::{JOB_EXCEPTION_PREFIX, JOB_PREFIX, JOB_TARGET, LOG_ERROR, LOG_EXCEPTION_PREFIX},
    error::Error::Panic,
    payload::{panic_message, Captured, PayloadBuilder},
    record::{JobRecord, Payload},
};
use anyhow::Result;
use std::{
    error::Error as StdError,
    panic::{self, AssertUnwindSafe},
};
use time::OffsetDateTime;
use tracing::{error, info, warn};

/// Where job log records are written
pub trait JobLogger: Send + Sync {
    /// Emit the payload of a job that completed
    ///
    /// # Errors
    /// * The record could not be written
    ///
    fn info(&self, payload: &Payload) -> Result<()>;

    /// Emit the payload of a job that failed
    ///
    /// # Errors
    /// * The record could not be written
    ///
    fn warn(&self, payload: &Payload) -> Result<()>;

    /// Emit an unstructured diagnostic line
    ///
    /// # Errors
    /// * The line could not be written
    ///
    fn error(&self, line: &str) -> Result<()>;
}

/// Emits job records as JSON through `tracing`, under the `stashlib::job` target
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl JobLogger for TracingLogger {
    fn info(&self, payload: &Payload) -> Result<()> {
        let json = payload.to_json()?;
        info!(target: JOB_TARGET, "{json}");
        Ok(())
    }

    fn warn(&self, payload: &Payload) -> Result<()> {
        let json = payload.to_json()?;
        warn!(target: JOB_TARGET, "{json}");
        Ok(())
    }

    fn error(&self, line: &str) -> Result<()> {
        error!(target: JOB_TARGET, "{line}");
        Ok(())
    }
}

/// Wraps job execution, timing it and writing one log record per job.
///
/// The job's own outcome is never altered: a job error is returned as is,
/// and a job panic is resumed with its original payload.
#[derive(Debug)]
pub struct LogstashLogging<L = TracingLogger> {
    builder: PayloadBuilder,
    logger: L,
}

impl LogstashLogging<TracingLogger> {
    /// Create the middleware writing through `tracing`
    ///
    /// # Errors
    /// * The argument filter cannot be built
    ///
    pub fn new(config: &Configuration) -> Result<Self> {
        Self::with_logger(config, TracingLogger)
    }
}

impl<L: JobLogger> LogstashLogging<L> {
    /// Create the middleware writing to the given logger
    ///
    /// # Errors
    /// * The argument filter cannot be built
    ///
    pub fn with_logger(config: &Configuration, logger: L) -> Result<Self> {
        Ok(Self {
            builder: PayloadBuilder::new(config)?,
            logger,
        })
    }

    /// Use a prepared payload builder, e.g. one with a custom argument filter
    pub fn from_parts(builder: PayloadBuilder, logger: L) -> Self {
        Self { builder, logger }
    }

    /// The payload builder
    pub fn builder(&self) -> &PayloadBuilder {
        &self.builder
    }

    /// The logger
    pub fn logger(&self) -> &L {
        &self.logger
    }

    /// Run `continuation` for `job` and log its outcome.
    ///
    /// # Errors
    /// * Exactly the error returned by `continuation`
    ///
    pub fn execute<T, E, F>(&self, job: &JobRecord, continuation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: StdError,
    {
        self.run(job, continuation, Captured::from_error::<E>)
    }

    /// Like [`execute`](Self::execute), but a panic in `continuation` is
    /// logged as a failure before it resumes unwinding.
    ///
    /// # Errors
    /// * Exactly the error returned by `continuation`
    ///
    pub fn execute_unwind<T, E, F>(&self, job: &JobRecord, continuation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: StdError,
    {
        self.run_unwind(job, continuation, Captured::from_error::<E>)
    }

    /// [`execute`](Self::execute) for a continuation returning an
    /// [`anyhow::Error`]
    ///
    /// # Errors
    /// * Exactly the error returned by `continuation`
    ///
    pub fn execute_anyhow<T, F>(&self, job: &JobRecord, continuation: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.run(job, continuation, Captured::from_anyhow)
    }

    /// [`execute_unwind`](Self::execute_unwind) for a continuation returning
    /// an [`anyhow::Error`]
    ///
    /// # Errors
    /// * Exactly the error returned by `continuation`
    ///
    pub fn execute_anyhow_unwind<T, F>(&self, job: &JobRecord, continuation: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.run_unwind(job, continuation, Captured::from_anyhow)
    }

    fn run<T, E, F, C>(&self, job: &JobRecord, continuation: F, capture: C) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        C: FnOnce(&E) -> Captured,
    {
        let started_at = OffsetDateTime::now_utc();
        let outcome = continuation();
        self.observe(job, started_at, &outcome, capture);
        outcome
    }

    fn run_unwind<T, E, F, C>(&self, job: &JobRecord, continuation: F, capture: C) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        C: FnOnce(&E) -> Captured,
    {
        let started_at = OffsetDateTime::now_utc();
        match panic::catch_unwind(AssertUnwindSafe(continuation)) {
            Ok(outcome) => {
                self.observe(job, started_at, &outcome, capture);
                outcome
            }
            Err(payload) => {
                let captured = Captured::from_panic(&*payload);
                self.log_fail(job, started_at, &captured);
                panic::resume_unwind(payload)
            }
        }
    }

    fn observe<T, E, C>(
        &self,
        job: &JobRecord,
        started_at: OffsetDateTime,
        outcome: &Result<T, E>,
        capture: C,
    ) where
        C: FnOnce(&E) -> Captured,
    {
        match outcome {
            Ok(_) => self.log_done(job, started_at),
            Err(e) => self.log_fail(job, started_at, &capture(e)),
        }
    }

    fn log_done(&self, job: &JobRecord, started_at: OffsetDateTime) {
        let attempt = guarded(|| {
            let payload = self.builder.build(job, started_at, None)?;
            self.logger.info(&payload)
        });
        if let Err(e) = attempt {
            self.fallback(job, None, &e);
        }
    }

    fn log_fail(&self, job: &JobRecord, started_at: OffsetDateTime, captured: &Captured) {
        let attempt = guarded(|| {
            let payload = self.builder.build(job, started_at, Some(captured))?;
            self.logger.warn(&payload)
        });
        if let Err(e) = attempt {
            self.fallback(job, Some(captured), &e);
        }
    }

    // Each line is attempted on its own
    fn fallback(&self, job: &JobRecord, captured: Option<&Captured>, log_err: &anyhow::Error) {
        let _ = guarded(|| self.logger.error(LOG_ERROR));
        let _ = guarded(|| self.logger.error(&format!("{JOB_PREFIX}{job}")));
        if let Some(captured) = captured {
            let _ = guarded(|| {
                self.logger.error(&format!("{JOB_EXCEPTION_PREFIX}{captured}"))
            });
        }
        let _ = guarded(|| self.logger.error(&format!("{LOG_EXCEPTION_PREFIX}{log_err:#}")));
    }
}

// A panic while logging is just another logging failure
fn guarded<F>(attempt: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    panic::catch_unwind(AssertUnwindSafe(attempt)).unwrap_or_else(|payload| {
        Err(Panic {
            msg: panic_message(&*payload),
        }
        .into())
    })
}

#[cfg(test)]
mod test {
    use super::{JobLogger, LogstashLogging, TracingLogger};
    use crate::{
        config::{Configuration, CustomOptions},
        record::{JobRecord, JobStatus, Payload},
    };
    use anyhow::{anyhow, Result};
    use serde_json::{json, Map, Value};
    use std::{
        fmt::{self, Display, Formatter},
        panic::{self, AssertUnwindSafe},
        sync::Mutex,
    };

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum Severity {
        Info,
        Warn,
        Error,
    }

    /// Records everything written, optionally refusing some of it
    #[derive(Debug, Default)]
    struct Recorder {
        records: Mutex<Vec<(Severity, String)>>,
        payloads: Mutex<Vec<Payload>>,
        reject_payloads: bool,
        panic_on_error_line: Option<usize>,
    }

    impl Recorder {
        fn push(&self, severity: Severity, line: String) {
            if let Ok(mut records) = self.records.lock() {
                records.push((severity, line));
            }
        }

        fn emit(&self, severity: Severity, payload: &Payload) -> Result<()> {
            if self.reject_payloads {
                return Err(anyhow!("sink closed"));
            }
            if let Ok(mut payloads) = self.payloads.lock() {
                payloads.push(payload.clone());
            }
            self.push(severity, payload.to_json()?);
            Ok(())
        }

        fn lines(&self, severity: Severity) -> Vec<String> {
            self.records
                .lock()
                .map(|records| {
                    records
                        .iter()
                        .filter(|(s, _)| *s == severity)
                        .map(|(_, line)| line.clone())
                        .collect()
                })
                .unwrap_or_default()
        }

        fn payload(&self) -> Result<Payload> {
            self.payloads
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .first()
                .cloned()
                .ok_or_else(|| anyhow!("no payload recorded"))
        }
    }

    impl JobLogger for Recorder {
        fn info(&self, payload: &Payload) -> Result<()> {
            self.emit(Severity::Info, payload)
        }

        fn warn(&self, payload: &Payload) -> Result<()> {
            self.emit(Severity::Warn, payload)
        }

        fn error(&self, line: &str) -> Result<()> {
            let seen = self.lines(Severity::Error).len();
            if self.panic_on_error_line == Some(seen) {
                self.push(Severity::Error, String::new());
                panic!("diagnostic sink exploded");
            }
            self.push(Severity::Error, line.to_string());
            Ok(())
        }
    }

    #[derive(Debug, PartialEq)]
    struct JobFailed(u32);

    impl Display for JobFailed {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "job failed with code {}", self.0)
        }
    }

    impl std::error::Error for JobFailed {}

    fn job() -> Result<JobRecord> {
        json!({
            "class": "HardWorker",
            "jid": "jid-1",
            "args": [{"email": "a@b.com", "password": "secret"}],
            "enqueued_at": 1_700_000_000.25,
        })
        .to_string()
        .parse()
    }

    fn broken_job() -> Result<JobRecord> {
        r#"{"class":"HardWorker","jid":"jid-2","args":[],"created_at":"whenever"}"#.parse()
    }

    fn middleware(recorder: Recorder) -> Result<LogstashLogging<Recorder>> {
        LogstashLogging::with_logger(&Configuration::default(), recorder)
    }

    #[test]
    fn success_logs_done_at_info() -> Result<()> {
        let mw = middleware(Recorder::default())?;
        let job = job()?;
        let value = mw.execute(&job, || Ok::<_, JobFailed>(42))?;
        assert_eq!(value, 42);

        let payload = mw.logger().payload()?;
        assert_eq!(payload.status(), Some(JobStatus::Done));
        assert!(payload.get("completed_at").is_some());
        assert!(payload.duration().is_some_and(|d| d >= 0.0));
        assert_eq!(mw.logger().lines(Severity::Info).len(), 1);
        assert!(mw.logger().lines(Severity::Warn).is_empty());
        assert!(mw.logger().lines(Severity::Error).is_empty());
        Ok(())
    }

    #[test]
    fn failure_logs_fail_at_warn_and_returns_original() -> Result<()> {
        let mw = middleware(Recorder::default())?;
        let job = job()?;
        match mw.execute(&job, || Err::<(), _>(JobFailed(7))) {
            Ok(()) => return Err(anyhow!("the job should have failed")),
            Err(e) => assert_eq!(e, JobFailed(7)),
        }

        let payload = mw.logger().payload()?;
        assert_eq!(payload.status(), Some(JobStatus::Fail));
        assert_eq!(payload.get("error"), Some(&json!("JobFailed")));
        assert_eq!(payload.get("error_message"), Some(&json!("job failed with code 7")));
        assert!(payload
            .get("error_backtrace")
            .and_then(Value::as_str)
            .is_some_and(|bt| bt.len() > 2));
        assert_eq!(mw.logger().lines(Severity::Warn).len(), 1);
        assert!(mw.logger().lines(Severity::Error).is_empty());
        Ok(())
    }

    #[test]
    fn broken_payload_falls_back_to_four_lines() -> Result<()> {
        let mw = middleware(Recorder::default())?;
        let job = broken_job()?;
        match mw.execute(&job, || Err::<(), _>(JobFailed(1))) {
            Ok(()) => return Err(anyhow!("the job should have failed")),
            Err(e) => assert_eq!(e, JobFailed(1)),
        }

        let lines = mw.logger().lines(Severity::Error);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Error logging the job execution!");
        assert_eq!(lines[1], format!("Job: {job}"));
        assert_eq!(lines[2], "Job Exception: job failed with code 1");
        assert!(lines[3].starts_with("Log Exception: unable to normalize 'created_at'"));
        assert!(lines[3].contains("invalid timestamp: 'whenever'"));
        assert!(mw.logger().lines(Severity::Warn).is_empty());
        Ok(())
    }

    #[test]
    fn rejected_emission_falls_back() -> Result<()> {
        let recorder = Recorder {
            reject_payloads: true,
            ..Recorder::default()
        };
        let mw = middleware(recorder)?;
        let job = job()?;
        assert!(mw.execute(&job, || Err::<(), _>(JobFailed(2))).is_err());
        let lines = mw.logger().lines(Severity::Error);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], "Log Exception: sink closed");
        Ok(())
    }

    #[test]
    fn fallback_lines_are_independent() -> Result<()> {
        let recorder = Recorder {
            reject_payloads: true,
            panic_on_error_line: Some(1),
            ..Recorder::default()
        };
        let mw = middleware(recorder)?;
        let job = job()?;
        assert_eq!(
            mw.execute(&job, || Err::<(), _>(JobFailed(3))),
            Err(JobFailed(3))
        );
        let lines = mw.logger().lines(Severity::Error);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Error logging the job execution!");
        assert_eq!(lines[2], "Job Exception: job failed with code 3");
        Ok(())
    }

    #[test]
    fn success_logging_failure_keeps_result() -> Result<()> {
        let mw = middleware(Recorder::default())?;
        let job = broken_job()?;
        assert_eq!(mw.execute(&job, || Ok::<_, JobFailed>("fine")), Ok("fine"));
        let lines = mw.logger().lines(Severity::Error);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Error logging the job execution!");
        assert!(lines[2].starts_with("Log Exception: "));
        Ok(())
    }

    #[test]
    fn panics_are_logged_and_resumed() -> Result<()> {
        let mw = middleware(Recorder::default())?;
        let job = job()?;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            mw.execute_unwind(&job, || -> Result<(), JobFailed> { panic!("worker exploded") })
        }));
        match result {
            Ok(_) => return Err(anyhow!("the panic should have been resumed")),
            Err(payload) => assert_eq!(payload.downcast_ref::<&str>(), Some(&"worker exploded")),
        }
        let payload = mw.logger().payload()?;
        assert_eq!(payload.status(), Some(JobStatus::Fail));
        assert_eq!(payload.get("error"), Some(&json!("panic")));
        assert_eq!(payload.get("error_message"), Some(&json!("worker exploded")));
        Ok(())
    }

    #[test]
    fn execute_unwind_passes_results_through() -> Result<()> {
        let mw = middleware(Recorder::default())?;
        let job = job()?;
        assert_eq!(mw.execute_unwind(&job, || Ok::<_, JobFailed>(1)), Ok(1));
        assert_eq!(
            mw.execute_unwind(&job, || Err::<u8, _>(JobFailed(9))),
            Err(JobFailed(9))
        );
        assert_eq!(mw.logger().lines(Severity::Info).len(), 1);
        assert_eq!(mw.logger().lines(Severity::Warn).len(), 1);
        Ok(())
    }

    #[test]
    fn configured_redaction_and_hook_apply() -> Result<()> {
        let config = Configuration::builder()
            .filter_args(["password".to_string()])
            .build()
            .with_custom_options(CustomOptions::payload_and_error(|payload, captured| {
                let mut fields = Map::new();
                let _ = fields.insert("jid_seen".to_string(), json!(payload.get("jid")));
                let _ = fields.insert("had_error".to_string(), json!(captured.is_some()));
                Ok(fields)
            }));
        let mw = LogstashLogging::with_logger(&config, Recorder::default())?;
        let job = job()?;
        let _ = mw.execute(&job, || Ok::<_, JobFailed>(()));

        let payload = mw.logger().payload()?;
        assert_eq!(
            payload.get("args"),
            Some(&json!([{"email": "a@b.com", "password": "[FILTERED]"}]))
        );
        assert_eq!(payload.get("jid_seen"), Some(&json!("jid-1")));
        assert_eq!(payload.get("had_error"), Some(&json!(false)));
        assert_eq!(
            payload.get("enqueued_at"),
            Some(&json!("2023-11-14T22:13:20.250Z"))
        );
        assert_eq!(
            job.args(),
            Some(&vec![json!({"email": "a@b.com", "password": "secret"})])
        );
        Ok(())
    }

    #[test]
    fn anyhow_failure_is_returned_unchanged() -> Result<()> {
        let mw = middleware(Recorder::default())?;
        let job = job()?;
        let outcome = mw.execute_anyhow(&job, || -> Result<()> {
            Err(anyhow::Error::new(JobFailed(4)).context("saving invoice"))
        });
        match outcome {
            Ok(()) => return Err(anyhow!("the job should have failed")),
            Err(e) => {
                assert_eq!(format!("{e:#}"), "saving invoice: job failed with code 4");
                assert_eq!(e.downcast_ref::<JobFailed>(), Some(&JobFailed(4)));
            }
        }

        let payload = mw.logger().payload()?;
        assert_eq!(payload.status(), Some(JobStatus::Fail));
        assert_eq!(payload.get("error"), Some(&json!("Error")));
        assert_eq!(payload.get("error_message"), Some(&json!("saving invoice")));
        assert!(payload
            .get("error_backtrace")
            .and_then(Value::as_str)
            .is_some_and(|bt| bt.starts_with("'caused by: job failed with code 4")));
        assert_eq!(mw.logger().lines(Severity::Warn).len(), 1);
        Ok(())
    }

    #[test]
    fn anyhow_db_down_round_trips() -> Result<()> {
        let mw = middleware(Recorder::default())?;
        let job = job()?;
        match mw.execute_anyhow(&job, || Err::<(), _>(anyhow!("db down"))) {
            Ok(()) => Err(anyhow!("the job should have failed")),
            Err(e) => {
                assert_eq!(e.to_string(), "db down");
                assert_eq!(e.chain().count(), 1);
                assert_eq!(mw.logger().payload()?.get("error_message"), Some(&json!("db down")));
                Ok(())
            }
        }
    }

    #[test]
    fn anyhow_unwind_logs_panics_and_passes_results() -> Result<()> {
        let mw = middleware(Recorder::default())?;
        let job = job()?;
        assert_eq!(mw.execute_anyhow_unwind(&job, || Ok(3))?, 3);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            mw.execute_anyhow_unwind(&job, || -> Result<()> { panic!("queue vanished") })
        }));
        assert!(result.is_err());
        assert_eq!(mw.logger().lines(Severity::Info).len(), 1);
        let warned = mw.logger().lines(Severity::Warn);
        assert_eq!(warned.len(), 1);
        assert!(warned[0].contains("queue vanished"));
        Ok(())
    }

    #[test]
    fn tracing_logger_never_fails() -> Result<()> {
        let mw = LogstashLogging::new(&Configuration::default())?;
        let job = job()?;
        assert_eq!(mw.execute(&job, || Ok::<_, JobFailed>(5)), Ok(5));
        assert!(TracingLogger.error("diagnostic").is_ok());
        Ok(())
    }
}
