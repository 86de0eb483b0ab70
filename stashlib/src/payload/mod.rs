// Copyright (c) 2022 pud developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Log payload construction

use crate::{
    config::{Configuration, CustomOptions},
    constants::{
        ARGS, CLASS, COMPLETED_AT, DURATION, ERROR, ERROR_BACKTRACE, ERROR_MESSAGE, JID,
        JOB_STATUS, MESSAGE, PID, TIMESTAMP_KEYS,
    },
    filter::{ArgumentFilter, ParamFilter},
    record::{JobRecord, JobStatus, Payload},
    timestamp::{format, normalize},
};
use anyhow::{Context, Result};
use getset::Getters;
use serde_json::Value;
use std::{
    any::{type_name, Any},
    backtrace::{Backtrace, BacktraceStatus},
    error::Error as StdError,
    fmt::{self, Debug, Display, Formatter},
    iter::successors,
    panic::{self, AssertUnwindSafe},
    process,
    sync::Arc,
};
use time::OffsetDateTime;
use tracing::trace;

const PANIC_CLASS: &str = "panic";

/// A job failure, captured in the shape the payload records it
#[derive(Clone, Debug, Eq, Getters, PartialEq)]
#[getset(get = "pub")]
pub struct Captured {
    /// The failure kind, e.g. the error type name
    class: String,
    /// The failure message
    message: String,
    /// The trace lines
    backtrace: Vec<String>,
}

impl Captured {
    /// Capture a failure the host has already described
    pub fn new<C, M>(class: C, message: M, backtrace: Vec<String>) -> Self
    where
        C: Into<String>,
        M: Into<String>,
    {
        Self {
            class: class.into(),
            message: message.into(),
            backtrace,
        }
    }

    /// Capture an error returned by the job.
    ///
    /// The trace holds the error's `source()` chain followed by a backtrace
    /// taken at the point of capture.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        let mut backtrace: Vec<String> = successors(err.source(), |&source| source.source())
            .map(|source| format!("caused by: {source}"))
            .collect();
        backtrace.extend(trace_lines());
        Self {
            class: short_type_name(type_name::<E>()),
            message: err.to_string(),
            backtrace,
        }
    }

    /// Capture an [`anyhow::Error`] returned by the job.
    ///
    /// The trace holds the context chain below the outermost message, then
    /// the backtrace recorded when the error was created, or one taken now
    /// if none was recorded.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let mut backtrace: Vec<String> = err
            .chain()
            .skip(1)
            .map(|source| format!("caused by: {source}"))
            .collect();
        let recorded = err.backtrace();
        if recorded.status() == BacktraceStatus::Captured {
            backtrace.extend(recorded.to_string().lines().map(str::to_string));
        } else {
            backtrace.extend(trace_lines());
        }
        Self {
            class: short_type_name(type_name::<anyhow::Error>()),
            message: err.to_string(),
            backtrace,
        }
    }

    /// Capture a panic payload from the job
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self {
            class: PANIC_CLASS.to_string(),
            message: panic_message(payload),
            backtrace: trace_lines(),
        }
    }

    /// The trace lines newline-joined and wrapped in single quotes
    #[must_use]
    pub fn backtrace_text(&self) -> String {
        format!("'{}'", self.backtrace.join("\n"))
    }
}

impl Display for Captured {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn trace_lines() -> Vec<String> {
    Backtrace::force_capture()
        .to_string()
        .lines()
        .map(str::to_string)
        .collect()
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

// `my_crate::jobs::SendError<u8>` becomes `SendError<u8>`
fn short_type_name(full: &str) -> String {
    if full.starts_with("dyn ") {
        return full.to_string();
    }
    let (path, generics) = full.split_at(full.find('<').unwrap_or(full.len()));
    let name = path.rsplit("::").next().unwrap_or(path);
    format!("{name}{generics}")
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn is_set(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

fn elapsed(started_at: OffsetDateTime) -> f64 {
    let secs = (OffsetDateTime::now_utc() - started_at)
        .as_seconds_f64()
        .max(0.0);
    (secs * 1000.0).round() / 1000.0
}

/// Turns a job record plus timing and failure context into a [`Payload`]
#[derive(Clone)]
pub struct PayloadBuilder {
    custom_options: Option<CustomOptions>,
    filter: Option<Arc<dyn ArgumentFilter>>,
}

impl Debug for PayloadBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadBuilder")
            .field("custom_options", &self.custom_options)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

impl PayloadBuilder {
    /// Create a builder from the configuration.  When `filter_args` is not
    /// empty a [`ParamFilter`] over those keys redacts the job arguments.
    ///
    /// # Errors
    /// * The argument filter cannot be built
    ///
    pub fn new(config: &Configuration) -> Result<Self> {
        let filter: Option<Arc<dyn ArgumentFilter>> = if config.filter_args().is_empty() {
            None
        } else {
            Some(Arc::new(ParamFilter::new(config.filter_args())?))
        };
        Ok(Self {
            custom_options: config.custom_options().clone(),
            filter,
        })
    }

    /// Replace the default redactor.  Redaction still only happens when
    /// `filter_args` is non-empty.
    #[must_use]
    pub fn with_argument_filter<F>(mut self, filter: F) -> Self
    where
        F: ArgumentFilter + 'static,
    {
        if self.filter.is_some() {
            self.filter = Some(Arc::new(filter));
        }
        self
    }

    /// Build the payload for one job execution.  `job` is never modified.
    ///
    /// # Errors
    /// * A timestamp field cannot be normalized
    /// * A timestamp cannot be rendered
    ///
    pub fn build(
        &self,
        job: &JobRecord,
        started_at: OffsetDateTime,
        captured: Option<&Captured>,
    ) -> Result<Payload> {
        let mut payload = Payload::from(job);

        for key in TIMESTAMP_KEYS {
            let normalized = match payload.get(key) {
                Some(value) if is_set(value) => Some(
                    normalize(value).with_context(|| format!("unable to normalize '{key}'"))?,
                ),
                _ => None,
            };
            if let Some(time) = normalized {
                let _ = payload.insert(key, format(time)?);
            }
        }

        let _ = payload.insert(PID, process::id());
        let duration = elapsed(started_at);
        let _ = payload.insert(DURATION, duration);

        let summary = format!("{} JID-{}", text_of(job.get(CLASS)), text_of(job.get(JID)));
        let status = if captured.is_some() {
            JobStatus::Fail
        } else {
            JobStatus::Done
        };
        let _ = payload.insert(MESSAGE, format!("{summary}: {status}: {duration} sec"));
        let _ = payload.insert(JOB_STATUS, status.as_str());

        if let Some(captured) = captured {
            let _ = payload.insert(ERROR_MESSAGE, captured.message().clone());
            let _ = payload.insert(ERROR, captured.class().clone());
            let _ = payload.insert(ERROR_BACKTRACE, captured.backtrace_text());
        } else {
            let _ = payload.insert(COMPLETED_AT, format(OffsetDateTime::now_utc())?);
        }

        if let Some(custom_options) = &self.custom_options {
            enrich(&mut payload, custom_options, captured);
        }

        if let Some(filter) = &self.filter {
            if let Some(Value::Array(args)) = payload.get_mut(ARGS) {
                for arg in args.iter_mut() {
                    *arg = filter.filter(arg);
                }
            }
        }

        Ok(payload)
    }
}

// A failing hook leaves the payload as it was
fn enrich(payload: &mut Payload, custom_options: &CustomOptions, captured: Option<&Captured>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        custom_options.call(payload, captured)
    }));
    match outcome {
        Ok(Ok(fields)) => payload.merge(fields),
        Ok(Err(e)) => trace!(error = %e, "custom options failed, skipping enrichment"),
        Err(panicked) => trace!(
            error = %panic_message(&*panicked),
            "custom options panicked, skipping enrichment"
        ),
    }
}
