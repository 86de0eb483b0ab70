// Copyright (c) 2022 pud developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Structured logging middleware for background job execution.
//!
//! [`LogstashLogging`] wraps the execution of one job, times it, and writes
//! a single structured record describing the outcome.  The record is a copy
//! of the [`JobRecord`] enriched with the process id, the duration, a status
//! and, for failures, the error details.  Timestamps are normalized to UTC,
//! sensitive arguments can be redacted, and a [`CustomOptions`] hook can add
//! fields of its own.
//!
//! Logging never changes a job's outcome.  If the record cannot be built or
//! written, a short diagnostic is logged instead and the job's own result is
//! still handed back untouched.
//!
//! ```
//! # use anyhow::Result;
//! use stashlib::{Configuration, JobRecord, LogstashLogging};
//!
//! # fn main() -> Result<()> {
//! let config = Configuration::builder()
//!     .filter_args(["password".to_string()])
//!     .build();
//! let middleware = LogstashLogging::new(&config)?;
//! let job: JobRecord =
//!     r#"{"class":"HardWorker","jid":"b4a577edbccf1d80","args":[{"password":"hunter2"}]}"#
//!         .parse()?;
//!
//! let sum = middleware.execute(&job, || "40".parse::<u32>().map(|n| n + 2))?;
//! assert_eq!(sum, 42);
//! # Ok(())
//! # }
//! ```

mod config;
mod constants;
mod error;
mod filter;
mod log;
mod middleware;
mod payload;
mod record;
mod timestamp;

pub use self::config::load;
pub use self::config::Configuration;
pub use self::config::CustomOptions;
pub use self::config::PayloadErrorHook;
pub use self::config::PayloadHook;
pub use self::constants::FILTERED;
pub use self::constants::JOB_TARGET;
pub use self::error::Error;
pub use self::filter::ArgumentFilter;
pub use self::filter::ParamFilter;
pub use self::log::initialize;
pub use self::log::LogConfig;
pub use self::middleware::JobLogger;
pub use self::middleware::LogstashLogging;
pub use self::middleware::TracingLogger;
pub use self::payload::Captured;
pub use self::payload::PayloadBuilder;
pub use self::record::JobRecord;
pub use self::record::JobStatus;
pub use self::record::Payload;
pub use self::timestamp::format as format_time;
pub use self::timestamp::normalize as normalize_time;
pub use self::timestamp::Timestamp;
