// Copyright (c) 2022 pud developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Constants

use const_format::concatcp;

// Constants building blocks
const COULD_NOT: &str = "Could not ";
const CONFIG_FILE: &str = " config file!";

/// The configuration file base path
pub(crate) const CONFIG_FILE_BASE_PATH: &str = "stashlib";
/// The configuration file base name
pub(crate) const CONFIG_FILE_NAME: &str = concatcp!(CONFIG_FILE_BASE_PATH, ".toml");
/// Context if the config file is unable to be parsed
pub(crate) const UNABLE: &str = concatcp!(COULD_NOT, "parse", CONFIG_FILE);
/// Context if the config file is unable to be read
pub(crate) const READ: &str = concatcp!(COULD_NOT, "read", CONFIG_FILE);
/// Context if the config file is unable to be opened
pub(crate) const FILE_OPEN: &str = concatcp!(COULD_NOT, "open", CONFIG_FILE);

/// The tracing target job records are emitted under
pub const JOB_TARGET: &str = concatcp!(CONFIG_FILE_BASE_PATH, "::job");
/// The placeholder written in place of a sensitive argument value
pub const FILTERED: &str = "[FILTERED]";
/// The job record fields holding timestamps
pub(crate) const TIMESTAMP_KEYS: [&str; 5] = [
    "created_at",
    "enqueued_at",
    "retried_at",
    "failed_at",
    "completed_at",
];

// Payload keys
pub(crate) const ARGS: &str = "args";
pub(crate) const CLASS: &str = "class";
pub(crate) const JID: &str = "jid";
pub(crate) const PID: &str = "pid";
pub(crate) const DURATION: &str = "duration";
pub(crate) const MESSAGE: &str = "message";
pub(crate) const JOB_STATUS: &str = "job_status";
pub(crate) const COMPLETED_AT: &str = "completed_at";
pub(crate) const ERROR: &str = "error";
pub(crate) const ERROR_MESSAGE: &str = "error_message";
pub(crate) const ERROR_BACKTRACE: &str = "error_backtrace";

// Fallback diagnostics
pub(crate) const LOG_ERROR: &str = "Error logging the job execution!";
pub(crate) const JOB_PREFIX: &str = "Job: ";
pub(crate) const JOB_EXCEPTION_PREFIX: &str = "Job Exception: ";
pub(crate) const LOG_EXCEPTION_PREFIX: &str = "Log Exception: ";

#[cfg(test)]
pub(crate) const TEST_PATH: &str = "test/config.toml";
