// Copyright (c) 2022 pud developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

// Errors

/// Errors raised while configuring the middleware or building a job log payload
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The platform has no configuration directory
    #[error("There is no valid config directory")]
    ConfigDir,
    /// A filter key in the configuration was empty
    #[error("filter_args entries must not be empty")]
    InvalidFilterArg,
    /// The sensitive key pattern could not be compiled
    #[error("unable to build the argument filter")]
    FilterPattern {
        #[source]
        source: regex::Error,
    },
    /// A textual timestamp was not recognized
    #[error("invalid timestamp: '{}'", value)]
    TimestampParse { value: String },
    /// A numeric timestamp is outside the representable range
    #[error("timestamp out of range: '{}'", value)]
    TimestampRange { value: String },
    /// The payload could not be rendered as JSON
    #[error("unable to serialize the job payload")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    /// Building or emitting the payload panicked
    #[error("panicked while logging the job: {}", msg)]
    Panic { msg: String },
}
