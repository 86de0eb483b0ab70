// Copyright (c) 2022 pud developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Job records and the log payloads built from them

use crate::{
    constants::{ARGS, CLASS, DURATION, JID, JOB_STATUS, MESSAGE},
    error::Error::Serialize as SerializeErr,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// A job record as handed to the middleware by the host runtime.
///
/// The record is owned by the host.  The middleware only ever reads it.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct JobRecord(Map<String, Value>);

impl JobRecord {
    /// Get a field by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The job class name, if present and textual
    #[must_use]
    pub fn class(&self) -> Option<&str> {
        self.get(CLASS).and_then(Value::as_str)
    }

    /// The job id, if present and textual
    #[must_use]
    pub fn jid(&self) -> Option<&str> {
        self.get(JID).and_then(Value::as_str)
    }

    /// The job arguments, if present and a sequence
    #[must_use]
    pub fn args(&self) -> Option<&Vec<Value>> {
        self.get(ARGS).and_then(Value::as_array)
    }
}

impl From<Map<String, Value>> for JobRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl FromStr for JobRecord {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Map<String, Value> = serde_json::from_str(s)?;
        Ok(Self(fields))
    }
}

impl Display for JobRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        write!(f, "{json}")
    }
}

/// The outcome recorded in a payload
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The continuation returned normally
    Done,
    /// The continuation failed
    Fail,
}

impl JobStatus {
    /// The wire form of this status
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Done => "done",
            JobStatus::Fail => "fail",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "done" => Ok(JobStatus::Done),
            "fail" => Ok(JobStatus::Fail),
            _ => Err(anyhow::anyhow!("invalid job status: '{s}'")),
        }
    }
}

/// The structured record written to the log for one job execution.
///
/// A payload starts life as an independent copy of the [`JobRecord`], so
/// changing one never shows up in the other.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Get a field by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a field, returning the previous value
    pub fn insert<K, V>(&mut self, key: K, value: V) -> Option<Value>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.0.insert(key.into(), value.into())
    }

    /// Merge `fields` into the payload, overwriting on collision
    pub fn merge(&mut self, fields: Map<String, Value>) {
        self.0.extend(fields);
    }

    /// The recorded job status
    #[must_use]
    pub fn status(&self) -> Option<JobStatus> {
        self.get(JOB_STATUS)
            .and_then(Value::as_str)
            .and_then(|status| status.parse().ok())
    }

    /// The recorded duration, in seconds
    #[must_use]
    pub fn duration(&self) -> Option<f64> {
        self.get(DURATION).and_then(Value::as_f64)
    }

    /// The human readable summary line
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.get(MESSAGE).and_then(Value::as_str)
    }

    pub(crate) fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    /// Render the payload as a single line of JSON
    ///
    /// # Errors
    /// * The payload cannot be serialized
    ///
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0).map_err(|source| SerializeErr { source })?)
    }
}

impl From<&JobRecord> for Payload {
    fn from(record: &JobRecord) -> Self {
        Self(record.0.clone())
    }
}
