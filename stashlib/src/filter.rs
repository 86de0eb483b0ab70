// Copyright (c) 2022 pud developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Sensitive argument redaction

use crate::{constants::FILTERED, error::Error::FilterPattern};
use anyhow::Result;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

/// Redacts sensitive values inside a job argument.
///
/// Implementations must leave arguments without sensitive keys unchanged.
pub trait ArgumentFilter: Send + Sync {
    /// Return a redacted copy of `arg`
    fn filter(&self, arg: &Value) -> Value;
}

/// Redacts object values whose key contains any of the configured names.
///
/// Keys match case-insensitively as substrings, so `password` also covers
/// `password_confirmation`.  Objects and arrays are walked recursively.
#[derive(Clone, Debug)]
pub struct ParamFilter {
    matcher: Option<Regex>,
}

impl ParamFilter {
    /// Build a filter for the given key names
    ///
    /// # Errors
    /// * The combined key pattern exceeds the regex size limit
    ///
    pub fn new<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternates: Vec<String> = keys
            .into_iter()
            .map(|key| regex::escape(key.as_ref()))
            .filter(|key| !key.is_empty())
            .collect();

        let matcher = if alternates.is_empty() {
            None
        } else {
            let pattern = alternates.join("|");
            Some(
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| FilterPattern { source })?,
            )
        };
        Ok(Self { matcher })
    }

    /// Does this filter redact anything at all?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matcher.is_none()
    }

    fn is_sensitive(&self, key: &str) -> bool {
        self.matcher
            .as_ref()
            .is_some_and(|matcher| matcher.is_match(key))
    }

    fn filter_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive(key) {
                    Value::String(FILTERED.to_string())
                } else {
                    self.filter(value)
                };
                (key.clone(), value)
            })
            .collect()
    }
}

impl ArgumentFilter for ParamFilter {
    fn filter(&self, arg: &Value) -> Value {
        match arg {
            Value::Object(map) if !self.is_empty() => Value::Object(self.filter_map(map)),
            Value::Array(values) if !self.is_empty() => {
                Value::Array(values.iter().map(|value| self.filter(value)).collect())
            }
            other => other.clone(),
        }
    }
}
