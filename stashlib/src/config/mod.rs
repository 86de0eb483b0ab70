// Copyright (c) 2022 pud developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! configuration for the job logging middleware

use crate::{
    constants::{CONFIG_FILE_BASE_PATH, CONFIG_FILE_NAME, FILE_OPEN, READ, UNABLE},
    error::Error::{self, ConfigDir, InvalidFilterArg},
    log::LogConfig,
    payload::Captured,
    record::Payload,
};
use anyhow::{Context, Result};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeSet,
    fmt::{self, Debug, Formatter},
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::Level;
use typed_builder::TypedBuilder;

/// A hook receiving only the payload
pub type PayloadHook = Arc<dyn Fn(&Payload) -> Result<Map<String, Value>> + Send + Sync>;
/// A hook receiving the payload and the captured failure, if any
pub type PayloadErrorHook =
    Arc<dyn Fn(&Payload, Option<&Captured>) -> Result<Map<String, Value>> + Send + Sync>;

/// A custom enrichment hook.  The fields it returns are merged into the
/// payload, overwriting existing keys.
#[derive(Clone)]
pub enum CustomOptions {
    /// Called with the payload
    Payload(PayloadHook),
    /// Called with the payload and the captured failure
    PayloadAndError(PayloadErrorHook),
}

impl CustomOptions {
    /// Create a hook that only looks at the payload
    pub fn payload<F>(hook: F) -> Self
    where
        F: Fn(&Payload) -> Result<Map<String, Value>> + Send + Sync + 'static,
    {
        CustomOptions::Payload(Arc::new(hook))
    }

    /// Create a hook that also looks at the captured failure
    pub fn payload_and_error<F>(hook: F) -> Self
    where
        F: Fn(&Payload, Option<&Captured>) -> Result<Map<String, Value>> + Send + Sync + 'static,
    {
        CustomOptions::PayloadAndError(Arc::new(hook))
    }

    pub(crate) fn call(
        &self,
        payload: &Payload,
        captured: Option<&Captured>,
    ) -> Result<Map<String, Value>> {
        match self {
            CustomOptions::Payload(hook) => hook(payload),
            CustomOptions::PayloadAndError(hook) => hook(payload, captured),
        }
    }
}

impl Debug for CustomOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CustomOptions::Payload(_) => f.write_str("CustomOptions::Payload(..)"),
            CustomOptions::PayloadAndError(_) => f.write_str("CustomOptions::PayloadAndError(..)"),
        }
    }
}

/// The middleware configuration.  It is read, never written, while jobs run.
#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Debug, Getters, TypedBuilder)]
pub struct Configuration {
    /// Optional enrichment hook
    #[builder(default, setter(strip_option))]
    #[getset(get = "pub")]
    custom_options: Option<CustomOptions>,
    /// Argument keys whose values are redacted
    #[builder(default, setter(into))]
    #[getset(get = "pub")]
    filter_args: BTreeSet<String>,
    /// Logging quietness
    #[builder(default)]
    quiet: u8,
    /// Logging verbosity
    #[builder(default)]
    verbose: u8,
    /// Log the event target
    #[builder(default)]
    target: bool,
    /// Log the thread id
    #[builder(default)]
    thread_id: bool,
    /// Log the thread names
    #[builder(default)]
    thread_names: bool,
    /// Log the line numbers
    #[builder(default)]
    line_numbers: bool,
    #[builder(default, setter(skip))]
    level: Option<Level>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Configuration {
    /// Attach an enrichment hook
    #[must_use]
    pub fn with_custom_options(mut self, custom_options: CustomOptions) -> Self {
        self.custom_options = Some(custom_options);
        self
    }
}

impl LogConfig for Configuration {
    fn quiet(&self) -> u8 {
        self.quiet
    }

    fn verbose(&self) -> u8 {
        self.verbose
    }

    fn target(&self) -> bool {
        self.target
    }

    fn thread_id(&self) -> bool {
        self.thread_id
    }

    fn thread_names(&self) -> bool {
        self.thread_names
    }

    fn line_numbers(&self) -> bool {
        self.line_numbers
    }

    fn with_level(&self) -> bool {
        true
    }

    fn level(&self) -> Option<Level> {
        self.level
    }

    fn set_level(&mut self, level: Level) -> &mut Self {
        self.level = Some(level);
        self
    }
}

impl TryFrom<TomlConfig> for Configuration {
    type Error = Error;

    fn try_from(config: TomlConfig) -> Result<Self, Self::Error> {
        if config.filter_args().iter().any(|key| key.trim().is_empty()) {
            return Err(InvalidFilterArg);
        }
        let tracing = config.tracing().clone().unwrap_or_default();
        let filter_args: BTreeSet<String> = config.filter_args.into_iter().collect();

        Ok(Configuration::builder()
            .filter_args(filter_args)
            .quiet(*tracing.quiet())
            .verbose(*tracing.verbose())
            .target(*tracing.target())
            .thread_id(*tracing.thread_id())
            .thread_names(*tracing.thread_names())
            .line_numbers(*tracing.line_numbers())
            .build())
    }
}

/// The TOML configuration.
#[derive(Clone, Debug, Default, Deserialize, Eq, Getters, PartialEq, Serialize)]
#[getset(get = "pub(crate)")]
pub(crate) struct TomlConfig {
    /// Argument keys to redact
    #[serde(default)]
    filter_args: Vec<String>,
    /// The tracing configuration
    tracing: Option<Tracing>,
}

/// tracing configuration
#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Debug, Default, Deserialize, Eq, Getters, PartialEq, Serialize)]
#[getset(get = "pub(crate)")]
#[serde(default)]
pub(crate) struct Tracing {
    quiet: u8,
    verbose: u8,
    target: bool,
    thread_id: bool,
    thread_names: bool,
    line_numbers: bool,
}

/// Load the configuration from a TOML file.  The default location is
/// `<config dir>/stashlib/stashlib.toml`.
///
/// # Errors
/// * I/O error if the default config path cannot be determined (via `dirs2`)
/// * I/O error if the file cannot be read
/// * TOML parse errors
/// * An empty `filter_args` entry
///
pub fn load(path: Option<&Path>) -> Result<Configuration> {
    // Determine the configuration file path
    let config_file_path = config_file_path(path)?;
    // Setup error handling
    let path = config_file_path.clone();
    let ctx = |msg: &'static str| -> String { format!("{msg} {}", path.display()) };
    // Read the config file
    let config_file = read_config_file(config_file_path, ctx)?;
    // Parse the config file
    let config: TomlConfig = toml::from_str(&config_file).with_context(|| ctx(UNABLE))?;
    // Convert the toml config to the middleware config
    Ok(Configuration::try_from(config)?)
}

fn config_file_path(path: Option<&Path>) -> Result<PathBuf> {
    path.map_or_else(default_config_file_path, |path| Ok(path.to_path_buf()))
}

fn default_config_file_path() -> Result<PathBuf> {
    let mut config_file_path = dirs2::config_dir().ok_or(ConfigDir)?;
    config_file_path.push(CONFIG_FILE_BASE_PATH);
    config_file_path.push(CONFIG_FILE_NAME);
    Ok(config_file_path)
}

fn read_config_file<F>(config_file_path: PathBuf, ctx: F) -> Result<String>
where
    F: FnOnce(&'static str) -> String + Copy,
{
    let mut buf = String::new();
    let mut file = File::open(config_file_path).with_context(|| ctx(FILE_OPEN))?;
    let _ = file.read_to_string(&mut buf).with_context(|| ctx(READ))?;
    Ok(buf)
}
