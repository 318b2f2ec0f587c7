// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration loading.
//!
//! Settings come from a YAML file, `sysflux.yml`, looked up in the working
//! directory and then in `/etc/sysflux/`. The InfluxDB connection can be
//! overridden from the environment (`SYSFLUX_INFLUX_ADDR`,
//! `SYSFLUX_INFLUX_USER`, `SYSFLUX_INFLUX_PASSWORD`, `SYSFLUX_INFLUX_DATABASE`,
//! `SYSFLUX_INFLUX_TIMEOUT`).
//!
//! ```yaml
//! influx:
//!   addr: http://localhost:8086
//!   user: sysflux
//!   password: secret
//!   database: telegraf
//!   timeout: 0.8
//!
//! syslog:
//!   - measurement: sensors
//!     listen: 0.0.0.0:5514
//!     regex: 'host=(?P<tag_host>\w+) temp=(?P<val_temp>[\d.]+)'
//!     batch_size: 100
//!     batch_timeout: 10
//!     coercion: skip_field
//! ```
//!
//! Durations are given in seconds, integer or fractional.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::value::Uncased;
use figment::Figment;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, error};

use crate::constants::{
    CONFIG_FILE_NAME, CONFIG_SEARCH_PATHS, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT,
    DEFAULT_WRITE_TIMEOUT, ENV_PREFIX,
};
use crate::extractor::CoercionPolicy;

#[derive(Debug, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("no sysflux.yml found in {0:?}")]
    NotFound(Vec<PathBuf>),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub influx: InfluxConfig,
    pub syslog: Vec<SyslogConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct InfluxConfig {
    pub addr: String,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub user: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub password: Option<String>,
    /// Default database for sources that don't name their own.
    pub database: String,
    /// Per request write timeout.
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub timeout: Duration,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub https_proxy: Option<String>,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            addr: "http://localhost:8086".to_string(),
            user: None,
            password: None,
            database: String::new(),
            timeout: DEFAULT_WRITE_TIMEOUT,
            https_proxy: None,
        }
    }
}

/// One syslog listener and the destination its points go to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
#[allow(clippy::module_name_repetitions)]
pub struct SyslogConfig {
    pub measurement: String,
    pub listen: String,
    pub regex: String,
    /// Overrides `influx.database` for this source.
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub database: Option<String>,
    /// Points per batch before an immediate flush. 0 only flushes on the timer.
    pub batch_size: usize,
    #[serde(deserialize_with = "deserialize_duration_from_seconds")]
    pub batch_timeout: Duration,
    pub coercion: CoercionPolicy,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            measurement: String::new(),
            listen: String::new(),
            regex: String::new(),
            database: None,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            coercion: CoercionPolicy::default(),
        }
    }
}

impl SyslogConfig {
    /// The database this source writes to.
    #[must_use]
    pub fn database<'a>(&'a self, influx: &'a InfluxConfig) -> &'a str {
        self.database.as_deref().unwrap_or(&influx.database)
    }
}

impl Config {
    /// Loads the configuration from `path`, or from the first `sysflux.yml` in
    /// the search paths, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => return Err(ConfigError::NotFound(vec![path.to_path_buf()])),
            None => find_config_file()?,
        };
        debug!("Loading configuration from {}", path.display());

        let figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(env_overrides());
        figment
            .extract::<Config>()
            .map_err(|e| ConfigError::Parse(Box::new(e)))
    }

    /// Checks for settings that make a source unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.influx.addr.trim().is_empty() {
            return Err(ConfigError::Invalid("influx.addr is empty".to_string()));
        }
        if self.syslog.is_empty() {
            return Err(ConfigError::Invalid("no syslog sources configured".to_string()));
        }

        for (i, source) in self.syslog.iter().enumerate() {
            let missing = [
                ("measurement", source.measurement.as_str()),
                ("listen", source.listen.as_str()),
                ("regex", source.regex.as_str()),
                ("database", source.database(&self.influx)),
            ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty());

            if let Some((field, _)) = missing {
                return Err(ConfigError::Invalid(format!("syslog({i}): {field} is empty")));
            }
        }
        Ok(())
    }

    /// Settings that are legal but probably not what was meant.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for (i, source) in self.syslog.iter().enumerate() {
            if source.batch_timeout.is_zero() {
                if source.batch_size == 0 {
                    warnings.push(format!(
                        "syslog({i}): batch_size and batch_timeout are both 0, points are only written on shutdown"
                    ));
                } else {
                    warnings.push(format!(
                        "syslog({i}): batch_timeout is 0, partial batches wait until {} points arrive",
                        source.batch_size
                    ));
                }
            }
        }
        warnings
    }
}

fn env_overrides() -> Env {
    Env::prefixed(&format!("{ENV_PREFIX}INFLUX_"))
        .map(|key| Uncased::from_owned(format!("influx.{}", key.as_str().to_ascii_lowercase())))
}

fn find_config_file() -> Result<PathBuf, ConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_SEARCH_PATHS
        .iter()
        .map(|dir| Path::new(dir).join(CONFIG_FILE_NAME))
        .collect();

    let found = candidates.iter().find(|path| path.is_file()).cloned();
    found.ok_or(ConfigError::NotFound(candidates))
}

pub fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Null => Ok(None),
        _ => {
            error!("Failed to parse value, expected a string or an integer, ignoring");
            Ok(None)
        }
    }
}

pub fn deserialize_duration_from_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    struct DurationVisitor;
    impl serde::de::Visitor<'_> for DurationVisitor {
        type Value = Duration;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a non-negative duration in seconds (integer or float)")
        }
        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_secs(v))
        }
        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("negative durations are not allowed"))
        }
        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Duration::try_from_secs_f64(v)
                .map_err(|_| E::custom(format!("invalid duration in seconds: {v}")))
        }
        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            let secs: f64 = v
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid duration in seconds: {v:?}")))?;
            self.visit_f64(secs)
        }
    }
    deserializer.deserialize_any(DurationVisitor)
}
