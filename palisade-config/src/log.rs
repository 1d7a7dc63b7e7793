//! The `log` section.
//!
//! ```toml
//! [log]
//! level = "debug"
//! format = "compact"
//! directory = "logs"
//! rotation = "daily"
//! ```

use crate::{ConfigError, Result};
use palisade_core::logging::{LogConfig, LogFormat, LogLevel, LogOutput, Rotation};
use serde::Deserialize;
use std::str::FromStr;

const DEFAULT_PREFIX: &str = "palisade.log";

/// Subscriber settings as they appear in a configuration file.
///
/// Output is a rolling file when `directory` is set, else a single appended
/// `file`, else STDERR when `stderr` is true, else STDOUT.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
    pub directory: Option<String>,
    pub prefix: Option<String>,
    pub rotation: Option<String>,
    pub stderr: bool,
    #[serde(alias = "env_filter")]
    pub filter: Option<String>,
    pub spans: bool,
    pub targets: Option<bool>,
    pub colors: bool,
}

impl LogSection {
    pub fn to_log_config(&self) -> Result<LogConfig> {
        let mut config = LogConfig::new()
            .with_spans(self.spans)
            .with_colors(self.colors);

        if let Some(level) = &self.level {
            config = config.level(parse(level)?);
        }
        if let Some(format) = &self.format {
            config = config.format(parse::<LogFormat>(format)?);
        }
        if let Some(targets) = self.targets {
            config = config.with_targets(targets);
        }
        if let Some(filter) = self.filter.as_ref().filter(|f| !f.is_empty()) {
            config = config.with_env_filter(filter.clone());
        }

        let output = match (&self.directory, &self.file) {
            (Some(directory), _) => LogOutput::RollingFile {
                directory: directory.clone(),
                prefix: self
                    .prefix
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
                rotation: match &self.rotation {
                    Some(rotation) => parse(rotation)?,
                    None => Rotation::Daily,
                },
            },
            (None, Some(file)) => LogOutput::File(file.clone()),
            (None, None) if self.stderr => LogOutput::Stderr,
            (None, None) => LogOutput::Stdout,
        };

        Ok(config.output(output))
    }
}

fn parse<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = palisade_core::Error>,
{
    value.parse().map_err(|e: palisade_core::Error| ConfigError::SectionError {
        section: "log".to_string(),
        message: e.to_string(),
    })
}
