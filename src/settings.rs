use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::{fs, path::Path, time::Duration};

use crate::{
    error::{ConfigurationError, SettingsError},
    models::Offset,
};

const DEFAULT_BUFFER_CAPACITY: usize = 256;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
const DEFAULT_RESTART_DELAY_MS: u64 = 100;
const DEFAULT_REPORT_INTERVAL_MS: u64 = 5000;

/// Tunables of a reader. Every field has a default, so a settings file
/// only needs to name what it changes.
///
/// ```yaml
/// buffer_capacity: 64
/// poll_timeout_ms: 250
/// start_offset: 1000
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    /// Maximum number of records held in the bridge buffer.
    pub buffer_capacity: usize,
    /// How long a single `advance` waits for a record.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "poll_timeout_ms")]
    pub poll_timeout: Duration,
    /// Pause between a receiver failure and starting its replacement.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "restart_delay_ms")]
    pub restart_delay: Duration,
    /// How often the processor asks its logger for a progress report.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "report_interval_ms")]
    pub report_interval: Duration,
    /// First offset a reader without a checkpoint delivers.
    pub start_offset: Offset,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            restart_delay: Duration::from_millis(DEFAULT_RESTART_DELAY_MS),
            report_interval: Duration::from_millis(DEFAULT_REPORT_INTERVAL_MS),
            start_offset: 0,
        }
    }
}

impl ReaderSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigurationError::InvalidArgument {
                name: "buffer capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.poll_timeout.is_zero() {
            return Err(ConfigurationError::InvalidArgument {
                name: "poll timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: ReaderSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    #[cfg(feature = "file")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SettingsError> {
        let settings: ReaderSettings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or("");

        match extension {
            "json" => Self::from_json_str(&contents),
            #[cfg(feature = "file")]
            "yaml" | "yml" => Self::from_yaml_str(&contents),
            other => Err(SettingsError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let settings =
            ReaderSettings::from_json_str(r#"{"buffer_capacity": 8}"#).unwrap();
        assert_eq!(settings.buffer_capacity, 8);
        assert_eq!(settings.poll_timeout, Duration::from_millis(100));
        assert_eq!(settings.start_offset, 0);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = ReaderSettings::from_json_str(r#"{"buffer_capacity": 0}"#);
        assert!(matches!(
            result,
            Err(SettingsError::Invalid(
                ConfigurationError::InvalidArgument { .. }
            ))
        ));
    }

    #[cfg(feature = "file")]
    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "poll_timeout_ms: 250\nrestart_delay_ms: 0\nstart_offset: 10")
            .unwrap();

        let settings = ReaderSettings::from_file(file.path()).unwrap();
        assert_eq!(settings.poll_timeout, Duration::from_millis(250));
        assert_eq!(settings.restart_delay, Duration::ZERO);
        assert_eq!(settings.start_offset, 10);
        assert_eq!(settings.buffer_capacity, 256);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "buffer_capacity = 1").unwrap();

        let result = ReaderSettings::from_file(file.path());
        assert!(matches!(result, Err(SettingsError::UnsupportedFormat(ext)) if ext == "toml"));
    }

    #[test]
    fn serializes_durations_as_millis() {
        let json = serde_json::to_value(ReaderSettings::default()).unwrap();
        assert_eq!(json["poll_timeout_ms"], 100);
        assert_eq!(json["report_interval_ms"], 5000);
    }
}
