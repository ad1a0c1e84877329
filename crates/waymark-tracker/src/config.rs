//! Configuration for the Waymark tracker.
//!
//! Settings live in `waymark.json` in the working directory. Every field is
//! optional; missing fields take their defaults and unknown fields are
//! ignored. Values are validated after parsing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "waymark.json";

/// Default tutorial file path.
fn default_tutorial() -> String {
    "tutorial.json".to_string()
}

/// Default state file path.
fn default_state_file() -> String {
    ".waymark/session.json".to_string()
}

/// Default port for the host API.
const fn default_port() -> u16 {
    3000
}

/// Default capacity of the outbound event channel.
const fn default_event_capacity() -> usize {
    100
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

/// Main configuration for a tracker session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path to the tutorial JSON file.
    #[serde(default = "default_tutorial")]
    pub tutorial: String,

    /// Tutorial version to follow; the latest published one when unset.
    #[serde(default)]
    pub tutorial_version: Option<String>,

    /// Path to the session snapshot.
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Port the host API listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of outbound events buffered per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Save a snapshot after every settled event.
    #[serde(default = "default_true")]
    pub autosave: bool,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tutorial: default_tutorial(),
            tutorial_version: None,
            state_file: default_state_file(),
            port: default_port(),
            event_capacity: default_event_capacity(),
            autosave: default_true(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `waymark.json` in the current directory; defaults apply if
    /// it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TrackerError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `waymark.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::ConfigParseError` if the file exists but contains
    /// invalid JSON or an invalid log format.
    ///
    /// Returns `TrackerError::ConfigValidationError` if a value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TrackerError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TrackerError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// - `tutorial` and `stateFile` must not be blank
    /// - `tutorialVersion`, if set, must not be blank
    /// - `port` and `eventCapacity` must be greater than 0
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.tutorial.trim().is_empty() {
            return Err(TrackerError::config_validation(
                "tutorial path must not be empty",
                "Provide a valid tutorial file path in your waymark.json",
            ));
        }

        if self
            .tutorial_version
            .as_deref()
            .is_some_and(|v| v.trim().is_empty())
        {
            return Err(TrackerError::config_validation(
                "tutorialVersion must not be empty when set",
                "Remove tutorialVersion to follow the latest published version",
            ));
        }

        if self.state_file.trim().is_empty() {
            return Err(TrackerError::config_validation(
                "stateFile must not be empty",
                "Provide a state file path in your waymark.json (default: .waymark/session.json)",
            ));
        }

        if self.port == 0 {
            return Err(TrackerError::config_validation(
                "port must be greater than 0",
                "Set port to a free TCP port in your waymark.json",
            ));
        }

        if self.event_capacity == 0 {
            return Err(TrackerError::config_validation(
                "eventCapacity must be greater than 0",
                "Set eventCapacity to at least 1 in your waymark.json",
            ));
        }

        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-field human-readable lines (default).
    #[default]
    Full,
    /// Condensed single-line output.
    Compact,
}

impl LogFormat {
    /// Parses a string into a `LogFormat`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "full" => Some(Self::Full),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for LogFormat {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid log format '{s}': expected one of 'full', 'compact'"
            ))
        })
    }
}

impl Serialize for LogFormat {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Full => "full",
            Self::Compact => "compact",
        };
        serializer.serialize_str(s)
    }
}
