use crate::core::{BridgeError, IsolationLevel, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Locale used when a session request carries none
pub const DEFAULT_LOCALE: &str = "AMERICAN_AMERICA.AL32UTF8";

/// Remote codes meaning the session or its network link is gone
pub const DEFAULT_RETRYABLE_CODES: [i32; 4] = [28, 1012, 3113, 3135];

/// Text formats the remote server uses when exchanging values as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatSettings {
    pub date_format: String,
    pub timestamp_format: String,
    pub timestamp_tz_format: String,
    /// Decimal separator followed by group separator
    pub numeric_characters: String,
    pub calendar: String,
    pub date_language: String,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            date_format: "YYYY-MM-DD HH24:MI:SS BC".to_string(),
            timestamp_format: "YYYY-MM-DD HH24:MI:SS.FF9 BC".to_string(),
            timestamp_tz_format: "YYYY-MM-DD HH24:MI:SS.FF9TZH:TZM BC".to_string(),
            numeric_characters: ".,".to_string(),
            calendar: "GREGORIAN".to_string(),
            date_language: "AMERICAN".to_string(),
        }
    }
}

/// Connection cache configuration
///
/// Loaded from JSON or assembled with the builder methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Locale key for requests that do not name one
    pub default_locale: String,

    /// Isolation of every remote transaction the bridge starts
    pub isolation_level: IsolationLevel,

    /// Formats published to the client library for each new locale
    pub format: FormatSettings,

    /// Module tag set on every remote session
    pub module_tag: String,

    /// Action tag set on every remote session
    pub action_tag: String,

    /// Retry connect-and-begin once when the session turns out to be dead
    pub retry_on_disconnect: bool,

    /// Remote codes that trigger the retry
    pub retryable_codes: Vec<i32>,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self {
            default_locale: DEFAULT_LOCALE.to_string(),
            isolation_level: IsolationLevel::Serializable,
            format: FormatSettings::default(),
            module_tag: "dbbridge".to_string(),
            action_tag: format!("backend {}", std::process::id()),
            retry_on_disconnect: true,
            retryable_codes: DEFAULT_RETRYABLE_CODES.to_vec(),
        }
    }

    /// Set the default locale key
    pub fn default_locale(mut self, locale: &str) -> Self {
        self.default_locale = locale.to_string();
        self
    }

    /// Set the isolation level
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    /// Set the text formats
    pub fn format(mut self, format: FormatSettings) -> Self {
        self.format = format;
        self
    }

    /// Set the module tag
    pub fn module_tag(mut self, tag: &str) -> Self {
        self.module_tag = tag.to_string();
        self
    }

    /// Set the action tag
    pub fn action_tag(mut self, tag: &str) -> Self {
        self.action_tag = tag.to_string();
        self
    }

    /// Enable or disable the reconnect retry
    pub fn retry_on_disconnect(mut self, enabled: bool) -> Self {
        self.retry_on_disconnect = enabled;
        self
    }

    /// Replace the retryable code set
    pub fn retryable_codes(mut self, codes: &[i32]) -> Self {
        self.retryable_codes = codes.to_vec();
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_locale.trim().is_empty() {
            return Err(BridgeError::Config("default_locale cannot be empty".into()));
        }

        if self.module_tag.is_empty() {
            return Err(BridgeError::Config("module_tag cannot be empty".into()));
        }

        if self.retry_on_disconnect && self.retryable_codes.is_empty() {
            return Err(BridgeError::Config(
                "retry_on_disconnect requires at least one retryable code".into(),
            ));
        }

        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}
