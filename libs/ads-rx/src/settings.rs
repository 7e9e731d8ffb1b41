//! Connection settings: target, notifications and write variables
//!
//! Settings are immutable once handed to [`crate::AdsRxClient::connect`];
//! the client keeps them behind an `Arc`.

use errors::{AdsRxError, AdsRxResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Default ADS port of a TwinCAT 2 runtime
pub const DEFAULT_PORT: u16 = 801;

/// First ADS port of a TwinCAT 3 runtime
pub const TC3_FIRST_PORT: u16 = 851;

/// Prefix for environment overrides (`ADSRX_PORT=851`)
pub const ENV_PREFIX: &str = "ADSRX";

/// Accepts `-1` (and any negative number) as "unset"
fn optional_length<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<i64> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|v| usize::try_from(v).ok()))
}

/// Periodic read subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Dotted variable path, e.g. `.UIStructure` or `MAIN.Counter`
    pub variable: String,
    /// Poll interval in milliseconds
    pub update_rate_ms: u64,
    /// Fixed element count / string length for array-like types
    #[serde(default, deserialize_with = "optional_length", skip_serializing_if = "Option::is_none")]
    pub array_size: Option<usize>,
}

impl Notification {
    pub fn new(update_rate_ms: u64, variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            update_rate_ms,
            array_size: None,
        }
    }

    pub fn with_array_size(mut self, size: usize) -> Self {
        self.array_size = Some(size);
        self
    }
}

/// Write-only variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteVariable {
    pub variable: String,
    #[serde(default, deserialize_with = "optional_length", skip_serializing_if = "Option::is_none")]
    pub array_size: Option<usize>,
}

impl WriteVariable {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            array_size: None,
        }
    }

    pub fn with_array_size(mut self, size: usize) -> Self {
        self.array_size = Some(size);
        self
    }
}

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// AMS net id of the target; empty means the local router
    pub ads_address: String,
    pub port: u16,
    pub notifications: Vec<Notification>,
    pub write_variables: Vec<WriteVariable>,
    pub settings_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ads_address: String::new(),
            port: DEFAULT_PORT,
            notifications: Vec::new(),
            write_variables: Vec::new(),
            settings_id: None,
        }
    }
}

impl Settings {
    /// Settings used by the console when nothing else is configured
    pub fn defaults() -> Self {
        Self {
            settings_id: Some("Defaults".to_string()),
            notifications: vec![Notification::new(100, ".UIStructure")],
            write_variables: vec![WriteVariable::new(".FailSafeCounter")],
            ..Self::default()
        }
    }

    /// Address if set, `None` for the local router
    pub fn address(&self) -> Option<&str> {
        let trimmed = self.ads_address.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// `address:port` for logs and errors
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address().unwrap_or("local"), self.port)
    }

    /// TwinCAT 3 runtimes listen on 851 and above
    pub fn is_twincat3(&self) -> bool {
        self.port >= TC3_FIRST_PORT
    }

    pub fn validate(&self) -> AdsRxResult<()> {
        if self.port == 0 {
            return Err(AdsRxError::InvalidConfig {
                field: "port".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        for n in &self.notifications {
            if n.update_rate_ms == 0 {
                return Err(AdsRxError::InvalidConfig {
                    field: format!("notifications[{}].update_rate_ms", n.variable),
                    reason: "must be greater than zero".to_string(),
                });
            }
            if n.array_size == Some(0) {
                return Err(AdsRxError::InvalidConfig {
                    field: format!("notifications[{}].array_size", n.variable),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        for w in &self.write_variables {
            if w.array_size == Some(0) {
                return Err(AdsRxError::InvalidConfig {
                    field: format!("write_variables[{}].array_size", w.variable),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Load and validate from a YAML/TOML/JSON file
    pub fn from_file(path: impl AsRef<Path>) -> AdsRxResult<Self> {
        let settings: Settings = common::load_config_from_file(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults, then the optional file, then `ADSRX_*` environment variables
    pub fn load(file: Option<&Path>) -> AdsRxResult<Self> {
        let settings: Settings = common::load_layered(ENV_PREFIX, file)?;
        settings.validate()?;
        Ok(settings)
    }
}
