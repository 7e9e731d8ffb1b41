//! Configuration loading helper functions
//!
//! Settings files may be YAML, TOML or JSON; the format is picked from the
//! extension. Layered loading merges serialized defaults, an optional file and
//! prefixed environment variables (highest priority).

use errors::{AdsRxError, AdsRxResult};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Figment for a single file, chosen by extension
fn file_figment(path: &Path) -> AdsRxResult<Figment> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AdsRxError::Configuration("Config file must have an extension".to_string()))?;

    match extension {
        "toml" => Ok(Figment::new().merge(Toml::file(path))),
        "yaml" | "yml" => Ok(Figment::new().merge(Yaml::file(path))),
        "json" => Ok(Figment::new().merge(Json::file(path))),
        _ => Err(AdsRxError::Configuration(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

/// Load configuration from a specific file
pub fn load_config_from_file<T, P>(path: P) -> AdsRxResult<T>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(AdsRxError::Io(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    info!("Loading configuration from {}", path.display());
    file_figment(path)?
        .extract()
        .map_err(|e| AdsRxError::Configuration(format!("Failed to load {}: {}", path.display(), e)))
}

/// Load configuration from multiple sources
///
/// Priority (highest to lowest):
/// 1. Environment variables prefixed with `{prefix}_`
/// 2. The given file (if any and if it exists)
/// 3. `T::default()`
pub fn load_layered<T>(prefix: &str, file: Option<&Path>) -> AdsRxResult<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = file {
        if path.exists() {
            debug!("Merging configuration file {}", path.display());
            figment = figment.merge(file_figment(path)?);
        } else {
            debug!("Configuration file {} not present, skipping", path.display());
        }
    }

    figment
        .merge(Env::prefixed(&format!("{}_", prefix.to_uppercase())).split("__"))
        .extract()
        .map_err(|e| AdsRxError::Configuration(format!("Failed to load configuration: {}", e)))
}

/// Save configuration to a file, format chosen by extension
pub fn save_config_to_file<T, P>(config: &T, path: P) -> AdsRxResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| AdsRxError::Configuration("Config file must have an extension".to_string()))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = match extension {
        "yaml" | "yml" => serde_yaml::to_string(config)?,
        "json" => serde_json::to_string_pretty(config)?,
        _ => {
            return Err(AdsRxError::Configuration(format!(
                "Unsupported config file format for saving: {}",
                extension
            )))
        },
    };

    std::fs::write(path, content)?;
    Ok(())
}
