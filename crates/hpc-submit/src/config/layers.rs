use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::common::error::SubmitError;

/// Name of the configuration file used by every layer.
pub const CONFIG_FILE_NAME: &str = "hpc_submit.conf";

/// Site-wide configuration file.
pub const GLOBAL_CONFIG_PATH: &str = "/usr/local/etc/hpc_submit/hpc_submit.conf";

/// Locations of the configuration layers that do not depend on the project.
#[derive(Debug, Clone)]
pub struct ConfigLocations {
    pub global: PathBuf,
    pub user: PathBuf,
}

impl ConfigLocations {
    pub fn new(global: PathBuf, user: PathBuf) -> Self {
        Self { global, user }
    }

    /// Global file from [`GLOBAL_CONFIG_PATH`], user file from the user configuration directory
    /// (e.g. `~/.config/hpc_submit/hpc_submit.conf`).
    pub fn from_env_defaults() -> Self {
        Self::new(PathBuf::from(GLOBAL_CONFIG_PATH), default_user_config_path())
    }

    /// Merges the global, user and project layers and finally the `overrides`.
    /// Missing files are treated as empty layers.
    pub fn resolve(&self, project: Option<&Path>, overrides: Mapping) -> crate::Result<Mapping> {
        let mut merged = load_layer(&self.global)?;
        merged = merge(merged, load_layer(&self.user)?);
        if let Some(project) = project {
            merged = merge(merged, load_layer(project)?);
        }
        Ok(merge(merged, overrides))
    }
}

pub fn default_user_config_path() -> PathBuf {
    let mut path = dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(std::env::temp_dir);
    path.push("hpc_submit");
    path.push(CONFIG_FILE_NAME);
    path
}

/// Loads a single configuration layer.
///
/// Returns an empty mapping if the file does not exist or if it contains an empty document.
pub fn load_layer(path: &Path) -> crate::Result<Mapping> {
    if !path.exists() {
        log::debug!("Config layer {} does not exist, skipping", path.display());
        return Ok(Mapping::new());
    }
    let content = std::fs::read_to_string(path).map_err(|source| SubmitError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let format_error = |reason: String| SubmitError::ConfigFormat {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value = serde_yaml::from_str(&content).map_err(|e| format_error(e.to_string()))?;
    let mapping = match value {
        Value::Null => Mapping::new(),
        Value::Mapping(mapping) => mapping,
        _ => {
            return Err(format_error(
                "the top-level value must be a mapping".to_string(),
            ));
        }
    };
    log::debug!(
        "Loaded config layer {} ({} top-level keys)",
        path.display(),
        mapping.len()
    );
    Ok(mapping)
}

/// Recursively merges `overlay` into `base`.
///
/// Mappings present on both sides are merged key by key, any other value from `overlay`
/// replaces the value from `base` (sequences are not concatenated).
pub fn merge(mut base: Mapping, overlay: Mapping) -> Mapping {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(slot) => {
                let previous = std::mem::replace(slot, Value::Null);
                *slot = merge_value(previous, value);
            }
            None => {
                base.insert(key, value);
            }
        }
    }
    base
}

fn merge_value(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => Value::Mapping(merge(base, overlay)),
        (_, overlay) => overlay,
    }
}
