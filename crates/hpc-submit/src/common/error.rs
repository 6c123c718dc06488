use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Cannot read config file {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Config file {path:?} is invalid: {reason}")]
    ConfigFormat { path: PathBuf, reason: String },
    #[error("Missing required config key: {0}")]
    MissingRequiredKey(String),
    #[error("Invalid value of config key {key}: expected {expected}, found {found}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        found: String,
    },
    #[error("--set expects KEY=VALUE, got: {0:?}")]
    InvalidOverride(String),
    #[error("Unknown backend {name:?}, available backends: {available}")]
    UnknownBackend { name: String, available: String },
}

pub fn missing_key<T>(key: impl Into<String>) -> crate::Result<T> {
    Err(SubmitError::MissingRequiredKey(key.into()))
}
