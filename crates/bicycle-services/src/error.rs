//! Error types for the host services

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
    #[error("MIDI input disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, HostError>;
