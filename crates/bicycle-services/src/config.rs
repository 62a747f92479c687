//! Host configuration, stored as TOML under the user's config directory

use std::path::{Path, PathBuf};
use std::time::Duration;

use bicycle_core::{TimingSpec, ARENA_CAPACITY};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{HostError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub timing: TimingSpec,
    /// Send MIDI clock, start and stop alongside the loop
    pub midi_clock: bool,
    /// Event cells shared by all layers
    pub arena_cells: usize,
    /// Longest the host waits for input before refreshing status
    pub refresh_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            timing: TimingSpec::default(),
            midi_clock: true,
            arena_cells: ARENA_CAPACITY,
            refresh_ms: 10,
        }
    }
}

impl HostConfig {
    pub fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if !(t.low_tempo.in_bpm() > 0.0 && t.low_tempo.in_bpm() <= t.high_tempo.in_bpm()) {
            return Err(HostError::Config(format!(
                "tempo range {:.1}..{:.1} bpm is empty",
                t.low_tempo.in_bpm(),
                t.high_tempo.in_bpm()
            )));
        }
        if !(t.tempo.in_bpm() > 0.0) {
            return Err(HostError::Config("tempo must be positive".into()));
        }
        if !t.meter.base.is_power_of_two() {
            return Err(HostError::Config(format!(
                "meter base {} is not a note value",
                t.meter.base
            )));
        }
        if t.locked_meter && !t.meter.is_specified() {
            return Err(HostError::Config("locked meter needs a beat count".into()));
        }
        if !(1..0xFFFF).contains(&self.arena_cells) {
            return Err(HostError::Config(format!(
                "arena_cells {} out of range 1..65535",
                self.arena_cells
            )));
        }
        Ok(())
    }
}

pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bicycle")
        .join("config.toml")
}

/// Load the user's config, falling back to defaults if missing or unreadable
pub fn load_config() -> HostConfig {
    let path = config_path();
    if !path.exists() {
        info!(path = %path.display(), "No config file, using defaults");
        return HostConfig::default();
    }
    load_config_from(&path).unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring config file");
        HostConfig::default()
    })
}

pub fn load_config_from(path: &Path) -> Result<HostConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| HostError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: HostConfig = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(config: &HostConfig) -> Result<()> {
    save_config_to(&config_path(), config)
}

pub fn save_config_to(path: &Path, config: &HostConfig) -> Result<()> {
    let io_err = |source| HostError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let text = toml::to_string_pretty(config)?;
    std::fs::write(path, text).map_err(io_err)
}
