// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2020 Takashi Sakamoto

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Tunables that spec leaves as construction parameters, gathered into a
/// single TOML-loadable configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Effective DLL bandwidth in Hz, passed to `TimestampedBuffer::set_bandwidth`.
    pub dll_bandwidth_hz: f64,
    /// SYT interval: frames per timestamp update (8, 16, or 32).
    pub syt_interval: u32,
    /// Frames per client period.
    pub period_size: u32,
    /// Number of periods held in the device-side ring.
    pub n_periods: u32,
    /// When true, a DLL deviating more than 10% from nominal snaps back to
    /// nominal instead of continuing to track the measured rate.
    pub snap_rate_on_deviation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            dll_bandwidth_hz: 1.0,
            syt_interval: 8,
            period_size: 1024,
            n_periods: 2,
            snap_rate_on_deviation: false,
        }
    }
}

#[derive(Debug)]
pub enum ConfigLoadError {
    Io(String),
    Parse(String),
}

impl fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLoadError::Io(msg) => write!(f, "failed to read config file: {}", msg),
            ConfigLoadError::Parse(msg) => write!(f, "failed to parse config file: {}", msg),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        toml::from_str(content).map_err(|err| ConfigLoadError::Parse(err.to_string()))
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigLoadError::Io(err.to_string()))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_matches_spec_nominal_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.syt_interval, 8);
        assert!(!cfg.snap_rate_on_deviation);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg = EngineConfig::from_toml_str("syt_interval = 16\n").unwrap();
        assert_eq!(cfg.syt_interval, 16);
        assert_eq!(cfg.period_size, 1024);
    }

    #[test]
    fn reports_parse_errors() {
        let err = EngineConfig::from_toml_str("syt_interval = [").unwrap_err();
        matches!(err, ConfigLoadError::Parse(_));
    }
}
