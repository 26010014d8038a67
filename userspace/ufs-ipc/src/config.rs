// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transport tuning loaded from TOML.
//!
//! ```toml
//! port_size = 8192
//! port_count = 4
//! request_timeout_ms = 2000
//! close_on_timeout = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use ufs_abi::Wait;

use crate::port::{clamp_port_size, DEFAULT_PORT_SIZE};

/// Errors raised while loading a [`TransportConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read transport config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Configuration text is not valid TOML for this schema.
    #[error("failed to parse transport config {path}: {source}")]
    Parse {
        /// File that failed, `<inline>` for string input.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// Values parsed but are out of range.
    #[error("invalid transport config: {0}")]
    Invalid(String),
}

/// Port sizing and timeout policy.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Port buffer size in bytes; clamped into the supported range at use.
    pub port_size: usize,
    /// Number of ports in a pool.
    pub port_count: usize,
    /// Wait for acknowledgements and nested replies; unbounded when absent.
    pub request_timeout_ms: Option<u64>,
    /// Close a port whose wait timed out.
    pub close_on_timeout: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port_size: DEFAULT_PORT_SIZE,
            port_count: 2,
            request_timeout_ms: None,
            close_on_timeout: true,
        }
    }
}

impl TransportConfig {
    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, Path::new("<inline>"))
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_count == 0 {
            return Err(ConfigError::Invalid("port_count must be at least 1".into()));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Port size after clamping.
    pub fn effective_port_size(&self) -> usize {
        clamp_port_size(self.port_size)
    }

    /// Wait derived from `request_timeout_ms`.
    pub fn request_wait(&self) -> Wait {
        match self.request_timeout_ms {
            Some(ms) => Wait::Timeout(Duration::from_millis(ms)),
            None => Wait::Blocking,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::port::{MAX_PORT_SIZE, MIN_PORT_SIZE};

    #[test]
    fn empty_document_uses_defaults() {
        let config = TransportConfig::from_toml_str("").unwrap();
        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.request_wait(), Wait::Blocking);
        assert_eq!(config.effective_port_size(), DEFAULT_PORT_SIZE);
    }

    #[test]
    fn values_are_parsed_and_clamped() {
        let config = TransportConfig::from_toml_str(
            "port_size = 100\nport_count = 3\nrequest_timeout_ms = 250\nclose_on_timeout = false\n",
        )
        .unwrap();
        assert_eq!(config.port_count, 3);
        assert!(!config.close_on_timeout);
        assert_eq!(config.effective_port_size(), MIN_PORT_SIZE);
        assert_eq!(config.request_wait(), Wait::Timeout(Duration::from_millis(250)));
        let big = TransportConfig { port_size: 1 << 20, ..Default::default() };
        assert_eq!(big.effective_port_size(), MAX_PORT_SIZE);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = TransportConfig::from_toml_str("port_count = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = TransportConfig::from_toml_str("request_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = TransportConfig::from_toml_str("port_sise = 4096").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "port_count = 5").unwrap();
        let config = TransportConfig::load(file.path()).unwrap();
        assert_eq!(config.port_count, 5);
        assert!(config.close_on_timeout);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        match TransportConfig::load(&path).unwrap_err() {
            ConfigError::Read { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
