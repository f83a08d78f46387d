//! Engine configuration.
//!
//! # Design
//! Every knob has a default matching the storage backend's expectations
//! (60 s timeouts, 128 KiB receive chunks, 256 MiB buffered ceiling), so an
//! empty JSON object is a valid configuration. The application layer passes
//! the JSON text straight through the FFI boundary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024;
pub const DEFAULT_MAX_RESPONSE_SIZE: u64 = 256 * 1024 * 1024;
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024;
pub const DEFAULT_MAX_WORKERS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Socket read/write timeout.
    pub io_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// How long a worker waits for `PushBody`/`Continue` from the caller.
    pub command_timeout_secs: u64,
    /// Upper bound for one `RecvBody` chunk.
    pub chunk_size: usize,
    /// Largest response body accepted in buffered mode.
    pub max_response_size: u64,
    /// Longest status or header line accepted, excluding the line ending.
    pub max_line_length: usize,
    /// Worker threads alive at once; further requests wait in a backlog.
    pub max_workers: usize,
    pub tls: TlsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            io_timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_TIMEOUT_SECS,
            command_timeout_secs: DEFAULT_TIMEOUT_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_workers: DEFAULT_MAX_WORKERS,
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    /// When false, `https` requests fail with `no_tls`.
    pub enabled: bool,
    /// Trust the bundled Mozilla root set.
    pub webpki_roots: bool,
    /// Additional PEM trust anchors.
    pub extra_roots_pem: Option<PathBuf>,
    /// Base64 DER SubjectPublicKeyInfo values replacing the built-in
    /// allow-list. `None` keeps the built-in list.
    pub pinned_keys: Option<Vec<String>>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webpki_roots: true,
            extra_roots_pem: None,
            pinned_keys: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("io_timeout_secs", self.io_timeout_secs as usize),
            ("connect_timeout_secs", self.connect_timeout_secs as usize),
            ("command_timeout_secs", self.command_timeout_secs as usize),
            ("chunk_size", self.chunk_size),
            ("max_line_length", self.max_line_length),
            ("max_workers", self.max_workers),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if let Some(keys) = &self.tls.pinned_keys {
            if keys.is_empty() {
                return Err(ConfigError::Invalid {
                    field: "tls.pinned_keys",
                    reason: "an empty allow-list rejects every server".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
