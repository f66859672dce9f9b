//! Configuration system for flashline.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $FLASHLINE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/flashline/config.toml
//!   3. ~/.config/flashline/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigurationError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashlineConfig {
    pub upload: UploadConfiguration,
    pub device: DeviceSettings,
}

/// Padding boundary an image length is rounded up to before chunking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ByteAlignment {
    #[default]
    Disabled,
    Two,
    Four,
    Eight,
    Sixteen,
}

impl ByteAlignment {
    pub const ALL: [ByteAlignment; 5] = [
        ByteAlignment::Disabled,
        ByteAlignment::Two,
        ByteAlignment::Four,
        ByteAlignment::Eight,
        ByteAlignment::Sixteen,
    ];

    /// Boundary in bytes. Disabled behaves as 1.
    pub fn bytes(self) -> u64 {
        match self {
            ByteAlignment::Disabled => 1,
            ByteAlignment::Two => 2,
            ByteAlignment::Four => 4,
            ByteAlignment::Eight => 8,
            ByteAlignment::Sixteen => 16,
        }
    }

    /// Round `len` up to the next multiple of the boundary.
    pub fn pad(self, len: u64) -> u64 {
        let a = self.bytes();
        len.div_ceil(a) * a
    }
}

impl TryFrom<u8> for ByteAlignment {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 | 1 => Ok(ByteAlignment::Disabled),
            2 => Ok(ByteAlignment::Two),
            4 => Ok(ByteAlignment::Four),
            8 => Ok(ByteAlignment::Eight),
            16 => Ok(ByteAlignment::Sixteen),
            other => Err(format!("unsupported byte alignment {other} (expected 0, 2, 4, 8 or 16)")),
        }
    }
}

impl From<ByteAlignment> for u8 {
    fn from(value: ByteAlignment) -> Self {
        match value {
            ByteAlignment::Disabled => 0,
            other => other.bytes() as u8,
        }
    }
}

impl std::fmt::Display for ByteAlignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ByteAlignment::Disabled => f.write_str("disabled"),
            other => write!(f, "{}-byte", other.bytes()),
        }
    }
}

/// Per-upload transfer parameters.
///
/// Passed to the orchestrator by value at `start`, so later edits by the
/// caller never reach a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfiguration {
    /// Chunks allowed in flight beyond the first.
    pub pipeline_depth: u32,
    pub byte_alignment: ByteAlignment,
    /// Chunk size in bytes. 0 = the transport's MTU-derived size.
    pub reassembly_buffer_size: u64,
}

impl Default for UploadConfiguration {
    fn default() -> Self {
        Self {
            pipeline_depth: 1,
            byte_alignment: ByteAlignment::Disabled,
            reassembly_buffer_size: 0,
        }
    }
}

impl UploadConfiguration {
    /// From an "number of buffers" setting (2 = pipelining disabled).
    pub fn from_buffer_count(buffers: u32) -> Self {
        Self {
            pipeline_depth: buffers.saturating_sub(1),
            ..Self::default()
        }
    }

    pub fn buffer_count(&self) -> u32 {
        self.pipeline_depth + 1
    }

    /// Maximum unacknowledged chunks at any instant.
    pub fn window(&self) -> usize {
        self.pipeline_depth as usize + 1
    }

    /// Chunk size for a transport offering `transport_max` bytes per chunk,
    /// rounded down to the alignment boundary.
    pub fn chunk_size(&self, transport_max: usize) -> Result<usize, ConfigurationError> {
        let requested = match self.reassembly_buffer_size {
            0 => transport_max as u64,
            n => n,
        };
        let alignment = self.byte_alignment.bytes();
        let aligned = requested - requested % alignment;
        if aligned == 0 {
            return Err(ConfigurationError::ChunkSizeTooSmall {
                chunk_size: requested,
                alignment,
            });
        }
        Ok(usize::try_from(aligned).unwrap_or(usize::MAX))
    }
}

/// Parameters for the simulated device used by dry runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Bootloader name the device reports. Empty = no answer.
    pub bootloader: String,
    /// Largest chunk the link carries, in bytes.
    pub mtu: usize,
    /// Simulated per-chunk round trip.
    pub latency_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            bootloader: "MCUboot".to_string(),
            mtu: 498,
            latency_ms: 20,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("flashline")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl FlashlineConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            FlashlineConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("FLASHLINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = FlashlineConfig::default().to_toml()?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply FLASHLINE_* overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FLASHLINE_UPLOAD__PIPELINE_DEPTH") {
            if let Ok(depth) = v.parse() {
                self.upload.pipeline_depth = depth;
            }
        }
        if let Some(v) = var("FLASHLINE_UPLOAD__BYTE_ALIGNMENT") {
            match v.parse::<u8>().map_err(|e| e.to_string()).and_then(ByteAlignment::try_from) {
                Ok(alignment) => self.upload.byte_alignment = alignment,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring byte alignment override"),
            }
        }
        if let Some(v) = var("FLASHLINE_UPLOAD__REASSEMBLY_BUFFER_SIZE") {
            if let Ok(size) = v.parse() {
                self.upload.reassembly_buffer_size = size;
            }
        }
        if let Some(v) = var("FLASHLINE_DEVICE__BOOTLOADER") {
            self.device.bootloader = v;
        }
    }
}
