//! Error kinds surfaced by planning, configuration, and transfer.
//!
//! All variants are `Clone` so they can travel inside `UploadEvent`s.

use crate::image::DigestAlgorithm;

/// Image plan could not be produced from the selected artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The envelope carries no digest the device can consume (only SHA-256 is).
    #[error("envelope has no supported digest (available: {available:?})")]
    UnsupportedDigestAlgorithm { available: Vec<DigestAlgorithm> },
    #[error("{algorithm} digest has {len} bytes, expected 32")]
    MalformedDigest { algorithm: DigestAlgorithm, len: usize },
    #[error("artifact contains no images")]
    EmptyPlan,
    #[error("image index {index} out of range (plan has {len} images)")]
    SelectionOutOfRange { index: usize, len: usize },
}

/// Failure reported by the transport for a command or chunk.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("device rejected chunk at offset {offset} (rc {rc})")]
    Rejected { offset: u64, rc: i32 },
    #[error("transport timed out")]
    Timeout,
    #[error("transport disconnected")]
    Disconnected,
    #[error("device busy")]
    Busy,
    #[error("{0}")]
    Other(String),
}

/// Upload configuration that cannot produce a usable chunk size.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("chunk size {chunk_size} is smaller than the {alignment}-byte alignment")]
    ChunkSizeTooSmall { chunk_size: u64, alignment: u64 },
}

/// Terminal error of an upload run, as reported through `DidFail`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// `start` was called while another upload is still running.
    #[error("an upload is already in progress")]
    Busy,
    /// The orchestrator task is no longer running.
    #[error("upload orchestrator has shut down")]
    Closed,
}
