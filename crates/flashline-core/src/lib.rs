//! flashline-core: firmware images, upload planning and the transfer
//! state machine. No I/O; every other flashline crate depends on this one.

pub mod config;
pub mod error;
pub mod image;
pub mod plan;
pub mod session;
pub mod throughput;

pub use config::{ByteAlignment, FlashlineConfig, UploadConfiguration};
pub use error::{ConfigurationError, PlanError, TransportError, UploadError};
pub use image::{Artifact, BootloaderKind, ContentHash, DigestAlgorithm, Envelope, FirmwareImage, Package};
pub use plan::ImageSelection;
pub use session::{AckOutcome, ChunkRequest, SessionState, TransferSession};
pub use throughput::{DisplayMetric, ThroughputSample, ThroughputTracker};
