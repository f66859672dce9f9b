//! flashline-services: the async side of an upload. Transport seam,
//! bootloader probe, transfer driver and the orchestrator task.

pub mod orchestrator;
pub mod probe;
pub mod sim;
pub mod transfer;
pub mod transport;

pub use orchestrator::{UploadEvent, UploadHandle, UploadOrchestrator};
pub use probe::probe;
pub use sim::SimulatedDevice;
pub use transfer::{run_session, SessionControl, SessionEvent, SessionOutcome};
pub use transport::{Ack, BootloaderResponse, Transport};
