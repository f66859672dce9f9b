//! Transport abstraction: how chunks and commands reach the device.
//!
//! Implementations own framing, retries and timeouts. The upload core only
//! sees the outcome of each operation.

use std::future::Future;

use bytes::Bytes;

use flashline_core::TransportError;

/// Device acknowledgement of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Device write offset after storing the chunk.
    pub offset: u64,
}

/// Answer to the bootloader information query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootloaderResponse {
    /// Bootloader name, if the device reported one.
    pub bootloader: Option<String>,
}

/// A link to one device. Shared by reference between the probe and the
/// transfer sessions, never used by two conversations at once.
pub trait Transport: Send + Sync + 'static {
    /// Write `data` at `offset` of the image in `slot`.
    fn send_chunk(
        &self,
        slot: u32,
        offset: u64,
        data: Bytes,
    ) -> impl Future<Output = Result<Ack, TransportError>> + Send;

    /// Abort the in-progress command sequence on the device.
    fn abort(&self);

    fn query_bootloader_info(
        &self,
    ) -> impl Future<Output = Result<BootloaderResponse, TransportError>> + Send;

    /// Largest chunk payload the link carries.
    fn max_chunk_size(&self) -> usize;
}
