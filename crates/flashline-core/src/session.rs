//! Transfer session: pipelined chunk bookkeeping for a single image.
//!
//! `TransferSession` does no I/O. A driver asks it for the next chunk to
//! issue, hands chunks to the transport, and reports acknowledgements back.
//! The session enforces the window bound and offset ordering, and decides
//! when the image is complete.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::config::UploadConfiguration;
use crate::error::{ConfigurationError, TransportError};
use crate::image::FirmwareImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Uploading,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }

    fn is_active(self) -> bool {
        matches!(self, SessionState::Uploading | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Uploading => "uploading",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One chunk ready to be handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub slot: u32,
    pub offset: u64,
    pub data: Bytes,
}

impl ChunkRequest {
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Result of reporting an acknowledgement to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The lowest outstanding chunk was acknowledged.
    Advanced { bytes_acknowledged: u64 },
    /// Acknowledged ahead of a lower outstanding chunk; held until the gap closes.
    Recorded,
    /// Duplicate, unknown offset, or the session is no longer active.
    Ignored,
    /// The last byte of the image is now acknowledged.
    Completed,
}

#[derive(Debug, Clone, Copy)]
struct Outstanding {
    len: u64,
    acked: bool,
}

pub struct TransferSession {
    slot: u32,
    /// Payload padded to the alignment boundary.
    data: Bytes,
    chunk_size: usize,
    window: usize,
    state: SessionState,
    bytes_acknowledged: u64,
    next_offset: u64,
    /// Issued chunks keyed by offset, lowest first.
    outstanding: BTreeMap<u64, Outstanding>,
    failure: Option<TransportError>,
}

impl TransferSession {
    /// Prepare a session for `image`. `transport_max` is the largest chunk
    /// the transport carries, used when the configuration leaves the
    /// chunk size at 0.
    pub fn new(
        image: &FirmwareImage,
        configuration: &UploadConfiguration,
        transport_max: usize,
    ) -> Result<Self, ConfigurationError> {
        let chunk_size = configuration.chunk_size(transport_max)?;
        let padded_len = configuration.byte_alignment.pad(image.len());

        let data = if padded_len == image.len() {
            image.payload.clone()
        } else {
            let mut buf = BytesMut::with_capacity(padded_len as usize);
            buf.extend_from_slice(&image.payload);
            buf.resize(padded_len as usize, 0);
            buf.freeze()
        };

        Ok(Self {
            slot: image.slot,
            data,
            chunk_size,
            window: configuration.window(),
            state: SessionState::Idle,
            bytes_acknowledged: 0,
            next_offset: 0,
            outstanding: BTreeMap::new(),
            failure: None,
        })
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Padded image length; the session completes when this many bytes are acknowledged.
    pub fn image_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn bytes_acknowledged(&self) -> u64 {
        self.bytes_acknowledged
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// The transport error that failed this session, if any.
    pub fn failure(&self) -> Option<&TransportError> {
        self.failure.as_ref()
    }

    /// Idle → Uploading. An empty image completes immediately.
    pub fn start(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.state = if self.data.is_empty() {
            SessionState::Completed
        } else {
            SessionState::Uploading
        };
        true
    }

    /// Next chunk in offset order, if the window has room.
    pub fn next_chunk(&mut self) -> Option<ChunkRequest> {
        if self.state != SessionState::Uploading
            || self.outstanding.len() >= self.window
            || self.next_offset >= self.image_size()
        {
            return None;
        }

        let offset = self.next_offset;
        let end = (offset + self.chunk_size as u64).min(self.image_size());
        self.outstanding.insert(
            offset,
            Outstanding {
                len: end - offset,
                acked: false,
            },
        );
        self.next_offset = end;

        Some(ChunkRequest {
            slot: self.slot,
            offset,
            data: self.data.slice(offset as usize..end as usize),
        })
    }

    /// Report that the chunk issued at `offset` was acknowledged.
    ///
    /// `bytes_acknowledged` only moves when the lowest outstanding chunk is
    /// acknowledged, then sweeps any already-acknowledged chunks behind it.
    pub fn acknowledge(&mut self, offset: u64) -> AckOutcome {
        if !self.state.is_active() {
            return AckOutcome::Ignored;
        }
        let Some(entry) = self.outstanding.get_mut(&offset) else {
            return AckOutcome::Ignored;
        };
        if entry.acked {
            return AckOutcome::Ignored;
        }
        entry.acked = true;

        if offset != self.bytes_acknowledged {
            return AckOutcome::Recorded;
        }

        while let Some(first) = self.outstanding.first_entry() {
            if !first.get().acked {
                break;
            }
            self.bytes_acknowledged += first.remove().len;
        }

        if self.bytes_acknowledged == self.image_size() {
            self.state = SessionState::Completed;
            AckOutcome::Completed
        } else {
            AckOutcome::Advanced {
                bytes_acknowledged: self.bytes_acknowledged,
            }
        }
    }

    /// Stop issuing new chunks. Chunks already issued may still be acknowledged.
    pub fn pause(&mut self) -> bool {
        if self.state != SessionState::Uploading {
            return false;
        }
        self.state = SessionState::Paused;
        true
    }

    /// Continue from the last acknowledged byte. Anything issued but not
    /// contiguously acknowledged is forgotten and will be issued again.
    pub fn resume(&mut self) -> bool {
        if self.state != SessionState::Paused {
            return false;
        }
        self.outstanding.clear();
        self.next_offset = self.bytes_acknowledged;
        self.state = SessionState::Uploading;
        true
    }

    /// Cancel from any non-terminal state. No-op once terminal.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.outstanding.clear();
        self.state = SessionState::Cancelled;
        true
    }

    /// Record a transport failure. Only an active session can fail.
    pub fn fail(&mut self, error: TransportError) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.outstanding.clear();
        self.failure = Some(error);
        self.state = SessionState::Failed;
        true
    }
}

impl fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferSession")
            .field("slot", &self.slot)
            .field("state", &self.state)
            .field("image_size", &self.image_size())
            .field("bytes_acknowledged", &self.bytes_acknowledged)
            .field("next_offset", &self.next_offset)
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}
