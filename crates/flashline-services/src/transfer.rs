//! Transfer driver: runs one `TransferSession` against a transport.
//!
//! Chunk sends are issued as concurrent futures, up to the session's window,
//! and polled together with the control channel. Dropping the in-flight set
//! is how cancellation discards late completions.

use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;

use flashline_core::{
    AckOutcome, ChunkRequest, SessionState, ThroughputSample, TransferSession, TransportError,
};

use crate::transport::Transport;

/// Control messages accepted by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Pause,
    Resume,
    Cancel,
}

/// Non-terminal notifications from a running session.
///
/// `Started` and `Resumed` carry the sample a throughput window is anchored
/// at; `Progress` is sent whenever the acknowledged prefix grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    Started(ThroughputSample),
    Progress(ThroughputSample),
    Paused,
    Resumed(ThroughputSample),
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    Cancelled,
    Failed(TransportError),
}

impl SessionOutcome {
    fn of(session: &TransferSession) -> Option<Self> {
        match session.state() {
            SessionState::Completed => Some(SessionOutcome::Completed),
            SessionState::Cancelled => Some(SessionOutcome::Cancelled),
            SessionState::Failed => Some(SessionOutcome::Failed(
                session
                    .failure()
                    .cloned()
                    .unwrap_or_else(|| TransportError::Other("session failed".into())),
            )),
            SessionState::Idle | SessionState::Uploading | SessionState::Paused => None,
        }
    }
}

/// Drive `session` to a terminal state.
///
/// A session that is already terminal returns its outcome without touching
/// the transport. If `controls` closes while the session cannot make
/// progress on its own (paused, nothing in flight), the session is cancelled.
pub async fn run_session<T: Transport>(
    session: &mut TransferSession,
    transport: &T,
    controls: &mut mpsc::UnboundedReceiver<SessionControl>,
    mut on_event: impl FnMut(SessionEvent),
) -> SessionOutcome {
    if !session.start() {
        tracing::debug!(slot = session.slot(), state = %session.state(), "session was not idle");
    }
    if let Some(outcome) = SessionOutcome::of(session) {
        return outcome;
    }
    on_event(SessionEvent::Started(sample(session)));
    tracing::debug!(
        slot = session.slot(),
        bytes = session.image_size(),
        chunk_size = session.chunk_size(),
        window = session.window(),
        "session started"
    );

    let mut in_flight = FuturesUnordered::new();
    let mut controls_open = true;

    loop {
        if let Some(outcome) = SessionOutcome::of(session) {
            return outcome;
        }

        while let Some(ChunkRequest { slot, offset, data }) = session.next_chunk() {
            let end = offset + data.len() as u64;
            tracing::debug!(slot, offset, bytes = data.len(), "chunk issued");
            in_flight.push(async move { (offset, end, transport.send_chunk(slot, offset, data).await) });
        }

        tokio::select! {
            Some((offset, end, result)) = in_flight.next(), if !in_flight.is_empty() => {
                match result {
                    Ok(ack) => {
                        if ack.offset != end {
                            tracing::debug!(offset, expected = end, reported = ack.offset, "device offset differs from chunk end");
                        }
                        match session.acknowledge(offset) {
                            AckOutcome::Advanced { .. } | AckOutcome::Completed => {
                                on_event(SessionEvent::Progress(sample(session)));
                            }
                            AckOutcome::Recorded => {}
                            AckOutcome::Ignored => {
                                tracing::warn!(slot = session.slot(), offset, "ignored acknowledgement");
                            }
                        }
                    }
                    Err(error) => {
                        tracing::error!(slot = session.slot(), offset, %error, "chunk failed");
                        session.fail(error.clone());
                        return SessionOutcome::Failed(error);
                    }
                }
            }

            control = controls.recv(), if controls_open => match control {
                Some(SessionControl::Pause) => {
                    if session.pause() {
                        tracing::info!(slot = session.slot(), acknowledged = session.bytes_acknowledged(), "upload paused");
                        on_event(SessionEvent::Paused);
                    }
                }
                Some(SessionControl::Resume) => {
                    if session.resume() {
                        // chunks not yet acknowledged are issued again from the resume point
                        in_flight.clear();
                        tracing::info!(slot = session.slot(), offset = session.bytes_acknowledged(), "upload resumed");
                        on_event(SessionEvent::Resumed(sample(session)));
                    }
                }
                Some(SessionControl::Cancel) => return cancel(session, transport),
                None => controls_open = false,
            },

            else => return cancel(session, transport),
        }
    }
}

fn sample(session: &TransferSession) -> ThroughputSample {
    ThroughputSample {
        bytes_sent: session.bytes_acknowledged(),
        image_size: session.image_size(),
        timestamp: Instant::now(),
    }
}

fn cancel<T: Transport>(session: &mut TransferSession, transport: &T) -> SessionOutcome {
    if session.cancel() {
        transport.abort();
        tracing::info!(slot = session.slot(), acknowledged = session.bytes_acknowledged(), "upload cancelled");
    }
    SessionOutcome::Cancelled
}
