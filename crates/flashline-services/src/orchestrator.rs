//! Upload orchestrator: sequences an image plan through transfer sessions.
//!
//! The orchestrator is a worker task. Callers hold a cloneable
//! `UploadHandle` for control and drain an `UploadEvent` channel. Every
//! accepted `start` produces `WillStart` followed by exactly one of
//! `DidFinish`, `DidCancel` or `DidFail`.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use flashline_core::plan::{self, ImageSelection};
use flashline_core::{
    Artifact, BootloaderKind, DisplayMetric, ThroughputTracker, TransferSession, UploadConfiguration,
    UploadError,
};

use crate::probe;
use crate::transfer::{self, SessionControl, SessionEvent, SessionOutcome};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    WillStart,
    /// Image `index` of `total` is about to be sent.
    ImageStarted { index: usize, total: usize, slot: u32 },
    ProgressChanged {
        bytes_sent: u64,
        image_size: u64,
        timestamp: Instant,
        metric: DisplayMetric,
    },
    DidFail(UploadError),
    DidCancel,
    DidFinish,
}

impl UploadEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadEvent::DidFail(_) | UploadEvent::DidCancel | UploadEvent::DidFinish
        )
    }
}

#[derive(Debug)]
enum Command {
    Start {
        artifact: Artifact,
        configuration: UploadConfiguration,
        selection: ImageSelection,
        reply: oneshot::Sender<Result<(), UploadError>>,
    },
    Pause,
    Resume,
    Cancel,
}

/// Control surface of an `UploadOrchestrator`.
#[derive(Clone)]
pub struct UploadHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl UploadHandle {
    /// Begin uploading every image of `artifact`. Resolves once the
    /// orchestrator has accepted the run; outcome arrives as events.
    pub async fn start(
        &self,
        artifact: impl Into<Artifact>,
        configuration: UploadConfiguration,
    ) -> Result<(), UploadError> {
        self.start_with(artifact, configuration, ImageSelection::All).await
    }

    pub async fn start_with(
        &self,
        artifact: impl Into<Artifact>,
        configuration: UploadConfiguration,
        selection: ImageSelection,
    ) -> Result<(), UploadError> {
        let (reply, accepted) = oneshot::channel();
        self.send(Command::Start {
            artifact: artifact.into(),
            configuration,
            selection,
            reply,
        })?;
        accepted.await.map_err(|_| UploadError::Closed)?
    }

    pub fn pause(&self) -> Result<(), UploadError> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<(), UploadError> {
        self.send(Command::Resume)
    }

    pub fn cancel(&self) -> Result<(), UploadError> {
        self.send(Command::Cancel)
    }

    fn send(&self, command: Command) -> Result<(), UploadError> {
        self.commands.send(command).map_err(|_| UploadError::Closed)
    }
}

/// Event channel that refuses anything after a terminal event until the
/// next run begins.
struct EventSink {
    tx: mpsc::UnboundedSender<UploadEvent>,
    terminated: bool,
}

impl EventSink {
    fn begin(&mut self) {
        self.terminated = false;
        self.emit(UploadEvent::WillStart);
    }

    fn emit(&mut self, event: UploadEvent) {
        if self.terminated {
            tracing::debug!(?event, "dropping event after terminal state");
            return;
        }
        self.terminated = event.is_terminal();
        // receiver gone just means nobody is listening
        let _ = self.tx.send(event);
    }
}

enum RunEnd {
    Finished,
    Cancelled,
}

pub struct UploadOrchestrator<T> {
    transport: Arc<T>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventSink,
    tracker: ThroughputTracker,
    span: tracing::Span,
    runs: u64,
}

impl<T: Transport> UploadOrchestrator<T> {
    pub fn new(transport: Arc<T>) -> (Self, UploadHandle, mpsc::UnboundedReceiver<UploadEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            transport,
            commands: command_rx,
            events: EventSink {
                tx: event_tx,
                terminated: false,
            },
            tracker: ThroughputTracker::new(),
            span: tracing::Span::current(),
            runs: 0,
        };
        (orchestrator, UploadHandle { commands: command_tx }, event_rx)
    }

    /// Parent span for every upload run's logs.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Serve commands until every `UploadHandle` is dropped.
    pub async fn run(mut self) -> anyhow::Result<()> {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Start {
                    artifact,
                    configuration,
                    selection,
                    reply,
                } => {
                    let _ = reply.send(Ok(()));
                    self.runs += 1;
                    let span = tracing::info_span!(parent: &self.span, "upload", run = self.runs);
                    self.upload(artifact, configuration, selection)
                        .instrument(span)
                        .await;
                }
                other => tracing::debug!(command = ?other, "no upload in progress, ignoring"),
            }
        }
        tracing::info!("all upload handles dropped, orchestrator exiting");
        Ok(())
    }

    async fn upload(&mut self, artifact: Artifact, configuration: UploadConfiguration, selection: ImageSelection) {
        self.events.begin();
        let event = match self.execute(&artifact, &configuration, selection).await {
            Ok(RunEnd::Finished) => {
                tracing::info!("upload finished");
                UploadEvent::DidFinish
            }
            Ok(RunEnd::Cancelled) => {
                tracing::info!("upload cancelled");
                UploadEvent::DidCancel
            }
            Err(e) => {
                tracing::error!(error = %e, "upload failed");
                UploadEvent::DidFail(e)
            }
        };
        self.events.emit(event);
    }

    async fn execute(
        &mut self,
        artifact: &Artifact,
        configuration: &UploadConfiguration,
        selection: ImageSelection,
    ) -> Result<RunEnd, UploadError> {
        let Some(bootloader) = self.probe().await else {
            return Ok(RunEnd::Cancelled);
        };

        let images = selection.apply(plan::resolve(artifact, bootloader)?)?;
        let total = images.len();
        tracing::info!(
            images = total,
            %bootloader,
            pipeline_depth = configuration.pipeline_depth,
            alignment = %configuration.byte_alignment,
            "upload plan ready"
        );

        for (index, image) in images.iter().enumerate() {
            let mut session = TransferSession::new(image, configuration, self.transport.max_chunk_size())?;
            self.events.emit(UploadEvent::ImageStarted {
                index,
                total,
                slot: image.slot,
            });
            tracing::info!(image = %image.name(), bytes = session.image_size(), "sending image {}/{}", index + 1, total);

            match self.drive(&mut session).await {
                SessionOutcome::Completed => tracing::info!(slot = image.slot, "image complete"),
                SessionOutcome::Cancelled => return Ok(RunEnd::Cancelled),
                SessionOutcome::Failed(e) => return Err(e.into()),
            }
        }
        Ok(RunEnd::Finished)
    }

    /// Probe the bootloader. `None` if the run was cancelled meanwhile.
    async fn probe(&mut self) -> Option<BootloaderKind> {
        let transport = Arc::clone(&self.transport);
        let query = probe::probe(&*transport);
        tokio::pin!(query);

        loop {
            tokio::select! {
                kind = &mut query => return Some(kind),
                command = self.commands.recv() => match command {
                    Some(Command::Cancel) | None => {
                        transport.abort();
                        return None;
                    }
                    Some(Command::Start { reply, .. }) => {
                        let _ = reply.send(Err(UploadError::Busy));
                    }
                    Some(other) => tracing::debug!(command = ?other, "ignored while probing"),
                },
            }
        }
    }

    /// Run one session, forwarding pause/resume/cancel to it.
    async fn drive(&mut self, session: &mut TransferSession) -> SessionOutcome {
        let Self {
            transport,
            commands,
            events,
            tracker,
            ..
        } = self;
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let mut commands_open = true;

        let run = transfer::run_session(session, &**transport, &mut control_rx, |event| match event {
            SessionEvent::Progress(sample) => {
                let metric = tracker.record(sample);
                events.emit(UploadEvent::ProgressChanged {
                    bytes_sent: sample.bytes_sent,
                    image_size: sample.image_size,
                    timestamp: sample.timestamp,
                    metric,
                });
            }
            SessionEvent::Started(sample) | SessionEvent::Resumed(sample) => tracker.anchor(sample),
            SessionEvent::Paused => {}
        });
        tokio::pin!(run);

        loop {
            tokio::select! {
                outcome = &mut run => return outcome,
                command = commands.recv(), if commands_open => {
                    let control = match command {
                        Some(Command::Pause) => SessionControl::Pause,
                        Some(Command::Resume) => SessionControl::Resume,
                        Some(Command::Cancel) => SessionControl::Cancel,
                        Some(Command::Start { reply, .. }) => {
                            let _ = reply.send(Err(UploadError::Busy));
                            continue;
                        }
                        None => {
                            tracing::warn!("upload handles dropped mid-transfer, cancelling");
                            commands_open = false;
                            SessionControl::Cancel
                        }
                    };
                    let _ = control_tx.send(control);
                }
            }
        }
    }
}
