use std::sync::Arc;

use flashline_core::{Package, TransportError, UploadError};
use flashline_services::UploadEvent;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Pause, resume and cancel
// ══════════════════════════════════════════════════════════════════════════════

/// Pausing stops new sends. Resuming continues from the last acknowledged
/// byte, never from zero and never past what the device confirmed.
#[tokio::test]
async fn test_pause_resume_continues_from_acknowledged() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(0, 1000)]), configuration(1, 100)).await?;

    transport.wait_pending(2).await?;
    assert!(transport.ack(0));
    transport.wait_pending(2).await?;
    assert_eq!(transport.pending_offsets(), vec![100, 200]);

    handle.pause()?;
    settle().await;

    // an in-flight chunk lands while paused and still counts
    assert!(transport.ack(100));
    settle().await;
    assert_eq!(transport.sent_to(0), vec![0, 100, 200], "sent while paused");

    let progress: Vec<u64> = drain(&mut events)
        .iter()
        .filter_map(|e| match e {
            UploadEvent::ProgressChanged { bytes_sent, .. } => Some(*bytes_sent),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![100, 200]);

    handle.resume()?;
    transport.wait_pending(2).await?;
    assert_eq!(transport.pending_offsets(), vec![200, 300]);
    assert_eq!(transport.sent_to(0)[3], 200, "resume must restart at the acknowledged offset");

    let rest = transport.ack_until_terminal(&mut events).await?;
    assert_eq!(rest.last(), Some(&UploadEvent::DidFinish));
    assert_eq!(terminal_count(&rest), 1);
    Ok(())
}

/// Cancel produces exactly one DidCancel; the second cancel, and any late
/// completion from the transport, produce nothing.
#[tokio::test]
async fn test_cancel_is_idempotent() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(0, 1000)]), configuration(1, 100)).await?;

    let pending = transport.wait_pending(2).await?;
    handle.cancel()?;
    handle.cancel()?;

    let seen = until_terminal(&mut events).await?;
    assert_eq!(seen.last(), Some(&UploadEvent::DidCancel));
    assert_eq!(transport.aborts(), 1);

    // late completions have nowhere to go
    for offset in pending {
        assert!(!transport.ack(offset));
    }
    settle().await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(transport.sent().len(), 2);
    Ok(())
}

/// A paused upload can be cancelled.
#[tokio::test]
async fn test_cancel_while_paused() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(0, 500)]), configuration(0, 100)).await?;

    transport.wait_pending(1).await?;
    handle.pause()?;
    settle().await;
    handle.cancel()?;

    let seen = until_terminal(&mut events).await?;
    assert_eq!(terminal_count(&seen), 1);
    assert_eq!(seen.last(), Some(&UploadEvent::DidCancel));
    Ok(())
}

/// A chunk that fails while the upload is paused fails the run once, and
/// nothing further is sent.
#[tokio::test]
async fn test_failure_while_paused() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(0, 1000)]), configuration(1, 100)).await?;

    transport.wait_pending(2).await?;
    handle.pause()?;
    settle().await;

    let rejection = TransportError::Rejected { offset: 0, rc: 3 };
    assert!(transport.fail(0, rejection.clone()));

    let seen = until_terminal(&mut events).await?;
    assert_eq!(terminal_count(&seen), 1);
    assert_eq!(seen.last(), Some(&UploadEvent::DidFail(UploadError::Transport(rejection))));

    handle.resume()?;
    settle().await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(transport.sent_to(0), vec![0, 100]);
    assert!(transport.pending().is_empty());
    Ok(())
}

/// After a cancelled run the orchestrator accepts a new one.
#[tokio::test]
async fn test_restart_after_cancel() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));

    handle.start(Package::new(vec![image(0, 300)]), configuration(0, 100)).await?;
    transport.wait_pending(1).await?;
    handle.cancel()?;
    assert_eq!(until_terminal(&mut events).await?.last(), Some(&UploadEvent::DidCancel));

    handle.start(Package::new(vec![image(0, 300)]), configuration(0, 100)).await?;
    let second = transport.ack_until_terminal(&mut events).await?;
    assert_eq!(second.first(), Some(&UploadEvent::WillStart));
    assert_eq!(second.last(), Some(&UploadEvent::DidFinish));
    Ok(())
}

/// A second start while one is running is refused without disturbing it.
#[tokio::test]
async fn test_start_while_running_is_busy() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(0, 300)]), configuration(0, 100)).await?;
    transport.wait_pending(1).await?;

    let second = handle.start(Package::new(vec![image(3, 10)]), configuration(0, 100)).await;
    assert_eq!(second, Err(UploadError::Busy));

    let seen = transport.ack_until_terminal(&mut events).await?;
    assert_eq!(terminal_count(&seen), 1);
    assert_eq!(seen.last(), Some(&UploadEvent::DidFinish));
    assert!(transport.sent_to(3).is_empty());
    Ok(())
}
