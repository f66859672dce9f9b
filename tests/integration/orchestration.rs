use std::sync::Arc;

use flashline_core::{
    DigestAlgorithm, Envelope, ImageSelection, Package, PlanError, TransportError, UploadError,
};
use flashline_services::{BootloaderResponse, SimulatedDevice, UploadEvent};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Multi-image orchestration
// ══════════════════════════════════════════════════════════════════════════════

/// Image 1 completes, image 2 starts, image 2 fails mid-transfer: one
/// DidFail, no retry of image 2, nothing more sent to image 1.
#[tokio::test]
async fn test_second_image_failure_ends_run_once() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    let package = Package::new(vec![image(0, 200), image(1, 300)]);
    handle.start(package, configuration(0, 100)).await?;

    // image 1
    for offset in [0, 100] {
        transport.wait_pending(1).await?;
        assert!(transport.ack(offset));
    }

    // image 2: first chunk lands, second is rejected
    wait_for(|| (transport.pending() == vec![(1, 0)]).then_some(())).await?;
    assert!(transport.ack(0));
    wait_for(|| (transport.pending() == vec![(1, 100)]).then_some(())).await?;
    let rejection = TransportError::Rejected { offset: 100, rc: 6 };
    assert!(transport.fail(100, rejection.clone()));

    let seen = until_terminal(&mut events).await?;
    assert_eq!(terminal_count(&seen), 1);
    assert_eq!(seen.last(), Some(&UploadEvent::DidFail(UploadError::Transport(rejection))));

    settle().await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(transport.sent_to(0), vec![0, 100]);
    assert_eq!(transport.sent_to(1), vec![0, 100]);
    assert!(transport.pending().is_empty());
    Ok(())
}

/// Images run strictly one after the other.
#[tokio::test]
async fn test_images_run_sequentially() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    let package = Package::new(vec![image(4, 300), image(2, 300)]);
    handle.start(package, configuration(3, 100)).await?;

    transport.wait_pending(3).await?;
    settle().await;
    assert!(transport.pending().iter().all(|(slot, _)| *slot == 4));

    let seen = transport.ack_until_terminal(&mut events).await?;
    let order: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            UploadEvent::ImageStarted { index, total, slot } => Some((*index, *total, *slot)),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec![(0, 2, 4), (1, 2, 2)]);

    let sent = transport.sent();
    let first_of_second = sent.iter().position(|(slot, _)| *slot == 2).context("slot 2 never sent")?;
    assert!(sent[first_of_second..].iter().all(|(slot, _)| *slot == 2));
    Ok(())
}

/// A plan error is reported before any chunk is sent.
#[tokio::test]
async fn test_envelope_without_sha256_fails_immediately() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    let envelope = Envelope::new(vec![0u8; 64]).with_digest(DigestAlgorithm::Sha512, vec![1u8; 64]);
    handle.start(envelope, configuration(1, 0)).await?;

    let seen = until_terminal(&mut events).await?;
    assert_eq!(
        seen,
        vec![
            UploadEvent::WillStart,
            UploadEvent::DidFail(UploadError::Plan(PlanError::UnsupportedDigestAlgorithm {
                available: vec![DigestAlgorithm::Sha512],
            })),
        ]
    );
    assert!(transport.sent().is_empty());
    Ok(())
}

/// An envelope with a SHA-256 digest goes to slot 0.
#[tokio::test]
async fn test_envelope_uploads_to_slot_zero() -> Result<()> {
    setup_test_logging();
    let device = Arc::new(SimulatedDevice::new(128).with_bootloader("SUIT"));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&device));
    let envelope = Envelope::new(vec![0x42u8; 300]).with_digest(DigestAlgorithm::Sha256, vec![9u8; 32]);
    handle.start(envelope, configuration(1, 0)).await?;

    assert_eq!(until_terminal(&mut events).await?.last(), Some(&UploadEvent::DidFinish));
    assert_eq!(device.slots().await, vec![0]);
    assert_eq!(device.image(0).await, Some(vec![0x42u8; 300]));
    Ok(())
}

/// A SUIT device receives a single-image package in all four slots.
#[tokio::test]
async fn test_suit_single_image_replicated() -> Result<()> {
    setup_test_logging();
    let device = Arc::new(SimulatedDevice::new(128).with_bootloader("suit"));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&device));
    let img = image(0, 200);
    handle.start(Package::new(vec![img.clone()]), configuration(1, 0)).await?;

    let seen = until_terminal(&mut events).await?;
    let slots: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            UploadEvent::ImageStarted { slot, .. } => Some(*slot),
            _ => None,
        })
        .collect();
    assert_eq!(slots, vec![0, 1, 2, 3]);
    for slot in 0..4 {
        assert_eq!(device.image(slot).await.as_deref(), Some(&img.payload[..]));
    }
    Ok(())
}

/// When the bootloader query fails the plan is the legacy one.
#[tokio::test]
async fn test_probe_failure_falls_back_to_legacy_plan() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512).with_bootloader(Err(TransportError::Timeout)));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(5, 100)]), configuration(0, 0)).await?;

    let seen = transport.ack_until_terminal(&mut events).await?;
    assert_eq!(seen.last(), Some(&UploadEvent::DidFinish));
    assert_eq!(transport.sent(), vec![(5, 0)]);
    Ok(())
}

/// An empty bootloader answer is treated the same way.
#[tokio::test]
async fn test_absent_bootloader_answer_falls_back() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512).with_bootloader(Ok(BootloaderResponse::default())));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(0, 100)]), configuration(0, 0)).await?;

    transport.ack_until_terminal(&mut events).await?;
    assert_eq!(transport.sent(), vec![(0, 0)]);
    Ok(())
}

/// Selecting one entry uploads only that entry.
#[tokio::test]
async fn test_selection_uploads_one_image() -> Result<()> {
    setup_test_logging();
    let device = Arc::new(SimulatedDevice::new(128));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&device));
    let package = Package::new(vec![image(0, 50), image(1, 60), image(2, 70)]);
    handle
        .start_with(package.clone(), configuration(1, 0), ImageSelection::Index(1))
        .await?;
    assert_eq!(until_terminal(&mut events).await?.last(), Some(&UploadEvent::DidFinish));
    assert_eq!(device.slots().await, vec![1]);

    handle
        .start_with(package, configuration(1, 0), ImageSelection::Index(3))
        .await?;
    assert_eq!(
        until_terminal(&mut events).await?.last(),
        Some(&UploadEvent::DidFail(UploadError::Plan(PlanError::SelectionOutOfRange { index: 3, len: 3 })))
    );
    Ok(())
}
