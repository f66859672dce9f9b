use std::sync::Arc;

use flashline_core::{DisplayMetric, Package};
use flashline_services::{SimulatedDevice, UploadEvent};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Pipelined transfer
// ══════════════════════════════════════════════════════════════════════════════

/// For every depth, never more than depth + 1 chunks are pending at the
/// transport, even after the orchestrator has had time to issue more.
#[tokio::test]
async fn test_window_never_exceeds_depth_plus_one() -> Result<()> {
    setup_test_logging();

    for depth in 0..=3u32 {
        let transport = Arc::new(ScriptedTransport::new(512));
        let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
        handle
            .start(Package::new(vec![image(0, 1000)]), configuration(depth, 100))
            .await?;

        for _ in 0..10 {
            let pending = transport.wait_pending(1).await?;
            settle().await;
            let pending_now = transport.pending_offsets();
            assert!(
                pending_now.len() <= depth as usize + 1,
                "depth {depth}: {} chunks pending",
                pending_now.len()
            );
            assert!(transport.ack(pending[0]));
        }

        let events = until_terminal(&mut events).await?;
        assert_eq!(events.last(), Some(&UploadEvent::DidFinish), "depth {depth}");
        assert_eq!(transport.sent().len(), 10);
    }
    Ok(())
}

/// The window fills to exactly depth + 1 when the image is large enough.
#[tokio::test]
async fn test_window_fills_to_capacity() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(0, 1000)]), configuration(3, 100)).await?;

    transport.wait_pending(4).await?;
    settle().await;
    assert_eq!(transport.pending_offsets(), vec![0, 100, 200, 300]);

    transport.ack_until_terminal(&mut events).await?;
    Ok(())
}

/// Acknowledgements out of order are held until the lowest chunk lands.
#[tokio::test]
async fn test_out_of_order_acks_advance_only_contiguous_prefix() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(512));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(0, 300)]), configuration(2, 100)).await?;

    transport.wait_pending(3).await?;
    assert!(transport.ack(200));
    assert!(transport.ack(100));
    settle().await;

    let before = drain(&mut events);
    assert!(
        !before.iter().any(|e| matches!(e, UploadEvent::ProgressChanged { .. })),
        "progress reported before the lowest chunk was acknowledged: {before:?}"
    );

    assert!(transport.ack(0));
    let after = until_terminal(&mut events).await?;
    let progress: Vec<u64> = after
        .iter()
        .filter_map(|e| match e {
            UploadEvent::ProgressChanged { bytes_sent, .. } => Some(*bytes_sent),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![300]);
    assert_eq!(after.last(), Some(&UploadEvent::DidFinish));
    Ok(())
}

/// Chunks are issued in strictly increasing offset order.
#[tokio::test]
async fn test_chunks_issued_in_offset_order() -> Result<()> {
    setup_test_logging();
    let transport = Arc::new(ScriptedTransport::new(64));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&transport));
    handle.start(Package::new(vec![image(0, 1000)]), configuration(4, 0)).await?;

    transport.ack_until_terminal(&mut events).await?;

    let offsets = transport.sent_to(0);
    assert_eq!(offsets.len(), 16);
    assert!(offsets.windows(2).all(|w| w[0] + 64 == w[1]), "{offsets:?}");
    Ok(())
}

/// Payload arrives intact and padded, and the final progress sample of each
/// image carries the whole-image average.
#[tokio::test]
async fn test_simulated_device_receives_padded_images() -> Result<()> {
    setup_test_logging();
    let device = Arc::new(SimulatedDevice::new(100).with_latency(std::time::Duration::from_millis(1)));
    let (handle, mut events) = spawn_orchestrator(Arc::clone(&device));

    let mut upload = configuration(2, 0);
    upload.byte_alignment = flashline_core::ByteAlignment::Sixteen;
    let images = vec![image(0, 250), image(1, 37)];
    handle.start(Package::new(images.clone()), upload).await?;

    let events = until_terminal(&mut events).await?;
    assert_eq!(events.last(), Some(&UploadEvent::DidFinish));

    for img in &images {
        let received = device.image(img.slot).await.context("slot never written")?;
        let padded = img.payload.len().div_ceil(16) * 16;
        assert_eq!(received.len(), padded);
        assert_eq!(&received[..img.payload.len()], &img.payload[..]);
        assert!(received[img.payload.len()..].iter().all(|b| *b == 0));
    }

    let finals: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::ProgressChanged {
                metric: DisplayMetric::Average { image_size, .. },
                ..
            } => Some(*image_size),
            _ => None,
        })
        .collect();
    assert_eq!(finals, vec![256, 48]);
    assert!(device.peak_in_flight() <= 3);
    Ok(())
}
