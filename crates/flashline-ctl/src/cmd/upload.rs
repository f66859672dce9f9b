//! Upload command: drives the orchestrator against the simulated device.

use std::sync::Arc;

use anyhow::{Context, Result};

use flashline_core::{Artifact, DisplayMetric, FlashlineConfig, ImageSelection};
use flashline_services::{SimulatedDevice, UploadEvent, UploadOrchestrator};

/// Progress is printed each time another quarter of the image is acknowledged.
const PROGRESS_STEPS: u64 = 4;

pub async fn cmd_upload(config: &FlashlineConfig, artifact: Artifact, selection: ImageSelection) -> Result<()> {
    let device = Arc::new(SimulatedDevice::from_settings(&config.device));
    let (orchestrator, handle, mut events) = UploadOrchestrator::new(device);
    let worker = tokio::spawn(orchestrator.run());

    let interrupt = handle.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received, cancelling upload");
        let _ = interrupt.cancel();
    });

    handle
        .start_with(artifact, config.upload, selection)
        .await
        .context("failed to start upload")?;

    let upload = &config.upload;
    let mut printed_step = 0;
    let result = loop {
        let Some(event) = events.recv().await else {
            break Err(anyhow::anyhow!("orchestrator stopped without reporting an outcome"));
        };
        match event {
            UploadEvent::WillStart => {
                println!("═══════════════════════════════════════");
                println!("  Firmware Upload");
                println!("═══════════════════════════════════════");
                println!("  Buffers   : {} (pipeline depth {})", upload.buffer_count(), upload.pipeline_depth);
                println!("  Alignment : {}", upload.byte_alignment);
                println!("  Device    : {} (mtu {})", config.device.bootloader, config.device.mtu);
            }
            UploadEvent::ImageStarted { index, total, slot } => {
                printed_step = 0;
                println!("\n  ┌─ image {}/{} → slot {}", index + 1, total, slot);
            }
            UploadEvent::ProgressChanged {
                bytes_sent,
                image_size,
                metric,
                ..
            } => match metric {
                DisplayMetric::Average { .. } => println!("  └─ {}", metric),
                DisplayMetric::Instantaneous { .. } => {
                    let step = bytes_sent * PROGRESS_STEPS / image_size.max(1);
                    if step > printed_step {
                        printed_step = step;
                        println!("  │  {:>8} / {} bytes  {}", bytes_sent, image_size, metric);
                    }
                }
            },
            UploadEvent::DidFinish => {
                println!("\n  ✓ Upload complete.");
                break Ok(());
            }
            UploadEvent::DidCancel => {
                println!("\n  ✗ Upload cancelled.");
                break Ok(());
            }
            UploadEvent::DidFail(e) => break Err(anyhow::Error::new(e).context("upload failed")),
        }
    };

    drop(handle);
    worker.abort();
    result
}
