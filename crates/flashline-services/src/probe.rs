//! Bootloader capability probe.

use flashline_core::BootloaderKind;

use crate::transport::Transport;

/// Ask the device which bootloader it runs. Never fails: any error or a
/// missing answer yields `BootloaderKind::Unknown`, which plans like legacy.
pub async fn probe<T: Transport>(transport: &T) -> BootloaderKind {
    match transport.query_bootloader_info().await {
        Ok(response) => match response.bootloader.as_deref() {
            Some(name) => {
                let kind = BootloaderKind::from_name(name);
                if kind == BootloaderKind::Unknown {
                    tracing::warn!(name, "unrecognised bootloader, assuming mcuboot");
                } else {
                    tracing::info!(%kind, "bootloader detected");
                }
                kind
            }
            None => {
                tracing::warn!("device reported no bootloader, assuming mcuboot");
                BootloaderKind::Unknown
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "bootloader query failed, assuming mcuboot");
            BootloaderKind::Unknown
        }
    }
}
