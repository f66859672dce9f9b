//! Simulated device: an in-memory `Transport` for dry runs and tests.
//!
//! Chunks are written into per-slot buffers after a fixed latency. A fault
//! can be armed at a given slot and offset; every chunk covering that offset
//! fails with the configured error.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;

use flashline_core::config::DeviceSettings;
use flashline_core::TransportError;

use crate::transport::{Ack, BootloaderResponse, Transport};

/// One chunk the device accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    pub slot: u32,
    pub offset: u64,
    pub len: usize,
}

#[derive(Debug, Clone)]
struct Fault {
    slot: u32,
    offset: u64,
    error: TransportError,
}

pub struct SimulatedDevice {
    mtu: usize,
    latency: Duration,
    bootloader: Result<BootloaderResponse, TransportError>,
    fault: Option<Fault>,
    images: Mutex<BTreeMap<u32, Vec<u8>>>,
    received: Mutex<Vec<ChunkRecord>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    aborts: AtomicUsize,
}

impl SimulatedDevice {
    /// A device reporting MCUboot, with no latency.
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            latency: Duration::ZERO,
            bootloader: Ok(BootloaderResponse {
                bootloader: Some("MCUboot".to_string()),
            }),
            fault: None,
            images: Mutex::new(BTreeMap::new()),
            received: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            aborts: AtomicUsize::new(0),
        }
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        let device = Self::new(settings.mtu).with_latency(Duration::from_millis(settings.latency_ms));
        if settings.bootloader.is_empty() {
            device.without_bootloader()
        } else {
            device.with_bootloader(&settings.bootloader)
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_bootloader(mut self, name: &str) -> Self {
        self.bootloader = Ok(BootloaderResponse {
            bootloader: Some(name.to_string()),
        });
        self
    }

    /// Answer the bootloader query without naming one.
    pub fn without_bootloader(mut self) -> Self {
        self.bootloader = Ok(BootloaderResponse::default());
        self
    }

    pub fn with_probe_error(mut self, error: TransportError) -> Self {
        self.bootloader = Err(error);
        self
    }

    /// Fail every chunk of `slot` that covers `offset`.
    pub fn with_fault(mut self, slot: u32, offset: u64, error: TransportError) -> Self {
        self.fault = Some(Fault { slot, offset, error });
        self
    }

    /// Bytes written to `slot` so far.
    pub async fn image(&self, slot: u32) -> Option<Vec<u8>> {
        self.images.lock().await.get(&slot).cloned()
    }

    pub async fn slots(&self) -> Vec<u32> {
        self.images.lock().await.keys().copied().collect()
    }

    /// Every accepted chunk, in arrival order.
    pub async fn received(&self) -> Vec<ChunkRecord> {
        self.received.lock().await.clone()
    }

    /// Most chunks that were ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    fn faulted(&self, slot: u32, offset: u64, len: usize) -> Option<TransportError> {
        let fault = self.fault.as_ref()?;
        let covers = fault.slot == slot && (offset..offset + len as u64).contains(&fault.offset);
        covers.then(|| fault.error.clone())
    }
}

/// Keeps the in-flight counter right when a send is dropped mid-flight.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Transport for SimulatedDevice {
    async fn send_chunk(&self, slot: u32, offset: u64, data: Bytes) -> Result<Ack, TransportError> {
        let _guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(error) = self.faulted(slot, offset, data.len()) {
            tracing::debug!(slot, offset, %error, "simulated fault");
            return Err(error);
        }

        let end = offset as usize + data.len();
        {
            let mut images = self.images.lock().await;
            let image = images.entry(slot).or_default();
            if image.len() < end {
                image.resize(end, 0);
            }
            image[offset as usize..end].copy_from_slice(&data);
        }
        self.received.lock().await.push(ChunkRecord {
            slot,
            offset,
            len: data.len(),
        });

        Ok(Ack { offset: end as u64 })
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("simulated device aborted");
    }

    async fn query_bootloader_info(&self) -> Result<BootloaderResponse, TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.bootloader.clone()
    }

    fn max_chunk_size(&self) -> usize {
        self.mtu
    }
}
