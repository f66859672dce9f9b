//! Throughput estimation from progress samples.
//!
//! Bytes per millisecond is numerically kilobytes per second, so no unit
//! conversion happens anywhere in here.

use std::fmt;
use std::time::Instant;

/// One progress report from a transfer session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSample {
    pub bytes_sent: u64,
    pub image_size: u64,
    pub timestamp: Instant,
}

/// What to show for the latest sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DisplayMetric {
    /// Rate since the window anchor, while the image is still in progress.
    Instantaneous { kilobytes_per_second: f64 },
    /// Rate over the whole image, reported on its final sample.
    Average { image_size: u64, kilobytes_per_second: f64 },
}

impl DisplayMetric {
    pub fn kilobytes_per_second(&self) -> f64 {
        match *self {
            DisplayMetric::Instantaneous { kilobytes_per_second }
            | DisplayMetric::Average { kilobytes_per_second, .. } => kilobytes_per_second,
        }
    }
}

impl fmt::Display for DisplayMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DisplayMetric::Instantaneous { kilobytes_per_second } => {
                write!(f, "{kilobytes_per_second:.2} kB/s")
            }
            DisplayMetric::Average { image_size, kilobytes_per_second } => {
                write!(f, "{image_size} bytes sent (avg {kilobytes_per_second:.2} kB/s)")
            }
        }
    }
}

/// Tracks the window anchor for one image at a time.
#[derive(Debug, Default)]
pub struct ThroughputTracker {
    image_size: Option<u64>,
    anchor_bytes: u64,
    anchor_at: Option<Instant>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new window at `sample`: the start of an image or a resume.
    pub fn anchor(&mut self, sample: ThroughputSample) {
        self.image_size = Some(sample.image_size);
        self.anchor_bytes = sample.bytes_sent;
        self.anchor_at = Some(sample.timestamp);
    }

    pub fn record(&mut self, sample: ThroughputSample) -> DisplayMetric {
        self.update(sample.bytes_sent, sample.image_size, sample.timestamp)
    }

    pub fn update(&mut self, bytes_sent: u64, image_size: u64, timestamp: Instant) -> DisplayMetric {
        let anchor_at = match self.anchor_at {
            Some(at) if self.image_size == Some(image_size) => at,
            _ => {
                self.image_size = Some(image_size);
                self.anchor_bytes = bytes_sent;
                self.anchor_at = Some(timestamp);
                timestamp
            }
        };

        let elapsed_ms = (timestamp.saturating_duration_since(anchor_at).as_secs_f64() * 1000.0).max(1.0);

        if bytes_sent >= image_size {
            let sent = image_size.saturating_sub(self.anchor_bytes);
            return DisplayMetric::Average {
                image_size,
                kilobytes_per_second: sent as f64 / elapsed_ms,
            };
        }

        let sent = bytes_sent.saturating_sub(self.anchor_bytes);
        DisplayMetric::Instantaneous {
            kilobytes_per_second: sent as f64 / elapsed_ms,
        }
    }
}
