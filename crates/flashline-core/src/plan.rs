//! Image plan resolution: which images go to which slots.
//!
//! Pure and deterministic: the same artifact and bootloader kind always
//! yield the same ordered plan.

use std::ops::RangeInclusive;

use crate::error::PlanError;
use crate::image::{Artifact, BootloaderKind, ContentHash, DigestAlgorithm, Envelope, FirmwareImage, Package};

/// Slots that receive the single candidate image of a SUIT package.
pub const SUIT_REPLICATED_SLOTS: RangeInclusive<u32> = 0..=3;

/// Turn an artifact into the ordered list of images to upload.
pub fn resolve(artifact: &Artifact, bootloader: BootloaderKind) -> Result<Vec<FirmwareImage>, PlanError> {
    let plan = match artifact {
        Artifact::Envelope(envelope) => vec![envelope_image(envelope)?],
        Artifact::Package(package) => package_images(package, bootloader),
    };
    if plan.is_empty() {
        return Err(PlanError::EmptyPlan);
    }
    tracing::debug!(%bootloader, images = plan.len(), "image plan resolved");
    Ok(plan)
}

fn envelope_image(envelope: &Envelope) -> Result<FirmwareImage, PlanError> {
    // SHA-256 is the only digest the device side implements; the others
    // are optional in SUIT.
    let digest = envelope
        .digest(DigestAlgorithm::Sha256)
        .ok_or_else(|| PlanError::UnsupportedDigestAlgorithm {
            available: envelope.algorithms(),
        })?;
    let hash: ContentHash = digest.try_into().map_err(|_| PlanError::MalformedDigest {
        algorithm: DigestAlgorithm::Sha256,
        len: digest.len(),
    })?;
    Ok(FirmwareImage::new(0, hash, envelope.payload.clone()))
}

fn package_images(package: &Package, bootloader: BootloaderKind) -> Vec<FirmwareImage> {
    match (bootloader, package.images()) {
        // SUIT exposes no per-slot targeting: every partition gets the same
        // candidate and the device picks internally.
        (BootloaderKind::Suit, [single]) => SUIT_REPLICATED_SLOTS.map(|slot| single.with_slot(slot)).collect(),
        (_, images) => images.to_vec(),
    }
}

/// Which part of the resolved plan to upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageSelection {
    #[default]
    All,
    /// One entry of the resolved plan, by position.
    Index(usize),
}

impl ImageSelection {
    pub fn apply(self, mut plan: Vec<FirmwareImage>) -> Result<Vec<FirmwareImage>, PlanError> {
        match self {
            ImageSelection::All => Ok(plan),
            ImageSelection::Index(index) if index < plan.len() => Ok(vec![plan.swap_remove(index)]),
            ImageSelection::Index(index) => Err(PlanError::SelectionOutOfRange {
                index,
                len: plan.len(),
            }),
        }
    }
}
