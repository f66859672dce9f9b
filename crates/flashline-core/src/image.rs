//! Firmware artifacts: images, multi-image packages and SUIT envelopes.
//!
//! These are the already-parsed structures handed over by the artifact
//! parser. Nothing in here reads files or verifies signatures.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

/// SHA-256 digest identifying an image on the device.
pub type ContentHash = [u8; 32];

/// One image destined for one slot (partition) on the device.
///
/// Identity is `(slot, content_hash)`; the payload is not compared.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub slot: u32,
    pub content_hash: ContentHash,
    pub payload: Bytes,
}

impl FirmwareImage {
    pub fn new(slot: u32, content_hash: ContentHash, payload: impl Into<Bytes>) -> Self {
        Self {
            slot,
            content_hash,
            payload: payload.into(),
        }
    }

    /// Same hash and payload, different slot. The payload buffer is shared.
    pub fn with_slot(&self, slot: u32) -> Self {
        Self {
            slot,
            content_hash: self.content_hash,
            payload: self.payload.clone(),
        }
    }

    pub fn len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Short label for logs and CLI output.
    pub fn name(&self) -> String {
        format!("image {} ({})", self.slot, short_hash(&self.content_hash))
    }
}

impl PartialEq for FirmwareImage {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.content_hash == other.content_hash
    }
}

impl Eq for FirmwareImage {}

impl Hash for FirmwareImage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.content_hash.hash(state);
    }
}

/// Ordered images parsed from a multi-image container.
///
/// Slot numbers need not be contiguous.
#[derive(Debug, Clone, Default)]
pub struct Package {
    images: Vec<FirmwareImage>,
}

impl Package {
    pub fn new(images: Vec<FirmwareImage>) -> Self {
        Self { images }
    }

    pub fn images(&self) -> &[FirmwareImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// One line per image: `image <slot>: <n> bytes`.
    pub fn size_summary(&self) -> String {
        self.images
            .iter()
            .map(|i| format!("image {}: {} bytes", i.slot, i.len()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One line per image: `image <slot>: <hex sha256>`.
    pub fn hash_summary(&self) -> String {
        self.images
            .iter()
            .map(|i| format!("image {}: {}", i.slot, hex::encode(i.content_hash)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Digest algorithms a SUIT envelope may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Shake128,
    Sha384,
    Sha512,
    Shake256,
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Shake128 => "shake128",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
            DigestAlgorithm::Shake256 => "shake256",
        };
        f.write_str(name)
    }
}

/// A signed SUIT envelope: one opaque payload plus its declared digests.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub payload: Bytes,
    digests: BTreeMap<DigestAlgorithm, Vec<u8>>,
}

impl Envelope {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            digests: BTreeMap::new(),
        }
    }

    pub fn with_digest(mut self, algorithm: DigestAlgorithm, digest: impl Into<Vec<u8>>) -> Self {
        self.digests.insert(algorithm, digest.into());
        self
    }

    pub fn digest(&self, algorithm: DigestAlgorithm) -> Option<&[u8]> {
        self.digests.get(&algorithm).map(Vec::as_slice)
    }

    pub fn algorithms(&self) -> Vec<DigestAlgorithm> {
        self.digests.keys().copied().collect()
    }
}

/// What the operator selected for upload.
#[derive(Debug, Clone)]
pub enum Artifact {
    Package(Package),
    Envelope(Envelope),
}

impl From<Package> for Artifact {
    fn from(package: Package) -> Self {
        Artifact::Package(package)
    }
}

impl From<Envelope> for Artifact {
    fn from(envelope: Envelope) -> Self {
        Artifact::Envelope(envelope)
    }
}

/// The device's update agent, as reported by the bootloader info query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootloaderKind {
    /// MCUboot-style: per-slot image targeting.
    Legacy,
    /// SUIT: no per-slot addressing.
    Suit,
    /// Query failed or answer unrecognised. Planned like `Legacy`.
    Unknown,
}

impl BootloaderKind {
    /// Map the bootloader name reported by the device.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "mcuboot" => BootloaderKind::Legacy,
            "suit" => BootloaderKind::Suit,
            _ => BootloaderKind::Unknown,
        }
    }
}

impl fmt::Display for BootloaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootloaderKind::Legacy => f.write_str("mcuboot"),
            BootloaderKind::Suit => f.write_str("suit"),
            BootloaderKind::Unknown => f.write_str("unknown"),
        }
    }
}

fn short_hash(hash: &ContentHash) -> String {
    hex::encode(&hash[..4])
}
