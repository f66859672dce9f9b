//! Reading image files into packages and envelopes.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use flashline_core::{ContentHash, DigestAlgorithm, Envelope, FirmwareImage, Package};

pub fn sha256(data: &[u8]) -> ContentHash {
    Sha256::digest(data).into()
}

/// One image per file; the slot is the file's position on the command line.
pub fn load_package(paths: &[&str]) -> Result<Package> {
    let images = paths
        .iter()
        .enumerate()
        .map(|(slot, path)| {
            let data = std::fs::read(path).with_context(|| format!("failed to read image: {}", path))?;
            let slot = u32::try_from(slot).context("too many images")?;
            Ok(FirmwareImage::new(slot, sha256(&data), data))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Package::new(images))
}

/// Envelope payload from `path`. Without `digest_hex` the SHA-256 of the
/// file is used.
pub fn load_envelope(path: &str, digest_hex: Option<&str>) -> Result<Envelope> {
    let data = std::fs::read(path).with_context(|| format!("failed to read envelope: {}", path))?;
    let digest = match digest_hex {
        Some(hex_digest) => hex::decode(hex_digest).context("--sha256 must be hex")?,
        None => sha256(&data).to_vec(),
    };
    Ok(Envelope::new(data).with_digest(DigestAlgorithm::Sha256, digest))
}
