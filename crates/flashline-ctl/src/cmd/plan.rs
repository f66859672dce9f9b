//! Plan command: show the resolved image plan without uploading.

use anyhow::Result;

use flashline_core::plan;
use flashline_core::{Artifact, BootloaderKind, ImageSelection, Package};

pub fn cmd_plan(package: &Package, suit: bool, selection: ImageSelection, json: bool) -> Result<()> {
    let bootloader = if suit { BootloaderKind::Suit } else { BootloaderKind::Legacy };
    let artifact = Artifact::from(package.clone());
    let images = selection.apply(plan::resolve(&artifact, bootloader)?)?;

    if json {
        let entries: Vec<_> = images
            .iter()
            .map(|image| {
                serde_json::json!({
                    "slot": image.slot,
                    "bytes": image.len(),
                    "sha256": hex::encode(image.content_hash),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Upload Plan ({} bootloader)", bootloader);
    println!("═══════════════════════════════════════");
    println!("{}", indent(&package.size_summary()));
    println!("{}", indent(&package.hash_summary()));
    println!();
    for (index, image) in images.iter().enumerate() {
        println!("  {}. {} : {} bytes", index + 1, image.name(), image.len());
    }
    Ok(())
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("  {}", l)).collect::<Vec<_>>().join("\n")
}
