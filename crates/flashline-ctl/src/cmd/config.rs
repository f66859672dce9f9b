//! Config command: print the effective configuration.

use anyhow::Result;

use flashline_core::FlashlineConfig;

pub fn cmd_config(config: &FlashlineConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("# {}", FlashlineConfig::file_path().display());
    print!("{}", config.to_toml()?);
    Ok(())
}
