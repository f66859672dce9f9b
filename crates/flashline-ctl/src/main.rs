//! flashline-ctl: command-line front end for firmware uploads.
//!
//! Uploads run against the simulated device described by the `[device]`
//! section of the config file.

mod cmd;

use anyhow::{Context, Result};

use flashline_core::{ByteAlignment, FlashlineConfig, ImageSelection, UploadConfiguration};

/// Options shared by every command. Anything unset keeps the config value.
#[derive(Debug, Default)]
struct Options {
    depth: Option<u32>,
    buffers: Option<u32>,
    align: Option<u8>,
    chunk: Option<u64>,
    image: Option<usize>,
    sha256: Option<String>,
    suit: bool,
    json: bool,
}

impl Options {
    fn apply(&self, upload: &mut UploadConfiguration) -> Result<()> {
        if let Some(buffers) = self.buffers {
            upload.pipeline_depth = UploadConfiguration::from_buffer_count(buffers).pipeline_depth;
        }
        if let Some(depth) = self.depth {
            upload.pipeline_depth = depth;
        }
        if let Some(align) = self.align {
            upload.byte_alignment = ByteAlignment::try_from(align).map_err(anyhow::Error::msg)?;
        }
        if let Some(chunk) = self.chunk {
            upload.reassembly_buffer_size = chunk;
        }
        Ok(())
    }

    fn selection(&self) -> ImageSelection {
        self.image.map_or(ImageSelection::All, ImageSelection::Index)
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i)
        .map(String::as_str)
        .with_context(|| format!("{flag} requires a value"))
}

fn parse_args(args: &[String]) -> Result<(Options, Vec<&str>)> {
    let mut options = Options::default();
    let mut remaining = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--depth" => {
                i += 1;
                options.depth = Some(value(args, i, "--depth")?.parse().context("--depth must be a number")?);
            }
            "--buffers" => {
                i += 1;
                options.buffers = Some(value(args, i, "--buffers")?.parse().context("--buffers must be a number")?);
            }
            "--align" => {
                i += 1;
                options.align = Some(value(args, i, "--align")?.parse().context("--align must be 0, 2, 4, 8 or 16")?);
            }
            "--chunk" => {
                i += 1;
                options.chunk = Some(value(args, i, "--chunk")?.parse().context("--chunk must be a number")?);
            }
            "--image" => {
                i += 1;
                options.image = Some(value(args, i, "--image")?.parse().context("--image must be an index")?);
            }
            "--sha256" => {
                i += 1;
                options.sha256 = Some(value(args, i, "--sha256")?.to_string());
            }
            "--suit" => options.suit = true,
            "--json" => options.json = true,
            other => remaining.push(other),
        }
        i += 1;
    }
    Ok((options, remaining))
}

fn print_usage() {
    println!("Usage: flashline-ctl [options] <command>");
    println!();
    println!("Commands:");
    println!("  upload <image.bin>...      Upload images (slot = position) to the device");
    println!("  envelope <file>            Upload a SUIT envelope");
    println!("  plan <image.bin>...        Show which images would go to which slots");
    println!("  config                     Show the effective configuration");
    println!();
    println!("Options:");
    println!("  --depth <n>      Pipeline depth (chunks in flight beyond the first)");
    println!("  --buffers <n>    Number of buffers (depth = n - 1)");
    println!("  --align <n>      Byte alignment: 0, 2, 4, 8 or 16");
    println!("  --chunk <bytes>  Chunk size (0 = device MTU)");
    println!("  --image <n>      Upload only entry n of the plan");
    println!("  --sha256 <hex>   Envelope digest (default: computed from the file)");
    println!("  --suit           plan: assume a SUIT bootloader");
    println!("  --json           plan, config: print JSON");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = FlashlineConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = FlashlineConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FlashlineConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (options, remaining) = parse_args(&args)?;
    options.apply(&mut config.upload)?;

    match remaining.as_slice() {
        ["upload", files @ ..] if !files.is_empty() => {
            let package = cmd::artifact::load_package(files)?;
            cmd::upload::cmd_upload(&config, package.into(), options.selection()).await
        }
        ["envelope", file] => {
            let envelope = cmd::artifact::load_envelope(file, options.sha256.as_deref())?;
            cmd::upload::cmd_upload(&config, envelope.into(), options.selection()).await
        }
        ["plan", files @ ..] if !files.is_empty() => {
            let package = cmd::artifact::load_package(files)?;
            cmd::plan::cmd_plan(&package, options.suit, options.selection(), options.json)
        }
        ["config"] => cmd::config::cmd_config(&config, options.json),
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
