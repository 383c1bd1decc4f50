//! Entry point for the patchfit tool.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Initialize logging via `tracing-subscriber`.
//! 3. Load and parse the JSON patch manifest.
//! 4. Fit every binary's patch sets against its image, then run the
//!    compaction passes: group, merge overlaps.
//! 5. Dump the output manifest.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use patchfit::config::Config;
use patchfit::manifest::Manifest;
use patchfit::pipeline::Pipeline;

fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let text = std::fs::read_to_string(&config.manifest)
        .with_context(|| format!("failed to read {}", config.manifest.display()))?;
    let manifest: Manifest =
        serde_json::from_str(&text).context("failed to parse patch manifest")?;

    let had_binaries = !manifest.binaries.is_empty();
    let pipeline = Pipeline::new(&config.image_dir);
    let output = pipeline.run(manifest);

    if had_binaries && output.binaries.is_empty() {
        anyhow::bail!("no binaries could be fitted");
    }

    let json = serde_json::to_string_pretty(&output).context("failed to encode output manifest")?;
    std::fs::write(&config.output, json)
        .with_context(|| format!("failed to write {}", config.output.display()))?;

    tracing::info!("wrote {}", config.output.display());
    Ok(())
}
