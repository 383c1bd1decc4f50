//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the patch
//! fitter using `clap`. It handles parsing arguments like the manifest
//! path and the output file path.

use clap::Parser;
use std::path::PathBuf;

/// Fits and compacts binary patch manifests against ELF images.
///
/// Reads a JSON patch manifest, validates each patch against the real
/// segment layout of its target image, merges duplicate segment targets
/// and overlapping byte ranges, and writes the minimized manifest.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Input patch manifest (JSON)
    pub manifest: PathBuf,

    /// Output file
    #[arg(short, long, default_value = "out.json", help = "Path to the output manifest")]
    pub output: PathBuf,

    /// Image directory
    #[arg(long, default_value = ".", help = "Directory image files are resolved against")]
    pub image_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}
