//! Pipeline orchestration.
//!
//! This module contains the `Pipeline` struct which drives the whole
//! transform, in order:
//! 1. Fitting: each binary's patch sets are validated against its real
//!    image, one binary at a time.
//! 2. Compaction: the group and overlap-merge passes run across the whole
//!    manifest, strictly after all fitting completes.
//!
//! Fitting failures are binary-scoped: the offending binary is dropped
//! from the output and the remaining binaries are still processed.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::fitter;
use crate::image::Image;
use crate::manifest::{Manifest, PatchSet};
use crate::optimize;

/// Conventional display name for the default binary (empty identifier).
pub const DEFAULT_BINARY_NAME: &str = "eboot.bin";

/// Resolves the image file name a patch set reads from.
///
/// Patch sets of the default binary name their own image; sets of a named
/// binary all read `<name>.elf`.
fn image_name(bin: &str, set: &PatchSet) -> String {
    if bin.is_empty() {
        set.name.clone()
    } else {
        format!("{}.elf", bin)
    }
}

/// Per-binary image cache.
///
/// Images are mapped on first reference and held for the duration of one
/// binary's fitting; dropping the cache unmaps them on every exit path.
struct ImageCache<'a> {
    dir: &'a Path,
    maps: HashMap<String, Mmap>,
}

impl<'a> ImageCache<'a> {
    fn new(dir: &'a Path) -> Self {
        Self {
            dir,
            maps: HashMap::new(),
        }
    }

    fn open(&mut self, name: &str) -> Result<&Mmap> {
        if !self.maps.contains_key(name) {
            let path = self.dir.join(name);
            let unreadable = |e: std::io::Error| Error::ImageUnreadable {
                name: name.to_string(),
                reason: e.to_string(),
            };
            let file = File::open(&path).map_err(unreadable)?;
            let mmap = unsafe { Mmap::map(&file) }.map_err(unreadable)?;
            self.maps.insert(name.to_string(), mmap);
        }
        Ok(&self.maps[name])
    }
}

pub struct Pipeline {
    /// Directory that image file names are resolved against.
    image_dir: PathBuf,
}

impl Pipeline {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
        }
    }

    /// Fits every binary's patch sets, then compacts the manifest.
    pub fn run(&self, manifest: Manifest) -> Manifest {
        let fitted = self.fit_all(manifest);
        optimize::optimize(fitted)
    }

    fn fit_all(&self, manifest: Manifest) -> Manifest {
        let mut binaries = Vec::new();
        for (bin, mut sets) in manifest.binaries {
            let display_name = if bin.is_empty() {
                DEFAULT_BINARY_NAME
            } else {
                bin.as_str()
            };
            tracing::info!("fitting {}", display_name);
            match self.fit_binary(&bin, &mut sets) {
                Ok(()) => binaries.push((bin, sets)),
                Err(err) => tracing::error!("skipping binary '{}': {}", display_name, err),
            }
        }
        Manifest { binaries }
    }

    fn fit_binary(&self, bin: &str, sets: &mut [PatchSet]) -> Result<()> {
        let mut cache = ImageCache::new(&self.image_dir);
        for set in sets.iter_mut() {
            let name = image_name(bin, set);
            tracing::debug!("elf: {}", name);
            let mmap = cache.open(&name)?;
            let image = Image::parse(&name, &**mmap)?;
            fitter::fit(&image, set)?;
        }
        Ok(())
    }
}
