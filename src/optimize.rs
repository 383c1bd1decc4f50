//! Manifest compaction passes.
//!
//! Each pass is a pure transform `Manifest -> Manifest`; the pipeline
//! composes them by ordered application. Grouping must run before overlap
//! merging so the sweep sees the full combined patch list per segment.
//! Both passes assume well-formed post-fitting input and do not re-validate.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::manifest::{Manifest, Patch, PatchSet};

/// The compaction passes, in their required order of application.
pub const PASSES: &[(&str, fn(Manifest) -> Manifest)] =
    &[("group", group), ("merge-overlaps", merge_overlaps)];

/// Runs all compaction passes over the manifest.
pub fn optimize(mut manifest: Manifest) -> Manifest {
    for (name, pass) in PASSES {
        tracing::debug!("running {} pass", name);
        manifest = pass(manifest);
    }
    manifest
}

/// Merges patch sets that target the same (name, protection) pair.
///
/// The first set seen for a key keeps its position and becomes the group's
/// representative; every later set with the same key has its patches
/// appended to the representative and is dropped. Idempotent.
pub fn group(manifest: Manifest) -> Manifest {
    let binaries = manifest
        .binaries
        .into_iter()
        .map(|(bin, sets)| (bin, group_sets(sets)))
        .collect();
    Manifest { binaries }
}

fn group_sets(sets: Vec<PatchSet>) -> Vec<PatchSet> {
    let mut merged: Vec<PatchSet> = Vec::new();
    let mut index: HashMap<(String, u32), usize> = HashMap::new();

    for set in sets {
        match index.entry((set.name.clone(), set.prot)) {
            Entry::Occupied(e) => merged[*e.get()].patches.extend(set.patches),
            Entry::Vacant(e) => {
                e.insert(merged.len());
                merged.push(set);
            }
        }
    }
    merged
}

/// Collapses overlapping byte ranges within each patch set.
///
/// Interval sweep with leftmost-start precedence: the patch with the
/// smaller start offset wins the overlapping region; a later-starting
/// patch survives only as its non-overlapping suffix.
pub fn merge_overlaps(manifest: Manifest) -> Manifest {
    let binaries = manifest
        .binaries
        .into_iter()
        .map(|(bin, sets)| {
            let sets = sets
                .into_iter()
                .map(|mut set| {
                    set.patches = merge_patches(set.patches);
                    set
                })
                .collect();
            (bin, sets)
        })
        .collect();
    Manifest { binaries }
}

fn merge_patches(mut patches: Vec<Patch>) -> Vec<Patch> {
    if patches.len() < 2 {
        return patches;
    }
    patches.sort_by_key(|p| p.offset);

    let mut merged: Vec<Patch> = Vec::new();
    let mut root_end = 0;

    for mut patch in patches {
        if patch.match_bytes.is_empty() {
            continue;
        }
        let (start, end) = (patch.offset, patch.end());

        if merged.is_empty() || start >= root_end {
            // Disjoint from the current root.
            root_end = end;
            merged.push(patch);
        } else if end <= root_end {
            // Fully contained: the root's bytes take precedence.
        } else {
            // Partial overlap: keep only the non-overlapping suffix, which
            // then becomes the root for subsequent patches.
            let adjustment = (root_end - start) as usize;
            patch.offset = root_end;
            patch.match_bytes.drain(..adjustment);
            patch
                .replacement
                .drain(..adjustment.min(patch.replacement.len()));
            root_end = end;
            merged.push(patch);
        }
    }
    merged
}
