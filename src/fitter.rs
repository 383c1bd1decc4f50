//! Patch fitting.
//!
//! Fitting reconciles a patch set with the real layout of its target
//! segment: the set's declared protection selects a segment class, each
//! patch's read window is pulled back inside the segment's file extent,
//! and the "match" bytes are re-read from the image so they reflect what
//! is actually on disk rather than what the manifest author expected.

use crate::error::{Error, Result};
use crate::image::{Image, Protection};
use crate::manifest::PatchSet;
use crate::utils::align_up;

/// Minimum number of original bytes recorded per patch, even when the
/// replacement is shorter.
pub const MIN_MATCH_LEN: usize = 5;

/// Fits every patch in `set` against the segment selected by its declared
/// protection, rewriting offsets, match bytes and (on boundary overflow)
/// replacement bytes in place. Also records the set's aligned memory size.
pub fn fit(image: &Image, set: &mut PatchSet) -> Result<()> {
    let prot = Protection::from_flags(set.prot).ok_or_else(|| Error::InvalidProtection {
        name: set.name.clone(),
        prot: set.prot,
    })?;
    let segment = *image.segment(prot)?;

    set.size = Some(align_up(segment.mem_size, segment.align));

    for patch in &mut set.patches {
        let match_len = patch.replacement.len().max(MIN_MATCH_LEN) as u64;
        if segment.file_size < match_len {
            return Err(Error::SegmentTooSmall {
                file_size: segment.file_size,
                match_len,
            });
        }

        // Pull the read window back inside the segment's file extent.
        let overflow = patch
            .offset
            .saturating_add(match_len)
            .saturating_sub(segment.file_size);
        let offset = patch.offset.saturating_sub(overflow);

        let abs_offset = image.to_absolute(prot, offset)?;
        let actual = image.read_at(abs_offset, match_len as usize)?;

        patch.offset = offset;
        patch.match_bytes = actual.to_vec();
        if overflow > 0 {
            // The shifted-over prefix keeps its on-disk bytes, so the
            // replacement still takes effect at the intended offset. An
            // offset pointing wholly past the segment shifts by more than
            // the match window; the prefix is capped at the full match.
            let prefix_len = (overflow as usize).min(actual.len());
            let mut replacement = actual[..prefix_len].to_vec();
            replacement.extend_from_slice(&patch.replacement);
            patch.replacement = replacement;
        }

        tracing::debug!(
            "fitted patch at {}+{:#x} (len {}, adjusted {})",
            prot.section_name(),
            patch.offset,
            patch.match_bytes.len(),
            overflow
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::testing::build_image;
    use crate::manifest::{Patch, PatchSet};
    use object::elf;

    const RX: u32 = elf::PF_R | elf::PF_X;
    const RW: u32 = elf::PF_R | elf::PF_W;

    // One RX segment at file offset 0x100, sixteen bytes of file data,
    // 0x30 bytes in memory, aligned to 0x20.
    fn test_image_bytes() -> Vec<u8> {
        build_image(
            &[
                (elf::PT_LOAD, RX, 0x100, 0x10, 0x30, 0x20),
                (elf::PT_LOAD, RW, 0x200, 0x10, 0x10, 0x10),
            ],
            0x300,
        )
    }

    fn set_with(patches: Vec<Patch>) -> PatchSet {
        PatchSet {
            name: "eboot.bin".to_string(),
            prot: 0b101,
            size: None,
            patches,
        }
    }

    // The builder's counting pattern: byte at absolute offset i is i & 0xff.
    fn image_bytes_at(abs: u64, len: usize) -> Vec<u8> {
        (abs..abs + len as u64).map(|i| (i & 0xff) as u8).collect()
    }

    #[test]
    fn fit_reads_authoritative_match_bytes() {
        let data = test_image_bytes();
        let image = Image::parse("eboot.bin", &data).unwrap();
        let mut set = set_with(vec![Patch::new(0x2, b"wrong", &[0x90; 5], "nop")]);

        fit(&image, &mut set).unwrap();

        assert_eq!(set.size, Some(0x40)); // 0x30 aligned up to 0x20
        let patch = &set.patches[0];
        assert_eq!(patch.offset, 0x2);
        assert_eq!(patch.match_bytes, image_bytes_at(0x102, 5));
        assert_eq!(patch.replacement, vec![0x90; 5]);
    }

    #[test]
    fn fit_shifts_overflowing_patch_back() {
        let data = test_image_bytes();
        let image = Image::parse("eboot.bin", &data).unwrap();
        // file_size = 0x10, offset 0x0e, replacement of 6 bytes:
        // overflow = (0x0e + 6) - 0x10 = 4.
        let mut set = set_with(vec![Patch::new(0x0e, &[], &[0xaa; 6], "tail")]);

        fit(&image, &mut set).unwrap();

        let patch = &set.patches[0];
        assert_eq!(patch.offset, 0x0a);
        assert_eq!(patch.match_bytes, image_bytes_at(0x10a, 6));
        // Replacement gains the four shifted-over on-disk bytes as prefix.
        let mut expected = image_bytes_at(0x10a, 4);
        expected.extend_from_slice(&[0xaa; 6]);
        assert_eq!(patch.replacement, expected);
        assert_eq!(patch.end(), 0x10);
    }

    #[test]
    fn fit_pulls_far_out_of_bounds_offset_to_segment_tail() {
        let data = test_image_bytes();
        let image = Image::parse("eboot.bin", &data).unwrap();
        // Offset entirely past the segment: the window lands on the last
        // match_len bytes and the whole match becomes the prefix.
        let mut set = set_with(vec![Patch::new(0x50, &[], &[0xbb; 5], "way out")]);

        fit(&image, &mut set).unwrap();

        let patch = &set.patches[0];
        assert_eq!(patch.offset, 0x10 - 5);
        assert_eq!(patch.match_bytes, image_bytes_at(0x10b, 5));
        let mut expected = image_bytes_at(0x10b, 5);
        expected.extend_from_slice(&[0xbb; 5]);
        assert_eq!(patch.replacement, expected);
    }

    #[test]
    fn fit_enforces_min_match_len() {
        let data = test_image_bytes();
        let image = Image::parse("eboot.bin", &data).unwrap();
        let mut set = set_with(vec![Patch::new(0x0, &[], &[0x90], "one byte")]);

        fit(&image, &mut set).unwrap();
        assert_eq!(set.patches[0].match_bytes.len(), MIN_MATCH_LEN);
    }

    #[test]
    fn fit_rejects_unknown_protection() {
        let data = test_image_bytes();
        let image = Image::parse("eboot.bin", &data).unwrap();
        let mut set = set_with(vec![]);
        set.prot = 0b100;

        assert!(matches!(
            fit(&image, &mut set),
            Err(Error::InvalidProtection { prot: 0b100, .. })
        ));
    }

    #[test]
    fn fit_rejects_undersized_segment() {
        let data = test_image_bytes();
        let image = Image::parse("eboot.bin", &data).unwrap();
        // Replacement longer than the 0x10-byte segment.
        let mut set = set_with(vec![Patch::new(0x0, &[], &[0x90; 0x11], "too big")]);

        assert!(matches!(
            fit(&image, &mut set),
            Err(Error::SegmentTooSmall {
                file_size: 0x10,
                match_len: 0x11,
            })
        ));
    }

    #[test]
    fn fitted_patches_stay_inside_segment() {
        let data = test_image_bytes();
        let image = Image::parse("eboot.bin", &data).unwrap();
        let mut set = set_with(vec![
            Patch::new(0x0, &[], &[0x90; 5], "start"),
            Patch::new(0x0b, &[], &[0x90; 5], "end"),
            Patch::new(0x0f, &[], &[0x90; 8], "overflow"),
        ]);

        fit(&image, &mut set).unwrap();
        for patch in &set.patches {
            assert!(patch.end() <= 0x10);
        }
    }
}
