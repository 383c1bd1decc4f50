//! Executable image access.
//!
//! This module decodes the ELF64 program-header table of a target image and
//! exposes the two segment classes the patch pipeline understands: the
//! executable (`PF_R | PF_X`) segment and the writable-data (`PF_R | PF_W`)
//! segment. Only the file header and program headers are consulted; section
//! tables, symbols and relocations are irrelevant to byte-level patching.

use std::collections::HashMap;
use std::fmt;

use object::elf;
use object::read::elf::{FileHeader, ProgramHeader};
use object::Endianness;

use crate::error::{Error, Result};

/// The two segment protection classes recognized by the pipeline.
///
/// Only segments whose flags are exactly read+execute or read+write are
/// addressable by patches. Any other flag combination (read-only, OS- or
/// processor-specific bits) is rejected rather than approximated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protection {
    Executable,
    WritableData,
}

impl Protection {
    /// Maps a raw protection value onto a known class.
    pub fn from_flags(flags: u32) -> Option<Self> {
        if flags == elf::PF_R | elf::PF_X {
            Some(Protection::Executable)
        } else if flags == elf::PF_R | elf::PF_W {
            Some(Protection::WritableData)
        } else {
            None
        }
    }

    /// The program-header flag pattern for this class.
    pub fn flags(self) -> u32 {
        match self {
            Protection::Executable => elf::PF_R | elf::PF_X,
            Protection::WritableData => elf::PF_R | elf::PF_W,
        }
    }

    /// Conventional section name, used in diagnostics.
    pub fn section_name(self) -> &'static str {
        match self {
            Protection::Executable => ".text",
            Protection::WritableData => ".data",
        }
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protection::Executable => write!(f, "executable"),
            Protection::WritableData => write!(f, "writable-data"),
        }
    }
}

/// A loadable segment of an executable image.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Protection class of the segment.
    pub prot: Protection,
    /// Absolute file offset where the segment's bytes start.
    pub file_offset: u64,
    /// Number of bytes the segment occupies in the file.
    pub file_size: u64,
    /// Number of bytes the segment occupies in memory (>= `file_size`).
    pub mem_size: u64,
    /// Required load alignment.
    pub align: u64,
}

/// A parsed executable image.
///
/// Borrows the raw image bytes (typically a `memmap2` mapping owned by the
/// pipeline) and indexes its loadable segments by protection class.
pub struct Image<'data> {
    name: String,
    data: &'data [u8],
    segments: HashMap<Protection, Segment>,
}

impl<'data> Image<'data> {
    /// Decodes the image's file header and program-header table.
    ///
    /// `PT_LOAD` entries with exactly read+execute or read+write flags are
    /// registered under their class (a later entry with the same flags
    /// replaces an earlier one); everything else is ignored.
    pub fn parse(name: &str, data: &'data [u8]) -> Result<Self> {
        let unreadable = |e: object::read::Error| Error::ImageUnreadable {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let header = elf::FileHeader64::<Endianness>::parse(data).map_err(unreadable)?;
        let endian = header.endian().map_err(unreadable)?;
        let program_headers = header.program_headers(endian, data).map_err(unreadable)?;

        let mut segments = HashMap::new();
        for ph in program_headers {
            if ph.p_type(endian) != elf::PT_LOAD {
                continue;
            }
            let Some(prot) = Protection::from_flags(ph.p_flags(endian)) else {
                continue;
            };
            segments.insert(
                prot,
                Segment {
                    prot,
                    file_offset: ph.p_offset(endian),
                    file_size: ph.p_filesz(endian),
                    mem_size: ph.p_memsz(endian),
                    align: ph.p_align(endian),
                },
            );
        }

        Ok(Self {
            name: name.to_string(),
            data,
            segments,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up the segment registered for a protection class.
    pub fn segment(&self, prot: Protection) -> Result<&Segment> {
        self.segments
            .get(&prot)
            .ok_or(Error::SegmentNotFound { prot })
    }

    /// Converts a segment-relative offset to an absolute file offset.
    pub fn to_absolute(&self, prot: Protection, offset: u64) -> Result<u64> {
        let segment = self.segment(prot)?;
        if offset >= segment.file_size {
            return Err(Error::OffsetOutOfRange {
                prot,
                offset,
                file_size: segment.file_size,
            });
        }
        Ok(segment.file_offset + offset)
    }

    /// Reads `len` bytes at an absolute file offset.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<&'data [u8]> {
        let start = offset as usize;
        let end = start.checked_add(len);
        match end {
            Some(end) if end <= self.data.len() => Ok(&self.data[start..end]),
            _ => Err(Error::ImageUnreadable {
                name: self.name.clone(),
                reason: format!("truncated read of {} bytes at {:#x}", len, offset),
            }),
        }
    }
}

/// Test-image construction, shared by the resolver, fitter and pipeline
/// tests. Builds a minimal ELF64 byte buffer from raw program-header
/// values, with the file body filled by a counting byte pattern so tests
/// can predict the contents at any offset.
#[cfg(test)]
pub(crate) mod testing {
    use object::elf;
    use object::endian::{U16, U32, U64};
    use object::pod::bytes_of;
    use object::Endianness;

    fn u16v(v: u16) -> U16<Endianness> {
        U16::new(Endianness::Little, v)
    }
    fn u32v(v: u32) -> U32<Endianness> {
        U32::new(Endianness::Little, v)
    }
    fn u64v(v: u64) -> U64<Endianness> {
        U64::new(Endianness::Little, v)
    }

    /// One program-header table entry: (p_type, p_flags, p_offset,
    /// p_filesz, p_memsz, p_align).
    pub type RawHeader = (u32, u32, u64, u64, u64, u64);

    pub fn build_image(headers: &[RawHeader], total_size: usize) -> Vec<u8> {
        let mut buffer = Vec::new();

        let file_header = elf::FileHeader64::<Endianness> {
            e_ident: elf::Ident {
                magic: elf::ELFMAG,
                class: elf::ELFCLASS64,
                data: elf::ELFDATA2LSB,
                version: elf::EV_CURRENT,
                os_abi: elf::ELFOSABI_SYSV,
                abi_version: 0,
                padding: [0; 7],
            },
            e_type: u16v(elf::ET_EXEC),
            e_machine: u16v(elf::EM_X86_64),
            e_version: u32v(elf::EV_CURRENT as u32),
            e_entry: u64v(0),
            e_phoff: u64v(64),
            e_shoff: u64v(0),
            e_flags: u32v(0),
            e_ehsize: u16v(64),
            e_phentsize: u16v(56),
            e_phnum: u16v(headers.len() as u16),
            e_shentsize: u16v(0),
            e_shnum: u16v(0),
            e_shstrndx: u16v(0),
        };
        buffer.extend_from_slice(bytes_of(&file_header));

        for &(p_type, p_flags, p_offset, p_filesz, p_memsz, p_align) in headers {
            let ph = elf::ProgramHeader64::<Endianness> {
                p_type: u32v(p_type),
                p_flags: u32v(p_flags),
                p_offset: u64v(p_offset),
                p_vaddr: u64v(p_offset),
                p_paddr: u64v(p_offset),
                p_filesz: u64v(p_filesz),
                p_memsz: u64v(p_memsz),
                p_align: u64v(p_align),
            };
            buffer.extend_from_slice(bytes_of(&ph));
        }

        while buffer.len() < total_size {
            let b = (buffer.len() & 0xff) as u8;
            buffer.push(b);
        }
        buffer
    }
}
