//! Patch manifest data model.
//!
//! The manifest is a JSON object mapping binary identifiers (the empty
//! string denotes the default binary) to arrays of patch sets. On the wire
//! a patch is the positional record `[offsetHex, matchHex, patchHex,
//! comment]` with whitespace-tolerant hex strings; internally it is a
//! fixed-field struct, validated once at the parse boundary. On output the
//! offset is emitted as an integer and the byte fields are re-encoded as
//! lowercase hex, and each patch set carries its computed `size`.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::{decode_hex, encode_hex, parse_hex_offset};

/// A single byte-range replacement within a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Segment-relative byte offset.
    pub offset: u64,
    /// Bytes expected at `offset` (rewritten from the image by fitting).
    pub match_bytes: Vec<u8>,
    /// Bytes to write instead.
    pub replacement: Vec<u8>,
    /// Free-text label.
    pub comment: String,
}

impl Patch {
    pub fn new(offset: u64, match_bytes: &[u8], replacement: &[u8], comment: &str) -> Self {
        Self {
            offset,
            match_bytes: match_bytes.to_vec(),
            replacement: replacement.to_vec(),
            comment: comment.to_string(),
        }
    }

    /// One past the last byte covered by the match window.
    pub fn end(&self) -> u64 {
        self.offset + self.match_bytes.len() as u64
    }
}

impl<'de> Deserialize<'de> for Patch {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (offset, match_hex, patch_hex, comment) =
            <(String, String, String, String)>::deserialize(deserializer)?;
        Ok(Patch {
            offset: parse_hex_offset(&offset).map_err(de::Error::custom)?,
            match_bytes: decode_hex(&match_hex).map_err(de::Error::custom)?,
            replacement: decode_hex(&patch_hex).map_err(de::Error::custom)?,
            comment,
        })
    }
}

impl Serialize for Patch {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (
            self.offset,
            encode_hex(&self.match_bytes),
            encode_hex(&self.replacement),
            &self.comment,
        )
            .serialize(serializer)
    }
}

/// All patches destined for one segment of one binary.
///
/// `prot` is kept as the raw declared value; it is checked against the
/// known protection classes only when the set is fitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSet {
    pub name: String,
    pub prot: u32,
    /// Segment memory size rounded up to its alignment; set by fitting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub patches: Vec<Patch>,
}

/// The full collection of patch sets across all target binaries.
///
/// Binary insertion order is preserved from the input document through
/// every pipeline stage to the output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    pub binaries: Vec<(String, Vec<PatchSet>)>,
}

impl Serialize for Manifest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.binaries.len()))?;
        for (name, sets) in &self.binaries {
            map.serialize_entry(name, sets)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ManifestVisitor;

        impl<'de> Visitor<'de> for ManifestVisitor {
            type Value = Manifest;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of binary names to patch-set arrays")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Manifest, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut binaries = Vec::new();
                while let Some((name, sets)) = map.next_entry::<String, Vec<PatchSet>>()? {
                    binaries.push((name, sets));
                }
                Ok(Manifest { binaries })
            }
        }

        deserializer.deserialize_map(ManifestVisitor)
    }
}
