//! Table of contents: the serialized frame catalog.
//!
//! The TOC is appended after the WAL region (or after previously
//! written TOCs) on every commit. Its final 32 bytes hold a SHA-256
//! self-checksum computed with those bytes zeroed.

use crate::codec::{ByteReader, ByteWriter};
use crate::constants::MAX_TOC_BYTES;
use crate::error::{Result, WaxError};
use crate::types::{
    EmbeddingsManifest, FrameMeta, IndexManifest, SegmentCatalog, TimeIndexManifest,
};

/// Current TOC schema version.
pub const TOC_VERSION: u32 = 1;

/// In-memory catalog, serialized as the TOC.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Toc {
    pub toc_version: u32,
    /// Dense frame table indexed by `FrameId`.
    pub frames: Vec<FrameMeta>,
    pub indexes: Vec<IndexManifest>,
    pub time_index: Option<TimeIndexManifest>,
    pub embeddings: Option<EmbeddingsManifest>,
    pub segment_catalog: SegmentCatalog,
    pub merkle_root: [u8; 32],
    pub toc_checksum: [u8; 32],
}

impl Toc {
    /// Serialises the TOC, recomputing the catalog Merkle root and the
    /// trailing self-checksum.
    pub fn encode(&mut self) -> Result<Vec<u8>> {
        self.merkle_root = self.segment_catalog.merkle_root();

        let mut writer = ByteWriter::new();
        writer.put_u32(self.toc_version);
        writer.put_array_len(self.frames.len());
        for frame in &self.frames {
            frame.encode(&mut writer);
        }
        writer.put_array_len(self.indexes.len());
        for manifest in &self.indexes {
            manifest.encode(&mut writer);
        }
        writer.put_option(self.time_index.as_ref(), |w, m| m.encode(w));
        writer.put_option(self.embeddings.as_ref(), |w, m| m.encode(w));
        self.segment_catalog.encode(&mut writer);
        writer.put_raw(&self.merkle_root);
        writer.put_raw(&[0u8; 32]);

        let mut bytes = writer.into_bytes();
        if bytes.len() as u64 > MAX_TOC_BYTES {
            return Err(WaxError::InvalidToc {
                reason: "serialized toc exceeds 64 MiB".into(),
            });
        }
        let digest = crate::checksum::sha256(&bytes);
        let tail = bytes.len() - 32;
        bytes[tail..].copy_from_slice(&digest);
        self.toc_checksum = digest;
        Ok(bytes)
    }

    /// Deserialises TOC bytes, verifying the self-checksum and
    /// rejecting trailing data.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        const CTX: &str = "toc";
        if bytes.len() as u64 > MAX_TOC_BYTES {
            return Err(WaxError::InvalidToc {
                reason: "toc exceeds 64 MiB".into(),
            });
        }
        if bytes.len() < 32 {
            return Err(WaxError::DecodeTruncated { context: CTX });
        }
        let tail = bytes.len() - 32;
        let mut stored_checksum = [0u8; 32];
        stored_checksum.copy_from_slice(&bytes[tail..]);
        let mut zeroed = bytes.to_vec();
        zeroed[tail..].fill(0);
        if crate::checksum::sha256(&zeroed) != stored_checksum {
            return Err(WaxError::ChecksumMismatch { context: "toc" });
        }

        let mut reader = ByteReader::new(&bytes[..tail]);
        let toc_version = reader.u32(CTX)?;
        if toc_version != TOC_VERSION {
            return Err(WaxError::InvalidToc {
                reason: "unsupported toc version".into(),
            });
        }
        let frame_count = reader.array_len(CTX)?;
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            frames.push(FrameMeta::decode(&mut reader)?);
        }
        let index_count = reader.array_len(CTX)?;
        let mut indexes = Vec::with_capacity(index_count);
        for _ in 0..index_count {
            indexes.push(IndexManifest::decode(&mut reader)?);
        }
        let time_index = reader.option(CTX, TimeIndexManifest::decode)?;
        let embeddings = reader.option(CTX, EmbeddingsManifest::decode)?;
        let segment_catalog = SegmentCatalog::decode(&mut reader)?;
        let merkle_root = reader.array(CTX)?;
        reader.expect_end(CTX)?;

        let toc = Self {
            toc_version,
            frames,
            indexes,
            time_index,
            embeddings,
            segment_catalog,
            merkle_root,
            toc_checksum: stored_checksum,
        };
        toc.verify()?;
        Ok(toc)
    }

    /// Structural validation beyond the checksum: dense ids and
    /// mutually consistent supersede links.
    pub fn verify(&self) -> Result<()> {
        if self.segment_catalog.merkle_root() != self.merkle_root {
            return Err(WaxError::InvalidToc {
                reason: "catalog merkle root mismatch".into(),
            });
        }
        for (index, frame) in self.frames.iter().enumerate() {
            if frame.id != index as u64 {
                return Err(WaxError::InvalidToc {
                    reason: "frame table is not dense".into(),
                });
            }
            if let Some(peer) = frame.superseded_by {
                let back = self
                    .frames
                    .get(peer as usize)
                    .ok_or(WaxError::InvalidToc {
                        reason: "superseded_by points past the frame table".into(),
                    })?;
                if back.supersedes != Some(frame.id) {
                    return Err(WaxError::InvalidToc {
                        reason: "supersede link is not mutual".into(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CanonicalEncoding, FrameRole, FrameStatus, IndexKind, SegmentEntry,
    };
    use std::collections::{BTreeMap, BTreeSet};

    fn frame(id: u64) -> FrameMeta {
        FrameMeta {
            id,
            timestamp: Some(1_700_000_000_000 + id as i64),
            anchor_ts: None,
            uri: Some(format!("wax://sample/{id}")),
            title: None,
            payload_offset: 270_336 + id * 128,
            stored_length: 128,
            canonical_length: 128,
            canonical_encoding: CanonicalEncoding::Plain,
            canonical_sha256: [id as u8; 32],
            stored_sha256: [id as u8; 32],
            role: FrameRole::Document,
            parent_id: None,
            supersedes: None,
            superseded_by: None,
            status: FrameStatus::Active,
            tags: Vec::new(),
            labels: BTreeSet::new(),
            metadata: BTreeMap::new(),
            search_text: None,
            content_dates: None,
            chunk_index: None,
            chunk_count: None,
            chunk_manifest: None,
        }
    }

    fn sample_toc() -> Toc {
        Toc {
            toc_version: TOC_VERSION,
            frames: vec![frame(0), frame(1)],
            indexes: vec![IndexManifest {
                segment_id: 0,
                kind: IndexKind::Lex,
                length: 512,
                sha256: [0x11; 32],
            }],
            time_index: Some(TimeIndexManifest {
                offset: 300_000,
                length: 48,
                entry_count: 2,
                sha256: [0x22; 32],
            }),
            embeddings: None,
            segment_catalog: SegmentCatalog {
                entries: vec![SegmentEntry {
                    segment_id: 0,
                    offset: 280_000,
                    length: 512,
                    sha256: [0x11; 32],
                }],
            },
            merkle_root: [0; 32],
            toc_checksum: [0; 32],
        }
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let mut toc = sample_toc();
        let encoded = toc.encode().expect("encode toc");
        let decoded = Toc::decode(&encoded).expect("decode toc");
        assert_eq!(decoded, toc);
        assert_eq!(decoded.toc_checksum, toc.toc_checksum);
    }

    #[test]
    fn detect_checksum_mismatch() {
        let mut toc = sample_toc();
        let mut encoded = toc.encode().unwrap();
        encoded[4] ^= 0xFF;
        let err = Toc::decode(&encoded).expect_err("must fail");
        matches!(err, WaxError::ChecksumMismatch { .. })
            .then_some(())
            .expect("checksum error");
    }

    #[test]
    fn reject_trailing_bytes() {
        let mut toc = sample_toc();
        let mut encoded = toc.encode().unwrap();
        encoded.push(0);
        assert!(Toc::decode(&encoded).is_err());
    }

    #[test]
    fn reject_sparse_frame_table() {
        let mut toc = sample_toc();
        toc.frames[1].id = 7;
        let encoded = toc.encode().unwrap();
        let err = Toc::decode(&encoded).expect_err("must fail");
        matches!(err, WaxError::InvalidToc { .. })
            .then_some(())
            .expect("dense table error");
    }

    #[test]
    fn reject_one_sided_supersede_link() {
        let mut toc = sample_toc();
        toc.frames[0].superseded_by = Some(1);
        // frames[1].supersedes deliberately left unset.
        let encoded = toc.encode().unwrap();
        assert!(Toc::decode(&encoded).is_err());

        let mut good = sample_toc();
        good.frames[0].superseded_by = Some(1);
        good.frames[1].supersedes = Some(0);
        let encoded = good.encode().unwrap();
        assert!(Toc::decode(&encoded).is_ok());
    }
}
