//! Persistent manifest structures describing segments, index blobs,
//! and auxiliary tracks catalogued by the TOC.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::Result;
use crate::types::common::{IndexKind, SegmentId};

/// Manifest entry describing one embedded index blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexManifest {
    pub segment_id: SegmentId,
    pub kind: IndexKind,
    pub length: u64,
    pub sha256: [u8; 32],
}

impl IndexManifest {
    pub(crate) fn encode(&self, writer: &mut ByteWriter) {
        writer.put_u64(self.segment_id);
        writer.put_variant_tag(self.kind.as_byte());
        writer.put_u64(self.length);
        writer.put_raw(&self.sha256);
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        const CTX: &str = "index manifest";
        Ok(Self {
            segment_id: reader.u64(CTX)?,
            kind: IndexKind::from_byte(reader.variant_tag(CTX)?)?,
            length: reader.u64(CTX)?,
            sha256: reader.array(CTX)?,
        })
    }
}

/// One catalogued byte segment inside the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEntry {
    pub segment_id: SegmentId,
    pub offset: u64,
    pub length: u64,
    pub sha256: [u8; 32],
}

impl SegmentEntry {
    pub(crate) fn encode(&self, writer: &mut ByteWriter) {
        writer.put_u64(self.segment_id);
        writer.put_u64(self.offset);
        writer.put_u64(self.length);
        writer.put_raw(&self.sha256);
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        const CTX: &str = "segment entry";
        Ok(Self {
            segment_id: reader.u64(CTX)?,
            offset: reader.u64(CTX)?,
            length: reader.u64(CTX)?,
            sha256: reader.array(CTX)?,
        })
    }

    /// Leaf digest feeding the catalog Merkle root.
    #[must_use]
    pub fn leaf_digest(&self) -> [u8; 32] {
        let mut writer = ByteWriter::with_capacity(56);
        self.encode(&mut writer);
        crate::checksum::sha256(&writer.into_bytes())
    }
}

/// Ordered sequence of catalogued segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentCatalog {
    pub entries: Vec<SegmentEntry>,
}

impl SegmentCatalog {
    /// Next unassigned segment id.
    #[must_use]
    pub fn next_segment_id(&self) -> SegmentId {
        self.entries
            .iter()
            .map(|entry| entry.segment_id + 1)
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn find(&self, segment_id: SegmentId) -> Option<&SegmentEntry> {
        self.entries
            .iter()
            .find(|entry| entry.segment_id == segment_id)
    }

    /// Merkle root over the ordered entry digests.
    #[must_use]
    pub fn merkle_root(&self) -> [u8; 32] {
        let leaves: Vec<[u8; 32]> = self
            .entries
            .iter()
            .map(SegmentEntry::leaf_digest)
            .collect();
        crate::checksum::merkle_root(&leaves)
    }

    pub(crate) fn encode(&self, writer: &mut ByteWriter) {
        writer.put_array_len(self.entries.len());
        for entry in &self.entries {
            entry.encode(writer);
        }
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.array_len("segment catalog")?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(SegmentEntry::decode(reader)?);
        }
        Ok(Self { entries })
    }
}

/// Manifest of the sorted `(timestamp, frame_id)` time index track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeIndexManifest {
    pub offset: u64,
    pub length: u64,
    pub entry_count: u64,
    pub sha256: [u8; 32],
}

impl TimeIndexManifest {
    pub(crate) fn encode(&self, writer: &mut ByteWriter) {
        writer.put_u64(self.offset);
        writer.put_u64(self.length);
        writer.put_u64(self.entry_count);
        writer.put_raw(&self.sha256);
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        const CTX: &str = "time index manifest";
        Ok(Self {
            offset: reader.u64(CTX)?,
            length: reader.u64(CTX)?,
            entry_count: reader.u64(CTX)?,
            sha256: reader.array(CTX)?,
        })
    }
}

/// Manifest of the per-frame embeddings track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingsManifest {
    pub offset: u64,
    pub length: u64,
    pub entry_count: u64,
    pub sha256: [u8; 32],
}

impl EmbeddingsManifest {
    pub(crate) fn encode(&self, writer: &mut ByteWriter) {
        writer.put_u64(self.offset);
        writer.put_u64(self.length);
        writer.put_u64(self.entry_count);
        writer.put_raw(&self.sha256);
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        const CTX: &str = "embeddings manifest";
        Ok(Self {
            offset: reader.u64(CTX)?,
            length: reader.u64(CTX)?,
            entry_count: reader.u64(CTX)?,
            sha256: reader.array(CTX)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(id: u64) -> SegmentEntry {
        SegmentEntry {
            segment_id: id,
            offset: id * 4096,
            length: 512,
            sha256: [id as u8; 32],
        }
    }

    #[test]
    fn catalog_roundtrip() {
        let catalog = SegmentCatalog {
            entries: vec![sample_entry(0), sample_entry(1), sample_entry(5)],
        };
        let mut writer = ByteWriter::new();
        catalog.encode(&mut writer);
        let bytes = writer.into_bytes();
        let decoded = SegmentCatalog::decode(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(decoded, catalog);
        assert_eq!(decoded.next_segment_id(), 6);
        assert!(decoded.find(5).is_some());
        assert!(decoded.find(9).is_none());
    }

    #[test]
    fn merkle_root_tracks_entries() {
        let one = SegmentCatalog {
            entries: vec![sample_entry(0)],
        };
        let two = SegmentCatalog {
            entries: vec![sample_entry(0), sample_entry(1)],
        };
        assert_ne!(one.merkle_root(), two.merkle_root());
        assert_eq!(SegmentCatalog::default().merkle_root(), [0u8; 32]);
    }

    #[test]
    fn index_manifest_roundtrip() {
        let manifest = IndexManifest {
            segment_id: 7,
            kind: IndexKind::Vector,
            length: 1024,
            sha256: [0xAB; 32],
        };
        let mut writer = ByteWriter::new();
        manifest.encode(&mut writer);
        let bytes = writer.into_bytes();
        let decoded = IndexManifest::decode(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(decoded, manifest);
    }
}
