//! Frame metadata records and store statistics.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::codec::{ByteReader, ByteWriter};
use crate::error::Result;
use crate::types::common::{CanonicalEncoding, FrameId, FrameRole, FrameStatus};

/// Reference to a standalone blob inside the data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRef {
    pub offset: u64,
    pub length: u64,
    pub sha256: [u8; 32],
}

impl BlobRef {
    pub(crate) fn encode(&self, writer: &mut ByteWriter) {
        writer.put_u64(self.offset);
        writer.put_u64(self.length);
        writer.put_raw(&self.sha256);
    }

    pub(crate) fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self {
            offset: reader.u64("blob ref")?,
            length: reader.u64("blob ref")?,
            sha256: reader.array("blob ref")?,
        })
    }
}

/// Per-frame catalog record. Immutable once a commit observes it;
/// delete/supersede only touch `status` and the link fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMeta {
    pub id: FrameId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: Option<i64>,
    /// Temporal anchor used by timeline ordering when set.
    pub anchor_ts: Option<i64>,
    pub uri: Option<String>,
    pub title: Option<String>,
    pub payload_offset: u64,
    /// Length of the stored (possibly compressed) payload bytes.
    pub stored_length: u64,
    /// Length of the canonical (uncompressed) payload bytes.
    pub canonical_length: u64,
    pub canonical_encoding: CanonicalEncoding,
    /// SHA-256 over the canonical form.
    pub canonical_sha256: [u8; 32],
    /// SHA-256 over the stored form.
    pub stored_sha256: [u8; 32],
    pub role: FrameRole,
    pub parent_id: Option<FrameId>,
    pub supersedes: Option<FrameId>,
    pub superseded_by: Option<FrameId>,
    pub status: FrameStatus,
    pub tags: Vec<String>,
    pub labels: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub search_text: Option<String>,
    /// Content dates mentioned by the payload, milliseconds since epoch.
    pub content_dates: Option<Vec<i64>>,
    pub chunk_index: Option<u32>,
    pub chunk_count: Option<u32>,
    pub chunk_manifest: Option<BlobRef>,
}

impl FrameMeta {
    /// True when the payload participates in the live set.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status == FrameStatus::Active && self.superseded_by.is_none()
    }

    pub fn encode(&self, writer: &mut ByteWriter) {
        writer.put_u64(self.id);
        writer.put_option(self.timestamp.as_ref(), |w, v| w.put_i64(*v));
        writer.put_option(self.anchor_ts.as_ref(), |w, v| w.put_i64(*v));
        writer.put_option(self.uri.as_ref(), |w, v| w.put_str(v));
        writer.put_option(self.title.as_ref(), |w, v| w.put_str(v));
        writer.put_u64(self.payload_offset);
        writer.put_u64(self.stored_length);
        writer.put_u64(self.canonical_length);
        writer.put_variant_tag(self.canonical_encoding.as_byte());
        writer.put_raw(&self.canonical_sha256);
        writer.put_raw(&self.stored_sha256);
        writer.put_variant_tag(self.role.as_byte());
        writer.put_option(self.parent_id.as_ref(), |w, v| w.put_u64(*v));
        writer.put_option(self.supersedes.as_ref(), |w, v| w.put_u64(*v));
        writer.put_option(self.superseded_by.as_ref(), |w, v| w.put_u64(*v));
        writer.put_variant_tag(self.status.as_byte());
        writer.put_array_len(self.tags.len());
        for tag in &self.tags {
            writer.put_str(tag);
        }
        writer.put_array_len(self.labels.len());
        for label in &self.labels {
            writer.put_str(label);
        }
        writer.put_array_len(self.metadata.len());
        for (key, value) in &self.metadata {
            writer.put_str(key);
            writer.put_str(value);
        }
        writer.put_option(self.search_text.as_ref(), |w, v| w.put_str(v));
        writer.put_option(self.content_dates.as_ref(), |w, dates| {
            w.put_array_len(dates.len());
            for date in dates {
                w.put_i64(*date);
            }
        });
        writer.put_option(self.chunk_index.as_ref(), |w, v| w.put_u32(*v));
        writer.put_option(self.chunk_count.as_ref(), |w, v| w.put_u32(*v));
        writer.put_option(self.chunk_manifest.as_ref(), |w, v| v.encode(w));
    }

    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self> {
        const CTX: &str = "frame meta";
        let id = reader.u64(CTX)?;
        let timestamp = reader.option(CTX, |r| r.i64(CTX))?;
        let anchor_ts = reader.option(CTX, |r| r.i64(CTX))?;
        let uri = reader.option(CTX, |r| r.str(CTX))?;
        let title = reader.option(CTX, |r| r.str(CTX))?;
        let payload_offset = reader.u64(CTX)?;
        let stored_length = reader.u64(CTX)?;
        let canonical_length = reader.u64(CTX)?;
        let canonical_encoding = CanonicalEncoding::from_byte(reader.variant_tag(CTX)?)?;
        let canonical_sha256 = reader.array(CTX)?;
        let stored_sha256 = reader.array(CTX)?;
        let role = FrameRole::from_byte(reader.variant_tag(CTX)?)?;
        let parent_id = reader.option(CTX, |r| r.u64(CTX))?;
        let supersedes = reader.option(CTX, |r| r.u64(CTX))?;
        let superseded_by = reader.option(CTX, |r| r.u64(CTX))?;
        let status = FrameStatus::from_byte(reader.variant_tag(CTX)?)?;
        let tag_count = reader.array_len(CTX)?;
        let mut tags = Vec::with_capacity(tag_count);
        for _ in 0..tag_count {
            tags.push(reader.str(CTX)?);
        }
        let label_count = reader.array_len(CTX)?;
        let mut labels = BTreeSet::new();
        for _ in 0..label_count {
            labels.insert(reader.str(CTX)?);
        }
        let meta_count = reader.array_len(CTX)?;
        let mut metadata = BTreeMap::new();
        for _ in 0..meta_count {
            let key = reader.str(CTX)?;
            let value = reader.str(CTX)?;
            metadata.insert(key, value);
        }
        let search_text = reader.option(CTX, |r| r.str(CTX))?;
        let content_dates = reader.option(CTX, |r| {
            let count = r.array_len(CTX)?;
            let mut dates = Vec::with_capacity(count);
            for _ in 0..count {
                dates.push(r.i64(CTX)?);
            }
            Ok(dates)
        })?;
        let chunk_index = reader.option(CTX, |r| r.u32(CTX))?;
        let chunk_count = reader.option(CTX, |r| r.u32(CTX))?;
        let chunk_manifest = reader.option(CTX, BlobRef::decode)?;
        Ok(Self {
            id,
            timestamp,
            anchor_ts,
            uri,
            title,
            payload_offset,
            stored_length,
            canonical_length,
            canonical_encoding,
            canonical_sha256,
            stored_sha256,
            role,
            parent_id,
            supersedes,
            superseded_by,
            status,
            tags,
            labels,
            metadata,
            search_text,
            content_dates,
            chunk_index,
            chunk_count,
            chunk_manifest,
        })
    }
}

/// Caller-supplied metadata subset for `put`; everything the store does
/// not derive from the payload itself.
#[derive(Debug, Clone, Default)]
pub struct FrameDraft {
    pub timestamp: Option<i64>,
    pub anchor_ts: Option<i64>,
    pub uri: Option<String>,
    pub title: Option<String>,
    pub role: FrameRole,
    pub parent_id: Option<FrameId>,
    pub tags: Vec<String>,
    pub labels: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub search_text: Option<String>,
    pub content_dates: Option<Vec<i64>>,
    pub chunk_index: Option<u32>,
    pub chunk_count: Option<u32>,
    pub encoding: CanonicalEncoding,
}

impl FrameDraft {
    #[must_use]
    pub fn builder() -> FrameDraftBuilder {
        FrameDraftBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct FrameDraftBuilder {
    inner: FrameDraft,
}

impl FrameDraftBuilder {
    #[must_use]
    pub fn timestamp(mut self, ms: i64) -> Self {
        self.inner.timestamp = Some(ms);
        self
    }

    #[must_use]
    pub fn anchor_ts(mut self, ms: i64) -> Self {
        self.inner.anchor_ts = Some(ms);
        self
    }

    #[must_use]
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.inner.uri = Some(uri.into());
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.inner.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn role(mut self, role: FrameRole) -> Self {
        self.inner.role = role;
        self
    }

    #[must_use]
    pub fn parent(mut self, parent_id: FrameId) -> Self {
        self.inner.parent_id = Some(parent_id);
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.inner.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.inner.labels.insert(label.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn search_text(mut self, text: impl Into<String>) -> Self {
        self.inner.search_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn content_dates(mut self, dates: Vec<i64>) -> Self {
        self.inner.content_dates = Some(dates);
        self
    }

    #[must_use]
    pub fn chunk(mut self, index: u32, count: u32) -> Self {
        self.inner.chunk_index = Some(index);
        self.inner.chunk_count = Some(count);
        self
    }

    #[must_use]
    pub fn encoding(mut self, encoding: CanonicalEncoding) -> Self {
        self.inner.encoding = encoding;
        self
    }

    #[must_use]
    pub fn build(self) -> FrameDraft {
        self.inner
    }
}

/// WAL counters reported by [`Stats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WalStats {
    pub size: u64,
    pub write_pos: u64,
    pub checkpoint_pos: u64,
    pub pending_bytes: u64,
    pub committed_sequence: u64,
    pub next_sequence: u64,
}

/// Public-facing statistics summarising a store.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub frame_count: u64,
    pub active_frame_count: u64,
    pub live_frame_count: u64,
    /// Mutations replayed or staged but not yet committed.
    pub pending_ops: u64,
    pub generation: u64,
    pub header_generation: u64,
    pub payload_bytes: u64,
    pub logical_bytes: u64,
    pub file_bytes: u64,
    pub wal: WalStats,
}

impl Stats {
    /// JSON rendering for CLI and diagnostic surfaces.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
