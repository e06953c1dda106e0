//! WAL entry opcodes and their payload codec.
//!
//! Each data record appended to the WAL ring carries one tagged entry:
//!
//! ```text
//! 0x01 put_frame       FrameMeta + payload (inline bytes | data-region ref)
//! 0x02 delete_frame    frame id + deletion timestamp (ms)
//! 0x03 supersede_frame old frame id + new frame id
//! 0x04 put_embedding   frame id + dimension + f32 vector
//! ```

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Result, WaxError};
use crate::types::common::FrameId;
use crate::types::frame::FrameMeta;

const OP_PUT_FRAME: u8 = 0x01;
const OP_DELETE_FRAME: u8 = 0x02;
const OP_SUPERSEDE_FRAME: u8 = 0x03;
const OP_PUT_EMBEDDING: u8 = 0x04;

const PAYLOAD_INLINE: u8 = 0;
const PAYLOAD_REFERENCE: u8 = 1;

/// Stored payload bytes of a `put_frame` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSource {
    /// Stored bytes travel inside the WAL record.
    Inline(Vec<u8>),
    /// Stored bytes were already written to the data region.
    Reference { offset: u64, length: u64 },
}

/// A decoded WAL mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WalEntry {
    PutFrame {
        meta: FrameMeta,
        payload: PayloadSource,
    },
    DeleteFrame {
        frame_id: FrameId,
        at_ms: i64,
    },
    SupersedeFrame {
        old: FrameId,
        new: FrameId,
    },
    PutEmbedding {
        frame_id: FrameId,
        dimension: u32,
        vector: Vec<f32>,
    },
}

impl WalEntry {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        match self {
            WalEntry::PutFrame { meta, payload } => {
                writer.put_variant_tag(OP_PUT_FRAME);
                meta.encode(&mut writer);
                match payload {
                    PayloadSource::Inline(bytes) => {
                        writer.put_variant_tag(PAYLOAD_INLINE);
                        writer.put_blob(bytes);
                    }
                    PayloadSource::Reference { offset, length } => {
                        writer.put_variant_tag(PAYLOAD_REFERENCE);
                        writer.put_u64(*offset);
                        writer.put_u64(*length);
                    }
                }
            }
            WalEntry::DeleteFrame { frame_id, at_ms } => {
                writer.put_variant_tag(OP_DELETE_FRAME);
                writer.put_u64(*frame_id);
                writer.put_i64(*at_ms);
            }
            WalEntry::SupersedeFrame { old, new } => {
                writer.put_variant_tag(OP_SUPERSEDE_FRAME);
                writer.put_u64(*old);
                writer.put_u64(*new);
            }
            WalEntry::PutEmbedding {
                frame_id,
                dimension,
                vector,
            } => {
                writer.put_variant_tag(OP_PUT_EMBEDDING);
                writer.put_u64(*frame_id);
                writer.put_u32(*dimension);
                writer.put_array_len(vector.len());
                for value in vector {
                    writer.put_f32(*value);
                }
            }
        }
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        const CTX: &str = "wal entry";
        let mut reader = ByteReader::new(bytes);
        let entry = match reader.variant_tag(CTX)? {
            OP_PUT_FRAME => {
                let meta = FrameMeta::decode(&mut reader)?;
                let payload = match reader.variant_tag(CTX)? {
                    PAYLOAD_INLINE => PayloadSource::Inline(reader.blob(CTX)?),
                    PAYLOAD_REFERENCE => PayloadSource::Reference {
                        offset: reader.u64(CTX)?,
                        length: reader.u64(CTX)?,
                    },
                    tag => {
                        return Err(WaxError::DecodeInvalid {
                            context: CTX,
                            reason: format!("unknown payload source tag {tag}").into(),
                        });
                    }
                };
                WalEntry::PutFrame { meta, payload }
            }
            OP_DELETE_FRAME => WalEntry::DeleteFrame {
                frame_id: reader.u64(CTX)?,
                at_ms: reader.i64(CTX)?,
            },
            OP_SUPERSEDE_FRAME => WalEntry::SupersedeFrame {
                old: reader.u64(CTX)?,
                new: reader.u64(CTX)?,
            },
            OP_PUT_EMBEDDING => {
                let frame_id = reader.u64(CTX)?;
                let dimension = reader.u32(CTX)?;
                let count = reader.array_len(CTX)?;
                let mut vector = Vec::with_capacity(count);
                for _ in 0..count {
                    vector.push(reader.f32(CTX)?);
                }
                WalEntry::PutEmbedding {
                    frame_id,
                    dimension,
                    vector,
                }
            }
            opcode => {
                return Err(WaxError::DecodeInvalid {
                    context: CTX,
                    reason: format!("unknown opcode {opcode:#04x}").into(),
                });
            }
        };
        reader.expect_end(CTX)?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::common::{CanonicalEncoding, FrameRole, FrameStatus};
    use std::collections::{BTreeMap, BTreeSet};

    fn meta(id: FrameId) -> FrameMeta {
        FrameMeta {
            id,
            timestamp: Some(1_700_000_000_000),
            anchor_ts: None,
            uri: None,
            title: None,
            payload_offset: 0,
            stored_length: 4,
            canonical_length: 4,
            canonical_encoding: CanonicalEncoding::Plain,
            canonical_sha256: crate::checksum::sha256(b"body"),
            stored_sha256: crate::checksum::sha256(b"body"),
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

    #[test]
    fn put_frame_roundtrip_inline() {
        let entry = WalEntry::PutFrame {
            meta: meta(0),
            payload: PayloadSource::Inline(b"body".to_vec()),
        };
        let decoded = WalEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn put_frame_roundtrip_reference() {
        let entry = WalEntry::PutFrame {
            meta: meta(2),
            payload: PayloadSource::Reference {
                offset: 1 << 20,
                length: 4,
            },
        };
        assert_eq!(WalEntry::decode(&entry.encode()).unwrap(), entry);
    }

    #[test]
    fn delete_and_supersede_roundtrip() {
        let delete = WalEntry::DeleteFrame {
            frame_id: 7,
            at_ms: 1_700_000_123_456,
        };
        assert_eq!(WalEntry::decode(&delete.encode()).unwrap(), delete);

        let supersede = WalEntry::SupersedeFrame { old: 1, new: 2 };
        assert_eq!(WalEntry::decode(&supersede.encode()).unwrap(), supersede);
    }

    #[test]
    fn embedding_roundtrip() {
        let entry = WalEntry::PutEmbedding {
            frame_id: 4,
            dimension: 3,
            vector: vec![0.25, -1.0, 2.5],
        };
        assert_eq!(WalEntry::decode(&entry.encode()).unwrap(), entry);
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let err = WalEntry::decode(&[0x7F]).unwrap_err();
        matches!(err, WaxError::DecodeInvalid { .. })
            .then_some(())
            .expect("opcode error");
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = WalEntry::SupersedeFrame { old: 0, new: 1 }.encode();
        bytes.push(0);
        assert!(WalEntry::decode(&bytes).is_err());
    }
}
