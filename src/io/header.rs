//! Mirrored A/B header pages.
//!
//! Two 4 KiB pages sit at the file head. Every commit writes the new
//! header into the slot that is *not* currently active and becomes
//! active by carrying a higher header-page generation; a torn write
//! therefore always leaves one selectable page behind.

use crate::checksum::sha256;
use crate::constants::{
    HEADER_A_OFFSET, HEADER_B_OFFSET, HEADER_PAGE_SIZE, MAGIC, SPEC_MAJOR, SPEC_MINOR,
    SPEC_VERSION, WAL_OFFSET, WAL_SNAPSHOT_MAGIC,
};
use crate::error::{Result, WaxError};
use crate::io::device::BlockDevice;

const VERSION_OFFSET: usize = 4;
const SPEC_BYTES_OFFSET: usize = 6;
const HEADER_GENERATION_POS: usize = 8;
const FILE_GENERATION_POS: usize = 16;
const FOOTER_OFFSET_POS: usize = 24;
const WAL_OFFSET_POS: usize = 32;
const WAL_SIZE_POS: usize = 40;
const WAL_WRITE_POS: usize = 48;
const WAL_CHECKPOINT_POS: usize = 56;
const WAL_SEQUENCE_POS: usize = 64;
const TOC_CHECKSUM_POS: usize = 72;
const TOC_CHECKSUM_END: usize = 104;
const HEADER_CHECKSUM_POS: usize = 104;
const HEADER_CHECKSUM_END: usize = 136;
const SNAPSHOT_POS: usize = 136;
const SNAPSHOT_END: usize = 208;

/// Which mirrored page slot a header occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderSlot {
    A,
    B,
}

impl HeaderSlot {
    #[must_use]
    pub fn offset(self) -> u64 {
        match self {
            HeaderSlot::A => HEADER_A_OFFSET,
            HeaderSlot::B => HEADER_B_OFFSET,
        }
    }

    #[must_use]
    pub fn other(self) -> Self {
        match self {
            HeaderSlot::A => HeaderSlot::B,
            HeaderSlot::B => HeaderSlot::A,
        }
    }
}

/// Optional WAL replay-state snapshot embedded in a header page.
/// A pure recovery-scan shortcut; the WAL scan stays authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalReplaySnapshot {
    pub wal_write_pos: u64,
    pub wal_checkpoint_pos: u64,
    pub wal_committed_seq: u64,
    pub pending_records: u64,
    pub pending_bytes: u64,
    pub first_pending_pos: u64,
    pub first_pending_seq: u64,
}

/// Decoded contents of one header page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPage {
    pub format_version: u16,
    pub header_generation: u64,
    pub file_generation: u64,
    pub footer_offset: u64,
    pub wal_offset: u64,
    pub wal_size: u64,
    pub wal_write_pos: u64,
    pub wal_checkpoint_pos: u64,
    pub wal_committed_seq: u64,
    pub toc_checksum: [u8; 32],
    pub replay_snapshot: Option<WalReplaySnapshot>,
}

impl HeaderPage {
    /// Encodes the page, stamping the header checksum over the buffer
    /// with the checksum field zeroed.
    pub fn encode(&self) -> Result<[u8; HEADER_PAGE_SIZE]> {
        if self.wal_offset < WAL_OFFSET {
            return Err(WaxError::InvalidHeader {
                reason: "wal_offset precedes header pages".into(),
            });
        }
        if self.wal_size == 0 {
            return Err(WaxError::InvalidHeader {
                reason: "wal_size must be non-zero".into(),
            });
        }

        let mut buf = [0u8; HEADER_PAGE_SIZE];
        buf[..MAGIC.len()].copy_from_slice(&MAGIC);
        buf[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&SPEC_VERSION.to_le_bytes());
        buf[SPEC_BYTES_OFFSET] = SPEC_MAJOR;
        buf[SPEC_BYTES_OFFSET + 1] = SPEC_MINOR;
        buf[HEADER_GENERATION_POS..HEADER_GENERATION_POS + 8]
            .copy_from_slice(&self.header_generation.to_le_bytes());
        buf[FILE_GENERATION_POS..FILE_GENERATION_POS + 8]
            .copy_from_slice(&self.file_generation.to_le_bytes());
        buf[FOOTER_OFFSET_POS..FOOTER_OFFSET_POS + 8]
            .copy_from_slice(&self.footer_offset.to_le_bytes());
        buf[WAL_OFFSET_POS..WAL_OFFSET_POS + 8].copy_from_slice(&self.wal_offset.to_le_bytes());
        buf[WAL_SIZE_POS..WAL_SIZE_POS + 8].copy_from_slice(&self.wal_size.to_le_bytes());
        buf[WAL_WRITE_POS..WAL_WRITE_POS + 8].copy_from_slice(&self.wal_write_pos.to_le_bytes());
        buf[WAL_CHECKPOINT_POS..WAL_CHECKPOINT_POS + 8]
            .copy_from_slice(&self.wal_checkpoint_pos.to_le_bytes());
        buf[WAL_SEQUENCE_POS..WAL_SEQUENCE_POS + 8]
            .copy_from_slice(&self.wal_committed_seq.to_le_bytes());
        buf[TOC_CHECKSUM_POS..TOC_CHECKSUM_END].copy_from_slice(&self.toc_checksum);

        if let Some(snapshot) = &self.replay_snapshot {
            let span = &mut buf[SNAPSHOT_POS..SNAPSHOT_END];
            span[..8].copy_from_slice(&WAL_SNAPSHOT_MAGIC);
            for (index, value) in [
                snapshot.wal_write_pos,
                snapshot.wal_checkpoint_pos,
                snapshot.wal_committed_seq,
                snapshot.pending_records,
                snapshot.pending_bytes,
                snapshot.first_pending_pos,
                snapshot.first_pending_seq,
                0u64,
            ]
            .into_iter()
            .enumerate()
            {
                let start = 8 + index * 8;
                span[start..start + 8].copy_from_slice(&value.to_le_bytes());
            }
        }

        let digest = sha256(&buf);
        buf[HEADER_CHECKSUM_POS..HEADER_CHECKSUM_END].copy_from_slice(&digest);
        Ok(buf)
    }

    /// Decodes and validates one page: magic, spec version, checksum.
    pub fn decode(bytes: &[u8; HEADER_PAGE_SIZE]) -> Result<Self> {
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(WaxError::InvalidHeader {
                reason: "magic mismatch".into(),
            });
        }
        let version = u16::from_le_bytes(extract(bytes, VERSION_OFFSET)?);
        if version != SPEC_VERSION {
            return Err(WaxError::InvalidHeader {
                reason: "unsupported format version".into(),
            });
        }
        if bytes[SPEC_BYTES_OFFSET] != SPEC_MAJOR || bytes[SPEC_BYTES_OFFSET + 1] != SPEC_MINOR {
            return Err(WaxError::InvalidHeader {
                reason: "spec byte mismatch".into(),
            });
        }

        let stored_checksum: [u8; 32] = extract(bytes, HEADER_CHECKSUM_POS)?;
        let mut zeroed = *bytes;
        zeroed[HEADER_CHECKSUM_POS..HEADER_CHECKSUM_END].fill(0);
        if sha256(&zeroed) != stored_checksum {
            return Err(WaxError::ChecksumMismatch {
                context: "header page",
            });
        }

        let wal_offset = u64::from_le_bytes(extract(bytes, WAL_OFFSET_POS)?);
        if wal_offset < WAL_OFFSET {
            return Err(WaxError::InvalidHeader {
                reason: "wal_offset precedes header pages".into(),
            });
        }
        let wal_size = u64::from_le_bytes(extract(bytes, WAL_SIZE_POS)?);
        if wal_size == 0 {
            return Err(WaxError::InvalidHeader {
                reason: "wal_size must be non-zero".into(),
            });
        }

        let snapshot_span = &bytes[SNAPSHOT_POS..SNAPSHOT_END];
        let replay_snapshot = if snapshot_span[..8] == WAL_SNAPSHOT_MAGIC {
            let word = |index: usize| -> u64 {
                let start = 8 + index * 8;
                u64::from_le_bytes(snapshot_span[start..start + 8].try_into().expect("8 bytes"))
            };
            Some(WalReplaySnapshot {
                wal_write_pos: word(0),
                wal_checkpoint_pos: word(1),
                wal_committed_seq: word(2),
                pending_records: word(3),
                pending_bytes: word(4),
                first_pending_pos: word(5),
                first_pending_seq: word(6),
            })
        } else if snapshot_span.iter().all(|byte| *byte == 0) {
            None
        } else {
            return Err(WaxError::InvalidHeader {
                reason: "replay snapshot magic mismatch".into(),
            });
        };

        Ok(Self {
            format_version: version,
            header_generation: u64::from_le_bytes(extract(bytes, HEADER_GENERATION_POS)?),
            file_generation: u64::from_le_bytes(extract(bytes, FILE_GENERATION_POS)?),
            footer_offset: u64::from_le_bytes(extract(bytes, FOOTER_OFFSET_POS)?),
            wal_offset,
            wal_size,
            wal_write_pos: u64::from_le_bytes(extract(bytes, WAL_WRITE_POS)?),
            wal_checkpoint_pos: u64::from_le_bytes(extract(bytes, WAL_CHECKPOINT_POS)?),
            wal_committed_seq: u64::from_le_bytes(extract(bytes, WAL_SEQUENCE_POS)?),
            toc_checksum: extract(bytes, TOC_CHECKSUM_POS)?,
            replay_snapshot,
        })
    }

    /// Writes this page into `slot`. The caller fsyncs.
    pub fn write_to(&self, device: &BlockDevice, slot: HeaderSlot) -> Result<()> {
        let bytes = self.encode()?;
        device.write_all(&bytes, slot.offset())
    }
}

fn extract<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|span| span.try_into().ok())
        .ok_or(WaxError::InvalidHeader {
            reason: "header truncated".into(),
        })
}

/// Reads both pages and selects the valid one with the highest
/// header-page generation. Fails with `HeaderCorrupt` when neither
/// page is usable.
pub fn select_active(device: &BlockDevice) -> Result<(HeaderPage, HeaderSlot)> {
    let read_slot = |slot: HeaderSlot| -> Result<HeaderPage> {
        let mut buf = [0u8; HEADER_PAGE_SIZE];
        device.read_exactly(&mut buf, slot.offset())?;
        HeaderPage::decode(&buf)
    };

    let page_a = read_slot(HeaderSlot::A);
    let page_b = read_slot(HeaderSlot::B);
    if let Err(err) = &page_a {
        tracing::debug!(error = %err, "header page A rejected");
    }
    if let Err(err) = &page_b {
        tracing::debug!(error = %err, "header page B rejected");
    }

    match (page_a.ok(), page_b.ok()) {
        (Some(a), Some(b)) => {
            if a.header_generation >= b.header_generation {
                Ok((a, HeaderSlot::A))
            } else {
                Ok((b, HeaderSlot::B))
            }
        }
        (Some(a), None) => Ok((a, HeaderSlot::A)),
        (None, Some(b)) => Ok((b, HeaderSlot::B)),
        (None, None) => Err(WaxError::HeaderCorrupt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_header() -> HeaderPage {
        HeaderPage {
            format_version: SPEC_VERSION,
            header_generation: 3,
            file_generation: 2,
            footer_offset: 1_048_576,
            wal_offset: WAL_OFFSET,
            wal_size: 4 * 1024 * 1024,
            wal_write_pos: WAL_OFFSET + 96,
            wal_checkpoint_pos: WAL_OFFSET,
            wal_committed_seq: 42,
            toc_checksum: [0xAB; 32],
            replay_snapshot: None,
        }
    }

    #[test]
    fn roundtrip_encode_decode() {
        let header = sample_header();
        let bytes = header.encode().unwrap();
        let decoded = HeaderPage::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut header = sample_header();
        header.replay_snapshot = Some(WalReplaySnapshot {
            wal_write_pos: WAL_OFFSET + 96,
            wal_checkpoint_pos: WAL_OFFSET,
            wal_committed_seq: 42,
            pending_records: 1,
            pending_bytes: 96,
            first_pending_pos: WAL_OFFSET,
            first_pending_seq: 43,
        });
        let bytes = header.encode().unwrap();
        assert_eq!(HeaderPage::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn reject_flipped_checksum() {
        let mut bytes = sample_header().encode().unwrap();
        bytes[FILE_GENERATION_POS] ^= 0xFF;
        let err = HeaderPage::decode(&bytes).unwrap_err();
        matches!(err, WaxError::ChecksumMismatch { .. })
            .then_some(())
            .expect("checksum error");
    }

    #[test]
    fn reject_foreign_magic() {
        let mut bytes = sample_header().encode().unwrap();
        bytes[..4].copy_from_slice(b"MV2S");
        assert!(HeaderPage::decode(&bytes).is_err());
    }

    #[test]
    fn select_prefers_higher_generation() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::create_new(&dir.path().join("h.wax")).unwrap();
        let mut low = sample_header();
        low.header_generation = 5;
        let mut high = sample_header();
        high.header_generation = 6;
        low.write_to(&device, HeaderSlot::A).unwrap();
        high.write_to(&device, HeaderSlot::B).unwrap();
        let (selected, slot) = select_active(&device).unwrap();
        assert_eq!(slot, HeaderSlot::B);
        assert_eq!(selected.header_generation, 6);
    }

    #[test]
    fn select_survives_one_corrupt_page() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::create_new(&dir.path().join("h.wax")).unwrap();
        let header = sample_header();
        header.write_to(&device, HeaderSlot::A).unwrap();
        // Slot B is garbage.
        device.write_all(&[0xEE; HEADER_PAGE_SIZE], HEADER_B_OFFSET).unwrap();
        let (_, slot) = select_active(&device).unwrap();
        assert_eq!(slot, HeaderSlot::A);
    }

    #[test]
    fn select_fails_when_both_invalid() {
        let dir = tempdir().unwrap();
        let device = BlockDevice::create_new(&dir.path().join("h.wax")).unwrap();
        device.ensure_size(2 * HEADER_PAGE_SIZE as u64).unwrap();
        let err = select_active(&device).unwrap_err();
        matches!(err, WaxError::HeaderCorrupt)
            .then_some(())
            .expect("header corrupt error");
    }
}
