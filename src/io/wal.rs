//! Embedded write-ahead log ring.
//!
//! A fixed-size circular byte region holds sequenced, checksummed
//! mutation records. Two cursors are persisted in the header pages:
//! `checkpoint_pos` (tail of durable-committed records) and `write_pos`
//! (head of the last append). Records never overwrite the pending
//! region; running out of room surfaces `WalFull` so the coordinator
//! can force a commit and retry.

use crate::checksum::sha256;
use crate::config::WalFsyncPolicy;
use crate::constants::WAL_RECORD_HEADER_SIZE;
use crate::error::{Result, WaxError};
use crate::io::device::BlockDevice;

/// Record flag bit 0: the record is ring padding, not data.
pub const FLAG_PADDING: u32 = 1;

/// Fixed 48-byte header preceding every WAL record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalRecordHeader {
    pub sequence: u64,
    pub payload_len: u32,
    pub flags: u32,
    pub payload_sha256: [u8; 32],
}

impl WalRecordHeader {
    #[must_use]
    pub fn encode(&self) -> [u8; WAL_RECORD_HEADER_SIZE] {
        let mut buf = [0u8; WAL_RECORD_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..48].copy_from_slice(&self.payload_sha256);
        buf
    }

    #[must_use]
    pub fn decode(bytes: &[u8; WAL_RECORD_HEADER_SIZE]) -> Self {
        let mut payload_sha256 = [0u8; 32];
        payload_sha256.copy_from_slice(&bytes[16..48]);
        Self {
            sequence: u64::from_le_bytes(bytes[0..8].try_into().expect("8 bytes")),
            payload_len: u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes")),
            flags: u32::from_le_bytes(bytes[12..16].try_into().expect("4 bytes")),
            payload_sha256,
        }
    }

    #[must_use]
    pub fn is_padding(&self) -> bool {
        self.flags & FLAG_PADDING != 0
    }
}

/// An all-zero header marks the end of valid records during a scan.
#[must_use]
pub fn is_sentinel(bytes: &[u8; WAL_RECORD_HEADER_SIZE]) -> bool {
    bytes.iter().all(|byte| *byte == 0)
}

/// One record recovered from the pending region.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub sequence: u64,
    /// Absolute file offset of the record header.
    pub position: u64,
    pub payload: Vec<u8>,
}

/// Where and why a tolerant scan stopped early.
#[derive(Debug, Clone)]
pub struct ScanStop {
    pub position: u64,
    pub reason: &'static str,
}

/// Outcome of scanning forward from a checkpoint.
#[derive(Debug)]
pub struct WalScan {
    /// Records past the strict range, in sequence order.
    pub pending: Vec<PendingRecord>,
    /// Position after the last strictly validated (committed) record.
    pub checkpoint_pos: u64,
    /// Position after the last valid record of any kind.
    pub write_pos: u64,
    /// Set when the scan ended on an inconsistent record rather than a
    /// sentinel; pending records before the stop are still usable.
    pub stopped: Option<ScanStop>,
}

/// Writer-side cursor state for the embedded ring.
#[derive(Debug)]
pub struct WalRing {
    offset: u64,
    size: u64,
    write_pos: u64,
    checkpoint_pos: u64,
    next_sequence: u64,
    committed_sequence: u64,
    bytes_since_fsync: u64,
    policy: WalFsyncPolicy,
}

impl WalRing {
    /// Fresh ring for a newly created store.
    #[must_use]
    pub fn new(offset: u64, size: u64, policy: WalFsyncPolicy) -> Self {
        Self {
            offset,
            size,
            write_pos: offset,
            checkpoint_pos: offset,
            next_sequence: 1,
            committed_sequence: 0,
            bytes_since_fsync: 0,
            policy,
        }
    }

    /// Ring state recovered from a header page plus scan results.
    #[must_use]
    pub fn recovered(
        offset: u64,
        size: u64,
        write_pos: u64,
        checkpoint_pos: u64,
        committed_sequence: u64,
        next_sequence: u64,
        policy: WalFsyncPolicy,
    ) -> Self {
        Self {
            offset,
            size,
            write_pos,
            checkpoint_pos,
            next_sequence,
            committed_sequence,
            bytes_since_fsync: 0,
            policy,
        }
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn write_pos(&self) -> u64 {
        self.write_pos
    }

    #[must_use]
    pub fn checkpoint_pos(&self) -> u64 {
        self.checkpoint_pos
    }

    #[must_use]
    pub fn committed_sequence(&self) -> u64 {
        self.committed_sequence
    }

    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    #[must_use]
    pub fn last_appended_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Bytes between the checkpoint and the write head in ring order.
    #[must_use]
    pub fn pending_bytes(&self) -> u64 {
        let rel_write = self.write_pos - self.offset;
        let rel_checkpoint = self.checkpoint_pos - self.offset;
        (rel_write + self.size - rel_checkpoint) % self.size
    }

    /// Largest payload a single record may carry in this ring.
    #[must_use]
    pub fn max_payload_bytes(&self) -> u64 {
        self.size - 2 * WAL_RECORD_HEADER_SIZE as u64
    }

    /// Appends one data record, wrapping and padding as needed.
    /// Returns the assigned sequence number.
    pub fn append(&mut self, device: &BlockDevice, payload: &[u8]) -> Result<u64> {
        let header_len = WAL_RECORD_HEADER_SIZE as u64;
        let record_len = header_len + payload.len() as u64;
        if record_len > self.size - header_len {
            return Err(WaxError::RecordTooLarge {
                record: record_len,
                capacity: self.size,
            });
        }

        let ring_end = self.offset + self.size;
        let contiguous = ring_end - self.write_pos;
        let padding = if contiguous < record_len { contiguous } else { 0 };
        let pending = self.pending_bytes();
        if pending + padding + record_len >= self.size {
            return Err(WaxError::WalFull {
                pending,
                capacity: self.size,
            });
        }

        if padding > 0 {
            if padding >= header_len {
                let pad_header = WalRecordHeader {
                    sequence: 0,
                    payload_len: (padding - header_len) as u32,
                    flags: FLAG_PADDING,
                    payload_sha256: [0u8; 32],
                };
                device.write_all(&pad_header.encode(), self.write_pos)?;
            } else {
                device.write_all(&vec![0u8; padding as usize], self.write_pos)?;
            }
            self.write_pos = self.offset;
        }

        let header = WalRecordHeader {
            sequence: self.next_sequence,
            payload_len: payload.len() as u32,
            flags: 0,
            payload_sha256: sha256(payload),
        };
        device.write_all(&header.encode(), self.write_pos)?;
        device.write_all(payload, self.write_pos + header_len)?;
        self.write_pos += record_len;
        if self.write_pos == ring_end {
            self.write_pos = self.offset;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        match self.policy {
            WalFsyncPolicy::Always => device.fsync_full()?,
            WalFsyncPolicy::OnCommit => {}
            WalFsyncPolicy::EveryBytes(floor) => {
                self.bytes_since_fsync += padding + record_len;
                if self.bytes_since_fsync >= floor {
                    device.fsync_full()?;
                    self.bytes_since_fsync = 0;
                }
            }
        }
        Ok(sequence)
    }

    /// Advances the checkpoint after a successful commit; everything up
    /// to the current write head is now reflected by the TOC.
    pub fn mark_committed(&mut self, sequence: u64) {
        self.checkpoint_pos = self.write_pos;
        self.committed_sequence = sequence;
        self.bytes_since_fsync = 0;
    }

    /// Discards uncommitted records: rewinds the write head to the
    /// checkpoint and stamps a sentinel so the abandoned records can
    /// never be replayed by a later recovery.
    pub fn abort(&mut self, device: &BlockDevice) -> Result<()> {
        if self.write_pos == self.checkpoint_pos && self.next_sequence == self.committed_sequence + 1
        {
            return Ok(());
        }
        let header_len = WAL_RECORD_HEADER_SIZE as u64;
        let ring_end = self.offset + self.size;
        let contiguous = ring_end - self.checkpoint_pos;
        let stamp = contiguous.min(header_len);
        device.write_all(&vec![0u8; stamp as usize], self.checkpoint_pos)?;
        if contiguous < header_len {
            // The scan wraps here without reading; kill the first
            // header past the wrap as well.
            device.write_all(&[0u8; WAL_RECORD_HEADER_SIZE], self.offset)?;
        }
        device.fsync_full()?;
        self.write_pos = self.checkpoint_pos;
        self.next_sequence = self.committed_sequence + 1;
        self.bytes_since_fsync = 0;
        Ok(())
    }

    /// Scans forward from `start_pos`. Records with sequence in
    /// `(base_sequence, strict_through]` belong to an adopted commit:
    /// any inconsistency there is fatal. Later records are pending and
    /// the scan stops tolerantly at the first inconsistent one.
    pub fn scan(
        device: &BlockDevice,
        offset: u64,
        size: u64,
        start_pos: u64,
        base_sequence: u64,
        strict_through: u64,
    ) -> Result<WalScan> {
        let header_len = WAL_RECORD_HEADER_SIZE as u64;
        let ring_end = offset + size;
        let mut pos = start_pos;
        let mut expected = base_sequence + 1;
        let mut consumed = 0u64;
        let mut pending = Vec::new();
        let mut checkpoint_pos = start_pos;
        let mut write_pos = start_pos;
        let mut stopped = None;

        loop {
            if consumed >= size {
                return Err(WaxError::WalCorruption {
                    offset: pos,
                    reason: "scan traversed the full ring without a sentinel".into(),
                });
            }
            let contiguous = ring_end - pos;
            if contiguous < header_len {
                consumed += contiguous;
                pos = offset;
                continue;
            }

            let mut header_bytes = [0u8; WAL_RECORD_HEADER_SIZE];
            device.read_exactly(&mut header_bytes, pos)?;
            if is_sentinel(&header_bytes) {
                break;
            }
            let header = WalRecordHeader::decode(&header_bytes);

            if header.is_padding() {
                let span = header_len + u64::from(header.payload_len);
                if span > contiguous {
                    stopped = Some(ScanStop {
                        position: pos,
                        reason: "padding record overruns ring end",
                    });
                    break;
                }
                consumed += span;
                pos += span;
                if pos == ring_end {
                    pos = offset;
                }
                continue;
            }

            let strict = expected <= strict_through;
            let span = header_len + u64::from(header.payload_len);
            if span > contiguous {
                if strict {
                    return Err(WaxError::WalCorruption {
                        offset: pos,
                        reason: "committed record overruns ring end".into(),
                    });
                }
                stopped = Some(ScanStop {
                    position: pos,
                    reason: "record overruns ring end",
                });
                break;
            }
            if header.sequence != expected {
                if strict {
                    return Err(WaxError::WalCorruption {
                        offset: pos,
                        reason: "committed record out of sequence".into(),
                    });
                }
                if header.sequence > expected {
                    stopped = Some(ScanStop {
                        position: pos,
                        reason: "record out of sequence",
                    });
                }
                // A lower sequence is a stale record from a previous
                // ring cycle; the pending region simply ends here.
                break;
            }

            let mut payload = vec![0u8; header.payload_len as usize];
            device.read_exactly(&mut payload, pos + header_len)?;
            if sha256(&payload) != header.payload_sha256 {
                if strict {
                    return Err(WaxError::WalCorruption {
                        offset: pos,
                        reason: "committed record checksum mismatch".into(),
                    });
                }
                stopped = Some(ScanStop {
                    position: pos,
                    reason: "record checksum mismatch",
                });
                break;
            }

            let record_pos = pos;
            consumed += span;
            pos += span;
            if pos == ring_end {
                pos = offset;
            }
            write_pos = pos;
            if strict {
                checkpoint_pos = pos;
            } else {
                pending.push(PendingRecord {
                    sequence: header.sequence,
                    position: record_pos,
                    payload,
                });
            }
            expected += 1;
        }

        if let Some(stop) = &stopped {
            tracing::warn!(
                position = stop.position,
                reason = stop.reason,
                "wal scan stopped before a sentinel"
            );
        }
        Ok(WalScan {
            pending,
            checkpoint_pos,
            write_pos,
            stopped,
        })
    }
}
