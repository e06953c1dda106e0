//! Open-time crash recovery.
//!
//! Order of operations: select the newest valid header page, check the
//! file tail for a footer belonging to an interrupted-but-durable
//! commit (roll-forward), load and verify the TOC, then scan the WAL
//! past the checkpoint and reconstruct outstanding mutations as
//! pending operations.

use crate::checksum::sha256;
use crate::config::StoreOptions;
use crate::constants::{FOOTER_SCAN_WINDOW, FOOTER_SIZE};
use crate::error::{Result, WaxError};
use crate::footer::{self, CommitFooter};
use crate::io::device::BlockDevice;
use crate::io::header::{self, HeaderPage, HeaderSlot, WalReplaySnapshot};
use crate::io::wal::{PendingRecord, WalRing};
use crate::store::engine::PendingOp;
use crate::toc::Toc;
use crate::types::{PayloadSource, WalEntry};

#[derive(Debug)]
pub(crate) struct Recovered {
    pub header: HeaderPage,
    pub slot: HeaderSlot,
    pub toc: Toc,
    pub wal: WalRing,
    pub pending: Vec<PendingOp>,
    pub data_end: u64,
}

pub(crate) fn recover(device: &BlockDevice, options: &StoreOptions) -> Result<Recovered> {
    let (header, slot) = header::select_active(device)?;
    let file_len = device.size()?;

    if let Some((toc, footer_offset, footer)) = find_rollforward(device, &header, file_len)? {
        return adopt_commit(device, options, header, slot, toc, footer_offset, footer);
    }

    let toc = load_committed_toc(device, &header, file_len)?;

    if let Some(snapshot) = &header.replay_snapshot {
        cross_check_snapshot(snapshot, &header);
    }

    let scan = WalRing::scan(
        device,
        header.wal_offset,
        header.wal_size,
        header.wal_checkpoint_pos,
        header.wal_committed_seq,
        header.wal_committed_seq,
    )?;
    let (pending, rewind) = convert_pending(device, scan.pending)?;
    let (write_pos, next_sequence) = match rewind {
        Some((position, sequence)) => (position, sequence),
        None => (
            scan.write_pos,
            header.wal_committed_seq + pending.len() as u64 + 1,
        ),
    };
    if !pending.is_empty() {
        tracing::info!(count = pending.len(), "replaying uncommitted wal entries");
    }

    let wal = WalRing::recovered(
        header.wal_offset,
        header.wal_size,
        write_pos,
        header.wal_checkpoint_pos,
        header.wal_committed_seq,
        next_sequence,
        options.wal_fsync_policy,
    );
    let data_end = header.footer_offset + FOOTER_SIZE as u64;
    Ok(Recovered {
        header,
        slot,
        toc,
        wal,
        pending,
        data_end,
    })
}

/// Looks for a valid footer in the bounded tail window whose generation
/// is exactly one ahead of the active header: the durable remnant of an
/// interrupted commit.
fn find_rollforward(
    device: &BlockDevice,
    header: &HeaderPage,
    file_len: u64,
) -> Result<Option<(Toc, u64, CommitFooter)>> {
    let tail_begin = header.footer_offset + FOOTER_SIZE as u64;
    if file_len <= tail_begin {
        return Ok(None);
    }
    let scan_from = tail_begin.max(file_len.saturating_sub(FOOTER_SCAN_WINDOW));
    let mut window = vec![0u8; (file_len - scan_from) as usize];
    device.read_exactly(&mut window, scan_from)?;
    let Some(slice) = footer::find_last_valid_footer(&window) else {
        return Ok(None);
    };
    if slice.footer.generation != header.file_generation + 1 {
        if slice.footer.generation > header.file_generation + 1 {
            tracing::warn!(
                footer_generation = slice.footer.generation,
                header_generation = header.file_generation,
                "tail footer is more than one generation ahead; ignoring"
            );
        }
        return Ok(None);
    }
    match Toc::decode(slice.toc_bytes) {
        Ok(toc) => {
            let footer_offset = scan_from + slice.footer_offset as u64;
            Ok(Some((toc, footer_offset, slice.footer)))
        }
        Err(err) => {
            tracing::warn!(error = %err, "tail footer verified but its toc did not; ignoring");
            Ok(None)
        }
    }
}

/// Completes an interrupted commit whose TOC and footer reached the
/// disk: the catalog is adopted and the header flip finished before
/// the store serves traffic.
fn adopt_commit(
    device: &BlockDevice,
    options: &StoreOptions,
    header: HeaderPage,
    slot: HeaderSlot,
    toc: Toc,
    footer_offset: u64,
    footer: CommitFooter,
) -> Result<Recovered> {
    tracing::info!(
        generation = footer.generation,
        "completing interrupted commit found at the file tail"
    );

    // Records up to the adopted committed sequence are part of the
    // adopted catalog; corruption there is fatal, not tolerable.
    let scan = WalRing::scan(
        device,
        header.wal_offset,
        header.wal_size,
        header.wal_checkpoint_pos,
        header.wal_committed_seq,
        footer.wal_committed_seq,
    )?;
    let (pending, rewind) = convert_pending(device, scan.pending)?;
    let (write_pos, next_sequence) = match rewind {
        Some((position, sequence)) => (position, sequence),
        None => (
            scan.write_pos,
            footer.wal_committed_seq + pending.len() as u64 + 1,
        ),
    };

    let new_header = HeaderPage {
        format_version: crate::constants::SPEC_VERSION,
        header_generation: header.header_generation + 1,
        file_generation: footer.generation,
        footer_offset,
        wal_offset: header.wal_offset,
        wal_size: header.wal_size,
        wal_write_pos: write_pos,
        wal_checkpoint_pos: scan.checkpoint_pos,
        wal_committed_seq: footer.wal_committed_seq,
        toc_checksum: toc.toc_checksum,
        replay_snapshot: options
            .wal_replay_state_snapshot_enabled
            .then(|| WalReplaySnapshot {
                wal_write_pos: write_pos,
                wal_checkpoint_pos: scan.checkpoint_pos,
                wal_committed_seq: footer.wal_committed_seq,
                pending_records: pending.len() as u64,
                pending_bytes: 0,
                first_pending_pos: scan.checkpoint_pos,
                first_pending_seq: footer.wal_committed_seq + 1,
            }),
    };
    let slot = if options.read_only {
        // A shared open may not write; the adopted state is still
        // served from memory and the next writer completes the flip.
        slot
    } else {
        let target = slot.other();
        new_header.write_to(device, target)?;
        device.fsync_full()?;
        target
    };

    let wal = WalRing::recovered(
        header.wal_offset,
        header.wal_size,
        write_pos,
        scan.checkpoint_pos,
        footer.wal_committed_seq,
        next_sequence,
        options.wal_fsync_policy,
    );
    Ok(Recovered {
        header: new_header,
        slot,
        toc,
        wal,
        pending,
        data_end: footer_offset + FOOTER_SIZE as u64,
    })
}

/// Canonical path: trust the header, verify the footer it points to,
/// parse the TOC. Falls back to a bounded backward scan when the
/// header's footer offset is suspect.
fn load_committed_toc(device: &BlockDevice, header: &HeaderPage, file_len: u64) -> Result<Toc> {
    match load_toc_at(device, header, file_len) {
        Ok(toc) => Ok(toc),
        Err(err) => {
            tracing::warn!(
                error = %err,
                footer_offset = header.footer_offset,
                "header footer offset is suspect; scanning backwards"
            );
            rescan_for_toc(device, header, file_len).ok_or(err)
        }
    }
}

fn load_toc_at(device: &BlockDevice, header: &HeaderPage, file_len: u64) -> Result<Toc> {
    if header.footer_offset + FOOTER_SIZE as u64 > file_len {
        return Err(WaxError::InvalidFooter {
            offset: header.footer_offset,
        });
    }
    let mut footer_bytes = [0u8; FOOTER_SIZE];
    device.read_exactly(&mut footer_bytes, header.footer_offset)?;
    let footer = CommitFooter::decode(&footer_bytes).ok_or(WaxError::InvalidFooter {
        offset: header.footer_offset,
    })?;
    if footer.generation != header.file_generation || footer.toc_sha256 != header.toc_checksum {
        return Err(WaxError::InvalidFooter {
            offset: header.footer_offset,
        });
    }
    if footer.toc_len == 0 || footer.toc_len > header.footer_offset {
        return Err(WaxError::InvalidFooter {
            offset: header.footer_offset,
        });
    }
    let toc_offset = header.footer_offset - footer.toc_len;
    let mut toc_bytes = vec![0u8; footer.toc_len as usize];
    device.read_exactly(&mut toc_bytes, toc_offset)?;
    if sha256(&toc_bytes) != footer.toc_sha256 {
        return Err(WaxError::ChecksumMismatch { context: "toc" });
    }
    Toc::decode(&toc_bytes)
}

/// Walks the tail window backwards for a footer whose TOC hash matches
/// the active header.
fn rescan_for_toc(device: &BlockDevice, header: &HeaderPage, file_len: u64) -> Option<Toc> {
    let scan_from = file_len.saturating_sub(FOOTER_SCAN_WINDOW);
    let mut window = vec![0u8; (file_len - scan_from) as usize];
    device.read_exactly(&mut window, scan_from).ok()?;
    let mut search = window.as_slice();
    loop {
        let slice = footer::find_last_valid_footer(search)?;
        if slice.footer.toc_sha256 == header.toc_checksum
            && slice.footer.generation == header.file_generation
        {
            return Toc::decode(slice.toc_bytes).ok();
        }
        if slice.footer_offset == 0 {
            return None;
        }
        search = &search[..slice.footer_offset];
    }
}

fn cross_check_snapshot(snapshot: &WalReplaySnapshot, header: &HeaderPage) {
    if snapshot.wal_checkpoint_pos != header.wal_checkpoint_pos
        || snapshot.wal_committed_seq != header.wal_committed_seq
    {
        tracing::warn!("replay snapshot disagrees with header fields; scan stays authoritative");
    } else {
        tracing::debug!(
            first_pending_pos = snapshot.first_pending_pos,
            "replay snapshot matches header"
        );
    }
}

/// Decodes scanned records into pending operations. An undecodable
/// entry truncates the pending tail; its position and sequence rewind
/// the write cursor so later appends overwrite the dropped records.
fn convert_pending(
    device: &BlockDevice,
    records: Vec<PendingRecord>,
) -> Result<(Vec<PendingOp>, Option<(u64, u64)>)> {
    let mut ops = Vec::with_capacity(records.len());
    for record in records {
        let entry = match WalEntry::decode(&record.payload) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(
                    sequence = record.sequence,
                    error = %err,
                    "undecodable pending wal entry; dropping it and everything after"
                );
                return Ok((ops, Some((record.position, record.sequence))));
            }
        };
        let op = match entry {
            WalEntry::PutFrame { meta, payload } => {
                let stored = match payload {
                    PayloadSource::Inline(bytes) => bytes,
                    PayloadSource::Reference { offset, length } => {
                        let mut bytes = vec![0u8; length as usize];
                        device.read_exactly(&mut bytes, offset)?;
                        bytes
                    }
                };
                if sha256(&stored) != meta.stored_sha256 {
                    return Err(WaxError::WalCorruption {
                        offset: record.position,
                        reason: "put_frame payload does not match its recorded digest".into(),
                    });
                }
                PendingOp::PutFrame { meta, stored }
            }
            WalEntry::DeleteFrame { frame_id, at_ms } => {
                PendingOp::DeleteFrame { frame_id, at_ms }
            }
            WalEntry::SupersedeFrame { old, new } => PendingOp::Supersede { old, new },
            WalEntry::PutEmbedding {
                frame_id,
                dimension,
                vector,
            } => PendingOp::PutEmbedding {
                frame_id,
                dimension,
                vector,
            },
        };
        ops.push(op);
    }
    Ok((ops, None))
}
