//! Live-set rewrite (compaction).
//!
//! Produces a fresh store file holding the same frame id space, roles,
//! statuses, metadata, and supersede graph as the source, with payload
//! bytes retained only for frames that are active and not superseded.
//! The destination is validated and must be strictly smaller than the
//! source in retained payload bytes, otherwise it is rolled back.
//! Promotion (atomic rename over the source) belongs to a higher layer.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::checksum::sha256;
use crate::config::StoreOptions;
use crate::error::{Result, WaxError};
use crate::io::device::BlockDevice;
use crate::store::engine::{self, Engine, PendingOp};
use crate::toc::Toc;

/// Outcome of a successful live-set rewrite.
#[derive(Debug, Clone, Serialize)]
pub struct RewriteReport {
    pub dest_path: PathBuf,
    pub frame_count: u64,
    pub retained_payloads: u64,
    pub source_payload_bytes: u64,
    pub dest_payload_bytes: u64,
}

pub(crate) fn rewrite_live_set(
    source_toc: &Toc,
    source_device: &BlockDevice,
    payload_floor: u64,
    dest_path: &Path,
    wal_size: u64,
    options: StoreOptions,
) -> Result<RewriteReport> {
    let mut dest = Engine::create(dest_path, wal_size, options)?;
    match build_and_validate(source_toc, source_device, payload_floor, &mut dest) {
        Ok(mut report) => {
            report.dest_path = dest_path.to_path_buf();
            drop(dest);
            Ok(report)
        }
        Err(err) => {
            drop(dest);
            if let Err(cleanup) = std::fs::remove_file(dest_path) {
                tracing::warn!(error = %cleanup, "failed to remove rejected rewrite output");
            }
            Err(err)
        }
    }
}

fn build_and_validate(
    source_toc: &Toc,
    source_device: &BlockDevice,
    payload_floor: u64,
    dest: &mut Engine,
) -> Result<RewriteReport> {
    let mut source_payload_bytes = 0u64;
    let mut dest_payload_bytes = 0u64;
    let mut retained = 0u64;

    for frame in &source_toc.frames {
        source_payload_bytes += frame.stored_length;
        let mut meta = frame.clone();
        meta.payload_offset = 0;
        let stored = if frame.is_live() && frame.stored_length > 0 {
            if frame.payload_offset < payload_floor {
                return Err(WaxError::InvalidFrame {
                    frame_id: frame.id,
                    reason: "payload overlaps the wal region",
                });
            }
            let mut bytes = vec![0u8; frame.stored_length as usize];
            source_device.read_exactly(&mut bytes, frame.payload_offset)?;
            if sha256(&bytes) != frame.stored_sha256 {
                return Err(WaxError::ChecksumMismatch {
                    context: "stored payload",
                });
            }
            retained += 1;
            dest_payload_bytes += bytes.len() as u64;
            bytes
        } else {
            // Dead payloads keep their metadata but carry no bytes.
            meta.stored_length = 0;
            Vec::new()
        };
        dest.inject_pending(PendingOp::PutFrame { meta, stored });
    }
    dest.commit()?;

    // Validation pass against the destination file.
    let dest_toc = dest.toc();
    if dest_toc.frames.len() != source_toc.frames.len() {
        return Err(WaxError::RewriteFailed {
            reason: "frame count diverged".into(),
        });
    }
    for (source, copied) in source_toc.frames.iter().zip(&dest_toc.frames) {
        if copied.status != source.status
            || copied.supersedes != source.supersedes
            || copied.superseded_by != source.superseded_by
            || copied.search_text != source.search_text
            || copied.metadata != source.metadata
        {
            return Err(WaxError::RewriteFailed {
                reason: "frame metadata diverged".into(),
            });
        }
    }
    let floor = dest.payload_floor();
    for frame in &dest_toc.frames {
        if frame.is_live() && frame.stored_length > 0 {
            let canonical = engine::read_frame_payload(dest.device(), frame, floor)?;
            if sha256(&canonical) != frame.canonical_sha256 {
                return Err(WaxError::RewriteFailed {
                    reason: "retained payload hash diverged".into(),
                });
            }
        }
    }
    if dest_payload_bytes >= source_payload_bytes {
        return Err(WaxError::RewriteFailed {
            reason: "rewrite did not shrink the logical footprint".into(),
        });
    }

    tracing::debug!(
        frames = source_toc.frames.len(),
        retained,
        source_payload_bytes,
        dest_payload_bytes,
        "live-set rewrite complete"
    );
    Ok(RewriteReport {
        dest_path: PathBuf::new(),
        frame_count: source_toc.frames.len() as u64,
        retained_payloads: retained,
        source_payload_bytes,
        dest_payload_bytes,
    })
}
