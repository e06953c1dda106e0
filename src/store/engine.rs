//! Synchronous store engine.
//!
//! Owns the device, the active header, the WAL ring, the committed
//! catalog, and the pending mutation queue. All methods run on the
//! blocking I/O pool; the async coordinator in `store::mod` never
//! touches the file directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::checksum::sha256;
use crate::codec::{ByteReader, ByteWriter, MAX_BLOB_BYTES};
use crate::compress;
use crate::config::StoreOptions;
use crate::constants::{
    FOOTER_SIZE, HEADER_PAGE_SIZE, WAL_OFFSET, WAL_SIZE_MIN,
};
use crate::error::{Result, WaxError};
use crate::footer::CommitFooter;
use crate::io::device::BlockDevice;
use crate::io::fault::{self, CommitCheckpoint};
use crate::io::header::{HeaderPage, HeaderSlot, WalReplaySnapshot};
use crate::io::wal::WalRing;
use crate::lock::{FileLock, LockMode};
use crate::store::recovery;
use crate::toc::{Toc, TOC_VERSION};
use crate::types::{
    EmbeddingsManifest, FrameDraft, FrameId, FrameMeta, FrameStatus, IndexKind, IndexManifest,
    PayloadSource, SegmentEntry, Stats, TimeIndexManifest, WalEntry, WalStats,
};

/// A mutation that has reached the WAL but not yet a commit.
#[derive(Debug, Clone)]
pub(crate) enum PendingOp {
    PutFrame { meta: FrameMeta, stored: Vec<u8> },
    DeleteFrame { frame_id: FrameId, at_ms: i64 },
    Supersede { old: FrameId, new: FrameId },
    PutEmbedding {
        frame_id: FrameId,
        dimension: u32,
        vector: Vec<f32>,
    },
}

#[derive(Debug)]
struct StagedLexIndex {
    bytes: Vec<u8>,
    doc_count: u64,
}

#[derive(Debug)]
struct StagedVectorIndex {
    bytes: Vec<u8>,
    dimension: u32,
    count: u64,
}

#[derive(Debug)]
pub(crate) struct Engine {
    device: BlockDevice,
    #[allow(dead_code)]
    path: PathBuf,
    options: StoreOptions,
    _file_lock: Option<FileLock>,
    read_only: bool,
    active_slot: HeaderSlot,
    header: HeaderPage,
    wal: WalRing,
    toc: Toc,
    pending: Vec<PendingOp>,
    staged_lex: Option<StagedLexIndex>,
    staged_vector: Option<StagedVectorIndex>,
    /// Byte offset where the next commit begins writing payload data.
    data_end: u64,
    /// Set when a commit failed after its first durable write; only a
    /// reopen may serve writes again.
    poisoned: bool,
}

impl Engine {
    /// Initializes a fresh store file: headers A+B, zeroed WAL region,
    /// empty TOC, footer at generation 1.
    pub(crate) fn create(path: &Path, wal_size: u64, options: StoreOptions) -> Result<Self> {
        if wal_size < WAL_SIZE_MIN {
            return Err(WaxError::InvalidHeader {
                reason: "wal_size below minimum".into(),
            });
        }
        let device = match BlockDevice::create_new(path) {
            Ok(device) => device,
            Err(WaxError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::AlreadyExists =>
            {
                let existing = BlockDevice::open(path)?;
                if existing.size()? != 0 {
                    return Err(WaxError::PathConflict {
                        path: path.to_path_buf(),
                    });
                }
                existing
            }
            Err(err) => return Err(err),
        };
        let file_lock = FileLock::acquire(device.raw_file(), LockMode::Exclusive)?;

        // The WAL region reads as zeros straight from allocation, which
        // is exactly the sentinel pattern the scanner expects.
        device.ensure_size(WAL_OFFSET + wal_size)?;

        let mut toc = Toc {
            toc_version: TOC_VERSION,
            ..Toc::default()
        };
        let toc_bytes = toc.encode()?;
        let toc_offset = WAL_OFFSET + wal_size;
        device.write_all(&toc_bytes, toc_offset)?;
        let footer_offset = toc_offset + toc_bytes.len() as u64;
        let footer = CommitFooter {
            toc_len: toc_bytes.len() as u64,
            toc_sha256: toc.toc_checksum,
            generation: 1,
            wal_committed_seq: 0,
        };
        device.write_all(&footer.encode(), footer_offset)?;
        device.fsync_full()?;

        let header = HeaderPage {
            format_version: crate::constants::SPEC_VERSION,
            header_generation: 1,
            file_generation: 1,
            footer_offset,
            wal_offset: WAL_OFFSET,
            wal_size,
            wal_write_pos: WAL_OFFSET,
            wal_checkpoint_pos: WAL_OFFSET,
            wal_committed_seq: 0,
            toc_checksum: toc.toc_checksum,
            replay_snapshot: None,
        };
        let mut mirror = header.clone();
        mirror.header_generation = 0;
        // Both pages land through one scoped mapping of the file head.
        {
            let mut region = device.map_writable(0, 2 * HEADER_PAGE_SIZE)?;
            region.as_mut_slice()[..HEADER_PAGE_SIZE].copy_from_slice(&header.encode()?);
            region.as_mut_slice()[HEADER_PAGE_SIZE..].copy_from_slice(&mirror.encode()?);
            region.flush()?;
        }
        device.fsync_full()?;

        let wal = WalRing::new(WAL_OFFSET, wal_size, options.wal_fsync_policy);
        tracing::debug!(path = %path.display(), wal_size, "created store");
        Ok(Self {
            device,
            path: path.to_path_buf(),
            options,
            _file_lock: Some(file_lock),
            read_only: false,
            active_slot: HeaderSlot::A,
            header,
            wal,
            toc,
            pending: Vec::new(),
            staged_lex: None,
            staged_vector: None,
            data_end: footer_offset + FOOTER_SIZE as u64,
            poisoned: false,
        })
    }

    /// Opens an existing store, running crash recovery first.
    pub(crate) fn open(path: &Path, options: StoreOptions) -> Result<Self> {
        let device = if options.read_only {
            BlockDevice::open_read_only(path)?
        } else {
            BlockDevice::open(path)?
        };
        // Writers arbitrate through an exclusive whole-file lock.
        // Read-only opens stay lock-free: the append-only commit
        // protocol plus A/B header selection already give readers a
        // crash-consistent snapshot, and a reader-held lock would keep
        // writers out entirely.
        let file_lock = if options.read_only {
            None
        } else {
            match FileLock::try_acquire(device.raw_file(), LockMode::Exclusive)? {
                Some(lock) => Some(lock),
                None => return Err(WaxError::WriterBusy),
            }
        };

        let recovered = recovery::recover(&device, &options)?;
        tracing::debug!(
            path = %path.display(),
            generation = recovered.header.file_generation,
            pending = recovered.pending.len(),
            "opened store"
        );
        Ok(Self {
            device,
            path: path.to_path_buf(),
            read_only: options.read_only,
            options,
            _file_lock: file_lock,
            active_slot: recovered.slot,
            header: recovered.header,
            wal: recovered.wal,
            toc: recovered.toc,
            pending: recovered.pending,
            staged_lex: None,
            staged_vector: None,
            data_end: recovered.data_end,
            poisoned: false,
        })
    }

    pub(crate) fn device(&self) -> &BlockDevice {
        &self.device
    }

    pub(crate) fn toc(&self) -> &Toc {
        &self.toc
    }

    pub(crate) fn generation(&self) -> u64 {
        self.header.file_generation
    }

    pub(crate) fn payload_floor(&self) -> u64 {
        self.header.wal_offset + self.header.wal_size
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(WaxError::ReadOnly);
        }
        if self.poisoned {
            return Err(WaxError::CommitPoisoned);
        }
        Ok(())
    }

    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0)
    }

    /// Number of frames the next commit will catalogue.
    fn effective_frame_count(&self) -> u64 {
        let pending_puts = self
            .pending
            .iter()
            .filter(|op| matches!(op, PendingOp::PutFrame { .. }))
            .count() as u64;
        self.toc.frames.len() as u64 + pending_puts
    }

    /// Status of a frame as the next commit would see it.
    fn effective_status(&self, frame_id: FrameId) -> Option<(FrameStatus, Option<FrameId>)> {
        let mut found = self
            .toc
            .frames
            .get(frame_id as usize)
            .map(|meta| (meta.status, meta.superseded_by));
        for op in &self.pending {
            match op {
                PendingOp::PutFrame { meta, .. } if meta.id == frame_id => {
                    found = Some((meta.status, meta.superseded_by));
                }
                PendingOp::DeleteFrame { frame_id: id, .. } if *id == frame_id => {
                    if let Some(state) = found.as_mut() {
                        state.0 = FrameStatus::Deleted;
                    }
                }
                PendingOp::Supersede { old, new } if *old == frame_id => {
                    if let Some(state) = found.as_mut() {
                        state.1 = Some(*new);
                    }
                }
                _ => {}
            }
        }
        found
    }

    // ------------------------------------------------------------------
    // Writer operations (lease held by the caller)
    // ------------------------------------------------------------------

    pub(crate) fn put(&mut self, canonical: &[u8], draft: FrameDraft) -> Result<FrameId> {
        self.check_writable()?;
        if canonical.len() as u64 > MAX_BLOB_BYTES {
            return Err(WaxError::DecodeBound {
                what: "blob bytes",
                limit: MAX_BLOB_BYTES,
                actual: canonical.len() as u64,
            });
        }
        let stored = compress::compress(canonical, draft.encoding)?;
        let frame_id = self.effective_frame_count();
        let meta = FrameMeta {
            id: frame_id,
            timestamp: draft.timestamp,
            anchor_ts: draft.anchor_ts,
            uri: draft.uri,
            title: draft.title,
            payload_offset: 0,
            stored_length: stored.len() as u64,
            canonical_length: canonical.len() as u64,
            canonical_encoding: draft.encoding,
            canonical_sha256: sha256(canonical),
            stored_sha256: sha256(&stored),
            role: draft.role,
            parent_id: draft.parent_id,
            supersedes: None,
            superseded_by: None,
            status: FrameStatus::Active,
            tags: draft.tags,
            labels: draft.labels,
            metadata: draft.metadata,
            search_text: draft.search_text,
            content_dates: draft.content_dates,
            chunk_index: draft.chunk_index,
            chunk_count: draft.chunk_count,
            chunk_manifest: None,
        };
        let entry = WalEntry::PutFrame {
            meta: meta.clone(),
            payload: PayloadSource::Inline(stored.clone()),
        };
        self.wal.append(&self.device, &entry.encode())?;
        self.pending.push(PendingOp::PutFrame { meta, stored });
        self.maybe_proactive_commit()?;
        Ok(frame_id)
    }

    pub(crate) fn delete(&mut self, frame_id: FrameId) -> Result<()> {
        self.check_writable()?;
        match self.effective_status(frame_id) {
            None => return Err(WaxError::FrameNotFound { frame_id }),
            Some((FrameStatus::Deleted, _)) => {
                return Err(WaxError::InvalidFrame {
                    frame_id,
                    reason: "frame is already deleted",
                });
            }
            Some((FrameStatus::Active, _)) => {}
        }
        let at_ms = Self::now_ms();
        let entry = WalEntry::DeleteFrame { frame_id, at_ms };
        self.wal.append(&self.device, &entry.encode())?;
        self.pending.push(PendingOp::DeleteFrame { frame_id, at_ms });
        self.maybe_proactive_commit()?;
        Ok(())
    }

    pub(crate) fn supersede(&mut self, old: FrameId, new: FrameId) -> Result<()> {
        self.check_writable()?;
        if old == new {
            return Err(WaxError::InvalidFrame {
                frame_id: old,
                reason: "a frame cannot supersede itself",
            });
        }
        let old_state = self
            .effective_status(old)
            .ok_or(WaxError::FrameNotFound { frame_id: old })?;
        if old_state.1.is_some() {
            return Err(WaxError::InvalidFrame {
                frame_id: old,
                reason: "frame is already superseded",
            });
        }
        if self.effective_status(new).is_none() {
            return Err(WaxError::FrameNotFound { frame_id: new });
        }
        let entry = WalEntry::SupersedeFrame { old, new };
        self.wal.append(&self.device, &entry.encode())?;
        self.pending.push(PendingOp::Supersede { old, new });
        self.maybe_proactive_commit()?;
        Ok(())
    }

    pub(crate) fn put_embedding(&mut self, frame_id: FrameId, vector: Vec<f32>) -> Result<()> {
        self.check_writable()?;
        if vector.is_empty() {
            return Err(WaxError::InvalidFrame {
                frame_id,
                reason: "embedding vector is empty",
            });
        }
        if self.effective_status(frame_id).is_none() {
            return Err(WaxError::FrameNotFound { frame_id });
        }
        let dimension = vector.len() as u32;
        let entry = WalEntry::PutEmbedding {
            frame_id,
            dimension,
            vector: vector.clone(),
        };
        self.wal.append(&self.device, &entry.encode())?;
        self.pending.push(PendingOp::PutEmbedding {
            frame_id,
            dimension,
            vector,
        });
        self.maybe_proactive_commit()?;
        Ok(())
    }

    pub(crate) fn stage_lex_index(&mut self, bytes: Vec<u8>, doc_count: u64) -> Result<()> {
        self.check_writable()?;
        if bytes.len() as u64 > MAX_BLOB_BYTES {
            return Err(WaxError::IndexTooLarge {
                kind: IndexKind::Lex,
                limit: MAX_BLOB_BYTES,
                actual: bytes.len() as u64,
            });
        }
        self.staged_lex = Some(StagedLexIndex { bytes, doc_count });
        Ok(())
    }

    pub(crate) fn stage_vector_index(
        &mut self,
        bytes: Vec<u8>,
        dimension: u32,
        count: u64,
    ) -> Result<()> {
        self.check_writable()?;
        if bytes.len() as u64 > MAX_BLOB_BYTES {
            return Err(WaxError::IndexTooLarge {
                kind: IndexKind::Vector,
                limit: MAX_BLOB_BYTES,
                actual: bytes.len() as u64,
            });
        }
        if bytes.len() as u64 != u64::from(dimension) * count * 4 {
            return Err(WaxError::DecodeInvalid {
                context: "vector index blob",
                reason: "length does not equal dimension * count * 4".into(),
            });
        }
        self.staged_vector = Some(StagedVectorIndex {
            bytes,
            dimension,
            count,
        });
        Ok(())
    }

    fn maybe_proactive_commit(&mut self) -> Result<()> {
        let Some(trigger) = self.options.proactive_commit_trigger(self.wal.size()) else {
            return Ok(());
        };
        if self.wal.pending_bytes() >= trigger {
            tracing::debug!(
                pending = self.wal.pending_bytes(),
                trigger,
                "proactive commit"
            );
            self.commit()?;
        }
        Ok(())
    }

    /// Discards every pending mutation and staged blob; nothing of the
    /// abandoned work remains replayable.
    pub(crate) fn abort(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.pending.clear();
        self.staged_lex = None;
        self.staged_vector = None;
        if !self.poisoned {
            self.wal.abort(&self.device)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------

    /// The six-step commit protocol. On any mid-flight failure the
    /// engine poisons itself; the on-disk state stays recoverable.
    pub(crate) fn commit(&mut self) -> Result<u64> {
        self.check_writable()?;
        if self.pending.is_empty() && self.staged_lex.is_none() && self.staged_vector.is_none() {
            return Ok(self.header.file_generation);
        }
        match self.commit_inner() {
            Ok(generation) => Ok(generation),
            Err(err) => {
                self.poisoned = true;
                tracing::warn!(error = %err, "commit failed mid-flight; store poisoned");
                Err(err)
            }
        }
    }

    fn commit_inner(&mut self) -> Result<u64> {
        // Step 2: all appended WAL records become durable.
        self.device.fsync_full()?;

        // Step 3a: materialize pending payloads and rebuild the catalog.
        let mut toc = self.toc.clone();
        let mut cursor = self.data_end;
        let mut embeddings: BTreeMap<FrameId, (u32, Vec<f32>)> = BTreeMap::new();
        for op in &self.pending {
            match op {
                PendingOp::PutFrame { meta, stored } => {
                    if meta.id != toc.frames.len() as u64 {
                        return Err(WaxError::InvalidToc {
                            reason: "pending frame id is not dense".into(),
                        });
                    }
                    self.device.write_all(stored, cursor)?;
                    let mut meta = meta.clone();
                    meta.payload_offset = cursor;
                    cursor += stored.len() as u64;
                    toc.frames.push(meta);
                }
                PendingOp::DeleteFrame { frame_id, .. } => {
                    let frame = toc
                        .frames
                        .get_mut(*frame_id as usize)
                        .ok_or(WaxError::FrameNotFound { frame_id: *frame_id })?;
                    frame.status = FrameStatus::Deleted;
                }
                PendingOp::Supersede { old, new } => {
                    if toc.frames.get(*new as usize).is_none() {
                        return Err(WaxError::FrameNotFound { frame_id: *new });
                    }
                    let old_frame = toc
                        .frames
                        .get_mut(*old as usize)
                        .ok_or(WaxError::FrameNotFound { frame_id: *old })?;
                    old_frame.superseded_by = Some(*new);
                    let new_frame = toc
                        .frames
                        .get_mut(*new as usize)
                        .ok_or(WaxError::FrameNotFound { frame_id: *new })?;
                    new_frame.supersedes = Some(*old);
                }
                PendingOp::PutEmbedding {
                    frame_id,
                    dimension,
                    vector,
                } => {
                    embeddings.insert(*frame_id, (*dimension, vector.clone()));
                }
            }
        }

        // Embeddings track: merge the prior track with newly staged vectors.
        if !embeddings.is_empty() {
            let mut merged = self.load_embeddings_track()?;
            merged.extend(embeddings);
            let (manifest, next) = self.write_embeddings_track(&merged, cursor)?;
            toc.embeddings = Some(manifest);
            cursor = next;
        }

        // Staged index blobs become catalogued segments.
        if let Some(staged) = self.staged_lex.take() {
            let (manifest, next) =
                self.write_index_segment(&mut toc, IndexKind::Lex, &staged.bytes, cursor)?;
            tracing::debug!(doc_count = staged.doc_count, bytes = staged.bytes.len(), "staged lex index");
            Self::replace_manifest(&mut toc, manifest);
            cursor = next;
        }
        if let Some(staged) = self.staged_vector.take() {
            let (manifest, next) =
                self.write_index_segment(&mut toc, IndexKind::Vector, &staged.bytes, cursor)?;
            tracing::debug!(
                dimension = staged.dimension,
                count = staged.count,
                "staged vector index"
            );
            Self::replace_manifest(&mut toc, manifest);
            cursor = next;
        }

        // Time index track over active frames with timestamps.
        let (time_manifest, next) = self.write_time_track(&toc, cursor)?;
        toc.time_index = time_manifest;
        cursor = next;

        // Step 3b: serialize and persist the TOC.
        let toc_offset = cursor;
        let toc_bytes = toc.encode()?;
        self.device.write_all(&toc_bytes, toc_offset)?;
        self.device.fsync_full()?;
        fault::observe_checkpoint(CommitCheckpoint::AfterTocWriteBeforeFooter)?;

        // Step 4: footer.
        let last_sequence = self.wal.last_appended_sequence();
        let generation = self.header.file_generation + 1;
        let footer_offset = toc_offset + toc_bytes.len() as u64;
        let footer = CommitFooter {
            toc_len: toc_bytes.len() as u64,
            toc_sha256: toc.toc_checksum,
            generation,
            wal_committed_seq: last_sequence,
        };
        self.device.write_all(&footer.encode(), footer_offset)?;
        self.device.fsync_full()?;
        fault::observe_checkpoint(CommitCheckpoint::AfterFooterFsyncBeforeHeader)?;

        // Step 5: flip the inactive header page.
        let new_header = HeaderPage {
            format_version: crate::constants::SPEC_VERSION,
            header_generation: self.header.header_generation + 1,
            file_generation: generation,
            footer_offset,
            wal_offset: self.header.wal_offset,
            wal_size: self.header.wal_size,
            wal_write_pos: self.wal.write_pos(),
            wal_checkpoint_pos: self.wal.write_pos(),
            wal_committed_seq: last_sequence,
            toc_checksum: toc.toc_checksum,
            replay_snapshot: self
                .options
                .wal_replay_state_snapshot_enabled
                .then(|| WalReplaySnapshot {
                    wal_write_pos: self.wal.write_pos(),
                    wal_checkpoint_pos: self.wal.write_pos(),
                    wal_committed_seq: last_sequence,
                    pending_records: 0,
                    pending_bytes: 0,
                    first_pending_pos: self.wal.write_pos(),
                    first_pending_seq: last_sequence + 1,
                }),
        };
        new_header.write_to(&self.device, self.active_slot.other())?;
        fault::observe_checkpoint(CommitCheckpoint::AfterHeaderWriteBeforeFinalFsync)?;

        // Step 6: the flip becomes durable.
        self.device.fsync_full()?;

        self.active_slot = self.active_slot.other();
        self.header = new_header;
        self.toc = toc;
        self.wal.mark_committed(last_sequence);
        self.pending.clear();
        self.data_end = footer_offset + FOOTER_SIZE as u64;
        tracing::debug!(generation, frames = self.toc.frames.len(), "commit");
        Ok(generation)
    }

    fn replace_manifest(toc: &mut Toc, manifest: IndexManifest) {
        if let Some(old) = toc
            .indexes
            .iter()
            .position(|existing| existing.kind == manifest.kind)
        {
            let replaced = toc.indexes.remove(old);
            toc.segment_catalog
                .entries
                .retain(|entry| entry.segment_id != replaced.segment_id);
        }
        toc.indexes.push(manifest);
    }

    fn write_index_segment(
        &self,
        toc: &mut Toc,
        kind: IndexKind,
        bytes: &[u8],
        cursor: u64,
    ) -> Result<(IndexManifest, u64)> {
        let segment_id = toc.segment_catalog.next_segment_id();
        self.device.write_all(bytes, cursor)?;
        let digest = sha256(bytes);
        toc.segment_catalog.entries.push(SegmentEntry {
            segment_id,
            offset: cursor,
            length: bytes.len() as u64,
            sha256: digest,
        });
        Ok((
            IndexManifest {
                segment_id,
                kind,
                length: bytes.len() as u64,
                sha256: digest,
            },
            cursor + bytes.len() as u64,
        ))
    }

    fn write_time_track(
        &self,
        toc: &Toc,
        cursor: u64,
    ) -> Result<(Option<TimeIndexManifest>, u64)> {
        let mut entries: Vec<(i64, FrameId)> = toc
            .frames
            .iter()
            .filter(|frame| frame.status == FrameStatus::Active)
            .filter_map(|frame| {
                frame
                    .anchor_ts
                    .or(frame.timestamp)
                    .map(|ts| (ts, frame.id))
            })
            .collect();
        if entries.is_empty() {
            return Ok((None, cursor));
        }
        entries.sort_unstable();
        let mut writer = ByteWriter::with_capacity(8 + entries.len() * 16);
        writer.put_u64(entries.len() as u64);
        for (timestamp, frame_id) in &entries {
            writer.put_i64(*timestamp);
            writer.put_u64(*frame_id);
        }
        let bytes = writer.into_bytes();
        self.device.write_all(&bytes, cursor)?;
        let manifest = TimeIndexManifest {
            offset: cursor,
            length: bytes.len() as u64,
            entry_count: entries.len() as u64,
            sha256: sha256(&bytes),
        };
        Ok((Some(manifest), cursor + bytes.len() as u64))
    }

    fn load_embeddings_track(&self) -> Result<BTreeMap<FrameId, (u32, Vec<f32>)>> {
        let Some(manifest) = &self.toc.embeddings else {
            return Ok(BTreeMap::new());
        };
        let bytes = self.read_verified_span(manifest.offset, manifest.length, manifest.sha256,
            "embeddings track")?;
        decode_embeddings_track(&bytes)
    }

    fn write_embeddings_track(
        &self,
        entries: &BTreeMap<FrameId, (u32, Vec<f32>)>,
        cursor: u64,
    ) -> Result<(EmbeddingsManifest, u64)> {
        let mut writer = ByteWriter::new();
        writer.put_u64(entries.len() as u64);
        for (frame_id, (dimension, vector)) in entries {
            writer.put_u64(*frame_id);
            writer.put_u32(*dimension);
            writer.put_array_len(vector.len());
            for value in vector {
                writer.put_f32(*value);
            }
        }
        let bytes = writer.into_bytes();
        self.device.write_all(&bytes, cursor)?;
        let manifest = EmbeddingsManifest {
            offset: cursor,
            length: bytes.len() as u64,
            entry_count: entries.len() as u64,
            sha256: sha256(&bytes),
        };
        Ok((manifest, cursor + bytes.len() as u64))
    }

    fn read_verified_span(
        &self,
        offset: u64,
        length: u64,
        expected: [u8; 32],
        context: &'static str,
    ) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; length as usize];
        self.device.read_exactly(&mut bytes, offset)?;
        if sha256(&bytes) != expected {
            return Err(WaxError::ChecksumMismatch { context });
        }
        Ok(bytes)
    }

    // ------------------------------------------------------------------
    // Read operations (committed state only)
    // ------------------------------------------------------------------

    pub(crate) fn embedding(&self, frame_id: FrameId) -> Result<Option<Vec<f32>>> {
        let track = self.load_embeddings_track()?;
        Ok(track.get(&frame_id).map(|(_, vector)| vector.clone()))
    }

    pub(crate) fn index_blob(&self, kind: IndexKind) -> Result<Vec<u8>> {
        let manifest = self
            .toc
            .indexes
            .iter()
            .find(|manifest| manifest.kind == kind)
            .ok_or(WaxError::IndexNotFound { kind })?;
        let entry = self
            .toc
            .segment_catalog
            .find(manifest.segment_id)
            .ok_or(WaxError::IndexNotFound { kind })?;
        self.read_verified_span(entry.offset, entry.length, entry.sha256, "index segment")
    }

    pub(crate) fn timeline(&self) -> Result<Vec<(i64, FrameId)>> {
        let Some(manifest) = &self.toc.time_index else {
            return Ok(Vec::new());
        };
        let bytes = self.read_verified_span(
            manifest.offset,
            manifest.length,
            manifest.sha256,
            "time index track",
        )?;
        let mut reader = ByteReader::new(&bytes);
        let count = reader.u64("time index track")?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let timestamp = reader.i64("time index track")?;
            let frame_id = reader.u64("time index track")?;
            entries.push((timestamp, frame_id));
        }
        reader.expect_end("time index track")?;
        Ok(entries)
    }

    pub(crate) fn stats(&self) -> Result<Stats> {
        let payload_bytes: u64 = self.toc.frames.iter().map(|frame| frame.stored_length).sum();
        let logical_bytes: u64 = self
            .toc
            .frames
            .iter()
            .map(|frame| frame.canonical_length)
            .sum();
        let active = self
            .toc
            .frames
            .iter()
            .filter(|frame| frame.status == FrameStatus::Active)
            .count() as u64;
        let live = self.toc.frames.iter().filter(|frame| frame.is_live()).count() as u64;
        Ok(Stats {
            frame_count: self.toc.frames.len() as u64,
            active_frame_count: active,
            live_frame_count: live,
            pending_ops: self.pending.len() as u64,
            generation: self.header.file_generation,
            header_generation: self.header.header_generation,
            payload_bytes,
            logical_bytes,
            file_bytes: self.device.size()?,
            wal: WalStats {
                size: self.wal.size(),
                write_pos: self.wal.write_pos(),
                checkpoint_pos: self.wal.checkpoint_pos(),
                pending_bytes: self.wal.pending_bytes(),
                committed_sequence: self.wal.committed_sequence(),
                next_sequence: self.wal.next_sequence(),
            },
        })
    }

    /// Queues an operation without a WAL record. Used only by the
    /// live-set rewriter, which builds a fresh file wholesale and
    /// commits once; the destination WAL starts clean.
    pub(crate) fn inject_pending(&mut self, op: PendingOp) {
        self.pending.push(op);
    }
}

/// Reads, verifies, and decompresses one frame payload. Shared between
/// the engine and coordinator snapshots, which read without locking.
pub(crate) fn read_frame_payload(
    device: &BlockDevice,
    meta: &FrameMeta,
    payload_floor: u64,
) -> Result<Vec<u8>> {
    if meta.status == FrameStatus::Deleted {
        return Err(WaxError::InvalidFrame {
            frame_id: meta.id,
            reason: "frame is deleted",
        });
    }
    if meta.stored_length == 0 {
        if meta.canonical_length == 0 {
            return Ok(Vec::new());
        }
        return Err(WaxError::InvalidFrame {
            frame_id: meta.id,
            reason: "payload not retained",
        });
    }
    if meta.payload_offset < payload_floor {
        return Err(WaxError::InvalidFrame {
            frame_id: meta.id,
            reason: "payload overlaps the wal region",
        });
    }
    let end = meta
        .payload_offset
        .checked_add(meta.stored_length)
        .ok_or(WaxError::InvalidFrame {
            frame_id: meta.id,
            reason: "payload range overflow",
        })?;
    if end > device.size()? {
        return Err(WaxError::InvalidFrame {
            frame_id: meta.id,
            reason: "payload extends past file length",
        });
    }

    let mut stored = vec![0u8; meta.stored_length as usize];
    device.read_exactly(&mut stored, meta.payload_offset)?;
    if sha256(&stored) != meta.stored_sha256 {
        return Err(WaxError::ChecksumMismatch {
            context: "stored payload",
        });
    }
    let canonical = compress::decompress(&stored, meta.canonical_encoding, meta.canonical_length)?;
    if sha256(&canonical) != meta.canonical_sha256 {
        return Err(WaxError::ChecksumMismatch {
            context: "canonical payload",
        });
    }
    Ok(canonical)
}

/// Decodes the embeddings track body.
pub(crate) fn decode_embeddings_track(
    bytes: &[u8],
) -> Result<BTreeMap<FrameId, (u32, Vec<f32>)>> {
    const CTX: &str = "embeddings track";
    let mut reader = ByteReader::new(bytes);
    let count = reader.u64(CTX)?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let frame_id = reader.u64(CTX)?;
        let dimension = reader.u32(CTX)?;
        let len = reader.array_len(CTX)?;
        let mut vector = Vec::with_capacity(len);
        for _ in 0..len {
            vector.push(reader.f32(CTX)?);
        }
        entries.insert(frame_id, (dimension, vector));
    }
    reader.expect_end(CTX)?;
    Ok(entries)
}
