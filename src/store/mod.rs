//! Store coordinator.
//!
//! The async surface over the synchronous engine. All file I/O runs on
//! the blocking pool; readers resolve frames against a reference-counted
//! catalog snapshot published at commit time, so a commit never moves
//! the ground under a reader that has already resolved its view.

mod engine;
mod lease;
mod recovery;
mod rewrite;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::{StoreOptions, WriterAcquirePolicy};
use crate::constants::{WAL_OFFSET, WAL_SIZE_DEFAULT};
use crate::error::{Result, WaxError};
use crate::io::device::BlockDevice;
use crate::store::engine::Engine;
use crate::toc::Toc;
use crate::types::{FrameId, FrameMeta, FrameStatus, IndexKind, Stats};

pub use lease::WriterLease;
pub use rewrite::RewriteReport;

/// Published read view: the committed catalog plus what a reader needs
/// to resolve payloads without touching the engine.
#[derive(Debug, Clone)]
struct SnapState {
    toc: Arc<Toc>,
    generation: u64,
}

#[derive(Debug)]
pub(crate) struct StoreShared {
    engine: Arc<parking_lot::Mutex<Option<Engine>>>,
    /// Unfair mutex: held only to clone or swap the Arc.
    snap: parking_lot::Mutex<SnapState>,
    /// Reader/writer op-lock; tokio's RwLock is write-preferring, so
    /// writers cannot be starved by a stream of readers.
    op_lock: RwLock<()>,
    writer_gate: Arc<tokio::sync::Mutex<()>>,
    io: crate::sync::IoExecutor,
    device: BlockDevice,
    payload_floor: u64,
    wal_size: u64,
    options: StoreOptions,
}

/// Single-file, crash-safe persistent store for frames of content.
#[derive(Debug, Clone)]
pub struct Store {
    shared: Arc<StoreShared>,
}

impl Store {
    /// Creates a new store file with the default WAL ring size.
    pub async fn create(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        Self::create_with_wal_size(path, WAL_SIZE_DEFAULT, options).await
    }

    /// Creates a new store file with an explicit WAL ring size.
    pub async fn create_with_wal_size(
        path: impl AsRef<Path>,
        wal_size: u64,
        options: StoreOptions,
    ) -> Result<Self> {
        let io = crate::sync::IoExecutor::new(&options)?;
        let path = path.as_ref().to_path_buf();
        let engine_options = options.clone();
        let engine = io
            .run_exclusive(move || Engine::create(&path, wal_size, engine_options))
            .await??;
        Ok(Self::assemble(engine, io, options))
    }

    /// Opens an existing store, running crash recovery before serving.
    pub async fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let io = crate::sync::IoExecutor::new(&options)?;
        let path = path.as_ref().to_path_buf();
        let engine_options = options.clone();
        let engine = io
            .run_exclusive(move || Engine::open(&path, engine_options))
            .await??;
        Ok(Self::assemble(engine, io, options))
    }

    fn assemble(engine: Engine, io: crate::sync::IoExecutor, options: StoreOptions) -> Self {
        let snap = SnapState {
            toc: Arc::new(engine.toc().clone()),
            generation: engine.generation(),
        };
        let device = engine.device().clone();
        let payload_floor = engine.payload_floor();
        let wal_size = payload_floor - WAL_OFFSET;
        Self {
            shared: Arc::new(StoreShared {
                engine: Arc::new(parking_lot::Mutex::new(Some(engine))),
                snap: parking_lot::Mutex::new(snap),
                op_lock: RwLock::new(()),
                writer_gate: Arc::new(tokio::sync::Mutex::new(())),
                io,
                device,
                payload_floor,
                wal_size,
                options,
            }),
        }
    }

    /// Acquires the writer lease under the configured policy.
    pub async fn acquire_writer(&self) -> Result<WriterLease> {
        self.acquire_writer_with(self.shared.options.writer_acquire_policy)
            .await
    }

    /// Acquires the writer lease under an explicit policy.
    pub async fn acquire_writer_with(&self, policy: WriterAcquirePolicy) -> Result<WriterLease> {
        if self.shared.options.read_only {
            return Err(WaxError::ReadOnly);
        }
        let gate = Arc::clone(&self.shared.writer_gate);
        let permit = match policy {
            WriterAcquirePolicy::Fail => gate.try_lock_owned().map_err(|_| WaxError::WriterBusy)?,
            WriterAcquirePolicy::Wait => gate.lock_owned().await,
            WriterAcquirePolicy::Timeout(deadline) => {
                tokio::time::timeout(deadline, gate.lock_owned())
                    .await
                    .map_err(|_| WaxError::WriterTimeout)?
            }
        };
        Ok(WriterLease::new(Arc::clone(&self.shared), permit))
    }

    /// Releases a writer lease, discarding any uncommitted work.
    pub async fn release_writer(&self, lease: WriterLease) -> Result<()> {
        lease.release().await
    }

    // ------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------

    /// Pins the current committed view. The snapshot keeps serving the
    /// same catalog across later commits until re-resolved.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let snap = self.shared.snap.lock().clone();
        Snapshot {
            shared: Arc::clone(&self.shared),
            toc: snap.toc,
            generation: snap.generation,
        }
    }

    /// Returns the decompressed canonical payload, verifying both the
    /// stored-form and canonical-form digests.
    pub async fn read_payload(&self, frame_id: FrameId) -> Result<Vec<u8>> {
        self.snapshot().read_payload(frame_id).await
    }

    /// Snapshot of the current metadata for one frame.
    pub fn frame_meta(&self, frame_id: FrameId) -> Result<FrameMeta> {
        self.snapshot().frame_meta(frame_id)
    }

    /// Resolves the newest active frame carrying `uri`.
    pub fn frame_by_uri(&self, uri: &str) -> Result<FrameMeta> {
        let snap = self.shared.snap.lock().clone();
        snap.toc
            .frames
            .iter()
            .rev()
            .find(|frame| frame.status == FrameStatus::Active && frame.uri.as_deref() == Some(uri))
            .or_else(|| {
                snap.toc
                    .frames
                    .iter()
                    .rev()
                    .find(|frame| frame.uri.as_deref() == Some(uri))
            })
            .cloned()
            .ok_or_else(|| WaxError::FrameNotFoundByUri {
                uri: uri.to_string(),
            })
    }

    /// Resolves an active frame by canonical payload digest (dedup).
    #[must_use]
    pub fn find_frame_by_canonical_hash(&self, hash: &[u8; 32]) -> Option<FrameMeta> {
        let snap = self.shared.snap.lock().clone();
        snap.toc
            .frames
            .iter()
            .rev()
            .find(|frame| frame.status == FrameStatus::Active && frame.canonical_sha256 == *hash)
            .cloned()
    }

    /// Committed embedding vector for a frame, if any.
    pub async fn embedding(&self, frame_id: FrameId) -> Result<Option<Vec<f32>>> {
        let _read = self.shared.op_lock.read().await;
        self.with_engine(move |engine| engine.embedding(frame_id))
            .await
    }

    /// Opaque bytes of the newest staged index blob of `kind`.
    pub async fn index_blob(&self, kind: IndexKind) -> Result<Vec<u8>> {
        let _read = self.shared.op_lock.read().await;
        self.with_engine(move |engine| engine.index_blob(kind)).await
    }

    /// Sorted `(timestamp_ms, frame_id)` entries of the time track.
    pub async fn timeline(&self) -> Result<Vec<(i64, FrameId)>> {
        let _read = self.shared.op_lock.read().await;
        self.with_engine(|engine| engine.timeline()).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        let _read = self.shared.op_lock.read().await;
        self.with_engine(|engine| engine.stats()).await
    }

    /// Produces a compacted copy of this store at `dest`: every frame
    /// keeps its metadata, only live payloads keep their bytes.
    pub async fn rewrite_live_set(&self, dest: impl AsRef<Path>) -> Result<RewriteReport> {
        let _read = self.shared.op_lock.read().await;
        let snap = self.shared.snap.lock().clone();
        let device = self.shared.device.clone();
        let payload_floor = self.shared.payload_floor;
        let wal_size = self.shared.wal_size;
        let mut options = self.shared.options.clone();
        options.read_only = false;
        let dest = dest.as_ref().to_path_buf();
        self.shared
            .io
            .run(move || {
                rewrite::rewrite_live_set(
                    snap.toc.as_ref(),
                    &device,
                    payload_floor,
                    &dest,
                    wal_size,
                    options,
                )
            })
            .await?
    }

    /// Walks the store's durable structures and reports their health.
    /// `deep` additionally re-verifies every retained payload digest.
    pub async fn verify(path: impl AsRef<Path>, deep: bool) -> Result<VerificationReport> {
        let path = path.as_ref().to_path_buf();
        let options = StoreOptions::builder().read_only(true).build();
        let store = Self::open(&path, options).await?;
        let report = store.verify_open(&path, deep).await;
        store.close().await?;
        report
    }

    async fn verify_open(&self, path: &Path, deep: bool) -> Result<VerificationReport> {
        let mut checks = Vec::new();
        let mut overall = VerificationStatus::Passed;
        let mut push_check = |name: &str, status: VerificationStatus, details: Option<String>| {
            if status == VerificationStatus::Failed {
                overall = VerificationStatus::Failed;
            }
            checks.push(VerificationCheck {
                name: name.to_string(),
                status,
                details,
            });
        };

        // Reaching this point means header selection, footer and TOC
        // checksums already passed inside open().
        push_check("HeaderSelection", VerificationStatus::Passed, None);
        push_check("TocChecksum", VerificationStatus::Passed, None);

        let stats = self.stats().await?;
        if stats.wal.pending_bytes == 0 {
            push_check("WalPendingRecords", VerificationStatus::Passed, None);
        } else {
            push_check(
                "WalPendingRecords",
                VerificationStatus::Failed,
                Some(format!("{} uncommitted pending ops", stats.pending_ops)),
            );
        }

        let snap = self.shared.snap.lock().clone();
        let mut bounds_ok = true;
        for frame in &snap.toc.frames {
            if frame.stored_length == 0 {
                continue;
            }
            if frame.payload_offset < self.shared.payload_floor {
                bounds_ok = false;
                push_check(
                    "FrameBounds",
                    VerificationStatus::Failed,
                    Some(format!("frame {} overlaps the wal region", frame.id)),
                );
                break;
            }
        }
        if bounds_ok {
            push_check("FrameBounds", VerificationStatus::Passed, None);
        }

        if deep {
            let mut payload_failures = Vec::new();
            for frame in &snap.toc.frames {
                if frame.status != FrameStatus::Active || frame.stored_length == 0 {
                    continue;
                }
                if let Err(err) = self.read_payload(frame.id).await {
                    payload_failures.push(format!("frame {}: {err}", frame.id));
                }
            }
            if payload_failures.is_empty() {
                push_check("PayloadDigests", VerificationStatus::Passed, None);
            } else {
                push_check(
                    "PayloadDigests",
                    VerificationStatus::Failed,
                    Some(payload_failures.join("; ")),
                );
            }
        } else {
            push_check(
                "PayloadDigests",
                VerificationStatus::Skipped,
                Some("deep verification disabled".into()),
            );
        }

        Ok(VerificationReport {
            file_path: path.to_path_buf(),
            checks,
            overall_status: overall,
        })
    }

    /// Releases the store. Fails while a writer lease is outstanding.
    pub async fn close(self) -> Result<()> {
        let _writer = self
            .shared
            .writer_gate
            .clone()
            .try_lock_owned()
            .map_err(|_| WaxError::Lock("a writer lease is still active".to_string()))?;
        let _write = self.shared.op_lock.write().await;
        let engine = Arc::clone(&self.shared.engine);
        self.shared
            .io
            .run_exclusive(move || {
                engine.lock().take();
            })
            .await?;
        Ok(())
    }

    async fn with_engine<T, F>(&self, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> Result<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.shared.engine);
        self.shared
            .io
            .run(move || {
                let guard = engine.lock();
                let engine = guard.as_ref().ok_or(WaxError::StoreClosed)?;
                body(engine)
            })
            .await?
    }
}

impl StoreShared {
    /// Swaps the published snapshot after a generation change.
    pub(crate) fn publish(&self, toc: Arc<Toc>, generation: u64) {
        let mut snap = self.snap.lock();
        snap.toc = toc;
        snap.generation = generation;
    }

    pub(crate) fn current_generation(&self) -> u64 {
        self.snap.lock().generation
    }

    pub(crate) async fn op_lock_write(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.op_lock.write().await
    }

    pub(crate) fn engine_arc(&self) -> Arc<parking_lot::Mutex<Option<Engine>>> {
        Arc::clone(&self.engine)
    }

    pub(crate) fn io(&self) -> &crate::sync::IoExecutor {
        &self.io
    }
}

/// A pinned committed view of the catalog. Holding a snapshot across a
/// concurrent commit keeps serving the pre-commit catalog; re-resolve
/// via [`Store::snapshot`] to observe the new view.
#[derive(Debug, Clone)]
pub struct Snapshot {
    shared: Arc<StoreShared>,
    toc: Arc<Toc>,
    generation: u64,
}

impl Snapshot {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.toc.frames.len() as u64
    }

    pub fn frame_meta(&self, frame_id: FrameId) -> Result<FrameMeta> {
        self.toc
            .frames
            .get(frame_id as usize)
            .cloned()
            .ok_or(WaxError::FrameNotFound { frame_id })
    }

    pub async fn read_payload(&self, frame_id: FrameId) -> Result<Vec<u8>> {
        let meta = self.frame_meta(frame_id)?;
        let _read = self.shared.op_lock.read().await;
        let device = self.shared.device.clone();
        let payload_floor = self.shared.payload_floor;
        self.shared
            .io
            .run(move || engine::read_frame_payload(&device, &meta, payload_floor))
            .await?
    }
}

/// Outcome of one verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationCheck {
    pub name: String,
    pub status: VerificationStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub file_path: PathBuf,
    pub checks: Vec<VerificationCheck>,
    pub overall_status: VerificationStatus,
}
