//! # wax-core
//!
//! A single-file, crash-safe persistent store for frames of content
//! (text, blobs, vector embeddings): the durable substrate beneath an
//! on-device retrieval-augmented-memory system.
//!
//! The `.wax` file layout, front to back:
//!
//! ```text
//! 0x0000   header page A   (4 KiB, magic "WAX1")
//! 0x1000   header page B   (4 KiB, mirror)
//! 0x2000   WAL ring        (fixed size, 48-byte record headers)
//! + wal    payload data, index segments, tracks
//! ...      TOC             (serialized catalog, self-checksummed)
//! ...      footer          (64 bytes, magic "WAX1FOOT")
//! ```
//!
//! Commits append a fresh TOC and footer, then flip the active header
//! page with a generation bump; a crash at any point leaves either the
//! old or the new catalog fully intact. Mutations reach the WAL ring
//! before anything else, so recovery replays whatever a crash cut off.
//!
//! ```no_run
//! use wax_core::{FrameDraft, Store, StoreOptions};
//!
//! # async fn demo() -> wax_core::Result<()> {
//! let store = Store::create("notes.wax", StoreOptions::default()).await?;
//! let mut writer = store.acquire_writer().await?;
//! let id = writer
//!     .put(b"hello".to_vec(), FrameDraft::builder().title("greeting").build())
//!     .await?;
//! writer.commit().await?;
//! store.release_writer(writer).await?;
//! assert_eq!(store.read_payload(id).await?, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod codec;
pub mod compress;
pub mod config;
pub mod constants;
pub mod error;
pub mod footer;
pub mod io;
pub mod lock;
pub mod store;
pub mod sync;
pub mod toc;
pub mod types;

pub use config::{IoPoolPriority, StoreOptions, WalFsyncPolicy, WriterAcquirePolicy};
pub use error::{Result, WaxError};
pub use io::fault::{
    arm_crash_checkpoint, disarm_crash_checkpoint, CommitCheckpoint, FaultKind, FaultOp, FaultPlan,
    FaultRule,
};
pub use store::{
    RewriteReport, Snapshot, Store, VerificationCheck, VerificationReport, VerificationStatus,
    WriterLease,
};
pub use toc::Toc;
pub use types::{
    CanonicalEncoding, FrameDraft, FrameDraftBuilder, FrameId, FrameMeta, FrameRole, FrameStatus,
    IndexKind, Stats, WalStats,
};
