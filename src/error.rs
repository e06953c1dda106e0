use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;

use crate::io::fault::CommitCheckpoint;
use crate::types::{FrameId, IndexKind};

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, WaxError>;

/// Canonical error surface for wax-core.
#[derive(Debug, Error)]
pub enum WaxError {
    #[error("I/O error: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    #[error("Short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u64, wanted: u64, got: u64 },

    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("Checksum mismatch while validating {context}")]
    ChecksumMismatch { context: &'static str },

    #[error("Header validation failed: {reason}")]
    InvalidHeader { reason: Cow<'static, str> },

    #[error("Both header pages are unreadable; the store is unrecoverable")]
    HeaderCorrupt,

    #[error("Table of contents validation failed: {reason}")]
    InvalidToc { reason: Cow<'static, str> },

    #[error("Commit footer is missing or invalid at offset {offset}")]
    InvalidFooter { offset: u64 },

    #[error("Embedded WAL is corrupted at offset {offset}: {reason}")]
    WalCorruption {
        offset: u64,
        reason: Cow<'static, str>,
    },

    #[error("WAL ring is full ({pending} pending of {capacity} bytes); commit and retry")]
    WalFull { pending: u64, capacity: u64 },

    #[error("WAL record of {record} bytes cannot fit a {capacity}-byte ring")]
    RecordTooLarge { record: u64, capacity: u64 },

    #[error("Decode failed: {what} of {actual} exceeds bound {limit}")]
    DecodeBound {
        what: &'static str,
        limit: u64,
        actual: u64,
    },

    #[error("Decode failed while reading {context}: input truncated")]
    DecodeTruncated { context: &'static str },

    #[error("Decode failed while reading {context}: {reason}")]
    DecodeInvalid {
        context: &'static str,
        reason: Cow<'static, str>,
    },

    #[error("Compression algorithm {algorithm} is not supported on this platform")]
    CompressionUnsupported { algorithm: &'static str },

    #[error("Decompressed length {actual} does not match declared length {expected}")]
    DecompressedLengthMismatch { expected: u64, actual: u64 },

    #[error("Frame {frame_id} was not found")]
    FrameNotFound { frame_id: FrameId },

    #[error("Invalid frame {frame_id}: {reason}")]
    InvalidFrame {
        frame_id: FrameId,
        reason: &'static str,
    },

    #[error("Frame with uri '{uri}' was not found")]
    FrameNotFoundByUri { uri: String },

    #[error("No {kind:?} index blob is recorded in the catalog")]
    IndexNotFound { kind: IndexKind },

    #[error("Staged {kind:?} index blob of {actual} bytes exceeds bound {limit}")]
    IndexTooLarge {
        kind: IndexKind,
        limit: u64,
        actual: u64,
    },

    #[error("Duplicate WAL sequence number {sequence}")]
    DuplicateSequence { sequence: u64 },

    #[error("Writer lease is held by another task")]
    WriterBusy,

    #[error("Timed out waiting for the writer lease")]
    WriterTimeout,

    #[error("Operation was cancelled before completion")]
    Cancelled,

    #[error("Store is read-only")]
    ReadOnly,

    #[error("A prior commit failed mid-flight; reopen the store to recover")]
    CommitPoisoned,

    #[error("Path already contains data that is not a wax store: {path}")]
    PathConflict { path: PathBuf },

    #[error("Blocking executor is shut down")]
    ExecutorShutdown,

    #[error("Store is closed")]
    StoreClosed,

    #[error("Live-set rewrite aborted: {reason}")]
    RewriteFailed { reason: Cow<'static, str> },

    #[error("Injected crash at commit checkpoint {checkpoint:?}")]
    InjectedCrash { checkpoint: CommitCheckpoint },

    #[error("Injected I/O fault: {reason}")]
    InjectedFault { reason: &'static str },
}

impl From<std::io::Error> for WaxError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { source, path: None }
    }
}

impl WaxError {
    /// Attaches a path to a bare I/O error for diagnostics.
    #[must_use]
    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Self::Io { source, path: None } => Self::Io {
                source,
                path: Some(path.into()),
            },
            other => other,
        }
    }
}
