//! Data model shared by the catalog, WAL, and coordinator layers.

mod common;
mod entry;
mod frame;
mod manifest;

pub use common::{CanonicalEncoding, FrameId, FrameRole, FrameStatus, IndexKind, SegmentId};
pub use entry::{PayloadSource, WalEntry};
pub use frame::{BlobRef, FrameDraft, FrameDraftBuilder, FrameMeta, Stats, WalStats};
pub use manifest::{
    EmbeddingsManifest, IndexManifest, SegmentCatalog, SegmentEntry, TimeIndexManifest,
};
