//! Foundational enums and marker types shared across store data structures.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaxError};

/// Frame IDs are dense u64 indexes into the frame table.
pub type FrameId = u64;

/// Segment IDs identify embedded byte segments; monotonic within a file.
pub type SegmentId = u64;

/// Encoding used for the stored form of the canonical payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalEncoding {
    #[default]
    Plain,
    Lzfse,
    Lz4,
    Deflate,
}

impl CanonicalEncoding {
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CanonicalEncoding::Plain),
            1 => Ok(CanonicalEncoding::Lzfse),
            2 => Ok(CanonicalEncoding::Lz4),
            3 => Ok(CanonicalEncoding::Deflate),
            tag => Err(WaxError::DecodeInvalid {
                context: "canonical encoding",
                reason: format!("unknown encoding tag {tag}").into(),
            }),
        }
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            CanonicalEncoding::Plain => 0,
            CanonicalEncoding::Lzfse => 1,
            CanonicalEncoding::Lz4 => 2,
            CanonicalEncoding::Deflate => 3,
        }
    }
}

/// Role attributed to a frame in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameRole {
    #[default]
    Document,
    Chunk,
    Blob,
    System,
}

impl FrameRole {
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FrameRole::Document),
            1 => Ok(FrameRole::Chunk),
            2 => Ok(FrameRole::Blob),
            3 => Ok(FrameRole::System),
            tag => Err(WaxError::DecodeInvalid {
                context: "frame role",
                reason: format!("unknown role tag {tag}").into(),
            }),
        }
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            FrameRole::Document => 0,
            FrameRole::Chunk => 1,
            FrameRole::Blob => 2,
            FrameRole::System => 3,
        }
    }
}

/// Lifecycle state of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    #[default]
    Active,
    Deleted,
}

impl FrameStatus {
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FrameStatus::Active),
            1 => Ok(FrameStatus::Deleted),
            tag => Err(WaxError::DecodeInvalid {
                context: "frame status",
                reason: format!("unknown status tag {tag}").into(),
            }),
        }
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            FrameStatus::Active => 0,
            FrameStatus::Deleted => 1,
        }
    }
}

/// Category of an embedded index blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Lex,
    Vector,
    Time,
}

impl IndexKind {
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(IndexKind::Lex),
            1 => Ok(IndexKind::Vector),
            2 => Ok(IndexKind::Time),
            tag => Err(WaxError::DecodeInvalid {
                context: "index kind",
                reason: format!("unknown index kind tag {tag}").into(),
            }),
        }
    }

    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            IndexKind::Lex => 0,
            IndexKind::Vector => 1,
            IndexKind::Time => 2,
        }
    }
}
