/// File magic for `.wax` stores.
pub const MAGIC: [u8; 4] = *b"WAX1";
/// Magic trailer marker for commit footers.
pub const FOOTER_MAGIC: [u8; 8] = *b"WAX1FOOT";
/// Magic prefix of the optional WAL replay-state snapshot inside a header page.
pub const WAL_SNAPSHOT_MAGIC: [u8; 8] = *b"WALSNAP1";

/// Size of one header page (4 KiB) reserving space for future upgrades.
pub const HEADER_PAGE_SIZE: usize = 4096;
/// Offset of header page A.
pub const HEADER_A_OFFSET: u64 = 0;
/// Offset of header page B.
pub const HEADER_B_OFFSET: u64 = HEADER_PAGE_SIZE as u64;
/// The WAL ring begins immediately after the mirrored header pages.
pub const WAL_OFFSET: u64 = 2 * HEADER_PAGE_SIZE as u64;

/// Total size of a commit footer in bytes.
pub const FOOTER_SIZE: usize = 64;
/// Fixed size of a WAL record header.
pub const WAL_RECORD_HEADER_SIZE: usize = 48;

/// Specification major version.
pub const SPEC_MAJOR: u8 = 1;
/// Specification minor version.
pub const SPEC_MINOR: u8 = 0;
/// Combined two-byte specification version encoded in headers.
pub const SPEC_VERSION: u16 = ((SPEC_MAJOR as u16) << 8) | SPEC_MINOR as u16;

/// Default WAL ring size for new stores.
pub const WAL_SIZE_DEFAULT: u64 = 256 * 1024 * 1024;
/// Smallest WAL ring accepted at create time (one maximal record header
/// plus room for a sentinel).
pub const WAL_SIZE_MIN: u64 = 64 * 1024;

/// Serialized TOC upper bound.
pub const MAX_TOC_BYTES: u64 = 64 * 1024 * 1024;
/// Backward footer scan window used when the header's footer offset is suspect.
pub const FOOTER_SCAN_WINDOW: u64 = 32 * 1024 * 1024;

/// Default floor of pending WAL bytes before a proactive commit is considered.
pub const PROACTIVE_COMMIT_MIN_PENDING: u64 = 128 * 1024;
