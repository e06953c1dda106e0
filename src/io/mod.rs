//! Low-level file plumbing: block device, fault hooks, header pages,
//! and the WAL ring.

pub mod device;
pub mod fault;
pub mod header;
pub mod wal;
