//! Concurrency primitives backing the coordinator.
//!
//! The reader/writer op-lock is `tokio::sync::RwLock` (write-preferring,
//! so writers cannot starve) and the snapshot hot path uses the unfair
//! `parking_lot::Mutex`; only the blocking-I/O executor is bespoke.

mod executor;

pub use executor::IoExecutor;
