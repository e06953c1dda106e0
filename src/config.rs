//! Store configuration knobs.

use std::time::Duration;

use crate::constants::PROACTIVE_COMMIT_MIN_PENDING;

/// When WAL appends reach stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalFsyncPolicy {
    /// Fsync once per commit (step 2 of the commit protocol).
    #[default]
    OnCommit,
    /// Fsync after every appended record.
    Always,
    /// Fsync after at least this many bytes accumulated since the last fsync.
    EveryBytes(u64),
}

/// How `acquire_writer` behaves when the lease is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriterAcquirePolicy {
    /// Fail immediately with `WriterBusy`.
    Fail,
    /// Wait indefinitely.
    #[default]
    Wait,
    /// Wait up to the deadline, then fail with `WriterTimeout`.
    Timeout(Duration),
}

/// Advisory scheduling class for the blocking I/O pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoPoolPriority {
    #[default]
    Default,
    Background,
}

/// Recognized configuration set for [`crate::store::Store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub wal_fsync_policy: WalFsyncPolicy,
    /// Percentage of the ring (0–100) whose pending bytes trigger a
    /// proactive commit.
    pub wal_proactive_commit_threshold_percent: Option<u8>,
    /// Absolute pending-byte trigger; the effective threshold is the
    /// larger of this and the percentage-derived value.
    pub wal_proactive_commit_max_wal_size_bytes: Option<u64>,
    /// Proactive commits never fire below this many pending bytes.
    pub wal_proactive_commit_min_pending_bytes: u64,
    pub wal_replay_state_snapshot_enabled: bool,
    pub io_thread_pool_label: String,
    pub io_thread_pool_priority: IoPoolPriority,
    pub writer_acquire_policy: WriterAcquirePolicy,
    /// Open the store for reading only; shares the cross-process lock.
    pub read_only: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            wal_fsync_policy: WalFsyncPolicy::default(),
            wal_proactive_commit_threshold_percent: None,
            wal_proactive_commit_max_wal_size_bytes: None,
            wal_proactive_commit_min_pending_bytes: PROACTIVE_COMMIT_MIN_PENDING,
            wal_replay_state_snapshot_enabled: false,
            io_thread_pool_label: "wax-io".to_string(),
            io_thread_pool_priority: IoPoolPriority::default(),
            writer_acquire_policy: WriterAcquirePolicy::default(),
            read_only: false,
        }
    }
}

impl StoreOptions {
    #[must_use]
    pub fn builder() -> StoreOptionsBuilder {
        StoreOptionsBuilder::default()
    }

    /// Pending-byte level at which a proactive commit fires, if enabled.
    #[must_use]
    pub fn proactive_commit_trigger(&self, wal_size: u64) -> Option<u64> {
        let percent_trigger = self
            .wal_proactive_commit_threshold_percent
            .map(|percent| wal_size * u64::from(percent.min(100)) / 100);
        let byte_trigger = self.wal_proactive_commit_max_wal_size_bytes;
        let trigger = match (percent_trigger, byte_trigger) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return None,
        };
        Some(trigger.max(self.wal_proactive_commit_min_pending_bytes))
    }
}

#[derive(Debug, Default)]
pub struct StoreOptionsBuilder {
    inner: StoreOptions,
}

impl StoreOptionsBuilder {
    #[must_use]
    pub fn wal_fsync_policy(mut self, policy: WalFsyncPolicy) -> Self {
        self.inner.wal_fsync_policy = policy;
        self
    }

    #[must_use]
    pub fn proactive_commit_threshold_percent(mut self, percent: u8) -> Self {
        self.inner.wal_proactive_commit_threshold_percent = Some(percent);
        self
    }

    #[must_use]
    pub fn proactive_commit_max_wal_size_bytes(mut self, bytes: u64) -> Self {
        self.inner.wal_proactive_commit_max_wal_size_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn proactive_commit_min_pending_bytes(mut self, bytes: u64) -> Self {
        self.inner.wal_proactive_commit_min_pending_bytes = bytes;
        self
    }

    #[must_use]
    pub fn replay_state_snapshot(mut self, enabled: bool) -> Self {
        self.inner.wal_replay_state_snapshot_enabled = enabled;
        self
    }

    #[must_use]
    pub fn io_thread_pool_label(mut self, label: impl Into<String>) -> Self {
        self.inner.io_thread_pool_label = label.into();
        self
    }

    #[must_use]
    pub fn io_thread_pool_priority(mut self, priority: IoPoolPriority) -> Self {
        self.inner.io_thread_pool_priority = priority;
        self
    }

    #[must_use]
    pub fn writer_acquire_policy(mut self, policy: WriterAcquirePolicy) -> Self {
        self.inner.writer_acquire_policy = policy;
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.inner.read_only = read_only;
        self
    }

    #[must_use]
    pub fn build(self) -> StoreOptions {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proactive_trigger_takes_the_larger_knob() {
        let options = StoreOptions::builder()
            .proactive_commit_threshold_percent(50)
            .proactive_commit_max_wal_size_bytes(10_000)
            .build();
        // 50% of 1 MiB beats the 10 KB floor.
        assert_eq!(options.proactive_commit_trigger(1 << 20), Some(512 * 1024));
        // With a tiny ring the byte knob wins.
        assert_eq!(
            options.proactive_commit_trigger(4096),
            Some(PROACTIVE_COMMIT_MIN_PENDING)
        );
    }

    #[test]
    fn proactive_trigger_disabled_by_default() {
        assert_eq!(StoreOptions::default().proactive_commit_trigger(1 << 20), None);
    }

    #[test]
    fn min_pending_floors_the_trigger() {
        let options = StoreOptions::builder()
            .proactive_commit_threshold_percent(1)
            .proactive_commit_min_pending_bytes(1 << 20)
            .build();
        assert_eq!(options.proactive_commit_trigger(1 << 20), Some(1 << 20));
    }
}
