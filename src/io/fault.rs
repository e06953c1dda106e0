//! Deterministic fault injection for tests.
//!
//! Two hooks exist: a per-device [`FaultPlan`] that perturbs individual
//! syscalls (short reads/writes, EINTR, EIO), and a process-global
//! commit crash checkpoint that makes `commit()` bail at one of its
//! three named durability points, leaving the file exactly as a SIGKILL
//! at that point would.

use std::collections::VecDeque;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::{Result, WaxError};

/// Syscall category a fault rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Read,
    Write,
    Fsync,
}

/// What happens when a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The syscall transfers `keep` bytes instead of the requested span.
    Short { keep: usize },
    /// The syscall fails with `Interrupted`; callers must retry transparently.
    Eintr,
    /// The syscall fails with an unrecoverable I/O error.
    Error,
}

/// One scripted fault: fires on the `call_index`-th syscall (0-based,
/// counted per [`FaultOp`]) of the matching category.
#[derive(Debug, Clone, Copy)]
pub struct FaultRule {
    pub op: FaultOp,
    pub call_index: u64,
    pub kind: FaultKind,
}

#[derive(Debug, Default)]
struct FaultPlanState {
    rules: VecDeque<FaultRule>,
    reads: u64,
    writes: u64,
    fsyncs: u64,
}

/// Shared, scriptable fault plan attached to a block device.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    state: Arc<Mutex<FaultPlanState>>,
}

impl FaultPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, rule: FaultRule) {
        self.state.lock().rules.push_back(rule);
    }

    /// Consults the plan for the next syscall of `op`, advancing the
    /// per-op call counter. Returns the matched fault, if any.
    pub(crate) fn next(&self, op: FaultOp) -> Option<FaultKind> {
        let mut state = self.state.lock();
        let index = match op {
            FaultOp::Read => {
                let index = state.reads;
                state.reads += 1;
                index
            }
            FaultOp::Write => {
                let index = state.writes;
                state.writes += 1;
                index
            }
            FaultOp::Fsync => {
                let index = state.fsyncs;
                state.fsyncs += 1;
                index
            }
        };
        let position = state
            .rules
            .iter()
            .position(|rule| rule.op == op && rule.call_index == index)?;
        state.rules.remove(position).map(|rule| rule.kind)
    }
}

/// Named durability points inside `commit()` observed by the crash harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitCheckpoint {
    AfterTocWriteBeforeFooter,
    AfterFooterFsyncBeforeHeader,
    AfterHeaderWriteBeforeFinalFsync,
}

static ARMED_CHECKPOINT: Lazy<Mutex<Option<CommitCheckpoint>>> = Lazy::new(|| Mutex::new(None));

/// Arms a crash at `checkpoint` for the next commit in this process.
pub fn arm_crash_checkpoint(checkpoint: CommitCheckpoint) {
    *ARMED_CHECKPOINT.lock() = Some(checkpoint);
}

/// Clears any armed checkpoint.
pub fn disarm_crash_checkpoint() {
    *ARMED_CHECKPOINT.lock() = None;
}

/// Called by `commit()` as it passes `checkpoint`. Fails (once) when
/// that checkpoint is armed, aborting the commit mid-flight.
pub(crate) fn observe_checkpoint(checkpoint: CommitCheckpoint) -> Result<()> {
    let mut armed = ARMED_CHECKPOINT.lock();
    if *armed == Some(checkpoint) {
        *armed = None;
        return Err(WaxError::InjectedCrash { checkpoint });
    }
    Ok(())
}
