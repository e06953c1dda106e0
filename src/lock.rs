//! Cross-process advisory file lock.
//!
//! Shared for read-only opens, exclusive for read-write opens, held
//! for the lifetime of the open store. Upgrade/downgrade releases and
//! re-acquires with bounded retry.

use std::fs::File;
use std::path::Path;
use std::thread;
use std::time::Duration;

use fs2::FileExt;

use crate::error::{Result, WaxError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// File lock guard holding either a shared or exclusive OS lock.
/// Released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    mode: LockMode,
}

impl FileLock {
    /// Clones the provided handle and acquires `mode`, retrying with
    /// backoff while another process holds a conflicting lock.
    pub fn acquire(file: &File, mode: LockMode) -> Result<Self> {
        let clone = file.try_clone()?;
        Self::lock_with_retry(&clone, mode)?;
        Ok(Self { file: clone, mode })
    }

    /// Non-blocking acquisition; `None` when a conflicting lock exists.
    pub fn try_acquire(file: &File, mode: LockMode) -> Result<Option<Self>> {
        let clone = file.try_clone()?;
        loop {
            let attempt = match mode {
                LockMode::Exclusive => clone.try_lock_exclusive(),
                LockMode::Shared => FileExt::try_lock_shared(&clone),
            };
            match attempt {
                Ok(()) => return Ok(Some(Self { file: clone, mode })),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) => return Err(WaxError::Lock(err.to_string())),
            }
        }
    }

    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn downgrade_to_shared(&mut self) -> Result<()> {
        if self.mode == LockMode::Shared {
            return Ok(());
        }
        self.file
            .unlock()
            .map_err(|err| WaxError::Lock(err.to_string()))?;
        Self::lock_with_retry(&self.file, LockMode::Shared)?;
        self.mode = LockMode::Shared;
        Ok(())
    }

    pub fn upgrade_to_exclusive(&mut self) -> Result<()> {
        if self.mode == LockMode::Exclusive {
            return Ok(());
        }
        self.file
            .unlock()
            .map_err(|err| WaxError::Lock(err.to_string()))?;
        Self::lock_with_retry(&self.file, LockMode::Exclusive)?;
        self.mode = LockMode::Exclusive;
        Ok(())
    }

    fn lock_with_retry(file: &File, mode: LockMode) -> Result<()> {
        const MAX_ATTEMPTS: u32 = 200; // ~10 seconds with 50ms backoff
        const BACKOFF: Duration = Duration::from_millis(50);
        let mut attempts = 0;
        loop {
            let result = match mode {
                LockMode::Exclusive => file.try_lock_exclusive(),
                LockMode::Shared => FileExt::try_lock_shared(file),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if attempts >= MAX_ATTEMPTS {
                        return Err(WaxError::Lock(
                            "exclusive access unavailable; file is in use by another process"
                                .to_string(),
                        ));
                    }
                    attempts += 1;
                    thread::sleep(BACKOFF);
                    continue;
                }
                Err(err) => return Err(WaxError::Lock(err.to_string())),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Convenience: opens `path` read/write and takes `mode`.
pub fn lock_path(path: &Path, mode: LockMode) -> Result<FileLock> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| WaxError::from(err).with_path(path))?;
    FileLock::acquire(&file, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use tempfile::NamedTempFile;

    #[test]
    #[cfg(not(target_os = "windows"))] // Windows has different locking semantics
    fn exclusive_lock_blocks_second_writer() {
        let temp = NamedTempFile::new().expect("temp file");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(temp.path())
            .expect("open file");
        let guard = FileLock::acquire(&file, LockMode::Exclusive).expect("first lock");

        let second =
            FileLock::try_acquire(&file, LockMode::Exclusive).expect("second lock attempt");
        assert!(second.is_none(), "lock should already be held");

        drop(guard);
        let third = FileLock::try_acquire(&file, LockMode::Exclusive).expect("third lock attempt");
        assert!(third.is_some(), "lock released after drop");
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn shared_locks_coexist() {
        let temp = NamedTempFile::new().expect("temp file");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(temp.path())
            .expect("open file");
        let _reader_a = FileLock::acquire(&file, LockMode::Shared).expect("first shared");
        let reader_b = FileLock::try_acquire(&file, LockMode::Shared).expect("second shared");
        assert!(reader_b.is_some());
        // But an exclusive lock must be refused.
        let writer = FileLock::try_acquire(&file, LockMode::Exclusive).expect("writer attempt");
        assert!(writer.is_none());
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn downgrade_admits_readers() {
        let temp = NamedTempFile::new().expect("temp file");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(temp.path())
            .expect("open file");
        let mut guard = FileLock::acquire(&file, LockMode::Exclusive).expect("exclusive");
        guard.downgrade_to_shared().expect("downgrade");
        assert_eq!(guard.mode(), LockMode::Shared);
        let reader = FileLock::try_acquire(&file, LockMode::Shared).expect("reader attempt");
        assert!(reader.is_some());
    }
}
