//! Offset-addressed block device over a regular file.
//!
//! All access is positional; the device never moves a shared file
//! cursor, so cloned handles may read concurrently. Partial transfers
//! at the syscall boundary loop until complete, and `Interrupted` is
//! retried transparently.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::MmapMut;

use crate::error::{Result, WaxError};
use crate::io::fault::{FaultKind, FaultOp, FaultPlan};

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// Positional read/write/fsync over one file, with an optional fault plan.
#[derive(Debug, Clone)]
pub struct BlockDevice {
    file: Arc<File>,
    path: PathBuf,
    faults: Option<FaultPlan>,
}

impl BlockDevice {
    /// Opens an existing file read/write.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| WaxError::from(err).with_path(path))?;
        Ok(Self::from_file(file, path))
    }

    /// Opens an existing file read-only.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| WaxError::from(err).with_path(path))?;
        Ok(Self::from_file(file, path))
    }

    /// Creates a new file, failing if `path` already exists.
    pub fn create_new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| WaxError::from(err).with_path(path))?;
        Ok(Self::from_file(file, path))
    }

    fn from_file(file: File, path: &Path) -> Self {
        Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
            faults: None,
        }
    }

    /// Attaches a deterministic fault plan; used by tests only.
    #[must_use]
    pub fn with_faults(mut self, plan: FaultPlan) -> Self {
        self.faults = Some(plan);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw handle for advisory-lock acquisition.
    #[must_use]
    pub(crate) fn raw_file(&self) -> &File {
        &self.file
    }

    fn fault(&self, op: FaultOp) -> Option<FaultKind> {
        self.faults.as_ref().and_then(|plan| plan.next(op))
    }

    fn read_at_raw(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        match self.fault(FaultOp::Read) {
            Some(FaultKind::Short { keep }) => {
                let keep = keep.min(buf.len());
                self.positional_read(&mut buf[..keep], offset)
            }
            Some(FaultKind::Eintr) => Err(io::Error::from(io::ErrorKind::Interrupted)),
            Some(FaultKind::Error) => Err(io::Error::other("injected read fault")),
            None => self.positional_read(buf, offset),
        }
    }

    fn write_at_raw(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        match self.fault(FaultOp::Write) {
            Some(FaultKind::Short { keep }) => {
                let keep = keep.min(buf.len());
                self.positional_write(&buf[..keep], offset)
            }
            Some(FaultKind::Eintr) => Err(io::Error::from(io::ErrorKind::Interrupted)),
            Some(FaultKind::Error) => Err(io::Error::other("injected write fault")),
            None => self.positional_write(buf, offset),
        }
    }

    #[cfg(unix)]
    fn positional_read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }

    #[cfg(unix)]
    fn positional_write(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.file.write_at(buf, offset)
    }

    #[cfg(windows)]
    fn positional_read(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.seek_read(buf, offset)
    }

    #[cfg(windows)]
    fn positional_write(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.file.seek_write(buf, offset)
    }

    /// Reads up to `buf.len()` bytes at `offset`; short reads happen
    /// only at end of file.
    pub fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_at_raw(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(WaxError::from(err).with_path(&self.path)),
            }
        }
        Ok(filled)
    }

    /// Reads exactly `buf.len()` bytes at `offset`.
    pub fn read_exactly(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let got = self.read(buf, offset)?;
        if got == buf.len() {
            Ok(())
        } else {
            Err(WaxError::ShortRead {
                offset,
                wanted: buf.len() as u64,
                got: got as u64,
            })
        }
    }

    /// Writes all of `buf` at `offset`, looping over short writes.
    pub fn write_all(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            match self.write_at_raw(&buf[written..], offset + written as u64) {
                Ok(0) => {
                    return Err(WaxError::Io {
                        source: io::Error::new(io::ErrorKind::WriteZero, "device refused bytes"),
                        path: Some(self.path.clone()),
                    });
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(WaxError::from(err).with_path(&self.path)),
            }
        }
        Ok(())
    }

    /// Flushes file data and metadata to stable storage.
    pub fn fsync_full(&self) -> Result<()> {
        match self.fault(FaultOp::Fsync) {
            Some(FaultKind::Error) => {
                return Err(WaxError::InjectedFault {
                    reason: "fsync fault",
                });
            }
            Some(_) | None => {}
        }
        self.file
            .sync_all()
            .map_err(|err| WaxError::from(err).with_path(&self.path))
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self
            .file
            .metadata()
            .map_err(|err| WaxError::from(err).with_path(&self.path))?
            .len())
    }

    pub fn truncate(&self, len: u64) -> Result<()> {
        self.file
            .set_len(len)
            .map_err(|err| WaxError::from(err).with_path(&self.path))
    }

    /// Grows the file to at least `len` bytes (newly exposed bytes read
    /// as zero). Never shrinks.
    pub fn ensure_size(&self, len: u64) -> Result<()> {
        if self.size()? < len {
            self.truncate(len)?;
        }
        Ok(())
    }

    /// Maps `len` bytes at `offset` writable. The mapping is released
    /// when the returned guard drops.
    pub fn map_writable(&self, offset: u64, len: usize) -> Result<MappedRegion> {
        debug_assert!(len > 0);
        self.ensure_size(offset + len as u64)?;
        let mmap = unsafe {
            memmap2::MmapOptions::new()
                .offset(offset)
                .len(len)
                .map_mut(&*self.file)
        }
        .map_err(|err| WaxError::from(err).with_path(&self.path))?;
        Ok(MappedRegion { mmap })
    }
}

/// Scoped writable mapping; flushed and unmapped on drop.
pub struct MappedRegion {
    mmap: MmapMut,
}

impl MappedRegion {
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    /// Synchronously flushes the mapped span to the file.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}
