//! Atomic File Update.
//!
//! Writers never touch the target path directly: they write to a sibling
//! temp file, `fsync` it, `fsync` the containing directory, then `rename`
//! the temp file onto the target. `rename(2)` within a filesystem is atomic,
//! so a reader can never observe a partially-written file, and a crash
//! between steps leaves either the untouched original (if the crash was
//! before the rename) or the fully-written replacement (if after) — never a
//! mix of the two. A leftover temp file found on a later [`AtomicFile::create`]
//! is evidence of exactly that first case and is simply removed.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use nix::fcntl::{flock, FlockArg};

use crate::error::{IpcError, Result};

const TEMP_INFIX: &str = ".bak~~";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadAndWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    OpenIfExists,
    ReplaceIfExists,
    FailIfExists,
}

fn unique_temp_path(target: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sibling = format!("{file_name}{TEMP_INFIX}{}-{n}", std::process::id());
    target.with_file_name(sibling)
}

/// Remove any stray temp files left next to `target` by a writer that
/// crashed before completing its rename. Safe to call on every open: the
/// target itself, if present, was never touched by the aborted write.
fn sweep_orphaned_temp_files(target: &Path) -> io::Result<()> {
    let Some(dir) = target.parent() else {
        return Ok(());
    };
    let Some(target_name) = target.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(());
    };
    let prefix = format!("{target_name}{TEMP_INFIX}");
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            tracing::debug!(path = ?entry.path(), "removing orphaned atomic-file temp file");
            let _ = std::fs::remove_file(entry.path());
        }
    }
    Ok(())
}

/// A file opened for an atomic read-modify-write cycle. Writes go to a
/// hidden temp file until [`AtomicFile::commit`] renames it onto the
/// target; dropping without committing discards them, same as
/// [`AtomicFile::cancel`].
pub struct AtomicFile {
    target: PathBuf,
    temp_path: Option<PathBuf>,
    file: File,
    committed: bool,
}

impl AtomicFile {
    /// Open an existing file for reading only. No temp file is involved —
    /// reads are never torn because writers only ever `rename` a complete
    /// replacement into place.
    pub fn open_read(path: impl Into<PathBuf>) -> Result<Self> {
        let target = path.into();
        let file = File::open(&target).map_err(IpcError::from)?;
        flock(file.as_raw_fd(), FlockArg::LockSharedNonblock).map_err(IpcError::from)?;
        Ok(Self {
            target,
            temp_path: None,
            file,
            committed: true,
        })
    }

    /// Open (or create) `path` for writing under the given [`CreateMode`].
    /// Writes land in a sibling temp file until [`AtomicFile::commit`].
    pub fn create(path: impl Into<PathBuf>, mode: CreateMode) -> Result<Self> {
        let target = path.into();
        sweep_orphaned_temp_files(&target).map_err(IpcError::from)?;

        let exists = target.exists();
        match mode {
            CreateMode::FailIfExists if exists => {
                return Err(IpcError::Duplicate {
                    protocol: "atomic-file".into(),
                    instance: target.display().to_string(),
                })
            }
            _ => {}
        }

        let temp_path = unique_temp_path(&target);
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(IpcError::from)?;
        flock(temp_file.as_raw_fd(), FlockArg::LockExclusiveNonblock).map_err(IpcError::from)?;

        if mode == CreateMode::OpenIfExists && exists {
            let mut existing = File::open(&target).map_err(IpcError::from)?;
            io::copy(&mut existing, &mut temp_file).map_err(IpcError::from)?;
        }

        Ok(Self {
            target,
            temp_path: Some(temp_path),
            file: temp_file,
            committed: false,
        })
    }

    /// Read/write handle for callers that want `std::io::{Read, Write, Seek}`
    /// directly rather than going through [`AtomicFile::write_all`].
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).map_err(IpcError::from)
    }

    /// `fsync` the temp file, `fsync` its containing directory, then
    /// `rename` the temp file onto the target. After this call the update
    /// is durable and visible to any reader opening the target path.
    pub fn commit(mut self) -> Result<()> {
        let Some(temp_path) = self.temp_path.take() else {
            return Ok(()); // read-only handle; nothing to commit
        };
        self.file.sync_all().map_err(IpcError::from)?;
        if let Some(dir) = self.target.parent() {
            if let Ok(dir_file) = File::open(dir) {
                let _ = dir_file.sync_all();
            }
        }
        std::fs::rename(&temp_path, &self.target).map_err(IpcError::from)?;
        self.committed = true;
        Ok(())
    }

    /// Discard the temp file without touching the target. Equivalent to
    /// dropping the `AtomicFile` without calling `commit`, spelled out for
    /// call sites that want to be explicit about it.
    pub fn cancel(mut self) {
        self.committed = true; // suppress the drop-time cleanup log, we're doing it here
        if let Some(temp_path) = self.temp_path.take() {
            let _ = std::fs::remove_file(temp_path);
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Some(temp_path) = &self.temp_path {
                tracing::debug!(path = ?temp_path, "atomic file dropped without commit, discarding");
                let _ = std::fs::remove_file(temp_path);
            }
        }
    }
}
