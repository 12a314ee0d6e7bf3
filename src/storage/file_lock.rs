use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::layout::StorageLayout;

/// Advisory lock on `<data_dir>/.lock`, held by whichever component owns the
/// store/index pair (engine, shared database, compactor, bulk loader).
/// Read-only engines share it with each other but not with an owner.
/// Released on drop. Non-blocking: a conflicting holder fails with `Locked`.
pub struct FileLock {
    file: File,
    path: PathBuf,
    shared: bool,
}

impl FileLock {
    /// Exclusive lock for anything that writes the store or index.
    pub fn acquire(layout: &StorageLayout) -> Result<Self> {
        Self::take(layout, false)
    }

    pub fn acquire_shared(layout: &StorageLayout) -> Result<Self> {
        Self::take(layout, true)
    }

    fn take(layout: &StorageLayout, shared: bool) -> Result<Self> {
        let path = layout.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match try_lock(&file, shared) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(Error::new(
                    ErrorKind::Locked,
                    format!("store at {:?} is in use", layout.base_dir),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        debug!(lock = %path.display(), shared, "store lock taken");
        Ok(FileLock { file, path, shared })
    }

    /// `None` when locking is disabled in the config.
    pub fn acquire_if(layout: &StorageLayout, enabled: bool) -> Result<Option<Self>> {
        if enabled {
            Self::acquire(layout).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn acquire_shared_if(layout: &StorageLayout, enabled: bool) -> Result<Option<Self>> {
        if enabled {
            Self::acquire_shared(layout).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

#[cfg(unix)]
fn try_lock(file: &File, shared: bool) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let mode = if shared { libc::LOCK_SH } else { libc::LOCK_EX };
    let rc = unsafe { libc::flock(file.as_raw_fd(), mode | libc::LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

// Single-process use only off unix
#[cfg(not(unix))]
fn try_lock(_file: &File, _shared: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use tempfile::TempDir;

    #[test]
    fn lock_is_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(&Config::default().with_data_dir(dir.path())).unwrap();

        let first = FileLock::acquire(&layout).unwrap();
        assert!(first.path().ends_with(".lock"));
        assert_eq!(FileLock::acquire(&layout).err().unwrap().kind, ErrorKind::Locked);

        drop(first);
        assert!(FileLock::acquire(&layout).is_ok());
        assert!(FileLock::acquire_if(&layout, false).unwrap().is_none());
    }

    #[test]
    fn shared_holders_exclude_only_the_owner() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(&Config::default().with_data_dir(dir.path())).unwrap();

        let first = FileLock::acquire_shared(&layout).unwrap();
        let second = FileLock::acquire_shared(&layout).unwrap();
        assert!(first.is_shared() && second.is_shared());
        assert_eq!(FileLock::acquire(&layout).err().unwrap().kind, ErrorKind::Locked);

        drop(first);
        drop(second);
        let owner = FileLock::acquire(&layout).unwrap();
        assert!(!owner.is_shared());
        assert_eq!(FileLock::acquire_shared(&layout).err().unwrap().kind, ErrorKind::Locked);
    }
}
