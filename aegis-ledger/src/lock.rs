use std::{
    fs::{self, File, OpenOptions},
    io,
    os::{fd::AsRawFd, unix::fs::MetadataExt},
    path::{Path, PathBuf},
};

use crate::error::{LedgerError, Result};

/// Exclusive advisory lock on a partition's lock file, released on drop.
///
/// `flock` locks belong to the open file description, so two handles in the
/// same process exclude each other just like two processes do.
///
/// The lock file may be unlinked by its holder (see [`PartitionLock::remove`]).
/// A waiter that wakes up holding a lock on an unlinked inode starts over on
/// whatever file the path names now.
#[derive(Debug)]
pub struct PartitionLock {
    file: File,
}

impl PartitionLock {
    pub fn acquire(path: PathBuf) -> Result<Self> {
        loop {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(|source| LedgerError::Lock {
                    path: path.clone(),
                    source,
                })?;

            flock(&file).map_err(|source| LedgerError::Lock {
                path: path.clone(),
                source,
            })?;

            if still_linked(&file, &path).map_err(|source| LedgerError::Lock {
                path: path.clone(),
                source,
            })? {
                return Ok(Self { file });
            }
        }
    }

    /// Unlink the lock file, then release the lock.
    pub fn remove(self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LedgerError::Lock {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

fn flock(file: &File) -> io::Result<()> {
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc == 0 {
            return Ok(());
        }

        let error = io::Error::last_os_error();
        if error.kind() != io::ErrorKind::Interrupted {
            return Err(error);
        }
    }
}

/// Whether `path` still names the inode behind `file`
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl Drop for PartitionLock {
    fn drop(&mut self) {
        // SAFETY: as above; closing the file would release the lock anyway.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    #[test]
    fn test_waiter_relocks_after_holder_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".2024-01-01.lock");

        let held = PartitionLock::acquire(path.clone()).unwrap();

        let waiter = {
            let path = path.clone();
            thread::spawn(move || PartitionLock::acquire(path).unwrap())
        };

        thread::sleep(Duration::from_millis(100));
        held.remove(&path).unwrap();

        let relocked = waiter.join().unwrap();
        assert!(still_linked(&relocked.file, &path).unwrap());
    }

    #[test]
    fn test_remove_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".2024-01-01.lock");

        let lock = PartitionLock::acquire(path.clone()).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(lock.remove(&path).is_ok());
    }
}
