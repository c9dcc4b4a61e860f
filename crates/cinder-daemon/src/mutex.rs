//! PID lock file built on advisory locks.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Cross-process mutex backed by an exclusively locked file holding the
/// owner's process id.
///
/// The lock belongs to the open file, so it is dropped by the kernel if the
/// owning process dies. Dropping an owning `FileMutex` releases it.
#[derive(Debug)]
pub struct FileMutex {
    path: PathBuf,
    file: Option<File>,
}

impl FileMutex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_owner(&self) -> bool {
        self.file.is_some()
    }

    /// Try to take the lock without blocking.
    ///
    /// Returns `Ok(false)` when another holder has it.
    pub fn acquire(&mut self) -> io::Result<bool> {
        if self.is_owner() {
            return Ok(true);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        loop {
            let file = self.open()?;
            match self.lock_opened(file)? {
                Some(owned) => return Ok(owned),
                // The file was unlinked between open and lock; start over.
                None => continue,
            }
        }
    }

    fn open(&self) -> io::Result<File> {
        // Opened without truncation so a live owner's pid survives a failed attempt.
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
    }

    /// Lock an already opened handle. `None` when the handle no longer
    /// refers to the file at `path`.
    fn lock_opened(&mut self, mut file: File) -> io::Result<Option<bool>> {
        if FileExt::try_lock_exclusive(&file).is_err() {
            return Ok(Some(false));
        }
        if !is_current(&file, &self.path)? {
            FileExt::unlock(&file)?;
            return Ok(None);
        }

        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        debug!(path = %self.path.display(), "Acquired lock");

        self.file = Some(file);
        Ok(Some(true))
    }

    /// Process id of the current holder, if any.
    ///
    /// When nobody holds the lock a leftover file is stale and is deleted.
    pub fn owner_pid(&self) -> io::Result<Option<u32>> {
        if self.is_owner() {
            return Ok(Some(std::process::id()));
        }

        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if FileExt::try_lock_exclusive(&file).is_ok() {
            // Delete while holding the lock, as in `release`.
            debug!(path = %self.path.display(), "Removing stale lock file");
            let removed = remove_if_exists(&self.path);
            FileExt::unlock(&file)?;
            removed?;
            return Ok(None);
        }

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(contents.trim().parse().ok())
    }

    /// Unlock and delete the lock file. Does nothing unless owned.
    pub fn release(&mut self) -> io::Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        // Delete while still locked so no other process can lock the old inode.
        remove_if_exists(&self.path)?;
        FileExt::unlock(&file)?;
        debug!(path = %self.path.display(), "Released lock");
        Ok(())
    }
}

impl Drop for FileMutex {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

/// Whether `file` is still the inode linked at `path`.
fn is_current(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let opened = file.metadata()?;
    match fs::metadata(path) {
        Ok(linked) => Ok(opened.dev() == linked.dev() && opened.ino() == linked.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("daemon").join("daemon.pid")
    }

    #[test]
    fn test_acquire_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let mut mutex = FileMutex::new(lock_path(&dir));

        assert!(mutex.acquire().unwrap());
        assert!(mutex.is_owner());
        let contents = fs::read_to_string(lock_path(&dir)).unwrap();
        assert_eq!(contents, std::process::id().to_string());
        assert_eq!(mutex.owner_pid().unwrap(), Some(std::process::id()));
    }

    #[test]
    fn test_second_instance_cannot_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = FileMutex::new(lock_path(&dir));
        let mut second = FileMutex::new(lock_path(&dir));

        assert!(first.acquire().unwrap());
        assert!(!second.acquire().unwrap());
        assert!(!second.is_owner());
        assert_eq!(second.owner_pid().unwrap(), Some(std::process::id()));
        // A failed attempt leaves the owner's pid intact.
        assert_eq!(
            fs::read_to_string(lock_path(&dir)).unwrap(),
            std::process::id().to_string()
        );
    }

    #[test]
    fn test_release_allows_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = FileMutex::new(lock_path(&dir));
        let mut second = FileMutex::new(lock_path(&dir));

        assert!(first.acquire().unwrap());
        first.release().unwrap();
        assert!(!first.is_owner());
        assert!(!lock_path(&dir).exists());
        first.release().unwrap();

        assert!(second.acquire().unwrap());
    }

    #[test]
    fn test_drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut mutex = FileMutex::new(lock_path(&dir));
            assert!(mutex.acquire().unwrap());
        }
        assert!(!lock_path(&dir).exists());

        let mut next = FileMutex::new(lock_path(&dir));
        assert!(next.acquire().unwrap());
    }

    #[test]
    fn test_stale_lock_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "999999").unwrap();

        let mutex = FileMutex::new(&path);
        assert_eq!(mutex.owner_pid().unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_cleanup_does_not_allow_two_owners() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "999999").unwrap();

        // A contender opens the stale file, then a status check removes it
        // before the contender gets to lock.
        let mut late = FileMutex::new(&path);
        let opened = late.open().unwrap();
        let observer = FileMutex::new(&path);
        assert_eq!(observer.owner_pid().unwrap(), None);
        assert!(!path.exists());

        assert_eq!(late.lock_opened(opened).unwrap(), None);
        assert!(!late.is_owner());

        let mut fresh = FileMutex::new(&path);
        assert!(fresh.acquire().unwrap());
        assert!(!late.acquire().unwrap());
        assert_eq!(observer.owner_pid().unwrap(), Some(std::process::id()));
    }

    #[test]
    fn test_no_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let mutex = FileMutex::new(lock_path(&dir));
        assert_eq!(mutex.owner_pid().unwrap(), None);
    }
}
