use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Advisory lock keeping a second process from opening the same store.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates the lock file if needed and locks it.
    /// The lock file contains the process ID for debugging purposes.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        Self::try_lock(&file)?;

        // Only rewrite the contents once we own the lock
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    /// Get the path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_lock_writes_pid() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("rankdb.lock");

        let lock = FileLock::lock(&lock_path).expect("Failed to acquire lock");

        let content = fs::read_to_string(&lock_path).expect("Failed to read lock file");
        assert!(content.contains(&std::process::id().to_string()));
        assert_eq!(lock.path(), lock_path.as_path());
    }

    #[test]
    fn test_double_lock() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("rankdb.lock");

        let _lock1 = FileLock::lock(&lock_path).expect("Failed to acquire first lock");

        // flock locks belong to the open file description, so a second open fails
        assert!(FileLock::lock(&lock_path).is_err());
    }

    #[test]
    fn test_auto_unlock_on_drop() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("rankdb.lock");

        {
            let _lock = FileLock::lock(&lock_path).expect("Failed to acquire lock");
        }

        let _lock2 = FileLock::lock(&lock_path).expect("Should be able to acquire lock after drop");
    }
}
