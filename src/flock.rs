//! Exclusive directory lock
//!
//! A `FLOCK` file in the data directory held with `flock(LOCK_EX | LOCK_NB)`
//! for as long as the database is open. The OS drops the lock when the file
//! handle closes, including on crash.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StashError};

/// Name of the lock file inside the data directory
pub const LOCK_FILE_NAME: &str = "FLOCK";

pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Lock `dir/FLOCK`; `DatabaseInUse` if another handle holds it
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);

        // No truncate: the holder's pid stays readable until we own the lock
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = try_lock(&file) {
            return Err(match e.kind() {
                io::ErrorKind::WouldBlock => StashError::DatabaseInUse,
                _ => e.into(),
            });
        }

        // Holder's pid, for whoever finds the directory busy
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        debug!(path = %path.display(), "acquired directory lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release now instead of on drop
    pub fn release(self) {
        debug!(path = %self.path.display(), "released directory lock");
        drop(self.file);
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> io::Result<()> {
    tracing::warn!("directory locking is not supported on this platform");
    Ok(())
}
