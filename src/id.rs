//! Batch id generators
//!
//! Batch ids must grow across restarts and never repeat: replay pairs
//! records with their BatchEnd by id. The generator is handed to the
//! database at open, so tests can inject a plain counter.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StashError};

/// Name of the lease file inside the data directory
pub const ID_FILE_NAME: &str = "BATCH_ID";

/// Ids reserved per lease write
pub const DEFAULT_LEASE_SIZE: u64 = 1024;

const LEASE_VERSION: u32 = 1;

pub trait IdGenerator: Send + Sync {
    /// Next id, strictly greater than every id handed out before
    fn generate(&self) -> Result<u64>;
}

/// In-memory counter starting at 1
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter whose first id is `last + 1`
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }
}

impl IdGenerator for SequenceGenerator {
    fn generate(&self) -> Result<u64> {
        Ok(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Lease {
    version: u32,
    /// Every id <= high_water may already have been handed out
    high_water: u64,
}

struct LeaseState {
    next: u64,
    /// Last id covered by the durable lease
    limit: u64,
}

/// Hands out ids from leased ranges; a range's upper bound is durable
/// before any id in it is returned, so a restart resumes above it.
pub struct PersistentIdGenerator {
    path: PathBuf,
    lease_size: u64,
    state: Mutex<LeaseState>,
}

impl PersistentIdGenerator {
    pub fn open(dir: &Path) -> Result<Self> {
        Self::with_lease_size(dir, DEFAULT_LEASE_SIZE)
    }

    pub fn with_lease_size(dir: &Path, lease_size: u64) -> Result<Self> {
        if lease_size == 0 {
            return Err(StashError::Config("id lease size must be > 0".into()));
        }

        let path = dir.join(ID_FILE_NAME);
        let high_water = match fs::read(&path) {
            Ok(bytes) => {
                let lease: Lease = bincode::deserialize(&bytes)?;
                if lease.version != LEASE_VERSION {
                    return Err(StashError::Serialization(format!(
                        "unsupported id lease version {}",
                        lease.version
                    )));
                }
                lease.high_water
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), high_water, "opened batch id lease");
        Ok(Self {
            path,
            lease_size,
            state: Mutex::new(LeaseState {
                next: high_water + 1,
                limit: high_water,
            }),
        })
    }

    fn persist(&self, high_water: u64) -> Result<()> {
        let lease = Lease {
            version: LEASE_VERSION,
            high_water,
        };
        let bytes = bincode::serialize(&lease)?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        sync_parent_dir(&self.path)?;
        Ok(())
    }
}

/// Make a rename inside the directory durable
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) => File::open(dir)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl IdGenerator for PersistentIdGenerator {
    fn generate(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if state.next > state.limit {
            let limit = state.limit + self.lease_size;
            self.persist(limit)?;
            debug!(limit, "extended batch id lease");
            state.limit = limit;
        }
        let id = state.next;
        state.next += 1;
        Ok(id)
    }
}
