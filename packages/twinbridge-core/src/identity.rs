//! Persistent pool of relay identities
//!
//! The store is a text file with one hex private key per line; line `n` is
//! slot `n`. Asking for a slot past the end generates keys for every missing
//! slot up to and including it, so slots are stable once handed out.
//!
//! Population is guarded twice: an in-process mutex, and a `<store>.lock` file
//! created exclusively for the duration of the read-modify-write. A lock file
//! older than the stale age is left over from a crashed writer and is removed.
//! The new
//! contents are written to a temporary file and renamed over the store, so a
//! reader never sees a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::evm::signer::{Account, SignerError};

/// How long to wait for another process holding the store lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// A lock file at least this old is treated as abandoned
pub const DEFAULT_STALE_LOCK_AGE: Duration = Duration::from_secs(60);

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("identity store {path} line {line} holds an invalid key: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: SignerError,
    },

    #[error("timed out after {waited:?} waiting for store lock {lock_path}")]
    LockTimeout { lock_path: PathBuf, waited: Duration },
}

/// Exclusive lock file; removed on drop
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(path: PathBuf, timeout: Duration, stale_after: Duration) -> Result<Self, IdentityError> {
        let start = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if lock_age(&path).is_some_and(|age| age >= stale_after) {
                        warn!(path = %path.display(), "Removing stale store lock");
                        match fs::remove_file(&path) {
                            Ok(()) => continue,
                            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                            Err(source) => return Err(IdentityError::Io { path, source }),
                        }
                    }
                    if start.elapsed() >= timeout {
                        return Err(IdentityError::LockTimeout {
                            lock_path: path,
                            waited: start.elapsed(),
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(source) => return Err(IdentityError::Io { path, source }),
            }
        }
    }
}

/// Time since the lock file was last written; `None` if it is gone
fn lock_age(path: &Path) -> Option<Duration> {
    fs::metadata(path).ok()?.modified().ok()?.elapsed().ok()
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove store lock");
        }
    }
}

/// Hands out stable identities by slot number
pub struct IdentityAllocator {
    path: PathBuf,
    lock_timeout: Duration,
    stale_lock_age: Duration,
    write_guard: Mutex<()>,
}

impl IdentityAllocator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_lock_age: DEFAULT_STALE_LOCK_AGE,
            write_guard: Mutex::new(()),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Age after which a leftover lock file is removed
    pub fn with_stale_lock_age(mut self, age: Duration) -> Self {
        self.stale_lock_age = age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn io_err(&self, source: io::Error) -> IdentityError {
        IdentityError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Stored key lines; a missing store is empty
    fn read_keys(&self) -> Result<Vec<String>, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn parse_slot(&self, keys: &[String], slot: usize) -> Result<Account, IdentityError> {
        Account::from_private_key(&keys[slot]).map_err(|source| IdentityError::Corrupt {
            path: self.path.clone(),
            line: slot + 1,
            source,
        })
    }

    /// Number of identities currently stored
    pub fn len(&self) -> Result<usize, IdentityError> {
        Ok(self.read_keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, IdentityError> {
        Ok(self.len()? == 0)
    }

    /// The identity in `slot`, creating it (and any earlier missing slots) if needed
    pub fn get_identity(&self, slot: usize) -> Result<Account, IdentityError> {
        let keys = self.read_keys()?;
        if slot < keys.len() {
            return self.parse_slot(&keys, slot);
        }

        let _local = self.write_guard.lock().unwrap_or_else(|p| p.into_inner());
        let _file_lock = StoreLock::acquire(self.lock_path(), self.lock_timeout, self.stale_lock_age)?;

        // Someone may have populated the store while we waited
        let mut keys = self.read_keys()?;
        if slot >= keys.len() {
            let missing = slot + 1 - keys.len();
            for _ in 0..missing {
                keys.push(Account::random().secret_hex().expose().clone());
            }
            self.write_keys(&keys)?;
            info!(
                path = %self.path.display(),
                created = missing,
                total = keys.len(),
                "Generated new identities"
            );
        } else {
            debug!(slot, "Slot populated concurrently");
        }

        self.parse_slot(&keys, slot)
    }

    /// Replace the store atomically with owner-only permissions
    fn write_keys(&self, keys: &[String]) -> Result<(), IdentityError> {
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = open_private(&tmp_path).map_err(|e| self.io_err(e))?;
        for key in keys {
            writeln!(file, "{}", key).map_err(|e| self.io_err(e))?;
        }
        file.sync_all().map_err(|e| self.io_err(e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_err(e))
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = IdentityAllocator::new(dir.path().join("identities.txt"));

        let first = allocator.get_identity(0).unwrap().address();
        let again = allocator.get_identity(0).unwrap().address();
        assert_eq!(first, again);
        assert_eq!(allocator.len().unwrap(), 1);
    }

    #[test]
    fn test_far_slot_fills_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let allocator = IdentityAllocator::new(dir.path().join("identities.txt"));

        let third = allocator.get_identity(3).unwrap().address();
        assert_eq!(allocator.len().unwrap(), 4);
        assert_eq!(allocator.get_identity(3).unwrap().address(), third);

        let addresses: std::collections::HashSet<_> = (0..4)
            .map(|slot| allocator.get_identity(slot).unwrap().address())
            .collect();
        assert_eq!(addresses.len(), 4);
    }

    #[test]
    fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.txt");
        let address = IdentityAllocator::new(&path).get_identity(1).unwrap().address();
        assert_eq!(IdentityAllocator::new(&path).get_identity(1).unwrap().address(), address);
        assert!(!dir.path().join("identities.txt.lock").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let allocator = IdentityAllocator::new(dir.path().join("identities.txt"));
        allocator.get_identity(0).unwrap();
        let mode = fs::metadata(allocator.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_corrupt_line_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.txt");
        fs::write(&path, "zz-not-hex\n").unwrap();
        let err = IdentityAllocator::new(&path).get_identity(0).unwrap_err();
        assert!(matches!(err, IdentityError::Corrupt { line: 1, .. }));
    }

    #[test]
    fn test_held_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.txt");
        fs::write(dir.path().join("identities.txt.lock"), "1\n").unwrap();
        let allocator = IdentityAllocator::new(&path).with_lock_timeout(Duration::from_millis(50));
        assert!(matches!(
            allocator.get_identity(0),
            Err(IdentityError::LockTimeout { .. })
        ));
    }

    #[test]
    fn test_leftover_lock_from_crashed_writer_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.txt");
        let lock = dir.path().join("identities.txt.lock");
        fs::write(&lock, "4242\n").unwrap();
        let allocator = IdentityAllocator::new(&path)
            .with_lock_timeout(Duration::from_secs(5))
            .with_stale_lock_age(Duration::from_millis(30));

        let address = allocator.get_identity(0).unwrap().address();
        assert_eq!(allocator.get_identity(0).unwrap().address(), address);
        assert!(!lock.exists());
    }
}
