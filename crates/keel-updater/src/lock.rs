//! Cooperative inter-process update lock.
//!
//! A lock file created with `create_new` serialises the network and install
//! part of an update across concurrent invocations. The holder's PID is
//! written into the file for diagnostics, and the holder touches the file
//! periodically while it runs, so only a lock whose owner has gone away
//! ages past the configured stale age.
//!
//! A waiter reclaims a stale lock by renaming it to a private name and
//! checking that what it moved is the file it judged stale. If another
//! waiter replaced the lock in between, the fresh lock is linked back into
//! place. Remaining limits: a third invocation creating a lock during that
//! hand-back leaves the replaced holder without a lock file, and a holder
//! whose runtime is suspended for longer than the stale age can be taken
//! over.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::error::UpdateError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Held update lock; the lock file is removed on drop.
#[derive(Debug)]
pub struct UpdateLock {
    path: PathBuf,
    refresher: JoinHandle<()>,
}

impl UpdateLock {
    /// Acquire the lock at `path`, waiting up to `config.timeout_seconds`.
    pub async fn acquire(path: &Path, config: &LockConfig) -> Result<Self, UpdateError> {
        let timeout = Duration::from_secs(config.timeout_seconds);
        let stale_after = Duration::from_secs(config.stale_after_seconds);
        let started = Instant::now();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        loop {
            match std::fs::OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    debug!(path = %path.display(), "Update lock acquired");
                    let every = (stale_after / 3).max(MIN_REFRESH_INTERVAL);
                    return Ok(Self {
                        path: path.to_path_buf(),
                        refresher: tokio::spawn(keep_fresh(path.to_path_buf(), every)),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(seen) = LockStamp::read(path).filter(|s| s.age() > stale_after) {
                        warn!(path = %path.display(), "Reclaiming stale update lock");
                        reclaim(path, &seen)?;
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(UpdateError::LockTimeout(path.display().to_string()));
                    }
                    debug!(path = %path.display(), "Waiting for update lock");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        self.refresher.abort();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to release update lock");
            }
        }
    }
}

/// Identity of a lock file at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LockStamp {
    modified: SystemTime,
    len: u64,
    #[cfg(unix)]
    inode: u64,
}

impl LockStamp {
    fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok()?,
            len: metadata.len(),
            #[cfg(unix)]
            inode: std::os::unix::fs::MetadataExt::ino(&metadata),
        })
    }

    fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.modified)
            .unwrap_or_default()
    }
}

/// Remove the lock at `path` if it is still the one described by `seen`.
///
/// Returns whether the stale lock was removed.
fn reclaim(path: &Path, seen: &LockStamp) -> Result<bool, UpdateError> {
    let mut claimed = path.as_os_str().to_owned();
    claimed.push(format!(".{}.stale", std::process::id()));
    let claimed = PathBuf::from(claimed);

    match std::fs::rename(path, &claimed) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    }

    if LockStamp::read(&claimed).as_ref() == Some(seen) {
        std::fs::remove_file(&claimed)?;
        return Ok(true);
    }

    // Someone replaced the stale lock before the rename; give theirs back.
    if let Err(e) = std::fs::hard_link(&claimed, path) {
        warn!(path = %path.display(), error = %e, "Failed to hand back a live update lock");
    }
    if let Err(e) = std::fs::remove_file(&claimed) {
        warn!(path = %claimed.display(), error = %e, "Failed to remove claimed lock file");
    }
    Ok(false)
}

/// Bump the lock file's mtime every `every` until aborted.
async fn keep_fresh(path: PathBuf, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let touched = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|file| file.set_modified(SystemTime::now()));
        if let Err(e) = touched {
            warn!(path = %path.display(), error = %e, "Failed to refresh update lock");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(timeout_seconds: u64, stale_after_seconds: u64) -> LockConfig {
        LockConfig {
            enabled: true,
            timeout_seconds,
            stale_after_seconds,
        }
    }

    fn write_aged(path: &Path, contents: &str, age: Duration) {
        std::fs::write(path, contents).unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache").join("update.lock");

        let lock = UpdateLock::acquire(&path, &config(1, 600)).await.unwrap();
        assert!(path.exists());
        let pid = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());

        drop(lock);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("update.lock");

        let _held = UpdateLock::acquire(&path, &config(1, 600)).await.unwrap();
        let err = UpdateLock::acquire(&path, &config(1, 600)).await.unwrap_err();
        assert!(matches!(err, UpdateError::LockTimeout(_)));
    }

    #[tokio::test]
    async fn test_lock_released_while_waiting() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("update.lock");

        let held = UpdateLock::acquire(&path, &config(5, 600)).await.unwrap();
        let waiter = {
            let path = path.clone();
            tokio::spawn(async move { UpdateLock::acquire(&path, &config(5, 600)).await })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;
        drop(held);

        let lock = waiter.await.unwrap().unwrap();
        assert_eq!(lock.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_stale_lock_reclaimed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("update.lock");
        write_aged(&path, "99999\n", Duration::from_secs(3600));

        let lock = UpdateLock::acquire(&path, &config(1, 600)).await.unwrap();
        let pid = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_reclaim_hands_back_replaced_lock() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("update.lock");
        write_aged(&path, "1\n", Duration::from_secs(3600));
        let seen = LockStamp::read(&path).unwrap();

        // Another waiter reclaims first and takes the lock itself.
        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, "424242\n").unwrap();

        assert!(!reclaim(&path, &seen).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "424242\n");
        let leftovers = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_reclaim_removes_matching_stale_lock() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("update.lock");
        write_aged(&path, "1\n", Duration::from_secs(3600));
        let seen = LockStamp::read(&path).unwrap();

        assert!(reclaim(&path, &seen).unwrap());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_held_lock_is_kept_fresh() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("update.lock");

        let _held = UpdateLock::acquire(&path, &config(1, 3)).await.unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(3600)).unwrap();
        drop(file);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let age = LockStamp::read(&path).unwrap().age();
        assert!(age < Duration::from_secs(3), "lock age {:?}", age);
    }
}
