//! The cross-process exclusive cache lock.
//!
//! Uses `mkdir` as the atomicity primitive rather than an advisory file
//! lock: directory creation is atomic and behaves consistently across
//! NFS/SMB, where advisory locks are unreliable. A PID file inside the
//! lock directory records the current holder for diagnostics, and a
//! failed acquisition retries with jitter so sibling processes
//! desynchronize instead of thundering the lock directory together.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{CacheError, Result};

/// Default number of `mkdir` attempts before giving up.
pub const DEFAULT_LOCK_ATTEMPTS: u32 = 5;

const BASE_INTERVAL: Duration = Duration::from_millis(50);

/// An acquired exclusive lock over a cache root.
///
/// Dropping the guard releases the lock: removes `lock/pid` then `rmdir`s
/// `lock/`. Both reads and writes of the index acquire this lock, since
/// the JSON index backend cannot be safely read while another process is
/// mid-write.
pub struct CacheLock {
    lock_dir: PathBuf,
}

impl CacheLock {
    /// Attempts to acquire the exclusive lock over `cache_root`, polling up
    /// to `attempts` times.
    pub fn acquire(cache_root: &Path, attempts: u32) -> Result<Self> {
        let lock_dir = cache_root.join("lock");
        let start = Instant::now();

        for attempt in 0..attempts {
            match fs_err::create_dir(&lock_dir) {
                Ok(()) => {
                    write_pid_file(&lock_dir)?;
                    tracing::debug!(attempt, path = %lock_dir.display(), "acquired cache lock");
                    return Ok(Self { lock_dir });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if attempt + 1 == attempts {
                        break;
                    }
                    let delay = jittered_delay();
                    tracing::debug!(
                        attempt,
                        ?delay,
                        "cache lock held by pid {:?}, retrying",
                        read_pid_file(&lock_dir)
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CacheError::LockTimeout {
            attempts,
            waited: start.elapsed(),
            holder: read_pid_file(&lock_dir),
        })
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let pid_file = self.lock_dir.join("pid");
        if let Err(e) = fs_err::remove_file(&pid_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "failed to remove cache lock pid file");
            }
        }
        if let Err(e) = fs_err::remove_dir(&self.lock_dir) {
            tracing::warn!(error = %e, "failed to release cache lock directory");
        }
    }
}

fn write_pid_file(lock_dir: &Path) -> Result<()> {
    let mut f = fs_err::File::create(lock_dir.join("pid"))?;
    write!(f, "{}", std::process::id())?;
    Ok(())
}

/// Reads the holder's PID from `lock/pid`, if present and parseable. A
/// stale directory with an unreadable PID file is still treated as held;
/// it is never force-broken here.
fn read_pid_file(lock_dir: &Path) -> Option<u32> {
    fs_err::read_to_string(lock_dir.join("pid"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// ~50ms scaled by a PID-derived jitter factor in `[1, 2)`, so that sibling
/// processes desynchronize their retries.
fn jittered_delay() -> Duration {
    let pid = std::process::id() as u64;
    // Fold the pid through a multiplicative hash and normalize to [0, 1)
    // as a cheap deterministic-per-process jitter source.
    let folded = pid.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let jitter = (folded >> 32) as f64 / u32::MAX as f64;
    BASE_INTERVAL.mul_f64(1.0 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let lock = CacheLock::acquire(dir.path(), DEFAULT_LOCK_ATTEMPTS).unwrap();
            assert!(dir.path().join("lock").is_dir());
            assert!(dir.path().join("lock/pid").is_file());
            drop(lock);
        }
        assert!(!dir.path().join("lock").exists());
    }

    #[test]
    fn second_acquire_times_out_while_first_holds() {
        let dir = tempfile::tempdir().unwrap();
        let _held = CacheLock::acquire(dir.path(), DEFAULT_LOCK_ATTEMPTS).unwrap();

        let result = CacheLock::acquire(dir.path(), 2);
        assert_matches::assert_matches!(result, Err(CacheError::LockTimeout { attempts: 2, .. }));
    }
}
