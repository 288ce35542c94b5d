//! Exclusive advisory lock on the coordination directory
//!
//! The lock is whole-file and advisory (`flock`-style via fs2). It is held
//! only for the duration of a single mutation; acquisition retries with
//! capped exponential backoff and full jitter until a deadline, then fails
//! with `Contention`.

use fs2::FileExt;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};
use swarmd_core::{CoordError, CoordResult};

/// Backoff base between lock attempts.
const BACKOFF_BASE: Duration = Duration::from_millis(50);
/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Held exclusive lock. Unlocks on drop.
pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Best effort; dropping the handle releases the lock regardless.
        let _ = FileExt::unlock(&self.file);
    }
}

/// Acquire the exclusive coordination lock, retrying up to `deadline`.
pub fn acquire(lock_path: &Path, deadline: Duration) -> CoordResult<LockGuard> {
    // Never truncate: the file may carry diagnostic content owned by the
    // current holder.
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;

    let started = Instant::now();
    let mut delay = BACKOFF_BASE;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(LockGuard { file }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    return Err(CoordError::Contention {
                        waited_ms: elapsed.as_millis() as u64,
                    });
                }
                let jittered = rand::thread_rng().gen_range(Duration::ZERO..=delay);
                let remaining = deadline.saturating_sub(elapsed);
                std::thread::sleep(jittered.min(remaining));
                delay = (delay * 2).min(BACKOFF_CAP);
            }
            Err(e) => return Err(CoordError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_acquire_and_reacquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".coordination.lock");
        let guard = acquire(&path, Duration::from_secs(1)).unwrap();
        drop(guard);
        acquire(&path, Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_contention_after_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".coordination.lock");
        let _held = acquire(&path, Duration::from_secs(1)).unwrap();

        let path2 = path.clone();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            tx.send(acquire(&path2, Duration::from_millis(200))).unwrap();
        });
        let result = rx.recv().unwrap();
        assert!(matches!(result, Err(CoordError::Contention { .. })));
    }

    #[test]
    fn test_blocked_acquire_succeeds_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".coordination.lock");
        let held = acquire(&path, Duration::from_secs(1)).unwrap();

        let path2 = path.clone();
        let handle = std::thread::spawn(move || acquire(&path2, Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(100));
        drop(held);
        assert!(handle.join().unwrap().is_ok());
    }
}
