//! File-backed claim store with atomic read-modify-write
//!
//! The store exclusively owns on-disk state. Callers never touch the
//! files directly: mutations go through [`ClaimStore::with_lock`], which
//! serializes writers behind the advisory lock and commits every staged
//! file via write-to-temp + fsync + rename before the lock is released.

use crate::lock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};
use swarmd_core::types::{AgentStatus, CoordinationLogEntry, WorkItem};
use swarmd_core::{CoordError, CoordResult};

/// Lock acquisition deadline for a single mutation.
const DEFAULT_LOCK_DEADLINE: Duration = Duration::from_secs(5);

/// Name of the whole-directory lock file.
const LOCK_FILE: &str = ".coordination.lock";

/// The logical collections owned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    WorkClaims,
    AgentStatus,
    CoordinationLog,
}

impl Collection {
    pub fn file_name(&self) -> &'static str {
        match self {
            Collection::WorkClaims => "work_claims.json",
            Collection::AgentStatus => "agent_status.json",
            Collection::CoordinationLog => "coordination_log.json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::WorkClaims => "work_claims",
            Collection::AgentStatus => "agent_status",
            Collection::CoordinationLog => "coordination_log",
        }
    }
}

/// Durable store rooted at a coordination directory.
pub struct ClaimStore {
    dir: PathBuf,
    lock_deadline: Duration,
    poisoned: Mutex<HashSet<Collection>>,
}

impl ClaimStore {
    /// Open (creating if needed) the coordination directory.
    pub fn open(dir: impl Into<PathBuf>) -> CoordResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        fs::create_dir_all(dir.join("metrics"))?;
        Ok(Self {
            dir,
            lock_deadline: DEFAULT_LOCK_DEADLINE,
            poisoned: Mutex::new(HashSet::new()),
        })
    }

    /// Override the lock acquisition deadline (tests use short deadlines).
    pub fn with_lock_deadline(mut self, deadline: Duration) -> Self {
        self.lock_deadline = deadline;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, collection: Collection) -> PathBuf {
        self.dir.join(collection.file_name())
    }

    /// Full-document read of a collection without taking the lock.
    /// Returns the parsed value and an opaque version for change
    /// detection between two loads.
    pub fn load<T: DeserializeOwned>(&self, collection: Collection) -> CoordResult<(Vec<T>, u64)> {
        let path = self.path_of(collection);
        let raw = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(CoordError::Io(e)),
        };
        let value = serde_json::from_slice(&raw).map_err(|e| self.corrupt(collection, e))?;
        Ok((value, file_version(&path)))
    }

    /// Atomic read-modify-write of a single collection.
    pub fn mutate<T, R, F>(&self, collection: Collection, f: F) -> CoordResult<R>
    where
        T: DeserializeOwned + Serialize,
        F: FnOnce(&mut Vec<T>) -> CoordResult<R>,
    {
        self.with_lock(|txn| {
            let mut items: Vec<T> = txn.read(collection)?;
            let result = f(&mut items)?;
            txn.stage(collection, &items)?;
            Ok(result)
        })
    }

    /// Run `f` under the exclusive coordination lock. Every collection the
    /// transaction staged is committed (temp + fsync + rename) before the
    /// lock is dropped; an error from `f` commits nothing.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut StoreTxn<'_>) -> CoordResult<R>) -> CoordResult<R> {
        let started = std::time::Instant::now();
        let guard = lock::acquire(&self.dir.join(LOCK_FILE), self.lock_deadline)?;

        let mut txn = StoreTxn {
            store: self,
            staged: HashMap::new(),
        };
        let result = f(&mut txn)?;

        for (collection, content) in txn.staged {
            write_atomic(&self.path_of(collection), content.as_bytes())?;
        }
        sync_dir(&self.dir)?;
        drop(guard);

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "store mutation committed"
        );
        Ok(result)
    }

    /// O(1) durable append of one record to a newline-delimited JSON file
    /// relative to the coordination directory. Not serialized by the
    /// coordination lock: each jsonl file has a single designated writer.
    pub fn append_jsonl<T: Serialize>(&self, relative: impl AsRef<Path>, record: &T) -> CoordResult<()> {
        let path = self.dir.join(relative.as_ref());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Clear a poisoned collection after operator intervention.
    pub fn clear_poison(&self, collection: Collection) {
        self.poisoned.lock().expect("poison set lock").remove(&collection);
    }

    pub fn is_poisoned(&self, collection: Collection) -> bool {
        self.poisoned.lock().expect("poison set lock").contains(&collection)
    }

    fn check_poisoned(&self, collection: Collection) -> CoordResult<()> {
        if self.is_poisoned(collection) {
            return Err(CoordError::Corrupted {
                collection: collection.as_str().to_string(),
                detail: "collection is poisoned; operator intervention required".to_string(),
            });
        }
        Ok(())
    }

    fn corrupt(&self, collection: Collection, e: serde_json::Error) -> CoordError {
        self.poisoned
            .lock()
            .expect("poison set lock")
            .insert(collection);
        tracing::error!(
            collection = collection.as_str(),
            error = %e,
            "collection failed schema validation; refusing further mutations"
        );
        CoordError::Corrupted {
            collection: collection.as_str().to_string(),
            detail: e.to_string(),
        }
    }
}

/// One mutation's view of the store. Reads see earlier staged writes from
/// the same transaction; nothing reaches disk until commit.
pub struct StoreTxn<'a> {
    store: &'a ClaimStore,
    staged: HashMap<Collection, String>,
}

impl StoreTxn<'_> {
    fn read<T: DeserializeOwned>(&self, collection: Collection) -> CoordResult<Vec<T>> {
        self.store.check_poisoned(collection)?;
        if let Some(staged) = self.staged.get(&collection) {
            return serde_json::from_str(staged).map_err(|e| self.store.corrupt(collection, e));
        }
        let (items, _) = self.store.load(collection)?;
        Ok(items)
    }

    fn stage<T: Serialize>(&mut self, collection: Collection, items: &[T]) -> CoordResult<()> {
        self.store.check_poisoned(collection)?;
        self.staged
            .insert(collection, serde_json::to_string_pretty(items)?);
        Ok(())
    }

    pub fn work_claims(&self) -> CoordResult<Vec<WorkItem>> {
        self.read(Collection::WorkClaims)
    }

    pub fn set_work_claims(&mut self, items: Vec<WorkItem>) -> CoordResult<()> {
        self.stage(Collection::WorkClaims, &items)
    }

    pub fn agent_status(&self) -> CoordResult<Vec<AgentStatus>> {
        self.read(Collection::AgentStatus)
    }

    pub fn set_agent_status(&mut self, agents: Vec<AgentStatus>) -> CoordResult<()> {
        self.stage(Collection::AgentStatus, &agents)
    }

    /// Append one coordination log entry. Happens inside the same
    /// mutation as the work-item change it records, so log order is
    /// causal order per work item.
    pub fn append_log(&mut self, entry: CoordinationLogEntry) -> CoordResult<()> {
        let mut log: Vec<CoordinationLogEntry> = self.read(Collection::CoordinationLog)?;
        log.push(entry);
        self.stage(Collection::CoordinationLog, &log)
    }
}

/// Write-to-temp + fsync + rename. A crash at any point leaves either the
/// old file or the new file, never a torn one.
fn write_atomic(path: &Path, bytes: &[u8]) -> CoordResult<()> {
    let dir = path.parent().ok_or_else(|| {
        CoordError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "collection path has no parent directory",
        ))
    })?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("collection");
    let tmp = dir.join(format!(".{}.tmp.{}", file_name, std::process::id()));

    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Flush the directory entry so the rename itself is durable.
fn sync_dir(dir: &Path) -> CoordResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

fn file_version(path: &Path) -> u64 {
    let Ok(meta) = fs::metadata(path) else {
        return 0;
    };
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    mtime_ns ^ meta.len()
}
