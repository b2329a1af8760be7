use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, SystemTime};

use uuid::Uuid;

use crate::error::StoreError;
use crate::models::Task;
use crate::thread::Thread;
use crate::time::Instant;

/// Environment variable overriding the store root.
pub const ROOT_ENV: &str = "TIMEMAP_ROOT";

const DEFAULT_LOCK_TIMEOUT: StdDuration = StdDuration::from_secs(5);
const DEFAULT_STALE_LOCK_AGE: StdDuration = StdDuration::from_secs(60);
const LOCK_POLL: StdDuration = StdDuration::from_millis(25);

/// Where the store lives and how long to wait for a contended record.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub lock_timeout: StdDuration,
    /// A lock file untouched for longer than this was left by a crashed
    /// process and is removed.
    pub stale_lock_age: StdDuration,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreConfig {
            root: root.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_lock_age: DEFAULT_STALE_LOCK_AGE,
        }
    }

    /// Resolves the root directory.
    ///
    /// The path is determined in the following order:
    /// 1. `TIMEMAP_ROOT` environment variable.
    /// 2. `~/.local/share/timemap` (on Linux).
    /// 3. `./timemap` (fallback).
    pub fn from_env() -> Self {
        let root = std::env::var(ROOT_ENV).map(PathBuf::from).unwrap_or_else(|_| {
            let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
            p.push("timemap");
            p
        });
        Self::new(root)
    }

    pub fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.root.join("threads").join(partition.dir_name())
    }

    /// Path of the record holding `thread_name` in `partition`.
    pub fn record_path(&self, partition: Partition, thread_name: &str) -> Result<PathBuf, StoreError> {
        validate_thread_name(thread_name)?;
        Ok(self.partition_dir(partition).join(format!("{thread_name}.json")))
    }
}

/// Temporal half of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Completed or expired tasks. Only ever merged into.
    Past,
    /// Pending tasks. Overwritten on every save.
    Future,
}

impl Partition {
    fn dir_name(&self) -> &'static str {
        match self {
            Partition::Past => "past",
            Partition::Future => "future",
        }
    }
}

/// Thread names double as file stems.
pub fn validate_thread_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StoreError::InvalidThreadName { name: name.to_string() });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unloaded,
    Loaded,
    Saving,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub threads: usize,
    pub tasks: usize,
    /// Records skipped because they could not be decoded.
    pub corrupt: Vec<StoreError>,
}

#[derive(Debug, Default)]
pub struct SaveReport {
    /// Done tasks merged into past records.
    pub archived: usize,
    /// Tasks written to future records.
    pub pending: usize,
    /// Future records deleted for retired threads.
    pub retired: usize,
    /// Past records left untouched because they could not be decoded. The
    /// affected done tasks stay in the future record instead.
    pub corrupt: Vec<StoreError>,
}

#[derive(Debug, Default)]
pub struct RefreshReport {
    pub saved: SaveReport,
    pub loaded: LoadReport,
}

/// Owns the live threads and moves them between memory and the store.
///
/// Layout under the root:
/// - `threads/future/{thread}.json`: pending tasks, replaced on every save.
/// - `threads/past/{thread}.json`: completed or expired tasks, merged into.
#[derive(Debug)]
pub struct StateManager {
    config: StoreConfig,
    threads: Vec<Thread>,
    retired: Vec<String>,
    /// Future records the last load could not decode.
    unreadable: Vec<PathBuf>,
    state: Lifecycle,
}

impl StateManager {
    /// Creates the partition directories if needed. Nothing is read yet.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        for partition in [Partition::Past, Partition::Future] {
            let dir = config.partition_dir(partition);
            fs::create_dir_all(&dir).map_err(|e| StoreError::unavailable(&dir, e))?;
        }
        Ok(StateManager {
            config,
            threads: Vec::new(),
            retired: Vec::new(),
            unreadable: Vec::new(),
            state: Lifecycle::Unloaded,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn state(&self) -> Lifecycle {
        self.state
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn thread(&self, name: &str) -> Option<&Thread> {
        self.threads.iter().find(|t| t.name() == name)
    }

    pub fn thread_mut(&mut self, name: &str) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.name() == name)
    }

    /// Adds `thread`, replacing any thread with the same name.
    ///
    /// A name whose future record failed to load is refused until the
    /// record is repaired or removed, so a save cannot overwrite it.
    pub fn add_thread(&mut self, thread: Thread) -> Result<Option<Thread>, StoreError> {
        let path = self.config.record_path(Partition::Future, thread.name())?;
        if self.unreadable.contains(&path) {
            return Err(StoreError::corrupt(
                path,
                "record could not be read; repair or remove it before reusing the thread",
            ));
        }
        self.retired.retain(|n| n != thread.name());
        match self.thread_mut(thread.name()) {
            Some(existing) => Ok(Some(std::mem::replace(existing, thread))),
            None => {
                self.threads.push(thread);
                Ok(None)
            }
        }
    }

    /// Returns the named thread, creating it if it does not exist.
    pub fn ensure_thread(&mut self, name: &str, default_importance: f64) -> Result<&mut Thread, StoreError> {
        if self.thread(name).is_none() {
            self.add_thread(Thread::new(name, default_importance))?;
        }
        self.thread_mut(name)
            .ok_or_else(|| StoreError::InvalidThreadName { name: name.to_string() })
    }

    /// Drops a thread from the working set. Its future record is deleted
    /// on the next save; its past record is kept.
    pub fn remove_thread(&mut self, name: &str) -> Option<Thread> {
        let idx = self.threads.iter().position(|t| t.name() == name)?;
        self.retired.push(name.to_string());
        Some(self.threads.remove(idx))
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.threads.iter().flat_map(|t| t.tasks())
    }

    pub fn task_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.threads.iter_mut().find_map(|t| t.task_mut(id))
    }

    /// Drops a task from whichever thread holds it.
    pub fn remove_task(&mut self, id: Uuid) -> Option<Task> {
        self.threads.iter_mut().find_map(|t| t.remove_task(id))
    }

    /// Reads the history record of a thread.
    pub fn read_past(&self, thread_name: &str) -> Result<Option<Thread>, StoreError> {
        read_record(&self.config.record_path(Partition::Past, thread_name)?)
    }

    /// Reads the pending record of a thread as it is on disk.
    pub fn read_future(&self, thread_name: &str) -> Result<Option<Thread>, StoreError> {
        read_record(&self.config.record_path(Partition::Future, thread_name)?)
    }

    /// Replaces the working set with every future record on disk.
    ///
    /// Records that fail to decode are reported and skipped; the rest load.
    pub fn load(&mut self) -> Result<LoadReport, StoreError> {
        let dir = self.config.partition_dir(Partition::Future);
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::unavailable(&dir, e))?;

        let mut report = LoadReport::default();
        let mut threads: Vec<Thread> = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::unavailable(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let thread = match read_record(&path).and_then(|t| check_loaded(&path, t)) {
                Ok(Some(thread)) => thread,
                Ok(None) => continue,
                Err(e @ StoreError::CorruptRecord { .. }) => {
                    tracing::warn!(error = %e, "skipping corrupt thread record");
                    report.corrupt.push(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            match threads.iter_mut().find(|t| t.name() == thread.name()) {
                Some(existing) => {
                    if let Ok(merged) = existing.union(&thread) {
                        *existing = merged;
                    }
                }
                None => threads.push(thread),
            }
        }
        threads.sort_by(|a, b| a.name().cmp(b.name()));

        report.threads = threads.len();
        report.tasks = threads.iter().map(Thread::len).sum();
        tracing::debug!(threads = report.threads, tasks = report.tasks, "loaded state");

        self.unreadable = report
            .corrupt
            .iter()
            .filter_map(|e| match e {
                StoreError::CorruptRecord { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect();
        self.threads = threads;
        self.retired.clear();
        self.state = Lifecycle::Loaded;
        Ok(report)
    }

    /// Writes the working set out.
    ///
    /// Done tasks are merged into each thread's past record, pending tasks
    /// replace its future record. The past record is written first, so an
    /// interrupted save can leave a task in both records but never in
    /// neither.
    pub fn save(&mut self) -> Result<SaveReport, StoreError> {
        if self.state == Lifecycle::Unloaded {
            return Err(StoreError::NotLoaded);
        }
        self.state = Lifecycle::Saving;
        let result = self.write_all(Instant::now());
        self.state = Lifecycle::Loaded;
        result
    }

    fn write_all(&mut self, now: Instant) -> Result<SaveReport, StoreError> {
        let mut report = SaveReport::default();
        for thread in &self.threads {
            let (done, pending) = thread.partition(now);
            let mut future = pending;
            if !done.is_empty() {
                let past_path = self.config.record_path(Partition::Past, thread.name())?;
                match self.merge_into(&past_path, &done) {
                    Ok(()) => report.archived += done.len(),
                    Err(e @ StoreError::CorruptRecord { .. }) => {
                        tracing::warn!(error = %e, thread = thread.name(), "past record unreadable, keeping done tasks pending");
                        report.corrupt.push(e);
                        future = thread.clone();
                    }
                    Err(e) => return Err(e),
                }
            }
            let future_path = self.config.record_path(Partition::Future, thread.name())?;
            let _lock = RecordLock::acquire(&future_path, &self.config)?;
            write_atomic(&future_path, &future)?;
            report.pending += future.len();
        }

        for name in std::mem::take(&mut self.retired) {
            let path = self.config.record_path(Partition::Future, &name)?;
            let _lock = RecordLock::acquire(&path, &self.config)?;
            match fs::remove_file(&path) {
                Ok(()) => report.retired += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::unavailable(&path, e)),
            }
        }
        Ok(report)
    }

    // Read-modify-write of a past record, under its lock.
    fn merge_into(&self, path: &Path, done: &Thread) -> Result<(), StoreError> {
        let _lock = RecordLock::acquire(path, &self.config)?;
        let merged = match read_record(path)? {
            Some(existing) => existing
                .union(done)
                .map_err(|e| StoreError::corrupt(path, e))?,
            None => done.clone(),
        };
        write_atomic(path, &merged)
    }

    /// Save then load: completed tasks leave the working set for history,
    /// pending ones are re-read from disk.
    pub fn refresh(&mut self) -> Result<RefreshReport, StoreError> {
        let saved = self.save()?;
        let loaded = self.load()?;
        tracing::info!(
            archived = saved.archived,
            pending = saved.pending,
            threads = loaded.threads,
            "refreshed state"
        );
        Ok(RefreshReport { saved, loaded })
    }
}

fn read_record(path: &Path) -> Result<Option<Thread>, StoreError> {
    let s = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == ErrorKind::InvalidData => return Err(StoreError::corrupt(path, e)),
        Err(e) => return Err(StoreError::unavailable(path, e)),
    };
    Thread::from_json(&s)
        .map(Some)
        .map_err(|e| StoreError::corrupt(path, e))
}

// A record must hold the thread its file is named after; anything else
// would be saved under another name and leave the original behind.
fn check_loaded(path: &Path, thread: Option<Thread>) -> Result<Option<Thread>, StoreError> {
    if let Some(thread) = &thread {
        validate_thread_name(thread.name()).map_err(|e| StoreError::corrupt(path, e))?;
        let stem = path.file_stem().and_then(|s| s.to_str());
        if stem != Some(thread.name()) {
            return Err(StoreError::corrupt(
                path,
                format!("record holds thread '{}'", thread.name()),
            ));
        }
    }
    Ok(thread)
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Writes `thread` to a temporary sibling, syncs it, then renames it over
/// `path`.
fn write_atomic(path: &Path, thread: &Thread) -> Result<(), StoreError> {
    let s = thread.to_json().map_err(|e| StoreError::corrupt(path, e))?;
    let tmp = sibling(path, ".tmp");
    let written = (|| -> std::io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        f.write_all(s.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::unavailable(path, e));
    }
    tracing::debug!(path = %path.display(), tasks = thread.len(), "wrote thread record");
    Ok(())
}

/// Exclusive lock on one record, held as a `<record>.lock` file holding
/// the owner's process id.
struct RecordLock {
    path: PathBuf,
}

impl RecordLock {
    fn acquire(record: &Path, config: &StoreConfig) -> Result<Self, StoreError> {
        let path = sibling(record, ".lock");
        let timeout = config.lock_timeout;
        let started = std::time::Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(RecordLock { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    evict_stale_lock(&path, config.stale_lock_age);
                    if started.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout {
                            path,
                            waited_ms: started.elapsed().as_millis(),
                        });
                    }
                    std::thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(StoreError::unavailable(&path, e)),
            }
        }
    }
}

fn evict_stale_lock(path: &Path, stale_age: StdDuration) {
    let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
        return;
    };
    let Ok(age) = SystemTime::now().duration_since(modified) else {
        return;
    };
    if age > stale_age {
        tracing::warn!(path = %path.display(), age_secs = age.as_secs(), "removing stale record lock");
        let _ = fs::remove_file(path);
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release record lock");
        }
    }
}
