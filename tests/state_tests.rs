use std::fs;
use std::path::Path;
use std::time::{Duration as StdDuration, SystemTime};

use tempfile::TempDir;
use timemap::error::StoreError;
use timemap::models::Task;
use timemap::storage::{Lifecycle, Partition, StateManager, StoreConfig};
use timemap::thread::Thread;
use timemap::time::{Duration, Instant};

fn open(dir: &TempDir) -> StateManager {
    let mut manager = StateManager::open(StoreConfig::new(dir.path())).unwrap();
    manager.load().unwrap();
    manager
}

fn ended_task(name: &str) -> Task {
    let start = Instant::now() - Duration::days(2);
    Task::with_times(name, start, Some(start + Duration::hours(1))).unwrap()
}

fn upcoming_task(name: &str) -> Task {
    let start = Instant::now() + Duration::days(2);
    Task::with_times(name, start, Some(start + Duration::hours(1))).unwrap()
}

fn names(thread: &Thread) -> Vec<&str> {
    thread.tasks().iter().map(Task::name).collect()
}

fn leftover_files(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    for partition in ["past", "future"] {
        for entry in fs::read_dir(dir.join("threads").join(partition)).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") || name.ends_with(".lock") {
                found.push(name);
            }
        }
    }
    found
}

#[test]
fn test_open_creates_layout() {
    let dir = TempDir::new().unwrap();
    let manager = StateManager::open(StoreConfig::new(dir.path())).unwrap();
    assert!(dir.path().join("threads/past").is_dir());
    assert!(dir.path().join("threads/future").is_dir());
    assert_eq!(manager.state(), Lifecycle::Unloaded);
    assert!(manager.threads().is_empty());
}

#[test]
fn test_save_before_load_fails() {
    let dir = TempDir::new().unwrap();
    let mut manager = StateManager::open(StoreConfig::new(dir.path())).unwrap();
    assert!(matches!(manager.save(), Err(StoreError::NotLoaded)));
    assert!(matches!(manager.refresh(), Err(StoreError::NotLoaded)));
}

#[test]
fn test_refresh_moves_finished_tasks_to_past() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    let thread = manager.ensure_thread("Work", 5.0).unwrap();
    thread.add_task(ended_task("A"));
    thread.add_task(upcoming_task("B"));

    let report = manager.refresh().unwrap();
    assert_eq!(report.saved.archived, 1);
    assert_eq!(report.saved.pending, 1);
    assert_eq!(report.loaded.threads, 1);
    assert_eq!(report.loaded.tasks, 1);
    assert_eq!(manager.state(), Lifecycle::Loaded);

    let work = manager.thread("Work").unwrap();
    assert_eq!(names(work), vec!["B"]);
    let past = manager.read_past("Work").unwrap().unwrap();
    assert_eq!(names(&past), vec!["A"]);
    let future = manager.read_future("Work").unwrap().unwrap();
    assert_eq!(names(&future), vec!["B"]);
}

#[test]
fn test_completed_task_leaves_working_set() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    let thread = manager.ensure_thread("Home", 5.0).unwrap();
    let task = thread.new_task("Laundry");
    let id = task.id();
    thread.add_task(task);
    manager.refresh().unwrap();
    assert!(manager.tasks().any(|t| t.id() == id));

    manager.task_mut(id).unwrap().complete().unwrap();
    manager.refresh().unwrap();
    assert!(manager.tasks().all(|t| t.id() != id));
    let past = manager.read_past("Home").unwrap().unwrap();
    assert!(past.task(id).unwrap().is_completed());
}

#[test]
fn test_load_replaces_unsaved_changes() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    manager.ensure_thread("Work", 5.0).unwrap().add_task(upcoming_task("Saved"));
    manager.save().unwrap();

    manager.ensure_thread("Work", 5.0).unwrap().add_task(upcoming_task("Unsaved"));
    manager.ensure_thread("Scratch", 5.0).unwrap();
    manager.load().unwrap();

    assert_eq!(manager.threads().len(), 1);
    assert_eq!(names(manager.thread("Work").unwrap()), vec!["Saved"]);
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let task = upcoming_task("Plan trip").with_importance(9.0).unwrap();
    {
        let mut manager = open(&dir);
        manager.add_thread(Thread::new("Travel", 4.0)).unwrap();
        manager.thread_mut("Travel").unwrap().add_task(task.clone());
        manager.save().unwrap();
    }
    let manager = open(&dir);
    let travel = manager.thread("Travel").unwrap();
    assert_eq!(travel.default_importance(), 4.0);
    assert_eq!(travel.tasks(), &[task]);
}

#[test]
fn test_past_record_accumulates_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    let first = ended_task("First");
    manager.ensure_thread("Work", 5.0).unwrap().add_task(first.clone());
    manager.save().unwrap();

    // Saving the same done task again does not duplicate it.
    manager.save().unwrap();
    manager.load().unwrap();
    assert!(manager.thread("Work").unwrap().is_empty());

    manager.thread_mut("Work").unwrap().add_task(ended_task("Second"));
    manager.thread_mut("Work").unwrap().add_task(first);
    manager.save().unwrap();

    let past = manager.read_past("Work").unwrap().unwrap();
    assert_eq!(names(&past), vec!["First", "Second"]);
}

#[test]
fn test_future_record_is_overwritten() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    let task = upcoming_task("Draft");
    let id = task.id();
    manager.ensure_thread("Work", 5.0).unwrap().add_task(task);
    manager.save().unwrap();

    manager.remove_task(id).unwrap();
    manager.thread_mut("Work").unwrap().add_task(upcoming_task("Final"));
    manager.save().unwrap();

    let future = manager.read_future("Work").unwrap().unwrap();
    assert_eq!(names(&future), vec!["Final"]);
}

#[test]
fn test_corrupt_future_record_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    manager.ensure_thread("Good", 5.0).unwrap().add_task(upcoming_task("Fine"));
    manager.save().unwrap();

    let bad = dir.path().join("threads/future/Bad.json");
    fs::write(&bad, "{ not json").unwrap();

    let report = manager.load().unwrap();
    assert_eq!(report.threads, 1);
    assert_eq!(report.corrupt.len(), 1);
    assert!(matches!(&report.corrupt[0], StoreError::CorruptRecord { path, .. } if path == &bad));
    assert!(manager.thread("Good").is_some());

    // The unreadable record is not touched by the next save.
    manager.save().unwrap();
    assert_eq!(fs::read_to_string(&bad).unwrap(), "{ not json");
}

#[test]
fn test_corrupt_past_record_keeps_done_tasks_pending() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    let past_path = dir.path().join("threads/past/Work.json");
    fs::write(&past_path, "garbage").unwrap();

    let thread = manager.ensure_thread("Work", 5.0).unwrap();
    thread.add_task(ended_task("Old"));
    thread.add_task(upcoming_task("New"));

    let report = manager.save().unwrap();
    assert_eq!(report.archived, 0);
    assert_eq!(report.pending, 2);
    assert_eq!(report.corrupt.len(), 1);
    assert_eq!(fs::read_to_string(&past_path).unwrap(), "garbage");

    let future = manager.read_future("Work").unwrap().unwrap();
    assert_eq!(names(&future), vec!["Old", "New"]);
}

#[test]
fn test_missing_store_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    manager.ensure_thread("Work", 5.0).unwrap().add_task(upcoming_task("Task"));
    fs::remove_dir_all(dir.path().join("threads/future")).unwrap();

    assert!(matches!(manager.save(), Err(StoreError::StoreUnavailable { .. })));
    assert!(matches!(manager.load(), Err(StoreError::StoreUnavailable { .. })));
    // A failed save leaves the manager usable.
    assert_eq!(manager.state(), Lifecycle::Loaded);
}

#[test]
fn test_save_leaves_no_temporary_files() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    let thread = manager.ensure_thread("Work", 5.0).unwrap();
    thread.add_task(ended_task("Old"));
    thread.add_task(upcoming_task("New"));
    manager.refresh().unwrap();

    assert!(leftover_files(dir.path()).is_empty());
}

#[test]
fn test_removed_thread_keeps_history() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    let thread = manager.ensure_thread("Hobby", 5.0).unwrap();
    thread.add_task(ended_task("Old"));
    thread.add_task(upcoming_task("New"));
    manager.save().unwrap();

    assert!(manager.remove_thread("Hobby").is_some());
    assert!(manager.remove_thread("Hobby").is_none());
    let report = manager.save().unwrap();
    assert_eq!(report.retired, 1);

    assert!(manager.read_future("Hobby").unwrap().is_none());
    assert_eq!(names(&manager.read_past("Hobby").unwrap().unwrap()), vec!["Old"]);
    manager.load().unwrap();
    assert!(manager.thread("Hobby").is_none());
}

#[test]
fn test_readding_thread_cancels_removal() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    manager.ensure_thread("Hobby", 5.0).unwrap().add_task(upcoming_task("New"));
    manager.save().unwrap();

    manager.remove_thread("Hobby");
    manager.add_thread(Thread::new("Hobby", 5.0)).unwrap();
    let report = manager.save().unwrap();
    assert_eq!(report.retired, 0);
    assert!(manager.read_future("Hobby").unwrap().unwrap().is_empty());
}

#[test]
fn test_contended_record_times_out() {
    let dir = TempDir::new().unwrap();
    let mut config = StoreConfig::new(dir.path());
    config.lock_timeout = StdDuration::from_millis(50);
    let mut manager = StateManager::open(config).unwrap();
    manager.load().unwrap();
    manager.ensure_thread("Work", 5.0).unwrap().add_task(upcoming_task("Task"));

    let lock = dir.path().join("threads/future/Work.json.lock");
    fs::write(&lock, "").unwrap();
    assert!(matches!(manager.save(), Err(StoreError::LockTimeout { .. })));

    fs::remove_file(&lock).unwrap();
    manager.save().unwrap();
    assert!(manager.read_future("Work").unwrap().is_some());
}

#[test]
fn test_thread_names_are_validated() {
    let dir = TempDir::new().unwrap();
    let mut manager = open(&dir);
    for bad in ["", ".hidden", "a/b", "a\\b"] {
        assert!(
            matches!(manager.add_thread(Thread::new(bad, 5.0)), Err(StoreError::InvalidThreadName { .. })),
            "{bad:?} should be rejected"
        );
    }
    assert!(manager.add_thread(Thread::new("Side projects", 5.0)).is_ok());
    assert!(matches!(
        manager.config().record_path(Partition::Past, "../escape"),
        Err(StoreError::InvalidThreadName { .. })
    ));
}

#[test]
fn test_root_from_config() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new(dir.path());
    assert_eq!(
        config.record_path(Partition::Future, "Work").unwrap(),
        dir.path().join("threads").join("future").join("Work.json")
    );
}

#[test]
fn test_record_under_wrong_file_name_is_not_loaded() {
    let dir = TempDir::new().unwrap();
    let mut home = Thread::new("Home", 5.0);
    let task = home.new_task("Laundry");
    let id = task.id();
    home.add_task(task);
    let misplaced = dir.path().join("threads/future/Chores.json");
    fs::create_dir_all(misplaced.parent().unwrap()).unwrap();
    fs::write(&misplaced, home.to_json().unwrap()).unwrap();

    let mut manager = StateManager::open(StoreConfig::new(dir.path())).unwrap();
    let report = manager.load().unwrap();
    assert_eq!(report.threads, 0);
    assert!(matches!(&report.corrupt[..], [StoreError::CorruptRecord { path, .. }] if path == &misplaced));
    assert!(manager.tasks().all(|t| t.id() != id));

    // Completed work stays out of the working set across refreshes.
    let home = manager.ensure_thread("Home", 5.0).unwrap();
    let mut again = home.new_task("Dishes");
    again.complete().unwrap();
    let done = again.id();
    home.add_task(again);
    manager.refresh().unwrap();
    manager.refresh().unwrap();
    assert!(manager.tasks().all(|t| t.id() != done && t.id() != id));
}

#[test]
fn test_unreadable_record_is_not_overwritten() {
    let dir = TempDir::new().unwrap();
    let future = dir.path().join("threads/future");
    fs::create_dir_all(&future).unwrap();
    let record = future.join("Work.json");
    let original = r#"{"name": "Work", "default_importance": 5.0, "tasks": [{"uid": "x", "name": "keep me"}]}"#;
    fs::write(&record, original).unwrap();

    let mut manager = StateManager::open(StoreConfig::new(dir.path())).unwrap();
    assert_eq!(manager.load().unwrap().corrupt.len(), 1);

    assert!(matches!(
        manager.add_thread(Thread::new("Work", 5.0)),
        Err(StoreError::CorruptRecord { .. })
    ));
    assert!(matches!(manager.ensure_thread("Work", 5.0), Err(StoreError::CorruptRecord { .. })));
    manager.ensure_thread("Other", 5.0).unwrap();
    manager.refresh().unwrap();
    assert_eq!(fs::read_to_string(&record).unwrap(), original);

    // Once the record is gone the name can be used again.
    fs::remove_file(&record).unwrap();
    manager.load().unwrap();
    manager.ensure_thread("Work", 5.0).unwrap();
    manager.save().unwrap();
    assert!(manager.read_future("Work").unwrap().is_some());
}

#[test]
fn test_stale_lock_is_evicted() {
    let dir = TempDir::new().unwrap();
    let mut config = StoreConfig::new(dir.path());
    config.lock_timeout = StdDuration::from_millis(200);
    config.stale_lock_age = StdDuration::from_secs(60);
    let mut manager = StateManager::open(config).unwrap();
    manager.load().unwrap();
    manager.ensure_thread("Work", 5.0).unwrap().add_task(upcoming_task("Task"));

    let lock = dir.path().join("threads/future/Work.json.lock");
    let file = fs::File::create(&lock).unwrap();
    file.set_modified(SystemTime::now() - StdDuration::from_secs(600)).unwrap();
    drop(file);

    manager.save().unwrap();
    assert!(manager.read_future("Work").unwrap().is_some());
    assert!(!lock.exists());
}
