use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};
use crate::models::{Goal, Task};

/// Persistence of the task list.
pub trait TaskStore {
    /// Loads all tasks in stored order.
    ///
    /// Returns an empty vector if the file does not exist or cannot be read.
    fn load(&self) -> Vec<Task>;

    /// Replaces the stored list atomically.
    fn save(&self, tasks: &[Task]) -> StoreResult<()>;

    /// Highest id this store has ever persisted, including deleted tasks.
    fn last_issued_id(&self) -> u64;
}

/// Persistence of the goal list shared with the habit tracker.
pub trait GoalStore {
    fn load(&self) -> Vec<Goal>;
    fn save(&self, goals: &[Goal]) -> StoreResult<()>;

    /// Highest goal id ever persisted, including deleted goals.
    fn last_issued_id(&self) -> u64;
}

/// Persistence of the habit tracker's records, which link to goals by `goal_id`.
pub trait HabitStore {
    fn load(&self) -> Vec<Value>;
    fn save(&self, habits: &[Value]) -> StoreResult<()>;
}

/// Hands out task ids that are never reused, even after deletions.
#[derive(Debug, Clone, Copy)]
pub struct IdAllocator {
    last: u64,
}

impl IdAllocator {
    pub fn new(last_issued: u64, tasks: &[Task]) -> Self {
        let max_in_list = tasks.iter().map(|t| t.id).max().unwrap_or(0);
        IdAllocator { last: last_issued.max(max_in_list) }
    }

    pub fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

/// Advisory lock held on a `<file>.lock` sidecar until dropped.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Blocks until a shared (read) lock is held.
    pub fn shared(target: &Path) -> io::Result<Self> {
        Self::acquire(target, false)
    }

    /// Blocks until an exclusive (write) lock is held.
    pub fn exclusive(target: &Path) -> io::Result<Self> {
        Self::acquire(target, true)
    }

    fn acquire(target: &Path, exclusive: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(sidecar(target, "lock"))?;
        lock_file(&file, exclusive)?;
        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock_file(&self.file);
    }
}

#[cfg(unix)]
fn lock_file(file: &File, exclusive: bool) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn lock_file(_file: &File, _exclusive: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock_file(_file: &File) {}

/// `tasks.json` + `lock` -> `tasks.json.lock`
fn sidecar(path: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Reads a JSON array, falling back to empty on any failure.
fn read_json_list<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    if !path.exists() {
        return Vec::new();
    }
    let _lock = match FileLock::shared(path) {
        Ok(lock) => Some(lock),
        Err(e) => {
            warn!("could not lock {} for reading: {}", path.display(), e);
            None
        }
    };
    let mut f = match OpenOptions::new().read(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!("could not open {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    let mut s = String::new();
    if let Err(e) = f.read_to_string(&mut s) {
        warn!("could not read {}: {}", path.display(), e);
        return Vec::new();
    }
    serde_json::from_str(&s).unwrap_or_else(|e| {
        warn!("{} is not a valid list, treating as empty: {}", path.display(), e);
        Vec::new()
    })
}

fn to_json<T: Serialize>(items: &[T], what: &'static str) -> StoreResult<String> {
    serde_json::to_string_pretty(items).map_err(|source| StoreError::Serialize { what, source })
}

/// Creates the parent directory if needed and takes the exclusive lock of `path`.
fn lock_for_write(path: &Path) -> StoreResult<FileLock> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    }
    FileLock::exclusive(path).map_err(|e| StoreError::io(path, e))
}

/// Writes `bytes` to a temp file next to `path`, then renames it over `path`.
///
/// The previous file stays intact if anything fails before the rename.
fn replace_file(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| StoreError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Highest id ever saved to `path`, kept in a `<file>.seq` sidecar.
fn read_seq(path: &Path) -> u64 {
    fs::read_to_string(sidecar(path, "seq"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Replaces the list at `path` and raises its id sequence to `max_id`, both
/// under one exclusive lock.
///
/// The sequence is written first: if that fails nothing is saved, and if the
/// list write fails the sequence only skips ids.
fn save_sequenced<T: Serialize>(
    path: &Path,
    items: &[T],
    max_id: u64,
    what: &'static str,
) -> StoreResult<()> {
    let json = to_json(items, what)?;
    let _lock = lock_for_write(path)?;
    if max_id > read_seq(path) {
        replace_file(&sidecar(path, "seq"), max_id.to_string().as_bytes())?;
    }
    replace_file(path, json.as_bytes())?;
    debug!("wrote {} {} to {}", items.len(), what, path.display());
    Ok(())
}

/// Task list stored as a pretty-printed JSON array.
///
/// The highest id ever saved is kept in a `<file>.seq` sidecar so ids are not
/// reissued after the newest task is deleted.
#[derive(Debug, Clone)]
pub struct JsonTaskStore {
    path: PathBuf,
}

impl JsonTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonTaskStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskStore for JsonTaskStore {
    fn load(&self) -> Vec<Task> {
        read_json_list(&self.path)
    }

    fn save(&self, tasks: &[Task]) -> StoreResult<()> {
        let max_id = tasks.iter().map(|t| t.id).max().unwrap_or(0);
        save_sequenced(&self.path, tasks, max_id, "tasks")
    }

    fn last_issued_id(&self) -> u64 {
        read_seq(&self.path)
    }
}

/// Goal list stored as a JSON array, read under a shared lock and written
/// under an exclusive one since both desktop apps touch it.
///
/// Keeps its own `<file>.seq` so a deleted goal's id is never handed to a new
/// goal while habits may still point at it.
#[derive(Debug, Clone)]
pub struct JsonGoalStore {
    path: PathBuf,
}

impl JsonGoalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonGoalStore { path: path.into() }
    }
}

impl GoalStore for JsonGoalStore {
    fn load(&self) -> Vec<Goal> {
        read_json_list(&self.path)
    }

    fn save(&self, goals: &[Goal]) -> StoreResult<()> {
        let max_id = goals.iter().map(|g| g.id).max().unwrap_or(0);
        save_sequenced(&self.path, goals, max_id, "goals")
    }

    fn last_issued_id(&self) -> u64 {
        read_seq(&self.path)
    }
}

/// The habit tracker's `habits.json`.
///
/// Records are kept as raw JSON so fields this crate does not know about
/// survive a rewrite.
#[derive(Debug, Clone)]
pub struct JsonHabitStore {
    path: PathBuf,
}

impl JsonHabitStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonHabitStore { path: path.into() }
    }
}

impl HabitStore for JsonHabitStore {
    fn load(&self) -> Vec<Value> {
        read_json_list(&self.path)
    }

    fn save(&self, habits: &[Value]) -> StoreResult<()> {
        let json = to_json(habits, "habits")?;
        let _lock = lock_for_write(&self.path)?;
        replace_file(&self.path, json.as_bytes())?;
        debug!("wrote {} habits to {}", habits.len(), self.path.display());
        Ok(())
    }
}

/// In-memory task store.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
    last_issued: Mutex<u64>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let last = tasks.iter().map(|t| t.id).max().unwrap_or(0);
        MemoryTaskStore {
            tasks: Mutex::new(tasks),
            last_issued: Mutex::new(last),
            ..Self::default()
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Makes every following save fail with an I/O error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl TaskStore for MemoryTaskStore {
    fn load(&self) -> Vec<Task> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn save(&self, tasks: &[Task]) -> StoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::io(
                "<memory>",
                io::Error::new(io::ErrorKind::Other, "save disabled"),
            ));
        }
        if let Ok(mut stored) = self.tasks.lock() {
            *stored = tasks.to_vec();
        }
        if let Ok(mut last) = self.last_issued.lock() {
            let max_in_list = tasks.iter().map(|t| t.id).max().unwrap_or(0);
            *last = (*last).max(max_in_list);
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn last_issued_id(&self) -> u64 {
        self.last_issued.lock().map(|l| *l).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, TaskKind, TaskStatus};
    use tempfile::TempDir;

    fn task(id: u64) -> Task {
        Task {
            id,
            title: format!("task {}", id),
            description: String::new(),
            priority: Priority::Next,
            due_date: Some("2024-01-01".into()),
            status: TaskStatus::Open,
            goal_id: None,
            time_spent: None,
            recurrence: None,
            kind: TaskKind::Single,
            recurrence_end_date: None,
            created_at: "2024-01-01T00:00:00".into(),
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonTaskStore::new(dir.path().join("tasks.json"));
        assert!(store.load().is_empty());
        assert_eq!(store.last_issued_id(), 0);
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(JsonTaskStore::new(&path).load().is_empty());
    }

    #[test]
    fn save_then_load_keeps_order_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = JsonTaskStore::new(dir.path().join("tasks.json"));
        store.save(&[task(2), task(1), task(3)]).unwrap();

        let ids: Vec<u64> = store.load().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["tasks.json", "tasks.json.lock", "tasks.json.seq"]);
    }

    #[test]
    fn sequence_survives_deleting_the_newest_task() {
        let dir = TempDir::new().unwrap();
        let store = JsonTaskStore::new(dir.path().join("tasks.json"));
        store.save(&[task(1), task(2), task(3)]).unwrap();
        store.save(&[task(1), task(2)]).unwrap();

        assert_eq!(store.last_issued_id(), 3);
        let mut ids = IdAllocator::new(store.last_issued_id(), &store.load());
        assert_eq!(ids.next_id(), 4);
    }

    #[test]
    fn goals_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let store = JsonGoalStore::new(dir.path().join("goals.json"));
        let goal = Goal {
            id: 1,
            title: "Learn Rust".into(),
            description: String::new(),
            time_goal: Some(200.0),
            created_at: "2024-01-01T00:00:00".into(),
        };
        store.save(&[goal.clone()]).unwrap();
        assert_eq!(store.load(), vec![goal]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_sequence_write_leaves_tasks_untouched() {
        let dir = TempDir::new().unwrap();
        let store = JsonTaskStore::new(dir.path().join("tasks.json"));
        store.save(&[task(1)]).unwrap();
        fs::remove_file(dir.path().join("tasks.json.seq")).unwrap();
        fs::create_dir(dir.path().join("tasks.json.seq")).unwrap();

        assert!(store.save(&[task(1), task(2)]).is_err());
        let ids: Vec<u64> = store.load().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn goal_sequence_survives_deleting_the_newest_goal() {
        let dir = TempDir::new().unwrap();
        let store = JsonGoalStore::new(dir.path().join("goals.json"));
        let goal = |id: u64| Goal {
            id,
            title: format!("goal {}", id),
            description: String::new(),
            time_goal: None,
            created_at: String::new(),
        };
        store.save(&[goal(1), goal(2)]).unwrap();
        store.save(&[goal(1)]).unwrap();
        assert_eq!(store.last_issued_id(), 2);
    }

    #[test]
    fn habits_keep_fields_this_crate_does_not_model() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("habits.json");
        let raw = r#"[{"id":1,"title":"Run","goal_id":3,"check_ins":["2024-01-01"],"color":"red"}]"#;
        fs::write(&path, raw).unwrap();
        let store = JsonHabitStore::new(&path);

        let mut habits = store.load();
        habits[0]["goal_id"] = Value::Null;
        store.save(&habits).unwrap();

        let reloaded = store.load();
        assert!(reloaded[0]["goal_id"].is_null());
        assert_eq!(reloaded[0]["color"], "red");
        assert_eq!(reloaded[0]["check_ins"][0], "2024-01-01");
    }

    #[test]
    fn memory_store_can_fail_saves() {
        let store = MemoryTaskStore::new();
        store.fail_saves(true);
        assert!(store.save(&[task(1)]).is_err());
        assert!(store.load().is_empty());
        assert_eq!(store.save_count(), 0);
    }
}
