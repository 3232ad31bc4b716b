use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "TASKLOOP_DATA_DIR";

/// Resolved locations of the shared data files.
///
/// Built once at startup and handed to the stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    /// Tasks of the to-do app.
    pub tasks_file: PathBuf,
    /// Goals, shared with the habit tracker.
    pub goals_file: PathBuf,
    /// Habits of the habit tracker.
    pub habits_file: PathBuf,
}

impl DataPaths {
    /// Resolves the data directory and creates it if missing.
    ///
    /// The directory is determined in the following order:
    /// 1. `TASKLOOP_DATA_DIR` environment variable.
    /// 2. `ToDo` under the platform's local data directory
    ///    (`~/.local/share/ToDo` on Linux).
    /// 3. `./ToDo` (fallback).
    pub fn resolve() -> io::Result<Self> {
        let dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let mut p = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
                p.push("ToDo");
                p
            });
        fs::create_dir_all(&dir)?;
        Ok(Self::in_dir(dir))
    }

    /// Paths for an explicit directory, without touching the filesystem.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let data_dir = dir.as_ref().to_path_buf();
        DataPaths {
            tasks_file: data_dir.join("tasks.json"),
            goals_file: data_dir.join("goals.json"),
            habits_file: data_dir.join("habits.json"),
            data_dir,
        }
    }
}
