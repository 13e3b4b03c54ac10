//! Durable store for tasks, notes, network cameras, settings, and sessions.
//!
//! Backed by SQLite through `rusqlite`, single-writer discipline enforced
//! by wrapping the connection in a `parking_lot::Mutex` — the same pattern
//! the teacher crate uses to serialize access to its chunk pool.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::error::{Result, VideoMemoryError};
use crate::model::{Device, DeviceSource, NoteEntry, Task, TaskStatus};

pub struct TaskStore {
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open (or create) the store at `path`, running schema migration.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| VideoMemoryError::Store(format!("open {path:?}: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| VideoMemoryError::Store(format!("enable foreign_keys: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, used by tests that don't need persistence across
    /// process restarts.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| VideoMemoryError::Store(format!("open in-memory: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| VideoMemoryError::Store(format!("enable foreign_keys: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                task_id     TEXT PRIMARY KEY,
                task_number INTEGER NOT NULL,
                task_desc   TEXT NOT NULL,
                done        INTEGER NOT NULL,
                io_id       TEXT NOT NULL,
                status      TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS task_notes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id     TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
                content     TEXT NOT NULL,
                timestamp   INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS network_cameras (
                io_id       TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                url         TEXT NOT NULL,
                pull_url    TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sessions (
                session_id  TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );
            ",
        )
        .map_err(|e| VideoMemoryError::Store(format!("migrate: {e}")))?;
        Ok(())
    }

    // ---- tasks ----------------------------------------------------------

    pub fn save_task(&self, task: &Task, created_at: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tasks (task_id, task_number, task_desc, done, io_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.task_id,
                task.task_number as i64,
                task.task_desc(),
                task.is_done() as i64,
                task.io_id,
                task.status.as_str(),
                created_at,
            ],
        )
        .map_err(|e| VideoMemoryError::Store(format!("save_task: {e}")))?;
        Ok(())
    }

    pub fn update_task_done(&self, task_id: &str, done: bool, status: Option<TaskStatus>) -> Result<()> {
        let conn = self.conn.lock();
        match status {
            Some(status) => conn.execute(
                "UPDATE tasks SET done = ?1, status = ?2 WHERE task_id = ?3",
                params![done as i64, status.as_str(), task_id],
            ),
            None => conn.execute(
                "UPDATE tasks SET done = ?1 WHERE task_id = ?2",
                params![done as i64, task_id],
            ),
        }
        .map_err(|e| VideoMemoryError::Store(format!("update_task_done: {e}")))?;
        Ok(())
    }

    pub fn update_task_desc(&self, task_id: &str, desc: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE tasks SET task_desc = ?1 WHERE task_id = ?2",
            params![desc, task_id],
        )
        .map_err(|e| VideoMemoryError::Store(format!("update_task_desc: {e}")))?;
        Ok(())
    }

    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tasks WHERE task_id = ?1", params![task_id])
            .map_err(|e| VideoMemoryError::Store(format!("delete_task: {e}")))?;
        Ok(())
    }

    pub fn save_note(&self, task_id: &str, note: &NoteEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO task_notes (task_id, content, timestamp) VALUES (?1, ?2, ?3)",
            params![task_id, note.content, note.timestamp],
        )
        .map_err(|e| VideoMemoryError::Store(format!("save_note: {e}")))?;
        Ok(())
    }

    /// Load every task joined with its notes, ordered by numeric `task_id`.
    pub fn load_all_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT task_id, task_number, task_desc, done, io_id, status FROM tasks")
            .map_err(|e| VideoMemoryError::Store(format!("load_all_tasks: {e}")))?;

        let mut rows: Vec<(String, i64, String, bool, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)? != 0,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(|e| VideoMemoryError::Store(format!("load_all_tasks: {e}")))?
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| VideoMemoryError::Store(format!("load_all_tasks: {e}")))?;

        rows.sort_by_key(|r| r.0.parse::<i64>().unwrap_or(i64::MAX));

        let mut tasks = Vec::with_capacity(rows.len());
        for (task_id, task_number, task_desc, done, io_id, status) in rows {
            let mut note_stmt = conn
                .prepare("SELECT content, timestamp FROM task_notes WHERE task_id = ?1 ORDER BY id ASC")
                .map_err(|e| VideoMemoryError::Store(format!("load notes: {e}")))?;
            let notes = note_stmt
                .query_map(params![task_id], |row| {
                    Ok(NoteEntry::new(row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| VideoMemoryError::Store(format!("load notes: {e}")))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| VideoMemoryError::Store(format!("load notes: {e}")))?;

            tasks.push(Task::from_parts(
                task_id,
                task_number as usize,
                task_desc,
                notes,
                done,
                io_id,
                TaskStatus::parse(&status),
            ));
        }
        Ok(tasks)
    }

    pub fn get_max_task_id(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT task_id FROM tasks")
            .map_err(|e| VideoMemoryError::Store(format!("get_max_task_id: {e}")))?;
        let max = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| VideoMemoryError::Store(format!("get_max_task_id: {e}")))?
            .filter_map(|r| r.ok())
            .filter_map(|s| s.parse::<i64>().ok())
            .max()
            .unwrap_or(-1);
        Ok(max)
    }

    /// Startup crash-recovery: rewrite any `done = false` task to
    /// `status = terminated`, returning the number of rows affected.
    pub fn terminate_active_tasks(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE tasks SET status = 'terminated' WHERE done = 0",
                [],
            )
            .map_err(|e| VideoMemoryError::Store(format!("terminate_active_tasks: {e}")))?;
        if count > 0 {
            info!(count, "Terminated active tasks left over from a previous run");
        }
        Ok(count)
    }

    // ---- network cameras --------------------------------------------------

    pub fn save_network_camera(&self, device: &Device) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO network_cameras (io_id, name, url, pull_url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                device.io_id,
                device.name,
                device.url.clone().unwrap_or_default(),
                device.pull_url.clone().unwrap_or_default(),
                chrono::Utc::now().timestamp(),
            ],
        )
        .map_err(|e| VideoMemoryError::Store(format!("save_network_camera: {e}")))?;
        Ok(())
    }

    pub fn delete_network_camera(&self, io_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute("DELETE FROM network_cameras WHERE io_id = ?1", params![io_id])
            .map_err(|e| VideoMemoryError::Store(format!("delete_network_camera: {e}")))?;
        Ok(count > 0)
    }

    pub fn load_network_cameras(&self) -> Result<Vec<Device>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT io_id, name, url, pull_url FROM network_cameras")
            .map_err(|e| VideoMemoryError::Store(format!("load_network_cameras: {e}")))?;
        let devices = stmt
            .query_map([], |row| {
                Ok(Device {
                    io_id: row.get(0)?,
                    category: "camera".to_string(),
                    name: row.get(1)?,
                    source: DeviceSource::Network,
                    url: Some(row.get::<_, String>(2)?),
                    pull_url: Some(row.get::<_, String>(3)?),
                })
            })
            .map_err(|e| VideoMemoryError::Store(format!("load_network_cameras: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VideoMemoryError::Store(format!("load_network_cameras: {e}")))?;
        Ok(devices)
    }

    /// Lowest unused `netN` suffix for a new network camera.
    pub fn get_next_network_camera_id(&self) -> Result<String> {
        let existing = self.load_network_cameras()?;
        let used: std::collections::HashSet<u64> = existing
            .iter()
            .filter_map(|d| d.io_id.strip_prefix("net"))
            .filter_map(|n| n.parse().ok())
            .collect();
        let mut n = 0u64;
        while used.contains(&n) {
            n += 1;
        }
        Ok(format!("net{n}"))
    }

    // ---- settings -----------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .map_err(|e| VideoMemoryError::Store(format!("get_setting: {e}")))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| VideoMemoryError::Store(format!("set_setting: {e}")))?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])
            .map_err(|e| VideoMemoryError::Store(format!("delete_setting: {e}")))?;
        Ok(())
    }

    /// Apply every stored setting to the process environment as a fallback
    /// for providers that read directly from `std::env`.
    pub fn load_settings_to_env(&self) -> Result<()> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key, value FROM settings")
            .map_err(|e| VideoMemoryError::Store(format!("load_settings_to_env: {e}")))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| VideoMemoryError::Store(format!("load_settings_to_env: {e}")))?;
        for row in rows {
            match row {
                Ok((key, value)) => std::env::set_var(key, value),
                Err(e) => warn!(error = %e, "Skipping malformed setting row"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_round_trip_through_store() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = Task::new("0".into(), 0, "watch the door".into(), "0".into());
        store.save_task(&task, 1000).unwrap();

        let loaded = store.load_all_tasks().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].task_id, "0");
        assert_eq!(loaded[0].task_desc(), "watch the door");
        assert!(!loaded[0].is_done());
    }

    #[test]
    fn notes_are_ordered_by_insertion() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = Task::new("0".into(), 0, "watch".into(), "0".into());
        store.save_task(&task, 1000).unwrap();
        store.save_note("0", &NoteEntry::new("first", 100)).unwrap();
        store.save_note("0", &NoteEntry::new("second", 200)).unwrap();

        let loaded = store.load_all_tasks().unwrap();
        let notes = loaded[0].notes_snapshot();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].content, "first");
        assert_eq!(notes[1].content, "second");
    }

    #[test]
    fn delete_task_cascades_notes() {
        let store = TaskStore::open_in_memory().unwrap();
        let task = Task::new("0".into(), 0, "watch".into(), "0".into());
        store.save_task(&task, 1000).unwrap();
        store.save_note("0", &NoteEntry::new("note", 100)).unwrap();

        store.delete_task("0").unwrap();
        assert!(store.load_all_tasks().unwrap().is_empty());
    }

    #[test]
    fn terminate_active_tasks_only_touches_not_done() {
        let store = TaskStore::open_in_memory().unwrap();
        let active = Task::new("0".into(), 0, "a".into(), "0".into());
        let done = Task::new("1".into(), 0, "b".into(), "0".into());
        done.set_done(true);
        store.save_task(&active, 1000).unwrap();
        store.save_task(&done, 1000).unwrap();

        let count = store.terminate_active_tasks().unwrap();
        assert_eq!(count, 1);

        let tasks = store.load_all_tasks().unwrap();
        let by_id = |id: &str| tasks.iter().find(|t| t.task_id == id).unwrap();
        assert_eq!(by_id("0").status, TaskStatus::Terminated);
        assert_eq!(by_id("1").status, TaskStatus::Active); // stored status untouched, was never persisted as done
    }

    #[test]
    fn max_task_id_is_monotone() {
        let store = TaskStore::open_in_memory().unwrap();
        assert_eq!(store.get_max_task_id().unwrap(), -1);
        store.save_task(&Task::new("0".into(), 0, "a".into(), "0".into()), 1).unwrap();
        store.save_task(&Task::new("5".into(), 0, "b".into(), "0".into()), 1).unwrap();
        assert_eq!(store.get_max_task_id().unwrap(), 5);
    }

    #[test]
    fn network_camera_ids_fill_lowest_gap() {
        let store = TaskStore::open_in_memory().unwrap();
        assert_eq!(store.get_next_network_camera_id().unwrap(), "net0");
        store
            .save_network_camera(&Device {
                io_id: "net0".into(),
                category: "camera".into(),
                name: "front".into(),
                source: DeviceSource::Network,
                url: Some("rtsp://x".into()),
                pull_url: Some("rtsp://x".into()),
            })
            .unwrap();
        assert_eq!(store.get_next_network_camera_id().unwrap(), "net1");
        store.delete_network_camera("net0").unwrap();
        assert_eq!(store.get_next_network_camera_id().unwrap(), "net0");
    }

    #[test]
    fn settings_masking_leaves_value_untouched_in_store() {
        let store = TaskStore::open_in_memory().unwrap();
        store.set_setting("OPENAI_API_KEY", "sk-abcdef1234").unwrap();
        assert_eq!(store.get_setting("OPENAI_API_KEY").unwrap().unwrap(), "sk-abcdef1234");
        store.delete_setting("OPENAI_API_KEY").unwrap();
        assert!(store.get_setting("OPENAI_API_KEY").unwrap().is_none());
    }
}
