//! Core data model: tasks, notes, devices, settings — shared by the store,
//! the manager, and every ingestor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A single time-stamped observation appended to a task by the VLM.
/// Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEntry {
    pub content: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}

impl NoteEntry {
    pub fn new(content: impl Into<String>, timestamp: i64) -> Self {
        Self { content: content.into(), timestamp }
    }

    /// Human-readable rendering used in prompt construction.
    pub fn human_timestamp(&self) -> String {
        chrono::DateTime::from_timestamp(self.timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| self.timestamp.to_string())
    }
}

/// Lifecycle status of a [`Task`]. `Terminated` is only reachable via
/// startup crash recovery (§4.6 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Done,
    Terminated,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Done => "done",
            TaskStatus::Terminated => "terminated",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "done" => TaskStatus::Done,
            "terminated" => TaskStatus::Terminated,
            _ => TaskStatus::Active,
        }
    }
}

/// A standing natural-language observation goal bound to one camera.
///
/// `notes`, `done`, and `task_desc` are shared by reference between the
/// `TaskManager` and the owning `VideoStreamIngestor`: both sides append to
/// `notes`, both may read `done`, and either side may mutate `task_desc`
/// (last-writer-wins, per §5's resource policy).
#[derive(Clone)]
pub struct Task {
    pub task_id: String,
    pub task_number: usize,
    task_desc: Arc<RwLock<String>>,
    pub notes: Arc<RwLock<Vec<NoteEntry>>>,
    done: Arc<AtomicBool>,
    pub io_id: String,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(task_id: String, task_number: usize, task_desc: String, io_id: String) -> Self {
        Self {
            task_id,
            task_number,
            task_desc: Arc::new(RwLock::new(task_desc)),
            notes: Arc::new(RwLock::new(Vec::new())),
            done: Arc::new(AtomicBool::new(false)),
            io_id,
            status: TaskStatus::Active,
        }
    }

    /// Rehydrate a task loaded from the store, notes already attached.
    pub fn from_parts(
        task_id: String,
        task_number: usize,
        task_desc: String,
        notes: Vec<NoteEntry>,
        done: bool,
        io_id: String,
        status: TaskStatus,
    ) -> Self {
        Self {
            task_id,
            task_number,
            task_desc: Arc::new(RwLock::new(task_desc)),
            notes: Arc::new(RwLock::new(notes)),
            done: Arc::new(AtomicBool::new(done)),
            io_id,
            status,
        }
    }

    pub fn task_desc(&self) -> String {
        self.task_desc.read().clone()
    }

    pub fn set_task_desc(&self, desc: impl Into<String>) {
        *self.task_desc.write() = desc.into();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub fn set_done(&self, done: bool) {
        self.done.store(done, Ordering::SeqCst);
    }

    pub fn latest_note(&self) -> Option<NoteEntry> {
        self.notes.read().last().cloned()
    }

    pub fn push_note(&self, note: NoteEntry) {
        self.notes.write().push(note);
    }

    pub fn notes_snapshot(&self) -> Vec<NoteEntry> {
        self.notes.read().clone()
    }
}

/// Where a camera device came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSource {
    Local,
    Network,
}

/// A camera known to the `IOManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub io_id: String,
    pub category: String,
    pub name: String,
    pub source: DeviceSource,
    pub url: Option<String>,
    pub pull_url: Option<String>,
}

impl Device {
    pub fn local(io_id: String, name: String) -> Self {
        Self {
            io_id,
            category: "camera".to_string(),
            name,
            source: DeviceSource::Local,
            url: None,
            pull_url: None,
        }
    }
}

/// A `(key, value)` configuration setting. Some keys are sensitive and are
/// masked on read-out (see [`mask_secret`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

const SENSITIVE_SETTING_KEYS: &[&str] = &[
    "GOOGLE_API_KEY",
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "OPENROUTER_API_KEY",
    "DISCORD_WEBHOOK_URL",
    "TELEGRAM_BOT_TOKEN",
];

pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_SETTING_KEYS.contains(&key)
}

/// Mask a secret value, showing only its last four characters.
pub fn mask_secret(value: &str) -> String {
    let len = value.chars().count();
    if len <= 4 {
        return "*".repeat(len);
    }
    let tail: String = value.chars().skip(len - 4).collect();
    format!("{}{}", "*".repeat(len - 4), tail)
}

/// Opaque to the core engine — stored only to support an external chat
/// collaborator (out of scope per §1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub title: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_secret_keeps_last_four() {
        assert_eq!(mask_secret("sk-abcdef1234"), "********1234");
    }

    #[test]
    fn mask_secret_short_value_all_stars() {
        assert_eq!(mask_secret("ab"), "**");
    }

    #[test]
    fn task_notes_are_shared_by_reference() {
        let task = Task::new("0".into(), 0, "watch the door".into(), "0".into());
        let handle = task.clone();
        task.push_note(NoteEntry::new("door opened", 1000));
        assert_eq!(handle.notes_snapshot().len(), 1);
        assert_eq!(handle.latest_note().unwrap().content, "door opened");
    }

    #[test]
    fn task_desc_mutation_is_visible_across_handles() {
        let task = Task::new("0".into(), 0, "old".into(), "0".into());
        let handle = task.clone();
        handle.set_task_desc("new");
        assert_eq!(task.task_desc(), "new");
    }
}
