use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Web,
    File,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Web => "web",
            Self::File => "file",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.pad(name)
    }
}

/// One pipeline run as remembered in `history.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub id: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub book_url: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub book_dir: Option<PathBuf>,
    #[serde(default)]
    pub start_chapter: Option<u32>,
    #[serde(default)]
    pub end_chapter: Option<u32>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt_style: String,
    pub status: TaskStatus,
    pub updated_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn web(book_url: &str) -> Self {
        Self::empty(TaskType::Web, Some(book_url.to_string()), None)
    }

    pub fn file(file_path: &str) -> Self {
        Self::empty(TaskType::File, None, Some(file_path.to_string()))
    }

    fn empty(task_type: TaskType, book_url: Option<String>, file_path: Option<String>) -> Self {
        Self {
            id: String::new(),
            task_type,
            book_url,
            file_path,
            title: String::new(),
            book_dir: None,
            start_chapter: None,
            end_chapter: None,
            model: String::new(),
            prompt_style: String::new(),
            status: TaskStatus::Running,
            updated_at: Utc::now(),
        }
    }

    /// Same book URL for web tasks, same input file for file tasks.
    fn same_task(&self, other: &HistoryEntry) -> bool {
        match (self.task_type, other.task_type) {
            (TaskType::Web, TaskType::Web) => self.book_url.is_some() && self.book_url == other.book_url,
            (TaskType::File, TaskType::File) => self.file_path.is_some() && self.file_path == other.file_path,
            _ => false,
        }
    }
}

/// Task history persisted as a JSON list.
pub struct HistoryManager {
    path: PathBuf,
}

impl HistoryManager {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            path: data_dir.as_ref().join("history.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing, corrupt or non-list files read as an empty history.
    pub fn load(&self) -> Vec<HistoryEntry> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Ignoring unreadable history file {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }

    /// Insert or update the task and return its id.
    pub fn add_task(&self, mut task: HistoryEntry) -> Result<String> {
        let mut entries = self.load();
        task.updated_at = Utc::now();

        let id = match entries.iter_mut().find(|existing| existing.same_task(&task)) {
            Some(existing) => {
                task.id = existing.id.clone();
                *existing = task;
                existing.id.clone()
            }
            None => {
                task.id = Uuid::new_v4().to_string();
                let id = task.id.clone();
                entries.push(task);
                id
            }
        };

        self.save(&entries)?;
        debug!("Recorded history task {}", id);
        Ok(id)
    }

    /// Returns false when no task has `id`.
    pub fn update_task(&self, id: &str, status: TaskStatus) -> Result<bool> {
        self.modify(id, |entry| entry.status = status)
    }

    pub fn set_title(&self, id: &str, title: &str) -> Result<bool> {
        self.modify(id, |entry| entry.title = title.to_string())
    }

    fn modify<F>(&self, id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut HistoryEntry),
    {
        let mut entries = self.load();
        let Some(entry) = entries.iter_mut().find(|entry| entry.id == id) else {
            return Ok(false);
        };
        f(entry);
        entry.updated_at = Utc::now();
        self.save(&entries)?;
        Ok(true)
    }

    pub fn remove_task(&self, id: &str) -> Result<bool> {
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        self.save(&entries)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    #[test]
    fn test_load_tolerates_missing_and_bad_files() {
        let temp = TempDir::new().unwrap();
        let history = HistoryManager::new(temp.path());
        assert!(history.load().is_empty());

        temp.child("history.json").write_str("{not json").unwrap();
        assert!(history.load().is_empty());

        temp.child("history.json").write_str(r#"{"id": "x"}"#).unwrap();
        assert!(history.load().is_empty());
    }

    #[test]
    fn test_web_tasks_are_upserted_by_url() {
        let temp = TempDir::new().unwrap();
        let history = HistoryManager::new(temp.path().join("data"));

        let first = history.add_task(HistoryEntry::web("https://quanben.io/n/a/")).unwrap();
        let mut again = HistoryEntry::web("https://quanben.io/n/a/");
        again.model = "gemini-2.5-pro".to_string();
        let second = history.add_task(again).unwrap();
        let other = history.add_task(HistoryEntry::web("https://quanben.io/n/b/")).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        let entries = history.load();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].model, "gemini-2.5-pro");
        assert!(Uuid::parse_str(&entries[1].id).is_ok());
    }

    #[test]
    fn test_file_tasks_are_upserted_by_path() {
        let temp = TempDir::new().unwrap();
        let history = HistoryManager::new(temp.path());

        let web = history.add_task(HistoryEntry::web("novel.txt")).unwrap();
        let file = history.add_task(HistoryEntry::file("novel.txt")).unwrap();
        let file_again = history.add_task(HistoryEntry::file("novel.txt")).unwrap();

        assert_ne!(web, file);
        assert_eq!(file, file_again);
        assert_eq!(history.load().len(), 2);
    }

    #[test]
    fn test_update_and_remove() {
        let temp = TempDir::new().unwrap();
        let history = HistoryManager::new(temp.path());
        let id = history.add_task(HistoryEntry::file("book.txt")).unwrap();

        assert!(history.update_task(&id, TaskStatus::Completed).unwrap());
        assert!(history.set_title(&id, "Tiên Nghịch").unwrap());
        assert!(!history.update_task("missing", TaskStatus::Failed).unwrap());

        let entry = &history.load()[0];
        assert_eq!(entry.status, TaskStatus::Completed);
        assert_eq!(entry.title, "Tiên Nghịch");

        let raw = std::fs::read_to_string(history.path()).unwrap();
        assert!(raw.contains(r#""status": "completed""#));
        assert!(raw.contains(r#""task_type": "file""#));

        assert!(history.remove_task(&id).unwrap());
        assert!(!history.remove_task(&id).unwrap());
        assert!(history.load().is_empty());
    }
}
