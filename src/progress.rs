//! Per-book translation bookkeeping kept in `progress.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chapter::ChapterRange;
use crate::error::{BookError, Result};
use crate::text::normalize_translation;
use crate::workspace::{BookWorkspace, SubDir};

pub const FAILURE_MARKER: &str = "[TRANSLATION FAILED]";

const SAVE_ATTEMPTS: usize = 3;

/// Seconds since the Unix epoch with millisecond precision.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRateLimit {
    #[serde(default)]
    pub last_batch_time: f64,
    #[serde(default)]
    pub last_batch_size: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    PartialChinese,
    ExceedsChinese,
    ProhibitedContent,
    CopyrightedContent,
    #[default]
    Generic,
}

impl FailureType {
    pub fn categorize(message: &str) -> Self {
        let message = message.to_lowercase();
        if message.contains("partial_chinese") {
            Self::PartialChinese
        } else if message.contains("exceeds_chinese") {
            Self::ExceedsChinese
        } else if message.contains("prohibited") {
            Self::ProhibitedContent
        } else if message.contains("copyrighted") {
            Self::CopyrightedContent
        } else {
            Self::Generic
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PartialChinese => "partial_chinese",
            Self::ExceedsChinese => "exceeds_chinese",
            Self::ProhibitedContent => "prohibited_content",
            Self::CopyrightedContent => "copyrighted_content",
            Self::Generic => "generic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTranslation {
    #[serde(default)]
    pub failure_description: String,
    #[serde(default)]
    pub failure_type: FailureType,
    #[serde(default = "now_secs")]
    pub timestamp: f64,
    #[serde(default)]
    pub retried: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressData {
    #[serde(default)]
    pub model_rate_limits: BTreeMap<String, ModelRateLimit>,
    #[serde(default)]
    pub failed_translations: BTreeMap<String, FailedTranslation>,
    #[serde(default)]
    pub clean_cancellation: bool,
}

impl ProgressData {
    /// Read progress; a missing or corrupt file is replaced with fresh progress.
    pub fn load(path: &Path) -> Self {
        let parsed = std::fs::read_to_string(path)
            .map_err(BookError::from)
            .and_then(|content| serde_json::from_str::<ProgressData>(&content).map_err(BookError::from));

        match parsed {
            Ok(data) => data,
            Err(e) => {
                if path.exists() {
                    warn!("Progress file {} is corrupt ({}), re-initializing", path.display(), e);
                } else {
                    info!("Progress file not found, initializing new progress");
                }
                let fresh = Self::default();
                if let Err(e) = fresh.save(path) {
                    warn!("Failed to write fresh progress file: {}", e);
                }
                fresh
            }
        }
    }

    /// Atomic write through a temp file in the same directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut last_error = None;
        for attempt in 1..=SAVE_ATTEMPTS {
            match write_atomically(dir, path, content.as_bytes()) {
                Ok(()) => {
                    debug!("Progress saved to {}", path.display());
                    return Ok(());
                }
                Err(e) => {
                    debug!("Progress save attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < SAVE_ATTEMPTS {
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }
        }

        Err(last_error
            .map(BookError::from)
            .unwrap_or_else(|| BookError::Translation("Failed to save progress".to_string())))
    }
}

fn write_atomically(dir: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Spaces out batches sent to the same model.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    interval: Duration,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// How long to wait before sending `pending` more requests, if at all.
    pub fn delay(&self, progress: &ProgressData, pending: usize, batch_size: usize, model: &str) -> Option<Duration> {
        if pending == 0 || batch_size == 0 {
            return None;
        }

        let limits = progress.model_rate_limits.get(model).cloned().unwrap_or_default();
        let elapsed = (now_secs() - limits.last_batch_time).max(0.0);
        let remaining = self.interval.as_secs_f64() - elapsed;

        if remaining > 0.0 && limits.last_batch_size + pending > batch_size {
            Some(Duration::from_secs_f64(remaining))
        } else {
            None
        }
    }

    pub async fn wait(&self, progress: &ProgressData, pending: usize, batch_size: usize, model: &str) {
        if let Some(delay) = self.delay(progress, pending, batch_size, model) {
            info!("Rate limiting for model {} - sleeping {:.2} seconds", model, delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
    }

    pub fn record_batch(progress: &mut ProgressData, model: &str, size: usize) {
        progress.model_rate_limits.insert(
            model.to_string(),
            ModelRateLimit {
                last_batch_time: now_secs(),
                last_batch_size: size,
            },
        );
    }
}

/// Shared, persisted progress for one book.
pub struct ProgressTracker {
    workspace: BookWorkspace,
    data: Mutex<ProgressData>,
}

impl ProgressTracker {
    pub fn new(workspace: BookWorkspace) -> Self {
        let data = ProgressData::load(&workspace.progress_path());
        Self {
            workspace,
            data: Mutex::new(data),
        }
    }

    pub fn snapshot(&self) -> ProgressData {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut ProgressData) -> bool,
    {
        let mut data = self.lock();
        if f(&mut data) {
            data.save(&self.workspace.progress_path())?;
        }
        Ok(())
    }

    pub fn record_batch(&self, model: &str, size: usize) -> Result<()> {
        self.update(|data| {
            RateLimiter::record_batch(data, model, size);
            true
        })
    }

    pub fn mark_task_as_retried(&self, file_name: &str) -> Result<()> {
        self.update(|data| match data.failed_translations.get_mut(file_name) {
            Some(entry) => {
                entry.retried = true;
                true
            }
            None => false,
        })
    }

    pub fn mark_translation_failed(
        &self,
        file_name: &str,
        message: &str,
        store_marker: bool,
        failure_type: Option<FailureType>,
    ) -> Result<()> {
        let failure_type = failure_type.unwrap_or_else(|| FailureType::categorize(message));

        self.update(|data| {
            let is_existing = data.failed_translations.contains_key(file_name);
            data.failed_translations.insert(
                file_name.to_string(),
                FailedTranslation {
                    failure_description: message.to_string(),
                    failure_type,
                    timestamp: now_secs(),
                    retried: is_existing && failure_type != FailureType::PartialChinese,
                },
            );
            true
        })?;

        if store_marker {
            let marker = format!(
                "{}\n\nFailure Type: {}\n\nDescription: {}\n\nTimestamp: {}\n\nThis file indicates a failed translation. Please check the error details above or manually translate this content.",
                FAILURE_MARKER,
                failure_type,
                message,
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            );
            self.workspace.save_file(SubDir::TranslationResponses, file_name, &marker)?;
            info!("Created failure marker file for {}", file_name);
        }

        warn!("Translation for {} marked as failed: {}", file_name, failure_type);
        Ok(())
    }

    pub fn handle_translation_success(&self, file_name: &str, translated: &str) -> Result<()> {
        let normalized = normalize_translation(translated);
        self.workspace.save_file(SubDir::TranslationResponses, file_name, &normalized)?;

        self.update(|data| {
            if data.failed_translations.remove(file_name).is_some() {
                info!("Removing {} from failed translations after successful retry", file_name);
                true
            } else {
                false
            }
        })?;

        info!("Successfully translated: {}", file_name);
        Ok(())
    }

    /// Remove the response for `file_name` only when it is a failure marker.
    pub fn delete_failure_marker(&self, file_name: &str) -> Result<bool> {
        match self.workspace.load_file(SubDir::TranslationResponses, file_name)? {
            Some(content) if content.contains(FAILURE_MARKER) => {
                let deleted = self.workspace.delete_file(SubDir::TranslationResponses, file_name)?;
                info!("Deleted failure marker file for {}", file_name);
                Ok(deleted)
            }
            _ => Ok(false),
        }
    }

    pub fn mark_cancelled(&self) -> Result<()> {
        self.update(|data| {
            data.clean_cancellation = true;
            true
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationTask {
    pub file_name: String,
    pub content: String,
}

impl TranslationTask {
    pub fn new(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

/// Builds the task lists for each translation phase.
pub struct TaskManager {
    workspace: BookWorkspace,
}

impl TaskManager {
    pub fn new(workspace: BookWorkspace) -> Self {
        Self { workspace }
    }

    /// Shards in range that have no response yet.
    pub fn prepare_new_tasks(&self, range: ChapterRange) -> Result<Vec<TranslationTask>> {
        let responses = self.workspace.list_txt(SubDir::TranslationResponses)?;
        let mut tasks = Vec::new();

        for file_name in self.workspace.list_txt(SubDir::PromptFiles)? {
            if responses.contains(&file_name) || !range.contains(&file_name) {
                continue;
            }
            if let Some(content) = self.workspace.load_file(SubDir::PromptFiles, &file_name)? {
                if !content.is_empty() {
                    tasks.push(TranslationTask::new(file_name, content));
                }
            }
        }
        Ok(tasks)
    }

    /// Failed shards that get a second attempt from their prompt.
    pub fn prepare_retry_tasks(&self, progress: &ProgressData, range: ChapterRange) -> Result<Vec<TranslationTask>> {
        let tasks = self.collect_failed(progress, range, SubDir::PromptFiles, |failure| {
            !failure.retried && failure.failure_type != FailureType::PartialChinese
        })?;
        info!("Found {} failed translations to retry", tasks.len());
        Ok(tasks)
    }

    /// Partially translated shards, re-sent with their stored response.
    pub fn prepare_chinese_retry_tasks(
        &self,
        progress: &ProgressData,
        range: ChapterRange,
    ) -> Result<Vec<TranslationTask>> {
        let tasks = self.collect_failed(progress, range, SubDir::TranslationResponses, |failure| {
            !failure.retried && failure.failure_type == FailureType::PartialChinese
        })?;
        info!("Found {} translations with Chinese characters to retry", tasks.len());
        Ok(tasks)
    }

    fn collect_failed<P>(
        &self,
        progress: &ProgressData,
        range: ChapterRange,
        source: SubDir,
        predicate: P,
    ) -> Result<Vec<TranslationTask>>
    where
        P: Fn(&FailedTranslation) -> bool,
    {
        let mut tasks = Vec::new();
        // BTreeMap iteration keeps the list sorted by file name
        for (file_name, failure) in &progress.failed_translations {
            if !predicate(failure) || !range.contains(file_name) {
                continue;
            }
            if let Some(content) = self.workspace.load_file(source, file_name)? {
                if !content.is_empty() {
                    tasks.push(TranslationTask::new(file_name.clone(), content));
                }
            }
        }
        Ok(tasks)
    }

    pub fn has_processed_tasks(&self, batch: &[TranslationTask]) -> Result<bool> {
        let responses = self.workspace.list_txt(SubDir::TranslationResponses)?;
        Ok(batch.iter().any(|task| responses.contains(&task.file_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, BookWorkspace) {
        let dir = TempDir::new().unwrap();
        let workspace = BookWorkspace::new(dir.path()).unwrap();
        (dir, workspace)
    }

    #[test]
    fn test_categorize_failure() {
        assert_eq!(FailureType::categorize("ERROR:partial_chinese, ratio 3%"), FailureType::PartialChinese);
        assert_eq!(FailureType::categorize("exceeds_chinese (40.00%)"), FailureType::ExceedsChinese);
        assert_eq!(FailureType::categorize("Blocked: PROHIBITED_CONTENT"), FailureType::ProhibitedContent);
        assert_eq!(FailureType::categorize("response flagged as copyrighted"), FailureType::CopyrightedContent);
        assert_eq!(FailureType::categorize("connection reset"), FailureType::Generic);
    }

    #[test]
    fn test_load_recovers_from_corrupt_file() {
        let (_dir, workspace) = workspace();
        let path = workspace.progress_path();
        std::fs::write(&path, "{ not json").unwrap();

        let data = ProgressData::load(&path);
        assert_eq!(data, ProgressData::default());

        let rewritten: ProgressData = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten, ProgressData::default());
    }

    #[test]
    fn test_load_tolerates_missing_fields() {
        let (_dir, workspace) = workspace();
        let path = workspace.progress_path();
        std::fs::write(
            &path,
            r#"{"failed_translations": {"chapter_0001_1.txt": {"failure_type": "exceeds_chinese"}}}"#,
        )
        .unwrap();

        let data = ProgressData::load(&path);
        let failure = &data.failed_translations["chapter_0001_1.txt"];
        assert_eq!(failure.failure_type, FailureType::ExceedsChinese);
        assert!(!failure.retried);
        assert!(data.model_rate_limits.is_empty());
    }

    #[test]
    fn test_rate_limiter_delay() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let mut progress = ProgressData::default();

        assert!(limiter.delay(&progress, 10, 15, "m").is_none());

        RateLimiter::record_batch(&mut progress, "m", 10);
        assert!(limiter.delay(&progress, 5, 15, "m").is_none());
        let delay = limiter.delay(&progress, 6, 15, "m").unwrap();
        assert!(delay <= Duration::from_secs(60));
        assert!(delay > Duration::from_secs(50));

        assert!(limiter.delay(&progress, 100, 15, "other").is_none());
        assert!(limiter.delay(&progress, 0, 15, "m").is_none());
    }

    #[test]
    fn test_rate_limiter_wait_without_interval() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let mut progress = ProgressData::default();
        RateLimiter::record_batch(&mut progress, "m", 15);

        let started = std::time::Instant::now();
        tokio_test::block_on(limiter.wait(&progress, 30, 15, "m"));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_failure_lifecycle() {
        let (_dir, workspace) = workspace();
        let tracker = ProgressTracker::new(workspace.clone());
        let file = "chapter_0001_1.txt";

        tracker.mark_translation_failed(file, "empty translation result", true, None).unwrap();
        let marker = workspace.load_file(SubDir::TranslationResponses, file).unwrap().unwrap();
        assert!(marker.starts_with(FAILURE_MARKER));
        assert!(marker.contains("Failure Type: generic"));
        assert!(!tracker.snapshot().failed_translations[file].retried);

        // a second failure of the same shard is not retried again
        tracker.mark_translation_failed(file, "still empty", true, None).unwrap();
        assert!(tracker.snapshot().failed_translations[file].retried);

        tracker.handle_translation_success(file, "Xin  chào.").unwrap();
        assert!(tracker.snapshot().failed_translations.is_empty());
        assert_eq!(
            workspace.load_file(SubDir::TranslationResponses, file).unwrap().as_deref(),
            Some("Xin chào.")
        );

        let persisted = ProgressData::load(&workspace.progress_path());
        assert!(persisted.failed_translations.is_empty());
    }

    #[test]
    fn test_partial_chinese_is_never_flagged_retried() {
        let (_dir, workspace) = workspace();
        let tracker = ProgressTracker::new(workspace);
        let file = "chapter_0002_1.txt";

        for _ in 0..2 {
            tracker
                .mark_translation_failed(file, "ERROR:partial_chinese", false, None)
                .unwrap();
        }
        let failure = &tracker.snapshot().failed_translations[file];
        assert_eq!(failure.failure_type, FailureType::PartialChinese);
        assert!(!failure.retried);
    }

    #[test]
    fn test_delete_failure_marker_keeps_real_translations() {
        let (_dir, workspace) = workspace();
        let tracker = ProgressTracker::new(workspace.clone());
        workspace
            .save_file(SubDir::TranslationResponses, "a_1.txt", "[TRANSLATION FAILED]\n\nx")
            .unwrap();
        workspace.save_file(SubDir::TranslationResponses, "b_1.txt", "Bản dịch tốt.").unwrap();

        assert!(tracker.delete_failure_marker("a_1.txt").unwrap());
        assert!(!tracker.delete_failure_marker("b_1.txt").unwrap());
        assert!(!tracker.delete_failure_marker("missing_1.txt").unwrap());
        assert_eq!(workspace.list_txt(SubDir::TranslationResponses).unwrap(), vec!["b_1.txt"]);
    }

    #[test]
    fn test_task_preparation() {
        let (_dir, workspace) = workspace();
        for name in ["chapter_0001_1.txt", "chapter_0001_2.txt", "chapter_0002_1.txt", "chapter_0003_1.txt"] {
            workspace.save_file(SubDir::PromptFiles, name, "原文").unwrap();
        }
        workspace.save_file(SubDir::TranslationResponses, "chapter_0001_1.txt", "Bản dịch.").unwrap();
        workspace
            .save_file(SubDir::TranslationResponses, "chapter_0002_1.txt", "Bản dịch 还有.")
            .unwrap();

        let tracker = ProgressTracker::new(workspace.clone());
        tracker
            .mark_translation_failed("chapter_0002_1.txt", "ERROR:partial_chinese", false, None)
            .unwrap();
        tracker
            .mark_translation_failed("chapter_0003_1.txt", "prohibited", false, None)
            .unwrap();

        let manager = TaskManager::new(workspace);
        let new_tasks = manager.prepare_new_tasks(ChapterRange::all()).unwrap();
        let names: Vec<_> = new_tasks.iter().map(|t| t.file_name.as_str()).collect();
        assert_eq!(names, vec!["chapter_0001_2.txt", "chapter_0003_1.txt"]);

        let limited = manager.prepare_new_tasks(ChapterRange::new(Some(3), None)).unwrap();
        assert_eq!(limited.len(), 1);

        let progress = tracker.snapshot();
        let retry = manager.prepare_retry_tasks(&progress, ChapterRange::all()).unwrap();
        assert_eq!(retry, vec![TranslationTask::new("chapter_0003_1.txt", "原文")]);

        let chinese = manager.prepare_chinese_retry_tasks(&progress, ChapterRange::all()).unwrap();
        assert_eq!(chinese, vec![TranslationTask::new("chapter_0002_1.txt", "Bản dịch 还有.")]);

        assert!(manager.has_processed_tasks(&chinese).unwrap());
        assert!(!manager.has_processed_tasks(&retry).unwrap());
    }
}
