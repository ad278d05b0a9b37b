use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::{ModelSet, TranslationModel};
use crate::chapter::ChapterRange;
use crate::config::TranslateConfig;
use crate::error::{BookError, Result};
use crate::progress::{FailureType, ProgressTracker, RateLimiter, TaskManager, TranslationTask};
use crate::prompts::{NAME_PROMPT, PromptStyle, build_translation_prompt};
use crate::text::{detect_untranslated_chinese, normalize_translation};
use crate::workspace::{BookWorkspace, SubDir};

/// Chinese share (percent) still accepted as a clean translation.
const ACCEPTED_CHINESE_RATIO: f64 = 0.5;
/// Above this share a first-pass response is discarded instead of cleaned up.
const PARTIAL_CHINESE_RATIO: f64 = 20.0;
/// Share accepted after the clean-up pass.
const CLEANUP_CHINESE_RATIO: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationSummary {
    pub rounds: u32,
    pub complete: bool,
    pub cancelled: bool,
}

struct Inner {
    models: ModelSet,
    workspace: BookWorkspace,
    tracker: ProgressTracker,
    tasks: TaskManager,
    limiter: RateLimiter,
    max_rounds: u32,
    use_name_glossary: bool,
    stop_requested: AtomicBool,
}

/// Drives the translation of one book directory. Cheap to clone; clones share
/// the cancel flag.
#[derive(Clone)]
pub struct TranslationManager {
    inner: Arc<Inner>,
}

impl TranslationManager {
    pub fn new(models: ModelSet, workspace: BookWorkspace, config: &TranslateConfig) -> Self {
        let inner = Inner {
            models,
            tracker: ProgressTracker::new(workspace.clone()),
            tasks: TaskManager::new(workspace.clone()),
            workspace,
            limiter: RateLimiter::new(Duration::from_secs(config.translation_interval_secs)),
            max_rounds: config.max_rounds.max(1),
            use_name_glossary: config.use_name_glossary,
            stop_requested: AtomicBool::new(false),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.inner.tracker
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop_requested.load(Ordering::SeqCst)
    }

    /// Request cancellation; in-flight requests finish, queued ones are skipped.
    pub fn stop(&self) {
        info!("Translator stop() called - cancelling all translation operations");
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.inner.tracker.mark_cancelled() {
            error!("Error saving cancellation state: {}", e);
        }
    }

    pub async fn translate_book(&self, style: PromptStyle, range: ChapterRange) -> Result<TranslationSummary> {
        info!(
            "Starting translation process for: {} (chapters {})",
            self.inner.workspace.root().display(),
            range
        );
        self.inner.stop_requested.store(false, Ordering::SeqCst);

        let mut rounds = 0;
        let mut complete = false;
        while !self.is_stopped() {
            complete = self
                .inner
                .workspace
                .is_translation_complete(range, &self.inner.tracker.snapshot())?;
            if complete {
                break;
            }
            if rounds >= self.inner.max_rounds {
                warn!("Stopping after {} translation rounds with work remaining", rounds);
                break;
            }
            rounds += 1;
            info!("=== Translation round {}/{} ===", rounds, self.inner.max_rounds);

            self.run_phases(style, range).await?;

            if self.is_stopped() {
                info!("Translation process was cancelled by the user.");
                break;
            }
            self.inner.workspace.delete_invalid_translations()?;
        }

        let cancelled = self.is_stopped();
        if cancelled {
            info!("Translation process stopped before completion.");
        } else {
            self.inner.workspace.combine_chapter_translations(range)?;
            info!("Translation process completed for: {}", self.inner.workspace.root().display());
        }

        Ok(TranslationSummary {
            rounds,
            complete,
            cancelled,
        })
    }

    async fn run_phases(&self, style: PromptStyle, range: ChapterRange) -> Result<()> {
        info!("--- Processing regular translation tasks ---");
        self.run_translation_phase(style, range, false).await?;

        info!("--- Processing Chinese character specific retries ---");
        self.run_cleanup_phase(range).await?;

        info!("--- Processing failed translation retries (regular failures) ---");
        self.run_translation_phase(style, range, true).await
    }

    fn prepare_tasks(&self, range: ChapterRange, is_retry: bool) -> Result<Vec<TranslationTask>> {
        if is_retry {
            self.inner
                .tasks
                .prepare_retry_tasks(&self.inner.tracker.snapshot(), range)
        } else {
            self.inner.tasks.prepare_new_tasks(range)
        }
    }

    async fn run_translation_phase(&self, style: PromptStyle, range: ChapterRange, is_retry: bool) -> Result<()> {
        let model = self.inner.models.select(is_retry).clone();
        let batch_size = model.batch_size().max(1);

        let mut tasks = self.prepare_tasks(range, is_retry)?;
        if tasks.is_empty() {
            info!("No tasks to process");
            return Ok(());
        }

        let additional_info = self.additional_info();
        let semaphore = Arc::new(Semaphore::new(batch_size));
        let mut running = JoinSet::new();
        let mut submitted: HashSet<String> = HashSet::new();
        let mut batch_index = 0;

        while !tasks.is_empty() && !self.is_stopped() {
            self.inner
                .limiter
                .wait(&self.inner.tracker.snapshot(), tasks.len(), batch_size, model.name())
                .await;

            let mut batch: Vec<TranslationTask> = tasks.drain(..batch_size.min(tasks.len())).collect();
            if !is_retry && self.inner.tasks.has_processed_tasks(&batch)? {
                tasks = self
                    .prepare_tasks(range, false)?
                    .into_iter()
                    .filter(|task| !submitted.contains(&task.file_name))
                    .collect();
                batch = tasks.drain(..batch_size.min(tasks.len())).collect();
            }
            if batch.is_empty() {
                break;
            }

            batch_index += 1;
            info!("Processing batch {} with {} tasks", batch_index, batch.len());
            info!(
                "Tasks in this batch: {:?}",
                batch.iter().map(|task| task.file_name.as_str()).collect::<Vec<_>>()
            );

            let batch_len = batch.len();
            for task in batch {
                submitted.insert(task.file_name.clone());
                let manager = self.clone();
                let model = model.clone();
                let semaphore = semaphore.clone();
                let additional_info = additional_info.clone();
                running.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    let file_name = task.file_name.clone();
                    if let Err(e) = manager
                        .process_translation_task(task, model, style, is_retry, additional_info)
                        .await
                    {
                        error!("Error processing {}: {}", file_name, e);
                    }
                });
            }

            self.inner.tracker.record_batch(model.name(), batch_len)?;
        }

        drain(&mut running).await;
        Ok(())
    }

    async fn process_translation_task(
        &self,
        task: TranslationTask,
        model: Arc<dyn TranslationModel>,
        style: PromptStyle,
        is_retry: bool,
        additional_info: Option<String>,
    ) -> Result<()> {
        if self.is_stopped() {
            info!("Translation task {} cancelled.", task.file_name);
            return Ok(());
        }
        if is_retry {
            self.inner.tracker.mark_task_as_retried(&task.file_name)?;
        }

        let tracker = &self.inner.tracker;
        let translated = match translate_with(model.as_ref(), &task.content, additional_info.as_deref(), style).await {
            Ok(text) => text,
            Err(e) if e.is_transient() => {
                warn!("Transient error for {}, will retry next round: {}", task.file_name, e);
                return Ok(());
            }
            Err(e) => {
                error!("Error translating {}: {}", task.file_name, e);
                return tracker.mark_translation_failed(&task.file_name, &e.to_string().to_lowercase(), true, None);
            }
        };

        let (has_chinese, ratio) = detect_untranslated_chinese(&translated);
        if !has_chinese || ratio <= ACCEPTED_CHINESE_RATIO {
            tracker.handle_translation_success(&task.file_name, &translated)
        } else if ratio <= PARTIAL_CHINESE_RATIO {
            warn!(
                "Text contains Chinese characters ({:.2}%) but ratio <= 20% for {}",
                ratio, task.file_name
            );
            self.inner
                .workspace
                .save_file(SubDir::TranslationResponses, &task.file_name, &translated)?;
            tracker.mark_translation_failed(
                &task.file_name,
                &format!("ERROR:partial_chinese, translation contains partial chinese with ratio: ({:.2}%)", ratio),
                false,
                Some(FailureType::PartialChinese),
            )
        } else {
            error!("Text contains excessive Chinese characters ({:.2}%) for {}", ratio, task.file_name);
            tracker.mark_translation_failed(
                &task.file_name,
                &format!("ERROR:exceeds_chinese, translation contains chinese with ratio: ({:.2}%)", ratio),
                true,
                Some(FailureType::ExceedsChinese),
            )
        }
    }

    async fn run_cleanup_phase(&self, range: ChapterRange) -> Result<()> {
        let model = self.inner.models.cleanup.clone();
        let batch_size = model.batch_size().max(1);

        let mut tasks = self
            .inner
            .tasks
            .prepare_chinese_retry_tasks(&self.inner.tracker.snapshot(), range)?;
        if tasks.is_empty() {
            info!("No Chinese-containing translations to process");
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(batch_size));
        let mut running = JoinSet::new();
        let mut batch_index = 0;

        while !tasks.is_empty() && !self.is_stopped() {
            self.inner
                .limiter
                .wait(&self.inner.tracker.snapshot(), tasks.len(), batch_size, model.name())
                .await;

            let batch: Vec<TranslationTask> = tasks.drain(..batch_size.min(tasks.len())).collect();
            batch_index += 1;
            info!("Processing Chinese retry batch {} with {} tasks", batch_index, batch.len());

            let batch_len = batch.len();
            for task in batch {
                let manager = self.clone();
                let model = model.clone();
                let semaphore = semaphore.clone();
                running.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    let file_name = task.file_name.clone();
                    if let Err(e) = manager.process_cleanup_task(task, model).await {
                        error!("Error processing Chinese retry for {}: {}", file_name, e);
                    }
                });
            }

            self.inner.tracker.record_batch(model.name(), batch_len)?;
        }

        drain(&mut running).await;
        Ok(())
    }

    async fn process_cleanup_task(&self, task: TranslationTask, model: Arc<dyn TranslationModel>) -> Result<()> {
        if self.is_stopped() {
            info!("Chinese retry task {} cancelled.", task.file_name);
            return Ok(());
        }

        let tracker = &self.inner.tracker;
        let translated =
            match translate_with(model.as_ref(), &task.content, None, PromptStyle::IncompleteHandle).await {
                Ok(text) => text,
                Err(e) => {
                    error!("Error processing Chinese retry for {}: {}", task.file_name, e);
                    if e.is_transient() {
                        return Ok(());
                    }
                    tracker.mark_task_as_retried(&task.file_name)?;
                    return tracker.mark_translation_failed(
                        &task.file_name,
                        &e.to_string().to_lowercase(),
                        true,
                        None,
                    );
                }
            };

        let (has_chinese, ratio) = detect_untranslated_chinese(&translated);
        if !has_chinese || ratio <= CLEANUP_CHINESE_RATIO {
            tracker.handle_translation_success(&task.file_name, &translated)?;
            info!(
                "Successfully reduced Chinese characters in {} to {:.2}%",
                task.file_name, ratio
            );
            Ok(())
        } else {
            warn!(
                "Chinese retry failed for {}, still has {:.2}% Chinese characters",
                task.file_name, ratio
            );
            tracker.mark_translation_failed(
                &task.file_name,
                &format!("exceeds_chinese ({:.2}%)", ratio),
                true,
                Some(FailureType::ExceedsChinese),
            )
        }
    }

    fn additional_info(&self) -> Option<String> {
        if !self.inner.use_name_glossary {
            return None;
        }
        self.inner
            .workspace
            .load_names_as_string()
            .filter(|names| !names.trim().is_empty())
            .map(|names| format!("{}\n{}", NAME_PROMPT, names))
    }

    /// Translate one snippet with the primary model.
    pub async fn translate_text(&self, text: &str, style: PromptStyle) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        translate_with(self.inner.models.primary.as_ref(), text, None, style).await
    }

    /// Translate chunks in rate-limited batches, keeping input order. Chunks
    /// that fail are left out.
    pub async fn translate_chunks(&self, chunks: &[String], style: PromptStyle) -> Result<Vec<String>> {
        if chunks.is_empty() {
            warn!("No chunks to translate");
            return Ok(Vec::new());
        }

        let model = self.inner.models.primary.clone();
        let batch_size = model.batch_size().max(1);
        let mut translated: Vec<Option<String>> = vec![None; chunks.len()];
        let mut start = 0;
        let mut batch_index = 0;

        while start < chunks.len() && !self.is_stopped() {
            self.inner
                .limiter
                .wait(&self.inner.tracker.snapshot(), chunks.len() - start, batch_size, model.name())
                .await;

            let end = (start + batch_size).min(chunks.len());
            batch_index += 1;
            info!("Processing chunk batch {} with {} chunks", batch_index, end - start);

            let mut running = JoinSet::new();
            for (idx, chunk) in chunks.iter().enumerate().take(end).skip(start) {
                let model = model.clone();
                let chunk = chunk.clone();
                running.spawn(async move { (idx, translate_with(model.as_ref(), &chunk, None, style).await) });
            }

            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok((idx, Ok(text))) => translated[idx] = Some(text),
                    Ok((idx, Err(e))) => error!("Error translating chunk {}: {}", idx, e),
                    Err(e) => error!("Chunk translation task failed: {}", e),
                }
            }

            self.inner.tracker.record_batch(model.name(), end - start)?;
            start = end;
        }

        if self.is_stopped() {
            info!("Chunk translation cancelled.");
        }
        Ok(translated.into_iter().flatten().collect())
    }
}

/// Build the prompt for `style`, call `model` and normalize the answer.
pub async fn translate_with(
    model: &dyn TranslationModel,
    text: &str,
    additional_info: Option<&str>,
    style: PromptStyle,
) -> Result<String> {
    if text.trim().is_empty() {
        return Err(BookError::Translation("Empty text provided for translation".to_string()));
    }

    let prompt = build_translation_prompt(text, additional_info, style);
    let response = model.generate(&prompt).await?;
    let normalized = normalize_translation(response.trim());
    if normalized.is_empty() {
        return Err(BookError::Translation("Empty translation result".to_string()));
    }
    Ok(normalized)
}

async fn drain(running: &mut JoinSet<()>) {
    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            error!("Translation task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::progress::ProgressData;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    type Responder = dyn Fn(&str) -> Result<String> + Send + Sync;

    struct FakeModel {
        name: String,
        batch_size: usize,
        responder: Box<Responder>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl FakeModel {
        fn new<F>(name: &str, batch_size: usize, responder: F) -> Arc<Self>
        where
            F: Fn(&str) -> Result<String> + Send + Sync + 'static,
        {
            Arc::new(Self {
                name: name.to_string(),
                batch_size,
                responder: Box::new(responder),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationModel for FakeModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn batch_size(&self) -> usize {
            self.batch_size
        }

        async fn generate(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            (self.responder)(prompt)
        }
    }

    fn unused(name: &str) -> Arc<FakeModel> {
        FakeModel::new(name, 5, |_| Err(BookError::Translation("unexpected call".to_string())))
    }

    fn config(max_rounds: u32) -> TranslateConfig {
        let mut config = Config::default().translate;
        config.translation_interval_secs = 0;
        config.max_rounds = max_rounds;
        config
    }

    fn book_with_chapter(text: &str) -> (TempDir, BookWorkspace) {
        let dir = TempDir::new().unwrap();
        let workspace = BookWorkspace::new(dir.path()).unwrap();
        workspace
            .save_file(SubDir::InputChapters, "chapter_0001.txt", text)
            .unwrap();
        workspace.create_prompt_files(ChapterRange::all(), 6000).unwrap();
        (dir, workspace)
    }

    fn manager(
        workspace: &BookWorkspace,
        primary: Arc<FakeModel>,
        retry: Arc<FakeModel>,
        cleanup: Arc<FakeModel>,
        max_rounds: u32,
    ) -> TranslationManager {
        TranslationManager::new(ModelSet::new(primary, retry, cleanup), workspace.clone(), &config(max_rounds))
    }

    #[tokio::test]
    async fn test_translate_book_combines_chapters() {
        let (_dir, workspace) = book_with_chapter("第一章内容。");
        let primary = FakeModel::new("primary", 15, |_| Ok("Đây là bản dịch của chương một.".to_string()));
        let translator = manager(&workspace, primary.clone(), unused("retry"), unused("cleanup"), 3);

        let summary = translator.translate_book(PromptStyle::Modern, ChapterRange::all()).await.unwrap();
        assert!(summary.complete);
        assert!(!summary.cancelled);
        assert_eq!(summary.rounds, 1);
        assert_eq!(primary.calls(), 1);

        let chapter = workspace
            .load_file(SubDir::TranslatedChapters, "chapter_0001.txt")
            .unwrap()
            .unwrap();
        assert_eq!(chapter, "Đây là bản dịch của chương một.\n");
    }

    #[tokio::test]
    async fn test_partial_chinese_goes_through_cleanup() {
        let (_dir, workspace) = book_with_chapter("第一章内容。");
        let primary = FakeModel::new("primary", 15, |_| Ok("Đây là bản dịch còn sót chữ 你 ở cuối câu.".to_string()));
        let cleanup = FakeModel::new("cleanup", 30, |prompt| {
            assert!(prompt.contains("còn sót chữ 你"));
            Ok("Đây là bản dịch đã sạch ở cuối câu.".to_string())
        });
        let translator = manager(&workspace, primary.clone(), unused("retry"), cleanup.clone(), 3);

        let summary = translator.translate_book(PromptStyle::Modern, ChapterRange::all()).await.unwrap();
        assert!(summary.complete);
        assert_eq!((primary.calls(), cleanup.calls()), (1, 1));
        assert!(translator.tracker().snapshot().failed_translations.is_empty());
        assert_eq!(
            workspace
                .load_file(SubDir::TranslationResponses, "chapter_0001_1.txt")
                .unwrap()
                .as_deref(),
            Some("Đây là bản dịch đã sạch ở cuối câu.")
        );
    }

    #[tokio::test]
    async fn test_cleanup_rate_limit_keeps_shard_pending() {
        let (_dir, workspace) = book_with_chapter("第一章内容。");
        let primary = FakeModel::new("primary", 15, |_| Ok("Đây là bản dịch còn sót chữ 你 ở cuối câu.".to_string()));
        let cleanup = FakeModel::new("cleanup", 30, |_| {
            Err(BookError::Api {
                status: 429,
                message: "quota".to_string(),
            })
        });
        let translator = manager(&workspace, primary.clone(), unused("retry"), cleanup.clone(), 3);

        let summary = translator.translate_book(PromptStyle::Modern, ChapterRange::all()).await.unwrap();
        assert!(!summary.complete);
        assert_eq!(summary.rounds, 3);
        assert_eq!((primary.calls(), cleanup.calls()), (1, 3));

        let failure = &translator.tracker().snapshot().failed_translations["chapter_0001_1.txt"];
        assert_eq!(failure.failure_type, FailureType::PartialChinese);
        assert!(!failure.retried);
    }

    #[tokio::test]
    async fn test_failed_shard_is_retried_with_retry_model() {
        let (_dir, workspace) = book_with_chapter("第一章内容。");
        let primary = FakeModel::new("primary", 15, |_| {
            Err(BookError::Translation("Prompt blocked by model: prohibited_content".to_string()))
        });
        let retry = FakeModel::new("retry", 5, |_| Ok("Bản dịch từ mô hình thử lại.".to_string()));
        let translator = manager(&workspace, primary.clone(), retry.clone(), unused("cleanup"), 3);

        let summary = translator.translate_book(PromptStyle::Modern, ChapterRange::all()).await.unwrap();
        assert!(summary.complete);
        assert_eq!((primary.calls(), retry.calls()), (1, 1));

        let progress = ProgressData::load(&workspace.progress_path());
        assert!(progress.failed_translations.is_empty());
        assert!(progress.model_rate_limits.contains_key("primary"));
        assert!(progress.model_rate_limits.contains_key("retry"));
        assert_eq!(
            workspace
                .load_file(SubDir::TranslatedChapters, "chapter_0001.txt")
                .unwrap()
                .as_deref(),
            Some("Bản dịch từ mô hình thử lại.\n")
        );
    }

    #[tokio::test]
    async fn test_transient_errors_are_not_recorded() {
        let (_dir, workspace) = book_with_chapter("第一章内容。");
        let primary = FakeModel::new("primary", 15, |_| {
            Err(BookError::Api {
                status: 429,
                message: "quota".to_string(),
            })
        });
        let translator = manager(&workspace, primary.clone(), unused("retry"), unused("cleanup"), 2);

        let summary = translator.translate_book(PromptStyle::Modern, ChapterRange::all()).await.unwrap();
        assert!(!summary.complete);
        assert_eq!(summary.rounds, 2);
        assert_eq!(primary.calls(), 2);
        assert!(translator.tracker().snapshot().failed_translations.is_empty());
        assert!(workspace.list_txt(SubDir::TranslationResponses).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_name_glossary_is_appended_to_prompts() {
        let (_dir, workspace) = book_with_chapter("第一章内容。");
        std::fs::write(workspace.names_path(), r#"{"Lâm Phong": 12}"#).unwrap();
        let primary = FakeModel::new("primary", 15, |_| Ok("Lâm Phong bước vào thành.".to_string()));
        let translator = manager(&workspace, primary.clone(), unused("retry"), unused("cleanup"), 1);

        translator.translate_book(PromptStyle::ChinaFantasy, ChapterRange::all()).await.unwrap();
        let prompts = primary.prompts.lock().unwrap();
        assert!(prompts[0].contains(NAME_PROMPT));
        assert!(prompts[0].ends_with("Lâm Phong - 12"));
    }

    #[tokio::test]
    async fn test_translate_chunks_keeps_order_and_skips_failures() {
        let dir = TempDir::new().unwrap();
        let workspace = BookWorkspace::new(dir.path()).unwrap();
        let primary = FakeModel::new("primary", 2, |prompt| {
            let answer = [("一", "Một."), ("二", "Hai."), ("三", "Ba.")]
                .iter()
                .find(|(source, _)| prompt.contains(source))
                .map(|(_, target)| target.to_string());
            answer.ok_or_else(|| BookError::Translation("boom".to_string()))
        });
        let translator = manager(&workspace, primary.clone(), unused("retry"), unused("cleanup"), 1);

        let chunks: Vec<String> = ["一", "四", "二", "三"].iter().map(|s| s.to_string()).collect();
        let translated = translator.translate_chunks(&chunks, PromptStyle::Modern).await.unwrap();
        assert_eq!(translated, vec!["Một.", "Hai.", "Ba."]);
        assert_eq!(primary.calls(), 4);
        assert!(translator.translate_text("  ", PromptStyle::Modern).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_records_clean_cancellation() {
        let dir = TempDir::new().unwrap();
        let workspace = BookWorkspace::new(dir.path()).unwrap();
        let primary = FakeModel::new("primary", 2, |_| Ok("x".to_string()));
        let translator = manager(&workspace, primary.clone(), unused("retry"), unused("cleanup"), 1);

        translator.clone().stop();
        assert!(translator.is_stopped());
        assert!(ProgressData::load(&workspace.progress_path()).clean_cancellation);

        let translated = translator
            .translate_chunks(&["一".to_string()], PromptStyle::Modern)
            .await
            .unwrap();
        assert!(translated.is_empty());
        assert_eq!(primary.calls(), 0);
    }
}
