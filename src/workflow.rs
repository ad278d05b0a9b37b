use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::chapter::{ChapterRange, sanitize_path_name};
use crate::config::Config;
use crate::download::{BookState, Downloader, HttpFetcher, PageFetcher, SourceInfo, SourceRegistry};
use crate::error::{BookError, Result};
use crate::history::{HistoryEntry, HistoryManager, TaskStatus};
use crate::prompts::PromptStyle;
use crate::text::split_text_into_chunks;
use crate::translate::manager::TranslationSummary;
use crate::translate::{ModelFactory, ModelSet, TranslationManager};
use crate::workspace::{BookWorkspace, ChapterStatus};

const UNKNOWN_AUTHOR: &str = "Unknown";

/// How a full pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// EPUB path, `None` when there was nothing to package
    Completed(Option<PathBuf>),
    Cancelled,
}

/// Book metadata used when packaging the EPUB.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BookMeta {
    title: String,
    author: String,
    cover: Option<PathBuf>,
}

pub struct Workflow {
    config: Config,
    registry: SourceRegistry,
    fetcher: Arc<dyn PageFetcher>,
    models: Option<ModelSet>,
    history: HistoryManager,
}

impl Workflow {
    /// Models are built on first use so commands that never translate work
    /// without an API key.
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config.download)?);
        Ok(Self::with_parts(config, SourceRegistry::with_defaults(), fetcher, None))
    }

    pub fn with_parts(
        config: Config,
        registry: SourceRegistry,
        fetcher: Arc<dyn PageFetcher>,
        models: Option<ModelSet>,
    ) -> Self {
        let history = HistoryManager::new(&config.output.data_dir);
        Self {
            config,
            registry,
            fetcher,
            models,
            history,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn sources(&self) -> Vec<SourceInfo> {
        self.registry.source_info()
    }

    fn models(&self) -> Result<ModelSet> {
        match &self.models {
            Some(models) => Ok(models.clone()),
            None => ModelFactory::create_models(&self.config.translate),
        }
    }

    fn books_dir(&self, output_dir: Option<&Path>) -> PathBuf {
        output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.output.books_dir.clone())
    }

    /// Download, translate and package a book from a supported site.
    pub async fn process_url(
        &self,
        url: &str,
        range: ChapterRange,
        style: PromptStyle,
        output_dir: Option<&Path>,
    ) -> Result<PipelineOutcome> {
        let mut task = HistoryEntry::web(url);
        task.start_chapter = range.start;
        task.end_chapter = range.end;
        task.model = self.config.translate.model.clone();
        task.prompt_style = style.to_string();
        let task_id = self.history.add_task(task)?;

        let result = self.run_web_pipeline(&task_id, url, range, style, output_dir).await;
        self.finish_task(&task_id, result)
    }

    async fn run_web_pipeline(
        &self,
        task_id: &str,
        url: &str,
        range: ChapterRange,
        style: PromptStyle,
        output_dir: Option<&Path>,
    ) -> Result<PipelineOutcome> {
        let models = self.models()?;

        info!("--- Stage 1: Downloading Book Chapters ---");
        let downloader = self.open_downloader(url, range, output_dir, Some(&models)).await?;
        let book = downloader.book_info();
        self.history.set_title(task_id, &book.title)?;
        info!("Processing book: '{}' with ID: {}", book.title, book.id);

        let watcher = downloader.clone();
        until_interrupted(move || watcher.stop(), downloader.download_book()).await?;
        if downloader.is_stopped() {
            return Ok(PipelineOutcome::Cancelled);
        }

        let workspace = downloader.workspace().clone();
        let meta = book_meta(&workspace);
        self.translate_and_package(workspace, models, range, style, meta).await
    }

    /// Split a local text file into chapters, translate and package it.
    pub async fn process_file(
        &self,
        input: &Path,
        range: ChapterRange,
        style: PromptStyle,
        output_dir: Option<&Path>,
        title: Option<&str>,
        author: Option<&str>,
    ) -> Result<PipelineOutcome> {
        let file_path = input.display().to_string();
        let title = title
            .map(str::to_string)
            .or_else(|| input.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
            .ok_or_else(|| BookError::Config(format!("Cannot derive a title from {}", file_path)))?;

        let mut task = HistoryEntry::file(&file_path);
        task.title = title.clone();
        task.start_chapter = range.start;
        task.end_chapter = range.end;
        task.model = self.config.translate.model.clone();
        task.prompt_style = style.to_string();
        let book_dir = self.books_dir(output_dir).join(sanitize_path_name(&title));
        task.book_dir = Some(book_dir.clone());
        let task_id = self.history.add_task(task)?;

        let meta = BookMeta {
            title,
            author: author.unwrap_or(UNKNOWN_AUTHOR).to_string(),
            cover: None,
        };
        let result = async {
            let models = self.models()?;
            let workspace = BookWorkspace::new(&book_dir)?;

            info!("--- Stage 1: Splitting File Into Chapters ---");
            workspace.split_text_file(input)?;

            self.translate_and_package(workspace, models, range, style, meta).await
        }
        .await;
        self.finish_task(&task_id, result)
    }

    async fn translate_and_package(
        &self,
        workspace: BookWorkspace,
        models: ModelSet,
        range: ChapterRange,
        style: PromptStyle,
        meta: BookMeta,
    ) -> Result<PipelineOutcome> {
        let summary = self.run_translation(&workspace, models, range, style).await?;
        if summary.cancelled {
            return Ok(PipelineOutcome::Cancelled);
        }
        if !summary.complete {
            warn!("Some shards are still untranslated after {} rounds", summary.rounds);
        }

        info!("--- Stage 4: Generating EPUB ---");
        let epub = self.package(&workspace, &meta, range)?;
        match &epub {
            Some(path) => info!("EPUB file successfully created: {}", path.display()),
            None => error!("EPUB generation failed."),
        }
        Ok(PipelineOutcome::Completed(epub))
    }

    fn finish_task(&self, task_id: &str, result: Result<PipelineOutcome>) -> Result<PipelineOutcome> {
        let status = match &result {
            Ok(PipelineOutcome::Completed(_)) => TaskStatus::Completed,
            Ok(PipelineOutcome::Cancelled) => TaskStatus::Cancelled,
            Err(e) => {
                error!("Pipeline failed: {}", e);
                TaskStatus::Failed
            }
        };
        if let Err(e) = self.history.update_task(task_id, status) {
            warn!("Could not update history for {}: {}", task_id, e);
        }
        result
    }

    async fn open_downloader(
        &self,
        url: &str,
        range: ChapterRange,
        output_dir: Option<&Path>,
        models: Option<&ModelSet>,
    ) -> Result<Arc<Downloader>> {
        let source = self.registry.resolve(url)?;
        let translator = models.map(|set| set.primary.as_ref());
        let downloader = Downloader::open(
            source,
            self.fetcher.clone(),
            &self.books_dir(output_dir),
            url,
            range,
            translator,
        )
        .await?;

        let pending = downloader.pending_chapters().len();
        if let Ok(seconds) = self.registry.estimate_download_time(downloader.source_name(), pending) {
            info!("Estimated download time for {} chapters: {:.0} seconds", pending, seconds);
        }
        Ok(Arc::new(downloader))
    }

    /// Download stage only; returns the book directory.
    pub async fn download(&self, url: &str, range: ChapterRange, output_dir: Option<&Path>) -> Result<PathBuf> {
        // Book info is translated when a model is available; downloading works without one.
        let models = self.models().ok();
        let downloader = self.open_downloader(url, range, output_dir, models.as_ref()).await?;

        info!("--- Stage 1: Downloading Book Chapters ---");
        let watcher = downloader.clone();
        let summary = until_interrupted(move || watcher.stop(), downloader.download_book()).await?;
        info!(
            "Downloaded {} chapters ({} failed) into {}",
            summary.completed,
            summary.failed,
            downloader.workspace().root().display()
        );
        Ok(downloader.workspace().root().to_path_buf())
    }

    /// Prompt creation and translation on an existing book directory.
    pub async fn translate_book(
        &self,
        book_dir: &Path,
        range: ChapterRange,
        style: PromptStyle,
    ) -> Result<TranslationSummary> {
        let workspace = open_existing(book_dir)?;
        self.run_translation(&workspace, self.models()?, range, style).await
    }

    async fn run_translation(
        &self,
        workspace: &BookWorkspace,
        models: ModelSet,
        range: ChapterRange,
        style: PromptStyle,
    ) -> Result<TranslationSummary> {
        info!("--- Stage 2: Creating Prompt Files ---");
        workspace.create_prompt_files(range, self.config.translate.max_chars_per_prompt)?;

        if self.config.translate.use_name_glossary {
            workspace.extract_and_count_names()?;
        }

        info!("--- Stage 3: Translating Prompts ---");
        let manager = TranslationManager::new(models, workspace.clone(), &self.config.translate);
        let watcher = manager.clone();
        until_interrupted(move || watcher.stop(), manager.translate_book(style, range)).await
    }

    /// Package the translated chapters of `book_dir`.
    pub fn build_epub(&self, book_dir: &Path) -> Result<Option<PathBuf>> {
        let workspace = open_existing(book_dir)?;
        let meta = book_meta(&workspace);
        self.package(&workspace, &meta, ChapterRange::all())
    }

    fn package(&self, workspace: &BookWorkspace, meta: &BookMeta, range: ChapterRange) -> Result<Option<PathBuf>> {
        workspace.generate_epub(
            &meta.title,
            &meta.author,
            meta.cover.as_deref(),
            range,
            &self.config.epub,
        )
    }

    pub fn status(&self, book_dir: &Path, range: ChapterRange) -> Result<BTreeMap<String, ChapterStatus>> {
        let workspace = open_existing(book_dir)?;
        let progress = crate::progress::ProgressData::load(&workspace.progress_path());
        workspace.chapter_status(range, &progress)
    }

    pub fn extract_names(&self, book_dir: &Path) -> Result<Vec<(String, usize)>> {
        open_existing(book_dir)?.extract_and_count_names()
    }

    /// Translate a standalone text file chunk by chunk. Defaults the output to
    /// `<stem>_translated.txt` next to the input.
    pub async fn translate_text_file(
        &self,
        input: &Path,
        output: Option<&Path>,
        style: PromptStyle,
    ) -> Result<PathBuf> {
        if !input.is_file() {
            return Err(BookError::FileNotFound(input.display().to_string()));
        }
        let text = std::fs::read_to_string(input)?;
        let chunks = split_text_into_chunks(&text, self.config.translate.max_chars_per_prompt);
        info!("Translating {} in {} chunks", input.display(), chunks.len());

        let scratch = BookWorkspace::new(self.config.output.data_dir.join("text"))?;
        let manager = TranslationManager::new(self.models()?, scratch, &self.config.translate);
        let watcher = manager.clone();
        let translated = until_interrupted(move || watcher.stop(), manager.translate_chunks(&chunks, style)).await?;
        if manager.is_stopped() {
            return Err(BookError::Cancelled);
        }
        if translated.len() < chunks.len() {
            warn!("{} of {} chunks could not be translated", chunks.len() - translated.len(), chunks.len());
        }

        let output = match output {
            Some(path) => path.to_path_buf(),
            None => {
                let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
                input.with_file_name(format!("{}_translated.txt", stem))
            }
        };
        std::fs::write(&output, translated.join("\n\n"))?;
        info!("Translated text saved to {}", output.display());
        Ok(output)
    }
}

fn open_existing(book_dir: &Path) -> Result<BookWorkspace> {
    if !book_dir.is_dir() {
        return Err(BookError::FileNotFound(book_dir.display().to_string()));
    }
    BookWorkspace::new(book_dir)
}

/// Title, author and cover from `state.json`, or the directory name.
fn book_meta(workspace: &BookWorkspace) -> BookMeta {
    let cover = Some(workspace.cover_path()).filter(|path| path.is_file());
    match BookState::load(&workspace.state_path()) {
        Some(state) if !state.book_info.title.is_empty() => BookMeta {
            title: state.book_info.title,
            author: if state.book_info.author.is_empty() {
                UNKNOWN_AUTHOR.to_string()
            } else {
                state.book_info.author
            },
            cover,
        },
        _ => BookMeta {
            title: workspace
                .root()
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "book".to_string()),
            author: UNKNOWN_AUTHOR.to_string(),
            cover,
        },
    }
}

/// Exit status for a forced quit, as for a process killed by SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

/// Run `work`, calling `on_interrupt` if Ctrl-C arrives first. The work itself
/// keeps running so it can wind down and save its state; a second Ctrl-C exits
/// the process at once.
async fn until_interrupted<F, T, S>(on_interrupt: S, work: F) -> T
where
    F: Future<Output = T>,
    S: FnOnce() + Send + 'static,
{
    let ctrl_c = || async { tokio::signal::ctrl_c().await.is_ok() };
    let force_quit = || {
        error!("Second interrupt received, exiting without waiting for running tasks");
        std::process::exit(FORCED_EXIT_CODE);
    };
    watch_interrupts(ctrl_c, on_interrupt, force_quit, work).await
}

/// `next_signal` resolves to true for each interrupt and false when no more
/// can arrive.
async fn watch_interrupts<F, T, G, Sig, S, Q>(mut next_signal: G, on_interrupt: S, on_force: Q, work: F) -> T
where
    F: Future<Output = T>,
    G: FnMut() -> Sig + Send + 'static,
    Sig: Future<Output = bool> + Send,
    S: FnOnce() + Send + 'static,
    Q: FnOnce() + Send + 'static,
{
    let watcher = tokio::spawn(async move {
        if !next_signal().await {
            return;
        }
        warn!("Interrupt received, stopping... (press Ctrl-C again to quit immediately)");
        on_interrupt();
        if next_signal().await {
            on_force();
        }
    });
    let output = work.await;
    watcher.abort();
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::fetcher::MockPageFetcher;
    use crate::download::{BookInfo, ChapterDownload};
    use crate::history::TaskType;
    use crate::translate::GeminiModel;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn workflow(temp: &TempDir) -> Workflow {
        let mut config = Config::default();
        config.output.books_dir = temp.path().join("books");
        config.output.data_dir = temp.path().join("data");
        Workflow::with_parts(config, SourceRegistry::with_defaults(), Arc::new(MockPageFetcher::new()), None)
    }

    #[test]
    fn test_book_meta_prefers_state_file() {
        let temp = TempDir::new().unwrap();
        let workspace = BookWorkspace::new(temp.path().join("book_1")).unwrap();
        assert_eq!(book_meta(&workspace).title, "book_1");

        let state = BookState {
            book_info: BookInfo {
                id: "1".to_string(),
                title: "Tiên Nghịch".to_string(),
                author: String::new(),
                source_url: "https://cn.ttkan.co/novel/chapters/1".to_string(),
                cover_img: String::new(),
            },
            chapter_urls: vec![],
            download_status: BTreeMap::from([("1".to_string(), ChapterDownload::Completed)]),
        };
        state.save(&workspace.state_path()).unwrap();
        std::fs::write(workspace.cover_path(), [0u8; 4]).unwrap();

        let meta = book_meta(&workspace);
        assert_eq!(meta.title, "Tiên Nghịch");
        assert_eq!(meta.author, UNKNOWN_AUTHOR);
        assert_eq!(meta.cover, Some(workspace.cover_path()));
    }

    #[test]
    fn test_build_epub_from_translated_chapters() {
        let temp = TempDir::new().unwrap();
        let flow = workflow(&temp);
        let book = temp.child("books/my-book");
        book.child("translated_chapters/chapter_0001.txt")
            .write_str("Đoạn một.\n\nĐoạn hai.")
            .unwrap();

        let epub = flow.build_epub(book.path()).unwrap().unwrap();
        assert_eq!(epub, book.path().join("epub").join("my-book.epub"));
        assert!(epub.is_file());
        assert!(flow.build_epub(&temp.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn test_unsupported_url_marks_history_failed() {
        let temp = TempDir::new().unwrap();
        let config = workflow(&temp).config().clone();
        let model = Arc::new(GeminiModel::new(&config.translate, "gemini-2.0-flash", "test-key").unwrap());
        let models = ModelSet::new(model.clone(), model.clone(), model);
        let flow = Workflow::with_parts(
            config,
            SourceRegistry::with_defaults(),
            Arc::new(MockPageFetcher::new()),
            Some(models),
        );

        let result = flow
            .process_url("https://example.com/book/1", ChapterRange::all(), PromptStyle::Modern, None)
            .await;
        assert!(matches!(result, Err(BookError::UnsupportedSource(_))));

        let entries = flow.history().load();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task_type, TaskType::Web);
        assert_eq!(entries[0].status, TaskStatus::Failed);
    }

    fn signals(count: usize) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = bool> + Send>> + Send + 'static {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        for _ in 0..count {
            tx.send(()).unwrap();
        }
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        move || {
            let rx = rx.clone();
            Box::pin(async move {
                match rx.lock().await.recv().await {
                    Some(()) => true,
                    None => std::future::pending().await,
                }
            })
        }
    }

    #[tokio::test]
    async fn test_first_interrupt_stops_work() {
        let stopped = Arc::new(tokio::sync::Notify::new());
        let forced = Arc::new(AtomicBool::new(false));

        let notify = stopped.clone();
        let force_flag = forced.clone();
        let output = watch_interrupts(
            signals(1),
            move || notify.notify_one(),
            move || force_flag.store(true, Ordering::SeqCst),
            async {
                stopped.notified().await;
                "wound down"
            },
        )
        .await;

        assert_eq!(output, "wound down");
        assert!(!forced.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_second_interrupt_forces_quit() {
        let interrupted = Arc::new(AtomicBool::new(false));
        let forced = Arc::new(tokio::sync::Notify::new());

        let interrupt_flag = interrupted.clone();
        let notify = forced.clone();
        let output = watch_interrupts(
            signals(2),
            move || interrupt_flag.store(true, Ordering::SeqCst),
            move || notify.notify_one(),
            async {
                forced.notified().await;
                1
            },
        )
        .await;

        assert_eq!(output, 1);
        assert!(interrupted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_work_finishing_first_ignores_signals() {
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        let output = watch_interrupts(
            signals(0),
            move || flag.store(true, Ordering::SeqCst),
            || panic!("no interrupt was sent"),
            async { 7 },
        )
        .await;

        assert_eq!(output, 7);
        assert!(!interrupted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_status_and_names_require_existing_book() {
        let temp = TempDir::new().unwrap();
        let flow = workflow(&temp);
        let missing = temp.path().join("nope");
        assert!(matches!(flow.status(&missing, ChapterRange::all()), Err(BookError::FileNotFound(_))));
        assert!(flow.extract_names(&missing).is_err());
        assert_eq!(flow.sources().len(), 7);
    }
}
