// Novel downloading
//
// - fetcher: HTTP access behind the `PageFetcher` trait (mocked in tests)
// - registry: resolves a book URL to the source that can parse it
// - sources: per-site HTML parsing (quanben, piaotian, ttkan, dxmwx, 8xsk, langrenxiaoshuo, leyuedu)
//
// A source only parses HTML. Fetching, state persistence, concurrency and
// progress reporting live in `Downloader`, so a new site only needs a
// `BookSource` implementation registered in `SourceRegistry::with_defaults`.

pub mod fetcher;
pub mod registry;
pub mod sources;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

pub use fetcher::{HttpFetcher, PageFetcher};
pub use registry::{SourceInfo, SourceRegistry};

use crate::chapter::{ChapterRange, sanitize_path_name};
use crate::error::{BookError, Result};
use crate::prompts::PromptStyle;
use crate::translate::TranslationModel;
use crate::translate::manager::translate_with;
use crate::workspace::{BookWorkspace, SubDir};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookInfo {
    pub id: String,
    pub title: String,
    pub author: String,
    pub source_url: String,
    /// Local path of the downloaded cover, empty when there is none
    #[serde(default)]
    pub cover_img: String,
}

/// Metadata a source extracts from the book page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookPage {
    pub title: String,
    pub author: String,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterDownload {
    Completed,
    Failed,
}

/// Contents of `state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookState {
    pub book_info: BookInfo,
    #[serde(default)]
    pub chapter_urls: Vec<String>,
    /// Keyed by 1-based chapter number
    #[serde(default)]
    pub download_status: BTreeMap<String, ChapterDownload>,
}

impl BookState {
    /// `None` when the file is missing or unreadable.
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                error!("Corrupted state file {}, initializing fresh state: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn status(&self, chapter: u32) -> Option<ChapterDownload> {
        self.download_status.get(&chapter.to_string()).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    /// Download chapters in concurrent batches instead of one by one
    pub bulk_download: bool,
    pub concurrent_downloads: usize,
    /// Seconds to wait between batches (bulk) or chapters (sequential)
    pub request_delay: f64,
    pub source_language: &'static str,
    pub translate_book_info: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            bulk_download: false,
            concurrent_downloads: 1,
            request_delay: 0.0,
            source_language: "",
            translate_book_info: false,
        }
    }
}

/// Site-specific parsing of book, index and chapter pages.
pub trait BookSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hosts matched exactly by the registry
    fn domains(&self) -> &'static [&'static str];

    /// Case-insensitive regex tried when no domain matches
    fn url_pattern(&self) -> Option<&'static str> {
        None
    }

    fn settings(&self) -> SourceSettings;

    fn book_id(&self, url: &str) -> Result<String>;

    /// Page that lists the chapters of `book_id`
    fn index_url(&self, book_id: &str, book_url: &str) -> String;

    /// Index page `page` (2, 3, ...) for sites that split the chapter list.
    /// Paging stops at `None`, a failed fetch, or a page with no new chapters.
    fn index_page_url(&self, _book_id: &str, _page: usize) -> Option<String> {
        None
    }

    fn parse_book_info(&self, html: &str) -> BookPage;

    fn parse_chapter_urls(&self, html: &str, book_id: &str, index_url: &str) -> Vec<String>;

    /// Cleaned chapter text, `None` when the page has no recognizable content
    fn parse_chapter_content(&self, html: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub completed: usize,
    pub failed: usize,
}

/// Downloads one book into `<output_dir>/<source>/book_<id>`.
pub struct Downloader {
    source: Arc<dyn BookSource>,
    fetcher: Arc<dyn PageFetcher>,
    workspace: BookWorkspace,
    range: ChapterRange,
    state: Mutex<BookState>,
    stop_requested: AtomicBool,
}

impl Downloader {
    /// Resume from `state.json`, or fetch the book page and chapter index.
    pub async fn open(
        source: Arc<dyn BookSource>,
        fetcher: Arc<dyn PageFetcher>,
        output_dir: &Path,
        url: &str,
        range: ChapterRange,
        info_translator: Option<&dyn TranslationModel>,
    ) -> Result<Self> {
        let book_id = source.book_id(url)?;
        let book_dir = output_dir
            .join(source.name())
            .join(format!("book_{}", sanitize_path_name(&book_id)));
        let workspace = BookWorkspace::new(&book_dir)?;

        // a state without chapters came from a failed or empty index fetch
        let saved = BookState::load(&workspace.state_path()).filter(|state| !state.chapter_urls.is_empty());
        let state = match saved {
            Some(state) => {
                info!(
                    "Resuming download of '{}' ({} chapters known)",
                    state.book_info.title,
                    state.chapter_urls.len()
                );
                state
            }
            None => {
                let state =
                    initialize_book(source.as_ref(), fetcher.as_ref(), &workspace, &book_id, url, info_translator)
                        .await?;
                state.save(&workspace.state_path())?;
                state
            }
        };

        Ok(Self {
            source,
            fetcher,
            workspace,
            range,
            state: Mutex::new(state),
            stop_requested: AtomicBool::new(false),
        })
    }

    pub fn workspace(&self) -> &BookWorkspace {
        &self.workspace
    }

    pub fn book_info(&self) -> BookInfo {
        self.lock().book_info.clone()
    }

    pub fn state(&self) -> BookState {
        self.lock().clone()
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn stop(&self) {
        info!("Download stop requested");
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BookState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Chapters in range that are not downloaded yet, numbered from 1.
    pub fn pending_chapters(&self) -> Vec<(u32, String)> {
        let state = self.lock();
        state
            .chapter_urls
            .iter()
            .enumerate()
            .map(|(idx, url)| (idx as u32 + 1, url.clone()))
            .filter(|(number, _)| self.range.contains_index(*number))
            .filter(|(number, _)| state.status(*number) != Some(ChapterDownload::Completed))
            .collect()
    }

    pub async fn download_book(&self) -> Result<DownloadSummary> {
        let pending = self.pending_chapters();
        if pending.is_empty() {
            info!("No chapters to download in the specified range.");
            return Ok(DownloadSummary::default());
        }

        let settings = self.source.settings();
        info!(
            "Downloading {} chapters from {} ({})",
            pending.len(),
            self.source.name(),
            if settings.bulk_download { "bulk" } else { "sequential" }
        );

        let progress = ProgressBar::new(pending.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chapters ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let delay = Duration::from_secs_f64(settings.request_delay.max(0.0));
        let mut summary = DownloadSummary::default();

        if settings.bulk_download {
            for batch in pending.chunks(settings.concurrent_downloads.max(1)) {
                if self.is_stopped() {
                    info!("Download stopped gracefully.");
                    break;
                }

                let mut running = JoinSet::new();
                for (number, url) in batch.iter().cloned() {
                    let source = self.source.clone();
                    let fetcher = self.fetcher.clone();
                    running.spawn(async move {
                        let content = fetch_chapter(source.as_ref(), fetcher.as_ref(), &url).await;
                        (number, content)
                    });
                }

                while let Some(joined) = running.join_next().await {
                    match joined {
                        Ok((number, content)) => self.record_chapter(number, content, &mut summary)?,
                        Err(e) => error!("Chapter download task failed: {}", e),
                    }
                    progress.inc(1);
                }
                tokio::time::sleep(delay).await;
            }
        } else {
            for (number, url) in pending {
                if self.is_stopped() {
                    info!("Download stopped gracefully.");
                    break;
                }
                let content = fetch_chapter(self.source.as_ref(), self.fetcher.as_ref(), &url).await;
                self.record_chapter(number, content, &mut summary)?;
                progress.inc(1);
                tokio::time::sleep(delay).await;
            }
        }

        progress.finish_with_message("Download finished");
        info!(
            "Download finished: {} chapters saved, {} failed",
            summary.completed, summary.failed
        );
        Ok(summary)
    }

    fn record_chapter(&self, number: u32, content: Result<String>, summary: &mut DownloadSummary) -> Result<()> {
        let status = match content {
            Ok(text) => {
                let file_name = format!("chapter_{:04}.txt", number);
                self.workspace.save_file(SubDir::InputChapters, &file_name, &text)?;
                info!("Saved chapter {} to {}", number, file_name);
                summary.completed += 1;
                ChapterDownload::Completed
            }
            Err(e) => {
                error!("Permanent failure on chapter {}: {}", number, e);
                summary.failed += 1;
                ChapterDownload::Failed
            }
        };

        let mut state = self.lock();
        state.download_status.insert(number.to_string(), status);
        state.save(&self.workspace.state_path())
    }
}

async fn fetch_chapter(source: &dyn BookSource, fetcher: &dyn PageFetcher, url: &str) -> Result<String> {
    let html = fetcher.fetch_text(url).await?;
    source
        .parse_chapter_content(&html)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| BookError::Download(format!("Empty content received for {}", url)))
}

async fn initialize_book(
    source: &dyn BookSource,
    fetcher: &dyn PageFetcher,
    workspace: &BookWorkspace,
    book_id: &str,
    url: &str,
    info_translator: Option<&dyn TranslationModel>,
) -> Result<BookState> {
    let html = fetcher
        .fetch_text(url)
        .await
        .map_err(|e| BookError::Download(format!("Failed to fetch book page {}: {}", url, e)))?;
    let page = source.parse_book_info(&html);
    info!("Found book '{}' by '{}'", page.title, page.author);

    let mut book_info = BookInfo {
        id: book_id.to_string(),
        title: page.title,
        author: page.author,
        source_url: url.to_string(),
        cover_img: String::new(),
    };

    if source.settings().translate_book_info {
        if let Some(model) = info_translator {
            book_info.title = translate_book_field(model, &book_info.title).await;
            book_info.author = translate_book_field(model, &book_info.author).await;
        }
    }

    if let Some(cover_url) = page.cover_url.filter(|u| !u.is_empty()) {
        // covers may be given relative to the book page
        let cover_url = Url::parse(url)
            .and_then(|base| base.join(&cover_url))
            .map(String::from)
            .unwrap_or(cover_url);
        book_info.cover_img = download_cover(fetcher, workspace, &cover_url).await;
    }

    let index_url = source.index_url(book_id, url);
    let index_html = fetcher
        .fetch_text(&index_url)
        .await
        .map_err(|e| BookError::Download(format!("Failed to fetch chapter index {}: {}", index_url, e)))?;
    let mut chapter_urls = source.parse_chapter_urls(&index_html, book_id, &index_url);

    let mut previous = chapter_urls.clone();
    let mut page_number = 2;
    while let Some(page_url) = source.index_page_url(book_id, page_number) {
        let html = match fetcher.fetch_text(&page_url).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Stopping at chapter index page {}: {}", page_url, e);
                break;
            }
        };
        let found = source.parse_chapter_urls(&html, book_id, &page_url);
        if found.is_empty() || found == previous {
            break;
        }
        debug!("Index page {} lists {} chapters", page_number, found.len());
        chapter_urls.extend(found.iter().cloned());
        previous = found;
        page_number += 1;
        tokio::time::sleep(Duration::from_secs_f64(source.settings().request_delay.max(0.0))).await;
    }
    if chapter_urls.is_empty() {
        warn!("No chapters found for {}", url);
    } else {
        info!("Found {} chapters", chapter_urls.len());
    }

    Ok(BookState {
        book_info,
        chapter_urls,
        download_status: BTreeMap::new(),
    })
}

async fn translate_book_field(model: &dyn TranslationModel, text: &str) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }
    match translate_with(model, text, None, PromptStyle::BookInfo).await {
        Ok(translated) => translated,
        Err(e) => {
            warn!("Could not translate book info '{}': {}", text, e);
            text.to_string()
        }
    }
}

async fn download_cover(fetcher: &dyn PageFetcher, workspace: &BookWorkspace, cover_url: &str) -> String {
    let path = workspace.cover_path();
    let result = match fetcher.fetch_bytes(cover_url).await {
        Ok(bytes) => std::fs::write(&path, bytes).map_err(BookError::from),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => path.to_string_lossy().into_owned(),
        Err(e) => {
            error!("Error downloading cover image: {}", e);
            String::new()
        }
    }
}
