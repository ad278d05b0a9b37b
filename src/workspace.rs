use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chapter::{ChapterRange, sanitize_path_name, shard_chapter_name};
use crate::config::EpubConfig;
use crate::epub::{EpubGenerator, EpubMetadata};
use crate::error::{BookError, Result};
use crate::progress::{FAILURE_MARKER, ProgressData};
use crate::text::{has_repeated_symbols, has_repeated_words, split_text_into_chunks, unique_names};

const MIN_NAME_OCCURRENCES: usize = 10;
const REPEATED_WORD_RUN: usize = 21;
const REPEATED_SYMBOL_RUN: usize = 100;
const SENTENCE_ENDINGS: &[char] = &['.', '!', '?', '。', '…'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubDir {
    InputChapters,
    PromptFiles,
    TranslationResponses,
    TranslatedChapters,
    Epub,
}

impl SubDir {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputChapters => "input_chapters",
            Self::PromptFiles => "prompt_files",
            Self::TranslationResponses => "translation_responses",
            Self::TranslatedChapters => "translated_chapters",
            Self::Epub => "epub",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChapterState {
    NotStarted,
    Translating,
    Translated,
    Incomplete,
}

impl fmt::Display for ChapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotStarted => "Not Started",
            Self::Translating => "Translating",
            Self::Translated => "Translated",
            Self::Incomplete => "Incomplete",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterStatus {
    pub total_shards: usize,
    pub translated_shards: usize,
    pub failed_shards: usize,
    pub progress: f64,
    pub status: ChapterState,
}

/// On-disk layout of one book.
#[derive(Debug, Clone)]
pub struct BookWorkspace {
    root: PathBuf,
}

impl BookWorkspace {
    pub fn new<P: AsRef<Path>>(book_dir: P) -> Result<Self> {
        let workspace = Self {
            root: book_dir.as_ref().to_path_buf(),
        };
        for sub in [
            SubDir::PromptFiles,
            SubDir::TranslationResponses,
            SubDir::TranslatedChapters,
            SubDir::Epub,
        ] {
            std::fs::create_dir_all(workspace.path(sub))?;
        }
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, sub: SubDir) -> PathBuf {
        self.root.join(sub.as_str())
    }

    pub fn progress_path(&self) -> PathBuf {
        self.root.join("progress.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn names_path(&self) -> PathBuf {
        self.root.join("names.json")
    }

    pub fn cover_path(&self) -> PathBuf {
        self.root.join("cover.jpg")
    }

    pub fn save_file(&self, sub: SubDir, file_name: &str, content: &str) -> Result<PathBuf> {
        let dir = self.path(sub);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        std::fs::write(&path, content)?;
        debug!("File saved: {}", path.display());
        Ok(path)
    }

    /// `None` when the file does not exist.
    pub fn load_file(&self, sub: SubDir, file_name: &str) -> Result<Option<String>> {
        let path = self.path(sub).join(file_name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete_file(&self, sub: SubDir, file_name: &str) -> Result<bool> {
        let path = self.path(sub).join(file_name);
        if !path.is_file() {
            warn!("File not found, cannot delete: {}", path.display());
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        info!("Deleted file: {}", file_name);
        Ok(true)
    }

    /// Sorted names of the `.txt` files directly inside `sub`.
    pub fn list_txt(&self, sub: SubDir) -> Result<Vec<String>> {
        let dir = self.path(sub);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| BookError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|ext| ext.to_str()) == Some("txt") {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Split input chapters in range into prompt shards; chapters that already
    /// have shards are left alone. Returns the number of shards written.
    pub fn create_prompt_files(&self, range: ChapterRange, max_chars: usize) -> Result<usize> {
        let chapters: Vec<String> = self
            .list_txt(SubDir::InputChapters)?
            .into_iter()
            .filter(|name| range.contains(name))
            .collect();
        if chapters.is_empty() {
            warn!("No chapter files found in: {}", self.path(SubDir::InputChapters).display());
            return Ok(0);
        }

        let existing: HashSet<String> = self
            .list_txt(SubDir::PromptFiles)?
            .iter()
            .filter_map(|name| shard_chapter_name(name))
            .collect();

        let mut prompt_count = 0;
        let mut new_chapters = 0;
        for chapter in chapters {
            let stem = chapter.trim_end_matches(".txt");
            if existing.contains(stem) {
                debug!("Skipping {} - prompt files already exist", stem);
                continue;
            }
            let Some(text) = self.load_file(SubDir::InputChapters, &chapter)? else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }

            new_chapters += 1;
            for (idx, shard) in split_text_into_chunks(&text, max_chars).iter().enumerate() {
                self.save_file(SubDir::PromptFiles, &format!("{}_{}.txt", stem, idx + 1), shard)?;
                prompt_count += 1;
            }
        }

        if new_chapters > 0 {
            info!("Created {} prompt files from {} new chapters.", prompt_count, new_chapters);
        } else {
            info!("No new chapters to process - all chapters already have prompt files.");
        }
        Ok(prompt_count)
    }

    pub fn is_translation_complete(&self, range: ChapterRange, progress: &ProgressData) -> Result<bool> {
        let responses: HashSet<String> = self.list_txt(SubDir::TranslationResponses)?.into_iter().collect();

        let remaining = self
            .list_txt(SubDir::PromptFiles)?
            .into_iter()
            .filter(|name| range.contains(name))
            .filter(|name| {
                if !responses.contains(name) {
                    return true;
                }
                progress
                    .failed_translations
                    .get(name)
                    .is_some_and(|failure| !failure.retried)
            })
            .count();

        if remaining > 0 {
            info!("Remaining translations in chapters {}: {}", range, remaining);
            return Ok(false);
        }
        info!("All translations completed for chapters {}", range);
        Ok(true)
    }

    pub fn combine_chapter_translations(&self, range: ChapterRange) -> Result<usize> {
        let mut chapters: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in self.list_txt(SubDir::TranslationResponses)? {
            if !range.contains(&name) {
                continue;
            }
            if let Some(chapter) = shard_chapter_name(&name) {
                chapters.entry(chapter).or_default().push(name);
            }
        }

        for (chapter, shards) in chapters.iter_mut() {
            shards.sort_by_key(|name| shard_index(name));
            let mut combined = String::new();
            for shard in shards.iter() {
                match self.load_file(SubDir::TranslationResponses, shard) {
                    Ok(Some(content)) => {
                        combined.push_str(&content);
                        combined.push('\n');
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Error reading file {}: {}", shard, e),
                }
            }
            self.save_file(SubDir::TranslatedChapters, &format!("{}.txt", chapter), &combined)?;
            info!("Combined chapter translation: {}", chapter);
        }

        info!("Combine chapter translations complete");
        Ok(chapters.len())
    }

    /// Remove responses that look truncated or degenerate so they get translated again.
    pub fn delete_invalid_translations(&self) -> Result<usize> {
        let mut deleted = 0;

        for name in self.list_txt(SubDir::TranslationResponses)? {
            let content = match self.load_file(SubDir::TranslationResponses, &name) {
                Ok(Some(content)) => content,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Deleting unreadable translation {}: {}", name, e);
                    if self.delete_file(SubDir::TranslationResponses, &name)? {
                        deleted += 1;
                    }
                    continue;
                }
            };

            if content.contains(FAILURE_MARKER) {
                continue;
            }

            let Some(original) = self.load_file(SubDir::PromptFiles, &name)? else {
                if self.delete_file(SubDir::TranslationResponses, &name)? {
                    deleted += 1;
                    warn!("Deleted translation with no prompt: {}", name);
                }
                continue;
            };

            let reasons = invalid_translation_reasons(&content, &original);
            if !reasons.is_empty() && self.delete_file(SubDir::TranslationResponses, &name)? {
                deleted += 1;
                warn!(
                    "Deleted likely invalid translation: {} (Reasons: {}).",
                    name,
                    reasons.join(", ")
                );
            }
        }

        if deleted > 0 {
            info!("Deleted {} potentially invalid translation files.", deleted);
        } else {
            info!("No invalid translation files found.");
        }
        Ok(deleted)
    }

    /// Aggregate proper names across all responses into `names.json`.
    pub fn extract_and_count_names(&self) -> Result<Vec<(String, usize)>> {
        info!("Starting name extraction and counting...");
        let mut totals: BTreeMap<String, usize> = BTreeMap::new();

        for name in self.list_txt(SubDir::TranslationResponses)? {
            let Some(content) = self.load_file(SubDir::TranslationResponses, &name)? else {
                continue;
            };
            for (found, count) in unique_names(&content) {
                *totals.entry(found).or_insert(0) += count;
            }
        }

        let mut sorted: Vec<(String, usize)> = totals
            .into_iter()
            .filter(|(_, count)| *count >= MIN_NAME_OCCURRENCES)
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        if sorted.is_empty() {
            warn!("No names found to extract.");
            return Ok(sorted);
        }

        let names: serde_json::Map<String, serde_json::Value> = sorted
            .iter()
            .map(|(name, count)| (name.clone(), serde_json::Value::from(*count)))
            .collect();
        std::fs::write(self.names_path(), serde_json::to_string_pretty(&names)?)?;
        info!("Saved sorted names to: {}", self.names_path().display());

        Ok(sorted)
    }

    /// Glossary lines `name - count`, or `None` without a usable `names.json`.
    pub fn load_names_as_string(&self) -> Option<String> {
        let content = std::fs::read_to_string(self.names_path()).ok()?;
        let names: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid JSON format in file {}: {}", self.names_path().display(), e);
                return None;
            }
        };

        let object = names.as_object()?;
        let mut entries: Vec<(&String, u64)> = object
            .iter()
            .map(|(name, count)| (name, count.as_u64().unwrap_or(0)))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let mut output = String::new();
        for (name, count) in entries {
            output.push_str(&format!("{} - {}\n", name, count));
        }
        Some(output)
    }

    pub fn chapter_status(
        &self,
        range: ChapterRange,
        progress: &ProgressData,
    ) -> Result<BTreeMap<String, ChapterStatus>> {
        let mut statuses: BTreeMap<String, ChapterStatus> = BTreeMap::new();

        for name in self.list_txt(SubDir::PromptFiles)? {
            if !range.contains(&name) {
                continue;
            }
            if let Some(chapter) = shard_chapter_name(&name) {
                statuses
                    .entry(chapter)
                    .or_insert(ChapterStatus {
                        total_shards: 0,
                        translated_shards: 0,
                        failed_shards: 0,
                        progress: 0.0,
                        status: ChapterState::NotStarted,
                    })
                    .total_shards += 1;
            }
        }

        for name in progress.failed_translations.keys() {
            if let Some(status) = shard_chapter_name(name).and_then(|chapter| statuses.get_mut(&chapter)) {
                status.failed_shards += 1;
            }
        }

        for name in self.list_txt(SubDir::TranslationResponses)? {
            if !range.contains(&name) || progress.failed_translations.contains_key(&name) {
                continue;
            }
            let Some(status) = shard_chapter_name(&name).and_then(|chapter| statuses.get_mut(&chapter)) else {
                continue;
            };
            let content = self.load_file(SubDir::TranslationResponses, &name)?.unwrap_or_default();
            if content.contains(FAILURE_MARKER) {
                status.failed_shards += 1;
            } else if !content.is_empty() {
                status.translated_shards += 1;
            }
        }

        for status in statuses.values_mut() {
            if status.total_shards == 0 {
                continue;
            }
            let ratio = status.translated_shards as f64 / status.total_shards as f64 * 100.0;
            status.progress = (ratio * 10.0).round() / 10.0;
            status.status = if status.failed_shards > 0 {
                ChapterState::Incomplete
            } else if status.translated_shards == status.total_shards {
                ChapterState::Translated
            } else if status.translated_shards > 0 {
                ChapterState::Translating
            } else {
                ChapterState::NotStarted
            };
        }

        Ok(statuses)
    }

    /// Split a local text file on blank lines into numbered input chapters.
    pub fn split_text_file<P: AsRef<Path>>(&self, input: P) -> Result<usize> {
        let input = input.as_ref();
        if !input.is_file() {
            return Err(BookError::FileNotFound(input.display().to_string()));
        }
        let content = std::fs::read_to_string(input)?;

        let mut written = 0;
        for (idx, piece) in content.split("\n\n").enumerate() {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            self.save_file(SubDir::InputChapters, &format!("chapter_{:04}.txt", idx + 1), piece)?;
            written += 1;
        }
        info!("Split {} into {} chapters", input.display(), written);
        Ok(written)
    }

    /// Build `epub/<title><range suffix>.epub` from the translated chapters in range.
    pub fn generate_epub(
        &self,
        title: &str,
        author: &str,
        cover: Option<&Path>,
        range: ChapterRange,
        config: &EpubConfig,
    ) -> Result<Option<PathBuf>> {
        let chapters_dir = self.path(SubDir::TranslatedChapters);
        let files: Vec<PathBuf> = self
            .list_txt(SubDir::TranslatedChapters)?
            .into_iter()
            .filter(|name| range.contains(name))
            .map(|name| chapters_dir.join(name))
            .collect();

        if files.is_empty() {
            warn!("No translated files found to create EPUB.");
            return Ok(None);
        }

        let title = sanitize_path_name(title);
        let output = self.path(SubDir::Epub).join(format!("{}{}.epub", title, range.suffix()));
        let metadata = EpubMetadata {
            title,
            author: author.to_string(),
            language: config.language.clone(),
            toc_title: config.toc_title.clone(),
            cover_image: cover.map(Path::to_path_buf),
            custom_css: config.custom_css.clone(),
        };

        EpubGenerator::new().create_epub_from_txt_files(&files, &metadata, &output)?;
        info!("EPUB file created: {}", output.display());
        Ok(Some(output))
    }
}

/// Trailing shard number: `chapter_0001_12.txt` -> 12.
fn shard_index(file_name: &str) -> u32 {
    file_name
        .trim_end_matches(".txt")
        .rsplit('_')
        .next()
        .and_then(|index| index.parse().ok())
        .unwrap_or(0)
}

fn invalid_translation_reasons(content: &str, original: &str) -> Vec<&'static str> {
    let mut reasons = Vec::new();
    let content_lines = content.lines().count();
    let original_lines = original.lines().count();
    let content_len = content.chars().count() as f64;
    let original_len = original.chars().count() as f64;

    if content_lines <= 1 && original_lines > 1 {
        reasons.push("Short content");
    }
    if has_repeated_words(content, REPEATED_WORD_RUN) {
        reasons.push("Repeated words");
    }
    if has_repeated_symbols(content, REPEATED_SYMBOL_RUN) {
        reasons.push("Repeated special characters");
    }
    if content_len < original_len * 0.3 && (content_lines as f64) < original_lines as f64 * 0.5 {
        reasons.push("Suspicious length ratio");
    }
    if let Some(last) = content.trim_end().chars().last() {
        if !SENTENCE_ENDINGS.contains(&last) && content_len < original_len * 0.9 {
            reasons.push("Incomplete translation");
        }
    }
    reasons
}
