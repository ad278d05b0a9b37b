use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{BookError, Result};
use crate::prompts::PromptStyle;

/// Batch size used for model names without a preset.
pub const DEFAULT_BATCH_SIZE: usize = 15;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub translate: TranslateConfig,
    pub download: DownloadConfig,
    pub epub: EpubConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// Gemini REST endpoint (without the `/models/...` suffix)
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Model for first-pass translation
    pub model: String,
    /// Model for retrying failed shards
    pub retry_model: String,
    /// Model for cleaning up partially translated shards
    pub cleanup_model: String,
    /// Default prompt style
    pub prompt_style: PromptStyle,
    /// Minimum seconds between two batches on the same model
    pub translation_interval_secs: u64,
    /// Maximum characters per prompt shard
    pub max_chars_per_prompt: usize,
    /// Timeout for a single model request
    pub request_timeout_secs: u64,
    /// Upper bound on translate/retry rounds per run
    pub max_rounds: u32,
    /// Pass the extracted name glossary along with every prompt
    pub use_name_glossary: bool,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Retries after the first failed request
    pub max_retries: u32,
    /// Delay before the first retry
    pub retry_min_delay_ms: u64,
    /// Backoff multiplier between retries
    pub retry_multiplier: u32,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpubConfig {
    pub language: String,
    pub toc_title: String,
    /// Replaces the built-in stylesheet when set
    pub custom_css: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory for downloaded and translated books
    pub books_dir: PathBuf,
    /// Holds logs and the task history
    pub data_dir: PathBuf,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            model: "gemini-2.0-flash".to_string(),
            retry_model: "gemini-2.5-pro".to_string(),
            cleanup_model: "gemini-2.0-flash-lite".to_string(),
            prompt_style: PromptStyle::Modern,
            translation_interval_secs: 66,
            max_chars_per_prompt: 6000,
            request_timeout_secs: 180,
            max_rounds: 10,
            use_name_glossary: true,
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.95,
            top_k: 64,
            max_output_tokens: 8192,
            response_mime_type: "text/plain".to_string(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_retries: 3,
            retry_min_delay_ms: 500,
            retry_multiplier: 2,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
        }
    }
}

impl Default for EpubConfig {
    fn default() -> Self {
        Self {
            language: "vi".to_string(),
            toc_title: "Mục Lục".to_string(),
            custom_css: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            books_dir: PathBuf::from("books"),
            data_dir: PathBuf::from(".book-translator"),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BookError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| BookError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BookError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| BookError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Explicit path first, then `config.toml` in the working directory, then defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(config_path) => Self::from_file(config_path),
            None => {
                if Path::new("config.toml").exists() {
                    info!("Found config.toml in current directory, loading...");
                    Self::from_file("config.toml")
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

impl TranslateConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(BookError::Config(format!(
                "API key not found. Set environment variable: {}",
                self.api_key_env
            ))),
        }
    }
}

/// Concurrent request budget per model.
pub fn batch_size_for_model(model: &str) -> usize {
    match model {
        "gemini-2.0-flash" => 15,
        "gemini-2.0-flash-lite" => 30,
        "gemini-2.5-pro" => 5,
        _ => DEFAULT_BATCH_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.translate.model = "gemini-2.0-flash-lite".to_string();
        config.translate.prompt_style = PromptStyle::ChinaFantasy;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.translate.model, "gemini-2.0-flash-lite");
        assert_eq!(loaded.translate.prompt_style, PromptStyle::ChinaFantasy);
        assert_eq!(loaded.epub.toc_title, "Mục Lục");
    }

    #[test]
    fn test_optional_fields_fall_back_to_defaults() {
        let mut config = toml::Value::try_from(Config::default()).unwrap();
        let translate = config.get_mut("translate").unwrap().as_table_mut().unwrap();
        translate.remove("max_rounds");
        translate.remove("use_name_glossary");

        let parsed: Config = toml::from_str(&toml::to_string(&config).unwrap()).unwrap();
        assert_eq!(parsed.translate.max_rounds, 10);
        assert!(parsed.translate.use_name_glossary);
    }

    #[test]
    fn test_partial_file_keeps_remaining_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [translate]
            prompt_style = "china-fantasy"

            [output]
            books_dir = "novels"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.translate.prompt_style, PromptStyle::ChinaFantasy);
        assert_eq!(parsed.translate.model, "gemini-2.0-flash");
        assert_eq!(parsed.translate.generation.top_k, 64);
        assert_eq!(parsed.output.books_dir, PathBuf::from("novels"));
        assert_eq!(parsed.output.data_dir, PathBuf::from(".book-translator"));
        assert_eq!(parsed.download.max_retries, 3);
    }

    #[test]
    fn test_missing_config_file_is_a_config_error() {
        let err = Config::from_file("/nonexistent/book-translator.toml").unwrap_err();
        assert!(matches!(err, BookError::Config(_)));
    }

    #[test]
    fn test_missing_api_key_names_the_variable() {
        let mut config = Config::default().translate;
        config.api_key_env = "BOOK_TRANSLATOR_TEST_UNSET_KEY".to_string();
        let err = config.api_key().unwrap_err();
        assert!(err.to_string().contains("BOOK_TRANSLATOR_TEST_UNSET_KEY"));
    }

    #[test]
    fn test_batch_size_presets() {
        assert_eq!(batch_size_for_model("gemini-2.0-flash"), 15);
        assert_eq!(batch_size_for_model("gemini-2.0-flash-lite"), 30);
        assert_eq!(batch_size_for_model("gemini-2.5-pro"), 5);
        assert_eq!(batch_size_for_model("something-else"), DEFAULT_BATCH_SIZE);
    }
}
