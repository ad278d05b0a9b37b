use regex::RegexBuilder;
use std::sync::Arc;
use tracing::{debug, warn};

use super::sources::{
    DxmwxSource, EightXskSource, LangrenSource, LeyueduSource, PiaotianSource, QuanbenSource, TtkanSource,
};
use super::{BookSource, SourceSettings};
use crate::error::{BookError, Result};

/// Seconds a single chapter request is assumed to take.
const BASE_TIME_PER_CHAPTER: f64 = 1.0;
/// Extra cost of running requests in parallel.
const PARALLEL_OVERHEAD: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub name: String,
    pub domains: Vec<String>,
    pub bulk_download: bool,
    pub concurrent_downloads: usize,
    pub request_delay: f64,
    pub source_language: String,
    /// Estimated chapters per second
    pub download_speed: f64,
}

/// Known sources, looked up by host and then by URL pattern.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn BookSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(QuanbenSource));
        registry.register(Arc::new(PiaotianSource));
        registry.register(Arc::new(TtkanSource));
        registry.register(Arc::new(DxmwxSource));
        registry.register(Arc::new(EightXskSource));
        registry.register(Arc::new(LangrenSource));
        registry.register(Arc::new(LeyueduSource));
        registry
    }

    pub fn register(&mut self, source: Arc<dyn BookSource>) {
        self.sources.push(source);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BookSource>> {
        self.sources.iter().find(|source| source.name() == name).cloned()
    }

    pub fn resolve(&self, url: &str) -> Result<Arc<dyn BookSource>> {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
            .unwrap_or_default();

        if let Some(source) = self
            .sources
            .iter()
            .find(|source| source.domains().iter().any(|domain| *domain == host))
        {
            debug!("Resolved {} to source {} by domain", url, source.name());
            return Ok(source.clone());
        }

        for source in &self.sources {
            let Some(pattern) = source.url_pattern() else {
                continue;
            };
            let matches = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(|regex| regex.is_match(url))
                .unwrap_or(false);
            if matches {
                debug!("Resolved {} to source {} by pattern", url, source.name());
                return Ok(source.clone());
            }
        }

        warn!("Supported domains: {}", self.supported_domains().join(", "));
        Err(BookError::UnsupportedSource(url.to_string()))
    }

    pub fn supported_domains(&self) -> Vec<&'static str> {
        self.sources
            .iter()
            .flat_map(|source| source.domains().iter().copied())
            .collect()
    }

    pub fn source_info(&self) -> Vec<SourceInfo> {
        self.sources
            .iter()
            .map(|source| {
                let settings = source.settings();
                SourceInfo {
                    name: source.name().to_string(),
                    domains: source.domains().iter().map(|d| d.to_string()).collect(),
                    bulk_download: settings.bulk_download,
                    concurrent_downloads: settings.concurrent_downloads,
                    request_delay: settings.request_delay,
                    source_language: settings.source_language.to_string(),
                    download_speed: download_speed(&settings),
                }
            })
            .collect()
    }

    /// Estimated seconds to download `chapters` chapters from `source_name`.
    pub fn estimate_download_time(&self, source_name: &str, chapters: usize) -> Result<f64> {
        let source = self
            .get(source_name)
            .ok_or_else(|| BookError::Config(format!("Source '{}' not found", source_name)))?;
        Ok(chapters as f64 / download_speed(&source.settings()))
    }
}

/// Chapters per second, rounded to two decimals.
pub fn download_speed(settings: &SourceSettings) -> f64 {
    let speed = if settings.bulk_download {
        let batch_time = settings.request_delay + BASE_TIME_PER_CHAPTER * (1.0 + PARALLEL_OVERHEAD);
        settings.concurrent_downloads as f64 / batch_time
    } else {
        1.0 / (BASE_TIME_PER_CHAPTER + settings.request_delay)
    };
    (speed * 100.0).round() / 100.0
}
