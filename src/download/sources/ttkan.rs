use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;
use url::Url;

use super::{element_text, meta_content, selector};
use crate::download::{BookPage, BookSource, SourceSettings};
use crate::error::{BookError, Result};
use crate::text::preprocess_downloaded_text;

const INDEX_BASE: &str = "https://cn.ttkan.co/novel/chapters";

struct Patterns {
    book_id: Regex,
    book_title: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        book_id: Regex::new(r"/novel/chapters/([^/]+)").expect("valid regex"),
        book_title: Regex::new(r"《(.*?)》").expect("valid regex"),
    })
}

/// ttkan.co; the index page carries every chapter in a hidden `full_chapters` block.
pub struct TtkanSource;

impl TtkanSource {
    fn clean_title(raw: &str) -> String {
        let raw = raw.trim();
        if let Some(caps) = patterns().book_title.captures(raw) {
            return caps[1].to_string();
        }
        raw.split_whitespace().next().unwrap_or_default().to_string()
    }
}

impl BookSource for TtkanSource {
    fn name(&self) -> &'static str {
        "ttkan"
    }

    fn domains(&self) -> &'static [&'static str] {
        &["cn.ttkan.co", "www.ttkan.co"]
    }

    fn url_pattern(&self) -> Option<&'static str> {
        Some(r"ttkan\.co/novel/chapters/")
    }

    fn settings(&self) -> SourceSettings {
        SourceSettings {
            bulk_download: true,
            concurrent_downloads: 50,
            request_delay: 1.0,
            source_language: "Chinese",
            translate_book_info: true,
        }
    }

    fn book_id(&self, url: &str) -> Result<String> {
        let invalid = || BookError::Download(format!("Could not extract book ID from TTKan URL: {}", url));
        let parsed = Url::parse(url).map_err(|_| invalid())?;

        if let Some(caps) = patterns().book_id.captures(parsed.path()) {
            return Ok(caps[1].to_string());
        }
        parsed
            .path()
            .trim_matches('/')
            .rsplit('/')
            .next()
            .filter(|last| !last.is_empty() && !last.ends_with(".html"))
            .map(str::to_string)
            .ok_or_else(invalid)
    }

    fn index_url(&self, book_id: &str, _book_url: &str) -> String {
        format!("{}/{}", INDEX_BASE, book_id)
    }

    fn parse_book_info(&self, html: &str) -> BookPage {
        let document = Html::parse_document(html);
        let meta = |css: &str| meta_content(&document, css);

        let title = meta(r#"meta[name="og:novel:book_name"]"#)
            .or_else(|| meta(r#"meta[property="og:title"]"#))
            .or_else(|| document.select(&selector("title")).next().map(element_text))
            .map(|raw| Self::clean_title(&raw))
            .unwrap_or_default();

        BookPage {
            title,
            author: meta(r#"meta[name="og:novel:author"]"#).unwrap_or_default(),
            cover_url: meta(r#"meta[name="og:image"]"#).or_else(|| meta(r#"meta[property="og:image"]"#)),
        }
    }

    fn parse_chapter_urls(&self, html: &str, _book_id: &str, index_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(base) = Url::parse(index_url) else {
            return Vec::new();
        };

        let container = document
            .select(&selector("div.full_chapters"))
            .next()
            .or_else(|| document.select(&selector("amp-list#chapters_list")).next());
        let Some(container) = container else {
            return Vec::new();
        };

        container
            .select(&selector("a[href]"))
            .filter_map(|link| link.value().attr("href"))
            .filter(|href| !href.starts_with("http"))
            .filter_map(|href| base.join(href).ok())
            .map(|url| url.to_string())
            .collect()
    }

    fn parse_chapter_content(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let content = document.select(&selector("div.content")).next()?;

        let paragraphs: Vec<String> = content.select(&selector("p")).map(element_text).collect();
        if paragraphs.is_empty() {
            return None;
        }
        Some(preprocess_downloaded_text(&paragraphs.join("\n")))
    }
}
