use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;
use tracing::warn;

use super::{element_text, has_ancestor, selector};
use crate::download::{BookPage, BookSource, SourceSettings};
use crate::error::{BookError, Result};
use crate::text::preprocess_downloaded_text;

const BASE_URL: &str = "https://quanben.io/n";

fn book_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/([^/]+)/?$").expect("valid regex"))
}

/// quanben.io lists chapters as `/n/<book>/<n>.html`; the index only shows a
/// subset, so every number between the first and last link is downloaded.
pub struct QuanbenSource;

impl BookSource for QuanbenSource {
    fn name(&self) -> &'static str {
        "quanben"
    }

    fn domains(&self) -> &'static [&'static str] {
        &["quanben.io"]
    }

    fn settings(&self) -> SourceSettings {
        SourceSettings {
            bulk_download: true,
            concurrent_downloads: 100,
            request_delay: 1.0,
            source_language: "Chinese",
            translate_book_info: true,
        }
    }

    fn book_id(&self, url: &str) -> Result<String> {
        book_id_pattern()
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| BookError::Download(format!("Invalid book URL format: {}", url)))
    }

    fn index_url(&self, book_id: &str, _book_url: &str) -> String {
        format!("{}/{}/list.html", BASE_URL, book_id)
    }

    fn parse_book_info(&self, html: &str) -> BookPage {
        let document = Html::parse_document(html);
        let first = |css: &str| document.select(&selector(css)).next().map(element_text).unwrap_or_default();

        BookPage {
            title: first("h3"),
            author: first(r#"span[itemprop="author"]"#),
            cover_url: None,
        }
    }

    fn parse_chapter_urls(&self, html: &str, book_id: &str, _index_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let numbers: Vec<u32> = document
            .select(&selector("ul.list3 li a[href]"))
            .filter_map(|link| link.value().attr("href"))
            .filter_map(|href| {
                let last = href.trim_matches('/').rsplit('/').next()?;
                last.split('.').next()?.parse().ok()
            })
            .collect();

        let (Some(first), Some(last)) = (numbers.iter().min(), numbers.iter().max()) else {
            warn!("No chapter links found on quanben index for {}", book_id);
            return Vec::new();
        };
        (*first..=*last)
            .map(|n| format!("{}/{}/{}.html", BASE_URL, book_id, n))
            .collect()
    }

    fn parse_chapter_content(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let content = document
            .select(&selector("div#acontent.acontent"))
            .next()
            .or_else(|| document.select(&selector("div.articlebody div#content")).next())?;

        let paragraphs: Vec<String> = content
            .select(&selector("p"))
            .filter(|p| !has_ancestor(*p, |e| e.classes().any(|class| class == "ads")))
            .map(element_text)
            .collect();
        if paragraphs.is_empty() {
            return None;
        }
        Some(preprocess_downloaded_text(&paragraphs.join("\n\n")))
    }
}
