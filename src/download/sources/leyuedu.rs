use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;
use url::Url;

use super::{element_text, has_ancestor, selector};
use crate::download::{BookPage, BookSource, SourceSettings};
use crate::error::{BookError, Result};
use crate::text::preprocess_downloaded_text;

fn book_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/(?:book|read)/(\d+)").expect("valid regex"))
}

/// Parts of the chapter body that are navigation, not text.
fn is_chapter_chrome(element: &scraper::node::Element) -> bool {
    element.name() == "h1"
        || element.id() == Some("txtright")
        || element
            .classes()
            .any(|class| class == "txtinfo" || class == "baocuo")
}

/// 22is.com (leyuedu); `/book/<id>.html` lists its chapters under `/read/<id>/`.
pub struct LeyueduSource;

impl BookSource for LeyueduSource {
    fn name(&self) -> &'static str {
        "leyuedu"
    }

    fn domains(&self) -> &'static [&'static str] {
        &["www.22is.com"]
    }

    fn settings(&self) -> SourceSettings {
        SourceSettings {
            bulk_download: true,
            concurrent_downloads: 20,
            request_delay: 0.5,
            source_language: "Chinese",
            translate_book_info: true,
        }
    }

    fn book_id(&self, url: &str) -> Result<String> {
        book_id_pattern()
            .captures(url)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| BookError::Download(format!("Invalid book URL format: {}", url)))
    }

    fn index_url(&self, book_id: &str, book_url: &str) -> String {
        let fallback = format!("https://www.22is.com/read/{}/", book_id);
        let Ok(parsed) = Url::parse(book_url) else {
            return fallback;
        };
        let path = parsed.path().replace("/book/", "/read/").replace(".html", "");
        parsed
            .join(&format!("{}/", path.trim_end_matches('/')))
            .map(String::from)
            .unwrap_or(fallback)
    }

    fn parse_book_info(&self, html: &str) -> BookPage {
        let document = Html::parse_document(html);
        let first = |css: &str| document.select(&selector(css)).next();

        BookPage {
            title: first("div.booknav2 h1 a").map(element_text).unwrap_or_default(),
            author: first(r#".booknav2 p a[href*="/author/"]"#)
                .map(element_text)
                .unwrap_or_default(),
            cover_url: first("div.bookimg2 img")
                .and_then(|img| img.value().attr("src"))
                .filter(|src| !src.is_empty())
                .map(str::to_string),
        }
    }

    fn parse_chapter_urls(&self, html: &str, _book_id: &str, index_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(base) = Url::parse(index_url) else {
            return Vec::new();
        };

        document
            .select(&selector("div#catalog ul li a[href]"))
            .filter_map(|link| link.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .map(String::from)
            .collect()
    }

    fn parse_chapter_content(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let content = document.select(&selector("div.txtnav")).next()?;

        let paragraphs: Vec<String> = content
            .select(&selector("p"))
            .filter(|p| !has_ancestor(*p, is_chapter_chrome))
            .map(element_text)
            .collect();
        if paragraphs.is_empty() {
            return None;
        }
        Some(preprocess_downloaded_text(&paragraphs.join("\n\n")))
    }
}
