use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;
use url::Url;

use super::{element_text, is_script, selector, text_lines};
use crate::download::{BookPage, BookSource, SourceSettings};
use crate::error::{BookError, Result};
use crate::text::preprocess_downloaded_text;

const SITE: &str = "https://8xsk.cc";
const MAX_INDEX_PAGES: usize = 100;

fn book_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"book/(\d+)\.html").expect("valid regex"))
}

/// 8xsk.cc; the chapter index is split over `/book/<id>_<page>.html`.
pub struct EightXskSource;

impl EightXskSource {
    fn page_url(book_id: &str, page: usize) -> String {
        format!("{}/book/{}_{}.html", SITE, book_id, page)
    }

    /// The page title reads `《title》-author-...`.
    fn title_parts(document: &Html) -> (String, String) {
        let title = document
            .select(&selector("title"))
            .next()
            .map(element_text)
            .unwrap_or_default();
        let mut parts = title.split('-');
        let book = parts
            .next()
            .map(|part| part.trim().trim_matches(['《', '》']).to_string())
            .unwrap_or_default();
        let author = parts.next().map(|part| part.trim().to_string()).unwrap_or_default();
        (book, author)
    }
}

impl BookSource for EightXskSource {
    fn name(&self) -> &'static str {
        "8xsk"
    }

    fn domains(&self) -> &'static [&'static str] {
        &["8xsk.cc", "8xbook.cc"]
    }

    fn settings(&self) -> SourceSettings {
        SourceSettings {
            bulk_download: false,
            concurrent_downloads: 1,
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

    fn index_url(&self, book_id: &str, _book_url: &str) -> String {
        Self::page_url(book_id, 1)
    }

    fn index_page_url(&self, book_id: &str, page: usize) -> Option<String> {
        (page <= MAX_INDEX_PAGES).then(|| Self::page_url(book_id, page))
    }

    fn parse_book_info(&self, html: &str) -> BookPage {
        let document = Html::parse_document(html);
        let (title, author) = Self::title_parts(&document);
        BookPage {
            title,
            author,
            cover_url: None,
        }
    }

    fn parse_chapter_urls(&self, html: &str, _book_id: &str, index_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(base) = Url::parse(index_url) else {
            return Vec::new();
        };

        document
            .select(&selector("dl#jieqi_page_contents > dd"))
            .filter_map(|dd| dd.select(&selector("a[href]")).next())
            .filter_map(|link| link.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .map(String::from)
            .collect()
    }

    fn parse_chapter_content(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let content = document.select(&selector("div#acontent.acontent")).next()?;
        let lines = text_lines(content, is_script);
        if lines.is_empty() {
            return None;
        }
        Some(preprocess_downloaded_text(&lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_id_and_index_pages() {
        let source = EightXskSource;
        assert_eq!(source.book_id("https://8xsk.cc/book/2333.html").unwrap(), "2333");
        assert!(source.book_id("https://8xsk.cc/top.php").is_err());
        assert_eq!(source.index_url("2333", ""), "https://8xsk.cc/book/2333_1.html");
        assert_eq!(
            source.index_page_url("2333", 2).as_deref(),
            Some("https://8xsk.cc/book/2333_2.html")
        );
        assert!(source.index_page_url("2333", MAX_INDEX_PAGES + 1).is_none());
    }

    #[test]
    fn test_title_and_author_from_page_title() {
        let page = EightXskSource.parse_book_info("<title>《凡人修仙传》-忘语-八零电子书</title>");
        assert_eq!(page.title, "凡人修仙传");
        assert_eq!(page.author, "忘语");

        let bare = EightXskSource.parse_book_info("<title>凡人修仙传</title>");
        assert_eq!((bare.title.as_str(), bare.author.as_str()), ("凡人修仙传", ""));
    }

    #[test]
    fn test_parse_chapter_urls() {
        let html = r#"<dl id="jieqi_page_contents">
            <dt>正文</dt>
            <dd><a href="/read/2333/1.html">第一章</a></dd>
            <dd><a href="https://8xsk.cc/read/2333/2.html">第二章</a></dd>
            <dd>没有链接</dd>
        </dl>"#;
        assert_eq!(
            EightXskSource.parse_chapter_urls(html, "2333", "https://8xsk.cc/book/2333_1.html"),
            vec!["https://8xsk.cc/read/2333/1.html", "https://8xsk.cc/read/2333/2.html"]
        );
        assert!(EightXskSource.parse_chapter_urls("<dl></dl>", "2333", SITE).is_empty());
    }

    #[test]
    fn test_chapter_content_drops_scripts() {
        let html = r#"<div id="acontent" class="acontent">韩立<br>厉飞雨<script>ad()</script></div>"#;
        assert_eq!(EightXskSource.parse_chapter_content(html).unwrap(), "韩立\n厉飞雨");
        assert!(EightXskSource.parse_chapter_content("<div></div>").is_none());
    }
}
