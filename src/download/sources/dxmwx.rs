use regex::Regex;
use scraper::Html;
use std::sync::OnceLock;
use url::Url;

use super::{element_text, has_ancestor, is_script, meta_content, selector, text_lines};
use crate::download::{BookPage, BookSource, SourceSettings};
use crate::error::{BookError, Result};
use crate::text::preprocess_downloaded_text;

const SITE: &str = "https://www.dxmwx.org";

fn book_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"book/(\d+)\.html").expect("valid regex"))
}

fn is_ad(element: &scraper::node::Element) -> bool {
    element.classes().any(|class| class == "ads")
}

/// dxmwx.org; the chapter list lives on `/chapter/<id>.html`.
pub struct DxmwxSource;

impl BookSource for DxmwxSource {
    fn name(&self) -> &'static str {
        "dxmwx"
    }

    fn domains(&self) -> &'static [&'static str] {
        &["www.dxmwx.org"]
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
        book_id_pattern()
            .captures(url)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| BookError::Download(format!("Invalid book URL format: {}", url)))
    }

    fn index_url(&self, book_id: &str, _book_url: &str) -> String {
        format!("{}/chapter/{}.html", SITE, book_id)
    }

    fn parse_book_info(&self, html: &str) -> BookPage {
        let document = Html::parse_document(html);
        BookPage {
            title: meta_content(&document, r#"meta[property="og:novel:book_name"]"#).unwrap_or_default(),
            author: meta_content(&document, r#"meta[property="og:novel:author"]"#).unwrap_or_default(),
            cover_url: meta_content(&document, r#"meta[property="og:image"]"#),
        }
    }

    fn parse_chapter_urls(&self, html: &str, _book_id: &str, _index_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(base) = Url::parse(SITE) else {
            return Vec::new();
        };

        document
            .select(&selector(r#"div[style*="height:40px; line-height:40px;"] span a[href]"#))
            .filter_map(|link| link.value().attr("href"))
            .filter_map(|href| base.join(href).ok())
            .map(String::from)
            .collect()
    }

    fn parse_chapter_content(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let content = ["div#Lab_Contents", "div#acontent.acontent", "div.articlebody div#content"]
            .iter()
            .find_map(|css| document.select(&selector(css)).next())?;

        let paragraphs: Vec<String> = content
            .select(&selector("p"))
            .filter(|p| !has_ancestor(*p, is_ad))
            .map(element_text)
            .collect();

        let text = if paragraphs.is_empty() {
            text_lines(content, |e| is_script(e) || is_ad(e)).concat()
        } else {
            paragraphs.join("\n")
        };
        if text.trim().is_empty() {
            return None;
        }
        Some(preprocess_downloaded_text(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_id_and_index() {
        let source = DxmwxSource;
        assert_eq!(source.book_id("https://www.dxmwx.org/book/10451.html").unwrap(), "10451");
        assert!(source.book_id("https://www.dxmwx.org/list/1").is_err());
        assert_eq!(source.index_url("10451", ""), "https://www.dxmwx.org/chapter/10451.html");
    }

    #[test]
    fn test_parse_book_info() {
        let html = r#"<html><head>
            <meta property="og:novel:book_name" content=" 剑来 ">
            <meta property="og:novel:author" content="烽火戏诸侯">
            <meta property="og:image" content="https://www.dxmwx.org/images/10451.jpg">
        </head></html>"#;
        let page = DxmwxSource.parse_book_info(html);
        assert_eq!(page.title, "剑来");
        assert_eq!(page.author, "烽火戏诸侯");
        assert_eq!(page.cover_url.as_deref(), Some("https://www.dxmwx.org/images/10451.jpg"));
    }

    #[test]
    fn test_parse_chapter_urls() {
        let html = r#"<div style="height:40px; line-height:40px;">
            <span><a href="/read/10451_1.html">第一章</a></span>
            <span><a href="https://www.dxmwx.org/read/10451_2.html">第二章</a></span>
        </div>
        <div><span><a href="/other.html">其他</a></span></div>"#;
        assert_eq!(
            DxmwxSource.parse_chapter_urls(html, "10451", ""),
            vec![
                "https://www.dxmwx.org/read/10451_1.html",
                "https://www.dxmwx.org/read/10451_2.html",
            ]
        );
    }

    #[test]
    fn test_chapter_content_layouts() {
        let html = r#"<div id="Lab_Contents"><p>陈平安</p><div class="ads"><p>广告</p></div><p>宁姚</p></div>"#;
        assert_eq!(DxmwxSource.parse_chapter_content(html).unwrap(), "陈平安\n宁姚");

        let bare = r#"<div id="acontent" class="acontent">正文内容<script>ad()</script></div>"#;
        assert_eq!(DxmwxSource.parse_chapter_content(bare).unwrap(), "正文内容");

        assert!(DxmwxSource.parse_chapter_content("<div id=\"other\"></div>").is_none());
    }
}
