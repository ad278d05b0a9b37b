use regex::Regex;
use scraper::{Html, Node};
use std::sync::OnceLock;

use super::{element_text, selector};
use crate::download::{BookPage, BookSource, SourceSettings};
use crate::error::{BookError, Result};
use crate::text::preprocess_downloaded_text;

const BASE_URL: &str = "https://piaotia.com/html";
const CONTENT_START: &str = "返回书页";
const CONTENT_END: &str = "（快捷键  ←）";

struct Patterns {
    book_id: Regex,
    author: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        book_id: Regex::new(r"bookinfo/(\d+)/(\d+)\.html").expect("valid regex"),
        author: Regex::new(r"作[\s\u{a0}]*者：[\s\u{a0}]*(.+)").expect("valid regex"),
    })
}

/// piaotia.com; book ids are `<category>/<book>`.
pub struct PiaotianSource;

impl BookSource for PiaotianSource {
    fn name(&self) -> &'static str {
        "piaotian"
    }

    fn domains(&self) -> &'static [&'static str] {
        &["piaotia.com"]
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
        let caps = patterns()
            .book_id
            .captures(url)
            .ok_or_else(|| BookError::Download(format!("Invalid piaotian book URL: {}", url)))?;
        Ok(format!("{}/{}", &caps[1], &caps[2]))
    }

    fn index_url(&self, book_id: &str, _book_url: &str) -> String {
        format!("{}/{}", BASE_URL, book_id)
    }

    fn parse_book_info(&self, html: &str) -> BookPage {
        let document = Html::parse_document(html);
        let title = document.select(&selector("h1")).next().map(element_text).unwrap_or_default();
        let author = document
            .select(&selector("td"))
            .map(element_text)
            .find_map(|text| {
                patterns()
                    .author
                    .captures(&text)
                    .map(|caps| caps[1].trim().to_string())
            })
            .unwrap_or_default();

        BookPage {
            title,
            author,
            cover_url: None,
        }
    }

    fn parse_chapter_urls(&self, html: &str, _book_id: &str, index_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        document
            .select(&selector("div.centent ul li a[href]"))
            .filter_map(|link| link.value().attr("href"))
            .map(|href| format!("{}/{}", index_url.trim_end_matches('/'), href))
            .collect()
    }

    fn parse_chapter_content(&self, html: &str) -> Option<String> {
        let text = visible_text(html);
        let content = extract_between_markers(&text);
        if content.trim().is_empty() {
            return None;
        }
        Some(preprocess_downloaded_text(&content))
    }
}

/// Document text without scripts and styles, one text node per line.
fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();

    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            matches!(ancestor.value(), Node::Element(element) if matches!(element.name(), "script" | "style"))
        });
        if !hidden {
            lines.push(text.trim().to_string());
        }
    }
    lines.join("\n")
}

/// Lines between the "back to book" link and the keyboard shortcut footer.
fn extract_between_markers(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
    let start = lines.iter().position(|line| line.contains(CONTENT_START));
    let end = lines.iter().position(|line| line.contains(CONTENT_END));

    let relevant = match (start, end) {
        (Some(s), Some(e)) if s < e => &lines[s + 1..e],
        (Some(s), _) => &lines[s + 1..],
        (None, Some(e)) => &lines[..e],
        _ => &lines[..],
    };
    relevant.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_id_keeps_category() {
        let source = PiaotianSource;
        let id = source.book_id("https://piaotia.com/bookinfo/13/13793.html").unwrap();
        assert_eq!(id, "13/13793");
        assert_eq!(source.index_url(&id, ""), "https://piaotia.com/html/13/13793");
        assert!(source.book_id("https://piaotia.com/html/13/13793/").is_err());
    }

    #[test]
    fn test_parse_book_info() {
        let html = r#"<html><body><h1> 仙逆 </h1>
            <table><tr><td>类&nbsp;&nbsp;别：仙侠</td><td>作&nbsp;&nbsp;者：耳根</td></tr></table>
        </body></html>"#;
        let page = PiaotianSource.parse_book_info(html);
        assert_eq!(page.title, "仙逆");
        assert_eq!(page.author, "耳根");
    }

    #[test]
    fn test_parse_chapter_urls() {
        let html = r#"<div class="centent"><ul>
            <li><a href="8801.html">第一章</a></li>
            <li><a href="8802.html">第二章</a></li>
            <li>&nbsp;</li>
        </ul></div>"#;
        let urls = PiaotianSource.parse_chapter_urls(html, "13/13793", "https://piaotia.com/html/13/13793");
        assert_eq!(
            urls,
            vec![
                "https://piaotia.com/html/13/13793/8801.html",
                "https://piaotia.com/html/13/13793/8802.html",
            ]
        );
    }

    #[test]
    fn test_chapter_content_between_markers() {
        let html = r#"<html><head><style>body { color: red; }</style></head><body>
            <a href="/">返回书页</a>
            <script>var ad = 1;</script>
            <br>王林站在山顶。<br><br>他回头望去。
            <div>（快捷键  ←）上一章</div>
            <div>footer</div>
        </body></html>"#;
        assert_eq!(
            PiaotianSource.parse_chapter_content(html).unwrap(),
            "王林站在山顶。\n他回头望去。"
        );
    }

    #[test]
    fn test_marker_fallbacks() {
        assert_eq!(extract_between_markers("a\n返回书页\nb\nc"), "b\nc");
        assert_eq!(extract_between_markers("a\nb\n（快捷键  ←）"), "a\nb");
        assert_eq!(extract_between_markers(" a \n\n b "), "a\nb");
    }
}
