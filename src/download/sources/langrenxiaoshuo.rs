use regex::Regex;
use scraper::Html;
use scraper::node::Element;
use std::sync::OnceLock;
use url::Url;

use super::{element_text, meta_content, selector, text_lines};
use crate::download::{BookPage, BookSource, SourceSettings};
use crate::error::{BookError, Result};
use crate::text::preprocess_downloaded_text;

const SITE: &str = "https://www.langrenxiaoshuo.com";
/// Lines that belong to page navigation rather than the chapter.
const NAVIGATION_MARKERS: &[&str] = &["上一章", "下一章", "目录", "章节"];
const FOOTER_MARKERS: &[&str] = &["上一章", "下一章", "目录", "章节", "请记住本站", "关注我们"];

struct Patterns {
    book_id: Regex,
    author: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        book_id: Regex::new(r"html/([^/]+)/?").expect("valid regex"),
        author: Regex::new(r"作\s*者：\s*(.+)").expect("valid regex"),
    })
}

fn is_boilerplate(element: &Element) -> bool {
    matches!(element.name(), "script" | "style" | "iframe" | "ins" | "a")
}

/// langrenxiaoshuo.com; chapters are listed on the book page itself.
pub struct LangrenSource;

impl LangrenSource {
    /// Drop navigation lines before the chapter starts and everything from
    /// the last footer line on.
    fn chapter_body(lines: &[String]) -> &[String] {
        let has_marker = |line: &str, markers: &[&str]| markers.iter().any(|marker| line.contains(marker));

        let start = lines
            .iter()
            .position(|line| !has_marker(line.as_str(), NAVIGATION_MARKERS))
            .unwrap_or(0);
        let end = (1..lines.len())
            .rev()
            .find(|idx| has_marker(lines[*idx].as_str(), FOOTER_MARKERS))
            .unwrap_or(lines.len());

        if start >= end { &[] } else { &lines[start..end] }
    }
}

impl BookSource for LangrenSource {
    fn name(&self) -> &'static str {
        "langrenxiaoshuo"
    }

    fn domains(&self) -> &'static [&'static str] {
        &["langrenxiaoshuo.com", "www.langrenxiaoshuo.com"]
    }

    fn settings(&self) -> SourceSettings {
        SourceSettings {
            bulk_download: false,
            concurrent_downloads: 1,
            request_delay: 1.0,
            source_language: "Chinese",
            translate_book_info: true,
        }
    }

    fn book_id(&self, url: &str) -> Result<String> {
        patterns()
            .book_id
            .captures(url)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| BookError::Download(format!("Invalid book URL format: {}", url)))
    }

    fn index_url(&self, _book_id: &str, book_url: &str) -> String {
        book_url.to_string()
    }

    fn parse_book_info(&self, html: &str) -> BookPage {
        let document = Html::parse_document(html);
        let first_text = |css: &str| {
            document
                .select(&selector(css))
                .next()
                .map(element_text)
                .filter(|text| !text.is_empty())
        };

        let title = meta_content(&document, r#"meta[property="og:novel:book_name"]"#)
            .or_else(|| first_text("h1"))
            .or_else(|| {
                first_text("title").map(|title| title.split('_').next().unwrap_or_default().trim().to_string())
            })
            .unwrap_or_default();

        let author = meta_content(&document, r#"meta[property="og:novel:zuozhe"]"#)
            .or_else(|| {
                document
                    .select(&selector("p"))
                    .map(element_text)
                    .find_map(|text| patterns().author.captures(&text).map(|caps| caps[1].trim().to_string()))
            })
            .unwrap_or_default();

        let cover_url = meta_content(&document, r#"meta[property="og:image"]"#).or_else(|| {
            document
                .select(&selector("div.imgbox img[src]"))
                .filter_map(|img| img.value().attr("src"))
                .find(|src| !src.is_empty())
                .map(str::to_string)
        });

        BookPage {
            title,
            author,
            cover_url,
        }
    }

    fn parse_chapter_urls(&self, html: &str, _book_id: &str, _index_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let Ok(base) = Url::parse(SITE) else {
            return Vec::new();
        };
        // the first section box holds the latest chapters, the second the full list
        let Some(section) = document.select(&selector("div.section-box")).nth(1) else {
            return Vec::new();
        };

        section
            .select(&selector("a[href]"))
            .filter_map(|link| link.value().attr("href"))
            .filter(|href| href.contains("html"))
            .filter_map(|href| base.join(href).ok())
            .map(String::from)
            .collect()
    }

    fn parse_chapter_content(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let content = [
            "div#content",
            "div.content",
            "div.article, div.text, div.body, div.main",
            "body",
        ]
        .iter()
        .find_map(|css| document.select(&selector(css)).next())?;

        let lines = text_lines(content, is_boilerplate);
        let body = Self::chapter_body(&lines);
        if body.is_empty() {
            return None;
        }
        Some(preprocess_downloaded_text(&body.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_id() {
        let source = LangrenSource;
        assert_eq!(source.book_id("https://www.langrenxiaoshuo.com/html/yidaizongshi/").unwrap(), "yidaizongshi");
        assert!(source.book_id("https://www.langrenxiaoshuo.com/top/").is_err());
        assert_eq!(
            source.index_url("yidaizongshi", "https://www.langrenxiaoshuo.com/html/yidaizongshi/"),
            "https://www.langrenxiaoshuo.com/html/yidaizongshi/"
        );
    }

    #[test]
    fn test_book_info_from_meta() {
        let html = r#"<html><head>
            <meta property="og:novel:book_name" content="一代宗师">
            <meta property="og:novel:zuozhe" content="无名">
            <meta property="og:image" content="/files/cover/1.jpg">
        </head><body><h1>别的标题</h1></body></html>"#;
        let page = LangrenSource.parse_book_info(html);
        assert_eq!(page.title, "一代宗师");
        assert_eq!(page.author, "无名");
        assert_eq!(page.cover_url.as_deref(), Some("/files/cover/1.jpg"));
    }

    #[test]
    fn test_book_info_fallbacks() {
        let html = r#"<html><head><title>一代宗师_狼人小说</title></head><body>
            <p>作 者：无名 </p>
            <div class="imgbox"><img src="/files/cover/2.jpg"></div>
        </body></html>"#;
        let page = LangrenSource.parse_book_info(html);
        assert_eq!(page.title, "一代宗师");
        assert_eq!(page.author, "无名");
        assert_eq!(page.cover_url.as_deref(), Some("/files/cover/2.jpg"));
    }

    #[test]
    fn test_chapter_urls_come_from_second_section() {
        let html = r#"
            <div class="section-box"><a href="/html/ydzs/99.html">最新章节</a></div>
            <div class="section-box">
                <a href="/html/ydzs/1.html">第一章</a>
                <a href="/">首页</a>
                <a href="https://www.langrenxiaoshuo.com/html/ydzs/2.html">第二章</a>
            </div>"#;
        assert_eq!(
            LangrenSource.parse_chapter_urls(html, "ydzs", ""),
            vec![
                "https://www.langrenxiaoshuo.com/html/ydzs/1.html",
                "https://www.langrenxiaoshuo.com/html/ydzs/2.html",
            ]
        );
        assert!(LangrenSource.parse_chapter_urls(r#"<div class="section-box"></div>"#, "ydzs", "").is_empty());
    }

    #[test]
    fn test_chapter_content_trims_navigation() {
        let html = r#"<div id="content">
            <p>返回目录</p>
            第一章 出山<br>
            山风吹过。<br>
            <a href="/next">下一章</a>
            他走了。<script>ad()</script><br>
            上一章 | 下一章<br>
            请记住本站域名
        </div>"#;
        assert_eq!(
            LangrenSource.parse_chapter_content(html).unwrap(),
            "第一章 出山\n山风吹过。\n他走了。\n上一章 | 下一章"
        );
    }

    #[test]
    fn test_chapter_body_stops_at_last_footer() {
        let lines: Vec<String> = ["目录", "正文一", "下一章", "正文二", "关注我们"]
            .iter()
            .map(|line| line.to_string())
            .collect();
        assert_eq!(LangrenSource::chapter_body(&lines), &lines[1..4]);
        assert!(LangrenSource::chapter_body(&[]).is_empty());
    }
}
