//! EPUB 3 packaging of translated chapters.

use regex::Regex;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::chapter::extract_chapter_number;
use crate::error::{BookError, Result};

const DEFAULT_CSS: &str = r#"@namespace epub "http://www.idpf.org/2007/ops";
body {
    font-family: sans-serif;
    line-height: 1.5;
    margin: 1em;
}
h1 {
    text-align: center;
    font-weight: bold;
    margin-bottom: 1.5em;
    padding-bottom: 0.5em;
    border-bottom: 1px solid #eee;
}
p {
    text-indent: 1.5em;
    margin-bottom: 0.5em;
}
.no-indent {
    text-indent: 0;
}
.scene-break {
    text-align: center;
    margin: 1em 0;
}
"#;

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

#[derive(Debug, Clone)]
pub struct EpubMetadata {
    pub title: String,
    pub author: String,
    pub language: String,
    pub toc_title: String,
    pub cover_image: Option<PathBuf>,
    pub custom_css: Option<String>,
}

impl EpubMetadata {
    pub fn identifier(&self) -> String {
        format!("{}-{}", self.title, self.author).replace(' ', "-")
    }
}

struct Chapter {
    title: String,
    file_name: String,
    body: String,
}

#[derive(Debug, Default)]
pub struct EpubGenerator;

impl EpubGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn create_epub_from_txt_files(&self, files: &[PathBuf], metadata: &EpubMetadata, output: &Path) -> Result<PathBuf> {
        if files.is_empty() {
            return Err(BookError::Epub("At least one text file must be provided.".to_string()));
        }

        let missing: Vec<String> = files
            .iter()
            .filter(|path| !path.exists())
            .map(|path| path.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(BookError::FileNotFound(format!("Text files not found: {}", missing.join(", "))));
        }

        let cover = match &metadata.cover_image {
            Some(path) if !path.exists() => {
                return Err(BookError::FileNotFound(format!("Cover image file not found: {}", path.display())));
            }
            Some(path) => Some((cover_file_name(path), std::fs::read(path)?)),
            None => None,
        };

        info!("Creating EPUB: {} by {}", metadata.title, metadata.author);

        let mut ordered = files.to_vec();
        if ordered.iter().all(|path| extract_chapter_number(&file_stem(path)).is_some()) {
            ordered.sort_by_key(|path| extract_chapter_number(&file_stem(path)));
        }

        let mut chapters = Vec::with_capacity(ordered.len());
        for (idx, path) in ordered.iter().enumerate() {
            debug!("Processing file {}/{}: {}", idx + 1, ordered.len(), path.display());
            let content = read_text_lossless(path)?;
            let title = chapter_title(&file_stem(path));
            chapters.push(Chapter {
                file_name: format!("chapter_{:03}.xhtml", idx + 1),
                body: format_chapter_body(&content, &title),
                title,
            });
        }

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Writing EPUB to: {}", output.display());
        let mut zip = ZipWriter::new(File::create(output)?);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        // readers sniff the first entry, which must be the uncompressed mimetype
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(CONTAINER_XML.as_bytes())?;

        let css = metadata.custom_css.as_deref().unwrap_or(DEFAULT_CSS);
        zip.start_file("OEBPS/style/nav.css", deflated)?;
        zip.write_all(css.as_bytes())?;

        let cover_name = cover.as_ref().map(|(name, _)| name.as_str());
        if let Some((name, bytes)) = &cover {
            zip.start_file(format!("OEBPS/{}", name), stored)?;
            zip.write_all(bytes)?;
            zip.start_file("OEBPS/cover.xhtml", deflated)?;
            zip.write_all(cover_page(metadata, name).as_bytes())?;
        }

        for chapter in &chapters {
            zip.start_file(format!("OEBPS/{}", chapter.file_name), deflated)?;
            zip.write_all(chapter_page(metadata, chapter).as_bytes())?;
        }

        zip.start_file("OEBPS/nav.xhtml", deflated)?;
        zip.write_all(nav_page(metadata, &chapters).as_bytes())?;

        zip.start_file("OEBPS/toc.ncx", deflated)?;
        zip.write_all(toc_ncx(metadata, &chapters).as_bytes())?;

        zip.start_file("OEBPS/content.opf", deflated)?;
        zip.write_all(content_opf(metadata, &chapters, cover_name).as_bytes())?;

        zip.finish()?;
        Ok(output.to_path_buf())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_default()
}

fn cover_file_name(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_else(|| "jpg".to_string());
    format!("cover.{}", extension)
}

fn cover_media_type(name: &str) -> &'static str {
    if name.ends_with(".png") {
        "image/png"
    } else if name.ends_with(".gif") {
        "image/gif"
    } else {
        "image/jpeg"
    }
}

/// UTF-8 first, Latin-1 otherwise.
fn read_text_lossless(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => {
            warn!("UTF-8 decode error, falling back to Latin-1: {}", path.display());
            Ok(e.into_bytes().iter().map(|&b| char::from(b)).collect())
        }
    }
}

fn chapter_title(stem: &str) -> String {
    static TRAILING_NUMBER: OnceLock<Regex> = OnceLock::new();
    let pattern = TRAILING_NUMBER.get_or_init(|| Regex::new(r"\d+$").expect("valid regex"));

    if let Some(number) = pattern.find(stem).and_then(|m| m.as_str().parse::<u64>().ok()) {
        return format!("Chương {}", number);
    }

    stem.replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn format_chapter_body(content: &str, title: &str) -> String {
    let mut body = format!("<h1>{}</h1>\n", escape_xml(title));
    for paragraph in content.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            body.push_str("<div class=\"scene-break\">* * *</div>\n");
        } else {
            body.push_str(&format!("<p>{}</p>\n", escape_xml(paragraph)));
        }
    }
    body
}

fn xhtml_page(language: &str, title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="style/nav.css"/>
</head>
<body>
{body}</body>
</html>
"#,
        lang = escape_xml(language),
        title = escape_xml(title),
        body = body,
    )
}

fn chapter_page(metadata: &EpubMetadata, chapter: &Chapter) -> String {
    xhtml_page(&metadata.language, &chapter.title, &chapter.body)
}

fn cover_page(metadata: &EpubMetadata, cover_name: &str) -> String {
    let body = format!(
        "<div class=\"no-indent\"><img src=\"{}\" alt=\"{}\" style=\"max-width:100%\"/></div>\n",
        cover_name,
        escape_xml(&metadata.title)
    );
    xhtml_page(&metadata.language, &metadata.title, &body)
}

fn nav_page(metadata: &EpubMetadata, chapters: &[Chapter]) -> String {
    let mut body = format!(
        "<nav epub:type=\"toc\" id=\"toc\">\n<h1>{}</h1>\n<ol>\n<li><span>{}</span>\n<ol>\n",
        escape_xml(&metadata.toc_title),
        escape_xml(&metadata.toc_title)
    );
    for chapter in chapters {
        body.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>\n",
            chapter.file_name,
            escape_xml(&chapter.title)
        ));
    }
    body.push_str("</ol>\n</li>\n</ol>\n</nav>\n");
    xhtml_page(&metadata.language, &metadata.title, &body)
}

fn toc_ncx(metadata: &EpubMetadata, chapters: &[Chapter]) -> String {
    let mut points = String::new();
    for (idx, chapter) in chapters.iter().enumerate() {
        points.push_str(&format!(
            "    <navPoint id=\"chap{n}\" playOrder=\"{n}\">\n      <navLabel><text>{title}</text></navLabel>\n      <content src=\"{src}\"/>\n    </navPoint>\n",
            n = idx + 1,
            title = escape_xml(&chapter.title),
            src = chapter.file_name,
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="1"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
{points}  </navMap>
</ncx>
"#,
        uid = escape_xml(&metadata.identifier()),
        title = escape_xml(&metadata.title),
        points = points,
    )
}

fn content_opf(metadata: &EpubMetadata, chapters: &[Chapter], cover_name: Option<&str>) -> String {
    let mut manifest = String::from(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n    <item id=\"style_nav\" href=\"style/nav.css\" media-type=\"text/css\"/>\n",
    );
    let mut spine = String::new();
    let mut cover_meta = String::new();

    if let Some(name) = cover_name {
        manifest.push_str(&format!(
            "    <item id=\"cover-img\" href=\"{}\" media-type=\"{}\" properties=\"cover-image\"/>\n    <item id=\"cover\" href=\"cover.xhtml\" media-type=\"application/xhtml+xml\"/>\n",
            name,
            cover_media_type(name)
        ));
        cover_meta.push_str("    <meta name=\"cover\" content=\"cover-img\"/>\n");
        spine.push_str("    <itemref idref=\"cover\" linear=\"no\"/>\n");
    }

    spine.push_str("    <itemref idref=\"nav\"/>\n");
    for (idx, chapter) in chapters.iter().enumerate() {
        manifest.push_str(&format!(
            "    <item id=\"chapter_{n}\" href=\"{href}\" media-type=\"application/xhtml+xml\"/>\n",
            n = idx + 1,
            href = chapter.file_name,
        ));
        spine.push_str(&format!("    <itemref idref=\"chapter_{}\"/>\n", idx + 1));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id" xml:lang="{lang}">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:language>{lang}</dc:language>
    <dc:creator id="creator">{author}</dc:creator>
    <meta property="dcterms:modified">{modified}</meta>
{cover_meta}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        lang = escape_xml(&metadata.language),
        id = escape_xml(&metadata.identifier()),
        title = escape_xml(&metadata.title),
        author = escape_xml(&metadata.author),
        modified = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        cover_meta = cover_meta,
        manifest = manifest,
        spine = spine,
    )
}
