//! Cleanup of downloaded chapters and normalization of model output.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

const IGNORE_PREFIXES: &[&str] = &["https://", "www", "ps", "&lt"];
const IGNORE_LINES: &[&str] = &["."];
const IGNORE_WORDS_IN_TRANSLATION: &[&str] = &["BẢN DỊCH", "NỘI DUNG ĐOẠN VĂN"];
const REPLACEMENTS: &[(&str, &str)] = &[("chị rể", "anh rể")];

struct Patterns {
    html_tag: Regex,
    whitespace_run: Regex,
    bold_italic: Regex,
    bold: Regex,
    italic: Regex,
    quoted: Regex,
    upper_phrase: Regex,
    replacements: Vec<(Regex, &'static str)>,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        html_tag: Regex::new(r"<[^>]+>").expect("valid regex"),
        whitespace_run: Regex::new(r"\s{2,}").expect("valid regex"),
        bold_italic: Regex::new(r"\*\*\*(.*?)\*\*\*").expect("valid regex"),
        bold: Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"),
        italic: Regex::new(r"\*(.*?)\*").expect("valid regex"),
        quoted: Regex::new(r#""(.*?)""#).expect("valid regex"),
        upper_phrase: Regex::new(r"\b\p{Lu}+(?:\s+\p{Lu}+)+\b").expect("valid regex"),
        replacements: REPLACEMENTS
            .iter()
            .map(|(pattern, replacement)| {
                let regex = Regex::new(&format!("(?i){}", regex::escape(pattern))).expect("valid regex");
                (regex, *replacement)
            })
            .collect(),
    })
}

/// Strip markup and site boilerplate from a freshly downloaded chapter.
pub fn preprocess_downloaded_text(raw_text: &str) -> String {
    let cleaned = patterns().html_tag.replace_all(raw_text, "");
    let cleaned = cleaned.replace("＆ｎｂｓｐ；", "");

    cleaned
        .lines()
        .filter(|line| !IGNORE_PREFIXES.iter().any(|prefix| line.starts_with(prefix)))
        .filter(|line| !IGNORE_LINES.contains(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

/// Whether any CJK ideographs remain, and their share of all characters in percent.
pub fn detect_untranslated_chinese(text: &str) -> (bool, f64) {
    let total = text.chars().count();
    let chinese = text.chars().filter(|c| is_cjk_ideograph(*c)).count();
    let ratio = if total > 0 {
        chinese as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    (chinese > 0, ratio)
}

/// Pack whole lines into chunks of at most `chunk_size` characters.
pub fn split_text_into_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_len = line.chars().count();

        if line_len > chunk_size {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(chunk_size) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        let separator_len = usize::from(!current.is_empty());
        if current_len + separator_len + line_len <= chunk_size {
            if separator_len == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_len += separator_len + line_len;
        } else {
            chunks.push(std::mem::replace(&mut current, line.to_string()));
            current_len = line_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn starts_uppercase(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

fn title_case_phrase(phrase: &str) -> String {
    phrase.split_whitespace().map(capitalize).collect::<Vec<_>>().join(" ")
}

/// Unwrap markdown emphasis and quotes around names and tame all-caps names.
pub fn normalize_character_names(text: &str) -> String {
    let p = patterns();

    let markdown = |caps: &Captures| {
        let content = &caps[1];
        if !content.trim().is_empty() && content.split_whitespace().all(starts_uppercase) {
            title_case_phrase(content)
        } else {
            caps[0].to_string()
        }
    };

    let text = p.bold_italic.replace_all(text, markdown);
    let text = p.bold.replace_all(&text, markdown);
    let text = p.italic.replace_all(&text, markdown);

    let text = p.quoted.replace_all(&text, |caps: &Captures| {
        let content = &caps[1];
        let words: Vec<&str> = content.split_whitespace().collect();
        if words.len() >= 2 && words.iter().all(|w| starts_uppercase(w)) {
            title_case_phrase(content)
        } else {
            caps[0].to_string()
        }
    });

    p.upper_phrase
        .replace_all(&text, |caps: &Captures| title_case_phrase(&caps[0]))
        .into_owned()
}

fn apply_replacements(line: &str) -> String {
    let mut line = line.to_string();
    for (regex, replacement) in &patterns().replacements {
        line = regex
            .replace_all(&line, |caps: &Captures| {
                if starts_uppercase(&caps[0]) {
                    capitalize_first(replacement)
                } else {
                    replacement.to_string()
                }
            })
            .into_owned();
    }
    line
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Normalize a model response into blank-line separated paragraphs.
pub fn normalize_translation(content: &str) -> String {
    let p = patterns();
    let mut lines = Vec::new();

    for line in content.lines() {
        let stripped = line.trim();
        if stripped.is_empty() {
            continue;
        }
        if IGNORE_WORDS_IN_TRANSLATION.iter().any(|w| stripped.contains(w)) {
            continue;
        }
        if stripped.chars().all(|c| c == '*') {
            lines.push(stripped.to_string());
            continue;
        }

        let processed = stripped.replace('_', " ");
        let processed = p.whitespace_run.replace_all(&processed, " ");
        let processed = processed.replace(['\u{201c}', '\u{201d}'], "\"");
        let processed = normalize_character_names(&processed);
        lines.push(apply_replacements(&processed));
    }

    lines.join("\n\n")
}

fn is_potential_name_part(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_alphabetic() && c.is_uppercase())
}

fn strip_ascii_punctuation(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_punctuation()).collect()
}

/// Count capitalized 2-4 word sequences that look like proper names.
pub fn unique_names(text: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    let mut current: Vec<&str> = Vec::new();
    let mut runs: Vec<Vec<&str>> = Vec::new();

    for word in text.split_whitespace() {
        if is_potential_name_part(word) {
            current.push(word);
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    for run in runs {
        if !(2..=4).contains(&run.len()) {
            continue;
        }
        let joined = run.join(" ");
        if joined.contains('-') || joined.contains('\'') {
            continue;
        }
        let cleaned = strip_ascii_punctuation(&joined).trim().to_string();
        if !cleaned.is_empty() {
            *counts.entry(cleaned).or_insert(0) += 1;
        }
    }
    counts
}

/// True when one word occurs at least `min_run` times back to back.
pub fn has_repeated_words(text: &str, min_run: usize) -> bool {
    let words = text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase());

    let mut previous: Option<String> = None;
    let mut run = 0usize;
    for word in words {
        if previous.as_deref() == Some(word.as_str()) {
            run += 1;
        } else {
            run = 1;
            previous = Some(word);
        }
        if run >= min_run {
            return true;
        }
    }
    false
}

/// True when at least `min_run` characters from `_-=` appear back to back.
pub fn has_repeated_symbols(text: &str, min_run: usize) -> bool {
    let mut run = 0usize;
    for c in text.chars() {
        if matches!(c, '_' | '-' | '=') {
            run += 1;
            if run >= min_run {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}
