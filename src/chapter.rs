use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

const INVALID_PATH_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_PATH_NAME_LEN: usize = 100;

fn shard_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(.*)_\d+\.txt$").expect("valid shard pattern"))
}

/// First run of ASCII digits in a file name.
pub fn extract_chapter_number(name: &str) -> Option<u32> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Chapter stem of a prompt or response shard: `chapter_0001_3.txt` -> `chapter_0001`.
pub fn shard_chapter_name(file_name: &str) -> Option<String> {
    shard_pattern()
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn sanitize_path_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_PATH_CHARS.contains(&c) { '_' } else { c })
        .collect();
    replaced.trim().chars().take(MAX_PATH_NAME_LEN).collect()
}

/// Inclusive chapter window; a missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChapterRange {
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl ChapterRange {
    pub fn new(start: Option<u32>, end: Option<u32>) -> Self {
        Self { start, end }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// Files without a chapter number always belong to the range.
    pub fn contains(&self, file_name: &str) -> bool {
        match extract_chapter_number(file_name) {
            Some(number) => self.contains_index(number),
            None => true,
        }
    }

    pub fn contains_index(&self, number: u32) -> bool {
        self.start.map_or(true, |start| number >= start) && self.end.map_or(true, |end| number <= end)
    }

    pub fn suffix(&self) -> String {
        if self.start.is_none() && self.end.is_none() {
            return String::new();
        }
        format!("_{}", self.to_string().replace('-', "_"))
    }
}

impl fmt::Display for ChapterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self.start.map(|s| s.to_string()).unwrap_or_else(|| "begin".to_string());
        let end = self.end.map(|e| e.to_string()).unwrap_or_else(|| "end".to_string());
        write!(f, "{}-{}", start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_chapter_number() {
        assert_eq!(extract_chapter_number("chapter_0012_3.txt"), Some(12));
        assert_eq!(extract_chapter_number("chapter_0001.txt"), Some(1));
        assert_eq!(extract_chapter_number("preface.txt"), None);
    }

    #[test]
    fn test_range_membership() {
        let range = ChapterRange::new(Some(5), Some(10));
        assert!(range.contains("chapter_0005_1.txt"));
        assert!(range.contains("chapter_0010.txt"));
        assert!(!range.contains("chapter_0004_2.txt"));
        assert!(!range.contains("chapter_0011.txt"));
        assert!(range.contains("afterword.txt"));

        let open_start = ChapterRange::new(None, Some(3));
        assert!(open_start.contains_index(1));
        assert!(!open_start.contains_index(4));
        assert!(ChapterRange::all().contains_index(99_999));
    }

    #[test]
    fn test_range_suffix_and_display() {
        assert_eq!(ChapterRange::all().suffix(), "");
        assert_eq!(ChapterRange::new(Some(3), None).suffix(), "_3_end");
        assert_eq!(ChapterRange::new(None, Some(9)).suffix(), "_begin_9");
        assert_eq!(ChapterRange::new(Some(1), Some(2)).to_string(), "1-2");
    }

    #[test]
    fn test_shard_chapter_name() {
        assert_eq!(shard_chapter_name("chapter_0001_3.txt").as_deref(), Some("chapter_0001"));
        assert_eq!(shard_chapter_name("chapter_0001.txt").as_deref(), Some("chapter"));
        assert_eq!(shard_chapter_name("notes.md"), None);
    }

    #[test]
    fn test_sanitize_path_name() {
        assert_eq!(sanitize_path_name(" a<b>:c/d? "), "a_b__c_d_");
        assert_eq!(sanitize_path_name(&"x".repeat(150)).chars().count(), 100);
    }
}
