use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("EPUB generation error: {0}")]
    Epub(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No suitable downloader found for URL: {0}")]
    UnsupportedSource(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl BookError {
    /// Rate limiting and gateway timeouts are retried later instead of being
    /// recorded as failed translations.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 429 || *status == 504,
            other => {
                let message = other.to_string();
                message.contains("429") || message.contains("504")
            }
        }
    }
}

impl From<zip::result::ZipError> for BookError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Epub(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(BookError::Api { status: 429, message: "quota".into() }.is_transient());
        assert!(BookError::Api { status: 504, message: "gateway".into() }.is_transient());
        assert!(!BookError::Api { status: 400, message: "bad".into() }.is_transient());
        assert!(BookError::Translation("upstream returned 429 Too Many Requests".into()).is_transient());
        assert!(!BookError::Translation("Empty model response".into()).is_transient());
    }
}
