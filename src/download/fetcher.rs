use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DownloadConfig;
use crate::error::{BookError, Result};

/// Page access used by the downloader.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page as text
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// Fetch raw bytes (cover images)
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// reqwest client with browser-like headers and exponential backoff.
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    min_delay: Duration,
    multiplier: u32,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            min_delay: Duration::from_millis(config.retry_min_delay_ms),
            multiplier: config.retry_multiplier.max(1),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut delay = self.min_delay;
        let mut attempt = 0;

        loop {
            let error = match self.client.get(url).send().await {
                Ok(response) if response.status().as_u16() < 400 => return Ok(response),
                Ok(response) => BookError::Api {
                    status: response.status().as_u16(),
                    message: format!("HTTP error for {}", url),
                },
                Err(e) => BookError::Http(e),
            };

            if attempt >= self.max_retries {
                warn!("Giving up on {} after {} attempts: {}", url, attempt + 1, error);
                return Err(error);
            }

            attempt += 1;
            debug!("Retrying {} in {:?} (attempt {}): {}", url, delay, attempt, error);
            tokio::time::sleep(delay).await;
            delay *= self.multiplier;
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        Ok(self.get(url).await?.text().await?)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        Ok(self.get(url).await?.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use httpmock::prelude::*;

    fn fetcher() -> HttpFetcher {
        let mut config = Config::default().download;
        config.retry_min_delay_ms = 1;
        HttpFetcher::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_text_sends_browser_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/book/1.html")
                    .header("accept-language", "en-US,en;q=0.5")
                    .header_exists("user-agent");
                then.status(200).body("<p>第一章</p>");
            })
            .await;

        let body = fetcher().fetch_text(&server.url("/book/1.html")).await.unwrap();
        assert_eq!(body, "<p>第一章</p>");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_reported() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(503);
            })
            .await;

        let err = fetcher().fetch_bytes(&server.url("/missing")).await.unwrap_err();
        assert!(matches!(err, BookError::Api { status: 503, .. }));
        mock.assert_hits_async(4).await;
    }
}
