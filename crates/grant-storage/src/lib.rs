//! Page fetching plus the worksheet-backed catalog and profile stores.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub mod gateway;
pub mod sheet;

pub use gateway::{CatalogGateway, ProfileStore, SheetCatalog, SheetProfileStore};
pub use sheet::{FileWorksheet, MemoryWorksheet, StoreConfig, StoreError, Workbook, Worksheet};

pub const CRATE_NAME: &str = "grant-storage";

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a rendering backend should wait before handing back the DOM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    DomContentLoaded,
    NetworkIdle,
    /// Network idle plus a fixed settle delay for late client-side rendering.
    NetworkIdleThen(Duration),
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    /// `Some` asks for a rendered DOM rather than the raw response body.
    pub wait: Option<WaitPolicy>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout: DEFAULT_FETCH_TIMEOUT,
            wait: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn rendered(mut self, wait: WaitPolicy) -> Self {
        self.wait = Some(wait);
        self
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("timed out after {timeout:?} fetching {url}")]
    Timeout { url: String, timeout: Duration },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid request header {name:?}")]
    InvalidHeader { name: String },
    #[error("{0}")]
    Backend(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Request(err) => err.is_timeout(),
            _ => false,
        }
    }
}

/// Anything that can turn a URL into HTML: a plain HTTP client or a headless renderer.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<String, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Plain HTTP fetcher. Timeouts are not retried: a slow source simply yields nothing this run.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    async fn fetch_with_retries(
        &self,
        request: &PageRequest,
        headers: HeaderMap,
    ) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            let resp_result = self
                .client
                .get(&request.url)
                .headers(headers.clone())
                .timeout(request.timeout)
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        return resp.text().await.map_err(|err| map_request_error(err, request));
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(status = status.as_u16(), attempt, "retrying after status");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if !err.is_timeout()
                        && classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(error = %err, attempt, "retrying after request error");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(map_request_error(err, request));
                }
            }
        }
    }
}

fn map_request_error(err: reqwest::Error, request: &PageRequest) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: request.url.clone(),
            timeout: request.timeout,
        }
    } else {
        FetchError::Request(err)
    }
}

fn build_headers(request: &PageRequest) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        let invalid = || FetchError::InvalidHeader { name: name.clone() };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
        let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<String, FetchError> {
        let headers = build_headers(request)?;
        if request.wait.is_some() {
            debug!(url = %request.url, "http fetcher cannot render; returning raw body");
        }
        let span = info_span!("http_fetch", url = %request.url);
        self.fetch_with_retries(request, headers).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_retries_twice_doubling_from_half_a_second() {
        let policy = HttpClientConfig::default().backoff;
        assert_eq!(policy.max_retries, 2);
        let delays: Vec<_> = (0..=policy.max_retries)
            .map(|attempt| policy.delay_for_attempt(attempt))
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ]
        );
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn only_server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn request_builder_collects_headers_and_wait_policy() {
        let request = PageRequest::new("https://www.k-startup.go.kr/")
            .with_timeout(Duration::from_secs(20))
            .with_header("Accept-Language", "ko-KR")
            .rendered(WaitPolicy::NetworkIdleThen(Duration::from_secs(3)));
        assert_eq!(request.timeout, Duration::from_secs(20));
        assert_eq!(request.headers.len(), 1);
        assert!(build_headers(&request).is_ok());
        assert!(request.wait.is_some());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let request = PageRequest::new("https://example.com").with_header("bad header", "x");
        assert!(matches!(
            build_headers(&request),
            Err(FetchError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn timeout_errors_are_recognizable() {
        let err = FetchError::Timeout {
            url: "https://example.com".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(err.is_timeout());
        assert!(!FetchError::Backend("renderer crashed".into()).is_timeout());
    }
}
