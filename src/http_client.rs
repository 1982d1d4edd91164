use std::io::Write;
use std::thread::sleep;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use tracing::{debug, warn};

use crate::error::FetchError;

/// Streams the content of a remote URL into a sink.
///
/// Implementations run on the parsing thread and block until the transfer
/// is done. Bytes already written to `sink` when an error is returned are
/// garbage; the caller discards them.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError>;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds (for exponential backoff cap)
    pub max_retry_delay_ms: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 2,
            retry_delay_ms: 500,
            max_retry_delay_ms: 10000,
            user_agent: format!("xml-validator/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Blocking HTTP fetcher for remote DTDs and schemas
pub struct HttpFetcher {
    client: Client,
    config: HttpClientConfig,
}

impl HttpFetcher {
    /// Create a new HTTP fetcher with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client, config })
    }

    /// Get response with retry logic
    fn get_response_with_retry(&self, url: &str) -> Result<Response, FetchError> {
        let mut current_attempt = 0;

        loop {
            match self.make_request(url) {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let error = FetchError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                        message: format!(
                            "HTTP {}: {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("Unknown")
                        ),
                    };

                    // Retry on server errors (5xx) but not client errors (4xx)
                    if status.is_server_error() && current_attempt < self.config.retry_attempts {
                        self.wait_before_retry(url, current_attempt, &error);
                        current_attempt += 1;
                        continue;
                    }

                    return Err(error);
                }
                Err(error) => {
                    if current_attempt < self.config.retry_attempts && is_retryable_error(&error) {
                        self.wait_before_retry(url, current_attempt, &error);
                        current_attempt += 1;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    fn make_request(&self, url: &str) -> Result<Response, FetchError> {
        debug!(url, "requesting remote entity");
        self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout_seconds: self.config.timeout_seconds,
                }
            } else {
                FetchError::Http(e)
            }
        })
    }

    fn wait_before_retry(&self, url: &str, attempt: u32, error: &FetchError) {
        let delay = retry_delay(&self.config, attempt);
        warn!(url, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %error, "retrying fetch");
        sleep(delay);
    }

    /// Get the client configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64, FetchError> {
        let mut response = self.get_response_with_retry(url)?;
        // no retry once bytes have reached the sink
        response.copy_to(sink).map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout_seconds: self.config.timeout_seconds,
                }
            } else {
                FetchError::Http(e)
            }
        })
    }
}

/// Exponential backoff delay for the given attempt, capped
pub(crate) fn retry_delay(config: &HttpClientConfig, attempt: u32) -> Duration {
    let factor = 2_u64.saturating_pow(attempt);
    let delay_ms = config.retry_delay_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms.min(config.max_retry_delay_ms))
}

/// Check if an error is retryable
fn is_retryable_error(error: &FetchError) -> bool {
    match error {
        // Retry on network errors and timeouts, but not on invalid URLs or similar
        FetchError::Http(reqwest_error) => reqwest_error.is_connect() || reqwest_error.is_timeout(),
        FetchError::Timeout { .. } => true,
        _ => false,
    }
}
