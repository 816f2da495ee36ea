//! HTTP client with per-attempt deadline and bounded retry
//!
//! [`HttpClient::request`] makes up to `retry_limit + 1` attempts. Server
//! errors (5xx) and aborted attempts are retried immediately; waiting between
//! polls is the caller's job, driven by the
//! [`ErrorClassifier`](crate::classifier::ErrorClassifier). Every other
//! status is returned unmodified for the caller to interpret.
//!
//! The deadline covers the whole attempt, body included. Read bodies through
//! [`HttpClient::read_body`] so a stalled body surfaces as [`Error::Abort`].
//! Each attempt is counted against the attached [`KeyBudget`], retries too.

use crate::budget::KeyBudget;
use crate::config::{ApiConfig, ConfigHandle};
use crate::error::{Error, Result};
use reqwest::Response;
use std::time::Duration;

/// Per-request overrides
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Extra request headers
    pub headers: Vec<(&'static str, String)>,
    /// Attempt deadline; the runtime `rest_request_timeout` when `None`
    pub timeout: Option<Duration>,
    /// Extra attempts; the runtime `retry_limit` when `None`
    pub retry_limit: Option<u32>,
}

impl RequestOptions {
    /// Add a request header
    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// GET-only client for the status API
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    config: ConfigHandle,
    budget: Option<KeyBudget>,
}

impl HttpClient {
    /// Create a client; deadlines and retry limits are read from `config` on every request
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(api: &ApiConfig, config: ConfigHandle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&api.user_agent)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            budget: None,
        })
    }

    /// Count every attempt against `budget`
    #[must_use]
    pub fn with_budget(mut self, budget: KeyBudget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Issue a GET request
    ///
    /// Returns the first 2xx or non-5xx response, or the last 5xx response
    /// once attempts run out.
    ///
    /// # Errors
    /// [`Error::Abort`] when the final attempt missed its deadline or could not
    /// connect; [`Error::Network`] when the request could not be built.
    pub async fn request(&self, url: &str, options: &RequestOptions) -> Result<Response> {
        let runtime = self.config.current();
        let deadline = options.timeout.unwrap_or(runtime.rest_request_timeout);
        let attempts = options.retry_limit.unwrap_or(runtime.retry_limit) + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let last = attempt >= attempts;

            let mut request = self.client.get(url).timeout(deadline);
            for (name, value) in &options.headers {
                request = request.header(*name, value);
            }
            if let Some(budget) = &self.budget {
                budget.record_usage();
            }

            let message = match tokio::time::timeout(deadline, request.send()).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_server_error() && !last {
                        tracing::warn!(
                            url = %url,
                            status = status.as_u16(),
                            attempt,
                            attempts,
                            "Server error, retrying"
                        );
                        continue;
                    }
                    if attempt > 1 && status.is_success() {
                        tracing::info!(url = %url, attempts = attempt, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(Err(e)) if e.is_builder() => return Err(Error::Network(e)),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("no response within {} ms", deadline.as_millis()),
            };

            if last {
                tracing::warn!(url = %url, attempts, error = %message, "Request aborted");
                return Err(Error::Abort {
                    message,
                    url: url.to_string(),
                });
            }
            tracing::debug!(url = %url, attempt, attempts, error = %message, "Attempt aborted, retrying");
        }
    }

    /// Read a response body within the runtime `rest_request_timeout`
    ///
    /// # Errors
    /// [`Error::Abort`] when the body stalls past the deadline or the
    /// connection drops mid-body.
    pub async fn read_body(&self, response: Response, url: &str) -> Result<Vec<u8>> {
        let deadline = self.config.current().rest_request_timeout;
        let message = match tokio::time::timeout(deadline, response.bytes()).await {
            Ok(Ok(body)) => return Ok(body.to_vec()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("body not complete within {} ms", deadline.as_millis()),
        };
        tracing::warn!(url = %url, error = %message, "Response body aborted");
        Err(Error::Abort {
            message,
            url: url.to_string(),
        })
    }
}

/// Parse a numeric response header
pub fn header_u64(response: &Response, name: &str) -> Option<u64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
