//! Bounded, retrying HTTP client shared by the crawler and the probe
//! engine.
//!
//! All requests in a scan pass through one counting semaphore, so the
//! configured concurrency bounds in-flight requests globally. Transport
//! failures, HTTP 429, and 5xx responses are retried with jittered
//! exponential backoff; once retries run out the fetch yields an empty
//! body rather than an error, which downstream phases treat as "nothing
//! seen".

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use indexmap::IndexMap;
use rand::Rng;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::targets::Method;

/// Browser-like user agents; the first entry is the session default.
pub const USER_AGENT_POOL: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/114.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/114.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 Version/14.0 Safari/605.1.15",
];

const JITTER_MAX_SECONDS: f64 = 0.2;

/// Outcome of a fetch. `ok == false` means retries were exhausted; the body
/// is empty in that case so comparisons and regex scans stay inert.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: Option<u16>,
    pub body: String,
    pub ok: bool,
}

impl FetchResponse {
    fn failure() -> Self {
        Self {
            status: None,
            body: String::new(),
            ok: false,
        }
    }

    /// Status rendered for evidence strings.
    pub(crate) fn status_label(&self) -> String {
        self.status.map_or_else(|| "n/a".to_string(), |s| s.to_string())
    }
}

/// HTTP client with a global in-flight cap and retry policy.
pub struct HttpClient {
    client: Client,
    semaphore: Semaphore,
    max_retries: u32,
    backoff_base: f64,
}

impl HttpClient {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        concurrency: usize,
        max_retries: u32,
        backoff_base: f64,
    ) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .user_agent(user_agent)
                .timeout(timeout)
                .build()?,
            semaphore: Semaphore::new(concurrency),
            max_retries,
            backoff_base,
        })
    }

    /// Issues a request, appending `params` as a query string on GET and as
    /// a form-encoded body on POST. Retries transport failures, 429, and
    /// 5xx with `backoff_base * 2^attempt` plus up to 0.2s of jitter.
    #[tracing::instrument(skip(self, params))]
    pub async fn fetch(
        &self,
        url: &str,
        method: Method,
        params: Option<&IndexMap<String, String>>,
    ) -> FetchResponse {
        let mut attempt = 0u32;
        loop {
            let outcome = match self.semaphore.acquire().await {
                Ok(_permit) => self.attempt(url, method, params).await,
                Err(_) => return FetchResponse::failure(),
            };
            match outcome {
                Ok((status, body)) => {
                    return FetchResponse {
                        status: Some(status),
                        body,
                        ok: true,
                    }
                }
                Err(cause) => {
                    if attempt >= self.max_retries {
                        tracing::debug!("Giving up on {url} after {attempt} retries ({cause}).");
                        return FetchResponse::failure();
                    }
                    let jitter: f64 = rand::rng().random_range(0.0..JITTER_MAX_SECONDS);
                    let delay = self.backoff_base * 2f64.powi(attempt as i32) + jitter;
                    tracing::debug!("Retrying {url} in {delay:.2}s ({cause}).");
                    sleep(Duration::from_secs_f64(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        method: Method,
        params: Option<&IndexMap<String, String>>,
    ) -> Result<(u16, String), RetryCause> {
        let mut request = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        if let Some(params) = params {
            let pairs: Vec<(&str, &str)> = params
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect();
            request = match method {
                Method::Get => request.query(&pairs),
                Method::Post => request.form(&pairs),
            };
        }

        let response = request.send().await.map_err(RetryCause::Transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(RetryCause::Transport)?;
        if status == 429 || (500..600).contains(&status) {
            return Err(RetryCause::Status(status));
        }
        Ok((status, body))
    }
}

enum RetryCause {
    Transport(reqwest::Error),
    Status(u16),
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryCause::Transport(error) => write!(f, "transport error: {error}"),
            RetryCause::Status(status) => write!(f, "retryable status {status}"),
        }
    }
}
