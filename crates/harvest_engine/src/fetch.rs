use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use harvest_logging::{harvest_debug, harvest_warn};
use rand::Rng;
use reqwest::header::{HeaderName, CONTENT_TYPE, LINK, RETRY_AFTER};
use reqwest::{Method, Request, StatusCode};

use crate::{ErrorClass, FailureKind, FetchError, FetchMetadata, FetchOutput};

pub const DEFAULT_USER_AGENT: &str = concat!("harvest/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_bytes: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            max_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Exponential backoff with additive jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first one. At least 1.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Deterministic part of the wait after the failed attempt `retry`
    /// (0-indexed): `base * 2^retry`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Full wait before the next attempt. A server `Retry-After` is a floor.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.backoff_delay(retry).saturating_add(self.jitter());
        match retry_after {
            Some(wait) => delay.max(wait),
            None => delay,
        }
    }

    fn jitter(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        rand::thread_rng().gen_range(Duration::ZERO..=self.max_jitter)
    }
}

/// HTTP client that repeats transient failures under a [`RetryPolicy`].
///
/// Permanent failures (most 4xx, oversized bodies, bad URLs) are returned
/// on the first attempt. When retries run out the last transient error is
/// returned.
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    max_bytes: u64,
}

impl RetryingFetcher {
    pub fn new(settings: &FetchSettings, policy: RetryPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| FetchError::new(FailureKind::InvalidRequest, err.to_string()))?;
        Ok(Self {
            client,
            policy,
            max_bytes: settings.max_bytes,
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Client used to build requests for [`RetryingFetcher::fetch`].
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub async fn get(&self, url: &str) -> Result<FetchOutput, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, format!("{url}: {err}")))?;
        self.fetch(Request::new(Method::GET, parsed)).await
    }

    pub async fn fetch(&self, request: Request) -> Result<FetchOutput, FetchError> {
        let max_attempts = self.policy.max_retries.max(1);
        let mut attempt = 0;
        loop {
            let current = request.try_clone().ok_or_else(|| {
                FetchError::new(FailureKind::InvalidRequest, "request body cannot be replayed")
            })?;
            attempt += 1;
            let err = match self.attempt(current).await {
                Ok(mut output) => {
                    output.metadata.attempts = attempt;
                    return Ok(output);
                }
                Err(err) => err,
            };

            if err.class() == ErrorClass::Permanent {
                harvest_warn!(
                    "{} {} failed permanently on attempt {attempt}: {err}",
                    request.method(),
                    request.url()
                );
                return Err(err);
            }
            if attempt >= max_attempts {
                harvest_warn!(
                    "{} {} failed after {attempt} attempts: {err}",
                    request.method(),
                    request.url()
                );
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt - 1, err.retry_after);
            harvest_warn!(
                "{} {} attempt {attempt}/{max_attempts} failed ({err}); retrying in {delay:?}",
                request.method(),
                request.url()
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(&self, request: Request) -> Result<FetchOutput, FetchError> {
        let url = request.url().to_string();
        harvest_debug!("{} {url}", request.method());
        let response = self.client.execute(request).await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .map(Duration::from_secs)
            } else {
                None
            };
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                format!("{status} from {url}"),
            )
            .with_retry_after(retry_after));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.max_bytes {
                return Err(self.too_large(Some(content_len)));
            }
        }

        let final_url = response.url().to_string();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string())
        };
        let content_type = header(CONTENT_TYPE);
        let link = header(LINK);

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = body.len() as u64 + chunk.len() as u64;
            if next_len > self.max_bytes {
                return Err(self.too_large(Some(next_len)));
            }
            body.extend_from_slice(&chunk);
        }
        let bytes: Bytes = body.freeze();

        Ok(FetchOutput {
            metadata: FetchMetadata {
                url,
                final_url,
                status: status.as_u16(),
                content_type,
                link,
                byte_len: bytes.len() as u64,
                attempts: 1,
            },
            bytes,
        })
    }

    fn too_large(&self, actual: Option<u64>) -> FetchError {
        FetchError::new(
            FailureKind::TooLarge {
                max_bytes: self.max_bytes,
                actual,
            },
            "response too large",
        )
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_connect() {
        return FetchError::new(FailureKind::Connect, err.to_string());
    }
    if err.is_builder() {
        return FetchError::new(FailureKind::InvalidRequest, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
