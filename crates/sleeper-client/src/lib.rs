//! Rate-limited client for the Sleeper read API.
//!
//! Every request goes through one process-wide token bucket and an in-flight
//! semaphore; transient failures are retried with capped exponential backoff
//! and each successful payload carries a checksum of its canonical JSON.

mod checksum;
mod ratelimit;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

pub use checksum::{canonical_checksum, canonical_json, sha256_hex};
pub use ratelimit::{BackoffPolicy, TokenBucket, TokenBucketConfig};
pub use transport::{
    classify_reqwest_error, classify_status, HttpUpstream, HttpUpstreamConfig, RetryDisposition,
    ScriptedReply, ScriptedUpstream, TransportError, Upstream, UpstreamResponse,
};

pub const CRATE_NAME: &str = "sleeper-client";

/// Endpoint paths relative to the API base URL.
pub mod paths {
    pub fn league(league_id: &str) -> String {
        format!("/league/{league_id}")
    }

    pub fn users(league_id: &str) -> String {
        format!("/league/{league_id}/users")
    }

    pub fn rosters(league_id: &str) -> String {
        format!("/league/{league_id}/rosters")
    }

    pub fn matchups(league_id: &str, week: u32) -> String {
        format!("/league/{league_id}/matchups/{week}")
    }

    pub fn transactions(league_id: &str, week: u32) -> String {
        format!("/league/{league_id}/transactions/{week}")
    }

    pub fn draft(draft_id: &str) -> String {
        format!("/draft/{draft_id}")
    }

    pub fn draft_picks(draft_id: &str) -> String {
        format!("/draft/{draft_id}/picks")
    }

    pub fn players() -> String {
        "/players/nfl".to_string()
    }

    pub fn nfl_state() -> String {
        "/state/nfl".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub max_in_flight: usize,
    pub rate: TokenBucketConfig,
    pub backoff: BackoffPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 5,
            rate: TokenBucketConfig::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub path: String,
    pub status: u16,
    pub body: Vec<u8>,
    pub checksum: String,
    /// Latency of the successful request alone.
    pub response_time: Duration,
    /// Requests issued, including the successful one.
    pub attempts: usize,
    /// Delays actually slept between attempts.
    pub backoff: Vec<Duration>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient failure for {path} after {attempts} attempt(s): {message}")]
    Transient {
        path: String,
        attempts: usize,
        message: String,
    },
    #[error("permanent failure for {path}: {message}")]
    Permanent {
        path: String,
        status: Option<u16>,
        message: String,
    },
    #[error("malformed payload for {path}: {reason}")]
    Malformed { path: String, reason: String },
}

#[derive(Clone)]
pub struct ApiClient {
    upstream: Arc<dyn Upstream>,
    in_flight: Arc<Semaphore>,
    bucket: Arc<TokenBucket>,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("available_permits", &self.in_flight.available_permits())
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl ApiClient {
    pub fn new(upstream: Arc<dyn Upstream>, config: ClientConfig) -> Self {
        Self {
            upstream,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            bucket: Arc::new(TokenBucket::new(config.rate)),
            backoff: config.backoff,
        }
    }

    pub fn http(http: HttpUpstreamConfig, config: ClientConfig) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(HttpUpstream::new(http)?), config))
    }

    /// One unretried request for the NFL state, used as a readiness check.
    /// Shares the rate limit with regular fetches.
    pub async fn check_reachable(&self) -> Result<(), FetchError> {
        let path = paths::nfl_state();
        let Ok(_permit) = self.in_flight.acquire().await else {
            return Err(FetchError::Transient {
                path,
                attempts: 0,
                message: "client is shut down".to_string(),
            });
        };
        self.bucket.take().await;
        match self.upstream.get(&path).await {
            Ok(resp) if resp.status.is_success() => Ok(()),
            Ok(resp) if classify_status(resp.status) == RetryDisposition::NonRetryable => {
                Err(FetchError::Permanent {
                    status: Some(resp.status.as_u16()),
                    message: format!("http status {}", resp.status.as_u16()),
                    path,
                })
            }
            Ok(resp) => Err(FetchError::Transient {
                path,
                attempts: 1,
                message: format!("http status {}", resp.status.as_u16()),
            }),
            Err(err) => Err(FetchError::Transient {
                path,
                attempts: 1,
                message: err.message,
            }),
        }
    }

    pub async fn fetch(&self, path: &str) -> Result<FetchedPayload, FetchError> {
        let span = info_span!("http_fetch", path);
        self.fetch_inner(path).instrument(span).await
    }

    async fn fetch_inner(&self, path: &str) -> Result<FetchedPayload, FetchError> {
        let mut slept = Vec::new();
        let mut attempt = 0usize;

        loop {
            let (reply, response_time) = {
                let Ok(_permit) = self.in_flight.acquire().await else {
                    return Err(FetchError::Transient {
                        path: path.to_string(),
                        attempts: attempt,
                        message: "client is shut down".to_string(),
                    });
                };
                self.bucket.take().await;
                let sent = Instant::now();
                let reply = self.upstream.get(path).await;
                (reply, sent.elapsed())
            };

            let failure = match reply {
                Ok(resp) if resp.status.is_success() => {
                    let value: serde_json::Value = serde_json::from_slice(&resp.body).map_err(
                        |err| FetchError::Malformed {
                            path: path.to_string(),
                            reason: err.to_string(),
                        },
                    )?;
                    debug!(attempts = attempt + 1, bytes = resp.body.len(), "fetched payload");
                    return Ok(FetchedPayload {
                        path: path.to_string(),
                        status: resp.status.as_u16(),
                        checksum: canonical_checksum(&value),
                        response_time,
                        body: resp.body,
                        attempts: attempt + 1,
                        backoff: slept,
                    });
                }
                Ok(resp) => {
                    let message = format!("http status {}", resp.status.as_u16());
                    if classify_status(resp.status) == RetryDisposition::NonRetryable {
                        return Err(FetchError::Permanent {
                            path: path.to_string(),
                            status: Some(resp.status.as_u16()),
                            message,
                        });
                    }
                    message
                }
                Err(err) => {
                    if err.disposition == RetryDisposition::NonRetryable {
                        return Err(FetchError::Permanent {
                            path: path.to_string(),
                            status: None,
                            message: err.message,
                        });
                    }
                    err.message
                }
            };

            if attempt >= self.backoff.max_retries {
                return Err(FetchError::Transient {
                    path: path.to_string(),
                    attempts: attempt + 1,
                    message: failure,
                });
            }

            let delay = self.backoff.jittered_delay(attempt);
            warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %failure, "retrying upstream request");
            tokio::time::sleep(delay).await;
            slept.push(delay);
            attempt += 1;
        }
    }
}
