use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

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
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// Failure below the HTTP status layer (no response, or a torn body).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub disposition: RetryDisposition,
    pub message: String,
}

impl TransportError {
    pub fn timeout() -> Self {
        Self {
            disposition: RetryDisposition::Retryable,
            message: "request timed out".to_string(),
        }
    }

    pub fn connection_reset() -> Self {
        Self {
            disposition: RetryDisposition::Retryable,
            message: "connection reset".to_string(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            disposition: classify_reqwest_error(&err),
            message: err.to_string(),
        }
    }
}

/// One GET against the upstream API, relative to its base URL.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get(&self, path: &str) -> Result<UpstreamResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpUpstreamConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpUpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.sleeper.app/v1".to_string(),
            timeout: Duration::from_secs(20),
            user_agent: Some(concat!("sleeper-sync/", env!("CARGO_PKG_VERSION")).to_string()),
        }
    }
}

#[derive(Debug)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(config: HttpUpstreamConfig) -> anyhow::Result<Self> {
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
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn get(&self, path: &str) -> Result<UpstreamResponse, TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?.to_vec();
        Ok(UpstreamResponse { status, body })
    }
}

pub type ScriptedReply = Result<UpstreamResponse, TransportError>;

/// In-process upstream driven by per-path reply queues. The last queued
/// reply for a path repeats once the queue is drained.
#[derive(Debug, Default)]
pub struct ScriptedUpstream {
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    calls: Mutex<HashMap<String, usize>>,
    latency: Mutex<Duration>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(path.to_string()).or_default().push_back(reply);
        }
    }

    pub fn push_json(&self, path: &str, body: &serde_json::Value) {
        self.push_status(path, 200, body.to_string().as_bytes());
    }

    pub fn push_status(&self, path: &str, status: u16, body: &[u8]) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.push(
            path,
            Ok(UpstreamResponse {
                status,
                body: body.to_vec(),
            }),
        );
    }

    /// Replaces whatever is queued for `path` with a single sticky reply.
    pub fn set_json(&self, path: &str, body: &serde_json::Value) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.remove(path);
        }
        self.push_json(path, body);
    }

    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = latency;
        }
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(path).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    /// Highest number of simultaneously outstanding `get` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_reply(&self, path: &str) -> ScriptedReply {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(path.to_string()).or_default() += 1;
        }
        let mut replies = match self.replies.lock() {
            Ok(replies) => replies,
            Err(_) => return Err(TransportError::connection_reset()),
        };
        match replies.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::connection_reset())),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(TransportError::connection_reset())),
            None => Ok(UpstreamResponse {
                status: StatusCode::NOT_FOUND,
                body: b"{\"error\":\"not scripted\"}".to_vec(),
            }),
        }
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn get(&self, path: &str) -> Result<UpstreamResponse, TransportError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let reply = self.next_reply(path);

        self.current.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}
