//! Upstream statistics source.

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::DEFAULT_ENDPOINT;
use crate::error::FetchError;
use crate::logging::{self, obj, v_str, Domain};
use crate::model::StatsPayload;

pub mod headers;
pub mod retry;

use retry::{retry_async, RetryConfig};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Uniform sleep range (ms) before every attempt.
    pub request_jitter_ms: (u64, u64),
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 20,
            request_jitter_ms: (200, 900),
            retry: RetryConfig::default(),
        }
    }
}

/// Anything that can produce one sample of the upstream counters.
#[async_trait]
pub trait StatsSource {
    async fn fetch_stats(&self) -> Result<StatsPayload, FetchError>;
}

/// GETs the public JSON endpoint, retrying with backoff.
pub struct HttpStatsSource {
    client: Client,
    cfg: FetchConfig,
}

impl HttpStatsSource {
    pub fn new(cfg: FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self { client, cfg })
    }

    async fn request_jitter(&self) {
        let (lo, hi) = self.cfg.request_jitter_ms;
        if hi == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(lo.min(hi)..=hi);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    async fn fetch_once(&self, attempt: u32) -> Result<StatsPayload, FetchError> {
        self.request_jitter().await;

        let (headers, ua_idx) = headers::build_headers(&mut rand::thread_rng());
        logging::debug(
            Domain::Fetch,
            "request",
            obj(&[
                ("attempt", json!(attempt)),
                ("endpoint", v_str(&self.cfg.endpoint)),
                ("user_agent_idx", json!(ua_idx)),
            ]),
        );

        let resp = self
            .client
            .get(&self.cfg.endpoint)
            .headers(headers)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { status: status.as_u16() });
        }
        let body = resp.bytes().await?;
        let data: Value = serde_json::from_slice(&body)?;
        StatsPayload::from_json(&data)
    }
}

#[async_trait]
impl StatsSource for HttpStatsSource {
    async fn fetch_stats(&self) -> Result<StatsPayload, FetchError> {
        let payload = retry_async(&self.cfg.retry, "fetch_stats", |attempt| self.fetch_once(attempt)).await?;
        logging::info(
            Domain::Fetch,
            "fetched",
            obj(&[
                (
                    "provider_date",
                    payload.provider_last_updated_raw.as_deref().map(v_str).unwrap_or_default(),
                ),
                ("e_verified_returns", json!(payload.counters.e_verified_returns)),
                ("total_processed_refund", json!(payload.counters.total_processed_refund)),
            ]),
        );
        Ok(payload)
    }
}
