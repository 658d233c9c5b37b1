use std::path::PathBuf;

use crate::dashboard::DashboardOptions;
use crate::fetch::retry::RetryConfig;
use crate::fetch::FetchConfig;

pub const DEFAULT_ENDPOINT: &str =
    "https://eportal.incometax.gov.in/iec/oursuccessenablers/saveData";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub endpoint: String,
    pub fetch_timeout_secs: u64,
    pub fetch_max_attempts: u32,
    pub fetch_base_delay_ms: u64,
    pub fetch_max_delay_ms: u64,
    pub fetch_jitter_ms: u64,
    pub request_jitter_min_ms: u64,
    pub request_jitter_max_ms: u64,
    pub collect_interval_hours: i64,
    pub start_jitter_secs: u64,
    pub dashboard_addr: String,
    pub show_rolling_delta: bool,
    pub show_pending_delta: bool,
    pub show_raw_table: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("ITRSTATS_DB").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./data/itrstats.sqlite3")),
            endpoint: std::env::var("ITRSTATS_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            fetch_timeout_secs: std::env::var("FETCH_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(20),
            fetch_max_attempts: std::env::var("FETCH_MAX_ATTEMPTS").ok().and_then(|v| v.parse().ok()).unwrap_or(5),
            fetch_base_delay_ms: std::env::var("FETCH_BASE_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(1000),
            fetch_max_delay_ms: std::env::var("FETCH_MAX_DELAY_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(30_000),
            fetch_jitter_ms: std::env::var("FETCH_JITTER_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(500),
            request_jitter_min_ms: std::env::var("REQUEST_JITTER_MIN_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(200),
            request_jitter_max_ms: std::env::var("REQUEST_JITTER_MAX_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(900),
            collect_interval_hours: std::env::var("COLLECT_INTERVAL_HOURS").ok().and_then(|v| v.parse().ok()).unwrap_or(4),
            start_jitter_secs: std::env::var("START_JITTER_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(30),
            dashboard_addr: std::env::var("DASHBOARD_ADDR").unwrap_or_else(|_| "127.0.0.1:8765".to_string()),
            show_rolling_delta: flag("SHOW_ROLLING_DELTA", true),
            show_pending_delta: flag("SHOW_PENDING_DELTA", true),
            show_raw_table: flag("SHOW_RAW_TABLE", true),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.fetch_max_attempts.max(1),
            base_delay_ms: self.fetch_base_delay_ms,
            max_delay_ms: self.fetch_max_delay_ms,
            jitter_ms: self.fetch_jitter_ms,
        }
    }

    pub fn fetch(&self) -> FetchConfig {
        FetchConfig {
            endpoint: self.endpoint.clone(),
            timeout_secs: self.fetch_timeout_secs,
            request_jitter_ms: (self.request_jitter_min_ms, self.request_jitter_max_ms),
            retry: self.retry(),
        }
    }

    pub fn dashboard(&self) -> DashboardOptions {
        DashboardOptions {
            show_rolling_delta: self.show_rolling_delta,
            show_pending_delta: self.show_pending_delta,
            show_raw_table: self.show_raw_table,
            ..DashboardOptions::default()
        }
    }
}

fn flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
