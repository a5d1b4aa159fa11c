use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

const DEFAULT_QUERY_BASE_URL: &str = "http://localhost:8787";
const DEFAULT_QUERY_PATH: &str = "/api/posthog-query";
const DEFAULT_AGGREGATE_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_RECENT_TTL_MS: u64 = 2 * 60 * 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMode {
    Mock,
    Live,
}

/// Event names the live source counts. The KPI definitions have shifted over
/// time, so they stay configurable instead of baked into the queries.
#[derive(Clone, Debug, Serialize)]
pub struct EventCatalog {
    pub page_view: String,
    pub product_view: String,
    pub pdf_open: String,
    pub inquiry_form_view: String,
    pub inquiry_submit: String,
    pub form_step_exit: String,
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self {
            page_view: "$pageview".into(),
            product_view: "product_viewed".into(),
            pdf_open: "pdf_opened".into(),
            inquiry_form_view: "inquiry_form_viewed".into(),
            inquiry_submit: "inquiry_submitted".into(),
            form_step_exit: "inquiry_form_abandoned".into(),
        }
    }
}

impl EventCatalog {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_view: parse_string("EVENT_PAGE_VIEW", defaults.page_view),
            product_view: parse_string("EVENT_PRODUCT_VIEW", defaults.product_view),
            pdf_open: parse_string("EVENT_PDF_OPEN", defaults.pdf_open),
            inquiry_form_view: parse_string("EVENT_INQUIRY_FORM_VIEW", defaults.inquiry_form_view),
            inquiry_submit: parse_string("EVENT_INQUIRY_SUBMIT", defaults.inquiry_submit),
            form_step_exit: parse_string("EVENT_FORM_STEP_EXIT", defaults.form_step_exit),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub data_mode: DataMode,
    pub query_base_url: String,
    pub query_path: String,
    pub query_api_token: Option<SecretString>,
    pub query_timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_cold_start_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_ms: u64,
    pub cache_ttl_kpis_ms: u64,
    pub cache_ttl_charts_ms: u64,
    pub cache_ttl_tables_ms: u64,
    pub cache_ttl_recent_leads_ms: u64,
    pub events: EventCatalog,
    pub telemetry_enabled: bool,
    pub telemetry_buffer_path: Option<PathBuf>,
    pub telemetry_batch_size: usize,
    pub telemetry_recent_capacity: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub data_mode: DataMode,
    pub query_endpoint: String,
    pub has_api_token: bool,
    pub query_timeout_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_cold_start_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub cache_ttl_kpis_ms: u64,
    pub cache_ttl_charts_ms: u64,
    pub cache_ttl_tables_ms: u64,
    pub cache_ttl_recent_leads_ms: u64,
    pub events: EventCatalog,
    pub telemetry_enabled: bool,
    pub telemetry_buffer_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_mode: DataMode::Mock,
            query_base_url: DEFAULT_QUERY_BASE_URL.into(),
            query_path: DEFAULT_QUERY_PATH.into(),
            query_api_token: None,
            query_timeout_ms: 15_000,
            retry_max_attempts: 3,
            retry_cold_start_attempts: 5,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
            retry_jitter_ms: 100,
            cache_ttl_kpis_ms: DEFAULT_AGGREGATE_TTL_MS,
            cache_ttl_charts_ms: DEFAULT_AGGREGATE_TTL_MS,
            cache_ttl_tables_ms: DEFAULT_AGGREGATE_TTL_MS,
            cache_ttl_recent_leads_ms: DEFAULT_RECENT_TTL_MS,
            events: EventCatalog::default(),
            telemetry_enabled: true,
            telemetry_buffer_path: None,
            telemetry_batch_size: 25,
            telemetry_recent_capacity: 200,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            data_mode: if parse_bool("LEADSCOPE_MOCK_MODE", true) {
                DataMode::Mock
            } else {
                DataMode::Live
            },
            query_base_url: parse_string("QUERY_BASE_URL", defaults.query_base_url),
            query_path: parse_string("QUERY_PATH", defaults.query_path),
            query_api_token: env::var("QUERY_API_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            query_timeout_ms: parse_u64("QUERY_TIMEOUT_MS", defaults.query_timeout_ms).max(1),
            retry_max_attempts: parse_u32("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)
                .max(1),
            retry_cold_start_attempts: parse_u32(
                "RETRY_COLD_START_ATTEMPTS",
                defaults.retry_cold_start_attempts,
            )
            .max(1),
            retry_base_delay_ms: parse_u64("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: parse_u64("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            retry_jitter_ms: parse_u64("RETRY_JITTER_MS", defaults.retry_jitter_ms),
            cache_ttl_kpis_ms: parse_u64("CACHE_TTL_KPIS_MS", defaults.cache_ttl_kpis_ms),
            cache_ttl_charts_ms: parse_u64("CACHE_TTL_CHARTS_MS", defaults.cache_ttl_charts_ms),
            cache_ttl_tables_ms: parse_u64("CACHE_TTL_TABLES_MS", defaults.cache_ttl_tables_ms),
            cache_ttl_recent_leads_ms: parse_u64(
                "CACHE_TTL_RECENT_LEADS_MS",
                defaults.cache_ttl_recent_leads_ms,
            ),
            events: EventCatalog::from_env(),
            telemetry_enabled: parse_bool("TELEMETRY_ENABLED", defaults.telemetry_enabled),
            telemetry_buffer_path: env::var("TELEMETRY_BUFFER_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", defaults.telemetry_batch_size)
                .max(1),
            telemetry_recent_capacity: parse_usize(
                "TELEMETRY_RECENT_CAPACITY",
                defaults.telemetry_recent_capacity,
            ),
        }
    }

    /// Full URL the query client posts to.
    pub fn query_endpoint(&self) -> String {
        let base = self.query_base_url.trim_end_matches('/');
        if self.query_path.is_empty() {
            return base.to_string();
        }
        let path = self.query_path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            data_mode: self.data_mode,
            query_endpoint: self.query_endpoint(),
            has_api_token: self.query_api_token.is_some(),
            query_timeout_ms: self.query_timeout_ms,
            retry_max_attempts: self.retry_max_attempts,
            retry_cold_start_attempts: self.retry_cold_start_attempts,
            retry_base_delay_ms: self.retry_base_delay_ms,
            retry_max_delay_ms: self.retry_max_delay_ms,
            cache_ttl_kpis_ms: self.cache_ttl_kpis_ms,
            cache_ttl_charts_ms: self.cache_ttl_charts_ms,
            cache_ttl_tables_ms: self.cache_ttl_tables_ms,
            cache_ttl_recent_leads_ms: self.cache_ttl_recent_leads_ms,
            events: self.events.clone(),
            telemetry_enabled: self.telemetry_enabled,
            telemetry_buffer_path: self
                .telemetry_buffer_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| match v.trim() {
            "1" | "true" | "TRUE" | "True" => true,
            "0" | "false" | "FALSE" | "False" => false,
            _ => default,
        })
        .unwrap_or(default)
}

fn parse_string(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}
