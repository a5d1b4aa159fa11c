//! Resilient query client.
//!
//! Sends `{"query": ...}` to the analytics proxy, retries transient failures
//! with capped exponential backoff and flattens whatever envelope comes back
//! into a plain row matrix.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::telemetry::TelemetryClient;

const RETRYABLE_STATUSES: [u16; 5] = [408, 429, 502, 503, 504];
const COLD_START_STATUS: u16 = 502;
const MAX_BACKOFF_EXPONENT: u32 = 16;
const MAX_ERROR_SNIPPET: usize = 200;

pub type Row = Vec<Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// What gets posted under the `query` key: either raw HogQL or an already
/// structured query object.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPayload {
    HogQl(String),
    Structured(Value),
}

impl QueryPayload {
    pub fn to_body(&self) -> Value {
        match self {
            QueryPayload::HogQl(text) => json!({ "query": text }),
            QueryPayload::Structured(value) => json!({ "query": value }),
        }
    }
}

impl From<&str> for QueryPayload {
    fn from(value: &str) -> Self {
        QueryPayload::HogQl(value.to_string())
    }
}

impl From<String> for QueryPayload {
    fn from(value: String) -> Self {
        QueryPayload::HogQl(value)
    }
}

impl From<Value> for QueryPayload {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => QueryPayload::HogQl(text),
            other => QueryPayload::Structured(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_builder() {
            TransportError::Invalid(err.to_string())
        } else {
            TransportError::Connect(err.to_string())
        }
    }
}

/// One POST of a JSON body, no retries. A response with any status is `Ok`;
/// `Err` means nothing came back.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn send(&self, body: &Value) -> Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    http: Client,
    endpoint: Url,
    api_token: Option<SecretString>,
}

impl HttpTransport {
    pub fn new(
        endpoint: &str,
        api_token: Option<SecretString>,
        request_timeout: Duration,
    ) -> AppResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| AppError::Config(format!("invalid query endpoint {endpoint}: {err}")))?;
        let http = Client::builder()
            .user_agent(concat!("leadscope/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint,
            api_token,
        })
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Self::new(
            &config.query_endpoint(),
            config.query_api_token.clone(),
            config.query_timeout(),
        )
    }
}

#[async_trait]
impl QueryTransport for HttpTransport {
    async fn send(&self, body: &Value) -> Result<TransportResponse, TransportError> {
        let mut request = self.http.post(self.endpoint.clone()).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for retryable statuses and network failures.
    pub max_attempts: u32,
    /// Total attempts when the proxy answers 502 while cold starting.
    pub cold_start_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cold_start_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            cold_start_attempts: config.retry_cold_start_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            jitter: Duration::from_millis(config.retry_jitter_ms),
        }
    }

    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }

    /// Attempt budget for a failure; `None` is a network-level failure.
    pub fn attempts_for(&self, status: Option<u16>) -> u32 {
        match status {
            Some(COLD_START_STATUS) => self.cold_start_attempts.max(1),
            _ => self.max_attempts.max(1),
        }
    }

    /// Delay after the given failed attempt (1-based), before jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let delay = self.base_delay.saturating_mul(1_u32 << exponent);
        delay.min(self.max_delay)
    }
}

#[derive(Debug)]
enum RetryableFailure {
    Status { status: u16, message: String },
    Network(String),
}

impl RetryableFailure {
    fn status(&self) -> Option<u16> {
        match self {
            RetryableFailure::Status { status, .. } => Some(*status),
            RetryableFailure::Network(_) => None,
        }
    }

    fn into_error(self, attempts: u32) -> AppError {
        match self {
            RetryableFailure::Status { status, .. } => AppError::Throttled { status, attempts },
            RetryableFailure::Network(message) => AppError::RequestFailed { attempts, message },
        }
    }

    fn describe(&self) -> String {
        match self {
            RetryableFailure::Status { status, message } => format!("{status}: {message}"),
            RetryableFailure::Network(message) => message.clone(),
        }
    }
}

#[derive(Debug)]
enum Failure {
    Retryable(RetryableFailure),
    Fatal(AppError),
}

#[derive(Clone)]
pub struct QueryClient {
    transport: Arc<dyn QueryTransport>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    jitter_rng: Arc<Mutex<StdRng>>,
    telemetry: Option<TelemetryClient>,
}

impl QueryClient {
    pub fn new(
        transport: Arc<dyn QueryTransport>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            policy,
            attempt_timeout,
            jitter_rng: Arc::new(Mutex::new(StdRng::from_entropy())),
            telemetry: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(
            Arc::new(transport),
            RetryPolicy::from_config(config),
            config.query_timeout(),
        ))
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryClient) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch(&self, query: impl Into<QueryPayload>) -> AppResult<QueryResult> {
        let body = query.into().to_body();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let failure = match self.attempt(&body).await {
                Ok(result) => {
                    debug!(attempt, rows = result.len(), "query succeeded");
                    return Ok(result);
                }
                Err(Failure::Fatal(err)) => return Err(err),
                Err(Failure::Retryable(failure)) => failure,
            };

            let budget = self.policy.attempts_for(failure.status());
            if attempt >= budget {
                warn!(
                    attempt,
                    budget,
                    reason = %failure.describe(),
                    "query retry budget exhausted"
                );
                return Err(failure.into_error(attempt));
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                attempt,
                budget,
                reason = %failure.describe(),
                "query failed; retrying after {:?}",
                delay
            );
            self.record_retry(attempt, &failure, delay);
            sleep(delay).await;
        }
    }

    async fn attempt(&self, body: &Value) -> Result<QueryResult, Failure> {
        match timeout(self.attempt_timeout, self.transport.send(body)).await {
            Ok(Ok(response)) => classify_response(response),
            Ok(Err(TransportError::Invalid(message))) => {
                Err(Failure::Fatal(AppError::Config(message)))
            }
            Ok(Err(err)) => Err(Failure::Retryable(RetryableFailure::Network(
                err.to_string(),
            ))),
            Err(_) => Err(Failure::Retryable(RetryableFailure::Network(format!(
                "attempt timed out after {:?}",
                self.attempt_timeout
            )))),
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff(attempt);
        let jitter_ms = self.policy.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        let jitter = {
            let mut rng = self.jitter_rng.lock();
            Duration::from_millis(rng.gen_range(0..jitter_ms))
        };
        base + jitter
    }

    fn record_retry(&self, attempt: u32, failure: &RetryableFailure, delay: Duration) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        if let Err(err) = telemetry.record(
            "query_retry",
            json!({
                "attempt": attempt,
                "status": failure.status(),
                "delay_ms": delay.as_millis() as u64,
            }),
        ) {
            warn!(?err, "failed to record query retry event");
        }
    }
}

fn classify_response(response: TransportResponse) -> Result<QueryResult, Failure> {
    let status = response.status;
    if (200..300).contains(&status) {
        let value: Value = serde_json::from_slice(&response.body).map_err(|err| {
            Failure::Fatal(AppError::MalformedResponse(format!(
                "response body is not JSON: {err}"
            )))
        })?;
        return normalize_rows(value)
            .map(|rows| QueryResult { rows })
            .map_err(Failure::Fatal);
    }

    let message = error_message(status, &response.body);
    if RetryPolicy::is_retryable_status(status) {
        Err(Failure::Retryable(RetryableFailure::Status { status, message }))
    } else if status < 500 {
        Err(Failure::Fatal(AppError::ClientError { status, message }))
    } else {
        Err(Failure::Fatal(AppError::ServerError { status, message }))
    }
}

fn error_message(status: u16, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        for key in ["error", "message", "detail"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return format!("HTTP {status}");
    }
    text.chars().take(MAX_ERROR_SNIPPET).collect()
}

/// Flattens the envelopes the proxy has been seen to return, in priority order:
/// a bare matrix, `{results: matrix}`, `{results: [{results: matrix}]}` and
/// `{results: [scalar, ...]}` (a single row).
pub fn normalize_rows(value: Value) -> AppResult<Vec<Row>> {
    if is_matrix(&value) {
        return Ok(into_matrix(value));
    }

    let mut envelope = match value {
        Value::Object(envelope) => envelope,
        other => {
            return Err(AppError::MalformedResponse(format!(
                "expected a row matrix or results envelope, got {}",
                type_name(&other)
            )))
        }
    };
    let Some(results) = envelope.remove("results") else {
        return Err(AppError::MalformedResponse(
            "object response has no `results` field".into(),
        ));
    };

    if is_matrix(&results) {
        return Ok(into_matrix(results));
    }

    let items = match results {
        Value::Array(items) => items,
        other => {
            return Err(AppError::MalformedResponse(format!(
                "`results` is {}, not an array",
                type_name(&other)
            )))
        }
    };

    if let Some(inner) = items
        .first()
        .and_then(|first| first.get("results"))
        .filter(|inner| is_matrix(inner))
    {
        return Ok(into_matrix(inner.clone()));
    }

    if items.iter().all(|item| !item.is_array() && !item.is_object()) {
        return Ok(vec![items]);
    }

    Err(AppError::MalformedResponse(
        "`results` does not contain a row matrix".into(),
    ))
}

fn is_matrix(value: &Value) -> bool {
    value
        .as_array()
        .map(|rows| rows.iter().all(Value::is_array))
        .unwrap_or(false)
}

fn into_matrix(value: Value) -> Vec<Row> {
    match value {
        Value::Array(rows) => rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Array(cells) => Some(cells),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
