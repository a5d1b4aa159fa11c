//! Per-group dashboard cache.
//!
//! Each [`CacheGroup`] holds at most one entry: the last successful payload,
//! when it was fetched and the parameters it was fetched for. Entries are
//! replaced wholesale (last write wins) and survive failed refreshes.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::AppResult;
use crate::telemetry::TelemetryClient;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T, P> {
    pub payload: T,
    pub fetched_at: Instant,
    pub params: P,
    invalidated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Fresh entry, no remote call made.
    Cache,
    /// Fetched just now.
    Live,
    /// Fetch failed; previous payload served.
    Stale,
    /// Fetch failed with nothing cached; zero value served.
    Default,
}

#[derive(Debug, Clone, Serialize)]
pub struct Loaded<T> {
    pub payload: T,
    pub origin: Origin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Loaded<T> {
    pub fn new(payload: T, origin: Origin) -> Self {
        Self {
            payload,
            origin,
            error: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.origin, Origin::Stale | Origin::Default)
    }
}

pub struct CacheGroup<T, P> {
    name: &'static str,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entry: RwLock<Option<CacheEntry<T, P>>>,
}

impl<T, P> CacheGroup<T, P>
where
    T: Clone + Default,
    P: Clone + PartialEq + std::fmt::Debug,
{
    pub fn new(name: &'static str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            ttl,
            clock,
            entry: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn state(&self) -> CacheState {
        match &*self.entry.read() {
            None => CacheState::Empty,
            Some(entry) if self.is_fresh(entry) => CacheState::Fresh,
            Some(_) => CacheState::Stale,
        }
    }

    pub fn get_if_fresh(&self, params: &P) -> Option<T> {
        let guard = self.entry.read();
        guard
            .as_ref()
            .filter(|entry| entry.params == *params && self.is_fresh(entry))
            .map(|entry| entry.payload.clone())
    }

    /// Whatever was last fetched successfully, fresh or not.
    pub fn last_known_good(&self) -> Option<T> {
        self.entry.read().as_ref().map(|entry| entry.payload.clone())
    }

    pub fn cached_params(&self) -> Option<P> {
        self.entry.read().as_ref().map(|entry| entry.params.clone())
    }

    pub fn put(&self, params: P, payload: T) {
        let entry = CacheEntry {
            payload,
            fetched_at: self.clock.now(),
            params,
            invalidated: false,
        };
        *self.entry.write() = Some(entry);
    }

    /// Forces the next load to fetch while keeping the payload as fallback.
    pub fn invalidate(&self) {
        if let Some(entry) = self.entry.write().as_mut() {
            entry.invalidated = true;
        }
    }

    pub fn clear(&self) {
        *self.entry.write() = None;
    }

    /// Serves from cache when fresh for `params`, otherwise runs `fetch`.
    /// Fetch errors never reach the caller: the previous payload (or
    /// `T::default()`) is returned and the failure is logged and recorded.
    pub async fn load<F, Fut>(
        &self,
        params: P,
        force: bool,
        telemetry: &TelemetryClient,
        fetch: F,
    ) -> Loaded<T>
    where
        F: FnOnce(P) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        if !force {
            if let Some(payload) = self.get_if_fresh(&params) {
                debug!(group = self.name, ?params, "serving cached data");
                return Loaded::new(payload, Origin::Cache);
            }
        }

        debug!(group = self.name, ?params, force, "fetching data");
        match fetch(params.clone()).await {
            Ok(payload) => {
                self.put(params, payload.clone());
                Loaded::new(payload, Origin::Live)
            }
            Err(err) => {
                let (payload, origin) = match self.last_known_good() {
                    Some(previous) => (previous, Origin::Stale),
                    None => (T::default(), Origin::Default),
                };
                warn!(
                    group = self.name,
                    ?params,
                    ?err,
                    ?origin,
                    "refresh failed; serving fallback data"
                );
                let event = match origin {
                    Origin::Stale => "served_stale",
                    _ => "served_default",
                };
                for name in ["refresh_failed", event] {
                    if let Err(record_err) = telemetry.record(
                        name,
                        json!({
                            "group": self.name,
                            "error": err.to_string(),
                            "kind": err.kind(),
                        }),
                    ) {
                        warn!(?record_err, "failed to record refresh failure");
                    }
                }
                Loaded {
                    payload,
                    origin,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    fn is_fresh(&self, entry: &CacheEntry<T, P>) -> bool {
        !entry.invalidated && self.clock.now().duration_since(entry.fetched_at) < self.ttl
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::errors::AppError;

    fn group(clock: Arc<ManualClock>) -> CacheGroup<Vec<u32>, &'static str> {
        CacheGroup::new("kpis", Duration::from_secs(60), clock)
    }

    #[test]
    fn serves_fresh_entries_for_matching_params() {
        let clock = Arc::new(ManualClock::new());
        let cache = group(clock.clone());
        assert_eq!(cache.state(), CacheState::Empty);
        assert_eq!(cache.get_if_fresh(&"7d"), None);

        cache.put("7d", vec![1, 2]);
        assert_eq!(cache.state(), CacheState::Fresh);
        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get_if_fresh(&"7d"), Some(vec![1, 2]));
        assert_eq!(cache.get_if_fresh(&"30d"), None);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.state(), CacheState::Stale);
        assert_eq!(cache.get_if_fresh(&"7d"), None);
        assert_eq!(cache.last_known_good(), Some(vec![1, 2]));
    }

    #[test]
    fn invalidate_keeps_payload_and_clear_drops_it() {
        let clock = Arc::new(ManualClock::new());
        let cache = group(clock);
        cache.put("7d", vec![3]);
        cache.invalidate();
        assert_eq!(cache.state(), CacheState::Stale);
        assert_eq!(cache.get_if_fresh(&"7d"), None);
        assert_eq!(cache.last_known_good(), Some(vec![3]));
        assert_eq!(cache.cached_params(), Some("7d"));

        cache.clear();
        assert_eq!(cache.state(), CacheState::Empty);
        assert_eq!(cache.last_known_good(), None);
    }

    #[tokio::test]
    async fn load_skips_fetch_while_fresh() {
        let clock = Arc::new(ManualClock::new());
        let cache = group(clock.clone());
        let telemetry = TelemetryClient::in_memory();
        let calls = AtomicUsize::new(0);

        let fetch = |_: &'static str| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, AppError>(vec![7]) }
        };

        let first = cache.load("7d", false, &telemetry, fetch).await;
        assert_eq!(first.origin, Origin::Live);
        let second = cache.load("7d", false, &telemetry, fetch).await;
        assert_eq!(second.origin, Origin::Cache);
        assert_eq!(second.payload, vec![7]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let forced = cache.load("7d", true, &telemetry, fetch).await;
        assert_eq!(forced.origin, Origin::Live);
        let other_range = cache.load("30d", false, &telemetry, fetch).await;
        assert_eq!(other_range.origin, Origin::Live);
        clock.advance(Duration::from_secs(61));
        let expired = cache.load("30d", false, &telemetry, fetch).await;
        assert_eq!(expired.origin, Origin::Live);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_last_known_good() {
        let clock = Arc::new(ManualClock::new());
        let cache = group(clock.clone());
        let telemetry = TelemetryClient::in_memory();

        cache
            .load("7d", false, &telemetry, |_| async { Ok::<_, AppError>(vec![1, 2, 3]) })
            .await;
        clock.advance(Duration::from_secs(120));

        let failed = cache
            .load("7d", false, &telemetry, |_| async {
                Err(AppError::Throttled {
                    status: 503,
                    attempts: 3,
                })
            })
            .await;
        assert_eq!(failed.origin, Origin::Stale);
        assert_eq!(failed.payload, vec![1, 2, 3]);
        assert!(failed.is_degraded());
        assert!(failed.error.unwrap().contains("503"));
        assert_eq!(cache.state(), CacheState::Stale);
        assert_eq!(cache.last_known_good(), Some(vec![1, 2, 3]));
        assert_eq!(telemetry.count("refresh_failed"), 1);
        assert_eq!(telemetry.count("served_stale"), 1);
    }

    #[tokio::test]
    async fn forced_refresh_failure_keeps_fresh_entry() {
        let clock = Arc::new(ManualClock::new());
        let cache = group(clock.clone());
        let telemetry = TelemetryClient::in_memory();

        cache
            .load("7d", false, &telemetry, |_| async { Ok::<_, AppError>(vec![4, 5]) })
            .await;
        clock.advance(Duration::from_secs(10));

        let failed = cache
            .load("7d", true, &telemetry, |_| async {
                Err(AppError::ServerError {
                    status: 500,
                    message: "boom".into(),
                })
            })
            .await;
        assert_eq!(failed.origin, Origin::Stale);
        assert_eq!(failed.payload, vec![4, 5]);
        assert_eq!(cache.state(), CacheState::Fresh);
        assert_eq!(cache.get_if_fresh(&"7d"), Some(vec![4, 5]));
        assert_eq!(telemetry.count("served_stale"), 1);
    }

    #[tokio::test]
    async fn first_failure_falls_back_to_default() {
        let cache = group(Arc::new(ManualClock::new()));
        let telemetry = TelemetryClient::in_memory();

        let failed = cache
            .load("7d", false, &telemetry, |_| async {
                Err(AppError::RequestFailed {
                    attempts: 3,
                    message: "refused".into(),
                })
            })
            .await;
        assert_eq!(failed.origin, Origin::Default);
        assert!(failed.payload.is_empty());
        assert_eq!(cache.state(), CacheState::Empty);
        assert_eq!(telemetry.count("served_default"), 1);
    }

    #[tokio::test]
    async fn overlapping_loads_leave_a_whole_entry() {
        let cache = Arc::new(CacheGroup::<Vec<u32>, u32>::new(
            "recent_leads",
            Duration::from_secs(60),
            Arc::new(SystemClock),
        ));
        let telemetry = TelemetryClient::in_memory();

        let mut handles = Vec::new();
        for page in 1..=8_u32 {
            let cache = cache.clone();
            let telemetry = telemetry.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .load(page, true, &telemetry, |page| async move {
                        tokio::task::yield_now().await;
                        Ok::<_, AppError>(vec![page; page as usize])
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let params = cache.cached_params().unwrap();
        let payload = cache.last_known_good().unwrap();
        assert_eq!(payload, vec![params; params as usize]);
    }
}
