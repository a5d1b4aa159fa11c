//! Dashboard facade.
//!
//! Owns the data source picked at startup and one cache group per logical
//! dashboard section. Reads through here never fail: a refresh error is
//! logged, recorded as telemetry and answered with the last good payload or
//! an empty default.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::cache::{CacheGroup, CacheState, Clock, Loaded, SystemClock};
use crate::config::{AppConfig, DataMode};
use crate::errors::AppResult;
use crate::models::{
    DashboardCharts, DashboardInsights, DashboardTables, DateRange, Kpi, Lead, LeadFilter,
    LeadSummary, Page, PageRequest,
};
use crate::query::{QueryPayload, QueryResult};
use crate::scoring::{self, BehavioralRecord, LeadClassification};
use crate::source::{self, DataSource};
use crate::telemetry::TelemetryClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub kpis: Duration,
    pub charts: Duration,
    pub tables: Duration,
    pub insights: Duration,
    pub recent_leads: Duration,
}

impl CacheTtls {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            kpis: Duration::from_millis(config.cache_ttl_kpis_ms),
            charts: Duration::from_millis(config.cache_ttl_charts_ms),
            tables: Duration::from_millis(config.cache_ttl_tables_ms),
            insights: Duration::from_millis(config.cache_ttl_tables_ms),
            recent_leads: Duration::from_millis(config.cache_ttl_recent_leads_ms),
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub mode: DataMode,
    pub range: DateRange,
    pub generated_at: DateTime<Utc>,
    pub kpis: Loaded<Vec<Kpi>>,
    pub charts: Loaded<DashboardCharts>,
    pub tables: Loaded<DashboardTables>,
    pub insights: Loaded<DashboardInsights>,
    pub recent_leads: Loaded<Page<LeadSummary>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatus {
    pub name: &'static str,
    pub state: CacheState,
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub mode: DataMode,
    pub groups: Vec<GroupStatus>,
    pub telemetry_events: usize,
}

pub struct Dashboard {
    source: Arc<dyn DataSource>,
    telemetry: TelemetryClient,
    kpis: CacheGroup<Vec<Kpi>, DateRange>,
    charts: CacheGroup<DashboardCharts, DateRange>,
    tables: CacheGroup<DashboardTables, ()>,
    insights: CacheGroup<DashboardInsights, ()>,
    recent_leads: CacheGroup<Page<LeadSummary>, PageRequest>,
}

impl Dashboard {
    pub fn new(
        source: Arc<dyn DataSource>,
        telemetry: TelemetryClient,
        ttls: CacheTtls,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            telemetry,
            kpis: CacheGroup::new("kpis", ttls.kpis, clock.clone()),
            charts: CacheGroup::new("charts", ttls.charts, clock.clone()),
            tables: CacheGroup::new("tables", ttls.tables, clock.clone()),
            insights: CacheGroup::new("insights", ttls.insights, clock.clone()),
            recent_leads: CacheGroup::new("recent_leads", ttls.recent_leads, clock),
        }
    }

    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let telemetry = TelemetryClient::new(config)?;
        let source = source::from_config(config, &telemetry)?;
        info!(mode = ?source.mode(), "dashboard ready");
        Ok(Self::new(
            source,
            telemetry,
            CacheTtls::from_config(config),
            Arc::new(SystemClock),
        ))
    }

    pub fn mode(&self) -> DataMode {
        self.source.mode()
    }

    pub fn telemetry(&self) -> &TelemetryClient {
        &self.telemetry
    }

    pub async fn fetch_kpis(&self, range: DateRange, force: bool) -> Loaded<Vec<Kpi>> {
        self.kpis
            .load(range, force, &self.telemetry, |range| self.source.kpis(range))
            .await
    }

    pub async fn fetch_charts(&self, range: DateRange, force: bool) -> Loaded<DashboardCharts> {
        self.charts
            .load(range, force, &self.telemetry, |range| {
                self.source.charts(range)
            })
            .await
    }

    pub async fn fetch_tables(&self, force: bool) -> Loaded<DashboardTables> {
        self.tables
            .load((), force, &self.telemetry, |()| self.source.tables())
            .await
    }

    pub async fn fetch_insights(&self, force: bool) -> Loaded<DashboardInsights> {
        self.insights
            .load((), force, &self.telemetry, |()| self.source.insights())
            .await
    }

    pub async fn fetch_recent_leads(
        &self,
        page: PageRequest,
        force: bool,
    ) -> Loaded<Page<LeadSummary>> {
        self.recent_leads
            .load(page, force, &self.telemetry, |page| {
                self.source.recent_leads(page)
            })
            .await
    }

    /// Loads every section concurrently. Each section degrades on its own.
    pub async fn fetch_all(&self, range: DateRange, force: bool) -> DashboardSnapshot {
        let (kpis, charts, tables, insights, recent_leads) = futures_util::join!(
            self.fetch_kpis(range, force),
            self.fetch_charts(range, force),
            self.fetch_tables(force),
            self.fetch_insights(force),
            self.fetch_recent_leads(PageRequest::default(), force),
        );
        DashboardSnapshot {
            mode: self.mode(),
            range,
            generated_at: Utc::now(),
            kpis,
            charts,
            tables,
            insights,
            recent_leads,
        }
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        let groups = vec![
            status(self.kpis.name(), self.kpis.state(), self.kpis.ttl()),
            status(self.charts.name(), self.charts.state(), self.charts.ttl()),
            status(self.tables.name(), self.tables.state(), self.tables.ttl()),
            status(
                self.insights.name(),
                self.insights.state(),
                self.insights.ttl(),
            ),
            status(
                self.recent_leads.name(),
                self.recent_leads.state(),
                self.recent_leads.ttl(),
            ),
        ];
        CacheSnapshot {
            mode: self.mode(),
            groups,
            telemetry_events: self.telemetry.recent_events().len(),
        }
    }

    /// Marks every group stale. Payloads stay available as fallback.
    pub fn invalidate_all(&self) {
        self.kpis.invalidate();
        self.charts.invalidate();
        self.tables.invalidate();
        self.insights.invalidate();
        self.recent_leads.invalidate();
    }

    pub fn clear_all(&self) {
        self.kpis.clear();
        self.charts.clear();
        self.tables.clear();
        self.insights.clear();
        self.recent_leads.clear();
    }

    pub fn classify(&self, record: &BehavioralRecord) -> LeadClassification {
        scoring::classify(record)
    }

    pub async fn list_leads(&self, filter: &LeadFilter) -> AppResult<Page<Lead>> {
        self.source.list_leads(filter).await
    }

    pub async fn lead(&self, id: &str) -> AppResult<Option<Lead>> {
        self.source.lead(id).await
    }

    /// Uncached query straight to the analytics backend.
    pub async fn fetch(&self, query: impl Into<QueryPayload>) -> AppResult<QueryResult> {
        self.source.raw_query(query.into()).await
    }
}

fn status(name: &'static str, state: CacheState, ttl: Duration) -> GroupStatus {
    GroupStatus {
        name,
        state,
        ttl_ms: ttl.as_millis() as u64,
    }
}
