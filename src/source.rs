use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join3;
use tracing::info;

use crate::config::{AppConfig, DataMode};
use crate::errors::{AppError, AppResult};
use crate::live::LiveDataSource;
use crate::mock::MockDataSource;
use crate::models::{
    ChartSeries, DashboardCharts, DashboardInsights, DashboardTables, DateRange, FunnelStep, Kpi,
    LandingPage, Lead, LeadFilter, LeadSummary, LiveAction, LostLead, Page, PageRequest, PerfIssue,
    ProductInsight, SeoInsight, SeoKeyword, TopProduct,
};
use crate::query::{QueryClient, QueryPayload, QueryResult};
use crate::scoring::{LeadClassification, LeadType};
use crate::telemetry::TelemetryClient;

pub const LOST_LABEL: &str = "Lost";
pub const FUNNEL_STAGES: [&str; 5] = [
    "Visited",
    "Viewed product",
    "Opened PDF",
    "Reached form",
    "Submitted inquiry",
];

/// Where dashboard data comes from. Chosen once when the dashboard is built.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn mode(&self) -> DataMode;

    async fn kpis(&self, range: DateRange) -> AppResult<Vec<Kpi>>;
    async fn lead_type_distribution(&self, range: DateRange) -> AppResult<ChartSeries>;
    async fn traffic_sources(&self, range: DateRange) -> AppResult<ChartSeries>;
    async fn funnel(&self, range: DateRange) -> AppResult<Vec<FunnelStep>>;
    async fn recent_leads(&self, page: PageRequest) -> AppResult<Page<LeadSummary>>;
    async fn top_products(&self) -> AppResult<Vec<TopProduct>>;
    async fn top_landing_pages(&self) -> AppResult<Vec<LandingPage>>;
    async fn lost_leads(&self) -> AppResult<Vec<LostLead>>;
    async fn live_actions(&self) -> AppResult<Vec<LiveAction>>;
    async fn seo_keywords(&self) -> AppResult<Vec<SeoKeyword>>;
    async fn perf_issues(&self) -> AppResult<Vec<PerfIssue>>;
    async fn product_insights(&self) -> AppResult<Vec<ProductInsight>>;
    async fn seo_insights(&self) -> AppResult<Vec<SeoInsight>>;
    async fn list_leads(&self, filter: &LeadFilter) -> AppResult<Page<Lead>>;
    async fn lead(&self, id: &str) -> AppResult<Option<Lead>>;

    /// Raw pass-through to the analytics backend. Only the live source has one.
    async fn raw_query(&self, _query: QueryPayload) -> AppResult<QueryResult> {
        Err(AppError::Config(format!(
            "raw queries are not available in {:?} mode",
            self.mode()
        )))
    }

    async fn charts(&self, range: DateRange) -> AppResult<DashboardCharts> {
        let (lead_type_distribution, traffic_sources, funnel) = try_join3(
            self.lead_type_distribution(range),
            self.traffic_sources(range),
            self.funnel(range),
        )
        .await?;
        Ok(DashboardCharts {
            lead_type_distribution,
            traffic_sources,
            funnel,
        })
    }

    async fn tables(&self) -> AppResult<DashboardTables> {
        let (top_products, top_landing_pages, lost_leads, live_actions, seo_keywords, perf_issues) =
            futures_util::try_join!(
                self.top_products(),
                self.top_landing_pages(),
                self.lost_leads(),
                self.live_actions(),
                self.seo_keywords(),
                self.perf_issues(),
            )?;
        Ok(DashboardTables {
            top_products,
            top_landing_pages,
            lost_leads,
            live_actions,
            seo_keywords,
            perf_issues,
        })
    }

    async fn insights(&self) -> AppResult<DashboardInsights> {
        let (products, seo) =
            futures_util::try_join!(self.product_insights(), self.seo_insights())?;
        Ok(DashboardInsights { products, seo })
    }
}

pub fn from_config(
    config: &AppConfig,
    telemetry: &TelemetryClient,
) -> AppResult<Arc<dyn DataSource>> {
    match config.data_mode {
        DataMode::Mock => {
            info!("using deterministic mock data source");
            Ok(Arc::new(MockDataSource::new()))
        }
        DataMode::Live => {
            let client = QueryClient::from_config(config)?.with_telemetry(telemetry.clone());
            info!(endpoint = %config.query_endpoint(), "using live analytics data source");
            Ok(Arc::new(LiveDataSource::new(client, config.events.clone())))
        }
    }
}

/// Buckets classified leads into Hot, Warm, Cold, Disengaged and a separate
/// Lost bar. Lost leads are counted there instead of under their type.
pub fn lead_type_distribution<'a, I>(classifications: I) -> ChartSeries
where
    I: IntoIterator<Item = &'a LeadClassification>,
{
    let mut counts = [0_u64; 5];
    for class in classifications {
        let slot = if class.lost {
            4
        } else {
            match class.lead_type {
                LeadType::Hot => 0,
                LeadType::Warm => 1,
                LeadType::Cold => 2,
                LeadType::Disengaged => 3,
            }
        };
        counts[slot] += 1;
    }

    let labels = LeadType::ALL
        .iter()
        .map(|t| t.as_str())
        .chain(std::iter::once(LOST_LABEL));
    ChartSeries::from_pairs(labels.zip(counts.iter().map(|c| *c as f64)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{classify, BehavioralRecord};

    #[test]
    fn lost_leads_get_their_own_bucket() {
        let records = [
            BehavioralRecord {
                products_viewed: 5,
                ..Default::default()
            },
            BehavioralRecord {
                products_viewed: 3,
                exited_on_form_step: true,
                ..Default::default()
            },
            BehavioralRecord {
                products_viewed: 2,
                ..Default::default()
            },
            BehavioralRecord::default(),
        ];
        let classes: Vec<_> = records.iter().map(classify).collect();
        let series = lead_type_distribution(&classes);

        assert_eq!(
            series.labels,
            vec!["Hot", "Warm", "Cold", "Disengaged", "Lost"]
        );
        assert_eq!(series.data, vec![1.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn picks_source_from_mode() {
        let telemetry = TelemetryClient::in_memory();
        let mock = from_config(&AppConfig::default(), &telemetry).unwrap();
        assert_eq!(mock.mode(), DataMode::Mock);

        let live_config = AppConfig {
            data_mode: DataMode::Live,
            query_base_url: "http://127.0.0.1:1".into(),
            ..AppConfig::default()
        };
        let live = from_config(&live_config, &telemetry).unwrap();
        assert_eq!(live.mode(), DataMode::Live);

        let err = futures_util::FutureExt::now_or_never(mock.raw_query("SELECT 1".into()))
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let broken = AppConfig {
            data_mode: DataMode::Live,
            query_base_url: "not a url".into(),
            ..AppConfig::default()
        };
        assert!(from_config(&broken, &telemetry).is_err());
    }
}
