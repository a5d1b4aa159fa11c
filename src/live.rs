//! HogQL-backed data source.
//!
//! Every group is answered by one or more queries through [`QueryClient`].
//! Result rows are read positionally and leniently: the proxy has returned
//! counts as numbers, numeric strings and booleans depending on the column,
//! so anything unreadable degrades to zero instead of failing the group.

use async_trait::async_trait;
use futures_util::future::try_join3;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{DataMode, EventCatalog};
use crate::errors::AppResult;
use crate::mock::MockDataSource;
use crate::models::{
    ChartSeries, DateRange, FunnelStep, Kpi, LandingPage, Lead, LeadFilter, LeadSummary,
    LiveAction, LostLead, Page, PageRequest, PerfIssue, ProductInsight, SeoInsight, SeoKeyword,
    TimelineEntry, TopProduct,
};
use crate::query::{QueryClient, QueryPayload, QueryResult, Row};
use crate::scoring::{classify, BehavioralRecord, LeadType};
use crate::source::{self, DataSource, FUNNEL_STAGES};

const LEAD_WINDOW_DAYS: u32 = 30;
const TABLE_WINDOW_DAYS: u32 = 30;
const BEHAVIOR_ROW_LIMIT: usize = 500;
const BEHAVIOR_MAX_PAGES: usize = 200;
const TABLE_ROW_LIMIT: usize = 10;
const LOST_LEAD_ROWS: usize = 10;
const LIVE_ACTION_ROWS: usize = 8;
const DIRECT_SOURCE: &str = "Direct";

static NULL: Value = Value::Null;

pub struct LiveDataSource {
    client: QueryClient,
    events: EventCatalog,
    fallback: MockDataSource,
}

impl LiveDataSource {
    pub fn new(client: QueryClient, events: EventCatalog) -> Self {
        Self {
            client,
            events,
            fallback: MockDataSource::new(),
        }
    }

    pub fn client(&self) -> &QueryClient {
        &self.client
    }

    async fn behavior(
        &self,
        range: DateRange,
        offset_days: u32,
        person: Option<&str>,
    ) -> AppResult<Vec<Lead>> {
        let query = behavior_query(&self.events, range, offset_days, person, 0);
        let result = self.client.fetch(query).await?;
        Ok(result.rows.iter().filter_map(lead_from_row).collect())
    }

    /// Every visitor in the window, one page of [`BEHAVIOR_ROW_LIMIT`] rows
    /// at a time until a short page comes back.
    async fn behavior_all(&self, range: DateRange, offset_days: u32) -> AppResult<Vec<Lead>> {
        let mut leads = Vec::new();
        for page in 0..BEHAVIOR_MAX_PAGES {
            let query = behavior_query(
                &self.events,
                range,
                offset_days,
                None,
                page * BEHAVIOR_ROW_LIMIT,
            );
            let result = self.client.fetch(query).await?;
            leads.extend(result.rows.iter().filter_map(lead_from_row));
            if result.rows.len() < BEHAVIOR_ROW_LIMIT {
                return Ok(leads);
            }
        }
        warn!(
            visitors = leads.len(),
            pages = BEHAVIOR_MAX_PAGES,
            "visitor paging stopped at the page cap"
        );
        Ok(leads)
    }

    async fn recent_window(&self) -> AppResult<Vec<Lead>> {
        self.behavior(DateRange::days(LEAD_WINDOW_DAYS), 0, None)
            .await
    }
}

#[async_trait]
impl DataSource for LiveDataSource {
    fn mode(&self) -> DataMode {
        DataMode::Live
    }

    async fn kpis(&self, range: DateRange) -> AppResult<Vec<Kpi>> {
        let (counts, current, previous) = try_join3(
            self.client.fetch(kpi_query(&self.events, range)),
            self.behavior_all(range, 0),
            self.behavior_all(range, range.num_days()),
        )
        .await?;
        let hot_now = count_hot(&current);
        let hot_before = count_hot(&previous);
        Ok(kpis_from_counts(
            counts.rows.first().unwrap_or(&Vec::new()),
            hot_now,
            hot_before,
        ))
    }

    async fn lead_type_distribution(&self, range: DateRange) -> AppResult<ChartSeries> {
        let leads = self.behavior_all(range, 0).await?;
        Ok(source::lead_type_distribution(
            leads.iter().map(|lead| &lead.classification),
        ))
    }

    async fn traffic_sources(&self, range: DateRange) -> AppResult<ChartSeries> {
        let result = self
            .client
            .fetch(traffic_query(&self.events, range))
            .await?;
        Ok(series_from_rows(&result.rows))
    }

    async fn funnel(&self, range: DateRange) -> AppResult<Vec<FunnelStep>> {
        let result = self.client.fetch(funnel_query(&self.events, range)).await?;
        Ok(funnel_from_row(result.rows.first().unwrap_or(&Vec::new())))
    }

    async fn recent_leads(&self, page: PageRequest) -> AppResult<Page<LeadSummary>> {
        let summaries: Vec<LeadSummary> = self
            .recent_window()
            .await?
            .iter()
            .map(Lead::summary)
            .collect();
        Ok(page.slice(&summaries))
    }

    async fn top_products(&self) -> AppResult<Vec<TopProduct>> {
        let result = self.client.fetch(top_products_query(&self.events)).await?;
        Ok(result.rows.iter().map(top_product_from_row).collect())
    }

    async fn top_landing_pages(&self) -> AppResult<Vec<LandingPage>> {
        let result = self
            .client
            .fetch(landing_pages_query(&self.events))
            .await?;
        Ok(result.rows.iter().map(landing_page_from_row).collect())
    }

    async fn lost_leads(&self) -> AppResult<Vec<LostLead>> {
        Ok(self
            .recent_window()
            .await?
            .into_iter()
            .filter(|lead| lead.classification.lost)
            .take(LOST_LEAD_ROWS)
            .map(|lead| LostLead {
                products_viewed: lead.record.products_viewed,
                time_on_site_seconds: lead.record.time_on_site_seconds,
                score: lead.classification.score,
                id: lead.id,
            })
            .collect())
    }

    async fn live_actions(&self) -> AppResult<Vec<LiveAction>> {
        let result = self.client.fetch(live_actions_query()).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| live_action_from_row(row, &self.events))
            .collect())
    }

    async fn seo_keywords(&self) -> AppResult<Vec<SeoKeyword>> {
        debug!("seo keywords are not tracked by the analytics backend; using generated rows");
        self.fallback.seo_keywords().await
    }

    async fn perf_issues(&self) -> AppResult<Vec<PerfIssue>> {
        debug!("performance issues are not tracked by the analytics backend; using generated rows");
        self.fallback.perf_issues().await
    }

    async fn product_insights(&self) -> AppResult<Vec<ProductInsight>> {
        let result = self
            .client
            .fetch(product_insights_query(&self.events))
            .await?;
        Ok(result.rows.iter().map(product_insight_from_row).collect())
    }

    /// Landing-page traffic from the backend, suggestions from the generated
    /// performance issues for the same page.
    async fn seo_insights(&self) -> AppResult<Vec<SeoInsight>> {
        let (result, issues) = futures_util::try_join!(
            self.client.fetch(landing_pages_query(&self.events)),
            self.fallback.perf_issues(),
        )?;
        Ok(result
            .rows
            .iter()
            .map(|row| seo_insight_from_row(row, &issues))
            .collect())
    }

    async fn list_leads(&self, filter: &LeadFilter) -> AppResult<Page<Lead>> {
        let matching: Vec<Lead> = self
            .recent_window()
            .await?
            .into_iter()
            .filter(|lead| filter.matches(lead))
            .collect();
        Ok(filter.page.slice(&matching))
    }

    async fn lead(&self, id: &str) -> AppResult<Option<Lead>> {
        let leads = self
            .behavior(DateRange::days(LEAD_WINDOW_DAYS), 0, Some(id))
            .await?;
        Ok(leads.into_iter().find(|lead| lead.id == id))
    }

    async fn raw_query(&self, query: QueryPayload) -> AppResult<QueryResult> {
        self.client.fetch(query).await
    }
}

/// Single-quoted HogQL string literal.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn window(range: DateRange, offset_days: u32) -> String {
    let start = offset_days.saturating_add(range.num_days());
    if offset_days == 0 {
        format!("timestamp > now() - interval {start} day")
    } else {
        format!(
            "timestamp > now() - interval {start} day AND timestamp <= now() - interval {offset_days} day"
        )
    }
}

/// One row: inquiries, visitors, form views and form exits, each for the
/// current window followed by the window before it.
pub fn kpi_query(events: &EventCatalog, range: DateRange) -> String {
    let days = range.num_days();
    let current = format!("timestamp > now() - interval {days} day");
    let previous = format!("timestamp <= now() - interval {days} day");
    format!(
        "SELECT \
         countIf(event = {inquiry} AND {current}), \
         countIf(event = {inquiry} AND {previous}), \
         uniqIf(distinct_id, event = {page_view} AND {current}), \
         uniqIf(distinct_id, event = {page_view} AND {previous}), \
         countIf(event = {form_view} AND {current}), \
         countIf(event = {form_view} AND {previous}), \
         countIf(event = {form_exit} AND {current}), \
         countIf(event = {form_exit} AND {previous}) \
         FROM events WHERE {window}",
        inquiry = quote(&events.inquiry_submit),
        page_view = quote(&events.page_view),
        form_view = quote(&events.inquiry_form_view),
        form_exit = quote(&events.form_step_exit),
        window = format!(
            "timestamp > now() - interval {} day",
            days.saturating_mul(2)
        ),
    )
}

/// Per-visitor behavior, most recently active first, one page of
/// [`BEHAVIOR_ROW_LIMIT`] rows starting at `offset_rows`. Columns line up with
/// [`lead_from_row`].
///
/// A visitor has reached the form when they submitted an inquiry or are still
/// on it: their last form view is later than their last abandonment. Someone
/// who opened the form and then left it without coming back has not.
pub fn behavior_query(
    events: &EventCatalog,
    range: DateRange,
    offset_days: u32,
    person: Option<&str>,
    offset_rows: usize,
) -> String {
    let person_filter = person
        .map(|id| format!(" AND distinct_id = {}", quote(id)))
        .unwrap_or_default();
    format!(
        "SELECT \
         distinct_id, \
         countIf(event = {product_view}), \
         countIf(event = {pdf_open}), \
         dateDiff('second', min(timestamp), max(timestamp)), \
         max(toFloat(properties.scroll_depth)), \
         countIf(event = {inquiry}) > 0 \
         OR maxIf(timestamp, event = {form_view}) > maxIf(timestamp, event = {form_exit}), \
         dateDiff('second', min(timestamp), max(timestamp)) < 15, \
         countIf(event = {form_exit}) > 0, \
         any(properties.source), \
         any(properties.$device_type), \
         toString(min(timestamp)), \
         toString(max(timestamp)), \
         argMax(event, timestamp) \
         FROM events WHERE {window}{person_filter} \
         GROUP BY distinct_id ORDER BY max(timestamp) DESC, distinct_id \
         LIMIT {BEHAVIOR_ROW_LIMIT} OFFSET {offset_rows}",
        product_view = quote(&events.product_view),
        pdf_open = quote(&events.pdf_open),
        inquiry = quote(&events.inquiry_submit),
        form_view = quote(&events.inquiry_form_view),
        form_exit = quote(&events.form_step_exit),
        window = window(range, offset_days),
    )
}

pub fn traffic_query(events: &EventCatalog, range: DateRange) -> String {
    format!(
        "SELECT coalesce(properties.source, {direct}) AS s, count() AS c \
         FROM events WHERE event = {page_view} AND {window} \
         GROUP BY s ORDER BY c DESC",
        direct = quote(DIRECT_SOURCE),
        page_view = quote(&events.page_view),
        window = window(range, 0),
    )
}

/// One row of distinct visitors per stage, in [`FUNNEL_STAGES`] order.
pub fn funnel_query(events: &EventCatalog, range: DateRange) -> String {
    let stages = [
        &events.page_view,
        &events.product_view,
        &events.pdf_open,
        &events.inquiry_form_view,
        &events.inquiry_submit,
    ]
    .iter()
    .map(|event| format!("uniqIf(distinct_id, event = {})", quote(event)))
    .collect::<Vec<_>>()
    .join(", ");
    format!(
        "SELECT {stages} FROM events WHERE {window}",
        window = window(range, 0)
    )
}

pub fn top_products_query(events: &EventCatalog) -> String {
    format!(
        "SELECT properties.product AS p, \
         countIf(event = {product_view}) AS views, \
         countIf(event = {pdf_open}), \
         countIf(event = {inquiry}) \
         FROM events WHERE properties.product IS NOT NULL AND {window} \
         GROUP BY p ORDER BY views DESC LIMIT {TABLE_ROW_LIMIT}",
        product_view = quote(&events.product_view),
        pdf_open = quote(&events.pdf_open),
        inquiry = quote(&events.inquiry_submit),
        window = window(DateRange::days(TABLE_WINDOW_DAYS), 0),
    )
}

pub fn landing_pages_query(events: &EventCatalog) -> String {
    format!(
        "SELECT properties.$pathname AS url, \
         uniq(properties.$session_id) AS sessions, \
         countIf(event = {inquiry}) \
         FROM events WHERE event IN ({page_view}, {inquiry}) AND {window} \
         GROUP BY url ORDER BY sessions DESC LIMIT {TABLE_ROW_LIMIT}",
        page_view = quote(&events.page_view),
        inquiry = quote(&events.inquiry_submit),
        window = window(DateRange::days(TABLE_WINDOW_DAYS), 0),
    )
}

pub fn product_insights_query(events: &EventCatalog) -> String {
    format!(
        "SELECT properties.product AS p, any(properties.brand), \
         countIf(event = {product_view}) AS views, \
         countIf(event = {inquiry}) \
         FROM events WHERE properties.product IS NOT NULL AND {window} \
         GROUP BY p ORDER BY views DESC LIMIT {TABLE_ROW_LIMIT}",
        product_view = quote(&events.product_view),
        inquiry = quote(&events.inquiry_submit),
        window = window(DateRange::days(TABLE_WINDOW_DAYS), 0),
    )
}

pub fn live_actions_query() -> String {
    format!(
        "SELECT distinct_id, event, properties.$pathname, formatDateTime(timestamp, '%H:%i') \
         FROM events ORDER BY timestamp DESC LIMIT {LIVE_ACTION_ROWS}"
    )
}

fn cell(row: &Row, idx: usize) -> &Value {
    row.get(idx).unwrap_or(&NULL)
}

pub fn cell_f64(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(number) => number.as_f64().unwrap_or(0.0),
        Value::String(text) => text.trim().parse::<f64>().unwrap_or(0.0),
        Value::Bool(flag) => f64::from(u8::from(*flag)),
        _ => 0.0,
    };
    if parsed.is_finite() {
        parsed
    } else {
        0.0
    }
}

pub fn cell_u64(value: &Value) -> u64 {
    if let Some(number) = value.as_u64() {
        return number;
    }
    let parsed = cell_f64(value);
    if parsed <= 0.0 {
        0
    } else {
        parsed as u64
    }
}

fn cell_u32(value: &Value) -> u32 {
    u32::try_from(cell_u64(value)).unwrap_or(u32::MAX)
}

pub fn cell_bool(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    }
}

pub fn cell_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Change versus the previous window in percent, one decimal.
pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return if current == 0.0 { 0.0 } else { 100.0 };
    }
    round1((current - previous) / previous * 100.0)
}

fn rate(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        round1(numerator / denominator * 100.0)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn count_hot(leads: &[Lead]) -> f64 {
    leads
        .iter()
        .filter(|lead| lead.classification.lead_type == LeadType::Hot)
        .count() as f64
}

pub fn kpis_from_counts(row: &Row, hot_now: f64, hot_before: f64) -> Vec<Kpi> {
    let counts: [f64; 8] = std::array::from_fn(|idx| cell_f64(cell(row, idx)));
    let [inquiries, inquiries_before, visitors, visitors_before, form_views, form_views_before, exits, exits_before] =
        counts;

    let conversion = rate(inquiries, visitors);
    let conversion_before = rate(inquiries_before, visitors_before);
    let dropoff = rate(exits, form_views);
    let dropoff_before = rate(exits_before, form_views_before);

    vec![
        Kpi::new(
            "inquiries",
            "Total Inquiries",
            inquiries,
            percent_change(inquiries, inquiries_before),
        ),
        Kpi::new(
            "conversion",
            "Conversion Rate",
            conversion,
            round1(conversion - conversion_before),
        ),
        Kpi::new(
            "dropoff",
            "Drop-Off Rate",
            dropoff,
            round1(dropoff - dropoff_before),
        ),
        Kpi::new("hot", "Hot Leads", hot_now, percent_change(hot_now, hot_before)),
    ]
}

/// Shapes one [`behavior_query`] row into a scored lead. Rows without an id
/// are dropped.
pub fn lead_from_row(row: &Row) -> Option<Lead> {
    let id = cell_string(cell(row, 0));
    if id.trim().is_empty() {
        return None;
    }
    let record = BehavioralRecord {
        products_viewed: cell_u32(cell(row, 1)),
        pdfs_opened: cell_u32(cell(row, 2)),
        time_on_site_seconds: cell_u64(cell(row, 3)),
        scroll_depth: cell_f64(cell(row, 4)),
        reached_inquiry_form: cell_bool(cell(row, 5)),
        bounced_within_15s: cell_bool(cell(row, 6)),
        exited_on_form_step: cell_bool(cell(row, 7)),
    };
    let classification = classify(&record);
    let source = match cell_string(cell(row, 8)) {
        source if source.is_empty() => DIRECT_SOURCE.to_string(),
        source => source,
    };
    let last_seen = cell_string(cell(row, 11));
    let last_action = cell_string(cell(row, 12));
    Some(Lead {
        id,
        record,
        classification,
        source,
        device: cell_string(cell(row, 9)),
        first_seen: cell_string(cell(row, 10)),
        timeline: vec![TimelineEntry {
            t: last_seen.clone(),
            a: last_action.clone(),
        }],
        last_seen,
        last_action,
    })
}

pub fn series_from_rows(rows: &[Row]) -> ChartSeries {
    ChartSeries::from_pairs(rows.iter().map(|row| {
        let label = match cell_string(cell(row, 0)) {
            label if label.is_empty() => DIRECT_SOURCE.to_string(),
            label => label,
        };
        (label, cell_f64(cell(row, 1)))
    }))
}

pub fn funnel_from_row(row: &Row) -> Vec<FunnelStep> {
    FUNNEL_STAGES
        .iter()
        .enumerate()
        .map(|(idx, stage)| FunnelStep {
            stage: stage.to_string(),
            count: cell_u64(cell(row, idx)),
        })
        .collect()
}

fn top_product_from_row(row: &Row) -> TopProduct {
    let views = cell_u64(cell(row, 1));
    TopProduct {
        product: cell_string(cell(row, 0)),
        views,
        attention_pct: rate(cell_f64(cell(row, 2)), views as f64),
        inquiry_pct: rate(cell_f64(cell(row, 3)), views as f64),
    }
}

fn landing_page_from_row(row: &Row) -> LandingPage {
    let sessions = cell_u64(cell(row, 1));
    LandingPage {
        url: cell_string(cell(row, 0)),
        sessions,
        conversion_rate: rate(cell_f64(cell(row, 2)), sessions as f64),
    }
}

fn product_insight_from_row(row: &Row) -> ProductInsight {
    ProductInsight::new(
        cell_string(cell(row, 0)),
        cell_string(cell(row, 1)),
        cell_u64(cell(row, 2)),
        cell_u64(cell(row, 3)),
    )
}

fn seo_insight_from_row(row: &Row, issues: &[PerfIssue]) -> SeoInsight {
    let landing_page = cell_string(cell(row, 0));
    let sessions = cell_u64(cell(row, 1));
    let inquiries = cell_u64(cell(row, 2));
    let suggestions = issues
        .iter()
        .filter(|issue| issue.page == landing_page)
        .map(|issue| issue.suggestion.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    SeoInsight {
        conversion_rate: rate(inquiries as f64, sessions as f64),
        landing_page,
        sessions,
        inquiries,
        suggestions,
    }
}

fn live_action_from_row(row: &Row, events: &EventCatalog) -> LiveAction {
    let event = cell_string(cell(row, 1));
    LiveAction {
        visitor: cell_string(cell(row, 0)),
        action: describe_event(&event, events),
        page: cell_string(cell(row, 2)),
        at: cell_string(cell(row, 3)),
    }
}

fn describe_event(event: &str, events: &EventCatalog) -> String {
    let label = if event == events.page_view {
        "Visited page"
    } else if event == events.product_view {
        "Viewed product"
    } else if event == events.pdf_open {
        "Opened PDF"
    } else if event == events.inquiry_form_view {
        "Reached form"
    } else if event == events.inquiry_submit {
        "Submitted inquiry"
    } else if event == events.form_step_exit {
        "Left form"
    } else {
        event
    };
    label.to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::errors::AppError;
    use crate::query::{QueryTransport, RetryPolicy, TransportError, TransportResponse};

    /// Answers each query with the first canned body whose needle it contains.
    struct RoutedTransport {
        routes: Vec<(&'static str, Value)>,
        seen: Mutex<Vec<String>>,
    }

    impl RoutedTransport {
        fn new(routes: Vec<(&'static str, Value)>) -> Arc<Self> {
            Arc::new(Self {
                routes,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn queries(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl QueryTransport for RoutedTransport {
        async fn send(&self, body: &Value) -> Result<TransportResponse, TransportError> {
            let query = body["query"].as_str().unwrap_or_default().to_string();
            self.seen.lock().push(query.clone());
            let response = self
                .routes
                .iter()
                .find(|(needle, _)| query.contains(needle))
                .map(|(_, body)| TransportResponse::json(200, body))
                .unwrap_or_else(|| {
                    TransportResponse::json(400, &json!({ "error": "unexpected query" }))
                });
            Ok(response)
        }
    }

    fn source(transport: Arc<RoutedTransport>) -> LiveDataSource {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let client = QueryClient::new(transport, policy, Duration::from_secs(5));
        LiveDataSource::new(client, EventCatalog::default())
    }

    /// `u-lost` opened the inquiry form and left it, so its reached-form
    /// column comes back false with the exit flag set.
    fn behavior_rows() -> Value {
        json!({
            "results": [
                ["u-hot", 5, "1", 400, 92.5, true, false, false, "Organic", "Desktop",
                 "2025-08-01 10:00:00", "2025-08-02 11:00:00", "inquiry_submitted"],
                ["u-lost", 3, 0, "30", null, 0, 0, 1, null, "Mobile",
                 "2025-08-01 09:00:00", "2025-08-01 09:10:00", "inquiry_form_abandoned"],
                ["", 9, 9, 9, 9, true, false, false, "Paid", "Desktop", "", "", ""],
                ["u-cold", 1, 0, 10, 20, false, true, false, "Paid", "Mobile",
                 "2025-08-01 08:00:00", "2025-08-01 08:00:05", "$pageview"]
            ]
        })
    }

    #[test]
    fn quotes_literals() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it\'s'");
        assert_eq!(quote(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn reads_cells_leniently() {
        assert_eq!(cell_u64(&json!(7)), 7);
        assert_eq!(cell_u64(&json!("12")), 12);
        assert_eq!(cell_u64(&json!(3.9)), 3);
        assert_eq!(cell_u64(&json!(-4)), 0);
        assert_eq!(cell_u64(&json!(null)), 0);
        assert_eq!(cell_u64(&json!(true)), 1);
        assert_eq!(cell_f64(&json!("4.5")), 4.5);
        assert_eq!(cell_f64(&json!("n/a")), 0.0);
        assert!(cell_bool(&json!(1)));
        assert!(cell_bool(&json!("true")));
        assert!(!cell_bool(&json!(0)));
        assert!(!cell_bool(&json!(null)));
        assert_eq!(cell_string(&json!(42)), "42");
        assert_eq!(cell_string(&json!(null)), "");
    }

    #[test]
    fn percent_change_handles_empty_baselines() {
        assert_eq!(percent_change(0.0, 0.0), 0.0);
        assert_eq!(percent_change(5.0, 0.0), 100.0);
        assert_eq!(percent_change(135.0, 100.0), 35.0);
        assert_eq!(percent_change(50.0, 100.0), -50.0);
    }

    #[test]
    fn shapes_behavior_rows_into_scored_leads() {
        let rows = crate::query::normalize_rows(behavior_rows()).unwrap();
        let leads: Vec<Lead> = rows.iter().filter_map(lead_from_row).collect();
        assert_eq!(leads.len(), 3);

        let hot = &leads[0];
        assert_eq!(hot.record.pdfs_opened, 1);
        assert_eq!(hot.classification.lead_type, LeadType::Hot);
        assert_eq!(hot.last_action, "inquiry_submitted");

        let lost = &leads[1];
        assert_eq!(lost.record.time_on_site_seconds, 30);
        assert_eq!(lost.record.scroll_depth, 0.0);
        assert_eq!(lost.classification.score, 6);
        assert!(lost.classification.lost);
        assert_eq!(lost.source, "Direct");

        let cold = &leads[2];
        assert!(cold.record.bounced_within_15s);
        assert_eq!(cold.classification.score, 1);
        assert_eq!(cold.classification.lead_type, LeadType::Disengaged);
    }

    #[test]
    fn builds_kpis_from_counts() {
        let row = vec![
            json!(135),
            json!(100),
            json!(2700),
            json!("2500"),
            json!(400),
            json!(500),
            json!(100),
            json!(150),
        ];
        let kpis = kpis_from_counts(&row, 12.0, 10.0);
        assert_eq!(kpis.len(), 4);
        assert_eq!(kpis[0].value, 135.0);
        assert_eq!(kpis[0].delta, 35.0);
        assert_eq!(kpis[1].value, 5.0);
        assert_eq!(kpis[1].delta, 1.0);
        assert_eq!(kpis[2].value, 25.0);
        assert_eq!(kpis[2].delta, -5.0);
        assert_eq!(kpis[3].value, 12.0);
        assert_eq!(kpis[3].delta, 20.0);

        let empty = kpis_from_counts(&Vec::new(), 0.0, 0.0);
        assert!(empty.iter().all(|kpi| kpi.value == 0.0 && kpi.delta == 0.0));
    }

    #[test]
    fn queries_use_configured_events() {
        let events = EventCatalog {
            inquiry_submit: "lead_form_sent".into(),
            ..EventCatalog::default()
        };
        let kpi = kpi_query(&events, DateRange::days(30));
        assert!(kpi.contains("event = 'lead_form_sent'"));
        assert!(kpi.contains("interval 60 day"));

        let behavior = behavior_query(&events, DateRange::days(7), 7, Some("o'neil"), 0);
        assert!(behavior.contains("interval 14 day AND timestamp <= now() - interval 7 day"));
        assert!(behavior.contains(r"distinct_id = 'o\'neil'"));

        let funnel = funnel_query(&events, DateRange::default());
        assert_eq!(funnel.matches("uniqIf").count(), FUNNEL_STAGES.len());
    }

    #[test]
    fn form_abandoners_have_not_reached_the_form() {
        let query = behavior_query(&EventCatalog::default(), DateRange::days(7), 0, None, 0);
        assert!(query.contains(
            "countIf(event = 'inquiry_submitted') > 0 \
             OR maxIf(timestamp, event = 'inquiry_form_viewed') \
             > maxIf(timestamp, event = 'inquiry_form_abandoned')"
        ));
        assert!(!query.contains("countIf(event = 'inquiry_form_viewed') > 0"));

        // three products, a PDF, form viewed and then abandoned
        let row = vec![
            json!("u-abandoned"),
            json!(3),
            json!(1),
            json!(120),
            json!(40),
            json!(false),
            json!(false),
            json!(true),
        ];
        let lead = lead_from_row(&row).unwrap();
        assert_eq!(lead.classification.score, 9);
        assert!(lead.classification.lost);
    }

    #[tokio::test]
    async fn distribution_pages_past_the_row_limit() {
        let full_page: Vec<Value> = (0..BEHAVIOR_ROW_LIMIT)
            .map(|i| json!([format!("u-{i}"), 5, 1, 400, 90, true, false, false]))
            .collect();
        let transport = RoutedTransport::new(vec![
            ("OFFSET 500", behavior_rows()),
            ("OFFSET 0", Value::Array(full_page)),
        ]);
        let source = source(transport.clone());

        let series = source
            .lead_type_distribution(DateRange::days(30))
            .await
            .unwrap();
        let total: f64 = series.data.iter().sum();
        assert_eq!(total, (BEHAVIOR_ROW_LIMIT + 3) as f64);
        assert_eq!(series.data[0], (BEHAVIOR_ROW_LIMIT + 1) as f64);

        let queries = transport.queries();
        assert_eq!(queries.len(), 2);
        assert!(queries[0].contains("LIMIT 500 OFFSET 0"));
        assert!(queries[1].contains("LIMIT 500 OFFSET 500"));
    }

    #[tokio::test]
    async fn shapes_product_and_seo_insights() {
        let transport = RoutedTransport::new(vec![
            (
                "any(properties.brand)",
                json!([["Alpha Monitor", "MedBrand", 1284, 42], ["Beta Scanner", null, 812, "39"]]),
            ),
            ("AS url", json!([["/products/x", 400, 18], ["/pricing", 100, 0]])),
        ]);
        let insights = source(transport).insights().await.unwrap();

        assert_eq!(insights.products[0].attention_to_inquiry_ratio, 30.6);
        assert_eq!(insights.products[0].flags, "High attention, low inquiries");
        assert_eq!(insights.products[1].brand, "");
        assert!(insights.products[1].flags.is_empty());

        assert_eq!(insights.seo[0].conversion_rate, 4.5);
        assert_eq!(insights.seo[0].suggestions, "Add H1; improve LCP");
        assert_eq!(insights.seo[1].conversion_rate, 0.0);
        assert!(insights.seo[1].suggestions.is_empty());
    }

    #[tokio::test]
    async fn classifies_live_visitors_into_distribution() {
        let transport = RoutedTransport::new(vec![("GROUP BY distinct_id", behavior_rows())]);
        let source = source(transport.clone());

        let series = source
            .lead_type_distribution(DateRange::days(30))
            .await
            .unwrap();
        assert_eq!(series.labels, vec!["Hot", "Warm", "Cold", "Disengaged", "Lost"]);
        assert_eq!(series.data, vec![1.0, 0.0, 0.0, 1.0, 1.0]);

        let lost = source.lost_leads().await.unwrap();
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].id, "u-lost");

        let recent = source
            .recent_leads(PageRequest::new(Some(1), Some(2)))
            .await
            .unwrap();
        assert_eq!(recent.total, 3);
        assert_eq!(recent.items.len(), 2);
        assert_eq!(transport.queries().len(), 3);
    }

    #[tokio::test]
    async fn computes_kpis_from_three_queries() {
        let transport = RoutedTransport::new(vec![
            ("GROUP BY distinct_id", behavior_rows()),
            (
                "countIf(event = 'inquiry_submitted' AND",
                json!({ "results": [[10, 5, 200, 100, 40, 20, 10, 10]] }),
            ),
        ]);
        let kpis = source(transport.clone())
            .kpis(DateRange::days(7))
            .await
            .unwrap();
        assert_eq!(kpis[0].value, 10.0);
        assert_eq!(kpis[0].delta, 100.0);
        assert_eq!(kpis[3].value, 1.0);
        assert_eq!(transport.queries().len(), 3);
    }

    #[tokio::test]
    async fn shapes_traffic_and_funnel() {
        let transport = RoutedTransport::new(vec![
            (
                "AS s, count() AS c",
                json!({ "results": [{ "results": [["Organic", 56], [null, "8"]] }] }),
            ),
            ("uniqIf", json!({ "results": [100, 60, "30", 10, 4] })),
        ]);
        let source = source(transport);

        let traffic = source.traffic_sources(DateRange::default()).await.unwrap();
        assert_eq!(traffic.labels, vec!["Organic", "Direct"]);
        assert_eq!(traffic.data, vec![56.0, 8.0]);

        let funnel = source.funnel(DateRange::default()).await.unwrap();
        assert_eq!(funnel.len(), 5);
        assert_eq!(funnel[0].stage, "Visited");
        assert_eq!(funnel[2].count, 30);
        assert_eq!(funnel[4].count, 4);
    }

    #[tokio::test]
    async fn shapes_tables_and_falls_back_for_untracked_groups() {
        let transport = RoutedTransport::new(vec![
            ("GROUP BY distinct_id", behavior_rows()),
            (
                "properties.product AS p",
                json!([["Alpha Monitor", 200, 50, 10]]),
            ),
            ("AS url", json!([["/products/x", 400, 18]])),
            (
                "formatDateTime",
                json!([["u-hot", "pdf_opened", "/products/x", "12:41"]]),
            ),
        ]);
        let tables = source(transport).tables().await.unwrap();

        assert_eq!(tables.top_products[0].attention_pct, 25.0);
        assert_eq!(tables.top_products[0].inquiry_pct, 5.0);
        assert_eq!(tables.top_landing_pages[0].conversion_rate, 4.5);
        assert_eq!(tables.live_actions[0].action, "Opened PDF");
        assert_eq!(tables.lost_leads.len(), 1);
        assert!(!tables.seo_keywords.is_empty());
        assert!(!tables.perf_issues.is_empty());
    }

    #[tokio::test]
    async fn failed_group_query_surfaces_error() {
        let transport = RoutedTransport::new(Vec::new());
        let err = source(transport)
            .traffic_sources(DateRange::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ClientError { status: 400, .. }));
    }

    #[tokio::test]
    async fn finds_a_single_lead() {
        let transport = RoutedTransport::new(vec![("GROUP BY distinct_id", behavior_rows())]);
        let source = source(transport.clone());
        let lead = source.lead("u-cold").await.unwrap().unwrap();
        assert_eq!(lead.device, "Mobile");
        assert!(transport.queries()[0].contains("distinct_id = 'u-cold'"));
        assert!(source.lead("missing").await.unwrap().is_none());

        let raw = source.raw_query("SELECT distinct_id".into()).await.unwrap_err();
        assert!(matches!(raw, AppError::ClientError { .. }));
    }
}
