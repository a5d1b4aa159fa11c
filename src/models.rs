use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::scoring::{BehavioralRecord, LeadClassification, LeadType};

const DEFAULT_RANGE_DAYS: u32 = 7;
const MAX_RANGE_DAYS: u32 = 365;
const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;
const LOW_INQUIRY_RATIO: f64 = 25.0;
const LOW_INQUIRY_FLAG: &str = "High attention, low inquiries";

/// Trailing window such as `7d` or `30d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateRange {
    days: u32,
}

impl DateRange {
    pub fn days(days: u32) -> Self {
        Self {
            days: days.clamp(1, MAX_RANGE_DAYS),
        }
    }

    pub fn num_days(&self) -> u32 {
        self.days
    }
}

impl Default for DateRange {
    fn default() -> Self {
        Self::days(DEFAULT_RANGE_DAYS)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.days)
    }
}

impl FromStr for DateRange {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().to_ascii_lowercase();
        let digits = trimmed.strip_suffix('d').unwrap_or(&trimmed);
        match digits.parse::<u32>() {
            Ok(days) if (1..=MAX_RANGE_DAYS).contains(&days) => Ok(Self { days }),
            _ => Err(AppError::Config(format!("invalid date range: {value}"))),
        }
    }
}

impl TryFrom<String> for DateRange {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DateRange> for String {
    fn from(value: DateRange) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(page: Option<usize>, limit: Option<usize>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    /// Slices an already materialized list down to this page.
    pub fn slice<T: Clone>(&self, all: &[T]) -> Page<T> {
        let start = self.offset().min(all.len());
        let end = start.saturating_add(self.limit).min(all.len());
        Page {
            items: all[start..end].to_vec(),
            total: all.len(),
            page: self.page,
            limit: self.limit,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Kpi {
    pub key: String,
    pub title: String,
    pub value: f64,
    pub delta: f64,
}

impl Kpi {
    pub fn new(key: &str, title: &str, value: f64, delta: f64) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            value,
            delta,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub data: Vec<f64>,
}

impl ChartSeries {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut series = Self::default();
        for (label, value) in pairs {
            series.labels.push(label.into());
            series.data.push(value);
        }
        series
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelStep {
    pub stage: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCharts {
    pub lead_type_distribution: ChartSeries,
    pub traffic_sources: ChartSeries,
    pub funnel: Vec<FunnelStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    pub product: String,
    pub views: u64,
    pub attention_pct: f64,
    pub inquiry_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LandingPage {
    pub url: String,
    pub sessions: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LostLead {
    pub id: String,
    pub products_viewed: u32,
    pub time_on_site_seconds: u64,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveAction {
    pub visitor: String,
    pub action: String,
    pub page: String,
    pub at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoKeyword {
    pub keyword: String,
    pub sessions: u64,
    pub inquiries: u64,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfIssue {
    pub page: String,
    pub metric: String,
    pub value: f64,
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardTables {
    pub top_products: Vec<TopProduct>,
    pub top_landing_pages: Vec<LandingPage>,
    pub lost_leads: Vec<LostLead>,
    pub live_actions: Vec<LiveAction>,
    pub seo_keywords: Vec<SeoKeyword>,
    pub perf_issues: Vec<PerfIssue>,
}

/// Views per inquiry for one product. A ratio above 25 gets flagged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductInsight {
    pub product: String,
    pub brand: String,
    pub views: u64,
    pub inquiries: u64,
    pub attention_to_inquiry_ratio: f64,
    pub flags: String,
}

impl ProductInsight {
    /// With no inquiries at all the ratio is the raw view count.
    pub fn new(
        product: impl Into<String>,
        brand: impl Into<String>,
        views: u64,
        inquiries: u64,
    ) -> Self {
        let ratio = (views as f64 / inquiries.max(1) as f64 * 10.0).round() / 10.0;
        let flags = if ratio > LOW_INQUIRY_RATIO {
            LOW_INQUIRY_FLAG.to_string()
        } else {
            String::new()
        };
        Self {
            product: product.into(),
            brand: brand.into(),
            views,
            inquiries,
            attention_to_inquiry_ratio: ratio,
            flags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoInsight {
    pub landing_page: String,
    pub sessions: u64,
    pub inquiries: u64,
    pub conversion_rate: f64,
    pub suggestions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardInsights {
    pub products: Vec<ProductInsight>,
    pub seo: Vec<SeoInsight>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSummary {
    pub id: String,
    pub score: u8,
    #[serde(rename = "type")]
    pub lead_type: LeadType,
    pub lost: bool,
    pub products_viewed: u32,
    pub pdfs_opened: u32,
    pub last_activity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub t: String,
    pub a: String,
}

/// A visitor with the signals that were scored and the resulting class.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    #[serde(flatten)]
    pub record: BehavioralRecord,
    #[serde(flatten)]
    pub classification: LeadClassification,
    pub source: String,
    pub device: String,
    pub first_seen: String,
    pub last_seen: String,
    pub last_action: String,
    pub timeline: Vec<TimelineEntry>,
}

impl Lead {
    pub fn summary(&self) -> LeadSummary {
        LeadSummary {
            id: self.id.clone(),
            score: self.classification.score,
            lead_type: self.classification.lead_type,
            lost: self.classification.lost,
            products_viewed: self.record.products_viewed,
            pdfs_opened: self.record.pdfs_opened,
            last_activity: self.last_seen.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadFilter {
    pub query: Option<String>,
    pub lead_type: Option<LeadType>,
    pub source: Option<String>,
    pub page: PageRequest,
}

impl LeadFilter {
    pub fn matches(&self, lead: &Lead) -> bool {
        if let Some(query) = self.query.as_deref().filter(|q| !q.is_empty()) {
            if !lead.id.contains(query) {
                return false;
            }
        }
        if let Some(lead_type) = self.lead_type {
            if lead.classification.lead_type != lead_type {
                return false;
            }
        }
        if let Some(source) = self.source.as_deref().filter(|s| !s.is_empty()) {
            if !lead.source.eq_ignore_ascii_case(source) {
                return false;
            }
        }
        true
    }
}
