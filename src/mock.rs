use async_trait::async_trait;

use crate::config::DataMode;
use crate::errors::AppResult;
use crate::models::{
    ChartSeries, DateRange, FunnelStep, Kpi, LandingPage, Lead, LeadFilter, LeadSummary,
    LiveAction, LostLead, Page, PageRequest, PerfIssue, ProductInsight, SeoInsight, SeoKeyword,
    TimelineEntry, TopProduct,
};
use crate::scoring::{classify, BehavioralRecord};
use crate::source::{self, DataSource, FUNNEL_STAGES};

const LEAD_POOL_SIZE: u32 = 320;
const RECENT_LEAD_COUNT: usize = 75;
const LOST_LEAD_ROWS: usize = 10;
const LIVE_ACTION_ROWS: usize = 8;
const LEAD_ID_BASE: u32 = 1000;

const SOURCES: [&str; 4] = ["Organic", "Paid", "Referral", "Email"];
const DEVICES: [&str; 2] = ["Desktop", "Mobile"];
const ACTIONS: [&str; 3] = ["Viewed product", "Opened PDF", "Reached form"];
const PAGES: [&str; 3] = ["/products/x", "/brands/y", "/contact"];

/// Deterministic stand-in for the analytics backend. Same input, same output,
/// every run.
pub struct MockDataSource {
    leads: Vec<Lead>,
}

impl MockDataSource {
    pub fn new() -> Self {
        Self {
            leads: (1..=LEAD_POOL_SIZE).map(make_lead).collect(),
        }
    }

    pub fn leads(&self) -> &[Lead] {
        &self.leads
    }
}

impl Default for MockDataSource {
    fn default() -> Self {
        Self::new()
    }
}

pub fn make_lead(i: u32) -> Lead {
    let idx = i as usize;
    let record = BehavioralRecord {
        products_viewed: (i % 7) + 1,
        pdfs_opened: i % 3,
        time_on_site_seconds: 90 + u64::from(i % 6) * 45,
        scroll_depth: f64::from((50 + i % 60).min(100)),
        reached_inquiry_form: i % 4 == 0,
        bounced_within_15s: i % 13 == 0,
        exited_on_form_step: i % 5 == 0,
    };
    let classification = classify(&record);
    Lead {
        id: format!("L-{}", LEAD_ID_BASE + i),
        record,
        classification,
        source: SOURCES[idx % SOURCES.len()].to_string(),
        device: DEVICES[idx % DEVICES.len()].to_string(),
        first_seen: "2025-07-01".to_string(),
        last_seen: format!("2025-08-{:02} 12:3{}", (i % 27) + 1, i % 10),
        last_action: ACTIONS[idx % ACTIONS.len()].to_string(),
        timeline: vec![
            TimelineEntry {
                t: "Today".into(),
                a: "Viewed product".into(),
            },
            TimelineEntry {
                t: "1d".into(),
                a: "Opened PDF".into(),
            },
        ],
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    fn mode(&self) -> DataMode {
        DataMode::Mock
    }

    async fn kpis(&self, _range: DateRange) -> AppResult<Vec<Kpi>> {
        Ok(vec![
            Kpi::new("inquiries", "Total Inquiries", 193_000.0, 35.0),
            Kpi::new("conversion", "Conversion Rate", 4.2, 0.3),
            Kpi::new("dropoff", "Drop-Off Rate", 24.0, -2.0),
            Kpi::new("hot", "Hot Leads", 563.0, 12.0),
        ])
    }

    async fn lead_type_distribution(&self, _range: DateRange) -> AppResult<ChartSeries> {
        Ok(source::lead_type_distribution(
            self.leads.iter().map(|lead| &lead.classification),
        ))
    }

    async fn traffic_sources(&self, _range: DateRange) -> AppResult<ChartSeries> {
        Ok(ChartSeries::from_pairs([
            ("Organic", 56.0),
            ("Paid", 24.0),
            ("Referral", 12.0),
            ("Direct", 8.0),
        ]))
    }

    async fn funnel(&self, _range: DateRange) -> AppResult<Vec<FunnelStep>> {
        Ok(FUNNEL_STAGES
            .into_iter()
            .zip([12_400, 6_100, 2_300, 940, 410])
            .map(|(stage, count)| FunnelStep {
                stage: stage.to_string(),
                count,
            })
            .collect())
    }

    async fn recent_leads(&self, page: PageRequest) -> AppResult<Page<LeadSummary>> {
        let recent: Vec<LeadSummary> = self
            .leads
            .iter()
            .take(RECENT_LEAD_COUNT)
            .map(Lead::summary)
            .collect();
        Ok(page.slice(&recent))
    }

    async fn top_products(&self) -> AppResult<Vec<TopProduct>> {
        Ok(vec![
            TopProduct {
                product: "Alpha Monitor".into(),
                views: 1284,
                attention_pct: 62.0,
                inquiry_pct: 12.0,
            },
            TopProduct {
                product: "Beta Scanner".into(),
                views: 812,
                attention_pct: 48.0,
                inquiry_pct: 9.0,
            },
        ])
    }

    async fn top_landing_pages(&self) -> AppResult<Vec<LandingPage>> {
        Ok(vec![
            LandingPage {
                url: "/products/x".into(),
                sessions: 1234,
                conversion_rate: 4.5,
            },
            LandingPage {
                url: "/brands/y".into(),
                sessions: 934,
                conversion_rate: 3.3,
            },
        ])
    }

    async fn lost_leads(&self) -> AppResult<Vec<LostLead>> {
        Ok(self
            .leads
            .iter()
            .filter(|lead| lead.classification.lost)
            .take(LOST_LEAD_ROWS)
            .map(|lead| LostLead {
                id: lead.id.clone(),
                products_viewed: lead.record.products_viewed,
                time_on_site_seconds: lead.record.time_on_site_seconds,
                score: lead.classification.score,
            })
            .collect())
    }

    async fn live_actions(&self) -> AppResult<Vec<LiveAction>> {
        Ok(self
            .leads
            .iter()
            .take(LIVE_ACTION_ROWS)
            .enumerate()
            .map(|(idx, lead)| LiveAction {
                visitor: lead.id.clone(),
                action: lead.last_action.clone(),
                page: PAGES[idx % PAGES.len()].to_string(),
                at: format!("12:{:02}", 59 - idx * 3),
            })
            .collect())
    }

    async fn seo_keywords(&self) -> AppResult<Vec<SeoKeyword>> {
        Ok(vec![
            SeoKeyword {
                keyword: "patient monitor".into(),
                sessions: 1234,
                inquiries: 56,
                conversion_rate: 4.5,
            },
            SeoKeyword {
                keyword: "portable ultrasound scanner".into(),
                sessions: 934,
                inquiries: 31,
                conversion_rate: 3.3,
            },
        ])
    }

    async fn perf_issues(&self) -> AppResult<Vec<PerfIssue>> {
        Ok(vec![
            PerfIssue {
                page: "/products/x".into(),
                metric: "LCP".into(),
                value: 3.8,
                suggestion: "Add H1; improve LCP".into(),
            },
            PerfIssue {
                page: "/brands/y".into(),
                metric: "CLS".into(),
                value: 0.21,
                suggestion: "Reduce CLS; optimize images".into(),
            },
        ])
    }

    async fn product_insights(&self) -> AppResult<Vec<ProductInsight>> {
        Ok(vec![
            ProductInsight::new("Alpha Monitor", "MedBrand", 1284, 42),
            ProductInsight::new("Beta Scanner", "ScanPro", 812, 39),
        ])
    }

    async fn seo_insights(&self) -> AppResult<Vec<SeoInsight>> {
        Ok(vec![
            SeoInsight {
                landing_page: "/products/x".into(),
                sessions: 1234,
                inquiries: 56,
                conversion_rate: 4.5,
                suggestions: "Add H1; improve LCP".into(),
            },
            SeoInsight {
                landing_page: "/brands/y".into(),
                sessions: 934,
                inquiries: 31,
                conversion_rate: 3.3,
                suggestions: "Reduce CLS; optimize images".into(),
            },
        ])
    }

    async fn list_leads(&self, filter: &LeadFilter) -> AppResult<Page<Lead>> {
        let matching: Vec<Lead> = self
            .leads
            .iter()
            .filter(|lead| filter.matches(lead))
            .cloned()
            .collect();
        Ok(filter.page.slice(&matching))
    }

    async fn lead(&self, id: &str) -> AppResult<Option<Lead>> {
        let Some(number) = id
            .rsplit('-')
            .next()
            .and_then(|tail| tail.trim().parse::<u32>().ok())
        else {
            return Ok(None);
        };
        let Some(i) = number.checked_sub(LEAD_ID_BASE + 1) else {
            return Ok(None);
        };
        Ok(self.leads.get(i as usize).cloned())
    }
}
