use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::{AppConfig, PublicAppConfig};
use crate::dashboard::{CacheSnapshot, Dashboard};
use crate::errors::{AppError, AppResult};
use crate::models::{DateRange, LeadFilter, PageRequest};
use crate::scoring::{BehavioralRecord, LeadType};

#[derive(Debug, Parser)]
#[command(name = "leadscope", version)]
#[command(about = "Lead scoring and cached analytics dashboard data")]
pub struct Cli {
    /// Trailing window such as 7d or 30d.
    #[arg(long, global = true, default_value_t = DateRange::default())]
    pub range: DateRange,
    #[arg(long, global = true)]
    pub page: Option<usize>,
    #[arg(long, global = true)]
    pub limit: Option<usize>,
    /// Refetch even when the cached section is fresh.
    #[arg(short, long, global = true, default_value_t = false)]
    pub force: bool,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// Every dashboard section (default).
    Snapshot,
    Kpis,
    Charts,
    Tables,
    /// Product attention and landing-page suggestions.
    Insights,
    Recent,
    /// Filtered lead list.
    Leads(LeadArgs),
    /// One lead with its timeline.
    Lead { id: String },
    /// Score a behavioral record given as JSON.
    Classify {
        #[arg(value_parser = parse_record)]
        record: BehavioralRecord,
    },
    /// Raw HogQL, live mode only.
    Query {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        query: Vec<String>,
    },
    /// Effective configuration and cache state.
    Config,
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
pub struct LeadArgs {
    /// hot, warm, cold or disengaged.
    #[arg(long = "type")]
    pub lead_type: Option<LeadType>,
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub search: Option<String>,
}

impl Cli {
    fn page_request(&self) -> PageRequest {
        PageRequest::new(self.page, self.limit)
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub config: PublicAppConfig,
    pub telemetry_buffer_path: Option<String>,
    pub telemetry_pending: usize,
    pub cache: CacheSnapshot,
}

fn parse_record(raw: &str) -> Result<BehavioralRecord, serde_json::Error> {
    serde_json::from_str(raw)
}

pub async fn execute(dashboard: &Dashboard, config: &AppConfig, cli: &Cli) -> AppResult<Value> {
    let range = cli.range;
    let force = cli.force;
    let value = match cli.command.as_ref().unwrap_or(&Command::Snapshot) {
        Command::Snapshot => serde_json::to_value(dashboard.fetch_all(range, force).await)?,
        Command::Kpis => serde_json::to_value(dashboard.fetch_kpis(range, force).await)?,
        Command::Charts => serde_json::to_value(dashboard.fetch_charts(range, force).await)?,
        Command::Tables => serde_json::to_value(dashboard.fetch_tables(force).await)?,
        Command::Insights => serde_json::to_value(dashboard.fetch_insights(force).await)?,
        Command::Recent => serde_json::to_value(
            dashboard
                .fetch_recent_leads(cli.page_request(), force)
                .await,
        )?,
        Command::Leads(args) => {
            let filter = LeadFilter {
                query: args.search.clone(),
                lead_type: args.lead_type,
                source: args.source.clone(),
                page: cli.page_request(),
            };
            serde_json::to_value(dashboard.list_leads(&filter).await?)?
        }
        Command::Lead { id } => match dashboard.lead(id).await? {
            Some(lead) => serde_json::to_value(lead)?,
            None => return Err(AppError::Config(format!("lead {id} not found"))),
        },
        Command::Classify { record } => serde_json::to_value(dashboard.classify(record))?,
        Command::Query { query } => {
            let result = dashboard.fetch(query.join(" ")).await?;
            json!({ "rows": result.rows })
        }
        Command::Config => serde_json::to_value(health_report(dashboard, config))?,
    };
    Ok(value)
}

pub fn health_report(dashboard: &Dashboard, config: &AppConfig) -> HealthReport {
    let telemetry = dashboard.telemetry();
    HealthReport {
        config: config.public_profile(),
        telemetry_buffer_path: telemetry
            .buffer_path()
            .map(|path| path.to_string_lossy().to_string()),
        telemetry_pending: telemetry.pending_depth(),
        cache: dashboard.snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::CommandFactory;

    use super::*;
    use crate::cache::SystemClock;
    use crate::dashboard::CacheTtls;
    use crate::mock::MockDataSource;
    use crate::telemetry::TelemetryClient;

    fn parse(line: &str) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("leadscope").chain(line.split_whitespace()))
    }

    fn mock_dashboard() -> Dashboard {
        Dashboard::new(
            Arc::new(MockDataSource::new()),
            TelemetryClient::in_memory(),
            CacheTtls::default(),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_to_snapshot() {
        let cli = parse("").unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.range, DateRange::default());
        assert!(!cli.force);
    }

    #[test]
    fn parses_global_flags_around_the_subcommand() {
        let cli = parse("--range 30d recent --page 2 --limit 5 --force").unwrap();
        assert_eq!(cli.command, Some(Command::Recent));
        assert_eq!(cli.range.num_days(), 30);
        assert_eq!(cli.page_request(), PageRequest::new(Some(2), Some(5)));
        assert!(cli.force);

        let cli = parse("leads --type hot --source Paid").unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Leads(LeadArgs {
                lead_type: Some(LeadType::Hot),
                source: Some("Paid".into()),
                search: None,
            }))
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("lead").is_err());
        assert!(parse("kpis --range soon").is_err());
        assert!(parse("kpis --page").is_err());
        assert!(parse("kpis --page two").is_err());
        assert!(parse("leads --type lukewarm").is_err());
        assert!(parse("kpis --verbose").is_err());
        assert!(parse("explode").is_err());
        assert!(parse("kpis extra").is_err());
        assert!(parse("query").is_err());
        assert!(parse("classify {not-json}").is_err());
    }

    #[test]
    fn parses_classify_payload_and_raw_query() {
        let cli = Cli::try_parse_from([
            "leadscope",
            "classify",
            r#"{"productsViewed":3,"exitOnFormStep":true}"#,
        ])
        .unwrap();
        match cli.command {
            Some(Command::Classify { record }) => {
                assert_eq!(record.products_viewed, 3);
                assert!(record.exited_on_form_step);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = parse("query SELECT count() FROM events").unwrap();
        match cli.command {
            Some(Command::Query { query }) => {
                assert_eq!(query.join(" "), "SELECT count() FROM events")
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn executes_against_mock_dashboard() {
        let dashboard = mock_dashboard();
        let config = AppConfig::default();

        let value = execute(&dashboard, &config, &parse("kpis").unwrap())
            .await
            .unwrap();
        assert_eq!(value["origin"], "live");
        assert_eq!(value["payload"][0]["title"], "Total Inquiries");

        let classify = Cli::try_parse_from([
            "leadscope",
            "classify",
            r#"{"productsViewed":3,"exitOnFormStep":true}"#,
        ])
        .unwrap();
        let value = execute(&dashboard, &config, &classify).await.unwrap();
        assert_eq!(value, json!({ "score": 6, "type": "Warm", "lost": true }));

        let value = execute(&dashboard, &config, &parse("lead L-1002").unwrap())
            .await
            .unwrap();
        assert_eq!(value["id"], "L-1002");
        assert!(value["productsViewed"].is_number());

        let missing = execute(&dashboard, &config, &parse("lead L-9").unwrap()).await;
        assert!(missing.is_err());

        let value = execute(&dashboard, &config, &parse("insights").unwrap())
            .await
            .unwrap();
        assert_eq!(value["payload"]["products"][0]["brand"], "MedBrand");

        let value = execute(&dashboard, &config, &parse("config").unwrap())
            .await
            .unwrap();
        assert_eq!(value["config"]["has_api_token"], false);
        assert_eq!(value["cache"]["groups"][0]["state"], "fresh");
    }
}
