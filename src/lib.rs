//! Lead analytics core: behavioral lead scoring, a retrying analytics query
//! client and the cached dashboard facade built on top of them.

pub mod cache;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod live;
pub mod mock;
pub mod models;
pub mod query;
pub mod scoring;
pub mod source;
pub mod telemetry;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use cache::{CacheState, Loaded, Origin};
pub use config::{AppConfig, DataMode, EventCatalog};
pub use dashboard::{CacheTtls, Dashboard, DashboardSnapshot};
pub use errors::{AppError, AppResult};
pub use query::{QueryClient, QueryPayload, QueryResult, RetryPolicy};
pub use scoring::{classify, BehavioralRecord, LeadClassification, LeadType};
pub use source::DataSource;
pub use telemetry::TelemetryClient;

/// Installs the global subscriber once. Logs go to stderr so command output
/// on stdout stays machine readable.
pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,leadscope=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
