pub mod bucketing;
pub mod db;
pub mod experiments;
pub mod funnel;
pub mod models;
pub mod page;
pub mod replay;
pub mod settings;
pub mod sink;
pub mod utils;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::warn;
use tokio::runtime::{Handle, Runtime};

use db::{Database, SessionSummary};
use experiments::ExperimentRegistry;
use replay::{replay, ReplayOutcome, VisitScript};
use settings::{AnalyticsSettings, SettingsStore};
use sink::{Collector, EventSink, HttpCollector, LogTransport, NoopCollector};

pub use experiments::{analyze, calculate_significance, AbTestManager};
pub use funnel::{FunnelTracker, ScrollDepthTracker, SectionVisibilityTracker};
pub use models::{EventName, FunnelEvent, Session};

const DEFAULT_SETTINGS_FILE: &str = "analytics-settings.json";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Everything a visit needs that outlives the visit itself.
pub struct AppState {
    pub settings: AnalyticsSettings,
    pub registry: Arc<ExperimentRegistry>,
    pub db: Database,
    pub sink: Arc<EventSink>,
    /// Present when remote delivery is enabled; flushed before shutdown.
    http: Option<Arc<HttpCollector>>,
}

impl AppState {
    /// `handle` is the runtime remote posts are spawned on.
    pub fn build(settings: AnalyticsSettings, handle: Handle) -> Result<Self> {
        let registry = Arc::new(load_registry(settings.experiments_path.as_deref())?);

        let db = match &settings.database_path {
            Some(path) => Database::new(path.clone())?,
            None => Database::open_in_memory()?,
        };

        let http = if settings.remote_enabled {
            Some(Arc::new(HttpCollector::new(&settings.collector_url, handle)?))
        } else {
            None
        };
        let collector: Arc<dyn Collector> = match &http {
            Some(http) => Arc::clone(http) as Arc<dyn Collector>,
            None => Arc::new(NoopCollector),
        };

        let mut sink = EventSink::new(collector, Arc::new(db.clone())).with_caps(settings.buffer_caps);
        if settings.tag_enabled {
            sink = sink.with_transport(Arc::new(LogTransport));
        }

        Ok(Self {
            settings,
            registry,
            db,
            sink: Arc::new(sink),
            http,
        })
    }

    /// Wait up to `grace` for collector posts still in flight.
    pub async fn flush(&self, grace: Duration) -> bool {
        match &self.http {
            Some(http) => http.flush(grace).await,
            None => true,
        }
    }

    pub fn replay(&self, script: &VisitScript) -> ReplayOutcome {
        replay(
            script,
            &self.settings,
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
        )
    }

    pub async fn record_summary(&self, outcome: &ReplayOutcome) -> Result<()> {
        let summary = SessionSummary::from_report(
            &outcome.session,
            &outcome.report,
            outcome.max_scroll_depth,
        );
        self.db.upsert_session_summary(&summary).await
    }
}

fn load_registry(path: Option<&Path>) -> Result<ExperimentRegistry> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read experiments from {}", path.display()))?;
            ExperimentRegistry::from_json(&raw)
                .with_context(|| format!("invalid experiment catalog {}", path.display()))
        }
        None => ExperimentRegistry::builtin(),
    }
}

/// `landing-analytics <visit.json> [settings.json]`
pub fn run() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let script_path = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("usage: landing-analytics <visit.json> [settings.json]"))?;
    let settings_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

    let store = SettingsStore::new(settings_path)?;
    let settings = store.settings().with_env_overrides();

    // Initialize logging (reads RUST_LOG env var)
    let level = if settings.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env().filter_level(level).init();

    log::info!("landing-analytics starting up...");
    if let Some(warning) = store.load_warning() {
        warn!("{warning}");
    }

    let script = VisitScript::from_path(&script_path)?;
    let runtime = Runtime::new().context("failed to start async runtime")?;
    let state = AppState::build(settings, runtime.handle().clone())?;

    let outcome = state.replay(&script);

    if let Err(err) = runtime.block_on(state.record_summary(&outcome)) {
        warn!("Failed to persist session summary: {err:#}");
    }

    let failures = state.sink.failures();
    if failures > 0 {
        warn!("{failures} analytics deliveries failed during the visit");
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !runtime.block_on(state.flush(SHUTDOWN_GRACE)) {
        warn!(
            "Collector posts still pending after {}s; abandoning them",
            SHUTDOWN_GRACE.as_secs()
        );
    }
    runtime.shutdown_background();
    Ok(())
}
