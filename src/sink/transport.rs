use anyhow::Result;
use serde_json::Value;

/// Third-party tag capability (the `gtag`-style global on the page).
///
/// Injected by the host rather than looked up on the page. Hosts without a tag use
/// [`NoopTransport`].
pub trait AnalyticsTransport: Send + Sync {
    fn emit(&self, event_name: &str, params: &Value) -> Result<()>;
}

pub struct NoopTransport;

impl AnalyticsTransport for NoopTransport {
    fn emit(&self, _event_name: &str, _params: &Value) -> Result<()> {
        Ok(())
    }
}

/// Writes tag calls to the `analytics_tag` log target. Used by the replay binary.
pub struct LogTransport;

impl AnalyticsTransport for LogTransport {
    fn emit(&self, event_name: &str, params: &Value) -> Result<()> {
        log::info!(target: "analytics_tag", "{event_name} {params}");
        Ok(())
    }
}
