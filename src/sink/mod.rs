//! Best-effort fan-out of tracked events.
//!
//! Every event goes to three independent destinations: the injected tag
//! transport, the first-party collector and the local ring buffer. A failure in
//! one never affects the others and nothing is reported to the caller.

pub mod collector;
pub mod store;
pub mod transport;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::FunnelEvent;

pub use collector::{Collector, HttpCollector, NoopCollector};
pub use store::{LocalStore, MemoryStore};
pub use transport::{AnalyticsTransport, LogTransport, NoopTransport};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

pub const MAX_SCROLL_DEPTH_KEY: &str = "maxScrollDepth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Funnel,
    Experiment,
    Scroll,
    Section,
}

impl Channel {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Channel::Funnel => "/api/analytics/events",
            Channel::Experiment => "/api/analytics/ab-tests",
            Channel::Scroll => "/api/analytics/scroll-depth",
            Channel::Section => "/api/analytics/section-views",
        }
    }

    pub fn storage_key(&self) -> &'static str {
        match self {
            Channel::Funnel => "conversion_events",
            Channel::Experiment => "ab_test_events",
            Channel::Scroll | Channel::Section => "scroll_events",
        }
    }

    fn cap(&self, caps: &BufferCaps) -> usize {
        match self {
            Channel::Funnel => caps.conversion_events,
            Channel::Experiment => caps.ab_test_events,
            Channel::Scroll | Channel::Section => caps.scroll_events,
        }
    }
}

/// Ring-buffer limits per storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferCaps {
    pub ab_test_events: usize,
    pub conversion_events: usize,
    pub scroll_events: usize,
}

impl Default for BufferCaps {
    fn default() -> Self {
        Self {
            ab_test_events: 100,
            conversion_events: 100,
            scroll_events: 50,
        }
    }
}

pub struct EventSink {
    transport: Arc<dyn AnalyticsTransport>,
    collector: Arc<dyn Collector>,
    store: Arc<dyn LocalStore>,
    caps: BufferCaps,
    failures: AtomicU64,
}

impl EventSink {
    pub fn new(collector: Arc<dyn Collector>, store: Arc<dyn LocalStore>) -> Self {
        Self {
            transport: Arc::new(NoopTransport),
            collector,
            store,
            caps: BufferCaps::default(),
            failures: AtomicU64::new(0),
        }
    }

    /// Sink with no remote delivery and a throwaway in-memory buffer.
    pub fn detached() -> Self {
        Self::new(Arc::new(NoopCollector), Arc::new(MemoryStore::new()))
    }

    pub fn with_transport(mut self, transport: Arc<dyn AnalyticsTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_caps(mut self, caps: BufferCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn send(&self, channel: Channel, event: &FunnelEvent) {
        if let Err(err) = self.transport.emit(&event.event, &event.tag_params()) {
            self.record_failure();
            log_warn!("analytics tag rejected '{}': {err:#}", event.event);
        }

        let body = match serde_json::to_value(event) {
            Ok(body) => body,
            Err(err) => {
                self.record_failure();
                log_error!("failed to serialize '{}': {err}", event.event);
                return;
            }
        };

        if let Err(err) = self.collector.post(channel.endpoint(), body.clone()) {
            self.record_failure();
            log_warn!("failed to queue '{}' for {}: {err:#}", event.event, channel.endpoint());
        }

        if let Err(err) = self
            .store
            .append(channel.storage_key(), body, channel.cap(&self.caps))
        {
            self.record_failure();
            log_warn!("failed to buffer '{}' locally: {err:#}", event.event);
        }
    }

    pub fn set_scalar(&self, key: &str, value: Value) {
        if let Err(err) = self.store.set_scalar(key, value) {
            self.record_failure();
            log_warn!("failed to store '{key}': {err:#}");
        }
    }

    /// Deliveries that were dropped since construction.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}
