use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::{json, Value};

use crate::{
    models::{EventName, Properties, ScrollMilestone},
    page::{ListenerId, PagePort, PageSignal},
    sink::{EventSink, MAX_SCROLL_DEPTH_KEY},
};

use super::FunnelTracker;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPhase {
    Idle,
    Tracking,
    Finalized,
}

/// Why the session's scroll tracking ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    Hidden,
    Unload,
}

impl FinalizeReason {
    fn as_str(&self) -> &'static str {
        match self {
            FinalizeReason::Hidden => "visibility_hidden",
            FinalizeReason::Unload => "unload",
        }
    }
}

pub struct ScrollDepthTracker {
    page: Arc<dyn PagePort>,
    sink: Arc<EventSink>,
    throttle: Duration,
    phase: ScrollPhase,
    /// Never decreases.
    max_depth: u8,
    last_handled: Option<Instant>,
    listeners: Vec<ListenerId>,
}

impl ScrollDepthTracker {
    pub fn new(page: Arc<dyn PagePort>, sink: Arc<EventSink>, throttle: Duration) -> Self {
        Self {
            page,
            sink,
            throttle,
            phase: ScrollPhase::Idle,
            max_depth: 0,
            last_handled: None,
            listeners: Vec::new(),
        }
    }

    /// Subscribe to scroll, hide and unload signals. Idempotent.
    pub fn attach(&mut self) {
        if !self.listeners.is_empty() {
            return;
        }
        for signal in [PageSignal::Scroll, PageSignal::VisibilityHidden, PageSignal::Unload] {
            self.listeners.push(self.page.add_listener(signal));
        }
    }

    /// Scroll callback. Calls inside the throttle window are dropped.
    /// Returns the milestones that fired, in ascending order.
    pub fn on_scroll(&mut self, now: Instant, funnel: &mut FunnelTracker) -> Vec<ScrollMilestone> {
        if self.phase == ScrollPhase::Finalized {
            return Vec::new();
        }
        if let Some(last) = self.last_handled {
            if now.saturating_duration_since(last) < self.throttle {
                return Vec::new();
            }
        }
        self.last_handled = Some(now);
        if self.phase == ScrollPhase::Idle {
            self.phase = ScrollPhase::Tracking;
        }

        self.sample(funnel)
    }

    pub fn on_visibility_hidden(&mut self, funnel: &mut FunnelTracker) -> bool {
        self.finalize(FinalizeReason::Hidden, funnel)
    }

    pub fn on_unload(&mut self, funnel: &mut FunnelTracker) -> bool {
        self.finalize(FinalizeReason::Unload, funnel)
    }

    /// Emit the closing event. Returns false if the session was already finalized.
    pub fn finalize(&mut self, reason: FinalizeReason, funnel: &mut FunnelTracker) -> bool {
        if self.phase == ScrollPhase::Finalized {
            return false;
        }
        // Pick up a position the throttle may have skipped.
        self.sample(funnel);
        self.phase = ScrollPhase::Finalized;

        let milestones: Vec<u8> = funnel
            .reached_milestones()
            .iter()
            .map(|m| m.percent())
            .collect();
        let mut props = Properties::new();
        props.insert("maxScrollDepth".into(), Value::from(self.max_depth));
        props.insert("milestonesReached".into(), json!(milestones));
        props.insert("reason".into(), Value::from(reason.as_str()));
        props.insert("scrollDepth".into(), Value::from(self.max_depth));
        funnel.track_event(EventName::ScrollSessionEnd, props, Some(f64::from(self.max_depth)));

        log_info!(
            "scroll tracking finalized ({}) at {}%",
            reason.as_str(),
            self.max_depth
        );
        true
    }

    /// Remove every listener registered by `attach`.
    pub fn destroy(&mut self) {
        for id in self.listeners.drain(..) {
            self.page.remove_listener(id);
        }
    }

    pub fn phase(&self) -> ScrollPhase {
        self.phase
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    fn sample(&mut self, funnel: &mut FunnelTracker) -> Vec<ScrollMilestone> {
        let depth = self.page.scroll_metrics().depth_percent();
        if depth > self.max_depth {
            self.max_depth = depth;
            self.sink.set_scalar(MAX_SCROLL_DEPTH_KEY, Value::from(depth));
        }

        let mut fired = Vec::new();
        for milestone in ScrollMilestone::reached_by(depth) {
            if funnel.track_scroll_milestone(milestone) {
                log_debug!("scroll milestone {}% reached", milestone.percent());
                fired.push(milestone);
            }
        }
        fired
    }
}

impl Drop for ScrollDepthTracker {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Session;
    use crate::page::SimulatedPage;
    use crate::sink::{MemoryStore, NoopCollector};

    struct Harness {
        page: Arc<SimulatedPage>,
        store: Arc<MemoryStore>,
        funnel: FunnelTracker,
        scroll: ScrollDepthTracker,
        clock: Instant,
    }

    impl Harness {
        fn new() -> Self {
            let page = Arc::new(SimulatedPage::new("https://crm.example.com/", 3000.0, 1000.0));
            let store = Arc::new(MemoryStore::new());
            let sink = Arc::new(EventSink::new(Arc::new(NoopCollector), store.clone()));
            let funnel = FunnelTracker::new(Session::with_id("abc", None), page.clone(), sink.clone());
            let mut scroll = ScrollDepthTracker::new(page.clone(), sink, DEFAULT_THROTTLE);
            scroll.attach();
            Self {
                page,
                store,
                funnel,
                scroll,
                clock: Instant::now(),
            }
        }

        fn scroll_to(&mut self, percent: f64, after: Duration) -> Vec<u8> {
            self.clock += after;
            self.page.scroll_to_percent(percent);
            self.scroll
                .on_scroll(self.clock, &mut self.funnel)
                .into_iter()
                .map(|m| m.percent())
                .collect()
        }
    }

    const STEP: Duration = Duration::from_millis(250);

    #[test]
    fn milestones_fire_once_in_order() {
        let mut h = Harness::new();
        assert_eq!(h.scroll_to(0.0, STEP), Vec::<u8>::new());
        assert_eq!(h.scroll_to(30.0, STEP), vec![25]);
        assert_eq!(h.scroll_to(60.0, STEP), vec![50]);
        assert_eq!(h.scroll_to(10.0, STEP), Vec::<u8>::new());
        assert_eq!(h.scroll_to(90.0, STEP), vec![75]);

        let names: Vec<&str> = h
            .funnel
            .events()
            .iter()
            .map(|e| e.event.as_str())
            .collect();
        assert_eq!(names, vec!["scroll_depth_25", "scroll_depth_50", "scroll_depth_75"]);
        assert_eq!(h.scroll.max_depth(), 90);
    }

    #[test]
    fn jumping_past_several_thresholds_fires_each_ascending() {
        let mut h = Harness::new();
        assert_eq!(h.scroll_to(100.0, STEP), vec![25, 50, 75, 100]);
        assert_eq!(h.scroll_to(100.0, STEP), Vec::<u8>::new());
    }

    #[test]
    fn throttle_drops_rapid_callbacks() {
        let mut h = Harness::new();
        assert_eq!(h.scroll_to(10.0, STEP), Vec::<u8>::new());
        assert_eq!(h.scroll_to(40.0, Duration::from_millis(30)), Vec::<u8>::new());
        assert_eq!(h.scroll.max_depth(), 10);
        assert_eq!(h.scroll_to(40.0, Duration::from_millis(100)), vec![25]);
    }

    #[test]
    fn max_depth_is_persisted_and_monotonic() {
        let mut h = Harness::new();
        h.scroll_to(70.0, STEP);
        h.scroll_to(20.0, STEP);
        assert_eq!(h.scroll.max_depth(), 70);
        assert_eq!(h.store.scalar(MAX_SCROLL_DEPTH_KEY), Some(Value::from(70)));
    }

    #[test]
    fn phases_advance() {
        let mut h = Harness::new();
        assert_eq!(h.scroll.phase(), ScrollPhase::Idle);
        h.scroll_to(5.0, STEP);
        assert_eq!(h.scroll.phase(), ScrollPhase::Tracking);
        assert!(h.scroll.on_unload(&mut h.funnel));
        assert_eq!(h.scroll.phase(), ScrollPhase::Finalized);
    }

    #[test]
    fn finalize_reports_max_depth_once() {
        let mut h = Harness::new();
        h.scroll_to(60.0, STEP);
        h.scroll_to(15.0, STEP);

        assert!(h.scroll.on_visibility_hidden(&mut h.funnel));
        assert!(!h.scroll.on_unload(&mut h.funnel));

        let ends: Vec<_> = h
            .funnel
            .events()
            .iter()
            .filter(|e| e.is(&EventName::ScrollSessionEnd))
            .collect();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].properties["maxScrollDepth"], 60);
        assert_eq!(ends[0].properties["milestonesReached"], json!([25, 50]));
        assert_eq!(ends[0].properties["reason"], "visibility_hidden");

        // Scrolling after finalization is ignored.
        assert_eq!(h.scroll_to(100.0, STEP), Vec::<u8>::new());
    }

    #[test]
    fn finalize_catches_throttled_position() {
        let mut h = Harness::new();
        h.scroll_to(10.0, STEP);
        h.scroll_to(55.0, Duration::from_millis(10));
        h.scroll.on_unload(&mut h.funnel);
        assert_eq!(h.scroll.max_depth(), 55);
        assert_eq!(h.funnel.reached_milestones().len(), 2);
    }

    #[test]
    fn milestone_recorded_by_funnel_is_not_refired() {
        let mut h = Harness::new();
        assert!(h.funnel.track_scroll_milestone(ScrollMilestone::Quarter));

        assert_eq!(h.scroll_to(30.0, STEP), Vec::<u8>::new());
        assert_eq!(h.scroll_to(55.0, STEP), vec![50]);
        assert_eq!(h.funnel.count(&EventName::ScrollDepth(ScrollMilestone::Quarter)), 1);

        h.scroll.on_unload(&mut h.funnel);
        let end = h
            .funnel
            .events()
            .iter()
            .find(|e| e.is(&EventName::ScrollSessionEnd))
            .unwrap();
        assert_eq!(end.properties["milestonesReached"], json!([25, 50]));
    }

    #[test]
    fn destroy_removes_listeners() {
        let mut h = Harness::new();
        assert_eq!(h.page.active_listeners(), 3);
        h.scroll.attach();
        assert_eq!(h.page.active_listeners(), 3);
        h.scroll.destroy();
        assert_eq!(h.page.active_listeners(), 0);
    }
}
