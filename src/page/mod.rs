//! Port between the trackers and the hosting page.
//!
//! The host owns the DOM: it reports geometry through [`PagePort`] and calls
//! the trackers' `on_*` handlers when a subscribed signal fires. Trackers only
//! subscribe, unsubscribe and read.

mod simulated;

pub use simulated::SimulatedPage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub document_height: f64,
    pub viewport_height: f64,
}

impl ScrollMetrics {
    /// Percent of the scrollable distance covered, 0 when nothing can scroll.
    pub fn depth_percent(&self) -> u8 {
        let scrollable = self.document_height - self.viewport_height;
        if scrollable.is_nan() || scrollable <= 0.0 || !self.scroll_top.is_finite() {
            return 0;
        }
        (self.scroll_top / scrollable * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageSignal {
    Scroll,
    VisibilityHidden,
    Unload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// Host-side handle for a DOM element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionOptions {
    /// Fraction of the element that must be visible (0-1).
    pub threshold: f64,
    /// Bottom root margin in px; negative shrinks the viewport.
    pub root_margin_bottom_px: i32,
}

impl Default for IntersectionOptions {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            root_margin_bottom_px: -100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionEntry {
    pub element: ElementId,
    pub is_intersecting: bool,
    pub intersection_ratio: f64,
}

pub trait PagePort: Send + Sync {
    fn scroll_metrics(&self) -> ScrollMetrics;
    fn page_url(&self) -> String;
    fn referrer(&self) -> Option<String>;
    fn add_listener(&self, signal: PageSignal) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
    fn observe(&self, element: ElementId, options: IntersectionOptions);
    fn unobserve(&self, element: ElementId);
}
