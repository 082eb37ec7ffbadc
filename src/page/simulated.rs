use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::{
    ElementId, IntersectionOptions, ListenerId, PagePort, PageSignal, ScrollMetrics,
};

struct PageState {
    url: String,
    referrer: Option<String>,
    metrics: ScrollMetrics,
    listeners: HashMap<ListenerId, PageSignal>,
    observed: HashMap<ElementId, IntersectionOptions>,
    next_listener: u64,
}

/// In-memory page used by the replay binary and tests.
pub struct SimulatedPage {
    state: Mutex<PageState>,
}

impl SimulatedPage {
    pub fn new(url: impl Into<String>, document_height: f64, viewport_height: f64) -> Self {
        Self {
            state: Mutex::new(PageState {
                url: url.into(),
                referrer: None,
                metrics: ScrollMetrics {
                    scroll_top: 0.0,
                    document_height,
                    viewport_height,
                },
                listeners: HashMap::new(),
                observed: HashMap::new(),
                next_listener: 1,
            }),
        }
    }

    pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
        self.lock().referrer = Some(referrer.into());
        self
    }

    pub fn scroll_to(&self, scroll_top: f64) {
        self.lock().metrics.scroll_top = scroll_top;
    }

    /// Scroll so that `percent` of the scrollable distance is covered.
    pub fn scroll_to_percent(&self, percent: f64) {
        let mut state = self.lock();
        let scrollable = (state.metrics.document_height - state.metrics.viewport_height).max(0.0);
        state.metrics.scroll_top = scrollable * percent / 100.0;
    }

    pub fn set_document_height(&self, document_height: f64) {
        self.lock().metrics.document_height = document_height;
    }

    pub fn active_listeners(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn is_listening(&self, signal: PageSignal) -> bool {
        self.lock().listeners.values().any(|s| *s == signal)
    }

    pub fn is_observed(&self, element: ElementId) -> bool {
        self.lock().observed.contains_key(&element)
    }

    pub fn observed_count(&self) -> usize {
        self.lock().observed.len()
    }

    pub fn observe_options(&self, element: ElementId) -> Option<IntersectionOptions> {
        self.lock().observed.get(&element).copied()
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PagePort for SimulatedPage {
    fn scroll_metrics(&self) -> ScrollMetrics {
        self.lock().metrics
    }

    fn page_url(&self) -> String {
        self.lock().url.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.lock().referrer.clone()
    }

    fn add_listener(&self, signal: PageSignal) -> ListenerId {
        let mut state = self.lock();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.insert(id, signal);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.lock().listeners.remove(&id);
    }

    fn observe(&self, element: ElementId, options: IntersectionOptions) {
        self.lock().observed.insert(element, options);
    }

    fn unobserve(&self, element: ElementId) {
        self.lock().observed.remove(&element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_are_tracked_by_id() {
        let page = SimulatedPage::new("https://example.com/", 3000.0, 1000.0);
        let scroll = page.add_listener(PageSignal::Scroll);
        let unload = page.add_listener(PageSignal::Unload);
        assert_ne!(scroll, unload);
        assert_eq!(page.active_listeners(), 2);

        page.remove_listener(scroll);
        assert!(!page.is_listening(PageSignal::Scroll));
        assert!(page.is_listening(PageSignal::Unload));
    }

    #[test]
    fn scroll_to_percent_maps_to_scroll_top() {
        let page = SimulatedPage::new("https://example.com/", 3000.0, 1000.0);
        page.scroll_to_percent(60.0);
        assert_eq!(page.scroll_metrics().scroll_top, 1200.0);
        assert_eq!(page.scroll_metrics().depth_percent(), 60);
    }
}
