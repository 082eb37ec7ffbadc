use std::{collections::HashSet, sync::Arc};

use crate::page::{ElementId, IntersectionEntry, IntersectionOptions, PagePort};

use super::FunnelTracker;

/// Fires one `section_view_{id}` per registered section, then stops observing it.
pub struct SectionVisibilityTracker {
    page: Arc<dyn PagePort>,
    options: IntersectionOptions,
    /// Registration order.
    sections: Vec<(String, ElementId)>,
    observing: HashSet<ElementId>,
    viewed: Vec<String>,
}

impl SectionVisibilityTracker {
    pub fn new(page: Arc<dyn PagePort>, options: IntersectionOptions) -> Self {
        Self {
            page,
            options,
            sections: Vec::new(),
            observing: HashSet::new(),
            viewed: Vec::new(),
        }
    }

    /// Start observing `element`. Returns false if the section or element is already known.
    pub fn register(&mut self, section_id: impl Into<String>, element: ElementId) -> bool {
        let section_id = section_id.into();
        if self
            .sections
            .iter()
            .any(|(id, el)| *id == section_id || *el == element)
        {
            return false;
        }
        self.page.observe(element, self.options);
        self.observing.insert(element);
        self.sections.push((section_id, element));
        true
    }

    /// Intersection callback. Returns true when this entry produced a view event.
    pub fn on_intersection(&mut self, entry: IntersectionEntry, funnel: &mut FunnelTracker) -> bool {
        if !entry.is_intersecting || entry.intersection_ratio < self.options.threshold {
            return false;
        }
        if !self.observing.remove(&entry.element) {
            return false;
        }
        self.page.unobserve(entry.element);

        let Some(section_id) = self.section_for(entry.element).map(str::to_string) else {
            return false;
        };

        let fired = funnel.track_section_view(&section_id);
        if fired {
            self.viewed.push(section_id);
        }
        fired
    }

    pub fn viewed_sections(&self) -> &[String] {
        &self.viewed
    }

    pub fn registered_count(&self) -> usize {
        self.sections.len()
    }

    /// Share of registered sections seen so far, 0 when none are registered.
    pub fn view_rate(&self) -> f64 {
        if self.sections.is_empty() {
            return 0.0;
        }
        self.viewed.len() as f64 / self.sections.len() as f64
    }

    fn section_for(&self, element: ElementId) -> Option<&str> {
        self.sections
            .iter()
            .find(|(_, el)| *el == element)
            .map(|(id, _)| id.as_str())
    }

    pub fn element_for(&self, section_id: &str) -> Option<ElementId> {
        self.sections
            .iter()
            .find(|(id, _)| id == section_id)
            .map(|(_, el)| *el)
    }

    /// Disconnect every observation still pending.
    pub fn destroy(&mut self) {
        for element in self.observing.drain() {
            self.page.unobserve(element);
        }
    }
}

impl Drop for SectionVisibilityTracker {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventName, Session};
    use crate::page::SimulatedPage;
    use crate::sink::EventSink;

    fn setup() -> (SectionVisibilityTracker, FunnelTracker, Arc<SimulatedPage>) {
        let page = Arc::new(SimulatedPage::new("https://crm.example.com/", 4000.0, 1000.0));
        let sink = Arc::new(EventSink::detached());
        let funnel = FunnelTracker::new(Session::with_id("abc", None), page.clone(), sink);
        let sections = SectionVisibilityTracker::new(page.clone(), IntersectionOptions::default());
        (sections, funnel, page)
    }

    fn entry(element: ElementId, is_intersecting: bool, ratio: f64) -> IntersectionEntry {
        IntersectionEntry {
            element,
            is_intersecting,
            intersection_ratio: ratio,
        }
    }

    #[test]
    fn register_observes_with_options() {
        let (mut sections, _, page) = setup();
        assert!(sections.register("hero", ElementId(1)));
        assert!(!sections.register("hero", ElementId(2)));
        assert!(!sections.register("features", ElementId(1)));

        let options = page.observe_options(ElementId(1)).unwrap();
        assert_eq!(options.threshold, 0.5);
        assert_eq!(options.root_margin_bottom_px, -100);
        assert_eq!(sections.registered_count(), 1);
    }

    #[test]
    fn section_fires_once_across_reentries() {
        let (mut sections, mut funnel, page) = setup();
        sections.register("pricing", ElementId(7));

        for _ in 0..5 {
            sections.on_intersection(entry(ElementId(7), true, 0.8), &mut funnel);
            sections.on_intersection(entry(ElementId(7), false, 0.0), &mut funnel);
        }

        assert_eq!(funnel.count(&EventName::SectionView("pricing".into())), 1);
        assert_eq!(sections.viewed_sections(), ["pricing"]);
        assert!(!page.is_observed(ElementId(7)));
    }

    #[test]
    fn below_threshold_does_not_count() {
        let (mut sections, mut funnel, page) = setup();
        sections.register("faq", ElementId(3));

        assert!(!sections.on_intersection(entry(ElementId(3), true, 0.2), &mut funnel));
        assert!(page.is_observed(ElementId(3)));
        assert!(sections.on_intersection(entry(ElementId(3), true, 0.5), &mut funnel));
    }

    #[test]
    fn unknown_elements_are_ignored() {
        let (mut sections, mut funnel, _) = setup();
        assert!(!sections.on_intersection(entry(ElementId(99), true, 1.0), &mut funnel));
        assert!(funnel.events().is_empty());
    }

    #[test]
    fn view_rate_tracks_progress() {
        let (mut sections, mut funnel, _) = setup();
        assert_eq!(sections.view_rate(), 0.0);
        for (i, id) in ["hero", "features", "pricing", "faq"].iter().enumerate() {
            sections.register(*id, ElementId(i as u64));
        }
        sections.on_intersection(entry(ElementId(0), true, 1.0), &mut funnel);
        sections.on_intersection(entry(ElementId(2), true, 0.6), &mut funnel);
        assert_eq!(sections.view_rate(), 0.5);
        assert_eq!(sections.section_for(ElementId(2)), Some("pricing"));
        assert_eq!(sections.element_for("faq"), Some(ElementId(3)));
    }

    #[test]
    fn section_recorded_by_funnel_is_not_counted_again() {
        let (mut sections, mut funnel, page) = setup();
        assert!(funnel.track_section_view("hero"));
        sections.register("hero", ElementId(1));

        assert!(!sections.on_intersection(entry(ElementId(1), true, 1.0), &mut funnel));
        assert_eq!(funnel.count(&EventName::SectionView("hero".into())), 1);
        assert!(sections.viewed_sections().is_empty());
        assert!(!page.is_observed(ElementId(1)));
    }

    #[test]
    fn destroy_disconnects_pending_observations() {
        let (mut sections, mut funnel, page) = setup();
        sections.register("hero", ElementId(1));
        sections.register("faq", ElementId(2));
        sections.on_intersection(entry(ElementId(1), true, 1.0), &mut funnel);
        assert_eq!(page.observed_count(), 1);

        sections.destroy();
        assert_eq!(page.observed_count(), 0);
    }
}
