use std::{
    collections::BTreeSet,
    sync::Arc,
    time::Instant,
};

use serde::Serialize;
use serde_json::Value;

use crate::{
    models::{
        CtaAction, EventName, FormAction, FunnelEvent, Properties, ScrollMilestone, Session,
    },
    page::PagePort,
    sink::{Channel, EventSink},
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::log_debug;

const CTA_CLICK_VALUE: f64 = 1.0;
const FORM_COMPLETE_VALUE: f64 = 10.0;

/// Ordered log of one session's funnel events.
pub struct FunnelTracker {
    session: Session,
    page: Arc<dyn PagePort>,
    sink: Arc<EventSink>,
    started: Instant,
    events: Vec<FunnelEvent>,
    milestones: BTreeSet<ScrollMilestone>,
    /// In first-view order.
    viewed_sections: Vec<String>,
    initialized: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunnelReport {
    pub session_id: String,
    pub total_events: usize,
    pub page_views: usize,
    pub deepest_milestone: Option<u8>,
    pub sections_viewed: Vec<String>,
    pub cta_clicks: usize,
    pub form_starts: usize,
    pub form_completions: usize,
    pub conversions: usize,
    pub conversion_value: f64,
    pub elapsed_ms: u64,
}

impl FunnelTracker {
    pub fn new(session: Session, page: Arc<dyn PagePort>, sink: Arc<EventSink>) -> Self {
        Self {
            session,
            page,
            sink,
            started: Instant::now(),
            events: Vec::new(),
            milestones: BTreeSet::new(),
            viewed_sections: Vec::new(),
            initialized: false,
        }
    }

    /// Record the page view. Later calls are ignored.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;

        let mut props = Properties::new();
        props.insert(
            "referrer".into(),
            self.page.referrer().map(Value::from).unwrap_or(Value::Null),
        );
        self.track_event(EventName::PageView, props, None);
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Record an event. Scroll milestones and section views go through the
    /// same once-per-session guards as their dedicated helpers; returns false
    /// when the event was dropped as a repeat.
    pub fn track_event(&mut self, name: EventName, properties: Properties, value: Option<f64>) -> bool {
        match &name {
            EventName::ScrollDepth(milestone) => {
                if !self.milestones.insert(*milestone) {
                    log_debug!("milestone {}% already recorded", milestone.percent());
                    return false;
                }
            }
            EventName::SectionView(section_id) => {
                if self.viewed_sections.iter().any(|s| s == section_id) {
                    log_debug!("section '{section_id}' already recorded");
                    return false;
                }
                self.viewed_sections.push(section_id.clone());
            }
            _ => {}
        }

        self.record(name, properties, value);
        true
    }

    /// Returns false when the milestone was already recorded this session.
    pub fn track_scroll_milestone(&mut self, milestone: ScrollMilestone) -> bool {
        if self.milestones.contains(&milestone) {
            return false;
        }
        let mut props = Properties::new();
        props.insert("milestone".into(), Value::from(milestone.percent()));
        self.track_event(EventName::ScrollDepth(milestone), props, None)
    }

    /// Returns false when the section was already recorded this session.
    pub fn track_section_view(&mut self, section_id: &str) -> bool {
        if self.viewed_sections.iter().any(|s| s == section_id) {
            return false;
        }
        let mut props = Properties::new();
        props.insert("sectionId".into(), Value::from(section_id));
        self.track_event(EventName::SectionView(section_id.to_string()), props, None)
    }

    pub fn track_cta_interaction(&mut self, cta_id: &str, action: CtaAction, cta_text: Option<&str>) {
        let mut props = Properties::new();
        props.insert("ctaId".into(), Value::from(cta_id));
        if let Some(text) = cta_text {
            props.insert("ctaText".into(), Value::from(text));
        }
        let value = (action == CtaAction::Click).then_some(CTA_CLICK_VALUE);
        self.track_event(EventName::Cta(action), props, value);
    }

    pub fn track_form_interaction(&mut self, form_id: &str, action: FormAction, field: Option<&str>) {
        let mut props = Properties::new();
        props.insert("formId".into(), Value::from(form_id));
        if let Some(field) = field {
            props.insert("fieldName".into(), Value::from(field));
        }
        let value = (action == FormAction::Complete).then_some(FORM_COMPLETE_VALUE);
        self.track_event(EventName::Form(action), props, value);
    }

    pub fn track_conversion(&mut self, conversion_type: &str, value: Option<f64>) {
        let mut props = Properties::new();
        props.insert("conversionType".into(), Value::from(conversion_type));
        self.track_event(EventName::Conversion, props, value);
    }

    pub fn current_scroll_depth(&self) -> u8 {
        self.page.scroll_metrics().depth_percent()
    }

    pub fn events(&self) -> &[FunnelEvent] {
        &self.events
    }

    pub fn count(&self, name: &EventName) -> usize {
        let name = name.to_string();
        self.events.iter().filter(|e| e.event == name).count()
    }

    /// Milestones recorded this session, ascending.
    pub fn reached_milestones(&self) -> Vec<ScrollMilestone> {
        self.milestones.iter().copied().collect()
    }

    pub fn viewed_sections(&self) -> &[String] {
        &self.viewed_sections
    }

    pub fn report(&self) -> FunnelReport {
        let conversions: Vec<&FunnelEvent> = self
            .events
            .iter()
            .filter(|e| e.is(&EventName::Conversion))
            .collect();

        FunnelReport {
            session_id: self.session.session_id.clone(),
            total_events: self.events.len(),
            page_views: self.count(&EventName::PageView),
            deepest_milestone: self.milestones.iter().next_back().map(|m| m.percent()),
            sections_viewed: self.viewed_sections.clone(),
            cta_clicks: self.count(&EventName::Cta(CtaAction::Click)),
            form_starts: self.count(&EventName::Form(FormAction::Start)),
            form_completions: self.count(&EventName::Form(FormAction::Complete)),
            conversions: conversions.len(),
            conversion_value: conversions.iter().filter_map(|e| e.value).sum(),
            elapsed_ms: self.elapsed_ms(),
        }
    }

    fn record(&mut self, name: EventName, mut properties: Properties, value: Option<f64>) {
        properties.insert("timeFromStart".into(), Value::from(self.elapsed_ms()));
        properties.insert("pageUrl".into(), Value::from(self.page.page_url()));
        properties
            .entry("scrollDepth")
            .or_insert_with(|| Value::from(self.current_scroll_depth()));

        let event = FunnelEvent::new(&name, &self.session, properties, value);
        log_debug!("funnel event {} for {}", event.event, self.session.session_id);
        self.sink.send(channel_for(&name), &event);
        self.events.push(event);
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

fn channel_for(name: &EventName) -> Channel {
    match name {
        EventName::ScrollDepth(_) | EventName::ScrollSessionEnd => Channel::Scroll,
        EventName::SectionView(_) => Channel::Section,
        EventName::AbTestParticipation | EventName::AbTestConversion => Channel::Experiment,
        _ => Channel::Funnel,
    }
}
