use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Session;

/// Free-form context attached to an event.
pub type Properties = Map<String, Value>;

/// Turn a `json!({...})` literal into a property map. Non-objects yield an empty map.
pub fn properties(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        _ => Properties::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScrollMilestone {
    Quarter,
    Half,
    ThreeQuarters,
    Full,
}

impl ScrollMilestone {
    pub const ALL: [ScrollMilestone; 4] = [
        ScrollMilestone::Quarter,
        ScrollMilestone::Half,
        ScrollMilestone::ThreeQuarters,
        ScrollMilestone::Full,
    ];

    pub fn percent(self) -> u8 {
        match self {
            ScrollMilestone::Quarter => 25,
            ScrollMilestone::Half => 50,
            ScrollMilestone::ThreeQuarters => 75,
            ScrollMilestone::Full => 100,
        }
    }

    /// Milestones covered by `depth`, in ascending order.
    pub fn reached_by(depth: u8) -> impl Iterator<Item = ScrollMilestone> {
        Self::ALL.into_iter().filter(move |m| depth >= m.percent())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtaAction {
    View,
    Hover,
    Click,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormAction {
    Start,
    FieldComplete,
    Abandon,
    Complete,
}

/// Canonical event vocabulary. Every interaction maps to exactly one name so
/// downstream funnel queries can group by the string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    PageView,
    ScrollDepth(ScrollMilestone),
    ScrollSessionEnd,
    SectionView(String),
    Cta(CtaAction),
    Form(FormAction),
    Conversion,
    AbTestParticipation,
    AbTestConversion,
    /// Experiment-specific names passed through `AbTestManager::track_event`.
    Custom(String),
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventName::PageView => f.write_str("page_view"),
            EventName::ScrollDepth(m) => write!(f, "scroll_depth_{}", m.percent()),
            EventName::ScrollSessionEnd => f.write_str("scroll_session_end"),
            EventName::SectionView(id) => write!(f, "section_view_{id}"),
            EventName::Cta(CtaAction::View) => f.write_str("cta_view"),
            EventName::Cta(CtaAction::Hover) => f.write_str("cta_hover"),
            EventName::Cta(CtaAction::Click) => f.write_str("cta_click"),
            EventName::Form(FormAction::Start) => f.write_str("form_start"),
            EventName::Form(FormAction::FieldComplete) => f.write_str("form_field_complete"),
            EventName::Form(FormAction::Abandon) => f.write_str("form_abandon"),
            EventName::Form(FormAction::Complete) => f.write_str("form_complete"),
            EventName::Conversion => f.write_str("conversion"),
            EventName::AbTestParticipation => f.write_str("ab_test_participation"),
            EventName::AbTestConversion => f.write_str("ab_test_conversion"),
            EventName::Custom(name) => f.write_str(name),
        }
    }
}

/// One step of a visitor's journey. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunnelEvent {
    pub event: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub session_id: String,
    pub user_id: Option<String>,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<f64>,
}

impl FunnelEvent {
    pub fn new(
        name: &EventName,
        session: &Session,
        properties: Properties,
        value: Option<f64>,
    ) -> Self {
        Self {
            event: name.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            properties,
            value,
        }
    }

    pub fn is(&self, name: &EventName) -> bool {
        self.event == name.to_string()
    }

    /// Parameters handed to a third-party tag: the properties plus `value`.
    pub fn tag_params(&self) -> Value {
        let mut params = self.properties.clone();
        params.insert("session_id".into(), Value::from(self.session_id.clone()));
        if let Some(value) = self.value {
            params.insert("value".into(), Value::from(value));
        }
        Value::Object(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_names() {
        assert_eq!(EventName::PageView.to_string(), "page_view");
        assert_eq!(
            EventName::ScrollDepth(ScrollMilestone::ThreeQuarters).to_string(),
            "scroll_depth_75"
        );
        assert_eq!(EventName::SectionView("pricing".into()).to_string(), "section_view_pricing");
        assert_eq!(EventName::Cta(CtaAction::Hover).to_string(), "cta_hover");
        assert_eq!(
            EventName::Form(FormAction::FieldComplete).to_string(),
            "form_field_complete"
        );
        assert_eq!(EventName::AbTestConversion.to_string(), "ab_test_conversion");
    }

    #[test]
    fn milestones_reached_in_order() {
        let reached: Vec<u8> = ScrollMilestone::reached_by(80).map(|m| m.percent()).collect();
        assert_eq!(reached, vec![25, 50, 75]);
        assert_eq!(ScrollMilestone::reached_by(24).count(), 0);
        assert_eq!(ScrollMilestone::reached_by(100).count(), 4);
    }

    #[test]
    fn serializes_camel_case_and_omits_missing_value() {
        let session = Session::with_id("s-1", None);
        let event = FunnelEvent::new(
            &EventName::PageView,
            &session,
            properties(json!({ "referrer": "direct" })),
            None,
        );
        let body = serde_json::to_value(&event).unwrap();
        assert_eq!(body["event"], "page_view");
        assert_eq!(body["sessionId"], "s-1");
        assert_eq!(body["properties"]["referrer"], "direct");
        assert!(body.get("value").is_none());
    }

    #[test]
    fn tag_params_carry_value() {
        let session = Session::with_id("s-2", None);
        let event = FunnelEvent::new(&EventName::Conversion, &session, Properties::new(), Some(49.0));
        let params = event.tag_params();
        assert_eq!(params["value"], 49.0);
        assert_eq!(params["session_id"], "s-2");
    }

    #[test]
    fn properties_helper_ignores_non_objects() {
        assert!(properties(json!([1, 2])).is_empty());
        assert_eq!(properties(json!({ "a": 1 })).len(), 1);
    }
}
