use std::{collections::HashMap, sync::Arc};

use serde_json::Value;

use crate::{
    bucketing::{allocation_bucket, variant_bucket},
    models::{EventName, Experiment, FunnelEvent, Properties, Session, Variant, VariantConfig},
    sink::{Channel, EventSink},
};

use super::ExperimentRegistry;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Per-session experiment assignments, decided once at construction.
pub struct AbTestManager {
    session: Session,
    registry: Arc<ExperimentRegistry>,
    sink: Arc<EventSink>,
    /// experiment id -> variant id, only for experiments the session takes part in.
    assignments: HashMap<String, String>,
    events: Vec<FunnelEvent>,
}

impl AbTestManager {
    pub fn new(session: Session, registry: Arc<ExperimentRegistry>, sink: Arc<EventSink>) -> Self {
        let mut manager = Self {
            session,
            registry,
            sink,
            assignments: HashMap::new(),
            events: Vec::new(),
        };
        manager.assign_all();
        manager
    }

    fn assign_all(&mut self) {
        let registry = Arc::clone(&self.registry);
        for experiment in registry.running() {
            let Some(variant) = assign(&self.session.session_id, experiment) else {
                log_debug!(
                    "session {} outside allocation for {}",
                    self.session.session_id,
                    experiment.id
                );
                continue;
            };

            self.assignments
                .insert(experiment.id.clone(), variant.id.clone());

            let mut props = Properties::new();
            props.insert("testId".into(), Value::from(experiment.id.clone()));
            props.insert("variantId".into(), Value::from(variant.id.clone()));
            props.insert("isControl".into(), Value::from(variant.is_control));
            self.emit(EventName::AbTestParticipation, props, None);
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn get_variant(&self, test_id: &str) -> Option<&Variant> {
        let variant_id = self.assignments.get(test_id)?;
        self.registry.get(test_id)?.variant(variant_id)
    }

    /// Variant config, or an empty map when the session is not in the test.
    pub fn get_variant_config(&self, test_id: &str) -> VariantConfig {
        self.get_variant(test_id)
            .map(|v| v.config.clone())
            .unwrap_or_default()
    }

    pub fn is_in_test(&self, test_id: &str) -> bool {
        self.assignments.contains_key(test_id)
    }

    /// `(experiment id, variant id)` pairs, sorted by experiment id.
    pub fn assignments(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self
            .assignments
            .iter()
            .map(|(e, v)| (e.clone(), v.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn track_event(
        &mut self,
        test_id: &str,
        event_name: &str,
        properties: Properties,
        value: Option<f64>,
    ) {
        let Some(props) = self.tagged(test_id, properties) else {
            return;
        };
        self.emit(EventName::Custom(event_name.to_string()), props, value);
    }

    pub fn track_conversion(&mut self, test_id: &str, conversion_type: &str, value: Option<f64>) {
        let mut extra = Properties::new();
        extra.insert("conversionType".into(), Value::from(conversion_type));
        let Some(props) = self.tagged(test_id, extra) else {
            return;
        };
        self.emit(EventName::AbTestConversion, props, value);
    }

    /// Events emitted by this manager, oldest first.
    pub fn events(&self) -> &[FunnelEvent] {
        &self.events
    }

    fn tagged(&self, test_id: &str, mut properties: Properties) -> Option<Properties> {
        let variant_id = self.assignments.get(test_id)?;
        properties.insert("testId".into(), Value::from(test_id));
        properties.insert("variantId".into(), Value::from(variant_id.clone()));
        Some(properties)
    }

    fn emit(&mut self, name: EventName, properties: Properties, value: Option<f64>) {
        let event = FunnelEvent::new(&name, &self.session, properties, value);
        self.sink.send(Channel::Experiment, &event);
        self.events.push(event);
    }
}

/// Pick the session's variant, or `None` when it falls outside the allocation.
pub fn assign<'a>(session_id: &str, experiment: &'a Experiment) -> Option<&'a Variant> {
    let allocation = allocation_bucket(session_id, &experiment.id) as f64;
    if allocation >= experiment.traffic_allocation {
        return None;
    }

    let draw = variant_bucket(session_id, &experiment.id) as f64;
    let mut cumulative = 0.0;
    for variant in &experiment.variants {
        cumulative += variant.traffic_weight;
        if draw < cumulative {
            return Some(variant);
        }
    }

    log_warn!(
        "variant walk for {} exhausted at {cumulative}; falling back to control",
        experiment.id
    );
    experiment
        .control()
        .or_else(|| experiment.variants.first())
}
