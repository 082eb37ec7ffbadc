//! Drives every tracker from a scripted visit.
//!
//! This is the composition root: the session, experiment manager and trackers
//! are built explicitly here, fed the visit's signals in order, then finalized
//! and torn down.

use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    experiments::{AbTestManager, ExperimentRegistry},
    funnel::{FunnelReport, FunnelTracker, ScrollDepthTracker, ScrollPhase, SectionVisibilityTracker},
    models::{CtaAction, FormAction, Properties, Session},
    page::{ElementId, IntersectionEntry, SimulatedPage},
    settings::AnalyticsSettings,
    sink::EventSink,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitScript {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub page_url: String,
    #[serde(default)]
    pub referrer: Option<String>,
    pub document_height: f64,
    pub viewport_height: f64,
    /// Section ids in page order.
    #[serde(default)]
    pub sections: Vec<String>,
    pub steps: Vec<Step>,
}

impl VisitScript {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read visit script {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid visit script {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to parse visit script")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Offset from the start of the visit.
    #[serde(default)]
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

fn full_ratio() -> f64 {
    1.0
}

fn intersecting() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    #[serde(rename_all = "camelCase")]
    Scroll { scroll_top: f64 },
    #[serde(rename_all = "camelCase")]
    Resize { document_height: f64 },
    #[serde(rename_all = "camelCase")]
    Intersect {
        section: String,
        #[serde(default = "full_ratio")]
        ratio: f64,
        #[serde(default = "intersecting")]
        is_intersecting: bool,
    },
    #[serde(rename_all = "camelCase")]
    Cta {
        cta_id: String,
        action: CtaAction,
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Form {
        form_id: String,
        action: FormAction,
        #[serde(default)]
        field: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Convert {
        conversion_type: String,
        #[serde(default)]
        value: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    AbEvent {
        test_id: String,
        event_name: String,
        #[serde(default)]
        properties: Properties,
        #[serde(default)]
        value: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    AbConversion {
        test_id: String,
        conversion_type: String,
        #[serde(default)]
        value: Option<f64>,
    },
    Hide,
    Unload,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub experiment_id: String,
    pub variant_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub session: Session,
    pub assignments: Vec<Assignment>,
    pub report: FunnelReport,
    pub max_scroll_depth: u8,
    pub section_view_rate: f64,
    pub experiment_events: usize,
}

pub fn replay(
    script: &VisitScript,
    settings: &AnalyticsSettings,
    registry: Arc<ExperimentRegistry>,
    sink: Arc<EventSink>,
) -> ReplayOutcome {
    let mut page = SimulatedPage::new(
        script.page_url.clone(),
        script.document_height,
        script.viewport_height,
    );
    if let Some(referrer) = &script.referrer {
        page = page.with_referrer(referrer.clone());
    }
    let page = Arc::new(page);

    let session = match &script.session_id {
        Some(id) => Session::with_id(id.clone(), script.user_id.clone()),
        None => Session::new(script.user_id.clone()),
    };
    log_info!("replaying visit {} ({} steps)", session.session_id, script.steps.len());

    let mut experiments = AbTestManager::new(session.clone(), registry, Arc::clone(&sink));
    let mut funnel = FunnelTracker::new(session.clone(), page.clone(), Arc::clone(&sink));
    funnel.init();

    let mut scroll = ScrollDepthTracker::new(page.clone(), Arc::clone(&sink), settings.scroll_throttle());
    scroll.attach();

    let mut sections = SectionVisibilityTracker::new(page.clone(), settings.intersection_options());
    for (index, section_id) in script.sections.iter().enumerate() {
        sections.register(section_id.clone(), ElementId(index as u64 + 1));
    }

    let origin = Instant::now();
    for step in &script.steps {
        let now = origin + Duration::from_millis(step.at_ms);
        match &step.action {
            Action::Scroll { scroll_top } => {
                page.scroll_to(*scroll_top);
                scroll.on_scroll(now, &mut funnel);
            }
            Action::Resize { document_height } => page.set_document_height(*document_height),
            Action::Intersect {
                section,
                ratio,
                is_intersecting,
            } => {
                let Some(element) = sections.element_for(section) else {
                    log_warn!("intersection for unregistered section '{section}' ignored");
                    continue;
                };
                let entry = IntersectionEntry {
                    element,
                    is_intersecting: *is_intersecting,
                    intersection_ratio: *ratio,
                };
                sections.on_intersection(entry, &mut funnel);
            }
            Action::Cta { cta_id, action, text } => {
                funnel.track_cta_interaction(cta_id, *action, text.as_deref());
            }
            Action::Form { form_id, action, field } => {
                funnel.track_form_interaction(form_id, *action, field.as_deref());
            }
            Action::Convert {
                conversion_type,
                value,
            } => funnel.track_conversion(conversion_type, *value),
            Action::AbEvent {
                test_id,
                event_name,
                properties,
                value,
            } => experiments.track_event(test_id, event_name, properties.clone(), *value),
            Action::AbConversion {
                test_id,
                conversion_type,
                value,
            } => experiments.track_conversion(test_id, conversion_type, *value),
            Action::Hide => {
                scroll.on_visibility_hidden(&mut funnel);
            }
            Action::Unload => {
                scroll.on_unload(&mut funnel);
            }
        }
    }

    if scroll.phase() != ScrollPhase::Finalized {
        scroll.on_unload(&mut funnel);
    }
    scroll.destroy();
    sections.destroy();

    ReplayOutcome {
        assignments: experiments
            .assignments()
            .into_iter()
            .map(|(experiment_id, variant_id)| Assignment {
                experiment_id,
                variant_id,
            })
            .collect(),
        report: funnel.report(),
        max_scroll_depth: scroll.max_depth(),
        section_view_rate: sections.view_rate(),
        experiment_events: experiments.events().len(),
        session,
    }
}
