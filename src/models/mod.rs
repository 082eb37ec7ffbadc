pub mod event;
pub mod experiment;
pub mod session;

pub use event::{
    properties, CtaAction, EventName, FormAction, FunnelEvent, Properties, ScrollMilestone,
};
pub use experiment::{Experiment, ExperimentStatus, Variant, VariantConfig};
pub use session::Session;
