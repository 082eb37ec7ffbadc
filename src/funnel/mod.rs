pub mod scroll;
pub mod sections;
pub mod tracker;

pub use scroll::{FinalizeReason, ScrollDepthTracker, ScrollPhase, DEFAULT_THROTTLE};
pub use sections::SectionVisibilityTracker;
pub use tracker::{FunnelReport, FunnelTracker};
