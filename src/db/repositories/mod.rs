pub mod local_storage;
pub mod session_summaries;

pub use session_summaries::SessionSummary;
