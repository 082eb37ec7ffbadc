pub mod manager;
pub mod registry;
pub mod stats;

pub use manager::AbTestManager;
pub use registry::ExperimentRegistry;
pub use stats::{analyze, calculate_significance, ArmStats, ExperimentAnalysis};
