mod config;
mod logging;
mod metrics;
mod node_file;

pub use config::{FeatureFlags, GcThresholds, GryphonConfig, IsolationLevel};
pub use logging::init_logging;
pub use metrics::{format_snapshot, install_debug_recorder};
pub use node_file::{NodeDescriptor, NodeFile};
