mod consumer;
mod dag;
mod layout;
mod producer;
mod state;
mod task;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use consumer::{ConsumerPool, DEFAULT_CONSUMER_COUNT};
pub use dag::Dag;
pub use layout::{LayoutErase, LayoutScan, RowScanEntry, VertexId};
pub use producer::Producer;
pub use state::{GcConfig, GcState, Job};
pub use task::{Arena, DownstreamTask, TaskKey, TaskKind, TaskRef, TaskState, UpstreamTask};
