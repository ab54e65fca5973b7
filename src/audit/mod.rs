//! Audit log — data model and write path for dispatch history.

pub mod model;
pub mod recorder;

pub use model::{DispatchLog, ExecutionStatus, WorkflowExecution, WorkflowNodeLog};
pub use recorder::{ExecutionRecorder, NodeVisit};
