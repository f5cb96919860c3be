//! Progress reporting

pub mod progress;
pub mod task_status;

pub use progress::{ProgressHandle, ProgressReporter};
pub use task_status::TaskStatusStore;
