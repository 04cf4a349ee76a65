//! Domain model: task ids, tasks, and the results they report.

pub mod ids;
pub mod result;
pub mod task;

pub use ids::TaskId;
pub use result::TaskResult;
pub use task::{Blocking, Operation, Task, TaskHandle};
