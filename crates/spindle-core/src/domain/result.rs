//! Per-attempt outcome reported on a task's result stream.

use std::fmt;

use crate::error::OperationError;

/// One reported outcome of a task.
///
/// - `done=false, err=Some(_)`: an attempt failed and retries remain.
/// - `done=true, err=None`: terminal success.
/// - `done=true, err=Some(_)`: terminal failure (retries exhausted).
pub struct TaskResult {
    pub done: bool,
    pub err: Option<OperationError>,

    /// 1-based attempt that produced this result.
    pub attempt: u32,
}

impl TaskResult {
    pub fn success(attempt: u32) -> Self {
        Self {
            done: true,
            err: None,
            attempt,
        }
    }

    pub fn failure(attempt: u32, err: OperationError) -> Self {
        Self {
            done: false,
            err: Some(err),
            attempt,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.done
    }

    pub fn is_success(&self) -> bool {
        self.done && self.err.is_none()
    }
}

impl fmt::Debug for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResult")
            .field("done", &self.done)
            .field("err", &self.err.as_ref().map(|e| e.to_string()))
            .field("attempt", &self.attempt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let ok = TaskResult::success(1);
        assert!(ok.is_terminal() && ok.is_success());

        let mut failed = TaskResult::failure(2, "boom".into());
        assert!(!failed.is_terminal());
        assert!(!failed.is_success());

        failed.done = true;
        assert!(failed.is_terminal());
        assert!(!failed.is_success());
    }

    #[test]
    fn debug_renders_error_message() {
        let r = TaskResult::failure(3, "flaky".into());
        let s = format!("{r:?}");
        assert!(s.contains("flaky"));
        assert!(s.contains("attempt: 3"));
    }
}
