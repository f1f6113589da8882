use crate::Result;

pub trait Run {
    /// Runs the task on the underlying executor.
    fn run<F>(&self, task: F) -> Result<()>
        where F: FnOnce() + Send + 'static;
}
