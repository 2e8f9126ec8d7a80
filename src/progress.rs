//! Progress reporting for long-running sandbox steps.
//!
//! Container startup and agent execution can take minutes; callers may wire
//! a sink to observe output as it streams. Correctness never depends on the
//! sink, so the no-op sink is always a valid choice.

/// Receives one callback per unit of observable output.
pub trait Progress: Send + Sync {
    /// Called for each output line produced by a long-running step.
    fn on_output(&self, line: &str);
}

/// Sink that discards all output.
pub struct NoProgress;

impl Progress for NoProgress {
    fn on_output(&self, _line: &str) {}
}

impl<F> Progress for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_output(&self, line: &str) {
        self(line)
    }
}
