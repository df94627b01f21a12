//! Diagnostic sink for callback and job failures
//!
//! Failures inside the loop never stop it. They are handed to a host-supplied
//! [`DiagnosticSink`] together with where they came from.

use crate::scheduler::RoundRobinId;
use crate::timer::TimerId;
use parking_lot::Mutex;
use std::error::Error;
use std::fmt;

/// Where a reported failure originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    /// The engine's own pending-job runner
    EngineJob,
    /// A plain queued event
    Event,
    /// A timer callback
    Timer(TimerId),
    /// A single-yield resolver
    YieldResolver,
    /// A step of a round-robin task
    RoundRobinStep(RoundRobinId),
    /// The completion callback of a round-robin set
    RoundRobinComplete(RoundRobinId),
}

impl fmt::Display for FailureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureSource::EngineJob => write!(f, "engine job"),
            FailureSource::Event => write!(f, "event"),
            FailureSource::Timer(id) => write!(f, "timer {}", id),
            FailureSource::YieldResolver => write!(f, "yield resolver"),
            FailureSource::RoundRobinStep(id) => write!(f, "round-robin set {} step", id.0),
            FailureSource::RoundRobinComplete(id) => {
                write!(f, "round-robin set {} completion", id.0)
            }
        }
    }
}

/// Receives failures from the loop thread.
pub trait DiagnosticSink: Send + Sync {
    /// Report one failure.
    fn report(&self, source: FailureSource, error: &dyn Error);
}

/// Default sink: logs through `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, source: FailureSource, error: &dyn Error) {
        tracing::error!(source = %source, "{}", error);
    }
}

/// Sink that keeps every report in memory. Useful for hosts that surface
/// failures later, and for tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<(FailureSource, String)>>,
}

impl CollectingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all reports so far.
    pub fn reports(&self) -> Vec<(FailureSource, String)> {
        self.reports.lock().clone()
    }

    /// Number of reports so far.
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    /// Whether nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, source: FailureSource, error: &dyn Error) {
        self.reports.lock().push((source, error.to_string()));
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for std::sync::Arc<S> {
    fn report(&self, source: FailureSource, error: &dyn Error) {
        (**self).report(source, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallbackError;

    #[test]
    fn test_collecting_sink_records_source_and_message() {
        let sink = CollectingSink::new();
        sink.report(FailureSource::Event, &CallbackError::failed("bad"));
        sink.report(FailureSource::Timer(TimerId(3)), &CallbackError::failed("worse"));

        let reports = sink.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0], (FailureSource::Event, "bad".to_string()));
        assert_eq!(reports[1].0, FailureSource::Timer(TimerId(3)));
    }

    #[test]
    fn test_failure_source_display() {
        assert_eq!(FailureSource::Timer(TimerId(5)).to_string(), "timer 5");
        assert_eq!(
            FailureSource::RoundRobinStep(RoundRobinId(2)).to_string(),
            "round-robin set 2 step"
        );
    }
}
