pub mod console;
pub mod gateway;
pub mod round_robin;
pub mod timers;

use hostloop_core::{EventLoop, LoopConfig, NoJobs, TracingSink};
use std::sync::Arc;

/// Loop used by every command. Failures inside callbacks go to the log.
pub fn new_loop(config: LoopConfig) -> anyhow::Result<EventLoop<NoJobs>> {
    Ok(EventLoop::with_config(NoJobs, config, Arc::new(TracingSink))?)
}

/// Milliseconds with one decimal, for reports.
pub fn millis(duration: std::time::Duration) -> String {
    format!("{:.1} ms", duration.as_secs_f64() * 1000.0)
}
