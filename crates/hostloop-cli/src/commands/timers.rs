//! `hostloop timers`: a repeating timer cancelled by a one-shot one.

use super::{millis, new_loop};
use crate::output::StyledOutput;
use hostloop_core::{LoopConfig, TimerId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use termcolor::ColorChoice;

pub fn execute(config: LoopConfig, color: ColorChoice, interval_ms: u64, duration_ms: u64) -> anyhow::Result<i32> {
    let mut event_loop = new_loop(config)?;
    let handle = event_loop.handle();
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let finished_at = Arc::new(Mutex::new(None));
    let start = Instant::now();

    let interval = {
        let ticks = ticks.clone();
        handle.set_interval(
            move |_| {
                ticks.lock().push(start.elapsed());
                Ok(())
            },
            Duration::from_millis(interval_ms),
        )
    };

    {
        let finished_at = finished_at.clone();
        handle.set_timeout(
            move |cx| {
                cx.cancel(interval);
                *finished_at.lock() = Some(start.elapsed());
                cx.exit(0);
                Ok(())
            },
            Duration::from_millis(duration_ms),
        );
    }

    let code = event_loop.run();
    report(color, interval, interval_ms, &ticks.lock(), *finished_at.lock());
    Ok(code)
}

fn report(color: ColorChoice, interval: TimerId, interval_ms: u64, ticks: &[Duration], finished_at: Option<Duration>) {
    let mut out = StyledOutput::new(color);
    out.heading(&format!("Interval timer {} every {} ms", interval, interval_ms));

    let mut previous = Duration::ZERO;
    for (n, at) in ticks.iter().enumerate() {
        out.row(
            &format!("tick {}", n + 1),
            &format!("{} (+{})", millis(*at), millis(at.saturating_sub(previous))),
        );
        previous = *at;
    }

    if let Some(at) = finished_at {
        out.row("cancelled and exited", &millis(at));
    }
    out.success(&format!("{} firings", ticks.len()));
    out.newline();
}
