//! `hostloop round-robin`: step a task set and show how it shared the loop.

use super::{millis, new_loop};
use crate::output::StyledOutput;
use hostloop_core::{step_task, LoopConfig, Step, StepTask};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use termcolor::ColorChoice;

pub fn execute(config: LoopConfig, color: ColorChoice, tasks: usize, steps: usize) -> anyhow::Result<i32> {
    let budget = config.round_robin_budget;
    let mut event_loop = new_loop(config)?;
    let start = Instant::now();

    // A 1ms heartbeat shows timers keep firing while the set runs
    let heartbeats = Arc::new(AtomicU64::new(0));
    let heartbeat = {
        let heartbeats = heartbeats.clone();
        event_loop.handle().set_interval(
            move |_| {
                heartbeats.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Duration::from_millis(1),
        )
    };

    let total_steps = Rc::new(Cell::new(0u64));
    let set: Vec<Box<dyn StepTask>> = (0..tasks)
        .map(|_| {
            let total_steps = total_steps.clone();
            let mut taken = 0;
            step_task(move |_| {
                taken += 1;
                total_steps.set(total_steps.get() + 1);
                Ok(if taken >= steps { Step::Done } else { Step::Pending })
            })
        })
        .collect();

    let completed_at = Rc::new(Cell::new(None));
    {
        let completed_at = completed_at.clone();
        event_loop.context().run_round_robin(set, move |cx| {
            completed_at.set(Some(start.elapsed()));
            cx.cancel(heartbeat);
            cx.exit(0);
            Ok(())
        });
    }

    let code = event_loop.run();

    let mut out = StyledOutput::new(color);
    out.heading(&format!("{} tasks x {} steps, budget {}", tasks, steps, budget));
    out.row("steps taken", &total_steps.get().to_string());
    out.row(
        "re-posts",
        &event_loop.scheduler().round_robin_posts().saturating_sub(1).to_string(),
    );
    out.row("loop turns", &event_loop.turns().to_string());
    out.row("heartbeats during run", &heartbeats.load(Ordering::Relaxed).to_string());
    if let Some(at) = completed_at.get() {
        out.success(&format!("completed in {}", millis(at)));
        out.newline();
    }
    Ok(code)
}
