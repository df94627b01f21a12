//! Round-robin scheduling tests
//!
//! Re-post counts, the per-invocation step bound, fairness towards other
//! events and failing steps.
//!
//! # Running Tests
//! ```bash
//! cargo test --test round_robin
//! ```

use hostloop_core::{
    step_task, CallbackError, CollectingSink, Event, EventLoop, FailureSource, LoopConfig, LoopContext, NoJobs, Step,
    StepTask,
};
use parking_lot::Mutex;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn finite_task(steps: usize) -> Box<dyn StepTask> {
    let mut taken = 0;
    step_task(move |_| {
        taken += 1;
        Ok(if taken == steps { Step::Done } else { Step::Pending })
    })
}

/// Run `tasks` as one set and return the number of re-posts it took.
fn reposts_for(tasks: Vec<Box<dyn StepTask>>) -> u64 {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    event_loop.context().run_round_robin(tasks, |cx| {
        cx.exit(0);
        Ok(())
    });
    assert_eq!(event_loop.run(), 0);
    assert_eq!(event_loop.scheduler().active_sets(), 0);
    // The first post starts the set; everything after it is a re-post
    event_loop.scheduler().round_robin_posts() - 1
}

#[test]
fn test_reposts_are_ceil_of_steps_over_budget() {
    for steps in [101usize, 150, 250, 300, 1_000] {
        let tasks = (0..4).map(|_| finite_task(steps)).collect();
        let expected = steps.div_ceil(100) as u64;
        assert_eq!(reposts_for(tasks), expected, "K = {}", steps);
    }
}

#[test]
fn test_small_sets_need_one_repost() {
    assert_eq!(reposts_for(vec![finite_task(1), finite_task(100)]), 1);
}

#[test]
fn test_custom_budget_changes_repost_count() {
    let config = LoopConfig {
        round_robin_budget: 10,
        ..LoopConfig::default()
    };
    let mut event_loop = EventLoop::with_config(NoJobs, config, Arc::new(CollectingSink::new())).unwrap();
    event_loop.context().run_round_robin(vec![finite_task(35)], |cx| {
        cx.exit(0);
        Ok(())
    });
    event_loop.run();
    assert_eq!(event_loop.scheduler().round_robin_posts() - 1, 4);
}

#[test]
fn test_no_task_steps_more_than_budget_between_other_events() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let since_tick = Arc::new(AtomicUsize::new(0));
    let max_between_ticks = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    // A ticker that re-posts itself, so it runs between every two set invocations
    fn tick(since_tick: Arc<AtomicUsize>, max: Arc<AtomicUsize>, finished: Arc<AtomicBool>) -> Event {
        Box::new(move |cx: &mut LoopContext<'_>| {
            let steps = since_tick.swap(0, Ordering::SeqCst);
            max.fetch_max(steps, Ordering::SeqCst);
            if !finished.load(Ordering::SeqCst) {
                cx.handle().schedule_boxed(tick(since_tick, max, finished));
            }
            Ok(())
        })
    }
    event_loop
        .handle()
        .schedule_boxed(tick(since_tick.clone(), max_between_ticks.clone(), finished.clone()));

    let mut tasks: Vec<Box<dyn StepTask>> = Vec::new();
    for task in 0..3 {
        let since_tick = since_tick.clone();
        let mut taken = 0;
        tasks.push(step_task(move |_| {
            taken += 1;
            if task == 0 {
                since_tick.fetch_add(1, Ordering::SeqCst);
            }
            Ok(if taken == 450 { Step::Done } else { Step::Pending })
        }));
    }
    {
        let finished = finished.clone();
        event_loop.context().run_round_robin(tasks, move |cx| {
            finished.store(true, Ordering::SeqCst);
            cx.exit(0);
            Ok(())
        });
    }

    event_loop.run();
    assert_eq!(max_between_ticks.load(Ordering::SeqCst), 100);
}

#[test]
fn test_round_robin_does_not_starve_timers() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let timer_fired = Arc::new(AtomicBool::new(false));

    {
        let timer_fired = timer_fired.clone();
        event_loop.handle().set_timeout(
            move |_| {
                timer_fired.store(true, Ordering::SeqCst);
                Ok(())
            },
            Duration::from_millis(10),
        );
    }

    // Runs until the timer has fired, so it only finishes if the timer gets a turn
    let flag = timer_fired.clone();
    let spinner = step_task(move |_| {
        Ok(if flag.load(Ordering::SeqCst) { Step::Done } else { Step::Pending })
    });
    event_loop.context().run_round_robin(vec![spinner], |cx| {
        cx.exit(0);
        Ok(())
    });

    assert_eq!(event_loop.run(), 0);
    assert!(timer_fired.load(Ordering::SeqCst));
}

#[test]
fn test_tasks_interleave_within_an_invocation() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let log = Rc::new(std::cell::RefCell::new(Vec::new()));

    let tasks = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            let log = log.clone();
            let remaining = Cell::new(2);
            step_task(move |_| {
                log.borrow_mut().push(name);
                remaining.set(remaining.get() - 1);
                Ok(if remaining.get() == 0 { Step::Done } else { Step::Pending })
            })
        })
        .collect();
    event_loop.context().run_round_robin(tasks, |cx| {
        cx.exit(0);
        Ok(())
    });

    event_loop.run();
    assert_eq!(*log.borrow(), vec!["a", "b", "c", "a", "b", "c"]);
}

#[test]
fn test_failing_step_is_reported_and_siblings_finish() {
    let sink = Arc::new(CollectingSink::new());
    let mut event_loop = EventLoop::with_config(NoJobs, LoopConfig::default(), sink.clone()).unwrap();
    let completed = Arc::new(Mutex::new(false));

    let failing = step_task(|_| Err(CallbackError::failed("generator threw")));
    let panicking = step_task(|_| panic!("generator panicked"));
    let tasks = vec![failing, finite_task(120), panicking];

    let id = {
        let completed = completed.clone();
        event_loop.context().run_round_robin(tasks, move |cx| {
            *completed.lock() = true;
            cx.exit(0);
            Ok(())
        })
    };

    event_loop.run();
    assert!(*completed.lock());

    let reports = sink.reports();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|(source, _)| *source == FailureSource::RoundRobinStep(id)));
}

#[test]
fn test_failing_completion_is_reported() {
    let sink = Arc::new(CollectingSink::new());
    let mut event_loop = EventLoop::with_config(NoJobs, LoopConfig::default(), sink.clone()).unwrap();

    let id = event_loop.context().run_round_robin(vec![finite_task(3)], |cx| {
        cx.schedule(|cx| {
            cx.exit(0);
            Ok(())
        });
        Err(CallbackError::failed("resolve failed"))
    });

    event_loop.run();
    assert_eq!(sink.reports()[0].0, FailureSource::RoundRobinComplete(id));
}

#[test]
fn test_independent_sets_progress_together() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let done = Rc::new(std::cell::RefCell::new(Vec::new()));

    for (name, steps) in [("long", 500), ("short", 150)] {
        let done = done.clone();
        event_loop.context().run_round_robin(vec![finite_task(steps)], move |cx| {
            done.borrow_mut().push(name);
            if done.borrow().len() == 2 {
                cx.exit(0);
            }
            Ok(())
        });
    }

    event_loop.run();
    assert_eq!(*done.borrow(), vec!["short", "long"]);
}
