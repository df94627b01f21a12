//! Event loop driver tests
//!
//! Exit protocol, job priority over events, failure survival and
//! re-entrant scheduling.
//!
//! # Running Tests
//! ```bash
//! cargo test --test event_loop
//! ```

use hostloop_core::{
    CallbackError, CollectingSink, EventLoop, FailureSource, JobError, JobQueue, JobRunner, LoopConfig, LoopContext,
    LoopState, NoJobs,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn collecting<J: hostloop_core::JobRunner>(jobs: J) -> (EventLoop<J>, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    let event_loop = EventLoop::with_config(jobs, LoopConfig::default(), sink.clone()).unwrap();
    (event_loop, sink)
}

// ===== Exit protocol =====

#[test]
fn test_request_exit_from_foreign_thread_stops_idle_loop() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let handle = event_loop.handle();

    let requester = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.request_exit(7);
    });

    let start = Instant::now();
    assert_eq!(event_loop.run(), 7);
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(event_loop.exit_code(), 7);
    assert_eq!(event_loop.state(), LoopState::Stopped);
    requester.join().unwrap();
}

#[test]
fn test_stop_uses_configured_code() {
    let config = LoopConfig::from_toml_str("stop_exit_code = 3").unwrap();
    let mut event_loop = EventLoop::with_config(NoJobs, config, Arc::new(CollectingSink::new())).unwrap();
    assert_eq!(event_loop.exit_code(), 3);

    event_loop.handle().schedule(|cx| {
        cx.stop();
        Ok(())
    });
    assert_eq!(event_loop.run(), 3);
}

#[test]
fn test_events_after_exit_are_not_run() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let ran = Arc::new(Mutex::new(Vec::new()));
    let handle = event_loop.handle();

    for name in ["before", "exit", "after"] {
        let ran = ran.clone();
        handle.schedule(move |cx| {
            ran.lock().push(name);
            if name == "exit" {
                cx.exit(0);
            }
            Ok(())
        });
    }

    event_loop.run();
    assert_eq!(*ran.lock(), vec!["before", "exit"]);
}

#[test]
fn test_is_running_visible_from_other_threads() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let handle = event_loop.handle();
    assert!(!handle.is_running());

    let observer = {
        let handle = handle.clone();
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(2);
            while !handle.is_running() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            let seen = handle.is_running();
            handle.request_exit(0);
            seen
        })
    };

    event_loop.run();
    assert!(observer.join().unwrap());
    assert!(!handle.is_running());
}

// ===== Job priority =====

#[test]
fn test_jobs_drain_before_each_event() {
    let jobs = JobQueue::new();
    let mut event_loop = EventLoop::new(jobs.clone()).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    {
        let log = log.clone();
        jobs.push(move |_| {
            log.lock().push("job1".to_string());
            Ok(())
        });
    }
    for i in 0..2 {
        let log = log.clone();
        event_loop.handle().schedule(move |_| {
            log.lock().push(format!("event{}", i));
            Ok(())
        });
    }

    // Events cannot reach the job queue (it is loop-local), so queue the
    // follow-up job from setup code between turns
    assert!(event_loop.run_turn());
    {
        let log = log.clone();
        event_loop.jobs().push(move |_| {
            log.lock().push("job2".to_string());
            Ok(())
        });
    }
    assert!(event_loop.run_turn());

    assert_eq!(*log.lock(), vec!["job1", "event0", "job2", "event1"]);
}

#[test]
fn test_chained_jobs_run_in_same_drain() {
    let jobs = JobQueue::new();
    let mut event_loop = EventLoop::new(jobs.clone()).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    {
        let log = log.clone();
        let chained = jobs.clone();
        jobs.push(move |_| {
            log.lock().push("first");
            let log = log.clone();
            chained.push(move |_| {
                log.lock().push("second");
                Ok(())
            });
            Ok(())
        });
    }
    {
        let log = log.clone();
        event_loop.handle().schedule(move |cx| {
            log.lock().push("event");
            cx.exit(0);
            Ok(())
        });
    }

    event_loop.run();
    assert_eq!(*log.lock(), vec!["first", "second", "event"]);
}

#[test]
fn test_exit_from_job_skips_remaining_jobs() {
    let jobs = JobQueue::new();
    let mut event_loop = EventLoop::new(jobs.clone()).unwrap();

    jobs.push(|cx| {
        cx.exit(4);
        Ok(())
    });
    jobs.push(|_| Err(JobError::new("should not run")));

    assert_eq!(event_loop.run(), 4);
    assert_eq!(jobs.len(), 1);
}

// ===== Failure survival =====

#[test]
fn test_loop_survives_failing_callbacks() {
    let jobs = JobQueue::new();
    let (mut event_loop, sink) = collecting(jobs.clone());
    let handle = event_loop.handle();

    jobs.push(|_| Err(JobError::new("rejected promise")));
    handle.schedule(|_| Err(CallbackError::failed("bad event")));
    handle.schedule(|_| panic!("event panicked"));
    handle.schedule(|cx| {
        cx.exit(0);
        Ok(())
    });

    assert_eq!(event_loop.run(), 0);

    let reports = sink.reports();
    let sources: Vec<_> = reports.iter().map(|(source, _)| *source).collect();
    assert_eq!(
        sources,
        vec![FailureSource::EngineJob, FailureSource::Event, FailureSource::Event]
    );
    assert!(reports[2].1.contains("event panicked"));
}

/// Engine hook whose first drain panics.
struct PanicsOnce {
    panicked: bool,
}

impl JobRunner for PanicsOnce {
    fn run_pending_job(&mut self, _cx: &mut LoopContext<'_>) -> Result<bool, JobError> {
        if !self.panicked {
            self.panicked = true;
            panic!("engine job blew up");
        }
        Ok(false)
    }
}

#[test]
fn test_panicking_job_runner_is_reported() {
    let (mut event_loop, sink) = collecting(PanicsOnce { panicked: false });
    let handle = event_loop.handle();
    handle.schedule(|cx| {
        cx.exit(4);
        Ok(())
    });

    assert_eq!(event_loop.run(), 4);
    assert!(!handle.is_running());
    assert!(!handle.is_loop_thread());

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, FailureSource::EngineJob);
    assert!(reports[0].1.contains("engine job blew up"));
}

// ===== Re-entrant scheduling =====

#[test]
fn test_event_scheduled_from_event_runs_on_later_turn() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let turns_seen = Arc::new(Mutex::new(Vec::new()));

    {
        let turns_seen = turns_seen.clone();
        event_loop.handle().schedule(move |cx| {
            turns_seen.lock().push("outer");
            let turns_seen = turns_seen.clone();
            cx.schedule(move |_| {
                turns_seen.lock().push("inner");
                Ok(())
            });
            Ok(())
        });
    }

    assert!(event_loop.run_turn());
    assert_eq!(*turns_seen.lock(), vec!["outer"]);
    assert!(event_loop.run_turn());
    assert_eq!(*turns_seen.lock(), vec!["outer", "inner"]);
    assert_eq!(event_loop.turns(), 2);
}

#[test]
fn test_yield_keeps_loop_from_blocking() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let resolved = Arc::new(Mutex::new(false));

    {
        let resolved = resolved.clone();
        event_loop.context().request_yield(move |cx| {
            *resolved.lock() = true;
            cx.exit(0);
            Ok(())
        });
    }

    // Nothing is queued; the pending yield alone must carry the loop forward
    assert_eq!(event_loop.run(), 0);
    assert!(*resolved.lock());
    assert_eq!(event_loop.scheduler().yield_count(), 1);
}

#[test]
fn test_shutdown_discards_pending_events() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let handle = event_loop.handle();
    let ran = Arc::new(Mutex::new(false));

    {
        let ran = ran.clone();
        handle.schedule(move |_| {
            *ran.lock() = true;
            Ok(())
        });
    }
    event_loop.shutdown().unwrap();

    assert!(handle.queue().is_closed());
    assert!(handle.queue().is_empty());
    assert!(!*ran.lock());

    // Scheduling after shutdown is a silent no-op
    handle.schedule(|_| Ok(()));
    assert!(handle.queue().is_empty());
}

#[test]
fn test_run_after_shutdown_returns_without_spinning() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    event_loop.shutdown().unwrap();

    let start = Instant::now();
    assert_eq!(event_loop.run(), LoopConfig::default().stop_exit_code);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(event_loop.turns(), 0);
    assert_eq!(event_loop.state(), LoopState::Stopped);
}

#[test]
fn test_closing_queue_from_foreign_thread_ends_run() {
    let mut event_loop = EventLoop::new(NoJobs).unwrap();
    let handle = event_loop.handle();

    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.queue().close();
    });

    let start = Instant::now();
    event_loop.run();
    assert!(start.elapsed() < Duration::from_secs(2));
    // One blocked turn, then the closed queue is seen
    assert!(event_loop.turns() <= 2);
    closer.join().unwrap();
}
