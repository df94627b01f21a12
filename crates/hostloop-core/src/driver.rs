//! Event loop driver
//!
//! Owns the loop thread's "turn": resolve pending yields, drain engine jobs
//! to exhaustion, then take at most one event from the queue. The queue wait
//! only blocks when the turn did no work.
//!
//! Services are plain values wired together at construction:
//! - [`LoopHandle`] is the cross-thread surface (schedule, timers, exit, submit)
//! - [`LoopContext`] is handed to every callback running on the loop thread
//! - [`EventLoop`] owns the job runner, the yield scheduler and the state machine

use crate::config::LoopConfig;
use crate::diagnostics::{DiagnosticSink, FailureSource, TracingSink};
use crate::engine::JobRunner;
use crate::error::{guarded, CallbackError, CallbackResult, JobError, LoopError};
use crate::queue::{Event, EventQueue};
use crate::scheduler::{self, RoundRobinId, StepTask, YieldResolver, YieldScheduler};
use crate::timer::{TimerCallback, TimerId, TimerService};
use parking_lot::Mutex;
use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Phase of the loop thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Between turns, or not yet running
    Idle,
    /// Executing engine jobs
    DrainingJobs,
    /// Waiting on (or polling) the event queue
    AwaitingEvent,
    /// Executing one event
    ProcessingEvent,
    /// Exit observed; the loop has returned
    Stopped,
}

/// Exit flags shared between the loop thread and everyone who may stop it.
struct LoopControl {
    should_exit: AtomicBool,
    exit_code: AtomicI32,
    running: AtomicBool,
    loop_thread: Mutex<Option<ThreadId>>,
    stop_exit_code: i32,
}

// ============================================================================
// LoopHandle
// ============================================================================

/// Cloneable, thread-safe handle to a loop's services.
#[derive(Clone)]
pub struct LoopHandle {
    queue: Arc<EventQueue>,
    timers: Arc<TimerService>,
    control: Arc<LoopControl>,
}

impl LoopHandle {
    fn new(queue: Arc<EventQueue>, timers: Arc<TimerService>, stop_exit_code: i32) -> Self {
        Self {
            queue,
            timers,
            control: Arc::new(LoopControl {
                should_exit: AtomicBool::new(false),
                exit_code: AtomicI32::new(stop_exit_code),
                running: AtomicBool::new(false),
                loop_thread: Mutex::new(None),
                stop_exit_code,
            }),
        }
    }

    /// Queue an event for the loop thread.
    pub fn schedule<F>(&self, event: F)
    where
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        self.queue.schedule(event);
    }

    /// Queue an already boxed event.
    pub fn schedule_boxed(&self, event: Event) {
        self.queue.push(event);
    }

    /// Wake the loop if it is blocked waiting for an event.
    pub fn wake(&self) {
        self.queue.wake();
    }

    /// Schedule a timer; see [`TimerService::create_timer`].
    pub fn create_timer<F>(&self, callback: F, delay: Duration, repeating: bool) -> TimerId
    where
        F: FnMut(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        let callback: TimerCallback = Box::new(callback);
        self.timers.create_timer(callback, delay, repeating)
    }

    /// One-shot timer.
    pub fn set_timeout<F>(&self, callback: F, delay: Duration) -> TimerId
    where
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        let mut callback = Some(callback);
        self.create_timer(
            move |cx| match callback.take() {
                Some(callback) => callback(cx),
                None => Ok(()),
            },
            delay,
            false,
        )
    }

    /// Repeating timer, re-armed `period` after each firing.
    pub fn set_interval<F>(&self, callback: F, period: Duration) -> TimerId
    where
        F: FnMut(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        self.create_timer(callback, period, true)
    }

    /// Cancel a timer. Unknown ids are ignored.
    pub fn cancel(&self, id: TimerId) {
        self.timers.cancel(id);
    }

    /// Alias of [`cancel`](Self::cancel); timeouts and intervals share ids.
    pub fn clear_timeout(&self, id: TimerId) {
        self.cancel(id);
    }

    /// Alias of [`cancel`](Self::cancel); timeouts and intervals share ids.
    pub fn clear_interval(&self, id: TimerId) {
        self.cancel(id);
    }

    /// Ask the loop to exit with `code` at the next turn boundary.
    pub fn request_exit(&self, code: i32) {
        self.control.exit_code.store(code, Ordering::Release);
        self.control.should_exit.store(true, Ordering::Release);
        self.queue.wake();
    }

    /// Ask the loop to stop without a specific exit code.
    pub fn stop(&self) {
        self.request_exit(self.control.stop_exit_code);
    }

    /// Whether exit has been requested.
    pub fn should_exit(&self) -> bool {
        self.control.should_exit.load(Ordering::Acquire)
    }

    /// Exit code requested so far (the stop code if none was requested).
    pub fn exit_code(&self) -> i32 {
        self.control.exit_code.load(Ordering::Acquire)
    }

    /// Whether a thread is currently inside [`EventLoop::run`].
    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::Acquire)
    }

    /// Whether the calling thread is the one running the loop.
    pub fn is_loop_thread(&self) -> bool {
        *self.control.loop_thread.lock() == Some(thread::current().id())
    }

    /// The underlying event queue.
    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    /// The underlying timer service.
    pub fn timers(&self) -> &Arc<TimerService> {
        &self.timers
    }
}

// ============================================================================
// LoopContext
// ============================================================================

/// Capabilities available to code running on the loop thread.
///
/// Passed explicitly into every event, timer callback, job, step and
/// resolver.
pub struct LoopContext<'a> {
    pub(crate) handle: &'a LoopHandle,
    pub(crate) scheduler: &'a mut YieldScheduler,
    pub(crate) sink: &'a dyn DiagnosticSink,
}

impl<'a> LoopContext<'a> {
    pub(crate) fn new(
        handle: &'a LoopHandle,
        scheduler: &'a mut YieldScheduler,
        sink: &'a dyn DiagnosticSink,
    ) -> Self {
        Self {
            handle,
            scheduler,
            sink,
        }
    }

    /// Thread-safe handle, e.g. to hand to another thread.
    pub fn handle(&self) -> &LoopHandle {
        self.handle
    }

    /// Read-only view of the yield scheduler.
    pub fn scheduler(&self) -> &YieldScheduler {
        &*self.scheduler
    }

    /// Queue an event; it runs on a later turn, never the current one.
    pub fn schedule<F>(&self, event: F)
    where
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        self.handle.schedule(event);
    }

    /// See [`LoopHandle::create_timer`].
    pub fn create_timer<F>(&self, callback: F, delay: Duration, repeating: bool) -> TimerId
    where
        F: FnMut(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        self.handle.create_timer(callback, delay, repeating)
    }

    /// See [`LoopHandle::set_timeout`].
    pub fn set_timeout<F>(&self, callback: F, delay: Duration) -> TimerId
    where
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        self.handle.set_timeout(callback, delay)
    }

    /// See [`LoopHandle::set_interval`].
    pub fn set_interval<F>(&self, callback: F, period: Duration) -> TimerId
    where
        F: FnMut(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        self.handle.set_interval(callback, period)
    }

    /// Cancel a timer.
    pub fn cancel(&self, id: TimerId) {
        self.handle.cancel(id);
    }

    /// Resolve `resolve` after `delay`.
    pub fn sleep<F>(&self, delay: Duration, resolve: F) -> TimerId
    where
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        self.handle.set_timeout(resolve, delay)
    }

    /// Pause until the next loop turn; `resolver` runs at its start.
    pub fn request_yield<F>(&mut self, resolver: F)
    where
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + 'static,
    {
        let resolver: YieldResolver = Box::new(resolver);
        self.scheduler.push_yield(resolver);
    }

    /// Number of single-yield requests resolved so far.
    pub fn yield_count(&self) -> u64 {
        self.scheduler.yield_count()
    }

    /// Step `tasks` round-robin until all are done, then call `on_complete`.
    pub fn run_round_robin<F>(&mut self, tasks: Vec<Box<dyn StepTask>>, on_complete: F) -> RoundRobinId
    where
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + 'static,
    {
        scheduler::start_round_robin(self, tasks, Box::new(on_complete))
    }

    /// Exit the loop with `code` once the current callback returns.
    pub fn exit(&self, code: i32) {
        self.handle.request_exit(code);
    }

    /// Stop the loop with the configured stop code.
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Report a failure to the diagnostic sink.
    pub fn report(&self, source: FailureSource, error: &dyn Error) {
        self.sink.report(source, error);
    }
}

// ============================================================================
// EventLoop
// ============================================================================

/// Single-threaded driver interleaving engine jobs with queued events.
pub struct EventLoop<J: JobRunner> {
    handle: LoopHandle,
    scheduler: YieldScheduler,
    jobs: J,
    sink: Arc<dyn DiagnosticSink>,
    config: LoopConfig,
    state: LoopState,
    turns: u64,
    shut_down: bool,
}

impl<J: JobRunner> EventLoop<J> {
    /// Create a loop with the default config, logging failures via `tracing`.
    pub fn new(jobs: J) -> Result<Self, LoopError> {
        Self::with_config(jobs, LoopConfig::default(), Arc::new(TracingSink))
    }

    /// Create a loop and start its timer thread.
    pub fn with_config(
        jobs: J,
        config: LoopConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, LoopError> {
        config.validate()?;

        let queue = Arc::new(EventQueue::new());
        let timers = TimerService::new(queue.clone());
        timers.start(&config.timer_thread_name)?;

        Ok(Self {
            handle: LoopHandle::new(queue, timers, config.stop_exit_code),
            scheduler: YieldScheduler::new(config.round_robin_budget),
            jobs,
            sink,
            config,
            state: LoopState::Idle,
            turns: 0,
            shut_down: false,
        })
    }

    /// Thread-safe handle to this loop.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Context for host setup code run before (or between) `run` calls.
    pub fn context(&mut self) -> LoopContext<'_> {
        LoopContext::new(&self.handle, &mut self.scheduler, &*self.sink)
    }

    /// The engine's job runner.
    pub fn jobs(&self) -> &J {
        &self.jobs
    }

    /// Mutable access to the engine's job runner.
    pub fn jobs_mut(&mut self) -> &mut J {
        &mut self.jobs
    }

    /// The yield scheduler.
    pub fn scheduler(&self) -> &YieldScheduler {
        &self.scheduler
    }

    /// Configuration this loop was built with.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Current state of the loop thread.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Number of completed turns.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Exit code requested so far.
    pub fn exit_code(&self) -> i32 {
        self.handle.exit_code()
    }

    /// Run turns until exit is requested; returns the exit code.
    pub fn run(&mut self) -> i32 {
        *self.handle.control.loop_thread.lock() = Some(thread::current().id());
        self.handle.control.running.store(true, Ordering::Release);
        tracing::debug!("event loop started");

        while !self.handle.should_exit() {
            // A closed queue never blocks, so turning further would spin
            if self.handle.queue.is_closed() {
                tracing::debug!("event queue closed, leaving loop");
                break;
            }
            self.run_turn();
        }

        self.state = LoopState::Stopped;
        self.handle.control.running.store(false, Ordering::Release);
        *self.handle.control.loop_thread.lock() = None;

        let code = self.handle.exit_code();
        tracing::debug!(code, turns = self.turns, "event loop exited");
        code
    }

    /// Execute exactly one turn. Returns whether any job or event ran.
    pub fn run_turn(&mut self) -> bool {
        let handle = &self.handle;
        let sink = &*self.sink;

        // Yields requested before this turn began
        {
            let mut cx = LoopContext::new(handle, &mut self.scheduler, sink);
            scheduler::resolve_pending_yields(&mut cx);
        }

        self.state = LoopState::DrainingJobs;
        let mut did_work = false;
        while !handle.should_exit() {
            let mut cx = LoopContext::new(handle, &mut self.scheduler, sink);
            let jobs = &mut self.jobs;
            let result = catch_unwind(AssertUnwindSafe(|| jobs.run_pending_job(&mut cx)))
                .unwrap_or_else(|payload| Err(JobError::from(CallbackError::from_panic(payload))));
            match result {
                Ok(true) => did_work = true,
                Ok(false) => break,
                Err(err) => {
                    sink.report(FailureSource::EngineJob, &err);
                    did_work = true;
                    break;
                }
            }
        }

        if handle.should_exit() {
            self.state = LoopState::Idle;
            self.turns += 1;
            return did_work;
        }

        // Block only if the turn was idle and no yield is waiting on the next one
        self.state = LoopState::AwaitingEvent;
        let wait = !did_work && !self.scheduler.has_pending_yields();
        let event = handle.queue.dequeue(wait);

        let ran_event = event.is_some();
        if let Some(event) = event {
            self.state = LoopState::ProcessingEvent;
            let mut cx = LoopContext::new(handle, &mut self.scheduler, sink);
            if let Err(err) = guarded(|| event(&mut cx)) {
                sink.report(FailureSource::Event, &err);
            }
        }

        self.state = LoopState::Idle;
        self.turns += 1;
        did_work || ran_event
    }

    /// Close the queue and stop the timer thread.
    ///
    /// Pending events are dropped unrun, which rejects outstanding
    /// cross-thread submissions. Idempotent.
    pub fn shutdown(&mut self) -> Result<(), LoopError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        self.handle.queue.close();
        self.handle.timers.stop(self.config.shutdown_timeout())
    }
}

impl<J: JobRunner> Drop for EventLoop<J> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!("event loop shutdown failed: {}", err);
        }
    }
}

/// Run `f` with a context over detached services (timer thread not started).
#[cfg(test)]
pub(crate) fn with_test_context<R>(f: impl FnOnce(&mut LoopContext<'_>) -> R) -> R {
    let queue = Arc::new(EventQueue::new());
    let timers = TimerService::new(queue.clone());
    let handle = LoopHandle::new(queue, timers, 1);
    let mut scheduler = YieldScheduler::new(crate::config::DEFAULT_ROUND_ROBIN_BUDGET);
    let mut cx = LoopContext::new(&handle, &mut scheduler, &TracingSink);
    f(&mut cx)
}
