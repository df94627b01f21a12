//! Timer thread feeding the event queue
//!
//! A dedicated thread waits on a condvar for the earliest deadline in a
//! min-heap. Due timers are not run there: each one is posted to the
//! [`EventQueue`] and executes on the loop thread. Cancellation only flips a
//! flag; cancelled entries are dropped when they reach the top of the heap.

use crate::driver::LoopContext;
use crate::diagnostics::FailureSource;
use crate::error::{guarded, CallbackResult, LoopError};
use crate::queue::{Event, EventQueue};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Identifier of a scheduled timer. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl TimerId {
    /// Reserved "no timer" id
    pub const NONE: TimerId = TimerId(0);

    /// Whether this is the reserved "no timer" id
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timer callback. Repeating timers call it once per firing.
pub type TimerCallback = Box<dyn FnMut(&mut LoopContext<'_>) -> CallbackResult + Send + 'static>;

/// Shared timer record, referenced from both the heap and the id table.
struct Timer {
    id: TimerId,
    /// Present for repeating timers
    period: Option<Duration>,
    cancelled: AtomicBool,
    /// Empty while the callback is running
    callback: Mutex<Option<TimerCallback>>,
}

impl Timer {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }

    fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
    }
}

/// Entry in the deadline heap
struct HeapEntry {
    deadline: Instant,
    timer: Arc<Timer>,
}

// Reverse ordering for min-heap (earliest deadline first, then lowest id)
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.timer.id.cmp(&self.timer.id))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.timer.id == other.timer.id
    }
}

impl Eq for HeapEntry {}

/// State guarded by the timer mutex
struct TimerState {
    heap: BinaryHeap<HeapEntry>,
    by_id: FxHashMap<TimerId, Arc<Timer>>,
}

/// Background timer service
///
/// The timer thread holds a reference to the service, so dropping the last
/// outside handle does not end it: call [`TimerService::stop`]. `EventLoop`
/// does this on shutdown and on drop.
pub struct TimerService {
    state: Mutex<TimerState>,
    /// Wakes the timer thread on insert, re-arm or shutdown
    notify: Condvar,
    shutdown: AtomicBool,
    next_id: AtomicU64,
    queue: Arc<EventQueue>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    /// Create a timer service that delivers into `queue`. Not yet started.
    pub fn new(queue: Arc<EventQueue>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                by_id: FxHashMap::default(),
            }),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            queue,
            handle: Mutex::new(None),
        })
    }

    /// Spawn the timer thread.
    pub fn start(self: &Arc<Self>, thread_name: &str) -> Result<(), LoopError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }

        let timers = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || timers.run_loop())
            .map_err(LoopError::TimerThreadSpawn)?;

        *handle = Some(spawned);
        tracing::debug!(thread = thread_name, "timer thread started");
        Ok(())
    }

    /// Stop and join the timer thread. Pending timers are discarded unfired.
    pub fn stop(&self, timeout: Duration) -> Result<(), LoopError> {
        self.shutdown.store(true, AtomicOrdering::Release);

        let discarded = {
            let mut state = self.state.lock();
            let heap = mem::take(&mut state.heap);
            let by_id = mem::take(&mut state.by_id);
            // Notify under the lock so the thread cannot miss it between
            // its shutdown check and its wait.
            self.notify.notify_all();
            (heap, by_id)
        };
        // Callbacks are user code; drop them outside the lock.
        drop(discarded);

        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        join_with_timeout(handle, timeout)?;
        tracing::debug!("timer thread stopped");
        Ok(())
    }

    /// Schedule `callback` to run on the loop thread after `delay`, and
    /// every `delay` after that if `repeating`.
    ///
    /// Returns [`TimerId::NONE`] once the service has been stopped.
    pub fn create_timer(&self, callback: TimerCallback, delay: Duration, repeating: bool) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        let timer = Arc::new(Timer {
            id,
            period: repeating.then_some(delay),
            cancelled: AtomicBool::new(false),
            callback: Mutex::new(Some(callback)),
        });

        let mut state = self.state.lock();
        // Checked under the lock: stop() sets the flag before taking the heap
        if self.shutdown.load(AtomicOrdering::Acquire) {
            drop(state);
            tracing::trace!(timer = %id, "timer service stopped, dropping timer");
            return TimerId::NONE;
        }
        state.heap.push(HeapEntry {
            deadline: Instant::now() + delay,
            timer: timer.clone(),
        });
        state.by_id.insert(id, timer);
        // The new timer may be earlier than the one currently waited on
        self.notify.notify_one();
        id
    }

    /// Mark a timer cancelled. Unknown or already-finished ids are ignored.
    pub fn cancel(&self, id: TimerId) {
        let state = self.state.lock();
        if let Some(timer) = state.by_id.get(&id) {
            timer.cancel();
        }
    }

    /// Number of timers in the heap, cancelled ones included.
    pub fn pending_count(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Number of timers that are still tracked by id.
    pub fn active_timers(&self) -> usize {
        self.state.lock().by_id.len()
    }

    /// Timer thread main loop
    fn run_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let mut state = self.state.lock();

            // Re-check under the lock; stop() notifies while holding it.
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let Some(deadline) = state.heap.peek().map(|entry| entry.deadline) else {
                // Nothing scheduled; a spurious wake just re-loops into this wait.
                self.notify.wait(&mut state);
                continue;
            };

            if deadline > Instant::now() {
                // Wakes early if an earlier timer is inserted
                self.notify.wait_until(&mut state, deadline);
                continue;
            }

            let Some(entry) = state.heap.pop() else {
                continue;
            };

            if entry.timer.is_cancelled() {
                state.by_id.remove(&entry.timer.id);
                drop(state);
                tracing::trace!(timer = %entry.timer.id, "discarding cancelled timer");
                continue;
            }

            drop(state);
            self.queue.push(self.fire_event(entry.timer));
        }
    }

    /// Event that runs a due timer on the loop thread.
    fn fire_event(self: &Arc<Self>, timer: Arc<Timer>) -> Event {
        let timers = Arc::clone(self);
        Box::new(move |cx: &mut LoopContext<'_>| {
            timers.fire(&timer, cx);
            Ok(())
        })
    }

    fn fire(&self, timer: &Arc<Timer>, cx: &mut LoopContext<'_>) {
        // Cancelled between posting and delivery: drop silently.
        if timer.is_cancelled() {
            self.forget(timer.id);
            return;
        }

        // Only the loop thread fires a timer, and a repeating one is re-armed
        // after this returns, so the slot cannot be taken twice.
        let Some(mut callback) = timer.callback.lock().take() else {
            return;
        };
        let result = guarded(|| callback(cx));
        *timer.callback.lock() = Some(callback);
        if let Err(err) = result {
            cx.report(FailureSource::Timer(timer.id), &err);
        }

        match timer.period {
            Some(period)
                if !timer.is_cancelled() && !self.shutdown.load(AtomicOrdering::Acquire) =>
            {
                let mut state = self.state.lock();
                // Re-arm from now, not from the previous deadline.
                state.heap.push(HeapEntry {
                    deadline: Instant::now() + period,
                    timer: Arc::clone(timer),
                });
                self.notify.notify_one();
            }
            _ => self.forget(timer.id),
        }
    }

    fn forget(&self, id: TimerId) {
        let removed = self.state.lock().by_id.remove(&id);
        drop(removed);
    }
}

/// Join a thread with timeout; a stuck thread is detached and reported.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> Result<(), LoopError> {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            return handle.join().map_err(|_| LoopError::TimerThreadPanicked);
        }
        if start.elapsed() > timeout {
            drop(handle);
            return Err(LoopError::TimerThreadTimeout(timeout));
        }
        thread::sleep(Duration::from_millis(5));
    }
}
