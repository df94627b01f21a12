//! Thread-safe event queue
//!
//! FIFO of boxed callbacks. Any thread may produce; only the loop thread
//! consumes. Events are popped under the lock and executed after it is
//! released, so an event may schedule further events without deadlocking.

use crate::driver::LoopContext;
use crate::error::CallbackResult;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::mem;

/// A queued unit of work, executed once on the loop thread.
pub type Event = Box<dyn FnOnce(&mut LoopContext<'_>) -> CallbackResult + Send + 'static>;

struct QueueState {
    events: VecDeque<Event>,
    /// Set by `wake()`; consumed by the next `dequeue`. Keeps a wake that
    /// lands before the consumer starts waiting from being lost.
    woken: bool,
    /// Once closed, new events are dropped instead of queued.
    closed: bool,
}

/// Multi-producer, single-consumer event FIFO.
pub struct EventQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl EventQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                woken: false,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append a callback to the back of the queue.
    pub fn schedule<F>(&self, event: F)
    where
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
    {
        self.push(Box::new(event));
    }

    /// Append an already boxed event to the back of the queue.
    ///
    /// Never blocks beyond the queue lock. On a closed queue the event is
    /// dropped without running.
    pub fn push(&self, event: Event) {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            tracing::trace!("event queue closed, dropping event");
            drop(event);
            return;
        }
        state.events.push_back(event);
        drop(state);
        self.available.notify_one();
    }

    /// Pop the front event.
    ///
    /// With `wait` set and nothing queued, blocks until an event is pushed
    /// or `wake()` is called. A single wakeup is honoured: if the queue is
    /// still empty afterwards, returns `None` and the caller re-loops.
    pub fn dequeue(&self, wait: bool) -> Option<Event> {
        let mut state = self.state.lock();
        if wait && state.events.is_empty() && !state.woken && !state.closed {
            self.available.wait(&mut state);
        }
        state.woken = false;
        state.events.pop_front()
    }

    /// Break a consumer blocked in `dequeue` without queueing anything.
    pub fn wake(&self) {
        let mut state = self.state.lock();
        state.woken = true;
        self.available.notify_one();
    }

    /// Close the queue and discard every pending event without running it.
    ///
    /// Returns how many events were discarded. Discarded events are dropped
    /// after the lock is released, so their destructors may touch the queue.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            state.woken = true;
            mem::take(&mut state.events)
        };
        self.available.notify_all();

        let count = discarded.len();
        if count > 0 {
            tracing::debug!(count, "discarding pending events");
        }
        drop(discarded);
        count
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Whether no events are queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().events.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        // Pending events are lost, never run.
        self.close();
    }
}
