//! Cross-thread gateway
//!
//! Lets a foreign thread run work on the loop thread and block for the
//! result. Each submission carries its own mutex/condvar rendezvous; only
//! the submitting thread ever waits on it.
//!
//! A submission dropped without running (queue closed, loop shut down)
//! resolves as [`GatewayError::Rejected`], so no caller is left blocked.

use crate::driver::{LoopContext, LoopHandle};
use crate::error::{guarded, CallbackResult, GatewayError};
use parking_lot::{Condvar, Mutex};
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Slot<R> {
    Waiting,
    Ready(Result<R, GatewayError>),
    Taken,
}

/// Per-submission rendezvous between the loop thread and the caller.
struct Rendezvous<R> {
    slot: Mutex<Slot<R>>,
    ready: Condvar,
}

impl<R> Rendezvous<R> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Waiting),
            ready: Condvar::new(),
        }
    }

    /// Store the outcome and release the caller. First outcome wins.
    fn complete(&self, outcome: Result<R, GatewayError>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Waiting) {
            *slot = Slot::Ready(outcome);
            self.ready.notify_one();
        }
    }

    /// Block until an outcome is stored, or until `deadline` passes.
    fn wait(&self, deadline: Option<Instant>) -> Result<R, GatewayError> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Waiting) {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut slot, deadline).timed_out()
                        && matches!(*slot, Slot::Waiting)
                    {
                        return Err(GatewayError::TimedOut);
                    }
                }
                None => self.ready.wait(&mut slot),
            }
        }
        match mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(outcome) => outcome,
            Slot::Waiting | Slot::Taken => Err(GatewayError::Rejected),
        }
    }
}

/// Work in flight; rejects its caller if dropped unrun.
struct Submission<R, F> {
    work: Option<F>,
    rendezvous: Arc<Rendezvous<R>>,
}

impl<R, F> Submission<R, F>
where
    F: FnOnce(&mut LoopContext<'_>) -> CallbackResult<R>,
{
    fn run(mut self, cx: &mut LoopContext<'_>) {
        let Some(work) = self.work.take() else {
            return;
        };
        // Failures go to the caller, not to the loop's diagnostic sink
        let outcome = guarded(|| work(cx)).map_err(GatewayError::Failed);
        self.rendezvous.complete(outcome);
    }
}

impl<R, F> Drop for Submission<R, F> {
    fn drop(&mut self) {
        if self.work.is_some() {
            self.rendezvous.complete(Err(GatewayError::Rejected));
        }
    }
}

impl LoopHandle {
    /// Run `work` on the loop thread and block until it has produced a result.
    ///
    /// Must not be called from the loop thread. Calling it from the thread
    /// that will later run the loop, before `run`, blocks forever.
    pub fn submit<R, F>(&self, work: F) -> Result<R, GatewayError>
    where
        R: Send + 'static,
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult<R> + Send + 'static,
    {
        self.submit_until(work, None)
    }

    /// Like [`submit`](Self::submit), but stop waiting after `timeout`.
    ///
    /// The work may still run afterwards; its result is then dropped.
    pub fn submit_timeout<R, F>(&self, work: F, timeout: Duration) -> Result<R, GatewayError>
    where
        R: Send + 'static,
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult<R> + Send + 'static,
    {
        self.submit_until(work, Some(Instant::now() + timeout))
    }

    fn submit_until<R, F>(&self, work: F, deadline: Option<Instant>) -> Result<R, GatewayError>
    where
        R: Send + 'static,
        F: FnOnce(&mut LoopContext<'_>) -> CallbackResult<R> + Send + 'static,
    {
        if self.is_loop_thread() {
            return Err(GatewayError::OnLoopThread);
        }

        let rendezvous = Arc::new(Rendezvous::new());
        let submission = Submission {
            work: Some(work),
            rendezvous: rendezvous.clone(),
        };
        self.schedule(move |cx| {
            submission.run(cx);
            Ok(())
        });

        rendezvous.wait(deadline)
    }
}
