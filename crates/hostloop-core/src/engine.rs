//! Engine job hook
//!
//! The embedded engine keeps its own queue of pending jobs (promise
//! reactions, module linking). The loop drains it through [`JobRunner`]
//! before taking each event.

use crate::driver::LoopContext;
use crate::error::{CallbackError, JobError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Host-provided access to the engine's pending-job queue.
pub trait JobRunner {
    /// Execute one pending job.
    ///
    /// Returns `Ok(true)` if a job ran, `Ok(false)` if none was pending.
    fn run_pending_job(&mut self, cx: &mut LoopContext<'_>) -> Result<bool, JobError>;
}

/// Job runner for hosts without an engine job queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJobs;

impl JobRunner for NoJobs {
    fn run_pending_job(&mut self, _cx: &mut LoopContext<'_>) -> Result<bool, JobError> {
        Ok(false)
    }
}

/// A pending engine job.
pub type Job = Box<dyn FnOnce(&mut LoopContext<'_>) -> Result<(), JobError>>;

/// Loop-local FIFO of jobs, standing in for an engine's microtask queue.
///
/// Clones share the same queue, so jobs may enqueue follow-up jobs; those
/// run in the same drain, ahead of any event.
#[derive(Clone, Default)]
pub struct JobQueue {
    jobs: Rc<RefCell<VecDeque<Job>>>,
}

impl JobQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job.
    pub fn push<F>(&self, job: F)
    where
        F: FnOnce(&mut LoopContext<'_>) -> Result<(), JobError> + 'static,
    {
        self.jobs.borrow_mut().push_back(Box::new(job));
    }

    /// Number of pending jobs.
    pub fn len(&self) -> usize {
        self.jobs.borrow().len()
    }

    /// Whether no jobs are pending.
    pub fn is_empty(&self) -> bool {
        self.jobs.borrow().is_empty()
    }
}

impl JobRunner for JobQueue {
    fn run_pending_job(&mut self, cx: &mut LoopContext<'_>) -> Result<bool, JobError> {
        // Pop before running so the job can push onto the same queue
        let Some(job) = self.jobs.borrow_mut().pop_front() else {
            return Ok(false);
        };
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(cx))) {
            Ok(result) => result.map(|()| true),
            Err(payload) => Err(CallbackError::from_panic(payload).into()),
        }
    }
}

impl<J: JobRunner + ?Sized> JobRunner for Box<J> {
    fn run_pending_job(&mut self, cx: &mut LoopContext<'_>) -> Result<bool, JobError> {
        (**self).run_pending_job(cx)
    }
}
