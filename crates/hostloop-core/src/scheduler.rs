//! Cooperative yield scheduler
//!
//! Two facilities layered on the loop:
//! - single yields: resolvers queued now run at the start of the next turn
//! - round-robin sets: step functions advanced a bounded number of times
//!   per invocation, then re-posted to the event queue so timers and other
//!   events are not starved

use crate::diagnostics::FailureSource;
use crate::driver::LoopContext;
use crate::error::{guarded, CallbackResult};
use slab::Slab;
use std::collections::VecDeque;
use std::fmt;
use std::mem;

/// Result of advancing a step task once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More steps needed
    Pending,
    /// Finished; remove from the set
    Done,
}

/// A cooperatively stepped task holding its own resumption state.
pub trait StepTask {
    /// Advance one step. An error removes the task from its set.
    fn step(&mut self, cx: &mut LoopContext<'_>) -> CallbackResult<Step>;
}

impl<F> StepTask for F
where
    F: FnMut(&mut LoopContext<'_>) -> CallbackResult<Step>,
{
    fn step(&mut self, cx: &mut LoopContext<'_>) -> CallbackResult<Step> {
        self(cx)
    }
}

/// Box a closure as a [`StepTask`].
pub fn step_task<F>(step: F) -> Box<dyn StepTask>
where
    F: FnMut(&mut LoopContext<'_>) -> CallbackResult<Step> + 'static,
{
    Box::new(step)
}

/// Resolver released by a single yield.
pub type YieldResolver = Box<dyn FnOnce(&mut LoopContext<'_>) -> CallbackResult>;

/// Completion callback of a round-robin set.
pub type CompletionCallback = Box<dyn FnOnce(&mut LoopContext<'_>) -> CallbackResult>;

/// Identifier of a live round-robin set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoundRobinId(pub usize);

impl fmt::Display for RoundRobinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct RoundRobinSet {
    tasks: Vec<Box<dyn StepTask>>,
    on_complete: Option<CompletionCallback>,
}

/// Loop-local state of the cooperative scheduler.
pub struct YieldScheduler {
    /// Resolvers waiting for the next turn, in request order
    yields: VecDeque<YieldResolver>,
    resolved_yields: u64,
    /// Live sets; `None` while a set is being advanced
    sets: Slab<Option<RoundRobinSet>>,
    /// Steps per task per invocation
    budget: usize,
    /// Continuations posted to the event queue, initial posts included
    posts: u64,
}

impl YieldScheduler {
    /// Create a scheduler that steps each task at most `budget` times per invocation.
    pub fn new(budget: usize) -> Self {
        Self {
            yields: VecDeque::new(),
            resolved_yields: 0,
            sets: Slab::new(),
            budget: budget.max(1),
            posts: 0,
        }
    }

    pub(crate) fn push_yield(&mut self, resolver: YieldResolver) {
        self.yields.push_back(resolver);
    }

    /// Whether any yield waits for the next turn.
    pub fn has_pending_yields(&self) -> bool {
        !self.yields.is_empty()
    }

    /// Number of yields waiting for the next turn.
    pub fn pending_yields(&self) -> usize {
        self.yields.len()
    }

    /// Number of yields resolved so far.
    pub fn yield_count(&self) -> u64 {
        self.resolved_yields
    }

    /// Number of round-robin sets not yet completed.
    pub fn active_sets(&self) -> usize {
        self.sets.len()
    }

    /// Steps per task per invocation.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Total continuation posts made for round-robin sets.
    pub fn round_robin_posts(&self) -> u64 {
        self.posts
    }
}

/// Release every yield queued before this call, in FIFO order.
///
/// Yields requested by the resolvers themselves wait for the following turn.
pub(crate) fn resolve_pending_yields(cx: &mut LoopContext<'_>) {
    let batch = mem::take(&mut cx.scheduler.yields);
    for resolver in batch {
        cx.scheduler.resolved_yields += 1;
        if let Err(err) = guarded(|| resolver(cx)) {
            cx.report(FailureSource::YieldResolver, &err);
        }
    }
}

/// Register a set and post its first invocation.
pub(crate) fn start_round_robin(
    cx: &mut LoopContext<'_>,
    tasks: Vec<Box<dyn StepTask>>,
    on_complete: CompletionCallback,
) -> RoundRobinId {
    let key = cx.scheduler.sets.insert(Some(RoundRobinSet {
        tasks,
        on_complete: Some(on_complete),
    }));
    let id = RoundRobinId(key);
    post_continuation(cx, id);
    id
}

fn post_continuation(cx: &mut LoopContext<'_>, id: RoundRobinId) {
    cx.scheduler.posts += 1;
    cx.handle.schedule(move |cx| {
        advance_round_robin(cx, id);
        Ok(())
    });
}

/// One invocation: complete an empty set, or step each task up to `budget`
/// times and re-post.
fn advance_round_robin(cx: &mut LoopContext<'_>, id: RoundRobinId) {
    let Some(mut set) = cx.scheduler.sets.get_mut(id.0).and_then(Option::take) else {
        return;
    };

    if set.tasks.is_empty() {
        cx.scheduler.sets.remove(id.0);
        if let Some(on_complete) = set.on_complete.take() {
            if let Err(err) = guarded(|| on_complete(cx)) {
                cx.report(FailureSource::RoundRobinComplete(id), &err);
            }
        }
        return;
    }

    let budget = cx.scheduler.budget;
    for _ in 0..budget {
        if set.tasks.is_empty() {
            break;
        }
        set.tasks.retain_mut(|task| match guarded(|| task.step(cx)) {
            Ok(Step::Pending) => true,
            Ok(Step::Done) => false,
            Err(err) => {
                cx.report(FailureSource::RoundRobinStep(id), &err);
                false
            }
        });
    }

    if let Some(slot) = cx.scheduler.sets.get_mut(id.0) {
        *slot = Some(set);
    }
    post_continuation(cx, id);
}
