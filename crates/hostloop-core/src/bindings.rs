//! Script-facing globals
//!
//! Helpers a host uses when attaching the loop's capabilities to a script
//! engine as global functions. Script numbers arrive as `f64` and are
//! coerced here, so every binding treats odd inputs the same way.

use crate::driver::LoopContext;
use crate::error::CallbackResult;
use crate::scheduler::{RoundRobinId, StepTask};
use crate::timer::TimerId;
use std::fmt;
use std::time::Duration;

/// Global functions a host installs for scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Global {
    /// `setTimeout(fn, ms)`: one-shot timer, returns its id
    SetTimeout,
    /// `setInterval(fn, ms)`: repeating timer, returns its id
    SetInterval,
    /// `clearTimeout(id)`
    ClearTimeout,
    /// `clearInterval(id)`, interchangeable with `clearTimeout`
    ClearInterval,
    /// `sleep(ms)`: resolves after a one-shot timer
    Sleep,
    /// `_yield()`: resolves on the next loop turn
    Yield,
    /// `yieldCount()`: single yields resolved so far
    YieldCount,
    /// `runParallel(tasks)`: steps a task set round-robin
    RunParallel,
    /// `exit(code)`
    Exit,
}

impl Global {
    /// Every global, in installation order.
    pub const ALL: [Global; 9] = [
        Global::SetTimeout,
        Global::SetInterval,
        Global::ClearTimeout,
        Global::ClearInterval,
        Global::Sleep,
        Global::Yield,
        Global::YieldCount,
        Global::RunParallel,
        Global::Exit,
    ];

    /// Name the function is installed under.
    pub fn name(self) -> &'static str {
        match self {
            Global::SetTimeout => "setTimeout",
            Global::SetInterval => "setInterval",
            Global::ClearTimeout => "clearTimeout",
            Global::ClearInterval => "clearInterval",
            Global::Sleep => "sleep",
            Global::Yield => "_yield",
            Global::YieldCount => "yieldCount",
            Global::RunParallel => "runParallel",
            Global::Exit => "exit",
        }
    }

    /// Look up a global by its installed name.
    pub fn from_name(name: &str) -> Option<Global> {
        Global::ALL.into_iter().find(|global| global.name() == name)
    }
}

impl fmt::Display for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Coercion
// ============================================================================

/// Script delay in milliseconds to a duration.
///
/// NaN, negative and infinite delays become zero; fractions truncate.
pub fn delay_from_script(ms: f64) -> Duration {
    if !ms.is_finite() || ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_millis(ms.trunc() as u64)
}

/// Script timer id to a [`TimerId`]; `None` when it can name no timer.
pub fn timer_id_from_script(id: f64) -> Option<TimerId> {
    if !id.is_finite() || id < 1.0 || id.fract() != 0.0 {
        return None;
    }
    Some(TimerId(id as u64))
}

/// Timer id as handed back to scripts.
pub fn timer_id_to_script(id: TimerId) -> f64 {
    id.0 as f64
}

/// Script exit code to a process exit code (truncating, saturating, NaN is 0).
pub fn exit_code_from_script(code: f64) -> i32 {
    code as i32
}

// ============================================================================
// Global function bodies
// ============================================================================

/// `setTimeout(callback, ms)`
pub fn set_timeout<F>(cx: &LoopContext<'_>, callback: F, ms: f64) -> f64
where
    F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
{
    timer_id_to_script(cx.set_timeout(callback, delay_from_script(ms)))
}

/// `setInterval(callback, ms)`
pub fn set_interval<F>(cx: &LoopContext<'_>, callback: F, ms: f64) -> f64
where
    F: FnMut(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
{
    timer_id_to_script(cx.set_interval(callback, delay_from_script(ms)))
}

/// `clearTimeout(id)`; ids that name no timer are ignored.
pub fn clear_timeout(cx: &LoopContext<'_>, id: f64) {
    if let Some(id) = timer_id_from_script(id) {
        cx.handle().clear_timeout(id);
    }
}

/// `clearInterval(id)`
pub fn clear_interval(cx: &LoopContext<'_>, id: f64) {
    if let Some(id) = timer_id_from_script(id) {
        cx.handle().clear_interval(id);
    }
}

/// `sleep(ms)`: `resolve` plays the part of the returned promise's resolver.
pub fn sleep<F>(cx: &LoopContext<'_>, ms: f64, resolve: F)
where
    F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + Send + 'static,
{
    cx.sleep(delay_from_script(ms), resolve);
}

/// `_yield()`: `resolve` runs at the start of the next turn.
pub fn yield_now<F>(cx: &mut LoopContext<'_>, resolve: F)
where
    F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + 'static,
{
    cx.request_yield(resolve);
}

/// `yieldCount()`
pub fn yield_count(cx: &LoopContext<'_>) -> f64 {
    cx.yield_count() as f64
}

/// `runParallel(...tasks)`: `resolve` runs once every task is done.
pub fn run_parallel<F>(cx: &mut LoopContext<'_>, tasks: Vec<Box<dyn StepTask>>, resolve: F) -> RoundRobinId
where
    F: FnOnce(&mut LoopContext<'_>) -> CallbackResult + 'static,
{
    cx.run_round_robin(tasks, resolve)
}

/// `exit(code)`
pub fn exit(cx: &LoopContext<'_>, code: f64) {
    cx.exit(exit_code_from_script(code));
}
