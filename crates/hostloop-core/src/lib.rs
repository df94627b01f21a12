//! Hostloop Core
//!
//! Scheduling layer for hosts that embed a scripting engine. Everything
//! script-visible runs on one loop thread, which interleaves three sources:
//! - **Engine jobs**: drained to exhaustion through a [`JobRunner`] before each event
//! - **Events**: closures posted to the thread-safe [`EventQueue`], e.g. by
//!   the [`TimerService`] thread or by foreign threads through the gateway
//! - **Cooperative tasks**: single yields and round-robin step sets managed
//!   by the [`YieldScheduler`]
//!
//! # Example
//!
//! ```rust,ignore
//! use hostloop_core::{EventLoop, NoJobs};
//! use std::time::Duration;
//!
//! let mut event_loop = EventLoop::new(NoJobs)?;
//! event_loop.handle().set_timeout(|cx| {
//!     cx.exit(0);
//!     Ok(())
//! }, Duration::from_millis(50));
//! let code = event_loop.run();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bindings;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod scheduler;
pub mod timer;

pub use config::LoopConfig;
pub use diagnostics::{CollectingSink, DiagnosticSink, FailureSource, TracingSink};
pub use driver::{EventLoop, LoopContext, LoopHandle, LoopState};
pub use engine::{Job, JobQueue, JobRunner, NoJobs};
pub use error::{CallbackError, CallbackResult, GatewayError, JobError, LoopError};
pub use queue::{Event, EventQueue};
pub use scheduler::{step_task, RoundRobinId, Step, StepTask, YieldScheduler};
pub use timer::{TimerCallback, TimerId, TimerService};
