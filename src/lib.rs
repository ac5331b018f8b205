#![deny(missing_docs)]

//! Topdown chain: suspend and resume call chains across execution contexts.
//!
//! # Design Goals
//!
//! A chain is written as plain top-down calls between stages, yet any call can
//! be moved to another thread, delayed, raced against a timeout or joined with
//! other work:
//!
//! - **Tail calls**: a stage call is the last thing a body or wrapper does, so
//!   redirecting it never needs to rewind a half-run caller
//! - **Ordered unwinding**: wrappers run LIFO on whichever thread finishes the
//!   chain, and each sees exactly the outcome of the work it wraps
//! - **One owner**: a chain run is moved between contexts, never shared
//!
//! # Core Concepts
//!
//! - [`SimpleStage`] / [`FullStage`]: units of work, the latter with a
//!   catch/finally/completion wrapper around a body
//! - [`Chain`]: what stages see; [`Chain::call`] dispatches the next stage
//! - [`Launcher`] / [`Redirection`]: where the next stage runs
//! - [`Redirector`]: one-shot redirection driven by an external [`Completion`]
//! - [`redirection`]: pool, timer, timeout and fan-out strategies

// Modules
mod chain;
mod closing;
pub mod config;
pub mod error;
pub mod executor;
pub mod launcher;
mod macros;
pub mod outcome;
pub mod redirection;
pub mod redirector;
pub mod registry;
mod signal;
pub mod sink;
pub mod stage;

// Re-exports for convenience
pub use chain::{Chain, ChainId, ChainPhase, DetachedChain};
pub use config::{Collaborators, StrategyConfig};
pub use error::{
    BoxError, Failure, Interrupt, PatternViolation, StagePanicked, StageResult, StageTimeout,
};
pub use executor::{Executor, Job, ThreadSpawner, Timer};
pub use launcher::{launch_on_new_chain, Continuation, Launcher, LocalRedirector, Redirection};
pub use outcome::{Outcome, Returned};
pub use redirection::{
    FanOut, Join, JoinSlot, PoolRedirector, TimeoutChecker, TimeoutHandle, TimeoutRedirector,
    TimerRedirector, TimerTimeout,
};
pub use redirector::{Completion, FnRedirect, Redirect, Redirector};
pub use registry::{StageKind, StageShape};
pub use signal::{RedirectSignal, SignalMisuse};
pub use sink::{LogSink, TracingLog};
pub use stage::{
    finally_check, EchoStage, EmptyStage, Full, FullStage, Interruptible, Simple, SimpleStage,
    Stage,
};

#[cfg(test)]
mod tests;
