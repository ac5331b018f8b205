//! Run the next stage once a deadline has passed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::chain::Chain;
use crate::error::{Interrupt, PatternViolation, StageResult};
use crate::executor::Timer;
use crate::launcher::{Continuation, Launcher, Redirection};
use crate::outcome::Returned;
use crate::signal::RedirectSignal;

#[derive(Debug, Clone, Copy)]
enum Deadline {
    At(Instant),
    After(Duration),
}

/// Reusable redirection that delays the next stage.
///
/// A deadline already in the past runs the stage on the calling thread.
#[derive(Clone)]
pub struct TimerRedirector {
    timer: Arc<dyn Timer>,
    deadline: Deadline,
}

impl TimerRedirector {
    /// Run the next stage at `target`.
    pub fn at(timer: Arc<dyn Timer>, target: Instant) -> Self {
        Self {
            timer,
            deadline: Deadline::At(target),
        }
    }

    /// Run the next stage `delay` after the redirector is set on a chain.
    pub fn after(timer: Arc<dyn Timer>, delay: Duration) -> Self {
        Self {
            timer,
            deadline: Deadline::After(delay),
        }
    }
}

impl std::fmt::Debug for TimerRedirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRedirector")
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Redirection for TimerRedirector {
    fn launcher(&self) -> Result<Arc<dyn Launcher>, PatternViolation> {
        let target = match self.deadline {
            Deadline::At(target) => target,
            Deadline::After(delay) => Instant::now() + delay,
        };
        Ok(Arc::new(TimerLauncher {
            timer: Arc::clone(&self.timer),
            target,
        }))
    }
}

struct TimerLauncher {
    timer: Arc<dyn Timer>,
    target: Instant,
}

impl TimerLauncher {
    fn remaining(&self) -> Duration {
        self.target.saturating_duration_since(Instant::now())
    }
}

impl Launcher for TimerLauncher {
    fn launch(&self, continuation: Continuation, chain: &mut Chain) -> StageResult<Returned> {
        if self.remaining().is_zero() {
            return continuation.run_locally(chain);
        }
        self.launch_protected(continuation, chain)
            .map_err(Interrupt::Redirected)?;
        Err(Interrupt::Settled)
    }

    fn launch_protected(
        &self,
        continuation: Continuation,
        chain: &mut Chain,
    ) -> Result<(), RedirectSignal> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return continuation.run_protected(chain);
        }
        continuation.redirect_with(chain, |job| self.timer.schedule(remaining, job))
    }

    fn is_redirecting(&self) -> bool {
        true
    }
}
