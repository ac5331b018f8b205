//! Race the next stage against a timeout.
//!
//! The stage runs as the first stage of a nested chain, dispatched through the
//! inner redirection. Whichever finishes first, the nested chain's outcome or
//! the timeout, closes the suspended base chain; the loser is ignored. A lost
//! stage is asked to interrupt itself if it exposes an [`Interruptible`]
//! handle, and the timeout is cancelled if the stage wins.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::chain::{Chain, DetachedChain};
use crate::error::{panic_failure, Failure, PatternViolation, StageTimeout};
use crate::executor::{Job, Timer};
use crate::launcher::{launch_on_new_chain, Continuation, Launcher, Redirection};
use crate::signal::RedirectSignal;
use crate::stage::Interruptible;

/// Cancellation flag of an armed timeout.
#[derive(Debug, Clone, Default)]
pub struct TimeoutHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimeoutHandle {
    /// A fresh, armed handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the timeout from firing.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Source of timeouts for [`TimeoutRedirector`].
pub trait TimeoutChecker: Send + Sync {
    /// How long a stage may run.
    fn timeout(&self) -> Duration;

    /// Run `on_timeout` once the timeout elapses, unless the returned
    /// handle is cancelled first.
    fn arm(&self, on_timeout: Job) -> TimeoutHandle;
}

/// [`TimeoutChecker`] backed by a [`Timer`].
#[derive(Clone)]
pub struct TimerTimeout {
    timer: Arc<dyn Timer>,
    timeout: Duration,
}

impl TimerTimeout {
    /// Time out after `timeout` using `timer`.
    pub fn new(timer: Arc<dyn Timer>, timeout: Duration) -> Self {
        Self { timer, timeout }
    }
}

impl TimeoutChecker for TimerTimeout {
    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn arm(&self, on_timeout: Job) -> TimeoutHandle {
        let handle = TimeoutHandle::new();
        let armed = handle.clone();
        self.timer.schedule(
            self.timeout,
            Box::new(move || {
                if !armed.is_cancelled() {
                    on_timeout();
                }
            }),
        );
        handle
    }
}

// ============================================================================
// Redirector
// ============================================================================

/// Redirection that bounds the next stage's duration.
#[derive(Clone)]
pub struct TimeoutRedirector {
    under: Arc<dyn Redirection>,
    checker: Arc<dyn TimeoutChecker>,
    operation: String,
}

impl TimeoutRedirector {
    /// Run the next stage through `under`, failing with [`StageTimeout`]
    /// naming `operation` if `checker` fires first.
    pub fn new(
        under: Arc<dyn Redirection>,
        checker: Arc<dyn TimeoutChecker>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            under,
            checker,
            operation: operation.into(),
        }
    }
}

impl std::fmt::Debug for TimeoutRedirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutRedirector")
            .field("operation", &self.operation)
            .field("timeout", &self.checker.timeout())
            .finish()
    }
}

impl Redirection for TimeoutRedirector {
    fn launcher(&self) -> Result<Arc<dyn Launcher>, PatternViolation> {
        Ok(Arc::new(TimeoutLauncher {
            under: self.under.launcher()?,
            checker: Arc::clone(&self.checker),
            operation: self.operation.clone(),
        }))
    }
}

struct TimeoutLauncher {
    under: Arc<dyn Launcher>,
    checker: Arc<dyn TimeoutChecker>,
    operation: String,
}

/// Shared state of one stage-versus-timeout race.
struct Race {
    decided: AtomicBool,
    base: Mutex<Option<DetachedChain>>,
    active: Option<Arc<dyn Interruptible>>,
    timeout: Mutex<Option<TimeoutHandle>>,
}

impl Race {
    /// Claim the win. Only the first caller gets the base chain.
    fn settle(&self) -> Option<DetachedChain> {
        self.decided
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .and_then(|_| self.base.lock().take())
    }
}

impl Launcher for TimeoutLauncher {
    fn launch_protected(
        &self,
        continuation: Continuation,
        chain: &mut Chain,
    ) -> Result<(), RedirectSignal> {
        let log = chain.log();
        let active = continuation.interrupt_handle();
        let base = chain.detach()?;
        let race = Arc::new(Race {
            decided: AtomicBool::new(false),
            base: Mutex::new(Some(base)),
            active,
            timeout: Mutex::new(None),
        });

        let expired = Arc::clone(&race);
        let sink = Arc::clone(&log);
        let failure = Failure::declared(StageTimeout {
            operation: self.operation.clone(),
            timeout: self.checker.timeout(),
        });
        let handle = self.checker.arm(Box::new(move || {
            if let Some(base) = expired.settle() {
                #[cfg(feature = "tracing")]
                tracing::warn!(chain = %base.id(), error = %failure, "timeout.fired");
                if let Some(active) = &expired.active {
                    let interrupt =
                        AssertUnwindSafe(|| active.interrupt_and_rollback_asynchronously());
                    if let Err(payload) = panic::catch_unwind(interrupt) {
                        sink.error(
                            "Unexpected error in Chain execution",
                            &panic_failure(payload),
                        );
                    }
                }
                base.close(Err(failure));
            }
        }));
        *race.timeout.lock() = Some(handle);

        let finished = Arc::clone(&race);
        let under = Arc::clone(&self.under);
        Chain::start_with_outcome(
            move |nested| launch_on_new_chain(under.as_ref(), continuation, nested),
            move |outcome| {
                if let Some(base) = finished.settle() {
                    let timeout = finished.timeout.lock().take();
                    if let Some(timeout) = timeout {
                        timeout.cancel();
                    }
                    base.close(outcome);
                }
            },
            log,
        );

        Err(chain.raise_redirect())
    }

    fn is_redirecting(&self) -> bool {
        true
    }
}
