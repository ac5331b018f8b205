//! Launcher SPI: strategies deciding where a continuation runs.
//!
//! A [`Launcher`] either runs a continuation right away on the calling thread
//! or hands it to another execution context and raises a redirect signal. The
//! hand-off (task submission, timer scheduling, callback registration) is the
//! only synchronization barrier the chain relies on: the run moves with the
//! continuation as a [`DetachedChain`] and no two threads ever own it at once.
//!
//! The helpers on [`Continuation`] and [`DetachedChain`] are the building
//! blocks for custom strategies.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use crate::chain::{Chain, DetachedChain};
use crate::closing::ClosingAction;
use crate::error::{panic_failure, Interrupt, PatternViolation, StageResult};
use crate::executor::Job;
use crate::outcome::Returned;
use crate::signal::{RedirectSignal, SignalMisuse};
use crate::stage::Interruptible;
use crate::Failure;

type Body = Box<dyn FnOnce(&mut Chain) -> StageResult<Returned> + Send>;

// ============================================================================
// Continuation
// ============================================================================

/// A stage call captured so it can run now or later, here or elsewhere.
pub struct Continuation {
    name: &'static str,
    body: Body,
    close: Option<ClosingAction>,
    interrupt: Option<Arc<dyn Interruptible>>,
}

impl Continuation {
    pub(crate) fn new<F>(
        name: &'static str,
        body: F,
        close: Option<ClosingAction>,
        interrupt: Option<Arc<dyn Interruptible>>,
    ) -> Self
    where
        F: FnOnce(&mut Chain) -> StageResult<Returned> + Send + 'static,
    {
        Self {
            name,
            body: Box::new(body),
            close,
            interrupt,
        }
    }

    /// Type name of the captured stage.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Interrupt handle exposed by the captured stage, if any.
    pub fn interrupt_handle(&self) -> Option<Arc<dyn Interruptible>> {
        self.interrupt.clone()
    }

    /// Run on the calling thread, handing the outcome straight back.
    ///
    /// Only legal while the chain is running: the caller must be waiting
    /// for a direct return.
    pub fn run_locally(self, chain: &mut Chain) -> StageResult<Returned> {
        if let Some(close) = self.close {
            chain.push_action(close)?;
        }
        (self.body)(chain)
    }

    /// Run on the calling thread and store the outcome on the chain.
    ///
    /// Returns the redirect signal if the body moved the chain elsewhere.
    pub fn run_protected(self, chain: &mut Chain) -> Result<(), RedirectSignal> {
        let Self { name, body, close, .. } = self;
        if let Some(close) = close {
            if let Err(violation) = chain.push_action(close) {
                chain.store_failure(violation.into());
                return Ok(());
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(stage = name, "stage.run");
        #[cfg(not(feature = "tracing"))]
        let _ = name;

        let result = panic::catch_unwind(AssertUnwindSafe(|| body(chain)))
            .unwrap_or_else(|payload| Err(Interrupt::Failed(panic_failure(payload))));

        match result {
            Ok(returned) => {
                if let Some(signal) = chain.signals_mut().in_flight() {
                    let swallowed = Failure::unexpected(SignalMisuse::Swallowed);
                    chain.signals_mut().record(swallowed);
                    return Err(signal);
                }
                chain.store_returned(returned);
            }
            Err(Interrupt::Settled) => {}
            Err(Interrupt::Redirected(signal)) => return Err(signal),
            Err(Interrupt::Failed(failure)) => {
                if let Some(signal) = chain.signals_mut().check_and_resume(&failure) {
                    return Err(signal);
                }
                chain.store_failure(failure);
            }
        }
        Ok(())
    }

    /// Move the run off `chain` and hand the continuation to `submit`.
    ///
    /// `submit` receives a job that resumes the chain wherever it is run. The
    /// returned signal must be propagated by the caller.
    pub fn redirect_with<F>(self, chain: &mut Chain, submit: F) -> Result<(), RedirectSignal>
    where
        F: FnOnce(Job),
    {
        let detached = chain.detach()?;
        submit(Box::new(move || self.run_redirected(detached)));
        Err(chain.raise_redirect())
    }

    /// Run on a fresh task shell for `detached`, then unwind the chain.
    ///
    /// This is what a pool task, timer task or completion callback executes.
    pub fn run_redirected(self, detached: DetachedChain) {
        let mut chain = Chain::attach(detached);
        #[cfg(feature = "tracing")]
        tracing::debug!(chain = ?chain.id(), stage = self.name, "chain.resume");
        match self.run_protected(&mut chain) {
            Ok(()) => {
                chain.finish_task();
                chain.on_close();
            }
            Err(signal) => {
                chain.signals_mut().cleanup(signal);
                chain.finish_task();
            }
        }
    }
}

impl std::fmt::Debug for Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation")
            .field("name", &self.name)
            .field("close", &self.close.is_some())
            .finish()
    }
}

// ============================================================================
// Launcher
// ============================================================================

/// Dispatch strategy for the next stage call.
pub trait Launcher: Send + Sync {
    /// Dispatch while a caller waits for a direct return.
    ///
    /// The default runs [`launch_protected`](Self::launch_protected) and reports
    /// [`Interrupt::Settled`] or [`Interrupt::Redirected`], which is right for
    /// any strategy that may defer.
    fn launch(&self, continuation: Continuation, chain: &mut Chain) -> StageResult<Returned> {
        self.launch_protected(continuation, chain)
            .map_err(Interrupt::Redirected)?;
        Err(Interrupt::Settled)
    }

    /// Dispatch and store the outcome on the chain instead of returning it.
    ///
    /// A deferring strategy detaches the chain, hands the continuation to its
    /// execution context and returns the signal from [`Chain::raise_redirect`].
    fn launch_protected(
        &self,
        continuation: Continuation,
        chain: &mut Chain,
    ) -> Result<(), RedirectSignal>;

    /// Whether this strategy is capable of deferring at all.
    fn is_redirecting(&self) -> bool;
}

/// Something that can provide the launcher for the next stage call.
pub trait Redirection: Send + Sync {
    /// The launcher to use. One-shot redirectors fail on a second request.
    fn launcher(&self) -> Result<Arc<dyn Launcher>, PatternViolation>;
}

impl<R: Redirection + ?Sized> Redirection for Arc<R> {
    fn launcher(&self) -> Result<Arc<dyn Launcher>, PatternViolation> {
        (**self).launcher()
    }
}

/// Start `continuation` as the first stage of a freshly started chain.
pub fn launch_on_new_chain(
    launcher: &dyn Launcher,
    continuation: Continuation,
    chain: &mut Chain,
) -> StageResult<()> {
    chain.enter_running()?;
    launcher
        .launch_protected(continuation, chain)
        .map_err(Interrupt::Redirected)?;
    Err(Interrupt::Settled)
}

// ============================================================================
// Local
// ============================================================================

/// Runs every continuation synchronously on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalLauncher;

impl Launcher for LocalLauncher {
    fn launch(&self, continuation: Continuation, chain: &mut Chain) -> StageResult<Returned> {
        continuation.run_locally(chain)
    }

    fn launch_protected(
        &self,
        continuation: Continuation,
        chain: &mut Chain,
    ) -> Result<(), RedirectSignal> {
        continuation.run_protected(chain)
    }

    fn is_redirecting(&self) -> bool {
        false
    }
}

/// The shared local launcher, used whenever no redirector was set.
pub(crate) fn local_launcher() -> Arc<dyn Launcher> {
    static LOCAL: OnceLock<Arc<dyn Launcher>> = OnceLock::new();
    Arc::clone(LOCAL.get_or_init(|| Arc::new(LocalLauncher)))
}

/// Reusable redirection that keeps execution on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRedirector;

impl Redirection for LocalRedirector {
    fn launcher(&self) -> Result<Arc<dyn Launcher>, PatternViolation> {
        Ok(local_launcher())
    }
}
