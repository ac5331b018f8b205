//! One-shot redirector driven by an external completion.
//!
//! A [`Redirector`] wraps a [`Redirect`] operation: something that starts work
//! elsewhere (a socket read, a remote call, a batch of sub-tasks) and later
//! reports back through a [`Completion`]. The stage dispatched after
//! [`Chain::set_redirector`](crate::Chain::set_redirector) runs only once the
//! completion reports success; a reported failure becomes the stage's outcome
//! and the stage itself never runs.
//!
//! Each redirector supplies its launcher once. Results the operation gathers
//! stay reachable through [`Deref`] after the chain resumes.

use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chain::{Chain, DetachedChain};
use crate::error::{panic_failure, Failure, PatternViolation};
use crate::launcher::{Continuation, Launcher, Redirection};
use crate::signal::{RedirectSignal, SPURIOUS_MESSAGE};
use crate::sink::LogSink;

/// An operation that completes asynchronously.
pub trait Redirect: Send + Sync + 'static {
    /// Start the operation. Report exactly once through `completion`.
    fn launch(&self, completion: Completion);
}

/// [`Redirect`] built from a closure.
pub struct FnRedirect<F>(F);

impl<F> Redirect for FnRedirect<F>
where
    F: Fn(Completion) + Send + Sync + 'static,
{
    fn launch(&self, completion: Completion) {
        (self.0)(completion)
    }
}

#[derive(Default)]
struct OneShot {
    used: bool,
    reported: bool,
    deferred: Option<(Continuation, DetachedChain)>,
}

// ============================================================================
// Redirector
// ============================================================================

/// One-shot redirection through an asynchronous operation.
///
/// Clones share the same one-shot state.
pub struct Redirector<R> {
    op: Arc<R>,
    state: Arc<Mutex<OneShot>>,
}

impl<R: Redirect> Redirector<R> {
    /// Wrap `op`.
    pub fn new(op: R) -> Self {
        Self {
            op: Arc::new(op),
            state: Arc::new(Mutex::new(OneShot::default())),
        }
    }

    /// Whether the launcher has already been taken.
    pub fn is_used(&self) -> bool {
        self.state.lock().used
    }
}

impl<F> Redirector<FnRedirect<F>>
where
    F: Fn(Completion) + Send + Sync + 'static,
{
    /// Redirector whose operation is `launch`.
    pub fn from_fn(launch: F) -> Self {
        Self::new(FnRedirect(launch))
    }
}

impl<R> Clone for Redirector<R> {
    fn clone(&self) -> Self {
        Self {
            op: Arc::clone(&self.op),
            state: Arc::clone(&self.state),
        }
    }
}

impl<R> Deref for Redirector<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.op
    }
}

impl<R> fmt::Debug for Redirector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Redirector")
            .field("used", &state.used)
            .field("reported", &state.reported)
            .finish()
    }
}

impl<R: Redirect> Redirection for Redirector<R> {
    fn launcher(&self) -> Result<Arc<dyn Launcher>, PatternViolation> {
        let mut state = self.state.lock();
        if state.used {
            return Err(PatternViolation::RedirectorReused);
        }
        state.used = true;
        Ok(Arc::new(DeferredLauncher {
            op: Arc::clone(&self.op),
            state: Arc::clone(&self.state),
        }))
    }
}

struct DeferredLauncher<R> {
    op: Arc<R>,
    state: Arc<Mutex<OneShot>>,
}

impl<R: Redirect> Launcher for DeferredLauncher<R> {
    fn launch_protected(
        &self,
        continuation: Continuation,
        chain: &mut Chain,
    ) -> Result<(), RedirectSignal> {
        let detached = chain.detach()?;
        self.state.lock().deferred = Some((continuation, detached));

        let completion = Completion {
            state: Arc::clone(&self.state),
            log: chain.log(),
        };
        let fallback = completion.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.op.launch(completion))) {
            let failure = panic_failure(payload);
            if fallback.fail(failure.clone()).is_err() {
                fallback.spurious(&failure);
            }
        }
        Err(chain.raise_redirect())
    }

    fn is_redirecting(&self) -> bool {
        true
    }
}

// ============================================================================
// Completion
// ============================================================================

/// Reports the end of a redirected operation. Only the first report counts.
#[derive(Clone)]
pub struct Completion {
    state: Arc<Mutex<OneShot>>,
    log: Arc<dyn LogSink>,
}

impl Completion {
    fn take(&self) -> Result<(Continuation, DetachedChain), PatternViolation> {
        let mut state = self.state.lock();
        if state.reported {
            return Err(PatternViolation::CompletionReused);
        }
        let deferred = state
            .deferred
            .take()
            .ok_or(PatternViolation::CompletionReused)?;
        state.reported = true;
        Ok(deferred)
    }

    /// The operation succeeded: run the deferred stage in this context.
    pub fn completed(&self) -> Result<(), PatternViolation> {
        let (continuation, detached) = self.take()?;
        continuation.run_redirected(detached);
        Ok(())
    }

    /// The operation failed within the deferred stage's contract.
    pub fn declared_failure<E>(&self, error: E) -> Result<(), PatternViolation>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.fail(Failure::declared(error))
    }

    /// The operation failed unexpectedly.
    pub fn unexpected_failure<E>(&self, error: E) -> Result<(), PatternViolation>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.fail(Failure::unexpected(error))
    }

    /// The operation failed with `failure`; the deferred stage is skipped.
    pub fn fail(&self, failure: Failure) -> Result<(), PatternViolation> {
        let (_, detached) = self.take()?;
        detached.close(Err(failure));
        Ok(())
    }

    /// Log a failure that can no longer reach the chain.
    pub(crate) fn spurious(&self, failure: &Failure) {
        self.log.error(SPURIOUS_MESSAGE, failure);
    }

    /// Log a rejected report.
    pub(crate) fn check(&self, report: Result<(), PatternViolation>) {
        if let Err(violation) = report {
            self.spurious(&Failure::Pattern(violation));
        }
    }

    /// Whether a report has already been made.
    pub fn is_reported(&self) -> bool {
        self.state.lock().reported
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("reported", &self.is_reported())
            .finish()
    }
}
