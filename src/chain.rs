//! Chain run state and the stage-call entry points.
//!
//! A [`Chain`] is the task shell a thread uses while it owns a chain run: the
//! run itself (pending outcome, closing actions, phase, next launcher) plus the
//! task's signal bookkeeping. When a launcher defers work the run is detached
//! from the shell and travels as a [`DetachedChain`]; the receiving context
//! wraps it in a new shell.
//!
//! # Phases
//!
//! `Starting → Running ⇄ Closing → Terminated`
//!
//! - `Starting`: the first stage call, which cannot take the fast path.
//! - `Running`: stage calls may hand their value straight back to the caller.
//! - `Closing`: closing actions unwind LIFO; a stage call from a wrapper is
//!   parked and resumed once the wrapper has settled its own outcome.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::closing::ClosingAction;
use crate::error::{panic_failure, Failure, Interrupt, PatternViolation, StageResult};
use crate::launcher::{local_launcher, Continuation, Launcher, Redirection};
use crate::outcome::{Outcome, Pending, Returned};
use crate::signal::{RedirectSignal, SignalBook, SignalMisuse};
use crate::sink::LogSink;
use crate::stage::{finally_check, EchoStage, EmptyStage, Stage};

// ============================================================================
// Identifiers and phases
// ============================================================================

/// Unique identifier of a chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub Uuid);

impl ChainId {
    /// Create a new random chain ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a chain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChainPhase {
    /// Dispatching the first stage.
    #[default]
    Starting,
    /// Executing stages top-down.
    Running,
    /// Unwinding closing actions in reverse order.
    Closing,
    /// The outcome listener has run.
    Terminated,
}

// ============================================================================
// Chain Run (Internal)
// ============================================================================

/// One execution of a chain. Owned by exactly one task shell at a time.
pub(crate) struct ChainRun {
    pub(crate) id: ChainId,
    pub(crate) pending: Pending,
    pub(crate) launcher: Option<Arc<dyn Launcher>>,
    pub(crate) phase: ChainPhase,
    pub(crate) actions: Vec<ClosingAction>,
    pub(crate) resume: Option<Continuation>,
    pub(crate) log: Arc<dyn LogSink>,
}

impl ChainRun {
    fn new(terminal: ClosingAction, log: Arc<dyn LogSink>) -> Self {
        Self {
            id: ChainId::new(),
            pending: Pending::None,
            launcher: None,
            phase: ChainPhase::Starting,
            actions: vec![terminal],
            resume: None,
            log,
        }
    }

    /// Take the launcher for this transition, falling back to local.
    pub(crate) fn extract_launcher(&mut self) -> Arc<dyn Launcher> {
        self.launcher.take().unwrap_or_else(local_launcher)
    }
}

/// A chain run in transit between execution contexts.
pub struct DetachedChain {
    pub(crate) run: Box<ChainRun>,
}

impl DetachedChain {
    /// ID of the detached run.
    pub fn id(&self) -> ChainId {
        self.run.id
    }

    /// Continue the run with `continuation` in the calling context.
    pub fn resume(self, continuation: Continuation) {
        continuation.run_redirected(self);
    }

    /// Store `outcome` as the result of the interrupted call and unwind.
    pub fn close(self, outcome: Outcome) {
        let mut chain = Chain::attach(self);
        match outcome {
            Ok(returned) => chain.store_returned(returned),
            Err(failure) => chain.store_failure(failure),
        }
        chain.on_close();
    }
}

impl fmt::Debug for DetachedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedChain")
            .field("id", &self.run.id)
            .field("phase", &self.run.phase)
            .finish()
    }
}

// ============================================================================
// Chain (task shell)
// ============================================================================

/// The handle stages receive: a chain run as seen by the current task.
pub struct Chain {
    pub(crate) run: Option<Box<ChainRun>>,
    pub(crate) signals: SignalBook,
    pub(crate) log: Arc<dyn LogSink>,
}

impl Chain {
    /// Start a chain with `first` as its initial stage.
    ///
    /// `listener` is invoked exactly once, from whichever thread finishes the
    /// chain, with the failure the chain ended with (if any).
    pub fn start<F, L>(first: F, listener: L, log: Arc<dyn LogSink>) -> ChainId
    where
        F: FnOnce(&mut Chain) -> StageResult<()>,
        L: FnOnce(Option<Failure>) + Send + 'static,
    {
        Self::start_with_outcome(first, move |outcome: Outcome| listener(outcome.err()), log)
    }

    /// Start a chain whose terminal callback receives the full outcome.
    ///
    /// Used to run a stage on a nested chain and carry its value back.
    pub fn start_with_outcome<F, L>(first: F, on_outcome: L, log: Arc<dyn LogSink>) -> ChainId
    where
        F: FnOnce(&mut Chain) -> StageResult<()>,
        L: FnOnce(Outcome) + Send + 'static,
    {
        let run = ChainRun::new(ClosingAction::Terminal(Box::new(on_outcome)), Arc::clone(&log));
        let id = run.id;
        let mut chain = Self {
            run: Some(Box::new(run)),
            signals: SignalBook::default(),
            log,
        };
        chain.begin(first);
        id
    }

    pub(crate) fn attach(detached: DetachedChain) -> Self {
        Self {
            log: Arc::clone(&detached.run.log),
            run: Some(detached.run),
            signals: SignalBook::default(),
        }
    }

    fn begin<F>(&mut self, first: F)
    where
        F: FnOnce(&mut Chain) -> StageResult<()>,
    {
        if let Some(run) = self.run.as_mut() {
            run.phase = ChainPhase::Starting;
            run.launcher = None;
            #[cfg(feature = "tracing")]
            tracing::info!(chain = %run.id, "chain.start");
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| first(self)))
            .unwrap_or_else(|payload| Err(Interrupt::Failed(panic_failure(payload))));

        match result {
            Ok(()) => {
                if self.signals.in_flight().is_some() {
                    self.signals
                        .record(Failure::unexpected(SignalMisuse::Swallowed));
                } else if let Some(run) = self.run.as_mut() {
                    if run.pending.is_none() {
                        run.pending = Pending::Void;
                    }
                }
            }
            Err(Interrupt::Settled) => {}
            Err(Interrupt::Redirected(signal)) => {
                self.signals.cleanup(signal);
                self.finish_task();
                return;
            }
            Err(Interrupt::Failed(failure)) => {
                if !self.signals.check_and_cleanup(&failure) {
                    self.set_undeclared_failure(failure);
                }
            }
        }

        if let Some(run) = self.run.as_mut() {
            run.launcher = None;
        }
        self.finish_task();
        self.on_close();
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// ID of the attached run, or `None` once it has moved elsewhere.
    pub fn id(&self) -> Option<ChainId> {
        self.run.as_ref().map(|run| run.id)
    }

    /// Phase of the attached run.
    pub fn phase(&self) -> Option<ChainPhase> {
        self.run.as_ref().map(|run| run.phase)
    }

    /// Whether this task still owns the run.
    pub fn is_attached(&self) -> bool {
        self.run.is_some()
    }

    /// Sink receiving this chain's spurious failures.
    pub fn log(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.log)
    }

    fn run_mut(&mut self) -> Result<&mut ChainRun, PatternViolation> {
        self.run
            .as_deref_mut()
            .ok_or(PatternViolation::ChainDetached)
    }

    pub(crate) fn signals_mut(&mut self) -> &mut SignalBook {
        &mut self.signals
    }

    // ------------------------------------------------------------------------
    // Stage calls
    // ------------------------------------------------------------------------

    /// Call `stage` as the tail of the current body or wrapper.
    ///
    /// While running, a stage whose body value can be forwarded is dispatched
    /// through the current launcher's fast path and its value comes back
    /// directly. Otherwise the outcome is stored on the chain and the call
    /// reports [`Interrupt::Settled`]. From a closing wrapper the call is parked
    /// until the wrapper has settled; a void stage then reports `Ok(())` so the
    /// wrapper can still return its own outcome.
    ///
    /// The returned value must be passed on unchanged as the caller's own
    /// result: the callee's wrapper replays it, so `chain.call(s).map(f)`
    /// from a redirected body fails with [`PatternViolation::OutcomeTypeMismatch`].
    pub fn call<S, M>(&mut self, stage: S) -> StageResult<<S as Stage<M>>::Output>
    where
        S: Stage<M>,
    {
        let shape = S::shape();
        let phase = self.run_mut()?.phase;

        match phase {
            ChainPhase::Closing => {
                self.park(stage.into_continuation())?;
                if shape.void_invoke {
                    Ok(Returned::Void.downcast::<<S as Stage<M>>::Output>()?)
                } else {
                    Err(Interrupt::Settled)
                }
            }
            ChainPhase::Terminated => Err(PatternViolation::ChainTerminated.into()),
            ChainPhase::Running if shape.fast_path => {
                let launcher = self.run_mut()?.extract_launcher();
                #[cfg(feature = "tracing")]
                tracing::trace!(stage = shape.name, "stage.launch");
                let returned = launcher.launch(stage.into_continuation(), self)?;
                Ok(returned.downcast::<<S as Stage<M>>::Output>()?)
            }
            ChainPhase::Starting | ChainPhase::Running => {
                #[cfg(feature = "tracing")]
                tracing::trace!(stage = shape.name, "stage.launch_protected");
                self.launch_next_protected(stage.into_continuation())?;
                Err(Interrupt::Settled)
            }
        }
    }

    /// Call a void `stage` from a finally position.
    ///
    /// Fails with [`PatternViolation::NonVoidFinally`] if the stage's entry
    /// point returns a value.
    pub fn call_finally<S, M>(&mut self, stage: S) -> StageResult<()>
    where
        S: Stage<M>,
    {
        finally_check(&stage)?;
        self.call(stage).map(|_| ())
    }

    /// Check that `stage` may be called from a finally position.
    pub fn finally_check<S, M>(&self, stage: &S) -> Result<(), PatternViolation>
    where
        S: Stage<M>,
    {
        finally_check(stage)
    }

    fn launch_next_protected(&mut self, continuation: Continuation) -> StageResult<()> {
        let launcher = {
            let run = self.run_mut()?;
            run.phase = ChainPhase::Running;
            run.extract_launcher()
        };
        launcher
            .launch_protected(continuation, self)
            .map_err(Interrupt::Redirected)
    }

    fn park(&mut self, continuation: Continuation) -> Result<(), PatternViolation> {
        let run = self.run_mut()?;
        if run.resume.is_some() {
            return Err(PatternViolation::ResumeAlreadyParked);
        }
        run.resume = Some(continuation);
        Ok(())
    }

    pub(crate) fn enter_running(&mut self) -> Result<(), PatternViolation> {
        self.run_mut()?.phase = ChainPhase::Running;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Redirection
    // ------------------------------------------------------------------------

    /// Use `redirection`'s launcher for the next stage call only.
    pub fn set_redirector<R>(&mut self, redirection: &R) -> Result<(), PatternViolation>
    where
        R: Redirection + ?Sized,
    {
        let launcher = redirection.launcher()?;
        self.run_mut()?.launcher = Some(launcher);
        Ok(())
    }

    /// Forget any launcher set for the next stage call.
    pub fn clear_redirector(&mut self) -> Result<(), PatternViolation> {
        self.run_mut()?.launcher = None;
        Ok(())
    }

    /// Suspend through `redirection`, then end the current stage with no value.
    pub fn redirect_and_close<R>(&mut self, redirection: &R) -> StageResult<()>
    where
        R: Redirection + ?Sized,
    {
        self.set_redirector(redirection)?;
        self.call(EmptyStage)
    }

    /// Suspend through `redirection`, then end the current stage with `value`.
    pub fn redirect_and_return<R, T>(&mut self, redirection: &R, value: T) -> StageResult<T>
    where
        R: Redirection + ?Sized,
        T: Send + 'static,
    {
        self.set_redirector(redirection)?;
        self.call(EchoStage::new(value))
    }

    /// Detach the run so another execution context can continue it.
    ///
    /// On failure the run was already gone; the returned signal unwinds the
    /// current task.
    pub fn detach(&mut self) -> Result<DetachedChain, RedirectSignal> {
        match self.run.take() {
            Some(run) => Ok(DetachedChain { run }),
            None => {
                self.signals
                    .record(Failure::Pattern(PatternViolation::ChainDetached));
                Err(self.raise_redirect())
            }
        }
    }

    /// Put a redirect signal in flight for this task.
    ///
    /// Launchers return it after handing the run to another context.
    pub fn raise_redirect(&mut self) -> RedirectSignal {
        #[cfg(feature = "tracing")]
        tracing::debug!("stage.redirect");
        self.signals.raise()
    }

    // ------------------------------------------------------------------------
    // Closing hooks
    // ------------------------------------------------------------------------

    /// Register an extra teardown step.
    ///
    /// The hook sees the failure pending when it runs; a failure it returns
    /// replaces the pending outcome. Not allowed from closing wrappers.
    pub fn add_closing_hook<H>(&mut self, hook: H) -> Result<(), PatternViolation>
    where
        H: FnOnce(Option<&Failure>) -> Result<(), Failure> + Send + 'static,
    {
        let run = self.run_mut()?;
        if run.phase == ChainPhase::Closing {
            return Err(PatternViolation::HookWhileClosing);
        }
        run.actions.push(ClosingAction::Hook(Box::new(hook)));
        Ok(())
    }

    pub(crate) fn push_action(&mut self, action: ClosingAction) -> Result<(), PatternViolation> {
        self.run_mut()?.actions.push(action);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Outcome setters
    // ------------------------------------------------------------------------

    /// Store a value as the outcome of the current call.
    pub fn set_value<T: Send + 'static>(&mut self, value: T) {
        self.store_returned(Returned::from_value(value));
    }

    /// Store a void completion as the outcome of the current call.
    pub fn set_void(&mut self) {
        self.store(Pending::Void);
    }

    /// Store a failure of the calling context's declared contract.
    pub fn set_declared_failure(&mut self, failure: Failure) {
        self.store(Pending::Failure(failure));
    }

    /// Store a failure the calling context cannot declare.
    pub fn set_undeclared_failure(&mut self, failure: Failure) {
        self.store(Pending::Failure(failure.into_undeclared()));
    }

    /// Take the pending outcome for replay into a wrapper.
    pub fn playback(&mut self) -> Outcome {
        self.run
            .as_mut()
            .and_then(|run| run.pending.take())
            .unwrap_or(Err(Failure::Pattern(PatternViolation::MissingOutcome)))
    }

    pub(crate) fn store_returned(&mut self, returned: Returned) {
        let pending = match returned {
            Returned::Value(value) => Pending::Value(value),
            Returned::Void => Pending::Void,
        };
        self.store(pending);
    }

    /// Store a failure keeping its classification.
    pub(crate) fn store_failure(&mut self, failure: Failure) {
        self.store(Pending::Failure(failure));
    }

    fn store(&mut self, pending: Pending) {
        match self.run.as_mut() {
            Some(run) => {
                debug_assert!(run.pending.is_none(), "outcome already pending");
                run.pending = pending;
            }
            None => self
                .signals
                .record(Failure::Pattern(PatternViolation::ChainDetached)),
        }
    }

    pub(crate) fn finish_task(&mut self) {
        let log = Arc::clone(&self.log);
        self.signals.finish_task(log.as_ref());
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id())
            .field("phase", &self.phase())
            .finish()
    }
}
