//! Closing actions and the unwind loop.
//!
//! Every dispatched full stage pushes its wrapper onto the chain's action stack
//! before its body runs. When the tail of the chain settles, the stack unwinds
//! last-in first-out: each wrapper receives the outcome left by everything
//! above it and stores its own. The bottom action always delivers the final
//! outcome to the chain's listener.

use std::panic::{self, AssertUnwindSafe};

use crate::chain::{Chain, ChainPhase};
use crate::error::{panic_failure, Failure, Interrupt, PatternViolation, StageResult};
use crate::launcher::Continuation;
use crate::outcome::{Outcome, Pending, Returned};
use crate::signal::{RedirectSignal, SignalMisuse};

type Wrapper = Box<dyn FnOnce(Outcome, &mut Chain) -> StageResult<Returned> + Send>;
type Hook = Box<dyn FnOnce(Option<&Failure>) -> Result<(), Failure> + Send>;
type Terminal = Box<dyn FnOnce(Outcome) + Send>;

/// One entry of a chain run's LIFO unwind stack.
pub(crate) enum ClosingAction {
    /// Replay the pending outcome into a full stage's wrapper.
    Invoke {
        stage: &'static str,
        wrapper: Wrapper,
    },
    /// User teardown registered with [`Chain::add_closing_hook`].
    Hook(Hook),
    /// Restore the outcome saved before a finally-style stage ran.
    Merge(Pending),
    /// Deliver the final outcome and leave a void behind.
    Terminal(Terminal),
}

impl ClosingAction {
    pub(crate) fn invoke<F>(stage: &'static str, wrapper: F) -> Self
    where
        F: FnOnce(Outcome, &mut Chain) -> StageResult<Returned> + Send + 'static,
    {
        Self::Invoke {
            stage,
            wrapper: Box::new(wrapper),
        }
    }
}

impl Chain {
    /// Unwind the action stack until it is empty or the run moves away.
    pub(crate) fn on_close(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.phase = ChainPhase::Closing;
        #[cfg(feature = "tracing")]
        tracing::debug!(chain = %run.id, actions = run.actions.len(), "chain.close");

        while let Some(action) = self.run.as_mut().and_then(|run| run.actions.pop()) {
            self.run_action(action);

            let resume = self.run.as_mut().and_then(|run| run.resume.take());
            if let Some(resume) = resume {
                if let Err(signal) = self.on_resume(resume) {
                    self.signals.cleanup(signal);
                    self.finish_task();
                    return;
                }
                match self.run.as_mut() {
                    Some(run) => run.phase = ChainPhase::Closing,
                    None => break,
                }
            }
        }

        if let Some(run) = self.run.as_mut() {
            debug_assert!(matches!(run.pending, Pending::Void));
            run.phase = ChainPhase::Terminated;
            #[cfg(feature = "tracing")]
            tracing::info!(chain = %run.id, "chain.end");
        }
        self.finish_task();
    }

    /// Run the stage a wrapper parked, keeping the wrapper's own outcome
    /// unless the parked stage fails or returns a value.
    fn on_resume(&mut self, resume: Continuation) -> Result<(), RedirectSignal> {
        let launcher = {
            let Some(run) = self.run.as_mut() else {
                return Ok(());
            };
            run.phase = ChainPhase::Running;
            match std::mem::take(&mut run.pending) {
                Pending::None | Pending::Void => {}
                saved => run.actions.push(ClosingAction::Merge(saved)),
            }
            run.extract_launcher()
        };
        #[cfg(feature = "tracing")]
        tracing::trace!(stage = resume.name(), "stage.resume");
        launcher.launch_protected(resume, self)
    }

    fn run_action(&mut self, action: ClosingAction) {
        match action {
            ClosingAction::Invoke { stage, wrapper } => self.run_wrapper(stage, wrapper),
            ClosingAction::Hook(hook) => self.run_hook(hook),
            ClosingAction::Merge(saved) => self.merge(saved),
            ClosingAction::Terminal(done) => {
                let outcome = self.playback();
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| done(outcome))) {
                    self.signals.record(panic_failure(payload));
                }
                if let Some(run) = self.run.as_mut() {
                    run.pending = Pending::Void;
                }
            }
        }
    }

    fn run_wrapper(&mut self, stage: &'static str, wrapper: Wrapper) {
        let played = self.playback();
        #[cfg(feature = "tracing")]
        tracing::trace!(stage, ok = played.is_ok(), "stage.invoke");
        #[cfg(not(feature = "tracing"))]
        let _ = stage;

        let result = panic::catch_unwind(AssertUnwindSafe(|| wrapper(played, self)))
            .unwrap_or_else(|payload| Err(Interrupt::Failed(panic_failure(payload))));

        match result {
            Ok(returned) => self.store_returned(returned),
            Err(Interrupt::Failed(failure)) => self.store_failure(failure),
            Err(Interrupt::Settled) => {
                let parked = self.run.as_ref().is_some_and(|run| run.resume.is_some());
                if !parked {
                    let missing = Failure::Pattern(PatternViolation::MissingOutcome);
                    self.signals.record(missing.clone());
                    self.store_failure(missing);
                }
            }
            Err(Interrupt::Redirected(signal)) => {
                self.signals.cleanup(signal);
                let misuse = Failure::unexpected(SignalMisuse::Handling);
                self.signals.record(misuse.clone());
                if self.run.as_ref().is_some_and(|run| run.pending.is_none()) {
                    self.store_failure(misuse);
                }
            }
        }
    }

    fn run_hook(&mut self, hook: Hook) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let current = run.pending.failure().cloned();
        let result = panic::catch_unwind(AssertUnwindSafe(|| hook(current.as_ref())))
            .unwrap_or_else(|payload| Err(panic_failure(payload)));
        if let Err(failure) = result {
            run.pending = Pending::Failure(failure.into_undeclared());
        }
    }

    fn merge(&mut self, saved: Pending) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        match run.pending {
            Pending::Failure(_) | Pending::Value(_) => {}
            Pending::Void => run.pending = saved,
            Pending::None => {
                self.signals
                    .record(Failure::Pattern(PatternViolation::MissingOutcome));
                run.pending = saved;
            }
        }
    }
}
