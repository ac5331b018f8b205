//! Redirect signal and its per-task bookkeeping.
//!
//! Every task shell (see [`Chain`](crate::Chain)) owns a [`SignalBook`]: a slot
//! recording the signal currently in flight and a list of spurious failures
//! observed while unwinding. The list is drained into the chain's
//! [`LogSink`] when the task finishes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Failure;
use crate::sink::LogSink;

static NEXT_SIGNAL: AtomicU64 = AtomicU64::new(1);

pub(crate) const SPURIOUS_MESSAGE: &str = "Unexpected error in Chain execution";

/// Cooperative unwind marker: the chain continues in another context.
///
/// Only the framework creates signals; they are compared by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RedirectSignal {
    seq: u64,
}

impl RedirectSignal {
    fn new() -> Self {
        Self {
            seq: NEXT_SIGNAL.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl fmt::Display for RedirectSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "redirect #{}", self.seq)
    }
}

/// Lifecycle inconsistencies of the redirect signal itself.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMisuse {
    /// A signal was caught but none was in flight.
    #[error("Error in redirect signal handling")]
    Handling,
    /// The caught signal is not the one in flight.
    #[error("Error in redirect signal lifecycle")]
    Lifecycle,
    /// A task finished with a signal still in flight.
    #[error("Error in redirect signal management")]
    Management,
    /// A stage swallowed a signal and returned normally.
    #[error("Redirect signal swallowed by a stage")]
    Swallowed,
}

/// Per-task signal slot and spurious failure queue.
#[derive(Debug, Default)]
pub(crate) struct SignalBook {
    pending: Option<RedirectSignal>,
    spurious: Vec<Failure>,
}

impl SignalBook {
    /// Put a fresh signal in flight.
    pub(crate) fn raise(&mut self) -> RedirectSignal {
        let signal = RedirectSignal::new();
        self.pending = Some(signal);
        signal
    }

    /// The signal in flight, if any.
    pub(crate) fn in_flight(&self) -> Option<RedirectSignal> {
        self.pending
    }

    /// A failure seen while a signal is in flight is a disguised signal.
    ///
    /// Records the failure and returns the signal so unwinding can resume.
    pub(crate) fn check_and_resume(&mut self, failure: &Failure) -> Option<RedirectSignal> {
        let signal = self.pending?;
        self.spurious.push(failure.clone());
        Some(signal)
    }

    /// Like [`check_and_resume`](Self::check_and_resume), but ends the signal's flight.
    pub(crate) fn check_and_cleanup(&mut self, failure: &Failure) -> bool {
        if self.pending.take().is_some() {
            self.spurious.push(failure.clone());
            true
        } else {
            false
        }
    }

    /// The signal has been caught at a task boundary.
    pub(crate) fn cleanup(&mut self, signal: RedirectSignal) {
        match self.pending.take() {
            None => self.record(Failure::unexpected(SignalMisuse::Handling)),
            Some(pending) if pending != signal => {
                self.record(Failure::unexpected(SignalMisuse::Lifecycle))
            }
            Some(_) => {}
        }
    }

    /// Queue a failure that cannot be delivered through the outcome channel.
    pub(crate) fn record(&mut self, failure: Failure) {
        self.spurious.push(failure);
    }

    /// End of task: flag a leftover signal and drain everything to `log`.
    pub(crate) fn finish_task(&mut self, log: &dyn LogSink) {
        if self.pending.take().is_some() {
            self.record(Failure::unexpected(SignalMisuse::Management));
        }
        for failure in self.spurious.drain(..) {
            log.error(SPURIOUS_MESSAGE, &failure);
        }
    }
}
