//! Fan out a fixed number of instances and resume once all succeeded.
//!
//! The first failing instance resumes the chain with its failure; later
//! reports are ignored. With zero instances the chain resumes immediately.

use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{panic_failure, Failure, PatternViolation};
use crate::executor::Executor;
use crate::redirector::{Completion, Redirect, Redirector};

/// Work split into independent instances.
pub trait FanOut: Send + Sync + 'static {
    /// Executor for `instance`; `None` runs it on the launching thread.
    fn instance_pool(&self, _instance: usize) -> Option<Arc<dyn Executor>> {
        None
    }

    /// Run `instance`.
    ///
    /// Return `Ok(true)` when the instance finished successfully right away,
    /// or `Ok(false)` when it will report through `slot` later. An `Err` fails
    /// the whole join.
    fn run_instance(&self, instance: usize, slot: JoinSlot) -> Result<bool, Failure>;
}

/// [`Redirect`] operation running every instance of a [`FanOut`].
pub struct Join<F> {
    op: Arc<F>,
    instances: usize,
}

impl<F: FanOut> Join<F> {
    /// One-shot redirector joining `instances` instances of `op`.
    pub fn redirector(instances: usize, op: F) -> Redirector<Self> {
        Redirector::new(Self {
            op: Arc::new(op),
            instances,
        })
    }

    /// Number of instances launched.
    pub fn instances(&self) -> usize {
        self.instances
    }
}

impl<F> Deref for Join<F> {
    type Target = F;

    fn deref(&self) -> &F {
        &self.op
    }
}

impl<F> fmt::Debug for Join<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Join")
            .field("instances", &self.instances)
            .finish()
    }
}

impl<F: FanOut> Redirect for Join<F> {
    fn launch(&self, completion: Completion) {
        if self.instances == 0 {
            completion.check(completion.completed());
            return;
        }

        let group = Arc::new(JoinGroup {
            remaining: Mutex::new(self.instances),
            completion,
        });
        #[cfg(feature = "tracing")]
        tracing::debug!(instances = self.instances, "fan_out.launch");

        for instance in 0..self.instances {
            let slot = JoinSlot {
                group: Arc::clone(&group),
                instance,
                reported: Arc::new(AtomicBool::new(false)),
            };
            match self.op.instance_pool(instance) {
                Some(pool) => {
                    let op = Arc::clone(&self.op);
                    pool.execute(Box::new(move || run_instance(op.as_ref(), instance, slot)));
                }
                None => run_instance(self.op.as_ref(), instance, slot),
            }
        }
    }
}

fn run_instance<F: FanOut>(op: &F, instance: usize, slot: JoinSlot) {
    let reporter = slot.clone();
    let result = panic::catch_unwind(AssertUnwindSafe(|| op.run_instance(instance, slot)))
        .unwrap_or_else(|payload| Err(panic_failure(payload)));
    let report = match result {
        Ok(true) => reporter.completed(),
        Ok(false) => Ok(()),
        Err(failure) => reporter.fail(failure),
    };
    reporter.group.completion.check(report);
}

struct JoinGroup {
    remaining: Mutex<usize>,
    completion: Completion,
}

impl JoinGroup {
    fn report(&self, outcome: Result<(), Failure>) {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return;
        }
        match outcome {
            Err(failure) => {
                *remaining = 0;
                drop(remaining);
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %failure, "join.failed");
                self.completion.check(self.completion.fail(failure));
            }
            Ok(()) => {
                *remaining -= 1;
                if *remaining == 0 {
                    drop(remaining);
                    #[cfg(feature = "tracing")]
                    tracing::debug!("join.complete");
                    self.completion.check(self.completion.completed());
                }
            }
        }
    }
}

/// Reports the outcome of one fan-out instance. Only the first report counts.
#[derive(Clone)]
pub struct JoinSlot {
    group: Arc<JoinGroup>,
    instance: usize,
    reported: Arc<AtomicBool>,
}

impl JoinSlot {
    /// Index of the instance this slot belongs to.
    pub fn instance(&self) -> usize {
        self.instance
    }

    fn claim(&self) -> Result<(), PatternViolation> {
        if self.reported.swap(true, Ordering::AcqRel) {
            return Err(PatternViolation::SlotReused {
                instance: self.instance,
            });
        }
        Ok(())
    }

    /// The instance succeeded.
    pub fn completed(&self) -> Result<(), PatternViolation> {
        self.claim()?;
        self.group.report(Ok(()));
        Ok(())
    }

    /// The instance failed within the join's declared contract.
    pub fn declared_failure<E>(&self, error: E) -> Result<(), PatternViolation>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.fail(Failure::declared(error))
    }

    /// The instance failed unexpectedly.
    pub fn unexpected_failure<E>(&self, error: E) -> Result<(), PatternViolation>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.fail(Failure::unexpected(error))
    }

    /// The instance failed with `failure`.
    pub fn fail(&self, failure: Failure) -> Result<(), PatternViolation> {
        self.claim()?;
        self.group.report(Err(failure));
        Ok(())
    }
}

impl fmt::Debug for JoinSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinSlot")
            .field("instance", &self.instance)
            .field("reported", &self.reported.load(Ordering::Acquire))
            .finish()
    }
}
