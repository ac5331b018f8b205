//! Execution contexts the built-in strategies hand work to.
//!
//! The chain never owns a thread pool or a clock. Pool and timer strategies
//! are given an [`Executor`] or [`Timer`]; [`ThreadSpawner`] covers plain
//! threads and, with the `tokio` feature, a runtime [`Handle`] covers both.
//!
//! [`Handle`]: tokio::runtime::Handle

use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A unit of work submitted to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on some other thread.
pub trait Executor: Send + Sync {
    /// Submit `job`. Must not run it on the calling thread.
    fn execute(&self, job: Job);
}

/// Runs jobs after a delay.
pub trait Timer: Send + Sync {
    /// Run `job` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, job: Job);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

impl<T: Timer + ?Sized> Timer for Arc<T> {
    fn schedule(&self, delay: Duration, job: Job) {
        (**self).schedule(delay, job)
    }
}

// ============================================================================
// Plain threads
// ============================================================================

/// Spawns a named OS thread per job.
#[derive(Debug, Clone)]
pub struct ThreadSpawner {
    name: String,
}

impl ThreadSpawner {
    /// Spawn threads named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn spawn(&self, job: Job) {
        // The job is moved into the closure, so a failed spawn loses it.
        if let Err(_error) = thread::Builder::new().name(self.name.clone()).spawn(job) {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_error, thread = %self.name, "executor.spawn_failed");
        }
    }
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::new("chain-worker")
    }
}

impl Executor for ThreadSpawner {
    fn execute(&self, job: Job) {
        self.spawn(job);
    }
}

impl Timer for ThreadSpawner {
    fn schedule(&self, delay: Duration, job: Job) {
        self.spawn(Box::new(move || {
            thread::sleep(delay);
            job();
        }));
    }
}

// ============================================================================
// Tokio
// ============================================================================

/// Jobs run chain code synchronously, so they go to the blocking pool.
#[cfg(feature = "tokio")]
impl Executor for tokio::runtime::Handle {
    fn execute(&self, job: Job) {
        drop(self.spawn_blocking(job));
    }
}

#[cfg(feature = "tokio")]
impl Timer for tokio::runtime::Handle {
    fn schedule(&self, delay: Duration, job: Job) {
        let handle = self.clone();
        drop(self.spawn(async move {
            tokio::time::sleep(delay).await;
            drop(handle.spawn_blocking(job));
        }));
    }
}
