//! Declarative redirection strategies.
//!
//! A [`StrategyConfig`] names a built-in strategy in serializable form, so
//! where a stage runs can be chosen from configuration. [`StrategyConfig::build`]
//! turns it into a [`Redirection`] using the execution contexts in
//! [`Collaborators`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::{Executor, ThreadSpawner, Timer};
use crate::launcher::{LocalRedirector, Redirection};
use crate::redirection::{PoolRedirector, TimeoutRedirector, TimerRedirector, TimerTimeout};

/// A built-in redirection strategy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Run on the calling thread.
    #[default]
    Local,
    /// Run as a task on the configured executor.
    Pool,
    /// Run once a delay has elapsed.
    Delay {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// Race an inner strategy against a timeout.
    Timeout {
        /// Operation name reported when the timeout fires.
        operation: String,
        /// Timeout in milliseconds.
        timeout_ms: u64,
        /// Strategy the stage is dispatched through.
        #[serde(default)]
        inner: Box<StrategyConfig>,
    },
}

impl StrategyConfig {
    /// Delay the next stage by `delay_ms` milliseconds.
    pub const fn delay(delay_ms: u64) -> Self {
        Self::Delay { delay_ms }
    }

    /// Bound `inner` by `timeout`.
    pub fn timeout(operation: impl Into<String>, timeout: Duration, inner: StrategyConfig) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            inner: Box::new(inner),
        }
    }

    /// Whether this strategy may move the chain to another context.
    pub fn is_redirecting(&self) -> bool {
        !matches!(self, Self::Local)
    }

    /// Build the redirection this configuration describes.
    pub fn build(&self, collaborators: &Collaborators) -> Arc<dyn Redirection> {
        match self {
            Self::Local => Arc::new(LocalRedirector),
            Self::Pool => Arc::new(PoolRedirector::new(collaborators.pool.clone())),
            Self::Delay { delay_ms } => Arc::new(TimerRedirector::after(
                Arc::clone(&collaborators.timer),
                Duration::from_millis(*delay_ms),
            )),
            Self::Timeout {
                operation,
                timeout_ms,
                inner,
            } => Arc::new(TimeoutRedirector::new(
                inner.build(collaborators),
                Arc::new(TimerTimeout::new(
                    Arc::clone(&collaborators.timer),
                    Duration::from_millis(*timeout_ms),
                )),
                operation.clone(),
            )),
        }
    }
}

/// Execution contexts used to build strategies.
#[derive(Clone)]
pub struct Collaborators {
    /// Executor for pool strategies; `None` makes them local.
    pub pool: Option<Arc<dyn Executor>>,
    /// Timer for delay and timeout strategies.
    pub timer: Arc<dyn Timer>,
}

impl Collaborators {
    /// Plain OS threads for both pool and timer.
    pub fn threads() -> Self {
        let spawner = Arc::new(ThreadSpawner::default());
        Self {
            pool: Some(spawner.clone()),
            timer: spawner,
        }
    }

    /// A tokio runtime for both pool and timer.
    #[cfg(feature = "tokio")]
    pub fn tokio(handle: tokio::runtime::Handle) -> Self {
        let handle = Arc::new(handle);
        Self {
            pool: Some(handle.clone()),
            timer: handle,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("pool", &self.pool.is_some())
            .finish()
    }
}
