//! Run the next stage as a task on an executor.

use std::sync::Arc;

use crate::chain::Chain;
use crate::error::{Interrupt, PatternViolation, StageResult};
use crate::executor::Executor;
use crate::launcher::{Continuation, Launcher, Redirection};
use crate::outcome::Returned;
use crate::signal::RedirectSignal;

/// Reusable redirection onto an executor. Without one it behaves as local.
#[derive(Clone)]
pub struct PoolRedirector {
    launcher: Arc<PoolLauncher>,
}

struct PoolLauncher {
    pool: Option<Arc<dyn Executor>>,
}

impl PoolRedirector {
    /// Redirect onto `pool`, or stay local when `None`.
    pub fn new(pool: Option<Arc<dyn Executor>>) -> Self {
        Self {
            launcher: Arc::new(PoolLauncher { pool }),
        }
    }

    /// Redirect onto `pool`.
    pub fn on(pool: Arc<dyn Executor>) -> Self {
        Self::new(Some(pool))
    }
}

impl std::fmt::Debug for PoolRedirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRedirector")
            .field("pool", &self.launcher.pool.is_some())
            .finish()
    }
}

impl Redirection for PoolRedirector {
    fn launcher(&self) -> Result<Arc<dyn Launcher>, PatternViolation> {
        Ok(self.launcher.clone())
    }
}

impl Launcher for PoolLauncher {
    fn launch(&self, continuation: Continuation, chain: &mut Chain) -> StageResult<Returned> {
        if self.pool.is_none() {
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
        match &self.pool {
            Some(pool) => continuation.redirect_with(chain, |job| pool.execute(job)),
            None => continuation.run_protected(chain),
        }
    }

    fn is_redirecting(&self) -> bool {
        self.pool.is_some()
    }
}
