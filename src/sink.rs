//! Log sink for failures with no live outcome channel.

use crate::error::Failure;

/// Receives unexpected and spurious failures that cannot reach a listener.
pub trait LogSink: Send + Sync {
    /// Report `cause` with a short description.
    fn error(&self, message: &str, cause: &Failure);
}

/// Default sink: `tracing::error!` when the `tracing` feature is on, stderr otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn error(&self, message: &str, cause: &Failure) {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %cause, "{}", message);

        #[cfg(not(feature = "tracing"))]
        eprintln!("{message}: {cause}");
    }
}
