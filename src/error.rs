//! Failure taxonomy and the control-flow channel returned by stages.
//!
//! A stage reports one of three things besides a value: a [`Failure`] that
//! travels through the chain's outcome channel, [`Interrupt::Settled`] when the
//! outcome has already been stored on the chain by a protected launch, or
//! [`Interrupt::Redirected`] when the rest of the chain now runs elsewhere.

use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use crate::signal::RedirectSignal;

/// Type-erased error shared by every clone of a [`Failure`].
pub type BoxError = Arc<dyn StdError + Send + Sync + 'static>;

/// Result type of every stage entry point.
pub type StageResult<T> = Result<T, Interrupt>;

// ============================================================================
// Failure
// ============================================================================

/// A failure carried through the chain's outcome channel.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Failure {
    /// Part of a stage's own failure contract.
    #[error("{0}")]
    Declared(BoxError),

    /// A failure the enclosing contract does not declare.
    ///
    /// Never matched by [`Failure::downcast_ref`].
    #[error("Unexpected exception in a stage: {0}")]
    Unexpected(BoxError),

    /// Misuse of the chain's one-shot or void contracts.
    #[error(transparent)]
    Pattern(#[from] PatternViolation),
}

impl Failure {
    /// Wrap a stage's own error.
    pub fn declared<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Declared(Arc::new(error))
    }

    /// Wrap an error as an unexpected failure.
    pub fn unexpected<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Unexpected(Arc::new(error))
    }

    /// Reclassify for a context that cannot declare this failure.
    ///
    /// Unexpected failures and pattern violations pass through unchanged;
    /// a declared failure becomes the cause of an unexpected one.
    pub fn into_undeclared(self) -> Self {
        match self {
            Self::Declared(cause) => Self::Unexpected(cause),
            other => other,
        }
    }

    /// Whether this failure belongs to a stage's declared contract.
    pub fn is_declared(&self) -> bool {
        matches!(self, Self::Declared(_))
    }

    /// Whether this is a declared failure of type `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Borrow the declared error as its concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Declared(error) => error.as_ref().downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Borrow the wrapped cause of an unexpected failure.
    pub fn unexpected_cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Unexpected(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// The pattern violation, if this is one.
    pub fn as_pattern(&self) -> Option<&PatternViolation> {
        match self {
            Self::Pattern(violation) => Some(violation),
            _ => None,
        }
    }
}

// ============================================================================
// Pattern Violations
// ============================================================================

/// Fatal programmer errors: never retried.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternViolation {
    /// A launcher was requested twice from the same one-shot redirector.
    #[error("Redirector already used")]
    RedirectorReused,

    /// A redirector's completion was reported more than once.
    #[error("Redirector completion already reported")]
    CompletionReused,

    /// A fan-out slot reported its instance more than once.
    #[error("Fan-out instance {instance} already reported")]
    SlotReused {
        /// Index of the offending instance.
        instance: usize,
    },

    /// A stage with a value-returning entry point was used in a finally position.
    #[error("invoke method is not void: {stage}")]
    NonVoidFinally {
        /// Type name of the stage.
        stage: &'static str,
    },

    /// A closing hook was registered while the chain was unwinding.
    #[error("Call non allowed in catch or finally blocks")]
    HookWhileClosing,

    /// A replayed outcome did not have the type the receiver expected.
    #[error("Stage outcome is not a {expected}")]
    OutcomeTypeMismatch {
        /// Type name the receiver expected.
        expected: &'static str,
    },

    /// The chain run has moved to another execution context.
    #[error("Chain run is not attached to this task")]
    ChainDetached,

    /// The chain run has already delivered its outcome.
    #[error("Chain run already terminated")]
    ChainTerminated,

    /// A closing wrapper called more than one stage.
    #[error("Only one stage call is allowed per closing wrapper")]
    ResumeAlreadyParked,

    /// A wrapper finished without leaving an outcome to replay.
    #[error("Closing action left no outcome")]
    MissingOutcome,
}

// ============================================================================
// Interrupt
// ============================================================================

/// Why a stage did not return a value directly.
#[derive(thiserror::Error, Debug)]
pub enum Interrupt {
    /// The stage failed.
    #[error(transparent)]
    Failed(#[from] Failure),

    /// The outcome has already been stored on the chain.
    #[error("Outcome already stored on the chain")]
    Settled,

    /// The chain continues in another execution context.
    #[error("Chain redirected ({0})")]
    Redirected(RedirectSignal),
}

impl Interrupt {
    /// Shorthand for a declared failure.
    pub fn declared<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed(Failure::declared(error))
    }

    /// Shorthand for an unexpected failure.
    pub fn unexpected<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed(Failure::unexpected(error))
    }

    /// The failure, if this interrupt carries one.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<PatternViolation> for Interrupt {
    fn from(violation: PatternViolation) -> Self {
        Self::Failed(Failure::Pattern(violation))
    }
}

// ============================================================================
// Built-in failures
// ============================================================================

/// Declared failure raised when a timeout race is lost by the stage.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} timed out after {timeout:?}")]
pub struct StageTimeout {
    /// Name of the operation that timed out.
    pub operation: String,
    /// The timeout that elapsed.
    pub timeout: Duration,
}

/// A panic caught at a protected boundary.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("stage panicked: {0}")]
pub struct StagePanicked(pub String);

/// Convert a caught panic payload into an unexpected failure.
pub(crate) fn panic_failure(payload: Box<dyn Any + Send>) -> Failure {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    Failure::unexpected(StagePanicked(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn declared_failures_downcast() {
        let failure = Failure::declared(Boom);
        assert!(failure.is::<Boom>());
        assert!(failure.is_declared());
        assert_eq!(failure.to_string(), "boom");
    }

    #[test]
    fn undeclared_wrapping_hides_the_declared_type() {
        let failure = Failure::declared(Boom).into_undeclared();
        assert!(!failure.is::<Boom>());
        assert!(failure.unexpected_cause().is_some());
        assert_eq!(failure.to_string(), "Unexpected exception in a stage: boom");
    }

    #[test]
    fn pattern_violations_pass_through_reclassification() {
        let failure = Failure::from(PatternViolation::HookWhileClosing).into_undeclared();
        assert_eq!(
            failure.as_pattern(),
            Some(&PatternViolation::HookWhileClosing)
        );
    }

    #[test]
    fn panic_payloads_become_unexpected_failures() {
        let failure = panic_failure(Box::new("kaboom"));
        assert!(failure.to_string().contains("kaboom"));
        let failure = panic_failure(Box::new(String::from("owned")));
        assert!(failure.to_string().contains("owned"));
        let failure = panic_failure(Box::new(42_u8));
        assert!(failure.to_string().contains("unknown panic"));
    }
}
