//! Stage contracts.
//!
//! A stage is a unit of chain work. Calls between stages are tail calls:
//! the call is the last expression of the calling body or wrapper, and
//! [`Interrupt::Settled`](crate::Interrupt::Settled) or
//! [`Interrupt::Redirected`](crate::Interrupt::Redirected) are propagated with `?`.
//!
//! - [`SimpleStage`]: a single entry point.
//! - [`FullStage`]: a `body` holding the suspend-capable work, plus an `invoke`
//!   wrapper receiving the body's outcome and implementing the catch, finally
//!   or completion logic around it. The wrapper runs when the chain unwinds,
//!   so it observes the body's outcome even if the body finished on another thread.

use std::any::type_name;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chain::Chain;
use crate::closing::ClosingAction;
use crate::error::{Failure, PatternViolation, StageResult};
use crate::launcher::Continuation;
use crate::outcome::Returned;
use crate::registry::{self, StageShape};

/// Optional capability asked to cancel a stage that lost a timeout race.
pub trait Interruptible: Send + Sync {
    /// Stop and undo the stage's side effects.
    ///
    /// Called at most once. Must not block: real rollback work has to be
    /// handed to another execution context.
    fn interrupt_and_rollback_asynchronously(&self);
}

/// A stage with a single entry point.
pub trait SimpleStage: Send + Sync + 'static {
    /// Value produced by the entry point; `()` for a void stage.
    type Output: Send + 'static;

    /// Run the stage.
    fn invoke(&self, chain: &mut Chain) -> StageResult<Self::Output>;

    /// Handle used to interrupt the stage if it loses a timeout race.
    fn interrupt_handle(&self) -> Option<Arc<dyn Interruptible>> {
        None
    }
}

/// A stage split into a body and a wrapping entry point.
pub trait FullStage: Send + Sync + 'static {
    /// Value produced by the body.
    type Body: Send + 'static;
    /// Value produced by the entry point.
    type Output: Send + 'static;

    /// The stage's work; its failures are the stage's declared contract.
    fn body(&self, chain: &mut Chain) -> StageResult<Self::Body>;

    /// Decide the stage's outcome from the body's.
    fn invoke(
        &self,
        body: Result<Self::Body, Failure>,
        chain: &mut Chain,
    ) -> StageResult<Self::Output>;

    /// Handle used to interrupt the stage if it loses a timeout race.
    fn interrupt_handle(&self) -> Option<Arc<dyn Interruptible>> {
        None
    }
}

/// Marker selecting the [`SimpleStage`] implementation of [`Stage`].
#[derive(Debug)]
pub struct Simple;

/// Marker selecting the [`FullStage`] implementation of [`Stage`].
#[derive(Debug)]
pub struct Full;

/// Anything the chain can dispatch. Implemented for every simple and full stage.
pub trait Stage<Marker>: Send + Sync + 'static {
    /// Value produced by the stage's entry point.
    type Output: Send + 'static;

    /// Cached dispatch facts for this stage type.
    fn shape() -> StageShape
    where
        Self: Sized;

    /// Split the stage into a resumable continuation.
    fn into_continuation(self) -> Continuation
    where
        Self: Sized;
}

impl<S: SimpleStage> Stage<Simple> for S {
    type Output = <S as SimpleStage>::Output;

    fn shape() -> StageShape {
        registry::shape_of::<S>(StageShape::simple::<S, <S as SimpleStage>::Output>)
    }

    fn into_continuation(self) -> Continuation {
        let interrupt = SimpleStage::interrupt_handle(&self);
        Continuation::new(
            type_name::<S>(),
            move |chain: &mut Chain| SimpleStage::invoke(&self, chain).map(Returned::from_value),
            None,
            interrupt,
        )
    }
}

impl<S: FullStage> Stage<Full> for S {
    type Output = <S as FullStage>::Output;

    fn shape() -> StageShape {
        registry::shape_of::<S>(StageShape::full::<S, S::Body, <S as FullStage>::Output>)
    }

    fn into_continuation(self) -> Continuation {
        let name = type_name::<S>();
        let interrupt = FullStage::interrupt_handle(&self);
        let stage = Arc::new(self);
        let wrapper = Arc::clone(&stage);
        let close = ClosingAction::invoke(name, move |played, chain: &mut Chain| {
            let body = played.and_then(|returned| {
                returned.downcast::<S::Body>().map_err(Failure::from)
            });
            FullStage::invoke(&*wrapper, body, chain).map(Returned::from_value)
        });
        Continuation::new(
            name,
            move |chain: &mut Chain| stage.body(chain).map(Returned::from_value),
            Some(close),
            interrupt,
        )
    }
}

/// Check that `stage` may be called from a finally position.
///
/// Only stages whose entry point returns nothing qualify.
pub fn finally_check<S, M>(_stage: &S) -> Result<(), PatternViolation>
where
    S: Stage<M>,
{
    let shape = S::shape();
    if shape.void_invoke {
        Ok(())
    } else {
        Err(PatternViolation::NonVoidFinally { stage: shape.name })
    }
}

// ============================================================================
// Built-in stages
// ============================================================================

/// Does nothing; the tail call of [`Chain::redirect_and_close`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyStage;

impl SimpleStage for EmptyStage {
    type Output = ();

    fn invoke(&self, _chain: &mut Chain) -> StageResult<()> {
        Ok(())
    }
}

/// Returns the value it was built with; the tail call of [`Chain::redirect_and_return`].
pub struct EchoStage<T> {
    value: Mutex<Option<T>>,
}

impl<T> EchoStage<T> {
    /// Echo `value` when invoked.
    pub fn new(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }
}

impl<T: Send + 'static> SimpleStage for EchoStage<T> {
    type Output = T;

    fn invoke(&self, _chain: &mut Chain) -> StageResult<T> {
        Ok(self
            .value
            .lock()
            .take()
            .ok_or(PatternViolation::MissingOutcome)?)
    }
}
