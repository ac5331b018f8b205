//! Type-erased outcomes carried across stage boundaries.

use std::any::{type_name, Any, TypeId};
use std::fmt;

use crate::error::{Failure, PatternViolation};

/// A returned value, or the marker of a void entry point.
pub enum Returned {
    /// A real value.
    Value(Box<dyn Any + Send>),
    /// The entry point returned nothing.
    Void,
}

/// The final outcome of a stage or chain: a returned value or a failure.
pub type Outcome = Result<Returned, Failure>;

fn is_unit<T: 'static>() -> bool {
    TypeId::of::<T>() == TypeId::of::<()>()
}

impl Returned {
    /// Wrap a value; `()` becomes [`Returned::Void`].
    pub fn from_value<T: Send + 'static>(value: T) -> Self {
        if is_unit::<T>() {
            Self::Void
        } else {
            Self::Value(Box::new(value))
        }
    }

    /// Whether this is the void marker.
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Recover the concrete value.
    ///
    /// A `()` receiver accepts anything and discards it, the way a void
    /// caller ignores whatever its callee returned.
    pub fn downcast<T: 'static>(self) -> Result<T, PatternViolation> {
        let mismatch = || PatternViolation::OutcomeTypeMismatch {
            expected: type_name::<T>(),
        };
        if is_unit::<T>() {
            let unit: Box<dyn Any> = Box::new(());
            return unit.downcast::<T>().map(|b| *b).map_err(|_| mismatch());
        }
        match self {
            Self::Value(value) => value.downcast::<T>().map(|b| *b).map_err(|_| mismatch()),
            Self::Void => Err(mismatch()),
        }
    }
}

impl fmt::Debug for Returned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Void => f.write_str("Void"),
        }
    }
}

/// The pending outcome of a chain run.
///
/// Exactly one variant holds at any time, so a value and a failure can never
/// be pending together.
#[derive(Default)]
pub(crate) enum Pending {
    /// Nothing stored since the last extraction.
    #[default]
    None,
    /// A stored value.
    Value(Box<dyn Any + Send>),
    /// A stored void completion.
    Void,
    /// A stored failure.
    Failure(Failure),
}

impl Pending {
    pub(crate) fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub(crate) fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    /// Take the outcome, leaving nothing pending.
    pub(crate) fn take(&mut self) -> Option<Outcome> {
        match std::mem::take(self) {
            Self::None => None,
            Self::Value(value) => Some(Ok(Returned::Value(value))),
            Self::Void => Some(Ok(Returned::Void)),
            Self::Failure(failure) => Some(Err(failure)),
        }
    }
}

impl From<Outcome> for Pending {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Ok(Returned::Value(value)) => Self::Value(value),
            Ok(Returned::Void) => Self::Void,
            Err(failure) => Self::Failure(failure),
        }
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Value(_) => f.write_str("Value(..)"),
            Self::Void => f.write_str("Void"),
            Self::Failure(failure) => f.debug_tuple("Failure").field(failure).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_values_are_void() {
        assert!(Returned::from_value(()).is_void());
        assert!(!Returned::from_value(7_u32).is_void());
    }

    #[test]
    fn unit_receivers_discard_any_value() {
        assert!(Returned::from_value(String::from("x")).downcast::<()>().is_ok());
        assert!(Returned::Void.downcast::<()>().is_ok());
    }

    #[test]
    fn mismatched_values_are_pattern_violations() {
        match Returned::from_value(1_u8).downcast::<String>() {
            Err(PatternViolation::OutcomeTypeMismatch { expected }) => {
                assert!(expected.contains("String"));
            }
            other => panic!("Expected mismatch, got {:?}", other.map(|_| ())),
        }
        assert!(Returned::Void.downcast::<u8>().is_err());
    }

    #[test]
    fn pending_take_leaves_nothing_behind() {
        let outcome: Outcome = Ok(Returned::from_value(3_i32));
        let mut pending = Pending::from(outcome);
        let taken = pending.take();
        assert!(pending.is_none());
        match taken {
            Some(Ok(returned)) => assert_eq!(returned.downcast::<i32>(), Ok(3)),
            other => panic!("Expected value, got {:?}", other.map(|r| r.map(|_| ()))),
        }
    }
}
