//! Handler outcomes and return-value conversion.
//!
//! A handler may return `()`, an [`Outcome`], or a [`HandlerResult`] of
//! either. Checkers, dependencies and updaters return their own value types;
//! [`Returns`] maps every supported return type onto what the engine needs.

use std::any::Any;
use std::sync::Arc;

use crate::dependent::{Scoped, Value};
use crate::error::{HandlerError, Interrupt};
use crate::permission::Permission;

/// How a handler ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Run the next handler.
    Continue,
    /// Same as `Continue`, but logged as skipped.
    Skip,
    /// End the run and wait for the next event of the session.
    Pause,
    /// Re-run this handler on the next event of the session.
    Reject,
    /// End the run.
    Finish,
    /// End the run and block lower priorities.
    StopPropagation,
}

impl Interrupt {
    /// Maps a control signal to its outcome; a failure stays an error.
    pub fn into_outcome(self) -> Result<Outcome, HandlerError> {
        match self {
            Interrupt::Skip => Ok(Outcome::Skip),
            Interrupt::Pause => Ok(Outcome::Pause),
            Interrupt::Reject => Ok(Outcome::Reject),
            Interrupt::Finish => Ok(Outcome::Finish),
            Interrupt::StopPropagation => Ok(Outcome::StopPropagation),
            Interrupt::Failed(err) => Err(err),
        }
    }
}

// ============================================================================
// IntoOutcome - handler return values
// ============================================================================

/// Types a handler may return.
pub trait IntoOutcome: Send {
    fn into_outcome(self) -> Result<Outcome, HandlerError>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<Outcome, HandlerError> {
        Ok(Outcome::Continue)
    }
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Result<Outcome, HandlerError> {
        Ok(self)
    }
}

impl<T: IntoOutcome> IntoOutcome for Result<T, Interrupt> {
    fn into_outcome(self) -> Result<Outcome, HandlerError> {
        match self {
            Ok(value) => value.into_outcome(),
            Err(interrupt) => interrupt.into_outcome(),
        }
    }
}

// ============================================================================
// Returns - all callable return values
// ============================================================================

/// Conversion from a callable's return type into the value the engine
/// expects from it.
///
/// | Callable            | Target       | Accepted returns                        |
/// |---------------------|--------------|-----------------------------------------|
/// | handler, processor  | `Outcome`    | anything implementing [`IntoOutcome`]   |
/// | rule/permission     | `bool`       | `bool`, `HandlerResult<bool>`           |
/// | type updater        | `String`     | `String`, `HandlerResult<String>`       |
/// | permission updater  | `Permission` | `Permission`, `HandlerResult<Permission>` |
/// | dependency          | `Value`      | `HandlerResult<T>`                      |
/// | scoped dependency   | `Scoped`     | `HandlerResult<Scoped<T>>`              |
pub trait Returns<R>: Send {
    fn into_result(self) -> Result<R, Interrupt>;
}

impl<T: IntoOutcome> Returns<Outcome> for T {
    fn into_result(self) -> Result<Outcome, Interrupt> {
        self.into_outcome().map_err(Interrupt::Failed)
    }
}

impl Returns<bool> for bool {
    fn into_result(self) -> Result<bool, Interrupt> {
        Ok(self)
    }
}

impl Returns<bool> for Result<bool, Interrupt> {
    fn into_result(self) -> Result<bool, Interrupt> {
        self
    }
}

impl Returns<String> for String {
    fn into_result(self) -> Result<String, Interrupt> {
        Ok(self)
    }
}

impl Returns<String> for &'static str {
    fn into_result(self) -> Result<String, Interrupt> {
        Ok(self.to_owned())
    }
}

impl Returns<String> for Result<String, Interrupt> {
    fn into_result(self) -> Result<String, Interrupt> {
        self
    }
}

impl Returns<Permission> for Permission {
    fn into_result(self) -> Result<Permission, Interrupt> {
        Ok(self)
    }
}

impl Returns<Permission> for Result<Permission, Interrupt> {
    fn into_result(self) -> Result<Permission, Interrupt> {
        self
    }
}

impl<T: Any + Send + Sync> Returns<Value> for Result<T, Interrupt> {
    fn into_result(self) -> Result<Value, Interrupt> {
        self.map(|value| Arc::new(value) as Value)
    }
}

impl<T: Any + Send + Sync> Returns<Scoped<Value>> for Result<Scoped<T>, Interrupt> {
    fn into_result(self) -> Result<Scoped<Value>, Interrupt> {
        self.map(Scoped::erase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_map_to_outcomes_and_failures_stay_errors() {
        let paused: Result<(), Interrupt> = Err(Interrupt::Pause);
        assert_eq!(paused.into_outcome().ok(), Some(Outcome::Pause));

        let failed: Result<Outcome, Interrupt> = Err(Interrupt::msg("boom"));
        assert_eq!(failed.into_outcome().unwrap_err().to_string(), "boom");

        assert_eq!(().into_outcome().ok(), Some(Outcome::Continue));
    }
}
