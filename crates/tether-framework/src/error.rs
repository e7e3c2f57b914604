//! Error and control-flow types for the Tether engine.
//!
//! Handlers, dependencies and checkers all return [`HandlerResult`]. Its error
//! side, [`Interrupt`], carries either a control signal (skip, pause, reject,
//! finish, stop propagation) or a genuine failure. Any `std::error::Error`
//! converts into [`Interrupt::Failed`], so `?` works inside handlers.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::dependent::ParamKind;

/// Errors raised while declaring a handler, checker or dependency.
#[derive(Debug, Clone, Error)]
pub enum DependencyError {
    /// A parameter resolves from a kind the registration context rejects.
    #[error("parameter {index} of `{callable}` is a {kind} parameter, which is not allowed here (allowed: {allowed})")]
    KindNotAllowed {
        /// Type name of the offending callable.
        callable: &'static str,
        /// Position of the parameter.
        index: usize,
        /// The rejected kind.
        kind: ParamKind,
        /// The kinds the context accepts.
        allowed: String,
    },
}

impl DependencyError {
    pub(crate) fn kind_not_allowed(
        callable: &'static str,
        index: usize,
        kind: ParamKind,
        allowed: &[ParamKind],
    ) -> Self {
        let allowed = allowed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self::KindNotAllowed {
            callable,
            index,
            kind,
            allowed,
        }
    }
}

// ============================================================================
// HandlerError
// ============================================================================

#[derive(Debug)]
struct Custom(String);

impl fmt::Display for Custom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Custom {}

/// A cloneable failure raised by a handler, dependency or checker.
///
/// The same failure is logged by the dispatcher and handed to run
/// postprocessors, so it is reference counted.
#[derive(Clone)]
pub struct HandlerError {
    inner: Arc<dyn StdError + Send + Sync>,
}

impl HandlerError {
    /// Wraps any error.
    pub fn new<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
        }
    }

    /// Creates an error from a message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::new(Custom(msg.into()))
    }

    /// Attempts to view the underlying error as a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

// ============================================================================
// Interrupt
// ============================================================================

/// Early exit from a handler, dependency or checker.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// Skip the current handler and continue with the next one.
    Skip,
    /// End the current run and wait for the next event of the session.
    Pause,
    /// Re-run the current handler on the next event of the session.
    Reject,
    /// End the current run.
    Finish,
    /// End the current run and stop lower priorities from seeing the event.
    StopPropagation,
    /// A genuine failure.
    Failed(HandlerError),
}

impl Interrupt {
    /// Creates a failure from a message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::Failed(HandlerError::msg(msg))
    }

    /// Returns true for every variant except [`Interrupt::Failed`].
    pub fn is_signal(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// Converts into a failure, treating a control signal as misplaced.
    ///
    /// Used where signals have no meaning, e.g. session updaters.
    pub fn into_error(self, context: &str) -> HandlerError {
        match self {
            Self::Failed(err) => err,
            signal => HandlerError::msg(format!("unexpected {signal} in {context}")),
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("skip"),
            Self::Pause => f.write_str("pause"),
            Self::Reject => f.write_str("reject"),
            Self::Finish => f.write_str("finish"),
            Self::StopPropagation => f.write_str("stop propagation"),
            Self::Failed(err) => write!(f, "failure: {err}"),
        }
    }
}

impl<E: StdError + Send + Sync + 'static> From<E> for Interrupt {
    fn from(err: E) -> Self {
        Self::Failed(HandlerError::new(err))
    }
}

impl From<HandlerError> for Interrupt {
    fn from(err: HandlerError) -> Self {
        Self::Failed(err)
    }
}

/// Result type for handlers, dependencies and checkers.
pub type HandlerResult<T = ()> = Result<T, Interrupt>;
