use tether_core::{BoxedBot, BoxedEvent};

use crate::dependent::{Param, Resolved};
use crate::error::HandlerError;
use crate::matcher::Matcher;
use crate::state::StateRef;

/// A type that can be a parameter of an injected callable.
pub trait FromParam: Sized + Send + 'static {
    /// The source this parameter is resolved from.
    fn param() -> Param;

    /// Converts the resolved value. `None` skips the callable.
    fn from_resolved(resolved: Resolved) -> Option<Self>;
}

impl FromParam for BoxedBot {
    fn param() -> Param {
        Param::Bot
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        match resolved {
            Resolved::Bot(bot) => Some(bot),
            _ => None,
        }
    }
}

impl FromParam for BoxedEvent {
    fn param() -> Param {
        Param::Event
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        match resolved {
            Resolved::Event(event) => Some(event),
            _ => None,
        }
    }
}

impl FromParam for StateRef {
    fn param() -> Param {
        Param::State
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        match resolved {
            Resolved::State(state) => Some(state),
            _ => None,
        }
    }
}

impl FromParam for Matcher {
    fn param() -> Param {
        Param::Matcher
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        match resolved {
            Resolved::Matcher(matcher) => Some(matcher),
            _ => None,
        }
    }
}

/// Optional parameters never skip the callable.
impl<T: FromParam> FromParam for Option<T> {
    fn param() -> Param {
        T::param()
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        Some(T::from_resolved(resolved))
    }
}

/// The failure raised by the matcher run, for run postprocessors.
#[derive(Debug, Clone)]
pub struct Caught(pub Option<HandlerError>);

impl FromParam for Caught {
    fn param() -> Param {
        Param::Exception
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        match resolved {
            Resolved::Exception(err) => Some(Self(err)),
            _ => None,
        }
    }
}

/// The default value of `T`, for parameters nothing else can provide.
#[derive(Debug, Clone, Default)]
pub struct Fallback<T>(pub T);

impl<T: Default + Send + 'static> FromParam for Fallback<T> {
    fn param() -> Param {
        Param::Default
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        match resolved {
            Resolved::Default => Some(Self(T::default())),
            _ => None,
        }
    }
}

impl<T> std::ops::Deref for Fallback<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
