//! Parameter types for handlers, checkers and dependencies.
//!
//! Every parameter type implements [`FromParam`], which declares the source
//! the value comes from and converts the resolved value into the type.
//! The engine uses the declaration to validate a callable at registration and
//! to resolve its parameters at call time.
//!
//! # Sources
//!
//! | Type                                   | Declared kind |
//! |----------------------------------------|---------------|
//! | [`BoxedBot`](tether_core::BoxedBot)    | bot           |
//! | [`BoxedEvent`](tether_core::BoxedEvent), [`Typed`], event sugar | event |
//! | [`StateRef`](crate::StateRef), [`Received`], [`CommandMatch`] | state |
//! | [`Arg`], [`ArgStr`], [`ArgPlainText`], [`ArgPromptResult`] | arg |
//! | [`Matcher`](crate::Matcher)            | matcher       |
//! | [`Caught`]                             | exception     |
//! | [`Dep`], [`Fresh`]                     | depend        |
//! | [`Fallback`]                           | default       |
//!
//! If the resolved value does not fit the declared type (e.g. an event
//! without a message for [`EventMessage`]), the callable is skipped.
//! [`Option<T>`] never skips.

pub mod arg;
pub mod core;
pub mod depend;
pub mod event;

pub use arg::{Arg, ArgKey, ArgPlainText, ArgPromptResult, ArgStr, LastReceived, Received};
pub use self::core::{Caught, Fallback, FromParam};
pub use depend::{Dep, Fresh, Provide};
pub use event::{
    CommandMatch, EventMessage, EventName, EventPlainText, EventToMe, EventTypeName, SessionId,
    Typed, UserId,
};
