//! # Tether Framework
//!
//! The matcher engine behind Tether bots.
//!
//! This layer provides:
//! - A priority-ordered [`MatcherRegistry`] and the [`Dispatcher`] that walks it
//! - Dependency injection for handlers, rule/permission checkers and processors,
//!   with per-scope caching and scoped teardown
//! - Multi-turn sessions: handlers can pause, reject or collect arguments
//!   (`got` / `receive`) and the next event of the same session resumes them
//! - Built-in rules and permissions, and `on_*` shortcuts for common matchers
//!
//! Adapters and transports live elsewhere; the engine only consumes the
//! [`Event`](tether_core::Event) and [`Bot`](tether_core::Bot) capabilities.

pub mod context;
pub mod dependent;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod matcher;
pub mod permission;
pub mod processor;
pub mod registry;
pub mod rule;
pub mod rules;
pub mod settings;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{RunContext, current_bot, current_event, current_matcher};
pub use dependent::{CacheKey, Dependent, Depends, Injectable, Injector, ParamKind, Scoped};
pub use dispatcher::Dispatcher;
pub use error::{DependencyError, HandlerError, HandlerResult, Interrupt};
pub use extractor::FromParam;
pub use handler::{IntoOutcome, Outcome, Returns};
pub use matcher::{
    IntoPrompt, Matcher, MatcherBuilder, MatcherTemplate, on, on_command, on_endswith,
    on_fullmatch, on_keyword, on_message, on_metaevent, on_notice, on_regex, on_request,
    on_startswith, on_type,
};
pub use permission::{Permission, User};
pub use processor::{ProcessorKind, Processors};
pub use registry::MatcherRegistry;
pub use rule::Rule;
pub use rules::CommandSyntax;
pub use settings::Settings;
pub use state::{State, StateRef, StateValue};
