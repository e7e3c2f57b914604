//! # Tether
//!
//! A prioritized event-matcher engine for bots.
//!
//! Adapters turn platform payloads into [`Event`](tether_core::Event)s. The
//! engine finds the matchers that apply to each event, runs their handler
//! chains with injected parameters, and keeps multi-turn conversations alive
//! across events of the same session.
//!
//! ```text
//! ┌─────────┐     ┌────────────┐     ┌──────────────────────────────────┐
//! │ Adapter │────▶│ Dispatcher │────▶│ priority 0: continuations        │
//! └─────────┘     │            │────▶│ priority 1: commands, keywords.. │──▶ handlers
//!                 └────────────┘────▶│ priority N: ...                  │
//!                                    └──────────────────────────────────┘
//! ```
//!
//! - **Runtime**: configuration, logging and the process-wide dispatcher
//! - **Matchers**: type filter, permission and rule in front of a handler chain
//! - **Handlers**: async functions whose parameters are injected by type
//! - **Sessions**: `pause`, `reject` and `got` wait for the next event of the
//!   same conversation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tether::prelude::*;
//!
//! arg_key!(City = "city");
//!
//! async fn weather(city: ArgPlainText<City>, matcher: Matcher) -> HandlerResult {
//!     matcher.finish(format!("{} is sunny", *city)).await
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = TetherRuntime::new()?;
//!     runtime.register(
//!         runtime
//!             .on_command(["weather"])
//!             .got("city", "Which city?", weather),
//!     )?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: `tether.toml` configuration files (default)
//! - `yaml-config`: `tether.yaml` configuration files
//! - `json-log`: JSON log lines

pub use tether_core as core;
pub use tether_framework as framework;
pub use tether_runtime as runtime;

pub use tether_framework::arg_key;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use tether::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use tether_runtime::{TetherConfig, TetherRuntime};

    // Declaring matchers
    pub use tether_framework::{
        CommandSyntax, MatcherBuilder, Permission, Rule, on, on_command, on_endswith,
        on_fullmatch, on_keyword, on_message, on_metaevent, on_notice, on_regex, on_request,
        on_startswith, on_type,
    };
    pub use tether_framework::{permission, rules};

    // Handlers
    pub use tether_framework::arg_key;
    pub use tether_framework::extractor::{
        Arg, ArgPlainText, ArgPromptResult, ArgStr, Caught, CommandMatch, Dep, EventMessage,
        EventName, EventPlainText, EventToMe, EventTypeName, Fallback, Fresh, LastReceived,
        Provide, Received, SessionId, Typed, UserId,
    };
    pub use tether_framework::{
        Depends, HandlerError, HandlerResult, Interrupt, Matcher, Outcome, Scoped, StateRef,
        current_bot, current_event, current_matcher,
    };

    // Core types
    pub use tether_core::{Bot, BoxedBot, BoxedEvent, Event, EventType, Message, Segment};
}
