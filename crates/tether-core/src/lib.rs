//! # Tether Core
//!
//! The boundary types of the Tether matcher engine.
//!
//! The engine itself lives in `tether-framework`; this crate only defines
//! what it consumes from adapters:
//!
//! - **Events**: the uniform query capability ([`Event`], [`BoxedEvent`])
//! - **Bots**: the outbound send capability ([`Bot`], [`BoxedBot`])
//! - **Messages**: a platform-agnostic message value ([`Message`], [`Segment`])
//!
//! ```text
//! ┌─────────────┐  BoxedEvent  ┌────────────┐  Message   ┌───────────┐
//! │   Adapter   │─────────────▶│   Engine   │───────────▶│    Bot    │
//! └─────────────┘              └────────────┘            └───────────┘
//! ```

pub mod bot;
pub mod error;
pub mod event;
pub mod message;

pub use bot::{Bot, BoxedBot, SendOptions};
pub use error::{ApiError, ApiResult};
pub use event::{BoxedEvent, Event, EventType};
pub use message::{Message, Segment};
