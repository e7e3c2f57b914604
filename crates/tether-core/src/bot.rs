//! Bot capability consumed by the Tether engine.
//!
//! A bot is the outbound half of an adapter: the engine hands it the event
//! being answered and the message to deliver. Session routing (which user,
//! which group) is the adapter's concern and is derived from the event.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ApiResult;
use crate::event::Event;
use crate::message::Message;

/// Per-call overrides passed through to the adapter untouched
/// (e.g. `{"at_sender": true}`).
pub type SendOptions = Map<String, Value>;

/// The outbound bot capability.
///
/// # API Design
///
/// - `send`: reply to the session an event came from
///
/// Concrete implementations should provide strongly-typed API methods on top
/// of their own transport.
#[async_trait]
pub trait Bot: Send + Sync + 'static {
    /// Returns the bot's unique identifier.
    fn id(&self) -> &str;

    /// Sends a message in response to an event.
    ///
    /// # Arguments
    ///
    /// * `event` - The event to respond to
    /// * `message` - The message content to send
    /// * `options` - Adapter-specific overrides
    ///
    /// # Returns
    ///
    /// The adapter's raw response, typically containing a message id.
    async fn send(
        &self,
        event: &dyn Event,
        message: Message,
        options: SendOptions,
    ) -> ApiResult<Value>;
}

/// A shared bot trait object.
pub type BoxedBot = Arc<dyn Bot>;
