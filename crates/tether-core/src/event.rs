//! Event capability consumed by the Tether engine.
//!
//! Adapters turn platform payloads into values implementing [`Event`]. The
//! engine never constructs events; it only queries them:
//!
//! - [`Event::get_type`] feeds the matcher type filter
//! - [`Event::get_session_id`] identifies the conversation a paused
//!   interaction resumes in
//! - [`Event::get_message`] / [`Event::get_plaintext`] feed rules and `got`
//! - [`Event::time`] is compared against matcher expiry

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

use crate::message::Message;

// ============================================================================
// Event Type Classification
// ============================================================================

/// The well-known event type strings.
///
/// Adapters may report any string from [`Event::get_type`]; these are the
/// ones the built-in permissions and builders know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Message events (private messages, group messages, etc.)
    Message,
    /// Notice events (group changes, recalls, friend adds, etc.)
    Notice,
    /// Request events (friend requests, group join requests, etc.)
    Request,
    /// Meta events (lifecycle, heartbeat, etc.)
    MetaEvent,
}

impl EventType {
    /// Returns the canonical type string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::MetaEvent => "meta_event",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "message" => Ok(Self::Message),
            "notice" => Ok(Self::Notice),
            "request" => Ok(Self::Request),
            "meta" | "meta_event" => Ok(Self::MetaEvent),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Core Event Trait
// ============================================================================

/// The uniform event capability.
///
/// Only [`get_type`](Event::get_type), [`get_event_name`](Event::get_event_name)
/// and [`as_any`](Event::as_any) are mandatory. Events that carry no user,
/// session or message return `None` from the corresponding accessor, which
/// built-in rules and permissions treat as "does not match".
pub trait Event: Any + Send + Sync {
    /// Returns the event type string (`"message"`, `"notice"`, ...).
    fn get_type(&self) -> &str;

    /// Returns a human-readable event name, used in logs.
    fn get_event_name(&self) -> &str;

    /// Returns the logical conversation identity, stable across the messages
    /// of one interactive session.
    fn get_session_id(&self) -> Option<String> {
        None
    }

    /// Returns the id of the user who caused the event.
    fn get_user_id(&self) -> Option<String> {
        None
    }

    /// Returns the message carried by the event.
    fn get_message(&self) -> Option<Message> {
        None
    }

    /// Returns the plain text of the carried message.
    fn get_plaintext(&self) -> Option<String> {
        self.get_message().map(|m| m.extract_plain_text())
    }

    /// Returns whether the event is addressed to the bot.
    fn is_tome(&self) -> bool {
        false
    }

    /// Returns the time the event happened.
    fn time(&self) -> SystemTime {
        SystemTime::now()
    }

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// Boxed Event
// ============================================================================

/// A shared, type-erased event.
///
/// `BoxedEvent` implements `Deref<Target = dyn Event>`, so trait methods can
/// be called directly:
///
/// ```rust,ignore
/// let event: BoxedEvent = /* ... */;
/// let kind = event.get_type();
/// let text = event.get_plaintext();
/// ```
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Event>,
}

impl BoxedEvent {
    /// Creates a new `BoxedEvent` from any type implementing `Event`.
    pub fn new<E: Event>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    /// Returns the inner `Arc<dyn Event>`.
    pub fn inner(&self) -> &Arc<dyn Event> {
        &self.inner
    }

    /// Attempts to downcast to a concrete event type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref()
    }

    /// Returns true if the event is of concrete type `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.inner.as_any().is::<E>()
    }

    /// Returns true if both handles point to the same event.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl<E: Event> From<E> for BoxedEvent {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}

impl fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("type", &self.get_type())
            .field("event_name", &self.get_event_name())
            .field("session_id", &self.get_session_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Heartbeat;

    impl Event for Heartbeat {
        fn get_type(&self) -> &str {
            EventType::MetaEvent.as_str()
        }

        fn get_event_name(&self) -> &str {
            "meta_event.heartbeat"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn defaults_describe_a_sessionless_event() {
        let event = BoxedEvent::new(Heartbeat);
        assert!(event.is::<Heartbeat>());
        assert_eq!(event.get_session_id(), None);
        assert_eq!(event.get_plaintext(), None);
        assert!(!event.is_tome());
    }

    #[test]
    fn event_type_parses_aliases() {
        assert_eq!("meta".parse::<EventType>(), Ok(EventType::MetaEvent));
        assert_eq!("Message".parse::<EventType>(), Ok(EventType::Message));
        assert!("poke".parse::<EventType>().is_err());
    }
}
