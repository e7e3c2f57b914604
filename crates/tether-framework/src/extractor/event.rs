//! Parameters derived from the event, plus command match details.

use std::marker::PhantomData;
use std::ops::Deref;

use serde::Deserialize;

use tether_core::{BoxedEvent, Event as EventTrait, Message};

use crate::dependent::{Param, Resolved};
use crate::extractor::FromParam;
use crate::state::PREFIX_KEY;

fn event_of(resolved: Resolved) -> Option<BoxedEvent> {
    match resolved {
        Resolved::Event(event) => Some(event),
        _ => None,
    }
}

/// The event, checked to be of concrete type `E`.
///
/// Dereferences to `E`; skips the callable for any other event type.
///
/// ```rust,ignore
/// async fn on_poke(poke: Typed<PokeNotice>) {
///     println!("poked by {}", poke.user_id);
/// }
/// ```
pub struct Typed<E> {
    event: BoxedEvent,
    _type: PhantomData<fn() -> E>,
}

impl<E: EventTrait> Typed<E> {
    pub fn boxed(&self) -> &BoxedEvent {
        &self.event
    }
}

impl<E: EventTrait> Deref for Typed<E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        match self.event.downcast_ref::<E>() {
            Some(event) => event,
            None => unreachable!("type checked on extraction"),
        }
    }
}

impl<E: EventTrait> FromParam for Typed<E> {
    fn param() -> Param {
        Param::Event
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        event_of(resolved)
            .filter(|event| event.is::<E>())
            .map(|event| Self {
                event,
                _type: PhantomData,
            })
    }
}

macro_rules! event_param {
    ($(#[$doc:meta])* $name:ident($inner:ty), |$event:ident| $extract:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name(pub $inner);

        impl Deref for $name {
            type Target = $inner;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl FromParam for $name {
            fn param() -> Param {
                Param::Event
            }

            fn from_resolved(resolved: Resolved) -> Option<Self> {
                let $event = event_of(resolved)?;
                let value: Option<$inner> = $extract;
                value.map(Self)
            }
        }
    };
}

event_param!(
    /// The event type string.
    EventTypeName(String),
    |event| Some(event.get_type().to_owned())
);
event_param!(
    /// The event name.
    EventName(String),
    |event| Some(event.get_event_name().to_owned())
);
event_param!(
    /// The event message. Skips events without one.
    EventMessage(Message),
    |event| event.get_message()
);
event_param!(
    /// The plain text of the event message. Skips events without one.
    EventPlainText(String),
    |event| event.get_plaintext()
);
event_param!(
    /// Whether the event is addressed to the bot.
    EventToMe(bool),
    |event| Some(event.is_tome())
);
event_param!(
    /// The session id. Skips events without one.
    SessionId(String),
    |event| event.get_session_id()
);
event_param!(
    /// The user id. Skips events without one.
    UserId(String),
    |event| event.get_user_id()
);

// ============================================================================
// Command match
// ============================================================================

/// What the command rule matched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandMatch {
    /// The command parts, e.g. `["weather", "today"]`.
    pub command: Vec<String>,
    /// The matched text including the start token, e.g. `"/weather.today"`.
    pub raw_command: String,
    /// The start token that matched.
    pub command_start: String,
    /// Everything after the command, leading whitespace removed.
    pub command_arg: Message,
}

impl FromParam for CommandMatch {
    fn param() -> Param {
        Param::State
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        let Resolved::State(state) = resolved else {
            return None;
        };
        let value = state.get(PREFIX_KEY)?.as_json()?.clone();
        serde_json::from_value(value).ok()
    }
}
