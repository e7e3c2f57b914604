//! Arguments collected by `got` and events collected by `receive`.

use std::marker::PhantomData;
use std::ops::Deref;

use serde_json::Value;

use tether_core::{BoxedEvent, Message};

use crate::dependent::{ArgForm, Param, Resolved};
use crate::extractor::FromParam;
use crate::state::{LAST_RECEIVE_KEY, StateValue, receive_key};

/// Names a `got` argument or a `receive` id at the type level.
///
/// Declare keys with [`arg_key!`](crate::arg_key):
///
/// ```rust,ignore
/// arg_key!(City = "city");
///
/// async fn forecast(city: ArgPlainText<City>, matcher: Matcher) -> HandlerResult {
///     matcher.finish(format!("sunny in {}", *city)).await
/// }
/// ```
pub trait ArgKey: Send + 'static {
    const KEY: &'static str;
}

/// Declares a unit type implementing [`ArgKey`].
#[macro_export]
macro_rules! arg_key {
    ($vis:vis $name:ident = $key:literal) => {
        #[derive(Debug, Clone, Copy)]
        $vis struct $name;

        impl $crate::extractor::ArgKey for $name {
            const KEY: &'static str = $key;
        }
    };
}

fn stored_message(resolved: Resolved) -> Option<Message> {
    match resolved {
        Resolved::Arg(Some(StateValue::Message(message))) => Some(message),
        _ => None,
    }
}

macro_rules! arg_param {
    ($(#[$doc:meta])* $name:ident, $inner:ty, $form:expr, $convert:expr) => {
        $(#[$doc])*
        pub struct $name<K> {
            value: $inner,
            _key: PhantomData<fn() -> K>,
        }

        impl<K> $name<K> {
            pub fn into_inner(self) -> $inner {
                self.value
            }
        }

        impl<K> Deref for $name<K> {
            type Target = $inner;

            fn deref(&self) -> &Self::Target {
                &self.value
            }
        }

        impl<K: ArgKey> FromParam for $name<K> {
            fn param() -> Param {
                Param::Arg {
                    key: K::KEY,
                    form: $form,
                }
            }

            fn from_resolved(resolved: Resolved) -> Option<Self> {
                let convert: fn(Resolved) -> Option<$inner> = $convert;
                convert(resolved).map(|value| Self {
                    value,
                    _key: PhantomData,
                })
            }
        }
    };
}

arg_param!(
    /// The message collected for key `K`. Skips the callable if absent.
    Arg,
    Message,
    ArgForm::Message,
    stored_message
);

arg_param!(
    /// The message collected for key `K`, rendered as a string.
    ArgStr,
    String,
    ArgForm::Str,
    |resolved| stored_message(resolved).map(|message| message.to_string())
);

arg_param!(
    /// The plain text of the message collected for key `K`.
    ArgPlainText,
    String,
    ArgForm::PlainText,
    |resolved| stored_message(resolved).map(|message| message.extract_plain_text())
);

arg_param!(
    /// The send result of the reject prompt for key `K`, if one was sent.
    ArgPromptResult,
    Option<Value>,
    ArgForm::PromptResult,
    |resolved| match resolved {
        Resolved::Arg(value) => Some(value.and_then(|v| v.as_json().cloned())),
        _ => None,
    }
);

// ============================================================================
// Received events
// ============================================================================

fn stored_event(resolved: Resolved, key: &str) -> Option<BoxedEvent> {
    match resolved {
        Resolved::State(state) => state.get(key).and_then(|v| v.as_event().cloned()),
        _ => None,
    }
}

/// The event collected by `receive` under id `K`.
pub struct Received<K> {
    event: BoxedEvent,
    _key: PhantomData<fn() -> K>,
}

impl<K> Received<K> {
    pub fn into_inner(self) -> BoxedEvent {
        self.event
    }
}

impl<K> Deref for Received<K> {
    type Target = BoxedEvent;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl<K: ArgKey> FromParam for Received<K> {
    fn param() -> Param {
        Param::State
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        stored_event(resolved, &receive_key(K::KEY)).map(|event| Self {
            event,
            _key: PhantomData,
        })
    }
}

/// The event collected by the most recent `receive`.
pub struct LastReceived(pub BoxedEvent);

impl FromParam for LastReceived {
    fn param() -> Param {
        Param::State
    }

    fn from_resolved(resolved: Resolved) -> Option<Self> {
        stored_event(resolved, LAST_RECEIVE_KEY).map(Self)
    }
}

impl Deref for LastReceived {
    type Target = BoxedEvent;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
