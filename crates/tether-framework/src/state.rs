//! Per-run state shared between rules, dependencies and handlers.
//!
//! Built-in rules write their match details here, `got`/`receive` store the
//! collected arguments here, and a paused session keeps the same state across
//! events. Reserved keys start with an underscore.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use tether_core::{BoxedEvent, Message};

// ============================================================================
// Reserved keys
// ============================================================================

/// Key of the last event stored by `receive`.
pub const LAST_RECEIVE_KEY: &str = "_last_receive";
/// Target the next event will be stored under.
pub const REJECT_TARGET: &str = "_current_target";
/// Target staged by the current run, promoted to [`REJECT_TARGET`] on reject.
pub const REJECT_CACHE_TARGET: &str = "_next_target";
/// Send result of the prompt that accompanied a pause.
pub const PAUSE_PROMPT_RESULT_KEY: &str = "_pause_result";

/// Command match details written by the command rule.
pub const PREFIX_KEY: &str = "_prefix";
pub const CMD_KEY: &str = "command";
pub const RAW_CMD_KEY: &str = "raw_command";
pub const CMD_ARG_KEY: &str = "command_arg";
pub const CMD_START_KEY: &str = "command_start";

pub const STARTSWITH_KEY: &str = "_startswith";
pub const ENDSWITH_KEY: &str = "_endswith";
pub const FULLMATCH_KEY: &str = "_fullmatch";
pub const KEYWORD_KEY: &str = "_keyword";

pub const REGEX_MATCHED: &str = "_matched";
pub const REGEX_GROUP: &str = "_matched_groups";
pub const REGEX_DICT: &str = "_matched_dict";

/// State key of the event received under `id`.
pub fn receive_key(id: &str) -> String {
    format!("_receive_{id}")
}

/// State key of the send result of a reject prompt for `key`.
pub fn reject_prompt_result_key(key: &str) -> String {
    format!("_reject_{key}_result")
}

// ============================================================================
// StateValue
// ============================================================================

/// A value stored in [`State`].
#[derive(Debug, Clone)]
pub enum StateValue {
    /// An event, stored by `receive`.
    Event(BoxedEvent),
    /// A message, stored by `got`.
    Message(Message),
    /// Anything else.
    Json(Value),
}

impl StateValue {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&BoxedEvent> {
        match self {
            Self::Event(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the string if this is a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }
}

impl From<BoxedEvent> for StateValue {
    fn from(event: BoxedEvent) -> Self {
        Self::Event(event)
    }
}

impl From<Message> for StateValue {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<Value> for StateValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        Self::Json(Value::String(value.to_owned()))
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        Self::Json(Value::String(value))
    }
}

/// A string-keyed map of [`StateValue`]s.
pub type State = HashMap<String, StateValue>;

// ============================================================================
// StateRef
// ============================================================================

/// A shared handle to a [`State`].
///
/// Clones point to the same map. A paused session registers its continuation
/// with a clone, so later runs see what earlier runs wrote.
#[derive(Clone, Default)]
pub struct StateRef {
    inner: Arc<Mutex<State>>,
}

impl StateRef {
    pub fn new(state: State) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn get(&self, key: &str) -> Option<StateValue> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.inner.lock().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<StateValue> {
        self.inner.lock().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Merges `other` into this state, overwriting existing keys.
    pub fn extend(&self, other: State) {
        self.inner.lock().extend(other);
    }

    /// Returns a copy of the current contents.
    pub fn snapshot(&self) -> State {
        self.inner.lock().clone()
    }

    /// Runs `f` with exclusive access to the map.
    pub fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Returns true if both handles point to the same map.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<State> for StateRef {
    fn from(state: State) -> Self {
        Self::new(state)
    }
}

impl std::fmt::Debug for StateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.inner.lock().keys().cloned().collect();
        keys.sort();
        f.debug_struct("StateRef").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_same_map() {
        let state = StateRef::default();
        let session = state.clone();
        session.insert("city", Message::from("Paris"));
        assert!(state.ptr_eq(&session));
        assert_eq!(
            state.get("city").and_then(|v| v.as_message().cloned()),
            Some(Message::from("Paris"))
        );
    }

    #[test]
    fn snapshot_is_detached() {
        let state = StateRef::default();
        state.insert("a", "1");
        let copy = StateRef::new(state.snapshot());
        copy.insert("b", "2");
        assert!(!state.contains_key("b"));
        assert_eq!(copy.get("a").and_then(|v| v.as_str().map(str::to_owned)).as_deref(), Some("1"));
    }
}
