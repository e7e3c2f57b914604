//! Fixtures shared by the unit tests.

use std::any::Any;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use tether_core::{ApiResult, Bot, BoxedBot, BoxedEvent, Event, EventType, Message, SendOptions};

use crate::dependent::{Injector, Scope};
use crate::state::StateRef;

#[derive(Debug, Clone)]
pub(crate) struct TestEvent {
    kind: &'static str,
    message: Option<Message>,
    session: Option<String>,
    user: Option<String>,
    to_me: bool,
    time: SystemTime,
}

impl TestEvent {
    fn of(kind: EventType) -> Self {
        Self {
            kind: kind.as_str(),
            message: None,
            session: None,
            user: None,
            to_me: false,
            time: SystemTime::now(),
        }
    }

    pub(crate) fn message(text: &str) -> Self {
        Self {
            message: Some(Message::from(text)),
            ..Self::of(EventType::Message)
        }
    }

    pub(crate) fn notice() -> Self {
        Self::of(EventType::Notice)
    }

    pub(crate) fn request() -> Self {
        Self::of(EventType::Request)
    }

    pub(crate) fn session(mut self, id: &str) -> Self {
        self.session = Some(id.to_owned());
        self
    }

    pub(crate) fn user(mut self, id: &str) -> Self {
        self.user = Some(id.to_owned());
        self
    }

    pub(crate) fn to_me(mut self) -> Self {
        self.to_me = true;
        self
    }

    pub(crate) fn at(mut self, time: SystemTime) -> Self {
        self.time = time;
        self
    }

    pub(crate) fn boxed(self) -> BoxedEvent {
        BoxedEvent::new(self)
    }
}

impl Event for TestEvent {
    fn get_type(&self) -> &str {
        self.kind
    }

    fn get_event_name(&self) -> &str {
        self.kind
    }

    fn get_session_id(&self) -> Option<String> {
        self.session.clone()
    }

    fn get_user_id(&self) -> Option<String> {
        self.user.clone()
    }

    fn get_message(&self) -> Option<Message> {
        self.message.clone()
    }

    fn is_tome(&self) -> bool {
        self.to_me
    }

    fn time(&self) -> SystemTime {
        self.time
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A bot that records every message it is asked to send.
#[derive(Default)]
pub(crate) struct RecordingBot {
    sent: Mutex<Vec<String>>,
}

impl RecordingBot {
    pub(crate) fn new() -> (Arc<Self>, BoxedBot) {
        let bot = Arc::new(Self::default());
        let boxed: BoxedBot = bot.clone();
        (bot, boxed)
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Bot for RecordingBot {
    fn id(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        _event: &dyn Event,
        message: Message,
        _options: SendOptions,
    ) -> ApiResult<Value> {
        let mut sent = self.sent.lock();
        sent.push(message.to_string());
        Ok(json!({ "message_id": sent.len() }))
    }
}

/// An injector over `event` with an empty state and a fresh scope.
pub(crate) fn injector(event: impl Event) -> Injector {
    let (_, bot) = RecordingBot::new();
    Injector::new(bot, BoxedEvent::new(event), Arc::new(Scope::new())).with_state(StateRef::default())
}
