//! The running matcher instance.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace, warn};

use tether_core::{BoxedBot, BoxedEvent, Message, Segment, SendOptions};

use super::{InitialState, MatcherTemplate, next_id};
use crate::context::{self, RunContext};
use crate::dependent::{Dependent, Injector, Scope};
use crate::error::{HandlerError, HandlerResult, Interrupt};
use crate::handler::Outcome;
use crate::permission::{Permission, User};
use crate::registry::MatcherRegistry;
use crate::rule::Rule;
use crate::state::{
    LAST_RECEIVE_KEY, PAUSE_PROMPT_RESULT_KEY, REJECT_CACHE_TARGET, REJECT_TARGET, State,
    StateRef, receive_key, reject_prompt_result_key,
};

/// An optional message sent before finishing, pausing or rejecting.
///
/// `()` and `None` send nothing.
pub trait IntoPrompt {
    fn into_prompt(self) -> Option<Message>;
}

impl IntoPrompt for () {
    fn into_prompt(self) -> Option<Message> {
        None
    }
}

impl IntoPrompt for Message {
    fn into_prompt(self) -> Option<Message> {
        Some(self)
    }
}

impl IntoPrompt for Segment {
    fn into_prompt(self) -> Option<Message> {
        Some(self.into())
    }
}

impl IntoPrompt for &str {
    fn into_prompt(self) -> Option<Message> {
        Some(self.into())
    }
}

impl IntoPrompt for String {
    fn into_prompt(self) -> Option<Message> {
        Some(self.into())
    }
}

impl<T: Into<Message>> IntoPrompt for Option<T> {
    fn into_prompt(self) -> Option<Message> {
        self.map(Into::into)
    }
}

struct Instance {
    template: Arc<MatcherTemplate>,
    state: StateRef,
    block: AtomicBool,
    remaining: Mutex<VecDeque<Arc<Dependent<Outcome>>>>,
    registry: MatcherRegistry,
    session_expire_timeout: Duration,
}

/// A matcher instance, handed to handlers that ask for it.
///
/// Clones refer to the same instance.
#[derive(Clone)]
pub struct Matcher {
    inner: Arc<Instance>,
}

impl Matcher {
    pub(super) fn new(
        template: Arc<MatcherTemplate>,
        state: StateRef,
        registry: MatcherRegistry,
        session_expire_timeout: Duration,
    ) -> Self {
        let block = template.block();
        let remaining = template.handlers().iter().cloned().collect();
        Self {
            inner: Arc::new(Instance {
                template,
                state,
                block: AtomicBool::new(block),
                remaining: Mutex::new(remaining),
                registry,
                session_expire_timeout,
            }),
        }
    }

    pub fn template(&self) -> &Arc<MatcherTemplate> {
        &self.inner.template
    }

    pub fn state(&self) -> &StateRef {
        &self.inner.state
    }

    /// Whether this run blocks lower priorities.
    pub fn block(&self) -> bool {
        self.inner.block.load(Ordering::SeqCst)
    }

    /// Makes this run block lower priorities. The chain continues.
    pub fn stop_propagation(&self) {
        self.inner.block.store(true, Ordering::SeqCst);
    }

    /// Number of handlers not yet run.
    pub fn remaining(&self) -> usize {
        self.inner.remaining.lock().len()
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Runs the handler chain for one event.
    ///
    /// `state` is merged into the instance state first: every key it carries
    /// overwrites the instance entry, and keys it does not carry are left
    /// alone. For a continuation the instance state is the session state, so
    /// only keys written for this event by preprocessors or rule checkers
    /// replace session entries. Handlers run in order until the chain is
    /// exhausted or a handler ends it. On pause or
    /// reject a continuation is registered before returning. Scoped
    /// dependencies are torn down on every path.
    pub async fn run(
        &self,
        bot: BoxedBot,
        event: BoxedEvent,
        state: State,
    ) -> Result<(), HandlerError> {
        let ctx = RunContext {
            bot: bot.clone(),
            event: event.clone(),
            matcher: self.clone(),
        };
        context::scope(ctx, self.run_chain(bot, event, state)).await
    }

    async fn run_chain(
        &self,
        bot: BoxedBot,
        event: BoxedEvent,
        state: State,
    ) -> Result<(), HandlerError> {
        trace!(matcher = %self.template(), "Running matcher");
        self.state().extend(state);

        let scope = Arc::new(Scope::new());
        let injector = Injector::new(bot, event, Arc::clone(&scope))
            .with_state(self.state().clone())
            .with_matcher(self.clone());

        let result = match self.drive(&injector).await {
            Ok(Outcome::Pause | Outcome::Reject) => self.continue_session(&injector).await,
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };
        scope.close().await;
        debug!(matcher = %self.template(), "Running complete");
        result
    }

    fn next_handler(&self) -> Option<Arc<Dependent<Outcome>>> {
        self.inner.remaining.lock().pop_front()
    }

    async fn drive(&self, injector: &Injector) -> Result<Outcome, HandlerError> {
        while let Some(handler) = self.next_handler() {
            trace!(matcher = %self.template(), handler = handler.name(), "Running handler");
            let outcome = match handler.solve(injector).await {
                Ok(outcome) => outcome,
                Err(interrupt) => interrupt.into_outcome()?,
            };
            match outcome {
                Outcome::Continue => {}
                Outcome::Skip => {
                    debug!(matcher = %self.template(), handler = handler.name(), "Handler skipped");
                }
                Outcome::StopPropagation => {
                    self.stop_propagation();
                    return Ok(outcome);
                }
                Outcome::Reject => {
                    self.resolve_reject(handler);
                    return Ok(outcome);
                }
                Outcome::Pause | Outcome::Finish => return Ok(outcome),
            }
        }
        Ok(Outcome::Continue)
    }

    fn resolve_reject(&self, handler: Arc<Dependent<Outcome>>) {
        self.inner.remaining.lock().push_front(handler);
        self.state().with(|state| {
            if let Some(target) = state.get(REJECT_CACHE_TARGET).cloned() {
                state.insert(REJECT_TARGET.to_owned(), target);
            }
        });
    }

    async fn continue_session(&self, injector: &Injector) -> Result<(), HandlerError> {
        let template = self.template();

        let event_type = match &template.type_updater {
            Some(updater) => updater
                .solve(injector)
                .await
                .map_err(|i| i.into_error("type updater"))?,
            None => String::new(),
        };

        let permission = match &template.permission_updater {
            Some(updater) => updater
                .solve(injector)
                .await
                .map_err(|i| i.into_error("permission updater"))?,
            None => {
                let user = User::from_event(&**injector.event(), Some(template.permission.clone()))
                    .ok_or_else(|| {
                        HandlerError::msg("cannot continue a session for an event without a session id")
                    })?;
                Permission::from(user)
            }
        };

        let handlers: Vec<_> = self.inner.remaining.lock().iter().cloned().collect();
        let continuation = MatcherTemplate {
            id: next_id(),
            name: template.name.clone(),
            event_type,
            rule: Rule::empty(),
            permission,
            handlers,
            priority: 0,
            block: AtomicBool::new(true),
            temporary: true,
            expire_time: Some(SystemTime::now() + self.inner.session_expire_timeout),
            initial_state: InitialState::Session(self.state().clone()),
            type_updater: template.type_updater.clone(),
            permission_updater: template.permission_updater.clone(),
        };
        debug!(
            matcher = %template,
            continuation = %continuation,
            remaining = continuation.handlers.len(),
            "Waiting for the next event of the session"
        );
        self.inner.registry.insert(Arc::new(continuation));
        Ok(())
    }

    // ========================================================================
    // Handler helpers
    // ========================================================================

    fn current() -> Result<RunContext, Interrupt> {
        context::current().ok_or_else(|| Interrupt::msg("matcher helpers only work inside a matcher run"))
    }

    /// Sends `message` in reply to the current event.
    pub async fn send(&self, message: impl Into<Message>) -> HandlerResult<Value> {
        self.send_with(message, SendOptions::new()).await
    }

    /// Sends `message` with adapter-specific options.
    pub async fn send_with(
        &self,
        message: impl Into<Message>,
        options: SendOptions,
    ) -> HandlerResult<Value> {
        let ctx = Self::current()?;
        Ok(ctx.bot.send(&*ctx.event, message.into(), options).await?)
    }

    async fn send_prompt(&self, prompt: impl IntoPrompt) -> HandlerResult<Option<Value>> {
        match prompt.into_prompt() {
            Some(message) => Ok(Some(self.send(message).await?)),
            None => Ok(None),
        }
    }

    /// Sends an optional prompt and ends the run.
    pub async fn finish(&self, prompt: impl IntoPrompt) -> HandlerResult {
        self.send_prompt(prompt).await?;
        Err(Interrupt::Finish)
    }

    /// Sends an optional prompt and waits for the next event of the session.
    ///
    /// The send result is stored under [`PAUSE_PROMPT_RESULT_KEY`].
    pub async fn pause(&self, prompt: impl IntoPrompt) -> HandlerResult {
        if let Some(result) = self.send_prompt(prompt).await? {
            self.state().insert(PAUSE_PROMPT_RESULT_KEY, result);
        }
        Err(Interrupt::Pause)
    }

    /// Sends an optional prompt and re-runs the current handler on the next
    /// event of the session.
    ///
    /// If a target is set, the send result is stored under its prompt
    /// result key.
    pub async fn reject(&self, prompt: impl IntoPrompt) -> HandlerResult {
        let target = self.get_target();
        self.reject_into(target, prompt).await
    }

    /// Like [`reject`](Self::reject), with the next event stored as argument
    /// `key`.
    pub async fn reject_arg(&self, key: &str, prompt: impl IntoPrompt) -> HandlerResult {
        self.set_target(key, true);
        self.reject_into(Some(key.to_owned()), prompt).await
    }

    /// Like [`reject`](Self::reject), with the next event stored as the
    /// event received under `id`.
    pub async fn reject_receive(&self, id: &str, prompt: impl IntoPrompt) -> HandlerResult {
        let target = receive_key(id);
        self.set_target(&target, true);
        self.reject_into(Some(target), prompt).await
    }

    async fn reject_into(&self, target: Option<String>, prompt: impl IntoPrompt) -> HandlerResult {
        let result = self.send_prompt(prompt).await?;
        if let (Some(target), Some(result)) = (target, result) {
            self.state().insert(reject_prompt_result_key(&target), result);
        }
        Err(Interrupt::Reject)
    }

    /// Skips the current handler.
    pub fn skip(&self) -> HandlerResult {
        Err(Interrupt::Skip)
    }

    pub fn get_arg(&self, key: &str) -> Option<Message> {
        self.state().get(key).and_then(|v| v.as_message().cloned())
    }

    pub fn set_arg(&self, key: &str, message: Message) {
        self.state().insert(key, message);
    }

    pub fn get_receive(&self, id: &str) -> Option<BoxedEvent> {
        self.state()
            .get(&receive_key(id))
            .and_then(|v| v.as_event().cloned())
    }

    /// Stores `event` under `id` and as the last received event.
    pub fn set_receive(&self, id: &str, event: BoxedEvent) {
        self.state().with(|state| {
            state.insert(receive_key(id), event.clone().into());
            state.insert(LAST_RECEIVE_KEY.to_owned(), event.into());
        });
    }

    pub fn get_last_receive(&self) -> Option<BoxedEvent> {
        self.state()
            .get(LAST_RECEIVE_KEY)
            .and_then(|v| v.as_event().cloned())
    }

    /// Sets the target the next event is stored under.
    ///
    /// With `cache`, the target takes effect only if the current handler
    /// rejects; otherwise immediately.
    pub fn set_target(&self, target: &str, cache: bool) {
        let key = if cache { REJECT_CACHE_TARGET } else { REJECT_TARGET };
        self.state().insert(key, target);
    }

    pub fn get_target(&self) -> Option<String> {
        let target = self.state().get(REJECT_TARGET)?;
        match target.as_str() {
            Some(target) => Some(target.to_owned()),
            None => {
                warn!(matcher = %self.template(), "Reject target is not a string");
                None
            }
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("template", &self.template().to_string())
            .field("block", &self.block())
            .field("remaining", &self.remaining())
            .field("state", self.state())
            .finish()
    }
}
