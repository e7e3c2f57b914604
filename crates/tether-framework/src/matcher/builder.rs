//! Matcher construction.
//!
//! Builders collect declaration errors instead of failing on the spot, so a
//! whole matcher reads as one chain. [`MatcherBuilder::build`] and
//! [`MatcherBuilder::register`] report the first error.
//!
//! ```rust,ignore
//! on_message()
//!     .name("echo")
//!     .rule(to_me())
//!     .priority(5)
//!     .block(true)
//!     .handle(echo)
//!     .register(&registry)?;
//! ```

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, SystemTime};

use tether_core::{BoxedEvent, Event, EventType, Message};

use super::{InitialState, Matcher, MatcherTemplate, next_id};
use super::instance::IntoPrompt;
use crate::dependent::{CacheKey, Dependent, Depends, HANDLER_PARAMS, Injectable};
use crate::error::DependencyError;
use crate::handler::Outcome;
use crate::permission::Permission;
use crate::registry::MatcherRegistry;
use crate::rule::Rule;
use crate::rules::{self, CommandSyntax};
use crate::state::{State, StateValue};

/// Builds a [`MatcherTemplate`].
pub struct MatcherBuilder {
    name: Option<String>,
    event_type: String,
    rule: Rule,
    permission: Permission,
    handlers: Vec<Arc<Dependent<Outcome>>>,
    priority: i32,
    block: bool,
    temporary: bool,
    expire_time: Option<SystemTime>,
    state: State,
    type_updater: Option<Arc<Dependent<String>>>,
    permission_updater: Option<Arc<Dependent<Permission>>>,
    error: Option<DependencyError>,
}

impl MatcherBuilder {
    /// A builder for events of `event_type`. Empty accepts every type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            name: None,
            event_type: event_type.into(),
            rule: Rule::empty(),
            permission: Permission::empty(),
            handlers: Vec::new(),
            priority: 1,
            block: false,
            temporary: false,
            expire_time: None,
            state: State::new(),
            type_updater: None,
            permission_updater: None,
            error: None,
        }
    }

    fn record(&mut self, err: DependencyError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds `rule` to the rule.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rule &= rule;
        self
    }

    /// Adds a rule checker.
    pub fn check<F, T>(mut self, f: F) -> Self
    where
        F: Injectable<T, bool>,
    {
        match Rule::new(f) {
            Ok(rule) => self.rule &= rule,
            Err(err) => self.record(err),
        }
        self
    }

    /// Adds `permission` as an alternative.
    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission |= permission;
        self
    }

    /// Lower runs first. Defaults to 1.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Whether a match stops lower priorities from seeing the event.
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Whether the matcher is removed after its first match.
    pub fn temp(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Unregisters the matcher once an event newer than `at` arrives.
    pub fn expire_at(mut self, at: SystemTime) -> Self {
        self.expire_time = Some(at);
        self
    }

    pub fn expire_in(self, ttl: Duration) -> Self {
        self.expire_at(SystemTime::now() + ttl)
    }

    /// Seeds every run's state with `value` under `key`.
    pub fn state(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.state.insert(key.into(), value.into());
        self
    }

    /// Appends a handler.
    pub fn handle<F, T>(self, f: F) -> Self
    where
        F: Injectable<T, Outcome>,
    {
        self.handle_with(f, [])
    }

    /// Appends a handler that resolves `parameterless` first.
    pub fn handle_with<F, T>(mut self, f: F, parameterless: impl IntoIterator<Item = Depends>) -> Self
    where
        F: Injectable<T, Outcome>,
    {
        let handler = Dependent::new(f).with_parameterless(parameterless.into_iter().map(Arc::new));
        match handler.validate(HANDLER_PARAMS) {
            Ok(()) => self.handlers.push(Arc::new(handler)),
            Err(err) => self.record(err),
        }
        self
    }

    /// Attaches `getter` to `f`.
    ///
    /// If `f` is the same function as the last handler, the getter runs
    /// after that handler's earlier getters, so arguments are collected in
    /// declaration order. Otherwise `f` is appended.
    fn with_getter<F, T>(self, getter: Depends, f: F) -> Self
    where
        F: Injectable<T, Outcome>,
    {
        let mut this = self;
        let key = CacheKey::of::<F>();
        if let Some(last) = this.handlers.last_mut() {
            if matches!(key, CacheKey::Type(_)) && *last.key() == key {
                *last = Arc::new(last.append_parameterless(Arc::new(getter)));
                return this;
            }
        }
        this.handle_with(f, [getter])
    }

    /// Collects argument `key` before running `f`.
    ///
    /// If the state has no `key` yet, sends `prompt` and waits for the next
    /// event of the session; that event's message becomes the argument.
    pub fn got<F, T>(self, key: impl Into<String>, prompt: impl IntoPrompt, f: F) -> Self
    where
        F: Injectable<T, Outcome>,
    {
        self.with_getter(key_getter(key.into(), prompt.into_prompt()), f)
    }

    /// Collects the next event of the session under `id` before running `f`.
    pub fn receive<F, T>(self, id: impl Into<String>, f: F) -> Self
    where
        F: Injectable<T, Outcome>,
    {
        self.with_getter(receive_getter(id.into()), f)
    }

    /// Decides the event type a paused session resumes on.
    ///
    /// Defaults to the empty type, which accepts any event of the session.
    pub fn type_updater<F, T>(mut self, f: F) -> Self
    where
        F: Injectable<T, String>,
    {
        match Dependent::parse(f, HANDLER_PARAMS) {
            Ok(updater) => self.type_updater = Some(Arc::new(updater)),
            Err(err) => self.record(err),
        }
        self
    }

    /// Decides who may resume a paused session.
    ///
    /// Defaults to the session of the pausing event, under this matcher's
    /// permission.
    pub fn permission_updater<F, T>(mut self, f: F) -> Self
    where
        F: Injectable<T, Permission>,
    {
        match Dependent::parse(f, HANDLER_PARAMS) {
            Ok(updater) => self.permission_updater = Some(Arc::new(updater)),
            Err(err) => self.record(err),
        }
        self
    }

    /// Finishes the template, reporting the first declaration error.
    pub fn build(self) -> Result<Arc<MatcherTemplate>, DependencyError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(Arc::new(MatcherTemplate {
            id: next_id(),
            name: self.name,
            event_type: self.event_type,
            rule: self.rule,
            permission: self.permission,
            handlers: self.handlers,
            priority: self.priority,
            block: AtomicBool::new(self.block),
            temporary: self.temporary,
            expire_time: self.expire_time,
            initial_state: InitialState::Default(self.state),
            type_updater: self.type_updater,
            permission_updater: self.permission_updater,
        }))
    }

    /// Builds the template and inserts it into `registry`.
    ///
    /// Nothing is inserted if the declaration is invalid.
    pub fn register(self, registry: &MatcherRegistry) -> Result<Arc<MatcherTemplate>, DependencyError> {
        let template = self.build()?;
        registry.insert(Arc::clone(&template));
        Ok(template)
    }
}

fn key_getter(key: String, prompt: Option<Message>) -> Depends {
    Depends::new(move |event: BoxedEvent, matcher: Matcher| {
        let key = key.clone();
        let prompt = prompt.clone();
        async move {
            matcher.set_target(&key, true);
            if matcher.get_target().as_deref() == Some(key.as_str()) {
                matcher.set_arg(&key, event.get_message().unwrap_or_default());
                return Ok(());
            }
            if matcher.state().contains_key(&key) {
                return Ok(());
            }
            matcher.reject_arg(&key, prompt).await
        }
    })
}

fn receive_getter(id: String) -> Depends {
    Depends::new(move |event: BoxedEvent, matcher: Matcher| {
        let id = id.clone();
        async move {
            let target = crate::state::receive_key(&id);
            matcher.set_target(&target, true);
            if matcher.get_target().as_deref() == Some(target.as_str()) {
                matcher.set_receive(&id, event);
                return Ok(());
            }
            if matcher.get_receive(&id).is_some() {
                return Ok(());
            }
            matcher.reject_receive(&id, ()).await
        }
    })
}

// ============================================================================
// Shortcuts
// ============================================================================

/// A matcher for events of `event_type`. Empty accepts every type.
pub fn on(event_type: impl Into<String>) -> MatcherBuilder {
    MatcherBuilder::new(event_type)
}

/// A matcher for events of concrete type `E`, whatever their type string.
pub fn on_type<E: Event>() -> MatcherBuilder {
    on("").rule(rules::is_type::<E>())
}

pub fn on_message() -> MatcherBuilder {
    on(EventType::Message.as_str())
}

pub fn on_notice() -> MatcherBuilder {
    on(EventType::Notice.as_str())
}

pub fn on_request() -> MatcherBuilder {
    on(EventType::Request.as_str())
}

pub fn on_metaevent() -> MatcherBuilder {
    on(EventType::MetaEvent.as_str())
}

/// A message matcher with a [`startswith`](rules::startswith) rule.
pub fn on_startswith<I, S>(prefixes: I, ignorecase: bool) -> MatcherBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    on_message().rule(rules::startswith(prefixes, ignorecase))
}

/// A message matcher with an [`endswith`](rules::endswith) rule.
pub fn on_endswith<I, S>(suffixes: I, ignorecase: bool) -> MatcherBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    on_message().rule(rules::endswith(suffixes, ignorecase))
}

/// A message matcher with a [`fullmatch`](rules::fullmatch) rule.
pub fn on_fullmatch<I, S>(texts: I, ignorecase: bool) -> MatcherBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    on_message().rule(rules::fullmatch(texts, ignorecase))
}

/// A message matcher with a [`keyword`](rules::keyword) rule.
pub fn on_keyword<I, S>(keywords: I) -> MatcherBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    on_message().rule(rules::keyword(keywords))
}

/// A message matcher for one command, given as its parts.
pub fn on_command<I, S>(syntax: CommandSyntax, command: I) -> MatcherBuilder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let command: Vec<String> = command.into_iter().map(Into::into).collect();
    on_message().rule(rules::command(syntax, [command]))
}

/// A message matcher with a [`regex`](rules::regex) rule.
pub fn on_regex(pattern: &str) -> Result<MatcherBuilder, regex::Error> {
    Ok(on_message().rule(rules::regex(pattern)?))
}
