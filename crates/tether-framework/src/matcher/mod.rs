//! Matchers: templates registered in the registry and the instances that run
//! their handler chains.
//!
//! A [`MatcherTemplate`] is the static description: which events it wants
//! (type, permission, rule), what to run (handlers), where it sits
//! (priority) and whether it blocks. Every event that passes the checks gets
//! a fresh [`Matcher`] instance with its own state and its own copy of the
//! handler list.
//!
//! When a handler pauses or rejects, the instance registers a *continuation*:
//! a temporary, blocking template at priority 0 holding the remaining
//! handlers, restricted to the same session, sharing the same state, and
//! expiring after the session timeout.
//!
//! ```rust,ignore
//! arg_key!(City = "city");
//!
//! async fn forecast(city: ArgPlainText<City>, matcher: Matcher) -> HandlerResult {
//!     matcher.finish(format!("It is sunny in {}", *city)).await
//! }
//!
//! on_command(CommandSyntax::default(), ["weather"])
//!     .got("city", "Which city?", forecast)
//!     .register(&registry)?;
//! ```

mod builder;
mod instance;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tracing::trace;

use crate::dependent::{Dependent, Injector};
use crate::error::HandlerError;
use crate::handler::Outcome;
use crate::permission::Permission;
use crate::registry::MatcherRegistry;
use crate::rule::Rule;
use crate::state::{State, StateRef};

pub use builder::{
    MatcherBuilder, on, on_command, on_endswith, on_fullmatch, on_keyword, on_message,
    on_metaevent, on_notice, on_regex, on_request, on_startswith, on_type,
};
pub use instance::{IntoPrompt, Matcher};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// The state a template's instances start from.
#[derive(Clone)]
pub(crate) enum InitialState {
    /// Each instance starts from a copy.
    Default(State),
    /// Each instance shares this state. Used by continuations.
    Session(StateRef),
}

/// A registered matcher.
pub struct MatcherTemplate {
    id: u64,
    name: Option<String>,
    event_type: String,
    rule: Rule,
    permission: Permission,
    handlers: Vec<Arc<Dependent<Outcome>>>,
    priority: i32,
    block: AtomicBool,
    temporary: bool,
    expire_time: Option<SystemTime>,
    initial_state: InitialState,
    type_updater: Option<Arc<Dependent<String>>>,
    permission_updater: Option<Arc<Dependent<Permission>>>,
}

impl MatcherTemplate {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The event type this template accepts. Empty accepts every type.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn permission(&self) -> &Permission {
        &self.permission
    }

    pub fn handlers(&self) -> &[Arc<Dependent<Outcome>>] {
        &self.handlers
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn block(&self) -> bool {
        self.block.load(Ordering::SeqCst)
    }

    /// Changes whether a match blocks lower priorities.
    pub fn set_block(&self, block: bool) {
        self.block.store(block, Ordering::SeqCst);
    }

    /// Whether the template is removed after its first match.
    pub fn temporary(&self) -> bool {
        self.temporary
    }

    pub fn expire_time(&self) -> Option<SystemTime> {
        self.expire_time
    }

    /// Whether the expiry time has passed at `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expire_time.is_some_and(|expire| expire < now)
    }

    /// Whether the template continues a paused session.
    pub fn is_continuation(&self) -> bool {
        matches!(self.initial_state, InitialState::Session(_))
    }

    /// Checks the event type, then the permission.
    pub async fn check_perm(&self, injector: &Injector) -> Result<bool, HandlerError> {
        let event = injector.event();
        if !self.event_type.is_empty() && event.get_type() != self.event_type {
            trace!(matcher = %self, event_type = event.get_type(), "Event type mismatch");
            return Ok(false);
        }
        self.permission.check(injector).await
    }

    /// Checks the rule alone; the event type is filtered by
    /// [`check_perm`](Self::check_perm). Rule checkers may write into the
    /// injector's state.
    pub async fn check_rule(&self, injector: &Injector) -> Result<bool, HandlerError> {
        self.rule.check(injector).await
    }

    /// Creates an instance ready to run.
    pub fn instantiate(
        self: &Arc<Self>,
        registry: MatcherRegistry,
        session_expire_timeout: Duration,
    ) -> Matcher {
        let state = match &self.initial_state {
            InitialState::Default(state) => StateRef::new(state.clone()),
            InitialState::Session(state) => state.clone(),
        };
        Matcher::new(Arc::clone(self), state, registry, session_expire_timeout)
    }

    /// Removes the template from `registry`.
    pub fn destroy(self: &Arc<Self>, registry: &MatcherRegistry) -> bool {
        registry.remove(self)
    }
}

impl fmt::Display for MatcherTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}#{}", self.id),
            None => write!(f, "unnamed#{}", self.id),
        }
    }
}

impl fmt::Debug for MatcherTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherTemplate")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("event_type", &self.event_type)
            .field("priority", &self.priority)
            .field("block", &self.block())
            .field("temporary", &self.temporary)
            .field("expire_time", &self.expire_time)
            .field("handlers", &self.handlers.len())
            .field("rule", &self.rule)
            .field("permission", &self.permission)
            .finish()
    }
}
