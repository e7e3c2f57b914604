//! Permissions: the disjunction of checkers deciding who may trigger a
//! matcher.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::trace;

use tether_core::{BoxedEvent, Event, EventType};

use crate::dependent::{CacheKey, Dependent, Injectable, Injector, PERMISSION_PARAMS};
use crate::error::{DependencyError, HandlerError, Interrupt};

#[derive(Clone)]
enum Checker {
    Call(Arc<Dependent<bool>>),
    User(Arc<User>),
}

impl Checker {
    fn same_as(&self, other: &Checker) -> bool {
        match (self, other) {
            (Self::Call(a), Self::Call(b)) => a.key() == b.key(),
            (Self::User(a), Self::User(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A permission passes when any checker returns `true`.
///
/// Checkers run in insertion order and stop at the first `true`. A checker
/// that skips counts as `false`; a failure fails the whole check. The empty
/// permission always passes.
#[derive(Clone, Default)]
pub struct Permission {
    checkers: Vec<Checker>,
}

impl Permission {
    /// A permission with no checkers, which always passes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A permission with the single checker `f`.
    pub fn new<F, T>(f: F) -> Result<Self, DependencyError>
    where
        F: Injectable<T, bool>,
    {
        Ok(Self::from_dependent(Dependent::parse(f, PERMISSION_PARAMS)?))
    }

    fn from_dependent(checker: Dependent<bool>) -> Self {
        Self {
            checkers: vec![Checker::Call(Arc::new(checker))],
        }
    }

    /// Adds the checkers of `other`, skipping ones already present.
    pub fn or(mut self, other: Permission) -> Self {
        for checker in other.checkers {
            if !self.checkers.iter().any(|c| c.same_as(&checker)) {
                self.checkers.push(checker);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Runs the checkers.
    pub fn check<'a>(&'a self, injector: &'a Injector) -> BoxFuture<'a, Result<bool, HandlerError>> {
        async move {
            if self.checkers.is_empty() {
                return Ok(true);
            }
            for checker in &self.checkers {
                let passed = match checker {
                    Checker::Call(dep) => match dep.solve(injector).await {
                        Ok(passed) => passed,
                        Err(Interrupt::Failed(err)) => return Err(err),
                        Err(signal) => {
                            trace!(checker = dep.name(), %signal, "Permission checker interrupted");
                            false
                        }
                    },
                    Checker::User(user) => user.check(injector).await?,
                };
                if passed {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        .boxed()
    }

    // ========================================================================
    // Built-in permissions
    // ========================================================================

    /// Passes message events.
    pub fn message() -> Self {
        Self::event_type(EventType::Message)
    }

    /// Passes notice events.
    pub fn notice() -> Self {
        Self::event_type(EventType::Notice)
    }

    /// Passes request events.
    pub fn request() -> Self {
        Self::event_type(EventType::Request)
    }

    /// Passes meta events.
    pub fn metaevent() -> Self {
        Self::event_type(EventType::MetaEvent)
    }

    fn event_type(kind: EventType) -> Self {
        let checker = Dependent::new(move |event: BoxedEvent| async move {
            event.get_type() == kind.as_str()
        });
        Self::from_dependent(checker.keyed(CacheKey::keyed::<EventType>(kind.as_str())))
    }

    /// Passes events whose user id is one of `superusers`.
    pub fn superuser<I, S>(superusers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let superusers: BTreeSet<String> = superusers.into_iter().map(Into::into).collect();
        let key = superusers.iter().cloned().collect::<Vec<_>>().join(",");
        let checker = Dependent::new(move |event: BoxedEvent| {
            let passed = event
                .get_user_id()
                .is_some_and(|id| superusers.contains(&id));
            async move { passed }
        });
        Self::from_dependent(checker.keyed(CacheKey::keyed::<Superuser>(key)))
    }

    /// Passes events from one of the session ids in `users` that also pass
    /// `perm`.
    pub fn user<I, S>(users: I, perm: Option<Permission>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        User::new(users, perm).into()
    }
}

struct Superuser;

impl From<User> for Permission {
    fn from(user: User) -> Self {
        Self {
            checkers: vec![Checker::User(Arc::new(user))],
        }
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        self.or(rhs)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Permission) {
        *self = std::mem::take(self).or(rhs);
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for checker in &self.checkers {
            match checker {
                Checker::Call(dep) => list.entry(&dep.name()),
                Checker::User(user) => list.entry(user),
            };
        }
        list.finish()
    }
}

// ============================================================================
// User
// ============================================================================

/// Restricts a matcher to fixed sessions.
///
/// A paused matcher's continuation carries a `User` permission for the
/// session that paused it, so only that conversation resumes it.
#[derive(Clone)]
pub struct User {
    users: BTreeSet<String>,
    perm: Option<Permission>,
}

impl User {
    pub fn new<I, S>(users: I, perm: Option<Permission>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            perm,
        }
    }

    /// Restricts `perm` to the session of `event`.
    ///
    /// Returns `None` if the event has no session. If `perm` is itself a lone
    /// `User` restriction, its inner permission is used, so continuations of
    /// continuations do not nest.
    pub fn from_event(event: &dyn Event, perm: Option<Permission>) -> Option<Self> {
        let session = event.get_session_id()?;
        Some(Self::new([session], perm.and_then(clean_permission)))
    }

    /// Restricts `perm` to the given sessions.
    pub fn from_permission<I, S>(users: I, perm: Option<Permission>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(users, perm.and_then(clean_permission))
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }

    pub fn perm(&self) -> Option<&Permission> {
        self.perm.as_ref()
    }

    /// Passes when the session id is listed and the inner permission passes.
    pub async fn check(&self, injector: &Injector) -> Result<bool, HandlerError> {
        let Some(session) = injector.event().get_session_id() else {
            return Ok(false);
        };
        if !self.users.contains(&session) {
            return Ok(false);
        }
        match &self.perm {
            Some(perm) => perm.check(injector).await,
            None => Ok(true),
        }
    }
}

fn clean_permission(perm: Permission) -> Option<Permission> {
    match perm.checkers.as_slice() {
        [Checker::User(user)] => user.perm.clone(),
        _ => Some(perm),
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("users", &self.users)
            .field("perm", &self.perm)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestEvent, injector};

    #[tokio::test]
    async fn empty_permission_passes() {
        let inj = injector(TestEvent::notice());
        assert!(Permission::empty().check(&inj).await.unwrap());
    }

    #[tokio::test]
    async fn any_checker_is_enough() {
        let perm = Permission::notice() | Permission::message();
        let inj = injector(TestEvent::message("hi"));
        assert!(perm.check(&inj).await.unwrap());

        let inj = injector(TestEvent::request());
        assert!(!perm.check(&inj).await.unwrap());
    }

    #[test]
    fn combining_deduplicates_builtins() {
        let perm = Permission::message() | Permission::message() | Permission::notice();
        assert_eq!(perm.len(), 2);
    }

    #[tokio::test]
    async fn superuser_checks_user_id() {
        let perm = Permission::superuser(["admin"]);
        let inj = injector(TestEvent::message("hi").user("admin"));
        assert!(perm.check(&inj).await.unwrap());
        let inj = injector(TestEvent::message("hi").user("guest"));
        assert!(!perm.check(&inj).await.unwrap());
    }

    #[tokio::test]
    async fn user_requires_session_and_inner_permission() {
        let perm = Permission::user(["s1"], Some(Permission::message()));
        assert!(perm.check(&injector(TestEvent::message("x").session("s1"))).await.unwrap());
        assert!(!perm.check(&injector(TestEvent::message("x").session("s2"))).await.unwrap());
        assert!(!perm.check(&injector(TestEvent::notice().session("s1"))).await.unwrap());
        assert!(!perm.check(&injector(TestEvent::message("x"))).await.unwrap());
    }

    #[test]
    fn user_from_event_unwraps_lone_user() {
        let event = TestEvent::message("x").session("s2");
        let first = User::new(["s1"], Some(Permission::message()));
        let nested = User::from_event(&event, Some(first.into())).unwrap();
        assert_eq!(nested.users().collect::<Vec<_>>(), vec!["s2"]);
        assert_eq!(nested.perm().map(Permission::len), Some(1));
        assert!(matches!(
            nested.perm().unwrap().checkers.as_slice(),
            [Checker::Call(_)]
        ));

        assert!(User::from_event(&TestEvent::message("x"), None).is_none());
    }
}
