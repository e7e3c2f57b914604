//! Dependency declaration and resolution.
//!
//! Every callable the engine invokes (handler, rule checker, permission
//! checker, processor, session updater, sub-dependency) is wrapped in a
//! [`Dependent`]. Its parameters are declared by their types: each parameter
//! type implements [`FromParam`](crate::extractor::FromParam), which names the
//! [`Param`] source it is filled from. Declaration is validated once, at
//! registration, against the set of [`ParamKind`]s the context allows.
//!
//! ```rust,ignore
//! async fn greet(event: BoxedEvent, matcher: Matcher) -> HandlerResult {
//!     matcher.send(format!("hi {}", event.get_user_id().unwrap_or_default())).await?;
//!     Ok(())
//! }
//!
//! let handler = Dependent::<Outcome>::parse(greet, HANDLER_PARAMS)?;
//! ```

mod injectable;
mod injector;
mod scope;

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::{DependencyError, Interrupt};

pub use injectable::Injectable;
pub use injector::{Injector, Resolved};
pub use scope::{DependencyCache, ExitStack, Scope, Scoped, Teardown};

/// A type-erased dependency value.
pub type Value = Arc<dyn Any + Send + Sync>;

/// A dependency producing a [`Value`].
pub type Depends = Dependent<Value>;

// ============================================================================
// Parameter kinds
// ============================================================================

/// The source a parameter is resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// The result of another dependency.
    Depend,
    /// The bot that received the event.
    Bot,
    /// The event being handled.
    Event,
    /// The run state.
    State,
    /// A named argument collected by `got`.
    Arg,
    /// The running matcher.
    Matcher,
    /// The failure raised by the run, if any.
    Exception,
    /// The parameter type's default value.
    Default,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Depend => "depend",
            Self::Bot => "bot",
            Self::Event => "event",
            Self::State => "state",
            Self::Arg => "arg",
            Self::Matcher => "matcher",
            Self::Exception => "exception",
            Self::Default => "default",
        })
    }
}

use ParamKind as K;

/// Kinds accepted by matcher handlers and session updaters.
pub const HANDLER_PARAMS: &[ParamKind] = &[
    K::Depend,
    K::Bot,
    K::Event,
    K::State,
    K::Arg,
    K::Matcher,
    K::Default,
];
/// Kinds accepted by rule checkers.
pub const RULE_PARAMS: &[ParamKind] = &[K::Depend, K::Bot, K::Event, K::State, K::Default];
/// Kinds accepted by permission checkers.
pub const PERMISSION_PARAMS: &[ParamKind] = &[K::Depend, K::Bot, K::Event, K::Default];
/// Kinds accepted by event pre/postprocessors.
pub const EVENT_PROCESSOR_PARAMS: &[ParamKind] =
    &[K::Depend, K::Bot, K::Event, K::State, K::Default];
/// Kinds accepted by run preprocessors.
pub const RUN_PREPROCESSOR_PARAMS: &[ParamKind] = &[
    K::Depend,
    K::Bot,
    K::Event,
    K::State,
    K::Arg,
    K::Matcher,
    K::Default,
];
/// Kinds accepted by run postprocessors.
pub const RUN_POSTPROCESSOR_PARAMS: &[ParamKind] = &[
    K::Depend,
    K::Bot,
    K::Event,
    K::State,
    K::Arg,
    K::Matcher,
    K::Exception,
    K::Default,
];

/// How an `Arg` parameter reads its state entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgForm {
    /// The stored message.
    Message,
    /// The stored message rendered as a string.
    Str,
    /// The plain text of the stored message.
    PlainText,
    /// The send result of the reject prompt for the key.
    PromptResult,
}

/// A declared parameter.
#[derive(Clone)]
pub enum Param {
    Depend(Arc<Depends>),
    Bot,
    Event,
    State,
    Arg { key: &'static str, form: ArgForm },
    Matcher,
    Exception,
    Default,
}

impl Param {
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Depend(_) => K::Depend,
            Self::Bot => K::Bot,
            Self::Event => K::Event,
            Self::State => K::State,
            Self::Arg { .. } => K::Arg,
            Self::Matcher => K::Matcher,
            Self::Exception => K::Exception,
            Self::Default => K::Default,
        }
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Depend(dep) => f.debug_tuple("Depend").field(&dep.name()).finish(),
            Self::Arg { key, form } => f
                .debug_struct("Arg")
                .field("key", key)
                .field("form", form)
                .finish(),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

// ============================================================================
// Cache identity
// ============================================================================

static NEXT_UNIQUE: AtomicU64 = AtomicU64::new(1);

/// Identity of a dependency within one resolution scope.
///
/// Two declarations with equal keys share one cached value per scope, and a
/// rule or permission never holds two checkers with equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A callable without captures, identified by its type.
    Type(TypeId),
    /// A callable parameterised by construction arguments.
    Keyed(TypeId, String),
    /// A capturing callable; every declaration is distinct.
    Unique(u64),
}

impl CacheKey {
    /// Derives the key of callable `F`.
    ///
    /// Function items and non-capturing closures are zero-sized and share a
    /// key across declarations. Capturing closures get a fresh key.
    pub fn of<F: 'static>() -> Self {
        if size_of::<F>() == 0 {
            Self::Type(TypeId::of::<F>())
        } else {
            Self::unique()
        }
    }

    pub fn of_type<T: 'static>() -> Self {
        Self::Type(TypeId::of::<T>())
    }

    pub fn keyed<T: 'static>(key: impl Into<String>) -> Self {
        Self::Keyed(TypeId::of::<T>(), key.into())
    }

    pub fn unique() -> Self {
        Self::Unique(NEXT_UNIQUE.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Dependent
// ============================================================================

pub(crate) enum Produced<R> {
    Value(R),
    Scoped(R, Teardown),
}

type CallFn<R> =
    Arc<dyn Fn(Vec<Resolved>) -> BoxFuture<'static, Result<Produced<R>, Interrupt>> + Send + Sync>;

/// A callable together with its declared parameters.
pub struct Dependent<R> {
    key: CacheKey,
    name: &'static str,
    params: Vec<Param>,
    parameterless: Vec<Arc<Depends>>,
    use_cache: bool,
    call: CallFn<R>,
}

impl<R: Send + 'static> Dependent<R> {
    /// Wraps `f` without validating its parameters.
    pub fn new<F, T>(f: F) -> Self
    where
        F: Injectable<T, R>,
    {
        Self {
            key: CacheKey::of::<F>(),
            name: std::any::type_name::<F>(),
            params: F::params(),
            parameterless: Vec::new(),
            use_cache: true,
            call: Arc::new(move |args| f.invoke(args).map(|r| r.map(Produced::Value)).boxed()),
        }
    }

    /// Wraps `f` and checks every parameter (recursively) against `allowed`.
    pub fn parse<F, T>(f: F, allowed: &[ParamKind]) -> Result<Self, DependencyError>
    where
        F: Injectable<T, R>,
    {
        let dependent = Self::new(f);
        dependent.validate(allowed)?;
        Ok(dependent)
    }

    /// Checks the declared parameters and parameterless dependencies.
    pub fn validate(&self, allowed: &[ParamKind]) -> Result<(), DependencyError> {
        for (index, param) in self.params.iter().enumerate() {
            let kind = param.kind();
            if !allowed.contains(&kind) {
                return Err(DependencyError::kind_not_allowed(
                    self.name, index, kind, allowed,
                ));
            }
            if let Param::Depend(sub) = param {
                sub.validate(allowed)?;
            }
        }
        self.parameterless
            .iter()
            .try_for_each(|dep| dep.validate(allowed))
    }

    /// Appends dependencies resolved before the parameters, for their effects.
    pub fn with_parameterless(mut self, deps: impl IntoIterator<Item = Arc<Depends>>) -> Self {
        self.parameterless.extend(deps);
        self
    }

    /// Returns a copy with `dep` resolved after the existing parameterless
    /// dependencies.
    pub fn append_parameterless(&self, dep: Arc<Depends>) -> Self {
        let mut copy = self.clone();
        copy.parameterless.push(dep);
        copy
    }

    /// Replaces the cache key.
    pub fn keyed(mut self, key: CacheKey) -> Self {
        self.key = key;
        self
    }

    /// Controls whether a cached value may be reused.
    ///
    /// An uncached dependency is invoked every time but still stores its first
    /// result for cached consumers.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn parameterless(&self) -> &[Arc<Depends>] {
        &self.parameterless
    }

    pub fn uses_cache(&self) -> bool {
        self.use_cache
    }
}

impl Dependent<Value> {
    /// Wraps a scoped provider.
    ///
    /// The provider returns [`Scoped`]; its teardown runs when the scope
    /// that resolved it closes.
    pub fn scoped<F, T>(f: F) -> Self
    where
        F: Injectable<T, Scoped<Value>>,
    {
        Self {
            key: CacheKey::of::<F>(),
            name: std::any::type_name::<F>(),
            params: F::params(),
            parameterless: Vec::new(),
            use_cache: true,
            call: Arc::new(move |args| {
                f.invoke(args)
                    .map(|r| r.map(|scoped| Produced::Scoped(scoped.value, scoped.teardown)))
                    .boxed()
            }),
        }
    }
}

impl<R> Clone for Dependent<R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            name: self.name,
            params: self.params.clone(),
            parameterless: self.parameterless.clone(),
            use_cache: self.use_cache,
            call: Arc::clone(&self.call),
        }
    }
}

impl<R> fmt::Debug for Dependent<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependent")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("parameterless", &self.parameterless.len())
            .field("use_cache", &self.use_cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::HandlerResult;
    use crate::extractor::{Caught, Dep, Fallback, Fresh, Provide};
    use crate::handler::Outcome;
    use crate::testing::{TestEvent, injector};

    #[tokio::test]
    async fn cached_dependency_runs_once_per_scope() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        struct Counter(usize);

        async fn count() -> HandlerResult<Counter> {
            Ok(Counter(CALLS.fetch_add(1, Ordering::SeqCst) + 1))
        }

        impl Provide for Counter {
            fn provider() -> Depends {
                Depends::new(count)
            }
        }

        async fn twice(a: Dep<Counter>, b: Dep<Counter>) -> HandlerResult<(usize, usize)> {
            Ok((a.0, b.0))
        }

        async fn fresh(a: Dep<Counter>, b: Fresh<Counter>) -> HandlerResult<(usize, usize)> {
            Ok((a.0, b.0))
        }

        let inj = injector(TestEvent::message("x"));
        let value = Depends::new(twice).solve(&inj).await.unwrap();
        assert_eq!(value.downcast_ref::<(usize, usize)>(), Some(&(1, 1)));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);

        let inj = injector(TestEvent::message("x"));
        let value = Depends::new(fresh).solve(&inj).await.unwrap();
        assert_eq!(value.downcast_ref::<(usize, usize)>(), Some(&(2, 3)));
        assert_eq!(CALLS.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn scoped_dependency_is_torn_down_when_scope_closes() {
        static OPENED: AtomicUsize = AtomicUsize::new(0);
        static CLOSED: AtomicUsize = AtomicUsize::new(0);

        struct Conn;

        async fn open() -> HandlerResult<Scoped<Conn>> {
            OPENED.fetch_add(1, Ordering::SeqCst);
            Ok(Scoped::new(Conn, async {
                CLOSED.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        }

        impl Provide for Conn {
            fn provider() -> Depends {
                Depends::scoped(open)
            }
        }

        async fn handler(_a: Dep<Conn>, _b: Dep<Conn>) -> Outcome {
            Outcome::Finish
        }

        let inj = injector(TestEvent::message("x"));
        let outcome = Dependent::<Outcome>::new(handler).solve(&inj).await.unwrap();
        assert_eq!(outcome, Outcome::Finish);
        assert_eq!(OPENED.load(Ordering::SeqCst), 1);
        assert_eq!(CLOSED.load(Ordering::SeqCst), 0);

        inj.scope().close().await;
        assert_eq!(CLOSED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parameterless_dependencies_run_first() {
        static ORDER: std::sync::Mutex<Vec<&str>> = std::sync::Mutex::new(Vec::new());

        async fn guard() -> HandlerResult<()> {
            ORDER.lock().unwrap().push("guard");
            Ok(())
        }

        async fn body(_: Fallback<u8>) {
            ORDER.lock().unwrap().push("body");
        }

        let dep = Dependent::<Outcome>::new(body).with_parameterless([Arc::new(Depends::new(guard))]);
        let inj = injector(TestEvent::notice());
        dep.solve(&inj).await.unwrap();
        assert_eq!(*ORDER.lock().unwrap(), vec!["guard", "body"]);
    }

    #[tokio::test]
    async fn skipping_dependency_skips_the_consumer() {
        struct Never;

        async fn refuse() -> HandlerResult<Never> {
            Err(Interrupt::Skip)
        }

        impl Provide for Never {
            fn provider() -> Depends {
                Depends::new(refuse)
            }
        }

        async fn consumer(_: Dep<Never>) {}

        let inj = injector(TestEvent::notice());
        let result = Dependent::<Outcome>::new(consumer).solve(&inj).await;
        assert!(matches!(result, Err(Interrupt::Skip)));
    }

    #[test]
    fn validation_names_the_disallowed_kind() {
        async fn postprocessor(_: Caught) {}

        let err = Dependent::<Outcome>::parse(postprocessor, HANDLER_PARAMS).unwrap_err();
        let DependencyError::KindNotAllowed { kind, index, .. } = &err;
        assert_eq!((*kind, *index), (ParamKind::Exception, 0));
        assert!(Dependent::<Outcome>::parse(postprocessor, RUN_POSTPROCESSOR_PARAMS).is_ok());
    }

    #[test]
    fn validation_recurses_into_sub_dependencies() {
        struct NeedsState;

        async fn from_state(_: crate::state::StateRef) -> HandlerResult<NeedsState> {
            Ok(NeedsState)
        }

        impl Provide for NeedsState {
            fn provider() -> Depends {
                Depends::new(from_state)
            }
        }

        async fn checker(_: Dep<NeedsState>) -> bool {
            true
        }

        assert!(Dependent::<bool>::parse(checker, RULE_PARAMS).is_ok());
        let err = Dependent::<bool>::parse(checker, PERMISSION_PARAMS).unwrap_err();
        assert!(err.to_string().contains("state"));
    }

    #[test]
    fn cache_keys_follow_callable_identity() {
        async fn plain() {}
        let a = Dependent::<Outcome>::new(plain);
        let b = Dependent::<Outcome>::new(plain);
        assert_eq!(a.key(), b.key());

        let text = String::from("x");
        let capturing = move || {
            let len = text.len();
            async move {
                let _ = len;
            }
        };
        let c = Dependent::<Outcome>::new(capturing.clone());
        let d = Dependent::<Outcome>::new(capturing);
        assert_ne!(c.key(), d.key());
    }
}
