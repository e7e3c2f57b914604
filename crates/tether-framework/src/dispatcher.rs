//! Event dispatcher for the Tether engine.
//!
//! The [`Dispatcher`] receives every event and walks the
//! [`MatcherRegistry`] by ascending priority:
//!
//! 1. Expired templates are swept and event preprocessors run
//! 2. For each priority, every template is checked concurrently (type,
//!    permission, then rule, each with its own copy of the state)
//! 3. Passing temporary templates are removed; one that another dispatch
//!    removed first is dropped. Every remaining template is instantiated
//!    and run concurrently, wrapped in run processors
//! 4. If any run in the priority blocks, lower priorities are not visited
//! 5. Event postprocessors run
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new(Settings::default());
//!
//! on_command(dispatcher.settings().command_syntax(), ["ping"])
//!     .block(true)
//!     .handle(pong)
//!     .register(dispatcher.registry())?;
//!
//! dispatcher.handle_event(bot, event).await;
//! ```

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tower::Service;
use tracing::{Instrument, Level, debug, error, info, span, trace};

use tether_core::{BoxedBot, BoxedEvent};

use crate::dependent::{Injectable, Injector, Scope};
use crate::error::DependencyError;
use crate::handler::Outcome;
use crate::matcher::MatcherTemplate;
use crate::processor::{ProcessorKind, Processors, Verdict};
use crate::registry::MatcherRegistry;
use crate::settings::Settings;
use crate::state::StateRef;

struct Inner {
    registry: MatcherRegistry,
    settings: Arc<Settings>,
    processors: Processors,
}

/// The central event dispatcher.
///
/// Cheap to clone; clones share the registry, settings and processors.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Dispatcher {
    /// Creates a dispatcher with an empty registry.
    pub fn new(settings: Settings) -> Self {
        Self::with_registry(MatcherRegistry::new(), settings)
    }

    /// Creates a dispatcher over an existing registry.
    pub fn with_registry(registry: MatcherRegistry, settings: Settings) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                settings: Arc::new(settings),
                processors: Processors::default(),
            }),
        }
    }

    pub fn registry(&self) -> &MatcherRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.inner.settings
    }

    pub fn processors(&self) -> &Processors {
        &self.inner.processors
    }

    pub fn event_preprocessor<F, T>(&self, f: F) -> Result<(), DependencyError>
    where
        F: Injectable<T, Outcome>,
    {
        self.inner.processors.add(ProcessorKind::EventPre, f)
    }

    pub fn event_postprocessor<F, T>(&self, f: F) -> Result<(), DependencyError>
    where
        F: Injectable<T, Outcome>,
    {
        self.inner.processors.add(ProcessorKind::EventPost, f)
    }

    pub fn run_preprocessor<F, T>(&self, f: F) -> Result<(), DependencyError>
    where
        F: Injectable<T, Outcome>,
    {
        self.inner.processors.add(ProcessorKind::RunPre, f)
    }

    pub fn run_postprocessor<F, T>(&self, f: F) -> Result<(), DependencyError>
    where
        F: Injectable<T, Outcome>,
    {
        self.inner.processors.add(ProcessorKind::RunPost, f)
    }

    /// Dispatches one event.
    ///
    /// Returns `true` if any matcher ran.
    pub async fn handle_event(&self, bot: BoxedBot, event: BoxedEvent) -> bool {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            event_name = %event.get_event_name(),
            bot = %bot.id(),
        );
        self.dispatch(bot, event).instrument(span).await
    }

    /// Dispatches one event on a new task.
    pub fn spawn(&self, bot: BoxedBot, event: BoxedEvent) -> JoinHandle<bool> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.handle_event(bot, event).await })
    }

    async fn dispatch(&self, bot: BoxedBot, event: BoxedEvent) -> bool {
        let registry = &self.inner.registry;
        registry.sweep_expired(event.time());

        let state = StateRef::default();
        let check_scope = Arc::new(Scope::new());
        let injector = Injector::new(bot.clone(), event.clone(), Arc::clone(&check_scope))
            .with_state(state.clone());

        if self
            .inner
            .processors
            .run(ProcessorKind::EventPre, &injector)
            .await
            == Verdict::Ignore
        {
            info!("Event ignored by preprocessor");
            check_scope.close().await;
            return false;
        }

        let mut matched = false;
        for priority in registry.priorities() {
            let bucket = registry.snapshot(priority);
            if bucket.is_empty() {
                continue;
            }
            trace!(priority, count = bucket.len(), "Checking matchers");

            let checks = bucket
                .iter()
                .map(|template| self.check_template(template, &injector, &state));
            let mut passed: Vec<_> = join_all(checks).await.into_iter().flatten().collect();
            // A temporary template runs only in the dispatch that removed it.
            passed.retain(|(template, _)| {
                let claimed = !template.temporary() || template.destroy(registry);
                if !claimed {
                    debug!(matcher = %template, "Temporary matcher taken by another dispatch");
                }
                claimed
            });
            if passed.is_empty() {
                continue;
            }
            matched = true;

            let runs = passed
                .into_iter()
                .map(|(template, state)| self.run_template(template, &bot, &event, state));
            let blocked = join_all(runs).await.into_iter().any(|blocked| blocked);
            if blocked {
                debug!(priority, "Stopping event propagation");
                break;
            }
        }

        self.inner
            .processors
            .run(ProcessorKind::EventPost, &injector)
            .await;
        check_scope.close().await;
        matched
    }

    /// Checks one template. Returns its state copy if it should run.
    async fn check_template(
        &self,
        template: &Arc<MatcherTemplate>,
        injector: &Injector,
        state: &StateRef,
    ) -> Option<(Arc<MatcherTemplate>, StateRef)> {
        if template.is_expired(injector.event().time()) {
            debug!(matcher = %template, "Matcher expired");
            template.destroy(&self.inner.registry);
            return None;
        }

        let state = StateRef::new(state.snapshot());
        let injector = injector.clone().with_state(state.clone());
        let passed = match template.check_perm(&injector).await {
            Ok(true) => template.check_rule(&injector).await,
            other => other,
        };

        match passed {
            Ok(true) => Some((Arc::clone(template), state)),
            Ok(false) => None,
            Err(err) => {
                error!(matcher = %template, error = %err, "Matcher check failed");
                None
            }
        }
    }

    /// Runs one matched template. Returns whether the run blocks.
    async fn run_template(
        &self,
        template: Arc<MatcherTemplate>,
        bot: &BoxedBot,
        event: &BoxedEvent,
        state: StateRef,
    ) -> bool {
        info!(matcher = %template, "Event will be handled");
        let matcher = template.instantiate(
            self.inner.registry.clone(),
            self.inner.settings.session_expire_timeout(),
        );

        let scope = Arc::new(Scope::new());
        let injector = Injector::new(bot.clone(), event.clone(), Arc::clone(&scope))
            .with_state(state.clone())
            .with_matcher(matcher.clone());

        let verdict = self
            .inner
            .processors
            .run(ProcessorKind::RunPre, &injector)
            .await;
        if verdict == Verdict::Ignore {
            info!(matcher = %template, "Matcher run cancelled by preprocessor");
            scope.close().await;
            return false;
        }

        let result = matcher
            .run(bot.clone(), event.clone(), state.snapshot())
            .await;
        if let Err(err) = &result {
            error!(matcher = %template, error = %err, "Matcher run failed");
        }

        let injector = injector.with_exception(result.err());
        self.inner
            .processors
            .run(ProcessorKind::RunPost, &injector)
            .await;
        scope.close().await;

        matcher.block()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.inner.registry)
            .field("settings", &self.inner.settings)
            .field("processors", &self.inner.processors)
            .finish()
    }
}

// ============================================================================
// Tower Service Implementation
// ============================================================================

/// Tower Service implementation for Dispatcher.
///
/// Lets middleware (timeouts, concurrency limits, ...) wrap the whole
/// dispatch of an event. The response is whether any matcher ran.
impl Service<(BoxedBot, BoxedEvent)> for Dispatcher {
    type Response = bool;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, (bot, event): (BoxedBot, BoxedEvent)) -> Self::Future {
        let dispatcher = self.clone();
        Box::pin(async move { Ok(dispatcher.handle_event(bot, event).await) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime};

    use parking_lot::Mutex;
    use tokio_test::{assert_err, assert_ok};
    use tower::ServiceExt;

    use super::*;
    use crate::arg_key;
    use crate::dependent::{Depends, Scoped};
    use crate::error::{HandlerError, HandlerResult, Interrupt};
    use crate::extractor::{ArgPlainText, ArgPromptResult, Caught, Dep, Provide};
    use crate::matcher::{Matcher, on_fullmatch, on_message, on_notice};
    use crate::permission::Permission;
    use crate::state::FULLMATCH_KEY;
    use crate::testing::{RecordingBot, TestEvent};

    arg_key!(A = "a");
    arg_key!(B = "b");

    fn message(text: &str, session: &str) -> BoxedEvent {
        TestEvent::message(text).session(session).boxed()
    }

    async fn say_a(matcher: Matcher) -> HandlerResult {
        matcher.send("A").await?;
        Ok(())
    }

    async fn say_b(matcher: Matcher) -> HandlerResult {
        matcher.send("B").await?;
        Ok(())
    }

    #[tokio::test]
    async fn blocking_matcher_hides_lower_priorities() {
        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_message()
            .priority(1)
            .block(true)
            .handle(say_a)
            .register(dispatcher.registry())
            .unwrap();
        on_message()
            .priority(2)
            .handle(say_b)
            .register(dispatcher.registry())
            .unwrap();

        assert!(dispatcher.handle_event(bot, message("hi", "s1")).await);
        assert_eq!(recorder.sent(), vec!["A"]);
    }

    #[tokio::test]
    async fn priorities_run_in_ascending_order() {
        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_message()
            .priority(10)
            .handle(say_b)
            .register(dispatcher.registry())
            .unwrap();
        on_message()
            .priority(-5)
            .handle(say_a)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot, message("hi", "s1")).await;
        assert_eq!(recorder.sent(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn stop_propagation_blocks_a_non_blocking_matcher() {
        async fn stop(matcher: Matcher) -> HandlerResult {
            matcher.stop_propagation();
            matcher.send("A").await?;
            Ok(())
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_message().handle(stop).register(dispatcher.registry()).unwrap();
        on_message()
            .priority(5)
            .handle(say_b)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot, message("hi", "s1")).await;
        assert_eq!(recorder.sent(), vec!["A"]);
    }

    #[tokio::test]
    async fn unmatched_event_reports_false() {
        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_notice().handle(say_a).register(dispatcher.registry()).unwrap();

        assert!(!dispatcher.handle_event(bot, message("hi", "s1")).await);
        assert!(recorder.sent().is_empty());
    }

    #[tokio::test]
    async fn temporary_matcher_runs_once() {
        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_message()
            .temp(true)
            .handle(say_a)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot.clone(), message("1", "s1")).await;
        dispatcher.handle_event(bot, message("2", "s1")).await;
        assert_eq!(recorder.sent(), vec!["A"]);
        assert!(dispatcher.registry().is_empty());
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    async fn first(matcher: Matcher) -> HandlerResult {
        matcher.send("h1").await?;
        Ok(())
    }

    async fn second(matcher: Matcher) -> HandlerResult {
        if !matcher.state().contains_key("asked") {
            matcher.state().insert("asked", "yes");
            return matcher.reject("again?").await;
        }
        matcher.send("h2").await?;
        Ok(())
    }

    async fn third(matcher: Matcher) -> HandlerResult {
        matcher.send("h3").await?;
        Ok(())
    }

    fn register_chain(dispatcher: &Dispatcher) {
        on_fullmatch(["start"], false)
            .handle(first)
            .handle(second)
            .handle(third)
            .register(dispatcher.registry())
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_handler_resumes_in_the_same_session() {
        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        register_chain(&dispatcher);

        dispatcher.handle_event(bot.clone(), message("start", "s1")).await;
        assert_eq!(recorder.sent(), vec!["h1", "again?"]);
        assert_eq!(dispatcher.registry().len(), 2);
        assert_eq!(dispatcher.registry().priorities(), vec![0, 1]);

        // another session does not resume it
        assert!(!dispatcher.handle_event(bot.clone(), message("next", "s2")).await);
        assert_eq!(recorder.sent(), vec!["h1", "again?"]);

        dispatcher.handle_event(bot, message("next", "s1")).await;
        assert_eq!(recorder.sent(), vec!["h1", "again?", "h2", "h3"]);
        assert_eq!(dispatcher.registry().len(), 1);
    }

    #[tokio::test]
    async fn continuation_expires() {
        let dispatcher = Dispatcher::new(Settings {
            session_expire_timeout_secs: 60,
            ..Settings::default()
        });
        let (recorder, bot) = RecordingBot::new();
        register_chain(&dispatcher);

        dispatcher.handle_event(bot.clone(), message("start", "s1")).await;
        assert_eq!(dispatcher.registry().len(), 2);

        let late = TestEvent::message("next")
            .session("s1")
            .at(SystemTime::now() + Duration::from_secs(3600))
            .boxed();
        assert!(!dispatcher.handle_event(bot, late).await);
        assert_eq!(recorder.sent(), vec!["h1", "again?"]);
        assert_eq!(dispatcher.registry().len(), 1);
    }

    #[tokio::test]
    async fn got_asks_in_declaration_order() {
        async fn both(
            a: ArgPlainText<A>,
            b: ArgPlainText<B>,
            prompt: ArgPromptResult<A>,
            matcher: Matcher,
        ) -> HandlerResult {
            let prompted = prompt.is_some();
            matcher
                .finish(format!("{}+{} {prompted}", *a, *b))
                .await
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_fullmatch(["go"], false)
            .got("b", "B?", both)
            .got("a", "A?", both)
            .register(dispatcher.registry())
            .unwrap();
        assert_eq!(dispatcher.registry().all()[0].handlers().len(), 1);

        dispatcher.handle_event(bot.clone(), message("go", "s1")).await;
        dispatcher.handle_event(bot.clone(), message("x", "s1")).await;
        dispatcher.handle_event(bot, message("y", "s1")).await;

        assert_eq!(recorder.sent(), vec!["B?", "A?", "y+x true"]);
        assert_eq!(dispatcher.registry().len(), 1);
    }

    #[tokio::test]
    async fn pause_waits_for_the_next_event() {
        async fn ask(matcher: Matcher) -> HandlerResult {
            matcher.pause("name?").await
        }

        async fn greet(event: BoxedEvent, matcher: Matcher) -> HandlerResult {
            let name = event.get_plaintext().unwrap_or_default();
            matcher.finish(format!("hi {name}")).await
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_fullmatch(["hello"], false)
            .handle(ask)
            .handle(greet)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot.clone(), message("hello", "s1")).await;
        dispatcher.handle_event(bot, message("Ada", "s1")).await;
        assert_eq!(recorder.sent(), vec!["name?", "hi Ada"]);
    }

    #[tokio::test]
    async fn finish_tears_down_scoped_dependencies_once() {
        static CLOSED: AtomicUsize = AtomicUsize::new(0);

        struct Conn;

        async fn open() -> HandlerResult<Scoped<Conn>> {
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

        async fn handler(_conn: Dep<Conn>, matcher: Matcher) -> HandlerResult {
            matcher.finish("done").await
        }

        async fn after_finish(matcher: Matcher) -> HandlerResult {
            matcher.send("never").await?;
            Ok(())
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_message()
            .handle(handler)
            .handle(after_finish)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot, message("x", "s1")).await;
        assert_eq!(recorder.sent(), vec!["done"]);
        assert_eq!(CLOSED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_handler_still_tears_down_scoped_dependencies() {
        static CLOSED: AtomicUsize = AtomicUsize::new(0);

        struct Lease;

        async fn lease() -> HandlerResult<Scoped<Lease>> {
            Ok(Scoped::new(Lease, async {
                CLOSED.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
        }

        impl Provide for Lease {
            fn provider() -> Depends {
                Depends::scoped(lease)
            }
        }

        async fn crash(_lease: Dep<Lease>) -> HandlerResult {
            Err(Interrupt::msg("kaboom"))
        }

        let dispatcher = Dispatcher::default();
        let (_, bot) = RecordingBot::new();
        on_message().handle(crash).register(dispatcher.registry()).unwrap();

        assert!(dispatcher.handle_event(bot, message("x", "s1")).await);
        assert_eq!(CLOSED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_dependency_is_shared_by_handlers_of_one_run() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        struct Token;

        async fn issue() -> HandlerResult<Token> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(Token)
        }

        impl Provide for Token {
            fn provider() -> Depends {
                Depends::new(issue)
            }
        }

        async fn check_token(_token: Dep<Token>) {}

        async fn use_token(_token: Dep<Token>, matcher: Matcher) -> HandlerResult {
            matcher.send("done").await?;
            Ok(())
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_message()
            .handle(check_token)
            .handle(use_token)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot, message("x", "s1")).await;
        assert_eq!(recorder.sent(), vec!["done"]);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clearing_block_lets_lower_priorities_run() {
        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        let blocking = on_message()
            .priority(1)
            .block(true)
            .handle(say_a)
            .register(dispatcher.registry())
            .unwrap();
        on_message()
            .priority(2)
            .handle(say_b)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot.clone(), message("1", "s1")).await;
        assert_eq!(recorder.sent(), vec!["A"]);

        blocking.set_block(false);
        dispatcher.handle_event(bot, message("2", "s1")).await;
        assert_eq!(recorder.sent(), vec!["A", "A", "B"]);
    }

    async fn wait(matcher: Matcher) -> HandlerResult {
        matcher.pause("waiting").await
    }

    async fn resumed(matcher: Matcher) -> HandlerResult {
        matcher.finish("resumed").await
    }

    #[tokio::test]
    async fn paused_session_resumes_on_any_event_type() {
        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_fullmatch(["go"], false)
            .handle(wait)
            .handle(resumed)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot.clone(), message("go", "s1")).await;
        let other = TestEvent::notice().session("s2").boxed();
        assert!(!dispatcher.handle_event(bot.clone(), other).await);

        let notice = TestEvent::notice().session("s1").boxed();
        assert!(dispatcher.handle_event(bot, notice).await);
        assert_eq!(recorder.sent(), vec!["waiting", "resumed"]);
        assert_eq!(dispatcher.registry().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_events_resume_a_session_once() {
        static RUNS: AtomicUsize = AtomicUsize::new(0);

        async fn slow(_: BoxedEvent) -> bool {
            tokio::time::sleep(Duration::from_millis(50)).await;
            true
        }

        async fn counted(matcher: Matcher) -> HandlerResult {
            RUNS.fetch_add(1, Ordering::SeqCst);
            matcher.finish("resumed").await
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_fullmatch(["go"], false)
            .permission(Permission::new(slow).unwrap())
            .handle(wait)
            .handle(counted)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot.clone(), message("go", "s1")).await;
        let (left, right) = tokio::join!(
            dispatcher.handle_event(bot.clone(), message("x", "s1")),
            dispatcher.handle_event(bot, message("y", "s1")),
        );

        assert!(left ^ right);
        assert_eq!(RUNS.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.sent(), vec!["waiting", "resumed"]);
    }

    #[tokio::test]
    async fn reject_keeps_the_session_state() {
        static SEEN: Mutex<Vec<(StateRef, Vec<String>)>> = Mutex::new(Vec::new());

        async fn note(matcher: Matcher) {
            matcher.state().insert("note", "kept");
        }

        async fn confirm(event: BoxedEvent, matcher: Matcher) -> HandlerResult {
            let mut keys: Vec<_> = matcher.state().snapshot().into_keys().collect();
            keys.sort();
            SEEN.lock().push((matcher.state().clone(), keys));
            if event.get_plaintext().as_deref() != Some("yes") {
                return matcher.reject("yes?").await;
            }
            matcher.finish("ok").await
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_fullmatch(["start"], false)
            .handle(note)
            .handle(confirm)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot.clone(), message("start", "s1")).await;
        dispatcher.handle_event(bot, message("yes", "s1")).await;
        assert_eq!(recorder.sent(), vec!["yes?", "ok"]);

        let seen = SEEN.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].0.ptr_eq(&seen[1].0));
        assert_eq!(seen[0].1, seen[1].1);
        assert_eq!(seen[1].0.get("note").and_then(|v| v.as_str().map(str::to_owned)).as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn incoming_state_overwrites_only_the_keys_it_carries() {
        async fn mark(event: BoxedEvent, state: StateRef) {
            state.insert("mark", event.get_plaintext().unwrap_or_default());
        }

        async fn remember(matcher: Matcher) -> HandlerResult {
            matcher.state().insert("note", "kept");
            matcher.state().insert("mark", "handler");
            matcher.pause(()).await
        }

        async fn inspect(matcher: Matcher) -> HandlerResult {
            let state = matcher.state();
            let read = |key: &str| {
                state
                    .get(key)
                    .and_then(|v| v.as_str().map(str::to_owned))
                    .unwrap_or_default()
            };
            let matched = state.contains_key(FULLMATCH_KEY);
            matcher
                .finish(format!("{} {} {matched}", read("mark"), read("note")))
                .await
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        dispatcher.event_preprocessor(mark).unwrap();
        on_fullmatch(["go"], false)
            .handle(remember)
            .handle(inspect)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot.clone(), message("go", "s1")).await;
        dispatcher.handle_event(bot, message("later", "s1")).await;
        assert_eq!(recorder.sent(), vec!["later kept true"]);
    }

    #[tokio::test]
    async fn pausing_without_a_session_fails_the_run() {
        static FAILURES: Mutex<Vec<String>> = Mutex::new(Vec::new());

        async fn record(caught: Caught) {
            if let Some(err) = caught.0 {
                FAILURES.lock().push(err.to_string());
            }
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        dispatcher.run_postprocessor(record).unwrap();
        on_notice()
            .handle(wait)
            .handle(resumed)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot, TestEvent::notice().boxed()).await;
        assert_eq!(recorder.sent(), vec!["waiting"]);
        assert_eq!(dispatcher.registry().len(), 1);

        let failures = FAILURES.lock();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("session id"));
    }

    // ========================================================================
    // Registration and processors
    // ========================================================================

    #[test]
    fn invalid_handler_is_not_registered() {
        async fn wants_exception(_: Caught) {}

        let dispatcher = Dispatcher::default();
        let result = on_message()
            .handle(say_a)
            .handle(wants_exception)
            .register(dispatcher.registry());
        assert_err!(result);
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn event_preprocessor_can_ignore_events() {
        async fn ignore_notices(event: BoxedEvent) -> Outcome {
            if event.get_type() == "notice" {
                Outcome::Skip
            } else {
                Outcome::Continue
            }
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        dispatcher.event_preprocessor(ignore_notices).unwrap();
        crate::matcher::on("").handle(say_a).register(dispatcher.registry()).unwrap();

        assert!(!dispatcher.handle_event(bot.clone(), TestEvent::notice().boxed()).await);
        assert!(dispatcher.handle_event(bot, message("x", "s1")).await);
        assert_eq!(recorder.sent(), vec!["A"]);
    }

    #[tokio::test]
    async fn run_postprocessor_sees_the_failure() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);

        async fn crash() -> HandlerResult {
            Err(Interrupt::msg("kaboom"))
        }

        async fn observe(caught: Caught) {
            if caught.0.as_ref().map(HandlerError::to_string).as_deref() == Some("kaboom") {
                SEEN.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dispatcher = Dispatcher::default();
        let (_, bot) = RecordingBot::new();
        assert_ok!(dispatcher.run_postprocessor(observe));
        assert_err!(dispatcher.event_preprocessor(observe));
        on_message().handle(crash).register(dispatcher.registry()).unwrap();

        dispatcher.handle_event(bot, message("x", "s1")).await;
        assert_eq!(SEEN.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_preprocessor_skip_cancels_the_run() {
        async fn veto(matcher: Matcher) -> Outcome {
            if matcher.template().name() == Some("vetoed") {
                Outcome::Skip
            } else {
                Outcome::Continue
            }
        }

        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        dispatcher.run_preprocessor(veto).unwrap();
        on_message()
            .name("vetoed")
            .block(true)
            .handle(say_a)
            .register(dispatcher.registry())
            .unwrap();
        on_message()
            .priority(2)
            .handle(say_b)
            .register(dispatcher.registry())
            .unwrap();

        dispatcher.handle_event(bot, message("x", "s1")).await;
        assert_eq!(recorder.sent(), vec!["B"]);
    }

    #[tokio::test]
    async fn dispatcher_is_a_tower_service() {
        let dispatcher = Dispatcher::default();
        let (recorder, bot) = RecordingBot::new();
        on_message().handle(say_a).register(dispatcher.registry()).unwrap();

        let matched = assert_ok!(dispatcher.oneshot((bot, message("x", "s1"))).await);
        assert!(matched);
        assert_eq!(recorder.sent(), vec!["A"]);
    }
}
