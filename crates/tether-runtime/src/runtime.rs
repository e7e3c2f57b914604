//! The runtime: configuration, logging and one process-wide dispatcher.
//!
//! ```rust,ignore
//! let runtime = TetherRuntime::builder().profile("production").build()?;
//!
//! runtime.register(runtime.on_command(["ping"]).handle(pong))?;
//!
//! // adapters feed events in
//! runtime.spawn(bot, event);
//!
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tether_core::{BoxedBot, BoxedEvent};
use tether_framework::{
    Dispatcher, MatcherBuilder, MatcherRegistry, MatcherTemplate, Permission, on_command,
};

use crate::config::{ConfigLoader, TetherConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// How often expired templates are swept while the runtime runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    handled: AtomicU64,
    dropped: AtomicU64,
}

/// A snapshot of runtime activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Events passed to the dispatcher.
    pub events_received: u64,
    /// Events at least one matcher ran for.
    pub events_handled: u64,
    /// Events refused after shutdown.
    pub events_dropped: u64,
    /// Templates currently registered, continuations included.
    pub matchers: usize,
}

/// The composition root of a Tether application.
///
/// Cheap to clone; clones share the dispatcher and shutdown token.
#[derive(Clone)]
pub struct TetherRuntime {
    config: Arc<TetherConfig>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    counters: Arc<Counters>,
}

impl TetherRuntime {
    /// Loads configuration from the default locations.
    pub fn new() -> RuntimeResult<Self> {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from loaded configuration and installs logging.
    ///
    /// An already installed subscriber is kept.
    pub fn from_config(config: TetherConfig) -> Self {
        if let Err(err) = logging::init_from_config(&config.logging) {
            debug!(error = %err, "Keeping existing logging setup");
        }
        info!(
            log_level = %config.logging.level,
            session_expire_timeout_secs = config.engine.session_expire_timeout_secs,
            "Runtime initialized from configuration"
        );

        let dispatcher = Dispatcher::new(config.engine.clone());
        Self {
            config: Arc::new(config),
            dispatcher,
            shutdown: CancellationToken::new(),
            counters: Arc::default(),
        }
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &MatcherRegistry {
        self.dispatcher.registry()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Starts a command matcher using the configured command syntax.
    pub fn on_command<I, S>(&self, command: I) -> MatcherBuilder
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        on_command(self.dispatcher.settings().command_syntax(), command)
    }

    /// The permission granted to the configured superusers.
    pub fn superuser(&self) -> Permission {
        self.dispatcher.settings().superuser()
    }

    /// Registers a declared matcher.
    pub fn register(&self, builder: MatcherBuilder) -> RuntimeResult<Arc<MatcherTemplate>> {
        let template = builder.register(self.registry())?;
        debug!(matcher = %template, priority = template.priority(), "Registered matcher");
        Ok(template)
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Dispatches one event and waits for it. Returns whether a matcher ran.
    pub async fn handle_event(&self, bot: BoxedBot, event: BoxedEvent) -> bool {
        if self.shutdown.is_cancelled() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(event_name = %event.get_event_name(), "Runtime is shut down, dropping event");
            return false;
        }

        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let handled = self.dispatcher.handle_event(bot, event).await;
        if handled {
            self.counters.handled.fetch_add(1, Ordering::Relaxed);
        }
        handled
    }

    /// Dispatches one event on its own task.
    pub fn spawn(&self, bot: BoxedBot, event: BoxedEvent) -> JoinHandle<bool> {
        let runtime = self.clone();
        tokio::spawn(async move { runtime.handle_event(bot, event).await })
    }

    /// Removes templates whose expiry has passed.
    pub fn sweep_expired(&self) -> usize {
        let removed = self.registry().sweep_expired(SystemTime::now());
        if removed > 0 {
            debug!(removed, "Swept expired matchers");
        }
        removed
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            events_received: self.counters.received.load(Ordering::Relaxed),
            events_handled: self.counters.handled.load(Ordering::Relaxed),
            events_dropped: self.counters.dropped.load(Ordering::Relaxed),
            matchers: self.registry().len(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// A token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Runs until Ctrl+C or the shutdown token is cancelled.
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("Tether runtime is now running. Press Ctrl+C to stop.");
        self.serve(async {
            signal::ctrl_c().await.map_err(RuntimeError::Signal)?;
            info!("Received Ctrl+C, shutting down");
            Ok(())
        })
        .await
    }

    /// Runs until `shutdown` completes or the shutdown token is cancelled.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.serve(async {
            shutdown.await;
            Ok(())
        })
        .await
    }

    async fn serve<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = RuntimeResult<()>>,
    {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                result = &mut shutdown => break result,
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                _ = sweep.tick() => {
                    self.sweep_expired();
                }
            }
        };

        self.shutdown.cancel();
        let stats = self.stats();
        info!(
            events_received = stats.events_received,
            events_handled = stats.events_handled,
            "Runtime stopped"
        );
        result
    }
}

impl std::fmt::Debug for TetherRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherRuntime")
            .field("dispatcher", &self.dispatcher)
            .field("running", &self.is_running())
            .finish()
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builds a [`TetherRuntime`] from layered configuration.
pub struct RuntimeBuilder {
    loader: ConfigLoader,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            loader: ConfigLoader::new(),
        }
    }

    pub fn config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.loader = self.loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.loader = self.loader.profile(profile);
        self
    }

    pub fn search_path(mut self, path: impl AsRef<Path>) -> Self {
        self.loader = self.loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.loader = self.loader.without_env();
        self
    }

    pub fn merge(mut self, config: TetherConfig) -> Self {
        self.loader = self.loader.merge(config);
        self
    }

    pub fn build(self) -> RuntimeResult<TetherRuntime> {
        let config = self.loader.load()?;
        Ok(TetherRuntime::from_config(config))
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tether_core::{ApiResult, Bot, Event, Message, SendOptions};
    use tether_framework::{HandlerResult, Matcher, on_message};
    use tokio_test::assert_ok;

    use super::*;

    struct Chat {
        text: &'static str,
    }

    impl Event for Chat {
        fn get_type(&self) -> &str {
            "message"
        }

        fn get_event_name(&self) -> &str {
            "message.private"
        }

        fn get_session_id(&self) -> Option<String> {
            Some("alice".to_owned())
        }

        fn get_user_id(&self) -> Option<String> {
            Some("10001".to_owned())
        }

        fn get_message(&self) -> Option<Message> {
            Some(Message::from(self.text))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct Silent;

    #[async_trait]
    impl Bot for Silent {
        fn id(&self) -> &str {
            "silent"
        }

        async fn send(&self, _: &dyn Event, _: Message, _: SendOptions) -> ApiResult<Value> {
            Ok(json!({}))
        }
    }

    fn runtime() -> TetherRuntime {
        let mut config = TetherConfig::default();
        config.engine.command_start = vec!["!".into()];
        config.engine.superusers = vec!["10001".into()];
        TetherRuntime::from_config(config)
    }

    fn chat(text: &'static str) -> (BoxedBot, BoxedEvent) {
        (Arc::new(Silent), BoxedEvent::new(Chat { text }))
    }

    async fn pong(matcher: Matcher) -> HandlerResult {
        matcher.finish("pong").await
    }

    #[tokio::test]
    async fn commands_follow_configured_syntax() {
        let runtime = runtime();
        assert_ok!(runtime.register(runtime.on_command(["ping"]).handle(pong)));

        let (bot, event) = chat("!ping");
        assert!(runtime.handle_event(bot, event).await);
        let (bot, event) = chat("/ping");
        assert!(!runtime.spawn(bot, event).await.unwrap());

        let stats = runtime.stats();
        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.events_handled, 1);
        assert_eq!(stats.matchers, 1);
    }

    #[tokio::test]
    async fn superuser_permission_uses_configured_ids() {
        let runtime = runtime();
        runtime
            .register(on_message().permission(runtime.superuser()).handle(pong))
            .unwrap();

        let (bot, event) = chat("hi");
        assert!(runtime.handle_event(bot, event).await);
    }

    #[tokio::test]
    async fn invalid_declaration_is_a_registration_error() {
        async fn wants_exception(_: tether_framework::extractor::Caught) {}

        let runtime = runtime();
        let result = runtime.register(on_message().handle(wants_exception));
        assert!(matches!(result, Err(RuntimeError::Registration(_))));
        assert_eq!(runtime.stats().matchers, 0);
    }

    #[tokio::test]
    async fn events_are_dropped_after_shutdown() {
        let runtime = runtime();
        runtime.register(on_message().handle(pong)).unwrap();

        assert_ok!(runtime.run_until(async {}).await);
        assert!(!runtime.is_running());

        let (bot, event) = chat("hi");
        assert!(!runtime.handle_event(bot, event).await);
        assert_eq!(runtime.stats().events_dropped, 1);
        assert_eq!(runtime.stats().events_received, 0);
    }

    #[tokio::test]
    async fn cancelling_the_token_stops_run() {
        let runtime = runtime();
        let token = runtime.shutdown_token();
        let handle = tokio::spawn({
            let runtime = runtime.clone();
            async move { runtime.run_until(std::future::pending()).await }
        });

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert_ok!(result.unwrap().unwrap());
    }

    #[test]
    fn sweep_removes_expired_templates() {
        let runtime = runtime();
        runtime
            .register(
                on_message()
                    .expire_at(SystemTime::now() - Duration::from_secs(1))
                    .handle(pong),
            )
            .unwrap();
        runtime.register(on_message().handle(pong)).unwrap();

        assert_eq!(runtime.sweep_expired(), 1);
        assert_eq!(runtime.stats().matchers, 1);
    }
}
