//! Ambient access to the bot, event and matcher of the running handler.
//!
//! [`Matcher::run`](crate::Matcher::run) enters a task-local scope for its
//! whole chain. Code called from a handler, including helpers that take no
//! parameters, reads the current values from here. The scope nests: a run
//! started inside another run sees its own values and restores the outer ones
//! when it returns.

use std::future::Future;

use tether_core::{BoxedBot, BoxedEvent};

use crate::matcher::Matcher;

/// The values visible to the running handler chain.
#[derive(Clone)]
pub struct RunContext {
    pub bot: BoxedBot,
    pub event: BoxedEvent,
    pub matcher: Matcher,
}

tokio::task_local! {
    static CURRENT: RunContext;
}

/// Runs `fut` with `ctx` as the current run context.
pub async fn scope<F: Future>(ctx: RunContext, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}

/// Returns the current run context, if called inside a matcher run.
pub fn current() -> Option<RunContext> {
    CURRENT.try_with(Clone::clone).ok()
}

pub fn current_bot() -> Option<BoxedBot> {
    CURRENT.try_with(|ctx| ctx.bot.clone()).ok()
}

pub fn current_event() -> Option<BoxedEvent> {
    CURRENT.try_with(|ctx| ctx.event.clone()).ok()
}

pub fn current_matcher() -> Option<Matcher> {
    CURRENT.try_with(|ctx| ctx.matcher.clone()).ok()
}
