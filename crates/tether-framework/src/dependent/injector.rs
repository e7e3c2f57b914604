//! Parameter resolution.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::trace;

use tether_core::{BoxedBot, BoxedEvent};

use super::{ArgForm, Dependent, Depends, Param, Produced, Scope, Value};
use crate::error::{HandlerError, Interrupt};
use crate::matcher::Matcher;
use crate::state::{StateRef, StateValue, reject_prompt_result_key};

/// A parameter value, before conversion into the declared type.
#[derive(Clone)]
pub enum Resolved {
    Bot(BoxedBot),
    Event(BoxedEvent),
    State(StateRef),
    Arg(Option<StateValue>),
    Matcher(Matcher),
    Exception(Option<HandlerError>),
    Value(Value),
    Default,
}

/// Everything a callable can be injected with, plus the scope its
/// dependencies are cached in.
#[derive(Clone)]
pub struct Injector {
    bot: BoxedBot,
    event: BoxedEvent,
    state: Option<StateRef>,
    matcher: Option<Matcher>,
    exception: Option<HandlerError>,
    scope: Arc<Scope>,
}

impl Injector {
    pub fn new(bot: BoxedBot, event: BoxedEvent, scope: Arc<Scope>) -> Self {
        Self {
            bot,
            event,
            state: None,
            matcher: None,
            exception: None,
            scope,
        }
    }

    pub fn with_state(mut self, state: StateRef) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_matcher(mut self, matcher: Matcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_exception(mut self, exception: Option<HandlerError>) -> Self {
        self.exception = exception;
        self
    }

    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }

    pub fn state(&self) -> Option<&StateRef> {
        self.state.as_ref()
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    fn resolve<'a>(&'a self, param: &'a Param) -> BoxFuture<'a, Result<Resolved, Interrupt>> {
        async move {
            let resolved = match param {
                Param::Depend(dep) => Resolved::Value(self.solve_dependency(dep).await?),
                Param::Bot => Resolved::Bot(self.bot.clone()),
                Param::Event => Resolved::Event(self.event.clone()),
                Param::State => Resolved::State(self.state.clone().ok_or(Interrupt::Skip)?),
                Param::Arg { key, form } => {
                    let state = self.state.as_ref().ok_or(Interrupt::Skip)?;
                    let value = match form {
                        ArgForm::PromptResult => state.get(&reject_prompt_result_key(key)),
                        _ => state.get(key),
                    };
                    Resolved::Arg(value)
                }
                Param::Matcher => Resolved::Matcher(self.matcher.clone().ok_or(Interrupt::Skip)?),
                Param::Exception => Resolved::Exception(self.exception.clone()),
                Param::Default => Resolved::Default,
            };
            Ok(resolved)
        }
        .boxed()
    }

    fn solve_dependency<'a>(&'a self, dep: &'a Depends) -> BoxFuture<'a, Result<Value, Interrupt>> {
        async move {
            let cell = self.scope.cache.cell(dep.key());
            if dep.uses_cache() {
                return cell.get_or_try_init(|| dep.solve(self)).await.cloned();
            }
            let value = dep.solve(self).await?;
            if cell.set(Arc::clone(&value)).is_err() {
                trace!(dependency = dep.name(), "Cache already filled, keeping first value");
            }
            Ok(value)
        }
        .boxed()
    }
}

impl<R: Send + 'static> Dependent<R> {
    /// Resolves the parameterless dependencies, then every parameter in
    /// order, then calls the function.
    ///
    /// A scoped result pushes its teardown onto the injector's exit stack.
    pub async fn solve(&self, injector: &Injector) -> Result<R, Interrupt> {
        for dep in &self.parameterless {
            injector.solve_dependency(dep).await?;
        }

        let mut args = Vec::with_capacity(self.params.len());
        for param in &self.params {
            args.push(injector.resolve(param).await?);
        }

        match (self.call)(args).await? {
            Produced::Value(value) => Ok(value),
            Produced::Scoped(value, teardown) => {
                injector.scope.stack.push(self.name, teardown);
                Ok(value)
            }
        }
    }
}
