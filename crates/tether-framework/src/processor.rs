//! Hooks around dispatch and around each matcher run.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::dependent::{
    Dependent, EVENT_PROCESSOR_PARAMS, Injectable, Injector, ParamKind, RUN_POSTPROCESSOR_PARAMS,
    RUN_PREPROCESSOR_PARAMS,
};
use crate::error::{DependencyError, Interrupt};
use crate::handler::Outcome;

/// Where a processor runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    /// Before any matcher is checked. Skipping ignores the event.
    EventPre,
    /// After all priorities ran.
    EventPost,
    /// Before a matched instance runs. Skipping cancels that run.
    RunPre,
    /// After an instance ran, with its failure if any.
    RunPost,
}

impl ProcessorKind {
    pub fn allowed_params(self) -> &'static [ParamKind] {
        match self {
            Self::EventPre | Self::EventPost => EVENT_PROCESSOR_PARAMS,
            Self::RunPre => RUN_PREPROCESSOR_PARAMS,
            Self::RunPost => RUN_POSTPROCESSOR_PARAMS,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EventPre => "event preprocessor",
            Self::EventPost => "event postprocessor",
            Self::RunPre => "run preprocessor",
            Self::RunPost => "run postprocessor",
        })
    }
}

/// Whether the guarded step should go ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Proceed,
    Ignore,
}

type Processor = Arc<Dependent<Outcome>>;

/// The four processor lists.
#[derive(Default)]
pub struct Processors {
    lists: [RwLock<Vec<Processor>>; 4],
}

impl Processors {
    /// Registers `f` as a processor of `kind`.
    pub fn add<F, T>(&self, kind: ProcessorKind, f: F) -> Result<(), DependencyError>
    where
        F: Injectable<T, Outcome>,
    {
        let processor = Dependent::parse(f, kind.allowed_params())?;
        debug!(%kind, processor = processor.name(), "Registering processor");
        self.lists[kind.index()].write().push(Arc::new(processor));
        Ok(())
    }

    pub fn len(&self, kind: ProcessorKind) -> usize {
        self.lists[kind.index()].read().len()
    }

    pub fn clear(&self) {
        for list in &self.lists {
            list.write().clear();
        }
    }

    /// Runs every processor of `kind` concurrently.
    ///
    /// Any processor skipping yields [`Verdict::Ignore`]. A failure is logged;
    /// for preprocessors it also yields `Ignore`.
    pub(crate) async fn run(&self, kind: ProcessorKind, injector: &Injector) -> Verdict {
        let processors = self.lists[kind.index()].read().clone();
        if processors.is_empty() {
            return Verdict::Proceed;
        }

        let results = join_all(processors.iter().map(|p| p.solve(injector))).await;
        let mut verdict = Verdict::Proceed;
        for (processor, result) in processors.iter().zip(results) {
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(Interrupt::Failed(err)) => {
                    error!(%kind, processor = processor.name(), error = %err, "Processor failed");
                    if matches!(kind, ProcessorKind::EventPre | ProcessorKind::RunPre) {
                        verdict = Verdict::Ignore;
                    }
                    continue;
                }
                Err(signal) => match signal.into_outcome() {
                    Ok(outcome) => outcome,
                    Err(_) => continue,
                },
            };
            if outcome == Outcome::Skip {
                debug!(%kind, processor = processor.name(), "Processor asked to ignore");
                verdict = Verdict::Ignore;
            }
        }
        verdict
    }
}

impl fmt::Debug for Processors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processors")
            .field("event_pre", &self.len(ProcessorKind::EventPre))
            .field("event_post", &self.len(ProcessorKind::EventPost))
            .field("run_pre", &self.len(ProcessorKind::RunPre))
            .field("run_post", &self.len(ProcessorKind::RunPost))
            .finish()
    }
}
