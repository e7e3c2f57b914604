//! Rules: the conjunction of checkers a matcher requires.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign};
use std::sync::Arc;

use tracing::trace;

use crate::dependent::{Dependent, Injectable, Injector, RULE_PARAMS};
use crate::error::{DependencyError, HandlerError, Interrupt};

/// A rule passes when every checker returns `true`.
///
/// Checkers run one after another in insertion order and stop at the first
/// `false`. A checker that skips counts as `false`; a checker that fails
/// fails the whole check. The empty rule always passes.
///
/// ```rust,ignore
/// let rule = Rule::new(is_weekday)? & to_me();
/// ```
#[derive(Clone, Default)]
pub struct Rule {
    checkers: Vec<Arc<Dependent<bool>>>,
}

impl Rule {
    /// A rule with no checkers, which always passes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A rule with the single checker `f`.
    pub fn new<F, T>(f: F) -> Result<Self, DependencyError>
    where
        F: Injectable<T, bool>,
    {
        Ok(Self::from_dependent(Dependent::parse(f, RULE_PARAMS)?))
    }

    pub(crate) fn from_dependent(checker: Dependent<bool>) -> Self {
        Self {
            checkers: vec![Arc::new(checker)],
        }
    }

    /// Adds the checkers of `other`, skipping ones already present.
    pub fn and(mut self, other: Rule) -> Self {
        for checker in other.checkers {
            if !self.checkers.iter().any(|c| c.key() == checker.key()) {
                self.checkers.push(checker);
            }
        }
        self
    }

    pub fn checkers(&self) -> &[Arc<Dependent<bool>>] {
        &self.checkers
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    /// Runs the checkers.
    pub async fn check(&self, injector: &Injector) -> Result<bool, HandlerError> {
        for checker in &self.checkers {
            match checker.solve(injector).await {
                Ok(true) => {}
                Ok(false) => return Ok(false),
                Err(Interrupt::Failed(err)) => return Err(err),
                Err(signal) => {
                    trace!(checker = checker.name(), %signal, "Rule checker interrupted");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl BitAnd for Rule {
    type Output = Rule;

    fn bitand(self, rhs: Rule) -> Rule {
        self.and(rhs)
    }
}

impl BitAndAssign for Rule {
    fn bitand_assign(&mut self, rhs: Rule) {
        *self = std::mem::take(self).and(rhs);
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.checkers.iter().map(|c| c.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tether_core::BoxedEvent;

    use super::*;
    use crate::testing::{TestEvent, injector};

    async fn always(_: BoxedEvent) -> bool {
        true
    }

    async fn never(_: BoxedEvent) -> bool {
        false
    }

    async fn broken(_: BoxedEvent) -> Result<bool, Interrupt> {
        Err(Interrupt::msg("checker crashed"))
    }

    #[tokio::test]
    async fn empty_rule_passes() {
        let inj = injector(TestEvent::message("hi"));
        assert!(Rule::empty().check(&inj).await.unwrap());
    }

    #[tokio::test]
    async fn stops_at_first_false() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        async fn counted(_: BoxedEvent) -> bool {
            CALLS.fetch_add(1, Ordering::SeqCst);
            true
        }

        let rule = Rule::new(never).unwrap() & Rule::new(counted).unwrap();
        let inj = injector(TestEvent::message("hi"));
        assert!(!rule.check(&inj).await.unwrap());
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failure_propagates() {
        let rule = Rule::new(always).unwrap() & Rule::new(broken).unwrap();
        let inj = injector(TestEvent::message("hi"));
        let err = rule.check(&inj).await.unwrap_err();
        assert_eq!(err.to_string(), "checker crashed");
    }

    #[test]
    fn combining_deduplicates_checkers() {
        let rule = Rule::new(always).unwrap() & Rule::new(always).unwrap() & Rule::new(never).unwrap();
        assert_eq!(rule.len(), 2);
    }

    #[test]
    fn rejects_matcher_parameters() {
        async fn wants_matcher(_: crate::Matcher) -> bool {
            true
        }
        let err = Rule::new(wants_matcher).unwrap_err();
        assert!(err.to_string().contains("matcher"));
    }
}
