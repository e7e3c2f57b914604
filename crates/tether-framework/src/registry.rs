//! The shared priority-ordered matcher registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;

use crate::matcher::MatcherTemplate;

/// Matcher templates grouped by priority, lower first.
///
/// Clones share the same registry. Within a priority, templates keep their
/// insertion order. Readers take snapshots, so a dispatch in progress never
/// observes a bucket changing under it.
#[derive(Clone, Default)]
pub struct MatcherRegistry {
    buckets: Arc<RwLock<BTreeMap<i32, Vec<Arc<MatcherTemplate>>>>>,
}

impl MatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a template to its priority bucket.
    pub fn insert(&self, template: Arc<MatcherTemplate>) {
        debug!(matcher = %template, priority = template.priority(), "Registering matcher");
        self.buckets
            .write()
            .entry(template.priority())
            .or_default()
            .push(template);
    }

    /// Removes a template by identity. Returns false if it was not present.
    pub fn remove(&self, template: &Arc<MatcherTemplate>) -> bool {
        let mut buckets = self.buckets.write();
        let Some(bucket) = buckets.get_mut(&template.priority()) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|t| !Arc::ptr_eq(t, template));
        let removed = bucket.len() != before;
        if bucket.is_empty() {
            buckets.remove(&template.priority());
        }
        removed
    }

    pub fn contains(&self, template: &Arc<MatcherTemplate>) -> bool {
        self.buckets
            .read()
            .get(&template.priority())
            .is_some_and(|bucket| bucket.iter().any(|t| Arc::ptr_eq(t, template)))
    }

    /// Priorities that currently hold templates, ascending.
    pub fn priorities(&self) -> Vec<i32> {
        self.buckets.read().keys().copied().collect()
    }

    /// A copy of one priority bucket.
    pub fn snapshot(&self, priority: i32) -> Vec<Arc<MatcherTemplate>> {
        self.buckets
            .read()
            .get(&priority)
            .cloned()
            .unwrap_or_default()
    }

    /// A copy of every template, by ascending priority.
    pub fn all(&self) -> Vec<Arc<MatcherTemplate>> {
        self.buckets.read().values().flatten().cloned().collect()
    }

    /// Removes every template that expired at or before `now`.
    pub fn sweep_expired(&self, now: SystemTime) -> usize {
        let mut buckets = self.buckets.write();
        let mut removed = 0;
        buckets.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|t| !t.is_expired(now));
            removed += before - bucket.len();
            !bucket.is_empty()
        });
        if removed > 0 {
            debug!(removed, "Removed expired matchers");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.buckets.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    pub fn clear(&self) {
        self.buckets.write().clear();
    }
}

impl std::fmt::Debug for MatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.buckets.read().iter().map(|(p, b)| (p, b.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::matcher::on;

    fn template(priority: i32) -> Arc<MatcherTemplate> {
        on("message").priority(priority).build().unwrap()
    }

    #[test]
    fn priorities_are_ascending_and_buckets_keep_order() {
        let registry = MatcherRegistry::new();
        let (a, b, c) = (template(5), template(1), template(5));
        registry.insert(a.clone());
        registry.insert(b.clone());
        registry.insert(c.clone());

        assert_eq!(registry.priorities(), vec![1, 5]);
        let bucket = registry.snapshot(5);
        assert!(Arc::ptr_eq(&bucket[0], &a));
        assert!(Arc::ptr_eq(&bucket[1], &c));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn removal_is_by_identity_and_drops_empty_buckets() {
        let registry = MatcherRegistry::new();
        let a = template(1);
        registry.insert(a.clone());
        assert!(!registry.remove(&template(1)));
        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        assert!(registry.is_empty());
        assert!(registry.priorities().is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let registry = MatcherRegistry::new();
        let now = SystemTime::now();
        let stale = on("message")
            .expire_at(now - Duration::from_secs(1))
            .build()
            .unwrap();
        let fresh = on("message")
            .expire_at(now + Duration::from_secs(60))
            .build()
            .unwrap();
        registry.insert(stale.clone());
        registry.insert(fresh.clone());

        assert_eq!(registry.sweep_expired(now), 1);
        assert!(!registry.contains(&stale));
        assert!(registry.contains(&fresh));
    }
}
