// ── Generic entity collection ──
//
// Lock-free concurrent storage keyed by entity id. Every mutation bumps
// a change counter that collections of one store share, so a single
// `watch` receiver observes the whole topology.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A lock-free collection for a single entity type.
///
/// Reads hand out `Arc<T>` clones; writes replace the whole entity.
/// Listing operations return entities sorted by key so callers iterate
/// in a stable order.
pub(crate) struct EntityCollection<K, T>
where
    K: Clone + Eq + Hash + Ord + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    by_id: DashMap<K, Arc<T>>,

    /// Change counter, bumped on every mutation.
    changes: Arc<watch::Sender<u64>>,
}

impl<K, T> EntityCollection<K, T>
where
    K: Clone + Eq + Hash + Ord + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    pub(crate) fn new(changes: Arc<watch::Sender<u64>>) -> Self {
        Self {
            by_id: DashMap::new(),
            changes,
        }
    }

    /// Insert or replace an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, id: K, entity: T) -> bool {
        let is_new = self.by_id.insert(id, Arc::new(entity)).is_none();
        self.bump_version();
        is_new
    }

    /// Remove an entity. Returns it if it existed.
    pub(crate) fn remove(&self, id: &K) -> Option<Arc<T>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.bump_version();
        }
        removed
    }

    pub(crate) fn get(&self, id: &K) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// All entities, ordered by key.
    pub(crate) fn all(&self) -> Vec<Arc<T>> {
        self.filter(|_| true)
    }

    /// Entities matching `pred`, ordered by key.
    pub(crate) fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<Arc<T>> {
        let mut hits: Vec<(K, Arc<T>)> = self
            .by_id
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        hits.sort_by(|(a, _), (b, _)| a.cmp(b));
        hits.into_iter().map(|(_, v)| v).collect()
    }

    /// First entity (lowest key) matching `pred`.
    pub(crate) fn find(&self, pred: impl Fn(&T) -> bool) -> Option<Arc<T>> {
        self.by_id
            .iter()
            .filter(|r| pred(r.value()))
            .min_by(|a, b| a.key().cmp(b.key()))
            .map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn max_key(&self) -> Option<K> {
        self.by_id.iter().map(|r| r.key().clone()).max()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn bump_version(&self) {
        // `send_modify` updates unconditionally, even with zero receivers.
        self.changes.send_modify(|v| *v += 1);
    }
}
