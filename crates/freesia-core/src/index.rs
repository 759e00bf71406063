//! Event type → priority-ordered handler buckets.
//!
//! Buckets are immutable `Arc<[_]>` slices replaced wholesale on every
//! mutation. Dispatch clones the `Arc` and iterates that snapshot without
//! holding any lock; a concurrent register/unregister publishes a new slice
//! and never touches the one being iterated.
//!
//! Writers are serialized by the bus registration lock, which every mutating
//! method takes as a witness. New buckets are built outside the map and
//! swapped in, so readers only ever contend with the final store.

use crate::handler::HandlerDescriptor;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::MutexGuard;
use std::any::TypeId;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;

/// Snapshot of one event type's handlers, highest priority first.
pub(crate) type Bucket = Arc<[Arc<HandlerDescriptor>]>;

/// Proof that the caller holds the registration lock.
pub(crate) type WriteGuard<'a> = MutexGuard<'a, ()>;

#[derive(Default)]
pub(crate) struct TypeIndex {
    buckets: DashMap<TypeId, Bucket>,
}

impl TypeIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn snapshot(&self, event_type: TypeId) -> Option<Bucket> {
        self.buckets
            .get(&event_type)
            .map(|bucket| Arc::clone(bucket.value()))
    }

    /// Append `added` to the bucket for `event_type` and re-sort.
    ///
    /// The sort is stable, so equal priorities keep insertion order: handlers
    /// already present stay ahead of the ones being added.
    pub(crate) fn merge(
        &self,
        _guard: &WriteGuard<'_>,
        event_type: TypeId,
        added: &[Arc<HandlerDescriptor>],
    ) {
        if added.is_empty() {
            return;
        }

        let current = self.snapshot(event_type);
        let mut next: Vec<Arc<HandlerDescriptor>> = current
            .iter()
            .flat_map(|bucket| bucket.iter())
            .chain(added)
            .cloned()
            .collect();
        next.sort_by_key(|descriptor| Reverse(descriptor.priority()));

        self.buckets.insert(event_type, next.into());
    }

    /// Remove exactly `removed` (by identity) from the bucket for
    /// `event_type`. An emptied bucket is dropped from the index.
    ///
    /// Returns the number of descriptors removed.
    pub(crate) fn remove(
        &self,
        _guard: &WriteGuard<'_>,
        event_type: TypeId,
        removed: &[Arc<HandlerDescriptor>],
    ) -> usize {
        let Some(current) = self.snapshot(event_type) else {
            return 0;
        };

        let doomed: HashSet<*const HandlerDescriptor> = removed.iter().map(Arc::as_ptr).collect();
        let remaining: Vec<Arc<HandlerDescriptor>> = current
            .iter()
            .filter(|descriptor| !doomed.contains(&Arc::as_ptr(*descriptor)))
            .cloned()
            .collect();
        let count = current.len() - remaining.len();

        match self.buckets.entry(event_type) {
            Entry::Occupied(slot) if remaining.is_empty() => {
                slot.remove();
            }
            Entry::Occupied(mut slot) => {
                slot.insert(remaining.into());
            }
            Entry::Vacant(_) => {}
        }
        count
    }

    pub(crate) fn handler_count(&self, event_type: TypeId) -> usize {
        self.buckets
            .get(&event_type)
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
