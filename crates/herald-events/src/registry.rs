//! Ordered, copy-on-write list of registrations for one event source.
//!
//! Writers take the lock only long enough to swap in a new list; readers
//! clone the current `Arc` and walk it without holding anything. A dispatch
//! therefore never blocks a subscribe, and a subscribe never changes what an
//! in-flight dispatch sees.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use herald_core::{DuplicatePolicy, SubscriptionId};
use tracing::debug;

use crate::target::CallbackTarget;

#[derive(Debug, Clone)]
pub struct Registration {
    pub id: SubscriptionId,
    pub target: CallbackTarget,
}

/// Immutable point-in-time view of a subscription list.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: Arc<Vec<Registration>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Registration> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Registration> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Registration;
    type IntoIter = std::slice::Iter<'a, Registration>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Outcome of [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribed {
    pub id: SubscriptionId,
    /// False when deduplication returned an existing registration.
    pub inserted: bool,
    /// Live registrations after the call.
    pub count: usize,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Arc<Vec<Registration>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The list is only published by a single assignment, so a poisoned lock
    // still guards a complete list.
    fn read(&self) -> RwLockReadGuard<'_, Arc<Vec<Registration>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<Vec<Registration>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to a private copy of the list, then publish it.
    ///
    /// Dead weak registrations are dropped on the way. The previous list is
    /// released after the lock, so a handler whose last reference goes away
    /// here is never destroyed while writers are blocked.
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Registration>) -> R) -> R {
        let mut guard = self.write();
        let mut next: Vec<Registration> =
            guard.iter().filter(|r| r.target.is_alive()).cloned().collect();
        let pruned = guard.len() - next.len();
        let out = f(&mut next);
        let previous = std::mem::replace(&mut *guard, Arc::new(next));
        drop(guard);
        drop(previous);
        if pruned > 0 {
            debug!(pruned, "dropped dead weak registrations");
        }
        out
    }

    /// Append `target`. Under [`DuplicatePolicy::Deduplicate`] an equal target
    /// already in the list is returned instead.
    pub fn subscribe(&self, target: CallbackTarget, duplicates: DuplicatePolicy) -> Subscribed {
        self.mutate(|list| {
            if duplicates == DuplicatePolicy::Deduplicate {
                if let Some(existing) = list.iter().find(|r| r.target == target) {
                    return Subscribed {
                        id: existing.id,
                        inserted: false,
                        count: list.len(),
                    };
                }
            }
            let id = SubscriptionId::new();
            list.push(Registration { id, target });
            Subscribed {
                id,
                inserted: true,
                count: list.len(),
            }
        })
    }

    /// Remove the first registration of an equal target. Absent targets are a no-op.
    pub fn unsubscribe(&self, target: &CallbackTarget) -> Option<SubscriptionId> {
        self.mutate(|list| {
            let pos = list.iter().position(|r| r.target == *target)?;
            Some(list.remove(pos).id)
        })
    }

    /// Remove exactly the registration `id`. Absent ids are a no-op.
    pub fn unsubscribe_id(&self, id: SubscriptionId) -> bool {
        self.mutate(|list| match list.iter().position(|r| r.id == id) {
            Some(pos) => {
                list.remove(pos);
                true
            }
            None => false,
        })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: Arc::clone(&self.read()),
        }
    }

    /// Registrations whose callable is still alive.
    pub fn count(&self) -> usize {
        self.read().iter().filter(|r| r.target.is_alive()).count()
    }

    /// Drop dead weak registrations; returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.read().len();
        let after = self.mutate(|list| list.len());
        before.saturating_sub(after)
    }
}
