use std::sync::{Arc, Weak};

use dashmap::DashMap;
use herald_core::DispatchPolicy;
use tracing::debug;

use crate::dispatch::{dispatch, spawn_dispatch, DispatchHandle, DispatchReport};
use crate::error::{DispatchError, EventError, Result};
use crate::source::{EventSource, SourceState, SubscriptionHandle};
use crate::target::{CallbackTarget, EventArgs};
use crate::types::{Signature, TypeRegistry, VarianceViolation};

struct Inner {
    sources: DashMap<String, Arc<EventSource>>,
    types: TypeRegistry,
    policy: DispatchPolicy,
}

/// Owner of a set of named events.
///
/// Cheap to clone: clones share the same events and subscriptions. Targets
/// that need to reach back into the broadcaster should capture a
/// [`WeakBroadcaster`] so the subscription list does not keep its owner alive.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

/// Non-owning reference to a [`Broadcaster`].
#[derive(Clone)]
pub struct WeakBroadcaster {
    inner: Weak<Inner>,
}

impl WeakBroadcaster {
    pub fn upgrade(&self) -> Option<Broadcaster> {
        self.inner.upgrade().map(|inner| Broadcaster { inner })
    }
}

impl Broadcaster {
    pub fn new(types: TypeRegistry, policy: DispatchPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                sources: DashMap::new(),
                types,
                policy,
            }),
        }
    }

    /// Builtin types only, with the given policy.
    pub fn with_policy(policy: DispatchPolicy) -> Self {
        Self::new(TypeRegistry::new(), policy)
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.inner.policy
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.inner.types
    }

    pub fn downgrade(&self) -> WeakBroadcaster {
        WeakBroadcaster {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Create the event `name` with `signature`.
    ///
    /// Declaring an existing event again with the same signature is a no-op;
    /// with a different one it is a `SignatureMismatch`.
    pub fn declare(&self, name: &str, signature: Signature) -> Result<()> {
        self.validate(&signature)?;
        let source = Arc::clone(
            self.inner
                .sources
                .entry(name.to_string())
                .or_insert_with(|| {
                    debug!(event = name, signature = %signature, "event declared");
                    Arc::new(EventSource::new(name, signature.clone()))
                })
                .value(),
        );

        if *source.signature() != signature {
            return Err(EventError::SignatureMismatch {
                event: name.to_string(),
                expected: source.signature().clone(),
                found: signature,
                violation: VarianceViolation::Redeclared,
            });
        }
        Ok(())
    }

    /// Bind `target` to `event`.
    ///
    /// An event that was never declared is created on the spot with the
    /// target's own signature.
    pub fn subscribe(&self, event: &str, target: CallbackTarget) -> Result<SubscriptionHandle> {
        let source = match self.source(event) {
            Some(source) => source,
            None => {
                self.validate(target.signature())?;
                Arc::clone(
                    self.inner
                        .sources
                        .entry(event.to_string())
                        .or_insert_with(|| {
                            debug!(event, signature = %target.signature(), "event created on first subscription");
                            Arc::new(EventSource::new(event, target.signature().clone()))
                        })
                        .value(),
                )
            }
        };
        source.subscribe(target, &self.inner.types, self.inner.policy.duplicates)
    }

    /// Remove the first registration of `target` from `event`. No-op if absent.
    pub fn unsubscribe(&self, event: &str, target: &CallbackTarget) -> bool {
        self.source(event)
            .map(|source| source.unsubscribe(target))
            .unwrap_or(false)
    }

    /// Remove exactly the registration behind `handle`. No-op if already gone.
    pub fn unsubscribe_handle(&self, handle: &SubscriptionHandle) -> bool {
        self.source(handle.event())
            .map(|source| source.unsubscribe_handle(handle))
            .unwrap_or(false)
    }

    /// Invoke every target of `event` on this thread, in registration order.
    ///
    /// Firing an event with no subscribers, or one that was never declared,
    /// returns an empty report.
    pub fn fire(&self, event: &str, args: &EventArgs) -> std::result::Result<DispatchReport, DispatchError> {
        let Some(source) = self.source(event) else {
            return Ok(DispatchReport::empty(event));
        };
        dispatch(event, &source.snapshot(), args, self.inner.policy.failure)
    }

    /// Start every target of `event` on the tokio blocking pool.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime and there is at least one target.
    pub fn fire_async(&self, event: &str, args: EventArgs) -> DispatchHandle {
        let Some(source) = self.source(event) else {
            return DispatchHandle::empty(event, self.inner.policy.failure);
        };
        spawn_dispatch(event, &source.snapshot(), args, self.inner.policy.failure)
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.source(event).map(|s| s.count()).unwrap_or(0)
    }

    pub fn state(&self, event: &str) -> SourceState {
        self.source(event)
            .map(|s| s.state())
            .unwrap_or(SourceState::Empty)
    }

    pub fn signature(&self, event: &str) -> Option<Signature> {
        self.source(event).map(|s| s.signature().clone())
    }

    /// Names of all known events, sorted.
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.sources.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    // Clones the Arc out so no map guard is held while targets run; targets
    // may subscribe or fire on this broadcaster.
    fn source(&self, event: &str) -> Option<Arc<EventSource>> {
        self.inner.sources.get(event).map(|s| Arc::clone(s.value()))
    }

    fn validate(&self, signature: &Signature) -> Result<()> {
        let types = &self.inner.types;
        signature
            .params()
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(signature.result()))
            .find(|name| !types.contains(name))
            .map_or(Ok(()), |name| Err(EventError::UnknownType(name.to_string())))
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::with_policy(DispatchPolicy::default())
    }
}
