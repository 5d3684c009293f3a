use herald_core::{DuplicatePolicy, SubscriptionId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EventError, Result};
use crate::registry::{Snapshot, SubscriptionRegistry};
use crate::target::CallbackTarget;
use crate::types::{Signature, TypeRegistry};

/// Whether an event source currently has anyone listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Empty,
    HasSubscribers,
}

/// Proof of one registration. Pass it back to remove exactly that registration.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    event: String,
    id: SubscriptionId,
    target: CallbackTarget,
}

impl SubscriptionHandle {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn target(&self) -> &CallbackTarget {
        &self.target
    }
}

/// One named event: a declared signature plus the targets bound to it.
#[derive(Debug)]
pub struct EventSource {
    name: String,
    signature: Signature,
    registry: SubscriptionRegistry,
}

impl EventSource {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            signature,
            registry: SubscriptionRegistry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn state(&self) -> SourceState {
        if self.registry.count() == 0 {
            SourceState::Empty
        } else {
            SourceState::HasSubscribers
        }
    }

    pub fn count(&self) -> usize {
        self.registry.count()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot()
    }

    /// Bind `target` after checking its signature against the declared one.
    pub fn subscribe(
        &self,
        target: CallbackTarget,
        types: &TypeRegistry,
        duplicates: DuplicatePolicy,
    ) -> Result<SubscriptionHandle> {
        types
            .check_binding(&self.signature, target.signature())
            .map_err(|violation| EventError::SignatureMismatch {
                event: self.name.clone(),
                expected: self.signature.clone(),
                found: target.signature().clone(),
                violation,
            })?;

        let handle_target = target.clone();
        let subscribed = self.registry.subscribe(target, duplicates);
        if subscribed.inserted {
            debug!(
                event = %self.name,
                handler = handle_target.name(),
                subscription = %subscribed.id,
                count = subscribed.count,
                "target subscribed"
            );
            if subscribed.count == 1 {
                debug!(event = %self.name, "event source has subscribers");
            }
        } else {
            debug!(
                event = %self.name,
                handler = handle_target.name(),
                subscription = %subscribed.id,
                "duplicate subscription ignored"
            );
        }

        Ok(SubscriptionHandle {
            event: self.name.clone(),
            id: subscribed.id,
            target: handle_target,
        })
    }

    /// Remove the first registration of `target`. Silent no-op if absent.
    pub fn unsubscribe(&self, target: &CallbackTarget) -> bool {
        match self.registry.unsubscribe(target) {
            Some(id) => {
                self.log_removed(target.name(), id);
                true
            }
            None => false,
        }
    }

    /// Remove exactly the registration behind `handle`. Silent no-op if already gone.
    pub fn unsubscribe_handle(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.registry.unsubscribe_id(handle.id);
        if removed {
            self.log_removed(handle.target.name(), handle.id);
        }
        removed
    }

    fn log_removed(&self, handler: &str, id: SubscriptionId) {
        debug!(event = %self.name, handler, subscription = %id, "target unsubscribed");
        if self.state() == SourceState::Empty {
            debug!(event = %self.name, "event source is empty");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn price_changed() -> EventSource {
        EventSource::new("PriceChanged", Signature::action(["decimal", "decimal"]))
    }

    fn target(name: &str, sig: Signature) -> CallbackTarget {
        CallbackTarget::new(name, sig, |_| Ok(Value::Null))
    }

    #[test]
    fn state_follows_subscriptions() {
        let source = price_changed();
        let types = TypeRegistry::new();
        assert_eq!(source.state(), SourceState::Empty);

        let a = target("a", Signature::action(["decimal", "decimal"]));
        source.subscribe(a.clone(), &types, DuplicatePolicy::Allow).unwrap();
        assert_eq!(source.state(), SourceState::HasSubscribers);

        assert!(source.unsubscribe(&a));
        assert_eq!(source.state(), SourceState::Empty);
    }

    #[test]
    fn mismatched_signature_is_rejected() {
        let source = price_changed();
        let types = TypeRegistry::new();
        let wrong = target("wrong", Signature::action(["int", "int"]));

        let err = source.subscribe(wrong, &types, DuplicatePolicy::Allow).unwrap_err();
        assert_eq!(err.code(), "SIGNATURE_MISMATCH");
        assert_eq!(source.count(), 0);
    }

    #[test]
    fn handle_removes_its_own_registration() {
        let source = price_changed();
        let types = TypeRegistry::new();
        let a = target("a", Signature::action(["decimal", "decimal"]));

        let first = source.subscribe(a.clone(), &types, DuplicatePolicy::Allow).unwrap();
        let second = source.subscribe(a, &types, DuplicatePolicy::Allow).unwrap();
        assert!(source.unsubscribe_handle(&second));
        assert!(!source.unsubscribe_handle(&second));

        let snap = source.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(0).unwrap().id, first.id());
        assert_eq!(first.event(), "PriceChanged");
    }
}
