use std::fmt;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CallbackError;
use crate::types::Signature;

/// Arguments passed to every target of one `fire`.
///
/// Untyped JSON so the dispatcher stays decoupled from domain structs; the
/// declared [`Signature`] says what each position holds. Targets only ever see
/// a shared reference, so one subscriber cannot alter what the next one sees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventArgs(Vec<Value>);

impl EventArgs {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Decode the argument at `index` into `T`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, CallbackError> {
        let value = self
            .0
            .get(index)
            .ok_or_else(|| CallbackError::failed(format!("missing argument #{index}")))?;
        T::deserialize(value)
            .map_err(|e| CallbackError::failed(format!("argument #{index}: {e}")))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }
}

impl From<Vec<Value>> for EventArgs {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl<const N: usize> From<[Value; N]> for EventArgs {
    fn from(values: [Value; N]) -> Self {
        Self(values.into())
    }
}

/// Anything that can be called with event arguments.
///
/// Handlers must not block for long in sync mode: they run on the thread
/// that called `fire`.
pub trait Invocable: Send + Sync {
    fn invoke(&self, args: &EventArgs) -> Result<Value, CallbackError>;
}

impl<F> Invocable for F
where
    F: Fn(&EventArgs) -> Result<Value, CallbackError> + Send + Sync,
{
    fn invoke(&self, args: &EventArgs) -> Result<Value, CallbackError> {
        self(args)
    }
}

#[derive(Clone)]
enum Binding {
    /// The registration keeps the callable alive.
    Strong(Arc<dyn Invocable>),
    /// The receiver owns the callable; once it is dropped the target is skipped.
    Weak(Weak<dyn Invocable>),
}

/// A callable bound to a signature, ready to be subscribed to an event.
///
/// Equality is identity of the bound callable: clones of one target are
/// equal, two targets built from separate closures are not, even if the
/// closures have the same body.
#[derive(Clone)]
pub struct CallbackTarget {
    name: Arc<str>,
    signature: Signature,
    binding: Binding,
}

impl CallbackTarget {
    pub fn new<F>(name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(&EventArgs) -> Result<Value, CallbackError> + Send + Sync + 'static,
    {
        Self::from_arc(name, signature, Arc::new(f))
    }

    /// Bind an already shared handler. Targets built from the same `Arc` are equal.
    pub fn from_arc(name: impl Into<String>, signature: Signature, handler: Arc<dyn Invocable>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            signature,
            binding: Binding::Strong(handler),
        }
    }

    /// Bind without keeping `receiver` alive.
    pub fn weak<H>(name: impl Into<String>, signature: Signature, receiver: &Arc<H>) -> Self
    where
        H: Invocable + 'static,
    {
        let name: String = name.into();
        let weak: Weak<H> = Arc::downgrade(receiver);
        let weak: Weak<dyn Invocable> = weak;
        Self {
            name: Arc::from(name),
            signature,
            binding: Binding::Weak(weak),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// False once a weakly bound receiver has been dropped.
    pub fn is_alive(&self) -> bool {
        match &self.binding {
            Binding::Strong(_) => true,
            Binding::Weak(w) => w.strong_count() > 0,
        }
    }

    /// The callable, if it still exists.
    pub(crate) fn resolve(&self) -> Option<Arc<dyn Invocable>> {
        match &self.binding {
            Binding::Strong(f) => Some(Arc::clone(f)),
            Binding::Weak(w) => w.upgrade(),
        }
    }

    fn identity(&self) -> *const () {
        match &self.binding {
            Binding::Strong(f) => Arc::as_ptr(f) as *const (),
            Binding::Weak(w) => w.as_ptr() as *const (),
        }
    }
}

impl PartialEq for CallbackTarget {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.identity(), other.identity())
    }
}

impl Eq for CallbackTarget {}

impl fmt::Debug for CallbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTarget")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("weak", &matches!(self.binding, Binding::Weak(_)))
            .finish()
    }
}
