//! `herald-events`: typed multicast event dispatch.
//!
//! A [`Broadcaster`] owns named events. Each event has a declared
//! [`Signature`] and an ordered list of [`CallbackTarget`]s; `fire` calls them
//! in registration order against an immutable snapshot of that list.
//!
//! # Guarantees
//!
//! | Concern        | Behaviour                                                        |
//! |----------------|------------------------------------------------------------------|
//! | Ordering       | Registration order at snapshot time (async: start order only)    |
//! | Isolation      | Subscribes/unsubscribes during a fire do not affect that fire    |
//! | Empty events   | `fire` is a no-op returning an empty report                      |
//! | Binding        | Contravariant params, covariant result, checked at subscribe     |
//! | Failures       | Best-effort aggregate by default, fail-fast on request           |
//! | Re-entrancy    | Targets may subscribe, unsubscribe and fire on the same owner    |
//!
//! # Example
//!
//! ```rust
//! use herald_events::{Broadcaster, CallbackTarget, EventArgs, Signature};
//! use serde_json::{json, Value};
//!
//! let stock = Broadcaster::default();
//! let sig = Signature::action(["decimal", "decimal"]);
//! stock.declare("PriceChanged", sig.clone()).unwrap();
//!
//! let printer = CallbackTarget::new("printer", sig, |args| {
//!     let (old, new): (f64, f64) = (args.arg(0)?, args.arg(1)?);
//!     println!("{old} -> {new}");
//!     Ok(Value::Null)
//! });
//! stock.subscribe("PriceChanged", printer).unwrap();
//!
//! let report = stock
//!     .fire("PriceChanged", &EventArgs::from([json!(10.0), json!(12.0)]))
//!     .unwrap();
//! assert_eq!(report.succeeded, 1);
//! ```

pub mod broadcaster;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod source;
pub mod target;
pub mod types;

pub use broadcaster::{Broadcaster, WeakBroadcaster};
pub use dispatch::{DispatchHandle, DispatchReport};
pub use error::{
    AggregateDispatchError, CallbackError, DispatchError, EventError, Result, TargetInvocationError,
};
pub use registry::{Registration, Snapshot, SubscriptionRegistry};
pub use source::{EventSource, SourceState, SubscriptionHandle};
pub use target::{CallbackTarget, EventArgs, Invocable};
pub use types::{Signature, TypeDescriptor, TypeKind, TypeRegistry, VarianceViolation};

pub use herald_core::{DispatchPolicy, DuplicatePolicy, FailurePolicy, SubscriptionId};
