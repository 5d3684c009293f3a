//! `herald-core`: shared building blocks for the herald workspace.
//!
//! Holds the pieces every other crate needs but that carry no dispatch logic
//! of their own: configuration loading, the dispatch policy knobs, id types
//! and the top-level error enum.

pub mod config;
pub mod error;
pub mod policy;
pub mod types;

pub use config::HeraldConfig;
pub use error::{HeraldError, Result};
pub use policy::{DispatchMode, DispatchPolicy, DuplicatePolicy, FailurePolicy};
pub use types::SubscriptionId;
