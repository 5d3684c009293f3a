use serde::{Deserialize, Serialize};

/// What `fire` does when a target returns an error or panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop at the first failing target; the rest of the snapshot is not attempted.
    FailFast,
    /// Attempt every target, then report all failures together.
    #[default]
    BestEffort,
}

/// How a second subscription of an equal target is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Each registration is invoked once per fire, so a target added twice runs twice.
    #[default]
    Allow,
    /// Subscribing an already registered target returns the existing registration.
    Deduplicate,
}

/// Where target invocations run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// On the caller's thread, one after another, in snapshot order.
    #[default]
    Sync,
    /// One tokio task per target, spawned in snapshot order.
    Async,
}

/// Dispatch rules shared by every event source of one broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchPolicy {
    #[serde(default)]
    pub failure: FailurePolicy,
    #[serde(default)]
    pub duplicates: DuplicatePolicy,
}

impl DispatchPolicy {
    pub fn fail_fast() -> Self {
        Self {
            failure: FailurePolicy::FailFast,
            ..Self::default()
        }
    }

    pub fn with_failure(mut self, failure: FailurePolicy) -> Self {
        self.failure = failure;
        self
    }

    pub fn with_duplicates(mut self, duplicates: DuplicatePolicy) -> Self {
        self.duplicates = duplicates;
        self
    }
}
