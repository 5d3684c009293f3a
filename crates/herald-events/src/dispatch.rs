//! Invocation of a snapshot under a failure policy.
//!
//! ## Sync
//! ```text
//! fire(args)
//!   └─ snapshot ──► target 0 ──► target 1 ──► ... ──► target N-1 ──► report
//!                      │ Err / panic
//!                      ├─ best-effort: record, continue
//!                      └─ fail-fast:   stop, report what already ran
//! ```
//!
//! ## Async
//! Every live target is handed to the blocking pool in snapshot order, so only
//! the *start* order is guaranteed. [`DispatchHandle::wait`] collects results
//! in snapshot order; under fail-fast it aborts whatever has not been collected
//! once the first failure is seen.
//!
//! Panics inside a target are caught and reported as
//! [`CallbackError::Panicked`]; they never unwind into the broadcaster.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use herald_core::{FailurePolicy, SubscriptionId};
use serde::Serialize;
use serde_json::Value;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

use crate::error::{AggregateDispatchError, CallbackError, DispatchError, TargetInvocationError};
use crate::registry::Snapshot;
use crate::target::{EventArgs, Invocable};

/// What a completed `fire` did.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub event: String,
    /// Targets that were called (successfully or not).
    pub attempted: usize,
    pub succeeded: usize,
    /// Weakly bound targets whose receiver was already gone.
    pub skipped: usize,
    /// Value returned by the last successful target, multicast style.
    pub last_value: Option<Value>,
    /// Wall-clock duration of the whole dispatch in milliseconds.
    pub duration_ms: u64,
    pub fired_at: DateTime<Utc>,
}

impl DispatchReport {
    /// Report for a fire that found nobody listening.
    pub(crate) fn empty(event: &str) -> Self {
        Self::new(event, Utc::now())
    }

    fn new(event: &str, fired_at: DateTime<Utc>) -> Self {
        Self {
            event: event.to_string(),
            attempted: 0,
            succeeded: 0,
            skipped: 0,
            last_value: None,
            duration_ms: 0,
            fired_at,
        }
    }

    /// True when nobody was listening.
    pub fn is_empty(&self) -> bool {
        self.attempted == 0 && self.skipped == 0
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Call `handler`, turning a panic into an error.
fn invoke_guarded(handler: &dyn Invocable, args: &EventArgs) -> Result<Value, CallbackError> {
    match catch_unwind(AssertUnwindSafe(|| handler.invoke(args))) {
        Ok(result) => result,
        Err(payload) => Err(CallbackError::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Running totals for one dispatch, shared by the sync and async paths.
struct Tally {
    report: DispatchReport,
    policy: FailurePolicy,
    failures: AggregateDispatchError,
    invoked: Vec<String>,
}

impl Tally {
    fn new(event: &str, policy: FailurePolicy, fired_at: DateTime<Utc>) -> Self {
        Self {
            report: DispatchReport::new(event, fired_at),
            policy,
            failures: AggregateDispatchError::new(event),
            invoked: Vec::new(),
        }
    }

    fn skip(&mut self, index: usize, name: &str) {
        self.report.skipped += 1;
        debug!(event = %self.report.event, handler = name, index, "receiver dropped, target skipped");
    }

    /// Record one outcome. Returns the failure when the policy says to stop.
    fn record(
        &mut self,
        index: usize,
        name: &str,
        subscription: SubscriptionId,
        result: Result<Value, CallbackError>,
    ) -> Option<TargetInvocationError> {
        self.report.attempted += 1;
        let source = match result {
            Ok(value) => {
                self.report.succeeded += 1;
                self.report.last_value = Some(value);
                self.invoked.push(name.to_string());
                return None;
            }
            Err(source) => source,
        };

        match &source {
            CallbackError::Panicked(msg) => {
                error!(event = %self.report.event, handler = name, index, panic = %msg, "target panicked")
            }
            CallbackError::Failed(msg) => {
                warn!(event = %self.report.event, handler = name, index, error = %msg, "target failed")
            }
        }

        let err = TargetInvocationError {
            index,
            target: name.to_string(),
            subscription,
            source,
        };
        match self.policy {
            FailurePolicy::FailFast => Some(err),
            FailurePolicy::BestEffort => {
                self.failures.push(err);
                None
            }
        }
    }

    fn abort(self, error: TargetInvocationError, remaining: usize) -> DispatchError {
        warn!(
            event = %self.report.event,
            invoked = self.invoked.len(),
            remaining,
            "dispatch aborted"
        );
        DispatchError::Aborted {
            event: self.report.event,
            error,
            invoked: self.invoked,
            remaining,
        }
    }

    fn finish(mut self, started: Instant) -> Result<DispatchReport, DispatchError> {
        self.report.duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            event = %self.report.event,
            attempted = self.report.attempted,
            failed = self.failures.len(),
            duration_ms = self.report.duration_ms,
            "dispatch completed"
        );
        if self.failures.is_empty() {
            Ok(self.report)
        } else {
            Err(DispatchError::Aggregate(self.failures))
        }
    }
}

/// Invoke every target of `snapshot` on the calling thread, in order.
pub fn dispatch(
    event: &str,
    snapshot: &Snapshot,
    args: &EventArgs,
    policy: FailurePolicy,
) -> Result<DispatchReport, DispatchError> {
    let fired_at = Utc::now();
    if snapshot.is_empty() {
        return Ok(DispatchReport::new(event, fired_at));
    }

    let started = Instant::now();
    let mut tally = Tally::new(event, policy, fired_at);

    for (index, reg) in snapshot.iter().enumerate() {
        let name = reg.target.name();
        let Some(handler) = reg.target.resolve() else {
            tally.skip(index, name);
            continue;
        };

        let t = Instant::now();
        let result = invoke_guarded(handler.as_ref(), args);
        debug!(
            event,
            handler = name,
            index,
            duration_ms = t.elapsed().as_millis() as u64,
            "target invoked"
        );

        if let Some(err) = tally.record(index, name, reg.id, result) {
            // Dead weak targets further on would have been skipped, not attempted.
            let remaining = snapshot
                .iter()
                .skip(index + 1)
                .filter(|r| r.target.is_alive())
                .count();
            return Err(tally.abort(err, remaining));
        }
    }

    tally.finish(started)
}

struct Pending {
    index: usize,
    name: String,
    subscription: SubscriptionId,
    task: JoinHandle<Result<Value, CallbackError>>,
}

/// In-flight asynchronous dispatch.
///
/// Dropping the handle without calling [`wait`](Self::wait) detaches the
/// tasks: they still run, but nobody observes their results.
pub struct DispatchHandle {
    event: String,
    policy: FailurePolicy,
    pending: Vec<Pending>,
    skipped: usize,
    fired_at: DateTime<Utc>,
    started: Instant,
}

impl DispatchHandle {
    /// A handle with nothing in flight; `wait` returns an empty report.
    pub(crate) fn empty(event: &str, policy: FailurePolicy) -> Self {
        Self {
            event: event.to_string(),
            policy,
            pending: Vec::new(),
            skipped: 0,
            fired_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Number of targets handed to the runtime.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Cancel every target that has not started yet. Running targets finish.
    pub fn abort(&self) {
        for p in &self.pending {
            p.task.abort();
        }
    }

    /// Wait for every target and report in snapshot order.
    ///
    /// Under fail-fast, targets later in the snapshot that already completed
    /// successfully are still listed as invoked; `remaining` counts only the
    /// ones that had not finished when the failure was collected.
    pub async fn wait(self) -> Result<DispatchReport, DispatchError> {
        let mut tally = Tally::new(&self.event, self.policy, self.fired_at);
        tally.report.skipped = self.skipped;

        let mut pending = self.pending.into_iter();
        while let Some(p) = pending.next() {
            let result = flatten(p.task.await);
            if let Some(err) = tally.record(p.index, &p.name, p.subscription, result) {
                let remaining = tally.settle(pending).await;
                return Err(tally.abort(err, remaining));
            }
        }

        tally.finish(self.started)
    }
}

impl Tally {
    /// Sort the tasks left after a fail-fast stop: finished successes join
    /// `invoked`, unfinished ones are aborted and counted.
    ///
    /// `spawn_blocking` tasks cannot be interrupted once running, so an
    /// aborted task may still complete in the background.
    async fn settle(&mut self, rest: impl Iterator<Item = Pending>) -> usize {
        let mut remaining = 0;
        for r in rest {
            if !r.task.is_finished() {
                r.task.abort();
                remaining += 1;
                continue;
            }
            if let Ok(Ok(_)) = r.task.await {
                self.invoked.push(r.name);
            }
        }
        remaining
    }
}

fn flatten(joined: Result<Result<Value, CallbackError>, JoinError>) -> Result<Value, CallbackError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(CallbackError::failed("cancelled before completion")),
        Err(e) => Err(CallbackError::Panicked(e.to_string())),
    }
}

/// Start every target of `snapshot` on tokio's blocking pool, in order.
///
/// # Panics
/// Panics when called outside a tokio runtime.
pub fn spawn_dispatch(
    event: &str,
    snapshot: &Snapshot,
    args: EventArgs,
    policy: FailurePolicy,
) -> DispatchHandle {
    let mut handle = DispatchHandle::empty(event, policy);
    if snapshot.is_empty() {
        return handle;
    }

    let args = Arc::new(args);
    handle.pending.reserve(snapshot.len());
    for (index, reg) in snapshot.iter().enumerate() {
        let Some(handler) = reg.target.resolve() else {
            handle.skipped += 1;
            debug!(event, handler = reg.target.name(), index, "receiver dropped, target skipped");
            continue;
        };
        let args = Arc::clone(&args);
        let task = tokio::task::spawn_blocking(move || invoke_guarded(handler.as_ref(), &args));
        handle.pending.push(Pending {
            index,
            name: reg.target.name().to_string(),
            subscription: reg.id,
            task,
        });
    }
    debug!(event, spawned = handle.pending.len(), "async dispatch started");
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubscriptionRegistry;
    use crate::target::CallbackTarget;
    use crate::types::Signature;
    use herald_core::DuplicatePolicy;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> CallbackTarget {
        let log = Arc::clone(log);
        let label = name.to_string();
        CallbackTarget::new(name, Signature::action(["int"]), move |args| {
            log.lock().unwrap().push(format!("{label}({})", args.arg::<i64>(0)?));
            Ok(json!(label))
        })
    }

    fn failing(name: &str) -> CallbackTarget {
        CallbackTarget::new(name, Signature::action(["int"]), |_| Err(CallbackError::failed("boom")))
    }

    fn panicking(name: &str) -> CallbackTarget {
        CallbackTarget::new(name, Signature::action(["int"]), |_| panic!("kaboom"))
    }

    fn snapshot_of(targets: Vec<CallbackTarget>) -> Snapshot {
        let reg = SubscriptionRegistry::new();
        for t in targets {
            reg.subscribe(t, DuplicatePolicy::Allow);
        }
        reg.snapshot()
    }

    #[test]
    fn empty_snapshot_is_a_no_op() {
        let report = dispatch("e", &Snapshot::default(), &EventArgs::default(), FailurePolicy::BestEffort)
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(report.last_value, None);
    }

    #[test]
    fn best_effort_runs_everyone() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let snap = snapshot_of(vec![recorder(&log, "a"), failing("b"), recorder(&log, "c")]);

        let err = dispatch("e", &snap, &EventArgs::from([json!(1)]), FailurePolicy::BestEffort)
            .unwrap_err();
        assert_eq!(*log.lock().unwrap(), ["a(1)", "c(1)"]);

        let DispatchError::Aggregate(agg) = err else {
            panic!("expected aggregate error");
        };
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.errors[0].index, 1);
        assert_eq!(agg.errors[0].target, "b");
    }

    #[test]
    fn fail_fast_stops_at_first_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let snap = snapshot_of(vec![recorder(&log, "a"), failing("b"), recorder(&log, "c")]);

        let err = dispatch("e", &snap, &EventArgs::from([json!(1)]), FailurePolicy::FailFast)
            .unwrap_err();
        assert_eq!(*log.lock().unwrap(), ["a(1)"]);
        match err {
            DispatchError::Aborted {
                invoked, remaining, error, ..
            } => {
                assert_eq!(invoked, ["a"]);
                assert_eq!(remaining, 1);
                assert_eq!(error.target, "b");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn panic_is_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let snap = snapshot_of(vec![panicking("p"), recorder(&log, "after")]);

        let err = dispatch("e", &snap, &EventArgs::from([json!(7)]), FailurePolicy::BestEffort)
            .unwrap_err();
        assert_eq!(*log.lock().unwrap(), ["after(7)"]);
        let failures = err.failures();
        assert_eq!(failures[0].source, CallbackError::Panicked("kaboom".into()));
    }

    #[test]
    fn last_value_comes_from_last_target() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let snap = snapshot_of(vec![recorder(&log, "a"), recorder(&log, "b")]);

        let report = dispatch("e", &snap, &EventArgs::from([json!(2)]), FailurePolicy::BestEffort)
            .unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.last_value, Some(json!("b")));
    }

    #[tokio::test]
    async fn async_dispatch_reports_in_snapshot_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let snap = snapshot_of(vec![recorder(&log, "a"), failing("b"), recorder(&log, "c")]);

        let handle = spawn_dispatch("e", &snap, EventArgs::from([json!(3)]), FailurePolicy::BestEffort);
        assert_eq!(handle.len(), 3);

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.failures().len(), 1);

        let mut seen = log.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, ["a(3)", "c(3)"]);
    }

    struct Gone;

    impl Invocable for Gone {
        fn invoke(&self, _args: &EventArgs) -> Result<Value, CallbackError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn fail_fast_remaining_skips_dead_weak_targets() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let receiver = Arc::new(Gone);
        let dead = CallbackTarget::weak("dead", Signature::action(["int"]), &receiver);
        let snap = snapshot_of(vec![failing("a"), dead, recorder(&log, "c")]);
        drop(receiver);

        let err = dispatch("e", &snap, &EventArgs::from([json!(1)]), FailurePolicy::FailFast)
            .unwrap_err();
        let DispatchError::Aborted { remaining, .. } = err else {
            panic!("expected abort");
        };
        assert_eq!(remaining, 1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn async_panic_is_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let snap = snapshot_of(vec![panicking("p"), recorder(&log, "after")]);

        let err = spawn_dispatch("e", &snap, EventArgs::from([json!(5)]), FailurePolicy::BestEffort)
            .wait()
            .await
            .unwrap_err();
        assert_eq!(*log.lock().unwrap(), ["after(5)"]);
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].target, "p");
        assert_eq!(failures[0].source, CallbackError::Panicked("kaboom".into()));
    }

    #[tokio::test]
    async fn async_empty_snapshot_spawns_nothing() {
        let handle = spawn_dispatch("e", &Snapshot::default(), EventArgs::default(), FailurePolicy::FailFast);
        assert!(handle.is_empty());
        assert!(handle.wait().await.unwrap().is_empty());
    }
}
