//! Shard base: identity, lifecycle state, cancellation, and fact emission
//!
//! Every long-running component ("shard") embeds a [`ShardCore`]. The core
//! owns the shard's identity, its lifecycle state machine, and the
//! cancellation token that every suspension point derives from. State
//! transitions are mirrored into the fact base so other shards can observe
//! them.

use crate::error::{PraxisError, Result};
use crate::fact::{predicates, Fact, Term};
use crate::factbase::FactBase;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shard lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    /// Constructed, worker not yet started
    Idle,
    /// Worker loop is running
    Running,
    /// Worker exited cleanly (including cooperative cancellation)
    Completed,
    /// Worker exited with an error or panicked
    Failed,
}

impl ShardState {
    /// Atom representation used in `shard_status` facts.
    pub fn as_atom(&self) -> &'static str {
        match self {
            ShardState::Idle => "/idle",
            ShardState::Running => "/running",
            ShardState::Completed => "/completed",
            ShardState::Failed => "/failed",
        }
    }
}

/// Shared base embedded by every core shard.
pub struct ShardCore {
    id: String,
    state: RwLock<ShardState>,
    cancel: CancellationToken,
    facts: Arc<dyn FactBase>,
}

impl ShardCore {
    /// Create a new core in the `Idle` state.
    pub fn new(id: impl Into<String>, facts: Arc<dyn FactBase>) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(ShardState::Idle),
            cancel: CancellationToken::new(),
            facts,
        }
    }

    /// Shard identity.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The shared fact base.
    pub fn facts(&self) -> &Arc<dyn FactBase> {
        &self.facts
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ShardState {
        *self.state.read().await
    }

    /// Request cooperative shutdown.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether shutdown has been requested.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for the shard's own loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Derived token for a blocking operation inside a tick; cancelling the
    /// shard cancels the child.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Assert a fact, logging and swallowing failures. A stuck assert must
    /// not stall a tick; tests check the positive presence of facts instead.
    pub async fn emit(&self, fact: Fact) {
        if let Err(e) = self.facts.assert(fact.clone()).await {
            tracing::warn!(shard = %self.id, fact = %fact, error = %e, "failed to assert fact");
        }
    }

    /// Retract a fact, logging and swallowing failures.
    pub async fn withdraw(&self, fact: &Fact) {
        if let Err(e) = self.facts.retract(fact).await {
            tracing::warn!(shard = %self.id, fact = %fact, error = %e, "failed to retract fact");
        }
    }

    /// Emit a liveness heartbeat for this shard.
    pub async fn heartbeat(&self) {
        self.emit(Fact::new(
            predicates::SHARD_HEARTBEAT,
            vec![
                Term::str(&self.id),
                Term::int(chrono::Utc::now().timestamp()),
            ],
        ))
        .await;
    }

    /// Transition to `state` and mirror the transition into the fact base.
    pub async fn set_state(&self, state: ShardState) {
        {
            let mut current = self.state.write().await;
            *current = state;
        }
        self.emit(Fact::new(
            predicates::SHARD_STATUS,
            vec![
                Term::str(&self.id),
                Term::atom(state.as_atom()),
                Term::int(chrono::Utc::now().timestamp()),
            ],
        ))
        .await;
    }

    /// Transition to `Failed` and record the reason.
    pub async fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(shard = %self.id, %reason, "shard failed");
        self.set_state(ShardState::Failed).await;
        self.emit(Fact::new(
            predicates::SHARD_FAILURE,
            vec![
                Term::str(&self.id),
                Term::str(reason),
                Term::int(chrono::Utc::now().timestamp()),
            ],
        ))
        .await;
    }
}

/// Run a shard worker on its own task with safe-exit semantics.
///
/// The worker body runs on an inner task so a panic is contained: the shard
/// transitions to `Failed` and emits a failure fact instead of taking the
/// process down. Clean returns and cooperative cancellation both end in
/// `Completed`.
pub fn spawn_supervised<F>(core: Arc<ShardCore>, worker: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        core.set_state(ShardState::Running).await;
        let inner = tokio::spawn(worker);
        match inner.await {
            Ok(Ok(())) | Ok(Err(PraxisError::Cancelled)) => {
                core.set_state(ShardState::Completed).await;
            }
            Ok(Err(e)) => {
                core.fail(e.to_string()).await;
            }
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "worker panicked".to_string()
                } else {
                    format!("worker aborted: {}", join_err)
                };
                core.fail(reason).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factbase::InMemoryFactBase;

    fn core(id: &str) -> (Arc<ShardCore>, Arc<InMemoryFactBase>) {
        let fb = Arc::new(InMemoryFactBase::new());
        let core = Arc::new(ShardCore::new(id, fb.clone() as Arc<dyn FactBase>));
        (core, fb)
    }

    #[tokio::test]
    async fn test_state_transitions_emit_facts() {
        let (core, fb) = core("test_shard");
        assert_eq!(core.state().await, ShardState::Idle);

        core.set_state(ShardState::Running).await;
        core.set_state(ShardState::Completed).await;

        let statuses = fb.query(predicates::SHARD_STATUS).await.unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].arg(1).and_then(Term::as_atom), Some("/running"));
        assert_eq!(
            statuses[1].arg(1).and_then(Term::as_atom),
            Some("/completed")
        );
    }

    #[tokio::test]
    async fn test_heartbeat_emits_fact() {
        let (core, fb) = core("beating");
        core.heartbeat().await;

        let beats = fb.query(predicates::SHARD_HEARTBEAT).await.unwrap();
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].arg(0).and_then(Term::as_str), Some("beating"));
    }

    #[tokio::test]
    async fn test_clean_worker_completes() {
        let (core, _fb) = core("clean");
        let handle = spawn_supervised(core.clone(), async { Ok(()) });
        handle.await.expect("supervisor task failed");
        assert_eq!(core.state().await, ShardState::Completed);
    }

    #[tokio::test]
    async fn test_cancelled_worker_completes() {
        let (core, _fb) = core("cancelled");
        let handle = spawn_supervised(core.clone(), async { Err(PraxisError::Cancelled) });
        handle.await.expect("supervisor task failed");
        assert_eq!(core.state().await, ShardState::Completed);
    }

    #[tokio::test]
    async fn test_panicking_worker_fails_in_isolation() {
        let (core, fb) = core("panicky");
        let handle = spawn_supervised(core.clone(), async { panic!("boom") });
        handle.await.expect("supervisor task must survive the panic");

        assert_eq!(core.state().await, ShardState::Failed);
        let failures = fb.query(predicates::SHARD_FAILURE).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].arg(0).and_then(Term::as_str), Some("panicky"));
    }

    #[tokio::test]
    async fn test_stop_is_observable() {
        let (core, _fb) = core("stoppable");
        assert!(!core.is_stopped());
        core.stop();
        assert!(core.is_stopped());
        assert!(core.child_token().is_cancelled());
    }
}
