//! Constitution gate: permission arbitration for pending actions
//!
//! The gate polls `pending_action` facts, runs the constitution policy over
//! `(verb, target, payload)`, and emits exactly one
//! `permission_check_result` per action id. Permitted actions are re-asserted
//! as `permitted_action` facts for the tactile router; denied actions get a
//! `no_action_reason`. Consumed facts are retracted, and a second encounter
//! of an already-arbitrated id is a no-op.

use crate::config::GateConfig;
use crate::error::Result;
use crate::fact::{predicates, ActionFact, Fact, Term};
use crate::factbase::FactBase;
use crate::shard::ShardCore;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the action is permitted
    pub permit: bool,
    /// Optional explanation, surfaced on denial
    pub reason: Option<String>,
}

impl Verdict {
    /// A permitting verdict.
    pub fn permit() -> Self {
        Self {
            permit: true,
            reason: None,
        }
    }

    /// A denying verdict with a reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            permit: false,
            reason: Some(reason.into()),
        }
    }
}

/// Policy hook evaluated for every pending action.
#[async_trait]
pub trait ConstitutionPolicy: Send + Sync {
    /// Decide whether `(verb, target, payload)` is permitted.
    async fn evaluate(&self, verb: &str, target: &str, payload: &BTreeMap<String, Term>)
        -> Verdict;
}

/// Policy that permits everything. The default for unconfigured substrates.
pub struct PermitAll;

#[async_trait]
impl ConstitutionPolicy for PermitAll {
    async fn evaluate(
        &self,
        _verb: &str,
        _target: &str,
        _payload: &BTreeMap<String, Term>,
    ) -> Verdict {
        Verdict::permit()
    }
}

/// The constitution gate shard.
pub struct ConstitutionGate {
    core: Arc<ShardCore>,
    policy: Arc<dyn ConstitutionPolicy>,
    config: GateConfig,
    arbitrated: Mutex<HashSet<String>>,
}

impl ConstitutionGate {
    /// Create a gate over `facts` with the given policy.
    pub fn new(
        facts: Arc<dyn FactBase>,
        policy: Arc<dyn ConstitutionPolicy>,
        config: GateConfig,
    ) -> Self {
        Self {
            core: Arc::new(ShardCore::new("constitution_gate", facts)),
            policy,
            config,
            arbitrated: Mutex::new(HashSet::new()),
        }
    }

    /// The shard core (state, stop signal).
    pub fn core(&self) -> &Arc<ShardCore> {
        &self.core
    }

    /// Supervision loop: arbitrate on every tick until stopped.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let cancel = self.core.cancel_token();
        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(shard = %self.core.id(), "gate shutting down");
                    return Ok(());
                }
                _ = tick.tick() => {
                    self.core.heartbeat().await;
                    if let Err(e) = self.process_pending_actions().await {
                        tracing::warn!(shard = %self.core.id(), error = %e, "gate tick failed");
                    }
                }
            }
        }
    }

    /// One arbitration pass over all `pending_action` facts. Returns how
    /// many actions were arbitrated.
    pub async fn process_pending_actions(&self) -> Result<usize> {
        let pending = self.core.facts().query(predicates::PENDING_ACTION).await?;
        let mut arbitrated = 0usize;

        for fact in pending {
            let Some(action) = ActionFact::from_fact(&fact) else {
                tracing::warn!(fact = %fact, "malformed pending_action; discarding");
                self.core.withdraw(&fact).await;
                continue;
            };

            if self.already_arbitrated(&action.id).await? {
                self.core.withdraw(&fact).await;
                continue;
            }

            let verdict = self
                .policy
                .evaluate(&action.verb, &action.target, &action.payload)
                .await;

            if verdict.permit {
                self.emit_permit(&action).await;
            } else {
                self.emit_deny(&action, verdict.reason.as_deref()).await;
            }

            self.core.withdraw(&fact).await;
            self.arbitrated.lock().await.insert(action.id.clone());
            arbitrated += 1;
        }

        Ok(arbitrated)
    }

    async fn already_arbitrated(&self, id: &str) -> Result<bool> {
        if self.arbitrated.lock().await.contains(id) {
            return Ok(true);
        }
        // A prior process may have arbitrated this id before a restart
        let results = self
            .core
            .facts()
            .query(predicates::PERMISSION_CHECK_RESULT)
            .await?;
        Ok(results
            .iter()
            .any(|f| f.arg(0).and_then(Term::as_str) == Some(id)))
    }

    async fn emit_permit(&self, action: &ActionFact) {
        tracing::debug!(id = %action.id, verb = %action.verb, "action permitted");
        self.core
            .emit(Fact::new(
                predicates::PERMISSION_CHECK_RESULT,
                vec![Term::str(&action.id), Term::atom("permit")],
            ))
            .await;

        let mut permitted = action.clone();
        permitted.queued_at = chrono::Utc::now().timestamp();
        self.core
            .emit(permitted.to_fact(predicates::PERMITTED_ACTION))
            .await;
    }

    async fn emit_deny(&self, action: &ActionFact, reason: Option<&str>) {
        tracing::debug!(id = %action.id, verb = %action.verb, reason = ?reason, "action denied");
        let mut args = vec![Term::str(&action.id), Term::atom("deny")];
        if let Some(reason) = reason {
            args.push(Term::str(reason));
        }
        self.core
            .emit(Fact::new(predicates::PERMISSION_CHECK_RESULT, args))
            .await;

        let intent = action
            .intent_id()
            .map(str::to_string)
            .unwrap_or_else(|| action.id.clone());
        self.core
            .emit(Fact::new(
                predicates::NO_ACTION_REASON,
                vec![Term::atom(intent), Term::atom("denied")],
            ))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factbase::InMemoryFactBase;

    struct DenyWrites;

    #[async_trait]
    impl ConstitutionPolicy for DenyWrites {
        async fn evaluate(
            &self,
            verb: &str,
            _target: &str,
            _payload: &BTreeMap<String, Term>,
        ) -> Verdict {
            if verb.contains("write") {
                Verdict::deny("writes are forbidden")
            } else {
                Verdict::permit()
            }
        }
    }

    fn gate_with(policy: Arc<dyn ConstitutionPolicy>) -> (Arc<InMemoryFactBase>, ConstitutionGate) {
        let fb = Arc::new(InMemoryFactBase::new());
        let gate = ConstitutionGate::new(
            fb.clone() as Arc<dyn FactBase>,
            policy,
            GateConfig::default(),
        );
        (fb, gate)
    }

    fn pending(id: &str, verb: &str, target: &str) -> Fact {
        ActionFact::new(id, verb, target, BTreeMap::new()).to_fact(predicates::PENDING_ACTION)
    }

    #[tokio::test]
    async fn test_permit_emits_result_and_permitted_action() {
        let (fb, gate) = gate_with(Arc::new(PermitAll));
        fb.assert(pending("a1", "/read_file", "hello.txt"))
            .await
            .unwrap();

        let n = gate.process_pending_actions().await.unwrap();
        assert_eq!(n, 1);

        let results = fb.query(predicates::PERMISSION_CHECK_RESULT).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].arg(0).and_then(Term::as_str), Some("a1"));
        assert_eq!(results[0].arg(1).and_then(Term::as_atom), Some("/permit"));

        let permitted = fb.query(predicates::PERMITTED_ACTION).await.unwrap();
        assert_eq!(permitted.len(), 1);
        let action = ActionFact::from_fact(&permitted[0]).unwrap();
        assert_eq!(action.verb, "/read_file");

        assert!(fb.query(predicates::PENDING_ACTION).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deny_emits_reason_and_no_action_reason() {
        let (fb, gate) = gate_with(Arc::new(DenyWrites));
        let action = ActionFact::new(
            "a2",
            "/write_file",
            "out.txt",
            BTreeMap::from([("intent_id".to_string(), Term::atom("current_intent"))]),
        );
        fb.assert(action.to_fact(predicates::PENDING_ACTION))
            .await
            .unwrap();

        gate.process_pending_actions().await.unwrap();

        let results = fb.query(predicates::PERMISSION_CHECK_RESULT).await.unwrap();
        assert_eq!(results[0].arg(1).and_then(Term::as_atom), Some("/deny"));
        assert_eq!(
            results[0].arg(2).and_then(Term::as_str),
            Some("writes are forbidden")
        );

        let reasons = fb.query(predicates::NO_ACTION_REASON).await.unwrap();
        assert_eq!(
            reasons[0].arg(0).and_then(Term::as_atom),
            Some("/current_intent")
        );
        assert_eq!(reasons[0].arg(1).and_then(Term::as_atom), Some("/denied"));

        assert!(fb.query(predicates::PERMITTED_ACTION).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idempotent_per_id() {
        let (fb, gate) = gate_with(Arc::new(PermitAll));
        let fact = pending("a3", "/read_file", "x");
        fb.assert(fact.clone()).await.unwrap();
        gate.process_pending_actions().await.unwrap();

        // Second encounter of the same id must be a no-op
        fb.assert(fact).await.unwrap();
        let n = gate.process_pending_actions().await.unwrap();
        assert_eq!(n, 0);

        let results = fb.query(predicates::PERMISSION_CHECK_RESULT).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(fb.query(predicates::PENDING_ACTION).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_pending_action_discarded() {
        let (fb, gate) = gate_with(Arc::new(PermitAll));
        fb.assert(Fact::new(
            predicates::PENDING_ACTION,
            vec![Term::str("only-an-id")],
        ))
        .await
        .unwrap();

        let n = gate.process_pending_actions().await.unwrap();
        assert_eq!(n, 0);
        assert!(fb.query(predicates::PENDING_ACTION).await.unwrap().is_empty());
        assert!(fb
            .query(predicates::PERMISSION_CHECK_RESULT)
            .await
            .unwrap()
            .is_empty());
    }
}
