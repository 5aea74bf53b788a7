//! Fact base contract and the in-memory reference implementation
//!
//! The fact base is the only globally shared mutable resource in the
//! substrate. Components never talk to each other directly; they assert and
//! retract facts and poll predicate-scoped queries. The trait is the
//! injection seam: production deployments wire the external logic kernel,
//! tests construct a fresh [`InMemoryFactBase`] per scenario.

use crate::error::{PraxisError, Result};
use crate::fact::Fact;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Contract consumed by every shard.
#[async_trait]
pub trait FactBase: Send + Sync {
    /// Append a fact.
    async fn assert(&self, fact: Fact) -> Result<()>;

    /// Remove the first fact structurally equal to `fact`. Retracting a fact
    /// that is not present is not an error.
    async fn retract(&self, fact: &Fact) -> Result<()>;

    /// All facts currently stored under `predicate`, in assertion order.
    async fn query(&self, predicate: &str) -> Result<Vec<Fact>>;

    /// Hot-load a rule into the kernel. Only the rule-repair shard relies on
    /// this; backends without a rule engine keep the default refusal.
    async fn hot_load_rule(&self, _text: &str) -> Result<()> {
        Err(PraxisError::FactBase(
            "rule hot-loading not supported by this backend".to_string(),
        ))
    }
}

/// In-memory fact base with predicate-indexed, insertion-ordered storage.
///
/// All operations serialize through a single reader/writer lock, satisfying
/// the requirement that concurrent asserts and retracts are internally
/// ordered.
#[derive(Default)]
pub struct InMemoryFactBase {
    facts: RwLock<HashMap<String, Vec<Fact>>>,
}

impl InMemoryFactBase {
    /// Create an empty fact base.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored fact, grouped by predicate in arbitrary
    /// predicate order but assertion order within a predicate.
    pub async fn snapshot(&self) -> Vec<Fact> {
        let facts = self.facts.read().await;
        let mut all: Vec<Fact> = facts.values().flatten().cloned().collect();
        all.sort_by(|a, b| a.predicate.cmp(&b.predicate));
        all
    }

    /// Total number of stored facts.
    pub async fn len(&self) -> usize {
        self.facts.read().await.values().map(Vec::len).sum()
    }

    /// Whether the base holds no facts.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl FactBase for InMemoryFactBase {
    async fn assert(&self, fact: Fact) -> Result<()> {
        let mut facts = self.facts.write().await;
        facts.entry(fact.predicate.clone()).or_default().push(fact);
        Ok(())
    }

    async fn retract(&self, fact: &Fact) -> Result<()> {
        let mut facts = self.facts.write().await;
        if let Some(stored) = facts.get_mut(&fact.predicate) {
            if let Some(pos) = stored.iter().position(|f| f == fact) {
                stored.remove(pos);
            }
            if stored.is_empty() {
                facts.remove(&fact.predicate);
            }
        }
        Ok(())
    }

    async fn query(&self, predicate: &str) -> Result<Vec<Fact>> {
        let facts = self.facts.read().await;
        Ok(facts.get(predicate).cloned().unwrap_or_default())
    }

    async fn hot_load_rule(&self, text: &str) -> Result<()> {
        // Structural acceptance only; real syntax checking lives in the
        // external kernel.
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PraxisError::FactBase("empty rule".to_string()));
        }
        if !trimmed.ends_with('.') {
            return Err(PraxisError::FactBase(
                "rule must end with a period".to_string(),
            ));
        }
        let mut depth: i32 = 0;
        for c in trimmed.chars() {
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(PraxisError::FactBase(
                            "unbalanced parentheses".to_string(),
                        ));
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(PraxisError::FactBase(
                "unbalanced parentheses".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Term;

    #[tokio::test]
    async fn test_assert_and_query_order() {
        let fb = InMemoryFactBase::new();
        for i in 0..3 {
            fb.assert(Fact::new("counter", vec![Term::int(i)]))
                .await
                .expect("assert failed");
        }

        let facts = fb.query("counter").await.expect("query failed");
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].arg(0).and_then(Term::as_int), Some(0));
        assert_eq!(facts[2].arg(0).and_then(Term::as_int), Some(2));
    }

    #[tokio::test]
    async fn test_retract_structural_match() {
        let fb = InMemoryFactBase::new();
        let fact = Fact::new("flag", vec![Term::atom("on")]);
        fb.assert(fact.clone()).await.expect("assert failed");
        fb.assert(fact.clone()).await.expect("assert failed");

        fb.retract(&fact).await.expect("retract failed");
        assert_eq!(fb.query("flag").await.unwrap().len(), 1);

        fb.retract(&fact).await.expect("retract failed");
        assert!(fb.query("flag").await.unwrap().is_empty());

        // Retracting an absent fact is a no-op
        fb.retract(&fact).await.expect("retract failed");
    }

    #[tokio::test]
    async fn test_query_unknown_predicate() {
        let fb = InMemoryFactBase::new();
        assert!(fb.query("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hot_load_rule_acceptance() {
        let fb = InMemoryFactBase::new();
        fb.hot_load_rule("reachable(X, Y) :- edge(X, Y).")
            .await
            .expect("valid rule refused");

        assert!(fb.hot_load_rule("").await.is_err());
        assert!(fb.hot_load_rule("head(X) :- body(X)").await.is_err());
        assert!(fb.hot_load_rule("head(X :- body(X).").await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_counts() {
        let fb = InMemoryFactBase::new();
        fb.assert(Fact::new("a", vec![Term::int(1)])).await.unwrap();
        fb.assert(Fact::new("b", vec![Term::int(2)])).await.unwrap();
        assert_eq!(fb.len().await, 2);
        assert!(!fb.is_empty().await);
        assert_eq!(fb.snapshot().await.len(), 2);
    }
}
