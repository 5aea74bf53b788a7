//! Predicate corpus: the declared vocabulary rules may reference
//!
//! The repair prompt never carries the full corpus; a selector returns a
//! small slice relevant to the error context (tens of names, not hundreds).

use std::collections::HashSet;

/// Declared-predicate lookup plus context-aware selection.
pub trait PredicateCorpus: Send + Sync {
    /// Whether `name` is a declared predicate.
    fn contains(&self, name: &str) -> bool;

    /// A slice of candidate predicates relevant to `tags`, at most `limit`
    /// names. Predicates matching a tag come first; the remainder fills up
    /// in declaration order.
    fn select(&self, tags: &[String], limit: usize) -> Vec<String>;
}

/// Corpus backed by a fixed declaration list.
pub struct StaticCorpus {
    names: Vec<String>,
    index: HashSet<String>,
}

impl StaticCorpus {
    /// Create a corpus from a declaration list. Order is preserved for
    /// deterministic selection.
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        let names: Vec<String> = names.into_iter().collect();
        let index = names.iter().cloned().collect();
        Self { names, index }
    }

    /// Corpus seeded with the substrate's own predicate vocabulary.
    pub fn with_defaults() -> Self {
        Self::new(
            [
                "pending_action",
                "permission_check_result",
                "permitted_action",
                "routing_result",
                "no_action_reason",
                "exec_request",
                "routing_error",
                "route_added",
                "next_action",
                "shard_status",
                "shard_failure",
                "shard_goal",
                "campaign_runner_heartbeat",
                "campaign_runner_active",
                "campaign_runner_success",
                "campaign_runner_failure",
                "campaign_step",
                "tool_available",
                "tool_output",
                "safety_violation",
                "current_intent",
            ]
            .into_iter()
            .map(str::to_string),
        )
    }

    /// Number of declared predicates.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl PredicateCorpus for StaticCorpus {
    fn contains(&self, name: &str) -> bool {
        self.index.contains(name)
    }

    fn select(&self, tags: &[String], limit: usize) -> Vec<String> {
        let mut selected = Vec::with_capacity(limit.min(self.names.len()));

        for name in &self.names {
            if selected.len() >= limit {
                return selected;
            }
            if tags.iter().any(|tag| name.contains(tag.as_str())) {
                selected.push(name.clone());
            }
        }

        for name in &self.names {
            if selected.len() >= limit {
                break;
            }
            if !selected.contains(name) {
                selected.push(name.clone());
            }
        }

        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let corpus = StaticCorpus::with_defaults();
        assert!(corpus.contains("routing_result"));
        assert!(!corpus.contains("made_up_predicate"));
    }

    #[test]
    fn test_select_prioritizes_tagged_names() {
        let corpus = StaticCorpus::with_defaults();
        let selected = corpus.select(&["campaign".to_string()], 4);

        assert_eq!(selected.len(), 4);
        assert!(selected[0].contains("campaign"));
        assert!(selected.iter().filter(|n| n.contains("campaign")).count() >= 4);
    }

    #[test]
    fn test_select_fills_up_to_limit() {
        let corpus = StaticCorpus::new(["alpha".to_string(), "beta".to_string()]);
        let selected = corpus.select(&["nomatch".to_string()], 10);
        assert_eq!(selected, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_select_respects_limit() {
        let corpus = StaticCorpus::with_defaults();
        assert_eq!(corpus.select(&[], 3).len(), 3);
    }
}
