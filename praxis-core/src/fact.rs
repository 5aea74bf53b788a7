//! Fact model for the shared logical base
//!
//! Facts are typed tuples `(predicate, args)`. Arguments are a tagged sum of
//! the primitives the logical language understands: strings, 64-bit integers,
//! atoms (slash-prefixed symbols such as `/permit`), and string-keyed
//! mappings. Structural equality over the whole tuple is what the fact base
//! uses for retraction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known predicate names emitted and consumed by the core shards.
pub mod predicates {
    pub const PENDING_ACTION: &str = "pending_action";
    pub const PERMISSION_CHECK_RESULT: &str = "permission_check_result";
    pub const PERMITTED_ACTION: &str = "permitted_action";
    pub const ROUTING_RESULT: &str = "routing_result";
    pub const NO_ACTION_REASON: &str = "no_action_reason";
    pub const EXEC_REQUEST: &str = "exec_request";
    pub const ROUTING_ERROR: &str = "routing_error";
    pub const ROUTE_ADDED: &str = "route_added";
    pub const NEXT_ACTION: &str = "next_action";
    pub const SHARD_STATUS: &str = "shard_status";
    pub const SHARD_FAILURE: &str = "shard_failure";
    pub const SHARD_HEARTBEAT: &str = "shard_heartbeat";
    pub const CAMPAIGN_RUNNER_HEARTBEAT: &str = "campaign_runner_heartbeat";
    pub const CAMPAIGN_RUNNER_ACTIVE: &str = "campaign_runner_active";
    pub const CAMPAIGN_RUNNER_SUCCESS: &str = "campaign_runner_success";
    pub const CAMPAIGN_RUNNER_FAILURE: &str = "campaign_runner_failure";
}

/// A single argument in a fact tuple.
///
/// The mapping arm uses a `BTreeMap` so comparison and serialization are
/// total and deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Term {
    /// Plain string value
    Str(String),
    /// 64-bit signed integer
    Int(i64),
    /// Atom: an enumerated symbol beginning with `/`
    Atom(String),
    /// String-keyed mapping of nested terms
    Map(BTreeMap<String, Term>),
}

impl Term {
    /// Create a string term.
    pub fn str(value: impl Into<String>) -> Self {
        Term::Str(value.into())
    }

    /// Create an integer term.
    pub fn int(value: i64) -> Self {
        Term::Int(value)
    }

    /// Create an atom term. A leading `/` is added if missing.
    pub fn atom(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.starts_with('/') {
            Term::Atom(name)
        } else {
            Term::Atom(format!("/{}", name))
        }
    }

    /// Create an empty mapping term.
    pub fn empty_map() -> Self {
        Term::Map(BTreeMap::new())
    }

    /// Create a mapping term from key/term pairs.
    pub fn map(entries: impl IntoIterator<Item = (String, Term)>) -> Self {
        Term::Map(entries.into_iter().collect())
    }

    /// View as a string slice (strings and atoms both qualify).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Term::Str(s) | Term::Atom(s) => Some(s),
            _ => None,
        }
    }

    /// View as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Term::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// View as an atom name (including the leading `/`).
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Term::Atom(s) => Some(s),
            _ => None,
        }
    }

    /// View as a mapping.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Term>> {
        match self {
            Term::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Convert a JSON value into a term.
    ///
    /// Strings with a leading `/` become atoms, integers stay integers,
    /// booleans become the `/true` and `/false` atoms, objects become
    /// mappings, and anything else is carried as its JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) if s.starts_with('/') => Term::Atom(s.clone()),
            serde_json::Value::String(s) => Term::Str(s.clone()),
            serde_json::Value::Number(n) if n.is_i64() => Term::Int(n.as_i64().unwrap_or(0)),
            serde_json::Value::Bool(b) => Term::atom(if *b { "true" } else { "false" }),
            serde_json::Value::Object(obj) => Term::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Term::from_json(v)))
                    .collect(),
            ),
            other => Term::Str(other.to_string()),
        }
    }

    /// Convert the term to a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Term::Str(s) | Term::Atom(s) => serde_json::Value::String(s.clone()),
            Term::Int(n) => serde_json::Value::Number((*n).into()),
            Term::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Str(s) => write!(f, "{:?}", s),
            Term::Int(n) => write!(f, "{}", n),
            Term::Atom(a) => write!(f, "{}", a),
            Term::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A fact in the shared logical base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    /// Relation name
    pub predicate: String,
    /// Heterogeneous argument tuple
    pub args: Vec<Term>,
}

impl Fact {
    /// Create a new fact.
    pub fn new(predicate: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            predicate: predicate.into(),
            args,
        }
    }

    /// Get the argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&Term> {
        self.args.get(index)
    }

    /// Number of arguments.
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.predicate)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// Typed view over `pending_action` / `permitted_action` facts.
///
/// Both predicates share the layout `(id, verb, target, payload, t)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFact {
    /// Correlation id, unique per proposed action
    pub id: String,
    /// Action verb as an atom (e.g. `/read_file`)
    pub verb: String,
    /// Action target (path, URL, shard name, ...)
    pub target: String,
    /// Free-form payload mapping
    pub payload: BTreeMap<String, Term>,
    /// Unix seconds when the action was queued
    pub queued_at: i64,
}

impl ActionFact {
    /// Create a new action with the current time as `queued_at`.
    pub fn new(
        id: impl Into<String>,
        verb: impl Into<String>,
        target: impl Into<String>,
        payload: BTreeMap<String, Term>,
    ) -> Self {
        Self {
            id: id.into(),
            verb: verb.into(),
            target: target.into(),
            payload,
            queued_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Parse an action from a fact with the `(id, verb, target, payload, t)`
    /// layout. Returns `None` when the shape does not match.
    pub fn from_fact(fact: &Fact) -> Option<Self> {
        if fact.arity() < 5 {
            return None;
        }
        Some(Self {
            id: fact.arg(0)?.as_str()?.to_string(),
            verb: fact.arg(1)?.as_str()?.to_string(),
            target: fact.arg(2)?.as_str()?.to_string(),
            payload: fact.arg(3)?.as_map()?.clone(),
            queued_at: fact.arg(4)?.as_int()?,
        })
    }

    /// Render the action back into a fact under `predicate`.
    pub fn to_fact(&self, predicate: &str) -> Fact {
        Fact::new(
            predicate,
            vec![
                Term::str(&self.id),
                Term::atom(&self.verb),
                Term::str(&self.target),
                Term::Map(self.payload.clone()),
                Term::int(self.queued_at),
            ],
        )
    }

    /// The intent id carried in the payload, when the planner set one.
    pub fn intent_id(&self) -> Option<&str> {
        self.payload.get("intent_id").and_then(|t| t.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom_normalization() {
        assert_eq!(Term::atom("permit"), Term::Atom("/permit".into()));
        assert_eq!(Term::atom("/permit"), Term::Atom("/permit".into()));
    }

    #[test]
    fn test_structural_equality() {
        let a = Fact::new(
            "routing_result",
            vec![Term::str("a1"), Term::atom("success"), Term::str("ok")],
        );
        let b = Fact::new(
            "routing_result",
            vec![Term::str("a1"), Term::atom("success"), Term::str("ok")],
        );
        assert_eq!(a, b);

        let c = Fact::new(
            "routing_result",
            vec![Term::str("a1"), Term::atom("failure"), Term::str("ok")],
        );
        assert_ne!(a, c);
    }

    #[test]
    fn test_json_round_trip() {
        let term = Term::map([
            ("intent_id".to_string(), Term::atom("current_intent")),
            ("count".to_string(), Term::int(3)),
            ("note".to_string(), Term::str("hello")),
        ]);

        let json = term.to_json();
        assert_eq!(Term::from_json(&json), term);
    }

    #[test]
    fn test_action_fact_round_trip() {
        let action = ActionFact::new(
            "a1",
            "/read_file",
            "hello.txt",
            BTreeMap::from([("intent_id".to_string(), Term::atom("i1"))]),
        );

        let fact = action.to_fact(predicates::PENDING_ACTION);
        assert_eq!(fact.predicate, "pending_action");
        assert_eq!(fact.arity(), 5);

        let parsed = ActionFact::from_fact(&fact).expect("parse failed");
        assert_eq!(parsed, action);
        assert_eq!(parsed.intent_id(), Some("/i1"));
    }

    #[test]
    fn test_malformed_action_fact() {
        let fact = Fact::new("pending_action", vec![Term::str("a1")]);
        assert!(ActionFact::from_fact(&fact).is_none());
    }

    #[test]
    fn test_display() {
        let fact = Fact::new(
            "permission_check_result",
            vec![Term::str("a1"), Term::atom("deny"), Term::str("nope")],
        );
        assert_eq!(
            fact.to_string(),
            "permission_check_result(\"a1\", /deny, \"nope\")"
        );
    }
}
