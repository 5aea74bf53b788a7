//! Rule validation: syntax, schema, and safety phases
//!
//! All three phases run on every attempt and their errors accumulate, so a
//! repair prompt always sees the full picture. Syntax is delegated to the
//! kernel's hot-loader; schema compares referenced predicates against the
//! corpus; safety applies the structural heuristics that keep a learned rule
//! from wedging the pipeline.

use crate::factbase::FactBase;
use crate::repair::corpus::PredicateCorpus;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Built-in forms that are not predicates and never need declaring.
const BUILTINS: [&str; 12] = [
    "fn", "do", "let", "not", "count", "sum", "min", "max", "avg", "bound", "match", "collect",
];

/// System predicates that hold on every tick; a body made only of these with
/// wildcard arguments re-fires forever.
const ALWAYS_TRUE: [&str; 4] = ["system_alive", "system_ready", "heartbeat", "tick"];

static PREDICATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z_][A-Za-z0-9_]*)\s*\(").expect("predicate regex"));

static NEGATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"not\s+([a-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)").expect("negation regex"));

static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z][A-Za-z0-9_]*").expect("variable regex"));

static BODY_ATOM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)").expect("body atom regex"));

/// Three-phase validator over a predicate corpus.
pub struct RuleValidator {
    corpus: Arc<dyn PredicateCorpus>,
}

impl RuleValidator {
    /// Create a validator over `corpus`.
    pub fn new(corpus: Arc<dyn PredicateCorpus>) -> Self {
        Self { corpus }
    }

    /// Run all phases and return the accumulated errors. Empty means valid.
    pub async fn validate(&self, kernel: &dyn FactBase, rule: &str) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = kernel.hot_load_rule(rule).await {
            errors.push(format!("syntax: {}", e));
        }

        for name in body_predicate_names(rule) {
            if !BUILTINS.contains(&name.as_str()) && !self.corpus.contains(&name) {
                errors.push(format!("undefined predicate: {}", name));
            }
        }

        errors.extend(safety_errors(rule));
        errors
    }
}

/// Strip comment lines (leading `%`).
fn code_text(rule: &str) -> String {
    rule.lines()
        .filter(|line| !line.trim_start().starts_with('%'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// All predicate names referenced anywhere in the rule, first-seen order.
pub(crate) fn predicate_names(rule: &str) -> Vec<String> {
    let text = code_text(rule);
    let mut names = Vec::new();
    for capture in PREDICATE_RE.captures_iter(&text) {
        let name = capture[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Predicate names referenced in the rule body (after `:-`), first-seen
/// order. A bare fact has no body.
pub(crate) fn body_predicate_names(rule: &str) -> Vec<String> {
    let text = code_text(rule);
    let Some(pos) = text.find(":-") else {
        return Vec::new();
    };
    let body = &text[pos + 2..];
    let mut names = Vec::new();
    for capture in PREDICATE_RE.captures_iter(body) {
        let name = capture[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Word-boundary containment check without compiling a regex per variable.
fn contains_word(text: &str, word: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = text[start..].find(word) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !text[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        let after = abs + word.len();
        let after_ok = after >= text.len()
            || !text[after..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if before_ok && after_ok {
            return true;
        }
        start = abs + word.len();
    }
    false
}

fn safety_errors(rule: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let text = code_text(rule);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return errors;
    }

    if !trimmed.ends_with('.') {
        errors.push("missing terminal period".to_string());
    }

    // Every uppercase-initial variable under a negation must be bound by a
    // positive occurrence earlier in the rule
    for capture in NEGATION_RE.captures_iter(&text) {
        let Some(whole) = capture.get(0) else { continue };
        let Some(args) = capture.get(2) else { continue };
        let prefix = &text[..whole.start()];
        for var in VARIABLE_RE.find_iter(args.as_str()) {
            if !contains_word(prefix, var.as_str()) {
                errors.push(format!("unbound negation: {}", var.as_str()));
            }
        }
    }

    errors.extend(loop_risk_errors(trimmed));
    errors
}

fn loop_risk_errors(trimmed: &str) -> Vec<String> {
    let mut errors = Vec::new();

    match trimmed.find(":-") {
        None => {
            // Bare next_action fact on a startup atom re-triggers the pipeline
            // from the beginning, forever
            if let Some(capture) = BODY_ATOM_RE.captures(trimmed) {
                if &capture[1] == "next_action" {
                    let arg = capture[2].trim();
                    if arg == "/system_start" || arg == "/initialize" {
                        errors.push(format!(
                            "infinite loop risk: unconditional next_action({})",
                            arg
                        ));
                    }
                }
            }
        }
        Some(pos) => {
            let head = &trimmed[..pos];
            if !head.trim_start().starts_with("next_action") {
                return errors;
            }
            let body = &trimmed[pos + 2..];
            let atoms: Vec<_> = BODY_ATOM_RE.captures_iter(body).collect();
            if !atoms.is_empty()
                && atoms.iter().all(|c| {
                    ALWAYS_TRUE.contains(&&c[1])
                        && c[2].split(',').all(|arg| arg.trim() == "_")
                })
            {
                errors.push(
                    "infinite loop risk: body depends only on always-true system predicates"
                        .to_string(),
                );
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factbase::InMemoryFactBase;
    use crate::repair::corpus::StaticCorpus;

    fn validator() -> RuleValidator {
        RuleValidator::new(Arc::new(StaticCorpus::with_defaults()))
    }

    #[tokio::test]
    async fn test_valid_rule_passes() {
        let kernel = InMemoryFactBase::new();
        let errors = validator()
            .validate(
                &kernel,
                "shard_goal(S, G) :- permitted_action(S, G, _, _, _).",
            )
            .await;
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[tokio::test]
    async fn test_syntax_error_is_labelled() {
        let kernel = InMemoryFactBase::new();
        let errors = validator().validate(&kernel, "broken(X :- thing(X).").await;
        assert!(errors.iter().any(|e| e.starts_with("syntax:")));
    }

    #[tokio::test]
    async fn test_undefined_predicate() {
        let kernel = InMemoryFactBase::new();
        let errors = validator()
            .validate(&kernel, "shard_goal(X) :- mystery_pred(X).")
            .await;
        assert!(errors.contains(&"undefined predicate: mystery_pred".to_string()));
    }

    #[tokio::test]
    async fn test_builtins_are_not_undefined() {
        let kernel = InMemoryFactBase::new();
        let errors = validator()
            .validate(
                &kernel,
                "shard_goal(N) :- count(routing_result(_, _, _), N).",
            )
            .await;
        assert!(
            !errors.iter().any(|e| e.starts_with("undefined")),
            "builtins flagged: {:?}",
            errors
        );
    }

    #[tokio::test]
    async fn test_missing_period() {
        let kernel = InMemoryFactBase::new();
        let errors = validator()
            .validate(&kernel, "shard_goal(X) :- routing_result(X, _, _)")
            .await;
        assert!(errors.contains(&"missing terminal period".to_string()));
    }

    #[tokio::test]
    async fn test_unbound_negation_flagged() {
        let kernel = InMemoryFactBase::new();
        let errors = validator()
            .validate(&kernel, "shard_goal(X) :- not routing_result(Y, _, _).")
            .await;
        assert!(errors.contains(&"unbound negation: Y".to_string()));
    }

    #[tokio::test]
    async fn test_bound_negation_passes() {
        let kernel = InMemoryFactBase::new();
        let errors = validator()
            .validate(
                &kernel,
                "shard_goal(Y) :- routing_result(Y, _, _), not safety_violation(Y).",
            )
            .await;
        assert!(
            !errors.iter().any(|e| e.starts_with("unbound")),
            "bound variable flagged: {:?}",
            errors
        );
    }

    #[tokio::test]
    async fn test_startup_next_action_flagged() {
        let kernel = InMemoryFactBase::new();
        let errors = validator()
            .validate(&kernel, "next_action(/system_start).")
            .await;
        assert!(errors.iter().any(|e| e.contains("infinite loop risk")));

        let errors = validator().validate(&kernel, "next_action(/initialize).").await;
        assert!(errors.iter().any(|e| e.contains("infinite loop risk")));
    }

    #[tokio::test]
    async fn test_always_true_wildcard_body_flagged() {
        let kernel = InMemoryFactBase::new();
        let errors = validator()
            .validate(&kernel, "next_action(A) :- heartbeat(_), system_alive(_).")
            .await;
        assert!(errors.iter().any(|e| e.contains("infinite loop risk")));
    }

    #[tokio::test]
    async fn test_grounded_next_action_passes_loop_guard() {
        let kernel = InMemoryFactBase::new();
        let errors = validator()
            .validate(&kernel, "next_action(A) :- pending_action(A, _, _, _, _).")
            .await;
        assert!(
            !errors.iter().any(|e| e.contains("infinite loop")),
            "grounded rule flagged: {:?}",
            errors
        );
    }

    #[test]
    fn test_predicate_extraction() {
        let names = predicate_names("a(X) :- b(X), c(X, Y).");
        assert_eq!(names, vec!["a", "b", "c"]);

        let body = body_predicate_names("a(X) :- b(X), c(X, Y).");
        assert_eq!(body, vec!["b", "c"]);

        assert!(body_predicate_names("a(/x).").is_empty());
    }

    #[test]
    fn test_comments_are_ignored() {
        let names = predicate_names("% commented(X)\na(X) :- b(X).");
        assert_eq!(names, vec!["a", "b"]);
    }
}
