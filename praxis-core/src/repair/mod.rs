//! Rule repair: validation and LLM-driven correction of learned rules
//!
//! Learned rules are intercepted before they reach the persistent rule file.
//! Each rule is validated (syntax via the kernel hot-loader, schema via the
//! predicate corpus, structural safety heuristics) and, when invalid, driven
//! through a bounded repair loop: build a prompt with the errors and a
//! curated slice of candidate predicates, ask the LLM for a corrected rule,
//! re-validate. Budget refusals and LLM failures reject immediately.

use crate::config::RepairConfig;
use crate::cost::CostGuard;
use crate::error::{PraxisError, Result};
use crate::factbase::FactBase;
use crate::llm::LlmClient;
use std::sync::Arc;

pub mod corpus;
pub mod validate;

pub use corpus::{PredicateCorpus, StaticCorpus};
pub use validate::RuleValidator;

/// Error-context tags recognized in validation messages. The corpus selector
/// uses them to pick a relevant predicate slice.
const ERROR_TAGS: [&str; 5] = ["shard", "campaign", "tool", "routing", "safety"];

/// System prompt fixing the rule-language conventions for repair replies.
const REPAIR_SYSTEM_PROMPT: &str = "You repair rules for a logical fact base. \
Rules have the form `head(Args) :- body.` or are bare facts `head(Args).`; \
every rule ends with a period. Atoms are symbols with a leading slash, such \
as /permit. Variables start with an uppercase letter; `_` is a wildcard. \
Negated goals (`not p(X)`) may only use variables already bound by a positive \
goal. Only reference predicates from the provided candidate list. Reply with \
the corrected rule inside a triple-backtick code block and nothing else.";

/// Outcome of [`RuleRepair::validate_and_repair`].
#[derive(Debug, Clone)]
pub struct RepairResult {
    /// The rule as submitted
    pub original: String,
    /// The final rule (equal to `original` when nothing changed)
    pub repaired: String,
    /// Whether the repair loop produced a valid, different rule
    pub was_repaired: bool,
    /// Repair attempts consumed
    pub attempts: usize,
    /// Validation errors outstanding at return
    pub errors: Vec<String>,
    /// Human-readable descriptions of the applied fixes
    pub fixes_applied: Vec<String>,
    /// Whether the rule was rejected
    pub rejected: bool,
    /// Why the rule was rejected
    pub rejection_reason: Option<String>,
}

impl RepairResult {
    fn valid(original: String) -> Self {
        Self {
            repaired: original.clone(),
            original,
            was_repaired: false,
            attempts: 0,
            errors: Vec::new(),
            fixes_applied: Vec::new(),
            rejected: false,
            rejection_reason: None,
        }
    }
}

/// The rule-repair shard.
pub struct RuleRepair {
    kernel: Arc<dyn FactBase>,
    llm: Arc<dyn LlmClient>,
    cost: Arc<dyn CostGuard>,
    corpus: Arc<dyn PredicateCorpus>,
    validator: RuleValidator,
    config: RepairConfig,
}

impl RuleRepair {
    /// Create a repair shard over the kernel, LLM, cost guard, and corpus.
    pub fn new(
        kernel: Arc<dyn FactBase>,
        llm: Arc<dyn LlmClient>,
        cost: Arc<dyn CostGuard>,
        corpus: Arc<dyn PredicateCorpus>,
        config: RepairConfig,
    ) -> Self {
        Self {
            kernel,
            llm,
            cost,
            validator: RuleValidator::new(corpus.clone()),
            corpus,
            config,
        }
    }

    /// Validate `rule` and, if invalid, drive the bounded repair loop.
    pub async fn validate_and_repair(&self, rule: &str) -> Result<RepairResult> {
        let original = rule.trim().to_string();
        let mut errors = self.validator.validate(self.kernel.as_ref(), &original).await;

        if errors.is_empty() {
            return Ok(RepairResult::valid(original));
        }

        let max_retries = self.config.max_retries.clamp(1, 10);
        let mut current = original.clone();
        let mut attempts = 0usize;

        while attempts < max_retries {
            let decision = self.cost.can_retry_validation();
            if !decision.allowed {
                return Ok(self.rejected(original, current, attempts, errors, decision.reason_or_default()));
            }
            self.cost.record_validation_retry();
            attempts += 1;

            let prompt = self.build_repair_prompt(&current, &errors);

            let decision = self.cost.can_call();
            if !decision.allowed {
                return Ok(self.rejected(original, current, attempts, errors, decision.reason_or_default()));
            }

            let reply = match self
                .llm
                .complete_with_system(REPAIR_SYSTEM_PROMPT, &prompt)
                .await
            {
                Ok(reply) => {
                    self.cost.record_call();
                    reply
                }
                Err(e) => {
                    self.cost.record_error();
                    return Ok(self.rejected(
                        original,
                        current,
                        attempts,
                        errors,
                        format!("llm unavailable: {}", e),
                    ));
                }
            };

            let candidate = extract_rule(&reply);
            let new_errors = self.validator.validate(self.kernel.as_ref(), &candidate).await;

            if new_errors.is_empty() {
                let fixes = describe_fixes(&original, &candidate, &errors);
                tracing::info!(attempts, fixes = ?fixes, "rule repaired");
                return Ok(RepairResult {
                    original,
                    repaired: candidate,
                    was_repaired: true,
                    attempts,
                    errors: Vec::new(),
                    fixes_applied: fixes,
                    rejected: false,
                    rejection_reason: None,
                });
            }

            current = candidate;
            errors = new_errors;
        }

        let reason = format!("could not repair after {} attempts", attempts);
        tracing::warn!(%reason, errors = ?errors, "rule rejected");
        Ok(self.rejected(original, current, attempts, errors, reason))
    }

    /// Intercept a learned rule: return the (possibly repaired) rule text,
    /// or an error carrying the rejection reason and outstanding validation
    /// errors.
    pub async fn intercept_learned_rule(&self, rule: &str) -> Result<String> {
        let result = self.validate_and_repair(rule).await?;
        if result.rejected {
            return Err(PraxisError::RuleRejected {
                reason: result
                    .rejection_reason
                    .unwrap_or_else(|| "rejected".to_string()),
                errors: result.errors,
            });
        }
        Ok(result.repaired)
    }

    fn rejected(
        &self,
        original: String,
        current: String,
        attempts: usize,
        errors: Vec<String>,
        reason: String,
    ) -> RepairResult {
        RepairResult {
            original,
            repaired: current,
            was_repaired: false,
            attempts,
            errors,
            fixes_applied: Vec::new(),
            rejected: true,
            rejection_reason: Some(reason),
        }
    }

    fn build_repair_prompt(&self, rule: &str, errors: &[String]) -> String {
        let tags: Vec<String> = ERROR_TAGS
            .iter()
            .filter(|tag| errors.iter().any(|e| e.contains(*tag)))
            .map(|tag| tag.to_string())
            .collect();
        let candidates = self
            .corpus
            .select(&tags, self.config.max_prompt_predicates);

        let mut prompt = String::from("The following rule failed validation.\n\nRule:\n");
        prompt.push_str(rule);
        prompt.push_str("\n\nErrors:\n");
        for error in errors {
            prompt.push_str("- ");
            prompt.push_str(error);
            prompt.push('\n');
        }
        prompt.push_str("\nCandidate predicates:\n");
        for name in candidates {
            prompt.push_str("- ");
            prompt.push_str(&name);
            prompt.push('\n');
        }
        prompt.push_str("\nReturn the corrected rule.");
        prompt
    }
}

/// Extract the rule from an LLM reply: a triple-backtick block is preferred;
/// otherwise the first line containing `(` and either `:-` or `.`; otherwise
/// the entire stripped first line.
pub(crate) fn extract_rule(reply: &str) -> String {
    if let Some(open) = reply.find("```") {
        let after_fence = &reply[open + 3..];
        let content_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let content = &after_fence[content_start..];
        if let Some(close) = content.find("```") {
            return content[..close].trim().to_string();
        }
    }

    for line in reply.lines() {
        let line = line.trim();
        if line.contains('(') && (line.contains(":-") || line.contains('.')) {
            return line.to_string();
        }
    }

    reply.lines().next().unwrap_or("").trim().to_string()
}

/// Describe what a successful repair changed, by diffing predicates and the
/// structural properties the validator checks.
fn describe_fixes(original: &str, repaired: &str, original_errors: &[String]) -> Vec<String> {
    let mut fixes = Vec::new();

    let before = validate::predicate_names(original);
    for name in validate::predicate_names(repaired) {
        if !before.contains(&name) {
            fixes.push(format!("added predicate: {}", name));
        }
    }

    if original_errors.iter().any(|e| e.starts_with("unbound negation")) {
        fixes.push("added negation handling".to_string());
    }

    if !original.trim().ends_with('.') && repaired.trim().ends_with('.') {
        fixes.push("added terminal period".to_string());
    }

    if fixes.is_empty() {
        fixes.push("general syntax correction".to_string());
    }

    fixes
}
