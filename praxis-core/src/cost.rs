//! Cost guard: budget accounting for LLM calls and validation retries
//!
//! Retry loops consult the guard before every attempt; a single refusal
//! terminates the loop with the reported reason. The guard also tracks
//! activity so supervision loops can shut down when idle.

use crate::config::BudgetConfig;
use std::sync::Mutex;
use std::time::Instant;

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetDecision {
    /// Whether the operation may proceed
    pub allowed: bool,
    /// Refusal reason when not allowed
    pub reason: Option<String>,
}

impl BudgetDecision {
    /// An allowing decision.
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A refusing decision with a reason.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    /// The refusal reason, or a generic fallback.
    pub fn reason_or_default(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| "budget exhausted".to_string())
    }
}

/// Budget accounting consulted by the router and the rule-repair shard.
pub trait CostGuard: Send + Sync {
    /// May another LLM call be made?
    fn can_call(&self) -> BudgetDecision;

    /// May another validation retry be attempted?
    fn can_retry_validation(&self) -> BudgetDecision;

    /// Record a completed LLM call.
    fn record_call(&self);

    /// Record an error from a collaborator.
    fn record_error(&self);

    /// Record a validation retry.
    fn record_validation_retry(&self);

    /// Note non-billable activity (e.g. a routed action) for idle tracking.
    fn record_activity(&self) {}

    /// No recorded activity within the configured idle timeout.
    fn is_idle(&self) -> bool;
}

#[derive(Debug)]
struct BudgetState {
    calls: u64,
    errors: u64,
    validation_retries: u64,
    last_activity: Instant,
}

/// Mutex-guarded counter implementation of [`CostGuard`].
pub struct CallBudget {
    config: BudgetConfig,
    state: Mutex<BudgetState>,
}

impl CallBudget {
    /// Create a budget from configuration.
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BudgetState {
                calls: 0,
                errors: 0,
                validation_retries: 0,
                last_activity: Instant::now(),
            }),
        }
    }

    /// A budget that never refuses. Useful for tests and unmetered
    /// deployments.
    pub fn unlimited() -> Self {
        Self::new(BudgetConfig {
            max_llm_calls: u64::MAX,
            max_validation_retries: u64::MAX,
            ..BudgetConfig::default()
        })
    }

    /// Number of recorded LLM calls.
    pub fn calls(&self) -> u64 {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).calls
    }

    /// Number of recorded errors.
    pub fn errors(&self) -> u64 {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).errors
    }

    fn touch(state: &mut BudgetState) {
        state.last_activity = Instant::now();
    }
}

impl Default for CallBudget {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

impl CostGuard for CallBudget {
    fn can_call(&self) -> BudgetDecision {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.calls < self.config.max_llm_calls {
            BudgetDecision::allowed()
        } else {
            BudgetDecision::refused(format!(
                "llm call budget exhausted ({}/{})",
                state.calls, self.config.max_llm_calls
            ))
        }
    }

    fn can_retry_validation(&self) -> BudgetDecision {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.validation_retries < self.config.max_validation_retries {
            BudgetDecision::allowed()
        } else {
            BudgetDecision::refused(format!(
                "validation retry budget exhausted ({}/{})",
                state.validation_retries, self.config.max_validation_retries
            ))
        }
    }

    fn record_call(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.calls += 1;
        Self::touch(&mut state);
    }

    fn record_error(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.errors += 1;
        Self::touch(&mut state);
    }

    fn record_validation_retry(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.validation_retries += 1;
        Self::touch(&mut state);
    }

    fn record_activity(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Self::touch(&mut state);
    }

    fn is_idle(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.last_activity.elapsed() >= self.config.idle_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_call_budget_refuses_at_limit() {
        let budget = CallBudget::new(BudgetConfig {
            max_llm_calls: 2,
            ..BudgetConfig::default()
        });

        assert!(budget.can_call().allowed);
        budget.record_call();
        budget.record_call();

        let decision = budget.can_call();
        assert!(!decision.allowed);
        assert!(decision.reason_or_default().contains("2/2"));
    }

    #[test]
    fn test_validation_retry_budget() {
        let budget = CallBudget::new(BudgetConfig {
            max_validation_retries: 1,
            ..BudgetConfig::default()
        });

        assert!(budget.can_retry_validation().allowed);
        budget.record_validation_retry();
        assert!(!budget.can_retry_validation().allowed);
    }

    #[test]
    fn test_idle_detection() {
        let budget = CallBudget::new(BudgetConfig {
            idle_timeout: Duration::from_millis(0),
            ..BudgetConfig::default()
        });
        assert!(budget.is_idle());

        let busy = CallBudget::new(BudgetConfig {
            idle_timeout: Duration::from_secs(3600),
            ..BudgetConfig::default()
        });
        busy.record_call();
        assert!(!busy.is_idle());
    }

    #[test]
    fn test_unlimited_never_refuses() {
        let budget = CallBudget::unlimited();
        for _ in 0..1000 {
            budget.record_call();
            budget.record_validation_retry();
        }
        assert!(budget.can_call().allowed);
        assert!(budget.can_retry_validation().allowed);
    }
}
