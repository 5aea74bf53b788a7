//! # Praxis - An Action Pipeline for Autonomous Shards
//!
//! Praxis is an agent-orchestration substrate in which autonomous shards
//! cooperate through a shared logical fact base:
//! - Typed facts (strings, integers, atoms, mappings) with structural
//!   equality
//! - A constitution gate that arbitrates every proposed action
//! - A tactile router that binds permitted actions to tools under rate
//!   limits and timeouts
//! - Rule repair that validates learned rules and drives a bounded,
//!   LLM-assisted correction loop
//! - Cooperative cancellation and per-shard lifecycle state machines
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use praxis_core::prelude::*;
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let facts: Arc<dyn FactBase> = Arc::new(InMemoryFactBase::new());
//!     let budget = Arc::new(CallBudget::default());
//!
//!     let gate = ConstitutionGate::new(facts.clone(), Arc::new(PermitAll), GateConfig::default());
//!     let router = TactileRouter::builder(facts.clone(), budget)
//!         .executor(Arc::new(WorkspaceStore::new(".")))
//!         .build();
//!
//!     // Propose an action and run both gates once
//!     let action = ActionFact::new("a1", "/read_file", "README.md", BTreeMap::new());
//!     facts.assert(action.to_fact(predicates::PENDING_ACTION)).await?;
//!     gate.process_pending_actions().await?;
//!     router.process_permitted_actions().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Shards never call each other. Each owns a polling worker, communicates by
//! asserting and retracting facts, and degrades locally: a denied action, a
//! missing route, or a refused rate limit surfaces as a fact and the tick
//! continues. The fact base, the tool executor, the LLM client, and the cost
//! guard are injected collaborators behind traits.

pub mod config;
pub mod cost;
pub mod error;
pub mod executor;
pub mod fact;
pub mod factbase;
pub mod gate;
pub mod limiter;
pub mod llm;
pub mod repair;
pub mod router;
pub mod routes;
pub mod shard;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing with env-filter support (`RUST_LOG`). Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{
        BudgetConfig, GateConfig, PraxisConfig, RepairConfig, RouterConfig, RunnerConfig,
    };
    pub use crate::cost::{BudgetDecision, CallBudget, CostGuard};
    pub use crate::error::{PraxisError, Result};
    pub use crate::executor::{VirtualStore, WorkspaceStore};
    pub use crate::fact::{predicates, ActionFact, Fact, Term};
    pub use crate::factbase::{FactBase, InMemoryFactBase};
    pub use crate::gate::{ConstitutionGate, ConstitutionPolicy, PermitAll, Verdict};
    pub use crate::limiter::RateLimiter;
    pub use crate::llm::{LlmClient, ModelInfo, OllamaClient, StubLlm};
    pub use crate::repair::{
        PredicateCorpus, RepairResult, RuleRepair, RuleValidator, StaticCorpus,
    };
    pub use crate::router::{TactileRouter, TactileRouterBuilder, ToolCall, ToolCallStatus};
    pub use crate::routes::{RouteTable, ToolRoute};
    pub use crate::shard::{spawn_supervised, ShardCore, ShardState};
}
