//! Tactile router: binds permitted actions to tools and supervises the calls
//!
//! The router polls `permitted_action` facts, selects a route, enforces the
//! route's rate limit, and either invokes the executor synchronously under
//! the route's timeout or publishes an `exec_request` for an asynchronous
//! executor. Every consumed action ends in exactly one `routing_result`, and
//! the `permitted_action` fact is retracted before the result is asserted.
//!
//! When unmapped actions are tolerated, the router accumulates them as
//! observations and periodically asks the LLM to propose a new route
//! (autopoiesis).

use crate::config::RouterConfig;
use crate::cost::CostGuard;
use crate::error::{PraxisError, Result};
use crate::executor::VirtualStore;
use crate::fact::{predicates, ActionFact, Fact, Term};
use crate::factbase::FactBase;
use crate::limiter::RateLimiter;
use crate::llm::LlmClient;
use crate::routes::{normalize, RouteTable, ToolRoute};
use crate::shard::ShardCore;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Lifecycle of a supervised tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    /// Queued, not yet handed to the executor
    Pending,
    /// Executor invocation in flight
    Executing,
    /// Executor returned output
    Completed,
    /// Executor returned an error
    Failed,
    /// Executor did not return within the route's deadline
    Timeout,
}

/// A tool invocation owned and supervised by the router.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Call id (also used in `exec_request` facts)
    pub id: String,
    /// Tool the route bound the action to
    pub tool: String,
    /// Normalized action verb
    pub action: String,
    /// Action target
    pub target: String,
    /// Action payload
    pub payload: BTreeMap<String, Term>,
    /// Digest of the payload for provenance
    pub args_digest: String,
    /// Route timeout applied to the invocation
    pub timeout: Duration,
    /// When the call was queued
    pub queued_at: DateTime<Utc>,
    /// When the executor was invoked
    pub started_at: Option<DateTime<Utc>>,
    /// When the invocation finished (either way)
    pub completed_at: Option<DateTime<Utc>>,
    /// Current status
    pub status: ToolCallStatus,
    /// Tool output on success
    pub result: Option<String>,
    /// Error detail on failure
    pub error: Option<String>,
}

impl ToolCall {
    fn new(route: &ToolRoute, action: &ActionFact) -> Self {
        let payload_json = serde_json::to_string(&Term::Map(action.payload.clone()).to_json())
            .unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(payload_json.as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tool: route.tool.clone(),
            action: normalize(&action.verb).to_string(),
            target: action.target.clone(),
            payload: action.payload.clone(),
            args_digest: digest[..16].to_string(),
            timeout: route.timeout,
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: ToolCallStatus::Pending,
            result: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone)]
struct UnhandledObservation {
    action: String,
    target: String,
}

/// System prompt fixing the reply contract the route parser consumes.
const AUTOPOIESIS_SYSTEM_PROMPT: &str = "You extend a tool routing table for an \
autonomous agent substrate. Given a list of actions that had no route, propose \
one new binding. Reply with exactly these lines and nothing else:\n\
ACTION: <action pattern>\n\
TOOL: <tool name>\n\
TIMEOUT: <seconds>\n\
RATE_LIMIT: <calls per minute, 0 for unlimited>\n\
REQUIRES_SAFE: <true|false>";

/// The tactile router shard.
pub struct TactileRouter {
    core: Arc<ShardCore>,
    config: RouterConfig,
    routes: RwLock<RouteTable>,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    executor: Option<Arc<dyn VirtualStore>>,
    llm: Option<Arc<dyn LlmClient>>,
    cost: Arc<dyn CostGuard>,
    pending_calls: RwLock<Vec<ToolCall>>,
    observations: Mutex<VecDeque<UnhandledObservation>>,
    routed: AtomicU64,
    failed: AtomicU64,
}

impl TactileRouter {
    /// Create a router builder.
    pub fn builder(facts: Arc<dyn FactBase>, cost: Arc<dyn CostGuard>) -> TactileRouterBuilder {
        TactileRouterBuilder::new(facts, cost)
    }

    /// The shard core (state, stop signal).
    pub fn core(&self) -> &Arc<ShardCore> {
        &self.core
    }

    /// Snapshot of the route table.
    pub async fn routes(&self) -> Vec<ToolRoute> {
        self.routes.read().await.routes()
    }

    /// Append a route at runtime.
    pub async fn add_route(&self, route: ToolRoute) {
        self.routes.write().await.add(route);
    }

    /// Snapshot of the supervised tool calls.
    pub async fn get_pending_calls(&self) -> Vec<ToolCall> {
        self.pending_calls.read().await.clone()
    }

    /// Supervision loop: route on every tick until stopped or idle.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let cancel = self.core.cancel_token();
        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.log_shutdown_summary("cancelled");
                    return Ok(());
                }
                _ = tick.tick() => {
                    self.core.heartbeat().await;
                    if let Err(e) = self.process_permitted_actions().await {
                        if matches!(e, PraxisError::Cancelled) {
                            self.log_shutdown_summary("cancelled");
                            return Ok(());
                        }
                        tracing::warn!(shard = %self.core.id(), error = %e, "router tick failed");
                    }
                    if self.cost.is_idle() {
                        self.log_shutdown_summary("idle");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn log_shutdown_summary(&self, cause: &str) {
        tracing::info!(
            shard = %self.core.id(),
            cause,
            routed = self.routed.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            "router shutting down"
        );
    }

    /// One routing pass over all `permitted_action` facts. Returns how many
    /// actions reached a terminal outcome.
    pub async fn process_permitted_actions(&self) -> Result<usize> {
        let permitted = self.core.facts().query(predicates::PERMITTED_ACTION).await?;
        let mut terminal = 0usize;

        for fact in permitted {
            if self.core.is_stopped() {
                return Err(PraxisError::Cancelled);
            }

            let Some(action) = ActionFact::from_fact(&fact) else {
                tracing::warn!(fact = %fact, "malformed permitted_action; discarding");
                self.core.withdraw(&fact).await;
                continue;
            };

            self.cost.record_activity();

            let verb = normalize(&action.verb).to_string();
            let route = self.routes.read().await.find_route(&verb).cloned();

            let Some(route) = route else {
                if self.config.allow_unmapped_actions {
                    self.observe_unhandled(&action).await;
                    self.maybe_propose_route().await;
                    continue;
                }
                self.fail_action(&fact, &action, "no_handler").await;
                self.core
                    .emit(Fact::new(
                        predicates::NO_ACTION_REASON,
                        vec![
                            Term::atom(action.intent_id().unwrap_or(&action.id)),
                            Term::atom("no_route"),
                        ],
                    ))
                    .await;
                terminal += 1;
                continue;
            };

            if !self.admit(&route).await {
                self.fail_action(&fact, &action, "rate_limit_exceeded").await;
                terminal += 1;
                continue;
            }

            let mut call = ToolCall::new(&route, &action);
            let call_id = call.id.clone();

            if let Some(executor) = self.executor.clone() {
                call.status = ToolCallStatus::Executing;
                call.started_at = Some(Utc::now());
                self.pending_calls.write().await.push(call);

                let outcome = self.execute(&executor, &route, &action).await?;

                self.core.withdraw(&fact).await;
                self.finish_call(&call_id, &outcome).await;
                match outcome {
                    CallOutcome::Success(output) => {
                        self.emit_result(&action.id, "success", &output).await;
                        self.routed.fetch_add(1, Ordering::Relaxed);
                    }
                    CallOutcome::Timeout => {
                        self.emit_result(&action.id, "failure", "timeout").await;
                        self.failed.fetch_add(1, Ordering::Relaxed);
                    }
                    CallOutcome::Error(detail) => {
                        self.emit_result(&action.id, "failure", &detail).await;
                        self.cost.record_error();
                        self.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            } else {
                self.pending_calls.write().await.push(call);
                self.core.withdraw(&fact).await;
                self.core
                    .emit(Fact::new(
                        predicates::EXEC_REQUEST,
                        vec![
                            Term::str(&route.tool),
                            Term::str(&action.target),
                            Term::int(route.timeout.as_secs() as i64),
                            Term::str(&call_id),
                            Term::int(Utc::now().timestamp()),
                        ],
                    ))
                    .await;
                self.routed.fetch_add(1, Ordering::Relaxed);
            }
            terminal += 1;
        }

        Ok(terminal)
    }

    /// Rate-limit admission for a route. A limiter exists only for routes
    /// with a positive limit.
    async fn admit(&self, route: &ToolRoute) -> bool {
        if route.rate_limit == 0 {
            return true;
        }
        let limiter = {
            let mut limiters = self.limiters.write().await;
            limiters
                .entry(route.tool.clone())
                .or_insert_with(|| Arc::new(RateLimiter::per_minute(route.rate_limit)))
                .clone()
        };
        limiter.allow()
    }

    async fn execute(
        &self,
        executor: &Arc<dyn VirtualStore>,
        route: &ToolRoute,
        action: &ActionFact,
    ) -> Result<CallOutcome> {
        let next_action = Fact::new(
            predicates::NEXT_ACTION,
            vec![
                Term::atom(&action.verb),
                Term::str(&action.target),
                Term::Map(action.payload.clone()),
            ],
        );

        let cancel = self.core.child_token();
        tokio::select! {
            _ = cancel.cancelled() => Err(PraxisError::Cancelled),
            res = tokio::time::timeout(route.timeout, executor.route_action(&next_action)) => {
                match res {
                    Ok(Ok(output)) => Ok(CallOutcome::Success(output)),
                    Ok(Err(e)) => Ok(CallOutcome::Error(format!("tool_error: {}", e))),
                    Err(_) => Ok(CallOutcome::Timeout),
                }
            }
        }
    }

    async fn finish_call(&self, call_id: &str, outcome: &CallOutcome) {
        let mut calls = self.pending_calls.write().await;
        if let Some(call) = calls.iter_mut().find(|c| c.id == call_id) {
            call.completed_at = Some(Utc::now());
            match outcome {
                CallOutcome::Success(output) => {
                    call.status = ToolCallStatus::Completed;
                    call.result = Some(output.clone());
                }
                CallOutcome::Timeout => {
                    call.status = ToolCallStatus::Timeout;
                    call.error = Some("timeout".to_string());
                }
                CallOutcome::Error(detail) => {
                    call.status = ToolCallStatus::Failed;
                    call.error = Some(detail.clone());
                }
            }
        }
    }

    /// Terminal failure: retract the action, then assert the result and the
    /// routing error.
    async fn fail_action(&self, fact: &Fact, action: &ActionFact, code: &str) {
        self.core.withdraw(fact).await;
        self.emit_result(&action.id, "failure", code).await;
        self.core
            .emit(Fact::new(
                predicates::ROUTING_ERROR,
                vec![
                    Term::atom(&action.verb),
                    Term::str(code),
                    Term::int(Utc::now().timestamp()),
                ],
            ))
            .await;
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    async fn emit_result(&self, id: &str, status: &str, detail: &str) {
        self.core
            .emit(Fact::new(
                predicates::ROUTING_RESULT,
                vec![Term::str(id), Term::atom(status), Term::str(detail)],
            ))
            .await;
    }

    async fn observe_unhandled(&self, action: &ActionFact) {
        let mut observations = self.observations.lock().await;
        observations.push_back(UnhandledObservation {
            action: normalize(&action.verb).to_string(),
            target: action.target.clone(),
        });
        while observations.len() > self.config.max_observations {
            observations.pop_front();
        }
    }

    /// Autopoiesis: once enough unhandled observations accumulate, ask the
    /// LLM for a new binding and append it to the route table.
    async fn maybe_propose_route(&self) {
        let Some(llm) = self.llm.clone() else {
            return;
        };

        let prompt = {
            let observations = self.observations.lock().await;
            if observations.len() < self.config.autopoiesis_threshold {
                return;
            }
            let mut lines = vec!["Unhandled actions:".to_string()];
            for obs in observations.iter() {
                lines.push(format!("- {} (target: {})", obs.action, obs.target));
            }
            lines.join("\n")
        };

        let decision = self.cost.can_call();
        if !decision.allowed {
            tracing::debug!(
                shard = %self.core.id(),
                reason = %decision.reason_or_default(),
                "autopoiesis skipped"
            );
            return;
        }

        let reply = match llm
            .complete_with_system(AUTOPOIESIS_SYSTEM_PROMPT, &prompt)
            .await
        {
            Ok(reply) => {
                self.cost.record_call();
                reply
            }
            Err(e) => {
                self.cost.record_error();
                tracing::warn!(shard = %self.core.id(), error = %e, "autopoiesis call failed");
                return;
            }
        };

        let Some(route) = parse_route_reply(&reply) else {
            tracing::debug!(shard = %self.core.id(), "autopoiesis reply had no usable route");
            return;
        };

        tracing::info!(
            shard = %self.core.id(),
            pattern = %route.action_pattern,
            tool = %route.tool,
            "autopoiesis added route"
        );
        let added = Fact::new(
            predicates::ROUTE_ADDED,
            vec![
                Term::str(&route.action_pattern),
                Term::str(&route.tool),
                Term::int(Utc::now().timestamp()),
            ],
        );
        self.routes.write().await.add(route);
        self.core.emit(added).await;
        self.observations.lock().await.clear();
    }
}

enum CallOutcome {
    Success(String),
    Timeout,
    Error(String),
}

/// Parse an autopoiesis reply into a route. Returns `None` unless both the
/// `ACTION:` and `TOOL:` lines carry non-empty values.
pub(crate) fn parse_route_reply(reply: &str) -> Option<ToolRoute> {
    let mut action = None;
    let mut tool = None;
    let mut timeout_secs: u64 = 30;
    let mut rate_limit: u32 = 0;
    let mut requires_safe = false;

    for line in reply.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("ACTION:") {
            let value = value.trim();
            if !value.is_empty() {
                action = Some(value.to_string());
            }
        } else if let Some(value) = line.strip_prefix("TOOL:") {
            let value = value.trim();
            if !value.is_empty() {
                tool = Some(value.to_string());
            }
        } else if let Some(value) = line.strip_prefix("TIMEOUT:") {
            if let Ok(parsed) = value.trim().parse() {
                timeout_secs = parsed;
            }
        } else if let Some(value) = line.strip_prefix("RATE_LIMIT:") {
            if let Ok(parsed) = value.trim().parse() {
                rate_limit = parsed;
            }
        } else if let Some(value) = line.strip_prefix("REQUIRES_SAFE:") {
            requires_safe = value.trim().eq_ignore_ascii_case("true");
        }
    }

    Some(
        ToolRoute::new(action?, tool?, Duration::from_secs(timeout_secs))
            .with_rate_limit(rate_limit)
            .with_requires_safe(requires_safe),
    )
}

/// Builder for [`TactileRouter`]
pub struct TactileRouterBuilder {
    facts: Arc<dyn FactBase>,
    cost: Arc<dyn CostGuard>,
    config: RouterConfig,
    routes: RouteTable,
    executor: Option<Arc<dyn VirtualStore>>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl TactileRouterBuilder {
    /// Create a builder with the default route table.
    pub fn new(facts: Arc<dyn FactBase>, cost: Arc<dyn CostGuard>) -> Self {
        Self {
            facts,
            cost,
            config: RouterConfig::default(),
            routes: RouteTable::with_defaults(),
            executor: None,
            llm: None,
        }
    }

    /// Set the router configuration.
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the seeded route table.
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    /// Wire the executor for synchronous dispatch.
    pub fn executor(mut self, executor: Arc<dyn VirtualStore>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Wire the LLM client used by autopoiesis.
    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Build the router.
    pub fn build(self) -> TactileRouter {
        TactileRouter {
            core: Arc::new(ShardCore::new("tactile_router", self.facts)),
            config: self.config,
            routes: RwLock::new(self.routes),
            limiters: RwLock::new(HashMap::new()),
            executor: self.executor,
            llm: self.llm,
            cost: self.cost,
            pending_calls: RwLock::new(Vec::new()),
            observations: Mutex::new(VecDeque::new()),
            routed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}
