//! Campaign runner: singleton supervision of durable campaigns
//!
//! The runner owns at most one orchestrator at a time. Each tick it emits a
//! heartbeat, checks the active orchestrator's completion without blocking,
//! and, when idle, scans the campaign directory for the best runnable
//! campaign. Failures back off exponentially (doubling, capped) before the
//! next start attempt; successes reset the backoff.

use crate::campaign::{best_runnable, campaigns_dir, scan_campaigns};
use crate::error::{Result, SupervisorError};
use async_trait::async_trait;
use chrono::Utc;
use praxis_core::config::RunnerConfig;
use praxis_core::fact::{predicates, Fact, Term};
use praxis_core::factbase::FactBase;
use praxis_core::shard::ShardCore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Options the runner resumes campaigns with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignOptions {
    /// Replan automatically when a step fails
    pub auto_replan: bool,
    /// Checkpoint campaign state on failure
    pub checkpoint_on_fail: bool,
    /// Disable per-step timeouts for long resumed work
    pub disable_timeouts: bool,
}

impl CampaignOptions {
    /// The options used for unattended resumption.
    pub fn resumption() -> Self {
        Self {
            auto_replan: true,
            checkpoint_on_fail: true,
            disable_timeouts: true,
        }
    }
}

/// A running campaign engine. The runner treats it as a black box with a
/// cancellable entry point.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Drive the campaign to completion. Implementations must observe
    /// `cancel` and return [`SupervisorError::Cancelled`] when interrupted.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// Creates orchestrators for campaign ids. The concrete campaign engine
/// stays outside the runner.
#[async_trait]
pub trait OrchestratorFactory: Send + Sync {
    /// Create an orchestrator for `campaign_id`.
    async fn create(
        &self,
        campaign_id: &str,
        options: CampaignOptions,
    ) -> Result<Arc<dyn Orchestrator>>;
}

struct ActiveCampaign {
    id: String,
    handle: JoinHandle<Result<()>>,
    cancel: CancellationToken,
}

struct RunnerState {
    active: Option<ActiveCampaign>,
    backoff_secs: u64,
    last_attempt: Option<Instant>,
}

/// The campaign runner shard.
pub struct CampaignRunner {
    core: Arc<ShardCore>,
    config: RunnerConfig,
    factory: Arc<dyn OrchestratorFactory>,
    state: Mutex<RunnerState>,
}

impl CampaignRunner {
    /// Create a runner over `facts` that starts orchestrators via `factory`.
    pub fn new(
        facts: Arc<dyn FactBase>,
        factory: Arc<dyn OrchestratorFactory>,
        config: RunnerConfig,
    ) -> Self {
        let backoff_secs = config.initial_backoff_secs;
        Self {
            core: Arc::new(ShardCore::new("campaign_runner", facts)),
            config,
            factory,
            state: Mutex::new(RunnerState {
                active: None,
                backoff_secs,
                last_attempt: None,
            }),
        }
    }

    /// The shard core (state, stop signal).
    pub fn core(&self) -> &Arc<ShardCore> {
        &self.core
    }

    /// Id of the currently supervised campaign, if any.
    pub async fn active_campaign(&self) -> Option<String> {
        self.state.lock().await.active.as_ref().map(|a| a.id.clone())
    }

    /// Supervision loop: tick until stopped, then shut the active
    /// orchestrator down cooperatively.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let cancel = self.core.cancel_token();
        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.shutdown().await;
                    return Ok(());
                }
                _ = tick.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(shard = %self.core.id(), error = %e, "runner tick failed");
                    }
                }
            }
        }
    }

    /// Cancel the active orchestrator and wait briefly for it to unwind.
    pub async fn shutdown(&self) {
        let active = self.state.lock().await.active.take();
        if let Some(active) = active {
            info!(campaign = %active.id, "cancelling active orchestrator");
            active.cancel.cancel();
            if tokio::time::timeout(Duration::from_secs(5), active.handle)
                .await
                .is_err()
            {
                warn!(campaign = %active.id, "orchestrator did not unwind in time");
            }
        }
    }

    /// One supervision pass: heartbeat, completion check, campaign start.
    pub async fn tick(&self) -> Result<()> {
        self.core
            .emit(Fact::new(
                predicates::CAMPAIGN_RUNNER_HEARTBEAT,
                vec![Term::int(Utc::now().timestamp())],
            ))
            .await;

        let mut state = self.state.lock().await;

        match state.active.as_ref().map(|a| a.handle.is_finished()) {
            Some(false) => return Ok(()),
            Some(true) => {
                if let Some(finished) = state.active.take() {
                    self.observe_completion(&mut state, finished).await;
                }
            }
            None => {}
        }

        let dir = campaigns_dir(&self.config.workspace);
        let records = scan_campaigns(&dir).await?;
        let Some(best) = best_runnable(&records) else {
            return Ok(());
        };

        if let Some(last) = state.last_attempt {
            if last.elapsed() < Duration::from_secs(state.backoff_secs) {
                return Ok(());
            }
        }
        state.last_attempt = Some(Instant::now());

        let orchestrator = match self
            .factory
            .create(&best.id, CampaignOptions::resumption())
            .await
        {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                self.record_failure(&mut state, &best.id, &e.to_string()).await;
                return Ok(());
            }
        };

        let cancel = self.core.child_token();
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move { orchestrator.run(worker_cancel).await });

        info!(campaign = %best.id, "campaign orchestrator started");
        self.core
            .emit(Fact::new(
                predicates::CAMPAIGN_RUNNER_ACTIVE,
                vec![Term::str(&best.id), Term::int(Utc::now().timestamp())],
            ))
            .await;

        state.active = Some(ActiveCampaign {
            id: best.id.clone(),
            handle,
            cancel,
        });

        Ok(())
    }

    async fn observe_completion(&self, state: &mut RunnerState, finished: ActiveCampaign) {
        match finished.handle.await {
            Ok(Ok(())) => {
                info!(campaign = %finished.id, "campaign completed");
                self.core
                    .emit(Fact::new(
                        predicates::CAMPAIGN_RUNNER_SUCCESS,
                        vec![Term::str(&finished.id), Term::int(Utc::now().timestamp())],
                    ))
                    .await;
                state.backoff_secs = self.config.initial_backoff_secs;
            }
            Ok(Err(SupervisorError::Cancelled)) => {
                info!(campaign = %finished.id, "campaign cancelled");
            }
            Ok(Err(e)) => {
                self.record_failure(state, &finished.id, &e.to_string()).await;
            }
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "orchestrator panicked".to_string()
                } else {
                    format!("orchestrator aborted: {}", join_err)
                };
                self.record_failure(state, &finished.id, &reason).await;
            }
        }
    }

    async fn record_failure(&self, state: &mut RunnerState, id: &str, reason: &str) {
        warn!(campaign = %id, %reason, "campaign failed");
        self.core
            .emit(Fact::new(
                predicates::CAMPAIGN_RUNNER_FAILURE,
                vec![
                    Term::str(id),
                    Term::str(reason),
                    Term::int(Utc::now().timestamp()),
                ],
            ))
            .await;
        state.backoff_secs = (state.backoff_secs * 2).min(self.config.max_backoff_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_core::factbase::InMemoryFactBase;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Succeed,
        Fail,
        RunUntilCancelled,
    }

    struct MockOrchestrator {
        behavior: Behavior,
    }

    #[async_trait]
    impl Orchestrator for MockOrchestrator {
        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(SupervisorError::Orchestrator("step exploded".to_string())),
                Behavior::RunUntilCancelled => {
                    cancel.cancelled().await;
                    Err(SupervisorError::Cancelled)
                }
            }
        }
    }

    struct MockFactory {
        behavior: fn() -> Behavior,
        created: AtomicUsize,
    }

    impl MockFactory {
        fn new(behavior: fn() -> Behavior) -> Self {
            Self {
                behavior,
                created: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OrchestratorFactory for MockFactory {
        async fn create(
            &self,
            _campaign_id: &str,
            options: CampaignOptions,
        ) -> Result<Arc<dyn Orchestrator>> {
            assert_eq!(options, CampaignOptions::resumption());
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockOrchestrator {
                behavior: (self.behavior)(),
            }))
        }
    }

    fn write_campaign(workspace: &std::path::Path, id: &str, status: &str) {
        let dir = campaigns_dir(workspace);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(
            dir.join(format!("{}.json", id)),
            format!(
                r#"{{"id": "{}", "status": "{}", "updated_at": "2026-07-01T12:00:00Z"}}"#,
                id, status
            ),
        )
        .expect("write campaign");
    }

    fn runner_in(
        workspace: &std::path::Path,
        factory: Arc<MockFactory>,
    ) -> (Arc<InMemoryFactBase>, CampaignRunner) {
        let fb = Arc::new(InMemoryFactBase::new());
        let config = RunnerConfig {
            workspace: workspace.to_path_buf(),
            ..RunnerConfig::default()
        };
        let runner = CampaignRunner::new(fb.clone() as Arc<dyn FactBase>, factory, config);
        (fb, runner)
    }

    #[tokio::test]
    async fn test_heartbeat_every_tick() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let factory = Arc::new(MockFactory::new(|| Behavior::Succeed));
        let (fb, runner) = runner_in(dir.path(), factory);

        runner.tick().await.expect("tick failed");
        runner.tick().await.expect("tick failed");

        let beats = fb
            .query(predicates::CAMPAIGN_RUNNER_HEARTBEAT)
            .await
            .unwrap();
        assert_eq!(beats.len(), 2);
    }

    #[tokio::test]
    async fn test_starts_best_campaign_then_records_success() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        write_campaign(dir.path(), "c1", "active");
        let factory = Arc::new(MockFactory::new(|| Behavior::Succeed));
        let (fb, runner) = runner_in(dir.path(), factory.clone());

        runner.tick().await.expect("tick failed");

        let active = fb.query(predicates::CAMPAIGN_RUNNER_ACTIVE).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].arg(0).and_then(Term::as_str), Some("c1"));

        // Give the (instantly succeeding) orchestrator a moment, then observe
        tokio::time::sleep(Duration::from_millis(50)).await;
        runner.tick().await.expect("tick failed");

        let success = fb.query(predicates::CAMPAIGN_RUNNER_SUCCESS).await.unwrap();
        assert_eq!(success.len(), 1);
        assert_eq!(success[0].arg(0).and_then(Term::as_str), Some("c1"));
        assert!(runner.active_campaign().await.is_none());
    }

    #[tokio::test]
    async fn test_single_flight() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        write_campaign(dir.path(), "c1", "active");
        write_campaign(dir.path(), "c2", "active");
        let factory = Arc::new(MockFactory::new(|| Behavior::RunUntilCancelled));
        let (fb, runner) = runner_in(dir.path(), factory.clone());

        for _ in 0..3 {
            runner.tick().await.expect("tick failed");
        }

        // Two runnable campaigns, three ticks, one orchestrator
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        let active = fb.query(predicates::CAMPAIGN_RUNNER_ACTIVE).await.unwrap();
        assert_eq!(active.len(), 1);

        runner.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_records_fact_and_backs_off() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        write_campaign(dir.path(), "c1", "active");
        let factory = Arc::new(MockFactory::new(|| Behavior::Fail));
        let (fb, runner) = runner_in(dir.path(), factory.clone());

        runner.tick().await.expect("tick failed");
        tokio::time::sleep(Duration::from_millis(50)).await;
        runner.tick().await.expect("tick failed");

        let failures = fb.query(predicates::CAMPAIGN_RUNNER_FAILURE).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].arg(0).and_then(Term::as_str), Some("c1"));
        assert!(failures[0]
            .arg(1)
            .and_then(Term::as_str)
            .unwrap_or_default()
            .contains("step exploded"));

        assert_eq!(runner.state.lock().await.backoff_secs, 10);

        // Backoff is honoured: the campaign is still runnable but no new
        // orchestrator starts yet
        runner.tick().await.expect("tick failed");
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(
            fb.query(predicates::CAMPAIGN_RUNNER_ACTIVE).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_backoff_caps_at_maximum() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let factory = Arc::new(MockFactory::new(|| Behavior::Fail));
        let (_fb, runner) = runner_in(dir.path(), factory);

        let mut state = runner.state.lock().await;
        state.backoff_secs = 200;
        runner.record_failure(&mut state, "c1", "again").await;
        assert_eq!(state.backoff_secs, 300);
        runner.record_failure(&mut state, "c1", "again").await;
        assert_eq!(state.backoff_secs, 300);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_active_orchestrator() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        write_campaign(dir.path(), "c1", "paused");
        let factory = Arc::new(MockFactory::new(|| Behavior::RunUntilCancelled));
        let (fb, runner) = runner_in(dir.path(), factory);

        runner.tick().await.expect("tick failed");
        assert_eq!(runner.active_campaign().await.as_deref(), Some("c1"));

        runner.shutdown().await;
        assert!(runner.active_campaign().await.is_none());

        // Cooperative cancellation is not a failure
        assert!(fb
            .query(predicates::CAMPAIGN_RUNNER_FAILURE)
            .await
            .unwrap()
            .is_empty());
    }
}
