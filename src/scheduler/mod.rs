//! Scrape scheduler.
//!
//! Decides when every enabled search config runs and drives execution
//! through a bounded worker pool. The in-memory queue is an index over
//! the persisted `next_run_at` column, so restarts lose nothing: overdue
//! configs come back due immediately and drain at a bounded rate.

pub mod cadence;
mod queue;
mod runner;

pub use queue::{DueEntry, RunQueue};
pub use runner::{RunHandler, WatchRunner};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerSettings;
use crate::models::{RunOutcome, SearchConfig, WatcherState, WatcherStats, WatcherStatus};
use crate::repository::{
    CredentialRepository, DieselError, RunRepository, SearchConfigRepository, StatusRepository,
};

/// Scheduler tuning, derived from [`SchedulerSettings`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_runs: usize,
    pub drain_batch_size: usize,
    pub failure_threshold: u32,
    pub backoff_exponent_cap: u32,
    pub max_backoff: Duration,
    pub drain_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            max_concurrent_runs: settings.max_concurrent_runs.max(1),
            drain_batch_size: settings.drain_batch_size.max(1),
            failure_threshold: settings.failure_threshold.max(1),
            backoff_exponent_cap: settings.backoff_exponent_cap,
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
            drain_timeout: Duration::from_secs(settings.drain_timeout_secs),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

struct SchedulerInner {
    configs: SearchConfigRepository,
    credentials: CredentialRepository,
    runs: RunRepository,
    status: StatusRepository,
    handler: Arc<dyn RunHandler>,
    cfg: SchedulerConfig,
    queue: Mutex<RunQueue>,
    wake: Notify,
    run_permits: Arc<Semaphore>,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
}

/// The scheduler. `start()` seeds the queue from the database and spawns
/// the coordinating loop; `stop()` drains it.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    shutdown: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        configs: SearchConfigRepository,
        credentials: CredentialRepository,
        runs: RunRepository,
        status: StatusRepository,
        handler: Arc<dyn RunHandler>,
        cfg: SchedulerConfig,
    ) -> Self {
        let run_permits = Arc::new(Semaphore::new(cfg.max_concurrent_runs));
        Self {
            inner: Arc::new(SchedulerInner {
                configs,
                credentials,
                runs,
                status,
                handler,
                cfg,
                queue: Mutex::new(RunQueue::new()),
                wake: Notify::new(),
                run_permits,
                runs_completed: AtomicU64::new(0),
                runs_failed: AtomicU64::new(0),
            }),
            shutdown: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    /// Load all enabled configs, seed the queue, and start the loop.
    ///
    /// Configs whose `next_run_at` is in the past become due immediately;
    /// the bounded drain batch and the global run semaphore keep a large
    /// backlog from landing on the services all at once.
    pub async fn start(&self) -> Result<(), DieselError> {
        let enabled = self.inner.configs.load_enabled().await?;
        let now = Utc::now();
        {
            let mut queue = self.inner.queue.lock().await;
            for config in &enabled {
                queue.push(&config.id, config.next_run_at.unwrap_or(now));
            }
        }
        info!(count = enabled.len(), "scheduler seeded from database");

        let inner = self.inner.clone();
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(run_loop(inner, shutdown));
        *self.loop_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Signal cancellation and wait for the loop to drain in-flight runs
    /// (bounded by the configured drain timeout).
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.loop_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Run a config as soon as capacity allows, without disturbing its
    /// periodic cadence: completion recomputes `next_run_at` as usual.
    pub async fn schedule_now(&self, config_id: &str) {
        self.inner.queue.lock().await.push(config_id, Utc::now());
        self.inner.wake.notify_one();
    }

    /// Wait until nothing is due and no run is in flight. Best-effort,
    /// for one-shot CLI drains; the daemon path never calls this.
    pub async fn wait_until_idle(&self) {
        loop {
            let queue_idle = {
                let mut queue = self.inner.queue.lock().await;
                match queue.next_due_at() {
                    None => true,
                    Some(due) => due > Utc::now(),
                }
            };
            let workers_idle = self.inner.run_permits.available_permits()
                == self.inner.cfg.max_concurrent_runs;
            if queue_idle && workers_idle {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// React to a config being created, edited, enabled or disabled.
    pub async fn on_config_changed(&self, config: &SearchConfig) -> Result<(), DieselError> {
        if !config.enabled {
            self.inner.queue.lock().await.remove(&config.id);
            self.inner.wake.notify_one();
            return Ok(());
        }

        let next = match config.last_run_at {
            Some(last) => cadence::next_run_at(
                last,
                config.interval_seconds,
                config.random_range_seconds,
            ),
            // Never ran before: due immediately
            None => Utc::now(),
        };
        self.inner.configs.set_next_run(&config.id, next).await?;
        self.inner.queue.lock().await.push(&config.id, next);
        self.inner.wake.notify_one();
        Ok(())
    }
}

/// The coordinating loop. Waits for the earliest due time, drains a
/// bounded batch, and hands each run to a worker under the global
/// semaphore. Never blocks on one slow job.
async fn run_loop(inner: Arc<SchedulerInner>, shutdown: CancellationToken) {
    let mut workers: JoinSet<()> = JoinSet::new();
    let mut status = WatcherStatus::new_watcher();
    beat(&inner, &mut status, WatcherState::Starting).await;
    let mut last_beat = tokio::time::Instant::now();

    loop {
        // Reap finished workers; results were already handled in-task.
        while workers.try_join_next().is_some() {}

        if last_beat.elapsed() >= inner.cfg.heartbeat_interval {
            beat(&inner, &mut status, WatcherState::Running).await;
            last_beat = tokio::time::Instant::now();
        }

        let next_due = inner.queue.lock().await.next_due_at();
        let now = Utc::now();
        let wait = match next_due {
            Some(due) if due <= now => None,
            Some(due) => Some((due - now).to_std().unwrap_or(Duration::ZERO)),
            None => Some(inner.cfg.heartbeat_interval),
        };

        if let Some(wait) = wait {
            // Cap the sleep so heartbeats keep flowing while idle
            let wait = wait.min(inner.cfg.heartbeat_interval);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = inner.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
            continue;
        }

        if shutdown.is_cancelled() {
            break;
        }

        let due = inner
            .queue
            .lock()
            .await
            .pop_due(Utc::now(), inner.cfg.drain_batch_size);
        if due.is_empty() {
            continue;
        }

        let mut stopping = false;
        for entry in due {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => {
                    // Not started yet; keep it scheduled for after restart
                    inner.queue.lock().await.push(&entry.config_id, entry.due_at);
                    stopping = true;
                    break;
                }
                permit = inner.run_permits.clone().acquire_owned() => {
                    permit.expect("run semaphore closed")
                }
            };

            let inner = inner.clone();
            let token = shutdown.child_token();
            workers.spawn(async move {
                run_one(inner, entry, permit, token).await;
            });
        }
        if stopping {
            break;
        }
    }

    // Graceful drain: wait for in-flight runs, bounded, then abort.
    let deadline = tokio::time::Instant::now() + inner.cfg.drain_timeout;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                warn!(remaining = workers.len(), "drain timeout; aborting in-flight runs");
                workers.abort_all();
                while workers.join_next().await.is_some() {}
                break;
            }
            joined = workers.join_next() => {
                if joined.is_none() {
                    break;
                }
            }
        }
    }

    beat(&inner, &mut status, WatcherState::Stopped).await;
    info!("scheduler stopped");
}

/// Execute one due entry and apply the completion transition.
///
/// All failure handling stays inside this task: one config's run can
/// never take down the loop or another config's cadence.
async fn run_one(
    inner: Arc<SchedulerInner>,
    entry: DueEntry,
    _permit: OwnedSemaphorePermit,
    cancel: CancellationToken,
) {
    let config = match inner.configs.get(&entry.config_id).await {
        Ok(Some(config)) if config.enabled => config,
        Ok(_) => return, // deleted or disabled since scheduling
        Err(e) => {
            error!(config = %entry.config_id, error = %e, "failed to load config");
            return;
        }
    };

    // Spawned but not yet started when shutdown arrived: keep the
    // computed due time instead of running.
    if cancel.is_cancelled() {
        inner.queue.lock().await.push(&config.id, entry.due_at);
        return;
    }

    let started = Utc::now();
    debug!(config = %config.id, "run starting");

    // A run in flight during shutdown finishes gracefully; the loop's
    // drain timeout is the hard stop.
    let result = inner.handler.run(&config).await;
    let finished = Utc::now();

    match result {
        Ok(stats) => {
            inner.runs_completed.fetch_add(1, Ordering::Relaxed);
            let next = cadence::next_run_at(
                finished,
                config.interval_seconds,
                config.random_range_seconds,
            );

            if let Err(e) = inner.configs.record_run(&config.id, finished, next, 0).await {
                error!(config = %config.id, error = %e, "failed to persist run result");
            }
            if let Err(e) = inner
                .runs
                .record(
                    &config.id,
                    started,
                    finished,
                    RunOutcome::Success,
                    None,
                    stats.listings_seen as i32,
                    stats.listings_new as i32,
                )
                .await
            {
                error!(config = %config.id, error = %e, "failed to persist run audit");
            }

            info!(
                config = %config.id,
                seen = stats.listings_seen,
                new = stats.listings_new,
                notified = stats.notifications_created,
                "run succeeded"
            );
            inner.queue.lock().await.push(&config.id, next);
        }
        Err(e) => {
            inner.runs_failed.fetch_add(1, Ordering::Relaxed);
            let failures = config.consecutive_failures.saturating_add(e.failure_weight());
            let outcome = e.outcome();
            let message = e.to_string();

            if let Err(db) = inner
                .runs
                .record(&config.id, started, finished, outcome, Some(&message), 0, 0)
                .await
            {
                error!(config = %config.id, error = %db, "failed to persist run audit");
            }

            if failures >= inner.cfg.failure_threshold {
                let reason = disable_reason(outcome);
                warn!(
                    config = %config.id,
                    failures,
                    reason,
                    "auto-disabling config after repeated failures"
                );

                if let Err(db) = inner
                    .configs
                    .record_run(&config.id, finished, finished, failures)
                    .await
                {
                    error!(config = %config.id, error = %db, "failed to persist run result");
                }
                if let Err(db) = inner.configs.disable(&config.id, reason).await {
                    error!(config = %config.id, error = %db, "failed to disable config");
                }

                // Repeated login failures also burn the stored credential
                if outcome == RunOutcome::CredentialError {
                    match inner
                        .credentials
                        .get(&config.user_id, &config.service_id)
                        .await
                    {
                        Ok(Some(credential)) => {
                            if let Err(db) = inner.credentials.invalidate(credential.id).await {
                                error!(error = %db, "failed to invalidate credential");
                            }
                        }
                        Ok(None) => {}
                        Err(db) => error!(error = %db, "failed to load credential"),
                    }
                }

                inner.queue.lock().await.remove(&config.id);
            } else {
                let delay = cadence::backoff_delay(
                    config.interval_seconds,
                    failures,
                    inner.cfg.backoff_exponent_cap,
                    inner.cfg.max_backoff,
                );
                let next = finished
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(
                            inner.cfg.max_backoff.as_secs() as i64
                        ));

                warn!(
                    config = %config.id,
                    error = %message,
                    failures,
                    delay_secs = delay.as_secs(),
                    "run failed; backing off"
                );

                if let Err(db) = inner
                    .configs
                    .record_run(&config.id, finished, next, failures)
                    .await
                {
                    error!(config = %config.id, error = %db, "failed to persist run result");
                }
                inner.queue.lock().await.push(&config.id, next);
            }
        }
    }

    inner.wake.notify_one();
}

fn disable_reason(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::CredentialError => "credential_invalid",
        RunOutcome::Blocked => "blocked",
        _ => "too_many_failures",
    }
}

async fn beat(inner: &SchedulerInner, status: &mut WatcherStatus, state: WatcherState) {
    let queue_size = inner.queue.lock().await.len() as u64;
    status.beat(
        state,
        &WatcherStats {
            runs_completed: inner.runs_completed.load(Ordering::Relaxed),
            runs_failed: inner.runs_failed.load(Ordering::Relaxed),
            queue_size: Some(queue_size),
        },
    );
    if let Err(e) = inner.status.upsert(status).await {
        warn!(error = %e, "failed to write heartbeat");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::ScrapeError;
    use crate::models::RunStats;
    use crate::repository::test_support::setup_test_db;
    use crate::repository::AsyncSqlitePool;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    struct MockHandler {
        fail_with: StdMutex<HashMap<String, &'static str>>,
        delay_ms: AtomicUsize,
        started: mpsc::UnboundedSender<String>,
        completed: mpsc::UnboundedSender<String>,
        concurrent: AtomicUsize,
        peak_concurrent: AtomicUsize,
    }

    impl MockHandler {
        fn new() -> (
            Arc<Self>,
            mpsc::UnboundedReceiver<String>,
            mpsc::UnboundedReceiver<String>,
        ) {
            let (started_tx, started_rx) = mpsc::unbounded_channel();
            let (completed_tx, completed_rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    fail_with: StdMutex::new(HashMap::new()),
                    delay_ms: AtomicUsize::new(0),
                    started: started_tx,
                    completed: completed_tx,
                    concurrent: AtomicUsize::new(0),
                    peak_concurrent: AtomicUsize::new(0),
                }),
                started_rx,
                completed_rx,
            )
        }

        fn fail(&self, config_id: &str, kind: &'static str) {
            self.fail_with
                .lock()
                .unwrap()
                .insert(config_id.to_string(), kind);
        }
    }

    #[async_trait]
    impl RunHandler for MockHandler {
        async fn run(&self, config: &SearchConfig) -> Result<RunStats, ScrapeError> {
            let _ = self.started.send(config.id.clone());
            let live = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_concurrent.fetch_max(live, Ordering::SeqCst);
            let delay_ms = self.delay_ms.load(Ordering::SeqCst);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
            }
            self.concurrent.fetch_sub(1, Ordering::SeqCst);

            let result = match self.fail_with.lock().unwrap().get(&config.id).copied() {
                Some("credential") => Err(ScrapeError::Credential("bad login".to_string())),
                Some("transient") => Err(ScrapeError::Transient("timeout".to_string())),
                _ => Ok(RunStats {
                    listings_seen: 3,
                    listings_new: 1,
                    notifications_created: 1,
                }),
            };
            let _ = self.completed.send(config.id.clone());
            result
        }
    }

    struct Ctx {
        scheduler: Scheduler,
        configs: SearchConfigRepository,
        credentials: CredentialRepository,
        runs: RunRepository,
        handler: Arc<MockHandler>,
        started: mpsc::UnboundedReceiver<String>,
        completed: mpsc::UnboundedReceiver<String>,
        _dir: tempfile::TempDir,
    }

    async fn setup(cfg: SchedulerConfig) -> Ctx {
        let (pool, dir) = setup_test_db().await;
        setup_with_pool(pool, dir, cfg).await
    }

    async fn setup_with_pool(
        pool: AsyncSqlitePool,
        dir: tempfile::TempDir,
        cfg: SchedulerConfig,
    ) -> Ctx {
        let (handler, started, completed) = MockHandler::new();
        let configs = SearchConfigRepository::new(pool.clone());
        let credentials = CredentialRepository::new(pool.clone());
        let runs = RunRepository::new(pool.clone());
        let scheduler = Scheduler::new(
            configs.clone(),
            credentials.clone(),
            runs.clone(),
            StatusRepository::new(pool),
            handler.clone(),
            cfg,
        );
        Ctx {
            scheduler,
            configs,
            credentials,
            runs,
            handler,
            started,
            completed,
            _dir: dir,
        }
    }

    fn test_cfg() -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_runs: 4,
            drain_batch_size: 8,
            failure_threshold: 4,
            backoff_exponent_cap: 6,
            max_backoff: Duration::from_secs(6 * 3600),
            drain_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
        }
    }

    fn config(interval: u32, jitter: u32) -> SearchConfig {
        SearchConfig::new(
            "user-1".to_string(),
            "svc".to_string(),
            vec!["bike".to_string()],
            interval,
            jitter,
        )
    }

    async fn recv_with_timeout(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for run")
            .expect("channel closed")
    }

    /// Poll the database until the condition holds; the scheduler persists
    /// shortly after the handler completes.
    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within timeout");
    }

    #[tokio::test]
    async fn test_due_config_runs_and_reschedules_with_jitter() {
        let mut ctx = setup(test_cfg()).await;
        let config = config(60, 15);
        ctx.configs.save(&config).await.unwrap();

        ctx.scheduler.start().await.unwrap();
        let ran = recv_with_timeout(&mut ctx.completed).await;
        assert_eq!(ran, config.id);

        let configs = ctx.configs.clone();
        let id = config.id.clone();
        wait_for(|| {
            let configs = configs.clone();
            let id = id.clone();
            async move {
                configs
                    .get(&id)
                    .await
                    .unwrap()
                    .unwrap()
                    .last_run_at
                    .is_some()
            }
        })
        .await;

        let stored = ctx.configs.get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.consecutive_failures, 0);
        let delta = (stored.next_run_at.unwrap() - stored.last_run_at.unwrap()).num_seconds();
        assert!((60..=75).contains(&delta), "delta {} out of [60, 75]", delta);

        let runs = ctx.runs.recent_for_config(&config.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].outcome, RunOutcome::Success);
        assert_eq!(runs[0].listings_new, 1);

        ctx.scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_schedule_now_triggers_immediate_run() {
        let mut ctx = setup(test_cfg()).await;
        let mut config = config(3600, 0);
        // Not due for an hour
        config.next_run_at = Some(Utc::now() + chrono::Duration::seconds(3600));
        ctx.configs.save(&config).await.unwrap();

        ctx.scheduler.start().await.unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(300), ctx.completed.recv())
                .await
                .is_err(),
            "config ran before schedule_now"
        );

        ctx.scheduler.schedule_now(&config.id).await;
        let ran = recv_with_timeout(&mut ctx.completed).await;
        assert_eq!(ran, config.id);

        ctx.scheduler.stop().await;

        // Completion recomputed the normal cadence
        let stored = ctx.configs.get(&config.id).await.unwrap().unwrap();
        let delta = (stored.next_run_at.unwrap() - stored.last_run_at.unwrap()).num_seconds();
        assert_eq!(delta, 3600);
    }

    #[tokio::test]
    async fn test_failure_applies_weighted_backoff() {
        let mut ctx = setup(test_cfg()).await;
        let config = config(60, 0);
        ctx.configs.save(&config).await.unwrap();
        ctx.handler.fail(&config.id, "credential");

        ctx.scheduler.start().await.unwrap();
        recv_with_timeout(&mut ctx.completed).await;

        let configs = ctx.configs.clone();
        let id = config.id.clone();
        wait_for(|| {
            let configs = configs.clone();
            let id = id.clone();
            async move {
                configs.get(&id).await.unwrap().unwrap().consecutive_failures > 0
            }
        })
        .await;
        ctx.scheduler.stop().await;

        let stored = ctx.configs.get(&config.id).await.unwrap().unwrap();
        // Credential failures weigh 2: delay = 60 * 2^2 = 240s
        assert_eq!(stored.consecutive_failures, 2);
        let delta = (stored.next_run_at.unwrap() - stored.last_run_at.unwrap()).num_seconds();
        assert_eq!(delta, 240);
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn test_transient_failure_weighs_one() {
        let mut ctx = setup(test_cfg()).await;
        let config = config(60, 0);
        ctx.configs.save(&config).await.unwrap();
        ctx.handler.fail(&config.id, "transient");

        ctx.scheduler.start().await.unwrap();
        recv_with_timeout(&mut ctx.completed).await;

        let configs = ctx.configs.clone();
        let id = config.id.clone();
        wait_for(|| {
            let configs = configs.clone();
            let id = id.clone();
            async move {
                configs.get(&id).await.unwrap().unwrap().consecutive_failures > 0
            }
        })
        .await;
        ctx.scheduler.stop().await;

        let stored = ctx.configs.get(&config.id).await.unwrap().unwrap();
        assert_eq!(stored.consecutive_failures, 1);
        let delta = (stored.next_run_at.unwrap() - stored.last_run_at.unwrap()).num_seconds();
        assert_eq!(delta, 120);
    }

    #[tokio::test]
    async fn test_repeated_credential_failures_disable_and_invalidate() {
        let mut ctx = setup(test_cfg()).await;
        let config = config(60, 0);
        ctx.configs.save(&config).await.unwrap();
        ctx.credentials
            .upsert(&config.user_id, &config.service_id, "envelope")
            .await
            .unwrap();
        ctx.handler.fail(&config.id, "credential");

        ctx.scheduler.start().await.unwrap();
        // First failure: weighted count 2, still enabled
        recv_with_timeout(&mut ctx.completed).await;
        let configs = ctx.configs.clone();
        let id = config.id.clone();
        wait_for(|| {
            let configs = configs.clone();
            let id = id.clone();
            async move {
                configs.get(&id).await.unwrap().unwrap().consecutive_failures == 2
            }
        })
        .await;

        // Second failure reaches the threshold of 4
        ctx.scheduler.schedule_now(&config.id).await;
        recv_with_timeout(&mut ctx.completed).await;
        let configs = ctx.configs.clone();
        let id = config.id.clone();
        wait_for(|| {
            let configs = configs.clone();
            let id = id.clone();
            async move { !configs.get(&id).await.unwrap().unwrap().enabled }
        })
        .await;
        ctx.scheduler.stop().await;

        let stored = ctx.configs.get(&config.id).await.unwrap().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.disabled_reason.as_deref(), Some("credential_invalid"));
        assert_eq!(stored.consecutive_failures, 4);

        let credential = ctx
            .credentials
            .get(&config.user_id, &config.service_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!credential.is_valid());
    }

    #[tokio::test]
    async fn test_failures_do_not_affect_other_configs() {
        let mut ctx = setup(test_cfg()).await;
        let failing = config(60, 0);
        let healthy = config(60, 15);
        ctx.configs.save(&failing).await.unwrap();
        ctx.configs.save(&healthy).await.unwrap();
        ctx.handler.fail(&failing.id, "transient");

        ctx.scheduler.start().await.unwrap();
        let mut seen = std::collections::HashSet::new();
        seen.insert(recv_with_timeout(&mut ctx.completed).await);
        seen.insert(recv_with_timeout(&mut ctx.completed).await);
        assert!(seen.contains(&failing.id));
        assert!(seen.contains(&healthy.id));

        let configs = ctx.configs.clone();
        let id = healthy.id.clone();
        wait_for(|| {
            let configs = configs.clone();
            let id = id.clone();
            async move {
                configs
                    .get(&id)
                    .await
                    .unwrap()
                    .unwrap()
                    .last_run_at
                    .is_some()
            }
        })
        .await;
        ctx.scheduler.stop().await;

        let stored = ctx.configs.get(&healthy.id).await.unwrap().unwrap();
        assert_eq!(stored.consecutive_failures, 0);
        assert!(stored.enabled);
    }

    #[tokio::test]
    async fn test_stop_drains_in_flight_runs() {
        let mut ctx = setup(test_cfg()).await;
        // Give the run a noticeable duration so stop() catches it mid-flight
        ctx.handler.delay_ms.store(200, Ordering::SeqCst);

        let config = config(60, 0);
        ctx.configs.save(&config).await.unwrap();

        ctx.scheduler.start().await.unwrap();
        // Wait for the run to start, then stop mid-flight
        recv_with_timeout(&mut ctx.started).await;
        ctx.scheduler.stop().await;

        // The run was allowed to finish and its result persisted
        let stored = ctx.configs.get(&config.id).await.unwrap().unwrap();
        assert!(stored.last_run_at.is_some());
    }

    #[tokio::test]
    async fn test_global_concurrency_is_bounded() {
        let cfg = SchedulerConfig {
            max_concurrent_runs: 1,
            ..test_cfg()
        };
        let (pool, dir) = setup_test_db().await;
        let mut ctx = setup_with_pool(pool, dir, cfg).await;
        ctx.handler.delay_ms.store(30, Ordering::SeqCst);

        // With one permit the peak concurrency observed by the handler
        // must stay at one even with several configs due at once.
        for _ in 0..4 {
            let c = config(60, 0);
            ctx.configs.save(&c).await.unwrap();
        }

        ctx.scheduler.start().await.unwrap();
        for _ in 0..4 {
            recv_with_timeout(&mut ctx.completed).await;
        }
        ctx.scheduler.stop().await;

        assert_eq!(ctx.handler.peak_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_config_changed_reschedules() {
        let ctx = setup(test_cfg()).await;
        let mut config = config(120, 30);
        let last = Utc::now() - chrono::Duration::seconds(10);
        config.last_run_at = Some(last);
        config.next_run_at = Some(Utc::now() + chrono::Duration::seconds(9999));
        ctx.configs.save(&config).await.unwrap();

        ctx.scheduler.on_config_changed(&config).await.unwrap();

        let stored = ctx.configs.get(&config.id).await.unwrap().unwrap();
        let delta = (stored.next_run_at.unwrap() - last).num_seconds();
        assert!(
            (120..=150).contains(&delta),
            "next_run_at {}s after last_run_at",
            delta
        );
    }

    #[tokio::test]
    async fn test_disabled_config_is_removed_from_queue() {
        let mut ctx = setup(test_cfg()).await;
        let mut config = config(60, 0);
        config.next_run_at = Some(Utc::now() + chrono::Duration::seconds(1));
        ctx.configs.save(&config).await.unwrap();

        ctx.scheduler.start().await.unwrap();
        config.enabled = false;
        ctx.configs.save(&config).await.unwrap();
        ctx.scheduler.on_config_changed(&config).await.unwrap();

        // The queued entry went stale; nothing runs
        assert!(
            tokio::time::timeout(Duration::from_millis(1500), ctx.completed.recv())
                .await
                .is_err()
        );
        ctx.scheduler.stop().await;
    }
}
