// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process sync job queue.
//!
//! - `submit` is idempotent per job type while a job of that type is pending
//! - A fixed pool of workers drains a FIFO channel
//! - A per-type lock keeps at most one job of each type running
//! - Every state change is written through to the store
//! - Status reads come from a `DashMap`, with live counters for running jobs

use crate::config::Config;
use crate::db::SyncStore;
use crate::error::{AppError, ErrorKind, JobError};
use crate::models::{JobId, JobState, JobType, JobView, SyncJob, TransitionError};
use crate::services::rate_limit::RateLimitSnapshot;
use crate::services::sync::{JobContext, SyncOrchestrator, SyncSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// How often terminal jobs are pruned.
const PRUNE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Executes the work behind a job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job_type: JobType, ctx: &JobContext) -> Result<SyncSummary, JobError>;

    /// Refresh credentials after a `fatal_auth` failure.
    async fn reauthorize(&self) -> Result<(), JobError>;

    /// API usage to log when a job finishes.
    fn usage(&self) -> Option<RateLimitSnapshot> {
        None
    }
}

#[async_trait]
impl JobRunner for SyncOrchestrator {
    async fn run(&self, job_type: JobType, ctx: &JobContext) -> Result<SyncSummary, JobError> {
        SyncOrchestrator::run(self, job_type, ctx).await
    }

    async fn reauthorize(&self) -> Result<(), JobError> {
        self.client()
            .auth()
            .force_refresh()
            .await
            .map_err(JobError::from)
    }

    fn usage(&self) -> Option<RateLimitSnapshot> {
        Some(self.client().tracker().snapshot())
    }
}

/// Jobs recovered at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Queued jobs put back on the queue
    pub requeued: usize,
    /// Running jobs marked failed (a fresh job of the same type is submitted)
    pub orphaned: usize,
}

pub struct JobQueue {
    store: Arc<dyn SyncStore>,
    jobs: DashMap<JobId, SyncJob>,
    /// Queued or running job per type
    pending: DashMap<JobType, JobId>,
    /// Counters of running jobs
    live: DashMap<JobId, Arc<JobContext>>,
    /// One lock per job type, held while a job of that type runs
    slots: DashMap<JobType, Arc<Mutex<()>>>,
    sender: mpsc::UnboundedSender<JobId>,
    receiver: Mutex<mpsc::UnboundedReceiver<JobId>>,
    worker_count: usize,
    retention: Duration,
    history_limit: usize,
}

impl JobQueue {
    pub fn new(store: Arc<dyn SyncStore>, config: &Config) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            store,
            jobs: DashMap::new(),
            pending: DashMap::new(),
            live: DashMap::new(),
            slots: DashMap::new(),
            sender,
            receiver: Mutex::new(receiver),
            worker_count: config.worker_count.max(1),
            retention: config.job_retention,
            history_limit: config.job_history_limit,
        }
    }

    /// Submit a job, or return the pending job of the same type.
    pub async fn submit(&self, job_type: JobType) -> Result<JobId, AppError> {
        let job = match self.pending.entry(job_type) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                tracing::debug!(%job_type, job_id = %id, "Job already pending");
                return Ok(id);
            }
            Entry::Vacant(vacant) => {
                let job = SyncJob::new(job_type, Utc::now());
                self.jobs.insert(job.id, job.clone());
                vacant.insert(job.id);
                job
            }
        };

        if let Err(e) = self.store.put_job(&job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist submitted job");
            self.pending.remove_if(&job_type, |_, id| *id == job.id);
            self.jobs.remove(&job.id);
            return Err(e);
        }

        tracing::info!(job_id = %job.id, %job_type, "Job submitted");
        self.enqueue(job.id);
        Ok(job.id)
    }

    pub fn status(&self, job_id: JobId) -> Result<JobView, AppError> {
        let job = self
            .jobs
            .get(&job_id)
            .ok_or_else(|| AppError::NotFound(format!("Job {job_id}")))?;
        let mut view = job.view();
        if let Some(ctx) = self.live.get(&job_id) {
            view.progress = ctx.progress();
            view.attempts = ctx.attempts();
        }
        Ok(view)
    }

    /// Known jobs, newest first.
    pub fn list(&self) -> Vec<JobView> {
        let ids: Vec<JobId> = self.jobs.iter().map(|j| j.id).collect();
        let mut views: Vec<JobView> = ids
            .into_iter()
            .filter_map(|id| self.status(id).ok())
            .collect();
        views.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        views
    }

    /// Reconcile persisted jobs after a restart. Call before [`JobQueue::start`].
    ///
    /// Queued jobs go back on the queue in submission order. A job found
    /// running had no worker left, so it is marked failed with a `recovery`
    /// error and its type is resubmitted from scratch.
    pub async fn recover(&self) -> Result<RecoveryReport, AppError> {
        let now = Utc::now();
        let mut report = RecoveryReport::default();
        let mut resubmit = Vec::new();

        for mut job in self.store.list_jobs().await? {
            match job.state {
                JobState::Queued => {
                    self.pending.entry(job.job_type).or_insert(job.id);
                    self.jobs.insert(job.id, job.clone());
                    self.enqueue(job.id);
                    report.requeued += 1;
                }
                JobState::Running => {
                    let error = JobError::new(
                        ErrorKind::Recovery,
                        "process restarted while the job was running",
                    );
                    if let Err(e) = job.fail(error, now) {
                        tracing::error!(job_id = %job.id, error = %e, "Cannot fail orphaned job");
                        continue;
                    }
                    tracing::warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        "Orphaned job failed"
                    );
                    self.store.put_job(&job).await?;
                    resubmit.push(job.job_type);
                    self.jobs.insert(job.id, job);
                    report.orphaned += 1;
                }
                JobState::Succeeded | JobState::Failed => {
                    self.jobs.insert(job.id, job);
                }
            }
        }

        for job_type in resubmit {
            self.submit(job_type).await?;
        }

        tracing::info!(
            requeued = report.requeued,
            orphaned = report.orphaned,
            "Job recovery complete"
        );
        Ok(report)
    }

    /// Drop terminal jobs past retention, then trim history to the limit.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365));

        let mut terminal: Vec<(DateTime<Utc>, JobId)> = self
            .jobs
            .iter()
            .filter(|j| j.state.is_terminal())
            .map(|j| (j.finished_at.unwrap_or(j.submitted_at), j.id))
            .collect();
        terminal.sort_by(|a, b| b.0.cmp(&a.0));

        let expired: Vec<JobId> = terminal
            .iter()
            .enumerate()
            .filter(|(i, (finished, _))| *i >= self.history_limit || now - *finished > retention)
            .map(|(_, (_, id))| *id)
            .collect();

        for id in &expired {
            self.jobs.remove(id);
            if let Err(e) = self.store.delete_job(*id).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to delete pruned job");
            }
        }
        if !expired.is_empty() {
            tracing::info!(pruned = expired.len(), "Pruned job history");
        }
        expired.len()
    }

    /// Spawn the workers and the pruning task.
    pub fn start(self: &Arc<Self>, runner: Arc<dyn JobRunner>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.worker_count + 1);

        for worker in 0..self.worker_count {
            let queue = Arc::clone(self);
            let runner = Arc::clone(&runner);
            handles.push(tokio::spawn(async move {
                queue.worker_loop(worker, runner).await;
            }));
        }

        let queue = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                queue.prune(Utc::now()).await;
            }
        }));

        tracing::info!(workers = self.worker_count, "Job workers started");
        handles
    }

    fn enqueue(&self, job_id: JobId) {
        if self.sender.send(job_id).is_err() {
            tracing::error!(%job_id, "Job channel closed");
        }
    }

    async fn worker_loop(&self, worker: usize, runner: Arc<dyn JobRunner>) {
        loop {
            let next = self.receiver.lock().await.recv().await;
            let Some(job_id) = next else {
                tracing::info!(worker, "Job channel closed, worker exiting");
                return;
            };
            self.execute(worker, job_id, runner.as_ref()).await;
        }
    }

    async fn execute(&self, worker: usize, job_id: JobId, runner: &dyn JobRunner) {
        let Some(job_type) = self.jobs.get(&job_id).map(|j| j.job_type) else {
            tracing::warn!(worker, %job_id, "Dequeued unknown job");
            return;
        };

        let slot = self.slots.entry(job_type).or_default().clone();
        let _running = slot.lock().await;

        if self.transition(job_id, |job| job.start(Utc::now())).await.is_none() {
            return;
        }
        tracing::info!(worker, %job_id, %job_type, "Job running");

        let ctx = Arc::new(JobContext::new(job_id));
        self.live.insert(job_id, Arc::clone(&ctx));

        let mut result = runner.run(job_type, &ctx).await;
        if matches!(&result, Err(e) if e.kind == ErrorKind::FatalAuth) {
            tracing::warn!(%job_id, "Authorization rejected, refreshing token and re-running once");
            result = match runner.reauthorize().await {
                Ok(()) => runner.run(job_type, &ctx).await,
                Err(e) => Err(e),
            };
        }

        // Free the type first; the slot lock still holds back a successor.
        self.pending.remove_if(&job_type, |_, id| *id == job_id);

        let progress = ctx.progress();
        let attempts = ctx.attempts();
        let finished = self
            .transition(job_id, |job| {
                job.progress = progress.clone();
                job.attempts = attempts;
                match &result {
                    Ok(_) => job.succeed(Utc::now()),
                    Err(e) => job.fail(e.clone(), Utc::now()),
                }
            })
            .await;
        self.live.remove(&job_id);

        match (&result, finished) {
            (Ok(summary), Some(_)) => tracing::info!(
                %job_id,
                %job_type,
                attempts,
                created = summary.created,
                updated = summary.updated,
                skipped = summary.skipped,
                earliest_changed = ?summary.earliest_changed,
                "Job succeeded"
            ),
            (Err(e), Some(_)) => tracing::error!(
                %job_id,
                %job_type,
                attempts,
                error_kind = %e.kind,
                error = %e.message,
                "Job failed"
            ),
            (_, None) => {}
        }

        if let Some(usage) = runner.usage() {
            tracing::info!(
                short_used = usage.short.consumed,
                short_limit = usage.short.ceiling,
                daily_used = usage.daily.consumed,
                daily_limit = usage.daily.ceiling,
                "Strava API usage"
            );
        }
    }

    /// Apply a state change, write it through, then publish it. `None` if
    /// the job is unknown or the change was rejected.
    ///
    /// Only the worker holding the job changes it, so the copy is not stale.
    async fn transition<F>(&self, job_id: JobId, change: F) -> Option<SyncJob>
    where
        F: FnOnce(&mut SyncJob) -> Result<(), TransitionError>,
    {
        let mut updated = self.jobs.get(&job_id)?.clone();
        if let Err(e) = change(&mut updated) {
            tracing::error!(%job_id, error = %e, "Rejected job transition");
            return None;
        }

        if let Err(e) = self.store.put_job(&updated).await {
            tracing::error!(%job_id, error = %e, "Failed to persist job state");
        }
        self.jobs.insert(job_id, updated.clone());
        Some(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeRunner {
        runs: AtomicUsize,
        reauths: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        /// Kinds returned by successive runs; success once exhausted
        failures: std::sync::Mutex<Vec<ErrorKind>>,
    }

    #[async_trait]
    impl JobRunner for FakeRunner {
        async fn run(
            &self,
            _job_type: JobType,
            _ctx: &JobContext,
        ) -> Result<SyncSummary, JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            let failure = {
                let mut failures = self.failures.lock().unwrap();
                (!failures.is_empty()).then(|| failures.remove(0))
            };
            match failure {
                Some(kind) => Err(JobError::new(kind, "scripted failure")),
                None => Ok(SyncSummary::default()),
            }
        }

        async fn reauthorize(&self) -> Result<(), JobError> {
            self.reauths.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn queue(store: Arc<MemoryDb>) -> Arc<JobQueue> {
        let config = Config {
            worker_count: 2,
            job_history_limit: 2,
            ..Config::default()
        };
        Arc::new(JobQueue::new(store, &config))
    }

    async fn wait_terminal(queue: &JobQueue, job_id: JobId) -> JobView {
        for _ in 0..500 {
            let view = queue.status(job_id).unwrap();
            if view.state.is_terminal() {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn submit_is_idempotent_per_type() {
        let queue = queue(Arc::new(MemoryDb::new()));
        let first = queue.submit(JobType::Activities).await.unwrap();
        let second = queue.submit(JobType::Activities).await.unwrap();
        let other = queue.submit(JobType::Streams).await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(queue.list().len(), 2);
        assert_eq!(queue.status(first).unwrap().state, JobState::Queued);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let queue = queue(Arc::new(MemoryDb::new()));
        let err = queue.status(uuid::Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn worker_runs_job_and_frees_the_type() {
        let store = Arc::new(MemoryDb::new());
        let queue = queue(store.clone());
        let runner = Arc::new(FakeRunner::default());
        queue.start(runner.clone());

        let id = queue.submit(JobType::Segments).await.unwrap();
        let view = wait_terminal(&queue, id).await;
        assert_eq!(view.state, JobState::Succeeded);
        assert!(view.started_at.is_some() && view.finished_at.is_some());

        let persisted = store.list_jobs().await.unwrap();
        assert_eq!(persisted[0].state, JobState::Succeeded);

        let next = queue.submit(JobType::Segments).await.unwrap();
        assert_ne!(next, id);
    }

    #[tokio::test]
    async fn fatal_auth_reauthorizes_and_reruns_once() {
        let queue = queue(Arc::new(MemoryDb::new()));
        let runner = Arc::new(FakeRunner {
            failures: std::sync::Mutex::new(vec![ErrorKind::FatalAuth]),
            ..Default::default()
        });
        queue.start(runner.clone());

        let id = queue.submit(JobType::Activities).await.unwrap();
        assert_eq!(wait_terminal(&queue, id).await.state, JobState::Succeeded);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
        assert_eq!(runner.reauths.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_fatal_auth_fails_the_job() {
        let queue = queue(Arc::new(MemoryDb::new()));
        let runner = Arc::new(FakeRunner {
            failures: std::sync::Mutex::new(vec![ErrorKind::FatalAuth, ErrorKind::FatalAuth]),
            ..Default::default()
        });
        queue.start(runner.clone());

        let id = queue.submit(JobType::Activities).await.unwrap();
        let view = wait_terminal(&queue, id).await;
        assert_eq!(view.state, JobState::Failed);
        assert_eq!(view.error.unwrap().kind, ErrorKind::FatalAuth);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_failures_are_not_rerun() {
        let queue = queue(Arc::new(MemoryDb::new()));
        let runner = Arc::new(FakeRunner {
            failures: std::sync::Mutex::new(vec![ErrorKind::RetriesExhausted]),
            ..Default::default()
        });
        queue.start(runner.clone());

        let id = queue.submit(JobType::Streams).await.unwrap();
        let view = wait_terminal(&queue, id).await;
        assert_eq!(view.error.unwrap().kind, ErrorKind::RetriesExhausted);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
        assert_eq!(runner.reauths.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recovery_requeues_queued_and_fails_orphans() {
        let store = Arc::new(MemoryDb::new());
        let now = Utc::now();

        let queued = SyncJob::new(JobType::Activities, now);
        let mut orphan = SyncJob::new(JobType::Streams, now);
        orphan.start(now).unwrap();
        store.put_job(&queued).await.unwrap();
        store.put_job(&orphan).await.unwrap();

        let queue = queue(store.clone());
        let report = queue.recover().await.unwrap();
        assert_eq!(report, RecoveryReport { requeued: 1, orphaned: 1 });

        let failed = queue.status(orphan.id).unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.error.unwrap().kind, ErrorKind::Recovery);

        // Re-submitting either type returns the pending job.
        assert_eq!(queue.submit(JobType::Activities).await.unwrap(), queued.id);
        let fresh = queue.submit(JobType::Streams).await.unwrap();
        assert_ne!(fresh, orphan.id);

        queue.start(Arc::new(FakeRunner::default()));
        assert_eq!(wait_terminal(&queue, queued.id).await.state, JobState::Succeeded);
        assert_eq!(wait_terminal(&queue, fresh).await.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn same_type_never_runs_concurrently() {
        let store = Arc::new(MemoryDb::new());
        let now = Utc::now();
        let a = SyncJob::new(JobType::Activities, now);
        let b = SyncJob::new(JobType::Activities, now + chrono::Duration::seconds(1));
        store.put_job(&a).await.unwrap();
        store.put_job(&b).await.unwrap();

        let queue = queue(store);
        queue.recover().await.unwrap();
        let runner = Arc::new(FakeRunner::default());
        queue.start(runner.clone());

        wait_terminal(&queue, a.id).await;
        wait_terminal(&queue, b.id).await;
        assert_eq!(runner.max_running.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn prune_enforces_history_limit_and_retention() {
        let store = Arc::new(MemoryDb::new());
        let queue = queue(store.clone());
        let runner = Arc::new(FakeRunner::default());
        queue.start(runner);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = queue.submit(JobType::Segments).await.unwrap();
            wait_terminal(&queue, id).await;
            ids.push(id);
        }

        assert_eq!(queue.prune(Utc::now()).await, 1);
        assert!(queue.status(ids[0]).is_err());
        assert!(queue.status(ids[2]).is_ok());

        let later = Utc::now() + chrono::Duration::days(2);
        assert_eq!(queue.prune(later).await, 2);
        assert!(queue.list().is_empty());
        assert!(store.list_jobs().await.unwrap().is_empty());
    }
}
