// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Job lifecycle across a restart: jobs persisted by one process are
//! reconciled by the next.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use training_load_sync::config::Config;
use training_load_sync::db::{MemoryDb, SyncStore};
use training_load_sync::error::{ErrorKind, JobError};
use training_load_sync::models::{JobState, JobType, SyncJob};
use training_load_sync::AppState;

mod common;

#[tokio::test]
async fn test_recovery_reconciles_persisted_jobs() {
    let store = Arc::new(MemoryDb::new());
    let now = Utc::now();

    // Left behind by the previous process
    let queued = SyncJob::new(JobType::Segments, now);
    store.put_job(&queued).await.unwrap();

    let mut interrupted = SyncJob::new(JobType::Activities, now);
    interrupted.start(now).unwrap();
    store.put_job(&interrupted).await.unwrap();

    let mut finished = SyncJob::new(JobType::Streams, now - ChronoDuration::minutes(5));
    finished.start(now - ChronoDuration::minutes(5)).unwrap();
    finished
        .fail(
            JobError::new(ErrorKind::QuotaExhausted, "daily limit"),
            now - ChronoDuration::minutes(4),
        )
        .unwrap();
    store.put_job(&finished).await.unwrap();

    let (state, _orchestrator) = AppState::new(Config::default(), store.clone());
    let report = state.queue.recover().await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(report.orphaned, 1);

    // Queued job is still pending under its old ID
    let view = state.queue.status(queued.id).unwrap();
    assert_eq!(view.state, JobState::Queued);
    assert_eq!(
        state.queue.submit(JobType::Segments).await.unwrap(),
        queued.id
    );

    // Interrupted job is failed and replaced by a fresh submission
    let view = state.queue.status(interrupted.id).unwrap();
    assert_eq!(view.state, JobState::Failed);
    assert_eq!(view.error.unwrap().kind, ErrorKind::Recovery);
    let replacement = state.queue.submit(JobType::Activities).await.unwrap();
    assert_ne!(replacement, interrupted.id);
    assert_eq!(
        state.queue.status(replacement).unwrap().state,
        JobState::Queued
    );

    // Terminal history is kept verbatim
    let view = state.queue.status(finished.id).unwrap();
    assert_eq!(view.state, JobState::Failed);
    assert_eq!(view.error.unwrap().kind, ErrorKind::QuotaExhausted);

    // The failure is written through
    let persisted = store.list_jobs().await.unwrap();
    let stored = persisted.iter().find(|j| j.id == interrupted.id).unwrap();
    assert_eq!(stored.state, JobState::Failed);
    assert!(stored.finished_at.is_some());
    println!("✓ Recovery requeued 1 job and restarted 1 orphan");
}

#[tokio::test]
async fn test_submitted_jobs_are_persisted() {
    let (_app, state, store) = common::create_test_app();

    let job_id = state.queue.submit(JobType::Streams).await.unwrap();

    let persisted = store.list_jobs().await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].id, job_id);
    assert_eq!(persisted[0].state, JobState::Queued);
    assert_eq!(persisted[0].job_type, JobType::Streams);
}

#[tokio::test]
async fn test_prune_drops_expired_terminal_jobs() {
    let store = Arc::new(MemoryDb::new());
    let old = Utc::now() - ChronoDuration::days(3);

    let mut stale = SyncJob::new(JobType::Activities, old);
    stale.start(old).unwrap();
    stale.succeed(old).unwrap();
    store.put_job(&stale).await.unwrap();

    let (state, _orchestrator) = AppState::new(Config::default(), store.clone());
    state.queue.recover().await.unwrap();
    let live = state.queue.submit(JobType::Activities).await.unwrap();

    assert_eq!(state.queue.prune(Utc::now()).await, 1);
    assert!(state.queue.status(stale.id).is_err());
    assert!(state.queue.status(live).is_ok());
    assert_eq!(store.list_jobs().await.unwrap().len(), 1);
}
