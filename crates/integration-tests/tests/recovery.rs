//! Restart recovery: watchers are rebuilt from the persisted store

mod common;

use common::{events_until_stopped, memory_pool, Stack, GENERATION_COST};
use std::sync::Arc;
use trainwatch_core::application::{WatchEvent, WatcherRecovery};
use trainwatch_core::domain::{JobStatus, PromptParams, SubjectKey, TrainingJob, WatchGranularity};
use trainwatch_core::port::time_provider::SystemTimeProvider;
use trainwatch_core::port::JobRepository;

fn recovery(stack: &Stack) -> WatcherRecovery {
    WatcherRecovery::new(
        stack.repo.clone(),
        stack.watch.clone(),
        Arc::new(SystemTimeProvider),
    )
}

/// A job whose submission never reached the provider
fn orphan(owner: &str) -> TrainingJob {
    TrainingJob::new(
        format!("orphan-{}", owner),
        1,
        owner,
        "https://storage.example/dataset.zip",
        PromptParams {
            trigger_word: "000000042".to_string(),
            gender: "man".to_string(),
            style_link: None,
        },
    )
}

#[tokio::test]
async fn test_restart_resumes_watchers_and_completes() {
    let pool = memory_pool().await;

    // First process: job submitted, then the daemon goes away before completion
    let before = Stack::on_pool(pool.clone(), WatchGranularity::PerJob);
    before.open_account("alice", 10).await;
    let job = before.insert_job("alice", "r8-restart").await;
    let stray = orphan("alice");
    before.repo.insert(&stray).await.unwrap();
    before.watch.watch_job(&job);
    before.watch.shutdown(std::time::Duration::from_secs(1)).await;
    assert_eq!(before.job(&job).await.status, JobStatus::Starting);

    // Second process over the same database
    let after = Stack::on_pool(pool, WatchGranularity::PerJob);
    after.training.succeed_after("r8-restart", 1, "out-v1");
    let mut events = after.watch.subscribe();

    let report = recovery(&after).resume().await.unwrap();
    assert_eq!(report.watchers_started, 1);
    assert_eq!(report.orphans_failed, 1);
    assert!(after.watch.is_watching(&SubjectKey::Job(job.id.clone())));

    let events = events_until_stopped(&mut events, 1).await;
    assert!(matches!(events[0], WatchEvent::JobSucceeded { charged: true, .. }));

    assert_eq!(after.job(&job).await.status, JobStatus::Succeeded);
    assert_eq!(after.job(&stray).await.status, JobStatus::Failed);
    assert_eq!(after.balance("alice").await, 10 - GENERATION_COST);
}

#[tokio::test]
async fn test_recovery_groups_jobs_by_user() {
    let stack = Stack::new(WatchGranularity::PerUser).await;
    stack.open_account("alice", 100).await;
    stack.open_account("bob", 100).await;
    stack.insert_job("alice", "r8-a1").await;
    stack.insert_job("alice", "r8-a2").await;
    stack.insert_job("bob", "r8-b1").await;

    let report = recovery(&stack).resume().await.unwrap();
    assert_eq!(report.watchers_started, 2);
    assert_eq!(report.orphans_failed, 0);

    let mut subjects = stack.watch.active_subjects();
    subjects.sort_by_key(|s| s.to_string());
    assert_eq!(
        subjects,
        vec![
            SubjectKey::User("alice".to_string()),
            SubjectKey::User("bob".to_string()),
        ]
    );

    // Running it again while watchers are live starts nothing new
    let again = recovery(&stack).resume().await.unwrap();
    assert_eq!(again.watchers_started, 0);

    stack.watch.shutdown(std::time::Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_recovery_skips_terminal_jobs() {
    let stack = Stack::new(WatchGranularity::PerJob).await;
    stack.open_account("alice", 10).await;
    let job = stack.insert_job("alice", "r8-done").await;
    stack.repo.mark_failed(&job.id, 5).await.unwrap();

    let report = recovery(&stack).resume().await.unwrap();
    assert_eq!(report.watchers_started, 0);
    assert!(stack.watch.active_subjects().is_empty());
}
