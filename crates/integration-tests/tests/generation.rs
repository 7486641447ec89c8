//! Credit sharing between completions and on-demand generation

mod common;

use common::{memory_pool, next_event, Stack, GENERATION_COST};
use std::time::Duration;
use trainwatch_core::application::{GenerateImageRequest, WatchEvent};
use trainwatch_core::domain::{JobStatus, WatchGranularity};
use trainwatch_core::error::FailureKind;
use trainwatch_core::port::provider::mocks::MockGenerationProvider;
use trainwatch_core::port::JobRepository;

#[tokio::test]
async fn test_same_owner_jobs_never_share_credits() {
    let stack = Stack::with_generator(
        memory_pool().await,
        WatchGranularity::PerJob,
        MockGenerationProvider::new().with_delay(Duration::from_millis(30)),
    );
    stack.open_account("alice", 10).await;
    let first = stack.insert_job("alice", "r8-x").await;
    let second = stack.insert_job("alice", "r8-y").await;
    stack.training.succeed_after("r8-x", 0, "out-x");
    stack.training.succeed_after("r8-y", 0, "out-y");

    let mut events = stack.watch.subscribe();
    assert!(stack.watch.watch_job(&first));
    assert!(stack.watch.watch_job(&second));

    let mut charged = 0;
    let mut deferred = 0;
    while charged == 0 || deferred == 0 {
        match next_event(&mut events).await {
            WatchEvent::JobSucceeded { charged: true, .. } => charged += 1,
            WatchEvent::JobSucceeded { charged: false, job_id, .. } => {
                panic!("job {} delivered without a charge", job_id)
            }
            WatchEvent::CompletionDeferred { report, .. } => {
                assert_eq!(report.kind, FailureKind::InsufficientCredits);
                deferred += 1;
            }
            WatchEvent::WatcherStopped { .. } => {}
            other => panic!("unexpected event {:?}", other),
        }
    }

    let statuses = [stack.job(&first).await.status, stack.job(&second).await.status];
    assert!(statuses.contains(&JobStatus::Succeeded));
    assert!(statuses.contains(&JobStatus::Starting));
    assert_eq!(stack.balance("alice").await, 10 - GENERATION_COST);
    assert_eq!(stack.generator.call_count(), 1);

    stack.watch.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_on_demand_generation_extends_trained_job() {
    let stack = Stack::new(WatchGranularity::PerUser).await;
    stack.open_account("alice", 30).await;
    let job = stack.insert_job("alice", "r8-od").await;
    stack.training.succeed_after("r8-od", 0, "lora-v9");

    let mut events = stack.watch.subscribe();
    stack.watch.watch_job(&job);
    assert!(matches!(
        next_event(&mut events).await,
        WatchEvent::JobSucceeded { charged: true, .. }
    ));

    let image = stack
        .generation
        .generate(GenerateImageRequest {
            owner: "alice".into(),
            job_id: job.id.clone(),
            prompt: "wearing a red scarf".into(),
        })
        .await
        .unwrap();

    assert_eq!(image.balance, 30 - 2 * GENERATION_COST);
    let sent = stack.generator.requests();
    assert_eq!(sent[1].model_version, "lora-v9");
    assert_eq!(
        sent[1].prompt,
        format!("{} wearing a red scarf", job.prompt.trigger_word)
    );

    let listed = stack.repo.find_by_owner(&"alice".to_string()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].artifacts.len(), 2);
    assert_eq!(listed[0].artifacts[1], image.artifact_uri);
}
