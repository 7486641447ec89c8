//! Watch events - outcomes surfaced to job owners and the service layer

use crate::application::watcher::constants::EVENT_CHANNEL_CAPACITY;
use crate::domain::{JobId, SubjectKey, UserId};
use crate::error::FailureReport;
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    /// Completion sequence committed; `charged` is false if the final debit was rejected
    JobSucceeded {
        job_id: JobId,
        owner: UserId,
        artifact_uri: String,
        charged: bool,
    },
    /// Provider reported a terminal failure
    JobFailed {
        job_id: JobId,
        owner: UserId,
        report: FailureReport,
    },
    /// Completion did not finish this cycle; the job stays non-terminal
    CompletionDeferred {
        job_id: JobId,
        owner: UserId,
        report: FailureReport,
    },
    WatcherStopped { subject: SubjectKey },
}

/// Broadcast bus for [`WatchEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WatchEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.tx.subscribe()
    }

    /// Publish, ignoring the no-subscriber case
    pub fn publish(&self, event: WatchEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
