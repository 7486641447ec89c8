// Watcher constants (no magic values)
use std::time::Duration;

/// Default poll interval against the training provider (5 minutes)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How long shutdown waits for watchers to exit before aborting them
///
/// In-flight completions are awaited past this bound.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Capacity of the watch event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Content type used when the generation provider hands back a URI
pub const DEFAULT_ARTIFACT_CONTENT_TYPE: &str = "image/jpeg";
