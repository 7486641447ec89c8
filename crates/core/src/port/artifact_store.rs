// Artifact Store Port
// Durable put/get by key; put returns a public reference

use crate::port::ProviderError;
use async_trait::async_trait;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `data` under `key` (overwriting) and return its public URI
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str)
        -> Result<String, ProviderError>;

    /// Public URI of an object already stored under `key`
    async fn exists(&self, key: &str) -> Result<Option<String>, ProviderError>;
}

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory object store, URIs of the form `mem://{key}`
    #[derive(Default)]
    pub struct InMemoryArtifactStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        failures: AtomicUsize,
        puts: AtomicUsize,
    }

    impl InMemoryArtifactStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail the next `n` put calls with a transient error
        pub fn fail_next_puts(&self, n: usize) {
            self.failures.store(n, Ordering::SeqCst);
        }

        pub fn put_count(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        pub fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        }

        pub fn object(&self, key: &str) -> Option<Vec<u8>> {
            self.objects.lock().unwrap().get(key).cloned()
        }
    }

    #[async_trait]
    impl ArtifactStore for InMemoryArtifactStore {
        async fn put(
            &self,
            key: &str,
            data: Vec<u8>,
            _content_type: &str,
        ) -> Result<String, ProviderError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ProviderError::Transient("bucket unavailable".to_string()));
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(format!("mem://{}", key))
        }

        async fn exists(&self, key: &str) -> Result<Option<String>, ProviderError> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .contains_key(key)
                .then(|| format!("mem://{}", key)))
        }
    }
}
