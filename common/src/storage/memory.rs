// In-memory fingerprint store for tests and ephemeral runs

use crate::errors::StorageError;
use crate::storage::{Fingerprint, FingerprintStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryFingerprintStore {
    fingerprints: RwLock<HashMap<String, String>>,
}

impl InMemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.fingerprints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.fingerprints.read().await.is_empty()
    }
}

#[async_trait]
impl FingerprintStore for InMemoryFingerprintStore {
    async fn load(&self, job_id: &str) -> Result<Option<Fingerprint>, StorageError> {
        Ok(self
            .fingerprints
            .read()
            .await
            .get(job_id)
            .map(|digest| Fingerprint::new(digest.as_str())))
    }

    async fn save(&self, job_id: &str, digest: &str) -> Result<(), StorageError> {
        self.fingerprints
            .write()
            .await
            .insert(job_id.to_string(), digest.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let store = InMemoryFingerprintStore::new();
        assert!(store.is_empty().await);

        store.save("job", "ABCD1234").await.unwrap();
        let loaded = store.load("job").await.unwrap().unwrap();
        assert!(loaded.matches("abcd1234"));
        assert_eq!(store.len().await, 1);
        assert_eq!(store.load("other").await.unwrap(), None);
    }
}
