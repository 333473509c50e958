use crate::error::RegistryError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes pipeline work per tool name. The lock is async so it can be
/// held across the whole validate-and-commit sequence; concurrent
/// submissions for the same name queue behind it and resolve
/// first-committer-wins.
pub struct NameLockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    timeout: Duration,
}

pub struct NameLock {
    _guard: OwnedMutexGuard<()>,
    name: String,
    wait_time: Duration,
}

impl NameLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }
}

impl NameLockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn acquire(&self, name: &str) -> Result<NameLock, RegistryError> {
        let start = Instant::now();

        let slot = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let guard = tokio::time::timeout(self.timeout, slot.lock_owned())
            .await
            .map_err(|_| RegistryError::LockTimeout(name.to_string()))?;

        Ok(NameLock {
            _guard: guard,
            name: name.to_string(),
            wait_time: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_name_is_exclusive() {
        let manager = Arc::new(NameLockManager::new(Duration::from_millis(50)));

        let held = manager.acquire("square").await.unwrap();
        let result = manager.acquire("square").await;
        assert!(matches!(result, Err(RegistryError::LockTimeout(_))));

        drop(held);
        assert!(manager.acquire("square").await.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_names_do_not_contend() {
        let manager = NameLockManager::new(Duration::from_millis(50));
        let _a = manager.acquire("alpha").await.unwrap();
        let b = manager.acquire("beta").await.unwrap();
        assert_eq!(b.name(), "beta");
    }
}
