use crate::error::RegistryError;
use crate::locks::{NameLock, NameLockManager};
use crate::store::RegistryStore;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;
use toolforge_core::{Candidate, Origin, ToolRecord, ToolStatus, ValidationReport};
use tracing::info;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone)]
pub struct RecordFilter {
    pub status: Option<ToolStatus>,
    pub origin: Option<Origin>,
}

/// Authoritative store of tool records. One instance per node, injected
/// into whatever needs it; tests run several side by side. Mutations go
/// through the lifecycle methods below, which persist a snapshot on every
/// change the way the original registry saved on each registration.
pub struct ToolRegistry {
    records: RwLock<HashMap<String, ToolRecord>>,
    locks: NameLockManager,
    store: Option<RegistryStore>,
}

impl ToolRegistry {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, RegistryError> {
        let store = RegistryStore::new(data_dir)?;
        let mut records = HashMap::new();
        for record in store.load().await? {
            info!("Loaded tool record: {} ({:?})", record.name, record.status);
            records.insert(record.name.clone(), record);
        }
        Ok(Self {
            records: RwLock::new(records),
            locks: NameLockManager::new(DEFAULT_LOCK_TIMEOUT),
            store: Some(store),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            locks: NameLockManager::new(DEFAULT_LOCK_TIMEOUT),
            store: None,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.locks = NameLockManager::new(timeout);
        self
    }

    /// Exclusive per-name section for the pipeline: held from submission
    /// through promote/reject so same-name runs serialize.
    pub async fn lock_name(&self, name: &str) -> Result<NameLock, RegistryError> {
        self.locks.acquire(name).await
    }

    pub async fn submit(
        &self,
        candidate: &Candidate,
        origin: Origin,
    ) -> Result<ToolRecord, RegistryError> {
        let record = {
            let mut records = self.records.write().await;
            if let Some(existing) = records.get(&candidate.name) {
                if existing.is_active() {
                    return Err(RegistryError::DuplicateName(candidate.name.clone()));
                }
            }
            let record = ToolRecord::pending(candidate, origin);
            records.insert(candidate.name.clone(), record.clone());
            record
        };
        self.persist().await?;
        Ok(record)
    }

    /// Explicit update request: start a fresh Pending record for the name
    /// even if an Active one exists, superseding it.
    pub async fn replace(
        &self,
        candidate: &Candidate,
        origin: Origin,
    ) -> Result<ToolRecord, RegistryError> {
        let record = {
            let mut records = self.records.write().await;
            let record = ToolRecord::pending(candidate, origin);
            records.insert(candidate.name.clone(), record.clone());
            record
        };
        self.persist().await?;
        info!("Tool record superseded: {}", candidate.name);
        Ok(record)
    }

    /// Pending -> Validated, after static screening found no blocker.
    pub async fn mark_validated(
        &self,
        name: &str,
        report: ValidationReport,
    ) -> Result<ToolRecord, RegistryError> {
        let record = self
            .transition(name, ToolStatus::Validated, Some(report), |status| {
                status == ToolStatus::Pending
            })
            .await?;
        self.persist().await?;
        Ok(record)
    }

    /// Commit to Active. First committer wins; anything already decided
    /// surfaces as a conflict.
    pub async fn promote(
        &self,
        name: &str,
        report: ValidationReport,
    ) -> Result<ToolRecord, RegistryError> {
        let record = self
            .transition(name, ToolStatus::Active, Some(report), |status| {
                matches!(status, ToolStatus::Pending | ToolStatus::Validated)
            })
            .await?;
        self.persist().await?;
        info!("Tool promoted to active: {}", name);
        Ok(record)
    }

    /// Terminal rejection. The record is retained for audit and dedup.
    pub async fn reject(
        &self,
        name: &str,
        report: ValidationReport,
    ) -> Result<ToolRecord, RegistryError> {
        let record = self
            .transition(name, ToolStatus::Rejected, Some(report), |status| {
                status != ToolStatus::Active
            })
            .await?;
        self.persist().await?;
        info!("Tool rejected: {}", name);
        Ok(record)
    }

    async fn transition(
        &self,
        name: &str,
        next: ToolStatus,
        report: Option<ValidationReport>,
        allowed: impl Fn(ToolStatus) -> bool,
    ) -> Result<ToolRecord, RegistryError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        if !allowed(record.status) {
            return Err(RegistryError::Conflict(name.to_string()));
        }
        record.status = next;
        if let Some(report) = report {
            record.validation_report = Some(report);
        }
        Ok(record.clone())
    }

    pub async fn get(&self, name: &str) -> Option<ToolRecord> {
        self.records.read().await.get(name).cloned()
    }

    pub async fn list(&self, filter: &RecordFilter) -> Vec<ToolRecord> {
        let records = self.records.read().await;
        let mut result: Vec<ToolRecord> = records
            .values()
            .filter(|r| filter.status.map(|s| r.status == s).unwrap_or(true))
            .filter(|r| {
                filter
                    .origin
                    .as_ref()
                    .map(|o| &r.origin == o)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    pub async fn active_tools(&self) -> Vec<(String, String)> {
        self.list(&RecordFilter {
            status: Some(ToolStatus::Active),
            origin: None,
        })
        .await
        .into_iter()
        .map(|r| (r.name, r.description))
        .collect()
    }

    pub async fn remove(&self, name: &str) -> Result<ToolRecord, RegistryError> {
        let record = {
            let mut records = self.records.write().await;
            records
                .remove(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?
        };
        self.persist().await?;
        Ok(record)
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn close(&self) -> Result<(), RegistryError> {
        self.persist().await
    }

    async fn persist(&self) -> Result<(), RegistryError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = {
            let records = self.records.read().await;
            let mut snapshot: Vec<ToolRecord> = records.values().cloned().collect();
            snapshot.sort_by(|a, b| a.name.cmp(&b.name));
            snapshot
        };
        store.save(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolforge_core::{Param, ToolSignature, ValueShape};

    fn candidate(name: &str) -> Candidate {
        Candidate {
            name: name.to_string(),
            description: format!("{} tool", name),
            source: format!("def {}(x):\n    return x\n", name),
            signature: ToolSignature {
                params: vec![Param {
                    name: "x".to_string(),
                    shape: ValueShape::Number,
                }],
                returns: ValueShape::Number,
                deterministic: true,
            },
        }
    }

    #[tokio::test]
    async fn test_lifecycle_to_active() {
        let registry = ToolRegistry::in_memory();
        registry
            .submit(&candidate("square"), Origin::Local)
            .await
            .unwrap();
        registry
            .mark_validated("square", ValidationReport::default())
            .await
            .unwrap();
        let record = registry
            .promote("square", ValidationReport::default())
            .await
            .unwrap();
        assert_eq!(record.status, ToolStatus::Active);
        assert!(registry.get("square").await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_duplicate_active_name_refused() {
        let registry = ToolRegistry::in_memory();
        registry
            .submit(&candidate("square"), Origin::Local)
            .await
            .unwrap();
        registry
            .promote("square", ValidationReport::default())
            .await
            .unwrap();

        let result = registry.submit(&candidate("square"), Origin::Local).await;
        assert!(matches!(result, Err(RegistryError::DuplicateName(_))));
    }

    #[tokio::test]
    async fn test_rejected_record_is_retained_and_resubmittable() {
        let registry = ToolRegistry::in_memory();
        registry
            .submit(&candidate("square"), Origin::Local)
            .await
            .unwrap();
        registry
            .reject("square", ValidationReport::default())
            .await
            .unwrap();

        let record = registry.get("square").await.unwrap();
        assert_eq!(record.status, ToolStatus::Rejected);

        // A revised candidate may try again under the same name.
        let record = registry
            .submit(&candidate("square"), Origin::Local)
            .await
            .unwrap();
        assert_eq!(record.status, ToolStatus::Pending);
    }

    #[tokio::test]
    async fn test_double_promote_is_conflict() {
        let registry = ToolRegistry::in_memory();
        registry
            .submit(&candidate("square"), Origin::Local)
            .await
            .unwrap();
        registry
            .promote("square", ValidationReport::default())
            .await
            .unwrap();

        let result = registry
            .promote("square", ValidationReport::default())
            .await;
        assert!(matches!(result, Err(RegistryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_active_tool_cannot_be_rejected() {
        let registry = ToolRegistry::in_memory();
        registry
            .submit(&candidate("square"), Origin::Local)
            .await
            .unwrap();
        registry
            .promote("square", ValidationReport::default())
            .await
            .unwrap();

        let result = registry
            .reject("square", ValidationReport::default())
            .await;
        assert!(matches!(result, Err(RegistryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_list_filters() {
        let registry = ToolRegistry::in_memory();
        registry
            .submit(&candidate("alpha"), Origin::Local)
            .await
            .unwrap();
        registry
            .submit(&candidate("beta"), Origin::Peer("peer-1".to_string()))
            .await
            .unwrap();
        registry
            .promote("alpha", ValidationReport::default())
            .await
            .unwrap();

        let active = registry
            .list(&RecordFilter {
                status: Some(ToolStatus::Active),
                origin: None,
            })
            .await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "alpha");

        let from_peer = registry
            .list(&RecordFilter {
                status: None,
                origin: Some(Origin::Peer("peer-1".to_string())),
            })
            .await;
        assert_eq!(from_peer.len(), 1);
        assert_eq!(from_peer[0].name, "beta");
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();

        {
            let registry = ToolRegistry::open(dir.path()).await.unwrap();
            registry
                .submit(&candidate("square"), Origin::Local)
                .await
                .unwrap();
            registry
                .promote("square", ValidationReport::default())
                .await
                .unwrap();
            registry.close().await.unwrap();
        }

        let registry = ToolRegistry::open(dir.path()).await.unwrap();
        let record = registry.get("square").await.unwrap();
        assert_eq!(record.status, ToolStatus::Active);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_same_name_race_resolves_to_one_active() {
        let registry = std::sync::Arc::new(ToolRegistry::in_memory());

        let run = |registry: std::sync::Arc<ToolRegistry>, source_tag: i64| async move {
            let _lock = registry.lock_name("square").await?;
            registry.submit(&candidate("square"), Origin::Local).await?;
            // Simulate pipeline work before commit.
            tokio::time::sleep(std::time::Duration::from_millis(10 * source_tag as u64)).await;
            registry
                .promote("square", ValidationReport::default())
                .await
        };

        let (a, b) = tokio::join!(
            run(registry.clone(), 1),
            run(registry.clone(), 2)
        );

        let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "exactly one submission may win: {:?} {:?}", a.is_ok(), b.is_ok());
        assert!(registry.get("square").await.unwrap().is_active());
        assert_eq!(registry.count().await, 1);
    }
}
