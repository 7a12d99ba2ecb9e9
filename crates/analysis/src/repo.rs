//! Inspection persistence collaborator.
//!
//! The orchestration subsystem treats inspection storage as external: it
//! resolves the entity at the start of a handler run and persists the
//! mutated entity at the end, nothing more.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use inspecta_core::{Inspection, InspectionId};

#[derive(Debug, Error)]
pub enum InspectionRepoError {
    #[error("inspection not found: {0}")]
    NotFound(InspectionId),

    #[error("inspection storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait InspectionRepo: Send + Sync {
    async fn find(&self, id: InspectionId) -> Result<Inspection, InspectionRepoError>;

    async fn persist(&self, inspection: &Inspection) -> Result<(), InspectionRepoError>;
}

/// In-memory repo for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryInspectionRepo {
    inner: RwLock<HashMap<InspectionId, Inspection>>,
}

impl InMemoryInspectionRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn insert(&self, inspection: Inspection) {
        self.inner.write().await.insert(inspection.id, inspection);
    }
}

#[async_trait]
impl InspectionRepo for InMemoryInspectionRepo {
    async fn find(&self, id: InspectionId) -> Result<Inspection, InspectionRepoError> {
        self.inner
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(InspectionRepoError::NotFound(id))
    }

    async fn persist(&self, inspection: &Inspection) -> Result<(), InspectionRepoError> {
        self.inner
            .write()
            .await
            .insert(inspection.id, inspection.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inspecta_core::TenantId;

    #[tokio::test]
    async fn find_after_persist_round_trips() {
        let repo = InMemoryInspectionRepo::new();
        let inspection = Inspection::new(TenantId::new(), "Unit 7A");
        let id = inspection.id;
        repo.insert(inspection).await;

        let found = repo.find(id).await.unwrap();
        assert_eq!(found.title, "Unit 7A");
    }

    #[tokio::test]
    async fn missing_inspection_is_not_found() {
        let repo = InMemoryInspectionRepo::new();
        let err = repo.find(InspectionId::new()).await.unwrap_err();
        assert!(matches!(err, InspectionRepoError::NotFound(_)));
    }
}
