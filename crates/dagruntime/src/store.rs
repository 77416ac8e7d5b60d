use crate::executor::SharedWorkflow;
use async_trait::async_trait;
use dagcore::WorkflowId;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Id-keyed workflow storage.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get(&self, id: &WorkflowId) -> Option<SharedWorkflow>;

    /// Inserts or replaces the workflow stored under `id`.
    async fn put(&self, id: WorkflowId, workflow: SharedWorkflow);

    async fn remove(&self, id: &WorkflowId) -> Option<SharedWorkflow>;

    async fn list(&self) -> Vec<SharedWorkflow>;
}

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, SharedWorkflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.workflows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workflows.read().await.is_empty()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowStore {
    async fn get(&self, id: &WorkflowId) -> Option<SharedWorkflow> {
        self.workflows.read().await.get(id).cloned()
    }

    async fn put(&self, id: WorkflowId, workflow: SharedWorkflow) {
        self.workflows.write().await.insert(id, workflow);
    }

    async fn remove(&self, id: &WorkflowId) -> Option<SharedWorkflow> {
        self.workflows.write().await.remove(id)
    }

    async fn list(&self) -> Vec<SharedWorkflow> {
        self.workflows.read().await.values().cloned().collect()
    }
}
