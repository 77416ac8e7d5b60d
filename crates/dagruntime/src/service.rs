use crate::assembler::{CreateWorkflowCommand, WorkflowAssembler};
use crate::coordinator::{
    ExecutionContext, ExecutionCoordinator, ExecutionHandle, ExecutionStatistics, ExecutionStatus,
};
use crate::store::WorkflowRepository;
use chrono::{DateTime, Utc};
use dagcore::{ContextMap, NodeId, NodeStatus, NodeType, Workflow, WorkflowId, WorkflowStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of a control operation: never an error, always a message.
#[derive(Debug, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatusReport {
    pub id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub kind: String,
    pub status: NodeStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatusReport {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub execution: ExecutionStatus,
    pub progress: f64,
    pub nodes: Vec<NodeStatusReport>,
    pub context: ContextMap,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowStatusReport {
    fn new(workflow: &Workflow, execution: ExecutionStatus) -> Self {
        Self {
            id: workflow.id().clone(),
            name: workflow.name().to_string(),
            description: workflow.description().map(str::to_string),
            status: workflow.status(),
            execution,
            progress: workflow.progress(),
            nodes: workflow
                .sorted_nodes()
                .into_iter()
                .map(|node| NodeStatusReport {
                    id: node.id().clone(),
                    name: node.name().to_string(),
                    node_type: node.node_type(),
                    kind: node.kind().to_string(),
                    status: node.status(),
                    error: node.error_message().map(str::to_string),
                })
                .collect(),
            context: workflow.global_context().clone(),
            error_message: workflow.error_message().map(str::to_string),
            created_at: workflow.created_at(),
            started_at: workflow.started_at(),
            completed_at: workflow.completed_at(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub node_count: usize,
    pub completed_nodes: usize,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id().clone(),
            name: workflow.name().to_string(),
            description: workflow.description().map(str::to_string),
            status: workflow.status(),
            node_count: workflow.node_count(),
            completed_nodes: workflow.count_in(NodeStatus::Completed),
            progress: workflow.progress(),
            created_at: workflow.created_at(),
        }
    }
}

/// Listing filter; both criteria must hold when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
    pub name_contains: Option<String>,
}

impl WorkflowFilter {
    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.status.map_or(true, |status| workflow.status() == status)
            && self
                .name_contains
                .as_deref()
                .map_or(true, |needle| workflow.name().contains(needle))
    }
}

/// Create, control and query workflows by id.
pub struct WorkflowService {
    store: Arc<dyn WorkflowRepository>,
    coordinator: ExecutionCoordinator,
    assembler: WorkflowAssembler,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowRepository>, coordinator: ExecutionCoordinator) -> Self {
        Self {
            store,
            coordinator,
            assembler: WorkflowAssembler::new(),
        }
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn WorkflowRepository> {
        &self.store
    }

    /// Assembles, validates and stores a new workflow.
    pub async fn create(&self, command: CreateWorkflowCommand) -> OperationResult<WorkflowId> {
        let name = command.name.clone();
        match self.assembler.assemble(command) {
            Ok(workflow) => {
                let id = workflow.id().clone();
                self.store
                    .put(id.clone(), Arc::new(RwLock::new(workflow)))
                    .await;
                tracing::info!(workflow_id = %id, name = %name, "workflow created");
                OperationResult::ok(format!("Workflow '{}' created", name), id)
            }
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "workflow rejected");
                OperationResult::failure(format!("Failed to create workflow '{}': {}", name, e))
            }
        }
    }

    /// Stores an already built workflow after validating its structure.
    pub async fn register(&self, workflow: Workflow) -> OperationResult<WorkflowId> {
        let validation = self
            .coordinator
            .engine()
            .orchestrator()
            .validate_workflow_structure(&workflow);
        if let Err(e) = validation {
            return OperationResult::failure(format!("Invalid workflow '{}': {}", workflow.name(), e));
        }
        let id = workflow.id().clone();
        self.store.put(id.clone(), Arc::new(RwLock::new(workflow))).await;
        OperationResult::ok("Workflow registered", id)
    }

    /// Merges `initial_context` into the workflow and starts it in the
    /// background.
    pub async fn start(
        &self,
        id: &WorkflowId,
        initial_context: ContextMap,
    ) -> OperationResult<ExecutionHandle> {
        let Some(workflow) = self.store.get(id).await else {
            return OperationResult::failure(format!("Workflow not found: {}", id));
        };
        {
            let mut wf = workflow.write().await;
            if wf.status() != WorkflowStatus::Created {
                return OperationResult::failure(format!(
                    "Workflow '{}' cannot start from {}",
                    wf.name(),
                    wf.status()
                ));
            }
            wf.merge_global_context(&initial_context);
        }
        match self.coordinator.submit(workflow).await {
            Ok(handle) => OperationResult::ok("Workflow started", handle),
            Err(e) => OperationResult::failure(format!("Failed to start workflow: {}", e)),
        }
    }

    /// Starts the workflow and waits for it to finish.
    pub async fn execute(
        &self,
        id: &WorkflowId,
        initial_context: ContextMap,
    ) -> OperationResult<ExecutionContext> {
        let started = self.start(id, initial_context).await;
        let Some(handle) = started.data else {
            return OperationResult::failure(started.message);
        };
        match handle.join().await {
            Ok(context) => {
                let message = format!("Workflow finished with status {:?}", context.status);
                OperationResult {
                    success: context.is_successful(),
                    message,
                    data: Some(context),
                }
            }
            Err(e) => OperationResult::failure(format!("Workflow execution failed: {}", e)),
        }
    }

    pub async fn pause(&self, id: &WorkflowId) -> OperationResult<()> {
        let Some(workflow) = self.store.get(id).await else {
            return OperationResult::failure(format!("Workflow not found: {}", id));
        };
        let mut wf = workflow.write().await;
        match wf.pause() {
            Ok(()) => OperationResult::ok("Workflow paused", ()),
            Err(e) => OperationResult::failure(format!("Cannot pause workflow: {}", e)),
        }
    }

    pub async fn resume(&self, id: &WorkflowId) -> OperationResult<ExecutionHandle> {
        let Some(workflow) = self.store.get(id).await else {
            return OperationResult::failure(format!("Workflow not found: {}", id));
        };
        match self.coordinator.resume(workflow).await {
            Ok(handle) => OperationResult::ok("Workflow resumed", handle),
            Err(e) => OperationResult::failure(format!("Cannot resume workflow: {}", e)),
        }
    }

    /// Fails a workflow that has not finished yet.
    pub async fn cancel(&self, id: &WorkflowId, reason: &str) -> OperationResult<()> {
        let Some(workflow) = self.store.get(id).await else {
            return OperationResult::failure(format!("Workflow not found: {}", id));
        };

        if self.coordinator.is_active(id) {
            return match self.coordinator.cancel(id, reason).await {
                Ok(()) => OperationResult::ok("Workflow cancelled", ()),
                Err(e) => OperationResult::failure(format!("Cannot cancel workflow: {}", e)),
            };
        }

        let mut wf = workflow.write().await;
        match wf.status() {
            WorkflowStatus::Completed => {
                OperationResult::failure("Cannot cancel a completed workflow")
            }
            status if status.is_terminal() => {
                OperationResult::failure(format!("Workflow already finished with status {}", status))
            }
            _ => match wf.cancel(reason) {
                Ok(()) => OperationResult::ok("Workflow cancelled", ()),
                Err(e) => OperationResult::failure(format!("Cannot cancel workflow: {}", e)),
            },
        }
    }

    /// Removes a workflow that is not running.
    pub async fn delete(&self, id: &WorkflowId) -> OperationResult<()> {
        let Some(workflow) = self.store.get(id).await else {
            return OperationResult::failure(format!("Workflow not found: {}", id));
        };
        let running = workflow.read().await.status() == WorkflowStatus::Running;
        if running || self.coordinator.is_active(id) {
            return OperationResult::failure("Cannot delete a running workflow");
        }
        self.store.remove(id).await;
        OperationResult::ok("Workflow deleted", ())
    }

    pub async fn status(&self, id: &WorkflowId) -> OperationResult<WorkflowStatusReport> {
        let Some(workflow) = self.store.get(id).await else {
            return OperationResult::failure(format!("Workflow not found: {}", id));
        };
        let execution = match self.coordinator.execution_context(id).await {
            Some(context) => context.status,
            None => workflow.read().await.status().into(),
        };
        let wf = workflow.read().await;
        OperationResult::ok(
            format!("Workflow '{}' is {}", wf.name(), wf.status()),
            WorkflowStatusReport::new(&wf, execution),
        )
    }

    /// Matching workflows ordered by name.
    pub async fn list(&self, filter: &WorkflowFilter) -> Vec<WorkflowSummary> {
        let mut summaries = Vec::new();
        for workflow in self.store.list().await {
            let wf = workflow.read().await;
            if filter.matches(&wf) {
                summaries.push(WorkflowSummary::from(&*wf));
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    pub fn statistics(&self) -> ExecutionStatistics {
        self.coordinator.statistics()
    }
}
