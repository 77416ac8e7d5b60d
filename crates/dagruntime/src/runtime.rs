use crate::assembler::WorkflowDefinition;
use crate::coordinator::{ExecutionContext, ExecutionCoordinator, SaturationPolicy};
use crate::executor::ExecutionEngine;
use crate::orchestrator::{orchestrator_for, OrchestrationType};
use crate::registry::NodeRegistry;
use crate::service::WorkflowService;
use crate::store::{InMemoryWorkflowStore, WorkflowRepository};
use dagcore::{ContextMap, EventBus, EventSink, ExecutionEvent, FlowError, WorkflowError, WorkflowId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Duration;

/// Main runtime for executing workflows
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    event_bus: Arc<EventBus>,
    service: WorkflowService,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let store: Arc<dyn WorkflowRepository> = Arc::new(InMemoryWorkflowStore::new());
        Self::with_parts(registry, config, Arc::clone(&event_bus) as Arc<dyn EventSink>, store, event_bus)
    }

    /// Create a runtime that publishes to `events` and stores workflows in
    /// `store`.
    pub fn with_sink(
        registry: Arc<NodeRegistry>,
        config: RuntimeConfig,
        events: Arc<dyn EventSink>,
        store: Arc<dyn WorkflowRepository>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self::with_parts(registry, config, events, store, event_bus)
    }

    fn with_parts(
        registry: Arc<NodeRegistry>,
        config: RuntimeConfig,
        events: Arc<dyn EventSink>,
        store: Arc<dyn WorkflowRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let engine = ExecutionEngine::new(orchestrator_for(config.orchestration), events)
            .with_max_parallel_nodes(config.max_parallel_nodes)
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms));
        let coordinator =
            ExecutionCoordinator::new(engine, config.max_concurrent_workflows, config.saturation);

        Self {
            registry,
            event_bus,
            service: WorkflowService::new(store, coordinator),
            config,
        }
    }

    /// Get access to the node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn service(&self) -> &WorkflowService {
        &self.service
    }

    pub fn coordinator(&self) -> &ExecutionCoordinator {
        self.service.coordinator()
    }

    /// Builds a workflow from its definition and stores it
    pub async fn register_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<WorkflowId, FlowError> {
        let command = definition.into_command(&self.registry)?;
        let created = self.service.create(command).await;
        created
            .data
            .ok_or_else(|| FlowError::Workflow(WorkflowError::Invalid(created.message)))
    }

    /// Execute a stored workflow by ID
    pub async fn execute_workflow(
        &self,
        workflow_id: &WorkflowId,
        inputs: ContextMap,
    ) -> Result<ExecutionContext, FlowError> {
        let started = self.service.start(workflow_id, inputs).await;
        let handle = started
            .data
            .ok_or_else(|| FlowError::Execution(started.message))?;
        handle
            .join()
            .await
            .map_err(|e| FlowError::Execution(e.to_string()))
    }

    /// Register and execute a definition in one go
    pub async fn execute(
        &self,
        definition: WorkflowDefinition,
        inputs: ContextMap,
    ) -> Result<ExecutionContext, FlowError> {
        let id = self.register_workflow(definition).await?;
        self.execute_workflow(&id, inputs).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Units of work run concurrently within one engine pass
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Workflows executed at the same time
    pub max_concurrent_workflows: usize,
    pub saturation: SaturationPolicy,
    /// Wait between checks while nodes are still running
    pub poll_interval_ms: u64,
    pub orchestration: OrchestrationType,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            max_concurrent_workflows: 16,
            saturation: SaturationPolicy::Queue,
            poll_interval_ms: 50,
            orchestration: OrchestrationType::Static,
        }
    }
}
