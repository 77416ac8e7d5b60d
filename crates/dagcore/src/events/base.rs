use crate::{ContextMap, NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle events recorded by workflows and nodes.
///
/// Entities buffer their own events; the engine drains them after every
/// lifecycle call and forwards them to an [`EventSink`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_id: WorkflowId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        workflow_id: WorkflowId,
        name: String,
        final_output: ContextMap,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        workflow_id: WorkflowId,
        name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowPaused {
        workflow_id: WorkflowId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowResumed {
        workflow_id: WorkflowId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowStalled {
        workflow_id: WorkflowId,
        name: String,
        blocked: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        node_id: NodeId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        node_id: NodeId,
        name: String,
        output: ContextMap,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        node_id: NodeId,
        name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeReset {
        node_id: NodeId,
        name: String,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        node_id: NodeId,
        name: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    NodeCancelled {
        node_id: NodeId,
        name: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "WorkflowStarted",
            WorkflowEvent::WorkflowCompleted { .. } => "WorkflowCompleted",
            WorkflowEvent::WorkflowFailed { .. } => "WorkflowFailed",
            WorkflowEvent::WorkflowPaused { .. } => "WorkflowPaused",
            WorkflowEvent::WorkflowResumed { .. } => "WorkflowResumed",
            WorkflowEvent::WorkflowStalled { .. } => "WorkflowStalled",
            WorkflowEvent::NodeStarted { .. } => "NodeStarted",
            WorkflowEvent::NodeCompleted { .. } => "NodeCompleted",
            WorkflowEvent::NodeFailed { .. } => "NodeFailed",
            WorkflowEvent::NodeReset { .. } => "NodeReset",
            WorkflowEvent::NodeSkipped { .. } => "NodeSkipped",
            WorkflowEvent::NodeCancelled { .. } => "NodeCancelled",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            WorkflowEvent::WorkflowStarted { timestamp, .. }
            | WorkflowEvent::WorkflowCompleted { timestamp, .. }
            | WorkflowEvent::WorkflowFailed { timestamp, .. }
            | WorkflowEvent::WorkflowPaused { timestamp, .. }
            | WorkflowEvent::WorkflowResumed { timestamp, .. }
            | WorkflowEvent::WorkflowStalled { timestamp, .. }
            | WorkflowEvent::NodeStarted { timestamp, .. }
            | WorkflowEvent::NodeCompleted { timestamp, .. }
            | WorkflowEvent::NodeFailed { timestamp, .. }
            | WorkflowEvent::NodeReset { timestamp, .. }
            | WorkflowEvent::NodeSkipped { timestamp, .. }
            | WorkflowEvent::NodeCancelled { timestamp, .. } => *timestamp,
        }
    }

    /// The node this event belongs to, `None` for workflow-level events.
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            WorkflowEvent::NodeStarted { node_id, .. }
            | WorkflowEvent::NodeCompleted { node_id, .. }
            | WorkflowEvent::NodeFailed { node_id, .. }
            | WorkflowEvent::NodeReset { node_id, .. }
            | WorkflowEvent::NodeSkipped { node_id, .. }
            | WorkflowEvent::NodeCancelled { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Human-readable description of the event.
    pub fn message(&self) -> String {
        match self {
            WorkflowEvent::WorkflowStarted { name, .. } => format!("Workflow '{}' started", name),
            WorkflowEvent::WorkflowCompleted { name, .. } => {
                format!("Workflow '{}' completed", name)
            }
            WorkflowEvent::WorkflowFailed { name, error, .. } => {
                format!("Workflow '{}' failed: {}", name, error)
            }
            WorkflowEvent::WorkflowPaused { name, .. } => format!("Workflow '{}' paused", name),
            WorkflowEvent::WorkflowResumed { name, .. } => format!("Workflow '{}' resumed", name),
            WorkflowEvent::WorkflowStalled { name, blocked, .. } => format!(
                "Workflow '{}' stalled with blocked nodes: {}",
                name,
                blocked.join(", ")
            ),
            WorkflowEvent::NodeStarted { name, .. } => format!("Node '{}' started", name),
            WorkflowEvent::NodeCompleted { name, .. } => format!("Node '{}' completed", name),
            WorkflowEvent::NodeFailed { name, error, .. } => {
                format!("Node '{}' failed: {}", name, error)
            }
            WorkflowEvent::NodeReset { name, .. } => format!("Node '{}' reset", name),
            WorkflowEvent::NodeSkipped { name, reason, .. } => {
                format!("Node '{}' skipped: {}", name, reason)
            }
            WorkflowEvent::NodeCancelled { name, reason, .. } => {
                format!("Node '{}' cancelled: {}", name, reason)
            }
        }
    }
}

/// An event tagged with the workflow it was drained from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionEvent {
    pub workflow_id: WorkflowId,
    pub event: WorkflowEvent,
}

/// Destination for drained lifecycle events.
pub trait EventSink: Send + Sync {
    fn publish(&self, workflow_id: &WorkflowId, event: WorkflowEvent);

    fn publish_all(&self, workflow_id: &WorkflowId, events: Vec<WorkflowEvent>) {
        for event in events {
            self.publish(workflow_id, event);
        }
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl EventSink for EventBus {
    fn publish(&self, workflow_id: &WorkflowId, event: WorkflowEvent) {
        tracing::trace!(workflow_id = %workflow_id, event = event.event_type(), "publishing event");
        self.emit(ExecutionEvent {
            workflow_id: workflow_id.clone(),
            event,
        });
    }
}
