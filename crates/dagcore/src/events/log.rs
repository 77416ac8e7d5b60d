use super::{EventSink, ExecutionEvent, WorkflowEvent};
use crate::{NodeId, WorkflowId};
use std::sync::{Mutex, PoisonError};

/// In-memory sink that keeps every published event in order.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn for_workflow(&self, workflow_id: &WorkflowId) -> Vec<WorkflowEvent> {
        self.events()
            .into_iter()
            .filter(|e| &e.workflow_id == workflow_id)
            .map(|e| e.event)
            .collect()
    }

    pub fn for_node(&self, node_id: &NodeId) -> Vec<WorkflowEvent> {
        self.events()
            .into_iter()
            .map(|e| e.event)
            .filter(|e| e.node_id() == Some(node_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for EventLog {
    fn publish(&self, workflow_id: &WorkflowId, event: WorkflowEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ExecutionEvent {
                workflow_id: workflow_id.clone(),
                event,
            });
    }
}
