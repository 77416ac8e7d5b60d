use crate::events::WorkflowEvent;
use crate::node::{Invocation, Node, NodeStatus};
use crate::{ContextMap, Edge, EdgeId, EdgeType, NodeError, NodeId, WorkflowError, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    #[default]
    Created,
    Running,
    Paused,
    Completed,
    Failed,
    /// Nothing executable, nothing running, not every node settled.
    Stalled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Stalled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowStatus::Created => "CREATED",
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Paused => "PAUSED",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Stalled => "STALLED",
        };
        f.write_str(name)
    }
}

/// What happens to the rest of the graph when a node fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorHandling {
    /// Any node failure fails the workflow.
    #[default]
    StopWorkflow,
    /// Dependents of the failed node are skipped, everything else runs.
    ContinueOnError,
}

/// Per-workflow execution settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub on_error: ErrorHandling,
    pub node_timeout_ms: Option<u64>,
}

/// The workflow aggregate: nodes, edges, shared context and lifecycle.
///
/// Structure may only change while the workflow is CREATED or PAUSED. The
/// global context is seeded into every node's input before it runs and
/// accumulates the output of every completed node.
#[derive(Debug, Clone)]
pub struct Workflow {
    id: WorkflowId,
    name: String,
    description: Option<String>,
    status: WorkflowStatus,
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeId, Edge>,
    global_context: ContextMap,
    settings: WorkflowSettings,
    error_message: Option<String>,
    events: Vec<WorkflowEvent>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(WorkflowId::generate(), name)
    }

    pub fn with_id(id: WorkflowId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: None,
            status: WorkflowStatus::Created,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            global_context: ContextMap::new(),
            settings: WorkflowSettings::default(),
            error_message: None,
            events: Vec::new(),
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.description = description;
        self.touch();
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: WorkflowSettings) {
        self.settings = settings;
        self.touch();
    }

    pub fn global_context(&self) -> &ContextMap {
        &self.global_context
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // ---- nodes ----

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.sorted_nodes().into_iter().find(|n| n.name() == name)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Nodes ordered by name, then id.
    pub fn sorted_nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id().cmp(b.id())));
        nodes
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId, WorkflowError> {
        self.ensure_mutable()?;
        let id = node.id().clone();
        if self.nodes.contains_key(&id) {
            return Err(WorkflowError::Invalid(format!("duplicate node id '{}'", id)));
        }
        self.nodes.insert(id.clone(), node);
        self.touch();
        Ok(id)
    }

    /// Removes a node together with every edge touching it.
    pub fn remove_node(&mut self, id: &NodeId) -> Result<Node, WorkflowError> {
        self.ensure_mutable()?;
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        self.edges.retain(|_, edge| !edge.touches(id));
        self.touch();
        Ok(node)
    }

    // ---- edges ----

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn edge_mut(&mut self, id: &EdgeId) -> Option<&mut Edge> {
        self.edges.get_mut(id)
    }

    pub fn contains_edge(&self, id: &EdgeId) -> bool {
        self.edges.contains_key(id)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn add_edge(&mut self, edge: Edge) -> Result<EdgeId, WorkflowError> {
        self.ensure_mutable()?;
        for endpoint in [edge.source(), edge.target()] {
            if !self.nodes.contains_key(endpoint) {
                return Err(WorkflowError::NodeNotFound(endpoint.to_string()));
            }
        }
        let id = edge.id().clone();
        self.edges.insert(id.clone(), edge);
        self.touch();
        Ok(id)
    }

    pub fn add_edges(
        &mut self,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Result<Vec<EdgeId>, WorkflowError> {
        edges.into_iter().map(|edge| self.add_edge(edge)).collect()
    }

    pub fn remove_edge(&mut self, id: &EdgeId) -> Result<Edge, WorkflowError> {
        self.ensure_mutable()?;
        let edge = self
            .edges
            .remove(id)
            .ok_or_else(|| WorkflowError::EdgeNotFound(id.to_string()))?;
        self.touch();
        Ok(edge)
    }

    /// Enabled edges ending at `node`, ascending priority.
    pub fn incoming_edges(&self, node: &NodeId) -> Vec<&Edge> {
        self.enabled_edges(|edge| edge.target() == node)
    }

    /// Enabled edges leaving `node`, ascending priority.
    pub fn outgoing_edges(&self, node: &NodeId) -> Vec<&Edge> {
        self.enabled_edges(|edge| edge.source() == node)
    }

    pub fn conditional_outgoing_edges(&self, node: &NodeId, context: &ContextMap) -> Vec<&Edge> {
        self.outgoing_edges(node)
            .into_iter()
            .filter(|edge| edge.is_condition_met(context))
            .collect()
    }

    pub fn edges_between(&self, source: &NodeId, target: &NodeId) -> Vec<&Edge> {
        self.enabled_edges(|edge| edge.connects(source, target))
    }

    pub fn edges_by_type(&self, edge_type: EdgeType) -> Vec<&Edge> {
        self.enabled_edges(|edge| edge.edge_type() == edge_type)
    }

    fn enabled_edges(&self, filter: impl Fn(&Edge) -> bool) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self
            .edges
            .values()
            .filter(|edge| edge.is_enabled() && filter(edge))
            .collect();
        edges.sort_by(|a, b| a.priority().cmp(&b.priority()).then_with(|| a.id().cmp(b.id())));
        edges
    }

    // ---- context ----

    pub fn update_global_context(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.global_context.insert(key.into(), value.into());
        self.touch();
    }

    pub fn merge_global_context(&mut self, values: &ContextMap) {
        self.global_context
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.touch();
    }

    // ---- lifecycle ----

    /// CREATED -> RUNNING. Nodes without dependencies become WAITING.
    pub fn start(&mut self) -> Result<Vec<NodeId>, WorkflowError> {
        self.expect_status(&[WorkflowStatus::Created], "start")?;
        if self.nodes.is_empty() {
            return Err(WorkflowError::EmptyWorkflow);
        }
        let now = Utc::now();
        self.status = WorkflowStatus::Running;
        self.started_at = Some(now);
        self.touch();
        self.record(WorkflowEvent::WorkflowStarted {
            workflow_id: self.id.clone(),
            name: self.name.clone(),
            timestamp: now,
        });
        tracing::info!(workflow_id = %self.id, name = %self.name, "workflow started");
        self.activate_ready_nodes()
    }

    /// RUNNING -> PAUSED.
    pub fn pause(&mut self) -> Result<(), WorkflowError> {
        self.expect_status(&[WorkflowStatus::Running], "pause")?;
        self.status = WorkflowStatus::Paused;
        self.touch();
        self.record(WorkflowEvent::WorkflowPaused {
            workflow_id: self.id.clone(),
            name: self.name.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// PAUSED -> RUNNING. Re-evaluates ready nodes and completion.
    pub fn resume(&mut self) -> Result<Vec<NodeId>, WorkflowError> {
        self.expect_status(&[WorkflowStatus::Paused], "resume")?;
        self.status = WorkflowStatus::Running;
        self.touch();
        self.record(WorkflowEvent::WorkflowResumed {
            workflow_id: self.id.clone(),
            name: self.name.clone(),
            timestamp: Utc::now(),
        });
        let activated = self.activate_ready_nodes()?;
        self.check_completion();
        Ok(activated)
    }

    /// RUNNING -> COMPLETED with the accumulated context as final output.
    pub fn complete(&mut self) -> Result<(), WorkflowError> {
        self.expect_status(&[WorkflowStatus::Running], "complete")?;
        let now = Utc::now();
        self.status = WorkflowStatus::Completed;
        self.completed_at = Some(now);
        self.touch();
        self.record(WorkflowEvent::WorkflowCompleted {
            workflow_id: self.id.clone(),
            name: self.name.clone(),
            final_output: self.global_context.clone(),
            timestamp: now,
        });
        tracing::info!(workflow_id = %self.id, name = %self.name, "workflow completed");
        Ok(())
    }

    /// RUNNING -> FAILED.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), WorkflowError> {
        self.expect_status(&[WorkflowStatus::Running], "fail")?;
        self.transition_to_failed(message.into());
        Ok(())
    }

    /// Forces a non-terminal workflow to FAILED and cancels pending nodes.
    ///
    /// Running nodes are left to the engine, which interrupts their work.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), WorkflowError> {
        self.expect_status(
            &[
                WorkflowStatus::Created,
                WorkflowStatus::Running,
                WorkflowStatus::Paused,
            ],
            "cancel",
        )?;
        let reason = reason.into();
        let pending: Vec<NodeId> = self
            .sorted_nodes()
            .into_iter()
            .filter(|n| n.status().is_pending())
            .map(|n| n.id().clone())
            .collect();
        for id in pending {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.cancel(reason.clone())?;
            }
        }
        self.transition_to_failed(reason);
        Ok(())
    }

    /// RUNNING -> STALLED, naming every node that never settled.
    pub fn mark_stalled(&mut self) -> Result<(), WorkflowError> {
        self.expect_status(&[WorkflowStatus::Running], "stall")?;
        let blocked: Vec<String> = self
            .sorted_nodes()
            .into_iter()
            .filter(|n| !n.status().is_terminal())
            .map(|n| n.name().to_string())
            .collect();
        let now = Utc::now();
        self.status = WorkflowStatus::Stalled;
        self.completed_at = Some(now);
        self.error_message = Some(format!("Stalled with blocked nodes: {}", blocked.join(", ")));
        self.touch();
        tracing::warn!(workflow_id = %self.id, blocked = ?blocked, "workflow stalled");
        self.record(WorkflowEvent::WorkflowStalled {
            workflow_id: self.id.clone(),
            name: self.name.clone(),
            blocked,
            timestamp: now,
        });
        Ok(())
    }

    /// Starts a node of a running workflow, seeding its input with the
    /// global context first.
    pub fn start_node(&mut self, id: &NodeId) -> Result<Invocation, WorkflowError> {
        self.expect_status(&[WorkflowStatus::Running], "start a node")?;
        let context = self.global_context.clone();
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        node.merge_input(&context);
        Ok(node.start()?)
    }

    /// Applies an invocation result to the node and folds the outcome into
    /// the workflow. Returns the node's resulting status.
    pub fn finish_node(
        &mut self,
        id: &NodeId,
        result: Result<ContextMap, NodeError>,
    ) -> Result<NodeStatus, WorkflowError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        node.finish(result)?;
        let status = node.status();
        let message = node.error_message().unwrap_or_default().to_string();

        if matches!(self.status, WorkflowStatus::Running | WorkflowStatus::Paused) {
            match status {
                NodeStatus::Completed => {
                    self.on_node_completed(id)?;
                }
                NodeStatus::Failed => self.on_node_failed(id, &message)?,
                _ => {}
            }
        }
        Ok(status)
    }

    /// Merges the node's output into the global context, activates newly
    /// ready nodes and completes the workflow once every node settled.
    ///
    /// Also accepted while PAUSED, for work that was in flight at pause time.
    pub fn on_node_completed(&mut self, id: &NodeId) -> Result<Vec<NodeId>, WorkflowError> {
        self.expect_status(
            &[WorkflowStatus::Running, WorkflowStatus::Paused],
            "fold a node result",
        )?;
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;
        if node.status() != NodeStatus::Completed {
            return Err(WorkflowError::Invalid(format!(
                "node '{}' is {}, not COMPLETED",
                node.name(),
                node.status()
            )));
        }
        let output = node.output().clone();
        self.merge_global_context(&output);

        let activated = self.activate_ready_nodes()?;
        self.check_completion();
        Ok(activated)
    }

    /// Applies the error policy for a failed node.
    pub fn on_node_failed(&mut self, id: &NodeId, message: &str) -> Result<(), WorkflowError> {
        self.expect_status(
            &[WorkflowStatus::Running, WorkflowStatus::Paused],
            "fold a node failure",
        )?;
        let name = self
            .nodes
            .get(id)
            .map(|n| n.name().to_string())
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;

        match self.settings.on_error {
            ErrorHandling::StopWorkflow => {
                self.transition_to_failed(format!("Node '{}' failed: {}", name, message));
            }
            ErrorHandling::ContinueOnError => {
                let reason = format!("upstream node '{}' failed", name);
                for dependent in self.transitive_dependents(id) {
                    if let Some(node) = self.nodes.get_mut(&dependent) {
                        if node.status().is_pending() {
                            node.skip(reason.clone())?;
                        }
                    }
                }
                tracing::warn!(workflow_id = %self.id, node = %name, error = %message, "continuing after node failure");
                self.check_completion();
            }
        }
        Ok(())
    }

    // ---- queries ----

    /// Pending nodes whose dependencies have all completed. Empty unless
    /// the workflow is RUNNING.
    pub fn executable_nodes(&self) -> Vec<&Node> {
        if self.status != WorkflowStatus::Running {
            return Vec::new();
        }
        let completed = self.completed_node_ids();
        self.sorted_nodes()
            .into_iter()
            .filter(|n| n.status().is_pending() && n.are_dependencies_satisfied(&completed))
            .collect()
    }

    pub fn running_nodes(&self) -> Vec<&Node> {
        if self.status != WorkflowStatus::Running {
            return Vec::new();
        }
        self.sorted_nodes()
            .into_iter()
            .filter(|n| n.status() == NodeStatus::Running)
            .collect()
    }

    pub fn completed_node_ids(&self) -> HashSet<NodeId> {
        self.nodes_in(NodeStatus::Completed)
    }

    pub fn nodes_in(&self, status: NodeStatus) -> HashSet<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.status() == status)
            .map(|n| n.id().clone())
            .collect()
    }

    pub fn count_in(&self, status: NodeStatus) -> usize {
        self.nodes.values().filter(|n| n.status() == status).count()
    }

    /// Completed nodes as a percentage of all nodes.
    pub fn progress(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        self.count_in(NodeStatus::Completed) as f64 / self.nodes.len() as f64 * 100.0
    }

    /// Every node that depends on `id`, directly or transitively.
    pub fn transitive_dependents(&self, id: &NodeId) -> Vec<NodeId> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        let mut found = Vec::new();
        while let Some(current) = queue.pop_front() {
            for node in self.sorted_nodes() {
                if node.dependencies().contains(&current) && seen.insert(node.id().clone()) {
                    found.push(node.id().clone());
                    queue.push_back(node.id().clone());
                }
            }
        }
        found
    }

    // ---- events ----

    pub fn pending_events(&self) -> &[WorkflowEvent] {
        &self.events
    }

    /// Takes the workflow-level events recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<WorkflowEvent> {
        std::mem::take(&mut self.events)
    }

    /// Takes every node's buffered events in the order they were recorded.
    pub fn drain_node_events(&mut self) -> Vec<WorkflowEvent> {
        let mut events: Vec<(u64, WorkflowEvent)> = Vec::new();
        for node in self.nodes.values_mut() {
            events.extend(node.drain_sequenced_events());
        }
        events.sort_by_key(|(sequence, _)| *sequence);
        events.into_iter().map(|(_, event)| event).collect()
    }

    // ---- internals ----

    fn activate_ready_nodes(&mut self) -> Result<Vec<NodeId>, WorkflowError> {
        let completed = self.completed_node_ids();
        let ready: Vec<NodeId> = self
            .sorted_nodes()
            .into_iter()
            .filter(|n| n.status() == NodeStatus::Idle && n.are_dependencies_satisfied(&completed))
            .map(|n| n.id().clone())
            .collect();
        for id in &ready {
            if let Some(node) = self.nodes.get_mut(id) {
                node.activate()?;
            }
        }
        Ok(ready)
    }

    fn check_completion(&mut self) {
        if self.status != WorkflowStatus::Running || self.nodes.is_empty() {
            return;
        }
        let tolerate_failures = self.settings.on_error == ErrorHandling::ContinueOnError;
        let settled = self.nodes.values().all(|n| match n.status() {
            NodeStatus::Completed | NodeStatus::Skipped => true,
            NodeStatus::Failed | NodeStatus::Cancelled => tolerate_failures,
            _ => false,
        });
        if settled {
            // status is RUNNING, so completing cannot fail
            let _ = self.complete();
        }
    }

    fn transition_to_failed(&mut self, message: String) {
        let now = Utc::now();
        self.status = WorkflowStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some(message.clone());
        self.touch();
        tracing::error!(workflow_id = %self.id, name = %self.name, error = %message, "workflow failed");
        self.record(WorkflowEvent::WorkflowFailed {
            workflow_id: self.id.clone(),
            name: self.name.clone(),
            error: message,
            timestamp: now,
        });
    }

    fn ensure_mutable(&self) -> Result<(), WorkflowError> {
        match self.status {
            WorkflowStatus::Created | WorkflowStatus::Paused => Ok(()),
            other => Err(WorkflowError::StructureLocked(other)),
        }
    }

    fn expect_status(
        &self,
        allowed: &[WorkflowStatus],
        action: &'static str,
    ) -> Result<(), WorkflowError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(WorkflowError::IllegalTransition {
                action,
                from: self.status,
            })
        }
    }

    fn record(&mut self, event: WorkflowEvent) {
        self.events.push(event);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Assembles a workflow from nodes and edges in one step.
pub struct WorkflowBuilder {
    id: Option<WorkflowId>,
    name: String,
    description: Option<String>,
    settings: WorkflowSettings,
    context: ContextMap,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            settings: WorkflowSettings::default(),
            context: ContextMap::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn id(mut self, id: WorkflowId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn settings(mut self, settings: WorkflowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn on_error(mut self, on_error: ErrorHandling) -> Self {
        self.settings.on_error = on_error;
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn build(self) -> Result<Workflow, WorkflowError> {
        let mut workflow = match self.id {
            Some(id) => Workflow::with_id(id, self.name),
            None => Workflow::new(self.name),
        };
        workflow.description = self.description;
        workflow.settings = self.settings;
        workflow.global_context = self.context;
        for node in self.nodes {
            workflow.add_node(node)?;
        }
        workflow.add_edges(self.edges)?;
        Ok(workflow)
    }
}
