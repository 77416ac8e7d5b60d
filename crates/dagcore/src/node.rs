use crate::events::WorkflowEvent;
use crate::{ContextMap, NodeError, NodeId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Metadata key holding the message of the last failure.
pub const ERROR_MESSAGE_KEY: &str = "errorMessage";

/// Process-wide recording order of node events.
static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Declared role of a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Start,
    End,
    #[default]
    Custom,
    Condition,
    Parallel,
    Aggregator,
    SubWorkflow,
    HumanIntervention,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeType::Start => "START",
            NodeType::End => "END",
            NodeType::Custom => "CUSTOM",
            NodeType::Condition => "CONDITION",
            NodeType::Parallel => "PARALLEL",
            NodeType::Aggregator => "AGGREGATOR",
            NodeType::SubWorkflow => "SUB_WORKFLOW",
            NodeType::HumanIntervention => "HUMAN_INTERVENTION",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    #[default]
    Idle,
    /// Dependencies satisfied, queued for the engine.
    Waiting,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::Cancelled
        )
    }

    /// Not yet started: idle or queued.
    pub fn is_pending(self) -> bool {
        matches!(self, NodeStatus::Idle | NodeStatus::Waiting)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Idle => "IDLE",
            NodeStatus::Waiting => "WAITING",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Completed => "COMPLETED",
            NodeStatus::Failed => "FAILED",
            NodeStatus::Skipped => "SKIPPED",
            NodeStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Execution context handed to a unit of work alongside its typed input.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub node_name: String,
    pub node_type: NodeType,

    /// Raw input map the typed input was parsed from
    pub inputs: ContextMap,

    /// Cancellation token for graceful shutdown
    pub cancellation: CancellationToken,
}

impl NodeContext {
    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }
}

/// The behaviour injected into a node.
///
/// The engine serializes the node's input map to JSON, hands it to
/// [`parse_input`](UnitOfWork::parse_input), runs [`execute`](UnitOfWork::execute)
/// and folds the serialized output back into a string-keyed map.
#[async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + 'static;

    /// Unique kind identifier (e.g., "debug.log", "transform.set")
    fn kind(&self) -> &str;

    fn parse_input(&self, wire: &str) -> Result<Self::Input, NodeError> {
        serde_json::from_str(wire).map_err(|e| NodeError::InvalidInput(e.to_string()))
    }

    async fn execute(&self, input: Self::Input, ctx: &NodeContext)
        -> Result<Self::Output, NodeError>;
}

/// Object-safe view of a [`UnitOfWork`], implemented for every unit of work.
#[async_trait]
pub trait DynUnitOfWork: Send + Sync {
    fn kind(&self) -> &str;

    async fn invoke(&self, wire: &str, ctx: &NodeContext) -> Result<ContextMap, NodeError>;
}

#[async_trait]
impl<W> DynUnitOfWork for W
where
    W: UnitOfWork,
{
    fn kind(&self) -> &str {
        UnitOfWork::kind(self)
    }

    async fn invoke(&self, wire: &str, ctx: &NodeContext) -> Result<ContextMap, NodeError> {
        let input = self.parse_input(wire)?;
        let output = self.execute(input, ctx).await?;
        fold_output(output)
    }
}

/// Converts a typed result into the string-keyed output map.
///
/// Objects contribute their fields, `null` (including `()`) contributes
/// nothing, anything else is rejected.
pub fn fold_output<T: Serialize>(output: T) -> Result<ContextMap, NodeError> {
    match serde_json::to_value(output).map_err(|e| NodeError::InvalidOutput(e.to_string()))? {
        Value::Object(fields) => Ok(fields.into_iter().collect()),
        Value::Null => Ok(ContextMap::new()),
        other => Err(NodeError::InvalidOutput(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Unit of work backed by a plain function over maps.
pub struct FnWork<F> {
    kind: String,
    f: F,
}

impl<F> FnWork<F>
where
    F: Fn(ContextMap) -> Result<ContextMap, NodeError> + Send + Sync + 'static,
{
    pub fn new(kind: impl Into<String>, f: F) -> Self {
        Self {
            kind: kind.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> UnitOfWork for FnWork<F>
where
    F: Fn(ContextMap) -> Result<ContextMap, NodeError> + Send + Sync + 'static,
{
    type Input = ContextMap;
    type Output = ContextMap;

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn execute(&self, input: ContextMap, _ctx: &NodeContext) -> Result<ContextMap, NodeError> {
        (self.f)(input)
    }
}

/// A prepared call of a node's unit of work, produced by [`Node::start`].
///
/// Awaiting it does not borrow the node, so the owning workflow can be
/// inspected while the work is in flight.
pub struct Invocation {
    work: Arc<dyn DynUnitOfWork>,
    wire: String,
    context: NodeContext,
}

impl Invocation {
    pub fn node_id(&self) -> &NodeId {
        &self.context.node_id
    }

    pub fn wire(&self) -> &str {
        &self.wire
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.context.cancellation = token;
        self
    }

    pub async fn run(self) -> Result<ContextMap, NodeError> {
        self.work.invoke(&self.wire, &self.context).await
    }
}

/// A node of the workflow graph: uniform identity and lifecycle, with the
/// behaviour supplied by an injected unit of work.
#[derive(Clone)]
pub struct Node {
    id: NodeId,
    name: String,
    node_type: NodeType,
    status: NodeStatus,
    input: ContextMap,
    output: ContextMap,
    output_frozen: bool,
    dependencies: HashSet<NodeId>,
    metadata: ContextMap,
    work: Arc<dyn DynUnitOfWork>,
    events: Vec<WorkflowEvent>,
    sequence: Vec<u64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("node_type", &self.node_type)
            .field("status", &self.status)
            .field("kind", &self.work.kind())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        node_type: NodeType,
        work: Arc<dyn DynUnitOfWork>,
    ) -> Self {
        Self::with_id(NodeId::generate(), name, node_type, work)
    }

    pub fn with_id(
        id: NodeId,
        name: impl Into<String>,
        node_type: NodeType,
        work: Arc<dyn DynUnitOfWork>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            node_type,
            status: NodeStatus::Idle,
            input: ContextMap::new(),
            output: ContextMap::new(),
            output_frozen: false,
            dependencies: HashSet::new(),
            metadata: ContextMap::new(),
            work,
            events: Vec::new(),
            sequence: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependency(mut self, dependency: NodeId) -> Self {
        self.add_dependency(dependency);
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn kind(&self) -> &str {
        self.work.kind()
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn input(&self) -> &ContextMap {
        &self.input
    }

    pub fn output(&self) -> &ContextMap {
        &self.output
    }

    pub fn is_output_frozen(&self) -> bool {
        self.output_frozen
    }

    pub fn dependencies(&self) -> &HashSet<NodeId> {
        &self.dependencies
    }

    pub fn metadata(&self) -> &ContextMap {
        &self.metadata
    }

    pub fn error_message(&self) -> Option<&str> {
        self.metadata.get(ERROR_MESSAGE_KEY).and_then(Value::as_str)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    /// Replaces the input map.
    pub fn set_input(&mut self, input: ContextMap) {
        self.input = input;
        self.touch();
    }

    /// Additive merge into the input map.
    pub fn merge_input(&mut self, values: &ContextMap) {
        self.input
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.touch();
    }

    pub fn add_dependency(&mut self, dependency: NodeId) {
        self.dependencies.insert(dependency);
        self.touch();
    }

    pub fn remove_dependency(&mut self, dependency: &NodeId) -> bool {
        let removed = self.dependencies.remove(dependency);
        self.touch();
        removed
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
        self.touch();
    }

    /// True iff every declared dependency is in `completed`.
    pub fn are_dependencies_satisfied(&self, completed: &HashSet<NodeId>) -> bool {
        self.dependencies.is_subset(completed)
    }

    /// IDLE -> WAITING: the node is ready and queued for execution.
    pub fn activate(&mut self) -> Result<(), NodeError> {
        self.expect_status(&[NodeStatus::Idle], "activate")?;
        self.status = NodeStatus::Waiting;
        self.touch();
        tracing::debug!(node = %self.name, "node ready");
        Ok(())
    }

    /// IDLE/WAITING -> RUNNING.
    ///
    /// Records the started event and serializes the current input. The
    /// returned [`Invocation`] runs the unit of work; its result must be
    /// applied with [`finish`](Node::finish).
    pub fn start(&mut self) -> Result<Invocation, NodeError> {
        self.expect_status(&[NodeStatus::Idle, NodeStatus::Waiting], "start")?;
        self.status = NodeStatus::Running;
        self.touch();
        self.record(WorkflowEvent::NodeStarted {
            node_id: self.id.clone(),
            name: self.name.clone(),
            timestamp: Utc::now(),
        });

        let wire = match serde_json::to_string(&self.input) {
            Ok(wire) => wire,
            Err(e) => {
                let error = NodeError::InvalidInput(e.to_string());
                self.fail(error.to_string())?;
                return Err(error);
            }
        };

        Ok(Invocation {
            work: Arc::clone(&self.work),
            wire,
            context: NodeContext {
                node_id: self.id.clone(),
                node_name: self.name.clone(),
                node_type: self.node_type,
                inputs: self.input.clone(),
                cancellation: CancellationToken::new(),
            },
        })
    }

    /// Applies the result of an invocation: completes on success, fails on
    /// error, and becomes CANCELLED if the work was cancelled.
    pub fn finish(&mut self, result: Result<ContextMap, NodeError>) -> Result<(), NodeError> {
        match result {
            Ok(output) => self.complete(output),
            Err(NodeError::Cancelled) => self.cancel("execution cancelled"),
            Err(error) => self.fail(error.to_string()),
        }
    }

    /// RUNNING -> COMPLETED. Merges `additional` and freezes the output.
    pub fn complete(&mut self, additional: ContextMap) -> Result<(), NodeError> {
        self.expect_status(&[NodeStatus::Running], "complete")?;
        self.output.extend(additional);
        self.output_frozen = true;
        self.status = NodeStatus::Completed;
        self.touch();
        self.record(WorkflowEvent::NodeCompleted {
            node_id: self.id.clone(),
            name: self.name.clone(),
            output: self.output.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// RUNNING -> FAILED. Stores the message in metadata.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), NodeError> {
        self.expect_status(&[NodeStatus::Running], "fail")?;
        let message = message.into();
        self.status = NodeStatus::Failed;
        self.metadata
            .insert(ERROR_MESSAGE_KEY.to_string(), Value::String(message.clone()));
        self.touch();
        self.record(WorkflowEvent::NodeFailed {
            node_id: self.id.clone(),
            name: self.name.clone(),
            error: message,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Back to IDLE with empty output and no error metadata.
    pub fn reset(&mut self) -> Result<(), NodeError> {
        if self.status == NodeStatus::Running {
            return Err(self.illegal("reset"));
        }
        self.output.clear();
        self.output_frozen = false;
        self.metadata.remove(ERROR_MESSAGE_KEY);
        self.status = NodeStatus::Idle;
        self.touch();
        self.record(WorkflowEvent::NodeReset {
            node_id: self.id.clone(),
            name: self.name.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// IDLE/WAITING -> SKIPPED.
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), NodeError> {
        self.expect_status(&[NodeStatus::Idle, NodeStatus::Waiting], "skip")?;
        self.status = NodeStatus::Skipped;
        self.touch();
        self.record(WorkflowEvent::NodeSkipped {
            node_id: self.id.clone(),
            name: self.name.clone(),
            reason: reason.into(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// IDLE/WAITING/RUNNING -> CANCELLED.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), NodeError> {
        self.expect_status(
            &[NodeStatus::Idle, NodeStatus::Waiting, NodeStatus::Running],
            "cancel",
        )?;
        self.status = NodeStatus::Cancelled;
        self.touch();
        self.record(WorkflowEvent::NodeCancelled {
            node_id: self.id.clone(),
            name: self.name.clone(),
            reason: reason.into(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn pending_events(&self) -> &[WorkflowEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<WorkflowEvent> {
        self.sequence.clear();
        std::mem::take(&mut self.events)
    }

    /// Drains buffered events paired with their recording sequence number.
    pub fn drain_sequenced_events(&mut self) -> Vec<(u64, WorkflowEvent)> {
        let sequence = std::mem::take(&mut self.sequence);
        sequence.into_iter().zip(self.drain_events()).collect()
    }

    fn expect_status(&self, allowed: &[NodeStatus], action: &'static str) -> Result<(), NodeError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(self.illegal(action))
        }
    }

    fn illegal(&self, action: &'static str) -> NodeError {
        NodeError::IllegalTransition {
            node: self.name.clone(),
            action,
            from: self.status,
        }
    }

    fn record(&mut self, event: WorkflowEvent) {
        self.sequence.push(EVENT_SEQUENCE.fetch_add(1, Ordering::Relaxed));
        self.events.push(event);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
