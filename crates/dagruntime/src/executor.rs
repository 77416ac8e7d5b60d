use crate::orchestrator::Orchestrator;
use dagcore::{
    ContextMap, EventSink, FlowError, Invocation, NodeError, NodeId, NodeStatus, Workflow,
    WorkflowStatus,
};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// A workflow shared between the engine, the coordinator and the store.
pub type SharedWorkflow = Arc<RwLock<Workflow>>;

/// Drives one workflow to a terminal state.
///
/// Each pass asks the orchestrator for the executable nodes, runs up to
/// `max_parallel_nodes` of them concurrently and folds the results back in
/// priority order. The workflow lock is never held while a unit of work is
/// awaited.
pub struct ExecutionEngine {
    orchestrator: Arc<dyn Orchestrator>,
    events: Arc<dyn EventSink>,
    max_parallel_nodes: usize,
    poll_interval: Duration,
}

impl ExecutionEngine {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, events: Arc<dyn EventSink>) -> Self {
        Self {
            orchestrator,
            events,
            max_parallel_nodes: 10,
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_max_parallel_nodes(mut self, max_parallel_nodes: usize) -> Self {
        self.max_parallel_nodes = max_parallel_nodes.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    /// Runs `workflow` until it leaves RUNNING and returns its final status.
    ///
    /// A CREATED workflow is started first; a RUNNING one (e.g. just
    /// resumed) is picked up where it stands.
    pub async fn execute_workflow(
        &self,
        workflow: &SharedWorkflow,
        cancellation: CancellationToken,
    ) -> Result<WorkflowStatus, FlowError> {
        {
            let mut wf = workflow.write().await;
            if wf.status() == WorkflowStatus::Created {
                wf.start()?;
            }
            self.publish(&mut wf);
            tracing::info!(workflow_id = %wf.id(), name = %wf.name(), status = %wf.status(), "executing workflow");
        }

        loop {
            let (batch, node_timeout) = {
                let mut wf = workflow.write().await;

                if cancellation.is_cancelled() && !wf.status().is_terminal() {
                    wf.cancel("Execution cancelled")?;
                    self.publish(&mut wf);
                }
                if wf.status() != WorkflowStatus::Running {
                    break;
                }
                if self.orchestrator.is_workflow_completed(&wf) {
                    wf.complete()?;
                    self.publish(&mut wf);
                    break;
                }

                let ready: Vec<NodeId> = self
                    .orchestrator
                    .next_executable_nodes(&wf)
                    .into_iter()
                    .take(self.max_parallel_nodes)
                    .map(|node| node.id().clone())
                    .collect();

                if ready.is_empty() {
                    if wf.running_nodes().is_empty() {
                        wf.mark_stalled()?;
                        self.publish(&mut wf);
                        break;
                    }
                    drop(wf);
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }

                let mut batch = Vec::with_capacity(ready.len());
                for id in ready {
                    let invocation = wf.start_node(&id)?;
                    self.publish(&mut wf);
                    batch.push(invocation);
                }
                (batch, wf.settings().node_timeout_ms)
            };

            let results: Vec<(NodeId, Result<ContextMap, NodeError>, u64)> = stream::iter(
                batch.into_iter().map(|invocation| {
                    let token = cancellation.child_token();
                    async move {
                        let id = invocation.node_id().clone();
                        let started = Instant::now();
                        let result = run_invocation(invocation, token, node_timeout).await;
                        (id, result, started.elapsed().as_millis() as u64)
                    }
                }),
            )
            .buffered(self.max_parallel_nodes)
            .collect()
            .await;

            let mut wf = workflow.write().await;
            for (id, result, duration_ms) in results {
                let output = result.as_ref().ok().cloned();
                if let Err(e) = &result {
                    tracing::error!(workflow_id = %wf.id(), node_id = %id, error = %e, "node failed");
                }
                let status = wf.finish_node(&id, result)?;
                if let (NodeStatus::Completed, Some(output)) = (status, output) {
                    tracing::info!(workflow_id = %wf.id(), node_id = %id, duration_ms, "node completed");
                    self.orchestrator.adjust_execution_order(&mut wf, &id, &output);
                }
                self.publish(&mut wf);
            }
        }

        let wf = workflow.read().await;
        tracing::info!(workflow_id = %wf.id(), status = %wf.status(), progress = wf.progress(), "workflow execution finished");
        Ok(wf.status())
    }

    /// Forwards buffered node events, then workflow events, to the sink.
    fn publish(&self, workflow: &mut Workflow) {
        let id = workflow.id().clone();
        let node_events = workflow.drain_node_events();
        self.events.publish_all(&id, node_events);
        let workflow_events = workflow.drain_events();
        self.events.publish_all(&id, workflow_events);
    }
}

async fn run_invocation(
    invocation: Invocation,
    token: CancellationToken,
    node_timeout_ms: Option<u64>,
) -> Result<ContextMap, NodeError> {
    let invocation = invocation.with_cancellation(token.clone());
    let work = async move {
        tokio::select! {
            result = invocation.run() => result,
            _ = token.cancelled() => Err(NodeError::Cancelled),
        }
    };
    match node_timeout_ms {
        Some(millis) => timeout(Duration::from_millis(millis), work)
            .await
            .unwrap_or(Err(NodeError::Timeout { millis })),
        None => work.await,
    }
}
