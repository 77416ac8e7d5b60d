use crate::error::CoordinatorError;
use crate::executor::{ExecutionEngine, SharedWorkflow};
use chrono::{DateTime, Utc};
use dagcore::{FlowError, NodeStatus, Workflow, WorkflowError, WorkflowId, WorkflowStatus};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What to do with a new run when every worker slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationPolicy {
    /// Wait for a free slot.
    #[default]
    Queue,
    /// Fail the submission immediately.
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    NotFound,
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Stalled,
}

impl From<WorkflowStatus> for ExecutionStatus {
    fn from(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Created => ExecutionStatus::Pending,
            WorkflowStatus::Running => ExecutionStatus::Running,
            WorkflowStatus::Paused => ExecutionStatus::Paused,
            WorkflowStatus::Completed => ExecutionStatus::Completed,
            WorkflowStatus::Failed => ExecutionStatus::Failed,
            WorkflowStatus::Stalled => ExecutionStatus::Stalled,
        }
    }
}

/// Bookkeeping for one run of a workflow.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub workflow_id: WorkflowId,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub total_nodes: usize,
    pub completed_nodes: usize,
    pub failed_nodes: usize,
    pub progress: f64,
}

impl ExecutionContext {
    fn new(workflow: &Workflow) -> Self {
        let mut context = Self {
            run_id: Uuid::new_v4(),
            workflow_id: workflow.id().clone(),
            workflow_name: workflow.name().to_string(),
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
            total_nodes: 0,
            completed_nodes: 0,
            failed_nodes: 0,
            progress: 0.0,
        };
        context.refresh(workflow);
        context
    }

    fn refresh(&mut self, workflow: &Workflow) {
        if self.status != ExecutionStatus::Cancelled {
            self.status = workflow.status().into();
        }
        self.error_message = workflow.error_message().map(str::to_string);
        self.total_nodes = workflow.node_count();
        self.completed_nodes = workflow.count_in(NodeStatus::Completed);
        self.failed_nodes = workflow.count_in(NodeStatus::Failed);
        self.progress = workflow.progress();
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }

    pub fn is_successful(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionStatistics {
    pub active: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Succeeded runs as a percentage of all runs
    pub success_rate: f64,
}

/// Handle to a submitted run.
#[derive(Debug)]
pub struct ExecutionHandle {
    workflow_id: WorkflowId,
    run_id: Uuid,
    handle: JoinHandle<Result<ExecutionContext, CoordinatorError>>,
}

impl ExecutionHandle {
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the run and returns its final context.
    pub async fn join(self) -> Result<ExecutionContext, CoordinatorError> {
        self.handle
            .await
            .map_err(|e| CoordinatorError::Join(e.to_string()))?
    }
}

struct ActiveExecution {
    context: ExecutionContext,
    workflow: SharedWorkflow,
    cancellation: CancellationToken,
}

struct Inner {
    engine: ExecutionEngine,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    saturation: SaturationPolicy,
    executions: Mutex<HashMap<WorkflowId, ActiveExecution>>,
    active: AtomicUsize,
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl Inner {
    fn executions(&self) -> MutexGuard<'_, HashMap<WorkflowId, ActiveExecution>> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, id: &WorkflowId, status: ExecutionStatus) {
        if let Some(execution) = self.executions().get_mut(id) {
            if execution.context.status != ExecutionStatus::Cancelled {
                execution.context.status = status;
            }
        }
    }

    /// Final snapshot of a run, taken before its entry is removed.
    fn finalize(
        &self,
        id: &WorkflowId,
        workflow: &Workflow,
        error: Option<&FlowError>,
    ) -> Option<ExecutionContext> {
        let mut executions = self.executions();
        let execution = executions.get_mut(id)?;
        let context = &mut execution.context;
        context.refresh(workflow);
        if let Some(error) = error {
            context.status = ExecutionStatus::Failed;
            context.error_message = Some(error.to_string());
        }
        if context.status != ExecutionStatus::Paused {
            context.end_time = Some(Utc::now());
        }
        Some(context.clone())
    }
}

/// Removes the run's entry and settles the counters however the run ends.
struct CleanupGuard {
    inner: Arc<Inner>,
    id: WorkflowId,
    outcome: Option<ExecutionStatus>,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        match self.outcome {
            Some(ExecutionStatus::Completed) => {
                self.inner.succeeded.fetch_add(1, Ordering::SeqCst);
            }
            Some(ExecutionStatus::Paused) => {}
            _ => {
                self.inner.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        self.inner.executions().remove(&self.id);
        tracing::debug!(workflow_id = %self.id, outcome = ?self.outcome, "execution cleaned up");
    }
}

/// Runs workflows on a bounded pool of tasks, keyed by workflow id.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    inner: Arc<Inner>,
}

impl ExecutionCoordinator {
    pub fn new(
        engine: ExecutionEngine,
        max_concurrent_workflows: usize,
        saturation: SaturationPolicy,
    ) -> Self {
        let max_concurrent = max_concurrent_workflows.max(1);
        Self {
            inner: Arc::new(Inner {
                engine,
                permits: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                saturation,
                executions: Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
                succeeded: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.inner.engine
    }

    /// Starts a run in the background. Only a CREATED workflow without an
    /// active run is accepted; PAUSED ones go through [`Self::resume`].
    pub async fn submit(&self, workflow: SharedWorkflow) -> Result<ExecutionHandle, CoordinatorError> {
        let permit = self.reserve()?;
        let context = {
            let wf = workflow.read().await;
            if wf.status() == WorkflowStatus::Running || self.is_active(wf.id()) {
                return Err(CoordinatorError::AlreadyRunning(wf.id().clone()));
            }
            if wf.status() != WorkflowStatus::Created {
                return Err(WorkflowError::IllegalTransition {
                    action: "start",
                    from: wf.status(),
                }
                .into());
            }
            ExecutionContext::new(&wf)
        };
        self.spawn(context, workflow, permit, true)
    }

    /// Resumes a PAUSED workflow and continues running it in the background.
    pub async fn resume(&self, workflow: SharedWorkflow) -> Result<ExecutionHandle, CoordinatorError> {
        let permit = self.reserve()?;
        let context = {
            let mut wf = workflow.write().await;
            if self.is_active(wf.id()) {
                return Err(CoordinatorError::AlreadyRunning(wf.id().clone()));
            }
            wf.resume()?;
            ExecutionContext::new(&wf)
        };
        // a resumed run continues the run counted at submission
        self.spawn(context, workflow, permit, false)
    }

    /// Runs the workflow to its end.
    pub async fn execute(&self, workflow: SharedWorkflow) -> Result<ExecutionContext, CoordinatorError> {
        self.submit(workflow).await?.join().await
    }

    /// Runs every workflow concurrently and waits for all of them.
    pub async fn execute_batch(
        &self,
        workflows: Vec<SharedWorkflow>,
    ) -> Vec<Result<ExecutionContext, CoordinatorError>> {
        tracing::info!(count = workflows.len(), "executing workflow batch");
        join_all(workflows.into_iter().map(|workflow| self.execute(workflow))).await
    }

    /// Fails the workflow with `reason` and interrupts its in-flight nodes.
    pub async fn cancel(&self, id: &WorkflowId, reason: &str) -> Result<(), CoordinatorError> {
        let (workflow, token) = {
            let mut executions = self.inner.executions();
            let execution = executions
                .get_mut(id)
                .ok_or_else(|| CoordinatorError::NotActive(id.clone()))?;
            execution.context.status = ExecutionStatus::Cancelled;
            (
                Arc::clone(&execution.workflow),
                execution.cancellation.clone(),
            )
        };

        {
            let mut wf = workflow.write().await;
            if !wf.status().is_terminal() {
                wf.cancel(reason)?;
            }
        }
        token.cancel();
        tracing::info!(workflow_id = %id, reason, "execution cancelled");
        Ok(())
    }

    pub fn is_active(&self, id: &WorkflowId) -> bool {
        self.inner.executions().contains_key(id)
    }

    /// Live context of an active run.
    pub async fn execution_context(&self, id: &WorkflowId) -> Option<ExecutionContext> {
        let (mut context, workflow) = {
            let executions = self.inner.executions();
            let execution = executions.get(id)?;
            (execution.context.clone(), Arc::clone(&execution.workflow))
        };
        context.refresh(&*workflow.read().await);
        Some(context)
    }

    pub async fn execution_status(&self, id: &WorkflowId) -> ExecutionStatus {
        self.execution_context(id)
            .await
            .map(|context| context.status)
            .unwrap_or(ExecutionStatus::NotFound)
    }

    /// Live contexts of every active run, ordered by workflow name.
    pub async fn active_executions(&self) -> Vec<ExecutionContext> {
        let entries: Vec<(ExecutionContext, SharedWorkflow)> = self
            .inner
            .executions()
            .values()
            .map(|e| (e.context.clone(), Arc::clone(&e.workflow)))
            .collect();

        let mut contexts = Vec::with_capacity(entries.len());
        for (mut context, workflow) in entries {
            context.refresh(&*workflow.read().await);
            contexts.push(context);
        }
        contexts.sort_by(|a, b| a.workflow_name.cmp(&b.workflow_name));
        contexts
    }

    pub fn statistics(&self) -> ExecutionStatistics {
        let total = self.inner.total.load(Ordering::SeqCst);
        let succeeded = self.inner.succeeded.load(Ordering::SeqCst);
        ExecutionStatistics {
            active: self.inner.active.load(Ordering::SeqCst),
            total,
            succeeded,
            failed: self.inner.failed.load(Ordering::SeqCst),
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64 * 100.0
            },
        }
    }

    fn reserve(&self) -> Result<Option<OwnedSemaphorePermit>, CoordinatorError> {
        match self.inner.saturation {
            SaturationPolicy::Queue => Ok(None),
            SaturationPolicy::Reject => Arc::clone(&self.inner.permits)
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| CoordinatorError::Saturated(self.inner.max_concurrent)),
        }
    }

    fn spawn(
        &self,
        context: ExecutionContext,
        workflow: SharedWorkflow,
        permit: Option<OwnedSemaphorePermit>,
        new_run: bool,
    ) -> Result<ExecutionHandle, CoordinatorError> {
        let id = context.workflow_id.clone();
        let run_id = context.run_id;
        let token = CancellationToken::new();
        {
            let mut executions = self.inner.executions();
            if executions.contains_key(&id) {
                return Err(CoordinatorError::AlreadyRunning(id));
            }
            executions.insert(
                id.clone(),
                ActiveExecution {
                    context,
                    workflow: Arc::clone(&workflow),
                    cancellation: token.clone(),
                },
            );
        }
        if new_run {
            self.inner.total.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        tracing::info!(workflow_id = %id, %run_id, "execution submitted");

        let handle = tokio::spawn(run(
            Arc::clone(&self.inner),
            id.clone(),
            workflow,
            token,
            permit,
        ));

        Ok(ExecutionHandle {
            workflow_id: id,
            run_id,
            handle,
        })
    }
}

async fn run(
    inner: Arc<Inner>,
    id: WorkflowId,
    workflow: SharedWorkflow,
    token: CancellationToken,
    permit: Option<OwnedSemaphorePermit>,
) -> Result<ExecutionContext, CoordinatorError> {
    let mut guard = CleanupGuard {
        inner: Arc::clone(&inner),
        id: id.clone(),
        outcome: None,
    };
    let _permit = match permit {
        Some(permit) => permit,
        None => Arc::clone(&inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| CoordinatorError::Shutdown)?,
    };
    inner.set_status(&id, ExecutionStatus::Running);

    let result = inner.engine.execute_workflow(&workflow, token).await;

    let context = {
        let wf = workflow.read().await;
        inner
            .finalize(&id, &wf, result.as_ref().err())
            .ok_or_else(|| CoordinatorError::NotActive(id.clone()))?
    };
    guard.outcome = Some(context.status);

    result?;
    Ok(context)
}
