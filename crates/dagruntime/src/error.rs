use dagcore::{FlowError, WorkflowError, WorkflowId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Workflow {0} is already running")]
    AlreadyRunning(WorkflowId),

    #[error("Workflow {0} is not being executed")]
    NotActive(WorkflowId),

    #[error("Execution pool saturated: {0} workflows already running")]
    Saturated(usize),

    #[error("Execution task failed: {0}")]
    Join(String),

    #[error("Execution pool is shut down")]
    Shutdown,

    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl From<WorkflowError> for CoordinatorError {
    fn from(error: WorkflowError) -> Self {
        CoordinatorError::Flow(FlowError::Workflow(error))
    }
}
