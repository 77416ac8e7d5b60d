mod base;
mod log;

pub use base::{EventBus, EventSink, ExecutionEvent, WorkflowEvent};
pub use log::EventLog;
