use async_trait::async_trait;
use dagcore::{
    ContextMap, DynUnitOfWork, ErrorHandling, EventLog, FnWork, Node, NodeContext, NodeError,
    NodeId, NodeStatus, NodeType, UnitOfWork, Workflow, WorkflowEvent, WorkflowSettings,
    WorkflowStatus,
};
use dagruntime::{ExecutionEngine, SharedWorkflow, StaticOrchestrator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

fn id(name: &str) -> NodeId {
    NodeId::of(name).unwrap()
}

fn echo() -> Arc<dyn DynUnitOfWork> {
    Arc::new(FnWork::new("test.echo", |input| Ok(input)))
}

fn emit(key: &'static str, value: i64) -> Arc<dyn DynUnitOfWork> {
    Arc::new(FnWork::new("test.emit", move |_| {
        let mut output = ContextMap::new();
        output.insert(key.to_string(), json!(value));
        Ok(output)
    }))
}

fn failing(message: &'static str) -> Arc<dyn DynUnitOfWork> {
    Arc::new(FnWork::new("test.fail", move |_| {
        Err(NodeError::ExecutionFailed(message.to_string()))
    }))
}

fn node(name: &str, node_type: NodeType, work: Arc<dyn DynUnitOfWork>, deps: &[&str]) -> Node {
    let mut node = Node::with_id(id(name), name, node_type, work);
    for dep in deps {
        node.add_dependency(id(dep));
    }
    node
}

fn shared(nodes: Vec<Node>, settings: WorkflowSettings) -> SharedWorkflow {
    let mut workflow = Workflow::new("engine-test");
    workflow.set_settings(settings);
    for node in nodes {
        workflow.add_node(node).unwrap();
    }
    Arc::new(RwLock::new(workflow))
}

fn engine(log: &Arc<EventLog>) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(StaticOrchestrator), log.clone())
        .with_poll_interval(Duration::from_millis(5))
}

fn completed_names(log: &EventLog) -> Vec<String> {
    log.events()
        .into_iter()
        .filter_map(|e| match e.event {
            WorkflowEvent::NodeCompleted { name, .. } => Some(name),
            _ => None,
        })
        .collect()
}

/// Sleeps for a while and records how many instances overlapped.
struct Tracked {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl UnitOfWork for Tracked {
    type Input = ContextMap;
    type Output = ContextMap;

    fn kind(&self) -> &str {
        "test.tracked"
    }

    async fn execute(&self, _input: ContextMap, _ctx: &NodeContext) -> Result<ContextMap, NodeError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(ContextMap::new())
    }
}

struct Sleep(Duration);

#[async_trait]
impl UnitOfWork for Sleep {
    type Input = ContextMap;
    type Output = ();

    fn kind(&self) -> &str {
        "test.sleep"
    }

    async fn execute(&self, _input: ContextMap, _ctx: &NodeContext) -> Result<(), NodeError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

#[derive(Deserialize)]
struct Order {
    amount: f64,
}

#[derive(Serialize)]
struct Doubled {
    doubled: f64,
}

struct Double;

#[async_trait]
impl UnitOfWork for Double {
    type Input = Order;
    type Output = Doubled;

    fn kind(&self) -> &str {
        "test.double"
    }

    async fn execute(&self, input: Order, _ctx: &NodeContext) -> Result<Doubled, NodeError> {
        Ok(Doubled {
            doubled: input.amount * 2.0,
        })
    }
}

async fn parallel_peak(max_parallel: usize) -> usize {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let tracked = || -> Arc<dyn DynUnitOfWork> {
        Arc::new(Tracked {
            current: current.clone(),
            peak: peak.clone(),
        })
    };
    let workflow = shared(
        vec![
            node("start", NodeType::Start, echo(), &[]),
            node("a", NodeType::Custom, tracked(), &["start"]),
            node("b", NodeType::Custom, tracked(), &["start"]),
            node("c", NodeType::Custom, tracked(), &["start"]),
            node("end", NodeType::End, echo(), &["a", "b", "c"]),
        ],
        WorkflowSettings::default(),
    );
    let log = Arc::new(EventLog::new());
    let status = engine(&log)
        .with_max_parallel_nodes(max_parallel)
        .execute_workflow(&workflow, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(status, WorkflowStatus::Completed);
    peak.load(Ordering::SeqCst)
}

#[tokio::test]
async fn test_linear_workflow_completes_in_order() {
    init_tracing();
    let workflow = shared(
        vec![
            node("start", NodeType::Start, emit("greeting", 1), &[]),
            node("work", NodeType::Custom, emit("answer", 42), &["start"]),
            node("end", NodeType::End, echo(), &["work"]),
        ],
        WorkflowSettings::default(),
    );
    let log = Arc::new(EventLog::new());

    let status = engine(&log)
        .execute_workflow(&workflow, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, WorkflowStatus::Completed);
    assert_eq!(completed_names(&log), vec!["start", "work", "end"]);

    let wf = workflow.read().await;
    assert_eq!(wf.global_context().get("greeting"), Some(&json!(1)));
    assert_eq!(wf.global_context().get("answer"), Some(&json!(42)));
    assert_eq!(wf.progress(), 100.0);
    // dependents see the output of what they depend on
    assert_eq!(wf.node(&id("end")).unwrap().input().get("answer"), Some(&json!(42)));

    let events = log.events();
    assert!(matches!(
        events.first().map(|e| &e.event),
        Some(WorkflowEvent::WorkflowStarted { .. })
    ));
    assert!(matches!(
        events.last().map(|e| &e.event),
        Some(WorkflowEvent::WorkflowCompleted { .. })
    ));
}

#[tokio::test]
async fn test_node_failure_stops_workflow() {
    init_tracing();
    let workflow = shared(
        vec![
            node("start", NodeType::Start, echo(), &[]),
            node("work", NodeType::Custom, failing("boom"), &["start"]),
            node("end", NodeType::End, echo(), &["work"]),
        ],
        WorkflowSettings::default(),
    );
    let log = Arc::new(EventLog::new());

    let status = engine(&log)
        .execute_workflow(&workflow, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, WorkflowStatus::Failed);
    let failed: Vec<_> = log
        .for_node(&id("work"))
        .into_iter()
        .filter_map(|e| match e {
            WorkflowEvent::NodeFailed { error, .. } => Some(error),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec!["Execution failed: boom".to_string()]);
    assert!(log.for_node(&id("end")).is_empty());

    let wf = workflow.read().await;
    assert_eq!(
        wf.error_message(),
        Some("Node 'work' failed: Execution failed: boom")
    );
    assert_eq!(
        wf.node(&id("work")).unwrap().error_message(),
        Some("Execution failed: boom")
    );
}

#[tokio::test]
async fn test_unsatisfiable_condition_stalls() {
    init_tracing();
    let workflow = shared(
        vec![
            node("start", NodeType::Start, emit_nothing(), &[]),
            node("check", NodeType::Condition, echo(), &["start"]),
        ],
        WorkflowSettings::default(),
    );
    let log = Arc::new(EventLog::new());

    let status = engine(&log)
        .execute_workflow(&workflow, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, WorkflowStatus::Stalled);
    let wf = workflow.read().await;
    assert_eq!(wf.error_message(), Some("Stalled with blocked nodes: check"));
    assert!(log
        .events()
        .iter()
        .any(|e| matches!(&e.event, WorkflowEvent::WorkflowStalled { blocked, .. } if blocked == &vec!["check".to_string()])));
}

fn emit_nothing() -> Arc<dyn DynUnitOfWork> {
    Arc::new(FnWork::new("test.nothing", |_| Ok(ContextMap::new())))
}

#[tokio::test]
async fn test_independent_nodes_run_concurrently() {
    init_tracing();
    assert!(parallel_peak(10).await >= 2);
}

#[tokio::test]
async fn test_max_parallel_one_serializes_nodes() {
    init_tracing();
    assert_eq!(parallel_peak(1).await, 1);
}

#[tokio::test]
async fn test_node_timeout_fails_node() {
    init_tracing();
    let workflow = shared(
        vec![
            node("start", NodeType::Start, echo(), &[]),
            node("slow", NodeType::Custom, Arc::new(Sleep(Duration::from_millis(500))), &["start"]),
        ],
        WorkflowSettings {
            node_timeout_ms: Some(20),
            ..WorkflowSettings::default()
        },
    );
    let log = Arc::new(EventLog::new());

    let status = engine(&log)
        .execute_workflow(&workflow, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, WorkflowStatus::Failed);
    let wf = workflow.read().await;
    let slow = wf.node(&id("slow")).unwrap();
    assert_eq!(slow.status(), NodeStatus::Failed);
    assert_eq!(slow.error_message(), Some("Timeout after 20ms"));
}

#[tokio::test]
async fn test_cancellation_interrupts_running_node() {
    init_tracing();
    let workflow = shared(
        vec![
            node("start", NodeType::Start, echo(), &[]),
            node("slow", NodeType::Custom, Arc::new(Sleep(Duration::from_secs(5))), &["start"]),
            node("end", NodeType::End, echo(), &["slow"]),
        ],
        WorkflowSettings::default(),
    );
    let log = Arc::new(EventLog::new());
    let engine = Arc::new(engine(&log));
    let token = CancellationToken::new();

    let handle = {
        let engine = engine.clone();
        let workflow = workflow.clone();
        let token = token.clone();
        tokio::spawn(async move { engine.execute_workflow(&workflow, token).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    let status = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("engine did not observe cancellation")
        .unwrap()
        .unwrap();

    assert_eq!(status, WorkflowStatus::Failed);
    let wf = workflow.read().await;
    assert_eq!(wf.node(&id("slow")).unwrap().status(), NodeStatus::Cancelled);
    assert_eq!(wf.node(&id("end")).unwrap().status(), NodeStatus::Cancelled);
    assert_eq!(wf.error_message(), Some("Execution cancelled"));
}

#[tokio::test]
async fn test_continue_on_error_skips_dependents_only() {
    init_tracing();
    let workflow = shared(
        vec![
            node("start", NodeType::Start, echo(), &[]),
            node("bad", NodeType::Custom, failing("nope"), &["start"]),
            node("after_bad", NodeType::Custom, echo(), &["bad"]),
            node("good", NodeType::Custom, emit("good", 1), &["start"]),
            node("end", NodeType::End, echo(), &["good"]),
        ],
        WorkflowSettings {
            on_error: ErrorHandling::ContinueOnError,
            ..WorkflowSettings::default()
        },
    );
    let log = Arc::new(EventLog::new());

    let status = engine(&log)
        .execute_workflow(&workflow, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, WorkflowStatus::Completed);
    let wf = workflow.read().await;
    let status_of = |name: &str| wf.node(&id(name)).unwrap().status();
    assert_eq!(status_of("bad"), NodeStatus::Failed);
    assert_eq!(status_of("after_bad"), NodeStatus::Skipped);
    assert_eq!(status_of("good"), NodeStatus::Completed);
    assert_eq!(status_of("end"), NodeStatus::Completed);
    assert_eq!(wf.global_context().get("good"), Some(&json!(1)));
}

#[tokio::test]
async fn test_node_events_keep_recording_order() {
    init_tracing();
    let workflow = shared(
        vec![
            node("start", NodeType::Start, echo(), &[]),
            node("z_bad", NodeType::Custom, failing("boom"), &["start"]),
            node("a_after", NodeType::Custom, echo(), &["z_bad"]),
        ],
        WorkflowSettings {
            on_error: ErrorHandling::ContinueOnError,
            ..WorkflowSettings::default()
        },
    );
    let log = Arc::new(EventLog::new());

    engine(&log)
        .execute_workflow(&workflow, CancellationToken::new())
        .await
        .unwrap();

    let messages: Vec<String> = log.events().iter().map(|e| e.event.message()).collect();
    let position = |prefix: &str| {
        messages
            .iter()
            .position(|m| m.starts_with(prefix))
            .unwrap_or_else(|| panic!("no event starting with {:?} in {:?}", prefix, messages))
    };
    let started = position("Node 'z_bad' started");
    let failed = position("Node 'z_bad' failed");
    let skipped = position("Node 'a_after' skipped");
    assert!(started < failed);
    assert!(failed < skipped, "{:?}", messages);
}

#[tokio::test]
async fn test_typed_unit_of_work_reads_initial_context() {
    init_tracing();
    let workflow = shared(
        vec![
            node("start", NodeType::Start, echo(), &[]),
            node("double", NodeType::Custom, Arc::new(Double), &["start"]),
        ],
        WorkflowSettings::default(),
    );
    {
        let mut wf = workflow.write().await;
        wf.update_global_context("amount", 21.5);
    }
    let log = Arc::new(EventLog::new());

    let status = engine(&log)
        .execute_workflow(&workflow, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, WorkflowStatus::Completed);
    let wf = workflow.read().await;
    assert_eq!(wf.global_context().get("doubled"), Some(&json!(43.0)));
    assert_eq!(wf.global_context().get("amount"), Some(&json!(21.5)));
}

#[tokio::test]
async fn test_unparseable_typed_input_fails_node() {
    init_tracing();
    let workflow = shared(
        vec![
            node("start", NodeType::Start, echo(), &[]),
            node("double", NodeType::Custom, Arc::new(Double), &["start"]),
        ],
        WorkflowSettings::default(),
    );
    let log = Arc::new(EventLog::new());

    let status = engine(&log)
        .execute_workflow(&workflow, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(status, WorkflowStatus::Failed);
    let wf = workflow.read().await;
    let message = wf.node(&id("double")).unwrap().error_message().unwrap().to_string();
    assert!(message.starts_with("Invalid input:"), "{}", message);
}
