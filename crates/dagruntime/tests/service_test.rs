use async_trait::async_trait;
use dagcore::{
    ContextMap, DynUnitOfWork, FnWork, NodeContext, NodeError, NodeStatus, NodeType, UnitOfWork,
    WorkflowError, WorkflowId, WorkflowStatus,
};
use dagruntime::{
    CreateWorkflowCommand, EdgeDefinition, ExecutionStatus, FlowRuntime, FnFactory, NodeRegistry,
    NodeSpec, RuntimeConfig, WorkflowDefinition, WorkflowFilter, WorkflowService,
};
use serde_json::json;
use std::sync::Arc;
use tokio::time::Duration;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
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

fn echo() -> Arc<dyn DynUnitOfWork> {
    Arc::new(FnWork::new("test.echo", |input| Ok(input)))
}

/// Reads `count` from its input and emits `count + 1` as `next`.
fn increment() -> Arc<dyn DynUnitOfWork> {
    Arc::new(FnWork::new("test.increment", |input: ContextMap| {
        let count = input
            .get("count")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| NodeError::MissingInput("count".to_string()))?;
        let mut output = ContextMap::new();
        output.insert("next".to_string(), json!(count + 1));
        Ok(output)
    }))
}

fn linear(name: &str, work: Arc<dyn DynUnitOfWork>) -> CreateWorkflowCommand {
    CreateWorkflowCommand::new(name)
        .node(NodeSpec::new("start", NodeType::Start, echo()))
        .node(NodeSpec::new("work", NodeType::Custom, work).depends_on("start"))
        .node(NodeSpec::new("end", NodeType::End, echo()).depends_on("work"))
        .edge(EdgeDefinition::new("start", "work"))
        .edge(EdgeDefinition::new("work", "end"))
}

fn service() -> WorkflowService {
    let runtime = FlowRuntime::with_config(RuntimeConfig {
        poll_interval_ms: 5,
        ..RuntimeConfig::default()
    });
    WorkflowService::new(runtime.service().store().clone(), runtime.coordinator().clone())
}

async fn create(service: &WorkflowService, command: CreateWorkflowCommand) -> WorkflowId {
    let created = service.create(command).await;
    assert!(created.success, "{}", created.message);
    created.into_data().unwrap()
}

#[tokio::test]
async fn test_create_valid_workflow() {
    init_tracing();
    let service = service();
    let created = service.create(linear("orders", echo())).await;

    assert!(created.success);
    assert_eq!(created.message, "Workflow 'orders' created");
    let id = created.data.unwrap();

    let report = service.status(&id).await.into_data().unwrap();
    assert_eq!(report.name, "orders");
    assert_eq!(report.status, WorkflowStatus::Created);
    assert_eq!(report.execution, ExecutionStatus::Pending);
    let names: Vec<_> = report.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["end", "start", "work"]);
}

#[tokio::test]
async fn test_create_rejects_cycle() {
    let service = service();
    let command = CreateWorkflowCommand::new("loop")
        .node(NodeSpec::new("start", NodeType::Start, echo()))
        .node(NodeSpec::new("a", NodeType::Custom, echo()).depends_on("start").depends_on("b"))
        .node(NodeSpec::new("b", NodeType::Custom, echo()).depends_on("a"));

    let created = service.create(command).await;
    assert!(!created.success);
    assert!(created.data.is_none());
    assert!(
        created.message.starts_with("Failed to create workflow 'loop': Cyclic dependency"),
        "{}",
        created.message
    );
}

#[tokio::test]
async fn test_create_rejects_unknown_edge_target() {
    let service = service();
    let command = linear("broken", echo()).edge(EdgeDefinition::new("work", "ghost"));

    let created = service.create(command).await;
    assert!(!created.success);
    assert_eq!(
        created.message,
        "Failed to create workflow 'broken': Invalid connection: unknown target node 'ghost'"
    );
}

#[tokio::test]
async fn test_create_rejects_unknown_dependency() {
    let service = service();
    let command = CreateWorkflowCommand::new("dangling")
        .node(NodeSpec::new("start", NodeType::Start, echo()))
        .node(NodeSpec::new("work", NodeType::Custom, echo()).depends_on("missing"));

    let created = service.create(command).await;
    assert!(!created.success);
    assert!(created.message.contains("depends on unknown node 'missing'"));
}

#[tokio::test]
async fn test_execute_with_initial_context() {
    init_tracing();
    let service = service();
    let id = create(&service, linear("counter", increment())).await;

    let mut initial = ContextMap::new();
    initial.insert("count".to_string(), json!(41));
    let executed = service.execute(&id, initial).await;

    assert!(executed.success, "{}", executed.message);
    let context = executed.data.unwrap();
    assert_eq!(context.status, ExecutionStatus::Completed);

    let report = service.status(&id).await.into_data().unwrap();
    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.context.get("next"), Some(&json!(42)));
    assert_eq!(report.progress, 100.0);
    assert!(report.nodes.iter().all(|n| n.status == NodeStatus::Completed));
}

#[tokio::test]
async fn test_execute_reports_failure() {
    let service = service();
    let id = create(&service, linear("missing-count", increment())).await;

    let executed = service.execute(&id, ContextMap::new()).await;

    assert!(!executed.success);
    let context = executed.data.unwrap();
    assert_eq!(context.status, ExecutionStatus::Failed);
    assert_eq!(
        context.error_message.as_deref(),
        Some("Node 'work' failed: Missing required input: count")
    );
    let report = service.status(&id).await.into_data().unwrap();
    let work = report.nodes.iter().find(|n| n.name == "work").unwrap();
    assert_eq!(work.error.as_deref(), Some("Missing required input: count"));
}

#[tokio::test]
async fn test_start_twice_fails() {
    let service = service();
    let id = create(&service, linear("once", echo())).await;

    let first = service.execute(&id, ContextMap::new()).await;
    assert!(first.success);
    let second = service.start(&id, ContextMap::new()).await;
    assert!(!second.success);
    assert_eq!(second.message, "Workflow 'once' cannot start from COMPLETED");
}

#[tokio::test]
async fn test_cancel_rules() {
    let service = service();

    let done = create(&service, linear("done", echo())).await;
    assert!(service.execute(&done, ContextMap::new()).await.success);
    let cancelled = service.cancel(&done, "too late").await;
    assert!(!cancelled.success);
    assert_eq!(cancelled.message, "Cannot cancel a completed workflow");

    let idle = create(&service, linear("idle", echo())).await;
    let cancelled = service.cancel(&idle, "not needed").await;
    assert!(cancelled.success);
    let report = service.status(&idle).await.into_data().unwrap();
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.error_message.as_deref(), Some("not needed"));
    assert!(report.nodes.iter().all(|n| n.status == NodeStatus::Cancelled));

    let again = service.cancel(&idle, "twice").await;
    assert_eq!(again.message, "Workflow already finished with status FAILED");

    let missing = service.cancel(&WorkflowId::generate(), "who").await;
    assert!(missing.message.starts_with("Workflow not found: "));
}

#[tokio::test]
async fn test_cancel_running_workflow() {
    let service = service();
    let id = create(&service, linear("slow", Arc::new(Sleep(Duration::from_secs(5))))).await;

    let handle = service.start(&id, ContextMap::new()).await.into_data().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let cancelled = service.cancel(&id, "operator abort").await;
    assert!(cancelled.success, "{}", cancelled.message);

    let context = handle.join().await.unwrap();
    assert_eq!(context.status, ExecutionStatus::Cancelled);
    let report = service.status(&id).await.into_data().unwrap();
    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.execution, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_pause_and_resume() {
    init_tracing();
    let service = service();
    let id = create(&service, linear("pausable", Arc::new(Sleep(Duration::from_millis(100))))).await;

    let handle = service.start(&id, ContextMap::new()).await.into_data().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(service.pause(&id).await.success);

    let paused = handle.join().await.unwrap();
    assert_eq!(paused.status, ExecutionStatus::Paused);
    let report = service.status(&id).await.into_data().unwrap();
    assert_eq!(report.status, WorkflowStatus::Paused);

    let resumed = service.resume(&id).await;
    assert!(resumed.success, "{}", resumed.message);
    let context = resumed.data.unwrap().join().await.unwrap();
    assert_eq!(context.status, ExecutionStatus::Completed);

    let not_paused = service.pause(&id).await;
    assert!(!not_paused.success);
}

#[tokio::test]
async fn test_delete_rules() {
    let service = service();
    let id = create(&service, linear("slow", Arc::new(Sleep(Duration::from_millis(200))))).await;

    let handle = service.start(&id, ContextMap::new()).await.into_data().unwrap();
    let deleted = service.delete(&id).await;
    assert!(!deleted.success);
    assert_eq!(deleted.message, "Cannot delete a running workflow");

    handle.join().await.unwrap();
    assert!(service.delete(&id).await.success);
    assert!(!service.status(&id).await.success);
}

#[tokio::test]
async fn test_list_filters_and_sorts() {
    let service = service();
    let b = create(&service, linear("billing-report", echo())).await;
    create(&service, linear("audit-report", echo())).await;
    create(&service, linear("cleanup", echo())).await;
    assert!(service.execute(&b, ContextMap::new()).await.success);

    let all: Vec<_> = service
        .list(&WorkflowFilter::default())
        .await
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(all, vec!["audit-report", "billing-report", "cleanup"]);

    let reports = service
        .list(&WorkflowFilter {
            status: None,
            name_contains: Some("report".to_string()),
        })
        .await;
    assert_eq!(reports.len(), 2);

    let completed = service
        .list(&WorkflowFilter {
            status: Some(WorkflowStatus::Completed),
            name_contains: Some("report".to_string()),
        })
        .await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].name, "billing-report");
    assert_eq!(completed[0].completed_nodes, 3);
}

#[tokio::test]
async fn test_runtime_executes_definition() {
    init_tracing();
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(FnFactory::new("test.echo", |_config: &ContextMap| Ok(echo()))));
    registry.register(Arc::new(FnFactory::new("test.increment", |_config: &ContextMap| {
        Ok(increment())
    })));
    let runtime = FlowRuntime::with_registry(Arc::new(registry), RuntimeConfig::default());
    let mut events = runtime.subscribe_events();

    let definition: WorkflowDefinition = serde_json::from_value(json!({
        "name": "from-json",
        "context": {"count": 1},
        "nodes": [
            {"name": "start", "type": "START", "kind": "test.echo"},
            {"name": "work", "kind": "test.increment", "dependencies": ["start"]},
            {"name": "end", "type": "END", "kind": "test.echo", "dependencies": ["work"]}
        ],
        "edges": [
            {"source": "start", "target": "work"},
            {"source": "work", "target": "end", "type": "data_flow"}
        ]
    }))
    .unwrap();

    let context = runtime.execute(definition, ContextMap::new()).await.unwrap();
    assert_eq!(context.status, ExecutionStatus::Completed);
    assert_eq!(context.completed_nodes, 3);

    let first = events.recv().await.unwrap();
    assert_eq!(first.event.event_type(), "WorkflowStarted");
    assert_eq!(runtime.coordinator().statistics().succeeded, 1);
}

#[tokio::test]
async fn test_runtime_rejects_unknown_kind() {
    let runtime = FlowRuntime::new();
    let definition: WorkflowDefinition = serde_json::from_value(json!({
        "name": "unknown",
        "nodes": [{"name": "start", "type": "START", "kind": "nope"}]
    }))
    .unwrap();

    let error = runtime.register_workflow(definition).await.unwrap_err();
    assert!(matches!(
        error,
        dagcore::FlowError::Workflow(WorkflowError::UnknownNodeType(ref kind)) if kind == "nope"
    ));
}
