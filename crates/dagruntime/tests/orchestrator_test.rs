use dagcore::{
    ContextMap, DynUnitOfWork, ErrorHandling, FnWork, Node, NodeError, NodeId, NodeStatus,
    NodeType, Value, Workflow, WorkflowError, WorkflowSettings, WorkflowStatus,
};
use dagruntime::{orchestrator_for, OrchestrationType, Orchestrator, StaticOrchestrator};
use serde_json::json;
use std::sync::Arc;

fn echo() -> Arc<dyn DynUnitOfWork> {
    Arc::new(FnWork::new("test.echo", |input| Ok(input)))
}

fn id(name: &str) -> NodeId {
    NodeId::of(name).unwrap()
}

fn node(name: &str, node_type: NodeType, deps: &[&str]) -> Node {
    let mut node = Node::with_id(id(name), name, node_type, echo());
    for dep in deps {
        node.add_dependency(id(dep));
    }
    node
}

fn workflow(nodes: Vec<Node>) -> Workflow {
    let mut workflow = Workflow::new("test");
    for node in nodes {
        workflow.add_node(node).unwrap();
    }
    workflow
}

fn map(value: Value) -> ContextMap {
    match value {
        Value::Object(fields) => fields.into_iter().collect(),
        _ => ContextMap::new(),
    }
}

/// Runs `name` to completion with `output` through the workflow.
fn complete(workflow: &mut Workflow, name: &str, output: Value) {
    let _ = workflow.start_node(&id(name)).unwrap();
    workflow.finish_node(&id(name), Ok(map(output))).unwrap();
}

#[test]
fn test_linear_workflow_is_valid() {
    let wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("work", NodeType::Custom, &["start"]),
        node("end", NodeType::End, &["work"]),
    ]);
    assert_eq!(StaticOrchestrator.validate_workflow_structure(&wf), Ok(()));
}

#[test]
fn test_cycle_is_rejected() {
    let wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("a", NodeType::Custom, &["start", "b"]),
        node("b", NodeType::Custom, &["a"]),
    ]);
    let result = StaticOrchestrator.validate_workflow_structure(&wf);
    assert!(
        matches!(result, Err(WorkflowError::CyclicDependency { ref node }) if node == "a" || node == "b"),
        "unexpected result {:?}",
        result
    );
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("loop", NodeType::Custom, &["start", "loop"]),
    ]);
    assert_eq!(
        StaticOrchestrator.validate_workflow_structure(&wf),
        Err(WorkflowError::CyclicDependency {
            node: "loop".to_string()
        })
    );
}

#[test]
fn test_orphaned_node_is_rejected() {
    let wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("work", NodeType::Custom, &["start"]),
        node("loner", NodeType::Custom, &[]),
    ]);
    assert_eq!(
        StaticOrchestrator.validate_workflow_structure(&wf),
        Err(WorkflowError::OrphanedNodes(vec!["loner".to_string()]))
    );
}

#[test]
fn test_exactly_one_start_node_required() {
    let none = workflow(vec![node("work", NodeType::Custom, &[])]);
    assert_eq!(
        StaticOrchestrator.validate_workflow_structure(&none),
        Err(WorkflowError::MissingStartNode)
    );

    let two = workflow(vec![
        node("s1", NodeType::Start, &[]),
        node("s2", NodeType::Start, &[]),
        node("end", NodeType::End, &["s1", "s2"]),
    ]);
    assert_eq!(
        StaticOrchestrator.validate_workflow_structure(&two),
        Err(WorkflowError::MultipleStartNodes(2))
    );
}

#[test]
fn test_unknown_dependency_is_rejected() {
    let wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("work", NodeType::Custom, &["start", "ghost"]),
    ]);
    assert_eq!(
        StaticOrchestrator.validate_workflow_structure(&wf),
        Err(WorkflowError::UnknownDependency {
            node: "work".to_string(),
            dependency: "ghost".to_string()
        })
    );
}

#[test]
fn test_priority_combines_type_rank_and_depth() {
    let wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("a", NodeType::Custom, &["start"]),
        node("b", NodeType::Custom, &["a"]),
        node("end", NodeType::End, &["b"]),
    ]);
    let orchestrator = StaticOrchestrator;
    let priority = |name: &str| orchestrator.node_priority(wf.node(&id(name)).unwrap(), &wf);

    assert_eq!(priority("start"), 100);
    assert_eq!(priority("a"), 901);
    assert_eq!(priority("b"), 902);
    assert_eq!(priority("end"), 803);
    assert!(priority("a") < priority("b"));
}

#[test]
fn test_next_executable_nodes_sorted_by_priority_then_name() {
    let mut wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("zeta", NodeType::Custom, &["start"]),
        node("alpha", NodeType::Custom, &["start"]),
        node("branch", NodeType::Condition, &["start"]),
        node("end", NodeType::End, &["zeta", "alpha", "branch"]),
    ]);
    wf.start().unwrap();
    let orchestrator = StaticOrchestrator;

    let names: Vec<_> = orchestrator
        .next_executable_nodes(&wf)
        .iter()
        .map(|n| n.name().to_string())
        .collect();
    assert_eq!(names, vec!["start"]);

    complete(&mut wf, "start", json!({"status": "ok"}));
    orchestrator.adjust_execution_order(&mut wf, &id("start"), &map(json!({"status": "ok"})));

    let names: Vec<_> = orchestrator
        .next_executable_nodes(&wf)
        .iter()
        .map(|n| n.name().to_string())
        .collect();
    assert_eq!(names, vec!["branch", "alpha", "zeta"]);
}

#[test]
fn test_end_waits_for_every_other_node() {
    let mut wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("slow", NodeType::Custom, &["start"]),
        node("end", NodeType::End, &["start"]),
    ]);
    wf.start().unwrap();
    complete(&mut wf, "start", json!({}));

    let orchestrator = StaticOrchestrator;
    assert!(!orchestrator.can_execute_node(wf.node(&id("end")).unwrap(), &wf));

    complete(&mut wf, "slow", json!({}));
    assert!(orchestrator.can_execute_node(wf.node(&id("end")).unwrap(), &wf));
}

#[test]
fn test_end_tolerates_failures_when_continuing() {
    let mut wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("flaky", NodeType::Custom, &["start"]),
        node("end", NodeType::End, &["start"]),
    ]);
    wf.set_settings(WorkflowSettings {
        on_error: ErrorHandling::ContinueOnError,
        ..WorkflowSettings::default()
    });
    wf.start().unwrap();
    complete(&mut wf, "start", json!({}));

    let _ = wf.start_node(&id("flaky")).unwrap();
    wf.finish_node(
        &id("flaky"),
        Err(NodeError::ExecutionFailed("boom".to_string())),
    )
    .unwrap();

    assert_eq!(wf.status(), WorkflowStatus::Running);
    assert!(StaticOrchestrator.can_execute_node(wf.node(&id("end")).unwrap(), &wf));
}

#[test]
fn test_condition_requires_input() {
    let mut wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("check", NodeType::Condition, &["start"]),
    ]);
    wf.start().unwrap();
    complete(&mut wf, "start", json!({}));

    let orchestrator = StaticOrchestrator;
    assert!(!orchestrator.can_execute_node(wf.node(&id("check")).unwrap(), &wf));

    orchestrator.adjust_execution_order(&mut wf, &id("start"), &map(json!({"score": 3})));
    let check = wf.node(&id("check")).unwrap();
    assert_eq!(check.input().get("score"), Some(&json!(3)));
    assert!(orchestrator.can_execute_node(check, &wf));
}

#[test]
fn test_aggregator_waits_for_parallel_nodes_depending_on_it() {
    let mut wf = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("gather", NodeType::Aggregator, &["start"]),
        node("fan", NodeType::Parallel, &["gather"]),
    ]);
    wf.start().unwrap();
    complete(&mut wf, "start", json!({}));

    let orchestrator = StaticOrchestrator;
    assert!(!orchestrator.can_execute_node(wf.node(&id("gather")).unwrap(), &wf));

    let mut free = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("gather", NodeType::Aggregator, &["start"]),
    ]);
    free.start().unwrap();
    complete(&mut free, "start", json!({}));
    assert!(orchestrator.can_execute_node(free.node(&id("gather")).unwrap(), &free));
}

#[test]
fn test_running_or_finished_nodes_are_not_executable() {
    let mut wf = workflow(vec![node("start", NodeType::Start, &[])]);
    wf.start().unwrap();
    let orchestrator = StaticOrchestrator;
    assert!(orchestrator.can_execute_node(wf.node(&id("start")).unwrap(), &wf));

    let _invocation = wf.start_node(&id("start")).unwrap();
    let start = wf.node(&id("start")).unwrap();
    assert_eq!(start.status(), NodeStatus::Running);
    assert!(!orchestrator.can_execute_node(start, &wf));
}

#[test]
fn test_completion_prefers_end_node() {
    let orchestrator = StaticOrchestrator;

    let mut with_end = workflow(vec![
        node("start", NodeType::Start, &[]),
        node("end", NodeType::End, &["start"]),
    ]);
    with_end.start().unwrap();
    complete(&mut with_end, "start", json!({}));
    assert!(!orchestrator.is_workflow_completed(&with_end));
    complete(&mut with_end, "end", json!({}));
    assert!(orchestrator.is_workflow_completed(&with_end));

    let mut without_end = workflow(vec![node("start", NodeType::Start, &[])]);
    without_end.start().unwrap();
    assert!(!orchestrator.is_workflow_completed(&without_end));
    complete(&mut without_end, "start", json!({}));
    assert!(orchestrator.is_workflow_completed(&without_end));
}

#[test]
fn test_all_selectors_resolve_to_static() {
    for kind in [
        OrchestrationType::Static,
        OrchestrationType::Dynamic,
        OrchestrationType::Hybrid,
    ] {
        assert_eq!(orchestrator_for(kind).orchestration_type(), OrchestrationType::Static);
    }
}
