use dagcore::{ContextMap, ErrorHandling, Node, NodeId, NodeStatus, NodeType, Workflow, WorkflowError};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Scheduling policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationType {
    #[default]
    Static,
    Dynamic,
    Hybrid,
}

/// Policy consulted by the engine: structural validity, eligibility,
/// priority and completion.
pub trait Orchestrator: Send + Sync {
    fn orchestration_type(&self) -> OrchestrationType;

    fn validate_workflow_structure(&self, workflow: &Workflow) -> Result<(), WorkflowError>;

    fn can_execute_node(&self, node: &Node, workflow: &Workflow) -> bool;

    /// Lower runs first.
    fn node_priority(&self, node: &Node, workflow: &Workflow) -> u32;

    fn is_workflow_completed(&self, workflow: &Workflow) -> bool;

    /// Called after `completed` finished with `result`.
    fn adjust_execution_order(&self, workflow: &mut Workflow, completed: &NodeId, result: &ContextMap);

    /// Eligible nodes in ascending priority; ties broken by name then id.
    fn next_executable_nodes<'a>(&self, workflow: &'a Workflow) -> Vec<&'a Node> {
        let mut nodes: Vec<(u32, &Node)> = workflow
            .nodes()
            .filter(|node| self.can_execute_node(node, workflow))
            .map(|node| (self.node_priority(node, workflow), node))
            .collect();
        nodes.sort_by(|(pa, a), (pb, b)| {
            pa.cmp(pb)
                .then_with(|| a.name().cmp(b.name()))
                .then_with(|| a.id().cmp(b.id()))
        });
        nodes.into_iter().map(|(_, node)| node).collect()
    }
}

/// Resolves a selector to an orchestrator. Only the static policy exists;
/// the other selectors fall back to it.
pub fn orchestrator_for(kind: OrchestrationType) -> Arc<dyn Orchestrator> {
    if kind != OrchestrationType::Static {
        tracing::debug!(requested = ?kind, "falling back to static orchestration");
    }
    Arc::new(StaticOrchestrator)
}

/// Purely structural policy: no runtime re-planning.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticOrchestrator;

impl StaticOrchestrator {
    pub fn new() -> Self {
        Self
    }

    fn type_rank(node_type: NodeType) -> u32 {
        match node_type {
            NodeType::Start => 1,
            NodeType::Condition => 3,
            NodeType::Parallel => 4,
            NodeType::Aggregator => 5,
            NodeType::SubWorkflow => 6,
            NodeType::HumanIntervention => 7,
            NodeType::End => 8,
            NodeType::Custom => 9,
        }
    }

    /// Longest dependency chain below `node`. Revisiting a node on the
    /// current path contributes zero.
    pub fn dependency_depth(workflow: &Workflow, node: &Node) -> u32 {
        fn depth(workflow: &Workflow, node: &Node, path: &mut HashSet<NodeId>) -> u32 {
            if !path.insert(node.id().clone()) {
                return 0;
            }
            if node.dependencies().is_empty() {
                path.remove(node.id());
                return 0;
            }
            let deepest = node
                .dependencies()
                .iter()
                .filter_map(|dep| workflow.node(dep))
                .map(|dep| depth(workflow, dep, path))
                .max()
                .unwrap_or(0);
            path.remove(node.id());
            deepest + 1
        }
        depth(workflow, node, &mut HashSet::new())
    }

    /// Dependency graph with edges pointing from a dependency to its
    /// dependents. Unknown dependency ids are left out.
    fn dependency_graph(workflow: &Workflow) -> (DiGraph<NodeId, ()>, HashMap<NodeId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for node in workflow.sorted_nodes() {
            let idx = graph.add_node(node.id().clone());
            indices.insert(node.id().clone(), idx);
        }
        for node in workflow.sorted_nodes() {
            let mut dependencies: Vec<&NodeId> = node.dependencies().iter().collect();
            dependencies.sort();
            for dep in dependencies {
                if let (Some(from), Some(to)) = (indices.get(dep), indices.get(node.id())) {
                    graph.add_edge(*from, *to, ());
                }
            }
        }
        (graph, indices)
    }

    fn node_name(workflow: &Workflow, id: &NodeId) -> String {
        workflow
            .node(id)
            .map(|n| n.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn is_settled(status: NodeStatus, tolerate_failures: bool) -> bool {
        match status {
            NodeStatus::Completed | NodeStatus::Skipped => true,
            NodeStatus::Failed | NodeStatus::Cancelled => tolerate_failures,
            _ => false,
        }
    }

    fn all_non_end_nodes_settled(workflow: &Workflow) -> bool {
        let tolerate = workflow.settings().on_error == ErrorHandling::ContinueOnError;
        workflow
            .nodes()
            .filter(|n| n.node_type() != NodeType::End)
            .all(|n| Self::is_settled(n.status(), tolerate))
    }

    fn parallel_branches_completed(workflow: &Workflow, aggregator: &Node) -> bool {
        workflow
            .nodes()
            .filter(|n| n.node_type() == NodeType::Parallel)
            .filter(|n| n.dependencies().contains(aggregator.id()))
            .all(|n| n.status() == NodeStatus::Completed)
    }
}

impl Orchestrator for StaticOrchestrator {
    fn orchestration_type(&self) -> OrchestrationType {
        OrchestrationType::Static
    }

    /// Checks, in order: no dependency cycle, every node reachable from the
    /// START node, exactly one START node, no dependency on an unknown node.
    fn validate_workflow_structure(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        let (graph, _) = Self::dependency_graph(workflow);

        if let Err(cycle) = toposort(&graph, None) {
            let node = Self::node_name(workflow, &graph[cycle.node_id()]);
            return Err(WorkflowError::CyclicDependency { node });
        }

        let starts: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|idx| {
                workflow
                    .node(&graph[*idx])
                    .is_some_and(|n| n.node_type() == NodeType::Start)
            })
            .collect();

        if !starts.is_empty() {
            let mut reachable = HashSet::new();
            for start in &starts {
                let mut dfs = Dfs::new(&graph, *start);
                while let Some(idx) = dfs.next(&graph) {
                    reachable.insert(idx);
                }
            }
            let orphans: Vec<String> = graph
                .node_indices()
                .filter(|idx| !reachable.contains(idx))
                .map(|idx| Self::node_name(workflow, &graph[idx]))
                .collect();
            if !orphans.is_empty() {
                return Err(WorkflowError::OrphanedNodes(orphans));
            }
        }

        match starts.len() {
            0 => return Err(WorkflowError::MissingStartNode),
            1 => {}
            n => return Err(WorkflowError::MultipleStartNodes(n)),
        }

        for node in workflow.sorted_nodes() {
            let mut dependencies: Vec<&NodeId> = node.dependencies().iter().collect();
            dependencies.sort();
            if let Some(unknown) = dependencies.into_iter().find(|dep| !workflow.contains_node(dep)) {
                return Err(WorkflowError::UnknownDependency {
                    node: node.name().to_string(),
                    dependency: unknown.to_string(),
                });
            }
        }

        Ok(())
    }

    fn can_execute_node(&self, node: &Node, workflow: &Workflow) -> bool {
        if !node.status().is_pending() {
            return false;
        }

        let dependencies_completed = node.dependencies().iter().all(|dep| {
            workflow
                .node(dep)
                .is_some_and(|d| d.status() == NodeStatus::Completed)
        });
        if !dependencies_completed {
            return false;
        }

        match node.node_type() {
            NodeType::Start => true,
            NodeType::End => Self::all_non_end_nodes_settled(workflow),
            NodeType::Condition => !node.input().is_empty(),
            NodeType::Parallel => true,
            NodeType::Aggregator => Self::parallel_branches_completed(workflow, node),
            NodeType::Custom | NodeType::SubWorkflow | NodeType::HumanIntervention => true,
        }
    }

    fn node_priority(&self, node: &Node, workflow: &Workflow) -> u32 {
        Self::type_rank(node.node_type()) * 100 + Self::dependency_depth(workflow, node)
    }

    fn is_workflow_completed(&self, workflow: &Workflow) -> bool {
        let mut has_end = false;
        for node in workflow.nodes() {
            if node.node_type() == NodeType::End {
                if node.status() == NodeStatus::Completed {
                    return true;
                }
                has_end = true;
            }
        }
        !has_end
            && workflow
                .nodes()
                .all(|n| matches!(n.status(), NodeStatus::Completed | NodeStatus::Skipped))
    }

    /// Static policy never reorders; it only forwards `result` into the
    /// input of every node depending on `completed`.
    fn adjust_execution_order(&self, workflow: &mut Workflow, completed: &NodeId, result: &ContextMap) {
        let dependents: Vec<NodeId> = workflow
            .nodes()
            .filter(|n| n.dependencies().contains(completed))
            .map(|n| n.id().clone())
            .collect();
        for id in dependents {
            if let Some(node) = workflow.node_mut(&id) {
                node.merge_input(result);
            }
        }
    }
}
