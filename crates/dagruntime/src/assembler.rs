//! Builds validated workflows from name-based graph descriptions.
//!
//! Callers describe nodes and edges by name; the assembler generates ids,
//! resolves dependency and edge endpoint names, and runs structural
//! validation before handing the workflow back.

use crate::orchestrator::{orchestrator_for, OrchestrationType};
use crate::registry::NodeRegistry;
use dagcore::{
    ContextMap, DynUnitOfWork, Edge, EdgeType, Node, NodeId, NodeType, Workflow, WorkflowError,
    WorkflowSettings,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A node to create: its role, its dependencies by name and its behaviour.
#[derive(Clone)]
pub struct NodeSpec {
    pub name: String,
    pub node_type: NodeType,
    pub dependencies: Vec<String>,
    pub input: ContextMap,
    pub work: Arc<dyn DynUnitOfWork>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, node_type: NodeType, work: Arc<dyn DynUnitOfWork>) -> Self {
        Self {
            name: name.into(),
            node_type,
            dependencies: Vec::new(),
            input: ContextMap::new(),
            work,
        }
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.input.insert(key.into(), value.into());
        self
    }
}

/// An edge between two named nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Edge type name; blank or unknown names mean SEQUENCE
    #[serde(rename = "type", default)]
    pub edge_type: String,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: ContextMap,
}

fn default_enabled() -> bool {
    true
}

impl EdgeDefinition {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            name: None,
            edge_type: String::new(),
            condition: None,
            priority: 0,
            enabled: true,
            description: None,
            properties: ContextMap::new(),
        }
    }
}

/// Everything needed to create a workflow.
#[derive(Clone)]
pub struct CreateWorkflowCommand {
    pub name: String,
    pub description: Option<String>,
    pub orchestration: OrchestrationType,
    pub settings: WorkflowSettings,
    pub context: ContextMap,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeDefinition>,
}

impl CreateWorkflowCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            orchestration: OrchestrationType::Static,
            settings: WorkflowSettings::default(),
            context: ContextMap::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn edge(mut self, edge: EdgeDefinition) -> Self {
        self.edges.push(edge);
        self
    }
}

/// Serializable node description, resolved through the [`NodeRegistry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    /// Registered unit-of-work kind, e.g. "debug.log"
    pub kind: String,
    #[serde(default)]
    pub config: ContextMap,
    #[serde(default)]
    pub input: ContextMap,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Serializable workflow description, e.g. loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub orchestration: OrchestrationType,
    #[serde(default)]
    pub settings: WorkflowSettings,
    #[serde(default)]
    pub context: ContextMap,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl WorkflowDefinition {
    /// Creates every node's unit of work through `registry`.
    pub fn into_command(self, registry: &NodeRegistry) -> Result<CreateWorkflowCommand, WorkflowError> {
        let nodes = self
            .nodes
            .into_iter()
            .map(|node| {
                let work = registry.create_work(&node.kind, &node.config)?;
                Ok(NodeSpec {
                    name: node.name,
                    node_type: node.node_type,
                    dependencies: node.dependencies,
                    input: node.input,
                    work,
                })
            })
            .collect::<Result<Vec<_>, WorkflowError>>()?;

        Ok(CreateWorkflowCommand {
            name: self.name,
            description: self.description,
            orchestration: self.orchestration,
            settings: self.settings,
            context: self.context,
            nodes,
            edges: self.edges,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkflowAssembler;

impl WorkflowAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, command: CreateWorkflowCommand) -> Result<Workflow, WorkflowError> {
        if command.name.trim().is_empty() {
            return Err(WorkflowError::Invalid("workflow name cannot be blank".into()));
        }

        let mut ids: HashMap<String, NodeId> = HashMap::new();
        for spec in &command.nodes {
            if ids.insert(spec.name.clone(), NodeId::generate()).is_some() {
                return Err(WorkflowError::Invalid(format!(
                    "duplicate node name '{}'",
                    spec.name
                )));
            }
        }

        let mut workflow = Workflow::new(command.name);
        workflow.set_description(command.description);
        workflow.set_settings(command.settings);
        workflow.merge_global_context(&command.context);

        for spec in command.nodes {
            let id = ids[&spec.name].clone();
            let mut node = Node::with_id(id, spec.name.clone(), spec.node_type, spec.work);
            node.set_input(spec.input);
            for dependency in &spec.dependencies {
                let dep = ids.get(dependency).ok_or_else(|| WorkflowError::UnknownDependency {
                    node: spec.name.clone(),
                    dependency: dependency.clone(),
                })?;
                node.add_dependency(dep.clone());
            }
            workflow.add_node(node)?;
        }

        for definition in command.edges {
            let source = Self::resolve(&ids, &definition.source, "source")?;
            let target = Self::resolve(&ids, &definition.target, "target")?;
            let mut builder = Edge::builder()
                .source(source)
                .target(target)
                .edge_type(EdgeType::from_name(&definition.edge_type))
                .priority(definition.priority)
                .enabled(definition.enabled)
                .properties(definition.properties);
            if let Some(name) = definition.name {
                builder = builder.name(name);
            }
            if let Some(condition) = definition.condition {
                builder = builder.condition(condition);
            }
            if let Some(description) = definition.description {
                builder = builder.description(description);
            }
            workflow.add_edge(builder.build()?)?;
        }

        orchestrator_for(command.orchestration).validate_workflow_structure(&workflow)?;
        tracing::debug!(workflow_id = %workflow.id(), nodes = workflow.node_count(), edges = workflow.edge_count(), "workflow assembled");
        Ok(workflow)
    }

    fn resolve(ids: &HashMap<String, NodeId>, name: &str, end: &str) -> Result<NodeId, WorkflowError> {
        ids.get(name).cloned().ok_or_else(|| {
            WorkflowError::InvalidConnection(format!("unknown {} node '{}'", end, name))
        })
    }
}
