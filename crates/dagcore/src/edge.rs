use crate::condition;
use crate::{ContextMap, EdgeId, NodeId, WorkflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    #[default]
    Sequence,
    Conditional,
    Parallel,
    DataFlow,
    ErrorHandling,
    Fallback,
    Loop,
    Skip,
    Aggregation,
    Distribution,
}

impl EdgeType {
    pub const ALL: [EdgeType; 10] = [
        EdgeType::Sequence,
        EdgeType::Conditional,
        EdgeType::Parallel,
        EdgeType::DataFlow,
        EdgeType::ErrorHandling,
        EdgeType::Fallback,
        EdgeType::Loop,
        EdgeType::Skip,
        EdgeType::Aggregation,
        EdgeType::Distribution,
    ];

    /// Lenient lookup by name; blank or unknown names map to `Sequence`.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .unwrap_or_default()
    }

    pub fn name(self) -> &'static str {
        match self {
            EdgeType::Sequence => "SEQUENCE",
            EdgeType::Conditional => "CONDITIONAL",
            EdgeType::Parallel => "PARALLEL",
            EdgeType::DataFlow => "DATA_FLOW",
            EdgeType::ErrorHandling => "ERROR_HANDLING",
            EdgeType::Fallback => "FALLBACK",
            EdgeType::Loop => "LOOP",
            EdgeType::Skip => "SKIP",
            EdgeType::Aggregation => "AGGREGATION",
            EdgeType::Distribution => "DISTRIBUTION",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            EdgeType::Sequence => "Sequence",
            EdgeType::Conditional => "Conditional",
            EdgeType::Parallel => "Parallel",
            EdgeType::DataFlow => "Data flow",
            EdgeType::ErrorHandling => "Error handling",
            EdgeType::Fallback => "Fallback",
            EdgeType::Loop => "Loop",
            EdgeType::Skip => "Skip",
            EdgeType::Aggregation => "Aggregation",
            EdgeType::Distribution => "Distribution",
        }
    }

    pub fn is_conditional(self) -> bool {
        matches!(
            self,
            EdgeType::Conditional | EdgeType::ErrorHandling | EdgeType::Fallback
        )
    }

    pub fn is_parallel(self) -> bool {
        matches!(self, EdgeType::Parallel | EdgeType::Distribution)
    }

    pub fn is_data_transfer(self) -> bool {
        matches!(self, EdgeType::DataFlow | EdgeType::Aggregation)
    }

    pub fn is_control_flow(self) -> bool {
        matches!(
            self,
            EdgeType::Sequence | EdgeType::Conditional | EdgeType::Loop | EdgeType::Skip
        )
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Directed, typed connection between two nodes.
///
/// Lower `priority` values are visited first. Identity is the edge id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    id: EdgeId,
    source: NodeId,
    target: NodeId,
    name: String,
    edge_type: EdgeType,
    condition: Option<String>,
    properties: ContextMap,
    priority: i32,
    enabled: bool,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Edge {}

impl Hash for Edge {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Edge {
    pub fn builder() -> EdgeBuilder {
        EdgeBuilder::default()
    }

    /// Plain SEQUENCE edge from `source` to `target`.
    pub fn connect(source: NodeId, target: NodeId) -> Self {
        let now = Utc::now();
        Self {
            id: EdgeId::generate(),
            name: format!("{} -> {}", source, target),
            source,
            target,
            edge_type: EdgeType::Sequence,
            condition: None,
            properties: ContextMap::new(),
            priority: 0,
            enabled: true,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &EdgeId {
        &self.id
    }

    pub fn source(&self) -> &NodeId {
        &self.source
    }

    pub fn target(&self) -> &NodeId {
        &self.target
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn edge_type(&self) -> EdgeType {
        self.edge_type
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn properties(&self) -> &ContextMap {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn connects(&self, source: &NodeId, target: &NodeId) -> bool {
        &self.source == source && &self.target == target
    }

    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source == node || &self.target == node
    }

    /// True when no condition is set, otherwise the result of evaluating it.
    pub fn is_condition_met(&self, context: &ContextMap) -> bool {
        match &self.condition {
            None => true,
            Some(expression) => condition::evaluate(expression, context),
        }
    }

    pub fn update_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
        self.updated_at = Utc::now();
    }

    pub fn set_condition(&mut self, condition: Option<String>) {
        self.condition = condition.filter(|c| !c.trim().is_empty());
        self.updated_at = Utc::now();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.updated_at = Utc::now();
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Default)]
pub struct EdgeBuilder {
    id: Option<EdgeId>,
    source: Option<NodeId>,
    target: Option<NodeId>,
    name: Option<String>,
    edge_type: EdgeType,
    condition: Option<String>,
    properties: ContextMap,
    priority: i32,
    enabled: Option<bool>,
    description: Option<String>,
}

impl EdgeBuilder {
    pub fn id(mut self, id: EdgeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn source(mut self, source: NodeId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn target(mut self, target: NodeId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn edge_type(mut self, edge_type: EdgeType) -> Self {
        self.edge_type = edge_type;
        self
    }

    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties(mut self, properties: ContextMap) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn build(self) -> Result<Edge, WorkflowError> {
        let source = self
            .source
            .ok_or_else(|| WorkflowError::InvalidConnection("edge source is required".into()))?;
        let target = self
            .target
            .ok_or_else(|| WorkflowError::InvalidConnection("edge target is required".into()))?;

        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{} -> {}", source, target));
        let now = Utc::now();

        Ok(Edge {
            id: self.id.unwrap_or_else(EdgeId::generate),
            source,
            target,
            name,
            edge_type: self.edge_type,
            condition: self.condition.filter(|c| !c.trim().is_empty()),
            properties: self.properties,
            priority: self.priority,
            enabled: self.enabled.unwrap_or(true),
            description: self.description,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> (NodeId, NodeId) {
        (NodeId::of("a").unwrap(), NodeId::of("b").unwrap())
    }

    #[test]
    fn test_builder_defaults() {
        let (a, b) = ids();
        let edge = Edge::builder().source(a).target(b).build().unwrap();
        assert_eq!(edge.name(), "a -> b");
        assert_eq!(edge.edge_type(), EdgeType::Sequence);
        assert_eq!(edge.priority(), 0);
        assert!(edge.is_enabled());
        assert!(edge.condition().is_none());
        assert!(edge.id().as_str().starts_with("edge_"));
    }

    #[test]
    fn test_builder_rejects_missing_endpoints() {
        let (a, b) = ids();
        assert!(matches!(
            Edge::builder().source(a).build(),
            Err(WorkflowError::InvalidConnection(_))
        ));
        assert!(matches!(
            Edge::builder().target(b).build(),
            Err(WorkflowError::InvalidConnection(_))
        ));
    }

    #[test]
    fn test_condition_gates_edge() {
        let (a, b) = ids();
        let edge = Edge::builder()
            .source(a)
            .target(b)
            .edge_type(EdgeType::Conditional)
            .condition("status == 'ok'")
            .build()
            .unwrap();

        let mut context = ContextMap::new();
        assert!(!edge.is_condition_met(&context));
        context.insert("status".to_string(), json!("ok"));
        assert!(edge.is_condition_met(&context));
    }

    #[test]
    fn test_unconditional_edge_always_met() {
        let (a, b) = ids();
        let edge = Edge::connect(a, b);
        assert!(edge.is_condition_met(&ContextMap::new()));
    }

    #[test]
    fn test_identity_is_by_id() {
        let (a, b) = ids();
        let id = EdgeId::of("e1").unwrap();
        let first = Edge::builder()
            .id(id.clone())
            .source(a.clone())
            .target(b.clone())
            .build()
            .unwrap();
        let second = Edge::builder()
            .id(id)
            .source(b)
            .target(a)
            .priority(7)
            .build()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_edge_type_helpers() {
        assert_eq!(EdgeType::from_name("data_flow"), EdgeType::DataFlow);
        assert_eq!(EdgeType::from_name(""), EdgeType::Sequence);
        assert_eq!(EdgeType::from_name("teleport"), EdgeType::Sequence);
        assert!(EdgeType::Fallback.is_conditional());
        assert!(EdgeType::Distribution.is_parallel());
        assert!(EdgeType::Aggregation.is_data_transfer());
        assert!(EdgeType::Skip.is_control_flow());
        assert!(!EdgeType::Parallel.is_control_flow());
    }

    #[test]
    fn test_property_updates() {
        let (a, b) = ids();
        let mut edge = Edge::builder()
            .source(a)
            .target(b)
            .property("weight", 2)
            .build()
            .unwrap();
        edge.update_property("weight", 3);
        assert_eq!(edge.property("weight"), Some(&json!(3)));

        edge.set_condition(Some("  ".to_string()));
        assert!(edge.condition().is_none());
        edge.set_enabled(false);
        assert!(!edge.is_enabled());
    }
}
