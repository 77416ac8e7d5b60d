//! Standard node library
//!
//! Collection of built-in units of work for common operations

mod control;
mod debug;
mod time;
mod transform;

pub use control::{EndNode, EndNodeFactory, StartNode, StartNodeFactory};
pub use debug::{DebugNode, DebugNodeFactory, FailNode, FailNodeFactory};
pub use time::{DelayNode, DelayNodeFactory};
pub use transform::{
    JsonParseNode, JsonParseNodeFactory, JsonStringifyNode, JsonStringifyNodeFactory, ParseInput,
    ParseOutput, SetValuesNode, SetValuesNodeFactory,
};

use dagruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(StartNodeFactory));
    registry.register(Arc::new(EndNodeFactory));
    registry.register(Arc::new(DebugNodeFactory));
    registry.register(Arc::new(FailNodeFactory));
    registry.register(Arc::new(DelayNodeFactory));
    registry.register(Arc::new(JsonParseNodeFactory));
    registry.register(Arc::new(JsonStringifyNodeFactory));
    registry.register(Arc::new(SetValuesNodeFactory));
}

/// A registry holding every standard node
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
