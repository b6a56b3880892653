//! Workflow templates: graph types, editor-format conversion and the
//! on-disk template store.
pub mod graph;
pub mod store;
pub mod ui_format;

pub use graph::{Graph, GraphTemplate, NodeDescriptor, NodeId, NodeInfo};
pub use store::TemplateStore;
