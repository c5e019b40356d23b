//! Capabilities the descriptor builders consume from the surrounding compiler.
//!
//! Marker classification, the implicit q/dq tag and parameter resolution are traits so
//! the builders can run against stub graphs. [`ExportedProgram`] is the default
//! implementation backed by a [`Graph`] and a [`TensorStore`].

use burn_tensor::TensorData;

use crate::ir::{Graph, Node};
use crate::tensor_store::TensorStore;

/// Decides whether a node is a quantize or dequantize marker
pub trait QdqClassifier {
    fn is_quant(&self, node: &Node) -> bool {
        node.target().is_some_and(|t| t.is_quant())
    }

    fn is_dequant(&self, node: &Node) -> bool {
        node.target().is_some_and(|t| t.is_dequant())
    }

    /// Whether the marker was inserted by the compiler rather than authored in the model
    fn is_implicit_q_dq(&self, node: &Node) -> bool {
        node.meta.implicit_q_dq
    }
}

/// Resolves graph nodes to the constant data they stand for
pub trait ParamSource {
    /// Concrete tensor behind a parameter node, if any
    fn param_tensor(&self, node: &Node) -> Option<&TensorData>;

    /// Whether the node is a lifted parameter, buffer or constant attribute
    fn is_param_node(&self, node: &Node) -> bool;
}

/// Everything a builder needs to read from an exported program
pub trait ProgramView: QdqClassifier + ParamSource {
    fn graph(&self) -> &Graph;
}

/// An exported graph together with its lifted parameter data
#[derive(Debug, Clone)]
pub struct ExportedProgram {
    graph: Graph,
    params: TensorStore,
}

impl ExportedProgram {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            params: TensorStore::new(),
        }
    }

    /// Attach constant data to the node with the given name
    pub fn with_param(mut self, name: impl Into<String>, data: TensorData) -> Self {
        self.params.insert(name, data);
        self
    }

    pub fn params(&self) -> &TensorStore {
        &self.params
    }
}

impl QdqClassifier for ExportedProgram {}

impl ParamSource for ExportedProgram {
    fn param_tensor(&self, node: &Node) -> Option<&TensorData> {
        if node.is_placeholder() || node.is_get_attr() {
            self.params.get_by_name(&node.name)
        } else {
            None
        }
    }

    fn is_param_node(&self, node: &Node) -> bool {
        node.is_get_attr() || (node.is_placeholder() && self.params.contains(&node.name))
    }
}

impl ProgramView for ExportedProgram {
    fn graph(&self) -> &Graph {
        &self.graph
    }
}
