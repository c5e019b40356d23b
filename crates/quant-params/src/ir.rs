use core::fmt;
use std::collections::HashSet;

use burn_tensor::DType;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{QuantParamsError, Result};

/// Stable handle to a node in a [`Graph`].
///
/// Descriptors hold this instead of a reference so they never extend the graph's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Operators that can appear in an exported graph.
///
/// The string form is the exported operator name, so targets round-trip through
/// `Display`/`FromStr`.
#[derive(Debug, Hash, Eq, PartialEq, EnumString, Clone, Copy, Display)]
pub enum Target {
    // QUANTIZE / DEQUANTIZE MARKERS
    #[strum(serialize = "quantized_decomposed::quantize_per_tensor")]
    QuantizePerTensor,
    #[strum(serialize = "quantized_decomposed::quantize_per_tensor.tensor")]
    QuantizePerTensorTensor,
    #[strum(serialize = "quantized_decomposed::dequantize_per_tensor")]
    DequantizePerTensor,
    #[strum(serialize = "quantized_decomposed::dequantize_per_tensor.tensor")]
    DequantizePerTensorTensor,
    #[strum(serialize = "quantized_decomposed::quantize_per_token")]
    QuantizePerToken,
    #[strum(serialize = "quantized_decomposed::dequantize_per_token")]
    DequantizePerToken,
    #[strum(serialize = "quantized_decomposed::quantize_per_channel")]
    QuantizePerChannel,
    #[strum(serialize = "quantized_decomposed::dequantize_per_channel")]
    DequantizePerChannel,
    #[strum(serialize = "quantized_decomposed::quantize_per_channel_group")]
    QuantizePerChannelGroup,
    #[strum(serialize = "quantized_decomposed::dequantize_per_channel_group")]
    DequantizePerChannelGroup,
    #[strum(serialize = "quantized_decomposed::choose_qparams.tensor")]
    ChooseQparamsTensor,
    #[strum(serialize = "quantized_decomposed::choose_qparams_per_token_asymmetric")]
    ChooseQparamsPerToken,

    // LAYOUT
    #[strum(serialize = "aten::permute_copy")]
    PermuteCopy,
    #[strum(serialize = "aten::t_copy")]
    TCopy,
    #[strum(serialize = "aten::view_copy")]
    ViewCopy,

    // COMPUTE
    #[strum(serialize = "aten::add.Tensor")]
    Add,
    #[strum(serialize = "aten::mul.Tensor")]
    Mul,
    #[strum(serialize = "aten::relu")]
    Relu,
    #[strum(serialize = "aten::linear")]
    Linear,
    #[strum(serialize = "aten::addmm")]
    Addmm,
    #[strum(serialize = "aten::mm")]
    Mm,
    #[strum(serialize = "aten::convolution")]
    Convolution,
    #[strum(serialize = "aten::cat")]
    Cat,
    #[strum(serialize = "getitem")]
    GetItem,
}

impl Target {
    /// Whether this target quantizes a float tensor
    pub fn is_quant(&self) -> bool {
        matches!(
            self,
            Target::QuantizePerTensor
                | Target::QuantizePerTensorTensor
                | Target::QuantizePerToken
                | Target::QuantizePerChannel
                | Target::QuantizePerChannelGroup
        )
    }

    /// Whether this target dequantizes back to float
    pub fn is_dequant(&self) -> bool {
        matches!(
            self,
            Target::DequantizePerTensor
                | Target::DequantizePerTensorTensor
                | Target::DequantizePerToken
                | Target::DequantizePerChannel
                | Target::DequantizePerChannelGroup
        )
    }

    /// Layout-only transposes that are looked through when matching weights
    pub fn is_transpose(&self) -> bool {
        matches!(self, Target::PermuteCopy | Target::TCopy)
    }
}

/// Role of a node in the exported graph
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Graph entry point (user input or lifted parameter)
    Placeholder,
    /// Named constant attribute of the module
    GetAttr,
    /// Operator call
    CallFunction(Target),
    /// Terminal node collecting graph outputs
    Output,
}

/// A positional node argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Node(NodeId),
    Int(i64),
    Float(f64),
    DType(DType),
    Ints(Vec<i64>),
    None,
}

impl Argument {
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Argument::Node(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<NodeId> for Argument {
    fn from(id: NodeId) -> Self {
        Argument::Node(id)
    }
}

impl From<DType> for Argument {
    fn from(dtype: DType) -> Self {
        Argument::DType(dtype)
    }
}

impl From<i64> for Argument {
    fn from(value: i64) -> Self {
        Argument::Int(value)
    }
}

impl From<f64> for Argument {
    fn from(value: f64) -> Self {
        Argument::Float(value)
    }
}

/// Metadata attached to nodes by earlier compiler passes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMeta {
    /// Set on quantize/dequantize markers the compiler inserted itself
    pub implicit_q_dq: bool,
}

/// A node of the exported graph.
#[derive(new, Debug, Clone)]
pub struct Node {
    /// The name of the node.
    pub name: String,

    /// The role of the node, carrying the operator for calls.
    pub kind: NodeKind,

    /// Ordered arguments.
    pub args: Vec<Argument>,

    #[new(default)]
    pub meta: NodeMeta,
}

impl Node {
    /// The operator identity, if this is a call
    pub fn target(&self) -> Option<Target> {
        match self.kind {
            NodeKind::CallFunction(target) => Some(target),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind == NodeKind::Placeholder
    }

    pub fn is_get_attr(&self) -> bool {
        self.kind == NodeKind::GetAttr
    }

    pub fn is_output(&self) -> bool {
        self.kind == NodeKind::Output
    }

    /// Node arguments in order, each node listed once
    pub fn input_nodes(&self) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.args
            .iter()
            .filter_map(Argument::as_node)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn first_input(&self) -> Option<NodeId> {
        self.args.iter().find_map(Argument::as_node)
    }
}

/// Immutable exported graph.
///
/// Nodes are stored in topological order; each node's users are computed once
/// when the graph is built.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    users: Vec<Vec<NodeId>>,
}

impl Graph {
    /// Create a graph from nodes in topological order.
    ///
    /// Fails if an argument references a node that does not precede its user.
    pub fn new(nodes: Vec<Node>) -> Result<Self> {
        let mut users = vec![Vec::new(); nodes.len()];

        for (index, node) in nodes.iter().enumerate() {
            for input in node.input_nodes() {
                if input.0 >= index {
                    return Err(QuantParamsError::DanglingNode {
                        node: node.name.clone(),
                        id: input.0,
                    });
                }
                users[input.0].push(NodeId(index));
            }
        }

        Ok(Self { nodes, users })
    }

    /// The node behind `id`, failing for ids outside the graph
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(QuantParamsError::UnknownNode {
            id: id.0,
            len: self.nodes.len(),
        })
    }

    /// Consumers of a node in graph order
    pub fn users(&self, id: NodeId) -> Result<&[NodeId]> {
        self.users
            .get(id.0)
            .map(Vec::as_slice)
            .ok_or(QuantParamsError::UnknownNode {
                id: id.0,
                len: self.nodes.len(),
            })
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }
}

/// Fluent assembly of a [`Graph`].
///
/// ```
/// use quant_params::ir::{GraphBuilder, Target};
///
/// let mut builder = GraphBuilder::new();
/// let x = builder.placeholder("x");
/// let y = builder.call("relu", Target::Relu, vec![x.into()]);
/// builder.output(&[y]);
/// let graph = builder.build().unwrap();
/// assert_eq!(graph.users(x).unwrap(), &[y]);
/// ```
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    unknown_tag: Option<usize>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn placeholder(&mut self, name: &str) -> NodeId {
        self.push(Node::new(name.to_string(), NodeKind::Placeholder, vec![]))
    }

    pub fn get_attr(&mut self, name: &str) -> NodeId {
        self.push(Node::new(name.to_string(), NodeKind::GetAttr, vec![]))
    }

    pub fn call(&mut self, name: &str, target: Target, args: Vec<Argument>) -> NodeId {
        self.push(Node::new(
            name.to_string(),
            NodeKind::CallFunction(target),
            args,
        ))
    }

    pub fn output(&mut self, outputs: &[NodeId]) -> NodeId {
        let args = outputs.iter().copied().map(Argument::Node).collect();
        self.push(Node::new("output".to_string(), NodeKind::Output, args))
    }

    /// Mark a node as a compiler-inserted quantize/dequantize marker.
    ///
    /// Tagging an id that was never pushed makes [`GraphBuilder::build`] fail.
    pub fn tag_implicit(&mut self, id: NodeId) -> &mut Self {
        match self.nodes.get_mut(id.0) {
            Some(node) => node.meta.implicit_q_dq = true,
            None => self.unknown_tag = Some(id.0),
        }
        self
    }

    pub fn build(self) -> Result<Graph> {
        if let Some(id) = self.unknown_tag {
            return Err(QuantParamsError::UnknownNode {
                id,
                len: self.nodes.len(),
            });
        }
        Graph::new(self.nodes)
    }
}
