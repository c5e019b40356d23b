use burn_tensor::{DType, TensorData};

use crate::ir::{Argument, Graph, GraphBuilder, NodeId, Target};
use crate::program::ExportedProgram;

/// Arguments of a per-tensor marker with literal parameters
pub fn per_tensor_args(input: NodeId, scale: f64, zero_point: i64) -> Vec<Argument> {
    vec![
        input.into(),
        Argument::Float(scale),
        Argument::Int(zero_point),
        Argument::Int(-128),
        Argument::Int(127),
        DType::I8.into(),
    ]
}

/// Arguments of a per-channel marker reading its parameters from nodes
pub fn per_channel_args(
    input: NodeId,
    scale: NodeId,
    zero_point: NodeId,
    axis: i64,
    qmin: i64,
    qmax: i64,
) -> Vec<Argument> {
    vec![
        input.into(),
        scale.into(),
        zero_point.into(),
        Argument::Int(axis),
        Argument::Int(qmin),
        Argument::Int(qmax),
        DType::I8.into(),
    ]
}

/// Arguments of a signed 4-bit groupwise marker
pub fn groupwise_args(
    input: NodeId,
    scale: NodeId,
    zero_point: NodeId,
    group_size: i64,
) -> Vec<Argument> {
    vec![
        input.into(),
        scale.into(),
        zero_point.into(),
        Argument::Int(-8),
        Argument::Int(7),
        DType::I8.into(),
        Argument::Int(group_size),
        DType::F32.into(),
    ]
}

/// Wrap the graph with two-channel parameters named `scale` and `zp`
pub fn with_channel_params(graph: Graph) -> ExportedProgram {
    ExportedProgram::new(graph)
        .with_param("scale", TensorData::new(vec![0.5f32, 0.25], [2]))
        .with_param("zp", TensorData::new(vec![0i32, 1], [2]))
}

pub struct WeightChain {
    pub program: ExportedProgram,
    pub weight: NodeId,
    pub dq: NodeId,
    pub consumer: NodeId,
}

/// `weight -> q -> dq -> permute_copy` over two output channels
pub fn folded_weight_chain(quant: Target, dequant: Target) -> WeightChain {
    let mut builder = GraphBuilder::new();
    let weight = builder.get_attr("weight");
    let scale = builder.get_attr("scale");
    let zp = builder.get_attr("zp");
    let q = builder.call(
        "q",
        quant,
        per_channel_args(weight, scale, zp, 0, -128, 127),
    );
    let dq = builder.call(
        "dq",
        dequant,
        per_channel_args(q, scale, zp, 0, -128, 127),
    );
    let consumer = builder.call(
        "permute",
        Target::PermuteCopy,
        vec![dq.into(), Argument::Ints(vec![1, 0])],
    );
    builder.output(&[consumer]);

    WeightChain {
        program: with_channel_params(builder.build().unwrap()),
        weight,
        dq,
        consumer,
    }
}

pub struct ActivationChain {
    pub program: ExportedProgram,
    pub relu: NodeId,
    pub q: NodeId,
    pub dq: NodeId,
}

/// `x -> relu -> q -> dq -> output` with both markers inserted by the compiler
pub fn implicit_activation_chain() -> ActivationChain {
    let mut builder = GraphBuilder::new();
    let x = builder.placeholder("x");
    let relu = builder.call("relu", Target::Relu, vec![x.into()]);
    let q = builder.call("q", Target::QuantizePerTensor, per_tensor_args(relu, 0.04, -2));
    let dq = builder.call("dq", Target::DequantizePerTensor, per_tensor_args(q, 0.04, -2));
    builder.tag_implicit(q).tag_implicit(dq);
    builder.output(&[dq]);

    ActivationChain {
        program: ExportedProgram::new(builder.build().unwrap()),
        relu,
        q,
        dq,
    }
}
