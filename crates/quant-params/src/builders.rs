//! Building [`QuantParams`] by matching quantize/dequantize chains backwards from a tensor.
//!
//! Each entry point looks at a small fixed neighbourhood of the node it is given:
//!
//! ```text
//! weights:  param -> [q ->] dq -> [permute_copy | t_copy] -> node
//! bias:     param -> [q ->] dq -> node
//! inputs:   ... -> [q ->] dq (implicit) = node
//! outputs:  node -> q (implicit, only user)
//! ```
//!
//! `Ok(None)` means the position is not quantized.

use burn_tensor::DType;

use crate::error::{QuantParamsError, Result};
use crate::ir::{Graph, NodeId};
use crate::params::{QuantParams, QuantValue};
use crate::program::ProgramView;
use crate::schema::{QdqFields, QuantOperand};
use crate::tensor::is_unsigned;

impl QuantParams {
    /// Build the descriptor described by a quantize or dequantize marker.
    pub fn from_q_dq_node<P: ProgramView + ?Sized>(program: &P, marker: NodeId) -> Result<Self> {
        let graph = program.graph();
        let node = graph.node(marker)?;

        if !(program.is_quant(node) || program.is_dequant(node)) {
            return Err(QuantParamsError::NotQdqNode {
                node: node.name.clone(),
            });
        }

        let fields = QdqFields::parse(node)?;
        log::debug!(
            "Building quant params from {} ({:?} {:?}, output dtype {:?})",
            node.name,
            fields.variant.direction,
            fields.variant.granularity,
            fields.output_dtype
        );

        if fields.variant.is_dynamic() {
            return Self::from_dynamic_input_node(graph, &fields);
        }

        let (scale, zero_point, axis) = if fields.variant.is_per_channel() {
            let scale = resolve_tensor(program, fields.scale, &node.name, "scale")?;
            let zero_point = resolve_tensor(program, fields.zero_point, &node.name, "zero_point")?;

            if fields.variant.is_groupwise() {
                if scale.rank() != 2 {
                    return Err(QuantParamsError::RankMismatch {
                        what: "weight scale for per_channel_group [de]quant node",
                        expected: 2,
                        actual: scale.rank(),
                    });
                }
                // axis is ignored for groupwise quantization
                (scale, zero_point, 0)
            } else {
                let axis = fields.axis.unwrap_or_default();
                let axis = usize::try_from(axis).map_err(|_| QuantParamsError::InvalidArgument {
                    node: node.name.clone(),
                    arg: "axis",
                    reason: format!("expected a non-negative axis, got {axis}"),
                })?;
                (scale, zero_point, axis)
            }
        } else {
            let scale = literal(fields.scale, &node.name, "scale")?;
            let zero_point = literal(fields.zero_point, &node.name, "zero_point")?;
            (scale, zero_point, 0)
        };

        if is_unsigned(fields.dtype) {
            return Err(QuantParamsError::UnsupportedDtype {
                dtype: fields.dtype,
                reason: "XNNPACK does not support unsigned quantization",
            });
        }

        let group_size = match fields.group_size {
            Some(size) => usize::try_from(size)
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| QuantParamsError::InvalidGroupwise {
                    reason: format!("group size must be greater than 0, got {size}"),
                })?,
            None => 0,
        };

        let mut is_output = false;
        for user in graph.users(marker)? {
            is_output |= graph.node(*user)?.is_output();
        }
        let is_input = graph.node(fields.input)?.is_placeholder();

        let mut builder = QuantParams::builder(fields.input, fields.dtype)
            .with_scale(scale)
            .with_zero_point(zero_point)
            .with_range(fields.qmin, fields.qmax)
            .with_output(is_output)
            .with_input(is_input)
            .with_group_size(group_size);
        if fields.variant.is_per_channel() {
            builder = builder.with_per_channel(axis);
        }

        builder.build()
    }

    /// Parameters of a run-time quantized tensor are only known at execution time,
    /// so everything except the producer and its role is a placeholder.
    fn from_dynamic_input_node(graph: &Graph, fields: &QdqFields) -> Result<Self> {
        let num_nonbatch_dims = 1;

        QuantParams::builder(fields.input, DType::F32)
            .with_scale(0.0)
            .with_zero_point(0.0)
            .with_range(0, 0)
            .with_output(false)
            .with_input(graph.node(fields.input)?.is_placeholder())
            .with_dynamic(num_nonbatch_dims)
            .build()
    }

    /// Descriptor for a weight operand.
    ///
    /// A transpose between the dequantize and the consumer is looked through. Fails if
    /// the chain is not fed by static data.
    pub fn from_weights<P: ProgramView + ?Sized>(
        program: &P,
        tensor: NodeId,
    ) -> Result<Option<Self>> {
        let graph = program.graph();
        let node = graph.node(tensor)?;

        let dq = if node.target().is_some_and(|t| t.is_transpose()) {
            first_input(graph, tensor)?
        } else {
            tensor
        };

        if !program.is_dequant(graph.node(dq)?) {
            return Ok(None);
        }

        let src = folded_source(program, dq)?;
        check_static_source(graph, src, "q -> dq -> permute_copy")?;

        log::debug!(
            "Weight {} quantized by {}",
            node.name,
            graph.node(src)?.name
        );

        Self::from_q_dq_node(program, src).map(Some)
    }

    /// Descriptor for a tensor produced by a compiler-inserted dequantize.
    pub fn from_inputs<P: ProgramView + ?Sized>(
        program: &P,
        tensor: NodeId,
    ) -> Result<Option<Self>> {
        let graph = program.graph();
        let node = graph.node(tensor)?;

        if !(program.is_dequant(node) && program.is_implicit_q_dq(node)) {
            return Ok(None);
        }

        let dq_input = first_input(graph, tensor)?;
        let q = graph.node(dq_input)?;
        if program.is_quant(q) {
            let q_input = first_input(graph, dq_input)?;
            if program.is_param_node(graph.node(q_input)?) {
                log::debug!("Input {} quantized by {} over a parameter", node.name, q.name);
                return Self::from_q_dq_node(program, dq_input).map(Some);
            }
        }

        log::debug!("Input {} quantized by its own dequantize", node.name);
        Self::from_q_dq_node(program, tensor).map(Some)
    }

    /// Descriptor for a tensor whose only consumer is a compiler-inserted quantize.
    ///
    /// A tensor with several consumers cannot inherit one consumer's quantization and
    /// is reported as not quantized.
    pub fn from_outputs<P: ProgramView + ?Sized>(
        program: &P,
        tensor: NodeId,
    ) -> Result<Option<Self>> {
        let graph = program.graph();

        if let [user] = graph.users(tensor)? {
            let q = graph.node(*user)?;
            if program.is_quant(q) && program.is_implicit_q_dq(q) {
                log::debug!("Output {} quantized by {}", graph.node(tensor)?.name, q.name);
                return Self::from_q_dq_node(program, *user).map(Some);
            }
        }

        Ok(None)
    }

    /// Descriptor for a bias operand. Fails if the chain is not fed by static data.
    pub fn from_bias<P: ProgramView + ?Sized>(
        program: &P,
        tensor: NodeId,
    ) -> Result<Option<Self>> {
        let graph = program.graph();
        let node = graph.node(tensor)?;

        if !program.is_dequant(node) {
            return Ok(None);
        }

        let src = folded_source(program, tensor)?;
        check_static_source(graph, src, "quant -> dequant chain from bias")?;

        log::debug!("Bias {} quantized by {}", node.name, graph.node(src)?.name);

        Self::from_q_dq_node(program, src).map(Some)
    }
}

fn first_input(graph: &Graph, id: NodeId) -> Result<NodeId> {
    let node = graph.node(id)?;
    node.first_input()
        .ok_or_else(|| QuantParamsError::InvalidArgument {
            node: node.name.clone(),
            arg: "input",
            reason: "node has no input nodes".to_string(),
        })
}

/// The quantize feeding a dequantize when the pair was folded, otherwise the dequantize itself
fn folded_source<P: ProgramView + ?Sized>(program: &P, dq: NodeId) -> Result<NodeId> {
    let dq_input = first_input(program.graph(), dq)?;
    if program.is_quant(program.graph().node(dq_input)?) {
        Ok(dq_input)
    } else {
        Ok(dq)
    }
}

fn check_static_source(graph: &Graph, src: NodeId, context: &'static str) -> Result<()> {
    let input = graph.node(first_input(graph, src)?)?;
    if input.is_get_attr() || input.is_placeholder() {
        Ok(())
    } else {
        Err(QuantParamsError::NonStaticSource {
            context,
            input: input.name.clone(),
        })
    }
}

fn resolve_tensor<P: ProgramView + ?Sized>(
    program: &P,
    operand: QuantOperand,
    marker: &str,
    arg: &'static str,
) -> Result<QuantValue> {
    let id = match operand {
        QuantOperand::Node(id) => id,
        QuantOperand::Literal(value) => {
            return Err(QuantParamsError::InvalidArgument {
                node: marker.to_string(),
                arg,
                reason: format!("expected a parameter node for per channel params, got {value}"),
            });
        }
    };

    let param = program.graph().node(id)?;
    program
        .param_tensor(param)
        .cloned()
        .map(QuantValue::Tensor)
        .ok_or_else(|| QuantParamsError::MissingParam {
            node: param.name.clone(),
        })
}

fn literal(operand: QuantOperand, marker: &str, arg: &'static str) -> Result<QuantValue> {
    match operand {
        QuantOperand::Literal(value) => Ok(QuantValue::Scalar(value)),
        QuantOperand::Node(id) => Err(QuantParamsError::InvalidArgument {
            node: marker.to_string(),
            arg,
            reason: format!("expected a literal for per tensor params, got node {id}"),
        }),
    }
}
