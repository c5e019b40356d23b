//! Field schema of quantize/dequantize markers.
//!
//! Every recognized marker target maps to one [`QdqVariant`], and the variant alone
//! decides where each field lives in the node's argument list:
//!
//! | Granularity        | Arguments after the float input                               |
//! |--------------------|---------------------------------------------------------------|
//! | per-tensor         | scale (float), zero_point (int), qmin, qmax, dtype            |
//! | per-tensor tensor  | scale (node), zero_point (node), qmin, qmax, dtype            |
//! | per-token          | scales, zero_points, qmin, qmax, dtype, [output_dtype]        |
//! | per-channel        | scales, zero_points, axis, qmin, qmax, dtype, [out_dtype]     |
//! | per-channel group  | scales, zero_points, qmin, qmax, dtype, group_size, [out_dtype] |

use burn_tensor::DType;

use crate::error::{QuantParamsError, Result};
use crate::ir::{Argument, Node, NodeId, Target};

/// Which way a marker converts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QdqDirection {
    Quantize,
    Dequantize,
}

/// How parameters are laid out across the quantized tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QdqGranularity {
    /// One literal scale/zero-point pair, fixed at export time
    PerTensor,
    /// One scale/zero-point pair computed at run time
    PerTensorDynamic,
    /// One pair per token, computed at run time
    PerToken,
    /// One pair per index along an axis
    PerChannel,
    /// Per-channel pairs further split into groups along the reduction dimension
    PerChannelGroup,
}

/// Recognized marker identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QdqVariant {
    pub direction: QdqDirection,
    pub granularity: QdqGranularity,
}

impl QdqVariant {
    /// Classify a target, `None` if it is not a quantize/dequantize marker
    pub fn of(target: Target) -> Option<Self> {
        use QdqDirection::*;
        use QdqGranularity::*;

        let (direction, granularity) = match target {
            Target::QuantizePerTensor => (Quantize, PerTensor),
            Target::DequantizePerTensor => (Dequantize, PerTensor),
            Target::QuantizePerTensorTensor => (Quantize, PerTensorDynamic),
            Target::DequantizePerTensorTensor => (Dequantize, PerTensorDynamic),
            Target::QuantizePerToken => (Quantize, PerToken),
            Target::DequantizePerToken => (Dequantize, PerToken),
            Target::QuantizePerChannel => (Quantize, PerChannel),
            Target::DequantizePerChannel => (Dequantize, PerChannel),
            Target::QuantizePerChannelGroup => (Quantize, PerChannelGroup),
            Target::DequantizePerChannelGroup => (Dequantize, PerChannelGroup),
            _ => return None,
        };

        Some(Self {
            direction,
            granularity,
        })
    }

    /// Parameters are produced at run time rather than fixed in the graph
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self.granularity,
            QdqGranularity::PerTensorDynamic | QdqGranularity::PerToken
        )
    }

    pub fn is_per_channel(&self) -> bool {
        matches!(
            self.granularity,
            QdqGranularity::PerChannel | QdqGranularity::PerChannelGroup
        )
    }

    pub fn is_groupwise(&self) -> bool {
        self.granularity == QdqGranularity::PerChannelGroup
    }
}

/// A scale or zero-point operand
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuantOperand {
    /// Value embedded in the marker
    Literal(f64),
    /// Reference to a node holding the values
    Node(NodeId),
}

/// Fields of a quantize/dequantize marker, read by name instead of position
#[derive(Debug, Clone, PartialEq)]
pub struct QdqFields {
    pub variant: QdqVariant,
    /// The float-valued operand being quantized
    pub input: NodeId,
    pub scale: QuantOperand,
    pub zero_point: QuantOperand,
    pub axis: Option<i64>,
    pub qmin: i64,
    pub qmax: i64,
    /// Target storage type
    pub dtype: DType,
    pub group_size: Option<i64>,
    /// Float type a dequantize produces, when given
    pub output_dtype: Option<DType>,
}

impl QdqFields {
    /// Read the marker fields according to the node's variant.
    pub fn parse(node: &Node) -> Result<Self> {
        let target = node.target().ok_or_else(|| QuantParamsError::NotQdqNode {
            node: node.name.clone(),
        })?;
        let variant = QdqVariant::of(target).ok_or_else(|| QuantParamsError::UnrecognizedTarget {
            node: node.name.clone(),
            target: target.to_string(),
        })?;

        let reader = ArgReader { node };
        let input = reader.node("input", 0)?;
        let scale = reader.operand("scale", 1)?;
        let zero_point = reader.operand("zero_point", 2)?;

        let fields = match variant.granularity {
            QdqGranularity::PerChannel => Self {
                variant,
                input,
                scale,
                zero_point,
                axis: Some(reader.int("axis", 3)?),
                qmin: reader.int("quant_min", 4)?,
                qmax: reader.int("quant_max", 5)?,
                dtype: reader.dtype("dtype", 6)?,
                group_size: None,
                output_dtype: reader.optional_dtype("out_dtype", 7)?,
            },
            QdqGranularity::PerChannelGroup => Self {
                variant,
                input,
                scale,
                zero_point,
                axis: None,
                qmin: reader.int("quant_min", 3)?,
                qmax: reader.int("quant_max", 4)?,
                dtype: reader.dtype("dtype", 5)?,
                group_size: Some(reader.int("group_size", 6)?),
                output_dtype: reader.optional_dtype("output_dtype", 7)?,
            },
            QdqGranularity::PerTensor
            | QdqGranularity::PerTensorDynamic
            | QdqGranularity::PerToken => Self {
                variant,
                input,
                scale,
                zero_point,
                axis: None,
                qmin: reader.int("quant_min", 3)?,
                qmax: reader.int("quant_max", 4)?,
                dtype: reader.dtype("dtype", 5)?,
                group_size: None,
                output_dtype: reader.optional_dtype("out_dtype", 6)?,
            },
        };

        log::trace!("Parsed q/dq fields for {}: {:?}", node.name, fields);

        Ok(fields)
    }
}

struct ArgReader<'a> {
    node: &'a Node,
}

impl ArgReader<'_> {
    fn invalid(&self, arg: &'static str, reason: String) -> QuantParamsError {
        QuantParamsError::InvalidArgument {
            node: self.node.name.clone(),
            arg,
            reason,
        }
    }

    fn get(&self, arg: &'static str, index: usize) -> Result<&Argument> {
        self.node
            .args
            .get(index)
            .ok_or_else(|| self.invalid(arg, format!("missing argument at position {index}")))
    }

    fn node(&self, arg: &'static str, index: usize) -> Result<NodeId> {
        match self.get(arg, index)? {
            Argument::Node(id) => Ok(*id),
            other => Err(self.invalid(arg, format!("expected a node, got {other:?}"))),
        }
    }

    fn operand(&self, arg: &'static str, index: usize) -> Result<QuantOperand> {
        match self.get(arg, index)? {
            Argument::Node(id) => Ok(QuantOperand::Node(*id)),
            Argument::Float(value) => Ok(QuantOperand::Literal(*value)),
            Argument::Int(value) => Ok(QuantOperand::Literal(*value as f64)),
            other => Err(self.invalid(arg, format!("expected a node or number, got {other:?}"))),
        }
    }

    fn int(&self, arg: &'static str, index: usize) -> Result<i64> {
        match self.get(arg, index)? {
            Argument::Int(value) => Ok(*value),
            other => Err(self.invalid(arg, format!("expected an integer, got {other:?}"))),
        }
    }

    fn dtype(&self, arg: &'static str, index: usize) -> Result<DType> {
        match self.get(arg, index)? {
            Argument::DType(dtype) => Ok(*dtype),
            other => Err(self.invalid(arg, format!("expected a dtype, got {other:?}"))),
        }
    }

    fn optional_dtype(&self, arg: &'static str, index: usize) -> Result<Option<DType>> {
        match self.node.args.get(index) {
            None | Some(Argument::None) => Ok(None),
            Some(Argument::DType(dtype)) => Ok(Some(*dtype)),
            Some(other) => Err(self.invalid(arg, format!("expected a dtype, got {other:?}"))),
        }
    }
}
