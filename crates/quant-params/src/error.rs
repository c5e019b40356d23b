//! Error types for quantization parameter inference

use burn_tensor::DType;

/// Result type used throughout the crate
pub type Result<T> = core::result::Result<T, QuantParamsError>;

/// Fatal failures raised while lifting quantization parameters out of a graph.
///
/// A position that is simply not quantized is never an error: builders report it
/// as `Ok(None)`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum QuantParamsError {
    /// Asked to build parameters from a node that is neither a quantize nor a dequantize marker
    #[error("building quant params from q/dq node but was given node: {node}")]
    NotQdqNode {
        /// Name of the offending node
        node: String,
    },

    /// The marker's operator identity has no known field schema
    #[error("unrecognized q/dq target '{target}' on node {node}")]
    UnrecognizedTarget {
        /// Name of the offending node
        node: String,
        /// Operator identity found on the node
        target: String,
    },

    /// A marker argument is missing or has the wrong kind
    #[error("invalid argument '{arg}' on node {node}: {reason}")]
    InvalidArgument {
        /// Name of the offending node
        node: String,
        /// Field name in the marker schema
        arg: &'static str,
        /// Why it's invalid
        reason: String,
    },

    /// Scale or zero-point operand did not resolve to constant data
    #[error("expected to find param tensor for {node}")]
    MissingParam {
        /// Name of the unresolved operand node
        node: String,
    },

    /// A tensor has the wrong number of dimensions
    #[error("{what} must be {expected}D, got {actual}D")]
    RankMismatch {
        /// What was checked
        what: &'static str,
        /// Expected rank
        expected: usize,
        /// Actual rank
        actual: usize,
    },

    /// Target storage type cannot be produced by the backend
    #[error("unsupported dtype {dtype:?}: {reason}")]
    UnsupportedDtype {
        /// The rejected dtype
        dtype: DType,
        /// Why it's rejected
        reason: &'static str,
    },

    /// A weight or bias chain does not start from static data
    #[error("{context} not derived from static data, input to the q or dq node: {input}")]
    NonStaticSource {
        /// Which chain was being matched
        context: &'static str,
        /// Name of the non-static input
        input: String,
    },

    /// Groupwise quantization invariants do not hold
    #[error("invalid groupwise quantization: {reason}")]
    InvalidGroupwise {
        /// Description of what went wrong
        reason: String,
    },

    /// Per-channel parameters do not match the tensor extent along the axis
    #[error(
        "invalid size of per channel quantization {what}, axis: {axis}, {what} size: {len}, tensor shape: {shape:?}"
    )]
    ChannelMismatch {
        /// Either "scales" or "zero-points"
        what: &'static str,
        /// Quantization axis
        axis: usize,
        /// Number of parameters provided
        len: usize,
        /// Shape of the tensor being quantized
        shape: Vec<usize>,
    },

    /// Packed 4-bit per-channel weights must be produced before lowering
    #[error("not expecting QC4W per channel tensor")]
    Qc4wUnsupported,

    /// Groupwise weights must be quantized before lowering
    #[error(
        "not expecting per channel group quantization, got q dtype: {dtype:?}, tensor dtype {tensor_dtype:?}"
    )]
    PerChannelGroupUnsupported {
        /// Descriptor storage dtype
        dtype: DType,
        /// Dtype of the tensor passed in
        tensor_dtype: DType,
    },

    /// Quantization range is empty
    #[error("invalid quantization range: qmin {qmin} must be less than qmax {qmax}")]
    InvalidRange {
        /// Lower bound
        qmin: i64,
        /// Upper bound
        qmax: i64,
    },

    /// Quantization range does not fit the storage type
    #[error("quantization range [{qmin}, {qmax}] does not fit in {dtype:?}")]
    RangeExceedsStorage {
        /// Lower bound
        qmin: i64,
        /// Upper bound
        qmax: i64,
        /// Storage type
        dtype: DType,
    },

    /// A quantized value is not representable in the storage type
    #[error("quantized value {value} does not fit in {dtype:?}")]
    ValueOutOfStorage {
        /// The offending value
        value: i64,
        /// Storage type
        dtype: DType,
    },

    /// A node argument points at a node that does not precede it
    #[error("node {node} references unknown node id {id}")]
    DanglingNode {
        /// Name of the referencing node
        node: String,
        /// The dangling id
        id: usize,
    },

    /// A node id that does not belong to the graph
    #[error("unknown node id {id} in a graph of {len} nodes")]
    UnknownNode {
        /// The requested id
        id: usize,
        /// Number of nodes in the graph
        len: usize,
    },

    /// Tensor data could not be read as the requested element type
    #[error("tensor data error: {0}")]
    Data(String),
}

impl From<burn_tensor::DataError> for QuantParamsError {
    fn from(err: burn_tensor::DataError) -> Self {
        QuantParamsError::Data(format!("{err:?}"))
    }
}
