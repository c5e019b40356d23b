//! `quant-params` lifts quantization parameters out of an exported graph.
//!
//! Quantized models reach the backend as float graphs annotated with quantize and
//! dequantize markers. The builders on [`QuantParams`] walk the marker chains around a
//! tensor and produce one descriptor per quantized position, which is then used to
//! quantize constant data ahead of time with [`QuantParams::quantize_tensor`].
//!
//! ```
//! use burn_tensor::{DType, TensorData};
//! use quant_params::{Argument, ExportedProgram, GraphBuilder, QuantParams, Target};
//!
//! let mut builder = GraphBuilder::new();
//! let w = builder.get_attr("weight");
//! let q = builder.call(
//!     "q",
//!     Target::QuantizePerTensor,
//!     vec![w.into(), Argument::Float(0.5), Argument::Int(0), Argument::Int(-128),
//!          Argument::Int(127), DType::I8.into()],
//! );
//! let dq = builder.call(
//!     "dq",
//!     Target::DequantizePerTensor,
//!     vec![q.into(), Argument::Float(0.5), Argument::Int(0), Argument::Int(-128),
//!          Argument::Int(127), DType::I8.into()],
//! );
//! let program = ExportedProgram::new(builder.build().unwrap());
//!
//! let params = QuantParams::from_weights(&program, dq).unwrap().unwrap();
//! let quantized = params
//!     .quantize_tensor(TensorData::new(vec![1.0f32, -1.0], [2]))
//!     .unwrap();
//! assert_eq!(quantized.to_vec::<i8>().unwrap(), vec![2, -2]);
//! ```

#[macro_use]
extern crate derive_new;

mod builders;
pub mod error;
pub mod ir;
pub mod params;
pub mod program;
pub mod schema;
pub mod tensor;
pub mod tensor_store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{QuantParamsError, Result};
pub use ir::{Argument, Graph, GraphBuilder, Node, NodeId, NodeKind, NodeMeta, Target};
pub use params::{QuantParams, QuantParamsBuilder, QuantValue};
pub use program::{ExportedProgram, ParamSource, ProgramView, QdqClassifier};
pub use schema::{QdqFields, QdqGranularity, QdqVariant};
