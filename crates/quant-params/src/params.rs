use core::fmt;

use burn_tensor::{DType, TensorData};
use serde::{Deserialize, Serialize};

use crate::error::{QuantParamsError, Result};
use crate::ir::NodeId;
use crate::tensor::{axis_stride, from_quantized, quantize_value, signed_range, to_f64_vec};

/// A scale or zero-point value: one number, or one per channel (per group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QuantValue {
    Scalar(f64),
    Tensor(TensorData),
}

impl QuantValue {
    /// Number of dimensions, 0 for a scalar
    pub fn rank(&self) -> usize {
        match self {
            QuantValue::Scalar(_) => 0,
            QuantValue::Tensor(data) => data.shape.len(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            QuantValue::Scalar(_) => &[],
            QuantValue::Tensor(data) => &data.shape,
        }
    }

    /// Values in row-major order
    pub fn values(&self) -> Result<Vec<f64>> {
        match self {
            QuantValue::Scalar(value) => Ok(vec![*value]),
            QuantValue::Tensor(data) => Ok(to_f64_vec(data)?),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            QuantValue::Scalar(value) => Some(*value),
            QuantValue::Tensor(_) => None,
        }
    }
}

impl From<f64> for QuantValue {
    fn from(value: f64) -> Self {
        QuantValue::Scalar(value)
    }
}

impl From<TensorData> for QuantValue {
    fn from(data: TensorData) -> Self {
        QuantValue::Tensor(data)
    }
}

/// Parameters and metadata needed to quantize one tensor position of the graph.
///
/// Most of this could be read off the quantize/dequantize node directly, but some
/// positions the backend quantizes are not quantized in the exported graph (bias
/// nodes in particular), so the descriptor can also be built by hand with
/// [`QuantParams::builder`].
///
/// The descriptor refers to the float-valued node it quantizes by [`NodeId`] only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantParams {
    per_channel: bool,
    producer: NodeId,
    scale: QuantValue,
    zero_point: QuantValue,
    axis: usize,
    dtype: DType,
    qmin: i64,
    qmax: i64,
    is_output: bool,
    is_input: bool,
    is_dynamic: bool,
    num_nonbatch_dims: usize,
    group_size: usize,
}

impl QuantParams {
    /// Start a descriptor for `producer`, stored as `dtype` after quantization.
    ///
    /// Defaults to per-tensor quantization with scale 1, zero-point 0 and the full
    /// range of `dtype`.
    pub fn builder(producer: NodeId, dtype: DType) -> QuantParamsBuilder {
        let (qmin, qmax) = signed_range(dtype).unwrap_or((0, 0));
        QuantParamsBuilder {
            params: QuantParams {
                per_channel: false,
                producer,
                scale: QuantValue::Scalar(1.0),
                zero_point: QuantValue::Scalar(0.0),
                axis: 0,
                dtype,
                qmin,
                qmax,
                is_output: false,
                is_input: false,
                is_dynamic: false,
                num_nonbatch_dims: 1,
                group_size: 0,
            },
        }
    }

    pub fn per_channel(&self) -> bool {
        self.per_channel
    }

    /// The float-valued node this descriptor quantizes
    pub fn producer(&self) -> NodeId {
        self.producer
    }

    pub fn scale(&self) -> &QuantValue {
        &self.scale
    }

    pub fn zero_point(&self) -> &QuantValue {
        &self.zero_point
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn qmin(&self) -> i64 {
        self.qmin
    }

    pub fn qmax(&self) -> i64 {
        self.qmax
    }

    pub fn is_output(&self) -> bool {
        self.is_output
    }

    pub fn is_input(&self) -> bool {
        self.is_input
    }

    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    pub fn num_nonbatch_dims(&self) -> usize {
        self.num_nonbatch_dims
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn is_per_channel_group(&self) -> bool {
        self.per_channel && self.group_size > 0
    }

    /// Signed 4-bit per-channel weights stored in int8 containers
    pub fn is_qc4w(&self) -> bool {
        self.per_channel
            && !self.is_dynamic
            && self.qmin == -8
            && self.qmax == 7
            && self.dtype == DType::I8
    }

    /// Quantize constant data with this descriptor.
    ///
    /// Data already stored as the target dtype is returned untouched. Groupwise and
    /// QC4W weights are expected to be quantized before lowering and are rejected.
    pub fn quantize_tensor(&self, tensor: TensorData) -> Result<TensorData> {
        if tensor.dtype == self.dtype {
            return Ok(tensor);
        }

        if self.is_per_channel_group() {
            return Err(QuantParamsError::PerChannelGroupUnsupported {
                dtype: self.dtype,
                tensor_dtype: tensor.dtype,
            });
        }

        let values = to_f64_vec(&tensor)?;
        let shape = tensor.shape.clone();

        let quantized = if self.per_channel {
            self.quantize_per_channel(&values, &shape)?
        } else {
            self.quantize_per_tensor(&values)?
        };

        log::trace!(
            "Quantized {} values of shape {:?} to {:?}",
            quantized.len(),
            shape,
            self.dtype
        );

        from_quantized(quantized, shape, self.dtype)
    }

    fn quantize_per_tensor(&self, values: &[f64]) -> Result<Vec<i64>> {
        let scale = scalar_of(&self.scale)?;
        let zero_point = scalar_of(&self.zero_point)?;

        Ok(values
            .iter()
            .map(|&x| quantize_value(x, scale, zero_point, self.qmin, self.qmax))
            .collect())
    }

    fn quantize_per_channel(&self, values: &[f64], shape: &[usize]) -> Result<Vec<i64>> {
        let axis = self.axis;
        if axis >= shape.len() {
            return Err(QuantParamsError::InvalidArgument {
                node: self.producer.to_string(),
                arg: "axis",
                reason: format!("axis {axis} out of range for tensor shape {shape:?}"),
            });
        }

        let channels = shape[axis];
        let scales = self.scale.values()?;
        let zero_points = self.zero_point.values()?;

        if scales.len() != channels {
            return Err(QuantParamsError::ChannelMismatch {
                what: "scales",
                axis,
                len: scales.len(),
                shape: shape.to_vec(),
            });
        }
        if zero_points.len() != channels {
            return Err(QuantParamsError::ChannelMismatch {
                what: "zero-points",
                axis,
                len: zero_points.len(),
                shape: shape.to_vec(),
            });
        }

        // Assuming folded quant weights
        if self.is_qc4w() {
            return Err(QuantParamsError::Qc4wUnsupported);
        }

        let stride = axis_stride(shape, axis);
        Ok(values
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let channel = (i / stride) % channels;
                quantize_value(
                    x,
                    scales[channel],
                    zero_points[channel],
                    self.qmin,
                    self.qmax,
                )
            })
            .collect())
    }
}

fn scalar_of(value: &QuantValue) -> Result<f64> {
    match value {
        QuantValue::Scalar(v) => Ok(*v),
        QuantValue::Tensor(data) => {
            let values = to_f64_vec(data)?;
            match values.as_slice() {
                [v] => Ok(*v),
                _ => Err(QuantParamsError::RankMismatch {
                    what: "per tensor scale and zero-point",
                    expected: 0,
                    actual: data.shape.len(),
                }),
            }
        }
    }
}

impl fmt::Display for QuantParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QuantParams({}, dtype={:?}, range=[{}, {}]",
            self.producer, self.dtype, self.qmin, self.qmax
        )?;
        if self.is_dynamic {
            write!(f, ", dynamic")?;
        } else if self.is_per_channel_group() {
            write!(f, ", per_channel_group={}", self.group_size)?;
        } else if self.per_channel {
            write!(f, ", per_channel axis={}", self.axis)?;
        }
        if self.is_input {
            write!(f, ", input")?;
        }
        if self.is_output {
            write!(f, ", output")?;
        }
        write!(f, ")")
    }
}

/// Builder for [`QuantParams`], see [`QuantParams::builder`]
#[derive(Debug, Clone)]
pub struct QuantParamsBuilder {
    params: QuantParams,
}

impl QuantParamsBuilder {
    /// Quantize independently along `axis`
    pub fn with_per_channel(mut self, axis: usize) -> Self {
        self.params.per_channel = true;
        self.params.axis = axis;
        self
    }

    pub fn with_scale(mut self, scale: impl Into<QuantValue>) -> Self {
        self.params.scale = scale.into();
        self
    }

    pub fn with_zero_point(mut self, zero_point: impl Into<QuantValue>) -> Self {
        self.params.zero_point = zero_point.into();
        self
    }

    pub fn with_range(mut self, qmin: i64, qmax: i64) -> Self {
        self.params.qmin = qmin;
        self.params.qmax = qmax;
        self
    }

    pub fn with_output(mut self, is_output: bool) -> Self {
        self.params.is_output = is_output;
        self
    }

    pub fn with_input(mut self, is_input: bool) -> Self {
        self.params.is_input = is_input;
        self
    }

    /// Parameters are computed at run time
    pub fn with_dynamic(mut self, num_nonbatch_dims: usize) -> Self {
        self.params.is_dynamic = true;
        self.params.num_nonbatch_dims = num_nonbatch_dims;
        self
    }

    /// Split each channel into groups of `group_size` elements; 0 disables grouping
    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.params.group_size = group_size;
        self
    }

    /// Check the construction invariants and produce the descriptor.
    pub fn build(self) -> Result<QuantParams> {
        let params = self.params;

        if params.group_size > 0 {
            if !params.per_channel {
                return Err(QuantParamsError::InvalidGroupwise {
                    reason: "only per channel quantization supports groupwise quantization"
                        .to_string(),
                });
            }
            if params.scale.rank() != 2 {
                return Err(QuantParamsError::InvalidGroupwise {
                    reason: format!(
                        "scale must be 2D for per channel groupwise quant, got {}D",
                        params.scale.rank()
                    ),
                });
            }
        } else if params.per_channel && params.scale.rank() != 1 {
            return Err(QuantParamsError::RankMismatch {
                what: "per channel scale",
                expected: 1,
                actual: params.scale.rank(),
            });
        }

        if params.per_channel && params.zero_point.shape() != params.scale.shape() {
            return Err(QuantParamsError::InvalidArgument {
                node: params.producer.to_string(),
                arg: "zero_point",
                reason: format!(
                    "zero-point shape {:?} does not match scale shape {:?}",
                    params.zero_point.shape(),
                    params.scale.shape()
                ),
            });
        }

        if !params.is_dynamic && params.qmin >= params.qmax {
            return Err(QuantParamsError::InvalidRange {
                qmin: params.qmin,
                qmax: params.qmax,
            });
        }

        let exceeds_storage = signed_range(params.dtype)
            .is_some_and(|(lo, hi)| params.qmin < lo || params.qmax > hi);
        if exceeds_storage {
            return Err(QuantParamsError::RangeExceedsStorage {
                qmin: params.qmin,
                qmax: params.qmax,
                dtype: params.dtype,
            });
        }

        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn per_channel(scale: Vec<f32>, zero_point: Vec<i64>, axis: usize) -> QuantParams {
        let channels = scale.len();
        QuantParams::builder(NodeId(0), DType::I8)
            .with_per_channel(axis)
            .with_scale(TensorData::new(scale, [channels]))
            .with_zero_point(TensorData::new(zero_point, [channels]))
            .with_range(-128, 127)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults_to_full_dtype_range() {
        let params = QuantParams::builder(NodeId(3), DType::I8).build().unwrap();

        assert_eq!(params.producer(), NodeId(3));
        assert_eq!((params.qmin(), params.qmax()), (-128, 127));
        assert!(!params.per_channel());
        assert!(!params.is_per_channel_group());
        assert_eq!(params.num_nonbatch_dims(), 1);
    }

    #[test]
    fn test_group_size_requires_per_channel() {
        let result = QuantParams::builder(NodeId(0), DType::I8)
            .with_group_size(5)
            .build();
        assert!(matches!(
            result,
            Err(QuantParamsError::InvalidGroupwise { .. })
        ));
    }

    #[test]
    fn test_group_size_requires_2d_scale() {
        let result = QuantParams::builder(NodeId(0), DType::I8)
            .with_per_channel(0)
            .with_scale(TensorData::new(vec![0.1f32, 0.2], [2]))
            .with_zero_point(TensorData::new(vec![0i64, 0], [2]))
            .with_group_size(32)
            .build();
        assert!(matches!(
            result,
            Err(QuantParamsError::InvalidGroupwise { .. })
        ));
    }

    #[test]
    fn test_groupwise_descriptor() {
        let params = QuantParams::builder(NodeId(0), DType::I8)
            .with_per_channel(0)
            .with_scale(TensorData::new(vec![0.1f32; 4], [2, 2]))
            .with_zero_point(TensorData::new(vec![0i64; 4], [2, 2]))
            .with_range(-8, 7)
            .with_group_size(16)
            .build()
            .unwrap();

        assert!(params.is_per_channel_group());
        assert!(params.is_qc4w());
        assert_eq!(params.group_size(), 16);
    }

    #[test]
    fn test_per_channel_zero_point_shape_must_match() {
        let result = QuantParams::builder(NodeId(0), DType::I8)
            .with_per_channel(0)
            .with_scale(TensorData::new(vec![0.1f32, 0.2], [2]))
            .with_zero_point(TensorData::new(vec![0i64, 0, 0], [3]))
            .build();
        assert!(matches!(
            result,
            Err(QuantParamsError::InvalidArgument {
                arg: "zero_point",
                ..
            })
        ));
    }

    #[test]
    fn test_empty_range_is_rejected_for_static_params() {
        let result = QuantParams::builder(NodeId(0), DType::I8)
            .with_range(5, 5)
            .build();
        assert!(matches!(
            result,
            Err(QuantParamsError::InvalidRange { qmin: 5, qmax: 5 })
        ));

        let dynamic = QuantParams::builder(NodeId(0), DType::F32)
            .with_dynamic(1)
            .build()
            .unwrap();
        assert_eq!((dynamic.qmin(), dynamic.qmax()), (0, 0));
    }

    #[test]
    fn test_qc4w_requires_static_int8_per_channel() {
        let qc4w = QuantParams::builder(NodeId(0), DType::I8)
            .with_per_channel(0)
            .with_scale(TensorData::new(vec![0.1f32], [1]))
            .with_zero_point(TensorData::new(vec![0i64], [1]))
            .with_range(-8, 7)
            .build()
            .unwrap();
        assert!(qc4w.is_qc4w());

        let per_tensor = QuantParams::builder(NodeId(0), DType::I8)
            .with_range(-8, 7)
            .build()
            .unwrap();
        assert!(!per_tensor.is_qc4w());
    }

    #[test]
    fn test_quantize_already_quantized_is_identity() {
        let params = QuantParams::builder(NodeId(0), DType::I8)
            .with_scale(0.5)
            .build()
            .unwrap();
        let data = TensorData::new(vec![1i8, -2, 3], [3]);

        let out = params.quantize_tensor(data).unwrap();
        assert_eq!(out.as_slice::<i8>().unwrap(), &[1, -2, 3]);
    }

    #[test]
    fn test_quantize_per_tensor() {
        let params = QuantParams::builder(NodeId(0), DType::I8)
            .with_scale(0.5)
            .with_zero_point(1.0)
            .build()
            .unwrap();
        let data = TensorData::new(vec![0.0f32, 1.0, -1.0, 100.0], [2, 2]);

        let out = params.quantize_tensor(data).unwrap();
        assert_eq!(out.dtype, DType::I8);
        assert_eq!(out.shape, vec![2, 2]);
        assert_eq!(out.as_slice::<i8>().unwrap(), &[1, 3, -1, 127]);
    }

    #[rstest]
    #[case(DType::I16, vec![1000.0, -500.0, 32767.0])]
    #[case(DType::I32, vec![1000.0, -500.0, 40000.0])]
    fn test_quantize_per_tensor_wider_storage(#[case] dtype: DType, #[case] expected: Vec<f64>) {
        let params = QuantParams::builder(NodeId(0), dtype)
            .with_scale(0.001)
            .build()
            .unwrap();
        let data = TensorData::new(vec![1.0f32, -0.5, 40.0], [3]);

        let out = params.quantize_tensor(data).unwrap();
        assert_eq!(out.dtype, dtype);
        assert_eq!(to_f64_vec(&out).unwrap(), expected);
    }

    #[test]
    fn test_range_wider_than_storage_is_rejected() {
        let result = QuantParams::builder(NodeId(0), DType::I8)
            .with_range(-128, 255)
            .build();
        assert!(matches!(
            result,
            Err(QuantParamsError::RangeExceedsStorage {
                qmin: -128,
                qmax: 255,
                dtype: DType::I8
            })
        ));

        let result = QuantParams::builder(NodeId(0), DType::I16)
            .with_range(-40000, 0)
            .build();
        assert!(matches!(result, Err(QuantParamsError::RangeExceedsStorage { .. })));
    }

    #[test]
    fn test_quantize_per_channel_rows() {
        let params = per_channel(vec![0.1, 0.2], vec![0, 0], 0);
        let data = TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2]);

        let out = params.quantize_tensor(data).unwrap();
        assert_eq!(out.as_slice::<i8>().unwrap(), &[10, 20, 15, 20]);
    }

    #[test]
    fn test_quantize_per_channel_inner_axis() {
        let params = per_channel(vec![1.0, 0.5, 0.25], vec![0, 1, 2], 1);
        let data = TensorData::new(vec![1.0f32, 1.0, 1.0, 2.0, 2.0, 2.0], [2, 3]);

        let out = params.quantize_tensor(data).unwrap();
        assert_eq!(out.as_slice::<i8>().unwrap(), &[1, 3, 6, 2, 5, 10]);
    }

    #[test]
    fn test_quantize_per_channel_size_mismatch() {
        let params = per_channel(vec![0.1, 0.2, 0.3], vec![0, 0, 0], 0);
        let data = TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2]);

        assert!(matches!(
            params.quantize_tensor(data),
            Err(QuantParamsError::ChannelMismatch { what: "scales", .. })
        ));
    }

    #[test]
    fn test_quantize_per_channel_axis_out_of_range() {
        let params = per_channel(vec![0.1, 0.2], vec![0, 0], 2);
        let data = TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2]);

        assert!(matches!(
            params.quantize_tensor(data),
            Err(QuantParamsError::InvalidArgument { arg: "axis", .. })
        ));
    }

    #[test]
    fn test_quantize_qc4w_is_rejected() {
        let params = QuantParams::builder(NodeId(0), DType::I8)
            .with_per_channel(0)
            .with_scale(TensorData::new(vec![0.1f32, 0.2], [2]))
            .with_zero_point(TensorData::new(vec![0i64, 0], [2]))
            .with_range(-8, 7)
            .build()
            .unwrap();
        let data = TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2]);

        assert!(matches!(
            params.quantize_tensor(data),
            Err(QuantParamsError::Qc4wUnsupported)
        ));
    }

    #[test]
    fn test_quantize_groupwise_is_rejected() {
        let params = QuantParams::builder(NodeId(0), DType::I8)
            .with_per_channel(0)
            .with_scale(TensorData::new(vec![0.1f32; 4], [2, 2]))
            .with_zero_point(TensorData::new(vec![0i64; 4], [2, 2]))
            .with_group_size(2)
            .build()
            .unwrap();
        let data = TensorData::new(vec![1.0f32; 8], [2, 4]);

        assert!(matches!(
            params.quantize_tensor(data),
            Err(QuantParamsError::PerChannelGroupUnsupported { .. })
        ));
    }

    #[test]
    fn test_dynamic_descriptor_leaves_float_data_alone() {
        let params = QuantParams::builder(NodeId(0), DType::F32)
            .with_scale(0.0)
            .with_dynamic(1)
            .build()
            .unwrap();
        let data = TensorData::new(vec![0.25f32, 0.5], [2]);

        let out = params.quantize_tensor(data).unwrap();
        assert_eq!(out.as_slice::<f32>().unwrap(), &[0.25, 0.5]);
    }

    #[test]
    fn test_display_summary() {
        let params = per_channel(vec![0.1, 0.2], vec![0, 0], 0);
        assert_eq!(
            params.to_string(),
            "QuantParams(%0, dtype=I8, range=[-128, 127], per_channel axis=0)"
        );
    }

    #[test]
    fn test_serialize_round_trip() {
        let params = QuantParams::builder(NodeId(4), DType::I8)
            .with_scale(0.025)
            .with_zero_point(-3.0)
            .with_output(true)
            .build()
            .unwrap();
        let json = serde_json::to_string(&params).unwrap();
        let restored: QuantParams = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.producer(), NodeId(4));
        assert_eq!(restored.dtype(), DType::I8);
        assert_eq!(restored.scale().as_scalar(), Some(0.025));
        assert_eq!(restored.zero_point().as_scalar(), Some(-3.0));
        assert!(restored.is_output());
    }
}
