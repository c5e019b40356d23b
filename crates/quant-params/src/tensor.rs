//! Numeric helpers over [`TensorData`]

use burn_tensor::{DType, DataError, TensorData};

use crate::error::{QuantParamsError, Result};

/// Convert to `Vec<f64>`, handling all numeric types with automatic conversion
pub fn to_f64_vec(data: &TensorData) -> core::result::Result<Vec<f64>, DataError> {
    match data.dtype {
        DType::F64 => data.to_vec::<f64>(),
        DType::F32 => {
            let vec = data.to_vec::<f32>()?;
            Ok(vec.into_iter().map(f64::from).collect())
        }
        DType::F16 => {
            let vec = data.to_vec::<half::f16>()?;
            Ok(vec.into_iter().map(f64::from).collect())
        }
        DType::BF16 => {
            let vec = data.to_vec::<half::bf16>()?;
            Ok(vec.into_iter().map(f64::from).collect())
        }
        DType::I64 => {
            let vec = data.to_vec::<i64>()?;
            Ok(vec.into_iter().map(|v| v as f64).collect())
        }
        DType::I32 => {
            let vec = data.to_vec::<i32>()?;
            Ok(vec.into_iter().map(f64::from).collect())
        }
        DType::I16 => {
            let vec = data.to_vec::<i16>()?;
            Ok(vec.into_iter().map(f64::from).collect())
        }
        DType::I8 => {
            let vec = data.to_vec::<i8>()?;
            Ok(vec.into_iter().map(f64::from).collect())
        }
        DType::U8 => {
            let vec = data.to_vec::<u8>()?;
            Ok(vec.into_iter().map(f64::from).collect())
        }
        DType::U16 => {
            let vec = data.to_vec::<u16>()?;
            Ok(vec.into_iter().map(f64::from).collect())
        }
        DType::U32 => {
            let vec = data.to_vec::<u32>()?;
            Ok(vec.into_iter().map(f64::from).collect())
        }
        other => Err(DataError::TypeMismatch(format!(
            "Cannot convert {:?} to Vec<f64>",
            other
        ))),
    }
}

/// Whether the dtype is an unsigned integer
pub fn is_unsigned(dtype: DType) -> bool {
    matches!(dtype, DType::U8 | DType::U16 | DType::U32 | DType::U64)
}

/// Full representable range of a signed integer storage type
pub fn signed_range(dtype: DType) -> Option<(i64, i64)> {
    match dtype {
        DType::I8 => Some((i8::MIN as i64, i8::MAX as i64)),
        DType::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
        DType::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
        _ => None,
    }
}

/// Number of elements between consecutive indices along `axis` in row-major order
pub fn axis_stride(shape: &[usize], axis: usize) -> usize {
    shape[axis + 1..].iter().product()
}

/// Build integer tensor data of the given storage dtype from already clamped values.
///
/// Fails instead of wrapping when a value does not fit the storage type.
pub fn from_quantized(values: Vec<i64>, shape: Vec<usize>, dtype: DType) -> Result<TensorData> {
    match dtype {
        DType::I8 => Ok(TensorData::new(narrow::<i8>(values, dtype)?, shape)),
        DType::I16 => Ok(TensorData::new(narrow::<i16>(values, dtype)?, shape)),
        DType::I32 => Ok(TensorData::new(narrow::<i32>(values, dtype)?, shape)),
        other => Err(QuantParamsError::UnsupportedDtype {
            dtype: other,
            reason: "quantized storage must be a signed integer type",
        }),
    }
}

fn narrow<T: TryFrom<i64>>(values: Vec<i64>, dtype: DType) -> Result<Vec<T>> {
    values
        .into_iter()
        .map(|value| {
            T::try_from(value).map_err(|_| QuantParamsError::ValueOutOfStorage { value, dtype })
        })
        .collect()
}

/// Affine quantization of a single value with ties-to-even rounding
pub fn quantize_value(x: f64, scale: f64, zero_point: f64, qmin: i64, qmax: i64) -> i64 {
    let q = (x / scale).round_ties_even() + zero_point;
    q.clamp(qmin as f64, qmax as f64) as i64
}
