use std::{borrow::Cow, collections::BTreeMap, fmt};

use crate::{
    error::{OrtError, Result},
    sys,
};

/// Element type of a tensor as declared by a model or reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float,
    Int32,
    Int64,
    Other(i32),
}

impl ElementType {
    pub fn from_raw(raw: sys::OnnxTensorElementDataType) -> Self {
        match raw {
            sys::ONNX_TENSOR_ELEMENT_DATA_TYPE_FLOAT => Self::Float,
            sys::ONNX_TENSOR_ELEMENT_DATA_TYPE_INT32 => Self::Int32,
            sys::ONNX_TENSOR_ELEMENT_DATA_TYPE_INT64 => Self::Int64,
            other => Self::Other(other),
        }
    }

    pub fn to_raw(self) -> sys::OnnxTensorElementDataType {
        match self {
            Self::Float => sys::ONNX_TENSOR_ELEMENT_DATA_TYPE_FLOAT,
            Self::Int32 => sys::ONNX_TENSOR_ELEMENT_DATA_TYPE_INT32,
            Self::Int64 => sys::ONNX_TENSOR_ELEMENT_DATA_TYPE_INT64,
            Self::Other(raw) => raw,
        }
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn size_of(self) -> Option<usize> {
        match self {
            Self::Float => Some(std::mem::size_of::<f32>()),
            Self::Int32 => Some(std::mem::size_of::<i32>()),
            Self::Int64 => Some(std::mem::size_of::<i64>()),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float => f.write_str("float32"),
            Self::Int32 => f.write_str("int32"),
            Self::Int64 => f.write_str("int64"),
            Self::Other(raw) => write!(f, "onnx-type({raw})"),
        }
    }
}

/// Typed element buffer. The variant is the only record of the element type.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValues {
    F32(Vec<f32>),
    I64(Vec<i64>),
    I32(Vec<i32>),
}

impl TensorValues {
    pub fn len(&self) -> usize {
        match self {
            Self::F32(values) => values.len(),
            Self::I64(values) => values.len(),
            Self::I32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Self::F32(_) => ElementType::Float,
            Self::I64(_) => ElementType::Int64,
            Self::I32(_) => ElementType::Int32,
        }
    }
}

/// A dense tensor: one typed buffer plus its shape.
///
/// The product of `shape` always equals the buffer length.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    values: TensorValues,
    shape: Vec<i64>,
}

pub type TensorMap = BTreeMap<String, TensorData>;

/// Borrowed inputs for a single session run, keyed by declared input name.
pub type TensorInputs<'a> = BTreeMap<&'a str, &'a TensorData>;

pub fn borrow_inputs(map: &TensorMap) -> TensorInputs<'_> {
    map.iter().map(|(name, tensor)| (name.as_str(), tensor)).collect()
}

pub fn element_count(shape: &[i64]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| {
        let dim = usize::try_from(dim).ok()?;
        acc.checked_mul(dim)
    })
}

impl TensorData {
    pub fn new(values: TensorValues, shape: Vec<i64>) -> Result<Self> {
        let actual = values.len();
        match element_count(&shape) {
            Some(expected) if expected == actual => Ok(Self { values, shape }),
            expected => Err(OrtError::ShapeMismatch {
                shape,
                expected: expected.unwrap_or(0),
                actual,
            }),
        }
    }

    pub fn from_f32(values: Vec<f32>, shape: Vec<i64>) -> Result<Self> {
        Self::new(TensorValues::F32(values), shape)
    }

    pub fn from_i64(values: Vec<i64>, shape: Vec<i64>) -> Result<Self> {
        Self::new(TensorValues::I64(values), shape)
    }

    pub fn from_i32(values: Vec<i32>, shape: Vec<i64>) -> Result<Self> {
        Self::new(TensorValues::I32(values), shape)
    }

    /// Wraps a buffer as a `[1, len]` row.
    pub fn row(values: TensorValues) -> Self {
        let shape = vec![1, values.len() as i64];
        Self { values, shape }
    }

    pub fn values(&self) -> &TensorValues {
        &self.values
    }

    pub fn into_values(self) -> TensorValues {
        self.values
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn element_type(&self) -> ElementType {
        self.values.element_type()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match &self.values {
            TensorValues::F32(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match &self.values {
            TensorValues::I64(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.values {
            TensorValues::I32(values) => Some(values),
            _ => None,
        }
    }

    pub fn into_f32(self) -> Option<Vec<f32>> {
        match self.values {
            TensorValues::F32(values) => Some(values),
            _ => None,
        }
    }

    /// Returns this tensor in the requested element type.
    ///
    /// Integer buffers are widened or narrowed between int32 and int64; any
    /// other conversion is refused.
    pub fn coerce_to(&self, target: ElementType) -> Option<Cow<'_, TensorData>> {
        if self.element_type() == target {
            return Some(Cow::Borrowed(self));
        }
        let values = match (&self.values, target) {
            (TensorValues::I32(values), ElementType::Int64) => {
                TensorValues::I64(values.iter().map(|&v| i64::from(v)).collect())
            }
            (TensorValues::I64(values), ElementType::Int32) => TensorValues::I32(
                values
                    .iter()
                    .map(|&v| i32::try_from(v).ok())
                    .collect::<Option<Vec<_>>>()?,
            ),
            _ => return None,
        };
        Some(Cow::Owned(Self {
            values,
            shape: self.shape.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_shape_that_disagrees_with_buffer() {
        let err = TensorData::from_f32(vec![0.0; 5], vec![1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            OrtError::ShapeMismatch {
                expected: 6,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn rejects_negative_dimensions() {
        assert!(TensorData::from_i64(vec![], vec![1, -1]).is_err());
    }

    #[test]
    fn zero_sized_dimension_allows_empty_buffer() {
        let tensor = TensorData::from_f32(Vec::new(), vec![1, 2, 0, 64]).unwrap();
        assert!(tensor.is_empty());
        assert_eq!(tensor.shape(), &[1, 2, 0, 64]);
    }

    #[test]
    fn coerces_between_integer_widths() {
        let ids = TensorData::from_i32(vec![1, 2, 3], vec![1, 3]).unwrap();
        let wide = ids.coerce_to(ElementType::Int64).unwrap();
        assert_eq!(wide.as_i64(), Some(&[1i64, 2, 3][..]));
        assert_eq!(wide.shape(), &[1, 3]);

        let too_wide = TensorData::from_i64(vec![i64::MAX], vec![1]).unwrap();
        assert!(too_wide.coerce_to(ElementType::Int32).is_none());
    }

    #[test]
    fn refuses_float_integer_conversion() {
        let floats = TensorData::row(TensorValues::F32(vec![0.5]));
        assert!(floats.coerce_to(ElementType::Int64).is_none());
        assert!(matches!(
            floats.coerce_to(ElementType::Float),
            Some(Cow::Borrowed(_))
        ));
    }

    #[test]
    fn element_type_round_trips_raw_values() {
        for ty in [ElementType::Float, ElementType::Int32, ElementType::Int64] {
            assert_eq!(ElementType::from_raw(ty.to_raw()), ty);
        }
        assert_eq!(ElementType::from_raw(10), ElementType::Other(10));
        assert!(!ElementType::Other(10).is_supported());
    }
}
