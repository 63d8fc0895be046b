//! Row-level scalar values used for grouping and set membership.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int64Builder, LargeStringBuilder,
    StringBuilder, UInt64Builder,
};
use arrow::compute::kernels::cast::cast;
use arrow::datatypes::{
    Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type, UInt32Type,
    UInt64Type, UInt8Type,
};
use arrow_schema::DataType;
use kflow_common::{KflowError, Result};

/// Signed integers widen to `Int64`, unsigned to `UInt64`, floats to
/// `Float64Bits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int64(i64),
    UInt64(u64),
    Float64Bits(u64),
    Utf8(String),
}

impl ScalarValue {
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Int64(_) => 2,
            Self::UInt64(_) => 3,
            Self::Float64Bits(_) => 4,
            Self::Utf8(_) => 5,
        }
    }
}

impl Ord for ScalarValue {
    /// Nulls first; floats follow `f64::total_cmp`.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::UInt64(a), Self::UInt64(b)) => a.cmp(b),
            (Self::Float64Bits(a), Self::Float64Bits(b)) => {
                f64::from_bits(*a).total_cmp(&f64::from_bits(*b))
            }
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0_u8.hash(state),
            Self::Boolean(v) => {
                1_u8.hash(state);
                v.hash(state);
            }
            Self::Int64(v) => {
                2_u8.hash(state);
                v.hash(state);
            }
            Self::UInt64(v) => {
                5_u8.hash(state);
                v.hash(state);
            }
            Self::Float64Bits(v) => {
                3_u8.hash(state);
                v.hash(state);
            }
            Self::Utf8(v) => {
                4_u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl ScalarValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Float64Bits(v) => Some(f64::from_bits(*v)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Byte encoding of a group key; equal keys encode equally.
pub fn encode_group_key(values: &[ScalarValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 16);
    for value in values {
        match value {
            ScalarValue::Null => out.push(0),
            ScalarValue::Boolean(v) => {
                out.push(1);
                out.push(u8::from(*v));
            }
            ScalarValue::Int64(v) => {
                out.push(2);
                out.extend_from_slice(&v.to_le_bytes());
            }
            ScalarValue::UInt64(v) => {
                out.push(5);
                out.extend_from_slice(&v.to_le_bytes());
            }
            ScalarValue::Float64Bits(v) => {
                out.push(3);
                out.extend_from_slice(&v.to_le_bytes());
            }
            ScalarValue::Utf8(s) => {
                out.push(4);
                let len = s.len() as u32;
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
        out.push(0xff);
    }
    out
}

pub fn scalar_from_array(array: &ArrayRef, row: usize) -> Result<ScalarValue> {
    if array.is_null(row) {
        return Ok(ScalarValue::Null);
    }
    match array.data_type() {
        DataType::Int64 => Ok(ScalarValue::Int64(
            array.as_primitive::<Int64Type>().value(row),
        )),
        DataType::Int32 => Ok(ScalarValue::Int64(
            array.as_primitive::<Int32Type>().value(row) as i64,
        )),
        DataType::Int16 => Ok(ScalarValue::Int64(
            array.as_primitive::<Int16Type>().value(row) as i64,
        )),
        DataType::Int8 => Ok(ScalarValue::Int64(
            array.as_primitive::<Int8Type>().value(row) as i64,
        )),
        DataType::UInt64 => Ok(ScalarValue::UInt64(
            array.as_primitive::<UInt64Type>().value(row),
        )),
        DataType::UInt32 => Ok(ScalarValue::UInt64(
            array.as_primitive::<UInt32Type>().value(row) as u64,
        )),
        DataType::UInt16 => Ok(ScalarValue::UInt64(
            array.as_primitive::<UInt16Type>().value(row) as u64,
        )),
        DataType::UInt8 => Ok(ScalarValue::UInt64(
            array.as_primitive::<UInt8Type>().value(row) as u64,
        )),
        DataType::Float64 => Ok(ScalarValue::Float64Bits(
            array.as_primitive::<Float64Type>().value(row).to_bits(),
        )),
        DataType::Float32 => Ok(ScalarValue::Float64Bits(
            (array.as_primitive::<Float32Type>().value(row) as f64).to_bits(),
        )),
        DataType::Utf8 => Ok(ScalarValue::Utf8(
            array.as_string::<i32>().value(row).to_string(),
        )),
        DataType::LargeUtf8 => Ok(ScalarValue::Utf8(
            array.as_string::<i64>().value(row).to_string(),
        )),
        DataType::Boolean => Ok(ScalarValue::Boolean(array.as_boolean().value(row))),
        DataType::Null => Ok(ScalarValue::Null),
        other => Err(KflowError::Unsupported(format!(
            "scalar type not supported yet: {other:?}"
        ))),
    }
}

pub fn scalars_to_array(values: &[ScalarValue], dt: &DataType) -> Result<ArrayRef> {
    match dt {
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let mut b = Int64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Int64(x) => b.append_value(*x),
                    ScalarValue::Null => b.append_null(),
                    _ => return Err(type_mismatch("Int64")),
                }
            }
            narrow(Arc::new(b.finish()), dt)
        }
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
            let mut b = UInt64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::UInt64(x) => b.append_value(*x),
                    ScalarValue::Null => b.append_null(),
                    _ => return Err(type_mismatch("UInt64")),
                }
            }
            narrow(Arc::new(b.finish()), dt)
        }
        DataType::Float32 | DataType::Float64 => {
            let mut b = Float64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Float64Bits(x) => b.append_value(f64::from_bits(*x)),
                    ScalarValue::Int64(x) => b.append_value(*x as f64),
                    ScalarValue::UInt64(x) => b.append_value(*x as f64),
                    ScalarValue::Null => b.append_null(),
                    _ => return Err(type_mismatch("Float64")),
                }
            }
            narrow(Arc::new(b.finish()), dt)
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::with_capacity(values.len(), values.len() * 8);
            for v in values {
                match v {
                    ScalarValue::Utf8(x) => b.append_value(x),
                    ScalarValue::Null => b.append_null(),
                    _ => return Err(type_mismatch("Utf8")),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::LargeUtf8 => {
            let mut b = LargeStringBuilder::with_capacity(values.len(), values.len() * 8);
            for v in values {
                match v {
                    ScalarValue::Utf8(x) => b.append_value(x),
                    ScalarValue::Null => b.append_null(),
                    _ => return Err(type_mismatch("LargeUtf8")),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(values.len());
            for v in values {
                match v {
                    ScalarValue::Boolean(x) => b.append_value(*x),
                    ScalarValue::Null => b.append_null(),
                    _ => return Err(type_mismatch("Boolean")),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Null => Ok(arrow::array::new_null_array(&DataType::Null, values.len())),
        other => Err(KflowError::Unsupported(format!(
            "output type not supported yet: {other:?}"
        ))),
    }
}

/// Values came from a `dt` column, so the cast back never truncates.
fn narrow(wide: ArrayRef, dt: &DataType) -> Result<ArrayRef> {
    if wide.data_type() == dt {
        return Ok(wide);
    }
    cast(&wide, dt).map_err(|e| KflowError::Execution(format!("cast to {dt:?} failed: {e}")))
}

fn type_mismatch(target: &str) -> KflowError {
    KflowError::Execution(format!("type mismatch while building {target} array"))
}

#[cfg(test)]
mod tests {
    use arrow::array::{Int32Array, StringArray, UInt32Array};

    use super::*;

    #[test]
    fn widens_ints_and_keeps_nulls() {
        let a: ArrayRef = Arc::new(Int32Array::from(vec![Some(3), None]));
        assert_eq!(scalar_from_array(&a, 0).expect("v"), ScalarValue::Int64(3));
        assert_eq!(scalar_from_array(&a, 1).expect("v"), ScalarValue::Null);
    }

    #[test]
    fn group_keys_distinguish_null_from_empty() {
        let s: ArrayRef = Arc::new(StringArray::from(vec![Some(""), None]));
        let k0 = encode_group_key(&[scalar_from_array(&s, 0).expect("v")]);
        let k1 = encode_group_key(&[scalar_from_array(&s, 1).expect("v")]);
        assert_ne!(k0, k1);
    }

    #[test]
    fn rebuilds_typed_arrays() {
        let values = vec![ScalarValue::Utf8("a".to_string()), ScalarValue::Null];
        let arr = scalars_to_array(&values, &DataType::Utf8).expect("array");
        assert_eq!(arr.len(), 2);
        assert!(arr.is_null(1));
        assert!(scalars_to_array(&values, &DataType::Int64).is_err());
    }

    #[test]
    fn unsigned_values_round_trip_at_their_width() {
        let a: ArrayRef = Arc::new(UInt32Array::from(vec![Some(7), None, Some(u32::MAX)]));
        let values = (0..a.len())
            .map(|row| scalar_from_array(&a, row))
            .collect::<Result<Vec<_>>>()
            .expect("scalars");
        assert_eq!(values[0], ScalarValue::UInt64(7));
        let back = scalars_to_array(&values, &DataType::UInt32).expect("array");
        assert_eq!(back.data_type(), &DataType::UInt32);
        assert_eq!(back.as_primitive::<UInt32Type>().value(2), u32::MAX);
        assert!(back.is_null(1));
    }

    #[test]
    fn floats_order_numerically_after_null() {
        let mut values = [2.0_f64, -1.5, -3.0, 0.25]
            .iter()
            .map(|v| ScalarValue::Float64Bits(v.to_bits()))
            .collect::<Vec<_>>();
        values.push(ScalarValue::Null);
        values.sort();
        let order = values.iter().map(ScalarValue::as_f64).collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![None, Some(-3.0), Some(-1.5), Some(0.25), Some(2.0)]
        );
    }
}
