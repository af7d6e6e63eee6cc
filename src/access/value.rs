//! Value model: the tagged union every layer trades in, plus the row codec
//! and the order-preserving key encoding used by the B+Tree.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Column types supported by the engine.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 4,
    Text = 5,
    Binary = 6,
    Json = 7,
    Vector = 8,
    Timestamp = 9,
}

impl DataType {
    pub fn from_u8(value: u8) -> DbResult<Self> {
        match value {
            1 => Ok(DataType::Boolean),
            2 => Ok(DataType::Int32),
            3 => Ok(DataType::Int64),
            4 => Ok(DataType::Float64),
            5 => Ok(DataType::Text),
            6 => Ok(DataType::Binary),
            7 => Ok(DataType::Json),
            8 => Ok(DataType::Vector),
            9 => Ok(DataType::Timestamp),
            other => Err(DbError::Corruption(format!("unknown data type {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int32 => "INT",
            DataType::Int64 => "BIGINT",
            DataType::Float64 => "DOUBLE",
            DataType::Text => "STRING",
            DataType::Binary => "BINARY",
            DataType::Json => "JSON",
            DataType::Vector => "VECTOR",
            DataType::Timestamp => "TIMESTAMP",
        }
    }

    /// Whether a column of this type can back a B+Tree index key.
    pub fn is_indexable(&self) -> bool {
        !matches!(self, DataType::Json | DataType::Vector)
    }
}

/// A single cell. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
    Vector(Vec<f32>),
    Timestamp(i64),
}

impl Value {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float64(_) => Some(DataType::Float64),
            Value::Text(_) => Some(DataType::Text),
            Value::Binary(_) => Some(DataType::Binary),
            Value::Json(_) => Some(DataType::Json),
            Value::Vector(_) => Some(DataType::Vector),
            Value::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// NULL is compatible with every column type; integers widen.
    pub fn is_compatible_with(&self, data_type: DataType) -> bool {
        match (self, data_type) {
            (Value::Null, _) => true,
            (Value::Int32(_), DataType::Int64) => true,
            (Value::Int32(_), DataType::Float64) => true,
            (Value::Int64(_), DataType::Float64) => true,
            (Value::Int64(_), DataType::Timestamp) => true,
            _ => self.data_type() == Some(data_type),
        }
    }

    /// Widens a value to the column type it is being stored under.
    pub fn coerce_to(&self, data_type: DataType) -> DbResult<Value> {
        if self.data_type() == Some(data_type) || self.is_null() {
            return Ok(self.clone());
        }
        match (self, data_type) {
            (Value::Int32(v), DataType::Int64) => Ok(Value::Int64(*v as i64)),
            (Value::Int32(v), DataType::Float64) => Ok(Value::Float64(*v as f64)),
            (Value::Int32(v), DataType::Timestamp) => Ok(Value::Timestamp(*v as i64)),
            (Value::Int64(v), DataType::Float64) => Ok(Value::Float64(*v as f64)),
            (Value::Int64(v), DataType::Timestamp) => Ok(Value::Timestamp(*v)),
            // SQL writes JSON as a string literal.
            (Value::Text(s), DataType::Json) => serde_json::from_str(s)
                .map(Value::Json)
                .map_err(|e| {
                    DbError::ConstraintViolation(format!("invalid JSON literal: {}", e))
                }),
            _ => Err(DbError::ConstraintViolation(format!(
                "value {:?} is not assignable to a {} column",
                self,
                data_type.name()
            ))),
        }
    }

    /// Total order across comparable values, numeric kinds compared as one
    /// domain. `None` when the kinds are incomparable or either side is NULL.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Binary(a), Binary(b)) => Some(a.cmp(b)),
            (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
            (a, b) => {
                let x = a.as_f64()?;
                let y = b.as_f64()?;
                x.partial_cmp(&y)
            }
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Binary(v) => write!(f, "x'{}'", v.iter().map(|b| format!("{:02x}", b)).collect::<String>()),
            Value::Json(v) => write!(f, "{}", v),
            Value::Vector(v) => {
                write!(f, "[")?;
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, "]")
            }
            Value::Timestamp(v) => write!(f, "{}", v),
        }
    }
}

/// Serializes a row: `[ncols: u16][null bitmap][values]`. The stored column
/// count lets rows written before an ADD COLUMN decode with trailing NULLs.
pub fn serialize_values(values: &[Value], schema: &[DataType]) -> DbResult<Vec<u8>> {
    if values.len() != schema.len() {
        return Err(DbError::InvalidArgument(format!(
            "row has {} values, schema has {} columns",
            values.len(),
            schema.len()
        )));
    }

    let mut data = Vec::new();
    data.extend_from_slice(&(values.len() as u16).to_le_bytes());

    let bitmap_len = values.len().div_ceil(8);
    let mut bitmap = vec![0u8; bitmap_len];
    for (i, (value, expected)) in values.iter().zip(schema).enumerate() {
        if value.is_null() {
            bitmap[i / 8] |= 1 << (i % 8);
        } else if value.data_type() != Some(*expected) {
            return Err(DbError::ConstraintViolation(format!(
                "value {:?} does not match {} column",
                value,
                expected.name()
            )));
        }
    }
    data.extend_from_slice(&bitmap);

    for value in values {
        match value {
            Value::Null => {}
            Value::Boolean(v) => data.push(*v as u8),
            Value::Int32(v) => data.extend_from_slice(&v.to_le_bytes()),
            Value::Int64(v) | Value::Timestamp(v) => data.extend_from_slice(&v.to_le_bytes()),
            Value::Float64(v) => data.extend_from_slice(&v.to_le_bytes()),
            Value::Text(v) => {
                data.extend_from_slice(&(v.len() as u32).to_le_bytes());
                data.extend_from_slice(v.as_bytes());
            }
            Value::Binary(v) => {
                data.extend_from_slice(&(v.len() as u32).to_le_bytes());
                data.extend_from_slice(v);
            }
            Value::Json(v) => {
                let text = v.to_string();
                data.extend_from_slice(&(text.len() as u32).to_le_bytes());
                data.extend_from_slice(text.as_bytes());
            }
            Value::Vector(v) => {
                data.extend_from_slice(&(v.len() as u32).to_le_bytes());
                for x in v {
                    data.extend_from_slice(&x.to_le_bytes());
                }
            }
        }
    }
    Ok(data)
}

/// Decodes a row against the current schema. Rows stored with fewer columns
/// (pre-ADD COLUMN) are padded with NULLs.
pub fn deserialize_values(data: &[u8], schema: &[DataType]) -> DbResult<Vec<Value>> {
    let mut r = Reader { data, pos: 0 };
    let stored = r.u16()? as usize;
    if stored > schema.len() {
        return Err(DbError::Corruption(format!(
            "row stores {} columns, schema has {}",
            stored,
            schema.len()
        )));
    }

    let bitmap_len = stored.div_ceil(8);
    let bitmap = r.bytes(bitmap_len)?.to_vec();

    let mut values = Vec::with_capacity(schema.len());
    for (i, data_type) in schema.iter().take(stored).enumerate() {
        if bitmap[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        let value = match data_type {
            DataType::Boolean => Value::Boolean(r.u8()? != 0),
            DataType::Int32 => Value::Int32(i32::from_le_bytes(r.array()?)),
            DataType::Int64 => Value::Int64(i64::from_le_bytes(r.array()?)),
            DataType::Timestamp => Value::Timestamp(i64::from_le_bytes(r.array()?)),
            DataType::Float64 => Value::Float64(f64::from_le_bytes(r.array()?)),
            DataType::Text => {
                let len = r.u32()? as usize;
                let bytes = r.bytes(len)?;
                Value::Text(String::from_utf8(bytes.to_vec()).map_err(|e| {
                    DbError::Corruption(format!("invalid utf-8 in text column: {}", e))
                })?)
            }
            DataType::Binary => {
                let len = r.u32()? as usize;
                Value::Binary(r.bytes(len)?.to_vec())
            }
            DataType::Json => {
                let len = r.u32()? as usize;
                let bytes = r.bytes(len)?;
                Value::Json(serde_json::from_slice(bytes).map_err(|e| {
                    DbError::Corruption(format!("invalid json column payload: {}", e))
                })?)
            }
            DataType::Vector => {
                let len = r.u32()? as usize;
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(f32::from_le_bytes(r.array()?));
                }
                Value::Vector(v)
            }
        };
        values.push(value);
    }
    values.resize(schema.len(), Value::Null);
    Ok(values)
}

/// Order-preserving key encoding for index keys: unsigned big-endian with a
/// flipped sign bit for integers, the usual monotone transform for floats,
/// NUL-terminated bytes for text. Composite keys concatenate components.
pub fn encode_key(values: &[Value]) -> DbResult<Vec<u8>> {
    let mut key = Vec::new();
    for value in values {
        match value {
            Value::Null => {
                return Err(DbError::ConstraintViolation(
                    "NULL is not allowed in an index key".into(),
                ))
            }
            Value::Boolean(v) => key.push(*v as u8),
            Value::Int32(v) => key.extend_from_slice(&((*v as u32) ^ 0x8000_0000).to_be_bytes()),
            Value::Int64(v) | Value::Timestamp(v) => {
                key.extend_from_slice(&((*v as u64) ^ 0x8000_0000_0000_0000).to_be_bytes())
            }
            Value::Float64(v) => {
                let bits = v.to_bits();
                let ordered = if bits & 0x8000_0000_0000_0000 != 0 {
                    !bits
                } else {
                    bits | 0x8000_0000_0000_0000
                };
                key.extend_from_slice(&ordered.to_be_bytes());
            }
            Value::Text(v) => {
                key.extend_from_slice(v.as_bytes());
                key.push(0);
            }
            Value::Binary(v) => {
                key.extend_from_slice(v);
                key.push(0);
            }
            Value::Json(_) | Value::Vector(_) => {
                return Err(DbError::QueryPlan(format!(
                    "{} values cannot be index keys",
                    value.data_type().map(|t| t.name()).unwrap_or("NULL")
                )))
            }
        }
    }
    Ok(key)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> DbResult<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(DbError::Corruption("row payload truncated".into()));
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u8(&mut self) -> DbResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> DbResult<u16> {
        Ok(u16::from_le_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> DbResult<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn array<const N: usize>(&mut self) -> DbResult<[u8; N]> {
        Ok(self.bytes(N)?.try_into().unwrap())
    }
}
