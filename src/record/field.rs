use std::fmt;

use bytes::{Buf, BufMut};

use crate::common::{Result, StrataError};

/// Field types a record can hold.
/// Fixed-width types have a constant encoded size; strings carry a length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 32-bit signed integer: 4 bytes, big-endian
    Integer,

    /// 64-bit signed integer: 8 bytes, big-endian
    Long,

    /// 64-bit floating point: 8 bytes, IEEE 754
    Double,

    /// Boolean: 1 byte (0 = false, 1 = true)
    Boolean,

    /// UTF-8 string: 4-byte byte length followed by the bytes
    String,
}

/// Size of the length prefix of a string field
const STRING_LENGTH_PREFIX: usize = 4;

impl FieldType {
    /// Returns the fixed size in bytes, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            FieldType::Integer => Some(4),
            FieldType::Long => Some(8),
            FieldType::Double => Some(8),
            FieldType::Boolean => Some(1),
            FieldType::String => None,
        }
    }

    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size().is_some()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Integer => write!(f, "INTEGER"),
            FieldType::Long => write!(f, "LONG"),
            FieldType::Double => write!(f, "DOUBLE"),
            FieldType::Boolean => write!(f, "BOOLEAN"),
            FieldType::String => write!(f, "STRING"),
        }
    }
}

/// A typed value stored in one record field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    Long(i64),
    Double(f64),
    Boolean(bool),
    String(String),
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Integer(_) => FieldType::Integer,
            Value::Long(_) => FieldType::Long,
            Value::Double(_) => FieldType::Double,
            Value::Boolean(_) => FieldType::Boolean,
            Value::String(_) => FieldType::String,
        }
    }

    /// Number of bytes `encode` writes for this value.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::String(s) => STRING_LENGTH_PREFIX + s.len(),
            other => other.field_type().fixed_size().unwrap_or(0),
        }
    }

    /// Appends the big-endian encoding of this value.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Value::Integer(v) => buf.put_i32(*v),
            Value::Long(v) => buf.put_i64(*v),
            Value::Double(v) => buf.put_f64(*v),
            Value::Boolean(v) => buf.put_u8(u8::from(*v)),
            Value::String(s) => {
                buf.put_i32(s.len() as i32);
                buf.put_slice(s.as_bytes());
            }
        }
    }

    /// Decodes one value of `field_type`, consuming exactly its encoded size.
    pub fn decode<B: Buf>(field_type: FieldType, buf: &mut B) -> Result<Self> {
        let needed = field_type.fixed_size().unwrap_or(STRING_LENGTH_PREFIX);
        if buf.remaining() < needed {
            return Err(StrataError::RecordDecode(format!(
                "{} field needs {} bytes, {} left",
                field_type,
                needed,
                buf.remaining()
            )));
        }

        let value = match field_type {
            FieldType::Integer => Value::Integer(buf.get_i32()),
            FieldType::Long => Value::Long(buf.get_i64()),
            FieldType::Double => Value::Double(buf.get_f64()),
            FieldType::Boolean => Value::Boolean(buf.get_u8() != 0),
            FieldType::String => {
                let len = buf.get_i32();
                if len < 0 || buf.remaining() < len as usize {
                    return Err(StrataError::RecordDecode(format!(
                        "string length {} exceeds {} remaining bytes",
                        len,
                        buf.remaining()
                    )));
                }
                let bytes = buf.copy_to_bytes(len as usize);
                let s = std::str::from_utf8(&bytes)
                    .map_err(|e| StrataError::RecordDecode(e.to_string()))?;
                Value::String(s.to_owned())
            }
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
