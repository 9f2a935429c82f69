use std::fmt;

use super::{FieldType, Value};
use crate::common::{Result, StrataError};

/// An ordered list of typed values, stored in a page slot as the concatenation
/// of its field encodings. Decoding needs the field types in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    /// Decodes a record with the given field types. Trailing bytes are an error.
    pub fn from_bytes(field_types: &[FieldType], data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let values = field_types
            .iter()
            .map(|field_type| Value::decode(*field_type, &mut buf))
            .collect::<Result<Vec<_>>>()?;

        if !buf.is_empty() {
            return Err(StrataError::RecordDecode(format!(
                "{} trailing bytes after {} fields",
                buf.len(),
                field_types.len()
            )));
        }
        Ok(Self { values })
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        for value in &self.values {
            value.encode(&mut buf);
        }
        buf
    }

    pub fn encoded_len(&self) -> usize {
        self.values.iter().map(Value::encoded_len).sum()
    }

    pub fn field_types(&self) -> Vec<FieldType> {
        self.values.iter().map(Value::field_type).collect()
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

/// Builder for constructing records field by field.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    values: Vec<Value>,
}

impl RecordBuilder {
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn build(self) -> Record {
        Record::new(self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = Record::builder().value(42).value("Bob").value(true).build();
        assert_eq!(record.len(), 3);
        assert_eq!(record.value(0), Some(&Value::Integer(42)));
        assert_eq!(record.value(1), Some(&Value::String("Bob".to_string())));
        assert_eq!(
            record.field_types(),
            vec![FieldType::Integer, FieldType::String, FieldType::Boolean]
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let bytes = Record::builder().value(1).value(2).build().to_bytes();
        assert!(Record::from_bytes(&[FieldType::Integer], &bytes).is_err());
    }

    #[test]
    fn test_display() {
        let record = Record::builder().value(1).value("a").build();
        assert_eq!(record.to_string(), "(1, 'a')");
    }
}
