use std::collections::BTreeMap;

use crate::ThriftError;
use crate::ThriftStruct;

/// A decoded Thrift value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    Double(f64),
    Float(f32),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(Fields),
}

impl Value {
    pub fn into_i64(self) -> Option<i64> {
        match self {
            Value::I64(val) => Some(val),
            _ => None,
        }
    }

    pub fn into_i32(self) -> Option<i32> {
        match self {
            Value::I32(val) => Some(val),
            _ => None,
        }
    }

    pub fn into_f32(self) -> Option<f32> {
        match self {
            Value::Float(val) => Some(val),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Value::Str(val) => Some(val),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(val) => Some(val),
            _ => None,
        }
    }

    pub fn into_fields(self) -> Option<Fields> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }
}

/// The decoded fields of one struct, keyed by field id.
///
/// Accessors remove the field so that nested struct conversion can consume
/// the map without cloning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    by_id: BTreeMap<i16, Value>,
}

/// Unwrap a required field, reporting the struct and field name on absence.
pub fn require<T>(
    val: Option<T>,
    strct: &'static str,
    field: &'static str,
) -> Result<T, ThriftError> {
    val.ok_or(ThriftError::MissingField { strct, field })
}

impl Fields {
    pub(crate) fn insert(&mut self, id: i16, value: Value) {
        self.by_id.insert(id, value);
    }

    pub fn take(&mut self, id: i16) -> Option<Value> {
        self.by_id.remove(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn take_bool(&mut self, id: i16) -> Option<bool> {
        match self.take(id)? {
            Value::Bool(val) => Some(val),
            _ => None,
        }
    }

    pub fn take_byte(&mut self, id: i16) -> Option<u8> {
        match self.take(id)? {
            Value::Byte(val) => Some(val),
            _ => None,
        }
    }

    pub fn take_i16(&mut self, id: i16) -> Option<i16> {
        match self.take(id)? {
            Value::I16(val) => Some(val),
            _ => None,
        }
    }

    pub fn take_i32(&mut self, id: i16) -> Option<i32> {
        self.take(id)?.into_i32()
    }

    pub fn take_i64(&mut self, id: i16) -> Option<i64> {
        self.take(id)?.into_i64()
    }

    pub fn take_f64(&mut self, id: i16) -> Option<f64> {
        match self.take(id)? {
            Value::Double(val) => Some(val),
            _ => None,
        }
    }

    pub fn take_str(&mut self, id: i16) -> Option<String> {
        self.take(id)?.into_string()
    }

    pub fn take_bytes(&mut self, id: i16) -> Option<Vec<u8>> {
        self.take(id)?.into_bytes()
    }

    pub fn take_struct<T: ThriftStruct>(&mut self, id: i16) -> Result<Option<T>, ThriftError> {
        match self.take(id) {
            Some(Value::Struct(mut fields)) => Ok(Some(T::from_fields(&mut fields)?)),
            _ => Ok(None),
        }
    }

    pub fn take_list(&mut self, id: i16) -> Option<Vec<Value>> {
        match self.take(id)? {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn take_struct_list<T: ThriftStruct>(
        &mut self,
        id: i16,
    ) -> Result<Option<Vec<T>>, ThriftError> {
        let Some(items) = self.take_list(id) else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Value::Struct(mut fields) = item {
                out.push(T::from_fields(&mut fields)?);
            }
        }
        Ok(Some(out))
    }

    pub fn take_str_list(&mut self, id: i16) -> Option<Vec<String>> {
        Some(
            self.take_list(id)?
                .into_iter()
                .filter_map(Value::into_string)
                .collect(),
        )
    }

    pub fn take_i64_list(&mut self, id: i16) -> Option<Vec<i64>> {
        Some(
            self.take_list(id)?
                .into_iter()
                .filter_map(Value::into_i64)
                .collect(),
        )
    }

    pub fn take_f32_list(&mut self, id: i16) -> Option<Vec<f32>> {
        Some(
            self.take_list(id)?
                .into_iter()
                .filter_map(Value::into_f32)
                .collect(),
        )
    }

    pub fn take_map(&mut self, id: i16) -> Option<Vec<(Value, Value)>> {
        match self.take(id)? {
            Value::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    pub fn take_str_map(&mut self, id: i16) -> Option<Vec<(String, String)>> {
        Some(
            self.take_map(id)?
                .into_iter()
                .filter_map(|(key, val)| Some((key.into_string()?, val.into_string()?)))
                .collect(),
        )
    }

    pub fn take_bytes_map(&mut self, id: i16) -> Option<Vec<(String, Vec<u8>)>> {
        Some(
            self.take_map(id)?
                .into_iter()
                .filter_map(|(key, val)| Some((key.into_string()?, val.into_bytes()?)))
                .collect(),
        )
    }

    pub fn take_i32_str_map(&mut self, id: i16) -> Option<Vec<(i32, String)>> {
        Some(
            self.take_map(id)?
                .into_iter()
                .filter_map(|(key, val)| Some((key.into_i32()?, val.into_string()?)))
                .collect(),
        )
    }
}
