use crate::from_zigzag;
use crate::Fields;
use crate::Kind;
use crate::StructSpec;
use crate::TType;
use crate::ThriftError;
use crate::Value;

/// Decoder for Thrift Compact data.
///
/// The reader keeps a stack of previous field ids so that nested structs
/// restore the delta baseline of their parent on STOP.
pub struct ThriftReader<'a> {
    data: &'a [u8],
    pos: usize,
    prev_field_id: i16,
    stack: Vec<i16>,
}

impl<'a> ThriftReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ThriftReader {
            data,
            pos: 0,
            prev_field_id: 0,
            stack: Vec::new(),
        }
    }

    fn read_byte(&mut self) -> Result<u8, ThriftError> {
        let byte = *self.data.get(self.pos).ok_or(ThriftError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], ThriftError> {
        let end = self.pos.checked_add(len).ok_or(ThriftError::UnexpectedEof)?;
        let slice = self.data.get(self.pos..end).ok_or(ThriftError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn push_stack(&mut self) {
        self.stack.push(self.prev_field_id);
        self.prev_field_id = 0;
    }

    fn pop_stack(&mut self) {
        if let Some(prev) = self.stack.pop() {
            self.prev_field_id = prev;
        }
    }

    pub fn read_varint(&mut self) -> Result<u64, ThriftError> {
        let mut result: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            result |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(ThriftError::VarintOverflow);
            }
        }
    }

    pub fn read_int(&mut self) -> Result<i64, ThriftError> {
        Ok(from_zigzag(self.read_varint()?))
    }

    /// Read a field header. Returns `(TType::Stop, -1)` at struct end.
    pub fn read_field_header(&mut self) -> Result<(TType, i16), ThriftError> {
        let byte = self.read_byte()?;
        let ftype = TType::from_nibble(byte & 0x0F)?;
        if ftype == TType::Stop {
            return Ok((ftype, -1));
        }
        let delta = byte >> 4;
        self.prev_field_id = if delta == 0 {
            self.read_int()? as i16
        } else {
            self.prev_field_id + delta as i16
        };
        Ok((ftype, self.prev_field_id))
    }

    /// Read the item type and length of a list or set.
    ///
    /// The upstream spec uses separate element type tags for containers, but
    /// the remote reuses the struct field tags.
    pub fn read_list_header(&mut self) -> Result<(TType, usize), ThriftError> {
        let byte = self.read_byte()?;
        let item_type = TType::from_nibble(byte & 0x0F)?;
        let mut length = (byte >> 4) as usize;
        if length == 0x0F {
            length = self.read_varint()? as usize;
        }
        Ok((item_type, length))
    }

    /// Read the key/value types and length of a map.
    ///
    /// An empty map is a single zero byte; `(Stop, Stop, 0)` is returned.
    pub fn read_map_header(&mut self) -> Result<(TType, TType, usize), ThriftError> {
        if self.data.get(self.pos) == Some(&0) {
            self.pos += 1;
            return Ok((TType::Stop, TType::Stop, 0));
        }
        let length = self.read_varint()? as usize;
        let types = self.read_byte()?;
        let key_type = TType::from_nibble(types >> 4)?;
        let value_type = TType::from_nibble(types & 0x0F)?;
        Ok((key_type, value_type, length))
    }

    /// Skip the next value of the given type, recursing into containers.
    pub fn skip(&mut self, ftype: TType) -> Result<(), ThriftError> {
        match ftype {
            TType::BoolTrue | TType::BoolFalse => Ok(()),
            TType::Struct => {
                self.push_stack();
                loop {
                    let (field_type, _) = self.read_field_header()?;
                    if field_type == TType::Stop {
                        break;
                    }
                    self.skip(field_type)?;
                }
                self.pop_stack();
                Ok(())
            }
            TType::List | TType::Set => {
                let (item_type, length) = self.read_list_header()?;
                for _ in 0..length {
                    self.skip(item_type)?;
                }
                Ok(())
            }
            TType::Map => {
                let (key_type, value_type, length) = self.read_map_header()?;
                for _ in 0..length {
                    self.skip(key_type)?;
                    self.skip(value_type)?;
                }
                Ok(())
            }
            _ => self.read_primitive(ftype).map(|_| ()),
        }
    }

    /// Iterate the fields of a struct without a schema, handling the
    /// field-id stack around the callback.
    pub fn for_each_field<F>(&mut self, mut f: F) -> Result<(), ThriftError>
    where
        F: FnMut(&mut Self, TType, i16) -> Result<(), ThriftError>,
    {
        self.push_stack();
        loop {
            let (ftype, id) = self.read_field_header()?;
            if ftype == TType::Stop {
                break;
            }
            f(self, ftype, id)?;
        }
        self.pop_stack();
        Ok(())
    }

    /// Read a primitive value identified by its wire type tag.
    pub(crate) fn read_primitive(&mut self, ftype: TType) -> Result<Value, ThriftError> {
        Ok(match ftype {
            // Container items encode booleans as a plain byte.
            TType::BoolTrue | TType::BoolFalse => return Err(ThriftError::BareBoolean),
            TType::Byte => Value::Byte(self.read_byte()?),
            TType::I16 => Value::I16(self.read_int()? as i16),
            TType::I32 => Value::I32(self.read_int()? as i32),
            TType::I64 => Value::I64(self.read_int()?),
            TType::Double => {
                let bytes: [u8; 8] = self.read_exact(8)?.try_into().unwrap();
                Value::Double(f64::from_le_bytes(bytes))
            }
            TType::Float => {
                let bytes: [u8; 4] = self.read_exact(4)?.try_into().unwrap();
                Value::Float(f32::from_le_bytes(bytes))
            }
            TType::Binary => {
                let len = self.read_varint()? as usize;
                Value::Bytes(self.read_exact(len)?.to_vec())
            }
            other => return Err(ThriftError::UnknownType(other.nibble())),
        })
    }

    /// Decode a struct according to its field table.
    ///
    /// Unknown field ids are skipped by type; a wire type that contradicts the
    /// declared type fails with the dotted path of the field.
    pub fn read_struct(
        &mut self,
        spec: &'static StructSpec,
        path: &str,
    ) -> Result<Fields, ThriftError> {
        self.push_stack();
        let mut fields = Fields::default();
        loop {
            let (ftype, id) = self.read_field_header()?;
            if ftype == TType::Stop {
                break;
            }
            let Some(field) = spec.field(id) else {
                self.skip(ftype)?;
                continue;
            };
            let expected = field.kind.wire_type();
            if ftype.normalized() != expected.normalized() {
                return Err(ThriftError::TypeMismatch {
                    path: format!("{path}.{}", field.name),
                    expected,
                    actual: ftype,
                });
            }
            let value = if let Kind::Bool = field.kind {
                Value::Bool(ftype == TType::BoolTrue)
            } else {
                self.read_value(field.kind, &format!("{path}.{}", field.name))?
            };
            fields.insert(id, value);
        }
        self.pop_stack();
        Ok(fields)
    }

    fn read_value(&mut self, kind: &Kind, path: &str) -> Result<Value, ThriftError> {
        match kind {
            Kind::Struct(spec) => Ok(Value::Struct(self.read_struct(spec(), path)?)),
            Kind::List(item) | Kind::Set(item) => {
                let (item_type, length) = self.read_list_header()?;
                if item_type.normalized() != item.wire_type().normalized() {
                    return Err(ThriftError::ContainerMismatch {
                        part: "item",
                        path: path.to_string(),
                        expected: item.wire_type(),
                        actual: item_type,
                    });
                }
                let mut items = Vec::with_capacity(length.min(1024));
                for index in 0..length {
                    items.push(self.read_value(item, &format!("{path}[{index}]"))?);
                }
                Ok(Value::List(items))
            }
            Kind::Map(key, value) => {
                let (key_type, value_type, length) = self.read_map_header()?;
                if length == 0 {
                    return Ok(Value::Map(Vec::new()));
                }
                if key_type.normalized() != key.wire_type().normalized() {
                    return Err(ThriftError::ContainerMismatch {
                        part: "key",
                        path: path.to_string(),
                        expected: key.wire_type(),
                        actual: key_type,
                    });
                }
                if value_type.normalized() != value.wire_type().normalized() {
                    return Err(ThriftError::ContainerMismatch {
                        part: "value",
                        path: path.to_string(),
                        expected: value.wire_type(),
                        actual: value_type,
                    });
                }
                let mut pairs = Vec::with_capacity(length.min(1024));
                for index in 0..length {
                    let key_val = self.read_value(key, &format!("{path}[{index}::key]"))?;
                    let value_val = self.read_value(value, &format!("{path}[{index}::value]"))?;
                    pairs.push((key_val, value_val));
                }
                Ok(Value::Map(pairs))
            }
            Kind::Bool => {
                // Booleans inside containers are a single byte.
                Ok(Value::Bool(self.read_byte()? == 1))
            }
            Kind::Utf8 => {
                let len = self.read_varint()? as usize;
                let bytes = self.read_exact(len)?.to_vec();
                String::from_utf8(bytes)
                    .map(Value::Str)
                    .map_err(|source| ThriftError::InvalidUtf8 {
                        path: path.to_string(),
                        source,
                    })
            }
            Kind::Bytes | Kind::Byte | Kind::I16 | Kind::I32 | Kind::I64 | Kind::Double
            | Kind::Float => self.read_primitive(kind.wire_type()),
        }
    }
}
