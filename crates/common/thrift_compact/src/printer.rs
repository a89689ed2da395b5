use std::fmt::Write;

use crate::ThriftError;
use crate::ThriftReader;
use crate::TType;
use crate::Value;

/// Render a Thrift Compact payload structurally, without a schema.
///
/// Useful for debugging and reverse-engineering payloads. Structs are labelled
/// with incrementing alphabetical identifiers (aa, ab, ...).
pub fn pretty_print(data: &[u8]) -> Result<String, ThriftError> {
    let mut reader = ThriftReader::new(data);
    let mut out = String::new();
    let mut struct_counter = 0u32;
    print_value(&mut reader, TType::Struct, "", "", &mut out, &mut struct_counter)?;
    Ok(out)
}

fn struct_label(counter: &mut u32) -> String {
    let id = *counter;
    *counter += 1;
    let first = (b'a' + (id / 26) as u8) as char;
    let second = (b'a' + (id % 26) as u8) as char;
    format!("{first}{second}")
}

fn print_value(
    reader: &mut ThriftReader<'_>,
    ftype: TType,
    indent: &str,
    prefix: &str,
    out: &mut String,
    struct_counter: &mut u32,
) -> Result<(), ThriftError> {
    if !prefix.is_empty() {
        let _ = write!(out, "{indent}{prefix} ");
    }
    match ftype {
        TType::List | TType::Set => {
            let (item_type, length) = reader.read_list_header()?;
            let _ = writeln!(out, "{item_type:?} {length} items");
            let inner = format!("{indent}  ");
            for index in 0..length {
                print_value(
                    reader,
                    item_type,
                    &inner,
                    &format!("{}.", index + 1),
                    out,
                    struct_counter,
                )?;
            }
        }
        TType::Map => {
            let (key_type, value_type, length) = reader.read_map_header()?;
            let _ = writeln!(out, "<{key_type:?}: {value_type:?}> - {length} items");
            let inner = format!("{indent}  ");
            for _ in 0..length {
                let key = reader.read_primitive(key_type)?;
                print_value(
                    reader,
                    value_type,
                    &inner,
                    &format!("{}:", render(&key)),
                    out,
                    struct_counter,
                )?;
            }
        }
        TType::Struct => {
            let label = struct_label(struct_counter);
            let _ = writeln!(out, "start-{label}");
            let inner = format!("{indent}  ");
            reader.for_each_field(|reader, field_type, field_id| {
                print_value(
                    reader,
                    field_type,
                    &inner,
                    &format!("{field_id} ({field_type:?}):"),
                    out,
                    struct_counter,
                )
            })?;
            let _ = writeln!(out, "{indent}end-{label}");
        }
        TType::BoolTrue => {
            let _ = writeln!(out, "true");
        }
        TType::BoolFalse => {
            let _ = writeln!(out, "false");
        }
        other => {
            let value = reader.read_primitive(other)?;
            let _ = writeln!(out, "{}", render(&value));
        }
    }
    Ok(())
}

fn render(value: &Value) -> String {
    match value {
        Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => format!("{text:?}"),
            Err(_) => format!("0x{}", hex(bytes)),
        },
        Value::Byte(val) => val.to_string(),
        Value::I16(val) => val.to_string(),
        Value::I32(val) => val.to_string(),
        Value::I64(val) => val.to_string(),
        Value::Double(val) => val.to_string(),
        Value::Float(val) => val.to_string(),
        other => format!("{other:?}"),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ThriftWriter;

    #[test]
    fn prints_nested_structs_with_letter_labels() {
        let mut writer = ThriftWriter::new();
        writer.field_i64(1, 42);
        writer.begin_struct(2);
        writer.field_string(1, "hello");
        writer.write_stop();
        writer.write_stop();

        let printed = pretty_print(&writer.into_bytes()).unwrap();
        assert!(printed.contains("start-aa"));
        assert!(printed.contains("start-ab"));
        assert!(printed.contains("42"));
        assert!(printed.contains("\"hello\""));
    }
}
