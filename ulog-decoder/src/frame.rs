//! Frame payload parsers
//!
//! One frame on the wire is a 3-byte header (1-byte kind, u16-LE payload
//! length) followed by the payload. The reader slurps the declared payload
//! into a buffer and hands it to the typed parsers here; each parser reports
//! how many bytes it consumed so the reader can reconcile against the
//! declared length. Because the underlying cursor always advances by exactly
//! the declared length, a malformed payload can never desynchronize the
//! stream.

use crate::schema::{FieldDescriptor, FieldType, MessageSchema};
use crate::types::{FieldValue, Result, UlogError};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};
use std::rc::Rc;

pub(crate) const MESSAGE_TYPE_FORMAT: u8 = b'F';
pub(crate) const MESSAGE_TYPE_DATA: u8 = b'D';
pub(crate) const MESSAGE_TYPE_INFO: u8 = b'I';
pub(crate) const MESSAGE_TYPE_PARAMETER: u8 = b'P';

/// Frame header length: kind byte + u16 payload length
pub(crate) const HDRLEN: u64 = 3;

/// One decoded message, one of the four frame kinds
#[derive(Debug, Clone)]
pub enum LogMessage {
    /// Schema declaration, already registered by the reader
    Format(Rc<MessageSchema>),
    Data(DataRecord),
    Info(KeyValue),
    Parameter(KeyValue),
}

/// A decoded data frame: field values aligned to the schema's field list
#[derive(Debug, Clone)]
pub struct DataRecord {
    pub schema: Rc<MessageSchema>,
    /// Disambiguates multiple concurrent sources of the same schema
    pub instance_id: u8,
    /// Microseconds, taken from the schema field named `timestamp`
    pub timestamp: u64,
    pub values: Vec<FieldValue>,
}

/// Key/value payload of an info or parameter frame
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: FieldValue,
}

/// Parse a format payload: u16-LE schema id + format-declaration string.
/// The string always spans the rest of the payload.
pub(crate) fn parse_format(payload: &[u8]) -> Result<MessageSchema> {
    if payload.len() < 2 {
        return Err(UlogError::MalformedDeclaration(
            "format payload shorter than schema id".to_string(),
        ));
    }
    let id = u16::from_le_bytes([payload[0], payload[1]]);
    let declaration = String::from_utf8_lossy(&payload[2..]);
    MessageSchema::parse(id, &declaration)
}

/// Parse a data payload (schema already looked up from its leading id byte).
///
/// Layout: u8 schema id, u8 instance id, then fields in declared order.
/// Returns the record and the number of payload bytes consumed.
pub(crate) fn parse_data(
    payload: &[u8],
    schema: Rc<MessageSchema>,
) -> io::Result<(DataRecord, usize)> {
    let mut rdr = Cursor::new(payload);
    rdr.read_u8()?; // schema id, consumed by the caller's dispatch
    let instance_id = rdr.read_u8()?;

    let mut timestamp = 0u64;
    let mut values = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let value = read_field(&mut rdr, field, false)?;
        if field.name == "timestamp" {
            if let Some(ts) = value.as_u64() {
                timestamp = ts;
            }
        }
        values.push(value);
    }

    let consumed = rdr.position() as usize;
    Ok((
        DataRecord {
            schema,
            instance_id,
            timestamp,
            values,
        },
        consumed,
    ))
}

/// Parse an info/parameter payload: u8 key length, key string of the form
/// `type key` (same type tokens as schema fields, `char[n]` for strings),
/// then the typed value bytes.
pub(crate) fn parse_key_value(payload: &[u8]) -> Result<(KeyValue, usize)> {
    let mut rdr = Cursor::new(payload);
    let key_len = rdr.read_u8().map_err(|_| {
        UlogError::MalformedDeclaration("empty info/parameter payload".to_string())
    })?;

    let mut key_bytes = vec![0u8; key_len as usize];
    rdr.read_exact(&mut key_bytes).map_err(|_| {
        UlogError::MalformedDeclaration("info/parameter key truncated".to_string())
    })?;
    let key_str = String::from_utf8_lossy(&key_bytes).into_owned();

    let descriptor = FieldDescriptor::parse(&key_str)?;
    let value = read_field(&mut rdr, &descriptor, true).map_err(|_| {
        UlogError::MalformedDeclaration(format!("info/parameter value truncated: {}", key_str))
    })?;

    let consumed = rdr.position() as usize;
    Ok((
        KeyValue {
            key: descriptor.name,
            value,
        },
        consumed,
    ))
}

/// Decode one field per its descriptor. With `string_for_char_array`, a
/// `char[n]` field decodes to a NUL-trimmed `String` (info/parameter values);
/// otherwise arrays decode element-wise.
fn read_field(
    rdr: &mut Cursor<&[u8]>,
    descriptor: &FieldDescriptor,
    string_for_char_array: bool,
) -> io::Result<FieldValue> {
    if !descriptor.is_array() {
        return read_scalar(rdr, descriptor.field_type);
    }

    if descriptor.field_type == FieldType::Char && string_for_char_array {
        let mut bytes = vec![0u8; descriptor.arity];
        rdr.read_exact(&mut bytes)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        return Ok(FieldValue::String(
            String::from_utf8_lossy(&bytes[..end]).into_owned(),
        ));
    }

    let mut elements = Vec::with_capacity(descriptor.arity);
    for _ in 0..descriptor.arity {
        elements.push(read_scalar(rdr, descriptor.field_type)?);
    }
    Ok(FieldValue::Array(elements))
}

fn read_scalar(rdr: &mut Cursor<&[u8]>, ty: FieldType) -> io::Result<FieldValue> {
    let value = match ty {
        FieldType::Int8 => FieldValue::Integer(rdr.read_i8()? as i64),
        FieldType::Int16 => FieldValue::Integer(rdr.read_i16::<LittleEndian>()? as i64),
        FieldType::Int32 => FieldValue::Integer(rdr.read_i32::<LittleEndian>()? as i64),
        FieldType::Int64 => FieldValue::Integer(rdr.read_i64::<LittleEndian>()?),
        FieldType::UInt8 => FieldValue::Unsigned(rdr.read_u8()? as u64),
        FieldType::UInt16 => FieldValue::Unsigned(rdr.read_u16::<LittleEndian>()? as u64),
        FieldType::UInt32 => FieldValue::Unsigned(rdr.read_u32::<LittleEndian>()? as u64),
        FieldType::UInt64 => FieldValue::Unsigned(rdr.read_u64::<LittleEndian>()?),
        FieldType::Float => FieldValue::Float(rdr.read_f32::<LittleEndian>()? as f64),
        FieldType::Double => FieldValue::Float(rdr.read_f64::<LittleEndian>()?),
        FieldType::Bool => FieldValue::Boolean(rdr.read_u8()? != 0),
        FieldType::Char => FieldValue::Char(rdr.read_u8()? as char),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format_payload() {
        let mut payload = vec![7u8, 0];
        payload.extend_from_slice(b"GPS:uint64 timestamp;float[3] vel");
        let schema = parse_format(&payload).unwrap();
        assert_eq!(schema.id, 7);
        assert_eq!(schema.name, "GPS");
        assert_eq!(schema.fields.len(), 2);
    }

    #[test]
    fn test_parse_format_too_short() {
        assert!(parse_format(&[1]).is_err());
    }

    #[test]
    fn test_parse_data_payload() {
        let schema = Rc::new(
            MessageSchema::parse(3, "S:uint64 timestamp;float[2] v;bool armed").unwrap(),
        );

        let mut payload = vec![3u8, 1]; // schema id, instance id
        payload.extend_from_slice(&123u64.to_le_bytes());
        payload.extend_from_slice(&1.5f32.to_le_bytes());
        payload.extend_from_slice(&(-2.0f32).to_le_bytes());
        payload.push(1);

        let (record, consumed) = parse_data(&payload, schema).unwrap();
        assert_eq!(consumed, payload.len());
        assert_eq!(record.instance_id, 1);
        assert_eq!(record.timestamp, 123);
        assert_eq!(record.values[0], FieldValue::Unsigned(123));
        assert_eq!(
            record.values[1],
            FieldValue::Array(vec![FieldValue::Float(1.5), FieldValue::Float(-2.0)])
        );
        assert_eq!(record.values[2], FieldValue::Boolean(true));
    }

    #[test]
    fn test_parse_data_truncated() {
        let schema = Rc::new(MessageSchema::parse(3, "S:uint64 timestamp").unwrap());
        // Declared layout needs 10 bytes, only 4 present
        let result = parse_data(&[3, 0, 1, 2], schema);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_key_value_float() {
        let key = b"float MC_ROLL_P";
        let mut payload = vec![key.len() as u8];
        payload.extend_from_slice(key);
        payload.extend_from_slice(&6.5f32.to_le_bytes());

        let (entry, consumed) = parse_key_value(&payload).unwrap();
        assert_eq!(consumed, payload.len());
        assert_eq!(entry.key, "MC_ROLL_P");
        assert_eq!(entry.value, FieldValue::Float(6.5));
    }

    #[test]
    fn test_parse_key_value_char_array_is_string() {
        let key = b"char[8] sys_name";
        let mut payload = vec![key.len() as u8];
        payload.extend_from_slice(key);
        payload.extend_from_slice(b"PX4\0\0\0\0\0");

        let (entry, _) = parse_key_value(&payload).unwrap();
        assert_eq!(entry.key, "sys_name");
        assert_eq!(entry.value, FieldValue::String("PX4".to_string()));
    }

    #[test]
    fn test_parse_key_value_truncated() {
        assert!(parse_key_value(&[]).is_err());
        assert!(parse_key_value(&[10, b'f']).is_err());

        let key = b"int32 COUNT";
        let mut payload = vec![key.len() as u8];
        payload.extend_from_slice(key);
        payload.push(1); // value needs 4 bytes
        assert!(parse_key_value(&payload).is_err());
    }
}
