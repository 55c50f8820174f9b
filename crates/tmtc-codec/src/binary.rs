//! Fixed-layout binary messages.
//!
//! A binary definition is a list of layouts, one per secondary id. Each layout
//! is a sequence of big-endian typed fields. Some integer fields act as
//! markers: a buffer belongs to a layout when its length equals the layout
//! size and every marker field holds the expected value.
//!
//! ```text
//! +------+------+----------+-----------------+
//! | type | code | seq (u16)| payload fields  |
//! +------+------+----------+-----------------+
//!   ^ marker fields select the secondary id
//! ```

use crate::error::{CodecError, CodecResult};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tmtc_common::{FieldMap, Value};

/// Wire representation of a binary field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BinaryFieldKind {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Raw bytes, zero padded to `length`.
    Bytes { length: usize },
    /// UTF-8 text, NUL padded to `length`.
    Text { length: usize },
}

impl BinaryFieldKind {
    /// Encoded size in bytes.
    pub const fn size(&self) -> usize {
        match self {
            BinaryFieldKind::U8 | BinaryFieldKind::I8 => 1,
            BinaryFieldKind::U16 | BinaryFieldKind::I16 => 2,
            BinaryFieldKind::U32 | BinaryFieldKind::I32 | BinaryFieldKind::F32 => 4,
            BinaryFieldKind::U64 | BinaryFieldKind::I64 | BinaryFieldKind::F64 => 8,
            BinaryFieldKind::Bytes { length } | BinaryFieldKind::Text { length } => *length,
        }
    }

    /// Whether the field holds an integer.
    pub const fn is_integer(&self) -> bool {
        !matches!(
            self,
            BinaryFieldKind::F32
                | BinaryFieldKind::F64
                | BinaryFieldKind::Bytes { .. }
                | BinaryFieldKind::Text { .. }
        )
    }

    fn read(&self, buf: &mut &[u8]) -> CodecResult<Value> {
        let value = match self {
            BinaryFieldKind::U8 => Value::Integer(buf.get_u8() as i64),
            BinaryFieldKind::U16 => Value::Integer(buf.get_u16() as i64),
            BinaryFieldKind::U32 => Value::Integer(buf.get_u32() as i64),
            BinaryFieldKind::U64 => {
                let raw = buf.get_u64();
                let value = i64::try_from(raw).map_err(|_| CodecError::ValueOutOfRange {
                    field: String::new(),
                    reason: format!("{} exceeds i64", raw),
                })?;
                Value::Integer(value)
            }
            BinaryFieldKind::I8 => Value::Integer(buf.get_i8() as i64),
            BinaryFieldKind::I16 => Value::Integer(buf.get_i16() as i64),
            BinaryFieldKind::I32 => Value::Integer(buf.get_i32() as i64),
            BinaryFieldKind::I64 => Value::Integer(buf.get_i64()),
            BinaryFieldKind::F32 => Value::Float(buf.get_f32() as f64),
            BinaryFieldKind::F64 => Value::Float(buf.get_f64()),
            BinaryFieldKind::Bytes { length } => {
                let bytes = buf[..*length].to_vec();
                buf.advance(*length);
                Value::Bytes(bytes)
            }
            BinaryFieldKind::Text { length } => {
                let raw = &buf[..*length];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let text = std::str::from_utf8(&raw[..end])
                    .map_err(|_| CodecError::InvalidUtf8)?
                    .to_string();
                buf.advance(*length);
                Value::String(text)
            }
        };
        Ok(value)
    }

    fn write(&self, name: &str, value: &Value, out: &mut Vec<u8>) -> CodecResult<()> {
        let out_of_range = |reason: String| CodecError::ValueOutOfRange {
            field: name.to_string(),
            reason,
        };
        if self.is_integer() {
            let v = value
                .as_i64()
                .ok_or_else(|| out_of_range(format!("'{}' is not an integer", value)))?;
            let range = || out_of_range(format!("{} does not fit {:?}", v, self));
            match self {
                BinaryFieldKind::U8 => out.put_u8(u8::try_from(v).map_err(|_| range())?),
                BinaryFieldKind::U16 => out.put_u16(u16::try_from(v).map_err(|_| range())?),
                BinaryFieldKind::U32 => out.put_u32(u32::try_from(v).map_err(|_| range())?),
                BinaryFieldKind::U64 => out.put_u64(u64::try_from(v).map_err(|_| range())?),
                BinaryFieldKind::I8 => out.put_i8(i8::try_from(v).map_err(|_| range())?),
                BinaryFieldKind::I16 => out.put_i16(i16::try_from(v).map_err(|_| range())?),
                BinaryFieldKind::I32 => out.put_i32(i32::try_from(v).map_err(|_| range())?),
                _ => out.put_i64(v),
            }
            return Ok(());
        }
        match self {
            BinaryFieldKind::F32 | BinaryFieldKind::F64 => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| out_of_range(format!("'{}' is not a number", value)))?;
                if matches!(self, BinaryFieldKind::F32) {
                    out.put_f32(v as f32);
                } else {
                    out.put_f64(v);
                }
            }
            BinaryFieldKind::Bytes { length } | BinaryFieldKind::Text { length } => {
                let data: Vec<u8> = match value {
                    Value::Bytes(b) => b.clone(),
                    other => other.to_string().into_bytes(),
                };
                if data.len() > *length {
                    return Err(out_of_range(format!(
                        "{} bytes exceed field length {}",
                        data.len(),
                        length
                    )));
                }
                out.put_slice(&data);
                out.put_bytes(0, length - data.len());
            }
            _ => {}
        }
        Ok(())
    }
}

/// A named field within a layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryField {
    pub name: String,
    #[serde(flatten)]
    pub kind: BinaryFieldKind,
}

impl BinaryField {
    pub fn new(name: impl Into<String>, kind: BinaryFieldKind) -> Self {
        BinaryField {
            name: name.into(),
            kind,
        }
    }
}

/// An integer field value that identifies a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryMarker {
    pub field: String,
    pub value: i64,
}

/// Layout of one secondary id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BinaryLayout {
    /// Secondary id reported when this layout matches.
    #[serde(default)]
    pub secondary_id: String,
    #[serde(default)]
    pub markers: Vec<BinaryMarker>,
    pub fields: Vec<BinaryField>,
}

impl BinaryLayout {
    /// Total encoded size.
    pub fn size(&self) -> usize {
        self.fields.iter().map(|f| f.kind.size()).sum()
    }

    fn read_fields(&self, id: &str, data: &[u8]) -> CodecResult<FieldMap> {
        let expected = self.size();
        if data.len() < expected {
            return Err(CodecError::TooShort {
                expected,
                actual: data.len(),
            });
        }
        if data.len() > expected {
            return Err(CodecError::Mismatch {
                id: id.to_string(),
                reason: format!("{} trailing bytes", data.len() - expected),
            });
        }
        let mut buf = data;
        let mut fields = FieldMap::new();
        for field in &self.fields {
            let value = field.kind.read(&mut buf).map_err(|e| match e {
                CodecError::ValueOutOfRange { reason, .. } => CodecError::ValueOutOfRange {
                    field: field.name.clone(),
                    reason,
                },
                other => other,
            })?;
            fields.insert(field.name.clone(), value);
        }
        Ok(fields)
    }

    fn matches(&self, data: &[u8]) -> bool {
        if data.len() != self.size() {
            return false;
        }
        let mut offset = 0;
        let mut pending = self.markers.len();
        for field in &self.fields {
            let size = field.kind.size();
            if let Some(marker) = self.markers.iter().find(|m| m.field == field.name) {
                let mut slice = &data[offset..offset + size];
                match field.kind.read(&mut slice) {
                    Ok(Value::Integer(v)) if v == marker.value => pending -= 1,
                    _ => return false,
                }
            }
            offset += size;
        }
        pending == 0
    }
}

/// A binary message type with one or more fixed layouts.
#[derive(Debug, Clone)]
pub struct BinaryMessageDefinition {
    id: String,
    layouts: Vec<BinaryLayout>,
}

impl BinaryMessageDefinition {
    /// Validate and build a definition.
    pub fn new(id: impl Into<String>, layouts: Vec<BinaryLayout>) -> CodecResult<Self> {
        let id = id.into();
        let invalid = |reason: String| CodecError::InvalidDefinition {
            id: id.clone(),
            reason,
        };
        if layouts.is_empty() {
            return Err(invalid("no layouts".to_string()));
        }
        let mut seen = HashSet::new();
        for layout in &layouts {
            if !seen.insert(layout.secondary_id.as_str()) {
                return Err(invalid(format!(
                    "duplicate secondary id '{}'",
                    layout.secondary_id
                )));
            }
            let mut names = HashSet::new();
            for field in &layout.fields {
                if !names.insert(field.name.as_str()) {
                    return Err(invalid(format!("duplicate field '{}'", field.name)));
                }
            }
            for marker in &layout.markers {
                match layout.fields.iter().find(|f| f.name == marker.field) {
                    Some(f) if f.kind.is_integer() => {}
                    Some(_) => {
                        return Err(invalid(format!(
                            "marker field '{}' is not an integer",
                            marker.field
                        )))
                    }
                    None => {
                        return Err(invalid(format!(
                            "marker field '{}' not in layout",
                            marker.field
                        )))
                    }
                }
            }
        }
        Ok(BinaryMessageDefinition { id, layouts })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn layouts(&self) -> &[BinaryLayout] {
        &self.layouts
    }

    fn layout(&self, secondary_id: &str) -> CodecResult<&BinaryLayout> {
        self.layouts
            .iter()
            .find(|l| l.secondary_id == secondary_id)
            .ok_or_else(|| CodecError::UnknownSecondaryId {
                id: self.id.clone(),
                secondary_id: secondary_id.to_string(),
            })
    }

    /// Return the secondary id of the first layout the buffer fits.
    pub fn identify(&self, data: &[u8]) -> Option<String> {
        self.layouts
            .iter()
            .find(|l| l.matches(data))
            .map(|l| l.secondary_id.clone())
    }

    /// Decode the buffer with the layout of `secondary_id`.
    pub fn decode(&self, secondary_id: &str, data: &[u8]) -> CodecResult<FieldMap> {
        self.layout(secondary_id)?.read_fields(&self.id, data)
    }

    /// Encode the fields with the layout of `secondary_id`.
    ///
    /// Marker fields may be omitted; their marker value is written instead.
    pub fn encode(&self, secondary_id: &str, fields: &FieldMap) -> CodecResult<Vec<u8>> {
        let layout = self.layout(secondary_id)?;
        let mut out = Vec::with_capacity(layout.size());
        for field in &layout.fields {
            let marker = layout
                .markers
                .iter()
                .find(|m| m.field == field.name)
                .map(|m| Value::Integer(m.value));
            let value = fields
                .get(&field.name)
                .or(marker.as_ref())
                .ok_or_else(|| CodecError::MissingField(field.name.clone()))?;
            field.kind.write(&field.name, value, &mut out)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry_definition() -> BinaryMessageDefinition {
        let header = |code: i64| BinaryMarker {
            field: "code".into(),
            value: code,
        };
        BinaryMessageDefinition::new(
            "TM",
            vec![
                BinaryLayout {
                    secondary_id: "ACK".into(),
                    markers: vec![header(1)],
                    fields: vec![
                        BinaryField::new("code", BinaryFieldKind::U8),
                        BinaryField::new("seq", BinaryFieldKind::U16),
                    ],
                },
                BinaryLayout {
                    secondary_id: "HK".into(),
                    markers: vec![header(2)],
                    fields: vec![
                        BinaryField::new("code", BinaryFieldKind::U8),
                        BinaryField::new("temp", BinaryFieldKind::F32),
                        BinaryField::new("name", BinaryFieldKind::Text { length: 4 }),
                    ],
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_identify_by_marker() {
        let def = telemetry_definition();
        assert_eq!(def.identify(&[1, 0, 7]), Some("ACK".to_string()));
        assert_eq!(def.identify(&[2, 0x41, 0xA0, 0, 0, b'P', b'S', b'U', 0]), Some("HK".to_string()));
        assert_eq!(def.identify(&[3, 0, 7]), None);
        assert_eq!(def.identify(&[1, 0]), None);
    }

    #[test]
    fn test_decode_fields() {
        let def = telemetry_definition();
        let fields = def
            .decode("HK", &[2, 0x41, 0xA0, 0, 0, b'P', b'S', b'U', 0])
            .unwrap();
        assert_eq!(fields.get("code"), Some(&Value::Integer(2)));
        assert_eq!(fields.get("temp"), Some(&Value::Float(20.0)));
        assert_eq!(fields.get("name"), Some(&Value::String("PSU".into())));
    }

    #[test]
    fn test_encode_fills_markers() {
        let def = telemetry_definition();
        let mut fields = FieldMap::new();
        fields.insert("seq".into(), Value::Integer(0x0102));
        assert_eq!(def.encode("ACK", &fields).unwrap(), vec![1, 1, 2]);
    }

    #[test]
    fn test_encode_range_and_missing() {
        let def = telemetry_definition();
        let mut fields = FieldMap::new();
        fields.insert("seq".into(), Value::Integer(70_000));
        assert!(matches!(
            def.encode("ACK", &fields),
            Err(CodecError::ValueOutOfRange { .. })
        ));
        assert_eq!(
            def.encode("HK", &FieldMap::new()),
            Err(CodecError::MissingField("temp".into()))
        );
        assert!(matches!(
            def.encode("NOPE", &FieldMap::new()),
            Err(CodecError::UnknownSecondaryId { .. })
        ));
    }

    #[test]
    fn test_decode_length_checks() {
        let def = telemetry_definition();
        assert_eq!(
            def.decode("ACK", &[1, 0]),
            Err(CodecError::TooShort {
                expected: 3,
                actual: 2
            })
        );
        assert!(matches!(
            def.decode("ACK", &[1, 0, 0, 0]),
            Err(CodecError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_definitions() {
        assert!(BinaryMessageDefinition::new("X", vec![]).is_err());
        let layout = BinaryLayout {
            secondary_id: String::new(),
            markers: vec![BinaryMarker {
                field: "missing".into(),
                value: 0,
            }],
            fields: vec![BinaryField::new("a", BinaryFieldKind::U8)],
        };
        assert!(BinaryMessageDefinition::new("X", vec![layout]).is_err());
    }

    #[test]
    fn test_layout_from_yaml() {
        let layout: BinaryLayout = serde_yaml::from_str(
            "secondary-id: ACK\nmarkers:\n  - { field: code, value: 1 }\nfields:\n  - { name: code, type: u8 }\n  - { name: tag, type: text, length: 3 }\n",
        )
        .unwrap();
        assert_eq!(layout.size(), 4);
        assert_eq!(layout.fields[1].kind, BinaryFieldKind::Text { length: 3 });
    }
}
