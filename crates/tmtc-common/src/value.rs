//! Field values and their declared types.
//!
//! This module provides:
//! - [`Value`] - The dynamic value carried by decoded and encoded message fields
//! - [`ValueType`] - The declared type used to parse configuration literals
//! - [`format_value`] - A small `{}`/`{:08}`/`{:x}` template renderer

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Field name → value mapping produced by decoding and consumed by encoding.
pub type FieldMap = BTreeMap<String, Value>;

/// Errors raised while parsing or formatting values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValueError {
    /// A literal could not be parsed as the declared type.
    #[error("cannot parse '{text}' as {value_type}")]
    Parse {
        /// The offending literal.
        text: String,
        /// The declared type.
        value_type: ValueType,
    },

    /// A format template is malformed.
    #[error("invalid format template: {0}")]
    Format(String),
}

// ============================================================================
// Value
// ============================================================================

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer value (enumerated, signed and unsigned integers).
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    String(String),
    /// Boolean value.
    Bool(bool),
    /// Octet string.
    Bytes(Vec<u8>),
    /// Absent value.
    Null,
}

impl Value {
    /// Convert to i64 if possible.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// Convert to f64 if possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Borrow as string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to bool if possible.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow as byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Check if the value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Typed equality.
    ///
    /// Numbers compare numerically whether they were decoded as integers or
    /// reals; every other kind only matches its own kind.
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
                (*a as f64) == *b
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }

    /// Typed equality over optional values, as found when looking up a field map.
    pub fn option_matches(a: Option<&Value>, b: Option<&Value>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => a.matches(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "{}", hex::encode_upper(v)),
            Value::Null => Ok(()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

// ============================================================================
// Value Type
// ============================================================================

/// Declared type of a configuration literal or message field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValueType {
    /// `true`/`false` (also `1`/`0`).
    Boolean,
    /// Enumeration code.
    Enumerated,
    /// Non-negative integer.
    UnsignedInteger,
    /// Signed integer.
    SignedInteger,
    /// Floating point.
    Real,
    /// Text.
    #[default]
    CharacterString,
    /// Hex-encoded bytes.
    OctetString,
}

impl ValueType {
    /// Returns the kebab-case configuration name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValueType::Boolean => "boolean",
            ValueType::Enumerated => "enumerated",
            ValueType::UnsignedInteger => "unsigned-integer",
            ValueType::SignedInteger => "signed-integer",
            ValueType::Real => "real",
            ValueType::CharacterString => "character-string",
            ValueType::OctetString => "octet-string",
        }
    }

    /// Parse a literal according to this type.
    pub fn parse(&self, text: &str) -> Result<Value, ValueError> {
        let err = || ValueError::Parse {
            text: text.to_string(),
            value_type: *self,
        };
        let trimmed = text.trim();
        match self {
            ValueType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(err()),
            },
            ValueType::Enumerated | ValueType::SignedInteger => {
                trimmed.parse::<i64>().map(Value::Integer).map_err(|_| err())
            }
            ValueType::UnsignedInteger => trimmed
                .parse::<u64>()
                .ok()
                .and_then(|v| i64::try_from(v).ok())
                .map(Value::Integer)
                .ok_or_else(err),
            ValueType::Real => trimmed.parse::<f64>().map(Value::Float).map_err(|_| err()),
            ValueType::CharacterString => Ok(Value::String(text.to_string())),
            ValueType::OctetString => hex::decode(trimmed).map(Value::Bytes).map_err(|_| err()),
        }
    }

    /// Parse a literal with an explicit radix. Only integer types honour the radix.
    pub fn parse_radix(&self, text: &str, radix: u32) -> Result<Value, ValueError> {
        match self {
            ValueType::Enumerated | ValueType::SignedInteger | ValueType::UnsignedInteger
                if radix != 10 =>
            {
                i64::from_str_radix(text.trim(), radix)
                    .map(Value::Integer)
                    .map_err(|_| ValueError::Parse {
                        text: text.to_string(),
                        value_type: *self,
                    })
            }
            _ => self.parse(text),
        }
    }

    /// Convert a counter value to this type's natural representation.
    pub fn from_counter(&self, counter: u64) -> Value {
        match self {
            ValueType::Real => Value::Float(counter as f64),
            ValueType::CharacterString => Value::String(counter.to_string()),
            ValueType::Boolean => Value::Bool(counter != 0),
            ValueType::OctetString => Value::Bytes(counter.to_be_bytes().to_vec()),
            _ => Value::Integer(counter as i64),
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Format Templates
// ============================================================================

/// Render a value through a single-placeholder template.
///
/// Supported placeholders: `{}`, `{:N}` (space padded), `{:0N}` (zero padded),
/// and an optional trailing `x`/`X` for hexadecimal integers, e.g. `CMD{:04X}`.
pub fn format_value(template: &str, value: &Value) -> Result<String, ValueError> {
    let bad = || ValueError::Format(template.to_string());
    let open = template.find('{').ok_or_else(bad)?;
    let close = template[open..].find('}').map(|i| open + i).ok_or_else(bad)?;
    let spec = &template[open + 1..close];
    let spec = match spec.strip_prefix(':') {
        Some(s) => s,
        None if spec.is_empty() => spec,
        None => return Err(bad()),
    };

    let (spec, hex_case) = match spec.chars().last() {
        Some('x') => (&spec[..spec.len() - 1], Some(false)),
        Some('X') => (&spec[..spec.len() - 1], Some(true)),
        _ => (spec, None),
    };
    let zero_pad = spec.len() > 1 && spec.starts_with('0');
    let width = if spec.is_empty() {
        0
    } else {
        spec.parse::<usize>().map_err(|_| bad())?
    };

    let body = match (hex_case, value.as_i64()) {
        (Some(false), Some(v)) => format!("{:x}", v),
        (Some(true), Some(v)) => format!("{:X}", v),
        (Some(_), None) => return Err(bad()),
        (None, _) => value.to_string(),
    };

    let padded = if body.len() >= width {
        body
    } else if zero_pad {
        let (sign, digits) = match body.strip_prefix('-') {
            Some(rest) => ("-", rest.to_string()),
            None => ("", body),
        };
        format!("{}{}{}", sign, "0".repeat(width - sign.len() - digits.len()), digits)
    } else {
        format!("{:>width$}", body, width = width)
    };

    Ok(format!("{}{}{}", &template[..open], padded, &template[close + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_types() {
        assert_eq!(ValueType::Boolean.parse("TRUE").unwrap(), Value::Bool(true));
        assert_eq!(ValueType::Enumerated.parse(" 3 ").unwrap(), Value::Integer(3));
        assert_eq!(ValueType::Real.parse("2.5").unwrap(), Value::Float(2.5));
        assert_eq!(
            ValueType::CharacterString.parse("OK").unwrap(),
            Value::String("OK".into())
        );
        assert_eq!(
            ValueType::OctetString.parse("0A0b").unwrap(),
            Value::Bytes(vec![0x0A, 0x0B])
        );
        assert!(ValueType::UnsignedInteger.parse("-1").is_err());
        assert!(ValueType::SignedInteger.parse("abc").is_err());
    }

    #[test]
    fn test_parse_radix() {
        assert_eq!(
            ValueType::UnsignedInteger.parse_radix("ff", 16).unwrap(),
            Value::Integer(255)
        );
        assert_eq!(ValueType::Real.parse_radix("1.5", 16).unwrap(), Value::Float(1.5));
    }

    #[test]
    fn test_typed_matching() {
        assert!(Value::Integer(3).matches(&Value::Float(3.0)));
        assert!(!Value::Integer(3).matches(&Value::String("3".into())));
        assert!(Value::option_matches(None, None));
        assert!(!Value::option_matches(Some(&Value::Integer(1)), None));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value("{}", &Value::Integer(7)).unwrap(), "7");
        assert_eq!(format_value("CMD{:04}", &Value::Integer(7)).unwrap(), "CMD0007");
        assert_eq!(format_value("{:4}|", &Value::Integer(7)).unwrap(), "   7|");
        assert_eq!(format_value("{:02X}", &Value::Integer(255)).unwrap(), "FF");
        assert_eq!(format_value("{:05}", &Value::Integer(-42)).unwrap(), "-0042");
        assert!(format_value("no placeholder", &Value::Integer(1)).is_err());
        assert!(format_value("{:x}", &Value::String("a".into())).is_err());
    }

    #[test]
    fn test_counter_conversion() {
        assert_eq!(ValueType::Real.from_counter(2), Value::Float(2.0));
        assert_eq!(ValueType::Enumerated.from_counter(2), Value::Integer(2));
        assert_eq!(ValueType::CharacterString.from_counter(2), Value::String("2".into()));
    }
}
