//! ASCII template messages.
//!
//! A template is literal text with `${{name}}$` placeholders, e.g.
//! `"SET ${{device}}$ ${{value}}$\r\n"`. Each placeholder needs a
//! [`SymbolFormat`] describing how its text is parsed and produced.
//!
//! Identification only looks at the literals: the leading literal must
//! prefix the message and every later literal must follow in order.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tmtc_common::{format_value, FieldMap, Value, ValueType};

/// Placeholder opening marker.
pub const VAR_PREFIX: &str = "${{";

/// Placeholder closing marker.
pub const VAR_POSTFIX: &str = "}}$";

/// Radix used for integer symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Radix {
    Bin,
    Oct,
    #[default]
    Dec,
    Hex,
}

impl Radix {
    /// Numeric base.
    pub const fn base(&self) -> u32 {
        match self {
            Radix::Bin => 2,
            Radix::Oct => 8,
            Radix::Dec => 10,
            Radix::Hex => 16,
        }
    }
}

/// Type and text format of one template placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SymbolFormat {
    /// Placeholder name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Radix for integer types.
    #[serde(default)]
    pub radix: Radix,
    /// Optional format template used when encoding, e.g. `{:04}`.
    #[serde(default)]
    pub encode_format: Option<String>,
    /// Text written when the value is missing or null.
    #[serde(default)]
    pub encode_null: Option<String>,
    /// Decode empty text as null instead of parsing it.
    #[serde(default)]
    pub decode_empty_null: bool,
}

impl SymbolFormat {
    /// Create a decimal symbol with no special formatting.
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        SymbolFormat {
            name: name.into(),
            value_type,
            radix: Radix::Dec,
            encode_format: None,
            encode_null: None,
            decode_empty_null: false,
        }
    }

    /// Parse placeholder text.
    pub fn decode(&self, text: &str) -> CodecResult<Value> {
        if text.is_empty() && self.decode_empty_null {
            return Ok(Value::Null);
        }
        Ok(self.value_type.parse_radix(text, self.radix.base())?)
    }

    /// Produce placeholder text.
    pub fn encode(&self, value: Option<&Value>) -> CodecResult<String> {
        let value = match value {
            Some(v) if !v.is_null() => v,
            _ => {
                return self
                    .encode_null
                    .clone()
                    .ok_or_else(|| CodecError::MissingField(self.name.clone()))
            }
        };
        if let Some(template) = &self.encode_format {
            return Ok(format_value(template, value)?);
        }
        let integer_type = matches!(
            self.value_type,
            ValueType::Enumerated | ValueType::SignedInteger | ValueType::UnsignedInteger
        );
        match (integer_type, self.radix, value.as_i64()) {
            (true, Radix::Hex, Some(v)) => Ok(format!("{:X}", v)),
            (true, Radix::Oct, Some(v)) => Ok(format!("{:o}", v)),
            (true, Radix::Bin, Some(v)) => Ok(format!("{:b}", v)),
            _ => Ok(value.to_string()),
        }
    }
}

/// A compiled ASCII template message.
#[derive(Debug, Clone)]
pub struct AsciiMessageDefinition {
    id: String,
    template: String,
    /// Literal text around placeholders; always one more than `variables`.
    literals: Vec<String>,
    variables: Vec<String>,
    symbols: HashMap<String, SymbolFormat>,
}

impl AsciiMessageDefinition {
    /// Compile a template.
    ///
    /// Escaped `\n`, `\r` and `\t` sequences in the template are turned into the
    /// control characters they name. Every placeholder must have a symbol, and
    /// two placeholders may not touch, since their boundary would be ambiguous.
    pub fn new(
        id: impl Into<String>,
        template: &str,
        symbols: Vec<SymbolFormat>,
    ) -> CodecResult<Self> {
        let id = id.into();
        let invalid = |reason: String| CodecError::InvalidDefinition {
            id: id.clone(),
            reason,
        };
        let template = template
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t");

        let mut literals = Vec::new();
        let mut variables = Vec::new();
        let mut rest = template.as_str();
        while let Some(start) = rest.find(VAR_PREFIX) {
            let after = &rest[start + VAR_PREFIX.len()..];
            let end = after
                .find(VAR_POSTFIX)
                .ok_or_else(|| invalid("unterminated placeholder".to_string()))?;
            literals.push(rest[..start].to_string());
            variables.push(after[..end].to_string());
            rest = &after[end + VAR_POSTFIX.len()..];
        }
        literals.push(rest.to_string());

        let inner = literals.get(1..literals.len().saturating_sub(1)).unwrap_or_default();
        if inner.iter().any(|l| l.is_empty()) {
            return Err(invalid("adjacent placeholders".to_string()));
        }

        let symbols: HashMap<String, SymbolFormat> =
            symbols.into_iter().map(|s| (s.name.clone(), s)).collect();
        if let Some(missing) = variables.iter().find(|v| !symbols.contains_key(*v)) {
            return Err(invalid(format!("no symbol format for '{}'", missing)));
        }

        Ok(AsciiMessageDefinition {
            id,
            template,
            literals,
            variables,
            symbols,
        })
    }

    /// Message type id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The template with escapes resolved.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Placeholder names in template order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Check whether the text follows this template.
    ///
    /// ASCII messages carry no secondary id, so a match yields `""`.
    pub fn identify(&self, text: &str) -> Option<String> {
        if !text.starts_with(self.literals[0].as_str()) {
            return None;
        }
        let mut pos = self.literals[0].len();
        for literal in self.literals[1..].iter().filter(|l| !l.is_empty()) {
            pos += text[pos..].find(literal.as_str())? + literal.len();
        }
        Some(String::new())
    }

    /// Extract placeholder values from the text.
    pub fn decode(&self, text: &str) -> CodecResult<FieldMap> {
        let mismatch = |reason: &str| CodecError::Mismatch {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if !text.starts_with(self.literals[0].as_str()) {
            return Err(mismatch("leading literal not found"));
        }
        let mut pos = self.literals[0].len();
        let mut fields = FieldMap::new();
        for (i, variable) in self.variables.iter().enumerate() {
            let next = &self.literals[i + 1];
            let end = if next.is_empty() {
                text.len()
            } else {
                pos + text[pos..]
                    .find(next.as_str())
                    .ok_or_else(|| mismatch("literal not found"))?
            };
            // Symbols are guaranteed by construction.
            if let Some(symbol) = self.symbols.get(variable) {
                fields.insert(variable.clone(), symbol.decode(&text[pos..end])?);
            }
            pos = end + next.len();
        }
        Ok(fields)
    }

    /// Produce the message text from field values.
    pub fn encode(&self, fields: &FieldMap) -> CodecResult<String> {
        let mut out = String::with_capacity(self.template.len());
        out.push_str(&self.literals[0]);
        for (i, variable) in self.variables.iter().enumerate() {
            if let Some(symbol) = self.symbols.get(variable) {
                out.push_str(&symbol.encode(fields.get(variable))?);
            }
            out.push_str(&self.literals[i + 1]);
        }
        Ok(out)
    }
}
