//! The closed set of message codecs a route can use.

use crate::ascii::{AsciiMessageDefinition, SymbolFormat};
use crate::binary::{BinaryLayout, BinaryMessageDefinition};
use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use tmtc_common::FieldMap;

/// Transport encoding of a message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Ascii,
    Binary,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Ascii => write!(f, "ascii"),
            MessageKind::Binary => write!(f, "binary"),
        }
    }
}

/// A message type definition able to identify, decode and encode messages.
#[derive(Debug, Clone)]
pub enum MessageCodec {
    Ascii(AsciiMessageDefinition),
    Binary(BinaryMessageDefinition),
}

impl MessageCodec {
    /// Message type id.
    pub fn id(&self) -> &str {
        match self {
            MessageCodec::Ascii(def) => def.id(),
            MessageCodec::Binary(def) => def.id(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MessageCodec::Ascii(_) => MessageKind::Ascii,
            MessageCodec::Binary(_) => MessageKind::Binary,
        }
    }

    /// Identify a message, returning its secondary id.
    ///
    /// ASCII definitions fail on non UTF-8 input.
    pub fn identify(&self, data: &[u8]) -> CodecResult<Option<String>> {
        match self {
            MessageCodec::Ascii(def) => Ok(def.identify(as_text(data)?)),
            MessageCodec::Binary(def) => Ok(def.identify(data)),
        }
    }

    /// Decode a message previously identified with `secondary_id`.
    pub fn decode(&self, secondary_id: &str, data: &[u8]) -> CodecResult<FieldMap> {
        match self {
            MessageCodec::Ascii(def) => def.decode(as_text(data)?),
            MessageCodec::Binary(def) => def.decode(secondary_id, data),
        }
    }

    /// Encode fields into message bytes.
    pub fn encode(&self, secondary_id: &str, fields: &FieldMap) -> CodecResult<Vec<u8>> {
        match self {
            MessageCodec::Ascii(def) => def.encode(fields).map(String::into_bytes),
            MessageCodec::Binary(def) => def.encode(secondary_id, fields),
        }
    }
}

fn as_text(data: &[u8]) -> CodecResult<&str> {
    std::str::from_utf8(data).map_err(|_| CodecError::InvalidUtf8)
}

/// Declarative form of a message definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum MessageDefinitionConfig {
    Ascii {
        id: String,
        template: String,
        #[serde(default)]
        symbols: Vec<SymbolFormat>,
    },
    Binary {
        id: String,
        layouts: Vec<BinaryLayout>,
    },
}

impl MessageDefinitionConfig {
    pub fn id(&self) -> &str {
        match self {
            MessageDefinitionConfig::Ascii { id, .. } => id,
            MessageDefinitionConfig::Binary { id, .. } => id,
        }
    }

    /// Compile the definition.
    pub fn build(&self) -> CodecResult<MessageCodec> {
        let codec = match self {
            MessageDefinitionConfig::Ascii {
                id,
                template,
                symbols,
            } => MessageCodec::Ascii(AsciiMessageDefinition::new(
                id.clone(),
                template,
                symbols.clone(),
            )?),
            MessageDefinitionConfig::Binary { id, layouts } => MessageCodec::Binary(
                BinaryMessageDefinition::new(id.clone(), layouts.clone())?,
            ),
        };
        log::debug!("Built {} message definition {}", codec.kind(), codec.id());
        Ok(codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmtc_common::Value;

    const DEFINITIONS: &str = r#"
- protocol: ascii
  id: ACK
  template: "ACK ${{seq}}$\n"
  symbols:
    - { name: seq, type: unsigned-integer }
- protocol: binary
  id: TM
  layouts:
    - secondary-id: PING
      markers: [{ field: code, value: 9 }]
      fields: [{ name: code, type: u8 }]
"#;

    fn codecs() -> Vec<MessageCodec> {
        let configs: Vec<MessageDefinitionConfig> = serde_yaml::from_str(DEFINITIONS).unwrap();
        configs.iter().map(|c| c.build().unwrap()).collect()
    }

    #[test]
    fn test_build_from_yaml() {
        let codecs = codecs();
        assert_eq!(codecs[0].id(), "ACK");
        assert_eq!(codecs[0].kind(), MessageKind::Ascii);
        assert_eq!(codecs[1].kind(), MessageKind::Binary);
    }

    #[test]
    fn test_dispatch_through_enum() {
        let codecs = codecs();
        assert_eq!(codecs[0].identify(b"ACK 3\n").unwrap(), Some(String::new()));
        let fields = codecs[0].decode("", b"ACK 3\n").unwrap();
        assert_eq!(fields.get("seq"), Some(&Value::Integer(3)));
        assert_eq!(codecs[0].encode("", &fields).unwrap(), b"ACK 3\n".to_vec());

        assert_eq!(codecs[1].identify(&[9]).unwrap(), Some("PING".to_string()));
        assert_eq!(codecs[1].encode("PING", &FieldMap::new()).unwrap(), vec![9]);
    }

    #[test]
    fn test_ascii_rejects_invalid_utf8() {
        let codecs = codecs();
        assert_eq!(codecs[0].identify(&[0xFF, 0xFE]), Err(CodecError::InvalidUtf8));
    }
}
