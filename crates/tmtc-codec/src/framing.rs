//! Splitting a device byte stream into messages.
//!
//! Two strategies are supported:
//!
//! - [`DelimiterFramer`]: text lines ended by a delimiter, which stays part
//!   of the frame so templates can include it
//! - [`LengthFieldFramer`]: a header with a length field
//!
//! ```text
//! +-------------+--------------+----------------------+
//! | skip bytes  | length field | remaining bytes      |
//! +-------------+--------------+----------------------+
//!   header_skip   field_length   f(length field value)
//! ```

use crate::error::{CodecError, CodecResult};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};

/// Largest frame accepted before the stream is considered corrupted.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Accumulates bytes and yields delimiter-terminated frames.
#[derive(Debug)]
pub struct DelimiterFramer {
    buffer: BytesMut,
    delimiter: Vec<u8>,
}

impl DelimiterFramer {
    /// Create a framer. An empty delimiter falls back to `\n`.
    pub fn new(delimiter: &[u8]) -> Self {
        let delimiter = if delimiter.is_empty() {
            b"\n".to_vec()
        } else {
            delimiter.to_vec()
        };
        DelimiterFramer {
            buffer: BytesMut::with_capacity(1024),
            delimiter,
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame, delimiter included.
    pub fn decode(&mut self) -> CodecResult<Option<Vec<u8>>> {
        let found = self
            .buffer
            .windows(self.delimiter.len())
            .position(|w| w == self.delimiter.as_slice());
        match found {
            Some(pos) => {
                let frame = self.buffer.split_to(pos + self.delimiter.len()).to_vec();
                Ok(Some(frame))
            }
            None if self.buffer.len() > MAX_FRAME_SIZE => {
                self.buffer.clear();
                Err(CodecError::Framing(format!(
                    "no delimiter within {} bytes",
                    MAX_FRAME_SIZE
                )))
            }
            None => Ok(None),
        }
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Parameters of a length-field header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LengthFieldConfig {
    /// Header bytes before the length field.
    #[serde(default)]
    pub header_skip: usize,
    /// Size of the length field, 1 to 8 bytes.
    pub field_length: usize,
    #[serde(default = "default_big_endian")]
    pub big_endian: bool,
    #[serde(default = "default_mask")]
    pub mask: u64,
    #[serde(default)]
    pub right_shift: u32,
    #[serde(default)]
    pub value_offset: i64,
    /// The length value counts the skipped header bytes.
    #[serde(default)]
    pub consider_skipped: bool,
    /// The length value counts the length field itself.
    #[serde(default)]
    pub consider_field_length: bool,
}

fn default_big_endian() -> bool {
    true
}

fn default_mask() -> u64 {
    u64::MAX
}

impl Default for LengthFieldConfig {
    fn default() -> Self {
        LengthFieldConfig {
            header_skip: 0,
            field_length: 2,
            big_endian: true,
            mask: u64::MAX,
            right_shift: 0,
            value_offset: 0,
            consider_skipped: false,
            consider_field_length: false,
        }
    }
}

impl LengthFieldConfig {
    /// Bytes preceding the payload.
    pub fn header_len(&self) -> usize {
        self.header_skip + self.field_length
    }

    /// Compute the number of bytes following the length field.
    pub fn remaining_len(&self, field: &[u8]) -> CodecResult<usize> {
        let mut raw = 0u64;
        if self.big_endian {
            for &b in field {
                raw = (raw << 8) | b as u64;
            }
        } else {
            for &b in field.iter().rev() {
                raw = (raw << 8) | b as u64;
            }
        }
        let value = (raw & self.mask).checked_shr(self.right_shift).unwrap_or(0);
        let mut length = i64::try_from(value)
            .unwrap_or(i64::MAX)
            .saturating_add(self.value_offset);
        if self.consider_skipped {
            length = length.saturating_sub(self.header_skip as i64);
        }
        if self.consider_field_length {
            length = length.saturating_sub(self.field_length as i64);
        }
        usize::try_from(length)
            .ok()
            .filter(|l| self.header_len() + l <= MAX_FRAME_SIZE)
            .ok_or_else(|| CodecError::Framing(format!("invalid frame length {}", length)))
    }
}

/// Accumulates bytes and yields length-prefixed frames, header included.
#[derive(Debug)]
pub struct LengthFieldFramer {
    buffer: BytesMut,
    config: LengthFieldConfig,
}

impl LengthFieldFramer {
    /// Create a framer. The field length must be between 1 and 8 bytes.
    pub fn new(config: LengthFieldConfig) -> CodecResult<Self> {
        if config.field_length == 0 || config.field_length > 8 {
            return Err(CodecError::Framing(format!(
                "length field of {} bytes not supported",
                config.field_length
            )));
        }
        Ok(LengthFieldFramer {
            buffer: BytesMut::with_capacity(1024),
            config,
        })
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame.
    ///
    /// An invalid length discards the buffered data, since the stream can no
    /// longer be resynchronised.
    pub fn decode(&mut self) -> CodecResult<Option<Vec<u8>>> {
        let header = self.config.header_len();
        if self.buffer.len() < header {
            return Ok(None);
        }
        let remaining = match self
            .config
            .remaining_len(&self.buffer[self.config.header_skip..header])
        {
            Ok(len) => len,
            Err(e) => {
                self.buffer.clear();
                return Err(e);
            }
        };
        if self.buffer.len() < header + remaining {
            return Ok(None);
        }
        let frame = self.buffer.split_to(header + remaining).to_vec();
        Ok(Some(frame))
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Framing strategy of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum FramingConfig {
    Delimiter {
        #[serde(default = "default_delimiter")]
        delimiter: String,
    },
    LengthField(LengthFieldConfig),
}

fn default_delimiter() -> String {
    "\n".to_string()
}

impl Default for FramingConfig {
    fn default() -> Self {
        FramingConfig::Delimiter {
            delimiter: default_delimiter(),
        }
    }
}

/// A framer of either strategy.
#[derive(Debug)]
pub enum Framer {
    Delimiter(DelimiterFramer),
    LengthField(LengthFieldFramer),
}

impl Framer {
    /// Build the framer for a configuration.
    pub fn from_config(config: &FramingConfig) -> CodecResult<Self> {
        match config {
            FramingConfig::Delimiter { delimiter } => Ok(Framer::Delimiter(
                DelimiterFramer::new(delimiter.as_bytes()),
            )),
            FramingConfig::LengthField(cfg) => {
                Ok(Framer::LengthField(LengthFieldFramer::new(*cfg)?))
            }
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        match self {
            Framer::Delimiter(f) => f.push(data),
            Framer::LengthField(f) => f.push(data),
        }
    }

    pub fn decode(&mut self) -> CodecResult<Option<Vec<u8>>> {
        match self {
            Framer::Delimiter(f) => f.decode(),
            Framer::LengthField(f) => f.decode(),
        }
    }

    /// Whether frames carry text.
    pub fn is_text(&self) -> bool {
        matches!(self, Framer::Delimiter(_))
    }
}
