//! Message codecs for TM/TC routes.
//!
//! This crate turns device messages into field maps and back. Two message
//! families are supported:
//!
//! - **ASCII templates**: literal text with `${{name}}$` placeholders, each
//!   typed by a [`SymbolFormat`]
//! - **Binary layouts**: fixed big-endian field sequences, where marker fields
//!   select the secondary id
//!
//! Both are reached through the closed [`MessageCodec`] enum, which is what
//! inbound and outbound mappings hold. The [`framing`] module splits a raw
//! byte stream into messages before identification.
//!
//! # Example
//!
//! ```rust,ignore
//! use tmtc_codec::{AsciiMessageDefinition, SymbolFormat, MessageCodec};
//! use tmtc_common::ValueType;
//!
//! let ack = AsciiMessageDefinition::new(
//!     "ACK",
//!     "ACK ${{seq}}$\\n",
//!     vec![SymbolFormat::new("seq", ValueType::UnsignedInteger)],
//! )?;
//! let codec = MessageCodec::Ascii(ack);
//! let secondary = codec.identify(b"ACK 7\n")?;
//! ```

mod ascii;
mod binary;
mod error;
pub mod framing;
mod message;

pub use ascii::*;
pub use binary::*;
pub use error::*;
pub use framing::{Framer, FramingConfig, LengthFieldConfig};
pub use message::*;
