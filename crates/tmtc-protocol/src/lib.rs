//! Route engine for telemetry and telecommand devices.
//!
//! A [`Route`] ties message codecs to the processing model:
//!
//! - **Inbound**: received frames are identified, decoded, archived as raw
//!   data and mapped to parameter samples and events by [`InboundMapping`]s
//! - **Outbound**: activity invocations are turned into commands by
//!   [`OutboundMapping`]s, transmitted through a [`CommandLink`] and tracked
//! - **Verification**: each transmitted command with rules gets a
//!   [`CommandTracker`] that classifies replies into acceptance and execution
//!   reports, or times out
//!
//! Routes are normally built from YAML through [`RouteConfig`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tmtc_common::DataProcessor;
//! use tmtc_protocol::RouteConfig;
//!
//! fn load(processor: Arc<dyn DataProcessor>) -> Result<(), tmtc_protocol::ConfigError> {
//!     let route = RouteConfig::from_path("thermostat.yaml")?.build(processor)?;
//!     route.on_ascii_message("ACK 3\n", b"ACK 3\n");
//!     Ok(())
//! }
//! ```

mod config;
mod error;
pub mod expr;
mod field;
mod inbound;
mod outbound;
mod route;
pub mod timer;
mod tracker;
mod verification;

pub use config::*;
pub use error::*;
pub use expr::{BuiltinEvaluator, CompiledExpression, ExpressionEvaluator};
pub use field::*;
pub use inbound::*;
pub use outbound::*;
pub use route::*;
pub use timer::{ManualTimer, ThreadTimer};
pub use tracker::*;
pub use verification::*;
