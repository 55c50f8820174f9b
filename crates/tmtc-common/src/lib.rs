//! Common types for the TM/TC route engine.
//!
//! This crate holds what every other crate in the workspace agrees on:
//!
//! - **Values**: [`Value`], [`ValueType`] and the [`FieldMap`] carried between
//!   codecs and mappings
//! - **Records**: raw data, parameter samples, event occurrences, activity
//!   progress and activity invocations
//! - **Contracts**: the [`DataProcessor`] sink and the [`TimerService`]

pub mod records;
pub mod sink;
pub mod value;

pub use records::*;
pub use sink::*;
pub use value::*;
