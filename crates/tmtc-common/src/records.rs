//! Records exchanged with the processing model.
//!
//! Everything a route produces leaves as one of these plain records: raw
//! message archives, parameter samples, event occurrences and activity
//! progress reports. Activity invocations are the only inbound record.

use crate::value::{FieldMap, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a processing-model entity (parameter, event or activity).
pub type EntityId = u32;

/// Name of the acceptance verification stage.
pub const ACCEPTANCE_STAGE_NAME: &str = "Acceptance";

/// Name of the execution verification stage.
pub const EXECUTION_STAGE_NAME: &str = "Execution";

/// Name of the release report emitted around transmission.
pub const RELEASE_REPORT_NAME: &str = "Release";

/// Raw data type tag used for every archived route message.
pub const ROUTE_MESSAGE_TYPE: &str = "ROUTE_MESSAGE";

// ============================================================================
// Activity States
// ============================================================================

/// Outcome reported for a verification stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityReportState {
    /// Stage completed successfully.
    Ok,
    /// Stage opened, outcome not yet known.
    Pending,
    /// Stage did not complete in time.
    Timeout,
    /// Intermediate, expected progress.
    Expected,
    /// Stage failed.
    Fail,
    /// Outcome cannot be determined.
    Unknown,
    /// Stage completed with an error.
    Error,
    /// Stage completed with an unrecoverable error.
    Fatal,
}

impl ActivityReportState {
    /// FAIL, ERROR and FATAL close a stage unsuccessfully.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ActivityReportState::Fail | ActivityReportState::Error | ActivityReportState::Fatal
        )
    }

    /// Returns the state as an upper-case label.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActivityReportState::Ok => "OK",
            ActivityReportState::Pending => "PENDING",
            ActivityReportState::Timeout => "TIMEOUT",
            ActivityReportState::Expected => "EXPECTED",
            ActivityReportState::Fail => "FAIL",
            ActivityReportState::Unknown => "UNKNOWN",
            ActivityReportState::Error => "ERROR",
            ActivityReportState::Fatal => "FATAL",
        }
    }
}

impl std::fmt::Display for ActivityReportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of an activity occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityOccurrenceState {
    Creation,
    Release,
    Transmission,
    Scheduling,
    Execution,
    Verification,
    Completed,
}

// ============================================================================
// Records
// ============================================================================

/// Quality flag of an archived raw message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quality {
    Good,
    Bad,
    Unknown,
}

/// An archived message as received on a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    /// Unique identifier allocated by the processing model.
    pub id: u64,
    /// Secondary id of the message if not empty, else the message type id.
    pub name: String,
    /// Generation time (arrival time, devices do not timestamp).
    pub generation_time: DateTime<Utc>,
    /// Raw data type tag.
    pub type_name: String,
    /// Route name.
    pub route: String,
    /// Connection source.
    pub source: String,
    pub quality: Quality,
    /// Message bytes as received.
    pub contents: Vec<u8>,
    pub reception_time: DateTime<Utc>,
    /// Name of the handler (driver) that produced the record.
    pub handler: String,
}

/// A parameter value extracted from a message field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSample {
    /// Global parameter id (local id + route entity offset).
    pub id: EntityId,
    pub generation_time: DateTime<Utc>,
    pub reception_time: DateTime<Utc>,
    pub value: Value,
    pub route: String,
}

/// An event raised by a received message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOccurrence {
    /// Global event id (local id + route entity offset).
    pub id: EntityId,
    pub generation_time: DateTime<Utc>,
    pub reception_time: DateTime<Utc>,
    pub qualifier: Option<String>,
    pub route: String,
    pub source: Option<String>,
}

/// Progress of one verification stage of an activity occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityProgress {
    pub activity_id: EntityId,
    pub occurrence_id: u64,
    /// Stage or report name.
    pub name: String,
    pub generation_time: DateTime<Utc>,
    /// Phase the report refers to.
    pub state: ActivityOccurrenceState,
    /// Execution time, when the report carries one.
    pub execution_time: Option<DateTime<Utc>>,
    pub status: ActivityReportState,
    /// Phase the occurrence moves to after this report.
    pub next_state: ActivityOccurrenceState,
    pub result: Option<Value>,
}

/// A request to run an activity through a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityInvocation {
    /// Global activity id.
    pub activity_id: EntityId,
    /// Occurrence id allocated by the processing model.
    pub occurrence_id: u64,
    /// Activity path, for logging.
    #[serde(default)]
    pub path: String,
    /// Activity arguments by name.
    #[serde(default)]
    pub arguments: FieldMap,
}

impl ActivityInvocation {
    /// Create an invocation with no arguments.
    pub fn new(activity_id: EntityId, occurrence_id: u64) -> Self {
        ActivityInvocation {
            activity_id,
            occurrence_id,
            path: String::new(),
            arguments: FieldMap::new(),
        }
    }

    /// Add an argument.
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// Set the activity path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Derive the 64-bit correlation id of this invocation.
    ///
    /// The activity id fills the upper 32 bits and the lower 32 bits of the
    /// occurrence id fill the rest.
    pub fn correlation_id(&self) -> i64 {
        ((self.activity_id as i64) << 32) | ((self.occurrence_id & 0xFFFF_FFFF) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_layout() {
        let inv = ActivityInvocation::new(5, 0x1_0000_0007);
        assert_eq!(inv.correlation_id(), (5i64 << 32) | 7);
    }

    #[test]
    fn test_correlation_ids_distinct() {
        let a = ActivityInvocation::new(1, 2).correlation_id();
        let b = ActivityInvocation::new(2, 1).correlation_id();
        let c = ActivityInvocation::new(1, 3).correlation_id();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_failure_states() {
        assert!(ActivityReportState::Fatal.is_failure());
        assert!(!ActivityReportState::Ok.is_failure());
        assert!(!ActivityReportState::Expected.is_failure());
    }

    #[test]
    fn test_report_state_serde() {
        let s: ActivityReportState = serde_json::from_str("\"OK\"").unwrap();
        assert_eq!(s, ActivityReportState::Ok);
        assert_eq!(serde_json::to_string(&ActivityReportState::Timeout).unwrap(), "\"TIMEOUT\"");
    }
}
