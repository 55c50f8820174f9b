//! Metrics infrastructure for TM/TC routes.
//!
//! This crate declares every metric a route records as a structured [`Metric`]
//! constant, so names and label keys are never typed twice. It re-exports the
//! `metrics` crate; install any recorder before calling [`describe_metrics`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tmtc_metrics::{describe_metrics, metric_defs, RouteLabels};
//!
//! describe_metrics();
//!
//! let labels = RouteLabels::new("PSU-1");
//! metrics::counter!(
//!     metric_defs::MESSAGES_RECEIVED.name,
//!     &labels.with(&[("message", "ACK".to_string())])
//! )
//! .increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// How a metric is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A metric name with the metadata handed to the recorder.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Recorder key, e.g. `tmtc.route.messages_received`.
    pub name: &'static str,
    pub kind: MetricKind,
    pub description: &'static str,
    pub unit: Unit,
    /// Label keys, route first.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn count(
        name: &'static str,
        kind: MetricKind,
        description: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Metric {
            name,
            kind,
            description,
            unit: Unit::Count,
            labels,
        }
    }

    fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.description),
            MetricKind::Histogram => describe_histogram!(self.name, self.unit, self.description),
        }
    }
}

/// All metric definitions recorded by routes.
pub mod metric_defs {
    use super::{Metric, MetricKind, Unit};

    /// Labels present on every route-scoped metric.
    pub const STANDARD_LABELS: &[&str] = &["route"];

    // ========================================================================
    // Inbound Messages
    // ========================================================================

    /// Messages identified and decoded.
    ///
    /// Labels: route, message
    pub const MESSAGES_RECEIVED: Metric = Metric::count(
        "tmtc.route.messages_received",
        MetricKind::Counter,
        "Messages identified and decoded",
        &["route", "message"],
    );

    /// Messages no inbound mapping identified.
    ///
    /// Labels: route, encoding
    pub const MESSAGES_UNIDENTIFIED: Metric = Metric::count(
        "tmtc.route.messages_unidentified",
        MetricKind::Counter,
        "Messages dropped because no definition identified them",
        &["route", "encoding"],
    );

    /// Identified messages that failed to decode.
    ///
    /// Labels: route, message
    pub const DECODE_FAILURES: Metric = Metric::count(
        "tmtc.route.decode_failures",
        MetricKind::Counter,
        "Identified messages dropped because decoding failed",
        &["route", "message"],
    );

    /// Parameter samples forwarded.
    pub const PARAMETER_SAMPLES: Metric = Metric::count(
        "tmtc.route.parameter_samples",
        MetricKind::Counter,
        "Parameter samples forwarded to the processing model",
        &["route"],
    );

    /// Event occurrences forwarded.
    pub const EVENTS_RAISED: Metric = Metric::count(
        "tmtc.route.events_raised",
        MetricKind::Counter,
        "Event occurrences forwarded to the processing model",
        &["route"],
    );

    // ========================================================================
    // Commands
    // ========================================================================

    /// Commands built and encoded.
    ///
    /// Labels: route, mapping
    pub const COMMANDS_ENCODED: Metric = Metric::count(
        "tmtc.command.encoded",
        MetricKind::Counter,
        "Commands assembled and encoded",
        &["route", "mapping"],
    );

    /// Commands that could not be built.
    ///
    /// Labels: route, mapping
    pub const COMMAND_FAILURES: Metric = Metric::count(
        "tmtc.command.failures",
        MetricKind::Counter,
        "Commands aborted while building or transmitting",
        &["route", "mapping"],
    );

    /// Commands written to the device.
    ///
    /// Labels: route, mapping
    pub const COMMANDS_TRANSMITTED: Metric = Metric::count(
        "tmtc.command.transmitted",
        MetricKind::Counter,
        "Commands written to the device connection",
        &["route", "mapping"],
    );

    // ========================================================================
    // Verification
    // ========================================================================

    /// Verification reports, broken down by stage and result.
    ///
    /// Labels: route, stage, result
    pub const VERIFICATION_REPORTS: Metric = Metric::count(
        "tmtc.verification.reports",
        MetricKind::Counter,
        "Verification stage reports emitted",
        &["route", "stage", "result"],
    );

    /// Commands still awaiting verification.
    pub const LIVE_TRACKERS: Metric = Metric::count(
        "tmtc.verification.live_trackers",
        MetricKind::Gauge,
        "Commands with an open verification stage",
        &["route"],
    );

    /// Time from transmission to verification closure.
    ///
    /// Labels: route, mapping
    pub const VERIFICATION_TIME: Metric = Metric {
        name: "tmtc.verification.time_ms",
        kind: MetricKind::Histogram,
        description: "Time from transmission to verification closure in milliseconds",
        unit: Unit::Milliseconds,
        labels: &["route", "mapping"],
    };

    // ========================================================================
    // Device Link
    // ========================================================================

    /// Frames cut from the device byte stream.
    pub const LINK_FRAMES: Metric = Metric::count(
        "tmtc.link.frames",
        MetricKind::Counter,
        "Frames read from the device connection",
        &["route"],
    );

    /// Bytes discarded because the stream could not be framed.
    pub const LINK_FRAMING_ERRORS: Metric = Metric::count(
        "tmtc.link.framing_errors",
        MetricKind::Counter,
        "Framing errors on the device connection",
        &["route"],
    );

    /// Device connections established.
    pub const LINK_CONNECTIONS: Metric = Metric::count(
        "tmtc.link.connections",
        MetricKind::Counter,
        "Device connections established",
        &["route"],
    );

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        // Inbound
        &MESSAGES_RECEIVED,
        &MESSAGES_UNIDENTIFIED,
        &DECODE_FAILURES,
        &PARAMETER_SAMPLES,
        &EVENTS_RAISED,
        // Commands
        &COMMANDS_ENCODED,
        &COMMAND_FAILURES,
        &COMMANDS_TRANSMITTED,
        // Verification
        &VERIFICATION_REPORTS,
        &LIVE_TRACKERS,
        &VERIFICATION_TIME,
        // Device link
        &LINK_FRAMES,
        &LINK_FRAMING_ERRORS,
        &LINK_CONNECTIONS,
    ];
}

/// Labels identifying the route a metric belongs to.
///
/// ```rust
/// use tmtc_metrics::RouteLabels;
///
/// let labels = RouteLabels::new("PSU-1");
/// let extended = labels.with(&[("stage", "Acceptance".to_string())]);
/// assert_eq!(extended.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct RouteLabels {
    pub route: String,
}

impl RouteLabels {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
        }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("route", self.route.clone())]
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describes all route metrics.
///
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_labels() {
        let labels = RouteLabels::new("PSU-1");
        assert_eq!(labels.to_labels(), vec![("route", "PSU-1".to_string())]);
        let extended = labels.with(&[("message", "ACK".to_string())]);
        assert!(extended.contains(&("message", "ACK".to_string())));
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::MESSAGES_RECEIVED.name, "tmtc.route.messages_received");
        assert_eq!(metric_defs::LIVE_TRACKERS.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::VERIFICATION_TIME.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::VERIFICATION_TIME.unit, Unit::Milliseconds);
        assert_eq!(metric_defs::LINK_FRAMES.unit, Unit::Count);
        assert_eq!(metric_defs::VERIFICATION_REPORTS.labels, &["route", "stage", "result"]);
    }

    #[test]
    fn test_all_metrics_have_route_label() {
        assert_eq!(metric_defs::ALL.len(), 14);
        for metric in metric_defs::ALL {
            assert!(metric.labels.starts_with(metric_defs::STANDARD_LABELS), "{}", metric.name);
            assert!(!metric.description.is_empty(), "{}", metric.name);
        }
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }
}
