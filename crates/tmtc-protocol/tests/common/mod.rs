//! Shared fixtures for route scenario tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tmtc_common::{
    ActivityProgress, ActivityReportState, DataProcessor, EventOccurrence, ParameterSample,
    RawData, TimerService,
};
use tmtc_protocol::{CommandLink, ManualTimer, Route, RouteConfig};

/// Route of a small thermostat-like device.
///
/// - `SET_LEVEL` (activity 1005): acknowledged by `ACK`/`NAK`, executed by `EXE`
/// - `PULSE` (activity 1006): acceptance only
/// - `RESET` (activity 1007): execution only, no correlation
/// - `GET` (activity 1008): no verification, `STATUS` replies to sensor 1
///   are injected
/// - `POLL`: periodic, every 5 seconds
pub const THERMOSTAT: &str = r#"
name: thermostat
entity-offset: 1000
messages:
  - protocol: ascii
    id: SET
    template: "SET ${{seq}}$ ${{level}}$\n"
    symbols:
      - { name: seq, type: unsigned-integer }
      - { name: level, type: signed-integer }
  - protocol: ascii
    id: PULSE
    template: "PULSE ${{seq}}$\n"
    symbols: [{ name: seq, type: unsigned-integer }]
  - protocol: ascii
    id: RESET
    template: "RESET\n"
  - protocol: ascii
    id: GET
    template: "GET ${{sensor}}$\n"
    symbols: [{ name: sensor, type: unsigned-integer }]
  - protocol: ascii
    id: ACK
    template: "ACK ${{seq}}$\n"
    symbols: [{ name: seq, type: unsigned-integer }]
  - protocol: ascii
    id: NAK
    template: "NAK ${{seq}}$\n"
    symbols: [{ name: seq, type: unsigned-integer }]
  - protocol: ascii
    id: EXE
    template: "EXE ${{seq}}$ ${{status}}$\n"
    symbols:
      - { name: seq, type: unsigned-integer }
      - { name: status, type: enumerated }
  - protocol: ascii
    id: READY
    template: "READY\n"
  - protocol: ascii
    id: STATUS
    template: "STATUS ${{value}}$\n"
    symbols: [{ name: value, type: real }]
  - protocol: ascii
    id: TEMP
    template: "TEMP ${{raw}}$ ${{zone}}$\n"
    symbols:
      - { name: raw, type: signed-integer }
      - { name: zone, type: character-string }
  - protocol: binary
    id: TM
    layouts:
      - secondary-id: HK
        markers: [{ field: kind, value: 1 }]
        fields:
          - { name: kind, type: u8 }
          - { name: volts, type: u16 }
      - secondary-id: ALARM
        markers: [{ field: kind, value: 2 }]
        fields:
          - { name: kind, type: u8 }
          - { name: code, type: u8 }
inbound:
  - message: TEMP
    computed:
      - { field: celsius, expression: "raw / 10 - 40" }
    parameters:
      - { field: celsius, entity: 1 }
      - { field: raw, entity: 2 }
    events:
      - { entity: 10, qualifier-reference: zone, condition: { field: raw, value: "1000", type: signed-integer } }
  - message: STATUS
    command-match: { outbound: GET, argument: sensor, value: "1", type: unsigned-integer }
    parameters:
      - { field: value, entity: 21 }
  - message: TM
    secondary-id: HK
    parameters:
      - { field: volts, entity: 30 }
  - message: TM
    secondary-id: ALARM
    events:
      - { entity: 31, qualifier: alarm, source: tm }
outbound:
  - id: SET_LEVEL
    message: SET
    type: activity-driven
    entity: 5
    arguments:
      - { name: Level, field: level }
    auto-increment:
      - { field: seq }
    verification:
      correlation-field: seq
      timeout: 5
      acceptance:
        - { message: ACK, id-field: seq, result: OK }
        - { message: NAK, id-field: seq, result: FAIL }
      execution:
        - { message: EXE, id-field: seq, value-field: status, expected-value: "0", expected-value-type: enumerated, result: OK }
        - { message: EXE, id-field: seq, result: FAIL }
  - id: PULSE
    message: PULSE
    type: activity-driven
    entity: 6
    auto-increment:
      - { field: seq }
    verification:
      correlation-field: seq
      timeout: 5
      acceptance:
        - { message: ACK, id-field: seq, result: OK }
  - id: RESET
    message: RESET
    type: activity-driven
    entity: 7
    verification:
      timeout: 10
      execution:
        - { message: READY, result: OK }
  - id: GET
    message: GET
    type: activity-driven
    entity: 8
  - id: POLL
    message: GET
    type: periodic
    period: 5
    fixed:
      - { field: sensor, value: "1", type: unsigned-integer }
"#;

/// A processing model that records everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    pub timer: Arc<ManualTimer>,
    pub raw: Mutex<Vec<RawData>>,
    pub parameters: Mutex<Vec<ParameterSample>>,
    pub events: Mutex<Vec<EventOccurrence>>,
    pub progress: Mutex<Vec<ActivityProgress>>,
    next_id: AtomicU64,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// (report name, status) of every progress report, in order.
    pub fn reports(&self) -> Vec<(String, ActivityReportState)> {
        self.progress
            .lock()
            .iter()
            .map(|p| (p.name.clone(), p.status))
            .collect()
    }

    pub fn reports_of(&self, occurrence_id: u64) -> Vec<(String, ActivityReportState)> {
        self.progress
            .lock()
            .iter()
            .filter(|p| p.occurrence_id == occurrence_id)
            .map(|p| (p.name.clone(), p.status))
            .collect()
    }

    pub fn clear(&self) {
        self.raw.lock().clear();
        self.parameters.lock().clear();
        self.events.lock().clear();
        self.progress.lock().clear();
    }
}

impl DataProcessor for RecordingSink {
    fn forward_raw_data(&self, raw: RawData) {
        self.raw.lock().push(raw);
    }

    fn forward_parameters(&self, samples: Vec<ParameterSample>) {
        self.parameters.lock().extend(samples);
    }

    fn forward_events(&self, events: Vec<EventOccurrence>) {
        self.events.lock().extend(events);
    }

    fn forward_activity_progress(&self, progress: ActivityProgress) {
        self.progress.lock().push(progress);
    }

    fn next_raw_data_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn timer_service(&self) -> Arc<dyn TimerService> {
        self.timer.clone()
    }

    fn handler_name(&self) -> &str {
        "test-driver"
    }
}

/// A link that records written commands and can be made to fail.
#[derive(Default)]
pub struct MockLink {
    pub written: Mutex<Vec<Vec<u8>>>,
    pub broken: AtomicBool,
}

impl MockLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn written_text(&self) -> Vec<String> {
        self.written
            .lock()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }
}

impl CommandLink for MockLink {
    fn source(&self) -> &str {
        "mock"
    }

    fn write_message(&self, bytes: &[u8]) -> io::Result<()> {
        if self.broken.load(Ordering::Relaxed) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
        }
        self.written.lock().push(bytes.to_vec());
        Ok(())
    }
}

/// Build the thermostat route on a fresh recording sink.
pub fn thermostat() -> (Route, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    let route = RouteConfig::from_yaml_str(THERMOSTAT)
        .unwrap()
        .build(sink.clone())
        .unwrap();
    (route, sink)
}

/// Feed a text frame to the route.
pub fn receive(route: &Route, text: &str) {
    route.on_ascii_message(text, text.as_bytes());
}
