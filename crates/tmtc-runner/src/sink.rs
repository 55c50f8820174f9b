//! JSON-lines output of the records a route produces.
//!
//! Every record becomes one line tagged with its kind:
//!
//! ```text
//! {"kind":"raw-data","id":0,"name":"TEMP","contents":"54454D50...",...}
//! {"kind":"parameter","id":1001,"value":21.5,...}
//! {"kind":"activity-progress","name":"Acceptance","status":"OK",...}
//! ```

use crate::error::RunnerResult;
use crate::executor::Executor;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tmtc_common::{
    ActivityProgress, DataProcessor, EventOccurrence, ParameterSample, RawData, Task,
    TimerService,
};
use tracing::error;

/// A [`DataProcessor`] writing each record as a JSON line.
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
    next_raw_id: AtomicU64,
    timer: Arc<dyn TimerService>,
    handler: String,
    executor: Option<Executor>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Create a sink that runs deferred work on the calling thread.
    pub fn new(out: W, timer: Arc<dyn TimerService>, handler: impl Into<String>) -> Self {
        JsonLinesSink {
            out: Mutex::new(out),
            next_raw_id: AtomicU64::new(0),
            timer,
            handler: handler.into(),
            executor: None,
        }
    }

    /// Run deferred work (activity transmissions, timeouts) on `executor`.
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    fn write_record<T: Serialize>(&self, kind: &str, record: &T) -> RunnerResult<()> {
        let mut value = serde_json::to_value(record)?;
        if let JsonValue::Object(map) = &mut value {
            map.insert("kind".to_string(), JsonValue::from(kind));
        }
        let line = serde_json::to_string(&value)?;
        let mut out = self.out.lock();
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }

    fn emit<T: Serialize>(&self, kind: &str, record: &T) {
        if let Err(e) = self.write_record(kind, record) {
            error!("Failed to write {} record: {}", kind, e);
        }
    }
}

impl<W: Write + Send> std::fmt::Debug for JsonLinesSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("handler", &self.handler)
            .field("next_raw_id", &self.next_raw_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<W: Write + Send> DataProcessor for JsonLinesSink<W> {
    fn forward_raw_data(&self, raw: RawData) {
        let mut value = match serde_json::to_value(&raw) {
            Ok(value) => value,
            Err(e) => {
                error!("Failed to serialize raw data {}: {}", raw.name, e);
                return;
            }
        };
        if let JsonValue::Object(map) = &mut value {
            map.insert(
                "contents".to_string(),
                JsonValue::from(hex::encode_upper(&raw.contents)),
            );
        }
        self.emit("raw-data", &value);
    }

    fn forward_parameters(&self, samples: Vec<ParameterSample>) {
        for sample in &samples {
            self.emit("parameter", sample);
        }
    }

    fn forward_events(&self, events: Vec<EventOccurrence>) {
        for event in &events {
            self.emit("event", event);
        }
    }

    fn forward_activity_progress(&self, progress: ActivityProgress) {
        self.emit("activity-progress", &progress);
    }

    fn next_raw_data_id(&self) -> u64 {
        self.next_raw_id.fetch_add(1, Ordering::Relaxed)
    }

    fn timer_service(&self) -> Arc<dyn TimerService> {
        Arc::clone(&self.timer)
    }

    fn handler_name(&self) -> &str {
        &self.handler
    }

    fn execute(&self, task: Task) {
        match &self.executor {
            Some(executor) => executor.execute(task),
            None => task(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tmtc_common::{ActivityOccurrenceState, ActivityReportState, Quality, Value};
    use tmtc_protocol::ManualTimer;

    /// Write target shared with the test.
    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn lines(&self) -> Vec<JsonValue> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn sink() -> (JsonLinesSink<Buffer>, Buffer) {
        let buffer = Buffer::default();
        let sink = JsonLinesSink::new(buffer.clone(), Arc::new(ManualTimer::new()), "tmtcd");
        (sink, buffer)
    }

    #[test]
    fn test_raw_data_contents_as_hex() {
        let (sink, buffer) = sink();
        let now = Utc::now();
        sink.forward_raw_data(RawData {
            id: sink.next_raw_data_id(),
            name: "ACK".into(),
            generation_time: now,
            type_name: "ACK".into(),
            route: "psu".into(),
            source: "tcp".into(),
            quality: Quality::Good,
            contents: b"ACK\n".to_vec(),
            reception_time: now,
            handler: sink.handler_name().to_string(),
        });
        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["kind"], "raw-data");
        assert_eq!(lines[0]["contents"], "41434B0A");
        assert_eq!(lines[0]["handler"], "tmtcd");
        assert_eq!(lines[0]["id"], 0);
    }

    #[test]
    fn test_one_line_per_record() {
        let (sink, buffer) = sink();
        let now = Utc::now();
        let sample = |id| ParameterSample {
            id,
            generation_time: now,
            reception_time: now,
            value: Value::Float(21.5),
            route: "psu".into(),
        };
        sink.forward_parameters(vec![sample(1001), sample(1002)]);
        sink.forward_activity_progress(ActivityProgress {
            activity_id: 5,
            occurrence_id: 9,
            name: "Acceptance".into(),
            generation_time: now,
            state: ActivityOccurrenceState::Transmission,
            execution_time: None,
            status: ActivityReportState::Ok,
            next_state: ActivityOccurrenceState::Execution,
            result: None,
        });

        let lines = buffer.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "parameter");
        assert_eq!(lines[1]["id"], 1002);
        assert_eq!(lines[1]["value"], 21.5);
        assert_eq!(lines[2]["kind"], "activity-progress");
        assert_eq!(lines[2]["occurrence_id"], 9);
    }

    #[test]
    fn test_raw_data_ids_increase() {
        let (sink, _) = sink();
        assert_eq!(sink.next_raw_data_id(), 0);
        assert_eq!(sink.next_raw_data_id(), 1);
    }
}
