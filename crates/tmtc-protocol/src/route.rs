//! The route: one device conversation with its mappings and live trackers.
//!
//! Inbound path: identify, decode, archive, inject, verify. Outbound path:
//! select a mapping, encode, release, transmit, track.

use crate::error::{ConfigError, ConfigResult, RouteError, RouteResult};
use crate::inbound::InboundMapping;
use crate::outbound::{EncodedCommand, OutboundKind, OutboundMapping};
use crate::tracker::{CommandTracker, TrackerOutcome};
use crate::verification::MessageKey;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tmtc_codec::{MessageCodec, MessageKind};
use tmtc_common::{
    ActivityInvocation, ActivityOccurrenceState, ActivityProgress, ActivityReportState,
    DataProcessor, EntityId, FieldMap, Quality, RawData, Task, RELEASE_REPORT_NAME,
    ROUTE_MESSAGE_TYPE,
};
use tmtc_metrics::{metric_defs, RouteLabels};
use tracing::{debug, error, trace, warn};

/// Write side of the connection a route talks through.
pub trait CommandLink: Send + Sync {
    /// Connection name stamped on raw data.
    fn source(&self) -> &str;

    /// Write one encoded command.
    fn write_message(&self, bytes: &[u8]) -> std::io::Result<()>;
}

/// A configured route. Cloning shares the same route.
#[derive(Clone)]
pub struct Route {
    inner: Arc<RouteInner>,
}

struct RouteInner {
    name: String,
    entity_offset: EntityId,
    labels: RouteLabels,
    /// Codecs tried during identification, in order.
    codecs: Vec<Arc<MessageCodec>>,
    inbound: HashMap<MessageKey, InboundMapping>,
    outbound: Vec<Arc<OutboundMapping>>,
    processor: Arc<dyn DataProcessor>,
    source: Mutex<String>,
    trackers: Mutex<Vec<Arc<CommandTracker>>>,
    last_by_mapping: Mutex<HashMap<String, Arc<CommandTracker>>>,
    last_command: Mutex<Option<Arc<CommandTracker>>>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.inner.name)
            .field("inbound", &self.inner.inbound.len())
            .field("outbound", &self.inner.outbound.len())
            .field("live_trackers", &self.live_trackers())
            .finish()
    }
}

impl Route {
    /// Assemble a route from built mappings.
    ///
    /// Identification tries the inbound codecs in declaration order, then
    /// `extra_codecs` (message types only used by verification rules).
    pub fn new(
        name: impl Into<String>,
        entity_offset: EntityId,
        inbound: Vec<InboundMapping>,
        outbound: Vec<OutboundMapping>,
        extra_codecs: Vec<Arc<MessageCodec>>,
        processor: Arc<dyn DataProcessor>,
    ) -> ConfigResult<Self> {
        let name = name.into();
        let mut codecs: Vec<Arc<MessageCodec>> = Vec::new();
        for codec in inbound.iter().map(InboundMapping::codec).chain(extra_codecs.iter()) {
            if !codecs.iter().any(|c| c.id() == codec.id()) {
                codecs.push(Arc::clone(codec));
            }
        }
        let mut by_key = HashMap::with_capacity(inbound.len());
        for mapping in inbound {
            let key = mapping.key();
            if by_key.contains_key(&key) {
                let (message, secondary_id) = key;
                return Err(ConfigError::DuplicateInbound {
                    message,
                    secondary_id,
                });
            }
            by_key.insert(key, mapping);
        }
        let mut mappings: Vec<Arc<OutboundMapping>> = Vec::with_capacity(outbound.len());
        for mapping in outbound {
            if mappings.iter().any(|m| m.id() == mapping.id()) {
                return Err(ConfigError::DuplicateOutbound(mapping.id().to_string()));
            }
            mappings.push(Arc::new(mapping));
        }
        debug!(
            "Route {} ready: {} codecs, {} inbound, {} outbound mappings",
            name,
            codecs.len(),
            by_key.len(),
            mappings.len()
        );
        Ok(Route {
            inner: Arc::new(RouteInner {
                labels: RouteLabels::new(name.clone()),
                name,
                entity_offset,
                codecs,
                inbound: by_key,
                outbound: mappings,
                processor,
                source: Mutex::new(String::new()),
                trackers: Mutex::new(Vec::new()),
                last_by_mapping: Mutex::new(HashMap::new()),
                last_command: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn entity_offset(&self) -> EntityId {
        self.inner.entity_offset
    }

    /// Set the connection source stamped on raw data.
    pub fn set_source(&self, source: impl Into<String>) {
        *self.inner.source.lock() = source.into();
    }

    pub fn outbound_mapping(&self, id: &str) -> Option<&OutboundMapping> {
        self.inner
            .outbound
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    /// Number of trackers still verifying.
    pub fn live_trackers(&self) -> usize {
        self.inner.trackers.lock().len()
    }

    /// The last command sent on this route.
    pub fn last_command(&self) -> Option<Arc<CommandTracker>> {
        self.inner.last_command.lock().clone()
    }

    /// Ids and periods of the periodic mappings, for an external scheduler.
    pub fn periodic_mappings(&self) -> Vec<(String, Duration)> {
        self.inner
            .outbound
            .iter()
            .filter_map(|m| m.period().map(|p| (m.id().to_string(), p)))
            .collect()
    }

    /// Ids of the mappings sent when the connection comes up.
    pub fn connection_mappings(&self) -> Vec<String> {
        self.inner
            .outbound
            .iter()
            .filter(|m| m.kind() == OutboundKind::OnConnection)
            .map(|m| m.id().to_string())
            .collect()
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Process a binary frame.
    pub fn on_binary_message(&self, bytes: &[u8]) {
        let time = Utc::now();
        match self.inner.identify(MessageKind::Binary, bytes) {
            Some((codec, secondary_id)) => self.inner.process(&codec, &secondary_id, bytes, time),
            None => {
                warn!(
                    "Binary message not identified on route {}: {}",
                    self.inner.name,
                    hex::encode_upper(bytes)
                );
                self.inner.count_unidentified(MessageKind::Binary);
            }
        }
    }

    /// Process a text frame. `raw` holds the received bytes, archived as is.
    pub fn on_ascii_message(&self, text: &str, raw: &[u8]) {
        let time = Utc::now();
        match self.inner.identify(MessageKind::Ascii, text.as_bytes()) {
            Some((codec, secondary_id)) => self.inner.process(&codec, &secondary_id, raw, time),
            None => {
                warn!(
                    "ASCII message not identified on route {}: {:?}",
                    self.inner.name,
                    text
                );
                self.inner.count_unidentified(MessageKind::Ascii);
            }
        }
    }

    /// Decode an archived raw record for display, as field/value text pairs.
    ///
    /// Returns an empty list when no codec of the route recognises it.
    pub fn render(&self, raw: &RawData) -> Vec<(String, String)> {
        for codec in &self.inner.codecs {
            let Ok(Some(secondary_id)) = codec.identify(&raw.contents) else {
                continue;
            };
            if raw_data_name(codec.id(), &secondary_id) != raw.name {
                continue;
            }
            return match codec.decode(&secondary_id, &raw.contents) {
                Ok(fields) => fields
                    .into_iter()
                    .map(|(k, v)| (k, v.to_string()))
                    .collect(),
                Err(e) => {
                    warn!(
                        "Cannot render raw data {} of route {}: {}",
                        raw.name, self.inner.name, e
                    );
                    Vec::new()
                }
            };
        }
        Vec::new()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Encode the command for an activity invocation.
    pub fn build_command(&self, invocation: &ActivityInvocation) -> RouteResult<EncodedCommand> {
        let mapping = self.inner.mapping_for(invocation)?;
        self.inner.encode(&mapping, Some(invocation))
    }

    /// Encode a command from a mapping chosen by id.
    pub fn build_mapping_command(
        &self,
        mapping_id: &str,
        invocation: Option<&ActivityInvocation>,
    ) -> RouteResult<EncodedCommand> {
        let mapping = self.inner.mapping_by_id(mapping_id)?;
        self.inner.encode(&mapping, invocation)
    }

    /// Encode, release and transmit an activity on the calling thread.
    ///
    /// Encoding errors are returned before anything is reported. A write
    /// failure is reported as a FATAL release and returned.
    pub fn dispatch_activity(
        &self,
        invocation: &ActivityInvocation,
        link: &dyn CommandLink,
    ) -> RouteResult<()> {
        let mapping = self.inner.mapping_for(invocation)?;
        let command = self.inner.encode(&mapping, Some(invocation))?;
        self.inner.transmit(&mapping, Some(invocation.clone()), command, link)
    }

    /// Encode on the calling thread, then release and transmit through the
    /// processor's executor.
    pub fn submit_activity(
        &self,
        invocation: ActivityInvocation,
        link: Arc<dyn CommandLink>,
    ) -> RouteResult<()> {
        let mapping = self.inner.mapping_for(&invocation)?;
        let command = self.inner.encode(&mapping, Some(&invocation))?;
        let inner = Arc::clone(&self.inner);
        let task: Task = Box::new(move || {
            // Failures are reported as activity progress.
            let _ = inner.transmit(&mapping, Some(invocation), command, link.as_ref());
        });
        self.inner.processor.execute(task);
        Ok(())
    }

    /// Send a periodic or on-connection command. No progress is reported.
    pub fn dispatch_internal(&self, mapping_id: &str, link: &dyn CommandLink) -> RouteResult<()> {
        let mapping = self.inner.mapping_by_id(mapping_id)?;
        let command = self.inner.encode(&mapping, None)?;
        self.inner.transmit(&mapping, None, command, link)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close every live tracker with UNKNOWN.
    pub fn dispose(&self) {
        debug!("Disposing route {}", self.inner.name);
        self.inner.close_all();
    }

    /// The connection went down: outstanding verifications cannot complete.
    pub fn notify_disconnection(&self) {
        debug!(
            "Resetting verification trackers of route {} after disconnection",
            self.inner.name
        );
        self.inner.close_all();
    }
}

fn raw_data_name(message_id: &str, secondary_id: &str) -> String {
    if secondary_id.is_empty() {
        message_id.to_string()
    } else {
        secondary_id.to_string()
    }
}

impl RouteInner {
    fn identify(&self, kind: MessageKind, data: &[u8]) -> Option<(Arc<MessageCodec>, String)> {
        self.codecs
            .iter()
            .filter(|c| c.kind() == kind)
            .find_map(|codec| match codec.identify(data) {
                Ok(Some(secondary_id)) => Some((Arc::clone(codec), secondary_id)),
                Ok(None) => None,
                Err(e) => {
                    error!(
                        "Cannot identify message with {} on route {}: {}",
                        codec.id(),
                        self.name,
                        e
                    );
                    None
                }
            })
    }

    fn count_unidentified(&self, kind: MessageKind) {
        metrics::counter!(
            metric_defs::MESSAGES_UNIDENTIFIED.name,
            &self.labels.with(&[("encoding", kind.to_string())])
        )
        .increment(1);
    }

    fn process(&self, codec: &MessageCodec, secondary_id: &str, raw: &[u8], time: DateTime<Utc>) {
        let message = codec.id();
        let message_labels = self.labels.with(&[("message", message.to_string())]);
        let mut fields = match codec.decode(secondary_id, raw) {
            Ok(fields) => fields,
            Err(e) => {
                error!(
                    "Cannot decode message {}/{} on route {}: {}",
                    message, secondary_id, self.name, e
                );
                metrics::counter!(metric_defs::DECODE_FAILURES.name, &message_labels).increment(1);
                return;
            }
        };
        trace!("Message ({}, {}) received on route {}", message, secondary_id, self.name);
        metrics::counter!(metric_defs::MESSAGES_RECEIVED.name, &message_labels).increment(1);

        self.processor.forward_raw_data(RawData {
            id: self.processor.next_raw_data_id(),
            name: raw_data_name(message, secondary_id),
            generation_time: time,
            type_name: ROUTE_MESSAGE_TYPE.to_string(),
            route: self.name.clone(),
            source: self.source.lock().clone(),
            quality: Quality::Good,
            contents: raw.to_vec(),
            reception_time: time,
            handler: self.processor.handler_name().to_string(),
        });

        let key = (message.to_string(), secondary_id.to_string());
        if let Some(mapping) = self.inbound.get(&key) {
            if self.command_gate(mapping) {
                self.inject(mapping, &mut fields, time);
            }
        }
        self.verify(time, message, secondary_id, &fields);
    }

    fn command_gate(&self, mapping: &InboundMapping) -> bool {
        let Some(gate) = mapping.command_match() else {
            return true;
        };
        let last = if gate.uses_last_command() {
            self.last_command.lock().clone()
        } else {
            gate.outbound()
                .and_then(|id| self.last_by_mapping.lock().get(id).cloned())
        };
        last.map_or(false, |t| gate.matches(t.mapping_id(), t.fields()))
    }

    fn inject(&self, mapping: &InboundMapping, fields: &mut FieldMap, time: DateTime<Utc>) {
        mapping.apply_computed(fields);
        let samples = mapping.map_parameters(fields, &self.name, time);
        if !samples.is_empty() {
            metrics::counter!(metric_defs::PARAMETER_SAMPLES.name, &self.labels.to_labels())
                .increment(samples.len() as u64);
            self.processor.forward_parameters(samples);
        }
        let events = mapping.map_events(fields, &self.name, time);
        if !events.is_empty() {
            metrics::counter!(metric_defs::EVENTS_RAISED.name, &self.labels.to_labels())
                .increment(events.len() as u64);
            self.processor.forward_events(events);
        }
    }

    fn verify(&self, time: DateTime<Utc>, message: &str, secondary_id: &str, fields: &FieldMap) {
        let interested: Vec<Arc<CommandTracker>> = self
            .trackers
            .lock()
            .iter()
            .filter(|t| t.is_interested(message, secondary_id))
            .cloned()
            .collect();
        for tracker in interested {
            let outcome =
                tracker.on_message(self.processor.as_ref(), time, message, secondary_id, fields);
            if outcome == TrackerOutcome::Closed {
                debug!(
                    "Verification of {} (tracker {}) on route {} completed",
                    tracker.mapping_id(),
                    tracker.id(),
                    self.name
                );
                self.deregister(&tracker);
            }
        }
    }

    fn mapping_for(&self, invocation: &ActivityInvocation) -> RouteResult<Arc<OutboundMapping>> {
        self.outbound
            .iter()
            .find(|m| m.activity_id() == Some(invocation.activity_id))
            .cloned()
            .ok_or(RouteError::NoOutboundMapping {
                activity_id: invocation.activity_id,
            })
    }

    fn mapping_by_id(&self, id: &str) -> RouteResult<Arc<OutboundMapping>> {
        self.outbound
            .iter()
            .find(|m| m.id() == id)
            .cloned()
            .ok_or_else(|| RouteError::UnknownMapping(id.to_string()))
    }

    fn encode(
        &self,
        mapping: &OutboundMapping,
        invocation: Option<&ActivityInvocation>,
    ) -> RouteResult<EncodedCommand> {
        let labels = self.labels.with(&[("mapping", mapping.id().to_string())]);
        match mapping.encode(invocation) {
            Ok(command) => {
                metrics::counter!(metric_defs::COMMANDS_ENCODED.name, &labels).increment(1);
                Ok(command)
            }
            Err(e) => {
                error!(
                    "Cannot encode command {} on route {}: {}",
                    mapping.id(),
                    self.name,
                    e
                );
                metrics::counter!(metric_defs::COMMAND_FAILURES.name, &labels).increment(1);
                Err(e)
            }
        }
    }

    fn transmit(
        self: &Arc<Self>,
        mapping: &OutboundMapping,
        invocation: Option<ActivityInvocation>,
        command: EncodedCommand,
        link: &dyn CommandLink,
    ) -> RouteResult<()> {
        let time = Utc::now();
        if let Some(invocation) = &invocation {
            trace!(
                "Dispatching activity {} ({}) on route {}",
                invocation.path,
                invocation.occurrence_id,
                self.name
            );
            self.report_release(
                invocation,
                time,
                ActivityOccurrenceState::Release,
                ActivityReportState::Pending,
                ActivityOccurrenceState::Transmission,
            );
        }
        let tracker = Arc::new(CommandTracker::new(
            time,
            invocation,
            mapping.id(),
            mapping.verification().cloned(),
            command,
            self.name.clone(),
        ));
        self.register(&tracker);

        if let Err(e) = link.write_message(tracker.bytes()) {
            error!(
                "Cannot transmit command {} on route {}: {}",
                mapping.id(),
                self.name,
                e
            );
            if let Some(invocation) = tracker.invocation() {
                self.report_release(
                    invocation,
                    time,
                    ActivityOccurrenceState::Transmission,
                    ActivityReportState::Fatal,
                    ActivityOccurrenceState::Transmission,
                );
            }
            self.deregister(&tracker);
            return Err(RouteError::Transmission(e.to_string()));
        }

        metrics::counter!(
            metric_defs::COMMANDS_TRANSMITTED.name,
            &self.labels.with(&[("mapping", mapping.id().to_string())])
        )
        .increment(1);
        self.last_by_mapping
            .lock()
            .insert(mapping.id().to_string(), Arc::clone(&tracker));
        *self.last_command.lock() = Some(Arc::clone(&tracker));

        if let Some(invocation) = tracker.invocation() {
            let next = match mapping.verification() {
                Some(v) if !v.acceptance().is_empty() => ActivityOccurrenceState::Transmission,
                Some(v) if !v.execution().is_empty() => ActivityOccurrenceState::Execution,
                _ => ActivityOccurrenceState::Verification,
            };
            self.report_release(
                invocation,
                time,
                ActivityOccurrenceState::Transmission,
                ActivityReportState::Ok,
                next,
            );
        }

        let on_timeout = self.timeout_task(Arc::downgrade(self), Arc::clone(&tracker));
        if !tracker.announce(self.processor.as_ref(), on_timeout) {
            self.deregister(&tracker);
        }
        Ok(())
    }

    fn timeout_task(&self, route: Weak<RouteInner>, tracker: Arc<CommandTracker>) -> Task {
        Box::new(move || {
            let Some(route) = route.upgrade() else {
                return;
            };
            let processor = Arc::clone(&route.processor);
            processor.execute(Box::new(move || route.handle_timeout(&tracker)));
        })
    }

    fn handle_timeout(&self, tracker: &Arc<CommandTracker>) {
        if tracker.on_timeout(self.processor.as_ref()) {
            debug!(
                "Timeout of {} (tracker {}) on route {}",
                tracker.mapping_id(),
                tracker.id(),
                self.name
            );
        }
        self.deregister(tracker);
    }

    fn report_release(
        &self,
        invocation: &ActivityInvocation,
        time: DateTime<Utc>,
        state: ActivityOccurrenceState,
        status: ActivityReportState,
        next_state: ActivityOccurrenceState,
    ) {
        self.processor.forward_activity_progress(ActivityProgress {
            activity_id: invocation.activity_id,
            occurrence_id: invocation.occurrence_id,
            name: RELEASE_REPORT_NAME.to_string(),
            generation_time: time,
            state,
            execution_time: None,
            status,
            next_state,
            result: None,
        });
    }

    fn register(&self, tracker: &Arc<CommandTracker>) {
        let mut trackers = self.trackers.lock();
        trackers.push(Arc::clone(tracker));
        metrics::gauge!(metric_defs::LIVE_TRACKERS.name, &self.labels.to_labels())
            .set(trackers.len() as f64);
    }

    fn deregister(&self, tracker: &Arc<CommandTracker>) {
        let mut trackers = self.trackers.lock();
        trackers.retain(|t| !Arc::ptr_eq(t, tracker));
        metrics::gauge!(metric_defs::LIVE_TRACKERS.name, &self.labels.to_labels())
            .set(trackers.len() as f64);
    }

    fn close_all(&self) {
        let trackers: Vec<Arc<CommandTracker>> = std::mem::take(&mut *self.trackers.lock());
        for tracker in &trackers {
            tracker.close_for_shutdown(self.processor.as_ref());
        }
        metrics::gauge!(metric_defs::LIVE_TRACKERS.name, &self.labels.to_labels()).set(0.0);
    }
}
