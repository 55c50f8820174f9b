//! Verification state of one transmitted command.
//!
//! ```text
//! Idle --announce--> AcceptanceOpen --OK--> ExecutionOpen --OK/FAIL--> Closed
//!   |                     |                                     ^
//!   |                     +--FAIL, or OK without execution------+
//!   +--announce, no acceptance rules--> ExecutionOpen
//! ```
//!
//! Two actors drive a tracker: the connection read path (`on_message`) and the
//! timer service (`on_timeout`). Stage changes and timeout cancellation happen
//! under one lock, so exactly one terminal report is produced per stage.
//! Reports reach the processor after the lock is released, so a processor may
//! call back into the tracker or its route.

use crate::outbound::EncodedCommand;
use crate::verification::Verification;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tmtc_common::{
    ActivityInvocation, ActivityOccurrenceState, ActivityProgress, ActivityReportState,
    DataProcessor, FieldMap, Task, TimerHandle, ACCEPTANCE_STAGE_NAME, EXECUTION_STAGE_NAME,
};
use tmtc_metrics::{metric_defs, RouteLabels};
use tracing::debug;

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(0);

/// Verification stage of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStage {
    Idle,
    AcceptanceOpen,
    ExecutionOpen,
    Closed,
}

/// What a message did to a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// The message was not classified by the open stage.
    Ignored,
    /// A report was produced and the tracker stays open.
    Reported,
    /// The tracker closed.
    Closed,
}

#[derive(Debug)]
struct TrackerState {
    stage: TrackerStage,
    timeout: Option<TimerHandle>,
}

/// Tracks the verification of a transmitted command.
#[derive(Debug)]
pub struct CommandTracker {
    id: u64,
    send_time: DateTime<Utc>,
    invocation: Option<ActivityInvocation>,
    mapping_id: String,
    verification: Option<Arc<Verification>>,
    command: EncodedCommand,
    labels: RouteLabels,
    state: Mutex<TrackerState>,
}

impl CommandTracker {
    pub fn new(
        send_time: DateTime<Utc>,
        invocation: Option<ActivityInvocation>,
        mapping_id: impl Into<String>,
        verification: Option<Arc<Verification>>,
        command: EncodedCommand,
        route: impl Into<String>,
    ) -> Self {
        CommandTracker {
            id: NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed),
            send_time,
            invocation,
            mapping_id: mapping_id.into(),
            verification,
            command,
            labels: RouteLabels::new(route),
            state: Mutex::new(TrackerState {
                stage: TrackerStage::Idle,
                timeout: None,
            }),
        }
    }

    /// Process-unique tracker number, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn send_time(&self) -> DateTime<Utc> {
        self.send_time
    }

    pub fn invocation(&self) -> Option<&ActivityInvocation> {
        self.invocation.as_ref()
    }

    pub fn mapping_id(&self) -> &str {
        &self.mapping_id
    }

    pub fn route(&self) -> &str {
        &self.labels.route
    }

    /// Fields the command was encoded from.
    pub fn fields(&self) -> &FieldMap {
        &self.command.fields
    }

    pub fn bytes(&self) -> &[u8] {
        &self.command.bytes
    }

    /// Correlation id of the invocation, or -1 for internal commands.
    pub fn correlation_id(&self) -> i64 {
        self.invocation
            .as_ref()
            .map_or(-1, ActivityInvocation::correlation_id)
    }

    pub fn stage(&self) -> TrackerStage {
        self.state.lock().stage
    }

    pub fn is_closed(&self) -> bool {
        self.stage() == TrackerStage::Closed
    }

    /// Whether a message class can move this tracker.
    pub fn is_interested(&self, message: &str, secondary_id: &str) -> bool {
        self.verification
            .as_ref()
            .map_or(false, |v| v.is_interested(message, secondary_id))
    }

    /// Open the first verification stage after a successful transmission and
    /// arm the timeout with `on_timeout`.
    ///
    /// Returns `false` when there is nothing to verify and the tracker closed.
    pub fn announce(&self, processor: &dyn DataProcessor, on_timeout: Task) -> bool {
        let mut reports = Vec::new();
        let open = self.open_first_stage(processor, &mut reports, on_timeout);
        publish(processor, reports);
        open
    }

    fn open_first_stage(
        &self,
        processor: &dyn DataProcessor,
        reports: &mut Vec<ActivityProgress>,
        on_timeout: Task,
    ) -> bool {
        let mut state = self.state.lock();
        if state.stage != TrackerStage::Idle {
            return state.stage != TrackerStage::Closed;
        }
        let Some(verification) = self.verification.as_ref() else {
            state.stage = TrackerStage::Closed;
            return false;
        };
        let now = Utc::now();
        if !verification.acceptance().is_empty() {
            self.report(
                reports,
                now,
                ACCEPTANCE_STAGE_NAME,
                ActivityOccurrenceState::Transmission,
                None,
                ActivityReportState::Pending,
                ActivityOccurrenceState::Transmission,
            );
            state.stage = TrackerStage::AcceptanceOpen;
        } else if !verification.execution().is_empty() {
            self.report(
                reports,
                now,
                EXECUTION_STAGE_NAME,
                ActivityOccurrenceState::Execution,
                None,
                ActivityReportState::Pending,
                ActivityOccurrenceState::Execution,
            );
            state.stage = TrackerStage::ExecutionOpen;
        } else {
            state.stage = TrackerStage::Closed;
            return false;
        }
        state.timeout = Some(
            processor
                .timer_service()
                .schedule(verification.timeout(), on_timeout),
        );
        debug!(
            "Tracker {} ({}) on route {} armed for {:?}",
            self.id,
            self.mapping_id,
            self.route(),
            verification.timeout()
        );
        true
    }

    /// Offer a received message to the open stage.
    pub fn on_message(
        &self,
        processor: &dyn DataProcessor,
        time: DateTime<Utc>,
        message: &str,
        secondary_id: &str,
        decoded: &FieldMap,
    ) -> TrackerOutcome {
        let mut reports = Vec::new();
        let outcome = self.offer(&mut reports, time, message, secondary_id, decoded);
        publish(processor, reports);
        outcome
    }

    fn offer(
        &self,
        reports: &mut Vec<ActivityProgress>,
        time: DateTime<Utc>,
        message: &str,
        secondary_id: &str,
        decoded: &FieldMap,
    ) -> TrackerOutcome {
        let Some(verification) = self.verification.as_ref() else {
            return TrackerOutcome::Ignored;
        };
        let mut state = self.state.lock();
        match state.stage {
            TrackerStage::AcceptanceOpen => {
                let Some(result) = verification.classify(
                    verification.acceptance(),
                    message,
                    secondary_id,
                    decoded,
                    &self.command.fields,
                ) else {
                    return TrackerOutcome::Ignored;
                };
                let has_execution = !verification.execution().is_empty();
                match result {
                    ActivityReportState::Ok if has_execution => {
                        self.report(
                            reports,
                            time,
                            ACCEPTANCE_STAGE_NAME,
                            ActivityOccurrenceState::Transmission,
                            None,
                            result,
                            ActivityOccurrenceState::Execution,
                        );
                        state.stage = TrackerStage::ExecutionOpen;
                        TrackerOutcome::Reported
                    }
                    ActivityReportState::Ok => {
                        self.report(
                            reports,
                            time,
                            ACCEPTANCE_STAGE_NAME,
                            ActivityOccurrenceState::Transmission,
                            Some(time),
                            result,
                            ActivityOccurrenceState::Verification,
                        );
                        self.close(&mut state);
                        TrackerOutcome::Closed
                    }
                    r if r.is_failure() => {
                        if has_execution {
                            self.report(
                                reports,
                                time,
                                ACCEPTANCE_STAGE_NAME,
                                ActivityOccurrenceState::Transmission,
                                None,
                                result,
                                ActivityOccurrenceState::Execution,
                            );
                            self.report(
                                reports,
                                time,
                                EXECUTION_STAGE_NAME,
                                ActivityOccurrenceState::Execution,
                                None,
                                ActivityReportState::Unknown,
                                ActivityOccurrenceState::Verification,
                            );
                        } else {
                            self.report(
                                reports,
                                time,
                                ACCEPTANCE_STAGE_NAME,
                                ActivityOccurrenceState::Transmission,
                                None,
                                result,
                                ActivityOccurrenceState::Verification,
                            );
                        }
                        self.close(&mut state);
                        TrackerOutcome::Closed
                    }
                    ActivityReportState::Pending => {
                        self.report(
                            reports,
                            time,
                            ACCEPTANCE_STAGE_NAME,
                            ActivityOccurrenceState::Transmission,
                            None,
                            result,
                            ActivityOccurrenceState::Transmission,
                        );
                        TrackerOutcome::Reported
                    }
                    _ => {
                        self.report(
                            reports,
                            time,
                            ACCEPTANCE_STAGE_NAME,
                            ActivityOccurrenceState::Transmission,
                            Some(time),
                            result,
                            ActivityOccurrenceState::Transmission,
                        );
                        TrackerOutcome::Reported
                    }
                }
            }
            TrackerStage::ExecutionOpen => {
                let Some(result) = verification.classify(
                    verification.execution(),
                    message,
                    secondary_id,
                    decoded,
                    &self.command.fields,
                ) else {
                    return TrackerOutcome::Ignored;
                };
                if result == ActivityReportState::Ok || result.is_failure() {
                    self.report(
                        reports,
                        time,
                        EXECUTION_STAGE_NAME,
                        ActivityOccurrenceState::Execution,
                        Some(time),
                        result,
                        ActivityOccurrenceState::Verification,
                    );
                    self.close(&mut state);
                    TrackerOutcome::Closed
                } else {
                    self.report(
                        reports,
                        time,
                        EXECUTION_STAGE_NAME,
                        ActivityOccurrenceState::Execution,
                        None,
                        result,
                        ActivityOccurrenceState::Execution,
                    );
                    TrackerOutcome::Reported
                }
            }
            TrackerStage::Idle | TrackerStage::Closed => TrackerOutcome::Ignored,
        }
    }

    /// Expire the open stage. Returns `false` if the tracker was already closed.
    pub fn on_timeout(&self, processor: &dyn DataProcessor) -> bool {
        let mut reports = Vec::new();
        let expired = self.expire(&mut reports);
        publish(processor, reports);
        expired
    }

    fn expire(&self, reports: &mut Vec<ActivityProgress>) -> bool {
        let mut state = self.state.lock();
        let time = Utc::now();
        match state.stage {
            TrackerStage::AcceptanceOpen => {
                debug!("Tracker {} on route {} timed out in acceptance", self.id, self.route());
                if self.has_execution() {
                    self.report(
                        reports,
                        time,
                        ACCEPTANCE_STAGE_NAME,
                        ActivityOccurrenceState::Transmission,
                        None,
                        ActivityReportState::Timeout,
                        ActivityOccurrenceState::Transmission,
                    );
                    self.report(
                        reports,
                        time,
                        EXECUTION_STAGE_NAME,
                        ActivityOccurrenceState::Execution,
                        None,
                        ActivityReportState::Timeout,
                        ActivityOccurrenceState::Verification,
                    );
                } else {
                    self.report(
                        reports,
                        time,
                        ACCEPTANCE_STAGE_NAME,
                        ActivityOccurrenceState::Transmission,
                        None,
                        ActivityReportState::Timeout,
                        ActivityOccurrenceState::Verification,
                    );
                }
            }
            TrackerStage::ExecutionOpen => {
                debug!("Tracker {} on route {} timed out in execution", self.id, self.route());
                self.report(
                    reports,
                    time,
                    EXECUTION_STAGE_NAME,
                    ActivityOccurrenceState::Execution,
                    None,
                    ActivityReportState::Timeout,
                    ActivityOccurrenceState::Verification,
                );
            }
            TrackerStage::Idle | TrackerStage::Closed => return false,
        }
        self.close(&mut state);
        true
    }

    /// Close the tracker with UNKNOWN for every stage still open. Used on
    /// route disposal and connection loss.
    pub fn close_for_shutdown(&self, processor: &dyn DataProcessor) {
        let mut reports = Vec::new();
        self.close_unknown(&mut reports);
        publish(processor, reports);
    }

    fn close_unknown(&self, reports: &mut Vec<ActivityProgress>) {
        let mut state = self.state.lock();
        let time = Utc::now();
        match state.stage {
            TrackerStage::AcceptanceOpen => {
                let next = if self.has_execution() {
                    ActivityOccurrenceState::Execution
                } else {
                    ActivityOccurrenceState::Verification
                };
                self.report(
                    reports,
                    time,
                    ACCEPTANCE_STAGE_NAME,
                    ActivityOccurrenceState::Transmission,
                    None,
                    ActivityReportState::Unknown,
                    next,
                );
                if self.has_execution() {
                    self.report(
                        reports,
                        time,
                        EXECUTION_STAGE_NAME,
                        ActivityOccurrenceState::Execution,
                        None,
                        ActivityReportState::Unknown,
                        ActivityOccurrenceState::Verification,
                    );
                }
            }
            TrackerStage::ExecutionOpen => {
                self.report(
                    reports,
                    time,
                    EXECUTION_STAGE_NAME,
                    ActivityOccurrenceState::Execution,
                    None,
                    ActivityReportState::Unknown,
                    ActivityOccurrenceState::Verification,
                );
            }
            TrackerStage::Idle | TrackerStage::Closed => {}
        }
        self.close(&mut state);
    }

    fn has_execution(&self) -> bool {
        self.verification
            .as_ref()
            .map_or(false, |v| !v.execution().is_empty())
    }

    fn close(&self, state: &mut TrackerState) {
        if let Some(handle) = state.timeout.take() {
            handle.cancel();
        }
        if state.stage != TrackerStage::Closed {
            state.stage = TrackerStage::Closed;
            let elapsed = (Utc::now() - self.send_time).num_milliseconds().max(0);
            metrics::histogram!(
                metric_defs::VERIFICATION_TIME.name,
                &self.labels.with(&[("mapping", self.mapping_id.clone())])
            )
            .record(elapsed as f64);
            debug!("Tracker {} ({}) on route {} closed", self.id, self.mapping_id, self.route());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        reports: &mut Vec<ActivityProgress>,
        time: DateTime<Utc>,
        name: &str,
        state: ActivityOccurrenceState,
        execution_time: Option<DateTime<Utc>>,
        status: ActivityReportState,
        next_state: ActivityOccurrenceState,
    ) {
        let Some(invocation) = self.invocation.as_ref() else {
            return;
        };
        metrics::counter!(
            metric_defs::VERIFICATION_REPORTS.name,
            &self.labels.with(&[
                ("stage", name.to_string()),
                ("result", status.as_str().to_string()),
            ])
        )
        .increment(1);
        reports.push(ActivityProgress {
            activity_id: invocation.activity_id,
            occurrence_id: invocation.occurrence_id,
            name: name.to_string(),
            generation_time: time,
            state,
            execution_time,
            status,
            next_state,
            result: None,
        });
    }
}

/// Forward reports collected under the tracker lock, once it is released.
fn publish(processor: &dyn DataProcessor, reports: Vec<ActivityProgress>) {
    for progress in reports {
        processor.forward_activity_progress(progress);
    }
}
