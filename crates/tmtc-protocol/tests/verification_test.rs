//! Command verification scenarios: release, acceptance, execution, timeouts
//! and shutdown, driven through a full route with a manual timer.

mod common;

use common::{receive, thermostat, MockLink};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tmtc_common::{
    ActivityInvocation, ActivityOccurrenceState, ActivityReportState, TimerService,
};
use tmtc_protocol::{ManualTimer, RouteError, TrackerStage};

use tmtc_common::ActivityReportState::{Fail, Fatal, Ok as Done, Pending, Timeout, Unknown};

fn set_level(occurrence: u64, level: i64) -> ActivityInvocation {
    ActivityInvocation::new(1005, occurrence)
        .with_path("THERMOSTAT.SET_LEVEL")
        .with_argument("Level", level)
}

fn report(name: &str, status: ActivityReportState) -> (String, ActivityReportState) {
    (name.to_string(), status)
}

// ============================================================================
// Nominal Lifecycle
// ============================================================================

#[test]
fn test_ack_then_exe_completes() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route.dispatch_activity(&set_level(1, 20), link.as_ref()).unwrap();
    assert_eq!(link.written_text(), vec!["SET 0 20\n"]);
    assert_eq!(
        sink.reports(),
        vec![
            report("Release", Pending),
            report("Release", Done),
            report("Acceptance", Pending),
        ]
    );
    assert_eq!(route.live_trackers(), 1);

    receive(&route, "ACK 0\n");
    receive(&route, "EXE 0 0\n");

    assert_eq!(
        sink.reports()[3..].to_vec(),
        vec![report("Acceptance", Done), report("Execution", Done)]
    );
    assert_eq!(route.live_trackers(), 0);
    assert_eq!(sink.timer.pending(), 0);

    let progress = sink.progress.lock();
    assert_eq!(progress[0].state, ActivityOccurrenceState::Release);
    assert_eq!(progress[1].next_state, ActivityOccurrenceState::Transmission);
    assert_eq!(progress[3].next_state, ActivityOccurrenceState::Execution);
    assert!(progress[3].execution_time.is_none());
    assert_eq!(progress[4].state, ActivityOccurrenceState::Execution);
    assert_eq!(progress[4].next_state, ActivityOccurrenceState::Verification);
    assert!(progress[4].execution_time.is_some());
    assert!(progress.iter().all(|p| p.activity_id == 1005 && p.occurrence_id == 1));
}

#[test]
fn test_execution_timeout_after_ack() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route.dispatch_activity(&set_level(1, 20), link.as_ref()).unwrap();
    receive(&route, "ACK 0\n");
    assert_eq!(sink.timer.advance(Duration::from_secs(4)), 0);
    assert_eq!(sink.timer.advance(Duration::from_secs(1)), 1);

    assert_eq!(sink.reports().last(), Some(&report("Execution", Timeout)));
    assert_eq!(route.live_trackers(), 0);

    // A late reply changes nothing.
    let before = sink.reports().len();
    receive(&route, "EXE 0 0\n");
    assert_eq!(sink.reports().len(), before);
}

#[test]
fn test_acceptance_timeout_expires_both_stages() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route.dispatch_activity(&set_level(1, 20), link.as_ref()).unwrap();
    sink.timer.fire_all();

    assert_eq!(
        sink.reports()[3..].to_vec(),
        vec![report("Acceptance", Timeout), report("Execution", Timeout)]
    );
    let progress = sink.progress.lock();
    assert_eq!(progress[3].next_state, ActivityOccurrenceState::Transmission);
    assert_eq!(progress[4].next_state, ActivityOccurrenceState::Verification);
}

#[test]
fn test_nak_fails_acceptance_and_closes() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route.dispatch_activity(&set_level(1, 20), link.as_ref()).unwrap();
    receive(&route, "NAK 0\n");

    assert_eq!(
        sink.reports()[3..].to_vec(),
        vec![report("Acceptance", Fail), report("Execution", Unknown)]
    );
    assert_eq!(route.live_trackers(), 0);
    assert_eq!(sink.timer.pending(), 0);
    assert_eq!(sink.timer.fire_all(), 0);
}

#[test]
fn test_first_matching_execution_rule_wins() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route.dispatch_activity(&set_level(1, 20), link.as_ref()).unwrap();
    receive(&route, "ACK 0\n");
    // Status 3 fails the OK rule's value check and falls through to FAIL.
    receive(&route, "EXE 0 3\n");

    assert_eq!(sink.reports().last(), Some(&report("Execution", Fail)));
    assert_eq!(route.live_trackers(), 0);
}

#[test]
fn test_accept_only_command_closes_on_ack() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route
        .dispatch_activity(&ActivityInvocation::new(1006, 7), link.as_ref())
        .unwrap();
    assert_eq!(link.written_text(), vec!["PULSE 0\n"]);
    receive(&route, "ACK 0\n");

    assert_eq!(sink.reports().last(), Some(&report("Acceptance", Done)));
    let progress = sink.progress.lock();
    let last = progress.last().unwrap();
    assert_eq!(last.next_state, ActivityOccurrenceState::Verification);
    assert!(last.execution_time.is_some());
    assert_eq!(route.live_trackers(), 0);
}

#[test]
fn test_execution_only_command() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route
        .dispatch_activity(&ActivityInvocation::new(1007, 3), link.as_ref())
        .unwrap();
    assert_eq!(
        sink.reports(),
        vec![
            report("Release", Pending),
            report("Release", Done),
            report("Execution", Pending),
        ]
    );
    assert_eq!(
        sink.progress.lock()[1].next_state,
        ActivityOccurrenceState::Execution
    );
    receive(&route, "READY\n");
    assert_eq!(sink.reports().last(), Some(&report("Execution", Done)));
}

#[test]
fn test_command_without_verification_is_not_tracked() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route
        .dispatch_activity(
            &ActivityInvocation::new(1008, 1).with_argument("sensor", 1i64),
            link.as_ref(),
        )
        .unwrap();
    assert_eq!(
        sink.reports(),
        vec![report("Release", Pending), report("Release", Done)]
    );
    assert_eq!(
        sink.progress.lock()[1].next_state,
        ActivityOccurrenceState::Verification
    );
    assert_eq!(route.live_trackers(), 0);
    assert_eq!(sink.timer.pending(), 0);
}

// ============================================================================
// Correlation
// ============================================================================

#[test]
fn test_replies_correlate_on_sequence_number() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route.dispatch_activity(&set_level(1, 10), link.as_ref()).unwrap();
    route.dispatch_activity(&set_level(2, 20), link.as_ref()).unwrap();
    assert_eq!(link.written_text(), vec!["SET 0 10\n", "SET 1 20\n"]);

    receive(&route, "ACK 9\n");
    receive(&route, "ACK 1\n");
    assert_eq!(sink.reports_of(1).last(), Some(&report("Acceptance", Pending)));
    assert_eq!(sink.reports_of(2).last(), Some(&report("Acceptance", Done)));

    receive(&route, "EXE 1 0\n");
    assert_eq!(sink.reports_of(2).last(), Some(&report("Execution", Done)));
    assert_eq!(route.live_trackers(), 1);
}

#[test]
fn test_correlation_ids() {
    let (route, _sink) = thermostat();
    let link = MockLink::new();

    let first = set_level(1, 10);
    route.dispatch_activity(&first, link.as_ref()).unwrap();
    let tracker = route.last_command().unwrap();
    assert_eq!(tracker.correlation_id(), (1005i64 << 32) | 1);
    assert_eq!(tracker.correlation_id(), first.correlation_id());

    route.dispatch_activity(&set_level(2, 10), link.as_ref()).unwrap();
    assert_ne!(route.last_command().unwrap().correlation_id(), first.correlation_id());

    route.dispatch_internal("POLL", link.as_ref()).unwrap();
    assert_eq!(route.last_command().unwrap().correlation_id(), -1);
}

// ============================================================================
// Failures and Shutdown
// ============================================================================

#[test]
fn test_transmission_failure_reports_fatal() {
    let (route, sink) = thermostat();
    let link = MockLink::new();
    link.broken.store(true, Ordering::Relaxed);

    let err = route.dispatch_activity(&set_level(1, 20), link.as_ref()).unwrap_err();
    assert!(matches!(err, RouteError::Transmission(_)));
    assert_eq!(
        sink.reports(),
        vec![report("Release", Pending), report("Release", Fatal)]
    );
    assert_eq!(route.live_trackers(), 0);
    assert!(route.last_command().is_none());
}

#[test]
fn test_dispose_closes_open_stages_with_unknown() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route.dispatch_activity(&set_level(1, 20), link.as_ref()).unwrap();
    route
        .dispatch_activity(&ActivityInvocation::new(1006, 2), link.as_ref())
        .unwrap();
    route.dispose();

    assert_eq!(
        sink.reports_of(1)[3..].to_vec(),
        vec![report("Acceptance", Unknown), report("Execution", Unknown)]
    );
    assert_eq!(
        sink.reports_of(2)[3..].to_vec(),
        vec![report("Acceptance", Unknown)]
    );
    assert_eq!(route.live_trackers(), 0);
    assert_eq!(sink.timer.fire_all(), 0);
}

#[test]
fn test_disconnection_after_ack() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route.dispatch_activity(&set_level(1, 20), link.as_ref()).unwrap();
    receive(&route, "ACK 0\n");
    let tracker = route.last_command().unwrap();
    assert_eq!(tracker.stage(), TrackerStage::ExecutionOpen);

    route.notify_disconnection();
    assert_eq!(sink.reports().last(), Some(&report("Execution", Unknown)));
    assert!(tracker.is_closed());
    assert_eq!(route.live_trackers(), 0);
}

#[test]
fn test_submit_runs_through_executor() {
    let (route, sink) = thermostat();
    let link = MockLink::new();

    route.submit_activity(set_level(1, 20), link.clone()).unwrap();
    assert_eq!(link.written_text(), vec!["SET 0 20\n"]);
    assert_eq!(sink.reports().len(), 3);

    let err = route
        .submit_activity(ActivityInvocation::new(4242, 1), link)
        .unwrap_err();
    assert_eq!(err, RouteError::NoOutboundMapping { activity_id: 4242 });
}

// ============================================================================
// Timeout Exclusivity
// ============================================================================

#[test]
fn test_timeout_and_reply_race_single_outcome() {
    for _ in 0..50 {
        let (route, sink) = thermostat();
        let link = MockLink::new();
        route
            .dispatch_activity(&ActivityInvocation::new(1006, 1), link.as_ref())
            .unwrap();

        let timer: Arc<ManualTimer> = Arc::clone(&sink.timer);
        let firing = std::thread::spawn(move || timer.fire_all());
        let replying = {
            let route = route.clone();
            std::thread::spawn(move || receive(&route, "ACK 0\n"))
        };
        firing.join().unwrap();
        replying.join().unwrap();

        let terminal: Vec<_> = sink
            .reports()
            .into_iter()
            .filter(|(name, status)| name == "Acceptance" && *status != Pending)
            .collect();
        assert_eq!(terminal.len(), 1, "got {:?}", terminal);
        assert!(matches!(terminal[0].1, Done | Timeout));
        assert_eq!(route.live_trackers(), 0);
    }
}

#[test]
fn test_timer_service_is_the_sink_timer() {
    let (_route, sink) = thermostat();
    let service: Arc<dyn TimerService> = sink.timer.clone();
    let handle = service.schedule(Duration::from_secs(1), Box::new(|| {}));
    assert_eq!(sink.timer.pending(), 1);
    handle.cancel();
    assert_eq!(sink.timer.pending(), 0);
}
