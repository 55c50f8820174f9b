//! Periodic transmission of the route's internal commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tmtc_common::TimerService;
use tmtc_protocol::{CommandLink, Route};
use tracing::{debug, warn};

/// Re-arms one timer task per periodic mapping until stopped.
///
/// A failed transmission is logged and the next period still fires: the
/// device may be reconnected by then.
pub struct PeriodicScheduler {
    stopped: Arc<AtomicBool>,
    mappings: Vec<(String, Duration)>,
}

struct PeriodicJob {
    route: Route,
    mapping_id: String,
    period: Duration,
    link: Arc<dyn CommandLink>,
    timer: Arc<dyn TimerService>,
    stopped: Arc<AtomicBool>,
}

impl PeriodicScheduler {
    /// Start sending every periodic mapping of `route`, first after one period.
    pub fn start(route: &Route, link: Arc<dyn CommandLink>, timer: Arc<dyn TimerService>) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let mappings = route.periodic_mappings();
        for (mapping_id, period) in &mappings {
            debug!(
                "Scheduling {} on route {} every {:?}",
                mapping_id,
                route.name(),
                period
            );
            arm(Arc::new(PeriodicJob {
                route: route.clone(),
                mapping_id: mapping_id.clone(),
                period: *period,
                link: Arc::clone(&link),
                timer: Arc::clone(&timer),
                stopped: Arc::clone(&stopped),
            }));
        }
        PeriodicScheduler { stopped, mappings }
    }

    /// Mappings being sent, with their periods.
    pub fn mappings(&self) -> &[(String, Duration)] {
        &self.mappings
    }

    /// Stop re-arming. A task already due may still run once.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn arm(job: Arc<PeriodicJob>) {
    let timer = Arc::clone(&job.timer);
    let period = job.period;
    timer.schedule(
        period,
        Box::new(move || {
            if job.stopped.load(Ordering::Acquire) {
                return;
            }
            if let Err(e) = job.route.dispatch_internal(&job.mapping_id, job.link.as_ref()) {
                warn!(
                    "Periodic command {} on route {} failed: {}",
                    job.mapping_id,
                    job.route.name(),
                    e
                );
            }
            arm(job);
        }),
    );
}
