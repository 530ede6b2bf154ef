use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::scheduler::PollCycle;
use crate::model::State;

/// Headless summary of one committed (or failed) cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub ok: usize,
    pub degraded: usize,
    pub outage: usize,
    pub unknown: usize,
    pub failed_fetches: usize,
}

impl CycleSummary {
    pub fn from_cycle(cycle: &PollCycle) -> Self {
        let mut summary = Self::default();
        for outcome in &cycle.outcomes {
            match outcome.observation.state {
                State::Ok => summary.ok += 1,
                State::Degraded => summary.degraded += 1,
                State::Outage => summary.outage += 1,
                State::Unknown => summary.unknown += 1,
            }
            if outcome.error_class.is_some() {
                summary.failed_fetches += 1;
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.ok + self.degraded + self.outage + self.unknown
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub timestamp: Option<DateTime<Utc>>,
    pub summary: CycleSummary,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub stored: bool,
    pub pruned: u64,
}

/// One line per entity: id, state, value and latency.
pub fn log_outcomes(cycle: &PollCycle) {
    for outcome in &cycle.outcomes {
        let obs = &outcome.observation;
        let latency_ms = outcome.latency.as_millis() as u64;
        match outcome.error_class {
            None => info!(
                entity = %outcome.entity_id,
                state = %obs.state,
                value = ?obs.value,
                latency_ms,
                message = %obs.message,
                "entity polled"
            ),
            Some(class) => warn!(
                entity = %outcome.entity_id,
                state = %obs.state,
                latency_ms,
                error_class = class,
                message = %obs.message,
                "entity fetch failed"
            ),
        }
    }
}

pub fn log_report(report: &CycleReport) {
    let s = &report.summary;
    if report.stored {
        info!(
            ok = s.ok,
            degraded = s.degraded,
            outage = s.outage,
            unknown = s.unknown,
            failed_fetches = s.failed_fetches,
            elapsed = ?report.elapsed,
            pruned = report.pruned,
            stored = true,
            "poll cycle committed"
        );
    } else {
        warn!(
            ok = s.ok,
            degraded = s.degraded,
            outage = s.outage,
            unknown = s.unknown,
            elapsed = ?report.elapsed,
            stored = false,
            "poll cycle not stored"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Observation;
    use crate::poller::scheduler::FetchOutcome;

    fn outcome(id: &str, obs: Observation, class: Option<&'static str>) -> FetchOutcome {
        FetchOutcome {
            entity_id: id.into(),
            observation: obs,
            latency: Duration::from_millis(12),
            error_class: class,
        }
    }

    #[test]
    fn summary_counts_states_and_failures() {
        let cycle = PollCycle {
            outcomes: vec![
                outcome("a", Observation::new(State::Ok, "fine"), None),
                outcome("b", Observation::new(State::Outage, "down"), None),
                outcome("c", Observation::unknown("timeout"), Some("timeout")),
                outcome("d", Observation::unknown("No components matched: x"), None),
            ],
            elapsed: Duration::from_secs(1),
            deadline_hit: false,
        };
        let summary = CycleSummary::from_cycle(&cycle);
        assert_eq!(summary.ok, 1);
        assert_eq!(summary.outage, 1);
        assert_eq!(summary.unknown, 2);
        assert_eq!(summary.failed_fetches, 1);
        assert_eq!(summary.total(), 4);
    }
}
