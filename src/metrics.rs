use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::model::State;
use crate::poller::scheduler::PollCycle;

/// Metrics registry for the poller, exported as a Prometheus textfile.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    cycles: CycleMetrics,
    entities: EntityMetrics,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("servicedash".into()), None)?);

        let cycles = CycleMetrics::register(&registry)?;
        let entities = EntityMetrics::register(&registry)?;

        Ok(Self {
            registry,
            cycles,
            entities,
        })
    }

    /// Record per-entity state, latency and failures for a finished fetch fan-out.
    pub fn observe_cycle(&self, cycle: &PollCycle) {
        self.cycles
            .duration
            .with_label_values(&["fetch"])
            .observe(cycle.elapsed.as_secs_f64());
        if cycle.deadline_hit {
            self.cycles.deadline_hits.with_label_values(&["fetch"]).inc();
        }

        for outcome in &cycle.outcomes {
            let entity = sanitize_label(&outcome.entity_id);
            for state in State::ALL {
                self.entities
                    .state
                    .with_label_values(&[entity.as_str(), state.as_str()])
                    .set(i64::from(outcome.observation.state == state));
            }
            self.entities
                .latency_seconds
                .with_label_values(&[entity.as_str()])
                .set(outcome.latency.as_secs_f64());
            if let Some(class) = outcome.error_class {
                self.entities
                    .fetch_errors_total
                    .with_label_values(&[entity.as_str(), class])
                    .inc();
            }
        }
    }

    /// Observe the time from fan-out start to commit.
    pub fn observe_commit(&self, duration: Duration, stored: bool) {
        self.cycles
            .duration
            .with_label_values(&["total"])
            .observe(duration.as_secs_f64());
        self.cycles
            .last_success
            .with_label_values(&["store"])
            .set(if stored { 1 } else { 0 });
    }

    pub fn inc_store_failure(&self, reason: &str) {
        self.cycles
            .store_failures_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Encode metrics into Prometheus exposition format.
    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Rewrite the textfile-collector file atomically.
    pub async fn write_textfile(&self, path: &Path) -> Result<()> {
        let body = self.encode()?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = path.with_extension("prom.tmp");
        tokio::fs::write(&tmp, body.as_bytes()).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[derive(Clone)]
struct CycleMetrics {
    duration: HistogramVec,
    last_success: IntGaugeVec,
    deadline_hits: IntCounterVec,
    store_failures_total: IntCounterVec,
}

impl CycleMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let duration = HistogramVec::new(
            HistogramOpts::new("cycle_duration_seconds", "Poll cycle duration by phase"),
            &["phase"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        let last_success = IntGaugeVec::new(
            Opts::new(
                "last_cycle_success",
                "Cycle success flag (1=success, 0=failure)",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(last_success.clone()))?;

        let deadline_hits = IntCounterVec::new(
            Opts::new("cycle_deadline_hits_total", "Cycles cut short by the deadline"),
            &["phase"],
        )?;
        registry.register(Box::new(deadline_hits.clone()))?;

        let store_failures_total = IntCounterVec::new(
            Opts::new("store_failures_total", "Cycle writes that were rolled back"),
            &["reason"],
        )?;
        registry.register(Box::new(store_failures_total.clone()))?;

        Ok(Self {
            duration,
            last_success,
            deadline_hits,
            store_failures_total,
        })
    }
}

#[derive(Clone)]
struct EntityMetrics {
    state: IntGaugeVec,
    latency_seconds: GaugeVec,
    fetch_errors_total: IntCounterVec,
}

impl EntityMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let state = IntGaugeVec::new(
            Opts::new("entity_state", "Current entity state (1 for the active state)"),
            &["entity", "state"],
        )?;
        registry.register(Box::new(state.clone()))?;

        let latency_seconds = GaugeVec::new(
            Opts::new("entity_fetch_latency_seconds", "Latency of the last fetch"),
            &["entity"],
        )?;
        registry.register(Box::new(latency_seconds.clone()))?;

        let fetch_errors_total = IntCounterVec::new(
            Opts::new("entity_fetch_errors_total", "Failed fetches by error class"),
            &["entity", "class"],
        )?;
        registry.register(Box::new(fetch_errors_total.clone()))?;

        Ok(Self {
            state,
            latency_seconds,
            fetch_errors_total,
        })
    }
}

fn sanitize_label(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == ':' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
