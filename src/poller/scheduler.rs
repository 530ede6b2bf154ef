use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{instrument, warn};

use crate::config::SchedulerSettings;
use crate::entity::TrackedEntity;
use crate::model::{Observation, StatusRecord};
use crate::sources::{FetchError, SourceFetcher};

pub const DEADLINE_MESSAGE: &str = "timeout: cycle deadline";

/// Result of fetching one entity during a cycle.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub entity_id: String,
    pub observation: Observation,
    /// Time spent fetching once a concurrency permit was held.
    pub latency: Duration,
    /// Failure class when the observation was synthesized from an error.
    pub error_class: Option<&'static str>,
}

/// Every entity's outcome for one cycle, in configuration order.
#[derive(Debug, Clone)]
pub struct PollCycle {
    pub outcomes: Vec<FetchOutcome>,
    pub elapsed: Duration,
    pub deadline_hit: bool,
}

impl PollCycle {
    /// Stamp every outcome with the cycle timestamp.
    pub fn records_at(&self, ts: DateTime<Utc>) -> Vec<StatusRecord> {
        self.outcomes
            .iter()
            .map(|outcome| {
                StatusRecord::from_observation(
                    outcome.entity_id.clone(),
                    ts,
                    outcome.observation.clone(),
                    Some(outcome.latency.as_millis() as i64),
                )
            })
            .collect()
    }
}

/// Fans fetches out across entities with bounded concurrency and
/// independent time budgets.
pub struct FetchScheduler {
    fetcher: Arc<dyn SourceFetcher>,
    settings: SchedulerSettings,
}

impl FetchScheduler {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, settings: SchedulerSettings) -> Self {
        Self { fetcher, settings }
    }

    /// Produce exactly one outcome per entity. Adapter errors, panics and
    /// timeouts become UNKNOWN observations and never abort the cycle.
    #[instrument(skip_all, fields(entities = entities.len()))]
    pub async fn poll_once(&self, entities: &Arc<[TrackedEntity]>) -> PollCycle {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for idx in 0..entities.len() {
            let entities = Arc::clone(entities);
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.settings.entity_timeout;
            tasks.spawn(async move {
                let entity = &entities[idx];
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (idx, failed(entity, "scheduler closed", "closed", Duration::ZERO));
                };
                let begun = Instant::now();
                let fetch = AssertUnwindSafe(fetcher.fetch(entity)).catch_unwind();
                let result = time::timeout(timeout, fetch).await;
                let latency = begun.elapsed();

                let outcome = match result {
                    Ok(Ok(Ok(observation))) => FetchOutcome {
                        entity_id: entity.id.clone(),
                        observation,
                        latency,
                        error_class: None,
                    },
                    Ok(Ok(Err(err))) => failed(entity, &err.to_string(), err.class(), latency),
                    Ok(Err(_)) => {
                        warn!(entity = %entity.id, "source adapter panicked");
                        failed(entity, "panic: adapter panicked", "panic", latency)
                    }
                    Err(_) => {
                        let err = FetchError::Timeout;
                        failed(entity, &err.to_string(), err.class(), latency)
                    }
                };
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<FetchOutcome>> = vec![None; entities.len()];
        let deadline = self.settings.cycle_deadline.map(|d| started + d);
        let mut deadline_hit = false;

        loop {
            let joined = match deadline {
                Some(at) => match time::timeout_at(at, tasks.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        deadline_hit = true;
                        warn!(pending = tasks.len(), "cycle deadline reached; aborting pending fetches");
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };
            match joined {
                None => break,
                Some(Ok((idx, outcome))) => slots[idx] = Some(outcome),
                Some(Err(err)) => warn!(error = %err, "fetch task failed"),
            }
        }

        let elapsed = started.elapsed();
        let outcomes = slots
            .into_iter()
            .zip(entities.iter())
            .map(|(slot, entity)| {
                slot.unwrap_or_else(|| {
                    if deadline_hit {
                        failed(entity, DEADLINE_MESSAGE, "timeout", elapsed)
                    } else {
                        failed(entity, "task failed", "panic", elapsed)
                    }
                })
            })
            .collect();

        PollCycle {
            outcomes,
            elapsed,
            deadline_hit,
        }
    }
}

fn failed(
    entity: &TrackedEntity,
    message: &str,
    class: &'static str,
    latency: Duration,
) -> FetchOutcome {
    FetchOutcome {
        entity_id: entity.id.clone(),
        observation: Observation::unknown(message),
        latency,
        error_class: Some(class),
    }
}
