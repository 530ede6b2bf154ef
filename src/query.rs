use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::aggregate::Trend;
use crate::entity::{DisplayFormat, EntityKind, TrackedEntity};
use crate::aggregate;
use crate::history::{HistoryReader, HistoryStore, StoreError, Window};
use crate::model::State;

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub window_hours: usize,
    pub groups: Vec<GroupSummary>,
}

impl Snapshot {
    pub fn entity(&self, id: &str) -> Option<&EntitySummary> {
        self.groups
            .iter()
            .flat_map(|g| g.entities.iter())
            .find(|e| e.id == id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub entities: Vec<EntitySummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
    pub format: DisplayFormat,
    /// UNKNOWN until the first record lands.
    pub state: State,
    pub observed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub message: Option<String>,
    /// Value of the latest record only.
    pub value: Option<f64>,
    /// Latest value, or the last one observed when the latest record has none.
    pub display_value: Option<f64>,
    pub display_text: Option<String>,
    pub value_stale: bool,
    pub uptime: Option<f64>,
    pub trend: Option<Trend>,
    pub episodes: usize,
    pub buckets: Vec<Option<State>>,
    /// Last value per hour slot, aligned with `buckets`.
    pub value_buckets: Vec<Option<f64>>,
    /// Lowest and highest value inside the window.
    pub range: Option<(f64, f64)>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Read side for the dashboard. Stateless: every snapshot is recomputed
/// from history.
#[derive(Clone)]
pub struct QueryService {
    store: HistoryStore,
    entities: Arc<[TrackedEntity]>,
    window: Duration,
    deadband: f64,
}

impl QueryService {
    pub fn new(
        store: HistoryStore,
        entities: Arc<[TrackedEntity]>,
        window: Duration,
        deadband: f64,
    ) -> Self {
        Self {
            store,
            entities,
            window,
            deadband,
        }
    }

    pub async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        self.snapshot_at(Utc::now()).await
    }

    /// Groups ordered by first appearance; entities keep declaration order.
    ///
    /// All reads share one transaction, so a cycle committed mid-snapshot is
    /// either fully visible or not at all.
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Result<Snapshot, StoreError> {
        let window = Window::ending_at(now, self.window);
        let mut groups: Vec<GroupSummary> = Vec::new();
        let mut reader = self.store.reader().await?;

        for entity in self.entities.iter() {
            let summary = self.summarize(&mut reader, entity, window).await?;
            match groups.iter_mut().find(|g| g.name == entity.group) {
                Some(group) => group.entities.push(summary),
                None => groups.push(GroupSummary {
                    name: entity.group.clone(),
                    entities: vec![summary],
                }),
            }
        }

        reader.finish().await?;

        Ok(Snapshot {
            generated_at: now,
            window_hours: window.hours(),
            groups,
        })
    }

    async fn summarize(
        &self,
        reader: &mut HistoryReader,
        entity: &TrackedEntity,
        window: Window,
    ) -> Result<EntitySummary, StoreError> {
        let id = entity.id.as_str();
        let latest = reader.latest(id).await?;

        let (display_value, value_stale) = match latest.as_ref().and_then(|r| r.value) {
            Some(value) => (Some(value), false),
            None => match reader.latest_value(id).await? {
                Some(previous) => (previous.value, true),
                None => (None, false),
            },
        };

        let deadband = entity.deadband.unwrap_or(self.deadband);
        let valued = reader.valued_window_records(id, window).await?;
        let trend = aggregate::trend(&valued, window.end, window.length(), deadband);
        let value_buckets = aggregate::value_buckets(&valued, window.start, window.hours());
        let range = aggregate::range(&valued, window.start, window.end);

        let records = reader.window_records(id, window).await?;
        let uptime = aggregate::uptime(&records, window.start, window.end);
        let episodes = aggregate::episodes(&records, window.start, window.end);
        let buckets = aggregate::buckets(&records, window.start, window.hours());
        let failure = reader.last_failure(id, window.start).await?;

        Ok(EntitySummary {
            id: entity.id.clone(),
            name: entity.name.clone(),
            kind: entity.kind(),
            format: entity.format.clone(),
            state: latest.as_ref().map_or(State::Unknown, |r| r.state),
            observed_at: latest.as_ref().map(|r| r.ts),
            latency_ms: latest.as_ref().and_then(|r| r.latency_ms),
            message: latest.as_ref().and_then(|r| r.message.clone()),
            value: latest.as_ref().and_then(|r| r.value),
            display_value,
            display_text: display_value.map(|v| entity.format.render(v)),
            value_stale,
            uptime,
            trend,
            episodes,
            buckets,
            value_buckets,
            range,
            last_error: failure.as_ref().and_then(|r| r.message.clone()),
            last_error_at: failure.map(|r| r.ts),
        })
    }
}
