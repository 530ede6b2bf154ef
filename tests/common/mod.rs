#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use servicedash::entity::{DisplayFormat, Source, TrackedEntity};
use servicedash::model::{Observation, State, StatusRecord};
use servicedash::sources::{FetchError, SourceFetcher};

pub enum Behavior {
    Reply(Observation),
    Fail(FetchError),
    Delay(Duration, Observation),
    Hang,
    Panic,
}

/// Scripted fetcher: each entity replays its queue, repeating the last step.
#[derive(Default)]
pub struct FakeFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Behavior>>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, entity_id: &str, steps: Vec<Behavior>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(entity_id.to_string(), steps.into());
        self
    }

    fn next_step(&self, entity_id: &str) -> Behavior {
        let mut scripts = self.scripts.lock().unwrap();
        let Some(queue) = scripts.get_mut(entity_id) else {
            return Behavior::Reply(Observation::new(State::Ok, "ok"));
        };
        if queue.len() > 1 {
            return queue.pop_front().unwrap();
        }
        match queue.front() {
            Some(Behavior::Reply(obs)) => Behavior::Reply(obs.clone()),
            Some(Behavior::Fail(err)) => Behavior::Fail(err.clone()),
            Some(Behavior::Delay(d, obs)) => Behavior::Delay(*d, obs.clone()),
            Some(Behavior::Hang) => Behavior::Hang,
            Some(Behavior::Panic) => Behavior::Panic,
            None => Behavior::Reply(Observation::new(State::Ok, "ok")),
        }
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, entity: &TrackedEntity) -> Result<Observation, FetchError> {
        match self.next_step(&entity.id) {
            Behavior::Reply(obs) => Ok(obs),
            Behavior::Fail(err) => Err(err),
            Behavior::Delay(delay, obs) => {
                tokio::time::sleep(delay).await;
                Ok(obs)
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::Panic => panic!("adapter blew up"),
        }
    }
}

pub fn feed_entity(id: &str, group: &str) -> TrackedEntity {
    TrackedEntity {
        id: id.to_string(),
        name: id.to_uppercase(),
        group: group.to_string(),
        format: DisplayFormat::default(),
        deadband: None,
        source: Source::Rss {
            url: format!("https://status.example.com/{id}.rss"),
            resolved_markers: vec!["RESOLVED".to_string()],
        },
    }
}

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, h, m, 0).unwrap()
}

pub fn record(entity_id: &str, ts: DateTime<Utc>, state: State, value: Option<f64>) -> StatusRecord {
    StatusRecord {
        entity_id: entity_id.to_string(),
        ts,
        state,
        value,
        latency_ms: Some(10),
        message: Some(state.to_string()),
    }
}
