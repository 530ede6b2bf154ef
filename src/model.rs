use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health state of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Ok,
    Degraded,
    Outage,
    Unknown,
}

impl State {
    pub const ALL: [State; 4] = [State::Ok, State::Degraded, State::Outage, State::Unknown];

    pub fn as_str(self) -> &'static str {
        match self {
            State::Ok => "ok",
            State::Degraded => "degraded",
            State::Outage => "outage",
            State::Unknown => "unknown",
        }
    }

    /// Severity used for worst-case selection and stored alongside each
    /// record. A status that cannot be read outranks every known one.
    pub fn rank(self) -> u8 {
        match self {
            State::Ok => 0,
            State::Degraded => 1,
            State::Outage => 2,
            State::Unknown => 3,
        }
    }

    pub fn is_ok(self) -> bool {
        self == State::Ok
    }

    /// Worst state of the iterator, or `None` when it is empty.
    pub fn worst<I>(states: I) -> Option<State>
    where
        I: IntoIterator<Item = State>,
    {
        states.into_iter().max_by_key(|s| s.rank())
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ok" | "operational" => Ok(State::Ok),
            "degraded" => Ok(State::Degraded),
            "outage" => Ok(State::Outage),
            "unknown" => Ok(State::Unknown),
            other => Err(format!("unrecognised state `{other}`")),
        }
    }
}

/// Normalized adapter output before the cycle assigns a timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub state: State,
    pub value: Option<f64>,
    pub message: String,
}

impl Observation {
    pub fn new(state: State, message: impl Into<String>) -> Self {
        Self {
            state,
            value: None,
            message: message.into(),
        }
    }

    /// An UNKNOWN observation. Never carries a value.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(State::Unknown, message)
    }

    pub fn with_value(mut self, value: f64) -> Self {
        if self.state != State::Unknown && value.is_finite() {
            self.value = Some(value);
        }
        self
    }
}

/// One timestamped observation for an entity, as stored in history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub entity_id: String,
    pub ts: DateTime<Utc>,
    pub state: State,
    pub value: Option<f64>,
    pub latency_ms: Option<i64>,
    pub message: Option<String>,
}

impl StatusRecord {
    pub fn from_observation(
        entity_id: impl Into<String>,
        ts: DateTime<Utc>,
        observation: Observation,
        latency_ms: Option<i64>,
    ) -> Self {
        let value = match observation.state {
            State::Unknown => None,
            _ => observation.value,
        };
        let message = Some(observation.message).filter(|m| !m.trim().is_empty());
        Self {
            entity_id: entity_id.into(),
            ts,
            state: observation.state,
            value,
            latency_ms,
            message,
        }
    }
}
