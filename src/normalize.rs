use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::NetworkThresholds;
use crate::model::{Observation, State};
use crate::sources::forecast::{ClockReading, DateForecast};
use crate::sources::incidents::{CloudIncident, SlackCurrent};
use crate::sources::market::QuoteReading;
use crate::sources::network::NetworkReading;
use crate::sources::rss::FeedDigest;
use crate::sources::statuspage::StatuspageSummary;

/// Case-insensitive vocabulary → state lookup. Every provider vocabulary is
/// one of these so the mapping can be overridden from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeverityTable(BTreeMap<String, State>);

impl SeverityTable {
    pub fn from_pairs(pairs: &[(&str, State)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), *v))
                .collect(),
        )
    }

    pub fn lookup(&self, key: &str) -> Option<State> {
        self.0.get(&key.trim().to_ascii_lowercase()).copied()
    }

    /// Worst state among the entries whose key occurs inside `text`.
    pub fn lookup_contained(&self, text: &str) -> Option<State> {
        let text = text.to_ascii_lowercase();
        self.0
            .iter()
            .filter(|(k, _)| !k.is_empty() && text.contains(k.as_str()))
            .map(|(_, v)| *v)
            .max_by_key(|s| s.rank())
    }

    fn merge(&mut self, overrides: &SeverityTable) {
        for (k, v) in &overrides.0 {
            self.0.insert(k.trim().to_ascii_lowercase(), *v);
        }
    }
}

/// All provider vocabularies. Config entries are merged key by key on top
/// of the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityTables {
    #[serde(default)]
    pub statuspage_indicator: SeverityTable,
    #[serde(default)]
    pub statuspage_component: SeverityTable,
    #[serde(default)]
    pub incident_status: SeverityTable,
    #[serde(default)]
    pub incident_impact: SeverityTable,
    #[serde(default)]
    pub incident_severity: SeverityTable,
}

impl SeverityTables {
    pub fn builtin() -> Self {
        Self {
            statuspage_indicator: SeverityTable::from_pairs(&[
                ("none", State::Ok),
                ("minor", State::Degraded),
                ("major", State::Degraded),
                ("critical", State::Outage),
            ]),
            statuspage_component: SeverityTable::from_pairs(&[
                ("operational", State::Ok),
                ("degraded_performance", State::Degraded),
                ("partial_outage", State::Degraded),
                ("under_maintenance", State::Degraded),
                ("major_outage", State::Outage),
            ]),
            incident_status: SeverityTable::from_pairs(&[
                ("ok", State::Ok),
                ("incident", State::Degraded),
                ("degraded", State::Degraded),
                ("partial_outage", State::Degraded),
                ("issue", State::Degraded),
                ("outage", State::Outage),
                ("down", State::Outage),
                ("major_outage", State::Outage),
            ]),
            incident_impact: SeverityTable::from_pairs(&[
                ("outage", State::Outage),
                ("disruption", State::Degraded),
            ]),
            incident_severity: SeverityTable::from_pairs(&[
                ("low", State::Degraded),
                ("medium", State::Degraded),
                ("high", State::Outage),
                ("critical", State::Outage),
            ]),
        }
    }

    pub fn with_overrides(overrides: &SeverityTables) -> Self {
        let mut tables = Self::builtin();
        tables.statuspage_indicator.merge(&overrides.statuspage_indicator);
        tables.statuspage_component.merge(&overrides.statuspage_component);
        tables.incident_status.merge(&overrides.incident_status);
        tables.incident_impact.merge(&overrides.incident_impact);
        tables.incident_severity.merge(&overrides.incident_severity);
        tables
    }
}

/// Outcome of an optional secondary history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryNote {
    NotConfigured,
    Unavailable,
    Recent(usize),
}

/// Maps shaped provider payloads onto [`Observation`]s.
#[derive(Debug, Clone)]
pub struct Normalizer {
    tables: SeverityTables,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(SeverityTables::builtin())
    }
}

impl Normalizer {
    pub fn new(tables: SeverityTables) -> Self {
        Self { tables }
    }

    pub fn statuspage_overall(&self, summary: &StatuspageSummary) -> Observation {
        let indicator = summary
            .status
            .as_ref()
            .and_then(|s| s.indicator.as_deref())
            .unwrap_or_default();
        let state = self
            .tables
            .statuspage_indicator
            .lookup(indicator)
            .unwrap_or(State::Unknown);

        let active: Vec<_> = summary.active_incidents().collect();
        let message = match active.first() {
            Some(top) => format!(
                "{} active: {}",
                active.len(),
                top.name.as_deref().unwrap_or("incident")
            ),
            None => summary
                .status
                .as_ref()
                .and_then(|s| s.description.as_deref())
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| state.to_string()),
        };
        Observation::new(state, message)
    }

    /// Worst state among the components matching any pattern.
    pub fn statuspage_components(
        &self,
        summary: &StatuspageSummary,
        patterns: &[String],
    ) -> Observation {
        let matched = summary.matching_components(patterns);
        if matched.is_empty() {
            return Observation::unknown(format!(
                "No components matched: {}",
                patterns.join(", ")
            ));
        }

        let table = &self.tables.statuspage_component;
        let state = State::worst(matched.iter().map(|c| {
            table
                .lookup(c.status.as_deref().unwrap_or_default())
                .unwrap_or(State::Unknown)
        }))
        .unwrap_or(State::Unknown);

        let mut message = matched
            .iter()
            .take(3)
            .map(|c| format!("{}: {}", c.name, c.status.as_deref().unwrap_or("?")))
            .collect::<Vec<_>>()
            .join("; ");
        if matched.len() > 3 {
            message.push_str(&format!(" (+{} more)", matched.len() - 3));
        }
        Observation::new(state, message)
    }

    /// An empty feed means no incidents, which is healthy.
    pub fn rss_feed(&self, digest: &FeedDigest, resolved_markers: &[String]) -> Observation {
        if digest.items == 0 {
            return Observation::new(State::Ok, "No active events");
        }
        let markers: Vec<String> = resolved_markers
            .iter()
            .map(|m| m.trim().to_uppercase())
            .filter(|m| !m.is_empty())
            .collect();
        let active = digest.titles.iter().find(|title| {
            let upper = title.to_uppercase();
            !markers.iter().any(|m| upper.contains(m.as_str()))
        });
        match active {
            Some(title) => Observation::new(State::Degraded, format!("Active: {title}")),
            None => Observation::new(
                State::Ok,
                format!("{} event(s) (all resolved)", digest.titles.len()),
            ),
        }
    }

    pub fn slack_status(&self, current: &SlackCurrent, history: HistoryNote) -> Observation {
        let active = current.active_incidents.len();
        let reported = current
            .status
            .as_deref()
            .and_then(|s| self.tables.incident_status.lookup(s));
        let state = match reported {
            Some(State::Ok) if active == 0 => State::Ok,
            Some(State::Ok) => State::Degraded,
            Some(other) => other,
            None if active > 0 => State::Degraded,
            None => State::Unknown,
        };

        let mut message = if active > 0 {
            format!("{active} active incident(s)")
        } else {
            "No active incidents".to_string()
        };
        match history {
            HistoryNote::NotConfigured => {}
            HistoryNote::Unavailable => message.push_str("; history: unavailable"),
            HistoryNote::Recent(n) => message.push_str(&format!("; {n} in last 24h")),
        }
        Observation::new(state, message)
    }

    pub fn cloud_incident_state(&self, incident: &CloudIncident) -> State {
        if !incident.is_active() {
            return State::Ok;
        }
        let impact = incident.status_impact.as_deref().unwrap_or_default();
        let severity = incident.severity.as_deref().unwrap_or_default();
        self.tables
            .incident_impact
            .lookup_contained(impact)
            .or_else(|| self.tables.incident_severity.lookup(severity))
            .unwrap_or(State::Unknown)
    }

    pub fn gcp_incidents(
        &self,
        incidents: &[CloudIncident],
        product_ids: &[String],
        now: DateTime<Utc>,
    ) -> Observation {
        let since = now - chrono::Duration::hours(24);
        let matched: Vec<&CloudIncident> = incidents
            .iter()
            .filter(|i| i.affects_any(product_ids))
            .collect();
        let recent = matched
            .iter()
            .filter(|i| i.began_at().is_some_and(|b| b >= since))
            .count();
        let active: Vec<&CloudIncident> = matched.into_iter().filter(|i| i.is_active()).collect();

        let Some(top) = active.first() else {
            return Observation::new(
                State::Ok,
                format!("No active incidents; {recent} in last 24h"),
            );
        };
        let state = State::worst(active.iter().map(|i| self.cloud_incident_state(i)))
            .unwrap_or(State::Unknown);
        let desc = top
            .external_desc
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or("Active incident");
        Observation::new(state, format!("{} active: {desc}", active.len()))
    }

    /// A quote without a value is UNKNOWN; nothing is carried over from earlier readings.
    pub fn market_quote(&self, reading: QuoteReading) -> Observation {
        match reading.value {
            Some(value) => Observation::new(State::Ok, reading.note).with_value(value),
            None => Observation::unknown(reading.note),
        }
    }

    pub fn doomsday_clock(
        &self,
        current: &ClockReading,
        previous: Option<&ClockReading>,
    ) -> Observation {
        let Some(seconds) = current.seconds else {
            return Observation::unknown("Doomsday parse error");
        };
        let mut message = format!("{seconds}s to midnight");
        if let Some(year) = current.year {
            message.push_str(&format!(" ({year})"));
        }

        if let Some(prev) = previous
            && let Some(prev_seconds) = prev.seconds
        {
            let delta = seconds - prev_seconds;
            let direction = match delta {
                d if d < 0 => "toward midnight",
                d if d > 0 => "away from midnight",
                _ => "unchanged",
            };
            let years = match (current.published, prev.published) {
                (Some(cur), Some(before)) if cur > before => {
                    (cur - before).num_seconds() as f64 / (365.25 * 86_400.0)
                }
                _ => 1.0,
            };
            let rate = delta as f64 / years;
            let label = prev
                .year
                .map(|y| y.to_string())
                .unwrap_or_else(|| "prev".to_string());
            message.push_str(&format!(
                "; Δ {delta:+}s vs {label} ({direction}); ~{rate:+.2}s/yr"
            ));
        }

        Observation::new(State::Ok, message).with_value(seconds as f64)
    }

    /// Countdown in days from `now` to the forecast date.
    pub fn date_forecast(&self, forecast: &DateForecast, now: DateTime<Utc>) -> Observation {
        let Some(eta) = forecast.eta else {
            return Observation::unknown(format!("{}: no forecast date", forecast.label));
        };
        let days = (eta - now).num_seconds() as f64 / 86_400.0;
        Observation::new(
            State::Ok,
            format!("{} ETA {}", forecast.label, eta.format("%Y-%m-%d")),
        )
        .with_value(days)
    }

    pub fn network_health(
        &self,
        reading: &NetworkReading,
        thresholds: &NetworkThresholds,
        now: DateTime<Utc>,
    ) -> Observation {
        let age_min = ((now.timestamp() - reading.last_block_time) / 60).max(0);
        let mempool_mb = reading.mempool_mb();

        let mut state = if age_min >= thresholds.stale_minutes_outage {
            State::Outage
        } else if age_min >= thresholds.stale_minutes_degraded {
            State::Degraded
        } else {
            State::Ok
        };
        if state != State::Outage {
            let fee_congested = reading
                .fastest_fee
                .is_some_and(|fee| fee >= thresholds.congestion_fee_sat_vb);
            let mempool_congested =
                mempool_mb.is_some_and(|mb| mb >= thresholds.congestion_mempool_mb);
            if fee_congested || mempool_congested {
                state = State::Degraded;
            }
        }

        let mut parts = vec![format!("blk {age_min}m")];
        match (mempool_mb, reading.mempool_count) {
            (Some(mb), Some(count)) => parts.push(format!("mem {mb:.1}MB/{}k", count / 1000)),
            (Some(mb), None) => parts.push(format!("mem {mb:.1}MB")),
            _ => {}
        }
        if let Some(fee) = reading.fastest_fee {
            parts.push(format!("fee {fee} sat/vB"));
        }
        Observation::new(state, parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn overrides_merge_on_top_of_builtin() {
        let overrides = SeverityTables {
            statuspage_indicator: SeverityTable::from_pairs(&[
                ("major", State::Outage),
                ("maintenance", State::Degraded),
            ]),
            ..SeverityTables::default()
        };
        let tables = SeverityTables::with_overrides(&overrides);
        assert_eq!(tables.statuspage_indicator.lookup("major"), Some(State::Outage));
        assert_eq!(
            tables.statuspage_indicator.lookup(" Maintenance "),
            Some(State::Degraded)
        );
        assert_eq!(tables.statuspage_indicator.lookup("none"), Some(State::Ok));
    }

    #[test]
    fn impact_keywords_match_inside_text() {
        let tables = SeverityTables::builtin();
        assert_eq!(
            tables.incident_impact.lookup_contained("SERVICE_OUTAGE"),
            Some(State::Outage)
        );
        assert_eq!(
            tables.incident_impact.lookup_contained("SERVICE_DISRUPTION"),
            Some(State::Degraded)
        );
        assert_eq!(tables.incident_impact.lookup_contained("SERVICE_INFORMATION"), None);
    }

    #[test]
    fn slack_ok_with_open_incidents_is_degraded() {
        let n = Normalizer::default();
        let current = SlackCurrent {
            status: Some("ok".into()),
            active_incidents: vec![serde_json::json!({"title": "Messages delayed"})],
        };
        let obs = n.slack_status(&current, HistoryNote::Recent(2));
        assert_eq!(obs.state, State::Degraded);
        assert_eq!(obs.message, "1 active incident(s); 2 in last 24h");

        let quiet = SlackCurrent {
            status: Some("ok".into()),
            active_incidents: Vec::new(),
        };
        assert_eq!(n.slack_status(&quiet, HistoryNote::NotConfigured).state, State::Ok);

        let odd = SlackCurrent {
            status: Some("sideways".into()),
            active_incidents: Vec::new(),
        };
        assert_eq!(n.slack_status(&odd, HistoryNote::Unavailable).state, State::Unknown);
    }

    #[test]
    fn doomsday_reports_movement_against_previous_statement() {
        let n = Normalizer::default();
        let current = ClockReading {
            seconds: Some(89),
            year: Some(2025),
            published: Some(Utc.with_ymd_and_hms(2025, 1, 28, 0, 0, 0).unwrap()),
        };
        let previous = ClockReading {
            seconds: Some(90),
            year: Some(2024),
            published: None,
        };
        let obs = n.doomsday_clock(&current, Some(&previous));
        assert_eq!(obs.state, State::Ok);
        assert_eq!(obs.value, Some(89.0));
        assert_eq!(
            obs.message,
            "89s to midnight (2025); Δ -1s vs 2024 (toward midnight); ~-1.00s/yr"
        );

        let unparsed = n.doomsday_clock(&ClockReading::default(), None);
        assert_eq!(unparsed.state, State::Unknown);
        assert_eq!(unparsed.value, None);
    }
}
