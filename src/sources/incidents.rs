use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{FetchError, HttpFetcher, decode_json};
use crate::model::Observation;
use crate::normalize::HistoryNote;
use crate::timeutil::parse_datetime;

/// Slack-style `current` status document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackCurrent {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub active_incidents: Vec<Value>,
}

/// One incident from a Google-Cloud-style `incidents.json` listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudIncident {
    #[serde(default)]
    pub begin: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub status_impact: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub external_desc: Option<String>,
    #[serde(default)]
    pub affected_products: Vec<AffectedProduct>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AffectedProduct {
    #[serde(default)]
    pub id: String,
}

impl CloudIncident {
    pub fn affects_any(&self, product_ids: &[String]) -> bool {
        self.affected_products
            .iter()
            .any(|p| product_ids.iter().any(|id| !id.is_empty() && *id == p.id))
    }

    pub fn began_at(&self) -> Option<DateTime<Utc>> {
        self.begin.as_deref().and_then(parse_datetime)
    }

    pub fn is_active(&self) -> bool {
        self.end.as_deref().and_then(parse_datetime).is_none()
    }
}

pub async fn slack(
    http: &HttpFetcher,
    current_url: &str,
    history_url: Option<&str>,
) -> Result<Observation, FetchError> {
    let current = parse_current(&http.get_text(current_url.trim()).await?)?;

    let note = match history_url.map(str::trim).filter(|u| !u.is_empty()) {
        None => HistoryNote::NotConfigured,
        Some(url) => match http.get_text(url).await.and_then(|body| parse_history(&body)) {
            Ok(items) => HistoryNote::Recent(count_recent(&items, Utc::now())),
            Err(err) => {
                debug!(url, error = %err, "incident history unavailable");
                HistoryNote::Unavailable
            }
        },
    };

    Ok(http.normalizer().slack_status(&current, note))
}

pub fn parse_current(body: &str) -> Result<SlackCurrent, FetchError> {
    decode_json(body)
}

pub fn parse_history(body: &str) -> Result<Vec<Value>, FetchError> {
    decode_json(body)
}

/// History entries created within the last 24 hours of `now`.
pub fn count_recent(items: &[Value], now: DateTime<Utc>) -> usize {
    let since = now - Duration::hours(24);
    items
        .iter()
        .filter_map(|item| item.get("date_created").and_then(Value::as_str))
        .filter_map(parse_datetime)
        .filter(|created| *created >= since)
        .count()
}

pub async fn fetch_gcp(
    http: &HttpFetcher,
    incidents_url: &str,
) -> Result<Vec<CloudIncident>, FetchError> {
    let body = http.get_text(incidents_url.trim()).await?;
    parse_incidents(&body)
}

pub fn parse_incidents(body: &str) -> Result<Vec<CloudIncident>, FetchError> {
    decode_json(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn counts_history_within_a_day() {
        let now = Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();
        let items = vec![
            json!({"date_created": "2025-03-02T08:00:00-08:00"}),
            json!({"date_created": "2025-03-01T13:00:00Z"}),
            json!({"date_created": "2025-02-20T13:00:00Z"}),
            json!({"title": "no date"}),
        ];
        assert_eq!(count_recent(&items, now), 2);
    }

    #[test]
    fn incident_activity_depends_on_end() {
        let body = r#"[
            {"begin": "2025-03-01T10:00:00Z", "end": null, "severity": "high",
             "affected_products": [{"id": "compute"}]},
            {"begin": "2025-02-01T10:00:00Z", "end": "2025-02-01T12:00:00Z",
             "affected_products": [{"id": "storage"}]}
        ]"#;
        let incidents = parse_incidents(body).expect("incidents");
        assert!(incidents[0].is_active());
        assert!(!incidents[1].is_active());
        assert!(incidents[0].affects_any(&["compute".to_string()]));
        assert!(!incidents[1].affects_any(&["compute".to_string()]));
    }

    #[test]
    fn current_tolerates_missing_fields() {
        let current = parse_current(r#"{"status": "ok"}"#).expect("current");
        assert_eq!(current.status.as_deref(), Some("ok"));
        assert!(current.active_incidents.is_empty());
    }
}
