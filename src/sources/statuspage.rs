use serde::Deserialize;

use super::{FetchError, HttpFetcher, decode_json};

/// Subset of the Statuspage `/api/v2/summary.json` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatuspageSummary {
    #[serde(default)]
    pub status: Option<StatusIndicator>,
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub incidents: Vec<Incident>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusIndicator {
    #[serde(default)]
    pub indicator: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Component {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Incident {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Incident {
    pub fn is_active(&self) -> bool {
        let status = self.status.as_deref().unwrap_or_default().to_ascii_lowercase();
        !matches!(status.as_str(), "resolved" | "postmortem")
    }
}

impl StatuspageSummary {
    pub fn active_incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.iter().filter(|i| i.is_active())
    }

    /// Components whose name contains any pattern, case-insensitively.
    pub fn matching_components(&self, patterns: &[String]) -> Vec<&Component> {
        let patterns: Vec<String> = patterns
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        self.components
            .iter()
            .filter(|c| {
                let name = c.name.to_lowercase();
                patterns.iter().any(|p| name.contains(p.as_str()))
            })
            .collect()
    }
}

pub fn parse_summary(body: &str) -> Result<StatuspageSummary, FetchError> {
    decode_json(body)
}

pub async fn fetch_summary(
    http: &HttpFetcher,
    base_url: &str,
) -> Result<StatuspageSummary, FetchError> {
    let url = format!("{}/api/v2/summary.json", base_url.trim().trim_end_matches('/'));
    let body = http.get_text(&url).await?;
    parse_summary(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = r#"{
        "page": {"id": "x", "name": "Example"},
        "status": {"indicator": "minor", "description": "Minor Service Outage"},
        "components": [
            {"name": "API", "status": "operational"},
            {"name": "Chat Completions API", "status": "degraded_performance"},
            {"name": "Dashboard", "status": "operational"}
        ],
        "incidents": [
            {"name": "Elevated errors", "status": "investigating"},
            {"name": "Old issue", "status": "resolved"}
        ]
    }"#;

    #[test]
    fn parses_summary_and_filters_incidents() {
        let summary = parse_summary(SUMMARY).expect("summary");
        assert_eq!(summary.components.len(), 3);
        let active: Vec<_> = summary.active_incidents().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name.as_deref(), Some("Elevated errors"));
    }

    #[test]
    fn component_patterns_are_case_insensitive_substrings() {
        let summary = parse_summary(SUMMARY).expect("summary");
        let patterns = vec!["api".to_string()];
        let matched = summary.matching_components(&patterns);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn wrong_shape_is_a_parse_error() {
        assert!(matches!(
            parse_summary("[1, 2, 3]"),
            Err(FetchError::Parse(_))
        ));
        assert!(matches!(
            parse_summary("<html>maintenance</html>"),
            Err(FetchError::Parse(_))
        ));
    }
}
