use chrono::{Duration, TimeZone, Utc};
use servicedash::entity::NetworkThresholds;
use servicedash::model::State;
use servicedash::normalize::{Normalizer, SeverityTable, SeverityTables};
use servicedash::sources::forecast::DateForecast;
use servicedash::sources::incidents::parse_incidents;
use servicedash::sources::market::{parse_frankfurter, parse_stooq};
use servicedash::sources::network::NetworkReading;
use servicedash::sources::rss::parse_feed;
use servicedash::sources::statuspage::parse_summary;

#[test]
fn empty_rss_feed_is_ok() {
    let feed = parse_feed(r#"<?xml version="1.0"?><rss><channel><title>AWS</title></channel></rss>"#)
        .expect("feed");
    let obs = Normalizer::default().rss_feed(&feed, &["RESOLVED".to_string()]);
    assert_eq!(obs.state, State::Ok);
    assert_eq!(obs.message, "No active events");
}

#[test]
fn rss_titles_without_resolved_marker_are_degraded() {
    let xml = r#"<rss><channel>
        <item><title>[RESOLVED] Increased error rates</title></item>
        <item><title>Elevated latency in us-east-1</title></item>
    </channel></rss>"#;
    let feed = parse_feed(xml).expect("feed");
    let n = Normalizer::default();

    let obs = n.rss_feed(&feed, &["resolved".to_string()]);
    assert_eq!(obs.state, State::Degraded);
    assert_eq!(obs.message, "Active: Elevated latency in us-east-1");

    let resolved_only = parse_feed(
        "<rss><channel><item><title>[RESOLVED] Increased error rates</title></item></channel></rss>",
    )
    .expect("feed");
    let obs = n.rss_feed(&resolved_only, &["RESOLVED".to_string()]);
    assert_eq!(obs.state, State::Ok);
    assert_eq!(obs.message, "1 event(s) (all resolved)");
}

#[test]
fn critical_indicator_is_outage() {
    let summary = parse_summary(
        r#"{"status": {"indicator": "critical", "description": "Major System Outage"},
            "components": [], "incidents": []}"#,
    )
    .expect("summary");
    let obs = Normalizer::default().statuspage_overall(&summary);
    assert_eq!(obs.state, State::Outage);
    assert_eq!(obs.message, "Major System Outage");
}

#[test]
fn statuspage_indicators_follow_table() {
    let n = Normalizer::default();
    let cases = [
        ("none", State::Ok),
        ("minor", State::Degraded),
        ("major", State::Degraded),
        ("critical", State::Outage),
        ("sideways", State::Unknown),
    ];
    for (indicator, expected) in cases {
        let body = format!(r#"{{"status": {{"indicator": "{indicator}"}}}}"#);
        let summary = parse_summary(&body).expect("summary");
        assert_eq!(n.statuspage_overall(&summary).state, expected, "{indicator}");
    }
}

#[test]
fn active_incident_leads_the_message() {
    let summary = parse_summary(
        r#"{"status": {"indicator": "minor", "description": "Partially Degraded Service"},
            "incidents": [
                {"name": "Delayed webhooks", "status": "investigating"},
                {"name": "Old thing", "status": "resolved"}
            ]}"#,
    )
    .expect("summary");
    let obs = Normalizer::default().statuspage_overall(&summary);
    assert_eq!(obs.state, State::Degraded);
    assert_eq!(obs.message, "1 active: Delayed webhooks");
}

#[test]
fn components_take_the_worst_match() {
    let summary = parse_summary(
        r#"{"components": [
            {"name": "API Requests", "status": "operational"},
            {"name": "API Webhooks", "status": "partial_outage"},
            {"name": "API Actions", "status": "major_outage"},
            {"name": "API Pages", "status": "operational"},
            {"name": "Git Operations", "status": "major_outage"}
        ]}"#,
    )
    .expect("summary");
    let n = Normalizer::default();

    let obs = n.statuspage_components(&summary, &["api".to_string()]);
    assert_eq!(obs.state, State::Outage);
    assert_eq!(
        obs.message,
        "API Requests: operational; API Webhooks: partial_outage; API Actions: major_outage (+1 more)"
    );

    let obs = n.statuspage_components(&summary, &["copilot".to_string()]);
    assert_eq!(obs.state, State::Unknown);
    assert_eq!(obs.message, "No components matched: copilot");
}

#[test]
fn unrecognised_component_status_dominates_outage() {
    let summary = parse_summary(
        r#"{"components": [
            {"name": "API Requests", "status": "major_outage"},
            {"name": "API Webhooks", "status": "weird_new_status"}
        ]}"#,
    )
    .expect("summary");
    let obs = Normalizer::default().statuspage_components(&summary, &["api".to_string()]);
    assert_eq!(obs.state, State::Unknown);
}

#[test]
fn configured_override_changes_mapping() {
    let overrides = SeverityTables {
        statuspage_indicator: SeverityTable::from_pairs(&[("major", State::Outage)]),
        ..SeverityTables::default()
    };
    let n = Normalizer::new(SeverityTables::with_overrides(&overrides));
    let summary = parse_summary(r#"{"status": {"indicator": "major"}}"#).expect("summary");
    assert_eq!(n.statuspage_overall(&summary).state, State::Outage);
}

#[test]
fn cloud_incidents_use_impact_then_severity() {
    let now = Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();
    let body = r#"[
        {"begin": "2025-03-02T10:00:00Z", "end": null, "status_impact": "SERVICE_DISRUPTION",
         "severity": "low", "external_desc": "Elevated errors creating VMs",
         "affected_products": [{"id": "compute"}]},
        {"begin": "2025-03-02T09:00:00Z", "severity": "high",
         "external_desc": "Networking issue", "affected_products": [{"id": "vpc"}]},
        {"begin": "2025-03-01T20:00:00Z", "end": "2025-03-01T22:00:00Z",
         "affected_products": [{"id": "compute"}]}
    ]"#;
    let incidents = parse_incidents(body).expect("incidents");
    let n = Normalizer::default();

    let obs = n.gcp_incidents(&incidents, &["compute".to_string()], now);
    assert_eq!(obs.state, State::Degraded);
    assert_eq!(obs.message, "1 active: Elevated errors creating VMs");

    let obs = n.gcp_incidents(&incidents, &["vpc".to_string()], now);
    assert_eq!(obs.state, State::Outage);

    let obs = n.gcp_incidents(&incidents, &["storage".to_string()], now);
    assert_eq!(obs.state, State::Ok);
    assert_eq!(obs.message, "No active incidents; 0 in last 24h");
}

#[test]
fn empty_quote_bodies_are_unknown() {
    let n = Normalizer::default();
    let obs = n.market_quote(parse_stooq(""));
    assert_eq!(obs.state, State::Unknown);
    assert_eq!(obs.value, None);

    let obs = n.market_quote(parse_frankfurter("", "USD"));
    assert_eq!(obs.state, State::Unknown);
    assert_eq!(obs.value, None);

    let obs = n.market_quote(parse_frankfurter(
        r#"{"date": "2025-01-10", "rates": {"USD": 1.0301}}"#,
        "USD",
    ));
    assert_eq!(obs.state, State::Ok);
    assert_eq!(obs.value, Some(1.0301));
}

#[test]
fn date_forecast_counts_down_in_days() {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let n = Normalizer::default();
    let forecast = DateForecast {
        eta: Some(now + Duration::days(10)),
        label: "Metaculus q3479 p50".to_string(),
    };
    let obs = n.date_forecast(&forecast, now);
    assert_eq!(obs.state, State::Ok);
    assert_eq!(obs.value, Some(10.0));
    assert_eq!(obs.message, "Metaculus q3479 p50 ETA 2025-01-11");

    let missing = DateForecast {
        eta: None,
        label: "Metaculus q3479 p50".to_string(),
    };
    assert_eq!(n.date_forecast(&missing, now).state, State::Unknown);
}

#[test]
fn network_health_applies_thresholds() {
    let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
    let thresholds = NetworkThresholds::default();
    let n = Normalizer::default();
    let reading = |age_min: i64, fee: i64, vsize: f64| NetworkReading {
        last_block_time: now.timestamp() - age_min * 60,
        mempool_vsize: Some(vsize),
        mempool_count: Some(42_000),
        fastest_fee: Some(fee),
    };

    let obs = n.network_health(&reading(8, 12, 31_500_000.0), &thresholds, now);
    assert_eq!(obs.state, State::Ok);
    assert_eq!(obs.message, "blk 8m mem 31.5MB/42k fee 12 sat/vB");

    assert_eq!(
        n.network_health(&reading(8, 80, 31_500_000.0), &thresholds, now).state,
        State::Degraded
    );
    assert_eq!(
        n.network_health(&reading(8, 12, 75_000_000.0), &thresholds, now).state,
        State::Degraded
    );
    assert_eq!(
        n.network_health(&reading(75, 12, 1_000_000.0), &thresholds, now).state,
        State::Degraded
    );
    assert_eq!(
        n.network_health(&reading(130, 12, 1_000_000.0), &thresholds, now).state,
        State::Outage
    );
}
