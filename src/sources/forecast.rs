use std::sync::LazyLock;

use chrono::{DateTime, Duration, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{FetchError, HttpFetcher, api_base, decode_json};
use crate::entity::{DEFAULT_MANIFOLD_API, DEFAULT_METACULUS_API};
use crate::model::Observation;
use crate::timeutil::parse_datetime;

static SECONDS_IT_IS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bit\s+is\s+(?:still\s+)?(\d+)\s*seconds?\s+to\s+midnight\b")
        .expect("valid regex")
});
static SECONDS_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*seconds?\s+to\s+midnight\b").expect("valid regex"));
static MINUTES_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*minutes?\s+to\s+midnight\b").expect("valid regex"));
static STATEMENT_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/doomsday-clock/(\d{4})-statement/?").expect("valid regex"));
static HEADLINE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(20\d{2})\s+Doomsday\s+Clock\b").expect("valid regex"));
static DATE_PUBLISHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""datePublished"\s*:\s*"([^"]+)""#).expect("valid regex"));
static YEAR_EXACT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:19|20)\d{2}$").expect("valid regex"));
static YEAR_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((?:19|20)\d{2})\s*[-–—]\s*((?:19|20)\d{2})$").expect("valid regex")
});
static YEAR_DECADE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^((?:19|20)\d{2})s$").expect("valid regex"));

/// Facts scraped from one Doomsday Clock statement page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockReading {
    pub seconds: Option<i64>,
    pub year: Option<i32>,
    pub published: Option<DateTime<Utc>>,
}

pub fn parse_clock_page(html: &str) -> ClockReading {
    let capture_i64 = |re: &Regex| {
        re.captures(html)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok())
    };
    let seconds = capture_i64(&*SECONDS_IT_IS)
        .or_else(|| capture_i64(&*SECONDS_BARE))
        .or_else(|| capture_i64(&*MINUTES_BARE).map(|m| m * 60));
    let year = capture_i64(&*STATEMENT_YEAR)
        .or_else(|| capture_i64(&*HEADLINE_YEAR))
        .and_then(|y| i32::try_from(y).ok());
    let published = DATE_PUBLISHED
        .captures(html)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_datetime(m.as_str()));
    ClockReading {
        seconds,
        year,
        published,
    }
}

pub async fn doomsday(
    http: &HttpFetcher,
    current_url: &str,
    previous_url: Option<&str>,
) -> Result<Observation, FetchError> {
    let current = parse_clock_page(&http.get_text(current_url.trim()).await?);

    let previous = match previous_url.map(str::trim).filter(|u| !u.is_empty()) {
        None => None,
        Some(url) => match http.get_text(url).await {
            Ok(html) => Some(parse_clock_page(&html)),
            Err(err) => {
                debug!(url, error = %err, "previous statement unavailable");
                None
            }
        },
    };

    Ok(http.normalizer().doomsday_clock(&current, previous.as_ref()))
}

/// A forecast resolved to a single target date.
#[derive(Debug, Clone, PartialEq)]
pub struct DateForecast {
    pub eta: Option<DateTime<Utc>>,
    pub label: String,
}

pub async fn metaculus(
    http: &HttpFetcher,
    base: Option<&str>,
    question_id: u64,
    aggregation: &str,
    quantile: f64,
) -> Result<DateForecast, FetchError> {
    let url = format!(
        "{}/questions/{question_id}/",
        api_base(base, DEFAULT_METACULUS_API)
    );
    let doc: Value = http.get_json(&url).await?;
    parse_metaculus(&doc, question_id, aggregation, quantile)
}

/// Read the aggregate CDF and invert it at `quantile`.
pub fn parse_metaculus(
    doc: &Value,
    question_id: u64,
    aggregation: &str,
    quantile: f64,
) -> Result<DateForecast, FetchError> {
    let question = doc
        .get("question")
        .filter(|q| q.is_object())
        .ok_or_else(|| FetchError::Parse("Metaculus: unexpected response".to_string()))?;

    let range = question
        .pointer("/scaling/continuous_range")
        .and_then(Value::as_array);
    let latest = question
        .get("aggregations")
        .and_then(|a| a.get(aggregation))
        .and_then(|a| a.get("latest"));
    let cdf = latest
        .and_then(|l| l.get("forecast_values"))
        .and_then(Value::as_array);
    let forecasters = latest
        .and_then(|l| l.get("forecaster_count"))
        .and_then(Value::as_i64);

    let (Some(range), Some(cdf)) = (range, cdf) else {
        return Err(FetchError::Parse("Metaculus: missing aggregate CDF".to_string()));
    };
    if range.len() != cdf.len() || range.len() < 2 {
        return Err(FetchError::Parse("Metaculus: missing aggregate CDF".to_string()));
    }

    let mut xs = Vec::with_capacity(range.len());
    let mut ys = Vec::with_capacity(cdf.len());
    for (t, v) in range.iter().zip(cdf) {
        let Some(ts) = t.as_str().and_then(parse_datetime) else {
            continue;
        };
        let Some(p) = v.as_f64() else {
            continue;
        };
        xs.push(ts);
        ys.push(p);
    }
    if xs.len() < 2 {
        return Err(FetchError::Parse("Metaculus: parse error".to_string()));
    }

    let n = forecasters.map(|n| format!(" n={n}")).unwrap_or_default();
    let eta = inverse_cdf(&xs, &ys, quantile);
    Ok(DateForecast {
        eta,
        label: format!("Metaculus Q{question_id} q={quantile:.2}{n}"),
    })
}

/// Linear interpolation of the first crossing of `p` in a monotone CDF.
pub fn inverse_cdf(xs: &[DateTime<Utc>], cdf: &[f64], p: f64) -> Option<DateTime<Utc>> {
    if xs.is_empty() || xs.len() != cdf.len() {
        return None;
    }
    if p <= cdf[0] {
        return Some(xs[0]);
    }
    let idx = cdf.iter().position(|v| *v >= p)?;
    let (v0, v1) = (cdf[idx - 1], cdf[idx]);
    if v1 <= v0 {
        return Some(xs[idx]);
    }
    let frac = ((p - v0) / (v1 - v0)).clamp(0.0, 1.0);
    let span_ms = (xs[idx] - xs[idx - 1]).num_milliseconds() as f64;
    Some(xs[idx - 1] + Duration::milliseconds((span_ms * frac).round() as i64))
}

pub async fn manifold(
    http: &HttpFetcher,
    base: Option<&str>,
    market_id: &str,
) -> Result<DateForecast, FetchError> {
    let market_id = market_id.trim();
    let url = format!("{}/market/{market_id}", api_base(base, DEFAULT_MANIFOLD_API));
    let body = http.get_text(&url).await?;
    parse_manifold(&decode_json(&body)?, market_id)
}

/// Probability-weighted mean of the year-like answers of a multiple-choice market.
pub fn parse_manifold(doc: &Value, market_id: &str) -> Result<DateForecast, FetchError> {
    let answers = doc
        .get("answers")
        .and_then(Value::as_array)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| FetchError::Parse("Manifold: missing answers".to_string()))?;

    let pairs: Vec<(f64, f64)> = answers
        .iter()
        .filter_map(|a| {
            let year = a.get("text").and_then(Value::as_str).and_then(parse_yearish)?;
            let p = a.get("probability").and_then(Value::as_f64)?;
            Some((year, p))
        })
        .collect();

    let total: f64 = pairs.iter().map(|(_, p)| p).sum();
    let question = doc
        .get("question")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    let label = if question.chars().count() > 40 {
        let short: String = question.chars().take(39).collect();
        format!("Manifold {market_id} ({short}…)")
    } else if question.is_empty() {
        format!("Manifold {market_id}")
    } else {
        format!("Manifold {market_id} ({question})")
    };

    if total <= 0.0 {
        return Ok(DateForecast { eta: None, label });
    }
    let expected = pairs.iter().map(|(y, p)| y * p).sum::<f64>() / total;
    Ok(DateForecast {
        eta: year_fraction_to_date(expected),
        label: format!("{label} E[year]={expected:.1}"),
    })
}

/// `2031` → 2031.0, `2030-2034` → 2032.0, `2030s` → 2035.0.
pub fn parse_yearish(text: &str) -> Option<f64> {
    let t = text.trim();
    if YEAR_EXACT.is_match(t) {
        return t.parse().ok();
    }
    if let Some(c) = YEAR_RANGE.captures(t) {
        let y0: f64 = c[1].parse().ok()?;
        let y1: f64 = c[2].parse().ok()?;
        return Some((y0 + y1) / 2.0);
    }
    if let Some(c) = YEAR_DECADE.captures(t) {
        let y: f64 = c[1].parse().ok()?;
        return Some(y + 5.0);
    }
    None
}

fn year_fraction_to_date(year: f64) -> Option<DateTime<Utc>> {
    let whole = year.floor();
    let frac = (year - whole).clamp(0.0, 1.0);
    let start = Utc
        .with_ymd_and_hms(i32::try_from(whole as i64).ok()?, 1, 1, 0, 0, 0)
        .single()?;
    let offset_secs = (frac * 365.25 * 86_400.0).round() as i64;
    Some(start + Duration::seconds(offset_secs))
}
