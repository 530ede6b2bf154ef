use chrono::{DateTime, Local};
use serde_json::Value;

use super::{FetchError, HttpFetcher, api_base};
use crate::entity::{DEFAULT_COINGECKO_API, DEFAULT_FRANKFURTER_API, DEFAULT_STOOQ_API};

/// A quote as read from the wire. `value` is `None` whenever the provider
/// returned nothing usable; `note` then says why.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteReading {
    pub value: Option<f64>,
    pub note: String,
}

impl QuoteReading {
    fn missing(note: impl Into<String>) -> Self {
        Self {
            value: None,
            note: note.into(),
        }
    }

    fn priced(value: f64, note: impl Into<String>) -> Self {
        Self {
            value: Some(value).filter(|v| v.is_finite()),
            note: note.into(),
        }
    }
}

pub async fn coingecko(
    http: &HttpFetcher,
    base: Option<&str>,
    asset_id: &str,
    vs_currency: &str,
) -> Result<QuoteReading, FetchError> {
    let asset_id = asset_id.trim();
    let vs_currency = vs_currency.trim().to_lowercase();
    let url = format!(
        "{}/simple/price?ids={asset_id}&vs_currencies={vs_currency}&include_last_updated_at=true",
        api_base(base, DEFAULT_COINGECKO_API)
    );
    let body = http.get_text(&url).await?;
    Ok(parse_coingecko(&body, asset_id, &vs_currency))
}

pub fn parse_coingecko(body: &str, asset_id: &str, vs_currency: &str) -> QuoteReading {
    let Some(doc) = parse_json(body) else {
        return QuoteReading::missing("CoinGecko: empty or invalid response");
    };
    let Some(asset) = doc.get(asset_id) else {
        return QuoteReading::missing("CoinGecko: asset missing");
    };
    let Some(value) = asset.get(vs_currency).and_then(number) else {
        return QuoteReading::missing("CoinGecko: price missing");
    };
    let note = asset
        .get("last_updated_at")
        .and_then(Value::as_i64)
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .map(|dt| format!("CoinGecko @ {}", dt.with_timezone(&Local).format("%H:%M:%S")))
        .unwrap_or_else(|| "CoinGecko".to_string());
    QuoteReading::priced(value, note)
}

pub async fn frankfurter(
    http: &HttpFetcher,
    base_api: Option<&str>,
    base: &str,
    quote: &str,
) -> Result<QuoteReading, FetchError> {
    let base = base.trim().to_uppercase();
    let quote = quote.trim().to_uppercase();
    let url = format!(
        "{}/latest?from={base}&to={quote}",
        api_base(base_api, DEFAULT_FRANKFURTER_API)
    );
    let body = http.get_text(&url).await?;
    Ok(parse_frankfurter(&body, &quote))
}

pub fn parse_frankfurter(body: &str, quote: &str) -> QuoteReading {
    let Some(doc) = parse_json(body) else {
        return QuoteReading::missing("Frankfurter: empty or invalid response");
    };
    let Some(value) = doc
        .get("rates")
        .and_then(|rates| rates.get(quote))
        .and_then(number)
    else {
        return QuoteReading::missing("Frankfurter: rate missing");
    };
    let note = match doc.get("date").and_then(Value::as_str).map(str::trim) {
        Some(date) if !date.is_empty() => format!("Frankfurter {date}"),
        _ => "Frankfurter".to_string(),
    };
    QuoteReading::priced(value, note)
}

pub async fn stooq(
    http: &HttpFetcher,
    base: Option<&str>,
    symbol: &str,
) -> Result<QuoteReading, FetchError> {
    let url = format!(
        "{}/q/l/?s={}&f=sd2t2ohlcv&h&e=csv",
        api_base(base, DEFAULT_STOOQ_API),
        symbol.trim()
    );
    let body = http.get_text(&url).await?;
    Ok(parse_stooq(&body))
}

/// Stooq answers with a header line and one data row; `N/D` marks missing fields.
pub fn parse_stooq(body: &str) -> QuoteReading {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(_) => return QuoteReading::missing("Stooq: parse error"),
    };
    let row = match reader.records().next() {
        Some(Ok(row)) => row,
        Some(Err(_)) => return QuoteReading::missing("Stooq: parse error"),
        None => return QuoteReading::missing("Stooq: empty"),
    };
    let field = |name: &str| {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .and_then(|idx| row.get(idx))
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("N/D"))
    };

    let Some(close) = field("Close") else {
        return QuoteReading::missing("Stooq: N/D");
    };
    let Ok(value) = close.parse::<f64>() else {
        return QuoteReading::missing("Stooq: parse error");
    };
    let note = match (field("Date"), field("Time")) {
        (Some(date), Some(time)) => format!("Stooq {date} {time}"),
        _ => "Stooq".to_string(),
    };
    QuoteReading::priced(value, note)
}

fn parse_json(body: &str) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str::<Value>(body)
        .ok()
        .filter(Value::is_object)
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
