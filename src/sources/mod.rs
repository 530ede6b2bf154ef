use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::HttpSettings;
use crate::entity::{Source, TrackedEntity};
use crate::model::Observation;
use crate::normalize::Normalizer;

pub mod forecast;
pub mod incidents;
pub mod market;
pub mod network;
pub mod rss;
pub mod statuspage;

/// Failure to obtain a usable payload from a source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Request (or the whole fetch) exceeded its time budget.
    #[error("timeout")]
    Timeout,

    /// Connection, TLS or HTTP status failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response arrived but did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn class(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Transport(_) => "transport",
            FetchError::Parse(_) => "parse",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Transport(format!("HTTP {status}"))
        } else if err.is_connect() {
            FetchError::Transport("connection failed".to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Parse(err.to_string())
    }
}

/// Produces exactly one observation, or a typed error, per call.
///
/// Adapters only fetch and shape a provider's raw response; turning that
/// payload into an [`Observation`] is the [`Normalizer`]'s job.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, entity: &TrackedEntity) -> Result<Observation, FetchError>;
}

/// Production fetcher: a shared HTTP client plus the normalizer.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    normalizer: Normalizer,
}

impl HttpFetcher {
    pub fn new(settings: &HttpSettings, normalizer: Normalizer) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self { client, normalizer })
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub(crate) async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let body = self.get_text(url).await?;
        decode_json(&body)
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, entity: &TrackedEntity) -> Result<Observation, FetchError> {
        let n = &self.normalizer;
        match &entity.source {
            Source::Statuspage { base_url } => {
                let summary = statuspage::fetch_summary(self, base_url).await?;
                Ok(n.statuspage_overall(&summary))
            }
            Source::StatuspageComponent {
                base_url,
                component_match,
            } => {
                let summary = statuspage::fetch_summary(self, base_url).await?;
                Ok(n.statuspage_components(&summary, component_match))
            }
            Source::Rss {
                url,
                resolved_markers,
            } => {
                let digest = rss::fetch(self, url).await?;
                Ok(n.rss_feed(&digest, resolved_markers))
            }
            Source::SlackStatus {
                current_url,
                history_url,
            } => incidents::slack(self, current_url, history_url.as_deref()).await,
            Source::GcpIncidents {
                incidents_url,
                product_ids,
            } => {
                let incidents = incidents::fetch_gcp(self, incidents_url).await?;
                Ok(n.gcp_incidents(&incidents, product_ids, chrono::Utc::now()))
            }
            Source::CoingeckoPrice {
                asset_id,
                vs_currency,
                api_base,
            } => {
                let reading =
                    market::coingecko(self, api_base.as_deref(), asset_id, vs_currency).await?;
                Ok(n.market_quote(reading))
            }
            Source::FxRate {
                base,
                quote,
                api_base,
            } => {
                let reading = market::frankfurter(self, api_base.as_deref(), base, quote).await?;
                Ok(n.market_quote(reading))
            }
            Source::StooqQuote { symbol, api_base } => {
                let reading = market::stooq(self, api_base.as_deref(), symbol).await?;
                Ok(n.market_quote(reading))
            }
            Source::DoomsdayClock {
                current_url,
                previous_url,
            } => forecast::doomsday(self, current_url, previous_url.as_deref()).await,
            Source::MetaculusDate {
                question_id,
                aggregation,
                quantile,
                api_base,
            } => {
                let reading = forecast::metaculus(
                    self,
                    api_base.as_deref(),
                    *question_id,
                    aggregation,
                    *quantile,
                )
                .await?;
                Ok(n.date_forecast(&reading, chrono::Utc::now()))
            }
            Source::ManifoldYearMarket {
                market_id,
                api_base,
            } => {
                let reading = forecast::manifold(self, api_base.as_deref(), market_id).await?;
                Ok(n.date_forecast(&reading, chrono::Utc::now()))
            }
            Source::BitcoinNetwork {
                api_base,
                thresholds,
            } => {
                let reading = network::fetch(self, api_base.as_deref()).await?;
                Ok(n.network_health(&reading, thresholds, chrono::Utc::now()))
            }
        }
    }
}

pub(crate) fn decode_json<T: DeserializeOwned>(body: &str) -> Result<T, FetchError> {
    if body.trim().is_empty() {
        return Err(FetchError::Parse("empty response body".to_string()));
    }
    Ok(serde_json::from_str(body)?)
}

pub(crate) fn api_base<'a>(configured: Option<&'a str>, default: &'a str) -> &'a str {
    configured
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .trim_end_matches('/')
}
