use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MEMPOOL_API: &str = "https://mempool.space/api";
pub const DEFAULT_COINGECKO_API: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_FRANKFURTER_API: &str = "https://api.frankfurter.app";
pub const DEFAULT_STOOQ_API: &str = "https://stooq.com";
pub const DEFAULT_METACULUS_API: &str = "https://www.metaculus.com/api2";
pub const DEFAULT_MANIFOLD_API: &str = "https://api.manifold.markets/v0";

/// Coarse entity category used for grouping and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    StatusPage,
    StatusPageComponent,
    RssFeed,
    ApiIncidentList,
    MarketQuote,
    ForecastClock,
    NetworkHealth,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::StatusPage => "status-page",
            EntityKind::StatusPageComponent => "status-page-component",
            EntityKind::RssFeed => "rss-feed",
            EntityKind::ApiIncidentList => "api-incident-list",
            EntityKind::MarketQuote => "market-quote",
            EntityKind::ForecastClock => "forecast-clock",
            EntityKind::NetworkHealth => "network-health",
        }
    }

    pub fn default_group(self) -> &'static str {
        match self {
            EntityKind::StatusPage
            | EntityKind::StatusPageComponent
            | EntityKind::RssFeed
            | EntityKind::ApiIncidentList => "Services",
            EntityKind::MarketQuote => "Markets",
            EntityKind::ForecastClock => "Clocks",
            EntityKind::NetworkHealth => "Networks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block-age and congestion thresholds for the network health composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkThresholds {
    #[serde(default = "NetworkThresholds::default_stale_degraded")]
    pub stale_minutes_degraded: i64,
    #[serde(default = "NetworkThresholds::default_stale_outage")]
    pub stale_minutes_outage: i64,
    #[serde(default = "NetworkThresholds::default_congestion_fee")]
    pub congestion_fee_sat_vb: i64,
    #[serde(default = "NetworkThresholds::default_congestion_mempool_mb")]
    pub congestion_mempool_mb: f64,
}

impl NetworkThresholds {
    const fn default_stale_degraded() -> i64 {
        60
    }

    const fn default_stale_outage() -> i64 {
        120
    }

    const fn default_congestion_fee() -> i64 {
        50
    }

    const fn default_congestion_mempool_mb() -> f64 {
        50.0
    }
}

impl Default for NetworkThresholds {
    fn default() -> Self {
        Self {
            stale_minutes_degraded: Self::default_stale_degraded(),
            stale_minutes_outage: Self::default_stale_outage(),
            congestion_fee_sat_vb: Self::default_congestion_fee(),
            congestion_mempool_mb: Self::default_congestion_mempool_mb(),
        }
    }
}

fn default_resolved_markers() -> Vec<String> {
    vec!["RESOLVED".to_string()]
}

fn default_aggregation() -> String {
    "recency_weighted".to_string()
}

const fn default_quantile() -> f64 {
    0.5
}

/// Provider-specific parameters, one variant per source family.
///
/// Resolved once when the configuration is loaded; the fetcher dispatches on
/// the variant instead of inspecting type strings at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    Statuspage {
        base_url: String,
    },
    StatuspageComponent {
        base_url: String,
        component_match: Vec<String>,
    },
    Rss {
        url: String,
        #[serde(default = "default_resolved_markers")]
        resolved_markers: Vec<String>,
    },
    SlackStatus {
        current_url: String,
        #[serde(default)]
        history_url: Option<String>,
    },
    GcpIncidents {
        incidents_url: String,
        product_ids: Vec<String>,
    },
    CoingeckoPrice {
        asset_id: String,
        vs_currency: String,
        #[serde(default)]
        api_base: Option<String>,
    },
    FxRate {
        base: String,
        quote: String,
        #[serde(default)]
        api_base: Option<String>,
    },
    StooqQuote {
        symbol: String,
        #[serde(default)]
        api_base: Option<String>,
    },
    DoomsdayClock {
        current_url: String,
        #[serde(default)]
        previous_url: Option<String>,
    },
    MetaculusDate {
        question_id: u64,
        #[serde(default = "default_aggregation")]
        aggregation: String,
        #[serde(default = "default_quantile")]
        quantile: f64,
        #[serde(default)]
        api_base: Option<String>,
    },
    ManifoldYearMarket {
        market_id: String,
        #[serde(default)]
        api_base: Option<String>,
    },
    BitcoinNetwork {
        #[serde(default)]
        api_base: Option<String>,
        #[serde(flatten)]
        thresholds: NetworkThresholds,
    },
}

impl Source {
    pub fn kind(&self) -> EntityKind {
        match self {
            Source::Statuspage { .. } => EntityKind::StatusPage,
            Source::StatuspageComponent { .. } => EntityKind::StatusPageComponent,
            Source::Rss { .. } => EntityKind::RssFeed,
            Source::SlackStatus { .. } | Source::GcpIncidents { .. } => EntityKind::ApiIncidentList,
            Source::CoingeckoPrice { .. } | Source::FxRate { .. } | Source::StooqQuote { .. } => {
                EntityKind::MarketQuote
            }
            Source::DoomsdayClock { .. }
            | Source::MetaculusDate { .. }
            | Source::ManifoldYearMarket { .. } => EntityKind::ForecastClock,
            Source::BitcoinNetwork { .. } => EntityKind::NetworkHealth,
        }
    }

    /// Reject parameter sets that can never produce a meaningful fetch.
    pub fn validate(&self) -> Result<()> {
        match self {
            Source::Statuspage { base_url } => require_url("base_url", base_url),
            Source::StatuspageComponent {
                base_url,
                component_match,
            } => {
                require_url("base_url", base_url)?;
                if component_match.iter().all(|p| p.trim().is_empty()) {
                    bail!("component_match must list at least one pattern");
                }
                Ok(())
            }
            Source::Rss { url, .. } => require_url("url", url),
            Source::SlackStatus {
                current_url,
                history_url,
            } => {
                require_url("current_url", current_url)?;
                match history_url {
                    Some(url) if !url.trim().is_empty() => require_url("history_url", url),
                    _ => Ok(()),
                }
            }
            Source::GcpIncidents {
                incidents_url,
                product_ids,
            } => {
                require_url("incidents_url", incidents_url)?;
                if product_ids.iter().all(|p| p.trim().is_empty()) {
                    bail!("product_ids must list at least one product");
                }
                Ok(())
            }
            Source::CoingeckoPrice {
                asset_id,
                vs_currency,
                api_base,
            } => {
                require_text("asset_id", asset_id)?;
                require_text("vs_currency", vs_currency)?;
                optional_url(api_base)
            }
            Source::FxRate {
                base,
                quote,
                api_base,
            } => {
                require_text("base", base)?;
                require_text("quote", quote)?;
                optional_url(api_base)
            }
            Source::StooqQuote { symbol, api_base } => {
                require_text("symbol", symbol)?;
                optional_url(api_base)
            }
            Source::DoomsdayClock {
                current_url,
                previous_url,
            } => {
                require_url("current_url", current_url)?;
                optional_url(previous_url)
            }
            Source::MetaculusDate {
                question_id,
                quantile,
                api_base,
                ..
            } => {
                if *question_id == 0 {
                    bail!("question_id must be positive");
                }
                if !(*quantile > 0.0 && *quantile < 1.0) {
                    bail!("quantile must be within (0, 1), got {quantile}");
                }
                optional_url(api_base)
            }
            Source::ManifoldYearMarket { market_id, api_base } => {
                require_text("market_id", market_id)?;
                optional_url(api_base)
            }
            Source::BitcoinNetwork {
                api_base,
                thresholds,
            } => {
                if thresholds.stale_minutes_degraded > thresholds.stale_minutes_outage {
                    bail!("stale_minutes_degraded must not exceed stale_minutes_outage");
                }
                optional_url(api_base)
            }
        }
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("`{field}` must not be empty");
    }
    Ok(())
}

fn require_url(field: &str, value: &str) -> Result<()> {
    require_text(field, value)?;
    let trimmed = value.trim();
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        bail!("`{field}` must be an http(s) URL, got `{trimmed}`");
    }
    Ok(())
}

fn optional_url(value: &Option<String>) -> Result<()> {
    match value {
        Some(url) if !url.trim().is_empty() => require_url("url", url),
        _ => Ok(()),
    }
}

/// Display formatting hints passed through to the UI collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayFormat {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub thousands: bool,
}

impl DisplayFormat {
    pub fn render(&self, value: f64) -> String {
        let decimals = usize::from(self.decimals.unwrap_or(2));
        let mut number = format!("{:.*}", decimals, value.abs());
        if self.thousands {
            number = group_thousands(&number);
        }
        let sign = if value < 0.0 && number.chars().any(|c| c.is_ascii_digit() && c != '0') {
            "-"
        } else {
            ""
        };
        format!(
            "{sign}{}{number}{}",
            self.prefix.as_deref().unwrap_or_default(),
            self.suffix.as_deref().unwrap_or_default()
        )
    }
}

fn group_thousands(number: &str) -> String {
    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (number, None),
    };
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac_part {
        Some(frac) => format!("{grouped}.{frac}"),
        None => grouped,
    }
}

/// One configured source to poll. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedEntity {
    pub id: String,
    pub name: String,
    pub group: String,
    pub format: DisplayFormat,
    pub deadband: Option<f64>,
    pub source: Source,
}

impl TrackedEntity {
    pub fn kind(&self) -> EntityKind {
        self.source.kind()
    }
}
