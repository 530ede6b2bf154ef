use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::info;

use crate::entity::{DisplayFormat, Source, TrackedEntity};
use crate::normalize::SeverityTables;

const DEFAULT_CONFIG_PATH: &str = "servicedash.yaml";
const DEFAULT_DATABASE_PATH: &str = "servicedash.db";

/// Top-level configuration for the servicedash poller.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "AppConfig::default_database_path")]
    pub database_path: PathBuf,
    /// Time between the start of consecutive poll cycles.
    #[serde(default = "AppConfig::default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Window for uptime, trend, episodes and hourly buckets.
    #[serde(default = "AppConfig::default_history_window", with = "humantime_serde")]
    pub history_window: Duration,
    /// Records older than this are pruned after each cycle. Unbounded when unset.
    #[serde(default, with = "humantime_serde")]
    pub retention: Option<Duration>,
    #[serde(default)]
    pub trend_deadband: f64,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub http: HttpSettings,
    /// Per-key overrides merged on top of the built-in severity tables.
    #[serde(default)]
    pub severity: SeverityTables,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}

impl AppConfig {
    fn default_database_path() -> PathBuf {
        PathBuf::from(DEFAULT_DATABASE_PATH)
    }

    const fn default_poll_interval() -> Duration {
        Duration::from_secs(300)
    }

    const fn default_history_window() -> Duration {
        Duration::from_secs(24 * 3600)
    }

    /// Resolved entity list in declaration order.
    pub fn tracked_entities(&self) -> Arc<[TrackedEntity]> {
        self.entities.iter().map(EntityConfig::resolve).collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: Self::default_database_path(),
            poll_interval: Self::default_poll_interval(),
            history_window: Self::default_history_window(),
            retention: None,
            trend_deadband: 0.0,
            scheduler: SchedulerSettings::default(),
            http: HttpSettings::default(),
            severity: SeverityTables::default(),
            metrics: MetricsSettings::default(),
            entities: Vec::new(),
        }
    }
}

/// Fan-out limits for one poll cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "SchedulerSettings::default_max_concurrency")]
    pub max_concurrency: usize,
    /// Budget for one entity, counted from the moment it holds a permit.
    #[serde(
        default = "SchedulerSettings::default_entity_timeout",
        with = "humantime_serde"
    )]
    pub entity_timeout: Duration,
    /// Hard stop for the whole cycle; pending entities become UNKNOWN.
    #[serde(
        default = "SchedulerSettings::default_cycle_deadline",
        with = "humantime_serde"
    )]
    pub cycle_deadline: Option<Duration>,
}

impl SchedulerSettings {
    const fn default_max_concurrency() -> usize {
        8
    }

    const fn default_entity_timeout() -> Duration {
        Duration::from_secs(15)
    }

    const fn default_cycle_deadline() -> Option<Duration> {
        Some(Duration::from_secs(60))
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: Self::default_max_concurrency(),
            entity_timeout: Self::default_entity_timeout(),
            cycle_deadline: Self::default_cycle_deadline(),
        }
    }
}

/// Outbound HTTP client settings shared by every adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    #[serde(
        default = "HttpSettings::default_request_timeout",
        with = "humantime_serde"
    )]
    pub request_timeout: Duration,
    #[serde(
        default = "HttpSettings::default_connect_timeout",
        with = "humantime_serde"
    )]
    pub connect_timeout: Duration,
    #[serde(default = "HttpSettings::default_user_agent")]
    pub user_agent: String,
}

impl HttpSettings {
    const fn default_request_timeout() -> Duration {
        Duration::from_secs(10)
    }

    const fn default_connect_timeout() -> Duration {
        Duration::from_secs(5)
    }

    fn default_user_agent() -> String {
        concat!("servicedash/", env!("CARGO_PKG_VERSION")).to_string()
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Self::default_request_timeout(),
            connect_timeout: Self::default_connect_timeout(),
            user_agent: Self::default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Prometheus textfile rewritten after every cycle.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

/// One `entities:` entry as written in YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub format: DisplayFormat,
    #[serde(default)]
    pub deadband: Option<f64>,
    #[serde(flatten)]
    pub source: Source,
}

impl EntityConfig {
    fn resolve(&self) -> TrackedEntity {
        let group = self
            .group
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| self.source.kind().default_group())
            .to_string();
        TrackedEntity {
            id: self.id.trim().to_string(),
            name: self.name.trim().to_string(),
            group,
            format: self.format.clone(),
            deadband: self.deadband,
            source: self.source.clone(),
        }
    }
}

/// Load configuration from a YAML file and apply env overrides.
///
/// Unlike the database, a missing config file is fatal: there is nothing to
/// poll without an entity list.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("SERVICEDASH_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let raw = fs::read_to_string(&target_path)
        .with_context(|| format!("failed to read config file at {}", target_path.display()))?;
    let mut config = parse_config(&raw)
        .with_context(|| format!("invalid config at {}", target_path.display()))?;

    apply_env_overrides(&mut config)?;
    resolve_database_path(&mut config, &target_path);

    info!(
        path = %target_path.display(),
        entities = config.entities.len(),
        database = %config.database_path.display(),
        "loaded configuration"
    );
    Ok(config)
}

/// Parse and validate YAML without touching the filesystem or environment.
pub fn parse_config(raw: &str) -> Result<AppConfig> {
    let config: AppConfig = serde_yaml::from_str(raw).context("failed to parse YAML config")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.entities.is_empty() {
        bail!("`entities` must list at least one entity");
    }
    if config.poll_interval.is_zero() {
        bail!("`poll_interval` must be positive");
    }
    if config.history_window < Duration::from_secs(3600) {
        bail!("`history_window` must be at least 1h");
    }
    if config.scheduler.max_concurrency == 0 {
        bail!("`scheduler.max_concurrency` must be at least 1");
    }
    if config.scheduler.entity_timeout.is_zero() {
        bail!("`scheduler.entity_timeout` must be positive");
    }
    if !(config.trend_deadband.is_finite() && config.trend_deadband >= 0.0) {
        bail!("`trend_deadband` must be a non-negative number");
    }
    if config.retention.is_some_and(|r| r < config.history_window) {
        bail!("`retention` must not be shorter than `history_window`");
    }

    let mut seen = HashSet::new();
    for entity in &config.entities {
        let id = entity.id.trim();
        if id.is_empty() {
            bail!("entity ids must not be empty");
        }
        if !seen.insert(id.to_string()) {
            bail!("duplicate entity id `{id}`");
        }
        if entity.name.trim().is_empty() {
            bail!("entity `{id}`: `name` must not be empty");
        }
        if entity
            .deadband
            .is_some_and(|d| !(d.is_finite() && d >= 0.0))
        {
            bail!("entity `{id}`: `deadband` must be a non-negative number");
        }
        entity
            .source
            .validate()
            .with_context(|| format!("entity `{id}`"))?;
    }
    Ok(())
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    match env::var("SERVICEDASH_DATABASE") {
        Ok(path) => {
            if path.trim().is_empty() {
                bail!("Environment variable SERVICEDASH_DATABASE is set but empty.");
            }
            config.database_path = PathBuf::from(path.trim());
        }
        Err(env::VarError::NotPresent) => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

fn resolve_database_path(config: &mut AppConfig, config_path: &Path) {
    if config.database_path.is_relative()
        && let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty())
    {
        config.database_path = dir.join(&config.database_path);
    }
}
