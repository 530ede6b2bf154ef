use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::entity::TrackedEntity;
use crate::history::HistoryStore;
use crate::metrics::AppMetrics;
use crate::poller::scheduler::FetchScheduler;
use crate::query::QueryService;
use crate::sources::SourceFetcher;

/// Shared application context passed to the poller and query paths.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub entities: Arc<[TrackedEntity]>,
    pub store: HistoryStore,
    pub metrics: AppMetrics,
    pub scheduler: Arc<FetchScheduler>,
    pub history_window: chrono::Duration,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        store: HistoryStore,
        metrics: AppMetrics,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Result<Self> {
        let history_window = chrono::Duration::from_std(config.history_window)
            .context("history_window is out of range")?;
        let entities = config.tracked_entities();
        let scheduler = Arc::new(FetchScheduler::new(fetcher, config.scheduler.clone()));
        Ok(Self {
            config: Arc::new(config),
            entities,
            store,
            metrics,
            scheduler,
            history_window,
        })
    }

    pub fn query(&self) -> QueryService {
        QueryService::new(
            self.store.clone(),
            Arc::clone(&self.entities),
            self.history_window,
            self.config.trend_deadband,
        )
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.config
            .retention
            .and_then(|r| chrono::Duration::from_std(r).ok())
    }
}
