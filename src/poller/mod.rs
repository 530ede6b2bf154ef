use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::app::AppContext;
use crate::history::StoreError;

pub mod report;
pub mod scheduler;

use report::{CycleReport, CycleSummary};

/// Spawn the poll loop. The first tick fires immediately and a cycle never
/// starts before the previous one has committed.
pub fn spawn(ctx: AppContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = ctx.config.poll_interval;
        info!(
            interval = ?interval,
            entities = ctx.entities.len(),
            "starting poller loop"
        );

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(err) = run_cycle(&ctx).await {
                error!(error = %err, "poll cycle failed; retrying next interval");
            }
        }
    })
}

/// Fetch every entity, then commit the whole cycle in one transaction.
///
/// Adapter failures are already folded into UNKNOWN records; only store
/// failures reach the caller.
#[instrument(skip_all)]
pub async fn run_cycle(ctx: &AppContext) -> Result<CycleReport, StoreError> {
    let started = Instant::now();
    let cycle = ctx.scheduler.poll_once(&ctx.entities).await;
    report::log_outcomes(&cycle);
    ctx.metrics.observe_cycle(&cycle);

    let summary = CycleSummary::from_cycle(&cycle);
    let result = store_cycle(ctx, &cycle).await;

    let (timestamp, stored, pruned) = match &result {
        Ok((ts, pruned)) => (Some(*ts), true, *pruned),
        Err(err) => {
            ctx.metrics.inc_store_failure(store_failure_reason(err));
            (None, false, 0)
        }
    };
    let report = CycleReport {
        timestamp,
        summary,
        elapsed: started.elapsed(),
        stored,
        pruned,
    };
    report::log_report(&report);
    ctx.metrics.observe_commit(report.elapsed, stored);

    if let Some(path) = &ctx.config.metrics.textfile
        && let Err(err) = ctx.metrics.write_textfile(path).await
    {
        warn!(path = %path.display(), error = ?err, "failed to write metrics textfile");
    }

    result.map(|_| report)
}

async fn store_cycle(
    ctx: &AppContext,
    cycle: &scheduler::PollCycle,
) -> Result<(chrono::DateTime<Utc>, u64), StoreError> {
    let ts = ctx.store.next_cycle_timestamp(Utc::now()).await?;
    let records = cycle.records_at(ts);
    ctx.store.append_cycle(&records).await?;

    // Pruning is housekeeping; the cycle is already durable.
    let pruned = match ctx.retention() {
        Some(retention) => match ctx.store.prune_before(ts - retention).await {
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "failed to prune history");
                0
            }
        },
        None => 0,
    };
    Ok((ts, pruned))
}

fn store_failure_reason(err: &StoreError) -> &'static str {
    match err {
        StoreError::Database(_) => "database",
        StoreError::OutOfOrder { .. } => "out_of_order",
        StoreError::Io(_) => "io",
    }
}
