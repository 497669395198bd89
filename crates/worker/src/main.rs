//! UXAudit Background Worker
//!
//! Handles scheduled jobs including:
//! - Deferred-debit reconciliation (every minute)
//! - Credit invariant checks (hourly)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use uxaudit_credits::repo::{
    PgBalanceRepository, PgLedgerRepository, PgReconciliationRepository,
};
use uxaudit_credits::{InvariantChecker, ReconciliationService};
use uxaudit_shared::create_pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting UXAudit Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;
    info!("Database pool created");

    let reconciliation = Arc::new(ReconciliationService::new(
        Arc::new(PgReconciliationRepository::new(pool.clone())),
        Arc::new(PgBalanceRepository::new(pool.clone())),
        Arc::new(PgLedgerRepository::new(pool.clone())),
    ));
    let invariants = Arc::new(InvariantChecker::new(pool));

    let scheduler = JobScheduler::new().await?;

    // Job 1: Retry deferred debits every minute
    let recon_job = reconciliation.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let service = recon_job.clone();
            Box::pin(async move {
                match service.retry_due().await {
                    Ok(report) => {
                        if report.settled + report.deferred + report.abandoned > 0 {
                            info!(
                                settled = report.settled,
                                deferred = report.deferred,
                                abandoned = report.abandoned,
                                "Reconciliation job complete"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Reconciliation job failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Deferred-debit reconciliation (every minute)");

    // Job 2: Invariant checks (hourly)
    let invariants_job = invariants.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let checker = invariants_job.clone();
            Box::pin(async move {
                info!("Running credit invariant checks");
                match checker.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(
                            checks_run = summary.checks_run,
                            "All credit invariants hold"
                        );
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            warn!(
                                invariant = %violation.invariant,
                                severity = %violation.severity,
                                affected = violation.user_ids.len(),
                                description = %violation.description,
                                "Invariant violation detected"
                            );
                        }
                        error!(
                            checks_failed = summary.checks_failed,
                            violations = summary.violations.len(),
                            "Credit invariant check found violations"
                        );
                    }
                    Err(e) => error!(error = %e, "Invariant check job failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Credit invariant checks (hourly)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker scheduler started");

    // Keep the worker alive
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping worker");

    Ok(())
}
