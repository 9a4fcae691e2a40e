//! Ride Billing - Jobs Binary
//!
//! Runs one batch job against the billing database and exits.
//!
//! # Usage
//!
//! ```bash
//! # Apply pending schema migrations
//! billing-jobs migrate
//!
//! # Invoice every weekly account of a tenant for the week ending yesterday
//! billing-jobs scheduled --frequency weekly --tenant 0190c7e4-...
//!
//! # Re-run a missed monthly sweep as of a given instant
//! billing-jobs scheduled --frequency monthly --tenant 0190c7e4-... --as-of 2024-04-01T00:05:00Z
//!
//! # Print pending integration events as JSON lines and mark them dispatched
//! billing-jobs dispatch-outbox --tenant 0190c7e4-... --limit 500
//! ```
//!
//! # Environment Variables
//!
//! * `BILLING_DATABASE_URL` - PostgreSQL connection string
//! * `BILLING_MAX_CONNECTIONS` / `BILLING_MIN_CONNECTIONS` - Pool sizing (default: 5 / 1)
//! * `BILLING_ACQUIRE_TIMEOUT_SECS` - Pool acquire timeout (default: 30)
//! * `BILLING_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! * `BILLING_LOG_FORMAT` - pretty or json (default: pretty)
//! * `BILLING_PAYMENT_TERMS_DAYS` - Days until invoices fall due (default: 30)

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use core_kernel::{Clock, RequestContext, SystemClock, TenantId};
use domain_billing::{BillingEngine, InvoiceFrequency};
use infra_db::{create_pool, run_migrations, DatabasePool, PostgresBillingStore};
use interface_jobs::{init_tracing, JobRunner, JobsConfig};

#[derive(Debug, Parser)]
#[command(name = "billing-jobs", version, about = "Batch jobs for the ride billing engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,

    /// Generate invoices for every account on a schedule
    Scheduled {
        #[arg(long, value_enum)]
        frequency: Schedule,
        #[arg(long)]
        tenant: Uuid,
        /// Instant the sweep runs as of, RFC 3339 (default: now)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },

    /// Write pending outbox events to stdout and mark them dispatched
    DispatchOutbox {
        #[arg(long)]
        tenant: Uuid,
        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
}

/// Frequencies a sweep can run for
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Schedule {
    Daily,
    Weekly,
    Monthly,
}

impl From<Schedule> for InvoiceFrequency {
    fn from(schedule: Schedule) -> Self {
        match schedule {
            Schedule::Daily => InvoiceFrequency::Daily,
            Schedule::Weekly => InvoiceFrequency::Weekly,
            Schedule::Monthly => InvoiceFrequency::Monthly,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (useful for local development)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = JobsConfig::from_env().context("invalid BILLING_* configuration")?;
    init_tracing(&config.log_level, config.log_format).context("failed to install tracing")?;

    let pool = create_pool(config.database())
        .await
        .context("failed to connect to the billing database")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    match cli.command {
        Command::Migrate => {
            run_migrations(&pool).await.context("migrations failed")?;
            tracing::info!("Migrations applied");
        }
        Command::Scheduled {
            frequency,
            tenant,
            as_of,
        } => {
            let runner = job_runner(pool, &config, clock.clone());
            let ctx = system_context(tenant, shutdown)?;
            let as_of = as_of.unwrap_or_else(|| clock.now());
            let summary = runner.run_scheduled(&ctx, frequency.into(), as_of).await?;

            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.is_complete() {
                bail!(
                    "sweep incomplete: {} failed, cancelled={}",
                    summary.failed.len(),
                    summary.cancelled
                );
            }
        }
        Command::DispatchOutbox { tenant, limit } => {
            let runner = job_runner(pool, &config, clock);
            let ctx = system_context(tenant, shutdown)?;
            let dispatched = runner
                .drain_outbox(&ctx, limit, &mut std::io::stdout())
                .await?;
            tracing::info!(dispatched, "Outbox dispatch complete");
        }
    }

    Ok(())
}

fn job_runner(pool: DatabasePool, config: &JobsConfig, clock: Arc<dyn Clock>) -> JobRunner {
    let store = Arc::new(PostgresBillingStore::new(pool));
    JobRunner::new(BillingEngine::new(store, clock).with_policy(config.invoicing_policy()))
}

fn system_context(tenant: Uuid, shutdown: CancellationToken) -> anyhow::Result<RequestContext> {
    let ctx = RequestContext::system(TenantId::from_uuid(tenant))
        .context("--tenant must be a non-nil tenant id")?;
    Ok(ctx.with_cancellation(shutdown))
}

/// Cancels the running job on Ctrl+C; work already committed stays committed
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Received Ctrl+C, cancelling job");
            token.cancel();
        }
    });
}
