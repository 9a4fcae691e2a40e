//! Job execution
//!
//! [`JobRunner`] runs the scheduled invoicing sweep and drains the outbox for
//! one tenant per invocation. It only talks to a [`BillingEngine`], so the
//! same code runs over Postgres in production and the in-memory store in tests.

use std::io::Write;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use core_kernel::{AccountId, RequestContext};
use domain_billing::{BillingEngine, BillingError, InvoiceFrequency, ScheduledRun};

/// Errors raised by a job run
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Failed to write job output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An account whose invoice could not be generated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedAccount {
    pub account_id: AccountId,
    pub error: String,
}

/// Printable result of one scheduled sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepSummary {
    pub frequency: InvoiceFrequency,
    pub period_start: NaiveDate,
    /// Exclusive
    pub period_end: NaiveDate,
    pub invoices: Vec<String>,
    pub skipped: usize,
    pub failed: Vec<FailedAccount>,
    pub cancelled: bool,
}

impl SweepSummary {
    /// True when every account was either invoiced or had nothing to bill
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}

impl From<&ScheduledRun> for SweepSummary {
    fn from(run: &ScheduledRun) -> Self {
        Self {
            frequency: run.frequency,
            period_start: run.period.start(),
            period_end: run.period.end(),
            invoices: run
                .invoices()
                .map(|invoice| invoice.invoice_number().to_string())
                .collect(),
            skipped: run.skipped_count(),
            failed: run
                .failures()
                .map(|(account_id, error)| FailedAccount {
                    account_id: *account_id,
                    error: error.to_string(),
                })
                .collect(),
            cancelled: run.cancelled,
        }
    }
}

pub struct JobRunner {
    engine: BillingEngine,
}

impl JobRunner {
    pub fn new(engine: BillingEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &BillingEngine {
        &self.engine
    }

    /// Sweeps every account billed at `frequency` for the period ending before `as_of`
    ///
    /// Rerunning for the same `as_of` is safe: already billed charges are
    /// never invoiced twice, so the second run only reports skips.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn run_scheduled(
        &self,
        ctx: &RequestContext,
        frequency: InvoiceFrequency,
        as_of: DateTime<Utc>,
    ) -> Result<SweepSummary, JobError> {
        let run = self
            .engine
            .invoices()
            .generate_scheduled_invoices(ctx, frequency, as_of)
            .await?;
        let summary = SweepSummary::from(&run);

        if !summary.is_complete() {
            warn!(
                failed = summary.failed.len(),
                cancelled = summary.cancelled,
                "scheduled sweep incomplete"
            );
        }
        Ok(summary)
    }

    /// Writes up to `limit` pending events to `out` as JSON lines, marking each dispatched
    ///
    /// An event is marked only after its line is written, so a crash
    /// mid-batch redelivers rather than drops. Stops early on cancellation.
    #[instrument(skip(self, ctx, out), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn drain_outbox<W: Write + Send>(
        &self,
        ctx: &RequestContext,
        limit: u32,
        out: &mut W,
    ) -> Result<usize, JobError> {
        let events = self.engine.pending_events(ctx, limit).await?;

        let mut dispatched = 0;
        for event in events {
            if ctx.is_cancelled() {
                warn!(dispatched, "outbox drain cancelled");
                break;
            }
            serde_json::to_writer(&mut *out, &event)?;
            out.write_all(b"\n")?;
            out.flush()?;

            self.engine.mark_event_dispatched(ctx, event.id).await?;
            dispatched += 1;
        }

        info!(dispatched, "outbox drained");
        Ok(dispatched)
    }
}
