//! Invoice Engine
//!
//! Selects unbilled ride charges, drafts invoices and hands them to the store
//! for numbering and persistence. Each charge is billed at most once: the
//! selection excludes already invoiced entries and the store re-checks inside
//! the transaction that inserts the invoice.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use core_kernel::{
    AccountId, BillingPeriod, Clock, InvoiceId, Page, PageRequest, PortError, RequestContext,
};

use crate::account::Account;
use crate::entry::{LedgerEntry, SourceType};
use crate::error::BillingError;
use crate::invoice::{DraftRequest, Invoice, InvoiceDraft, InvoiceNumber};
use crate::ports::{AccountPort, InvoicePort};
use crate::schedule::InvoiceFrequency;
use crate::transaction::LedgerTransaction;

/// Default number of days between issue and due date
pub const DEFAULT_PAYMENT_TERMS_DAYS: u32 = 30;

/// Tenant-wide invoicing defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicingPolicy {
    pub payment_terms_days: u32,
}

impl Default for InvoicingPolicy {
    fn default() -> Self {
        Self {
            payment_terms_days: DEFAULT_PAYMENT_TERMS_DAYS,
        }
    }
}

/// Per-request overrides for on-demand generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceOptions {
    /// Defaults to today (UTC)
    pub issue_date: Option<NaiveDate>,
    /// Defaults to the policy's payment terms
    pub payment_terms_days: Option<u32>,
}

impl InvoiceOptions {
    pub fn issued_on(mut self, issue_date: NaiveDate) -> Self {
        self.issue_date = Some(issue_date);
        self
    }

    pub fn with_payment_terms(mut self, days: u32) -> Self {
        self.payment_terms_days = Some(days);
        self
    }
}

/// Outcome of one account in a scheduled sweep
#[derive(Debug)]
pub enum SweepOutcome {
    Generated(Invoice),
    /// Nothing to bill in the period
    Skipped,
    Failed(BillingError),
}

/// Result of a scheduled sweep for one frequency
#[derive(Debug)]
pub struct ScheduledRun {
    pub frequency: InvoiceFrequency,
    pub period: BillingPeriod,
    pub outcomes: Vec<(AccountId, SweepOutcome)>,
    /// Set when the sweep stopped early because the context was cancelled
    pub cancelled: bool,
}

impl ScheduledRun {
    pub fn invoices(&self) -> impl Iterator<Item = &Invoice> {
        self.outcomes.iter().filter_map(|(_, o)| match o {
            SweepOutcome::Generated(invoice) => Some(invoice),
            _ => None,
        })
    }

    pub fn generated_count(&self) -> usize {
        self.invoices().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SweepOutcome::Skipped))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&AccountId, &BillingError)> {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            SweepOutcome::Failed(e) => Some((id, e)),
            _ => None,
        })
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }
}

pub struct InvoiceService {
    accounts: Arc<dyn AccountPort>,
    invoices: Arc<dyn InvoicePort>,
    clock: Arc<dyn Clock>,
    policy: InvoicingPolicy,
}

impl InvoiceService {
    pub fn new(
        accounts: Arc<dyn AccountPort>,
        invoices: Arc<dyn InvoicePort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            invoices,
            clock,
            policy: InvoicingPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: InvoicingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> InvoicingPolicy {
        self.policy
    }

    /// Invoices every unbilled ride charge of the account in `[start, end)`
    ///
    /// Inactive accounts may still be invoiced for historical charges.
    /// Payments applied are the account's payments posted within the same
    /// period.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the account does not exist in the tenant
    /// - `NoUnbilledCharges` when the period holds nothing left to bill
    /// - `Conflict` when a concurrent run billed one of the charges first
    #[instrument(
        skip(self, ctx, options),
        fields(tenant_id = %ctx.tenant_id(), account_id = %account_id, start = %period.start(), end = %period.end())
    )]
    pub async fn generate_invoice(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        period: BillingPeriod,
        options: InvoiceOptions,
    ) -> Result<Invoice, BillingError> {
        let account = self.load_account(ctx, account_id).await?;
        let charges = self.invoices.unbilled_charges(ctx, account_id, &period).await?;
        let payments = self.invoices.payments_in_period(ctx, account_id, &period).await?;

        let draft = self.draft(ctx, &account, period, &charges, &payments, options)?;
        self.persist(ctx, draft).await
    }

    /// Invoices the single ride charge of a just-recorded PerRide transaction
    ///
    /// The window is the charge's service day, restricted to its ride.
    /// Payments are not applied to per-ride invoices.
    #[instrument(
        skip(self, ctx, transaction),
        fields(tenant_id = %ctx.tenant_id(), account_id = %transaction.account_id(), ride_id = %transaction.source_reference_id())
    )]
    pub async fn generate_per_ride_invoice(
        &self,
        ctx: &RequestContext,
        transaction: &LedgerTransaction,
    ) -> Result<Invoice, BillingError> {
        if transaction.source_type() != SourceType::RideCharge {
            return Err(BillingError::validation(
                "per-ride invoices are only generated for ride charges",
            ));
        }
        let account = self.load_account(ctx, transaction.account_id()).await?;
        let period = BillingPeriod::single_day(transaction.debit().service_date())?;

        let charges: Vec<_> = self
            .invoices
            .unbilled_charges(ctx, account.id(), &period)
            .await?
            .into_iter()
            .filter(|e| e.id() == transaction.debit().id())
            .collect();

        let draft = self.draft(ctx, &account, period, &charges, &[], InvoiceOptions::default())?;
        self.persist(ctx, draft).await
    }

    /// Runs the sweep for `frequency` over the canonical period ending before `as_of`
    ///
    /// Every account with that frequency is considered, active or not.
    /// Accounts with nothing to bill are skipped silently; failures for one
    /// account are recorded and the sweep moves on.
    ///
    /// # Errors
    ///
    /// Returns a Validation error for PerRide, which is not swept.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), frequency = %frequency))]
    pub async fn generate_scheduled_invoices(
        &self,
        ctx: &RequestContext,
        frequency: InvoiceFrequency,
        as_of: DateTime<Utc>,
    ) -> Result<ScheduledRun, BillingError> {
        let period = frequency.period_ending_before(as_of)?;
        let accounts = self.accounts.accounts_with_frequency(ctx, frequency).await?;

        let mut run = ScheduledRun {
            frequency,
            period,
            outcomes: Vec::with_capacity(accounts.len()),
            cancelled: false,
        };

        for account in accounts {
            if ctx.is_cancelled() {
                warn!("scheduled sweep cancelled");
                run.cancelled = true;
                break;
            }

            let outcome = match self
                .generate_invoice(ctx, account.id(), period, InvoiceOptions::default())
                .await
            {
                Ok(invoice) => SweepOutcome::Generated(invoice),
                Err(BillingError::NoUnbilledCharges { .. }) => {
                    debug!(account_id = %account.id(), "nothing to bill");
                    SweepOutcome::Skipped
                }
                Err(e) => {
                    warn!(account_id = %account.id(), error = %e, "scheduled invoice failed");
                    SweepOutcome::Failed(e)
                }
            };
            run.outcomes.push((account.id(), outcome));
        }

        info!(
            start = %period.start(),
            end = %period.end(),
            generated = run.generated_count(),
            skipped = run.skipped_count(),
            failed = run.failed_count(),
            "scheduled sweep finished"
        );
        Ok(run)
    }

    pub async fn get_invoice(
        &self,
        ctx: &RequestContext,
        invoice_id: InvoiceId,
    ) -> Result<Invoice, BillingError> {
        self.invoices
            .find_invoice(ctx, invoice_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))
    }

    pub async fn get_invoice_by_number(
        &self,
        ctx: &RequestContext,
        invoice_number: &str,
    ) -> Result<Invoice, BillingError> {
        let number: InvoiceNumber = invoice_number.parse()?;
        self.invoices
            .find_invoice_by_number(ctx, &number)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", number))
    }

    pub async fn list_invoices(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Page<Invoice>, BillingError> {
        self.load_account(ctx, account_id).await?;
        Ok(self.invoices.list_invoices(ctx, account_id, page).await?)
    }

    fn draft(
        &self,
        ctx: &RequestContext,
        account: &Account,
        period: BillingPeriod,
        charges: &[LedgerEntry],
        payments: &[LedgerEntry],
        options: InvoiceOptions,
    ) -> Result<InvoiceDraft, BillingError> {
        let now = self.clock.now();
        InvoiceDraft::assemble(DraftRequest {
            tenant_id: ctx.tenant_id(),
            account_id: account.id(),
            period,
            issue_date: options.issue_date.unwrap_or_else(|| now.date_naive()),
            payment_terms_days: options
                .payment_terms_days
                .unwrap_or(self.policy.payment_terms_days),
            charges,
            payments,
            generated_at: now,
            generated_by: ctx.actor(),
        })
    }

    async fn persist(&self, ctx: &RequestContext, draft: InvoiceDraft) -> Result<Invoice, BillingError> {
        let line_count = draft.line_items().len();
        let invoice = match self.invoices.insert_invoice(ctx, draft).await {
            Ok(invoice) => invoice,
            Err(PortError::Conflict { message }) => {
                warn!(%message, "invoice rejected: charges billed concurrently");
                return Err(BillingError::Conflict(message));
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            invoice_id = %invoice.id(),
            invoice_number = %invoice.invoice_number(),
            line_items = line_count,
            subtotal = %invoice.subtotal(),
            "invoice generated"
        );
        Ok(invoice)
    }

    async fn load_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Account, BillingError> {
        self.accounts
            .find_account(ctx, account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Account", account_id))
    }
}
