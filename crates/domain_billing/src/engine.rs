//! Billing engine facade
//!
//! Wires the account, ledger and invoice services over one store and adds the
//! per-ride invoicing hook: for PerRide accounts an invoice is generated right
//! after the charge commits. A failure there is logged and reported in the
//! result but never rolls the charge back.

use std::sync::Arc;
use tracing::warn;

use core_kernel::{Clock, EventId, RequestContext};

use crate::account_service::AccountService;
use crate::entry::SourceType;
use crate::error::BillingError;
use crate::events::OutboxEvent;
use crate::invoice::Invoice;
use crate::invoice_service::{InvoiceService, InvoicingPolicy};
use crate::ledger_service::{LedgerService, RideChargeRequest};
use crate::ports::{BillingStore, OutboxPort};
use crate::schedule::InvoiceFrequency;
use crate::transaction::LedgerTransaction;

/// What happened to the per-ride invoice after a charge committed
#[derive(Debug)]
pub enum PerRideInvoiceOutcome {
    Generated(Invoice),
    Failed(BillingError),
}

/// A committed transaction
#[derive(Debug)]
pub struct RecordedCharge {
    pub transaction: LedgerTransaction,
    /// Present only for ride charges on PerRide accounts
    pub per_ride_invoice: Option<PerRideInvoiceOutcome>,
}

impl RecordedCharge {
    pub fn invoice(&self) -> Option<&Invoice> {
        match &self.per_ride_invoice {
            Some(PerRideInvoiceOutcome::Generated(invoice)) => Some(invoice),
            _ => None,
        }
    }
}

pub struct BillingEngine {
    accounts: AccountService,
    ledger: LedgerService,
    invoices: InvoiceService,
    outbox: Arc<dyn OutboxPort>,
    clock: Arc<dyn Clock>,
}

impl BillingEngine {
    pub fn new<S: BillingStore>(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: AccountService::new(store.clone(), clock.clone()),
            ledger: LedgerService::new(store.clone(), store.clone(), clock.clone()),
            invoices: InvoiceService::new(store.clone(), store.clone(), clock.clone()),
            outbox: store,
            clock,
        }
    }

    pub fn with_policy(mut self, policy: InvoicingPolicy) -> Self {
        self.invoices = self.invoices.with_policy(policy);
        self
    }

    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    pub fn invoices(&self) -> &InvoiceService {
        &self.invoices
    }

    /// Records a ride charge and, for PerRide accounts, invoices it
    ///
    /// # Errors
    ///
    /// Only errors from recording the charge are returned. Per-ride invoice
    /// failures are reported through [`RecordedCharge::per_ride_invoice`].
    pub async fn record_ride_charge(
        &self,
        ctx: &RequestContext,
        request: RideChargeRequest,
    ) -> Result<RecordedCharge, BillingError> {
        let transaction = self.ledger.record_ride_charge(ctx, request).await?;
        Ok(self.after_commit(ctx, transaction).await)
    }

    /// Appends a prepared transaction, invoicing ride charges on PerRide accounts
    ///
    /// This is the only public append path, so per-ride accounts are invoiced
    /// whichever way the charge arrives.
    pub async fn append_transaction(
        &self,
        ctx: &RequestContext,
        transaction: LedgerTransaction,
    ) -> Result<RecordedCharge, BillingError> {
        self.ledger.append_transaction(ctx, &transaction).await?;
        Ok(self.after_commit(ctx, transaction).await)
    }

    async fn after_commit(
        &self,
        ctx: &RequestContext,
        transaction: LedgerTransaction,
    ) -> RecordedCharge {
        let per_ride_invoice = if transaction.source_type() == SourceType::RideCharge {
            match self.accounts.get_account(ctx, transaction.account_id()).await {
                Ok(account) if account.invoice_frequency() == InvoiceFrequency::PerRide => {
                    Some(self.per_ride_invoice(ctx, &transaction).await)
                }
                Ok(_) => None,
                Err(e) => Some(self.report_per_ride_failure(&transaction, e)),
            }
        } else {
            None
        };

        RecordedCharge {
            transaction,
            per_ride_invoice,
        }
    }

    async fn per_ride_invoice(
        &self,
        ctx: &RequestContext,
        transaction: &LedgerTransaction,
    ) -> PerRideInvoiceOutcome {
        match self.invoices.generate_per_ride_invoice(ctx, transaction).await {
            Ok(invoice) => PerRideInvoiceOutcome::Generated(invoice),
            Err(e) => self.report_per_ride_failure(transaction, e),
        }
    }

    fn report_per_ride_failure(
        &self,
        transaction: &LedgerTransaction,
        error: BillingError,
    ) -> PerRideInvoiceOutcome {
        warn!(
            account_id = %transaction.account_id(),
            ride_id = %transaction.source_reference_id(),
            error = %error,
            "per-ride invoice generation failed; charge remains recorded"
        );
        PerRideInvoiceOutcome::Failed(error)
    }

    /// Undispatched integration events for the tenant
    pub async fn pending_events(
        &self,
        ctx: &RequestContext,
        limit: u32,
    ) -> Result<Vec<OutboxEvent>, BillingError> {
        Ok(self.outbox.pending_events(ctx, limit).await?)
    }

    /// Records that the dispatcher delivered an event
    pub async fn mark_event_dispatched(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
    ) -> Result<(), BillingError> {
        Ok(self.outbox.mark_dispatched(ctx, event_id, self.clock.now()).await?)
    }
}
