//! Billing Domain Ports
//!
//! Storage contracts the billing services depend on. Every operation takes the
//! caller's [`RequestContext`]; implementations must include its tenant in
//! every read and write predicate so no data crosses tenants.
//!
//! Ledger entries and invoices are write-once. The contracts below contain no
//! update or delete operation for either, and adapters additionally refuse
//! overwrites at the storage level.
//!
//! Two adapters exist:
//!
//! - **PostgreSQL** (`infra_db::PostgresBillingStore`)
//! - **In-memory** ([`crate::memory::InMemoryBillingStore`]) for tests and tooling
//!
//! # Atomicity
//!
//! `append_transaction` and `insert_invoice` each write their domain rows and
//! one outbox event as a single all-or-nothing unit, and must roll back when
//! the context is cancelled before commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use core_kernel::{
    AccountId, BillingPeriod, DomainPort, EventId, InvoiceId, Money, Page, PageRequest, PortError,
    RequestContext, StatementRange,
};

use crate::account::Account;
use crate::entry::LedgerEntry;
use crate::events::OutboxEvent;
use crate::invoice::{Invoice, InvoiceDraft, InvoiceNumber};
use crate::schedule::InvoiceFrequency;
use crate::statement::LedgerAccountTotals;
use crate::transaction::{LedgerTransaction, TransactionKey};

/// Account persistence
#[async_trait]
pub trait AccountPort: DomainPort {
    /// Stores a new account
    ///
    /// # Errors
    ///
    /// `Conflict` when the tenant already has an account with the same name.
    async fn insert_account(&self, ctx: &RequestContext, account: &Account) -> Result<(), PortError>;

    /// Persists status, frequency and modification stamps of an existing account
    async fn update_account(&self, ctx: &RequestContext, account: &Account) -> Result<(), PortError>;

    async fn find_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Option<Account>, PortError>;

    /// Lists accounts ordered by name
    async fn list_accounts(
        &self,
        ctx: &RequestContext,
        page: PageRequest,
    ) -> Result<Page<Account>, PortError>;

    /// Every account, active or not, configured with the given frequency
    async fn accounts_with_frequency(
        &self,
        ctx: &RequestContext,
        frequency: InvoiceFrequency,
    ) -> Result<Vec<Account>, PortError>;
}

/// Append-only ledger storage
#[async_trait]
pub trait LedgerPort: DomainPort {
    /// Appends both entries of a transaction plus its LedgerEntryCreated event
    ///
    /// # Errors
    ///
    /// `Conflict` when the transaction's idempotency key is already recorded;
    /// nothing is written in that case.
    async fn append_transaction(
        &self,
        ctx: &RequestContext,
        transaction: &LedgerTransaction,
    ) -> Result<(), PortError>;

    /// Fast-path duplicate check; the unique constraint remains the authority
    async fn transaction_exists(
        &self,
        ctx: &RequestContext,
        key: &TransactionKey,
    ) -> Result<bool, PortError>;

    /// Σ AR debits − Σ AR credits, optionally only over entries posted before `before`
    async fn receivable_balance(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Money, PortError>;

    /// AccountsReceivable entries posted within the closed range, oldest first
    async fn receivable_entries(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        range: &StatementRange,
    ) -> Result<Vec<LedgerEntry>, PortError>;

    /// Debit and credit totals per ledger account across the tenant
    async fn ledger_totals(&self, ctx: &RequestContext) -> Result<Vec<LedgerAccountTotals>, PortError>;
}

/// Invoice storage and the ledger queries invoicing depends on
#[async_trait]
pub trait InvoicePort: DomainPort {
    /// Receivable ride debits in the period not yet referenced by any invoice line
    async fn unbilled_charges(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<LedgerEntry>, PortError>;

    /// Receivable payment credits posted in the period
    async fn payments_in_period(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<LedgerEntry>, PortError>;

    /// Numbers the draft and stores it with its line items and InvoiceGenerated event
    ///
    /// The store allocates the next sequence for the tenant and issue month and
    /// re-checks inside the same atomic unit that no drafted entry was billed
    /// meanwhile.
    ///
    /// # Errors
    ///
    /// `Conflict` when any entry is already on another invoice.
    async fn insert_invoice(
        &self,
        ctx: &RequestContext,
        draft: InvoiceDraft,
    ) -> Result<Invoice, PortError>;

    async fn find_invoice(
        &self,
        ctx: &RequestContext,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>, PortError>;

    async fn find_invoice_by_number(
        &self,
        ctx: &RequestContext,
        number: &InvoiceNumber,
    ) -> Result<Option<Invoice>, PortError>;

    /// Invoices of one account, newest first
    async fn list_invoices(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Page<Invoice>, PortError>;
}

/// Outbox access for the external event dispatcher
#[async_trait]
pub trait OutboxPort: DomainPort {
    /// Undispatched events, oldest first
    async fn pending_events(
        &self,
        ctx: &RequestContext,
        limit: u32,
    ) -> Result<Vec<OutboxEvent>, PortError>;

    /// Records delivery; marking an already dispatched event again is a no-op
    ///
    /// # Errors
    ///
    /// `NotFound` when the event does not exist in the tenant.
    async fn mark_dispatched(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), PortError>;
}

/// Everything the billing engine needs from a single store
pub trait BillingStore: AccountPort + LedgerPort + InvoicePort + OutboxPort {}

impl<T> BillingStore for T where T: AccountPort + LedgerPort + InvoicePort + OutboxPort {}
