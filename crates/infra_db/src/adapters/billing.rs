//! PostgreSQL Billing Store
//!
//! Implements the billing ports on PostgreSQL via the repositories in
//! [`crate::repositories`].
//!
//! # Atomic writes
//!
//! `append_transaction` and `insert_invoice` each run on one database
//! transaction that also inserts the matching outbox event. The caller's
//! cancellation token is checked right before `COMMIT`; an early return drops
//! the transaction, which rolls it back.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PostgresBillingStore};
//! use domain_billing::BillingEngine;
//!
//! let pool = create_pool(DatabaseConfig::new(url)).await?;
//! let engine = BillingEngine::new(Arc::new(PostgresBillingStore::new(pool)), Arc::new(SystemClock));
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use core_kernel::{
    AccountId, AdapterHealth, BillingPeriod, DomainPort, EventId, HealthCheckResult,
    HealthCheckable, InvoiceId, Money, Page, PageRequest, PortError, RequestContext,
    StatementRange, TenantScoped,
};
use domain_billing::{
    Account, AccountPort, Invoice, InvoiceDraft, InvoiceFrequency, InvoiceNumber, InvoicePort,
    LedgerAccountTotals, LedgerEntry, LedgerPort, LedgerTransaction, OutboxEvent, OutboxPort,
    TransactionKey,
};

use crate::error::DatabaseError;
use crate::repositories::account::ACCOUNT_NAME_CONSTRAINT;
use crate::repositories::invoice::{BILLED_ENTRY_CONSTRAINT, INVOICE_NUMBER_CONSTRAINT};
use crate::repositories::ledger::SOURCE_KEY_CONSTRAINT;
use crate::repositories::{
    AccountRepository, AccountRow, InvoiceLineItemRow, InvoiceRepository, InvoiceRow,
    LedgerEntryRow, LedgerRepository, OutboxEventRow, OutboxRepository,
};

const ADAPTER_ID: &str = "postgres-billing-store";

/// PostgreSQL-backed implementation of every billing port
#[derive(Debug, Clone)]
pub struct PostgresBillingStore {
    pool: PgPool,
    accounts: AccountRepository,
    ledger: LedgerRepository,
    invoices: InvoiceRepository,
    outbox: OutboxRepository,
}

impl PostgresBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            accounts: AccountRepository::new(pool.clone()),
            ledger: LedgerRepository::new(pool.clone()),
            invoices: InvoiceRepository::new(pool.clone()),
            outbox: OutboxRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn tenant(ctx: &RequestContext) -> Uuid {
    ctx.tenant_id().into()
}

fn ensure_same_tenant<T: TenantScoped>(ctx: &RequestContext, entity: &T) -> Result<(), PortError> {
    if ctx.owns(entity) {
        Ok(())
    } else {
        Err(PortError::Unauthorized {
            message: format!("entity belongs to tenant {}", entity.tenant_id()),
        })
    }
}

fn page_bounds(page: PageRequest) -> (i64, i64) {
    (
        i64::from(page.limit()),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

fn to_entries(rows: Vec<LedgerEntryRow>) -> Result<Vec<LedgerEntry>, PortError> {
    rows.into_iter()
        .map(|row| LedgerEntry::try_from(row).map_err(PortError::from))
        .collect()
}

fn to_invoice(stored: crate::repositories::InvoiceWithLines) -> Result<Invoice, PortError> {
    Invoice::try_from(stored).map_err(PortError::from)
}

impl DomainPort for PostgresBillingStore {}

#[async_trait]
impl HealthCheckable for PostgresBillingStore {
    async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();

        let result = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await;

        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(_) => HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Healthy,
                latency_ms,
                message: None,
                checked_at: Utc::now(),
            },
            Err(e) => HealthCheckResult {
                adapter_id: ADAPTER_ID.to_string(),
                status: AdapterHealth::Unhealthy,
                latency_ms,
                message: Some(format!("Database error: {}", e)),
                checked_at: Utc::now(),
            },
        }
    }
}

#[async_trait]
impl AccountPort for PostgresBillingStore {
    #[instrument(skip(self, ctx, account), fields(tenant_id = %ctx.tenant_id(), account_id = %account.id()))]
    async fn insert_account(&self, ctx: &RequestContext, account: &Account) -> Result<(), PortError> {
        ensure_same_tenant(ctx, account)?;
        ctx.check_cancelled()?;

        match self.accounts.insert(&AccountRow::from(account)).await {
            Err(e) if e.is_duplicate_on(ACCOUNT_NAME_CONSTRAINT) => Err(PortError::conflict(format!(
                "account name '{}' already exists",
                account.name()
            ))),
            other => other.map_err(PortError::from),
        }
    }

    #[instrument(skip(self, ctx, account), fields(tenant_id = %ctx.tenant_id(), account_id = %account.id()))]
    async fn update_account(&self, ctx: &RequestContext, account: &Account) -> Result<(), PortError> {
        ensure_same_tenant(ctx, account)?;
        ctx.check_cancelled()?;

        match self.accounts.update(&AccountRow::from(account)).await {
            Err(e) if e.is_duplicate_on(ACCOUNT_NAME_CONSTRAINT) => Err(PortError::conflict(format!(
                "account name '{}' already exists",
                account.name()
            ))),
            other => other.map_err(PortError::from),
        }
    }

    async fn find_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Option<Account>, PortError> {
        self.accounts
            .find(tenant(ctx), account_id.into())
            .await?
            .map(Account::try_from)
            .transpose()
            .map_err(PortError::from)
    }

    async fn list_accounts(
        &self,
        ctx: &RequestContext,
        page: PageRequest,
    ) -> Result<Page<Account>, PortError> {
        let (limit, offset) = page_bounds(page);
        let (rows, total) = self.accounts.list(tenant(ctx), limit, offset).await?;
        let accounts = rows
            .into_iter()
            .map(Account::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(accounts, page, u64::try_from(total).unwrap_or_default()))
    }

    async fn accounts_with_frequency(
        &self,
        ctx: &RequestContext,
        frequency: InvoiceFrequency,
    ) -> Result<Vec<Account>, PortError> {
        let rows = self
            .accounts
            .with_frequency(tenant(ctx), frequency.into())
            .await?;
        Ok(rows
            .into_iter()
            .map(Account::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl LedgerPort for PostgresBillingStore {
    #[instrument(
        skip(self, ctx, transaction),
        fields(tenant_id = %ctx.tenant_id(), account_id = %transaction.account_id(), key = %transaction.key())
    )]
    async fn append_transaction(
        &self,
        ctx: &RequestContext,
        transaction: &LedgerTransaction,
    ) -> Result<(), PortError> {
        ensure_same_tenant(ctx, transaction)?;
        let event = OutboxEventRow::from(&OutboxEvent::ledger_entries_created(transaction)?);

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;
        LedgerRepository::lock_account(&mut tx, tenant(ctx), transaction.account_id().into()).await?;

        for entry in transaction.entries() {
            match LedgerRepository::insert_entry(&mut tx, &LedgerEntryRow::from(entry)).await {
                Err(e) if e.is_duplicate_on(SOURCE_KEY_CONSTRAINT) => {
                    debug!("duplicate source key rejected by the database");
                    return Err(PortError::conflict(format!(
                        "transaction {} already recorded",
                        transaction.key()
                    )));
                }
                other => other?,
            }
        }
        OutboxRepository::insert(&mut tx, &event).await?;

        ctx.check_cancelled()?;
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn transaction_exists(
        &self,
        ctx: &RequestContext,
        key: &TransactionKey,
    ) -> Result<bool, PortError> {
        Ok(self
            .ledger
            .source_exists(
                tenant(ctx),
                key.account_id.into(),
                key.source_type.into(),
                &key.source_reference_id,
            )
            .await?)
    }

    async fn receivable_balance(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Money, PortError> {
        let balance = self
            .ledger
            .receivable_balance(tenant(ctx), account_id.into(), before)
            .await?;
        Ok(Money::new(balance))
    }

    async fn receivable_entries(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        range: &StatementRange,
    ) -> Result<Vec<LedgerEntry>, PortError> {
        let rows = self
            .ledger
            .receivable_entries(tenant(ctx), account_id.into(), range.start(), range.end())
            .await?;
        to_entries(rows)
    }

    async fn ledger_totals(&self, ctx: &RequestContext) -> Result<Vec<LedgerAccountTotals>, PortError> {
        let rows = self.ledger.totals(tenant(ctx)).await?;
        Ok(rows
            .into_iter()
            .map(|row| LedgerAccountTotals {
                ledger_account: row.ledger_account.into(),
                debits: Money::new(row.debits),
                credits: Money::new(row.credits),
            })
            .collect())
    }
}

#[async_trait]
impl InvoicePort for PostgresBillingStore {
    async fn unbilled_charges(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<LedgerEntry>, PortError> {
        let rows = self
            .ledger
            .unbilled_charges(
                tenant(ctx),
                account_id.into(),
                period.start_instant(),
                period.end_instant(),
            )
            .await?;
        to_entries(rows)
    }

    async fn payments_in_period(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<LedgerEntry>, PortError> {
        let rows = self
            .ledger
            .payments_in_period(
                tenant(ctx),
                account_id.into(),
                period.start_instant(),
                period.end_instant(),
            )
            .await?;
        to_entries(rows)
    }

    #[instrument(
        skip(self, ctx, draft),
        fields(tenant_id = %ctx.tenant_id(), account_id = %draft.account_id(), lines = draft.line_items().len())
    )]
    async fn insert_invoice(
        &self,
        ctx: &RequestContext,
        draft: InvoiceDraft,
    ) -> Result<Invoice, PortError> {
        ensure_same_tenant(ctx, &draft)?;
        let tenant_id = tenant(ctx);
        let entry_ids: Vec<Uuid> = draft.ledger_entry_ids().into_iter().map(Uuid::from).collect();

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        let owned: HashSet<Uuid> = LedgerRepository::lock_account_entries(
            &mut tx,
            tenant_id,
            draft.account_id().into(),
            &entry_ids,
        )
        .await?
        .into_iter()
        .collect();
        if let Some(missing) = entry_ids.iter().find(|id| !owned.contains(id)) {
            return Err(PortError::not_found("LedgerEntry", missing));
        }

        let billed = InvoiceRepository::billed_entries(&mut tx, tenant_id, &entry_ids).await?;
        if let Some(entry_id) = billed.first() {
            return Err(PortError::conflict(format!(
                "ledger entry {} is already invoiced",
                entry_id
            )));
        }

        let issue_date = draft.issue_date();
        let sequence = InvoiceRepository::next_sequence(
            &mut tx,
            tenant_id,
            &InvoiceNumber::period_key(issue_date),
        )
        .await?;
        let sequence = u32::try_from(sequence)
            .map_err(|_| PortError::internal(format!("invalid invoice sequence {}", sequence)))?;

        let invoice = draft.into_invoice(InvoiceNumber::new(issue_date, sequence));
        let event = OutboxEventRow::from(&OutboxEvent::invoice_generated(&invoice)?);

        if let Err(e) = InvoiceRepository::insert_invoice(&mut tx, &InvoiceRow::from(&invoice)).await {
            return Err(conflict_or(e, &invoice));
        }
        for line in invoice.line_items() {
            if let Err(e) =
                InvoiceRepository::insert_line_item(&mut tx, &InvoiceLineItemRow::from(line)).await
            {
                return Err(conflict_or(e, &invoice));
            }
        }
        OutboxRepository::insert(&mut tx, &event).await?;

        ctx.check_cancelled()?;
        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(invoice)
    }

    async fn find_invoice(
        &self,
        ctx: &RequestContext,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>, PortError> {
        self.invoices
            .find(tenant(ctx), invoice_id.into())
            .await?
            .map(to_invoice)
            .transpose()
    }

    async fn find_invoice_by_number(
        &self,
        ctx: &RequestContext,
        number: &InvoiceNumber,
    ) -> Result<Option<Invoice>, PortError> {
        self.invoices
            .find_by_number(tenant(ctx), number.as_str())
            .await?
            .map(to_invoice)
            .transpose()
    }

    async fn list_invoices(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Page<Invoice>, PortError> {
        let (limit, offset) = page_bounds(page);
        let (stored, total) = self
            .invoices
            .list_for_account(tenant(ctx), account_id.into(), limit, offset)
            .await?;
        let invoices = stored
            .into_iter()
            .map(to_invoice)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(invoices, page, u64::try_from(total).unwrap_or_default()))
    }
}

/// Maps the unique violations a racing generator can hit to Conflict
fn conflict_or(error: DatabaseError, invoice: &Invoice) -> PortError {
    if error.is_duplicate_on(BILLED_ENTRY_CONSTRAINT) {
        warn!(invoice_number = %invoice.invoice_number(), "charge billed by a concurrent run");
        PortError::conflict("a ledger entry on this invoice was billed concurrently")
    } else if error.is_duplicate_on(INVOICE_NUMBER_CONSTRAINT) {
        PortError::conflict(format!(
            "invoice number {} already exists",
            invoice.invoice_number()
        ))
    } else {
        error.into()
    }
}

#[async_trait]
impl OutboxPort for PostgresBillingStore {
    async fn pending_events(
        &self,
        ctx: &RequestContext,
        limit: u32,
    ) -> Result<Vec<OutboxEvent>, PortError> {
        let rows = self.outbox.pending(tenant(ctx), i64::from(limit)).await?;
        Ok(rows
            .into_iter()
            .map(OutboxEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn mark_dispatched(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), PortError> {
        Ok(self
            .outbox
            .mark_dispatched(tenant(ctx), event_id.into(), dispatched_at)
            .await?)
    }
}
