//! In-memory billing store
//!
//! Implements every billing port over process-local state guarded by a single
//! `tokio::sync::RwLock`. Each write validates everything first and then
//! mutates without yielding, so a write is all-or-nothing and concurrent
//! duplicates are arbitrated by the lock exactly as a unique index would.
//!
//! Ledger entries, invoices and billed-entry markers live in [`WriteOnce`]
//! maps, which have no overwrite or removal operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tokio::sync::RwLock;

use core_kernel::{
    AccountId, AdapterHealth, BillingPeriod, DomainPort, EventId, HealthCheckResult,
    HealthCheckable, InvoiceId, LedgerEntryId, Money, Page, PageRequest, PortError,
    RequestContext, StatementRange, TenantId, TenantScoped,
};

use crate::account::Account;
use crate::entry::{LedgerAccount, LedgerEntry};
use crate::events::OutboxEvent;
use crate::invoice::{Invoice, InvoiceDraft, InvoiceNumber};
use crate::ports::{AccountPort, InvoicePort, LedgerPort, OutboxPort};
use crate::schedule::InvoiceFrequency;
use crate::statement::LedgerAccountTotals;
use crate::transaction::{LedgerTransaction, TransactionKey};

/// A map whose values can be inserted once and never replaced or removed
#[derive(Debug)]
pub struct WriteOnce<K, V> {
    entity: &'static str,
    items: HashMap<K, V>,
}

impl<K, V> WriteOnce<K, V>
where
    K: Eq + Hash + std::fmt::Debug,
{
    pub fn new(entity: &'static str) -> Self {
        Self {
            entity,
            items: HashMap::new(),
        }
    }

    /// Inserts a new value
    ///
    /// # Errors
    ///
    /// `Immutable` when the key is already present; the stored value is kept.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), PortError> {
        match self.items.entry(key) {
            Entry::Occupied(existing) => {
                Err(PortError::immutable(self.entity, format!("{:?}", existing.key())))
            }
            Entry::Vacant(slot) => {
                slot.insert(value);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.items.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.items.contains_key(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug)]
struct State {
    accounts: HashMap<AccountId, Account>,
    entries: WriteOnce<LedgerEntryId, LedgerEntry>,
    transaction_keys: HashSet<(TenantId, TransactionKey)>,
    invoices: WriteOnce<InvoiceId, Invoice>,
    billed_entries: WriteOnce<(TenantId, LedgerEntryId), InvoiceId>,
    invoice_sequences: HashMap<(TenantId, String), u32>,
    outbox: Vec<OutboxEvent>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            entries: WriteOnce::new("LedgerEntry"),
            transaction_keys: HashSet::new(),
            invoices: WriteOnce::new("Invoice"),
            billed_entries: WriteOnce::new("InvoiceLineItem"),
            invoice_sequences: HashMap::new(),
            outbox: Vec::new(),
        }
    }
}

impl State {
    fn tenant_entries(&self, tenant_id: TenantId) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values().filter(move |e| e.tenant_id() == tenant_id)
    }

    fn account_entries(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
    ) -> impl Iterator<Item = &LedgerEntry> {
        self.tenant_entries(tenant_id)
            .filter(move |e| e.account_id() == account_id)
    }

    fn account_in_tenant(&self, tenant_id: TenantId, account_id: AccountId) -> Option<&Account> {
        self.accounts
            .get(&account_id)
            .filter(|a| a.tenant_id() == tenant_id)
    }
}

/// Process-local implementation of every billing port
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    state: RwLock<State>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger entries across all tenants
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Number of invoices across all tenants
    pub async fn invoice_count(&self) -> usize {
        self.state.read().await.invoices.len()
    }
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

fn sorted_by_time(mut entries: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    entries.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then_with(|| a.id().cmp(&b.id())));
    entries
}

impl DomainPort for InMemoryBillingStore {}

#[async_trait]
impl HealthCheckable for InMemoryBillingStore {
    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult {
            adapter_id: "in-memory-billing-store".to_string(),
            status: AdapterHealth::Healthy,
            latency_ms: 0,
            message: None,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl AccountPort for InMemoryBillingStore {
    async fn insert_account(&self, ctx: &RequestContext, account: &Account) -> Result<(), PortError> {
        ensure_same_tenant(ctx, account)?;
        let mut state = self.state.write().await;
        ctx.check_cancelled()?;

        let name_taken = state
            .accounts
            .values()
            .any(|a| a.tenant_id() == ctx.tenant_id() && a.name() == account.name());
        if name_taken {
            return Err(PortError::conflict(format!(
                "account name '{}' already exists",
                account.name()
            )));
        }
        if state.accounts.contains_key(&account.id()) {
            return Err(PortError::conflict(format!("account {} already exists", account.id())));
        }
        state.accounts.insert(account.id(), account.clone());
        Ok(())
    }

    async fn update_account(&self, ctx: &RequestContext, account: &Account) -> Result<(), PortError> {
        ensure_same_tenant(ctx, account)?;
        let mut state = self.state.write().await;
        ctx.check_cancelled()?;

        match state.accounts.get_mut(&account.id()) {
            Some(existing) if existing.tenant_id() == ctx.tenant_id() => {
                *existing = account.clone();
                Ok(())
            }
            _ => Err(PortError::not_found("Account", account.id())),
        }
    }

    async fn find_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Option<Account>, PortError> {
        let state = self.state.read().await;
        Ok(state.account_in_tenant(ctx.tenant_id(), account_id).cloned())
    }

    async fn list_accounts(
        &self,
        ctx: &RequestContext,
        page: PageRequest,
    ) -> Result<Page<Account>, PortError> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.tenant_id() == ctx.tenant_id())
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id().cmp(&b.id())));

        let total = accounts.len() as u64;
        Ok(Page::new(page.slice(&accounts), page, total))
    }

    async fn accounts_with_frequency(
        &self,
        ctx: &RequestContext,
        frequency: InvoiceFrequency,
    ) -> Result<Vec<Account>, PortError> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.tenant_id() == ctx.tenant_id() && a.invoice_frequency() == frequency)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id());
        Ok(accounts)
    }
}

#[async_trait]
impl LedgerPort for InMemoryBillingStore {
    async fn append_transaction(
        &self,
        ctx: &RequestContext,
        transaction: &LedgerTransaction,
    ) -> Result<(), PortError> {
        ensure_same_tenant(ctx, transaction)?;
        let event = OutboxEvent::ledger_entries_created(transaction)?;
        let tenant_id = ctx.tenant_id();
        let key = (tenant_id, transaction.key());

        let mut state = self.state.write().await;
        match state.account_in_tenant(tenant_id, transaction.account_id()) {
            None => return Err(PortError::not_found("Account", transaction.account_id())),
            Some(account) if !account.can_receive_transactions() => {
                return Err(PortError::inactive("Account", account.id()));
            }
            Some(_) => {}
        }
        if state.transaction_keys.contains(&key) {
            return Err(PortError::conflict(format!(
                "transaction {} already recorded",
                key.1
            )));
        }
        for entry in transaction.entries() {
            if state.entries.contains_key(&entry.id()) {
                return Err(PortError::immutable("LedgerEntry", entry.id()));
            }
        }
        ctx.check_cancelled()?;

        // Commit point: nothing below can fail
        for entry in transaction.entries() {
            state.entries.insert(entry.id(), entry.clone())?;
        }
        state.transaction_keys.insert(key);
        state.outbox.push(event);
        Ok(())
    }

    async fn transaction_exists(
        &self,
        ctx: &RequestContext,
        key: &TransactionKey,
    ) -> Result<bool, PortError> {
        let state = self.state.read().await;
        Ok(state.transaction_keys.contains(&(ctx.tenant_id(), key.clone())))
    }

    async fn receivable_balance(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        before: Option<DateTime<Utc>>,
    ) -> Result<Money, PortError> {
        let state = self.state.read().await;
        Ok(state
            .account_entries(ctx.tenant_id(), account_id)
            .filter(|e| before.map_or(true, |cutoff| e.created_at() < cutoff))
            .map(LedgerEntry::receivable_delta)
            .sum())
    }

    async fn receivable_entries(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        range: &StatementRange,
    ) -> Result<Vec<LedgerEntry>, PortError> {
        let state = self.state.read().await;
        let entries = state
            .account_entries(ctx.tenant_id(), account_id)
            .filter(|e| {
                e.ledger_account() == LedgerAccount::AccountsReceivable
                    && range.contains(e.created_at())
            })
            .cloned()
            .collect();
        Ok(sorted_by_time(entries))
    }

    async fn ledger_totals(&self, ctx: &RequestContext) -> Result<Vec<LedgerAccountTotals>, PortError> {
        let state = self.state.read().await;
        let mut totals: HashMap<LedgerAccount, LedgerAccountTotals> = HashMap::new();
        for entry in state.tenant_entries(ctx.tenant_id()) {
            let line = totals
                .entry(entry.ledger_account())
                .or_insert_with(|| LedgerAccountTotals::zero(entry.ledger_account()));
            line.debits = line.debits + entry.debit_amount();
            line.credits = line.credits + entry.credit_amount();
        }
        let mut totals: Vec<_> = totals.into_values().collect();
        totals.sort_by_key(|t| t.ledger_account);
        Ok(totals)
    }
}

#[async_trait]
impl InvoicePort for InMemoryBillingStore {
    async fn unbilled_charges(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<LedgerEntry>, PortError> {
        let tenant_id = ctx.tenant_id();
        let state = self.state.read().await;
        let charges = state
            .account_entries(tenant_id, account_id)
            .filter(|e| {
                e.is_billable_charge()
                    && period.contains(e.created_at())
                    && !state.billed_entries.contains_key(&(tenant_id, e.id()))
            })
            .cloned()
            .collect();
        Ok(sorted_by_time(charges))
    }

    async fn payments_in_period(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        period: &BillingPeriod,
    ) -> Result<Vec<LedgerEntry>, PortError> {
        let state = self.state.read().await;
        let payments = state
            .account_entries(ctx.tenant_id(), account_id)
            .filter(|e| e.is_payment_credit() && period.contains(e.created_at()))
            .cloned()
            .collect();
        Ok(sorted_by_time(payments))
    }

    async fn insert_invoice(
        &self,
        ctx: &RequestContext,
        draft: InvoiceDraft,
    ) -> Result<Invoice, PortError> {
        ensure_same_tenant(ctx, &draft)?;
        let tenant_id = ctx.tenant_id();
        let mut state = self.state.write().await;

        for line in draft.line_items() {
            let entry_id = line.ledger_entry_id();
            match state.entries.get(&entry_id) {
                Some(entry) if entry.tenant_id() == tenant_id && entry.account_id() == draft.account_id() => {}
                _ => return Err(PortError::not_found("LedgerEntry", entry_id)),
            }
            if state.billed_entries.contains_key(&(tenant_id, entry_id)) {
                return Err(PortError::conflict(format!(
                    "ledger entry {} is already invoiced",
                    entry_id
                )));
            }
        }

        let issue_date = draft.issue_date();
        let sequence_key = (tenant_id, InvoiceNumber::period_key(issue_date));
        let sequence = state
            .invoice_sequences
            .get(&sequence_key)
            .copied()
            .unwrap_or(0)
            + 1;
        let invoice = draft.into_invoice(InvoiceNumber::new(issue_date, sequence));

        let number_taken = state
            .invoices
            .values()
            .any(|i| i.tenant_id() == tenant_id && i.invoice_number() == invoice.invoice_number());
        if number_taken {
            return Err(PortError::conflict(format!(
                "invoice number {} already exists",
                invoice.invoice_number()
            )));
        }
        if state.invoices.contains_key(&invoice.id()) {
            return Err(PortError::immutable("Invoice", invoice.id()));
        }
        let event = OutboxEvent::invoice_generated(&invoice)?;
        ctx.check_cancelled()?;

        // Commit point: every key was checked above
        for line in invoice.line_items() {
            state
                .billed_entries
                .insert((tenant_id, line.ledger_entry_id()), invoice.id())?;
        }
        state.invoice_sequences.insert(sequence_key, sequence);
        state.invoices.insert(invoice.id(), invoice.clone())?;
        state.outbox.push(event);
        Ok(invoice)
    }

    async fn find_invoice(
        &self,
        ctx: &RequestContext,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>, PortError> {
        let state = self.state.read().await;
        let invoice = state
            .invoices
            .get(&invoice_id)
            .filter(|i| i.tenant_id() == ctx.tenant_id())
            .cloned();
        Ok(invoice)
    }

    async fn find_invoice_by_number(
        &self,
        ctx: &RequestContext,
        number: &InvoiceNumber,
    ) -> Result<Option<Invoice>, PortError> {
        let state = self.state.read().await;
        let invoice = state
            .invoices
            .values()
            .find(|i| i.tenant_id() == ctx.tenant_id() && i.invoice_number() == number)
            .cloned();
        Ok(invoice)
    }

    async fn list_invoices(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Page<Invoice>, PortError> {
        let state = self.state.read().await;
        let mut invoices: Vec<Invoice> = state
            .invoices
            .values()
            .filter(|i| i.tenant_id() == ctx.tenant_id() && i.account_id() == account_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            b.generated_at()
                .cmp(&a.generated_at())
                .then_with(|| b.invoice_number().cmp(a.invoice_number()))
        });

        let total = invoices.len() as u64;
        Ok(Page::new(page.slice(&invoices), page, total))
    }
}

#[async_trait]
impl OutboxPort for InMemoryBillingStore {
    async fn pending_events(
        &self,
        ctx: &RequestContext,
        limit: u32,
    ) -> Result<Vec<OutboxEvent>, PortError> {
        let state = self.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| e.tenant_id == ctx.tenant_id() && e.is_pending())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_dispatched(
        &self,
        ctx: &RequestContext,
        event_id: EventId,
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), PortError> {
        let mut state = self.state.write().await;
        let event = state
            .outbox
            .iter_mut()
            .find(|e| e.id == event_id && e.tenant_id == ctx.tenant_id())
            .ok_or_else(|| PortError::not_found("OutboxEvent", event_id))?;
        if event.dispatched_at.is_none() {
            event.dispatched_at = Some(dispatched_at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_once_rejects_second_insert() {
        let mut markers: WriteOnce<u32, &str> = WriteOnce::new("BilledEntry");
        markers.insert(7, "first").unwrap();

        let second = markers.insert(7, "second");

        assert!(matches!(
            second,
            Err(PortError::Immutable { ref entity_type, ref id }) if entity_type == "BilledEntry" && id == "7"
        ));
        assert_eq!(markers.get(&7), Some(&"first"));
        assert_eq!(markers.len(), 1);
    }
}
