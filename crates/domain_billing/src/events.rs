//! Integration events queued in the transactional outbox
//!
//! Stores write an [`OutboxEvent`] in the same atomic unit as the domain rows
//! it describes. Delivery to a broker happens elsewhere; the store only
//! exposes pending events and lets the dispatcher mark them sent.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{
    AccountId, EventId, InvoiceId, LedgerEntryId, Money, PortError, TenantId, TenantScoped,
    TransactionId,
};

use crate::entry::SourceType;
use crate::invoice::Invoice;
use crate::transaction::LedgerTransaction;

/// Kind of integration event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillingEventType {
    LedgerEntryCreated,
    InvoiceGenerated,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::LedgerEntryCreated => "LedgerEntryCreated",
            BillingEventType::InvoiceGenerated => "InvoiceGenerated",
        }
    }
}

impl fmt::Display for BillingEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingEventType {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LedgerEntryCreated" => Ok(BillingEventType::LedgerEntryCreated),
            "InvoiceGenerated" => Ok(BillingEventType::InvoiceGenerated),
            other => Err(PortError::internal(format!("unknown event type '{}'", other))),
        }
    }
}

/// Payload of a LedgerEntryCreated event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntriesCreated {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub source_type: SourceType,
    pub source_reference_id: String,
    pub amount: Money,
    pub entry_ids: Vec<LedgerEntryId>,
}

/// Payload of an InvoiceGenerated event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceGenerated {
    pub invoice_id: InvoiceId,
    pub invoice_number: String,
    pub account_id: AccountId,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub subtotal: Money,
    pub outstanding_balance: Money,
    pub line_item_count: usize,
}

/// A durably queued integration event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,
    pub tenant_id: TenantId,
    pub event_type: BillingEventType,
    /// ID of the aggregate the event is about
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Event for a freshly appended transaction
    pub fn ledger_entries_created(transaction: &LedgerTransaction) -> Result<Self, PortError> {
        let payload = LedgerEntriesCreated {
            transaction_id: transaction.id(),
            account_id: transaction.account_id(),
            source_type: transaction.source_type(),
            source_reference_id: transaction.source_reference_id().to_string(),
            amount: transaction.amount(),
            entry_ids: transaction.entries().iter().map(|e| e.id()).collect(),
        };
        Self::pending(
            transaction.tenant_id(),
            BillingEventType::LedgerEntryCreated,
            transaction.id().to_string(),
            &payload,
            transaction.created_at(),
        )
    }

    /// Event for a freshly stored invoice
    pub fn invoice_generated(invoice: &Invoice) -> Result<Self, PortError> {
        let payload = InvoiceGenerated {
            invoice_id: invoice.id(),
            invoice_number: invoice.invoice_number().to_string(),
            account_id: invoice.account_id(),
            billing_period_start: invoice.billing_period_start(),
            billing_period_end: invoice.billing_period_end(),
            subtotal: invoice.subtotal(),
            outstanding_balance: invoice.outstanding_balance(),
            line_item_count: invoice.line_items().len(),
        };
        Self::pending(
            invoice.tenant_id(),
            BillingEventType::InvoiceGenerated,
            invoice.id().to_string(),
            &payload,
            invoice.generated_at(),
        )
    }

    fn pending<P: Serialize>(
        tenant_id: TenantId,
        event_type: BillingEventType,
        aggregate_id: String,
        payload: &P,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, PortError> {
        let payload = serde_json::to_value(payload).map_err(|e| PortError::Internal {
            message: format!("failed to serialize {} payload", event_type),
            source: Some(Box::new(e)),
        })?;
        Ok(Self {
            id: EventId::new_v7(),
            tenant_id,
            event_type,
            aggregate_id,
            payload,
            occurred_at,
            dispatched_at: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.dispatched_at.is_none()
    }
}

impl TenantScoped for OutboxEvent {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
