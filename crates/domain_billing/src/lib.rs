//! Billing Domain - Ride Billing Ledger and Invoice Engine
//!
//! This crate records ride charges and payments as balanced double-entry
//! transactions, derives balances and statements from the immutable entry
//! log, and aggregates unbilled charges into immutable invoices.
//!
//! # Double-Entry Postings
//!
//! Every business transaction is exactly two entries of equal amount:
//! - **Ride charge**: debit AccountsReceivable, credit ServiceRevenue
//! - **Payment**: debit Cash, credit AccountsReceivable
//!
//! An account's balance is Σ AR debits − Σ AR credits: positive is owed,
//! negative is prepaid credit.
//!
//! # Guarantees
//!
//! - `(account, source reference, source type)` is recorded at most once;
//!   duplicates surface as [`BillingError::DuplicateTransaction`]
//! - Ledger entries and invoices are never updated or deleted
//! - A ledger entry appears on at most one invoice line
//! - Every read and write is scoped to the tenant of the [`RequestContext`]
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingEngine, InMemoryBillingStore, RideChargeRequest};
//!
//! let engine = BillingEngine::new(Arc::new(InMemoryBillingStore::new()), Arc::new(SystemClock));
//! let ctx = RequestContext::new(tenant_id, "dispatcher")?;
//!
//! engine
//!     .record_ride_charge(&ctx, RideChargeRequest::new(account_id, "ride-1", Money::new(dec!(25))))
//!     .await?;
//! let balance = engine.ledger().get_balance(&ctx, account_id).await?;
//! ```
//!
//! [`RequestContext`]: core_kernel::RequestContext

pub mod account;
pub mod entry;
pub mod transaction;
pub mod invoice;
pub mod schedule;
pub mod statement;
pub mod events;
pub mod ports;
pub mod memory;
pub mod account_service;
pub mod ledger_service;
pub mod invoice_service;
pub mod engine;
pub mod error;

pub use account::{Account, AccountRecord, AccountStatus, AccountType, NewAccount};
pub use entry::{
    EntrySource, LedgerAccount, LedgerEntry, LedgerEntryParts, PostingSide, SourceType,
    MAX_ENTRY_AMOUNT,
};
pub use transaction::{LedgerTransaction, TransactionKey};
pub use invoice::{Invoice, InvoiceDraft, InvoiceLineItem, InvoiceNumber, InvoiceRecord};
pub use schedule::InvoiceFrequency;
pub use statement::{LedgerAccountTotals, Statement, StatementLine, TrialBalance};
pub use events::{BillingEventType, OutboxEvent};
pub use ports::{AccountPort, BillingStore, InvoicePort, LedgerPort, OutboxPort};
pub use memory::InMemoryBillingStore;
pub use account_service::AccountService;
pub use ledger_service::{LedgerService, PaymentRequest, RideChargeRequest};
pub use invoice_service::{
    InvoiceOptions, InvoiceService, InvoicingPolicy, ScheduledRun, SweepOutcome,
    DEFAULT_PAYMENT_TERMS_DAYS,
};
pub use engine::{BillingEngine, PerRideInvoiceOutcome, RecordedCharge};
pub use error::{BillingError, ErrorKind};
