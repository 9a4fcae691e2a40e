//! Repository implementations for billing tables
//!
//! Repositories encapsulate SQL and map between database rows and domain
//! types. Methods that take a `&mut PgConnection` run on a caller-owned
//! transaction; the rest use the pool directly.
//!
//! Every query carries a `tenant_id` predicate.

pub mod account;
pub mod ledger;
pub mod invoice;
pub mod outbox;

pub use account::{AccountRepository, AccountRow};
pub use ledger::{LedgerEntryRow, LedgerRepository, LedgerTotalsRow};
pub use invoice::{InvoiceLineItemRow, InvoiceRepository, InvoiceRow, InvoiceWithLines};
pub use outbox::{OutboxEventRow, OutboxRepository};
