//! Core Kernel - Foundational types and utilities for the ride billing system
//!
//! This crate provides the fundamental building blocks used by the billing domain
//! and its adapters:
//! - Money with fixed four-digit decimal precision
//! - Strongly-typed identifiers
//! - Billing periods and statement ranges
//! - The tenant-scoped request context
//! - Port error types shared by every adapter

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod error;
pub mod context;
pub mod clock;
pub mod pagination;
pub mod ports;

pub use money::{Money, MoneyError, CURRENCY_CODE};
pub use temporal::{BillingPeriod, StatementRange, TemporalError};
pub use identifiers::{
    TenantId, AccountId, LedgerEntryId, InvoiceId, InvoiceLineItemId,
    TransactionId, EventId,
};
pub use error::CoreError;
pub use context::{RequestContext, TenantScoped, SYSTEM_ACTOR};
pub use clock::{Clock, SystemClock, FixedClock};
pub use pagination::{PageRequest, Page};
pub use ports::{
    PortError, DomainPort, HealthCheckable, HealthCheckResult, AdapterHealth,
};
