//! Domain Adapters
//!
//! Port implementations that connect the billing domain to PostgreSQL.
//! The adapter translates between domain models and row types and maps
//! `DatabaseError` to `PortError` at the boundary.
//!
//! # Usage
//!
//! ```rust,ignore
//! use infra_db::adapters::PostgresBillingStore;
//! use domain_billing::LedgerPort;
//!
//! let store = PostgresBillingStore::new(pool);
//! let balance = store.receivable_balance(&ctx, account_id, None).await?;
//! ```

pub mod billing;

pub use billing::PostgresBillingStore;
