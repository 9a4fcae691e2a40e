//! Infrastructure Database Layer
//!
//! PostgreSQL storage for the ride billing domain using SQLx.
//!
//! # Architecture
//!
//! The crate follows the repository pattern: repositories own the SQL and
//! row types, and [`PostgresBillingStore`] implements the domain ports on top
//! of them.
//!
//! # Storage guarantees
//!
//! - Every query is scoped by `tenant_id`
//! - Ledger entries, invoices and invoice lines are protected by triggers
//!   that reject `UPDATE` and `DELETE`
//! - Unique constraints back transaction idempotency, invoice numbering and
//!   the one-invoice-per-entry rule
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresBillingStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/ride_billing")).await?;
//! run_migrations(&pool).await?;
//! let store = PostgresBillingStore::new(pool);
//! ```

pub mod pool;
pub mod error;
pub mod repositories;
pub mod adapters;

pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool};
pub use error::DatabaseError;
pub use adapters::PostgresBillingStore;
