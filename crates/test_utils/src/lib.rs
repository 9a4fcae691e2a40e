//! Test Utilities Crate
//!
//! Shared test infrastructure for the ride billing workspace.
//!
//! # Modules
//!
//! - `fixtures`: Predictable values for tenants, money and dates
//! - `builders`: Request builders and the [`BillingHarness`]
//! - `database`: PostgreSQL testcontainer management
//! - `assertions`: Invariant-checking assertions for billing types
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
