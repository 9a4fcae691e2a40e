//! Strongly-typed identifiers for billing entities
//!
//! Using newtype wrappers around UUIDs provides type safety and prevents
//! accidental mixing of different identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates a new time-ordered identifier (v7)
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Returns true for the all-zero UUID
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Returns the identifier prefix for display
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Strip prefix if present
                let uuid_str = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Tenancy
define_id!(TenantId, "TEN");

// Billing domain identifiers
define_id!(AccountId, "ACC");
define_id!(LedgerEntryId, "LED");
define_id!(InvoiceId, "INV");
define_id!(InvoiceLineItemId, "INVL");

// Correlation identifiers
define_id!(TransactionId, "TXN");
define_id!(EventId, "EVT");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_display() {
        let id = AccountId::new();
        assert!(id.to_string().starts_with("ACC-"));
    }

    #[test]
    fn test_id_parsing() {
        let original = LedgerEntryId::new_v7();
        let parsed: LedgerEntryId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_nil_tenant() {
        assert!(TenantId::from_uuid(Uuid::nil()).is_nil());
        assert!(!TenantId::new().is_nil());
    }
}
