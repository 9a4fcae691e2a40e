//! Balanced ledger transactions
//!
//! A [`LedgerTransaction`] is the atomic unit appended to the ledger: exactly
//! one debit and one credit of equal amount, produced by the same business
//! event for the same account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use core_kernel::{AccountId, Money, TenantId, TenantScoped, TransactionId};

use crate::entry::{EntrySource, LedgerAccount, LedgerEntry, PostingSide, SourceType};
use crate::error::BillingError;

/// The idempotency key of a business transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    pub account_id: AccountId,
    pub source_type: SourceType,
    pub source_reference_id: String,
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account_id, self.source_type, self.source_reference_id)
    }
}

impl TransactionKey {
    pub fn into_duplicate_error(self) -> BillingError {
        BillingError::DuplicateTransaction {
            account_id: self.account_id,
            source_type: self.source_type,
            source_reference_id: self.source_reference_id,
        }
    }
}

/// Exactly two entries representing one business transaction
///
/// # Invariants
///
/// - One debit and one credit of the same amount
/// - Both entries share tenant, account, source type and source reference
/// - The two entries target different ledger accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerTransaction {
    id: TransactionId,
    debit: LedgerEntry,
    credit: LedgerEntry,
}

impl LedgerTransaction {
    /// Pairs two entries into a transaction
    ///
    /// # Errors
    ///
    /// - `UnbalancedTransaction` when the debit and credit totals differ
    /// - `Validation` when the pair is not one debit plus one credit, or the
    ///   entries disagree on tenant, account or source
    pub fn new(entries: [LedgerEntry; 2]) -> Result<Self, BillingError> {
        let debits: Money = entries.iter().map(|e| e.debit_amount()).sum();
        let credits: Money = entries.iter().map(|e| e.credit_amount()).sum();
        if debits != credits {
            return Err(BillingError::UnbalancedTransaction {
                debits: debits.amount(),
                credits: credits.amount(),
            });
        }

        let [first, second] = entries;
        let (debit, credit) = match (first.side(), second.side()) {
            (PostingSide::Debit, PostingSide::Credit) => (first, second),
            (PostingSide::Credit, PostingSide::Debit) => (second, first),
            _ => {
                return Err(BillingError::validation(
                    "a transaction needs exactly one debit and one credit entry",
                ))
            }
        };

        if debit.tenant_id() != credit.tenant_id() {
            return Err(BillingError::validation("transaction entries span tenants"));
        }
        if debit.account_id() != credit.account_id() {
            return Err(BillingError::validation("transaction entries span accounts"));
        }
        if debit.source_type() != credit.source_type()
            || debit.source_reference_id() != credit.source_reference_id()
        {
            return Err(BillingError::validation(
                "transaction entries must share source type and source reference",
            ));
        }
        if debit.ledger_account() == credit.ledger_account() {
            return Err(BillingError::validation(format!(
                "transaction debits and credits the same ledger account {}",
                debit.ledger_account()
            )));
        }

        Ok(Self {
            id: TransactionId::new_v7(),
            debit,
            credit,
        })
    }

    /// A ride charge: debit AccountsReceivable, credit ServiceRevenue
    pub fn ride_charge(
        tenant_id: TenantId,
        account_id: AccountId,
        ride_id: &str,
        amount: Money,
        created_at: DateTime<Utc>,
        created_by: &str,
        description: Option<&str>,
    ) -> Result<Self, BillingError> {
        let source = Self::source(
            tenant_id,
            account_id,
            SourceType::RideCharge,
            ride_id,
            created_at,
            created_by,
            description.unwrap_or("Ride charge"),
        );
        Self::new([
            LedgerEntry::debit(LedgerAccount::AccountsReceivable, amount, source.clone())?,
            LedgerEntry::credit(LedgerAccount::ServiceRevenue, amount, source)?,
        ])
    }

    /// A payment: debit Cash, credit AccountsReceivable
    pub fn payment(
        tenant_id: TenantId,
        account_id: AccountId,
        payment_id: &str,
        amount: Money,
        created_at: DateTime<Utc>,
        created_by: &str,
        description: Option<&str>,
    ) -> Result<Self, BillingError> {
        let source = Self::source(
            tenant_id,
            account_id,
            SourceType::Payment,
            payment_id,
            created_at,
            created_by,
            description.unwrap_or("Payment received"),
        );
        Self::new([
            LedgerEntry::debit(LedgerAccount::Cash, amount, source.clone())?,
            LedgerEntry::credit(LedgerAccount::AccountsReceivable, amount, source)?,
        ])
    }

    fn source(
        tenant_id: TenantId,
        account_id: AccountId,
        source_type: SourceType,
        reference: &str,
        created_at: DateTime<Utc>,
        created_by: &str,
        description: &str,
    ) -> EntrySource {
        EntrySource::new(tenant_id, account_id, source_type, reference, created_at, created_by)
            .with_description(description)
    }

    /// Correlation ID for logging; never persisted
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.debit.account_id()
    }

    pub fn source_type(&self) -> SourceType {
        self.debit.source_type()
    }

    pub fn source_reference_id(&self) -> &str {
        self.debit.source_reference_id()
    }

    pub fn amount(&self) -> Money {
        self.debit.debit_amount()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.debit.created_at()
    }

    pub fn debit(&self) -> &LedgerEntry {
        &self.debit
    }

    pub fn credit(&self) -> &LedgerEntry {
        &self.credit
    }

    /// Both entries, debit first
    pub fn entries(&self) -> [&LedgerEntry; 2] {
        [&self.debit, &self.credit]
    }

    pub fn key(&self) -> TransactionKey {
        TransactionKey {
            account_id: self.account_id(),
            source_type: self.source_type(),
            source_reference_id: self.source_reference_id().to_string(),
        }
    }
}

impl TenantScoped for LedgerTransaction {
    fn tenant_id(&self) -> TenantId {
        self.debit.tenant_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ride_charge_shape() {
        let txn = LedgerTransaction::ride_charge(
            TenantId::new(),
            AccountId::new(),
            "ride-1",
            Money::new(dec!(25)),
            Utc::now(),
            "system",
            None,
        )
        .unwrap();

        assert_eq!(txn.debit().ledger_account(), LedgerAccount::AccountsReceivable);
        assert_eq!(txn.credit().ledger_account(), LedgerAccount::ServiceRevenue);
        assert_eq!(txn.amount(), Money::new(dec!(25)));
        assert_eq!(txn.source_type(), SourceType::RideCharge);
    }

    #[test]
    fn test_unbalanced_pair_rejected() {
        let tenant = TenantId::new();
        let account = AccountId::new();
        let source = EntrySource::new(tenant, account, SourceType::RideCharge, "r", Utc::now(), "s");

        let result = LedgerTransaction::new([
            LedgerEntry::debit(LedgerAccount::AccountsReceivable, Money::new(dec!(25)), source.clone())
                .unwrap(),
            LedgerEntry::credit(LedgerAccount::ServiceRevenue, Money::new(dec!(20)), source).unwrap(),
        ]);

        assert!(matches!(result, Err(BillingError::UnbalancedTransaction { .. })));
    }

    #[test]
    fn test_two_debits_rejected() {
        let source =
            EntrySource::new(TenantId::new(), AccountId::new(), SourceType::Payment, "p", Utc::now(), "s");
        let a = LedgerEntry::debit(LedgerAccount::Cash, Money::new(dec!(5)), source.clone()).unwrap();
        let b = LedgerEntry::debit(LedgerAccount::AccountsReceivable, Money::new(dec!(5)), source)
            .unwrap();

        // Two debits can never balance, so the balance check fires first
        assert!(LedgerTransaction::new([a, b]).is_err());
    }

    #[test]
    fn test_mismatched_references_rejected() {
        let tenant = TenantId::new();
        let account = AccountId::new();
        let now = Utc::now();
        let debit = LedgerEntry::debit(
            LedgerAccount::AccountsReceivable,
            Money::new(dec!(5)),
            EntrySource::new(tenant, account, SourceType::RideCharge, "ride-1", now, "s"),
        )
        .unwrap();
        let credit = LedgerEntry::credit(
            LedgerAccount::ServiceRevenue,
            Money::new(dec!(5)),
            EntrySource::new(tenant, account, SourceType::RideCharge, "ride-2", now, "s"),
        )
        .unwrap();

        assert!(matches!(
            LedgerTransaction::new([debit, credit]),
            Err(BillingError::Validation(_))
        ));
    }

    #[test]
    fn test_entries_may_be_given_in_either_order() {
        let source =
            EntrySource::new(TenantId::new(), AccountId::new(), SourceType::Payment, "p", Utc::now(), "s");
        let credit =
            LedgerEntry::credit(LedgerAccount::AccountsReceivable, Money::new(dec!(5)), source.clone())
                .unwrap();
        let debit = LedgerEntry::debit(LedgerAccount::Cash, Money::new(dec!(5)), source).unwrap();

        let txn = LedgerTransaction::new([credit, debit]).unwrap();
        assert_eq!(txn.debit().ledger_account(), LedgerAccount::Cash);
    }
}
