//! Ledger entries
//!
//! A [`LedgerEntry`] is one side of a double-entry posting. Entries are built
//! only through [`LedgerEntry::debit`] and [`LedgerEntry::credit`], so the
//! "exactly one side strictly positive" rule cannot be bypassed. Once
//! persisted an entry is never updated or deleted.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::{AccountId, LedgerEntryId, Money, TenantId, TenantScoped};

use crate::error::BillingError;

/// Maximum length of an external source reference
pub const MAX_SOURCE_REFERENCE_LEN: usize = 100;

/// Largest amount a single entry may carry; amounts are stored as NUMERIC(19, 4)
pub const MAX_ENTRY_AMOUNT: Decimal = dec!(999_999_999_999_999.9999);

/// Fixed chart of ledger accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LedgerAccount {
    /// Money owed by the billed party
    AccountsReceivable,
    /// Revenue earned from rides
    ServiceRevenue,
    /// Money received
    Cash,
}

impl LedgerAccount {
    pub const ALL: [LedgerAccount; 3] = [
        LedgerAccount::AccountsReceivable,
        LedgerAccount::ServiceRevenue,
        LedgerAccount::Cash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerAccount::AccountsReceivable => "accounts_receivable",
            LedgerAccount::ServiceRevenue => "service_revenue",
            LedgerAccount::Cash => "cash",
        }
    }
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerAccount {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accounts_receivable" => Ok(LedgerAccount::AccountsReceivable),
            "service_revenue" => Ok(LedgerAccount::ServiceRevenue),
            "cash" => Ok(LedgerAccount::Cash),
            other => Err(BillingError::validation(format!("unknown ledger account '{}'", other))),
        }
    }
}

/// The business event that produced an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceType {
    /// A completed ride
    RideCharge,
    /// A confirmed payment
    Payment,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::RideCharge => "ride_charge",
            SourceType::Payment => "payment",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ride_charge" => Ok(SourceType::RideCharge),
            "payment" => Ok(SourceType::Payment),
            other => Err(BillingError::validation(format!("unknown source type '{}'", other))),
        }
    }
}

/// Which side of the ledger an entry posts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostingSide {
    Debit,
    Credit,
}

/// Everything an entry needs besides its side and amount
#[derive(Debug, Clone)]
pub struct EntrySource {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub source_type: SourceType,
    pub source_reference_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub description: Option<String>,
}

impl EntrySource {
    pub fn new(
        tenant_id: TenantId,
        account_id: AccountId,
        source_type: SourceType,
        source_reference_id: impl Into<String>,
        created_at: DateTime<Utc>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            account_id,
            source_type,
            source_reference_id: source_reference_id.into(),
            created_at,
            created_by: created_by.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Flat representation used to rehydrate an entry from storage
#[derive(Debug, Clone)]
pub struct LedgerEntryParts {
    pub id: LedgerEntryId,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub ledger_account: LedgerAccount,
    pub debit_amount: Money,
    pub credit_amount: Money,
    pub source_type: SourceType,
    pub source_reference_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub description: Option<String>,
}

/// A single-sided posting against one account and ledger account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    id: LedgerEntryId,
    tenant_id: TenantId,
    account_id: AccountId,
    ledger_account: LedgerAccount,
    debit_amount: Money,
    credit_amount: Money,
    source_type: SourceType,
    source_reference_id: String,
    created_at: DateTime<Utc>,
    created_by: String,
    description: Option<String>,
}

impl LedgerEntry {
    /// Creates a debit entry
    ///
    /// # Errors
    ///
    /// Returns a Validation error if `amount` is not strictly positive, exceeds
    /// [`MAX_ENTRY_AMOUNT`], or the source reference is blank.
    pub fn debit(
        ledger_account: LedgerAccount,
        amount: Money,
        source: EntrySource,
    ) -> Result<Self, BillingError> {
        Self::post(PostingSide::Debit, ledger_account, amount, source)
    }

    /// Creates a credit entry
    ///
    /// # Errors
    ///
    /// Returns a Validation error if `amount` is not strictly positive, exceeds
    /// [`MAX_ENTRY_AMOUNT`], or the source reference is blank.
    pub fn credit(
        ledger_account: LedgerAccount,
        amount: Money,
        source: EntrySource,
    ) -> Result<Self, BillingError> {
        Self::post(PostingSide::Credit, ledger_account, amount, source)
    }

    fn post(
        side: PostingSide,
        ledger_account: LedgerAccount,
        amount: Money,
        source: EntrySource,
    ) -> Result<Self, BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "entry amount must be positive, got {}",
                amount
            )));
        }
        if amount.amount() > MAX_ENTRY_AMOUNT {
            return Err(BillingError::validation(format!(
                "entry amount {} exceeds the maximum of {}",
                amount, MAX_ENTRY_AMOUNT
            )));
        }
        let source_reference_id = validate_reference(&source.source_reference_id)?;

        let (debit_amount, credit_amount) = match side {
            PostingSide::Debit => (amount, Money::zero()),
            PostingSide::Credit => (Money::zero(), amount),
        };

        Ok(Self {
            id: LedgerEntryId::new_v7(),
            tenant_id: source.tenant_id,
            account_id: source.account_id,
            ledger_account,
            debit_amount,
            credit_amount,
            source_type: source.source_type,
            source_reference_id,
            created_at: source.created_at,
            created_by: source.created_by,
            description: source.description,
        })
    }

    /// Rehydrates a persisted entry, re-checking the one-sided invariant
    pub fn from_parts(parts: LedgerEntryParts) -> Result<Self, BillingError> {
        let one_sided = (parts.debit_amount.is_positive() && parts.credit_amount.is_zero())
            || (parts.credit_amount.is_positive() && parts.debit_amount.is_zero());
        if !one_sided {
            return Err(BillingError::validation(format!(
                "entry {} must have exactly one positive side (debit={}, credit={})",
                parts.id, parts.debit_amount, parts.credit_amount
            )));
        }
        let source_reference_id = validate_reference(&parts.source_reference_id)?;

        Ok(Self {
            id: parts.id,
            tenant_id: parts.tenant_id,
            account_id: parts.account_id,
            ledger_account: parts.ledger_account,
            debit_amount: parts.debit_amount,
            credit_amount: parts.credit_amount,
            source_type: parts.source_type,
            source_reference_id,
            created_at: parts.created_at,
            created_by: parts.created_by,
            description: parts.description,
        })
    }

    pub fn id(&self) -> LedgerEntryId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn ledger_account(&self) -> LedgerAccount {
        self.ledger_account
    }

    pub fn debit_amount(&self) -> Money {
        self.debit_amount
    }

    pub fn credit_amount(&self) -> Money {
        self.credit_amount
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn source_reference_id(&self) -> &str {
        &self.source_reference_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn side(&self) -> PostingSide {
        if self.debit_amount.is_positive() {
            PostingSide::Debit
        } else {
            PostingSide::Credit
        }
    }

    /// The positive amount on whichever side this entry posts
    pub fn amount(&self) -> Money {
        match self.side() {
            PostingSide::Debit => self.debit_amount,
            PostingSide::Credit => self.credit_amount,
        }
    }

    /// Contribution to the account's receivable balance
    ///
    /// Debits raise what is owed, credits lower it. Entries outside
    /// AccountsReceivable contribute nothing.
    pub fn receivable_delta(&self) -> Money {
        if self.ledger_account != LedgerAccount::AccountsReceivable {
            return Money::zero();
        }
        self.debit_amount - self.credit_amount
    }

    /// A receivable debit produced by a ride; the only kind of entry that is invoiced
    pub fn is_billable_charge(&self) -> bool {
        self.source_type == SourceType::RideCharge
            && self.ledger_account == LedgerAccount::AccountsReceivable
            && self.side() == PostingSide::Debit
    }

    /// A receivable credit produced by a payment
    pub fn is_payment_credit(&self) -> bool {
        self.source_type == SourceType::Payment
            && self.ledger_account == LedgerAccount::AccountsReceivable
            && self.side() == PostingSide::Credit
    }

    /// Calendar date the underlying service happened on (UTC)
    pub fn service_date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

impl TenantScoped for LedgerEntry {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

fn validate_reference(reference: &str) -> Result<String, BillingError> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(BillingError::validation("source reference id must not be blank"));
    }
    if trimmed.len() > MAX_SOURCE_REFERENCE_LEN {
        return Err(BillingError::validation(format!(
            "source reference id must be at most {} bytes",
            MAX_SOURCE_REFERENCE_LEN
        )));
    }
    Ok(trimmed.to_string())
}
