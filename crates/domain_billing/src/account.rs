//! Billable accounts
//!
//! An [`Account`] is the party a ride is billed to. Accounts are created
//! Active, toggle between Active and Inactive, and are never deleted: an
//! inactive account stops receiving new postings but stays fully readable and
//! invoiceable for historical billing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use core_kernel::{AccountId, TenantId, TenantScoped, CURRENCY_CODE};

use crate::error::BillingError;
use crate::schedule::InvoiceFrequency;

/// Maximum account name length in characters
pub const MAX_ACCOUNT_NAME_LEN: u64 = 200;

/// Kind of billable party
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    /// A company billed for its riders
    Organization,
    /// A single rider
    Individual,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Organization => "organization",
            AccountType::Individual => "individual",
        }
    }
}

impl FromStr for AccountType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "organization" => Ok(AccountType::Organization),
            "individual" => Ok(AccountType::Individual),
            other => Err(BillingError::validation(format!("unknown account type '{}'", other))),
        }
    }
}

/// Lifecycle status of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            other => Err(BillingError::validation(format!("unknown account status '{}'", other))),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to open a new account
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewAccount {
    /// Display name, unique within the tenant
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    /// Kind of party
    pub account_type: AccountType,
    /// How often invoices are generated
    pub invoice_frequency: InvoiceFrequency,
}

impl NewAccount {
    pub fn new(
        name: impl Into<String>,
        account_type: AccountType,
        invoice_frequency: InvoiceFrequency,
    ) -> Self {
        Self {
            name: name.into(),
            account_type,
            invoice_frequency,
        }
    }
}

/// Flat representation used to rehydrate an [`Account`] from storage
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub id: AccountId,
    pub tenant_id: TenantId,
    pub name: String,
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub invoice_frequency: InvoiceFrequency,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
}

/// A billable party
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    id: AccountId,
    tenant_id: TenantId,
    name: String,
    account_type: AccountType,
    status: AccountStatus,
    invoice_frequency: InvoiceFrequency,
    created_at: DateTime<Utc>,
    created_by: String,
    modified_at: Option<DateTime<Utc>>,
    modified_by: Option<String>,
}

impl Account {
    /// Opens a new Active account
    ///
    /// # Errors
    ///
    /// Returns a Validation error if the name is blank or longer than 200 characters.
    pub fn open(
        tenant_id: TenantId,
        request: NewAccount,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        request.validate()?;
        let name = validate_name(&request.name)?;

        Ok(Self {
            id: AccountId::new_v7(),
            tenant_id,
            name,
            account_type: request.account_type,
            status: AccountStatus::Active,
            invoice_frequency: request.invoice_frequency,
            created_at: now,
            created_by: created_by.to_string(),
            modified_at: None,
            modified_by: None,
        })
    }

    /// Rehydrates an account from a stored record, re-checking its invariants
    pub fn from_record(record: AccountRecord) -> Result<Self, BillingError> {
        let name = validate_name(&record.name)?;
        Ok(Self {
            id: record.id,
            tenant_id: record.tenant_id,
            name,
            account_type: record.account_type,
            status: record.status,
            invoice_frequency: record.invoice_frequency,
            created_at: record.created_at,
            created_by: record.created_by,
            modified_at: record.modified_at,
            modified_by: record.modified_by,
        })
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn account_type(&self) -> AccountType {
        self.account_type
    }

    pub fn status(&self) -> AccountStatus {
        self.status
    }

    pub fn currency(&self) -> &'static str {
        CURRENCY_CODE
    }

    pub fn invoice_frequency(&self) -> InvoiceFrequency {
        self.invoice_frequency
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.modified_at
    }

    pub fn modified_by(&self) -> Option<&str> {
        self.modified_by.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Only Active accounts accept new postings
    pub fn can_receive_transactions(&self) -> bool {
        self.is_active()
    }

    /// Marks the account Active. Returns false when it already was.
    pub fn activate(&mut self, actor: &str, now: DateTime<Utc>) -> bool {
        self.transition(AccountStatus::Active, actor, now)
    }

    /// Marks the account Inactive. Returns false when it already was.
    pub fn deactivate(&mut self, actor: &str, now: DateTime<Utc>) -> bool {
        self.transition(AccountStatus::Inactive, actor, now)
    }

    /// Changes how often the account is invoiced. Returns false when unchanged.
    pub fn change_invoice_frequency(
        &mut self,
        frequency: InvoiceFrequency,
        actor: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if self.invoice_frequency == frequency {
            return false;
        }
        self.invoice_frequency = frequency;
        self.stamp(actor, now);
        true
    }

    fn transition(&mut self, target: AccountStatus, actor: &str, now: DateTime<Utc>) -> bool {
        if self.status == target {
            return false;
        }
        self.status = target;
        self.stamp(actor, now);
        true
    }

    fn stamp(&mut self, actor: &str, now: DateTime<Utc>) {
        self.modified_at = Some(now);
        self.modified_by = Some(actor.to_string());
    }
}

impl TenantScoped for Account {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

fn validate_name(name: &str) -> Result<String, BillingError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BillingError::validation("account name must not be blank"));
    }
    if trimmed.chars().count() as u64 > MAX_ACCOUNT_NAME_LEN {
        return Err(BillingError::validation(format!(
            "account name must be at most {} characters",
            MAX_ACCOUNT_NAME_LEN
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(name: &str) -> Result<Account, BillingError> {
        Account::open(
            TenantId::new(),
            NewAccount::new(name, AccountType::Organization, InvoiceFrequency::Monthly),
            "alice",
            Utc::now(),
        )
    }

    #[test]
    fn test_new_account_is_active() {
        let account = open("Acme Corp").unwrap();
        assert!(account.can_receive_transactions());
        assert_eq!(account.currency(), "USD");
        assert!(account.modified_at().is_none());
    }

    #[test]
    fn test_blank_name_is_rejected() {
        assert!(matches!(open("   "), Err(BillingError::Validation(_))));
        assert!(matches!(open(""), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_name_length_limit() {
        assert!(open(&"a".repeat(200)).is_ok());
        assert!(matches!(open(&"a".repeat(201)), Err(BillingError::Validation(_))));
    }

    #[test]
    fn test_deactivate_is_idempotent() {
        let mut account = open("Acme Corp").unwrap();
        let now = Utc::now();

        assert!(account.deactivate("bob", now));
        assert!(!account.deactivate("carol", now));
        assert_eq!(account.modified_by(), Some("bob"));
        assert!(!account.can_receive_transactions());

        assert!(account.activate("carol", now));
        assert!(account.can_receive_transactions());
        assert_eq!(account.modified_by(), Some("carol"));
    }
}
