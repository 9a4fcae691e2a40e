//! Invoices
//!
//! An [`Invoice`] aggregates a closed set of unbilled ride charges for one
//! account and billing period. Invoices are assembled as an [`InvoiceDraft`]
//! by the domain, numbered by the store inside the persisting transaction, and
//! are immutable from then on: there are no setters and no update path.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use core_kernel::{
    AccountId, BillingPeriod, InvoiceId, InvoiceLineItemId, LedgerEntryId, Money, TenantId,
    TenantScoped,
};

use crate::entry::LedgerEntry;
use crate::error::BillingError;

/// Prefix of every invoice number
pub const INVOICE_NUMBER_PREFIX: &str = "INV";

/// Human-readable invoice number, `INV-{yyyyMM}-{sequence:06}`
///
/// The sequence is allocated per tenant per issue month and increases
/// monotonically within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumber(String);

impl InvoiceNumber {
    /// Formats the number for a sequence within the issue month
    pub fn new(issue_date: NaiveDate, sequence: u32) -> Self {
        Self(format!(
            "{}-{}-{:06}",
            INVOICE_NUMBER_PREFIX,
            Self::period_key(issue_date),
            sequence
        ))
    }

    /// The `yyyyMM` key sequences are allocated under
    pub fn period_key(issue_date: NaiveDate) -> String {
        issue_date.format("%Y%m").to_string()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sequence part of the number
    pub fn sequence(&self) -> u32 {
        // Parsing already validated the suffix
        self.0
            .rsplit('-')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InvoiceNumber {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BillingError::validation(format!("malformed invoice number '{}'", s));
        let mut parts = s.split('-');
        let (Some(prefix), Some(period), Some(sequence), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if prefix != INVOICE_NUMBER_PREFIX
            || period.len() != 6
            || !period.bytes().all(|b| b.is_ascii_digit())
            || sequence.len() < 6
            || !sequence.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let month: u32 = period[4..].parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for InvoiceNumber {
    type Error = BillingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InvoiceNumber> for String {
    fn from(number: InvoiceNumber) -> String {
        number.0
    }
}

/// One billed ride on an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvoiceLineItem {
    id: InvoiceLineItemId,
    invoice_id: InvoiceId,
    tenant_id: TenantId,
    ledger_entry_id: LedgerEntryId,
    source_reference_id: String,
    service_date: NaiveDate,
    amount: Money,
    description: String,
}

impl InvoiceLineItem {
    fn for_charge(invoice_id: InvoiceId, charge: &LedgerEntry) -> Self {
        let description = charge
            .description()
            .map(|d| format!("{} ({})", d, charge.source_reference_id()))
            .unwrap_or_else(|| format!("Ride {}", charge.source_reference_id()));

        Self {
            id: InvoiceLineItemId::new_v7(),
            invoice_id,
            tenant_id: charge.tenant_id(),
            ledger_entry_id: charge.id(),
            source_reference_id: charge.source_reference_id().to_string(),
            service_date: charge.service_date(),
            amount: charge.debit_amount(),
            description,
        }
    }

    /// Rehydrates a stored line item
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: InvoiceLineItemId,
        invoice_id: InvoiceId,
        tenant_id: TenantId,
        ledger_entry_id: LedgerEntryId,
        source_reference_id: String,
        service_date: NaiveDate,
        amount: Money,
        description: String,
    ) -> Result<Self, BillingError> {
        if !amount.is_positive() {
            return Err(BillingError::validation(format!(
                "line item {} must have a positive amount",
                id
            )));
        }
        Ok(Self {
            id,
            invoice_id,
            tenant_id,
            ledger_entry_id,
            source_reference_id,
            service_date,
            amount,
            description,
        })
    }

    pub fn id(&self) -> InvoiceLineItemId {
        self.id
    }

    pub fn invoice_id(&self) -> InvoiceId {
        self.invoice_id
    }

    /// The billed ledger entry
    pub fn ledger_entry_id(&self) -> LedgerEntryId {
        self.ledger_entry_id
    }

    /// The ride the charge came from
    pub fn source_reference_id(&self) -> &str {
        &self.source_reference_id
    }

    pub fn service_date(&self) -> NaiveDate {
        self.service_date
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl TenantScoped for InvoiceLineItem {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// An invoice assembled from unbilled charges, not yet numbered or stored
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    id: InvoiceId,
    tenant_id: TenantId,
    account_id: AccountId,
    period: BillingPeriod,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    subtotal: Money,
    payments_applied: Money,
    line_items: Vec<InvoiceLineItem>,
    generated_at: DateTime<Utc>,
    generated_by: String,
}

/// Inputs for [`InvoiceDraft::assemble`]
#[derive(Debug, Clone)]
pub struct DraftRequest<'a> {
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub period: BillingPeriod,
    pub issue_date: NaiveDate,
    pub payment_terms_days: u32,
    pub charges: &'a [LedgerEntry],
    pub payments: &'a [LedgerEntry],
    pub generated_at: DateTime<Utc>,
    pub generated_by: &'a str,
}

impl InvoiceDraft {
    /// Builds one line item per charge and derives the totals
    ///
    /// # Errors
    ///
    /// - `NoUnbilledCharges` when `charges` is empty
    /// - `Validation` when a charge is not a receivable ride debit of this
    ///   account and tenant inside the period, or appears twice
    pub fn assemble(request: DraftRequest<'_>) -> Result<Self, BillingError> {
        if request.charges.is_empty() {
            return Err(BillingError::NoUnbilledCharges {
                account_id: request.account_id,
                start: request.period.start(),
                end: request.period.end(),
            });
        }

        let id = InvoiceId::new_v7();
        let mut seen = HashSet::with_capacity(request.charges.len());
        let mut line_items = Vec::with_capacity(request.charges.len());

        for charge in request.charges {
            if charge.tenant_id() != request.tenant_id || charge.account_id() != request.account_id {
                return Err(BillingError::validation(format!(
                    "entry {} does not belong to account {}",
                    charge.id(),
                    request.account_id
                )));
            }
            if !charge.is_billable_charge() {
                return Err(BillingError::validation(format!(
                    "entry {} is not a billable ride charge",
                    charge.id()
                )));
            }
            if !request.period.contains(charge.created_at()) {
                return Err(BillingError::validation(format!(
                    "entry {} falls outside the billing period",
                    charge.id()
                )));
            }
            if !seen.insert(charge.id()) {
                return Err(BillingError::validation(format!(
                    "entry {} listed twice",
                    charge.id()
                )));
            }
            line_items.push(InvoiceLineItem::for_charge(id, charge));
        }
        line_items.sort_by(|a, b| {
            a.service_date
                .cmp(&b.service_date)
                .then_with(|| a.ledger_entry_id.cmp(&b.ledger_entry_id))
        });

        let subtotal: Money = line_items.iter().map(|l| l.amount).sum();
        let payments_applied: Money = request
            .payments
            .iter()
            .filter(|p| {
                p.account_id() == request.account_id
                    && p.is_payment_credit()
                    && request.period.contains(p.created_at())
            })
            .map(|p| p.credit_amount())
            .sum();

        let due_date = request
            .issue_date
            .checked_add_days(Days::new(u64::from(request.payment_terms_days)))
            .ok_or_else(|| BillingError::validation("due date out of range"))?;

        Ok(Self {
            id,
            tenant_id: request.tenant_id,
            account_id: request.account_id,
            period: request.period,
            issue_date: request.issue_date,
            due_date,
            subtotal,
            payments_applied,
            line_items,
            generated_at: request.generated_at,
            generated_by: request.generated_by.to_string(),
        })
    }

    pub fn id(&self) -> InvoiceId {
        self.id
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn period(&self) -> BillingPeriod {
        self.period
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn payments_applied(&self) -> Money {
        self.payments_applied
    }

    pub fn line_items(&self) -> &[InvoiceLineItem] {
        &self.line_items
    }

    /// Entries this draft would bill
    pub fn ledger_entry_ids(&self) -> Vec<LedgerEntryId> {
        self.line_items.iter().map(|l| l.ledger_entry_id).collect()
    }

    /// Finalizes the draft with the number allocated by the store
    pub fn into_invoice(self, invoice_number: InvoiceNumber) -> Invoice {
        Invoice {
            id: self.id,
            invoice_number,
            tenant_id: self.tenant_id,
            account_id: self.account_id,
            period: self.period,
            issue_date: self.issue_date,
            due_date: self.due_date,
            subtotal: self.subtotal,
            payments_applied: self.payments_applied,
            outstanding_balance: self.subtotal - self.payments_applied,
            line_items: self.line_items,
            generated_at: self.generated_at,
            generated_by: self.generated_by,
        }
    }
}

impl TenantScoped for InvoiceDraft {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Flat representation used to rehydrate an invoice from storage
#[derive(Debug, Clone)]
pub struct InvoiceRecord {
    pub id: InvoiceId,
    pub invoice_number: InvoiceNumber,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Money,
    pub payments_applied: Money,
    pub outstanding_balance: Money,
    pub line_items: Vec<InvoiceLineItem>,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
}

/// An issued, immutable invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invoice {
    id: InvoiceId,
    invoice_number: InvoiceNumber,
    tenant_id: TenantId,
    account_id: AccountId,
    period: BillingPeriod,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    subtotal: Money,
    payments_applied: Money,
    outstanding_balance: Money,
    line_items: Vec<InvoiceLineItem>,
    generated_at: DateTime<Utc>,
    generated_by: String,
}

impl Invoice {
    /// Rehydrates a stored invoice, re-checking the derived totals
    pub fn from_record(record: InvoiceRecord) -> Result<Self, BillingError> {
        let period = BillingPeriod::new(record.billing_period_start, record.billing_period_end)?;
        let line_total: Money = record.line_items.iter().map(|l| l.amount).sum();
        if line_total != record.subtotal {
            return Err(BillingError::validation(format!(
                "invoice {} subtotal {} does not match its line items {}",
                record.invoice_number, record.subtotal, line_total
            )));
        }
        if record.subtotal - record.payments_applied != record.outstanding_balance {
            return Err(BillingError::validation(format!(
                "invoice {} outstanding balance is inconsistent",
                record.invoice_number
            )));
        }
        if record.line_items.iter().any(|l| l.invoice_id != record.id) {
            return Err(BillingError::validation(format!(
                "invoice {} carries foreign line items",
                record.invoice_number
            )));
        }

        Ok(Self {
            id: record.id,
            invoice_number: record.invoice_number,
            tenant_id: record.tenant_id,
            account_id: record.account_id,
            period,
            issue_date: record.issue_date,
            due_date: record.due_date,
            subtotal: record.subtotal,
            payments_applied: record.payments_applied,
            outstanding_balance: record.outstanding_balance,
            line_items: record.line_items,
            generated_at: record.generated_at,
            generated_by: record.generated_by,
        })
    }

    pub fn id(&self) -> InvoiceId {
        self.id
    }

    pub fn invoice_number(&self) -> &InvoiceNumber {
        &self.invoice_number
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn billing_period(&self) -> BillingPeriod {
        self.period
    }

    pub fn billing_period_start(&self) -> NaiveDate {
        self.period.start()
    }

    pub fn billing_period_end(&self) -> NaiveDate {
        self.period.end()
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn due_date(&self) -> NaiveDate {
        self.due_date
    }

    pub fn subtotal(&self) -> Money {
        self.subtotal
    }

    pub fn payments_applied(&self) -> Money {
        self.payments_applied
    }

    /// Subtotal less payments; negative when the account prepaid
    pub fn outstanding_balance(&self) -> Money {
        self.outstanding_balance
    }

    pub fn line_items(&self) -> &[InvoiceLineItem] {
        &self.line_items
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn generated_by(&self) -> &str {
        &self.generated_by
    }

    pub fn currency(&self) -> &'static str {
        core_kernel::CURRENCY_CODE
    }
}

impl TenantScoped for Invoice {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::LedgerTransaction;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn charge(tenant: TenantId, account: AccountId, ride: &str, amount: Money, day: u32) -> LedgerEntry {
        let at = Utc.with_ymd_and_hms(2024, 3, day, 10, 0, 0).unwrap();
        LedgerTransaction::ride_charge(tenant, account, ride, amount, at, "system", None)
            .unwrap()
            .debit()
            .clone()
    }

    #[test]
    fn test_invoice_number_format() {
        let number = InvoiceNumber::new(date(2024, 3, 5), 42);
        assert_eq!(number.as_str(), "INV-202403-000042");
        assert_eq!(number.sequence(), 42);
        assert_eq!("INV-202403-000042".parse::<InvoiceNumber>().unwrap(), number);
    }

    #[test]
    fn test_malformed_invoice_numbers_rejected() {
        for bad in ["INV-2024-001", "BILL-202403-000001", "INV-202413-000001", "INV-202403-12"] {
            assert!(bad.parse::<InvoiceNumber>().is_err(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_draft_totals() {
        let tenant = TenantId::new();
        let account = AccountId::new();
        let charges = vec![
            charge(tenant, account, "r1", Money::new(dec!(25)), 1),
            charge(tenant, account, "r2", Money::new(dec!(30)), 2),
            charge(tenant, account, "r3", Money::new(dec!(20)), 3),
        ];
        let payment = LedgerTransaction::payment(
            tenant,
            account,
            "p1",
            Money::new(dec!(10)),
            Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap(),
            "system",
            None,
        )
        .unwrap();
        let payments = vec![payment.credit().clone()];

        let draft = InvoiceDraft::assemble(DraftRequest {
            tenant_id: tenant,
            account_id: account,
            period: BillingPeriod::new(date(2024, 3, 1), date(2024, 3, 8)).unwrap(),
            issue_date: date(2024, 3, 8),
            payment_terms_days: 30,
            charges: &charges,
            payments: &payments,
            generated_at: Utc::now(),
            generated_by: "system",
        })
        .unwrap();

        assert_eq!(draft.line_items().len(), 3);
        assert_eq!(draft.subtotal(), Money::new(dec!(75)));
        assert_eq!(draft.payments_applied(), Money::new(dec!(10)));

        let invoice = draft.into_invoice(InvoiceNumber::new(date(2024, 3, 8), 1));
        assert_eq!(invoice.outstanding_balance(), Money::new(dec!(65)));
        assert_eq!(invoice.due_date(), date(2024, 4, 7));
        assert!(invoice.line_items().iter().all(|l| l.invoice_id() == invoice.id()));
    }

    #[test]
    fn test_empty_draft_is_rejected() {
        let result = InvoiceDraft::assemble(DraftRequest {
            tenant_id: TenantId::new(),
            account_id: AccountId::new(),
            period: BillingPeriod::new(date(2024, 3, 1), date(2024, 3, 8)).unwrap(),
            issue_date: date(2024, 3, 8),
            payment_terms_days: 30,
            charges: &[],
            payments: &[],
            generated_at: Utc::now(),
            generated_by: "system",
        });
        assert!(matches!(result, Err(BillingError::NoUnbilledCharges { .. })));
    }

    #[test]
    fn test_charge_outside_period_is_rejected() {
        let tenant = TenantId::new();
        let account = AccountId::new();
        let charges = vec![charge(tenant, account, "r1", Money::new(dec!(25)), 20)];

        let result = InvoiceDraft::assemble(DraftRequest {
            tenant_id: tenant,
            account_id: account,
            period: BillingPeriod::new(date(2024, 3, 1), date(2024, 3, 8)).unwrap(),
            issue_date: date(2024, 3, 8),
            payment_terms_days: 30,
            charges: &charges,
            payments: &[],
            generated_at: Utc::now(),
            generated_by: "system",
        });
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }
}
