//! Custom Test Assertions
//!
//! Assertion helpers for billing types that explain what invariant broke.

use std::collections::HashSet;

use core_kernel::Money;
use domain_billing::{BillingError, ErrorKind, Invoice, Statement, TrialBalance};

/// Asserts that two Money values are equal, printing both as currency
pub fn assert_money_eq(actual: Money, expected: Money) {
    assert_eq!(
        actual, expected,
        "Money mismatch: actual={}, expected={}",
        actual, expected
    );
}

/// Asserts that money values sum to a total
pub fn assert_money_sum(parts: &[Money], total: Money) {
    let sum: Money = parts.iter().sum();
    assert_eq!(sum, total, "Parts sum to {} but expected {}", sum, total);
}

/// Asserts that total debits equal total credits
pub fn assert_trial_balance_balanced(trial: &TrialBalance) {
    assert!(
        trial.is_balanced(),
        "Ledger out of balance: debits={}, credits={}",
        trial.total_debits,
        trial.total_credits
    );
}

/// Asserts an invoice's derived totals agree with its line items
pub fn assert_invoice_consistent(invoice: &Invoice) {
    let lines: Money = invoice.line_items().iter().map(|l| l.amount()).sum();
    assert_eq!(
        invoice.subtotal(),
        lines,
        "Invoice {} subtotal {} does not match lines {}",
        invoice.invoice_number(),
        invoice.subtotal(),
        lines
    );
    assert_eq!(
        invoice.outstanding_balance(),
        invoice.subtotal() - invoice.payments_applied(),
        "Invoice {} outstanding balance is inconsistent",
        invoice.invoice_number()
    );
    assert!(
        invoice.due_date() >= invoice.issue_date(),
        "Invoice {} is due before it is issued",
        invoice.invoice_number()
    );
    assert!(!invoice.line_items().is_empty(), "Invoice has no lines");
}

/// Asserts no ledger entry appears on more than one invoice line
pub fn assert_no_double_billing<'a>(invoices: impl IntoIterator<Item = &'a Invoice>) {
    let mut seen = HashSet::new();
    for invoice in invoices {
        for line in invoice.line_items() {
            assert!(
                seen.insert(line.ledger_entry_id()),
                "Ledger entry {} billed more than once (again on {})",
                line.ledger_entry_id(),
                invoice.invoice_number()
            );
        }
    }
}

/// Asserts the closing balance equals opening plus every line in the window
///
/// Only meaningful when the statement page holds the whole window.
pub fn assert_statement_reconciles(statement: &Statement) {
    let movement: Money = statement
        .transactions
        .items
        .iter()
        .map(|line| line.debit - line.credit)
        .sum();
    assert_eq!(
        statement.opening_balance + movement,
        statement.closing_balance,
        "Statement does not reconcile: opening={}, movement={}, closing={}",
        statement.opening_balance,
        movement,
        statement.closing_balance
    );
}

/// Asserts a result failed with the given error kind
pub fn assert_error_kind<T: std::fmt::Debug>(result: Result<T, BillingError>, kind: ErrorKind) {
    match result {
        Err(e) => assert_eq!(e.kind(), kind, "Unexpected error: {}", e),
        Ok(value) => panic!("Expected {:?} error, got Ok({:?})", kind, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_sum() {
        assert_money_sum(
            &[Money::new(dec!(25)), Money::new(dec!(30)), Money::new(dec!(20))],
            Money::new(dec!(75)),
        );
    }

    #[test]
    #[should_panic(expected = "Money mismatch")]
    fn test_money_eq_panics_on_mismatch() {
        assert_money_eq(Money::new(dec!(1)), Money::new(dec!(2)));
    }

    #[test]
    fn test_error_kind() {
        let result: Result<(), BillingError> = Err(BillingError::validation("bad"));
        assert_error_kind(result, ErrorKind::Validation);
    }
}
