//! Account statements and the trial balance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{AccountId, LedgerEntryId, Money, Page, PageRequest, StatementRange};

use crate::entry::{LedgerAccount, LedgerEntry, SourceType};
use crate::error::BillingError;

/// One receivable movement on a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub ledger_entry_id: LedgerEntryId,
    pub posted_at: DateTime<Utc>,
    pub source_type: SourceType,
    pub source_reference_id: String,
    pub description: Option<String>,
    pub debit: Money,
    pub credit: Money,
    /// Opening balance plus every movement up to and including this one
    pub running_balance: Money,
}

/// Receivable activity of an account over a closed range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub account_id: AccountId,
    pub range: StatementRange,
    pub opening_balance: Money,
    pub closing_balance: Money,
    pub transactions: Page<StatementLine>,
}

impl Statement {
    /// Builds a statement from the balance before the range and the
    /// receivable entries inside it
    ///
    /// Entries are ordered by posting time; the closing balance covers the
    /// whole window, not only the requested page.
    ///
    /// # Errors
    ///
    /// Returns a Validation error if an entry outside the range, another
    /// account, or another ledger account is passed in.
    pub fn build(
        account_id: AccountId,
        range: StatementRange,
        opening_balance: Money,
        mut window: Vec<LedgerEntry>,
        page: PageRequest,
    ) -> Result<Self, BillingError> {
        if let Some(stray) = window.iter().find(|e| {
            e.account_id() != account_id
                || e.ledger_account() != LedgerAccount::AccountsReceivable
                || !range.contains(e.created_at())
        }) {
            return Err(BillingError::validation(format!(
                "entry {} does not belong on this statement",
                stray.id()
            )));
        }

        window.sort_by(|a, b| a.created_at().cmp(&b.created_at()).then_with(|| a.id().cmp(&b.id())));

        let mut running = opening_balance;
        let lines: Vec<StatementLine> = window
            .into_iter()
            .map(|entry| {
                running = running + entry.receivable_delta();
                StatementLine {
                    ledger_entry_id: entry.id(),
                    posted_at: entry.created_at(),
                    source_type: entry.source_type(),
                    source_reference_id: entry.source_reference_id().to_string(),
                    description: entry.description().map(str::to_string),
                    debit: entry.debit_amount(),
                    credit: entry.credit_amount(),
                    running_balance: running,
                }
            })
            .collect();

        let total = lines.len() as u64;
        Ok(Self {
            account_id,
            range,
            opening_balance,
            closing_balance: running,
            transactions: Page::new(page.slice(&lines), page, total),
        })
    }
}

/// Debit and credit totals for one ledger account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAccountTotals {
    pub ledger_account: LedgerAccount,
    pub debits: Money,
    pub credits: Money,
}

impl LedgerAccountTotals {
    pub fn zero(ledger_account: LedgerAccount) -> Self {
        Self {
            ledger_account,
            debits: Money::zero(),
            credits: Money::zero(),
        }
    }

    /// Debits minus credits
    pub fn net(&self) -> Money {
        self.debits - self.credits
    }
}

/// Per ledger-account totals across a tenant's whole ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub lines: Vec<LedgerAccountTotals>,
    pub total_debits: Money,
    pub total_credits: Money,
}

impl TrialBalance {
    /// Fills in missing ledger accounts with zero totals
    pub fn from_totals(totals: Vec<LedgerAccountTotals>) -> Self {
        let lines: Vec<LedgerAccountTotals> = LedgerAccount::ALL
            .iter()
            .map(|account| {
                totals
                    .iter()
                    .filter(|t| t.ledger_account == *account)
                    .fold(LedgerAccountTotals::zero(*account), |acc, t| LedgerAccountTotals {
                        ledger_account: *account,
                        debits: acc.debits + t.debits,
                        credits: acc.credits + t.credits,
                    })
            })
            .collect();

        let total_debits = lines.iter().map(|l| l.debits).sum();
        let total_credits = lines.iter().map(|l| l.credits).sum();
        Self {
            lines,
            total_debits,
            total_credits,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debits == self.total_credits
    }

    pub fn line(&self, ledger_account: LedgerAccount) -> Option<&LedgerAccountTotals> {
        self.lines.iter().find(|l| l.ledger_account == ledger_account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::LedgerTransaction;
    use chrono::{Duration, TimeZone};
    use core_kernel::TenantId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_running_balance_and_pagination() {
        let tenant = TenantId::new();
        let account = AccountId::new();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        let charge = |ride: &str, amount, hours| {
            LedgerTransaction::ride_charge(
                tenant,
                account,
                ride,
                Money::new(amount),
                base + Duration::hours(hours),
                "system",
                None,
            )
            .unwrap()
            .debit()
            .clone()
        };
        let payment = LedgerTransaction::payment(
            tenant,
            account,
            "pay-1",
            Money::new(dec!(20)),
            base + Duration::hours(3),
            "system",
            None,
        )
        .unwrap()
        .credit()
        .clone();

        let window = vec![payment, charge("r2", dec!(30), 2), charge("r1", dec!(25), 1)];
        let range = StatementRange::new(base, base + Duration::days(1)).unwrap();

        let statement = Statement::build(
            account,
            range,
            Money::new(dec!(5)),
            window,
            PageRequest::new(1, 2),
        )
        .unwrap();

        assert_eq!(statement.transactions.total, 3);
        assert_eq!(statement.transactions.items.len(), 2);
        assert_eq!(statement.transactions.items[0].source_reference_id, "r1");
        assert_eq!(statement.transactions.items[0].running_balance, Money::new(dec!(30)));
        assert_eq!(statement.transactions.items[1].running_balance, Money::new(dec!(60)));
        assert_eq!(statement.closing_balance, Money::new(dec!(40)));
    }

    #[test]
    fn test_empty_window() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let range = StatementRange::new(start, start).unwrap();
        let statement =
            Statement::build(AccountId::new(), range, Money::zero(), vec![], PageRequest::default())
                .unwrap();
        assert_eq!(statement.opening_balance, statement.closing_balance);
        assert!(statement.transactions.items.is_empty());
    }

    #[test]
    fn test_trial_balance_fills_missing_accounts() {
        let trial = TrialBalance::from_totals(vec![LedgerAccountTotals {
            ledger_account: LedgerAccount::Cash,
            debits: Money::new(dec!(10)),
            credits: Money::zero(),
        }]);
        assert_eq!(trial.lines.len(), 3);
        assert!(!trial.is_balanced());
        assert_eq!(trial.line(LedgerAccount::Cash).map(|l| l.net()), Some(Money::new(dec!(10))));
    }
}
