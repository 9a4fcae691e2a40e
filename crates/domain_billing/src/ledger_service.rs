//! Ledger Engine
//!
//! Appends balanced transactions exactly once and derives balances,
//! statements and the trial balance from the immutable entry log. Balances
//! are never cached; every read recomputes them from entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use core_kernel::{
    AccountId, Clock, Money, PageRequest, PortError, RequestContext, StatementRange, TransactionId,
};

use crate::account::Account;
use crate::error::BillingError;
use crate::ports::{AccountPort, LedgerPort};
use crate::statement::{Statement, TrialBalance};
use crate::transaction::LedgerTransaction;

/// A completed ride to be charged to an account
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RideChargeRequest {
    pub account_id: AccountId,
    /// External ride ID; part of the idempotency key
    #[validate(length(min = 1, max = 100))]
    pub ride_id: String,
    pub amount: Money,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

impl RideChargeRequest {
    pub fn new(account_id: AccountId, ride_id: impl Into<String>, amount: Money) -> Self {
        Self {
            account_id,
            ride_id: ride_id.into(),
            amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A confirmed payment received from an account
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PaymentRequest {
    pub account_id: AccountId,
    /// External payment ID; part of the idempotency key
    #[validate(length(min = 1, max = 100))]
    pub payment_id: String,
    pub amount: Money,
    #[validate(length(max = 500))]
    pub description: Option<String>,
}

impl PaymentRequest {
    pub fn new(account_id: AccountId, payment_id: impl Into<String>, amount: Money) -> Self {
        Self {
            account_id,
            payment_id: payment_id.into(),
            amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Appends transactions and answers balance questions
pub struct LedgerService {
    accounts: Arc<dyn AccountPort>,
    ledger: Arc<dyn LedgerPort>,
    clock: Arc<dyn Clock>,
}

impl LedgerService {
    pub fn new(
        accounts: Arc<dyn AccountPort>,
        ledger: Arc<dyn LedgerPort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            clock,
        }
    }

    /// Appends one balanced transaction atomically
    ///
    /// The returned ID only correlates the pair in logs; entries are addressed
    /// individually.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when the transaction belongs to another tenant
    /// - `NotFound` when the account does not exist in the tenant
    /// - `AccountInactive` when the account cannot receive postings
    /// - `DuplicateTransaction` when the idempotency key is already recorded,
    ///   including when a concurrent writer wins the race
    #[instrument(
        skip(self, ctx, transaction),
        fields(
            tenant_id = %ctx.tenant_id(),
            account_id = %transaction.account_id(),
            source_type = %transaction.source_type(),
            source_reference_id = %transaction.source_reference_id(),
        )
    )]
    pub(crate) async fn append_transaction(
        &self,
        ctx: &RequestContext,
        transaction: &LedgerTransaction,
    ) -> Result<TransactionId, BillingError> {
        if !ctx.owns(transaction) {
            return Err(BillingError::Unauthorized(
                "transaction belongs to another tenant".to_string(),
            ));
        }

        // Fast path only; the store re-checks status inside the write
        let account = self.load_account(ctx, transaction.account_id()).await?;
        if !account.can_receive_transactions() {
            return Err(BillingError::AccountInactive(account.id()));
        }

        let key = transaction.key();
        if self.ledger.transaction_exists(ctx, &key).await? {
            warn!("duplicate transaction rejected before write");
            return Err(key.into_duplicate_error());
        }

        match self.ledger.append_transaction(ctx, transaction).await {
            Ok(()) => {}
            Err(PortError::Conflict { .. }) => {
                warn!("duplicate transaction rejected by store");
                return Err(key.into_duplicate_error());
            }
            Err(PortError::Inactive { .. }) => {
                warn!("account deactivated before the write committed");
                return Err(BillingError::AccountInactive(transaction.account_id()));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            transaction_id = %transaction.id(),
            amount = %transaction.amount(),
            "transaction appended"
        );
        Ok(transaction.id())
    }

    /// Charges a completed ride: debit AccountsReceivable, credit ServiceRevenue
    pub async fn record_ride_charge(
        &self,
        ctx: &RequestContext,
        request: RideChargeRequest,
    ) -> Result<LedgerTransaction, BillingError> {
        request.validate()?;
        let transaction = LedgerTransaction::ride_charge(
            ctx.tenant_id(),
            request.account_id,
            &request.ride_id,
            request.amount,
            self.clock.now(),
            ctx.actor(),
            request.description.as_deref(),
        )?;
        self.append_transaction(ctx, &transaction).await?;
        Ok(transaction)
    }

    /// Records a payment: debit Cash, credit AccountsReceivable
    pub async fn record_payment(
        &self,
        ctx: &RequestContext,
        request: PaymentRequest,
    ) -> Result<LedgerTransaction, BillingError> {
        request.validate()?;
        let transaction = LedgerTransaction::payment(
            ctx.tenant_id(),
            request.account_id,
            &request.payment_id,
            request.amount,
            self.clock.now(),
            ctx.actor(),
            request.description.as_deref(),
        )?;
        self.append_transaction(ctx, &transaction).await?;
        Ok(transaction)
    }

    /// Current receivable balance: positive is owed, negative is credit
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), account_id = %account_id))]
    pub async fn get_balance(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Money, BillingError> {
        self.load_account(ctx, account_id).await?;
        Ok(self.ledger.receivable_balance(ctx, account_id, None).await?)
    }

    /// Receivable activity over the closed range `[start, end]`
    ///
    /// # Errors
    ///
    /// Returns a Validation error when `end < start`.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), account_id = %account_id))]
    pub async fn get_statement(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Statement, BillingError> {
        let range = StatementRange::new(start, end)?;
        self.load_account(ctx, account_id).await?;

        let opening_balance = self
            .ledger
            .receivable_balance(ctx, account_id, Some(range.start()))
            .await?;
        let window = self.ledger.receivable_entries(ctx, account_id, &range).await?;

        Statement::build(account_id, range, opening_balance, window, page)
    }

    /// Debit and credit totals per ledger account for the tenant
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn trial_balance(&self, ctx: &RequestContext) -> Result<TrialBalance, BillingError> {
        let trial = TrialBalance::from_totals(self.ledger.ledger_totals(ctx).await?);
        if !trial.is_balanced() {
            warn!(
                debits = %trial.total_debits,
                credits = %trial.total_credits,
                "trial balance does not balance"
            );
        }
        Ok(trial)
    }

    async fn load_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Account, BillingError> {
        self.accounts
            .find_account(ctx, account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Account", account_id))
    }
}
