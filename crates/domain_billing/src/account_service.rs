//! Account lifecycle operations

use std::sync::Arc;
use tracing::{info, instrument};

use core_kernel::{AccountId, Clock, Page, PageRequest, PortError, RequestContext};

use crate::account::{Account, NewAccount};
use crate::error::BillingError;
use crate::ports::AccountPort;
use crate::schedule::InvoiceFrequency;

pub struct AccountService {
    accounts: Arc<dyn AccountPort>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(accounts: Arc<dyn AccountPort>, clock: Arc<dyn Clock>) -> Self {
        Self { accounts, clock }
    }

    /// Opens a new Active account
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank or over-long name
    /// - `Conflict` when the tenant already uses the name
    #[instrument(skip(self, ctx, request), fields(tenant_id = %ctx.tenant_id()))]
    pub async fn create_account(
        &self,
        ctx: &RequestContext,
        request: NewAccount,
    ) -> Result<Account, BillingError> {
        let account = Account::open(ctx.tenant_id(), request, ctx.actor(), self.clock.now())?;

        match self.accounts.insert_account(ctx, &account).await {
            Ok(()) => {}
            Err(PortError::Conflict { .. }) => {
                return Err(BillingError::Conflict(format!(
                    "an account named '{}' already exists",
                    account.name()
                )))
            }
            Err(e) => return Err(e.into()),
        }

        info!(account_id = %account.id(), "account created");
        Ok(account)
    }

    pub async fn get_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Account, BillingError> {
        self.accounts
            .find_account(ctx, account_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Account", account_id))
    }

    pub async fn list_accounts(
        &self,
        ctx: &RequestContext,
        page: PageRequest,
    ) -> Result<Page<Account>, BillingError> {
        Ok(self.accounts.list_accounts(ctx, page).await?)
    }

    /// Reactivates an account; a no-op when it is already Active
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), account_id = %account_id))]
    pub async fn activate(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Account, BillingError> {
        let mut account = self.get_account(ctx, account_id).await?;
        if account.activate(ctx.actor(), self.clock.now()) {
            self.accounts.update_account(ctx, &account).await?;
            info!("account activated");
        }
        Ok(account)
    }

    /// Stops new postings; a no-op when the account is already Inactive
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), account_id = %account_id))]
    pub async fn deactivate(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Account, BillingError> {
        let mut account = self.get_account(ctx, account_id).await?;
        if account.deactivate(ctx.actor(), self.clock.now()) {
            self.accounts.update_account(ctx, &account).await?;
            info!("account deactivated");
        }
        Ok(account)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), account_id = %account_id))]
    pub async fn change_invoice_frequency(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
        frequency: InvoiceFrequency,
    ) -> Result<Account, BillingError> {
        let mut account = self.get_account(ctx, account_id).await?;
        if account.change_invoice_frequency(frequency, ctx.actor(), self.clock.now()) {
            self.accounts.update_account(ctx, &account).await?;
            info!(frequency = %frequency, "invoice frequency changed");
        }
        Ok(account)
    }
}
