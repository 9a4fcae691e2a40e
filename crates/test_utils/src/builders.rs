//! Test Data Builders
//!
//! Builders with sensible defaults so tests only spell out the fields they
//! care about, plus [`BillingHarness`], which wires an engine to a store and
//! a controllable clock.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use core_kernel::{AccountId, FixedClock, Money, RequestContext};
use domain_billing::{
    Account, AccountType, BillingEngine, BillingError, BillingStore, InMemoryBillingStore,
    InvoiceFrequency, LedgerTransaction, NewAccount, PaymentRequest, RecordedCharge,
    RideChargeRequest,
};

use crate::fixtures::{IdFixtures, MoneyFixtures, StringFixtures, TemporalFixtures};

/// Builder for account creation requests
pub struct TestAccountBuilder {
    name: String,
    account_type: AccountType,
    invoice_frequency: InvoiceFrequency,
}

impl Default for TestAccountBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAccountBuilder {
    pub fn new() -> Self {
        Self {
            name: StringFixtures::account_name().to_string(),
            account_type: AccountType::Organization,
            invoice_frequency: InvoiceFrequency::Monthly,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn individual(mut self) -> Self {
        self.account_type = AccountType::Individual;
        self
    }

    pub fn with_frequency(mut self, frequency: InvoiceFrequency) -> Self {
        self.invoice_frequency = frequency;
        self
    }

    pub fn build(self) -> NewAccount {
        NewAccount::new(self.name, self.account_type, self.invoice_frequency)
    }
}

/// Builder for ride charge requests
pub struct RideChargeBuilder {
    account_id: AccountId,
    ride_id: String,
    amount: Money,
    description: Option<String>,
}

impl RideChargeBuilder {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            ride_id: StringFixtures::ride_id(1),
            amount: MoneyFixtures::ride_fare(),
            description: None,
        }
    }

    pub fn ride(mut self, ride_id: impl Into<String>) -> Self {
        self.ride_id = ride_id.into();
        self
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.amount = amount;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn build(self) -> RideChargeRequest {
        let request = RideChargeRequest::new(self.account_id, self.ride_id, self.amount);
        match self.description {
            Some(description) => request.with_description(description),
            None => request,
        }
    }
}

/// Builder for payment requests
pub struct PaymentBuilder {
    account_id: AccountId,
    payment_id: String,
    amount: Money,
}

impl PaymentBuilder {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            payment_id: StringFixtures::payment_id(1),
            amount: MoneyFixtures::ride_fare(),
        }
    }

    pub fn payment(mut self, payment_id: impl Into<String>) -> Self {
        self.payment_id = payment_id.into();
        self
    }

    pub fn amount(mut self, amount: Money) -> Self {
        self.amount = amount;
        self
    }

    pub fn build(self) -> PaymentRequest {
        PaymentRequest::new(self.account_id, self.payment_id, self.amount)
    }
}

/// An engine over a store, a fixed clock and a fixture tenant context
pub struct BillingHarness<S: BillingStore> {
    pub store: Arc<S>,
    pub clock: Arc<FixedClock>,
    pub engine: BillingEngine,
    pub ctx: RequestContext,
}

impl BillingHarness<InMemoryBillingStore> {
    /// Harness over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(InMemoryBillingStore::new()))
    }
}

impl<S: BillingStore> BillingHarness<S> {
    pub fn with_store(store: Arc<S>) -> Self {
        let clock = Arc::new(FixedClock::new(TemporalFixtures::epoch()));
        let engine = BillingEngine::new(store.clone(), clock.clone());
        Self {
            store,
            clock,
            engine,
            ctx: IdFixtures::operator_context(),
        }
    }

    /// Replaces the context, e.g. to act for another tenant
    pub fn with_context(mut self, ctx: RequestContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn at(&self, instant: DateTime<Utc>) -> &Self {
        self.clock.set(instant);
        self
    }

    pub async fn open_account(&self, request: NewAccount) -> Account {
        self.engine
            .accounts()
            .create_account(&self.ctx, request)
            .await
            .expect("account creation failed")
    }

    pub async fn charge(
        &self,
        account_id: AccountId,
        ride_id: &str,
        amount: Money,
    ) -> Result<RecordedCharge, BillingError> {
        self.engine
            .record_ride_charge(
                &self.ctx,
                RideChargeBuilder::new(account_id).ride(ride_id).amount(amount).build(),
            )
            .await
    }

    pub async fn pay(
        &self,
        account_id: AccountId,
        payment_id: &str,
        amount: Money,
    ) -> Result<LedgerTransaction, BillingError> {
        self.engine
            .ledger()
            .record_payment(
                &self.ctx,
                PaymentBuilder::new(account_id).payment(payment_id).amount(amount).build(),
            )
            .await
    }

    pub async fn balance(&self, account_id: AccountId) -> Money {
        self.engine
            .ledger()
            .get_balance(&self.ctx, account_id)
            .await
            .expect("balance lookup failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_builder_defaults() {
        let request = TestAccountBuilder::new().build();
        assert_eq!(request.name, StringFixtures::account_name());
        assert_eq!(request.invoice_frequency, InvoiceFrequency::Monthly);
    }

    #[test]
    fn test_ride_charge_builder_overrides() {
        let account_id = AccountId::new();
        let request = RideChargeBuilder::new(account_id)
            .ride("r-9")
            .amount(Money::new(dec!(7)))
            .description("Airport")
            .build();

        assert_eq!(request.ride_id, "r-9");
        assert_eq!(request.amount, Money::new(dec!(7)));
        assert_eq!(request.description.as_deref(), Some("Airport"));
    }

    #[tokio::test]
    async fn test_harness_records_and_reads_back() {
        let harness = BillingHarness::in_memory();
        let account = harness.open_account(TestAccountBuilder::new().build()).await;

        harness
            .charge(account.id(), "ride-1", MoneyFixtures::ride_fare())
            .await
            .unwrap();

        assert_eq!(harness.balance(account.id()).await, MoneyFixtures::ride_fare());
    }
}
