//! Pre-built Test Fixtures
//!
//! Ready-to-use, predictable values for billing tests.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use core_kernel::{BillingPeriod, Money, RequestContext, TenantId};
use once_cell::sync::Lazy;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Fixed instant every fixture clock starts from: Friday 2024-03-01 09:00 UTC
pub static BILLING_EPOCH: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap());

/// Fixture for Money test data
pub struct MoneyFixtures;

impl MoneyFixtures {
    /// A typical ride fare
    pub fn ride_fare() -> Money {
        Money::new(dec!(25.00))
    }

    pub fn short_ride() -> Money {
        Money::new(dec!(12.50))
    }

    pub fn long_ride() -> Money {
        Money::new(dec!(48.75))
    }

    /// Settles part of a single ride fare
    pub fn partial_payment() -> Money {
        Money::new(dec!(10.00))
    }

    /// Exceeds a single ride fare, leaving a credit
    pub fn overpayment() -> Money {
        Money::new(dec!(30.00))
    }
}

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    pub fn epoch() -> DateTime<Utc> {
        *BILLING_EPOCH
    }

    /// Midday on the given March 2024 day
    pub fn march(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    /// `[2024-03-01, 2024-03-08)`
    pub fn first_week_of_march() -> BillingPeriod {
        BillingPeriod::new(Self::date(2024, 3, 1), Self::date(2024, 3, 8)).unwrap()
    }

    /// `[2024-03-01, 2024-04-01)`
    pub fn march_2024() -> BillingPeriod {
        BillingPeriod::new(Self::date(2024, 3, 1), Self::date(2024, 4, 1)).unwrap()
    }
}

/// Fixture for identifiers and contexts
pub struct IdFixtures;

impl IdFixtures {
    /// A tenant with a stable, recognisable UUID
    pub fn tenant() -> TenantId {
        TenantId::from_uuid(Uuid::from_u128(0x0190_0000_0000_7000_8000_0000_0000_0001))
    }

    pub fn other_tenant() -> TenantId {
        TenantId::from_uuid(Uuid::from_u128(0x0190_0000_0000_7000_8000_0000_0000_0002))
    }

    /// Context for the fixture tenant acting as `operator`
    pub fn operator_context() -> RequestContext {
        RequestContext::new(Self::tenant(), "operator").unwrap()
    }

    pub fn context_for(tenant_id: TenantId, actor: &str) -> RequestContext {
        RequestContext::new(tenant_id, actor).unwrap()
    }
}

/// Fixture for string test data
pub struct StringFixtures;

impl StringFixtures {
    pub fn account_name() -> &'static str {
        "Acme Logistics"
    }

    pub fn ride_id(n: u32) -> String {
        format!("ride-{:05}", n)
    }

    pub fn payment_id(n: u32) -> String {
        format!("pay-{:05}", n)
    }

    pub fn invoice_number() -> &'static str {
        "INV-202403-000001"
    }
}
