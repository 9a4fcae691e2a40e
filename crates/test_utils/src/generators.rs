//! Property-Based Test Generators
//!
//! Proptest strategies that produce values satisfying billing invariants.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use core_kernel::{AccountId, BillingPeriod, Money, TenantId};
use domain_billing::InvoiceFrequency;
use proptest::prelude::*;

/// Strategy for positive amounts in cents
pub fn positive_cents_strategy() -> impl Strategy<Value = i64> {
    1i64..10_000_000i64
}

/// Strategy for positive USD Money values with cent precision
pub fn positive_money_strategy() -> impl Strategy<Value = Money> {
    positive_cents_strategy().prop_map(Money::from_minor)
}

/// Strategy for Money values of either sign
pub fn money_strategy() -> impl Strategy<Value = Money> {
    (-10_000_000i64..10_000_000i64).prop_map(Money::from_minor)
}

/// Strategy for external ride or payment references
pub fn source_reference_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}-[0-9]{1,12}"
}

/// Strategy for timestamps within 2024
pub fn timestamp_2024_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..366 * 24 * 60).prop_map(|minutes| {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    })
}

/// Strategy for non-empty billing periods of 1 to 62 days within 2024
pub fn billing_period_strategy() -> impl Strategy<Value = BillingPeriod> {
    (0i64..300i64, 1i64..=62i64).prop_map(|(offset, length)| {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset);
        BillingPeriod::new(start, start + Duration::days(length)).expect("generated invalid period")
    })
}

pub fn invoice_frequency_strategy() -> impl Strategy<Value = InvoiceFrequency> {
    prop_oneof![
        Just(InvoiceFrequency::PerRide),
        Just(InvoiceFrequency::Daily),
        Just(InvoiceFrequency::Weekly),
        Just(InvoiceFrequency::Monthly),
    ]
}

/// Strategy for the frequencies the scheduler sweeps
pub fn scheduled_frequency_strategy() -> impl Strategy<Value = InvoiceFrequency> {
    prop_oneof![
        Just(InvoiceFrequency::Daily),
        Just(InvoiceFrequency::Weekly),
        Just(InvoiceFrequency::Monthly),
    ]
}

pub fn tenant_id_strategy() -> impl Strategy<Value = TenantId> {
    any::<u128>()
        .prop_filter("nil tenant", |n| *n != 0)
        .prop_map(|n| TenantId::from_uuid(uuid::Uuid::from_u128(n)))
}

pub fn account_id_strategy() -> impl Strategy<Value = AccountId> {
    any::<[u8; 16]>().prop_map(|bytes| AccountId::from_uuid(uuid::Uuid::from_bytes(bytes)))
}
