//! Concurrent access tests for the billing services
//!
//! These run on the multi-threaded runtime so that competing writers really
//! interleave on the store lock.

use chrono::{NaiveDate, TimeZone, Utc};
use futures::future::join_all;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;

use core_kernel::{BillingPeriod, FixedClock, Money, RequestContext, TenantId};
use domain_billing::{
    AccountType, BillingEngine, BillingError, InMemoryBillingStore, InvoiceFrequency,
    InvoiceOptions, NewAccount, PaymentRequest, RideChargeRequest,
};

fn setup() -> (Arc<InMemoryBillingStore>, Arc<BillingEngine>, RequestContext) {
    let store = Arc::new(InMemoryBillingStore::new());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap()));
    let engine = Arc::new(BillingEngine::new(store.clone(), clock));
    let ctx = RequestContext::new(TenantId::new_v7(), "worker").unwrap();
    (store, engine, ctx)
}

async fn open_account(engine: &BillingEngine, ctx: &RequestContext) -> core_kernel::AccountId {
    engine
        .accounts()
        .create_account(
            ctx,
            NewAccount::new("Concurrent Co", AccountType::Organization, InvoiceFrequency::Weekly),
        )
        .await
        .unwrap()
        .id()
}

// ============================================================================
// Idempotent Posting
// ============================================================================

mod posting_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_charges_race_to_a_single_posting() {
        let (store, engine, ctx) = setup();
        let account_id = open_account(&engine, &ctx).await;

        let attempts = (0..16).map(|_| {
            let engine = engine.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                engine
                    .record_ride_charge(
                        &ctx,
                        RideChargeRequest::new(account_id, "ride-42", Money::new(dec!(25))),
                    )
                    .await
            })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, BillingError::DuplicateTransaction { .. })));

        let balance = engine.ledger().get_balance(&ctx, account_id).await.unwrap();
        assert_eq!(balance, Money::new(dec!(25)));
        assert_eq!(store.entry_count().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_postings_all_land() {
        let (_store, engine, ctx) = setup();
        let account_id = open_account(&engine, &ctx).await;

        let charges = (0..20).map(|i| {
            let engine = engine.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                engine
                    .record_ride_charge(
                        &ctx,
                        RideChargeRequest::new(account_id, format!("ride-{i}"), Money::new(dec!(5))),
                    )
                    .await
                    .map(|_| ())
            })
        });
        let payments = (0..10).map(|i| {
            let engine = engine.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                engine
                    .ledger()
                    .record_payment(
                        &ctx,
                        PaymentRequest::new(account_id, format!("pay-{i}"), Money::new(dec!(3))),
                    )
                    .await
                    .map(|_| ())
            })
        });

        let charge_results = join_all(charges).await;
        let payment_results = join_all(payments).await;
        assert!(charge_results.into_iter().all(|r| r.unwrap().is_ok()));
        assert!(payment_results.into_iter().all(|r| r.unwrap().is_ok()));

        let balance = engine.ledger().get_balance(&ctx, account_id).await.unwrap();
        assert_eq!(balance, Money::new(dec!(70)));
        assert!(engine.ledger().trial_balance(&ctx).await.unwrap().is_balanced());
    }
}

// ============================================================================
// Invoice Generation Races
// ============================================================================

mod invoicing_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_competing_runs_never_double_bill() {
        let (store, engine, ctx) = setup();
        let account_id = open_account(&engine, &ctx).await;
        for i in 0..8 {
            engine
                .record_ride_charge(
                    &ctx,
                    RideChargeRequest::new(account_id, format!("ride-{i}"), Money::new(dec!(10))),
                )
                .await
                .unwrap();
        }

        let period = BillingPeriod::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
        )
        .unwrap();

        let runs = (0..6).map(|_| {
            let engine = engine.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                engine
                    .invoices()
                    .generate_invoice(&ctx, account_id, period, InvoiceOptions::default())
                    .await
            })
        });
        let results: Vec<_> = join_all(runs).await.into_iter().map(|r| r.unwrap()).collect();

        let invoices: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert!(!invoices.is_empty());
        for error in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                matches!(error, BillingError::Conflict(_) | BillingError::NoUnbilledCharges { .. }),
                "unexpected error {:?}",
                error
            );
        }

        let mut billed = HashSet::new();
        for invoice in &invoices {
            for line in invoice.line_items() {
                assert!(billed.insert(line.ledger_entry_id()), "entry billed twice");
            }
        }
        assert_eq!(billed.len(), 8);

        let numbers: HashSet<_> = invoices.iter().map(|i| i.invoice_number().clone()).collect();
        assert_eq!(numbers.len(), invoices.len());
        assert_eq!(store.invoice_count().await, invoices.len());
    }
}
