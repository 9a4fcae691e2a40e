//! Property-based tests for ledger and invoice invariants

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;

use core_kernel::{BillingPeriod, FixedClock, Money, RequestContext, TenantId};
use domain_billing::{
    AccountType, BillingEngine, InMemoryBillingStore, InvoiceFrequency, InvoiceOptions,
    NewAccount, PaymentRequest, RideChargeRequest,
};

#[derive(Debug, Clone)]
enum Posting {
    Charge { minor: i64, day: i64 },
    Payment { minor: i64, day: i64 },
}

fn posting_strategy() -> impl Strategy<Value = Posting> {
    prop_oneof![
        (1i64..500_000i64, 0i64..28i64).prop_map(|(minor, day)| Posting::Charge { minor, day }),
        (1i64..500_000i64, 0i64..28i64).prop_map(|(minor, day)| Posting::Payment { minor, day }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

struct Replay {
    engine: BillingEngine,
    ctx: RequestContext,
    account_id: core_kernel::AccountId,
}

async fn replay(postings: &[Posting]) -> Replay {
    let start = Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap();
    let clock = Arc::new(FixedClock::new(start));
    let engine = BillingEngine::new(Arc::new(InMemoryBillingStore::new()), clock.clone());
    let ctx = RequestContext::new(TenantId::new_v7(), "prop").unwrap();
    let account_id = engine
        .accounts()
        .create_account(
            &ctx,
            NewAccount::new("Prop Co", AccountType::Individual, InvoiceFrequency::Monthly),
        )
        .await
        .unwrap()
        .id();

    for (i, posting) in postings.iter().enumerate() {
        match posting {
            Posting::Charge { minor, day } => {
                clock.set(start + Duration::days(*day));
                engine
                    .record_ride_charge(
                        &ctx,
                        RideChargeRequest::new(account_id, format!("ride-{i}"), Money::from_minor(*minor)),
                    )
                    .await
                    .unwrap();
            }
            Posting::Payment { minor, day } => {
                clock.set(start + Duration::days(*day));
                engine
                    .ledger()
                    .record_payment(
                        &ctx,
                        PaymentRequest::new(account_id, format!("pay-{i}"), Money::from_minor(*minor)),
                    )
                    .await
                    .unwrap();
            }
        }
    }

    Replay {
        engine,
        ctx,
        account_id,
    }
}

fn expected_balance(postings: &[Posting]) -> Money {
    postings
        .iter()
        .map(|p| match p {
            Posting::Charge { minor, .. } => Money::from_minor(*minor),
            Posting::Payment { minor, .. } => -Money::from_minor(*minor),
        })
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_balance_is_charges_minus_payments(postings in prop::collection::vec(posting_strategy(), 0..30)) {
        let rt = runtime();
        let replay = rt.block_on(replay(&postings));
        let balance = rt
            .block_on(replay.engine.ledger().get_balance(&replay.ctx, replay.account_id))
            .unwrap();

        prop_assert_eq!(balance, expected_balance(&postings));
    }

    #[test]
    fn prop_trial_balance_always_balances(postings in prop::collection::vec(posting_strategy(), 0..30)) {
        let rt = runtime();
        let replay = rt.block_on(replay(&postings));
        let trial = rt.block_on(replay.engine.ledger().trial_balance(&replay.ctx)).unwrap();

        prop_assert!(trial.is_balanced());
    }

    #[test]
    fn prop_statement_closing_matches_balance(postings in prop::collection::vec(posting_strategy(), 1..30)) {
        let rt = runtime();
        let replay = rt.block_on(replay(&postings));
        let statement = rt
            .block_on(replay.engine.ledger().get_statement(
                &replay.ctx,
                replay.account_id,
                Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap(),
                core_kernel::PageRequest::new(1, 5),
            ))
            .unwrap();
        let balance = rt
            .block_on(replay.engine.ledger().get_balance(&replay.ctx, replay.account_id))
            .unwrap();

        prop_assert_eq!(statement.closing_balance, balance);
    }

    #[test]
    fn prop_invoice_subtotal_is_sum_of_charges_in_period(postings in prop::collection::vec(posting_strategy(), 1..30)) {
        let rt = runtime();
        let replay = rt.block_on(replay(&postings));
        let period = BillingPeriod::new(
            NaiveDate::from_ymd_opt(2024, 2, 8).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(),
        )
        .unwrap();

        let expected: Money = postings
            .iter()
            .filter_map(|p| match p {
                Posting::Charge { minor, day } if (7..14).contains(day) => Some(Money::from_minor(*minor)),
                _ => None,
            })
            .sum();

        let result = rt.block_on(replay.engine.invoices().generate_invoice(
            &replay.ctx,
            replay.account_id,
            period,
            InvoiceOptions::default(),
        ));

        match result {
            Ok(invoice) => {
                prop_assert_eq!(invoice.subtotal(), expected);
                prop_assert_eq!(
                    invoice.outstanding_balance(),
                    invoice.subtotal() - invoice.payments_applied()
                );
            }
            Err(e) => {
                prop_assert!(expected.is_zero());
                prop_assert!(e.is_validation());
            }
        }
    }
}
