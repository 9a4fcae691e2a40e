//! Job runner tests over the in-memory store

use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use core_kernel::Money;
use domain_billing::{BillingEngine, BillingEventType, InMemoryBillingStore, InvoiceFrequency, OutboxEvent};
use interface_jobs::{JobError, JobRunner};
use test_utils::{BillingHarness, TemporalFixtures, TestAccountBuilder};

fn runner(h: &BillingHarness<InMemoryBillingStore>) -> JobRunner {
    JobRunner::new(BillingEngine::new(h.store.clone(), h.clock.clone()))
}

async fn weekly_account(h: &BillingHarness<InMemoryBillingStore>, name: &str) -> core_kernel::AccountId {
    h.open_account(
        TestAccountBuilder::new()
            .with_name(name)
            .with_frequency(InvoiceFrequency::Weekly)
            .build(),
    )
    .await
    .id()
}

// ============================================================================
// Scheduled sweeps
// ============================================================================

mod scheduled_tests {
    use super::*;

    #[tokio::test]
    async fn test_summary_lists_generated_and_skipped() {
        let h = BillingHarness::in_memory();
        let busy = weekly_account(&h, "Busy").await;
        weekly_account(&h, "Idle").await;

        h.at(TemporalFixtures::march(10));
        h.charge(busy, "ride-1", Money::new(dec!(25))).await.unwrap();
        h.charge(busy, "ride-2", Money::new(dec!(15))).await.unwrap();

        let summary = runner(&h)
            .run_scheduled(&h.ctx, InvoiceFrequency::Weekly, TemporalFixtures::march(15))
            .await
            .unwrap();

        assert_eq!(summary.period_start, TemporalFixtures::date(2024, 3, 8));
        assert_eq!(summary.period_end, TemporalFixtures::date(2024, 3, 15));
        assert_eq!(summary.invoices, vec!["INV-202403-000001".to_string()]);
        assert_eq!(summary.skipped, 1);
        assert!(summary.is_complete());
    }

    #[tokio::test]
    async fn test_rerun_generates_nothing_new() {
        let h = BillingHarness::in_memory();
        let account = weekly_account(&h, "Busy").await;
        h.at(TemporalFixtures::march(10));
        h.charge(account, "ride-1", Money::new(dec!(25))).await.unwrap();

        let runner = runner(&h);
        runner
            .run_scheduled(&h.ctx, InvoiceFrequency::Weekly, TemporalFixtures::march(15))
            .await
            .unwrap();
        let rerun = runner
            .run_scheduled(&h.ctx, InvoiceFrequency::Weekly, TemporalFixtures::march(15))
            .await
            .unwrap();

        assert!(rerun.invoices.is_empty());
        assert_eq!(rerun.skipped, 1);
    }

    #[tokio::test]
    async fn test_cancelled_sweep_is_incomplete() {
        let h = BillingHarness::in_memory();
        let account = weekly_account(&h, "Busy").await;
        h.at(TemporalFixtures::march(10));
        h.charge(account, "ride-1", Money::new(dec!(25))).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let ctx = h.ctx.clone().with_cancellation(token);

        let summary = runner(&h)
            .run_scheduled(&ctx, InvoiceFrequency::Weekly, TemporalFixtures::march(15))
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert!(summary.invoices.is_empty());
        assert!(!summary.is_complete());
    }

    #[tokio::test]
    async fn test_per_ride_sweep_is_rejected() {
        let h = BillingHarness::in_memory();

        let result = runner(&h)
            .run_scheduled(&h.ctx, InvoiceFrequency::PerRide, TemporalFixtures::march(15))
            .await;

        assert!(matches!(result, Err(JobError::Billing(ref e)) if e.is_validation()));
    }

    #[tokio::test]
    async fn test_summary_serializes_for_output() {
        let h = BillingHarness::in_memory();

        let summary = runner(&h)
            .run_scheduled(&h.ctx, InvoiceFrequency::Monthly, TemporalFixtures::march(15))
            .await
            .unwrap();
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["frequency"], "Monthly");
        assert_eq!(json["period_start"], "2024-02-01");
        assert_eq!(json["period_end"], "2024-03-01");
    }
}

// ============================================================================
// Outbox draining
// ============================================================================

mod outbox_tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_writes_json_lines_and_marks_dispatched() {
        let h = BillingHarness::in_memory();
        let account = weekly_account(&h, "Busy").await;
        h.charge(account, "ride-1", Money::new(dec!(25))).await.unwrap();
        h.pay(account, "pay-1", Money::new(dec!(25))).await.unwrap();

        let runner = runner(&h);
        let mut out = Vec::new();
        let dispatched = runner.drain_outbox(&h.ctx, 10, &mut out).await.unwrap();

        assert_eq!(dispatched, 2);
        let events: Vec<OutboxEvent> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.event_type == BillingEventType::LedgerEntryCreated));

        let mut again = Vec::new();
        assert_eq!(runner.drain_outbox(&h.ctx, 10, &mut again).await.unwrap(), 0);
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_drain_respects_limit() {
        let h = BillingHarness::in_memory();
        let account = weekly_account(&h, "Busy").await;
        for n in 0..3 {
            h.charge(account, &format!("ride-{}", n), Money::new(dec!(5)))
                .await
                .unwrap();
        }

        let runner = runner(&h);
        let mut out = Vec::new();

        assert_eq!(runner.drain_outbox(&h.ctx, 2, &mut out).await.unwrap(), 2);
        assert_eq!(runner.drain_outbox(&h.ctx, 2, &mut out).await.unwrap(), 1);
    }
}
