//! PostgreSQL store integration tests
//!
//! Each test starts its own container, so these need a Docker daemon:
//!
//! ```text
//! cargo test -p infra_db -- --ignored
//! ```

use rust_decimal_macros::dec;
use std::sync::Arc;

use core_kernel::{AdapterHealth, Clock, HealthCheckable, Money, PageRequest, PortError};
use domain_billing::{
    BillingError, BillingEventType, InvoiceFrequency, InvoiceOptions, LedgerPort,
    LedgerTransaction, SourceType,
};
use infra_db::{DatabaseError, PostgresBillingStore};
use test_utils::{
    assert_error_kind, assert_invoice_consistent, assert_money_eq, assert_trial_balance_balanced,
    create_isolated_test_database, BillingHarness, IdFixtures, TemporalFixtures,
    TestAccountBuilder, TestDatabase,
};

async fn harness() -> (TestDatabase, BillingHarness<PostgresBillingStore>) {
    let db = create_isolated_test_database()
        .await
        .expect("failed to start test database");
    let store = Arc::new(PostgresBillingStore::new(db.pool().clone()));
    (db, BillingHarness::with_store(store))
}

fn usd(amount: rust_decimal::Decimal) -> Money {
    Money::new(amount)
}

// ============================================================================
// Ledger
// ============================================================================

mod ledger_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_charge_and_payment_balance() {
        let (_db, h) = harness().await;
        let account = h.open_account(TestAccountBuilder::new().build()).await;

        h.charge(account.id(), "ride-1", usd(dec!(25))).await.unwrap();
        h.charge(account.id(), "ride-2", usd(dec!(12.50))).await.unwrap();
        h.pay(account.id(), "pay-1", usd(dec!(10))).await.unwrap();

        assert_money_eq(h.balance(account.id()).await, usd(dec!(27.50)));

        let trial = h.engine.ledger().trial_balance(&h.ctx).await.unwrap();
        assert_trial_balance_balanced(&trial);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_duplicate_charge_is_rejected_by_unique_index() {
        let (db, h) = harness().await;
        let account = h.open_account(TestAccountBuilder::new().build()).await;

        h.charge(account.id(), "ride-1", usd(dec!(25))).await.unwrap();
        let result = h.charge(account.id(), "ride-1", usd(dec!(25))).await;

        assert!(matches!(result, Err(BillingError::DuplicateTransaction { .. })));
        assert_eq!(db.count_rows("ledger_entries").await.unwrap(), 2);
        assert_eq!(db.count_rows("outbox_events").await.unwrap(), 1);
        assert_money_eq(h.balance(account.id()).await, usd(dec!(25)));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_store_rejects_posting_to_inactive_account() {
        let (db, h) = harness().await;
        let account = h.open_account(TestAccountBuilder::new().build()).await;
        h.engine.accounts().deactivate(&h.ctx, account.id()).await.unwrap();
        let charge = LedgerTransaction::ride_charge(
            h.ctx.tenant_id(),
            account.id(),
            "ride-1",
            usd(dec!(25)),
            h.clock.now(),
            "alice",
            None,
        )
        .unwrap();

        let result = LedgerPort::append_transaction(h.store.as_ref(), &h.ctx, &charge).await;

        assert!(matches!(result, Err(PortError::Inactive { .. })));
        assert_eq!(db.count_rows("ledger_entries").await.unwrap(), 0);
        assert_eq!(db.count_rows("outbox_events").await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_numeric_overflow_is_not_retryable() {
        let (db, _h) = harness().await;

        let overflow = sqlx::query("SELECT CAST(1e16 AS NUMERIC(19, 4))")
            .execute(db.pool())
            .await
            .unwrap_err();

        let error: BillingError = PortError::from(DatabaseError::from(overflow)).into();
        assert!(error.is_validation());
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_statement_reads_back_entries() {
        let (_db, h) = harness().await;
        let account = h.open_account(TestAccountBuilder::new().build()).await;

        h.at(TemporalFixtures::march(2));
        h.charge(account.id(), "ride-1", usd(dec!(25))).await.unwrap();
        h.at(TemporalFixtures::march(3));
        h.pay(account.id(), "pay-1", usd(dec!(25))).await.unwrap();

        let statement = h
            .engine
            .ledger()
            .get_statement(
                &h.ctx,
                account.id(),
                TemporalFixtures::march(1),
                TemporalFixtures::march(31),
                PageRequest::default(),
            )
            .await
            .unwrap();

        assert_money_eq(statement.opening_balance, Money::zero());
        assert_money_eq(statement.closing_balance, Money::zero());
        assert_eq!(statement.transactions.items.len(), 2);
        assert!(statement
            .transactions
            .items
            .iter()
            .map(|line| line.source_type)
            .eq([SourceType::RideCharge, SourceType::Payment]));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_ledger_rows_cannot_be_updated_or_deleted() {
        let (db, h) = harness().await;
        let account = h.open_account(TestAccountBuilder::new().build()).await;
        h.charge(account.id(), "ride-1", usd(dec!(25))).await.unwrap();

        let update = sqlx::query("UPDATE ledger_entries SET description = 'edited'")
            .execute(db.pool())
            .await
            .unwrap_err();
        assert!(matches!(
            DatabaseError::from(update),
            DatabaseError::ImmutableRecord { ref table, .. } if table == "ledger_entries"
        ));

        let delete = sqlx::query("DELETE FROM ledger_entries")
            .execute(db.pool())
            .await
            .unwrap_err();
        assert!(matches!(DatabaseError::from(delete), DatabaseError::ImmutableRecord { .. }));
        assert_eq!(db.count_rows("ledger_entries").await.unwrap(), 2);
        assert_money_eq(h.balance(account.id()).await, usd(dec!(25)));

        // Row triggers do not fire on TRUNCATE, which test cleanup relies on
        db.clear_data().await.unwrap();
        assert_eq!(db.count_rows("ledger_entries").await.unwrap(), 0);
    }
}

// ============================================================================
// Invoices
// ============================================================================

mod invoice_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_generate_invoice_and_rerun() {
        let (db, h) = harness().await;
        let account = h.open_account(TestAccountBuilder::new().build()).await;

        for (day, ride) in [(2, "ride-1"), (4, "ride-2"), (6, "ride-3")] {
            h.at(TemporalFixtures::march(day));
            h.charge(account.id(), ride, usd(dec!(25))).await.unwrap();
        }
        h.at(TemporalFixtures::march(9));

        let invoice = h
            .engine
            .invoices()
            .generate_invoice(
                &h.ctx,
                account.id(),
                TemporalFixtures::first_week_of_march(),
                InvoiceOptions::default(),
            )
            .await
            .unwrap();

        assert_invoice_consistent(&invoice);
        assert_eq!(invoice.invoice_number().as_str(), "INV-202403-000001");
        assert_money_eq(invoice.subtotal(), usd(dec!(75)));
        assert_eq!(db.count_rows("invoice_line_items").await.unwrap(), 3);

        let rerun = h
            .engine
            .invoices()
            .generate_invoice(
                &h.ctx,
                account.id(),
                TemporalFixtures::first_week_of_march(),
                InvoiceOptions::default(),
            )
            .await;
        assert!(matches!(rerun, Err(BillingError::NoUnbilledCharges { .. })));

        let fetched = h
            .engine
            .invoices()
            .get_invoice_by_number(&h.ctx, "INV-202403-000001")
            .await
            .unwrap();
        assert_eq!(fetched.id(), invoice.id());
        assert_eq!(fetched.line_items().len(), 3);
        assert_money_eq(fetched.outstanding_balance(), invoice.outstanding_balance());
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_invoice_numbers_are_sequential_per_tenant() {
        let (_db, h) = harness().await;
        let first = h.open_account(TestAccountBuilder::new().with_name("First").build()).await;
        let second = h.open_account(TestAccountBuilder::new().with_name("Second").build()).await;

        h.at(TemporalFixtures::march(2));
        h.charge(first.id(), "ride-1", usd(dec!(10))).await.unwrap();
        h.charge(second.id(), "ride-2", usd(dec!(20))).await.unwrap();
        h.at(TemporalFixtures::march(9));

        let mut numbers = Vec::new();
        for account in [&first, &second] {
            let invoice = h
                .engine
                .invoices()
                .generate_invoice(
                    &h.ctx,
                    account.id(),
                    TemporalFixtures::first_week_of_march(),
                    InvoiceOptions::default(),
                )
                .await
                .unwrap();
            numbers.push(invoice.invoice_number().sequence());
        }

        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_scheduled_sweep_over_postgres() {
        let (_db, h) = harness().await;
        let weekly = h
            .open_account(
                TestAccountBuilder::new()
                    .with_name("Weekly")
                    .with_frequency(InvoiceFrequency::Weekly)
                    .build(),
            )
            .await;
        h.open_account(
            TestAccountBuilder::new()
                .with_name("Idle")
                .with_frequency(InvoiceFrequency::Weekly)
                .build(),
        )
        .await;

        h.at(TemporalFixtures::march(10));
        h.charge(weekly.id(), "ride-1", usd(dec!(25))).await.unwrap();

        let run = h
            .engine
            .invoices()
            .generate_scheduled_invoices(&h.ctx, InvoiceFrequency::Weekly, TemporalFixtures::march(15))
            .await
            .unwrap();

        assert_eq!(run.generated_count(), 1);
        assert_eq!(run.skipped_count(), 1);
        assert_eq!(run.failed_count(), 0);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_per_ride_account_invoices_each_charge() {
        let (_db, h) = harness().await;
        let account = h
            .open_account(
                TestAccountBuilder::new()
                    .with_frequency(InvoiceFrequency::PerRide)
                    .build(),
            )
            .await;

        let recorded = h.charge(account.id(), "ride-1", usd(dec!(18))).await.unwrap();

        let invoice = recorded.invoice().expect("per-ride invoice missing");
        assert_eq!(invoice.line_items().len(), 1);
        assert_money_eq(invoice.outstanding_balance(), usd(dec!(18)));
    }
}

// ============================================================================
// Tenancy and outbox
// ============================================================================

mod tenancy_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_other_tenant_sees_nothing() {
        let (_db, h) = harness().await;
        let account = h.open_account(TestAccountBuilder::new().build()).await;
        h.charge(account.id(), "ride-1", usd(dec!(25))).await.unwrap();

        let other = IdFixtures::context_for(IdFixtures::other_tenant(), "intruder");

        assert_error_kind(
            h.engine.ledger().get_balance(&other, account.id()).await,
            domain_billing::ErrorKind::NotFound,
        );
        let accounts = h
            .engine
            .accounts()
            .list_accounts(&other, PageRequest::default())
            .await
            .unwrap();
        assert!(accounts.items.is_empty());
        assert!(h.engine.pending_events(&other, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_outbox_dispatch_cycle() {
        let (_db, h) = harness().await;
        let account = h.open_account(TestAccountBuilder::new().build()).await;
        h.at(TemporalFixtures::march(2));
        h.charge(account.id(), "ride-1", usd(dec!(25))).await.unwrap();
        h.at(TemporalFixtures::march(9));
        h.engine
            .invoices()
            .generate_invoice(
                &h.ctx,
                account.id(),
                TemporalFixtures::first_week_of_march(),
                InvoiceOptions::default(),
            )
            .await
            .unwrap();

        let pending = h.engine.pending_events(&h.ctx, 10).await.unwrap();
        let types: Vec<_> = pending.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![BillingEventType::LedgerEntryCreated, BillingEventType::InvoiceGenerated]
        );

        h.engine.mark_event_dispatched(&h.ctx, pending[0].id).await.unwrap();
        h.engine.mark_event_dispatched(&h.ctx, pending[0].id).await.unwrap();

        let remaining = h.engine.pending_events(&h.ctx, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event_type, BillingEventType::InvoiceGenerated);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_health_check_reports_healthy() {
        let (_db, h) = harness().await;

        let health = h.store.health_check().await;

        assert_eq!(health.status, AdapterHealth::Healthy);
        assert_eq!(health.adapter_id, "postgres-billing-store");
    }
}
