//! Ledger repository implementation
//!
//! Database access for the write-once ledger. Entries are only ever
//! inserted; balances, statements and trial balances are aggregates over the
//! stored rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use core_kernel::{Money, TenantScoped};
use domain_billing::{
    LedgerAccount as DomainLedgerAccount, LedgerEntry, LedgerEntryParts,
    SourceType as DomainSourceType,
};

use crate::error::DatabaseError;
use crate::repositories::account::AccountStatus;

/// Name of the unique constraint that enforces transaction idempotency
pub const SOURCE_KEY_CONSTRAINT: &str = "uq_ledger_entries_source";

/// Repository for ledger entries
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts one entry on an open transaction
    pub async fn insert_entry(
        conn: &mut PgConnection,
        row: &LedgerEntryRow,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                entry_id, tenant_id, account_id, ledger_account, debit_amount, credit_amount,
                source_type, source_reference_id, description, created_at, created_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(row.entry_id)
        .bind(row.tenant_id)
        .bind(row.account_id)
        .bind(row.ledger_account)
        .bind(row.debit_amount)
        .bind(row.credit_amount)
        .bind(row.source_type)
        .bind(&row.source_reference_id)
        .bind(&row.description)
        .bind(row.created_at)
        .bind(&row.created_by)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Locks the account row for the transaction and rejects inactive accounts
    ///
    /// FOR SHARE holds off a concurrent deactivation until the append commits,
    /// so the status read here stays true for the whole transaction.
    pub async fn lock_account(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), DatabaseError> {
        let status = sqlx::query_scalar::<_, AccountStatus>(
            "SELECT status FROM accounts WHERE tenant_id = $1 AND account_id = $2 FOR SHARE",
        )
        .bind(tenant_id)
        .bind(account_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Account", account_id))?;

        match status {
            AccountStatus::Active => Ok(()),
            AccountStatus::Inactive => Err(DatabaseError::Inactive {
                entity: "Account",
                id: account_id.to_string(),
            }),
        }
    }

    pub async fn source_exists(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        source_type: SourceType,
        source_reference_id: &str,
    ) -> Result<bool, DatabaseError> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM ledger_entries
                WHERE tenant_id = $1 AND account_id = $2
                  AND source_type = $3 AND source_reference_id = $4
            )
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .bind(source_type)
        .bind(source_reference_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Σ AR debits − Σ AR credits, optionally only for entries before `before`
    pub async fn receivable_balance(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        before: Option<DateTime<Utc>>,
    ) -> Result<Decimal, DatabaseError> {
        let balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(debit_amount - credit_amount), 0)
            FROM ledger_entries
            WHERE tenant_id = $1 AND account_id = $2
              AND ledger_account = 'accounts_receivable'
              AND ($3::timestamptz IS NULL OR created_at < $3)
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .bind(before)
        .fetch_one(&self.pool)
        .await?;
        Ok(balance)
    }

    /// AR entries with `start <= created_at <= end`, oldest first
    pub async fn receivable_entries(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntryRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            r#"{}
            WHERE tenant_id = $1 AND account_id = $2
              AND ledger_account = 'accounts_receivable'
              AND created_at >= $3 AND created_at <= $4
            ORDER BY created_at, entry_id"#,
            SELECT_ENTRY
        ))
        .bind(tenant_id)
        .bind(account_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ride charge AR debits in `[start, end)` that no invoice line references
    pub async fn unbilled_charges(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntryRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            r#"{}
            WHERE tenant_id = $1 AND account_id = $2
              AND source_type = 'ride_charge'
              AND ledger_account = 'accounts_receivable'
              AND debit_amount > 0
              AND created_at >= $3 AND created_at < $4
              AND NOT EXISTS (
                  SELECT 1 FROM invoice_line_items li
                  WHERE li.tenant_id = ledger_entries.tenant_id
                    AND li.ledger_entry_id = ledger_entries.entry_id
              )
            ORDER BY created_at, entry_id"#,
            SELECT_ENTRY
        ))
        .bind(tenant_id)
        .bind(account_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Payment AR credits in `[start, end)`
    pub async fn payments_in_period(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntryRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            r#"{}
            WHERE tenant_id = $1 AND account_id = $2
              AND source_type = 'payment'
              AND ledger_account = 'accounts_receivable'
              AND credit_amount > 0
              AND created_at >= $3 AND created_at < $4
            ORDER BY created_at, entry_id"#,
            SELECT_ENTRY
        ))
        .bind(tenant_id)
        .bind(account_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Debit and credit totals per ledger account for the tenant
    pub async fn totals(&self, tenant_id: Uuid) -> Result<Vec<LedgerTotalsRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, LedgerTotalsRow>(
            r#"
            SELECT ledger_account,
                   COALESCE(SUM(debit_amount), 0) AS debits,
                   COALESCE(SUM(credit_amount), 0) AS credits
            FROM ledger_entries
            WHERE tenant_id = $1
            GROUP BY ledger_account
            ORDER BY ledger_account
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Entry IDs among `entry_ids` that belong to the account, locked for the transaction
    pub async fn lock_account_entries(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        account_id: Uuid,
        entry_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT entry_id FROM ledger_entries
            WHERE tenant_id = $1 AND account_id = $2 AND entry_id = ANY($3)
            FOR SHARE
            "#,
        )
        .bind(tenant_id)
        .bind(account_id)
        .bind(entry_ids)
        .fetch_all(conn)
        .await?;
        Ok(ids)
    }
}

const SELECT_ENTRY: &str = r#"
    SELECT entry_id, tenant_id, account_id, ledger_account, debit_amount, credit_amount,
           source_type, source_reference_id, description, created_at, created_by
    FROM ledger_entries"#;

/// Ledger account as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "ledger_account", rename_all = "snake_case")]
pub enum LedgerAccount {
    AccountsReceivable,
    ServiceRevenue,
    Cash,
}

/// Source type as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "source_type", rename_all = "snake_case")]
pub enum SourceType {
    RideCharge,
    Payment,
}

impl From<DomainLedgerAccount> for LedgerAccount {
    fn from(value: DomainLedgerAccount) -> Self {
        match value {
            DomainLedgerAccount::AccountsReceivable => LedgerAccount::AccountsReceivable,
            DomainLedgerAccount::ServiceRevenue => LedgerAccount::ServiceRevenue,
            DomainLedgerAccount::Cash => LedgerAccount::Cash,
        }
    }
}

impl From<LedgerAccount> for DomainLedgerAccount {
    fn from(value: LedgerAccount) -> Self {
        match value {
            LedgerAccount::AccountsReceivable => DomainLedgerAccount::AccountsReceivable,
            LedgerAccount::ServiceRevenue => DomainLedgerAccount::ServiceRevenue,
            LedgerAccount::Cash => DomainLedgerAccount::Cash,
        }
    }
}

impl From<DomainSourceType> for SourceType {
    fn from(value: DomainSourceType) -> Self {
        match value {
            DomainSourceType::RideCharge => SourceType::RideCharge,
            DomainSourceType::Payment => SourceType::Payment,
        }
    }
}

impl From<SourceType> for DomainSourceType {
    fn from(value: SourceType) -> Self {
        match value {
            SourceType::RideCharge => DomainSourceType::RideCharge,
            SourceType::Payment => DomainSourceType::Payment,
        }
    }
}

/// Database row for a ledger entry
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntryRow {
    pub entry_id: Uuid,
    pub tenant_id: Uuid,
    pub account_id: Uuid,
    pub ledger_account: LedgerAccount,
    pub debit_amount: Decimal,
    pub credit_amount: Decimal,
    pub source_type: SourceType,
    pub source_reference_id: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl From<&LedgerEntry> for LedgerEntryRow {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            entry_id: entry.id().into(),
            tenant_id: entry.tenant_id().into(),
            account_id: entry.account_id().into(),
            ledger_account: entry.ledger_account().into(),
            debit_amount: entry.debit_amount().amount(),
            credit_amount: entry.credit_amount().amount(),
            source_type: entry.source_type().into(),
            source_reference_id: entry.source_reference_id().to_string(),
            description: entry.description().map(str::to_string),
            created_at: entry.created_at(),
            created_by: entry.created_by().to_string(),
        }
    }
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = DatabaseError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        LedgerEntry::from_parts(LedgerEntryParts {
            id: row.entry_id.into(),
            tenant_id: row.tenant_id.into(),
            account_id: row.account_id.into(),
            ledger_account: row.ledger_account.into(),
            debit_amount: Money::new(row.debit_amount),
            credit_amount: Money::new(row.credit_amount),
            source_type: row.source_type.into(),
            source_reference_id: row.source_reference_id,
            created_at: row.created_at,
            created_by: row.created_by,
            description: row.description,
        })
        .map_err(DatabaseError::corrupt)
    }
}

/// Aggregated totals of one ledger account
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerTotalsRow {
    pub ledger_account: LedgerAccount,
    pub debits: Decimal,
    pub credits: Decimal,
}
