//! Account repository implementation
//!
//! Every statement filters on `tenant_id`; an account is invisible outside
//! its tenant.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use domain_billing::{
    Account, AccountRecord, AccountStatus as DomainStatus, AccountType as DomainType,
    InvoiceFrequency as DomainFrequency,
};

use crate::error::DatabaseError;

/// Name of the per-tenant unique account name constraint
pub const ACCOUNT_NAME_CONSTRAINT: &str = "uq_accounts_tenant_name";

/// Repository for billable accounts
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new account
    ///
    /// # Errors
    ///
    /// Returns `DuplicateEntry` on `uq_accounts_tenant_name` when the tenant
    /// already has an account with the same name.
    pub async fn insert(&self, row: &AccountRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                account_id, tenant_id, name, account_type, status, invoice_frequency,
                created_at, created_by, modified_at, modified_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(row.account_id)
        .bind(row.tenant_id)
        .bind(&row.name)
        .bind(row.account_type)
        .bind(row.status)
        .bind(row.invoice_frequency)
        .bind(row.created_at)
        .bind(&row.created_by)
        .bind(row.modified_at)
        .bind(&row.modified_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persists the mutable fields of an account
    pub async fn update(&self, row: &AccountRow) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = $3, status = $4, invoice_frequency = $5,
                modified_at = $6, modified_by = $7
            WHERE tenant_id = $1 AND account_id = $2
            "#,
        )
        .bind(row.tenant_id)
        .bind(row.account_id)
        .bind(&row.name)
        .bind(row.status)
        .bind(row.invoice_frequency)
        .bind(row.modified_at)
        .bind(&row.modified_by)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("Account", row.account_id));
        }
        Ok(())
    }

    pub async fn find(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<AccountRow>, DatabaseError> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "{} WHERE tenant_id = $1 AND account_id = $2",
            SELECT_ACCOUNT
        ))
        .bind(tenant_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// One page of the tenant's accounts ordered by name, with the total count
    pub async fn list(
        &self,
        tenant_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<AccountRow>, i64), DatabaseError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "{} WHERE tenant_id = $1 ORDER BY name, account_id LIMIT $2 OFFSET $3",
            SELECT_ACCOUNT
        ))
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows, total))
    }

    /// All accounts of the tenant on the given schedule, active or not
    pub async fn with_frequency(
        &self,
        tenant_id: Uuid,
        frequency: InvoiceFrequency,
    ) -> Result<Vec<AccountRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "{} WHERE tenant_id = $1 AND invoice_frequency = $2 ORDER BY account_id",
            SELECT_ACCOUNT
        ))
        .bind(tenant_id)
        .bind(frequency)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

const SELECT_ACCOUNT: &str = r#"
    SELECT account_id, tenant_id, name, account_type, status, invoice_frequency,
           created_at, created_by, modified_at, modified_by
    FROM accounts"#;

/// Account type as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "account_type", rename_all = "snake_case")]
pub enum AccountType {
    Organization,
    Individual,
}

/// Account status as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
}

/// Invoice schedule as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "invoice_frequency", rename_all = "snake_case")]
pub enum InvoiceFrequency {
    PerRide,
    Daily,
    Weekly,
    Monthly,
}

impl From<DomainFrequency> for InvoiceFrequency {
    fn from(value: DomainFrequency) -> Self {
        match value {
            DomainFrequency::PerRide => InvoiceFrequency::PerRide,
            DomainFrequency::Daily => InvoiceFrequency::Daily,
            DomainFrequency::Weekly => InvoiceFrequency::Weekly,
            DomainFrequency::Monthly => InvoiceFrequency::Monthly,
        }
    }
}

impl From<InvoiceFrequency> for DomainFrequency {
    fn from(value: InvoiceFrequency) -> Self {
        match value {
            InvoiceFrequency::PerRide => DomainFrequency::PerRide,
            InvoiceFrequency::Daily => DomainFrequency::Daily,
            InvoiceFrequency::Weekly => DomainFrequency::Weekly,
            InvoiceFrequency::Monthly => DomainFrequency::Monthly,
        }
    }
}

/// Database row for an account
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub account_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub invoice_frequency: InvoiceFrequency,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub modified_at: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
}

impl From<&Account> for AccountRow {
    fn from(account: &Account) -> Self {
        use core_kernel::TenantScoped;

        Self {
            account_id: account.id().into(),
            tenant_id: account.tenant_id().into(),
            name: account.name().to_string(),
            account_type: match account.account_type() {
                DomainType::Organization => AccountType::Organization,
                DomainType::Individual => AccountType::Individual,
            },
            status: match account.status() {
                DomainStatus::Active => AccountStatus::Active,
                DomainStatus::Inactive => AccountStatus::Inactive,
            },
            invoice_frequency: account.invoice_frequency().into(),
            created_at: account.created_at(),
            created_by: account.created_by().to_string(),
            modified_at: account.modified_at(),
            modified_by: account.modified_by().map(str::to_string),
        }
    }
}

impl TryFrom<AccountRow> for Account {
    type Error = DatabaseError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Account::from_record(AccountRecord {
            id: row.account_id.into(),
            tenant_id: row.tenant_id.into(),
            name: row.name,
            account_type: match row.account_type {
                AccountType::Organization => DomainType::Organization,
                AccountType::Individual => DomainType::Individual,
            },
            status: match row.status {
                AccountStatus::Active => DomainStatus::Active,
                AccountStatus::Inactive => DomainStatus::Inactive,
            },
            invoice_frequency: row.invoice_frequency.into(),
            created_at: row.created_at,
            created_by: row.created_by,
            modified_at: row.modified_at,
            modified_by: row.modified_by,
        })
        .map_err(DatabaseError::corrupt)
    }
}
