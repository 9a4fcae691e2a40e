//! Invoice repository implementation
//!
//! Invoices and their line items are inserted once and never modified.
//! Invoice numbers come from a per-tenant, per-month counter row that is
//! incremented inside the inserting transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use uuid::Uuid;

use core_kernel::{Money, TenantScoped};
use domain_billing::{Invoice, InvoiceLineItem, InvoiceNumber, InvoiceRecord};

use crate::error::DatabaseError;

/// Unique constraint preventing an entry from being billed twice
pub const BILLED_ENTRY_CONSTRAINT: &str = "uq_line_items_tenant_entry";

/// Unique constraint on invoice numbers within a tenant
pub const INVOICE_NUMBER_CONSTRAINT: &str = "uq_invoices_tenant_number";

/// Repository for invoices and their line items
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: PgPool,
}

impl InvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Allocates the next sequence value for `(tenant, yyyyMM)`
    ///
    /// The upsert takes a row lock, so concurrent allocations for the same
    /// month serialize until the holding transaction ends.
    pub async fn next_sequence(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        period_key: &str,
    ) -> Result<i32, DatabaseError> {
        let value = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO invoice_number_sequences (tenant_id, period_key, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (tenant_id, period_key)
            DO UPDATE SET last_value = invoice_number_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(tenant_id)
        .bind(period_key)
        .fetch_one(conn)
        .await?;
        Ok(value)
    }

    /// Entry IDs among `entry_ids` that already appear on an invoice line
    pub async fn billed_entries(
        conn: &mut PgConnection,
        tenant_id: Uuid,
        entry_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, DatabaseError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT ledger_entry_id FROM invoice_line_items
            WHERE tenant_id = $1 AND ledger_entry_id = ANY($2)
            "#,
        )
        .bind(tenant_id)
        .bind(entry_ids)
        .fetch_all(conn)
        .await?;
        Ok(ids)
    }

    pub async fn insert_invoice(
        conn: &mut PgConnection,
        row: &InvoiceRow,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO invoices (
                invoice_id, tenant_id, invoice_number, account_id,
                billing_period_start, billing_period_end, issue_date, due_date,
                subtotal, payments_applied, outstanding_balance, generated_at, generated_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(row.invoice_id)
        .bind(row.tenant_id)
        .bind(&row.invoice_number)
        .bind(row.account_id)
        .bind(row.billing_period_start)
        .bind(row.billing_period_end)
        .bind(row.issue_date)
        .bind(row.due_date)
        .bind(row.subtotal)
        .bind(row.payments_applied)
        .bind(row.outstanding_balance)
        .bind(row.generated_at)
        .bind(&row.generated_by)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn insert_line_item(
        conn: &mut PgConnection,
        row: &InvoiceLineItemRow,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO invoice_line_items (
                line_item_id, invoice_id, tenant_id, ledger_entry_id,
                source_reference_id, service_date, amount, description
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(row.line_item_id)
        .bind(row.invoice_id)
        .bind(row.tenant_id)
        .bind(row.ledger_entry_id)
        .bind(&row.source_reference_id)
        .bind(row.service_date)
        .bind(row.amount)
        .bind(&row.description)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceWithLines>, DatabaseError> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "{} WHERE tenant_id = $1 AND invoice_id = $2",
            SELECT_INVOICE
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(invoice) => Ok(self.with_lines(tenant_id, vec![invoice]).await?.pop()),
            None => Ok(None),
        }
    }

    pub async fn find_by_number(
        &self,
        tenant_id: Uuid,
        invoice_number: &str,
    ) -> Result<Option<InvoiceWithLines>, DatabaseError> {
        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "{} WHERE tenant_id = $1 AND invoice_number = $2",
            SELECT_INVOICE
        ))
        .bind(tenant_id)
        .bind(invoice_number)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(invoice) => Ok(self.with_lines(tenant_id, vec![invoice]).await?.pop()),
            None => Ok(None),
        }
    }

    /// One page of an account's invoices, newest first, with the total count
    pub async fn list_for_account(
        &self,
        tenant_id: Uuid,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<InvoiceWithLines>, i64), DatabaseError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM invoices WHERE tenant_id = $1 AND account_id = $2",
        )
        .bind(tenant_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"{} WHERE tenant_id = $1 AND account_id = $2
            ORDER BY generated_at DESC, invoice_number DESC
            LIMIT $3 OFFSET $4"#,
            SELECT_INVOICE
        ))
        .bind(tenant_id)
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((self.with_lines(tenant_id, rows).await?, total))
    }

    async fn with_lines(
        &self,
        tenant_id: Uuid,
        invoices: Vec<InvoiceRow>,
    ) -> Result<Vec<InvoiceWithLines>, DatabaseError> {
        let ids: Vec<Uuid> = invoices.iter().map(|i| i.invoice_id).collect();
        let lines = sqlx::query_as::<_, InvoiceLineItemRow>(
            r#"
            SELECT line_item_id, invoice_id, tenant_id, ledger_entry_id,
                   source_reference_id, service_date, amount, description
            FROM invoice_line_items
            WHERE tenant_id = $1 AND invoice_id = ANY($2)
            ORDER BY service_date, ledger_entry_id
            "#,
        )
        .bind(tenant_id)
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_invoice: HashMap<Uuid, Vec<InvoiceLineItemRow>> = HashMap::new();
        for line in lines {
            by_invoice.entry(line.invoice_id).or_default().push(line);
        }

        Ok(invoices
            .into_iter()
            .map(|invoice| {
                let lines = by_invoice.remove(&invoice.invoice_id).unwrap_or_default();
                InvoiceWithLines { invoice, lines }
            })
            .collect())
    }
}

const SELECT_INVOICE: &str = r#"
    SELECT invoice_id, tenant_id, invoice_number, account_id,
           billing_period_start, billing_period_end, issue_date, due_date,
           subtotal, payments_applied, outstanding_balance, generated_at, generated_by
    FROM invoices"#;

/// Database row for an invoice header
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceRow {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_number: String,
    pub account_id: Uuid,
    pub billing_period_start: NaiveDate,
    pub billing_period_end: NaiveDate,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub subtotal: Decimal,
    pub payments_applied: Decimal,
    pub outstanding_balance: Decimal,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
}

/// Database row for an invoice line item
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InvoiceLineItemRow {
    pub line_item_id: Uuid,
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub ledger_entry_id: Uuid,
    pub source_reference_id: String,
    pub service_date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
}

/// An invoice header together with its line items
#[derive(Debug, Clone)]
pub struct InvoiceWithLines {
    pub invoice: InvoiceRow,
    pub lines: Vec<InvoiceLineItemRow>,
}

impl From<&Invoice> for InvoiceRow {
    fn from(invoice: &Invoice) -> Self {
        Self {
            invoice_id: invoice.id().into(),
            tenant_id: invoice.tenant_id().into(),
            invoice_number: invoice.invoice_number().to_string(),
            account_id: invoice.account_id().into(),
            billing_period_start: invoice.billing_period_start(),
            billing_period_end: invoice.billing_period_end(),
            issue_date: invoice.issue_date(),
            due_date: invoice.due_date(),
            subtotal: invoice.subtotal().amount(),
            payments_applied: invoice.payments_applied().amount(),
            outstanding_balance: invoice.outstanding_balance().amount(),
            generated_at: invoice.generated_at(),
            generated_by: invoice.generated_by().to_string(),
        }
    }
}

impl From<&InvoiceLineItem> for InvoiceLineItemRow {
    fn from(line: &InvoiceLineItem) -> Self {
        Self {
            line_item_id: line.id().into(),
            invoice_id: line.invoice_id().into(),
            tenant_id: line.tenant_id().into(),
            ledger_entry_id: line.ledger_entry_id().into(),
            source_reference_id: line.source_reference_id().to_string(),
            service_date: line.service_date(),
            amount: line.amount().amount(),
            description: line.description().to_string(),
        }
    }
}

impl TryFrom<InvoiceWithLines> for Invoice {
    type Error = DatabaseError;

    fn try_from(stored: InvoiceWithLines) -> Result<Self, Self::Error> {
        let InvoiceWithLines { invoice, lines } = stored;

        let line_items = lines
            .into_iter()
            .map(|line| {
                InvoiceLineItem::from_parts(
                    line.line_item_id.into(),
                    line.invoice_id.into(),
                    line.tenant_id.into(),
                    line.ledger_entry_id.into(),
                    line.source_reference_id,
                    line.service_date,
                    Money::new(line.amount),
                    line.description,
                )
                .map_err(DatabaseError::corrupt)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let invoice_number: InvoiceNumber = invoice
            .invoice_number
            .parse()
            .map_err(DatabaseError::corrupt)?;

        Invoice::from_record(InvoiceRecord {
            id: invoice.invoice_id.into(),
            invoice_number,
            tenant_id: invoice.tenant_id.into(),
            account_id: invoice.account_id.into(),
            billing_period_start: invoice.billing_period_start,
            billing_period_end: invoice.billing_period_end,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            subtotal: Money::new(invoice.subtotal),
            payments_applied: Money::new(invoice.payments_applied),
            outstanding_balance: Money::new(invoice.outstanding_balance),
            line_items,
            generated_at: invoice.generated_at,
            generated_by: invoice.generated_by,
        })
        .map_err(DatabaseError::corrupt)
    }
}
