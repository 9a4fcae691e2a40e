//! Database error types
//!
//! Repositories return [`DatabaseError`]; the billing adapter converts it to
//! the domain-facing [`PortError`] at the port boundary.

use core_kernel::PortError;
use thiserror::Error;

/// Errors that can occur during database operations
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to establish a database connection
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Entity not found in database
    #[error("{entity} with id '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Unique constraint violation
    #[error("Duplicate entry: {message}")]
    DuplicateEntry {
        constraint: Option<String>,
        message: String,
    },

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// An immutability trigger refused an UPDATE or DELETE
    #[error("Immutable record in {table}: {message}")]
    ImmutableRecord { table: String, message: String },

    /// A value exceeded the precision of its NUMERIC column
    #[error("Numeric value out of range: {0}")]
    NumericOverflow(String),

    /// The row exists but its status forbids the write
    #[error("{entity} with id '{id}' is inactive")]
    Inactive { entity: &'static str, id: String },

    /// Migration error
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be turned back into a domain value
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Pool exhaustion - no available connections
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl DatabaseError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        DatabaseError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn corrupt(message: impl std::fmt::Display) -> Self {
        DatabaseError::CorruptRow(message.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound { .. })
    }

    /// True for a unique violation, optionally on a specific constraint
    pub fn is_duplicate_on(&self, name: &str) -> bool {
        matches!(
            self,
            DatabaseError::DuplicateEntry { constraint: Some(c), .. } if c == name
        )
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DatabaseError::DuplicateEntry { .. }
                | DatabaseError::ForeignKeyViolation(_)
                | DatabaseError::ConstraintViolation(_)
        )
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            DatabaseError::ConnectionFailed(_) | DatabaseError::PoolExhausted
        )
    }
}

/// Classifies SQLx errors by PostgreSQL error code
///
/// See <https://www.postgresql.org/docs/current/errcodes-appendix.html>
impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => DatabaseError::NotFound {
                entity: "record",
                id: String::new(),
            },
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::Io(e) => DatabaseError::ConnectionFailed(e.to_string()),
            sqlx::Error::Tls(e) => DatabaseError::ConnectionFailed(e.to_string()),
            sqlx::Error::PoolClosed => DatabaseError::ConnectionFailed("pool closed".to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                DatabaseError::CorruptRow(format!("column {}: {}", index, source))
            }
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                match db_err.code().as_deref() {
                    Some("23505") => DatabaseError::DuplicateEntry {
                        constraint: db_err.constraint().map(str::to_string),
                        message,
                    },
                    Some("23503") => DatabaseError::ForeignKeyViolation(message),
                    Some("23514") => DatabaseError::ConstraintViolation(message),
                    Some("22003") => DatabaseError::NumericOverflow(message),
                    Some("P0001") => DatabaseError::ImmutableRecord {
                        table: db_err.table().unwrap_or("record").to_string(),
                        message,
                    },
                    _ => DatabaseError::QueryFailed(message),
                }
            }
            other => DatabaseError::QueryFailed(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DatabaseError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        DatabaseError::MigrationFailed(error.to_string())
    }
}

impl From<DatabaseError> for PortError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::NotFound { entity, id } => PortError::not_found(entity, id),
            DatabaseError::DuplicateEntry { message, .. } => PortError::conflict(message),
            DatabaseError::ForeignKeyViolation(message) => PortError::not_found("reference", message),
            DatabaseError::ConstraintViolation(message) => PortError::validation(message),
            DatabaseError::NumericOverflow(message) => PortError::validation_field(message, "amount"),
            DatabaseError::Inactive { entity, id } => PortError::inactive(entity, id),
            DatabaseError::ImmutableRecord { table, message } => PortError::immutable(table, message),
            DatabaseError::ConnectionFailed(message) => PortError::connection(message),
            DatabaseError::PoolExhausted => PortError::Timeout {
                operation: "acquire database connection".to_string(),
                duration_ms: 0,
            },
            other => PortError::Internal {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}
