use thiserror::Error;

/// Errors that can occur when reading or writing rows.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An exclusive row lock could not be acquired within the lock timeout.
    #[error("Timed out waiting for a row lock")]
    LockTimeout,

    /// A row with the same unique key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A foreign key would be left dangling.
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// A column check constraint was violated.
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// A row expected to exist inside the unit was not found.
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// A persisted value could not be decoded into its domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

// SQLSTATE codes surfaced as typed errors.
const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            let constraint = db_err.constraint().unwrap_or_default().to_string();
            match db_err.code().as_deref() {
                Some(LOCK_NOT_AVAILABLE) => return StorageError::LockTimeout,
                Some(UNIQUE_VIOLATION) => return StorageError::DuplicateKey(constraint),
                Some(FOREIGN_KEY_VIOLATION) => {
                    return StorageError::ForeignKeyViolation(constraint);
                }
                Some(CHECK_VIOLATION) => return StorageError::CheckViolation(constraint),
                _ => {}
            }
        }
        StorageError::Database(err)
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
