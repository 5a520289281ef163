use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate primary key: {0}")]
    DuplicateId(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("identifier counter adjustment failed: {0}")]
    CounterAdjustment(String),

    #[error("transaction already closed")]
    TransactionClosed,
}

impl StoreError {
    /// Whether this error is a primary-key collision on insert
    pub fn is_identifier_collision(&self) -> bool {
        match self {
            StoreError::DuplicateId(_) => true,
            StoreError::DatabaseError(message) => is_primary_key_violation(message),
            _ => false,
        }
    }
}

/// Classify a raw storage error message as a primary-key uniqueness violation.
///
/// Recognises SQLite (`UNIQUE constraint failed: table.id`, extended code 1555)
/// and PostgreSQL (`duplicate key value violates unique constraint "table_pkey"`)
/// wording. Unique violations on other columns are not collisions.
pub fn is_primary_key_violation(message: &str) -> bool {
    let message = message.to_ascii_lowercase();

    if message.contains("primary key") || message.contains("(code: 1555)") {
        return true;
    }

    if message.contains("duplicate key") && message.contains("_pkey") {
        return true;
    }

    if let Some(columns) = message.split("unique constraint failed:").nth(1) {
        return columns
            .split(',')
            .map(str::trim)
            .any(|column| column.ends_with(".id"));
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_primary_key_message() {
        assert!(is_primary_key_violation(
            "error returned from database: UNIQUE constraint failed: job_executions.id"
        ));
        assert!(is_primary_key_violation(
            "error returned from database: (code: 1555) UNIQUE constraint failed: subscriptions.id"
        ));
    }

    #[test]
    fn test_postgres_primary_key_message() {
        assert!(is_primary_key_violation(
            r#"duplicate key value violates unique constraint "job_executions_pkey""#
        ));
    }

    #[test]
    fn test_other_unique_violations_are_not_collisions() {
        assert!(!is_primary_key_violation(
            "UNIQUE constraint failed: subscriptions.external_subscription_id"
        ));
        assert!(!is_primary_key_violation(
            r#"duplicate key value violates unique constraint "uq_subscriptions_external""#
        ));
        assert!(!is_primary_key_violation("database is locked"));
    }

    #[test]
    fn test_error_classification() {
        assert!(StoreError::DuplicateId("5".into()).is_identifier_collision());
        assert!(
            StoreError::DatabaseError("UNIQUE constraint failed: subscriptions.id".into())
                .is_identifier_collision()
        );
        assert!(!StoreError::ConnectionError("refused".into()).is_identifier_collision());
    }
}
