use ordercore::StoreError;
use tracing::{error, warn};

/// `unique_violation`
pub const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATEs after which the same statement may succeed if run again.
const TRANSIENT_SQLSTATES: [&str; 8] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "53300", // too_many_connections
    "08000", // connection_exception
    "08003", // connection_does_not_exist
    "08006", // connection_failure
    "08001", // sqlclient_unable_to_establish_sqlconnection
    "08004", // sqlserver_rejected_establishment_of_sqlconnection
];

/// Whether a SQLSTATE denotes a transient failure.
pub fn is_transient_sqlstate(code: &str) -> bool {
    TRANSIENT_SQLSTATES.contains(&code)
}

/// Translates a driver error into the storage taxonomy.
///
/// Unique violations become `AlreadyExists`, transient SQLSTATEs and
/// connection-level failures become `Unavailable`, decode failures become
/// `Serialization` and everything else is `Internal`.
pub fn map_sqlx_error(error: sqlx::Error, operation: &'static str) -> StoreError {
    match &error {
        sqlx::Error::Database(db_error) => {
            let code = db_error.code();
            match code.as_deref() {
                Some(UNIQUE_VIOLATION) => {
                    warn!(
                        error = %db_error,
                        operation,
                        "[postgres.unique_violation] row already exists"
                    );
                    StoreError::AlreadyExists(format!("{operation}: {}", db_error.message()))
                }
                Some(code) if is_transient_sqlstate(code) => {
                    warn!(
                        error = %db_error,
                        sqlstate = code,
                        operation,
                        "[postgres.transient] transient database failure"
                    );
                    StoreError::Unavailable(format!("{operation}: {db_error}"))
                }
                _ => {
                    error!(
                        error = %db_error,
                        operation,
                        "[postgres.database_error] database operation failed"
                    );
                    StoreError::Internal(format!("{operation}: {db_error}"))
                }
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => {
            warn!(error = %error, operation, "[postgres.connection] connection failure");
            StoreError::Unavailable(format!("{operation}: {error}"))
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => {
            StoreError::Serialization(format!("{operation}: {error}"))
        }
        _ => {
            error!(error = %error, operation, "[postgres.error] unexpected driver error");
            StoreError::Internal(format!("{operation}: {error}"))
        }
    }
}

/// A stored value that does not fit the domain types.
pub fn corrupt(operation: &'static str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(format!("{operation}: {detail}"))
}
