use thiserror::Error;

/// Error taxonomy for the adapter.
///
/// Every public operation either returns a value or raises one of these;
/// nothing is swallowed. `SessionWait` is deliberately distinct from
/// `Execution` so callers can apply their own retry/backoff policy to lock
/// acquisition without catching generic query failures.
#[derive(Debug, Error)]
pub enum MssqlAdapterError {
    #[error(transparent)]
    Tiberius(#[from] tiberius::error::Error),

    /// Caller violated a precondition (mixed placeholder styles, parameter
    /// count mismatch, multiple statements in one execute call, ...).
    /// Fatal, never retried.
    #[error("Coding error: {0}")]
    Coding(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// Engine rejected or failed a statement; the engine's last error text
    /// is attached.
    #[error("SQL execution error: {0}")]
    Execution(String),

    /// A structure (DDL) statement failed. Metadata caches for the affected
    /// tables are invalidated before this is raised.
    #[error("Structure change error: {0}")]
    Structure(String),

    /// Could not acquire a session lock within the timeout.
    #[error("Session lock wait error: {0}")]
    SessionWait(String),

    /// An unrecognized native column type was encountered; guessing a type
    /// risks silent data corruption, so this is fatal.
    #[error("Type mapping error: unknown native type {0}")]
    TypeMapping(String),

    #[error("Parameter conversion error: {0}")]
    Parameter(String),
}
