//! Crate-wide error taxonomy.
//!
//! Every public operation returns [`Result<T>`]. `CoreError` is the single
//! flat enum external callers match on; component-scoped errors (parse,
//! scan, quarantine transitions, ...) convert into it via `#[from]`, the
//! same layering used throughout this crate's subsystems.

use crate::model::ScanFinding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("bundle is missing the `---` header delimiter")]
    MissingDelimiter,
    #[error("header line is not a valid `key: value` pair: {0}")]
    MalformedHeader(String),
    #[error("missing required header key: {0}")]
    MissingRequired(&'static str),
    #[error("header field `{field}` exceeds {limit} characters")]
    FieldTooLong { field: &'static str, limit: usize },
    #[error("`{field}` is not a valid identifier: {value}")]
    InvalidIdentifier { field: &'static str, value: String },
    #[error("bundle is empty")]
    Empty,
}

#[derive(Error, Debug)]
pub enum QuarantineError {
    #[error("transition from {from:?} to {to:?} is not permitted")]
    InvalidTransition { from: crate::model::QuarantineStatus, to: crate::model::QuarantineStatus },
    #[error("caller lacks permission to perform this transition")]
    PermissionDenied,
    #[error("no quarantine record for {0}")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("source {0} is unreachable or failed authentication")]
    SourceUnavailable(String),
    #[error("fetch of item {item} from source {source} failed: {reason}")]
    FetchFailed { source: String, item: String, reason: String },
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("skill not found: {0}")]
    NotFound(String),
    #[error("skill is quarantined and not installable")]
    Quarantined,
    #[error("stored content hash does not match a fresh hash of the stored body")]
    IntegrityMismatch,
    #[error("installation denied by policy: {0}")]
    PolicyDenied(String),
}

/// Top-level error taxonomy, matching the contract enumerated in the
/// external interfaces and error-handling design sections of the
/// specification this crate implements.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("scan blocked installation/visibility: {findings:?}")]
    ScanBlocked { findings: Vec<ScanFinding> },

    #[error("integrity mismatch")]
    IntegrityMismatch,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("quarantined")]
    Quarantined,

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(#[from] QuarantineError),

    #[error("source unavailable: {0}")]
    SourceUnavailable(#[from] SyncError),

    #[error("overloaded, try again later")]
    Overloaded,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid codebase context: {0}")]
    InvalidContext(String),

    #[error("sync completed with partial failures")]
    PartialFailure,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("operating in degraded mode: {0}")]
    DegradedService(String),

    #[error("internal invariant violation [{correlation_id}]: {message}")]
    Internal { message: String, correlation_id: String },

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<InstallError> for CoreError {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::NotFound(id) => CoreError::NotFound(id),
            InstallError::Quarantined => CoreError::Quarantined,
            InstallError::IntegrityMismatch => CoreError::IntegrityMismatch,
            InstallError::PolicyDenied(reason) => CoreError::PolicyDenied(reason),
        }
    }
}

impl CoreError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), correlation_id: uuid::Uuid::new_v4().to_string() }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
