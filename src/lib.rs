//! A client for ScyllaDB's Alternator (DynamoDB-compatible) API.
//!
//! Requests are signed with SigV4, sent over a pluggable [`Transport`] and retried with
//! exponential backoff. Items are plain `serde_json` objects which are marshaled to and from
//! DynamoDB's typed attribute encoding on the way in and out.

#[macro_use]
extern crate async_trait;
extern crate simple_error;

use simple_error::SimpleError;
use tracing::Span;

pub mod batch;
pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod crud;
pub mod dyntransport;
pub mod memorystore;
pub mod query;
pub mod schema;
pub mod sigv4;
pub mod tables;
pub mod transaction;
pub mod transport;
pub mod wire;

#[cfg(test)]
mod backendtest;
#[cfg(test)]
mod testutil;

pub use batch::{BatchWriteOutcome, MAX_BATCH_SIZE};
pub use client::{Client, ErrorRecord};
pub use config::ClientConfig;
pub use crud::{PutOutcome, WriteOptions};
pub use dyntransport::DynTransport;
pub use query::QueryOptions;
pub use schema::{KeyAttributeType, SchemaRegistry, TableConfig};
pub use transaction::{
    RollbackAction, TransactGetOperation, TransactGetOutcome, TransactGetResult, TransactOperation, TransactResult, TransactWriteOptions, TransactWriteOutcome,
};
pub use transport::{HttpTransport, Transport, WireRequest, WireResponse};

/// A native item: attribute names mapped to plain JSON values.
pub type Item = serde_json::Map<String, serde_json::Value>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller supplied something malformed. Never retried and never sent over the wire.
    #[error("{0}")]
    Validation(#[from] SimpleError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no schema registered for table {0:?}")]
    UnknownTable(String),

    /// The store answered with a non-200 status.
    #[error("{target} failed with status {status}: {}", describe(.error_type, .message))]
    Remote {
        target: String,
        status: u16,
        error_type: Option<String>,
        message: Option<String>,
    },

    /// A transient failure persisted through every permitted attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<Error> },

    /// A batch get still had keys unprocessed after its final round.
    #[error("{count} keys of table {table:?} were left unprocessed")]
    Unprocessed { table: String, count: usize },

    #[error("network error: {0}")]
    Network(Box<dyn std::error::Error + Send + Sync>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation `index` of a transactional write failed. `rolled_back` tells whether the captured
    /// snapshots were replayed.
    #[error("transaction operation {index} failed (rolled back: {rolled_back}): {source}")]
    Transaction { index: usize, rolled_back: bool, source: Box<Error> },

    /// Operation `index` failed and restoring the snapshots failed as well.
    #[error("transaction operation {index} failed ({original}) and rollback failed: {rollback}")]
    Rollback { index: usize, original: Box<Error>, rollback: Box<Error> },
}

fn describe(error_type: &Option<String>, message: &Option<String>) -> String {
    match (error_type, message) {
        (Some(t), Some(m)) => format!("{}: {}", t, m),
        (Some(t), None) => t.clone(),
        (None, Some(m)) => m.clone(),
        (None, None) => "no error details".to_string(),
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(Box::new(e))
    }
}

impl Error {
    pub(crate) fn validation(msg: impl AsRef<str>) -> Self {
        Self::Validation(SimpleError::new(msg.as_ref()))
    }

    /// The HTTP status of the remote failure behind this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            Self::RetriesExhausted { last, .. } => last.status(),
            Self::Transaction { source, .. } => source.status(),
            Self::Rollback { original, .. } => original.status(),
            _ => None,
        }
    }

    /// The raw `__type` reported by the store, e.g.
    /// `com.amazonaws.dynamodb.v20120810#ResourceNotFoundException`.
    pub fn error_type(&self) -> Option<&str> {
        match self {
            Self::Remote { error_type, .. } => error_type.as_deref(),
            Self::RetriesExhausted { last, .. } => last.error_type(),
            Self::Transaction { source, .. } => source.error_type(),
            Self::Rollback { original, .. } => original.error_type(),
            _ => None,
        }
    }

    /// The error type without its namespace, e.g. `ResourceNotFoundException`.
    pub fn error_code(&self) -> Option<&str> {
        self.error_type().map(|t| t.rsplit('#').next().unwrap_or(t))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Remote { message, .. } => message.as_deref(),
            Self::RetriesExhausted { last, .. } => last.message(),
            Self::Transaction { source, .. } => source.message(),
            Self::Rollback { original, .. } => original.message(),
            _ => None,
        }
    }

    /// Throttling, server-side errors and network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote { status, error_type, .. } => {
                *status >= 500
                    || (*status == 400
                        && error_type
                            .as_deref()
                            .map_or(false, |t| t.contains("ProvisionedThroughputExceeded") || t.contains("ThrottlingException")))
            }
            Self::Network(_) => true,
            _ => false,
        }
    }
}

pub(crate) trait ResultExt<T> {
    /// Marks the current span as failed. The span must declare `otel.status_code` and
    /// `error.msg` for the recording to stick.
    fn spanify_err(self) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn spanify_err(self) -> Result<T> {
        self.map_err(|e| {
            let e = e.into();
            let span = Span::current();
            span.record("otel.status_code", "ERROR");
            span.record("error.msg", tracing::field::display(&e));
            e
        })
    }
}
