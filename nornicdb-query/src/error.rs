//! Error and result types for the query crate.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// A lex/parse failure, carrying the lexer/parser's own diagnostic.
    Parse(String),
    /// A query was structurally valid but refers to something that cannot
    /// be resolved (e.g. an undefined variable reused in a later clause).
    Semantic(String),
    /// An expression evaluated against operand types it doesn't support.
    TypeMismatch(String),
    /// Wraps a `nornicdb-storage` error surfaced while executing a write.
    Storage(String),
    /// A query exceeded its time budget.
    Timeout,
    /// A query was cancelled via its `CancellationToken`.
    Cancelled,
    /// A registered procedure/function plugin hook returned an error.
    Plugin { name: String, message: String },
    /// An invariant was violated internally, not caused by the input query.
    /// Currently raised only if an `AggregationMarker` escapes the result
    /// materializer unresolved.
    Internal(String),
    NotImplemented(&'static str),
    Other(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::Semantic(msg) => write!(f, "semantic error: {msg}"),
            Error::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            Error::Storage(msg) => write!(f, "storage error: {msg}"),
            Error::Timeout => write!(f, "query exceeded its time budget"),
            Error::Cancelled => write!(f, "query was cancelled"),
            Error::Plugin { name, message } => write!(f, "plugin '{name}' error: {message}"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
            Error::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nornicdb_storage::Error> for Error {
    fn from(err: nornicdb_storage::Error) -> Self {
        match err {
            nornicdb_storage::Error::Io(e) => Error::Io(e),
            other => Error::Storage(other.to_string()),
        }
    }
}
