use std::time::Duration;

use thiserror::Error;

use crate::element::ElementType;
use crate::location::{Location, Placement};

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

/// Invalid arguments or an ill-typed pipeline. Raised before a run starts;
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("invalid argument for `{operator}`: {message}")]
    InvalidArgument { operator: String, message: String },

    #[error("`{operator}` does not accept {input}")]
    TypeMismatch {
        operator: String,
        input: ElementType,
    },

    #[error("unknown operator `{0}`")]
    UnknownOperator(String),

    #[error("{0}")]
    Pipeline(String),

    #[error("invalid pipeline definition: {0}")]
    Definition(String),
}

impl ConstructionError {
    pub fn invalid(operator: impl Into<String>, message: impl Into<String>) -> Self {
        ConstructionError::InvalidArgument {
            operator: operator.into(),
            message: message.into(),
        }
    }
}

/// Raised inside a running operator; fatal to its node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperatorError {
    #[error("execution error: {0}")]
    Exec(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    /// A warning raised while running in strict mode.
    #[error("warning treated as error: {0}")]
    Strict(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Transport or scheduling failure; fatal to the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SystemError {
    #[error("failed to spawn `{operator}`: {message}")]
    Spawn { operator: String, message: String },

    #[error("`{operator}` requires a {required} location but was placed on the {actual}")]
    Location {
        operator: String,
        required: Location,
        actual: Placement,
    },

    #[error("no server available for `{0}`")]
    NoServer(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("mailbox of `{0}` is closed")]
    MailboxClosed(String),

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("invalid executor state: {0}")]
    InvalidState(String),
}

/// Aggregate error for code that touches several layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Operator(#[from] OperatorError),

    #[error(transparent)]
    System(#[from] SystemError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("hashing error: {0}")]
    Hash(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
