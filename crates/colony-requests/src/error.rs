//! Error types for request brokering.
//!
//! [`RequestError`] covers caller-side invariant violations: an unknown token,
//! a double registration, assigning an assigned request. They are surfaced
//! immediately and never retried. A resolver declining a request is not an
//! error; it is ordinary control flow inside the assignment loop.

use requestable::Token;
use thiserror::Error;

use crate::state::RequestState;

/// Invalid-argument and illegal-state conditions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("unknown request token {0}")]
    UnknownRequest(Token),

    #[error("unknown resolver token {0}")]
    UnknownResolver(Token),

    #[error("unknown provider token {0}")]
    UnknownProvider(Token),

    #[error("resolver {0} is already registered")]
    ResolverAlreadyRegistered(Token),

    #[error("provider {0} is already registered")]
    ProviderAlreadyRegistered(Token),

    #[error("resolver {0} is built in and cannot be removed")]
    BuiltInResolver(Token),

    #[error("resolver {resolver} priority {priority} falls in the reserved fallback band")]
    ReservedPriority { resolver: Token, priority: i32 },

    #[error("request {request} is already assigned to resolver {resolver}")]
    AlreadyAssigned { request: Token, resolver: Token },

    #[error("request {0} is not assigned to any resolver")]
    NotAssigned(Token),

    #[error("request {request} cannot be resolved while {pending} children are still open")]
    ChildrenPending { request: Token, pending: usize },

    #[error("request {request} is {actual}, expected {expected}")]
    IllegalState {
        request: Token,
        actual: RequestState,
        expected: &'static str,
    },

    #[error("linking {child} under {parent} would create a cycle")]
    CycleDetected { parent: Token, child: Token },

    #[error("request {child} already has parent {parent}")]
    ParentAlreadySet { child: Token, parent: Token },
}

/// Snapshot encoding and decoding errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("snapshot reconciliation failed: {0}")]
    Request(#[from] RequestError),

    #[error("invalid manager config: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("config parse failed: {0}")]
    Parse(String),
}

/// Result alias for request operations.
pub type Result<T> = std::result::Result<T, RequestError>;
