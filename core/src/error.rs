//! Error types for the Facility Registry client.
//!
//! # Design
//! `FredError` covers every failure a caller can see: model violations
//! (bad keys, unparseable dates, lifecycle misuse), query-builder misuse,
//! and transport failures. Transport failures live in their own enum so the
//! `Transport` trait can return them without depending on the model.
//!
//! `NotFound` and authentication failures get dedicated variants because
//! callers frequently branch on them. Every non-2xx variant carries the
//! request method, the full URL, the raw body and the parsed JSON error body
//! when the server sent one.

use std::fmt;

use thiserror::Error;

use crate::http::HttpMethod;

/// Errors returned by the registry, facilities and query builder.
#[derive(Debug, Error)]
pub enum FredError {
    /// A required field is missing or a value is unusable.
    #[error("validation failed for '{field}': {reason}")]
    Validation { field: String, reason: String },

    /// The key is not a valid property name or not a known facility field.
    #[error("invalid key '{key}'")]
    InvalidKey { key: String },

    /// A date property was assigned a string that is not a date.
    #[error("invalid date for '{key}': {value:?} ({reason})")]
    InvalidDate {
        key: String,
        value: String,
        reason: String,
    },

    #[error("facility {} has been deleted", .id.as_deref().unwrap_or("<unsaved>"))]
    EntityDeleted { id: Option<String> },

    #[error("facility has not been saved")]
    UnsavedEntity,

    /// Facilities built from a `select` query only hold some fields.
    #[error("facility was loaded from a partial response and cannot be saved")]
    PartialEntityNotSavable,

    #[error("field '{field}' cannot be reassigned")]
    ImmutableField { field: String },

    #[error("query is already sorted; multi-key sorting is not supported")]
    ConflictingSort,

    #[error("query has already been executed")]
    QueryAlreadyExecuted,

    /// `save` or `delete` called on a facility with no registry attached.
    #[error("facility is not bound to a registry")]
    Unbound,

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be deserialized into the expected shape.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl FredError {
    pub(crate) fn validation(field: &str, reason: &str) -> Self {
        FredError::Validation {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_key(key: &str) -> Self {
        FredError::InvalidKey {
            key: key.to_string(),
        }
    }

    /// Check if this error is a 404 from the registry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FredError::Transport(e) if e.is_not_found())
    }
}

/// What the client knows about a failed round trip.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub method: HttpMethod,
    pub url: String,
    pub status: u16,
    pub body: String,
    /// The body parsed as JSON, when it was JSON.
    pub error_info: Option<serde_json::Value>,
}

impl fmt::Display for ResponseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} returned HTTP {}", self.method, self.url, self.status)?;
        if !self.body.is_empty() {
            write!(f, ": {}", self.body)?;
        }
        Ok(())
    }
}

/// Errors raised at the HTTP boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// 401 or 403: credentials missing or rejected.
    #[error("authentication failed: {0}")]
    Unauthorized(ResponseContext),

    #[error("resource not found: {0}")]
    NotFound(ResponseContext),

    /// Any other non-2xx status.
    #[error("unexpected status: {0}")]
    Status(ResponseContext),

    /// The request never produced a response.
    #[error("{method} {url} failed: {reason}")]
    Connection {
        method: HttpMethod,
        url: String,
        reason: String,
    },
}

impl TransportError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, TransportError::Unauthorized(_))
    }

    /// The HTTP status, if a response was received.
    pub fn status(&self) -> Option<u16> {
        self.context().map(|c| c.status)
    }

    pub fn context(&self) -> Option<&ResponseContext> {
        match self {
            TransportError::Unauthorized(c)
            | TransportError::NotFound(c)
            | TransportError::Status(c) => Some(c),
            TransportError::Connection { .. } => None,
        }
    }
}
