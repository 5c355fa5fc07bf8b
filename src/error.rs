//! Error types for the reconciliation core.

use crate::classify::{self, ApiError, ErrorClass, ServiceErrors};
use crate::schema::Diagnostic;
use crate::types::Operation;
use thiserror::Error;

/// Errors produced while planning or applying a resource.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration was rejected with one or more diagnostics.
    #[error("Invalid configuration: {}", summarize(.0))]
    Diagnostics(Vec<Diagnostic>),

    /// An internal engine error occurred.
    #[error("SDK error: {0}")]
    Sdk(String),

    /// A provider configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An error returned by the cloud API, carried verbatim.
    #[error("{0}")]
    Api(ApiError),

    /// A waiter or retryer ran out of time.
    #[error("timeout while waiting for {what}{}{}", last_state_suffix(.last_state), last_error_suffix(.last_error))]
    Timeout {
        /// What was being waited on.
        what: String,
        /// The last status observed by a waiter.
        last_state: Option<String>,
        /// The last error observed by a retryer.
        last_error: Option<Box<ProviderError>>,
    },

    /// A waiter observed a status that is neither pending nor target.
    #[error("unexpected state '{state}', wanted target '{}'", .expected.join(", "))]
    UnexpectedState {
        /// The observed status.
        state: String,
        /// The target statuses.
        expected: Vec<String>,
    },

    /// The host cancelled the operation.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// An update failed after some changes were applied.
    ///
    /// `state` is the resource state as it stood when the update stopped.
    #[error("Partial update: {source}")]
    PartialUpdate {
        /// State to record for the resource.
        state: serde_json::Value,
        /// The failure that stopped the update.
        #[source]
        source: Box<ProviderError>,
    },

    /// A resource callback panicked.
    #[error("Resource callback panicked: {0}")]
    Panic(String),

    /// An import identifier could not be used.
    #[error("Import error: {0}")]
    Import(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Structured context for an error leaving the dispatcher.
    #[error("{operation} {resource_type} ({}): {source}", display_id(.id))]
    Resource {
        /// The resource type name.
        resource_type: String,
        /// The resource id, empty if not yet assigned.
        id: String,
        /// The lifecycle operation that failed.
        operation: Operation,
        /// The underlying error.
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Construct an API error from a code and message.
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api(ApiError::new(code, message))
    }

    /// Construct a timeout error for a waiter.
    pub fn timeout(what: impl Into<String>, last_state: Option<String>) -> Self {
        Self::Timeout {
            what: what.into(),
            last_state,
            last_error: None,
        }
    }

    /// Wrap this error with resource context.
    ///
    /// An error that already carries context is returned unchanged.
    pub fn with_context(
        self,
        resource_type: impl Into<String>,
        id: impl Into<String>,
        operation: Operation,
    ) -> Self {
        match self {
            Self::Resource { .. } => self,
            other => Self::Resource {
                resource_type: resource_type.into(),
                id: id.into(),
                operation,
                source: Box::new(other),
            },
        }
    }

    /// The error beneath any context wrappers.
    pub fn root(&self) -> &ProviderError {
        match self {
            Self::Resource { source, .. } | Self::PartialUpdate { source, .. } => source.root(),
            other => other,
        }
    }

    /// The API error beneath any context wrappers, if there is one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self.root() {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }

    /// Whether this error means the remote object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Self::NotFound(_) => true,
            Self::Api(err) => classify::classify(err) == ErrorClass::NotFound,
            _ => false,
        }
    }

    /// Like [`is_not_found`](Self::is_not_found), also consulting the
    /// service's own not-found codes and messages.
    pub fn is_not_found_for(&self, service: &ServiceErrors) -> bool {
        match self.root() {
            Self::NotFound(_) => true,
            Self::Api(err) => service.is_not_found(err),
            _ => false,
        }
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }

    /// Whether this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled(_))
    }

    /// Get the error message as a string.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Sdk(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::Cancelled(msg)
            | Self::Panic(msg)
            | Self::Import(msg)
            | Self::Unimplemented(msg) => msg.clone(),
            Self::Api(err) => err.message.clone(),
            Self::Resource { source, .. } | Self::PartialUpdate { source, .. } => source.message(),
            other => other.to_string(),
        }
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| match &d.attribute {
            Some(attr) => format!("{} (at {})", d.summary, attr),
            None => d.summary.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn last_state_suffix(state: &Option<String>) -> String {
    match state {
        Some(s) => format!(" (last state: '{}')", s),
        None => String::new(),
    }
}

fn last_error_suffix(err: &Option<Box<ProviderError>>) -> String {
    match err {
        Some(e) => format!(" (last error: {})", e),
        None => String::new(),
    }
}

fn display_id(id: &str) -> &str {
    if id.is_empty() {
        "<no id>"
    } else {
        id
    }
}
