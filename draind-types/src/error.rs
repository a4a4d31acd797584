//! Per-protocol error enums, one per collaborator trait. Each is
//! `#[non_exhaustive]` with a catch-all `Other` variant, so new failure
//! modes don't need a major version bump.

use thiserror::Error;

/// Errors an [`EventSource`](crate::source::EventSource) can surface.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SourceError {
    /// The upstream HTTP/queue endpoint could not be reached after retries.
    #[error("transient failure polling {endpoint}: {message}")]
    Transient {
        /// Which endpoint failed.
        endpoint: String,
        /// Underlying error text.
        message: String,
    },

    /// Credentials were rejected and could not be refreshed.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The response payload did not parse as expected.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the Interruption Event Store.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// An id was rejected (currently only the empty-id case for `Ignore`).
    #[error("invalid event id")]
    InvalidId,
}

/// Errors from the [`NodeClient`](crate::node::NodeClient) collaborator.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node does not exist in the cluster. Often a routine race rather
    /// than a real failure (spec §4.4, "Failure semantics").
    #[error("node not found: {0}")]
    NotFound(String),

    /// The cluster API rejected the request for a reason other than
    /// "not found" (RBAC, validation, etc.).
    #[error("cluster API error: {0}")]
    Api(String),

    /// The cluster API is rate-limiting; callers may retry.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the cloud metadata/queue/lifecycle collaborators
/// (`draind-cloud`).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CloudError {
    /// Transient network failure; caller may retry with backoff.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The cached token was rejected (HTTP 401); caller should refresh and
    /// retry exactly once.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No event/hook is currently attached (HTTP 404 on a "no event"
    /// endpoint).
    #[error("not found: {0}")]
    NotFound(String),

    /// The response payload did not parse as expected.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the webhook notifier.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Rendering the template failed.
    #[error("template render failed: {0}")]
    Render(String),

    /// The HTTP POST failed or returned a non-2xx status.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Errors from the Drain Handler's top-level flow.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The node could not be resolved from the event at all.
    #[error("could not resolve node name for event {0}")]
    UnresolvedNode(String),

    /// The cordon/drain step failed fatally (not a routine "not found").
    #[error("drain failed: {0}")]
    DrainFailed(#[from] NodeError),

    /// The drain did not complete within its deadline.
    #[error("drain timed out after {0}s")]
    Timeout(u64),
}

/// Configuration validation errors, surfaced at startup (spec §7 item 6:
/// "Configuration invalid: fatal at startup").
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was missing.
    #[error("missing required config: {0}")]
    Missing(String),

    /// A value was present but did not parse/validate.
    #[error("invalid config value for {field}: {message}")]
    Invalid {
        /// The offending field name.
        field: String,
        /// Why it was rejected.
        message: String,
    },

    /// The config file could not be read or parsed.
    #[error("failed to load config file: {0}")]
    Io(String),
}
