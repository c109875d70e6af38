//! Crate-level error types for REST calls and push channels.

/// Error returned by the REST boundary and by entity store operations.
///
/// Every store method surfaces exactly one of these variants; callers are
/// responsible for presenting it to the user. The store never swallows an
/// error and never leaves local state half-applied.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request never produced an HTTP response.
    ///
    /// Wraps the transport's own description (DNS failure, connection
    /// refused, timeout). One-shot CRUD calls are not retried.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with HTTP 401.
    #[error("unauthorized")]
    Unauthorized,

    /// The server answered with a non-success HTTP status other than 401.
    ///
    /// `message` carries the envelope's `message` field when the body had
    /// one, otherwise a generic description.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Server-supplied or generic description.
        message: String,
    },

    /// The request succeeded at the HTTP level but the envelope reported
    /// `success: false` (or a non-2xx `statusCode`).
    #[error("request rejected (status {status_code}): {message}")]
    Rejected {
        /// `statusCode` from the envelope.
        status_code: u16,
        /// `message` from the envelope.
        message: String,
    },

    /// The response body did not have the expected envelope or page shape.
    #[error("malformed response: {0}")]
    Envelope(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pagination parameters violate `current >= 1` or `page_size >= 1`.
    #[error("invalid page query: {0}")]
    InvalidQuery(String),
}

impl StoreError {
    /// Returns `true` for failures that leave the server state unknown to
    /// the caller (transport errors), as opposed to definite answers.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Error returned when starting or running a push channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// No bearer credential was available when a connection was attempted.
    ///
    /// The channel stays disconnected and does not retry.
    #[error("no credential available for push connection")]
    MissingCredential,

    /// The hub rejected the credential with HTTP 401.
    ///
    /// This is terminal: the channel will not retry.
    #[error("hub rejected credential (401)")]
    Unauthorized,

    /// Connecting or reading from the hub failed for any other reason.
    #[error("push transport error: {0}")]
    Transport(String),

    /// The automatic reconnect policy ran out of attempts.
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    /// `start` was called on a channel whose loop is already running.
    #[error("push channel already started")]
    AlreadyStarted,
}

/// Error returned by [`ConsoleBuilder::open`](crate::ConsoleBuilder::open).
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The credentials file could not be read.
    #[error("failed to load credentials: {0}")]
    Credentials(#[from] std::io::Error),

    /// The REST client could not be built.
    #[error(transparent)]
    Rest(#[from] StoreError),

    /// The hub transport could not be built.
    #[error(transparent)]
    Push(#[from] PushError),
}
