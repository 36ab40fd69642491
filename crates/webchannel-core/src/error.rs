//! Error types for the WebChannel engine.
//!
//! Three layers of failure are kept apart:
//!
//! - [`RequestError`] classifies the outcome of a single HTTP exchange.
//! - [`ChannelError`] is the closed taxonomy surfaced to the application
//!   when the channel gives up.
//! - [`Error`] reports misuse of the engine API itself.

use thiserror::Error;

/// Result alias for engine API calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Result of decoding a server response or request body.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// API misuse errors returned by [`crate::ChannelEngine`] operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation not permitted in the current engine state
    #[error("invalid state for {operation}: engine is {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the engine was in
        state: crate::ChannelState,
    },

    /// Channel has already been closed
    #[error("channel is closed")]
    Closed,

    /// A test or channel URL could not be parsed
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        /// The rejected input
        url: String,
        /// Underlying parse failure
        #[source]
        source: url::ParseError,
    },
}

/// Errors surfaced to the application when the channel fails.
///
/// Transient request failures are retried inside the engine and never
/// reach the application; one of these is reported exactly once, right
/// before the channel closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ChannelError {
    /// A request failed after exhausting its retries
    #[error("request failed")]
    RequestFailed,

    /// The application refused to let the channel make requests
    #[error("logged out")]
    LoggedOut,

    /// A response completed without any data
    #[error("no data received")]
    NoData,

    /// The server no longer recognizes the session id
    #[error("unknown session id")]
    UnknownSessionId,

    /// The server asked the client to stop
    #[error("server stopped the channel")]
    Stop,

    /// Transport-detected connectivity loss
    #[error("network error")]
    Network,

    /// Response body framing was malformed
    #[error("bad data")]
    BadData,

    /// A server frame could not be interpreted
    #[error("bad response")]
    BadResponse,
}

impl ChannelError {
    /// Numeric code used in logs and by protocol tooling.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::RequestFailed => 2,
            Self::LoggedOut => 4,
            Self::NoData => 5,
            Self::UnknownSessionId => 6,
            Self::Stop => 7,
            Self::Network => 8,
            Self::BadData => 10,
            Self::BadResponse => 11,
        }
    }

    /// Whether the failure points at the network rather than the server.
    #[must_use]
    pub const fn is_network(self) -> bool {
        matches!(self, Self::RequestFailed | Self::Network)
    }
}

/// Outcome classification of a single HTTP exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum RequestError {
    /// Response status other than 200 (0 when the status never arrived)
    #[error("Non-200 return code ({0})")]
    Status(u16),

    /// Successful status but the body was empty
    #[error("HTTP failure (no data)")]
    NoData,

    /// Watchdog expired before the exchange finished
    #[error("HttpConnection timeout")]
    Timeout,

    /// Status 400 with the unknown-session marker in the body
    #[error("Unknown SID")]
    UnknownSessionId,

    /// Chunk framing or payload decode failure
    #[error("Bad data returned")]
    BadData,

    /// The consumer of the response data failed to process it
    #[error("Exception thrown by response handler")]
    HandlerException,

    /// The host reports no network connection
    #[error("Browser offline")]
    BrowserOffline,
}

impl RequestError {
    /// Fatal failures are never retried.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        match self {
            Self::UnknownSessionId => true,
            Self::Status(status) => status > 0,
            _ => false,
        }
    }

    /// Map an exhausted or fatal request failure to the application taxonomy.
    #[must_use]
    pub const fn to_channel_error(self) -> ChannelError {
        match self {
            Self::NoData => ChannelError::NoData,
            Self::BadData => ChannelError::BadData,
            Self::UnknownSessionId => ChannelError::UnknownSessionId,
            Self::BrowserOffline => ChannelError::Network,
            Self::Status(_) | Self::Timeout | Self::HandlerException => {
                ChannelError::RequestFailed
            }
        }
    }
}

/// Failures decoding JSON responses or form-encoded request bodies.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Response text was not valid JSON
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// Top-level JSON value was not an array
    #[error("expected a json array, got {0}")]
    NotAnArray(&'static str),

    /// Decode depth must be at least 1
    #[error("max decode depth must be positive")]
    InvalidDepth,

    /// Form body is missing a required field
    #[error("missing field {0}")]
    MissingField(&'static str),

    /// Form body field has an unusable value
    #[error("malformed field {field}: {value:?}")]
    MalformedField {
        /// Field name
        field: String,
        /// Offending value
        value: String,
    },
}
