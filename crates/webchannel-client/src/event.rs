//! Events delivered to the application.

use webchannel_core::{ChannelError, MessageMap};

/// Coarse error category for applications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorKind {
    /// No error
    #[default]
    Ok,
    /// The server could not be reached
    NetworkError,
    /// The server answered but rejected or broke the session
    ServerError,
}

/// Error reported with [`ChannelEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorStatus {
    /// Category
    pub kind: ErrorKind,
    /// Engine classification
    pub detail: ChannelError,
}

impl From<ChannelError> for ErrorStatus {
    fn from(detail: ChannelError) -> Self {
        let kind = match detail {
            ChannelError::Network | ChannelError::RequestFailed => ErrorKind::NetworkError,
            _ => ErrorKind::ServerError,
        };
        Self { kind, detail }
    }
}

/// Something happened on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The session is established
    Opened,

    /// A message from the server
    Message(serde_json::Value),

    /// The channel failed; [`ChannelEvent::Closed`] follows
    Error(ErrorStatus),

    /// The channel closed, returning the maps that may not have arrived
    Closed {
        /// Sent but not acknowledged
        pending: Vec<MessageMap>,
        /// Never sent
        undelivered: Vec<MessageMap>,
    },
}
