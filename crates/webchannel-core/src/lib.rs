//! # WebChannel Core
//!
//! Client engine for the WebChannel protocol: an ordered, long-lived, duplex
//! message stream built from plain HTTP requests.
//!
//! This crate provides:
//! - The channel state machine (handshake, forward and back channels)
//! - The two-stage buffering-proxy connection test
//! - Retry, backoff and watchdog policy
//! - The wire codec for batched key/value messages
//! - Error types and handling
//!
//! The engine is sans-IO. HTTP requests and timers are delegated to
//! [`HttpTransport`] and [`Scheduler`] implementations, which report back
//! through [`ChannelEngine::handle_http_event`] and
//! [`ChannelEngine::handle_timer`]. Everything runs on one context.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ChannelEngine                             │
//! │   (session lifecycle, queues, retry policy, frame dispatch)     │
//! ├──────────────────┬──────────────────────┬───────────────────────┤
//! │ ConnectionTester │  RequestPool (POST)  │  back channel (GET)   │
//! ├──────────────────┴──────────────────────┴───────────────────────┤
//! │                        HttpExchange                              │
//! │   (one request attempt: watchdog, chunk framing, outcome)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │              HttpTransport + Scheduler (injected)                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod handler;
pub mod pool;
pub mod state;
pub mod tester;
pub mod transport;
pub mod value;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use codec::{EncodeResult, decode_message_queue, encode_message_queue};
pub use config::ChannelConfig;
pub use engine::{ChannelEngine, ChannelState, ConnectRequest, Resume, RuntimeProperties};
pub use error::{ChannelError, DecodeError, Error, RequestError, Result};
pub use exchange::{ExchangeOutput, HttpExchange};
pub use handler::{ChannelHandler, MapContext, MessageMap, QueuedMap};
pub use pool::RequestPool;
pub use state::ConnectionState;
pub use tester::{ConnectionTester, TestOutcome};
pub use transport::{
    ExchangeId, HttpEvent, HttpRequest, HttpTransport, Io, Method, Scheduler, TimerId,
};
pub use value::{Value, decode_array};

/// Latest channel protocol version this client speaks
pub const LATEST_CHANNEL_VERSION: u32 = 8;

/// Client version advertised on the handshake
pub const CLIENT_VERSION: u32 = 20;

/// Request header marking the client protocol
pub const CLIENT_PROTOCOL_HEADER: &str = "X-Client-Protocol";

/// Value of [`CLIENT_PROTOCOL_HEADER`]
pub const CLIENT_PROTOCOL_VALUE: &str = "webchannel";

/// Response header echoing the wire protocol the server saw
pub const WIRE_PROTOCOL_HEADER: &str = "X-Client-Wire-Protocol";

/// Header carrying the server-assigned HTTP session id
pub const HTTP_SESSION_ID_HEADER: &str = "X-HTTP-Session-Id";
