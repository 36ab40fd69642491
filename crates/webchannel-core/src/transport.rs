//! Collaborator seams: HTTP execution and timer scheduling.
//!
//! The engine never performs I/O. It asks an [`HttpTransport`] to start or
//! abort requests and a [`Scheduler`] to arm or cancel timers; results come
//! back through [`crate::ChannelEngine::handle_http_event`] and
//! [`crate::ChannelEngine::handle_timer`] on the engine's own context.

use std::fmt;
use std::time::{Duration, Instant};

use url::Url;

/// Identifies one HTTP exchange for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(u64);

impl ExchangeId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

/// Identifies an armed timer.
///
/// Engine timers carry a generation so a fire that raced a cancel is
/// recognized as stale. Watchdogs are keyed by their exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Forward-channel dispatch or retry
    ForwardChannel(u64),

    /// Back-channel start or retry
    BackChannel(u64),

    /// Deferred dead-back-channel check
    DeadBackChannel(u64),

    /// Per-exchange watchdog
    Watchdog(ExchangeId),
}

/// HTTP method used by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl Method {
    /// Method name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request the transport should execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method
    pub method: Method,

    /// Fully built request URL
    pub url: Url,

    /// Request headers, in order
    pub headers: Vec<(String, String)>,

    /// Form-encoded body for POST
    pub body: Option<String>,
}

impl HttpRequest {
    /// Value of a query parameter, for diagnostics and tests.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Value of a request header (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Progress of a request, reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpEvent {
    /// Status line and headers arrived
    Head {
        /// HTTP status code
        status: u16,
        /// Response headers
        headers: Vec<(String, String)>,
    },

    /// Body bytes arrived; slices may split chunks anywhere
    Data(Vec<u8>),

    /// The body ended
    Complete,

    /// The request failed below HTTP (connect refused, reset, offline)
    Failed(String),
}

/// Executes HTTP requests on behalf of the engine.
///
/// Events for a request must be delivered in order through
/// [`crate::ChannelEngine::handle_http_event`]. After `abort` the transport
/// should stop delivering events; late ones are ignored.
pub trait HttpTransport {
    /// Start executing a request.
    fn send(&mut self, id: ExchangeId, request: HttpRequest);

    /// Abort a request started with `send`.
    fn abort(&mut self, id: ExchangeId);
}

/// Cancelable one-shot timers plus the clock they run on.
///
/// Scheduling an id that is already armed replaces the earlier timer.
pub trait Scheduler {
    /// Current time on the scheduler's clock.
    fn now(&self) -> Instant;

    /// Fire `timer` after `delay` through [`crate::ChannelEngine::handle_timer`].
    fn schedule(&mut self, timer: TimerId, delay: Duration);

    /// Cancel an armed timer. Unknown ids are ignored.
    fn cancel(&mut self, timer: TimerId);
}

/// The engine's collaborators plus its exchange id allocator.
#[derive(Debug)]
pub struct Io<T, S> {
    /// HTTP collaborator
    pub transport: T,

    /// Timer collaborator
    pub scheduler: S,

    next_exchange: u64,
}

impl<T: HttpTransport, S: Scheduler> Io<T, S> {
    /// Bundle a transport and a scheduler.
    pub fn new(transport: T, scheduler: S) -> Self {
        Self {
            transport,
            scheduler,
            next_exchange: 0,
        }
    }

    /// Allocate a fresh exchange id.
    pub fn allocate_exchange(&mut self) -> ExchangeId {
        let id = ExchangeId::new(self.next_exchange);
        self.next_exchange += 1;
        id
    }

    /// Current time on the scheduler's clock.
    pub fn now(&self) -> Instant {
        self.scheduler.now()
    }
}

/// Append a query parameter to a URL.
#[must_use]
pub fn with_param(mut url: Url, name: &str, value: &str) -> Url {
    url.query_pairs_mut().append_pair(name, value);
    url
}

/// Append several query parameters to a URL.
#[must_use]
pub fn with_params<'a, I>(mut url: Url, params: I) -> Url
where
    I: IntoIterator<Item = &'a (String, String)>,
{
    let mut iter = params.into_iter().peekable();
    if iter.peek().is_some() {
        url.query_pairs_mut().extend_pairs(iter.map(|(k, v)| (k, v)));
    }
    url
}
