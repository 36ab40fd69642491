//! The channel engine.
//!
//! [`ChannelEngine`] owns the session: it runs the connection test, sends
//! the handshake, keeps one back channel open for server pushes, batches
//! outgoing maps onto forward requests and decides when to retry and when
//! to give up.
//!
//! # State machine
//!
//! ```text
//! INIT --connect--> (connection test) --> OPENING --"c" frame--> OPENED
//!   |                                        |                      |
//!   +------------ disconnect / error --------+----------------------+--> CLOSED
//! ```
//!
//! CLOSED is terminal. Every entry point is a no-op once closed.
//!
//! # Example
//!
//! ```ignore
//! let mut engine = ChannelEngine::new(ChannelConfig::default(), transport, scheduler, handler);
//! engine.connect(ConnectRequest::new("https://host/channel/test", "https://host/channel/bind")?)?;
//! engine.send_map(vec![("k".into(), "v".into())], None)?;
//! // feed engine.handle_http_event(..) and engine.handle_timer(..) from the driver
//! ```

mod back;
mod forward;
mod input;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use url::Url;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Error, Result};
use crate::exchange::{ExchangeOutput, HttpExchange};
use crate::handler::{ChannelHandler, MapContext, MessageMap, QueuedMap};
use crate::pool::RequestPool;
use crate::state::ConnectionState;
use crate::tester::{ConnectionTester, TestOutcome};
use crate::transport::{
    ExchangeId, HttpEvent, HttpRequest, HttpTransport, Io, Method, Scheduler, TimerId, with_param,
    with_params,
};
use crate::{CLIENT_PROTOCOL_HEADER, CLIENT_PROTOCOL_VALUE};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Created, not yet connected
    Init,
    /// Handshake sent, waiting for the session id
    Opening,
    /// Session established
    Opened,
    /// Terminal
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "INIT",
            Self::Opening => "OPENING",
            Self::Opened => "OPENED",
            Self::Closed => "CLOSED",
        })
    }
}

/// Previous session to hand over on reconnect (`OSID`/`OAID`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resume {
    /// Session id of the previous channel
    pub session_id: String,

    /// Last array id the previous channel consumed
    pub array_id: u64,
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Connection-test endpoint
    pub test_url: Url,

    /// Channel endpoint for forward and back requests
    pub channel_url: Url,

    /// Query parameters added to every data request
    pub extra_params: Vec<(String, String)>,

    /// Session to recover
    pub resume: Option<Resume>,
}

impl ConnectRequest {
    /// Parse the two endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] when either URL does not parse.
    pub fn new(test_url: &str, channel_url: &str) -> Result<Self> {
        Ok(Self {
            test_url: parse_url(test_url)?,
            channel_url: parse_url(channel_url)?,
            extra_params: Vec::new(),
            resume: None,
        })
    }

    /// Add a query parameter to every data request.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((name.into(), value.into()));
        self
    }

    /// Ask the server to hand over a previous session.
    #[must_use]
    pub fn with_resume(mut self, session_id: impl Into<String>, array_id: u64) -> Self {
        self.resume = Some(Resume {
            session_id: session_id.into(),
            array_id,
        });
        self
    }
}

fn parse_url(input: &str) -> Result<Url> {
    Url::parse(input).map_err(|source| Error::InvalidUrl {
        url: input.to_string(),
        source,
    })
}

/// Point-in-time copy of engine properties. Not updated after it is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProperties {
    /// Forward requests allowed in flight
    pub concurrent_request_limit: usize,

    /// Whether the forward pool is multiplexed
    pub multiplexing_enabled: bool,

    /// Maps sent or queued but not yet acknowledged
    pub non_acked_message_count: usize,

    /// Status of the most recent response
    pub last_status_code: Option<u16>,

    /// Server-assigned HTTP session id
    pub http_session_id: Option<String>,
}

/// Negotiated session parameters.
#[derive(Debug, Clone, Default)]
struct Session {
    sid: Option<String>,
    channel_version: u32,
    server_version: Option<i64>,
    http_session_id: Option<String>,
}

/// Request id and maps carried by one forward request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ForwardBatch {
    rid: u64,
    map_ids: Vec<u64>,
}

#[derive(Debug)]
struct ForwardTimer {
    id: TimerId,
    retry: Option<ForwardBatch>,
}

/// Which channel an exchange belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Forward,
    Back,
}

/// Client engine for one logical channel.
pub struct ChannelEngine<T, S, H> {
    config: ChannelConfig,
    io: Io<T, S>,
    handler: H,
    rng: StdRng,
    state: ChannelState,
    connection_state: ConnectionState,
    tester: Option<ConnectionTester>,
    session: Session,

    test_url: Option<Url>,
    channel_url: Option<Url>,
    extra_params: Vec<(String, String)>,
    forward_url: Option<Url>,
    back_url: Option<Url>,

    outgoing: VecDeque<QueuedMap>,
    pending: Vec<QueuedMap>,
    next_map_id: u64,
    next_rid: u64,
    last_array_id: Option<u64>,
    last_post_response_array_id: Option<u64>,
    last_status_code: Option<u16>,

    pool: RequestPool,
    forward_batches: HashMap<ExchangeId, ForwardBatch>,
    handshake_exchange: Option<ExchangeId>,
    back_channel: Option<HttpExchange>,
    back_channel_timeout: Option<Duration>,

    forward_timer: Option<ForwardTimer>,
    back_timer: Option<TimerId>,
    dead_back_timer: Option<TimerId>,
    timer_generation: u64,

    forward_retry_count: u32,
    back_retry_count: u32,
    back_attempt_id: u32,
    use_chunked: bool,
}

impl<T, S, H> fmt::Debug for ChannelEngine<T, S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelEngine")
            .field("state", &self.state)
            .field("sid", &self.session.sid)
            .field("outgoing", &self.outgoing.len())
            .field("pending", &self.pending.len())
            .field("last_array_id", &self.last_array_id)
            .finish_non_exhaustive()
    }
}

impl<T, S, H> ChannelEngine<T, S, H>
where
    T: HttpTransport,
    S: Scheduler,
    H: ChannelHandler,
{
    /// Create an engine in the INIT state.
    pub fn new(config: ChannelConfig, transport: T, scheduler: S, handler: H) -> Self {
        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let pool = if config.negotiate_multiplexing {
            RequestPool::negotiated(config.concurrent_request_limit)
        } else {
            RequestPool::new(config.concurrent_request_limit)
        };
        // Request ids start at a random point so restarted clients do not
        // collide with their previous session
        let next_rid = rng.gen_range(0..100_000);

        Self {
            session: Session {
                channel_version: config.channel_version,
                ..Session::default()
            },
            config,
            io: Io::new(transport, scheduler),
            handler,
            rng,
            state: ChannelState::Init,
            connection_state: ConnectionState::new(),
            tester: None,
            test_url: None,
            channel_url: None,
            extra_params: Vec::new(),
            forward_url: None,
            back_url: None,
            outgoing: VecDeque::new(),
            pending: Vec::new(),
            next_map_id: 0,
            next_rid,
            last_array_id: None,
            last_post_response_array_id: None,
            last_status_code: None,
            pool,
            forward_batches: HashMap::new(),
            handshake_exchange: None,
            back_channel: None,
            back_channel_timeout: None,
            forward_timer: None,
            back_timer: None,
            dead_back_timer: None,
            timer_generation: 0,
            forward_retry_count: 0,
            back_retry_count: 0,
            back_attempt_id: 1,
            use_chunked: true,
        }
    }

    /// Reuse connection-test results from a previous engine.
    #[must_use]
    pub fn with_connection_state(mut self, state: ConnectionState) -> Self {
        self.connection_state = state;
        self
    }

    /// Start connecting: run the connection test, then the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the engine is in INIT and no
    /// earlier `connect` is still running its connection test.
    pub fn connect(&mut self, request: ConnectRequest) -> Result<()> {
        if self.state != ChannelState::Init || self.test_url.is_some() {
            return Err(Error::InvalidState {
                operation: "connect",
                state: self.state,
            });
        }
        tracing::info!("connecting to {}", request.channel_url);

        self.extra_params = request.extra_params;
        if let Some(resume) = request.resume {
            tracing::debug!("requesting handover of session {}", resume.session_id);
            self.extra_params.push(("OSID".to_string(), resume.session_id));
            self.extra_params
                .push(("OAID".to_string(), resume.array_id.to_string()));
        }
        self.test_url = Some(request.test_url);
        self.channel_url = Some(request.channel_url);

        if self.config.background_channel_test {
            self.connection_state = ConnectionState::assumed_unbuffered();
        }
        self.connect_test();
        Ok(())
    }

    fn connect_test(&mut self) {
        if !self.ok_to_make_request() {
            return;
        }
        let Some(test_url) = self.test_url.clone() else {
            return;
        };
        let url = self.data_url(test_url);
        let url = self.with_additional_params(url);

        let session_param = if self.config.background_channel_test {
            None
        } else {
            self.config.http_session_id_param.clone()
        };
        let mut tester = ConnectionTester::new(self.base_headers(), session_param);
        let outcome = tester.connect(&mut self.io, &mut self.connection_state, url);
        self.tester = Some(tester);
        if let Some(outcome) = outcome {
            self.on_test_outcome(outcome);
        }
    }

    fn on_test_outcome(&mut self, outcome: TestOutcome) {
        let tester = self.tester.take();
        match outcome {
            TestOutcome::Finished { use_chunked } => {
                if let Some(tester) = &tester {
                    if let Some(protocol) = tester.client_protocol() {
                        self.pool.apply_client_protocol(protocol);
                    }
                    if let (Some(_), Some(id)) =
                        (&self.config.http_session_id_param, tester.http_session_id())
                    {
                        self.session.http_session_id = Some(id.to_string());
                    }
                    if let Some(status) = tester.last_status_code() {
                        self.last_status_code = Some(status);
                    }
                }
                self.use_chunked = self.config.allow_chunked_mode && use_chunked;
                tracing::debug!("connection test finished, chunked={}", self.use_chunked);
                self.connect_channel();
            }
            TestOutcome::Failed(error) => {
                tracing::info!("connection test failed: {}", error);
                self.signal_error(ChannelError::RequestFailed);
            }
        }
    }

    fn connect_channel(&mut self) {
        let Some(channel_url) = self.channel_url.clone() else {
            return;
        };
        self.forward_url = Some(self.data_url(channel_url));
        self.ensure_forward_channel();
    }

    /// Queue a map for delivery and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] once the channel has closed.
    pub fn send_map(&mut self, map: MessageMap, context: Option<MapContext>) -> Result<u64> {
        if self.state == ChannelState::Closed {
            return Err(Error::Closed);
        }
        if self.outgoing.len() == self.config.outgoing_soft_cap {
            tracing::warn!(
                "outgoing queue holds {} maps; the channel may be stalled",
                self.outgoing.len()
            );
        }

        let map_id = self.next_map_id;
        self.next_map_id += 1;
        self.outgoing.push_back(QueuedMap::new(map_id, map, context));
        if matches!(self.state, ChannelState::Opening | ChannelState::Opened) {
            self.ensure_forward_channel();
        }
        Ok(map_id)
    }

    /// Close the channel. Idempotent.
    ///
    /// An open session is told to terminate with a best-effort request.
    pub fn disconnect(&mut self) {
        if self.state == ChannelState::Closed {
            tracing::debug!("disconnect: already closed");
            return;
        }
        tracing::info!("disconnecting in state {}", self.state);
        self.cancel_requests();

        if self.state == ChannelState::Opened {
            self.send_terminate();
        }
        self.on_close();
    }

    fn send_terminate(&mut self) {
        let (Some(url), Some(sid)) = (self.forward_url.clone(), self.session.sid.clone()) else {
            return;
        };
        let rid = self.allocate_rid();
        let url = with_param(url, "SID", &sid);
        let url = with_param(url, "RID", &rid.to_string());
        let url = with_param(url, "TYPE", "terminate");
        let url = self.with_additional_params(url);

        let id = self.io.allocate_exchange();
        tracing::debug!("{} GET terminate rid={}", id, rid);
        self.io.transport.send(
            id,
            HttpRequest {
                method: Method::Get,
                url,
                headers: self.base_headers(),
                body: None,
            },
        );
    }

    /// Change fail-fast at runtime.
    ///
    /// Forward requests whose retry budget is already spent under the new
    /// cap are resolved immediately as failures.
    pub fn set_fail_fast(&mut self, fail_fast: bool) {
        self.config.fail_fast = fail_fast;
        let max_retries = self.config.effective_forward_retries();
        tracing::info!("fail-fast {}, forward retries capped at {}", fail_fast, max_retries);

        let busy = !self.pool.is_empty() || self.forward_timer.is_some();
        if !busy || self.forward_retry_count <= max_retries || self.state == ChannelState::Closed {
            return;
        }

        let mut forced = Vec::new();
        let any = self
            .pool
            .force_complete(&mut self.io, |_, exchange| forced.push(exchange));
        if any {
            for exchange in forced {
                let batch = self.forward_batches.remove(&exchange.id());
                self.on_request_failure(
                    Channel::Forward,
                    &exchange,
                    batch,
                    crate::error::RequestError::Timeout,
                );
            }
        } else {
            if let Some(timer) = self.forward_timer.take() {
                self.io.scheduler.cancel(timer.id);
            }
            self.signal_error(ChannelError::RequestFailed);
        }
    }

    /// Route a transport event to the exchange it belongs to.
    pub fn handle_http_event(&mut self, id: ExchangeId, event: HttpEvent) {
        if self.state == ChannelState::Closed {
            return;
        }

        if let Some(tester) = self.tester.as_mut().filter(|t| t.owns(id)) {
            if let Some(outcome) = tester.on_event(&mut self.io, &mut self.connection_state, id, event) {
                self.on_test_outcome(outcome);
            }
        } else if let Some(back) = self.back_channel.as_mut().filter(|e| e.id() == id) {
            let outputs = back.on_event(&mut self.io, event);
            self.process_outputs(Channel::Back, id, outputs);
        } else if let Some(exchange) = self.pool.get_mut(id) {
            let outputs = exchange.on_event(&mut self.io, event);
            self.process_outputs(Channel::Forward, id, outputs);
        } else {
            tracing::trace!("ignoring event for unknown exchange {}", id);
        }
    }

    /// Handle a fired timer.
    pub fn handle_timer(&mut self, timer: TimerId) {
        if self.state == ChannelState::Closed {
            return;
        }

        match timer {
            TimerId::ForwardChannel(_)
                if self.forward_timer.as_ref().is_some_and(|t| t.id == timer) =>
            {
                let retry = self.forward_timer.take().and_then(|t| t.retry);
                self.start_forward_channel(retry);
            }
            TimerId::BackChannel(_) if self.back_timer == Some(timer) => {
                self.back_timer = None;
                self.start_back_channel();
            }
            TimerId::DeadBackChannel(_) if self.dead_back_timer == Some(timer) => {
                self.dead_back_timer = None;
                self.on_back_channel_dead();
            }
            TimerId::Watchdog(id) => self.on_watchdog(id),
            _ => tracing::trace!("ignoring stale timer {:?}", timer),
        }
    }

    fn on_watchdog(&mut self, id: ExchangeId) {
        if let Some(tester) = self.tester.as_mut().filter(|t| t.owns(id)) {
            if let Some(outcome) = tester.on_watchdog(&mut self.io, &mut self.connection_state, id) {
                self.on_test_outcome(outcome);
            }
        } else if let Some(back) = self.back_channel.as_mut().filter(|e| e.id() == id) {
            let outputs: Vec<_> = back.on_watchdog(&mut self.io).into_iter().collect();
            self.process_outputs(Channel::Back, id, outputs);
        } else if let Some(exchange) = self.pool.get_mut(id) {
            let outputs: Vec<_> = exchange.on_watchdog(&mut self.io).into_iter().collect();
            self.process_outputs(Channel::Forward, id, outputs);
        }
    }

    fn process_outputs(&mut self, channel: Channel, id: ExchangeId, outputs: Vec<ExchangeOutput>) {
        for output in outputs {
            // Handling one output may close the channel or retire the exchange
            if self.state == ChannelState::Closed || !self.is_current(channel, id) {
                break;
            }
            match output {
                ExchangeOutput::Data(text) => self.on_request_data(channel, id, &text),
                ExchangeOutput::Complete(result) => self.on_request_complete(channel, id, result),
            }
        }
    }

    fn is_current(&self, channel: Channel, id: ExchangeId) -> bool {
        match channel {
            Channel::Forward => self.pool.contains(id),
            Channel::Back => self.back_channel.as_ref().is_some_and(|e| e.id() == id),
        }
    }

    // ============ Error signalling ============

    fn ok_to_make_request(&mut self) -> bool {
        match self.handler.ok_to_make_request() {
            Ok(()) => true,
            Err(error) => {
                tracing::info!("request blocked by application: {}", error);
                self.signal_error(error);
                false
            }
        }
    }

    fn signal_error(&mut self, error: ChannelError) {
        if self.state == ChannelState::Closed {
            return;
        }
        tracing::info!("channel error: {} (code {})", error, error.code());
        if error == ChannelError::RequestFailed {
            if let Some(target) = self.handler.network_test_probe_target() {
                self.probe_network(target);
            }
        }
        self.on_error(error);
    }

    fn probe_network(&mut self, target: Url) {
        let id = self.io.allocate_exchange();
        tracing::debug!("{} probing network at {}", id, target);
        self.io.transport.send(
            id,
            HttpRequest {
                method: Method::Get,
                url: target,
                headers: Vec::new(),
                body: None,
            },
        );
    }

    fn on_error(&mut self, error: ChannelError) {
        self.state = ChannelState::Closed;
        self.cancel_requests();
        self.handler.error(error);
        self.on_close();
    }

    fn on_close(&mut self) {
        self.state = ChannelState::Closed;
        self.last_status_code = None;
        self.session.sid = None;

        let pending = std::mem::take(&mut self.pending);
        let undelivered: Vec<_> = std::mem::take(&mut self.outgoing).into();
        tracing::info!(
            "channel closed, {} pending and {} undelivered maps",
            pending.len(),
            undelivered.len()
        );
        self.handler.closed(pending, undelivered);
    }

    fn cancel_requests(&mut self) {
        if let Some(mut tester) = self.tester.take() {
            tester.abort(&mut self.io);
        }
        if let Some(mut back) = self.back_channel.take() {
            back.cancel(&mut self.io);
        }
        if let Some(timer) = self.back_timer.take() {
            self.io.scheduler.cancel(timer);
        }
        if let Some(timer) = self.dead_back_timer.take() {
            self.io.scheduler.cancel(timer);
        }
        self.pool.cancel_all(&mut self.io);
        self.forward_batches.clear();
        self.handshake_exchange = None;
        if let Some(timer) = self.forward_timer.take() {
            self.io.scheduler.cancel(timer.id);
        }
    }

    // ============ Helpers ============

    fn allocate_rid(&mut self) -> u64 {
        let rid = self.next_rid;
        self.next_rid += 1;
        rid
    }

    fn next_generation(&mut self) -> u64 {
        self.timer_generation += 1;
        self.timer_generation
    }

    fn base_headers(&self) -> Vec<(String, String)> {
        let mut headers = self.config.message_headers.clone();
        if self.config.client_protocol_header_required {
            headers.push((
                CLIENT_PROTOCOL_HEADER.to_string(),
                CLIENT_PROTOCOL_VALUE.to_string(),
            ));
        }
        headers
    }

    /// Base URL plus extra params, the HTTP session id and `VER`.
    fn data_url(&self, base: Url) -> Url {
        let mut url = with_params(base, &self.extra_params);
        if let (Some(param), Some(id)) =
            (&self.config.http_session_id_param, &self.session.http_session_id)
        {
            url = with_param(url, param, id);
        }
        with_param(url, "VER", &self.session.channel_version.to_string())
    }

    fn with_additional_params(&mut self, url: Url) -> Url {
        let params = self.handler.additional_query_params();
        with_params(url, &params)
    }

    fn aid_param(&self) -> String {
        self.last_array_id
            .map_or_else(|| "-1".to_string(), |id| id.to_string())
    }

    /// `(base + jitter) * retry_count`, scaled up while inactive.
    fn retry_delay(&mut self, retry_count: u32) -> Duration {
        let seed = u64::try_from(self.config.retry_delay_seed.as_millis()).unwrap_or(u64::MAX);
        let jitter = if seed == 0 {
            0
        } else {
            self.rng.gen_range(0..seed)
        };
        let mut delay = self.config.base_retry_delay + Duration::from_millis(jitter);
        if !self.handler.is_active() {
            delay *= self.config.inactive_retry_factor;
        }
        delay * retry_count
    }

    // ============ Accessors ============

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Session id, once the handshake completed.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session.sid.as_deref()
    }

    /// Negotiated channel version.
    #[must_use]
    pub fn channel_version(&self) -> u32 {
        self.session.channel_version
    }

    /// Server version reported by the handshake.
    #[must_use]
    pub fn server_version(&self) -> Option<i64> {
        self.session.server_version
    }

    /// Highest array id consumed from the server.
    #[must_use]
    pub fn last_array_id(&self) -> Option<u64> {
        self.last_array_id
    }

    /// Highest array id the server reported as flushed.
    #[must_use]
    pub fn last_post_response_array_id(&self) -> Option<u64> {
        self.last_post_response_array_id
    }

    /// Status of the most recent response.
    #[must_use]
    pub fn last_status_code(&self) -> Option<u16> {
        self.last_status_code
    }

    /// Maps not yet sent.
    #[must_use]
    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    /// Maps sent and awaiting acknowledgement.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Forward retries spent since the last success.
    #[must_use]
    pub fn forward_retry_count(&self) -> u32 {
        self.forward_retry_count
    }

    /// Back-channel retries spent since data last arrived.
    #[must_use]
    pub fn back_retry_count(&self) -> u32 {
        self.back_retry_count
    }

    /// Whether back channels stream (false behind a buffering proxy).
    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.use_chunked
    }

    /// Whether a back-channel request is in flight.
    #[must_use]
    pub fn has_back_channel(&self) -> bool {
        self.back_channel.is_some()
    }

    /// Forward requests in flight.
    #[must_use]
    pub fn forward_in_flight(&self) -> usize {
        self.pool.len()
    }

    /// Snapshot of runtime properties.
    #[must_use]
    pub fn runtime_properties(&self) -> RuntimeProperties {
        RuntimeProperties {
            concurrent_request_limit: self.pool.max_size(),
            multiplexing_enabled: self.pool.is_multiplexed(),
            non_acked_message_count: self.pending.len() + self.outgoing.len(),
            last_status_code: self.last_status_code,
            http_session_id: self.session.http_session_id.clone(),
        }
    }

    /// Connection-test cache, to seed the next engine on reconnect.
    #[must_use]
    pub fn connection_state(&self) -> &ConnectionState {
        &self.connection_state
    }

    /// The application handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// The application handler, mutably.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// The HTTP collaborator.
    pub fn transport(&self) -> &T {
        &self.io.transport
    }

    /// The HTTP collaborator, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.io.transport
    }

    /// The timer collaborator.
    pub fn scheduler(&self) -> &S {
        &self.io.scheduler
    }

    /// The timer collaborator, mutably.
    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.io.scheduler
    }
}
