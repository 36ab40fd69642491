//! Deterministic collaborators for tests.
//!
//! [`VirtualScheduler`] keeps a virtual clock and never fires on its own;
//! [`MockTransport`] records requests and lets the test script responses;
//! [`RecordingHandler`] records every callback. Together with
//! [`ChannelEngine::advance`] they drive the engine without sockets or sleeps.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use url::Url;

use crate::config::ChannelConfig;
use crate::engine::{ChannelEngine, ConnectRequest};
use crate::error::ChannelError;
use crate::handler::{ChannelHandler, QueuedMap};
use crate::state::ConnectionState;
use crate::transport::{
    ExchangeId, HttpEvent, HttpRequest, HttpTransport, Method, Scheduler, TimerId,
};
use crate::value::Value;

/// A timer armed on the [`VirtualScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer {
    /// When it fires
    pub deadline: Instant,
    /// Delay requested when armed
    pub delay: Duration,
    seq: u64,
}

/// Scheduler on a virtual clock.
#[derive(Debug)]
pub struct VirtualScheduler {
    now: Instant,
    timers: HashMap<TimerId, ArmedTimer>,
    seq: u64,
    history: Vec<(TimerId, Duration)>,
}

impl Default for VirtualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualScheduler {
    /// Start the clock at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
            timers: HashMap::new(),
            seq: 0,
            history: Vec::new(),
        }
    }

    /// Move the clock forward without firing anything.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Whether `timer` is armed.
    #[must_use]
    pub fn is_armed(&self, timer: TimerId) -> bool {
        self.timers.contains_key(&timer)
    }

    /// The armed timer, if any.
    #[must_use]
    pub fn armed(&self, timer: TimerId) -> Option<ArmedTimer> {
        self.timers.get(&timer).copied()
    }

    /// Every armed timer.
    #[must_use]
    pub fn armed_timers(&self) -> Vec<TimerId> {
        self.timers.keys().copied().collect()
    }

    /// Every `schedule` call so far, in order.
    #[must_use]
    pub fn history(&self) -> &[(TimerId, Duration)] {
        &self.history
    }

    /// Earliest armed timer due at or before `limit`, removed from the set.
    pub fn pop_due(&mut self, limit: Instant) -> Option<(TimerId, Instant)> {
        let (id, armed) = self
            .timers
            .iter()
            .filter(|(_, armed)| armed.deadline <= limit)
            .min_by_key(|(_, armed)| (armed.deadline, armed.seq))
            .map(|(id, armed)| (*id, *armed))?;
        self.timers.remove(&id);
        Some((id, armed.deadline))
    }

    fn set_now(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }
}

impl Scheduler for VirtualScheduler {
    fn now(&self) -> Instant {
        self.now
    }

    fn schedule(&mut self, timer: TimerId, delay: Duration) {
        self.seq += 1;
        self.history.push((timer, delay));
        self.timers.insert(
            timer,
            ArmedTimer {
                deadline: self.now + delay,
                delay,
                seq: self.seq,
            },
        );
    }

    fn cancel(&mut self, timer: TimerId) {
        self.timers.remove(&timer);
    }
}

/// Transport that records requests instead of sending them.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Vec<(ExchangeId, HttpRequest)>,
    by_id: BTreeMap<ExchangeId, usize>,
    aborted: HashSet<ExchangeId>,
}

impl MockTransport {
    /// Empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sent, in order.
    #[must_use]
    pub fn sent(&self) -> &[(ExchangeId, HttpRequest)] {
        &self.sent
    }

    /// The request sent for `id`.
    #[must_use]
    pub fn request(&self, id: ExchangeId) -> Option<&HttpRequest> {
        self.by_id.get(&id).map(|&index| &self.sent[index].1)
    }

    /// Id of the most recent request.
    #[must_use]
    pub fn last_id(&self) -> Option<ExchangeId> {
        self.sent.last().map(|(id, _)| *id)
    }

    /// Most recent request whose query carries `name=value`.
    #[must_use]
    pub fn last_with_param(&self, name: &str, value: &str) -> Option<(ExchangeId, &HttpRequest)> {
        self.sent
            .iter()
            .rev()
            .find(|(_, request)| request.query_param(name).as_deref() == Some(value))
            .map(|(id, request)| (*id, request))
    }

    /// Most recent POST.
    #[must_use]
    pub fn last_post(&self) -> Option<(ExchangeId, &HttpRequest)> {
        self.sent
            .iter()
            .rev()
            .find(|(_, request)| request.method == Method::Post)
            .map(|(id, request)| (*id, request))
    }

    /// Requests whose query carries `name=value`, in order.
    #[must_use]
    pub fn all_with_param(&self, name: &str, value: &str) -> Vec<(ExchangeId, &HttpRequest)> {
        self.sent
            .iter()
            .filter(|(_, request)| request.query_param(name).as_deref() == Some(value))
            .map(|(id, request)| (*id, request))
            .collect()
    }

    /// Whether `id` was aborted.
    #[must_use]
    pub fn was_aborted(&self, id: ExchangeId) -> bool {
        self.aborted.contains(&id)
    }

    /// Number of aborted requests.
    #[must_use]
    pub fn aborted_count(&self) -> usize {
        self.aborted.len()
    }
}

impl HttpTransport for MockTransport {
    fn send(&mut self, id: ExchangeId, request: HttpRequest) {
        self.by_id.insert(id, self.sent.len());
        self.sent.push((id, request));
    }

    fn abort(&mut self, id: ExchangeId) {
        self.aborted.insert(id);
    }
}

/// A recorded handler callback.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerEvent {
    /// `opened`
    Opened,
    /// `closed`, with map ids
    Closed {
        /// Pending map ids
        pending: Vec<u64>,
        /// Undelivered map ids
        undelivered: Vec<u64>,
    },
    /// `error`
    Error(ChannelError),
    /// `message_received`
    Message(Value),
    /// `batch_received`
    Batch(Vec<Value>),
    /// `maps_delivered`, with map ids
    Delivered(Vec<u64>),
    /// `bad_map`
    BadMap(u64),
}

/// Handler that records callbacks and answers hooks from its fields.
#[derive(Debug)]
pub struct RecordingHandler {
    /// Recorded callbacks
    pub events: Vec<HandlerEvent>,
    /// Answer for `ok_to_make_request`
    pub gate: Result<(), ChannelError>,
    /// Answer for `is_active`
    pub active: bool,
    /// Answer for `is_online`
    pub online: bool,
    /// Answer for `additional_query_params`
    pub extra_params: Vec<(String, String)>,
    /// Answer for `network_test_probe_target`
    pub probe_target: Option<Url>,
}

impl Default for RecordingHandler {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            gate: Ok(()),
            active: true,
            online: true,
            extra_params: Vec::new(),
            probe_target: None,
        }
    }
}

impl RecordingHandler {
    /// Handler with default answers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages received, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<&Value> {
        self.events
            .iter()
            .filter_map(|event| match event {
                HandlerEvent::Message(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Errors reported, in order.
    #[must_use]
    pub fn errors(&self) -> Vec<ChannelError> {
        self.events
            .iter()
            .filter_map(|event| match event {
                HandlerEvent::Error(error) => Some(*error),
                _ => None,
            })
            .collect()
    }

    /// Number of `closed` callbacks.
    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, HandlerEvent::Closed { .. }))
            .count()
    }
}

fn ids(maps: &[QueuedMap]) -> Vec<u64> {
    maps.iter().map(|map| map.map_id).collect()
}

impl ChannelHandler for RecordingHandler {
    fn opened(&mut self) {
        self.events.push(HandlerEvent::Opened);
    }

    fn closed(&mut self, pending: Vec<QueuedMap>, undelivered: Vec<QueuedMap>) {
        self.events.push(HandlerEvent::Closed {
            pending: ids(&pending),
            undelivered: ids(&undelivered),
        });
    }

    fn error(&mut self, error: ChannelError) {
        self.events.push(HandlerEvent::Error(error));
    }

    fn message_received(&mut self, payload: Value) {
        self.events.push(HandlerEvent::Message(payload));
    }

    fn batch_received(&mut self, payloads: Vec<Value>) {
        self.events.push(HandlerEvent::Batch(payloads));
    }

    fn maps_delivered(&mut self, maps: &[QueuedMap]) {
        self.events.push(HandlerEvent::Delivered(ids(maps)));
    }

    fn bad_map(&mut self, map: &QueuedMap) {
        self.events.push(HandlerEvent::BadMap(map.map_id));
    }

    fn ok_to_make_request(&mut self) -> Result<(), ChannelError> {
        self.gate
    }

    fn additional_query_params(&mut self) -> Vec<(String, String)> {
        self.extra_params.clone()
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn is_online(&self) -> bool {
        self.online
    }

    fn network_test_probe_target(&self) -> Option<Url> {
        self.probe_target.clone()
    }
}

/// Test driving on a virtual clock.
impl<H: ChannelHandler> ChannelEngine<MockTransport, VirtualScheduler, H> {
    /// Fire every timer due within `by`, in deadline order, moving the
    /// clock to each deadline, then leave the clock at `now + by`.
    pub fn advance(&mut self, by: Duration) {
        let limit = self.scheduler().now() + by;
        while let Some((timer, deadline)) = self.scheduler_mut().pop_due(limit) {
            self.scheduler_mut().set_now(deadline);
            self.handle_timer(timer);
        }
        self.scheduler_mut().set_now(limit);
    }

    /// Fire every timer already due, including zero-delay timers armed
    /// while doing so.
    pub fn run_due(&mut self) {
        self.advance(Duration::ZERO);
    }

    /// Deliver a full successful response in one go.
    pub fn respond(&mut self, id: ExchangeId, status: u16, body: &[u8]) {
        self.handle_http_event(
            id,
            HttpEvent::Head {
                status,
                headers: Vec::new(),
            },
        );
        if !body.is_empty() {
            self.handle_http_event(id, HttpEvent::Data(body.to_vec()));
        }
        self.handle_http_event(id, HttpEvent::Complete);
    }
}

/// Frame `payloads` as a chunked body.
#[must_use]
pub fn chunked(payloads: &[&str]) -> Vec<u8> {
    payloads
        .iter()
        .flat_map(|payload| format!("{}\n{}", payload.len(), payload).into_bytes())
        .collect()
}

/// Test URL used by [`connect_request`].
pub const TEST_URL: &str = "http://example.com/channel/test";

/// Channel URL used by [`connect_request`].
pub const CHANNEL_URL: &str = "http://example.com/channel/bind";

/// Engine wired to the deterministic collaborators.
pub type TestEngine = ChannelEngine<MockTransport, VirtualScheduler, RecordingHandler>;

fn seeded(config: ChannelConfig) -> ChannelConfig {
    if config.rng_seed.is_some() {
        config
    } else {
        config.with_rng_seed(7)
    }
}

/// Engine that runs the full connection test on connect.
#[must_use]
pub fn probing_engine(config: ChannelConfig) -> TestEngine {
    ChannelEngine::new(
        seeded(config),
        MockTransport::new(),
        VirtualScheduler::new(),
        RecordingHandler::new(),
    )
}

/// Engine whose connection test is answered from an unbuffered cache, so
/// `connect` goes straight to the handshake.
#[must_use]
pub fn test_engine(config: ChannelConfig) -> TestEngine {
    probing_engine(config).with_connection_state(ConnectionState::assumed_unbuffered())
}

/// Connect request for [`TEST_URL`] and [`CHANNEL_URL`].
///
/// # Panics
///
/// Never; both URLs are valid.
#[must_use]
pub fn connect_request() -> ConnectRequest {
    ConnectRequest::new(TEST_URL, CHANNEL_URL).expect("static test URLs parse")
}

/// Chunked handshake response opening session `sid`.
#[must_use]
pub fn handshake_body(sid: &str) -> Vec<u8> {
    chunked(&[&format!("[[0,[\"c\",\"{sid}\",null,8]]]")])
}

/// Connect an engine built by [`test_engine`], answer the handshake with
/// session `sid` and return the back-channel exchange.
///
/// # Panics
///
/// Panics when the engine does not follow the expected open sequence.
pub fn open_with_cached_test(engine: &mut TestEngine, sid: &str) -> ExchangeId {
    engine.connect(connect_request()).expect("engine is in INIT");
    engine.run_due();
    let (handshake, _) = engine.transport().last_post().expect("handshake sent");
    engine.respond(handshake, 200, &handshake_body(sid));
    engine.run_due();
    let (back, _) = engine
        .transport()
        .last_with_param("RID", "rpc")
        .expect("back channel started");
    back
}
