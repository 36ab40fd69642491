//! Two-stage connection test.
//!
//! Stage 1 (`MODE=init`) checks that the test endpoint answers with a
//! decodable array and picks up the control headers. Stage 2
//! (`TYPE=xmlhttp`) asks the server for `"11111"` followed later by more
//! data: seeing `"11111"` on its own while the response is still open proves
//! that nothing between client and server buffers responses.
//!
//! Either stage is skipped when [`ConnectionState`] already holds its result.

use url::Url;

use crate::error::RequestError;
use crate::exchange::{ExchangeOutput, HttpExchange};
use crate::state::ConnectionState;
use crate::transport::{ExchangeId, HttpEvent, HttpTransport, Io, Scheduler, with_param};
use crate::value::{ACK_DECODE_DEPTH, decode_array};
use crate::{HTTP_SESSION_ID_HEADER, WIRE_PROTOCOL_HEADER};

/// What stage 2 expects to see while the response is still open.
pub const UNBUFFERED_PROBE_BODY: &str = "11111";

/// Request id placeholder used by probe requests.
const PROBE_RID: &str = "0";

/// Result of the connection test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    /// The test finished; `use_chunked` is false behind a buffering proxy
    Finished {
        /// Whether back channels may stream
        use_chunked: bool,
    },

    /// A stage failed
    Failed(RequestError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Init,
    ConnectionTesting,
    Done,
}

/// Runs the buffering-proxy probe for one connection attempt.
#[derive(Debug)]
pub struct ConnectionTester {
    stage: Stage,
    exchange: Option<HttpExchange>,
    headers: Vec<(String, String)>,
    http_session_id_param: Option<String>,
    stage2_url: Option<Url>,
    received_intermediate: bool,
    last_body: String,
    last_status: Option<u16>,
    client_protocol: Option<String>,
    http_session_id: Option<String>,
}

impl ConnectionTester {
    /// Create a tester that sends `headers` on every probe.
    #[must_use]
    pub fn new(headers: Vec<(String, String)>, http_session_id_param: Option<String>) -> Self {
        Self {
            stage: Stage::Idle,
            exchange: None,
            headers,
            http_session_id_param,
            stage2_url: None,
            received_intermediate: false,
            last_body: String::new(),
            last_status: None,
            client_protocol: None,
            http_session_id: None,
        }
    }

    /// Start the test against `test_url`.
    ///
    /// Returns the outcome directly when `state` already holds both results.
    pub fn connect<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        state: &mut ConnectionState,
        test_url: Url,
    ) -> Option<TestOutcome> {
        self.stage2_url = Some(test_url.clone());

        if state.handshake_result.is_some() {
            tracing::debug!("connection test: reusing cached stage 1 result");
            return self.check_buffering_proxy(io, state);
        }

        self.stage = Stage::Init;
        let mut url = with_param(test_url, "MODE", "init");
        if let Some(param) = &self.http_session_id_param {
            url = with_param(url, HTTP_SESSION_ID_HEADER, param);
        }
        let mut exchange = HttpExchange::new(io.allocate_exchange(), PROBE_RID, 1)
            .with_headers(self.headers.clone());
        exchange.get(io, url, false, false);
        self.exchange = Some(exchange);
        None
    }

    fn check_buffering_proxy<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        state: &ConnectionState,
    ) -> Option<TestOutcome> {
        if let Some(buffered) = state.buffering_proxy_result {
            tracing::debug!("connection test: reusing cached buffering result {}", buffered);
            self.stage = Stage::Done;
            return Some(TestOutcome::Finished {
                use_chunked: !buffered,
            });
        }

        let Some(base) = self.stage2_url.clone() else {
            self.stage = Stage::Done;
            return Some(TestOutcome::Failed(RequestError::BadData));
        };
        self.stage = Stage::ConnectionTesting;
        self.received_intermediate = false;
        let mut url = with_param(base, "TYPE", "xmlhttp");
        if let (Some(param), Some(id)) = (&self.http_session_id_param, &self.http_session_id) {
            url = with_param(url, param, id);
        }
        let mut exchange = HttpExchange::new(io.allocate_exchange(), PROBE_RID, 1)
            .with_headers(self.headers.clone());
        exchange.get(io, url, false, true);
        self.exchange = Some(exchange);
        None
    }

    /// Whether `id` is the probe currently in flight.
    #[must_use]
    pub fn owns(&self, id: ExchangeId) -> bool {
        self.exchange.as_ref().is_some_and(|e| e.id() == id)
    }

    /// Feed a transport event for the probe exchange.
    pub fn on_event<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        state: &mut ConnectionState,
        id: ExchangeId,
        event: HttpEvent,
    ) -> Option<TestOutcome> {
        let exchange = self.exchange.as_mut().filter(|e| e.id() == id)?;
        let outputs = exchange.on_event(io, event);
        self.process(io, state, outputs)
    }

    /// Handle a watchdog fire for the probe exchange.
    pub fn on_watchdog<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        state: &mut ConnectionState,
        id: ExchangeId,
    ) -> Option<TestOutcome> {
        let exchange = self.exchange.as_mut().filter(|e| e.id() == id)?;
        let output = exchange.on_watchdog(io)?;
        self.process(io, state, vec![output])
    }

    fn process<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        state: &mut ConnectionState,
        outputs: Vec<ExchangeOutput>,
    ) -> Option<TestOutcome> {
        for output in outputs {
            let outcome = match output {
                ExchangeOutput::Data(text) => self.on_data(io, state, text),
                ExchangeOutput::Complete(result) => self.on_complete(io, state, result),
            };
            if outcome.is_some() {
                return outcome;
            }
        }
        None
    }

    fn on_data<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        state: &mut ConnectionState,
        text: String,
    ) -> Option<TestOutcome> {
        match self.stage {
            Stage::Init => {
                self.last_body = text;
                None
            }
            Stage::ConnectionTesting => {
                if !self.received_intermediate && text == UNBUFFERED_PROBE_BODY {
                    tracing::debug!("connection test: early data, path is unbuffered");
                    self.received_intermediate = true;
                    self.last_status = Some(200);
                    if let Some(mut exchange) = self.exchange.take() {
                        exchange.cancel(io);
                    }
                    state.buffering_proxy_result = Some(false);
                    self.stage = Stage::Done;
                    return Some(TestOutcome::Finished { use_chunked: true });
                }
                self.received_intermediate = false;
                None
            }
            Stage::Idle | Stage::Done => None,
        }
    }

    fn on_complete<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        state: &mut ConnectionState,
        result: Result<(), RequestError>,
    ) -> Option<TestOutcome> {
        let exchange = self.exchange.take()?;
        self.last_status = exchange.status();

        if let Err(error) = result {
            tracing::debug!("connection test failed in {:?}: {}", self.stage, error);
            self.stage = Stage::Done;
            return Some(TestOutcome::Failed(error));
        }

        match self.stage {
            Stage::Init => {
                self.client_protocol = exchange.response_header(WIRE_PROTOCOL_HEADER).map(str::to_string);
                self.http_session_id = exchange.response_header(HTTP_SESSION_ID_HEADER).map(str::to_string);

                let body = std::mem::take(&mut self.last_body);
                let decoded = if body.trim().is_empty() {
                    None
                } else {
                    decode_array(&body, ACK_DECODE_DEPTH)
                        .map_err(|e| tracing::warn!("connection test: undecodable stage 1 response: {}", e))
                        .ok()
                };
                let Some(decoded) = decoded else {
                    self.stage = Stage::Done;
                    return Some(TestOutcome::Failed(RequestError::BadData));
                };
                state.handshake_result = Some(decoded);
                self.check_buffering_proxy(io, state)
            }
            Stage::ConnectionTesting => {
                let buffered = !self.received_intermediate;
                tracing::debug!("connection test: buffering proxy {}", buffered);
                state.buffering_proxy_result = Some(buffered);
                self.stage = Stage::Done;
                Some(TestOutcome::Finished {
                    use_chunked: !buffered,
                })
            }
            Stage::Idle | Stage::Done => None,
        }
    }

    /// Abort the probe in flight, if any.
    pub fn abort<T: HttpTransport, S: Scheduler>(&mut self, io: &mut Io<T, S>) {
        if let Some(mut exchange) = self.exchange.take() {
            exchange.cancel(io);
        }
        self.stage = Stage::Done;
    }

    /// Wire protocol echoed by the stage 1 response.
    #[must_use]
    pub fn client_protocol(&self) -> Option<&str> {
        self.client_protocol.as_deref()
    }

    /// HTTP session id assigned by the stage 1 response.
    #[must_use]
    pub fn http_session_id(&self) -> Option<&str> {
        self.http_session_id.as_deref()
    }

    /// Status of the last probe response.
    #[must_use]
    pub fn last_status_code(&self) -> Option<u16> {
        self.last_status
    }
}
