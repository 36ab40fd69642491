//! A single HTTP request attempt.
//!
//! An [`HttpExchange`] is sent once, guarded by a watchdog, and reports its
//! result exactly once as [`ExchangeOutput::Complete`]. Cancelling an
//! exchange suppresses that report; whoever cancels owns the consequences.
//!
//! The watchdog measures inactivity: every transport event pushes the
//! deadline out by the full timeout. A watchdog fire that arrives before the
//! recorded deadline is rearmed for the remainder rather than treated as a
//! timeout.

use std::time::{Duration, Instant};

use url::Url;

use crate::chunk::{Chunk, ChunkDecoder};
use crate::error::RequestError;
use crate::transport::{
    ExchangeId, HttpEvent, HttpRequest, HttpTransport, Io, Method, Scheduler, TimerId, with_param,
};

/// Default watchdog for data requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Body marker the server uses when it no longer knows the session.
pub const UNKNOWN_SID_MARKER: &str = "Unknown SID";

/// What an exchange hands back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutput {
    /// A decoded chunk, or in plain mode the whole body received so far
    Data(String),

    /// The exchange finished; reported once
    Complete(Result<(), RequestError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    InFlight,
    Finished,
    Cancelled,
}

/// One HTTP request attempt and its response processing.
#[derive(Debug)]
pub struct HttpExchange {
    id: ExchangeId,
    rid: String,
    attempt: u32,
    timeout: Duration,
    extra_headers: Vec<(String, String)>,
    method: Option<Method>,
    decode_chunks: bool,
    phase: Phase,
    start_time: Option<Instant>,
    deadline: Option<Instant>,
    status: Option<u16>,
    response_headers: Vec<(String, String)>,
    decoder: ChunkDecoder,
    body: Vec<u8>,
    request_size: usize,
    error: Option<RequestError>,
}

impl HttpExchange {
    /// Create an exchange for request id `rid` on attempt `attempt` (from 1).
    #[must_use]
    pub fn new(id: ExchangeId, rid: impl Into<String>, attempt: u32) -> Self {
        Self {
            id,
            rid: rid.into(),
            attempt,
            timeout: DEFAULT_TIMEOUT,
            extra_headers: Vec::new(),
            method: None,
            decode_chunks: false,
            phase: Phase::Created,
            start_time: None,
            deadline: None,
            status: None,
            response_headers: Vec::new(),
            decoder: ChunkDecoder::new(),
            body: Vec::new(),
            request_size: 0,
            error: None,
        }
    }

    /// Override the watchdog timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Headers sent in addition to the protocol headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.extra_headers = headers;
        self
    }

    /// POST a form body; the response is chunk-framed.
    pub fn post<T: HttpTransport, S: Scheduler>(&mut self, io: &mut Io<T, S>, url: Url, body: String) {
        let mut headers = self.extra_headers.clone();
        headers.push((
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        ));
        self.request_size = body.len();
        self.decode_chunks = true;
        self.send(io, Method::Post, url, Some(body), headers);
    }

    /// GET `url`; `send_close` asks the server not to keep the connection.
    pub fn get<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        url: Url,
        decode_chunks: bool,
        send_close: bool,
    ) {
        let mut headers = self.extra_headers.clone();
        if send_close {
            headers.push(("Connection".to_string(), "close".to_string()));
        }
        self.decode_chunks = decode_chunks;
        self.send(io, Method::Get, url, None, headers);
    }

    fn send<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        method: Method,
        url: Url,
        body: Option<String>,
        headers: Vec<(String, String)>,
    ) {
        if self.phase != Phase::Created {
            tracing::warn!("exchange {} sent twice, ignoring", self.id);
            return;
        }
        let url = with_param(url, "t", &self.attempt.to_string());
        tracing::debug!(
            "{} {} rid={} attempt={} {}",
            self.id,
            method,
            self.rid,
            self.attempt,
            url
        );

        self.method = Some(method);
        self.phase = Phase::InFlight;
        self.start_time = Some(io.now());
        self.arm_watchdog(io);
        io.transport.send(
            self.id,
            HttpRequest {
                method,
                url,
                headers,
                body,
            },
        );
    }

    /// Feed a transport event. Ignored unless the exchange is in flight.
    pub fn on_event<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        event: HttpEvent,
    ) -> Vec<ExchangeOutput> {
        if self.phase != Phase::InFlight {
            return Vec::new();
        }

        match event {
            HttpEvent::Head { status, headers } => {
                self.arm_watchdog(io);
                self.status = Some(status);
                self.response_headers = headers;
                Vec::new()
            }
            HttpEvent::Data(bytes) => {
                self.arm_watchdog(io);
                if self.status != Some(200) {
                    // Kept for error classification at completion
                    self.body.extend_from_slice(&bytes);
                    Vec::new()
                } else if self.decode_chunks {
                    self.decoder.push(&bytes);
                    self.drain_chunks(io)
                } else {
                    self.body.extend_from_slice(&bytes);
                    vec![ExchangeOutput::Data(
                        String::from_utf8_lossy(&self.body).into_owned(),
                    )]
                }
            }
            HttpEvent::Complete => {
                let result = self.classify_completion();
                vec![self.finish(io, result, false)]
            }
            HttpEvent::Failed(reason) => {
                tracing::debug!("{} transport failure: {}", self.id, reason);
                vec![self.finish(io, Err(RequestError::Status(0)), false)]
            }
        }
    }

    fn drain_chunks<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
    ) -> Vec<ExchangeOutput> {
        let mut outputs = Vec::new();
        loop {
            match self.decoder.next_chunk() {
                Chunk::Complete(text) => outputs.push(ExchangeOutput::Data(text)),
                Chunk::Incomplete => break,
                Chunk::Invalid => {
                    tracing::warn!("{} invalid chunk framing", self.id);
                    outputs.push(self.finish(io, Err(RequestError::BadData), true));
                    break;
                }
            }
        }
        outputs
    }

    fn classify_completion(&self) -> Result<(), RequestError> {
        match self.status {
            Some(200) if self.decode_chunks => {
                if self.decoder.total_received() == 0 {
                    Err(RequestError::NoData)
                } else if !self.decoder.is_drained() {
                    Err(RequestError::BadData)
                } else {
                    Ok(())
                }
            }
            Some(200) => Ok(()),
            Some(400) if String::from_utf8_lossy(&self.body).contains(UNKNOWN_SID_MARKER) => {
                Err(RequestError::UnknownSessionId)
            }
            Some(status) => Err(RequestError::Status(status)),
            None => Err(RequestError::Status(0)),
        }
    }

    /// Handle a fire of this exchange's watchdog.
    pub fn on_watchdog<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
    ) -> Option<ExchangeOutput> {
        if self.phase != Phase::InFlight {
            return None;
        }
        let deadline = self.deadline?;
        let now = io.now();
        if now < deadline {
            io.scheduler
                .schedule(TimerId::Watchdog(self.id), deadline - now);
            return None;
        }

        tracing::debug!("{} timed out after {:?}", self.id, self.timeout);
        Some(self.finish(io, Err(RequestError::Timeout), true))
    }

    /// Abort the request. No completion will be reported.
    pub fn cancel<T: HttpTransport, S: Scheduler>(&mut self, io: &mut Io<T, S>) {
        if self.phase != Phase::InFlight {
            return;
        }
        tracing::trace!("{} cancelled", self.id);
        io.transport.abort(self.id);
        io.scheduler.cancel(TimerId::Watchdog(self.id));
        self.deadline = None;
        self.phase = Phase::Cancelled;
    }

    fn finish<T: HttpTransport, S: Scheduler>(
        &mut self,
        io: &mut Io<T, S>,
        result: Result<(), RequestError>,
        abort: bool,
    ) -> ExchangeOutput {
        if abort {
            io.transport.abort(self.id);
        }
        io.scheduler.cancel(TimerId::Watchdog(self.id));
        self.deadline = None;
        self.phase = Phase::Finished;
        if let Err(error) = result {
            tracing::debug!("{} failed: {}", self.id, error);
            self.error = Some(error);
        }
        ExchangeOutput::Complete(result)
    }

    fn arm_watchdog<T: HttpTransport, S: Scheduler>(&mut self, io: &mut Io<T, S>) {
        self.deadline = Some(io.now() + self.timeout);
        io.scheduler
            .schedule(TimerId::Watchdog(self.id), self.timeout);
    }

    /// Exchange id.
    #[must_use]
    pub fn id(&self) -> ExchangeId {
        self.id
    }

    /// Request id (`RID`) this attempt carries.
    #[must_use]
    pub fn rid(&self) -> &str {
        &self.rid
    }

    /// Attempt number sent as `t`.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Method used, once sent.
    #[must_use]
    pub fn method(&self) -> Option<Method> {
        self.method
    }

    /// When the request was sent.
    #[must_use]
    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    /// Response status, once known.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Failure classification, once failed.
    #[must_use]
    pub fn last_error(&self) -> Option<RequestError> {
        self.error
    }

    /// Whether the exchange finished with status 200 and well-formed data.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.phase == Phase::Finished && self.error.is_none()
    }

    /// Whether the request is still outstanding.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.phase == Phase::InFlight
    }

    /// Size of the POST body in bytes.
    #[must_use]
    pub fn request_size(&self) -> usize {
        self.request_size
    }

    /// A response header value (case-insensitive).
    #[must_use]
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, VirtualScheduler};

    fn io() -> Io<MockTransport, VirtualScheduler> {
        Io::new(MockTransport::new(), VirtualScheduler::new())
    }

    fn url() -> Url {
        Url::parse("http://example.com/channel?SID=s").unwrap()
    }

    fn head(status: u16) -> HttpEvent {
        HttpEvent::Head {
            status,
            headers: Vec::new(),
        }
    }

    #[test]
    fn test_request_shape() {
        let mut io = io();
        let id = io.allocate_exchange();
        let mut exchange =
            HttpExchange::new(id, "7", 2).with_headers(vec![("X-A".into(), "1".into())]);
        exchange.post(&mut io, url(), "count=0".into());

        let request = io.transport.request(id).unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.query_param("t").as_deref(), Some("2"));
        assert_eq!(request.query_param("SID").as_deref(), Some("s"));
        assert_eq!(request.header("x-a"), Some("1"));
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(request.body.as_deref(), Some("count=0"));
        assert_eq!(exchange.method(), Some(Method::Post));
        assert_eq!(exchange.request_size(), 7);
        assert!(io.scheduler.is_armed(TimerId::Watchdog(id)));

        let id = io.allocate_exchange();
        let mut exchange = HttpExchange::new(id, "rpc", 1);
        exchange.get(&mut io, url(), true, true);
        let request = io.transport.request(id).unwrap();
        assert_eq!(request.header("connection"), Some("close"));
    }

    #[test]
    fn test_chunked_success() {
        let mut io = io();
        let mut exchange = HttpExchange::new(io.allocate_exchange(), "rpc", 1);
        exchange.get(&mut io, url(), true, false);

        assert!(exchange.on_event(&mut io, head(200)).is_empty());
        let outputs = exchange.on_event(&mut io, HttpEvent::Data(b"3\nabc2\nd".to_vec()));
        assert_eq!(outputs, vec![ExchangeOutput::Data("abc".into())]);
        let outputs = exchange.on_event(&mut io, HttpEvent::Data(b"e".to_vec()));
        assert_eq!(outputs, vec![ExchangeOutput::Data("de".into())]);
        let outputs = exchange.on_event(&mut io, HttpEvent::Complete);
        assert_eq!(outputs, vec![ExchangeOutput::Complete(Ok(()))]);
        assert!(exchange.is_successful());
        assert!(!io.scheduler.is_armed(TimerId::Watchdog(exchange.id())));

        // Late events after completion are ignored
        assert!(exchange.on_event(&mut io, HttpEvent::Complete).is_empty());
    }

    #[test]
    fn test_unknown_sid_classification() {
        let mut io = io();
        let mut exchange = HttpExchange::new(io.allocate_exchange(), "3", 1);
        exchange.post(&mut io, url(), String::new());
        exchange.on_event(&mut io, head(400));
        exchange.on_event(&mut io, HttpEvent::Data(b"Error: Unknown SID".to_vec()));
        let outputs = exchange.on_event(&mut io, HttpEvent::Complete);
        assert_eq!(
            outputs,
            vec![ExchangeOutput::Complete(Err(RequestError::UnknownSessionId))]
        );
        assert_eq!(exchange.last_error(), Some(RequestError::UnknownSessionId));
    }

    #[test]
    fn test_status_and_no_data() {
        let mut io = io();
        let mut exchange = HttpExchange::new(io.allocate_exchange(), "3", 1);
        exchange.post(&mut io, url(), String::new());
        exchange.on_event(&mut io, head(503));
        assert_eq!(
            exchange.on_event(&mut io, HttpEvent::Complete),
            vec![ExchangeOutput::Complete(Err(RequestError::Status(503)))]
        );

        let mut exchange = HttpExchange::new(io.allocate_exchange(), "4", 1);
        exchange.post(&mut io, url(), String::new());
        exchange.on_event(&mut io, head(200));
        assert_eq!(
            exchange.on_event(&mut io, HttpEvent::Complete),
            vec![ExchangeOutput::Complete(Err(RequestError::NoData))]
        );
    }

    #[test]
    fn test_truncated_final_chunk_is_bad_data() {
        let mut io = io();
        let mut exchange = HttpExchange::new(io.allocate_exchange(), "rpc", 1);
        exchange.get(&mut io, url(), true, false);
        exchange.on_event(&mut io, head(200));
        assert!(
            exchange
                .on_event(&mut io, HttpEvent::Data(b"10\nabc".to_vec()))
                .is_empty()
        );
        assert_eq!(
            exchange.on_event(&mut io, HttpEvent::Complete),
            vec![ExchangeOutput::Complete(Err(RequestError::BadData))]
        );
    }

    #[test]
    fn test_malformed_size_aborts() {
        let mut io = io();
        let mut exchange = HttpExchange::new(io.allocate_exchange(), "rpc", 1);
        exchange.get(&mut io, url(), true, false);
        exchange.on_event(&mut io, head(200));
        let outputs = exchange.on_event(&mut io, HttpEvent::Data(b"1\nazz\n".to_vec()));
        assert_eq!(
            outputs,
            vec![
                ExchangeOutput::Data("a".into()),
                ExchangeOutput::Complete(Err(RequestError::BadData)),
            ]
        );
        assert!(io.transport.was_aborted(exchange.id()));
    }

    #[test]
    fn test_plain_mode_accumulates() {
        let mut io = io();
        let mut exchange = HttpExchange::new(io.allocate_exchange(), "0", 1);
        exchange.get(&mut io, url(), false, false);
        exchange.on_event(&mut io, head(200));
        assert_eq!(
            exchange.on_event(&mut io, HttpEvent::Data(b"111".to_vec())),
            vec![ExchangeOutput::Data("111".into())]
        );
        assert_eq!(
            exchange.on_event(&mut io, HttpEvent::Data(b"11".to_vec())),
            vec![ExchangeOutput::Data("11111".into())]
        );
    }

    #[test]
    fn test_watchdog_rearms_before_deadline() {
        let mut io = io();
        let mut exchange = HttpExchange::new(io.allocate_exchange(), "rpc", 1);
        exchange.get(&mut io, url(), true, false);

        io.scheduler.advance(Duration::from_secs(30));
        exchange.on_event(&mut io, head(200));

        // Fire from the original arming is early relative to the new deadline
        io.scheduler.advance(Duration::from_secs(15));
        assert_eq!(exchange.on_watchdog(&mut io), None);
        assert!(exchange.is_in_flight());

        io.scheduler.advance(Duration::from_secs(30));
        assert_eq!(
            exchange.on_watchdog(&mut io),
            Some(ExchangeOutput::Complete(Err(RequestError::Timeout)))
        );
        assert!(io.transport.was_aborted(exchange.id()));
    }

    #[test]
    fn test_cancel_suppresses_completion() {
        let mut io = io();
        let mut exchange = HttpExchange::new(io.allocate_exchange(), "rpc", 1);
        exchange.get(&mut io, url(), true, false);
        exchange.cancel(&mut io);

        assert!(io.transport.was_aborted(exchange.id()));
        assert!(exchange.on_event(&mut io, HttpEvent::Complete).is_empty());
        assert_eq!(exchange.on_watchdog(&mut io), None);
        assert!(!exchange.is_successful());
    }

    #[test]
    fn test_transport_failure_has_no_status() {
        let mut io = io();
        let mut exchange = HttpExchange::new(io.allocate_exchange(), "rpc", 1);
        exchange.get(&mut io, url(), true, false);
        assert_eq!(
            exchange.on_event(&mut io, HttpEvent::Failed("connection refused".into())),
            vec![ExchangeOutput::Complete(Err(RequestError::Status(0)))]
        );
    }
}
