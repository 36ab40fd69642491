//! Response handling: frame dispatch, forward acks and request outcomes.

use std::time::Duration;

use super::{Channel, ChannelEngine, ChannelState, ForwardBatch};
use crate::error::{ChannelError, RequestError};
use crate::exchange::HttpExchange;
use crate::handler::ChannelHandler;
use crate::transport::{ExchangeId, HttpTransport, Scheduler, with_param};
use crate::value::{ACK_DECODE_DEPTH, FRAME_DECODE_DEPTH, Value, decode_array};
use crate::{HTTP_SESSION_ID_HEADER, WIRE_PROTOCOL_HEADER};

/// Back-channel watchdog as a multiple of the server's keep-alive interval.
const KEEPALIVE_TIMEOUT_FACTOR: f64 = 1.5;

/// Split `[arrayId, payload]`.
fn parse_frame(frame: Value) -> Option<(u64, Value)> {
    let Value::Sequence(items) = frame else {
        return None;
    };
    let mut items = items.into_iter();
    let array_id = items.next()?.as_i64().and_then(|id| u64::try_from(id).ok())?;
    let payload = items.next()?;
    Some((array_id, payload))
}

impl<T, S, H> ChannelEngine<T, S, H>
where
    T: HttpTransport,
    S: Scheduler,
    H: ChannelHandler,
{
    pub(super) fn on_request_data(&mut self, channel: Channel, id: ExchangeId, text: &str) {
        let is_handshake = self.handshake_exchange == Some(id);
        if channel == Channel::Forward && !is_handshake && self.state == ChannelState::Opened {
            if text.trim().is_empty() {
                return;
            }
            match decode_array(text, ACK_DECODE_DEPTH) {
                Ok(values) if values.len() == 3 => self.handle_post_response(id, &values),
                Ok(values) => {
                    tracing::warn!("{} ack has {} elements, expected 3", id, values.len());
                    self.signal_error(ChannelError::BadResponse);
                }
                Err(error) => {
                    tracing::warn!("{} undecodable ack: {}", id, error);
                    self.signal_error(ChannelError::BadResponse);
                }
            }
            return;
        }

        if channel == Channel::Back {
            self.clear_dead_back_channel_check();
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match decode_array(text, FRAME_DECODE_DEPTH) {
            Ok(frames) => self.on_input(channel, id, frames),
            Err(error) => {
                tracing::warn!("{} undecodable frames: {}", id, error);
                self.signal_error(ChannelError::BadResponse);
            }
        }
    }

    fn on_input(&mut self, channel: Channel, id: ExchangeId, frames: Vec<Value>) {
        let mut batch = Vec::new();

        for frame in frames {
            if self.state == ChannelState::Closed || !self.is_current(channel, id) {
                return;
            }
            let Some((array_id, payload)) = parse_frame(frame) else {
                if self.state == ChannelState::Opening {
                    tracing::warn!("{} malformed frame during handshake", id);
                    self.signal_error(ChannelError::BadResponse);
                    return;
                }
                tracing::warn!("{} skipping malformed frame", id);
                continue;
            };
            self.record_array_id(array_id);

            match self.state {
                ChannelState::Opening => match payload.leading_text() {
                    Some("c") => {
                        if !self.on_handshake(id, &payload) {
                            return;
                        }
                    }
                    Some("stop" | "close") => {
                        self.signal_error(ChannelError::Stop);
                        return;
                    }
                    _ => tracing::debug!("{} ignoring frame {} before handshake", id, array_id),
                },
                ChannelState::Opened => {
                    match payload.leading_text() {
                        Some("stop") => {
                            self.flush_batch(&mut batch);
                            self.signal_error(ChannelError::Stop);
                            return;
                        }
                        Some("close") => {
                            self.flush_batch(&mut batch);
                            self.disconnect();
                            return;
                        }
                        Some("noop") => {}
                        _ if self.config.batch_delivery => batch.push(payload),
                        _ => self.handler.message_received(payload),
                    }
                    self.back_retry_count = 0;
                }
                ChannelState::Init | ChannelState::Closed => return,
            }
        }

        self.flush_batch(&mut batch);
    }

    fn flush_batch(&mut self, batch: &mut Vec<Value>) {
        if !batch.is_empty() {
            self.handler.batch_received(std::mem::take(batch));
        }
    }

    /// Array ids never move backwards; duplicates are still dispatched.
    fn record_array_id(&mut self, array_id: u64) {
        match self.last_array_id {
            Some(last) if array_id <= last => {
                tracing::debug!("array id {} does not advance past {}", array_id, last);
            }
            _ => self.last_array_id = Some(array_id),
        }
    }

    /// `["c", sid, hostPrefix, version, serverVersion, keepAliveMs]`.
    fn on_handshake(&mut self, id: ExchangeId, payload: &Value) -> bool {
        let items = payload.as_sequence().unwrap_or_default();
        let Some(sid) = items.get(1).and_then(Value::as_str) else {
            tracing::warn!("{} handshake without session id", id);
            self.signal_error(ChannelError::BadResponse);
            return false;
        };
        self.session.sid = Some(sid.to_string());

        if let Some(version) = items
            .get(3)
            .and_then(Value::as_i64)
            .and_then(|v| u32::try_from(v).ok())
        {
            self.session.channel_version = version;
        }
        self.session.server_version = items.get(4).and_then(Value::as_i64);
        if let Some(keepalive) = items.get(5).and_then(Value::as_i64).filter(|ms| *ms > 0) {
            let keepalive = Duration::from_millis(keepalive.unsigned_abs());
            self.back_channel_timeout = Some(keepalive.mul_f64(KEEPALIVE_TIMEOUT_FACTOR));
        }

        if self.config.background_channel_test {
            self.apply_control_headers(id);
        }

        self.state = ChannelState::Opened;
        tracing::info!(
            "channel opened, sid={} version={} server={:?}",
            sid,
            self.session.channel_version,
            self.session.server_version
        );
        self.handler.opened();

        if let Some(channel_url) = self.channel_url.clone() {
            self.back_url = Some(self.data_url(channel_url));
        }
        self.ensure_back_channel();
        true
    }

    /// Read the wire protocol and HTTP session id from the handshake response.
    fn apply_control_headers(&mut self, id: ExchangeId) {
        let Some(exchange) = self.pool.get(id) else {
            return;
        };
        let protocol = exchange.response_header(WIRE_PROTOCOL_HEADER).map(str::to_string);
        let session_id = exchange.response_header(HTTP_SESSION_ID_HEADER).map(str::to_string);

        if let Some(protocol) = protocol {
            self.pool.apply_client_protocol(&protocol);
        }
        if let (Some(param), Some(session_id)) =
            (self.config.http_session_id_param.clone(), session_id)
        {
            tracing::debug!("http session id {}", session_id);
            self.forward_url = self
                .forward_url
                .take()
                .map(|url| with_param(url, &param, &session_id));
            self.session.http_session_id = Some(session_id);
        }
    }

    /// `[ackFlag, lastPostResponseArrayId, outstandingBytes]`.
    fn handle_post_response(&mut self, id: ExchangeId, values: &[Value]) {
        let Some(flag) = values[0].as_i64() else {
            tracing::warn!("{} ack flag is not a number", id);
            self.signal_error(ChannelError::BadResponse);
            return;
        };
        if flag == 0 {
            let forward_start = self.pool.get(id).and_then(HttpExchange::start_time);
            self.handle_backchannel_missing(forward_start);
            return;
        }

        if let Some(acked) = values[1].as_i64().and_then(|v| u64::try_from(v).ok()) {
            self.last_post_response_array_id = Some(
                self.last_post_response_array_id
                    .map_or(acked, |last| last.max(acked)),
            );
        }

        if !self.use_chunked || self.back_retry_count != 0 || self.dead_back_timer.is_some() {
            return;
        }
        let acked = self.last_post_response_array_id.map_or(-1, array_id_as_i64);
        let consumed = self.last_array_id.map_or(-1, array_id_as_i64);
        let outstanding_bytes = values[2].as_i64().unwrap_or(0);
        if acked - consumed > 0
            && outstanding_bytes < i64::try_from(self.config.outstanding_bytes_cutoff).unwrap_or(i64::MAX)
        {
            tracing::debug!(
                "{} server flushed {} arrays not yet seen, checking back channel",
                id,
                acked - consumed
            );
            self.arm_dead_back_channel_check();
        }
    }

    pub(super) fn on_request_complete(
        &mut self,
        channel: Channel,
        id: ExchangeId,
        result: Result<(), RequestError>,
    ) {
        let (exchange, batch) = match channel {
            Channel::Forward => (self.pool.remove(id), self.forward_batches.remove(&id)),
            Channel::Back => (self.back_channel.take(), None),
        };
        let Some(exchange) = exchange else {
            return;
        };
        // The dead check watches this back channel only
        if channel == Channel::Back {
            self.clear_dead_back_channel_check();
        }
        let was_handshake = self.handshake_exchange == Some(id);
        if was_handshake {
            self.handshake_exchange = None;
        }
        if let Some(status) = exchange.status() {
            self.last_status_code = Some(status);
        }

        match result {
            Ok(()) => self.on_request_success(channel, &exchange, batch, was_handshake),
            Err(error) => self.on_request_failure(channel, &exchange, batch, error),
        }
    }

    fn on_request_success(
        &mut self,
        channel: Channel,
        exchange: &HttpExchange,
        batch: Option<ForwardBatch>,
        was_handshake: bool,
    ) {
        match channel {
            Channel::Forward => {
                if was_handshake && self.state == ChannelState::Opening {
                    tracing::warn!("{} handshake finished without a session", exchange.id());
                    self.signal_error(ChannelError::BadResponse);
                    return;
                }
                let rtt = exchange
                    .start_time()
                    .map(|start| self.io.now().saturating_duration_since(start));
                tracing::debug!(
                    "{} forward complete: rtt={:?} size={} retries={}",
                    exchange.id(),
                    rtt,
                    exchange.request_size(),
                    self.forward_retry_count
                );

                let map_ids = batch.map(|b| b.map_ids).unwrap_or_default();
                self.ensure_forward_channel();
                self.remove_delivered(&map_ids);
            }
            Channel::Back => self.ensure_back_channel(),
        }
    }

    pub(super) fn on_request_failure(
        &mut self,
        channel: Channel,
        exchange: &HttpExchange,
        batch: Option<ForwardBatch>,
        error: RequestError,
    ) {
        tracing::debug!("{} {:?} channel request failed: {}", exchange.id(), channel, error);
        let error = match error {
            RequestError::Status(0) if !self.handler.is_online() => RequestError::BrowserOffline,
            other => other,
        };
        if !error.is_fatal() {
            let retried = match channel {
                Channel::Forward => self.maybe_retry_forward_channel(batch.unwrap_or_default()),
                Channel::Back => self.maybe_retry_back_channel(),
            };
            if retried {
                return;
            }
        }

        tracing::info!("{:?} channel giving up: {}", channel, error);
        self.signal_error(error.to_channel_error());
    }

    fn remove_delivered(&mut self, map_ids: &[u64]) {
        if map_ids.is_empty() {
            return;
        }
        let (delivered, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|queued| map_ids.contains(&queued.map_id));
        self.pending = kept;
        self.handler.maps_delivered(&delivered);
    }
}

fn array_id_as_i64(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}
