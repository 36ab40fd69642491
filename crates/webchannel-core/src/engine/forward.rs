//! Forward channel: the handshake POST and batched map delivery.

use rand::Rng;
use url::Url;

use super::{ChannelEngine, ChannelState, ForwardBatch, ForwardTimer};
use crate::HTTP_SESSION_ID_HEADER;
use crate::codec::encode_message_queue;
use crate::exchange::HttpExchange;
use crate::handler::ChannelHandler;
use crate::transport::{HttpTransport, Scheduler, TimerId, with_param};

impl<T, S, H> ChannelEngine<T, S, H>
where
    T: HttpTransport,
    S: Scheduler,
    H: ChannelHandler,
{
    /// Arm a zero-delay dispatch so bursts of `send_map` share one request.
    pub(super) fn ensure_forward_channel(&mut self) {
        if self.state == ChannelState::Closed
            || self.pool.is_full()
            || self.forward_timer.is_some()
        {
            return;
        }
        let id = TimerId::ForwardChannel(self.next_generation());
        self.io.scheduler.schedule(id, std::time::Duration::ZERO);
        self.forward_timer = Some(ForwardTimer { id, retry: None });
        self.forward_retry_count = 0;
    }

    pub(super) fn start_forward_channel(&mut self, retry: Option<ForwardBatch>) {
        if !self.ok_to_make_request() {
            return;
        }

        match self.state {
            ChannelState::Init => {
                self.open(None);
                self.state = ChannelState::Opening;
                tracing::debug!("state {} -> {}", ChannelState::Init, self.state);
            }
            ChannelState::Opening => {
                if let Some(retry) = retry {
                    self.open(Some(retry));
                }
            }
            ChannelState::Opened => {
                if retry.is_some() {
                    self.make_forward_channel_request(retry);
                } else if !self.outgoing.is_empty() && !self.pool.is_full() {
                    self.make_forward_channel_request(None);
                }
            }
            ChannelState::Closed => {}
        }
    }

    /// Send the handshake POST, carrying whatever is already queued.
    fn open(&mut self, retry: Option<ForwardBatch>) {
        let Some(base) = self.forward_url.clone() else {
            return;
        };
        let rid = self.take_rid(retry);
        tracing::info!("opening channel, rid={}", rid);

        let mut url = with_param(base, "RID", &rid.to_string());
        if self.config.client_version > 0 {
            url = with_param(url, "CVER", &self.config.client_version.to_string());
        }
        if self.config.background_channel_test {
            if let Some(param) = self.config.http_session_id_param.clone() {
                url = with_param(url, HTTP_SESSION_ID_HEADER, &param);
            }
        }
        let url = self.with_additional_params(url);

        let mut headers = self.base_headers();
        headers.extend(self.config.init_message_headers.iter().cloned());

        let timeout = self.config.watchdog_timeout;
        if let Some(id) = self.dispatch_forward(rid, url, headers, timeout) {
            self.handshake_exchange = Some(id);
        }
    }

    /// Send queued maps, or resend a failed batch under its original `RID`.
    fn make_forward_channel_request(&mut self, retry: Option<ForwardBatch>) {
        let (Some(base), Some(sid)) = (self.forward_url.clone(), self.session.sid.clone()) else {
            return;
        };
        let rid = self.take_rid(retry);

        let url = with_param(base, "SID", &sid);
        let url = with_param(url, "RID", &rid.to_string());
        let url = with_param(url, "AID", &self.aid_param());
        let url = self.with_additional_params(url);

        let timeout = self.forward_request_timeout();
        let headers = self.base_headers();
        self.dispatch_forward(rid, url, headers, timeout);
    }

    /// Reuse a retried batch's request id after putting its maps back in
    /// the queue, or allocate a new one.
    fn take_rid(&mut self, retry: Option<ForwardBatch>) -> u64 {
        match retry {
            Some(batch) => {
                self.requeue(&batch.map_ids);
                batch.rid
            }
            None => self.allocate_rid(),
        }
    }

    fn dispatch_forward(
        &mut self,
        rid: u64,
        url: Url,
        headers: Vec<(String, String)>,
        timeout: std::time::Duration,
    ) -> Option<crate::transport::ExchangeId> {
        if self.pool.is_full() {
            tracing::warn!("forward pool full, deferring rid={}", rid);
            return None;
        }

        let (body, map_ids) = self.dequeue_outgoing_maps();
        let id = self.io.allocate_exchange();
        let mut exchange = HttpExchange::new(id, rid.to_string(), self.forward_retry_count + 1)
            .with_timeout(timeout)
            .with_headers(headers);
        exchange.post(&mut self.io, url, body);

        if let Err(mut rejected) = self.pool.add(exchange) {
            rejected.cancel(&mut self.io);
            self.requeue(&map_ids);
            return None;
        }
        self.forward_batches.insert(id, ForwardBatch { rid, map_ids });
        Some(id)
    }

    /// Watchdog for a data POST: between half and all of the configured timeout.
    fn forward_request_timeout(&mut self) -> std::time::Duration {
        let full = self.config.forward_request_timeout;
        let half = full / 2;
        let span = u64::try_from((full - half).as_millis()).unwrap_or(u64::MAX);
        if span == 0 {
            return full;
        }
        half + std::time::Duration::from_millis(self.rng.gen_range(0..span))
    }

    /// Move up to one batch of maps from `outgoing` to `pending` and encode them.
    ///
    /// Maps the codec cannot write are reported through `bad_map` and dropped.
    pub(super) fn dequeue_outgoing_maps(&mut self) -> (String, Vec<u64>) {
        let count = self.outgoing.len().min(self.config.max_maps_per_request);
        let batch: Vec<_> = self.outgoing.drain(..count).collect();
        let encoded = encode_message_queue(&batch, count);

        let mut map_ids = Vec::with_capacity(batch.len());
        for queued in batch {
            if encoded.skipped.contains(&queued.map_id) {
                self.handler.bad_map(&queued);
            } else {
                map_ids.push(queued.map_id);
                self.pending.push(queued);
            }
        }
        (encoded.body, map_ids)
    }

    /// Move maps back from `pending` to the front of `outgoing`, keeping
    /// map-id order.
    pub(super) fn requeue(&mut self, map_ids: &[u64]) {
        if map_ids.is_empty() {
            return;
        }
        let (back, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|queued| map_ids.contains(&queued.map_id));
        self.pending = kept;

        tracing::debug!("requeueing {} maps", back.len());
        let mut outgoing: Vec<_> = back
            .into_iter()
            .chain(std::mem::take(&mut self.outgoing))
            .collect();
        outgoing.sort_by_key(|queued| queued.map_id);
        self.outgoing = outgoing.into();
    }

    /// Arm a retry of a failed forward request. False when out of budget.
    pub(super) fn maybe_retry_forward_channel(&mut self, batch: ForwardBatch) -> bool {
        if self.pool.is_full() {
            return false;
        }
        if let Some(timer) = &self.forward_timer {
            if timer.retry.is_some() {
                return false;
            }
            // A plain dispatch is superseded by the retry, which carries
            // the queue with it
            self.io.scheduler.cancel(timer.id);
            self.forward_timer = None;
        }

        let max_retries = self.config.effective_forward_retries();
        if self.state == ChannelState::Init || self.forward_retry_count >= max_retries {
            return false;
        }

        let delay = self.retry_delay(self.forward_retry_count);
        let id = TimerId::ForwardChannel(self.next_generation());
        self.io.scheduler.schedule(id, delay);
        self.forward_timer = Some(ForwardTimer {
            id,
            retry: Some(batch),
        });
        self.forward_retry_count += 1;
        tracing::info!(
            "retrying forward channel in {:?} (retry {} of {})",
            delay,
            self.forward_retry_count,
            max_retries
        );
        true
    }
}
