//! Back channel: the long-lived GET carrying server pushes.

use std::time::{Duration, Instant};

use super::{ChannelEngine, ChannelState};
use crate::exchange::HttpExchange;
use crate::handler::ChannelHandler;
use crate::transport::{HttpTransport, Scheduler, TimerId, with_param};

/// `RID` placeholder for back-channel requests.
const BACK_CHANNEL_RID: &str = "rpc";

impl<T, S, H> ChannelEngine<T, S, H>
where
    T: HttpTransport,
    S: Scheduler,
    H: ChannelHandler,
{
    pub(super) fn ensure_back_channel(&mut self) {
        if self.back_channel.is_some() || self.back_timer.is_some() {
            return;
        }
        self.back_attempt_id = 1;
        self.back_retry_count = 0;
        let id = TimerId::BackChannel(self.next_generation());
        self.io.scheduler.schedule(id, Duration::ZERO);
        self.back_timer = Some(id);
    }

    pub(super) fn start_back_channel(&mut self) {
        if self.state != ChannelState::Opened || !self.ok_to_make_request() {
            return;
        }
        let (Some(base), Some(sid)) = (self.back_url.clone(), self.session.sid.clone()) else {
            return;
        };

        let url = with_param(base, "RID", BACK_CHANNEL_RID);
        let url = with_param(url, "SID", &sid);
        let url = with_param(url, "CI", if self.use_chunked { "0" } else { "1" });
        let url = with_param(url, "AID", &self.aid_param());
        let url = self.with_additional_params(url);
        let url = with_param(url, "TYPE", "xmlhttp");

        let id = self.io.allocate_exchange();
        let mut exchange = HttpExchange::new(id, BACK_CHANNEL_RID, self.back_attempt_id)
            .with_timeout(self.back_channel_timeout.unwrap_or(self.config.watchdog_timeout))
            .with_headers(self.base_headers());
        exchange.get(&mut self.io, url, true, true);
        self.back_channel = Some(exchange);
    }

    /// Arm a back-channel retry. False when one is already running or the
    /// budget is spent.
    pub(super) fn maybe_retry_back_channel(&mut self) -> bool {
        if self.back_channel.is_some() || self.back_timer.is_some() {
            return false;
        }
        if self.back_retry_count >= self.config.back_max_retries {
            return false;
        }

        self.back_attempt_id += 1;
        let delay = self.retry_delay(self.back_retry_count);
        let id = TimerId::BackChannel(self.next_generation());
        self.io.scheduler.schedule(id, delay);
        self.back_timer = Some(id);
        self.back_retry_count += 1;
        tracing::info!(
            "retrying back channel in {:?} (retry {} of {})",
            delay,
            self.back_retry_count,
            self.config.back_max_retries
        );
        true
    }

    /// The server says no back channel is attached to the session.
    ///
    /// Only a back channel that started well before the forward request
    /// that carried the claim is considered lost.
    pub(super) fn handle_backchannel_missing(&mut self, forward_start: Option<Instant>) {
        if self.back_timer.is_some() {
            return;
        }

        match &self.back_channel {
            None => {
                tracing::warn!("server reports no back channel and none is running");
            }
            Some(back) => {
                let stale = match (back.start_time(), forward_start) {
                    (Some(back_start), Some(forward_start)) => {
                        back_start + self.config.rtt_estimate < forward_start
                    }
                    _ => false,
                };
                if !stale {
                    return;
                }
                tracing::info!("server lost the back channel, restarting");
                self.clear_dead_back_channel_check();
                if let Some(mut back) = self.back_channel.take() {
                    back.cancel(&mut self.io);
                }
            }
        }
        self.maybe_retry_back_channel();
    }

    /// Arm the dead-back-channel check after an ack shows data the back
    /// channel has not yet delivered.
    pub(super) fn arm_dead_back_channel_check(&mut self) {
        let delay = self.config.rtt_estimate * 2;
        let id = TimerId::DeadBackChannel(self.next_generation());
        self.io.scheduler.schedule(id, delay);
        self.dead_back_timer = Some(id);
    }

    pub(super) fn clear_dead_back_channel_check(&mut self) {
        if let Some(id) = self.dead_back_timer.take() {
            self.io.scheduler.cancel(id);
        }
    }

    pub(super) fn on_back_channel_dead(&mut self) {
        tracing::info!("back channel silent past the ack, restarting");
        if let Some(mut back) = self.back_channel.take() {
            back.cancel(&mut self.io);
        }
        self.maybe_retry_back_channel();
    }
}
