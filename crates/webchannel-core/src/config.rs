//! Engine configuration.

use std::time::Duration;

use crate::{CLIENT_VERSION, LATEST_CHANNEL_VERSION};

/// Configuration for a [`crate::ChannelEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Watchdog for back-channel, handshake and probe requests
    pub watchdog_timeout: Duration,

    /// Upper bound of the randomized forward request watchdog
    pub forward_request_timeout: Duration,

    /// Fixed part of the retry delay
    pub base_retry_delay: Duration,

    /// Random part of the retry delay is drawn from `[0, seed)`
    pub retry_delay_seed: Duration,

    /// Forward-channel retries before failing (0 in fail-fast mode)
    pub forward_max_retries: u32,

    /// Back-channel retries before failing
    pub back_max_retries: u32,

    /// Round-trip estimate used for back-channel liveness checks
    pub rtt_estimate: Duration,

    /// Retry delay multiplier while the application reports inactivity
    pub inactive_retry_factor: u32,

    /// Maps carried by one forward request
    pub max_maps_per_request: usize,

    /// Outgoing queue length that triggers a warning
    pub outgoing_soft_cap: usize,

    /// Outstanding server bytes below which a silent back channel is suspect
    pub outstanding_bytes_cutoff: u64,

    /// Channel protocol version requested (`VER`)
    pub channel_version: u32,

    /// Client version advertised on the handshake (`CVER`, omitted when 0)
    pub client_version: u32,

    /// Forward requests allowed in flight when multiplexing
    pub concurrent_request_limit: usize,

    /// Start with a single forward slot and grow once the server
    /// advertises a multiplexing wire protocol
    pub negotiate_multiplexing: bool,

    /// Fail on the first forward error instead of retrying
    pub fail_fast: bool,

    /// Permit streamed back channels when the path is unbuffered
    pub allow_chunked_mode: bool,

    /// Send `X-Client-Protocol: webchannel` on every request
    pub client_protocol_header_required: bool,

    /// Headers added to every request
    pub message_headers: Vec<(String, String)>,

    /// Headers added to the handshake request only
    pub init_message_headers: Vec<(String, String)>,

    /// Query parameter name under which the server's HTTP session id is echoed
    pub http_session_id_param: Option<String>,

    /// Skip the connection test and assume an unbuffered path
    pub background_channel_test: bool,

    /// Deliver consecutive messages through `batch_received`
    pub batch_delivery: bool,

    /// Seed for retry jitter; `None` draws from OS entropy
    pub rng_seed: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::from_secs(45),
            forward_request_timeout: Duration::from_secs(20),
            base_retry_delay: Duration::from_secs(5),
            retry_delay_seed: Duration::from_secs(10),
            forward_max_retries: 2,
            back_max_retries: 3,
            rtt_estimate: Duration::from_secs(3),
            inactive_retry_factor: 2,
            max_maps_per_request: 1000,
            outgoing_soft_cap: 1000,
            outstanding_bytes_cutoff: 37_500,
            channel_version: LATEST_CHANNEL_VERSION,
            client_version: CLIENT_VERSION,
            concurrent_request_limit: 10,
            negotiate_multiplexing: false,
            fail_fast: false,
            allow_chunked_mode: true,
            client_protocol_header_required: false,
            message_headers: Vec::new(),
            init_message_headers: Vec::new(),
            http_session_id_param: None,
            background_channel_test: false,
            batch_delivery: false,
            rng_seed: None,
        }
    }
}

impl ChannelConfig {
    /// Forward retry cap after applying fail-fast.
    #[must_use]
    pub fn effective_forward_retries(&self) -> u32 {
        if self.fail_fast {
            0
        } else {
            self.forward_max_retries
        }
    }

    /// Set the concurrent forward request limit (0 selects the default of 10).
    #[must_use]
    pub fn with_concurrent_request_limit(mut self, limit: usize) -> Self {
        self.concurrent_request_limit = limit;
        self
    }

    /// Enable or disable fail-fast.
    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Add a header to every request.
    #[must_use]
    pub fn with_message_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message_headers.push((name.into(), value.into()));
        self
    }

    /// Add a header to the handshake request.
    #[must_use]
    pub fn with_init_message_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.init_message_headers.push((name.into(), value.into()));
        self
    }

    /// Echo the server's HTTP session id under this query parameter.
    #[must_use]
    pub fn with_http_session_id_param(mut self, param: impl Into<String>) -> Self {
        self.http_session_id_param = Some(param.into());
        self
    }

    /// Skip the connection test.
    #[must_use]
    pub fn with_background_channel_test(mut self, enabled: bool) -> Self {
        self.background_channel_test = enabled;
        self
    }

    /// Require the client protocol header.
    #[must_use]
    pub fn with_client_protocol_header(mut self, required: bool) -> Self {
        self.client_protocol_header_required = required;
        self
    }

    /// Negotiate multiplexing from the server's wire protocol header.
    #[must_use]
    pub fn with_negotiated_multiplexing(mut self, enabled: bool) -> Self {
        self.negotiate_multiplexing = enabled;
        self
    }

    /// Enable batch delivery.
    #[must_use]
    pub fn with_batch_delivery(mut self, enabled: bool) -> Self {
        self.batch_delivery = enabled;
        self
    }

    /// Disallow streamed back channels.
    #[must_use]
    pub fn with_chunked_mode(mut self, allowed: bool) -> Self {
        self.allow_chunked_mode = allowed;
        self
    }

    /// Fix the retry jitter seed.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }
}
