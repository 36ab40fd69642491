//! Connection-test results cached across reconnect attempts.

use crate::value::Value;

/// Cached outcome of the two connection-test stages.
///
/// A reconnecting client hands the cache of its previous engine to the next
/// one (see [`crate::ChannelEngine::connection_state`]) so the probes are not
/// repeated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    /// Decoded stage 1 response, when stage 1 has succeeded
    pub handshake_result: Option<Vec<Value>>,

    /// Stage 2 verdict: `true` when an intermediary buffers responses
    pub buffering_proxy_result: Option<bool>,
}

impl ConnectionState {
    /// An empty cache: both stages will run.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The result assumed in background test mode: no probe, no proxy.
    #[must_use]
    pub fn assumed_unbuffered() -> Self {
        Self {
            handshake_result: Some(Vec::new()),
            buffering_proxy_result: Some(false),
        }
    }

    /// True when neither stage needs to run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.handshake_result.is_some() && self.buffering_proxy_result.is_some()
    }

    /// Forget both results.
    pub fn clear(&mut self) {
        self.handshake_result = None;
        self.buffering_proxy_result = None;
    }
}
