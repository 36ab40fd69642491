//! Application-facing handler contract and queued message type.

use std::any::Any;
use std::fmt;

use url::Url;

use crate::error::ChannelError;
use crate::value::Value;

/// Ordered key/value payload of one outgoing message.
pub type MessageMap = Vec<(String, String)>;

/// Opaque application value attached to an outgoing message.
pub type MapContext = Box<dyn Any + Send>;

/// An outgoing message together with its sequence id.
///
/// A map lives in exactly one of the engine's two queues: `outgoing`
/// (not yet sent) or `pending` (sent, awaiting acknowledgement).
pub struct QueuedMap {
    /// Strictly increasing id assigned by the engine, starting at 0
    pub map_id: u64,

    /// Key/value payload, written in order
    pub map: MessageMap,

    /// Application context returned on delivery or failure
    pub context: Option<MapContext>,
}

impl QueuedMap {
    /// Create a queued map.
    #[must_use]
    pub fn new(map_id: u64, map: MessageMap, context: Option<MapContext>) -> Self {
        Self {
            map_id,
            map,
            context,
        }
    }

    /// Look up a payload value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for QueuedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedMap")
            .field("map_id", &self.map_id)
            .field("map", &self.map)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// Callbacks and policy hooks the engine consumes.
///
/// Every member is required. Callbacks run synchronously on the engine's
/// context and never overlap.
pub trait ChannelHandler {
    /// The handshake completed and the channel is usable.
    fn opened(&mut self);

    /// The channel closed. `pending` holds maps sent but unacknowledged,
    /// `undelivered` holds maps that were never sent.
    fn closed(&mut self, pending: Vec<QueuedMap>, undelivered: Vec<QueuedMap>);

    /// The channel failed; `closed` follows immediately.
    fn error(&mut self, error: ChannelError);

    /// One application message from the back channel, in array-id order.
    fn message_received(&mut self, payload: Value);

    /// Consecutive application messages, when batch delivery is enabled.
    fn batch_received(&mut self, payloads: Vec<Value>);

    /// A forward request carrying these maps succeeded.
    fn maps_delivered(&mut self, maps: &[QueuedMap]);

    /// The codec could not write this map into a request body.
    fn bad_map(&mut self, map: &QueuedMap);

    /// Gate every request; an error closes the channel with that error.
    fn ok_to_make_request(&mut self) -> Result<(), ChannelError>;

    /// Query parameters appended to every request.
    fn additional_query_params(&mut self) -> Vec<(String, String)>;

    /// Inactive channels back off twice as long between retries.
    fn is_active(&self) -> bool;

    /// False when the host knows it has no network. Requests that fail
    /// without a response then close the channel with `Network`.
    fn is_online(&self) -> bool;

    /// URL to probe when a request failure may be a network outage.
    fn network_test_probe_target(&self) -> Option<Url>;
}
