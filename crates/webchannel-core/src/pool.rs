//! Bound on concurrently in-flight forward-channel requests.

use std::collections::BTreeMap;

use crate::exchange::HttpExchange;
use crate::transport::{ExchangeId, HttpTransport, Io, Scheduler};

/// Pool size used when no positive limit is configured.
pub const DEFAULT_MAX_POOL_SIZE: usize = 10;

/// Wire protocols that allow several requests to share one connection.
const MULTIPLEXED_PROTOCOLS: [&str; 3] = ["h2", "spdy", "quic"];

#[derive(Debug)]
enum Slots {
    Single(Option<HttpExchange>),
    Multi(BTreeMap<ExchangeId, HttpExchange>),
}

/// In-flight forward exchanges: a single slot, or a set bounded by
/// `max_size` when multiplexing is enabled.
#[derive(Debug)]
pub struct RequestPool {
    max_size: usize,
    configured_size: usize,
    slots: Slots,
}

impl RequestPool {
    /// Create a pool; a limit of 0 selects [`DEFAULT_MAX_POOL_SIZE`].
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let max_size = if limit == 0 {
            DEFAULT_MAX_POOL_SIZE
        } else {
            limit
        };
        Self {
            max_size,
            configured_size: max_size,
            slots: Self::slots_for(max_size),
        }
    }

    /// Create a single-slot pool that grows to `limit` once the server
    /// advertises a multiplexing protocol.
    #[must_use]
    pub fn negotiated(limit: usize) -> Self {
        let mut pool = Self::new(limit);
        pool.max_size = 1;
        pool.slots = Slots::Single(None);
        pool
    }

    fn slots_for(max_size: usize) -> Slots {
        if max_size > 1 {
            Slots::Multi(BTreeMap::new())
        } else {
            Slots::Single(None)
        }
    }

    /// Apply the wire protocol echoed by the server.
    pub fn apply_client_protocol(&mut self, protocol: &str) {
        if self.max_size > 1 || self.configured_size <= 1 {
            return;
        }
        let protocol = protocol.to_ascii_lowercase();
        if !MULTIPLEXED_PROTOCOLS.iter().any(|p| protocol.contains(p)) {
            return;
        }

        tracing::info!(
            "wire protocol {} supports multiplexing, raising pool size to {}",
            protocol,
            self.configured_size
        );
        let mut slots = BTreeMap::new();
        if let Slots::Single(Some(exchange)) = std::mem::replace(&mut self.slots, Slots::Single(None)) {
            slots.insert(exchange.id(), exchange);
        }
        self.slots = Slots::Multi(slots);
        self.max_size = self.configured_size;
    }

    /// Whether several forward requests may be in flight.
    #[must_use]
    pub fn is_multiplexed(&self) -> bool {
        matches!(self.slots, Slots::Multi(_))
    }

    /// Current capacity.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of in-flight exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.slots {
            Slots::Single(slot) => usize::from(slot.is_some()),
            Slots::Multi(set) => set.len(),
        }
    }

    /// True when nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no further exchange may be added.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_size
    }

    /// Whether `id` is in the pool.
    #[must_use]
    pub fn contains(&self, id: ExchangeId) -> bool {
        match &self.slots {
            Slots::Single(slot) => slot.as_ref().is_some_and(|e| e.id() == id),
            Slots::Multi(set) => set.contains_key(&id),
        }
    }

    /// An in-flight exchange.
    #[must_use]
    pub fn get(&self, id: ExchangeId) -> Option<&HttpExchange> {
        match &self.slots {
            Slots::Single(slot) => slot.as_ref().filter(|e| e.id() == id),
            Slots::Multi(set) => set.get(&id),
        }
    }

    /// Mutable access to an in-flight exchange.
    pub fn get_mut(&mut self, id: ExchangeId) -> Option<&mut HttpExchange> {
        match &mut self.slots {
            Slots::Single(slot) => slot.as_mut().filter(|e| e.id() == id),
            Slots::Multi(set) => set.get_mut(&id),
        }
    }

    /// Iterate over in-flight exchanges.
    pub fn iter(&self) -> impl Iterator<Item = &HttpExchange> {
        let (single, multi) = match &self.slots {
            Slots::Single(slot) => (slot.as_ref(), None),
            Slots::Multi(set) => (None, Some(set.values())),
        };
        single.into_iter().chain(multi.into_iter().flatten())
    }

    /// Add an exchange. A full pool rejects it and hands it back.
    ///
    /// # Errors
    ///
    /// Returns the exchange when the pool is already full.
    pub fn add(&mut self, exchange: HttpExchange) -> Result<(), HttpExchange> {
        if self.is_full() {
            tracing::warn!("request pool full, rejecting {}", exchange.id());
            return Err(exchange);
        }
        match &mut self.slots {
            Slots::Single(slot) => *slot = Some(exchange),
            Slots::Multi(set) => {
                set.insert(exchange.id(), exchange);
            }
        }
        Ok(())
    }

    /// Remove and return an exchange.
    pub fn remove(&mut self, id: ExchangeId) -> Option<HttpExchange> {
        match &mut self.slots {
            Slots::Single(slot) => {
                if slot.as_ref().is_some_and(|e| e.id() == id) {
                    slot.take()
                } else {
                    None
                }
            }
            Slots::Multi(set) => set.remove(&id),
        }
    }

    fn drain(&mut self) -> Vec<HttpExchange> {
        match &mut self.slots {
            Slots::Single(slot) => slot.take().into_iter().collect(),
            Slots::Multi(set) => std::mem::take(set).into_values().collect(),
        }
    }

    /// Cancel and drop every in-flight exchange.
    pub fn cancel_all<T: HttpTransport, S: Scheduler>(&mut self, io: &mut Io<T, S>) {
        for mut exchange in self.drain() {
            exchange.cancel(io);
        }
    }

    /// Cancel every in-flight exchange and hand each to `on_complete`.
    ///
    /// Returns false when the pool was empty.
    pub fn force_complete<T, S, F>(&mut self, io: &mut Io<T, S>, mut on_complete: F) -> bool
    where
        T: HttpTransport,
        S: Scheduler,
        F: FnMut(&mut Io<T, S>, HttpExchange),
    {
        let exchanges = self.drain();
        if exchanges.is_empty() {
            return false;
        }
        for mut exchange in exchanges {
            exchange.cancel(io);
            on_complete(io, exchange);
        }
        true
    }
}
