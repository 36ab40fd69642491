//! Application-facing channel handle and its engine task.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use webchannel_core::{
    ChannelEngine, ChannelError, ChannelHandler, ChannelState, ConnectRequest, HttpEvent,
    MessageMap, QueuedMap, RuntimeProperties, Value,
};

use crate::error::{ClientError, Result};
use crate::event::{ChannelEvent, ErrorStatus};
use crate::options::ChannelOptions;
use crate::timer::TokioScheduler;
use crate::transport::ReqwestTransport;
use crate::DriverEvent;

/// Key used for raw JSON messages.
const RAW_JSON_KEY: &str = "__data__";

type Engine = ChannelEngine<ReqwestTransport, TokioScheduler, ForwardingHandler>;

/// Handle to an open channel.
///
/// Dropping the handle closes the channel.
#[derive(Debug)]
pub struct WebChannel {
    commands: mpsc::UnboundedSender<DriverEvent>,
    raw_json: bool,
}

/// Stream of [`ChannelEvent`]s for one channel.
///
/// Ends after [`ChannelEvent::Closed`].
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl EventStream {
    /// Next event, or `None` once the channel task has finished.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

impl WebChannel {
    /// Open a channel to `url` and start connecting.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when a URL does not parse or the HTTP client cannot
    /// be built.
    pub fn open(url: &str, options: ChannelOptions) -> Result<(Self, EventStream)> {
        let client = reqwest::Client::builder().build()?;
        Self::open_with_client(url, options, client)
    }

    /// Like [`WebChannel::open`] with a caller-supplied HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error when a URL does not parse.
    pub fn open_with_client(
        url: &str,
        options: ChannelOptions,
        client: reqwest::Client,
    ) -> Result<(Self, EventStream)> {
        let request = options.connect_request(url)?;
        let (commands, driver_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let engine = ChannelEngine::new(
            options.to_config(),
            ReqwestTransport::new(client, commands.clone()),
            TokioScheduler::new(commands.clone()),
            ForwardingHandler { events: events_tx },
        );
        tokio::spawn(drive(engine, request, driver_rx));

        Ok((
            Self {
                commands,
                raw_json: options.send_raw_json,
            },
            EventStream { rx: events_rx },
        ))
    }

    /// Queue a map for the forward channel.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] once the channel has closed.
    pub fn send(&self, map: MessageMap) -> Result<()> {
        self.commands
            .send(DriverEvent::Send(map))
            .map_err(|_| ClientError::Disconnected)
    }

    /// Queue a JSON message.
    ///
    /// In raw JSON mode the document is sent whole under `__data__`.
    /// Otherwise an object becomes one entry per key (non-string values are
    /// written as JSON text) and any other document is sent as raw JSON.
    ///
    /// # Errors
    ///
    /// Returns an error when the message does not serialize or the channel
    /// has closed.
    pub fn send_json<M: Serialize + ?Sized>(&self, message: &M) -> Result<()> {
        let value = serde_json::to_value(message)?;
        self.send(json_to_map(value, self.raw_json)?)
    }

    /// Close the channel. Closing twice is harmless.
    pub fn close(&self) {
        let _ = self.commands.send(DriverEvent::Close);
    }

    /// Snapshot of the engine's runtime properties.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] once the channel has closed.
    pub async fn runtime_properties(&self) -> Result<RuntimeProperties> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(DriverEvent::Properties(reply))
            .map_err(|_| ClientError::Disconnected)?;
        rx.await.map_err(|_| ClientError::Disconnected)
    }
}

impl Drop for WebChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn json_to_map(value: serde_json::Value, raw_json: bool) -> Result<MessageMap> {
    match value {
        serde_json::Value::Object(fields) if !raw_json => fields
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => serde_json::to_string(&other)?,
                };
                Ok((key, value))
            })
            .collect(),
        other => Ok(vec![(RAW_JSON_KEY.to_string(), serde_json::to_string(&other)?)]),
    }
}

/// Run the engine until it closes.
async fn drive(
    mut engine: Engine,
    request: ConnectRequest,
    mut rx: mpsc::UnboundedReceiver<DriverEvent>,
) {
    if let Err(e) = engine.connect(request) {
        tracing::warn!("connect rejected: {}", e);
        return;
    }

    while let Some(event) = rx.recv().await {
        match event {
            DriverEvent::Http(id, event) => {
                let last = matches!(event, HttpEvent::Complete | HttpEvent::Failed(_));
                engine.handle_http_event(id, event);
                if last {
                    engine.transport_mut().finished(id);
                }
            }
            DriverEvent::Timer(timer, seq) => {
                if engine.scheduler_mut().fired(timer, seq) {
                    engine.handle_timer(timer);
                }
            }
            DriverEvent::Send(map) => {
                if let Err(e) = engine.send_map(map, None) {
                    tracing::warn!("dropping message: {}", e);
                }
            }
            DriverEvent::Close => engine.disconnect(),
            DriverEvent::Properties(reply) => {
                let _ = reply.send(engine.runtime_properties());
            }
        }

        if engine.state() == ChannelState::Closed {
            tracing::debug!("channel task finished");
            break;
        }
    }
}

/// Turns engine callbacks into [`ChannelEvent`]s.
struct ForwardingHandler {
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ForwardingHandler {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }
}

impl ChannelHandler for ForwardingHandler {
    fn opened(&mut self) {
        self.emit(ChannelEvent::Opened);
    }

    fn closed(&mut self, pending: Vec<QueuedMap>, undelivered: Vec<QueuedMap>) {
        self.emit(ChannelEvent::Closed {
            pending: pending.into_iter().map(|queued| queued.map).collect(),
            undelivered: undelivered.into_iter().map(|queued| queued.map).collect(),
        });
    }

    fn error(&mut self, error: ChannelError) {
        self.emit(ChannelEvent::Error(ErrorStatus::from(error)));
    }

    fn message_received(&mut self, payload: Value) {
        self.emit(ChannelEvent::Message(payload.into_json()));
    }

    fn batch_received(&mut self, payloads: Vec<Value>) {
        for payload in payloads {
            self.message_received(payload);
        }
    }

    fn maps_delivered(&mut self, maps: &[QueuedMap]) {
        tracing::trace!("{} maps delivered", maps.len());
    }

    fn bad_map(&mut self, map: &QueuedMap) {
        tracing::warn!("map {} could not be encoded and was dropped", map.map_id);
    }

    fn ok_to_make_request(&mut self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    fn additional_query_params(&mut self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn is_active(&self) -> bool {
        true
    }

    fn is_online(&self) -> bool {
        true
    }

    fn network_test_probe_target(&self) -> Option<url::Url> {
        None
    }
}
