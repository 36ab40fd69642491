//! HTTP transport backed by `reqwest`.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use webchannel_core::{ExchangeId, HttpEvent, HttpRequest, HttpTransport, Method};

use crate::DriverEvent;

/// [`HttpTransport`] that runs every exchange as its own tokio task.
///
/// Response progress is posted to the engine task in order: one
/// [`HttpEvent::Head`], a [`HttpEvent::Data`] per body chunk as it arrives,
/// then [`HttpEvent::Complete`]. Any error before a response arrives
/// (connect, DNS, TLS, timeout) is posted as [`HttpEvent::Failed`].
///
/// Dropping the transport leaves running exchanges alone so a final
/// terminate request still reaches the server.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    tx: mpsc::UnboundedSender<DriverEvent>,
    running: HashMap<ExchangeId, AbortHandle>,
}

impl ReqwestTransport {
    pub(crate) fn new(client: reqwest::Client, tx: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self {
            client,
            tx,
            running: HashMap::new(),
        }
    }

    /// Forget an exchange that delivered its last event.
    pub(crate) fn finished(&mut self, id: ExchangeId) {
        self.running.remove(&id);
    }

    /// Number of exchanges still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    fn build(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let builder = match request.method {
            Method::Get => self.client.get(request.url),
            Method::Post => self.client.post(request.url),
        };
        let builder = builder.headers(header_map(&request.headers));
        match request.body {
            Some(body) => builder.body(body),
            None => builder,
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&mut self, id: ExchangeId, request: HttpRequest) {
        tracing::debug!("{} {} {}", id, request.method, request.url);
        let builder = self.build(request);
        let tx = self.tx.clone();

        let handle = tokio::spawn(async move {
            if let Some(event) = run_exchange(id, builder, &tx).await {
                let _ = tx.send(DriverEvent::Http(id, event));
            }
        });
        self.running.insert(id, handle.abort_handle());
    }

    fn abort(&mut self, id: ExchangeId) {
        if let Some(handle) = self.running.remove(&id) {
            tracing::trace!("{} aborting", id);
            handle.abort();
        }
    }
}

/// Drive one exchange, streaming head and body events as they arrive.
///
/// Returns the terminal event for the caller to post.
async fn run_exchange(
    id: ExchangeId,
    builder: reqwest::RequestBuilder,
    tx: &mpsc::UnboundedSender<DriverEvent>,
) -> Option<HttpEvent> {
    let mut response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!("{} request failed before response: {}", id, e);
            return Some(HttpEvent::Failed(e.to_string()));
        }
    };

    let head = HttpEvent::Head {
        status: response.status().as_u16(),
        headers: response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
    };
    tx.send(DriverEvent::Http(id, head)).ok()?;

    loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                tracing::trace!("{} received {} bytes", id, bytes.len());
                tx.send(DriverEvent::Http(id, HttpEvent::Data(bytes.to_vec())))
                    .ok()?;
            }
            Ok(None) => return Some(HttpEvent::Complete),
            Err(e) => {
                tracing::debug!("{} body read failed: {}", id, e);
                return Some(HttpEvent::Complete);
            }
        }
    }
}

fn header_map(headers: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => tracing::warn!("dropping invalid header {}", name),
        }
    }
    map
}
