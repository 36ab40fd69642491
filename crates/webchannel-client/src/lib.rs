//! # WebChannel Client
//!
//! Tokio adapter for [`webchannel_core`]: executes the engine's HTTP requests
//! with `reqwest`, runs its timers on the tokio clock and exposes a small
//! handle/event-stream API to applications.
//!
//! The engine lives on a single tokio task. Response bytes and timer fires
//! produced elsewhere are marshalled onto that task over one mpsc channel,
//! together with application commands, so the engine only ever runs on one
//! context.
//!
//! ```ignore
//! let (channel, mut events) = WebChannel::open("https://host/channel", ChannelOptions::default())?;
//! channel.send(vec![("greeting".into(), "hello".into())])?;
//! while let Some(event) = events.next().await {
//!     println!("{event:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod event;
pub mod options;
pub mod timer;
pub mod transport;

pub use channel::{EventStream, WebChannel};
pub use error::{ClientError, Result};
pub use event::{ChannelEvent, ErrorKind, ErrorStatus};
pub use options::ChannelOptions;
pub use timer::TokioScheduler;
pub use transport::ReqwestTransport;

use webchannel_core::{ExchangeId, HttpEvent, RuntimeProperties, TimerId};

/// Work item for the engine task.
#[derive(Debug)]
pub(crate) enum DriverEvent {
    /// Progress of an HTTP exchange
    Http(ExchangeId, HttpEvent),
    /// A timer fired; the sequence number identifies the arming
    Timer(TimerId, u64),
    /// Application map to send
    Send(webchannel_core::MessageMap),
    /// Application asked to close
    Close,
    /// Application asked for a runtime snapshot
    Properties(tokio::sync::oneshot::Sender<RuntimeProperties>),
}
