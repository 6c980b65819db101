//! Session transport boundary — the duplex channel to the dialog service.
//!
//! The engine never speaks a vendor wire protocol itself. A
//! [`SessionTransport`] implementation connects to whatever hosted
//! streaming speech model backs the conversation and hands back the two
//! halves of an open session: a [`SessionSink`] the send activity owns and
//! a [`SessionEvents`] stream the receive activity owns. Splitting at
//! connect time is what lets the two activities proceed independently —
//! this is an asynchronous duplex channel, not request/response.

use async_trait::async_trait;

use crate::error::DialogError;
use crate::frame::{OutboundMessage, TurnEvent};

/// Which modalities the model should respond with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    /// Spoken audio only.
    #[default]
    Audio,

    /// Text only.
    Text,

    /// Both audio and text.
    Both,
}

/// Connection parameters for a dialog session.
///
/// The system instruction is opaque to the engine — it is passed through to
/// the service untouched.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    /// Model identifier understood by the transport.
    pub model: String,

    /// Requested response modality.
    pub response_modality: ResponseModality,

    /// Optional persona / system instruction string.
    pub system_instruction: Option<String>,
}

impl SessionConfig {
    /// Config for the given model with default modality and no persona.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

/// Factory for dialog sessions.
///
/// A session is restartable only by reconnecting; the engine calls this
/// once per [`DialogEngine::start`](crate::engine::DialogEngine::start).
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Open a session, returning its send and receive halves.
    async fn connect(
        &self,
        config: &SessionConfig,
    ) -> Result<(Box<dyn SessionSink>, Box<dyn SessionEvents>), DialogError>;
}

/// The outbound half of an open session.
#[async_trait]
pub trait SessionSink: Send {
    /// Transmit one audio message. A failure here is fatal to the session.
    async fn send_audio(&mut self, msg: OutboundMessage) -> Result<(), DialogError>;

    /// Close the session. Idempotent.
    async fn close(&mut self) -> Result<(), DialogError>;
}

/// The inbound half of an open session.
#[async_trait]
pub trait SessionEvents: Send {
    /// Await the next event.
    ///
    /// Yields `Ok(Some(event))` while the session is live, `Ok(None)` when
    /// the remote side closes the stream in an orderly way, and `Err` on a
    /// transport failure. Within one turn, chunk order is preserved and
    /// [`TurnEvent::TurnEnd`] terminates the turn.
    async fn next_event(&mut self) -> Result<Option<TurnEvent>, DialogError>;
}
