//! Dialog engine — orchestrates the four concurrent activities of a
//! streaming voice conversation.
//!
//! ```text
//!   CaptureSource ─► EchoGate filter ─► outbound queue ─► SessionSink
//!                                                             │ network
//!   PlaybackSink ◄─ EchoGate record ◄─ inbound queue ◄─ SessionEvents
//! ```
//!
//! The four activities — **listen**, **send**, **receive**, **play** — run
//! as tokio tasks under one [`CancellationToken`] with all-or-nothing
//! semantics: the first activity to exit, cleanly or not, cancels the rest.
//! A session is never reused; restarting means a fresh
//! [`DialogEngine::start`] with a fresh transport connection and fresh
//! queues.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::capture::CaptureSource;
use crate::error::DialogError;
use crate::frame::{AudioFrame, OutboundMessage, TurnEvent};
use crate::gate::{EchoGate, GateConfig, GateState};
use crate::playback::PlaybackSink;
use crate::queue::{self, FrameReceiver, FrameSender, OverflowPolicy};
use crate::transport::{SessionConfig, SessionEvents, SessionSink, SessionTransport};

// ── Configuration ──────────────────────────────────────────────────

/// Configuration for a dialog session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DialogConfig {
    /// Transport connection parameters.
    pub session: SessionConfig,

    /// Outbound (mic → network) queue capacity. Small — a frame or two of
    /// lead time; producers block rather than drop mic audio.
    pub outbound_capacity: usize,

    /// Inbound (network → speaker) queue capacity. Larger, and still
    /// blocking: dropping model audio truncates the response, which is a
    /// correctness bug rather than a latency tradeoff.
    pub inbound_capacity: usize,

    /// Echo gate tuning (grace interval, history size).
    pub gate: GateConfig,

    /// Audio chunks to accumulate before the first speaker write, to avoid
    /// start-of-turn stutter. `0` or `1` disables the cushion.
    pub playback_lead: usize,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            outbound_capacity: 32,
            inbound_capacity: 512,
            gate: GateConfig::default(),
            playback_lead: 2,
        }
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted to the application layer (text sink / UI).
///
/// Delivered over an unbounded channel: text is not correctness-critical to
/// audio playback, so a slow consumer lags rather than stalling the engine.
#[derive(Debug, Clone)]
pub enum DialogEvent {
    /// A chunk of response text (transcript or text modality).
    Text(String),

    /// The model finished a turn.
    TurnComplete,

    /// The session ended — cleanly (`None`) or with the message of the
    /// failure that brought it down. Always the last event delivered.
    Closed(Option<String>),
}

/// Inbound queue item: response audio or the turn boundary marker.
///
/// A tagged variant rather than a sentinel byte pattern, so turn control can
/// never collide with real audio data.
#[derive(Debug, Clone)]
enum PlaybackItem {
    Audio(AudioFrame),
    TurnEnd,
}

// ── Engine ─────────────────────────────────────────────────────────

/// Builds and launches dialog sessions.
///
/// Device and transport implementations are injected, so the engine is
/// testable without hardware or a network.
pub struct DialogEngine {
    config: DialogConfig,
}

impl DialogEngine {
    /// Create an engine with the given configuration.
    #[must_use]
    pub const fn new(config: DialogConfig) -> Self {
        Self { config }
    }

    /// Connect a session and start the four activities.
    ///
    /// Returns a [`DialogHandle`] for lifecycle control and the receiver
    /// for [`DialogEvent`]s. All session state — queues, gate, history —
    /// is created here and torn down when the session ends.
    pub async fn start(
        &self,
        transport: &dyn SessionTransport,
        capture: Box<dyn CaptureSource>,
        playback: Box<dyn PlaybackSink>,
    ) -> Result<(DialogHandle, mpsc::UnboundedReceiver<DialogEvent>), DialogError> {
        tracing::info!(model = %self.config.session.model, "starting dialog session");

        let (session_sink, session_events) = transport.connect(&self.config.session).await?;

        let gate = EchoGate::new(&self.config.gate);
        let (out_tx, out_rx) = queue::bounded(
            self.config.outbound_capacity,
            OverflowPolicy::Block,
            "outbound",
        );
        let (in_tx, in_rx) = queue::bounded(
            self.config.inbound_capacity,
            OverflowPolicy::Block,
            "inbound",
        );
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let mut tasks: JoinSet<Result<(), DialogError>> = JoinSet::new();
        tasks.spawn(run_listen(capture, gate.clone(), out_tx, token.clone()));
        tasks.spawn(run_send(session_sink, out_rx, token.clone()));
        tasks.spawn(run_receive(session_events, in_tx, event_tx.clone(), token.clone()));
        tasks.spawn(run_play(
            playback,
            in_rx,
            gate.clone(),
            self.config.playback_lead,
            token.clone(),
        ));

        let supervisor_token = token.clone();
        let supervisor = tokio::spawn(async move {
            let mut first_err: Option<DialogError> = None;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        if first_err.is_none() {
                            tracing::error!(error = %e, "dialog activity failed, cancelling session");
                            first_err = Some(e);
                        }
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        if first_err.is_none() {
                            first_err = Some(DialogError::ActivityPanic(e.to_string()));
                        }
                    }
                }
                // The first activity to exit, cleanly or not, ends the session.
                supervisor_token.cancel();
            }
            tracing::info!("dialog session finished");
            let _ = event_tx.send(DialogEvent::Closed(
                first_err.as_ref().map(ToString::to_string),
            ));
            first_err.map_or(Ok(()), Err)
        });

        Ok((
            DialogHandle {
                token,
                gate,
                supervisor,
            },
            event_rx,
        ))
    }
}

/// Handle to a running dialog session.
pub struct DialogHandle {
    token: CancellationToken,
    gate: EchoGate,
    supervisor: JoinHandle<Result<(), DialogError>>,
}

impl DialogHandle {
    /// Cancel all four activities and wait for the session to wind down.
    ///
    /// Device handles are released by the activities themselves on exit,
    /// even mid-frame. Prompt: every activity polls cancellation at each
    /// suspension point.
    pub async fn stop(self) -> Result<(), DialogError> {
        tracing::info!("stopping dialog session");
        self.token.cancel();
        self.join().await
    }

    /// Wait for the session to end on its own — remote close, or the first
    /// unrecovered activity failure (which is returned here).
    pub async fn join(self) -> Result<(), DialogError> {
        match self.supervisor.await {
            Ok(result) => result,
            Err(e) => Err(DialogError::ActivityPanic(e.to_string())),
        }
    }

    /// Current echo gate state (playback / turn progress).
    #[must_use]
    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    /// Whether the session has already ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }
}

// ── Listen: capture → gate filter → outbound queue ─────────────────

async fn run_listen(
    mut capture: Box<dyn CaptureSource>,
    gate: EchoGate,
    out_tx: FrameSender<OutboundMessage>,
    token: CancellationToken,
) -> Result<(), DialogError> {
    let result = listen_loop(capture.as_mut(), &gate, &out_tx, &token).await;
    capture.close();
    result
}

async fn listen_loop(
    capture: &mut dyn CaptureSource,
    gate: &EchoGate,
    out_tx: &FrameSender<OutboundMessage>,
    token: &CancellationToken,
) -> Result<(), DialogError> {
    loop {
        let frame = tokio::select! {
            () = token.cancelled() => return Ok(()),
            frame = capture.next_frame() => frame?,
        };

        if gate.is_suppressing() {
            tracing::trace!("mic suppressed while response audio is active");
            continue;
        }
        if gate.is_recent_echo(&frame.data) {
            tracing::debug!(bytes = frame.len(), "dropping captured frame matching played audio");
            continue;
        }

        let msg = OutboundMessage::pcm(frame);
        tokio::select! {
            () = token.cancelled() => return Ok(()),
            res = out_tx.put(msg) => match res {
                Ok(()) => {}
                // Send side is gone; the supervisor decides what that means.
                Err(DialogError::QueueClosed) => return Ok(()),
                Err(e) => return Err(e),
            },
        }
    }
}

// ── Send: outbound queue → session ─────────────────────────────────

async fn run_send(
    mut sink: Box<dyn SessionSink>,
    mut out_rx: FrameReceiver<OutboundMessage>,
    token: CancellationToken,
) -> Result<(), DialogError> {
    let result = send_loop(sink.as_mut(), &mut out_rx, &token).await;
    let _ = sink.close().await;
    result
}

async fn send_loop(
    sink: &mut dyn SessionSink,
    out_rx: &mut FrameReceiver<OutboundMessage>,
    token: &CancellationToken,
) -> Result<(), DialogError> {
    loop {
        let msg = tokio::select! {
            () = token.cancelled() => return Ok(()),
            msg = out_rx.get() => match msg {
                Ok(m) => m,
                Err(_) => return Ok(()),
            },
        };

        tokio::select! {
            () = token.cancelled() => return Ok(()),
            res = sink.send_audio(msg) => res?,
        }
    }
}

// ── Receive: session → inbound queue / text events ─────────────────

async fn run_receive(
    mut events: Box<dyn SessionEvents>,
    in_tx: FrameSender<PlaybackItem>,
    event_tx: mpsc::UnboundedSender<DialogEvent>,
    token: CancellationToken,
) -> Result<(), DialogError> {
    loop {
        let event = tokio::select! {
            () = token.cancelled() => return Ok(()),
            event = events.next_event() => event?,
        };

        match event {
            Some(TurnEvent::AudioChunk(frame)) => {
                tokio::select! {
                    () = token.cancelled() => return Ok(()),
                    res = in_tx.put(PlaybackItem::Audio(frame)) => {
                        if res.is_err() {
                            // Play side is gone.
                            return Ok(());
                        }
                    }
                }
            }
            Some(TurnEvent::TextChunk(text)) => {
                if event_tx.send(DialogEvent::Text(text)).is_err() {
                    tracing::warn!("dialog event receiver dropped, discarding text");
                }
            }
            Some(TurnEvent::TurnEnd) => {
                tracing::debug!("turn end received");
                let _ = event_tx.send(DialogEvent::TurnComplete);
                tokio::select! {
                    () = token.cancelled() => return Ok(()),
                    res = in_tx.put(PlaybackItem::TurnEnd) => {
                        if res.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            None => {
                tracing::info!("dialog stream closed by remote");
                return Ok(());
            }
        }
    }
}

// ── Play: inbound queue → speaker, driving the gate ────────────────

async fn run_play(
    mut sink: Box<dyn PlaybackSink>,
    mut in_rx: FrameReceiver<PlaybackItem>,
    gate: EchoGate,
    lead: usize,
    token: CancellationToken,
) -> Result<(), DialogError> {
    let result = play_loop(sink.as_mut(), &mut in_rx, &gate, lead, &token).await;
    sink.close();
    result
}

async fn play_loop(
    sink: &mut dyn PlaybackSink,
    in_rx: &mut FrameReceiver<PlaybackItem>,
    gate: &EchoGate,
    lead: usize,
    token: &CancellationToken,
) -> Result<(), DialogError> {
    let mut pending: VecDeque<PlaybackItem> = VecDeque::new();

    // Build a small cushion before the first write so playback doesn't
    // stutter while the network warms up. A TurnEnd inside the cushion
    // means a short turn; play what we have.
    if lead > 1 {
        while pending
            .iter()
            .filter(|item| matches!(item, PlaybackItem::Audio(_)))
            .count()
            < lead
        {
            let item = tokio::select! {
                () = token.cancelled() => break,
                item = in_rx.get() => match item {
                    Ok(i) => i,
                    Err(_) => break,
                },
            };
            let turn_over = matches!(item, PlaybackItem::TurnEnd);
            pending.push_back(item);
            if turn_over {
                break;
            }
        }
    }

    loop {
        let item = if let Some(item) = pending.pop_front() {
            item
        } else {
            tokio::select! {
                () = token.cancelled() => return Ok(()),
                item = in_rx.get() => match item {
                    Ok(i) => i,
                    Err(_) => return Ok(()),
                },
            }
        };

        match item {
            PlaybackItem::Audio(frame) => {
                gate.audio_arrived();
                tokio::select! {
                    () = token.cancelled() => return Ok(()),
                    res = sink.write_frame(&frame) => res?,
                }
                gate.record_played(&frame.data);
            }
            PlaybackItem::TurnEnd => {
                gate.turn_drained();
                // Quiet interval: new audio inside it is the remote side
                // barging back in and playback resumes; otherwise the gate
                // settles and the mic reopens.
                tokio::select! {
                    () = token.cancelled() => return Ok(()),
                    next = tokio::time::timeout(gate.grace(), in_rx.get()) => match next {
                        Err(_) => {
                            gate.settle();
                        }
                        Ok(Ok(item)) => pending.push_back(item),
                        Ok(Err(_)) => {
                            gate.settle();
                            return Ok(());
                        }
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_design_constants() {
        let config = DialogConfig::default();
        assert_eq!(config.outbound_capacity, 32);
        assert_eq!(config.inbound_capacity, 512);
        assert_eq!(config.playback_lead, 2);
        assert_eq!(config.gate.grace_ms, 400);
        assert_eq!(config.gate.history_capacity, 256);
    }

    #[test]
    fn config_is_serializable() {
        fn assert_serde<T: serde::Serialize + serde::de::DeserializeOwned>() {}
        assert_serde::<DialogConfig>();
    }
}
