//! Integration tests for the dialog engine's four-activity loop.
//!
//! These drive a full session against in-memory fakes — a scripted event
//! stream in place of the hosted dialog service and channel-backed capture
//! and playback in place of real devices. No audio hardware or network
//! access is required.
//!
//! # What is tested
//!
//! - Response audio plays in order; a turn end settles the gate with no
//!   further writes
//! - Mic frames forwarded while idle, suppressed while response audio plays
//! - Byte-identical echo of played audio is suppressed even after the gate
//!   reopens
//! - `stop()` terminates all activities promptly and releases devices
//! - A transport send failure cancels the sibling activities
//! - Orderly remote close ends the session cleanly
//! - Text chunks and turn completion flow to the event channel
//! - The event channel reports session end, carrying the failure if any

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use audio_dialog::transport::{SessionEvents, SessionSink, SessionTransport};
use audio_dialog::{
    AudioFormat, AudioFrame, CaptureSource, DialogConfig, DialogEngine, DialogError, DialogEvent,
    GateState, OutboundMessage, PlaybackSink, SessionConfig, TurnEvent,
};

// ── Fake transport ─────────────────────────────────────────────────

/// Inbound event stream that replays a script, then holds the stream open.
struct ScriptedEvents {
    script: VecDeque<Result<Option<TurnEvent>, DialogError>>,
}

impl ScriptedEvents {
    fn new(script: Vec<Result<Option<TurnEvent>, DialogError>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl SessionEvents for ScriptedEvents {
    async fn next_event(&mut self) -> Result<Option<TurnEvent>, DialogError> {
        match self.script.pop_front() {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }
}

/// Outbound half that records every message, or fails every send.
struct RecordingSink {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    fail_sends: bool,
}

#[async_trait]
impl SessionSink for RecordingSink {
    async fn send_audio(&mut self, msg: OutboundMessage) -> Result<(), DialogError> {
        if self.fail_sends {
            return Err(DialogError::Send("socket closed".into()));
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DialogError> {
        Ok(())
    }
}

/// Transport that hands out pre-built session halves on first connect.
struct FakeTransport {
    halves: Mutex<Option<(Box<dyn SessionSink>, Box<dyn SessionEvents>)>>,
}

impl FakeTransport {
    fn new(sink: Box<dyn SessionSink>, events: Box<dyn SessionEvents>) -> Self {
        Self {
            halves: Mutex::new(Some((sink, events))),
        }
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn connect(
        &self,
        _config: &SessionConfig,
    ) -> Result<(Box<dyn SessionSink>, Box<dyn SessionEvents>), DialogError> {
        self.halves
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| DialogError::Connect("session already taken".into()))
    }
}

// ── Fake devices ───────────────────────────────────────────────────

/// Capture source fed by the test through a channel.
struct ChannelCapture {
    frames: tokio::sync::mpsc::UnboundedReceiver<AudioFrame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl CaptureSource for ChannelCapture {
    async fn next_frame(&mut self) -> Result<AudioFrame, DialogError> {
        self.frames.recv().await.ok_or(DialogError::AudioThreadDied)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Playback sink that records written frames.
struct MemorySink {
    written: Arc<Mutex<Vec<AudioFrame>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl PlaybackSink for MemorySink {
    async fn write_frame(&mut self, frame: &AudioFrame) -> Result<(), DialogError> {
        self.written.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ── Helpers ────────────────────────────────────────────────────────

struct Rig {
    engine: DialogEngine,
    transport: FakeTransport,
    capture: Box<dyn CaptureSource>,
    playback: Box<dyn PlaybackSink>,
    mic_tx: tokio::sync::mpsc::UnboundedSender<AudioFrame>,
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    written: Arc<Mutex<Vec<AudioFrame>>>,
    capture_closed: Arc<AtomicBool>,
    sink_closed: Arc<AtomicBool>,
}

fn rig(
    config: DialogConfig,
    script: Vec<Result<Option<TurnEvent>, DialogError>>,
    fail_sends: bool,
) -> Rig {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let written = Arc::new(Mutex::new(Vec::new()));
    let capture_closed = Arc::new(AtomicBool::new(false));
    let sink_closed = Arc::new(AtomicBool::new(false));
    let (mic_tx, mic_rx) = tokio::sync::mpsc::unbounded_channel();

    let transport = FakeTransport::new(
        Box::new(RecordingSink {
            sent: Arc::clone(&sent),
            fail_sends,
        }),
        Box::new(ScriptedEvents::new(script)),
    );

    Rig {
        engine: DialogEngine::new(config),
        transport,
        capture: Box::new(ChannelCapture {
            frames: mic_rx,
            closed: Arc::clone(&capture_closed),
        }),
        playback: Box::new(MemorySink {
            written: Arc::clone(&written),
            closed: Arc::clone(&sink_closed),
        }),
        mic_tx,
        sent,
        written,
        capture_closed,
        sink_closed,
    }
}

fn inbound_frame(fill: u8) -> AudioFrame {
    AudioFrame::new(vec![fill; 320], AudioFormat::receive())
}

fn mic_frame(fill: u8) -> AudioFrame {
    AudioFrame::new(vec![fill; 320], AudioFormat::send())
}

fn audio(frame: &AudioFrame) -> Result<Option<TurnEvent>, DialogError> {
    Ok(Some(TurnEvent::AudioChunk(frame.clone())))
}

fn turn_end() -> Result<Option<TurnEvent>, DialogError> {
    Ok(Some(TurnEvent::TurnEnd))
}

/// Poll a condition until it holds, panicking after a generous deadline.
async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn plays_frames_in_order_then_settles() {
    let frames = [inbound_frame(1), inbound_frame(2), inbound_frame(3)];
    let script = vec![
        audio(&frames[0]),
        audio(&frames[1]),
        audio(&frames[2]),
        turn_end(),
    ];
    let r = rig(DialogConfig::default(), script, false);

    let (handle, _events) = r
        .engine
        .start(&r.transport, r.capture, r.playback)
        .await
        .unwrap();

    let written = Arc::clone(&r.written);
    wait_for("3 frames written", || written.lock().unwrap().len() == 3).await;
    assert_eq!(*written.lock().unwrap(), frames.to_vec());

    // After the turn end drains and the grace interval passes, the gate
    // settles and no further frames are written.
    wait_for("gate settled", || handle.gate_state() == GateState::Idle).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(written.lock().unwrap().len(), 3);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn forwards_mic_frames_when_idle() {
    let r = rig(DialogConfig::default(), Vec::new(), false);
    let (handle, _events) = r
        .engine
        .start(&r.transport, r.capture, r.playback)
        .await
        .unwrap();

    r.mic_tx.send(mic_frame(10)).unwrap();
    r.mic_tx.send(mic_frame(11)).unwrap();

    let sent = Arc::clone(&r.sent);
    wait_for("2 messages sent", || sent.lock().unwrap().len() == 2).await;

    let sent = sent.lock().unwrap();
    assert_eq!(sent[0].frame, mic_frame(10));
    assert_eq!(sent[1].frame, mic_frame(11));
    assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");
    drop(sent);

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn suppresses_mic_while_response_is_playing() {
    // Two audio chunks and no turn end — the gate stays in Playing.
    let script = vec![audio(&inbound_frame(1)), audio(&inbound_frame(2))];
    let r = rig(DialogConfig::default(), script, false);
    let (handle, _events) = r
        .engine
        .start(&r.transport, r.capture, r.playback)
        .await
        .unwrap();

    let written = Arc::clone(&r.written);
    wait_for("response playing", || written.lock().unwrap().len() == 2).await;
    assert_eq!(handle.gate_state(), GateState::Playing);

    r.mic_tx.send(mic_frame(42)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(
        r.sent.lock().unwrap().is_empty(),
        "mic frame leaked through while response audio was playing"
    );

    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn suppresses_byte_identical_echo_after_gate_reopens() {
    let echo = inbound_frame(0xAB);
    let script = vec![audio(&echo), turn_end()];
    let r = rig(DialogConfig::default(), script, false);
    let (handle, _events) = r
        .engine
        .start(&r.transport, r.capture, r.playback)
        .await
        .unwrap();

    // Wait until playback finished and the gate reopened the mic.
    let written = Arc::clone(&r.written);
    wait_for("echo frame played", || written.lock().unwrap().len() == 1).await;
    wait_for("gate settled", || handle.gate_state() == GateState::Idle).await;

    // A captured frame with the exact bytes just played is leaked echo.
    r.mic_tx.send(mic_frame(0xAB)).unwrap();
    // A different frame passes, even immediately after playback.
    r.mic_tx.send(mic_frame(0xCD)).unwrap();

    let sent = Arc::clone(&r.sent);
    wait_for("clean frame sent", || !sent.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "echo frame must not be transmitted");
    assert_eq!(sent[0].frame, mic_frame(0xCD));
    drop(sent);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn stop_terminates_all_activities_promptly() {
    // Every activity is mid-suspend: no mic frames, no events.
    let r = rig(DialogConfig::default(), Vec::new(), false);
    let (handle, _events) = r
        .engine
        .start(&r.transport, r.capture, r.playback)
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle.stop())
        .await
        .expect("stop did not complete within the cancellation window")
        .unwrap();

    assert!(r.capture_closed.load(Ordering::SeqCst), "capture not released");
    assert!(r.sink_closed.load(Ordering::SeqCst), "playback not released");
}

#[tokio::test]
async fn send_failure_cancels_sibling_activities() {
    let r = rig(DialogConfig::default(), Vec::new(), true);
    let (handle, mut events) = r
        .engine
        .start(&r.transport, r.capture, r.playback)
        .await
        .unwrap();

    // One mic frame reaches the failing transport sink.
    r.mic_tx.send(mic_frame(7)).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("session did not fail within the deadline");
    assert!(
        matches!(result, Err(DialogError::Send(_))),
        "expected Send error, got {result:?}"
    );

    // No zombie activities: both device handles were released.
    assert!(r.capture_closed.load(Ordering::SeqCst));
    assert!(r.sink_closed.load(Ordering::SeqCst));

    // The event channel reports the failure before closing.
    let closed = events.recv().await.expect("no closed event delivered");
    assert!(
        matches!(closed, DialogEvent::Closed(Some(ref msg)) if msg.contains("socket closed")),
        "expected Closed carrying the send failure, got {closed:?}"
    );
}

#[tokio::test]
async fn orderly_remote_close_ends_session_cleanly() {
    let r = rig(DialogConfig::default(), vec![Ok(None)], false);
    let (handle, mut events) = r
        .engine
        .start(&r.transport, r.capture, r.playback)
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), handle.join())
        .await
        .expect("session did not end after remote close");
    assert!(result.is_ok(), "expected clean shutdown, got {result:?}");

    assert!(r.capture_closed.load(Ordering::SeqCst));
    assert!(r.sink_closed.load(Ordering::SeqCst));

    let closed = events.recv().await.expect("no closed event delivered");
    assert!(
        matches!(closed, DialogEvent::Closed(None)),
        "expected clean Closed event, got {closed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn text_chunks_flow_to_event_channel() {
    let script = vec![
        Ok(Some(TurnEvent::TextChunk("hel".into()))),
        Ok(Some(TurnEvent::TextChunk("lo".into()))),
        turn_end(),
    ];
    let r = rig(DialogConfig::default(), script, false);
    let (handle, mut events) = r
        .engine
        .start(&r.transport, r.capture, r.playback)
        .await
        .unwrap();

    let first = events.recv().await.unwrap();
    assert!(matches!(first, DialogEvent::Text(ref t) if t == "hel"));
    let second = events.recv().await.unwrap();
    assert!(matches!(second, DialogEvent::Text(ref t) if t == "lo"));
    let third = events.recv().await.unwrap();
    assert!(matches!(third, DialogEvent::TurnComplete));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn connect_failure_surfaces_immediately() {
    struct FailingTransport;

    #[async_trait]
    impl SessionTransport for FailingTransport {
        async fn connect(
            &self,
            _config: &SessionConfig,
        ) -> Result<(Box<dyn SessionSink>, Box<dyn SessionEvents>), DialogError> {
            Err(DialogError::Connect("service unreachable".into()))
        }
    }

    let r = rig(DialogConfig::default(), Vec::new(), false);
    let result = r.engine.start(&FailingTransport, r.capture, r.playback).await;
    assert!(matches!(result, Err(DialogError::Connect(_))));
}
