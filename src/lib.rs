//! Real-time duplex audio dialog engine.
//!
//! Drives a spoken conversation with a streaming speech model over a
//! persistent duplex session: microphone audio is captured, echo-filtered,
//! and streamed out while response audio and text stream back in and play
//! through the speaker — four concurrent activities coordinated around two
//! bounded queues, an echo gate, and a turn state machine.
//!
//! The audio devices ([`CaptureSource`] / [`PlaybackSink`]) and the model
//! connection ([`transport::SessionTransport`]) are injected, so the engine
//! runs against real hardware and a hosted dialog API in production and
//! against in-memory fakes in tests. Ready-made cpal/rodio adapters live in
//! [`audio_io`].
//!
//! ```no_run
//! # async fn demo(transport: Box<dyn audio_dialog::transport::SessionTransport>) -> Result<(), audio_dialog::DialogError> {
//! use audio_dialog::audio_io::{MicCapture, SpeakerSink};
//! use audio_dialog::{AudioFormat, DialogConfig, DialogEngine};
//!
//! let mut config = DialogConfig::default();
//! config.session.model = "native-audio-dialog".into();
//!
//! let capture = MicCapture::open(AudioFormat::send(), 1024)?;
//! let speaker = SpeakerSink::open()?;
//!
//! let engine = DialogEngine::new(config);
//! let (handle, mut events) = engine
//!     .start(transport.as_ref(), Box::new(capture), Box::new(speaker))
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod audio_io;
pub mod capture;
pub mod engine;
pub mod error;
pub mod frame;
pub mod gate;
pub mod playback;
pub mod queue;
pub mod transport;

// Re-export key types for convenience
pub use capture::CaptureSource;
pub use engine::{DialogConfig, DialogEngine, DialogEvent, DialogHandle};
pub use error::DialogError;
pub use frame::{
    AudioFormat, AudioFrame, OutboundMessage, TurnEvent, RECEIVE_SAMPLE_RATE, SEND_SAMPLE_RATE,
};
pub use gate::{EchoGate, GateConfig, GateState};
pub use playback::PlaybackSink;
pub use transport::{ResponseModality, SessionConfig};
