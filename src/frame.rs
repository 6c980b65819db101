//! Core data types — audio frames, outbound messages, and turn events.
//!
//! All audio moving through the engine is mono 16-bit signed little-endian
//! PCM. The microphone path runs at 16 kHz, the model's response audio at
//! 24 kHz. Frame payloads are [`Bytes`] so the echo history can hold cheap
//! clones without copying sample data.

use std::time::Duration;

use bytes::Bytes;

/// Sample rate of outbound (microphone) audio.
pub const SEND_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of inbound (model response) audio.
pub const RECEIVE_SAMPLE_RATE: u32 = 24_000;

/// All streams are mono.
pub const CHANNELS: u16 = 1;

/// Sample format descriptor attached to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AudioFormat {
    /// Samples per second.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

impl AudioFormat {
    /// Format of the outbound microphone stream (16 kHz mono).
    #[must_use]
    pub const fn send() -> Self {
        Self {
            sample_rate: SEND_SAMPLE_RATE,
            channels: CHANNELS,
        }
    }

    /// Format of the inbound model audio stream (24 kHz mono).
    #[must_use]
    pub const fn receive() -> Self {
        Self {
            sample_rate: RECEIVE_SAMPLE_RATE,
            channels: CHANNELS,
        }
    }
}

/// One immutable chunk of 16-bit signed LE PCM audio.
///
/// Created by a capture source or the session transport, owned by whichever
/// queue currently holds it, and consumed exactly once downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Raw PCM payload (2 bytes per sample).
    pub data: Bytes,
    /// Sample rate / channel tag.
    pub format: AudioFormat,
}

impl AudioFrame {
    /// Wrap raw PCM bytes in a frame.
    pub fn new(data: impl Into<Bytes>, format: AudioFormat) -> Self {
        Self {
            data: data.into(),
            format,
        }
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the payload into i16 samples (little-endian pairs).
    ///
    /// A trailing odd byte is ignored; well-formed producers never emit one.
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Wall-clock duration of this frame when played at its native rate.
    #[must_use]
    pub fn duration(&self) -> Duration {
        let samples = self.data.len() / 2;
        let per_second = u64::from(self.format.sample_rate) * u64::from(self.format.channels);
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(samples as u64 * 1_000_000_000 / per_second)
    }
}

/// Unit of transmission to the session transport: a frame plus its MIME tag.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// The audio payload.
    pub frame: AudioFrame,
    /// Wire format descriptor, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
}

impl OutboundMessage {
    /// Build a PCM message with the MIME tag derived from the frame format.
    #[must_use]
    pub fn pcm(frame: AudioFrame) -> Self {
        let mime_type = format!("audio/pcm;rate={}", frame.format.sample_rate);
        Self { frame, mime_type }
    }
}

/// One event on the inbound stream of a dialog session.
///
/// Within a turn, chunk order is preserved; `TurnEnd` always terminates the
/// turn. Transport failures surface as `Err` from the event stream itself
/// rather than as a variant here.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A chunk of model response audio (24 kHz mono PCM).
    AudioChunk(AudioFrame),

    /// A chunk of model response text (transcript or text modality).
    TextChunk(String),

    /// The model finished its turn.
    TurnEnd,
}
