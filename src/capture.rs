//! Capture seam and PCM conditioning helpers.
//!
//! [`CaptureSource`] is the injection point for microphone input — the
//! engine only ever awaits frames through it, so tests substitute an
//! in-memory source and production uses the cpal-backed adapter in
//! [`audio_io`](crate::audio_io). The helpers below (downmix, streaming
//! resample, f32 → i16) condition whatever the device delivers into the
//! 16 kHz mono 16-bit frames the outbound stream requires.

use async_trait::async_trait;
use rubato::{FftFixedIn, Resampler as _};

use crate::error::DialogError;
use crate::frame::AudioFrame;

/// An async source of captured audio frames.
///
/// `next_frame` suspends until a full frame of samples is available. Read
/// errors are fatal to the session — the engine does not retry a failing
/// device.
#[async_trait]
pub trait CaptureSource: Send {
    /// Suspend until the next captured frame is ready.
    async fn next_frame(&mut self) -> Result<AudioFrame, DialogError>;

    /// Release the input device. Idempotent; called unconditionally on
    /// shutdown, even mid-frame.
    fn close(&mut self);
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
#[must_use]
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    #[allow(clippy::cast_precision_loss)]
    samples
        .chunks_exact(channels)
        .map(|group| group.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Convert f32 samples in [-1.0, 1.0] to 16-bit signed LE PCM bytes.
#[must_use]
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Streaming FFT resampler for the capture path.
///
/// Device sample rates rarely match the 16 kHz the dialog service expects.
/// Unlike a one-shot resample, this keeps leftover input between calls so a
/// continuous stream loses no samples at chunk boundaries.
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
    chunk_size: usize,
}

impl StreamResampler {
    /// Create a mono resampler from `from_rate` to `to_rate`.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, DialogError> {
        let chunk_size = 1024;
        let inner = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            chunk_size,
            2, // sub-chunks for quality
            1, // mono
        )
        .map_err(|e| DialogError::Resample(e.to_string()))?;

        Ok(Self {
            inner,
            pending: Vec::new(),
            chunk_size,
        })
    }

    /// Feed device samples in; append converted samples to `out`.
    ///
    /// Input shorter than one internal chunk is buffered until enough has
    /// accumulated.
    pub fn process(&mut self, samples: &[f32], out: &mut Vec<f32>) -> Result<(), DialogError> {
        self.pending.extend_from_slice(samples);

        while self.pending.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.pending.drain(..self.chunk_size).collect();
            let result = self
                .inner
                .process(&[chunk.as_slice()], None)
                .map_err(|e| DialogError::Resample(e.to_string()))?;
            if let Some(channel) = result.first() {
                out.extend_from_slice(channel);
            }
        }

        Ok(())
    }
}
