//! Playback seam — where inbound response audio leaves the engine.
//!
//! The engine only ever writes frames through [`PlaybackSink`], so tests
//! substitute an in-memory sink and production uses the rodio-backed
//! adapter in [`audio_io`](crate::audio_io).

use async_trait::async_trait;

use crate::error::DialogError;
use crate::frame::AudioFrame;

/// An async sink for response audio frames.
#[async_trait]
pub trait PlaybackSink: Send {
    /// Write one frame to the output device.
    ///
    /// Suspends until the device accepts the frame — this is the natural
    /// flow control on the inbound path; the play activity never gets far
    /// ahead of the speaker.
    async fn write_frame(&mut self, frame: &AudioFrame) -> Result<(), DialogError>;

    /// Release the output device. Idempotent; called unconditionally on
    /// shutdown, even mid-frame, so repeated start/stop cycles never leak
    /// a device handle.
    fn close(&mut self);
}
