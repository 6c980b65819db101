//! Dialog engine error types.

/// Errors that can occur in the audio dialog engine.
#[derive(Debug, thiserror::Error)]
pub enum DialogError {
    /// No audio input device found.
    #[error("No audio input device found")]
    NoInputDevice,

    /// No audio output device found.
    #[error("No audio output device found")]
    NoOutputDevice,

    /// Failed to open audio input stream.
    #[error("Failed to open audio input stream: {0}")]
    InputStream(String),

    /// Failed to open audio output stream.
    #[error("Failed to open audio output stream: {0}")]
    OutputStream(String),

    /// A dedicated audio device thread terminated unexpectedly.
    #[error("Audio device thread terminated unexpectedly")]
    AudioThreadDied,

    /// Failed to connect the dialog session.
    #[error("Failed to connect dialog session: {0}")]
    Connect(String),

    /// Failed to send audio over the dialog session.
    #[error("Failed to send audio to dialog session: {0}")]
    Send(String),

    /// The inbound event stream failed.
    #[error("Dialog event stream failed: {0}")]
    Receive(String),

    /// A bounded frame queue rejected an item (non-blocking put at capacity).
    #[error("Frame queue is full")]
    QueueFull,

    /// A frame queue was closed and fully drained.
    #[error("Frame queue is closed")]
    QueueClosed,

    /// Audio resampling error.
    #[error("Audio resampling failed: {0}")]
    Resample(String),

    /// One of the engine activities panicked.
    #[error("Dialog activity panicked: {0}")]
    ActivityPanic(String),
}
