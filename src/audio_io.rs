//! Device-backed capture and playback adapters (cpal + rodio).
//!
//! `cpal::Stream` and `rodio::OutputStream` are `!Send` on some platforms
//! (macOS CoreAudio in particular), so each adapter confines its device
//! handle to a dedicated OS thread and proxies through channels. The cpal
//! callback runs on the hardware driver thread and only ever performs a
//! non-blocking enqueue — conditioning (downmix, resample, framing) happens
//! on the adapter thread, never in the callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use rodio::{OutputStream, Sink};

use crate::capture::{downmix_to_mono, f32_to_pcm16_bytes, CaptureSource, StreamResampler};
use crate::error::DialogError;
use crate::frame::{AudioFormat, AudioFrame};
use crate::playback::PlaybackSink;

/// Capacity of the callback → adapter-thread handoff, in device buffers.
const RAW_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the adapter-thread → engine frame channel.
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// How many queued sources the playback sink tolerates before a write is
/// held back (emulates a blocking device write).
const MAX_QUEUED_SOURCES: usize = 4;

/// Information about an available audio input device.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
}

/// Verify the default devices against the session's sample rates before a
/// session starts, so device problems surface as one early error instead of
/// a mid-session failure.
///
/// The output device must support playback at `receive_rate` — response
/// audio is never resampled. Capture is resampled, so the input device only
/// needs some usable configuration; a device that cannot run at `send_rate`
/// natively just notes that the resampler will be engaged.
pub fn check_devices(send_rate: u32, receive_rate: u32) -> Result<(), DialogError> {
    let host = cpal::default_host();

    let input = host.default_input_device().ok_or(DialogError::NoInputDevice)?;
    let input_ranges: Vec<(u32, u32)> = input
        .supported_input_configs()
        .map_err(|e| DialogError::InputStream(e.to_string()))?
        .map(|c| (c.min_sample_rate().0, c.max_sample_rate().0))
        .collect();
    if input_ranges.is_empty() {
        return Err(DialogError::InputStream(
            "device reports no supported configurations".into(),
        ));
    }
    if !rate_in_ranges(&input_ranges, send_rate) {
        tracing::debug!(
            rate = send_rate,
            "input device cannot capture at the send rate natively, resampling"
        );
    }

    let output = host
        .default_output_device()
        .ok_or(DialogError::NoOutputDevice)?;
    let output_ranges: Vec<(u32, u32)> = output
        .supported_output_configs()
        .map_err(|e| DialogError::OutputStream(e.to_string()))?
        .map(|c| (c.min_sample_rate().0, c.max_sample_rate().0))
        .collect();
    if !rate_in_ranges(&output_ranges, receive_rate) {
        return Err(DialogError::OutputStream(format!(
            "device does not support playback at {receive_rate} Hz"
        )));
    }

    Ok(())
}

/// Whether any supported configuration range covers the given rate
/// (inclusive bounds, matching cpal's min/max sample rate pairs).
fn rate_in_ranges(ranges: &[(u32, u32)], rate: u32) -> bool {
    ranges.iter().any(|&(min, max)| min <= rate && rate <= max)
}

/// List available audio input devices.
pub fn list_input_devices() -> Result<Vec<AudioDeviceInfo>, DialogError> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let devices = host
        .input_devices()
        .map_err(|e| DialogError::InputStream(e.to_string()))?;

    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push(AudioDeviceInfo {
                is_default: name == default_name,
                name,
            });
        }
    }

    Ok(result)
}

// ── Microphone capture ─────────────────────────────────────────────

/// Microphone capture via cpal, confined to a dedicated OS thread.
///
/// The thread opens the default input device at its native configuration,
/// then downmixes, resamples to the requested rate, and slices the stream
/// into fixed-size 16-bit PCM frames.
pub struct MicCapture {
    frames: tokio::sync::mpsc::Receiver<AudioFrame>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MicCapture {
    /// Open the default input device, producing frames of `frame_size`
    /// samples in the given format.
    pub fn open(format: AudioFormat, frame_size: usize) -> Result<Self, DialogError> {
        let (frame_tx, frame_rx) = tokio::sync::mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (init_tx, init_rx) = mpsc::channel::<Result<(), DialogError>>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("dialog-capture".into())
            .spawn(move || {
                run_capture_thread(format, frame_size, &frame_tx, &init_tx, &shutdown_flag);
            })
            .map_err(|e| DialogError::InputStream(format!("failed to spawn capture thread: {e}")))?;

        // Wait for the device to open (or fail) on the adapter thread.
        init_rx.recv().map_err(|_| DialogError::AudioThreadDied)??;

        Ok(Self {
            frames: frame_rx,
            shutdown,
            thread: Some(thread),
        })
    }
}

#[async_trait::async_trait]
impl CaptureSource for MicCapture {
    async fn next_frame(&mut self) -> Result<AudioFrame, DialogError> {
        self.frames.recv().await.ok_or(DialogError::AudioThreadDied)
    }

    fn close(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.frames.close();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.close();
    }
}

#[allow(clippy::too_many_lines)]
fn run_capture_thread(
    format: AudioFormat,
    frame_size: usize,
    frame_tx: &tokio::sync::mpsc::Sender<AudioFrame>,
    init_tx: &mpsc::Sender<Result<(), DialogError>>,
    shutdown: &AtomicBool,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = init_tx.send(Err(DialogError::NoInputDevice));
        return;
    };

    let device_config = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = init_tx.send(Err(DialogError::InputStream(e.to_string())));
            return;
        }
    };

    let device_rate = device_config.sample_rate().0;
    let device_channels = device_config.channels();
    let sample_format = device_config.sample_format();
    let stream_config: StreamConfig = device_config.into();

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels = device_channels,
        target_rate = format.sample_rate,
        "audio capture opened"
    );

    // Callback → this thread. The callback must never block the driver, so
    // it uses try_send and a full channel drops the device buffer.
    let (raw_tx, raw_rx) = mpsc::sync_channel::<Vec<f32>>(RAW_CHANNEL_CAPACITY);

    let err_fn = |err: cpal::StreamError| {
        tracing::error!(%err, "audio input stream error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if raw_tx.try_send(data.to_vec()).is_err() {
                    tracing::warn!("capture handoff full, dropping device buffer");
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let float_data: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                if raw_tx.try_send(float_data).is_err() {
                    tracing::warn!("capture handoff full, dropping device buffer");
                }
            },
            err_fn,
            None,
        ),
        other => {
            let _ = init_tx.send(Err(DialogError::InputStream(format!(
                "Unsupported sample format: {other:?}"
            ))));
            return;
        }
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = init_tx.send(Err(DialogError::InputStream(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = init_tx.send(Err(DialogError::InputStream(e.to_string())));
        return;
    }

    let mut resampler = if device_rate == format.sample_rate {
        None
    } else {
        match StreamResampler::new(device_rate, format.sample_rate) {
            Ok(r) => Some(r),
            Err(e) => {
                let _ = init_tx.send(Err(e));
                return;
            }
        }
    };

    if init_tx.send(Ok(())).is_err() {
        return;
    }

    // Conditioning loop: downmix → resample → slice into frames. The
    // recv timeout bounds how long close() waits for the thread to notice
    // the shutdown flag.
    let mut conditioned: Vec<f32> = Vec::new();
    while !shutdown.load(Ordering::SeqCst) {
        let chunk = match raw_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => chunk,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let mono = downmix_to_mono(&chunk, device_channels);
        if let Some(ref mut resampler) = resampler {
            if let Err(e) = resampler.process(&mono, &mut conditioned) {
                tracing::error!(error = %e, "capture resampling failed, stopping");
                break;
            }
        } else {
            conditioned.extend_from_slice(&mono);
        }

        while conditioned.len() >= frame_size {
            let samples: Vec<f32> = conditioned.drain(..frame_size).collect();
            let frame = AudioFrame::new(f32_to_pcm16_bytes(&samples), format);
            // Blocking here backpressures the conditioning loop, not the
            // driver thread. An error means the engine side is gone.
            if frame_tx.blocking_send(frame).is_err() {
                drop(stream);
                return;
            }
        }
    }

    drop(stream);
    tracing::debug!("capture thread shutting down");
}

// ── Speaker playback ───────────────────────────────────────────────

enum PlaybackCommand {
    Write {
        samples: Vec<i16>,
        channels: u16,
        sample_rate: u32,
        reply: tokio::sync::oneshot::Sender<Result<(), DialogError>>,
    },
    Close,
}

/// Speaker playback via rodio, confined to a dedicated OS thread.
///
/// Writes are paced against the sink's queue depth so
/// [`write_frame`](PlaybackSink::write_frame) behaves like a blocking
/// device write: the caller suspends once a small lead has built up.
pub struct SpeakerSink {
    cmd_tx: mpsc::Sender<PlaybackCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SpeakerSink {
    /// Open the default output device.
    pub fn open() -> Result<Self, DialogError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<PlaybackCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), DialogError>>();

        let thread = thread::Builder::new()
            .name("dialog-playback".into())
            .spawn(move || {
                run_playback_thread(&cmd_rx, &init_tx);
            })
            .map_err(|e| {
                DialogError::OutputStream(format!("failed to spawn playback thread: {e}"))
            })?;

        init_rx.recv().map_err(|_| DialogError::AudioThreadDied)??;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }
}

#[async_trait::async_trait]
impl PlaybackSink for SpeakerSink {
    async fn write_frame(&mut self, frame: &AudioFrame) -> Result<(), DialogError> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.cmd_tx
            .send(PlaybackCommand::Write {
                samples: frame.samples(),
                channels: frame.format.channels,
                sample_rate: frame.format.sample_rate,
                reply,
            })
            .map_err(|_| DialogError::AudioThreadDied)?;
        rx.await.map_err(|_| DialogError::AudioThreadDied)?
    }

    fn close(&mut self) {
        let _ = self.cmd_tx.send(PlaybackCommand::Close);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_playback_thread(
    cmd_rx: &mpsc::Receiver<PlaybackCommand>,
    init_tx: &mpsc::Sender<Result<(), DialogError>>,
) {
    let stream = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = init_tx.send(Err(DialogError::OutputStream(e.to_string())));
            return;
        }
    };
    let (_stream, stream_handle) = stream;

    let sink = match Sink::try_new(&stream_handle) {
        Ok(s) => s,
        Err(e) => {
            let _ = init_tx.send(Err(DialogError::OutputStream(e.to_string())));
            return;
        }
    };

    tracing::info!("audio playback opened on default output device");

    if init_tx.send(Ok(())).is_err() {
        return;
    }

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            PlaybackCommand::Write {
                samples,
                channels,
                sample_rate,
                reply,
            } => {
                let source = rodio::buffer::SamplesBuffer::new(channels, sample_rate, samples);
                sink.append(source);

                // Hold the reply until the device has drained down to a
                // small lead, so the caller experiences a blocking write.
                while sink.len() > MAX_QUEUED_SOURCES {
                    thread::sleep(Duration::from_millis(5));
                }
                let _ = reply.send(Ok(()));
            }
            PlaybackCommand::Close => break,
        }
    }

    sink.stop();
    tracing::debug!("playback thread shutting down");
}
