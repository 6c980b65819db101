//! Echo gate — keeps the model's own played-back audio out of the mic path.
//!
//! Two independent mechanisms combine here:
//!
//! * A **turn state machine** (`Idle → Playing → DrainGrace → Idle`) that
//!   suppresses all mic forwarding while response audio is playing and for a
//!   short quiet interval afterwards, so residual speaker output or an
//!   immediately reopened turn is never transmitted back.
//! * A **recent-frame history** of raw played buffers. A captured frame
//!   byte-equal to a recently played one is treated as leaked echo and
//!   dropped in *every* state, including `Idle`. This is a heuristic, not
//!   dedup — echo altered by resampling will slip through, and that is
//!   accepted.
//!
//! The state flag is only ever mutated by the playback side and read by the
//! capture side; a check-then-act race costs at worst one extra transmitted
//! or suppressed frame.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

/// Turn/playback state of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GateState {
    /// No response audio in flight — mic open.
    Idle,

    /// Response audio is playing — mic suppressed.
    Playing,

    /// Turn finished draining; waiting out the quiet interval — mic still
    /// suppressed in case the remote side barges back in.
    DrainGrace,
}

impl GateState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Playing => 1,
            Self::DrainGrace => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Playing,
            2 => Self::DrainGrace,
            _ => Self::Idle,
        }
    }
}

/// Gate tuning parameters.
///
/// The right grace interval depends on speaker/mic coupling and room
/// acoustics, so both knobs are per-deployment configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GateConfig {
    /// Quiet interval after a turn drains before the mic reopens (ms, default 400).
    pub grace_ms: u64,

    /// How many recently played frames to keep for echo-equality checks
    /// (default 256).
    pub history_capacity: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            grace_ms: 400,
            history_capacity: 256,
        }
    }
}

struct GateInner {
    state: AtomicU8,
    history: Mutex<VecDeque<Bytes>>,
    history_capacity: usize,
    grace: Duration,
}

/// Shared echo gate coordinating the capture and playback activities.
///
/// Cloning is cheap and every clone observes the same state.
#[derive(Clone)]
pub struct EchoGate {
    inner: Arc<GateInner>,
}

impl EchoGate {
    /// Create a gate in `Idle` with an empty history.
    #[must_use]
    pub fn new(config: &GateConfig) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: AtomicU8::new(GateState::Idle.as_u8()),
                history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
                history_capacity: config.history_capacity.max(1),
                grace: Duration::from_millis(config.grace_ms),
            }),
        }
    }

    /// Current gate state.
    #[must_use]
    pub fn state(&self) -> GateState {
        GateState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// The configured quiet interval.
    #[must_use]
    pub fn grace(&self) -> Duration {
        self.inner.grace
    }

    /// Whether mic forwarding is currently suppressed (any non-idle state).
    #[must_use]
    pub fn is_suppressing(&self) -> bool {
        self.state() != GateState::Idle
    }

    /// Inbound response audio was dequeued for playback.
    ///
    /// Moves to `Playing` from any state — new audio during `DrainGrace` is
    /// the remote side barging back in and restarts playback without
    /// passing through `Idle`.
    pub fn audio_arrived(&self) {
        let prev = self.inner.state.swap(GateState::Playing.as_u8(), Ordering::SeqCst);
        if prev != GateState::Playing.as_u8() {
            tracing::debug!(from = ?GateState::from_u8(prev), "echo gate: playing — mic gated");
        }
    }

    /// A turn-end signal drained through to the playback stage.
    ///
    /// Moves `Playing → DrainGrace`. A turn-end while already `Idle` (a
    /// text-only turn, for instance) leaves the gate untouched.
    pub fn turn_drained(&self) {
        if self
            .inner
            .state
            .compare_exchange(
                GateState::Playing.as_u8(),
                GateState::DrainGrace.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            tracing::debug!("echo gate: turn drained — grace interval running");
        }
    }

    /// The quiet interval elapsed with no new audio.
    ///
    /// Moves `DrainGrace → Idle` and reports whether the gate actually
    /// settled. Compare-and-swap, so a timer racing a barge-in that already
    /// returned the gate to `Playing` is a no-op.
    pub fn settle(&self) -> bool {
        let settled = self
            .inner
            .state
            .compare_exchange(
                GateState::DrainGrace.as_u8(),
                GateState::Idle.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if settled {
            tracing::debug!("echo gate: settled — mic open");
        }
        settled
    }

    /// Record a frame that was just written to the speaker.
    ///
    /// The history only grows by append-and-evict; the oldest entry leaves
    /// when capacity is exceeded.
    pub fn record_played(&self, data: &Bytes) {
        let mut history = self.inner.history.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("echo history lock poisoned, recovering");
            poisoned.into_inner()
        });
        if history.len() >= self.inner.history_capacity {
            history.pop_front();
        }
        history.push_back(data.clone());
    }

    /// Whether a captured buffer is byte-identical to a recently played one.
    #[must_use]
    pub fn is_recent_echo(&self, data: &[u8]) -> bool {
        let history = self.inner.history.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("echo history lock poisoned, recovering");
            poisoned.into_inner()
        });
        history.iter().any(|played| played.as_ref() == data)
    }
}

impl std::fmt::Debug for EchoGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoGate")
            .field("state", &self.state())
            .field("grace", &self.inner.grace)
            .finish_non_exhaustive()
    }
}
