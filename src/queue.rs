//! Bounded frame queues with explicit overflow policy.
//!
//! Two instances back the engine: the outbound queue (mic → network) and the
//! inbound queue (network → speaker). Both preserve FIFO order end-to-end.
//! Overflow behaviour is an explicit per-queue decision, not an accident:
//! the engine blocks producers on both queues (dropping mic audio degrades
//! the conversation, dropping model audio truncates the response), while the
//! device-callback boundary uses [`FrameSender::try_put`] because a hardware
//! driver thread must never block.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DialogError;

/// What a blocked `put` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OverflowPolicy {
    /// Suspend the producer until space is available (true backpressure).
    Block,

    /// Log and drop the new item instead of waiting.
    DropNewest,
}

/// Create a bounded FIFO queue with the given capacity and overflow policy.
/// A capacity of zero is treated as one.
///
/// The `label` shows up in log lines when frames are dropped or the queue
/// closes, so each queue in a pipeline should get a distinct one.
#[must_use]
pub fn bounded<T>(
    capacity: usize,
    policy: OverflowPolicy,
    label: &'static str,
) -> (FrameSender<T>, FrameReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        FrameSender { tx, policy, label },
        FrameReceiver { rx, label },
    )
}

/// Producer half of a bounded frame queue.
#[derive(Debug)]
pub struct FrameSender<T> {
    tx: mpsc::Sender<T>,
    policy: OverflowPolicy,
    label: &'static str,
}

impl<T> Clone for FrameSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            policy: self.policy,
            label: self.label,
        }
    }
}

impl<T> FrameSender<T> {
    /// Enqueue an item according to the configured overflow policy.
    ///
    /// Under [`OverflowPolicy::Block`] this suspends until space is
    /// available. Under [`OverflowPolicy::DropNewest`] a full queue logs a
    /// warning and discards the item without error — the pipeline keeps
    /// running. Fails with [`DialogError::QueueClosed`] once the consumer
    /// has closed the queue.
    pub async fn put(&self, item: T) -> Result<(), DialogError> {
        match self.policy {
            OverflowPolicy::Block => self
                .tx
                .send(item)
                .await
                .map_err(|_| DialogError::QueueClosed),
            OverflowPolicy::DropNewest => match self.tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(queue = self.label, "queue full, dropping frame");
                    Ok(())
                }
                Err(TrySendError::Closed(_)) => Err(DialogError::QueueClosed),
            },
        }
    }

    /// Non-blocking enqueue regardless of policy.
    ///
    /// Fails with [`DialogError::QueueFull`] at capacity. This is the only
    /// form safe to call from a real-time audio callback.
    pub fn try_put(&self, item: T) -> Result<(), DialogError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DialogError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(DialogError::QueueClosed),
        }
    }
}

/// Consumer half of a bounded frame queue.
#[derive(Debug)]
pub struct FrameReceiver<T> {
    rx: mpsc::Receiver<T>,
    label: &'static str,
}

impl<T> FrameReceiver<T> {
    /// Dequeue the next item in FIFO order, suspending while the queue is
    /// empty.
    ///
    /// After [`close`](Self::close) (or once every sender is dropped) the
    /// remaining items drain in order, then `get` fails with
    /// [`DialogError::QueueClosed`].
    pub async fn get(&mut self) -> Result<T, DialogError> {
        self.rx.recv().await.ok_or(DialogError::QueueClosed)
    }

    /// Stop accepting new items. Items already queued remain retrievable.
    pub fn close(&mut self) {
        tracing::debug!(queue = self.label, "queue closed");
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved() {
        tokio_test::block_on(async {
            let (tx, mut rx) = bounded(8, OverflowPolicy::Block, "test");
            for i in 0..5 {
                tx.put(i).await.unwrap();
            }
            for i in 0..5 {
                assert_eq!(rx.get().await.unwrap(), i);
            }
        });
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        tokio_test::block_on(async {
            let (tx, mut rx) = bounded(0, OverflowPolicy::Block, "test");
            tx.put(1).await.unwrap();
            assert!(matches!(tx.try_put(2), Err(DialogError::QueueFull)));
            assert_eq!(rx.get().await.unwrap(), 1);
        });
    }

    #[test]
    fn try_put_reports_full_at_capacity() {
        tokio_test::block_on(async {
            let (tx, _rx) = bounded(2, OverflowPolicy::Block, "test");
            tx.put(1).await.unwrap();
            tx.put(2).await.unwrap();
            assert!(matches!(tx.try_put(3), Err(DialogError::QueueFull)));
        });
    }

    #[test]
    fn drop_newest_discards_without_error() {
        tokio_test::block_on(async {
            let (tx, mut rx) = bounded(1, OverflowPolicy::DropNewest, "test");
            tx.put(1).await.unwrap();
            // Queue is full — this drops silently rather than blocking.
            tx.put(2).await.unwrap();
            assert_eq!(rx.get().await.unwrap(), 1);
        });
    }

    #[test]
    fn blocking_producer_never_loses_frames() {
        tokio_test::block_on(async {
            let (tx, mut rx) = bounded(2, OverflowPolicy::Block, "test");
            let producer = tokio::spawn(async move {
                for i in 0..20 {
                    tx.put(i).await.unwrap();
                }
            });
            for i in 0..20 {
                assert_eq!(rx.get().await.unwrap(), i);
            }
            producer.await.unwrap();
        });
    }

    #[test]
    fn close_drains_then_fails() {
        tokio_test::block_on(async {
            let (tx, mut rx) = bounded(4, OverflowPolicy::Block, "test");
            tx.put(1).await.unwrap();
            tx.put(2).await.unwrap();
            rx.close();

            assert_eq!(rx.get().await.unwrap(), 1);
            assert_eq!(rx.get().await.unwrap(), 2);
            assert!(matches!(rx.get().await, Err(DialogError::QueueClosed)));
            assert!(matches!(tx.put(3).await, Err(DialogError::QueueClosed)));
        });
    }

    #[test]
    fn get_fails_once_producers_are_gone() {
        tokio_test::block_on(async {
            let (tx, mut rx) = bounded::<u32>(4, OverflowPolicy::Block, "test");
            drop(tx);
            assert!(matches!(rx.get().await, Err(DialogError::QueueClosed)));
        });
    }
}
