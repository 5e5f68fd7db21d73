//! Ordered hand-off between the orchestrator and the playback worker.

use crate::engine::AudioBuffer;
use crate::error::{PipelineError, Result};
use tokio::sync::mpsc::{self, error::TryRecvError};

#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Audio(AudioBuffer),
    /// No more items will ever be pushed.
    EndOfStream,
}

/// Creates an unbounded FIFO playback queue.
pub fn playback_queue() -> (PlaybackSender, PlaybackReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PlaybackSender { tx }, PlaybackReceiver { rx })
}

#[derive(Clone)]
pub struct PlaybackSender {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl PlaybackSender {
    /// Appends to the tail. Never waits; fails only once the receiver is gone.
    pub fn push(&self, item: QueueItem) -> Result<()> {
        self.tx.send(item).map_err(|_| PipelineError::QueueClosed)
    }

    pub fn push_audio(&self, buffer: AudioBuffer) -> Result<()> {
        self.push(QueueItem::Audio(buffer))
    }

    /// Pushes the end-of-stream sentinel.
    pub fn finish(&self) -> Result<()> {
        self.push(QueueItem::EndOfStream)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct PlaybackReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
}

impl PlaybackReceiver {
    /// Waits for the next item in push order.
    ///
    /// If every sender is dropped without a sentinel, this yields
    /// `EndOfStream` instead of waiting forever.
    pub async fn pop(&mut self) -> QueueItem {
        self.rx.recv().await.unwrap_or(QueueItem::EndOfStream)
    }

    /// Returns the next item if one is already queued.
    pub fn try_pop(&mut self) -> Option<QueueItem> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(QueueItem::EndOfStream),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn buffer(tag: f32) -> AudioBuffer {
        AudioBuffer::new(vec![tag; 4], 16000)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (tx, mut rx) = playback_queue();
        tx.push_audio(buffer(1.0)).unwrap();
        tx.push_audio(buffer(2.0)).unwrap();
        tx.push_audio(buffer(3.0)).unwrap();

        assert_eq!(rx.pop().await, QueueItem::Audio(buffer(1.0)));
        assert_eq!(rx.pop().await, QueueItem::Audio(buffer(2.0)));
        assert_eq!(rx.pop().await, QueueItem::Audio(buffer(3.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_with_slow_consumer_and_bursty_producer() {
        let (tx, mut rx) = playback_queue();
        let producer = tokio::spawn(async move {
            for i in 0..50 {
                tx.push_audio(buffer(i as f32)).unwrap();
                if i % 7 == 0 {
                    tokio::time::sleep(Duration::from_millis(3)).await;
                }
            }
            tx.finish().unwrap();
        });

        let mut seen = Vec::new();
        loop {
            match rx.pop().await {
                QueueItem::Audio(buf) => {
                    seen.push(buf.samples[0] as i32);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                QueueItem::EndOfStream => break,
            }
        }
        producer.await.unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_dropped_sender_ends_stream() {
        let (tx, mut rx) = playback_queue();
        tx.push_audio(buffer(1.0)).unwrap();
        drop(tx);
        assert_eq!(rx.pop().await, QueueItem::Audio(buffer(1.0)));
        assert_eq!(rx.pop().await, QueueItem::EndOfStream);
    }

    #[test]
    fn test_push_after_receiver_dropped() {
        let (tx, rx) = playback_queue();
        drop(rx);
        assert!(tx.is_closed());
        assert!(matches!(tx.push_audio(buffer(1.0)), Err(PipelineError::QueueClosed)));
    }

    #[test]
    fn test_try_pop_empty() {
        let (tx, mut rx) = playback_queue();
        assert_eq!(rx.try_pop(), None);
        tx.finish().unwrap();
        assert_eq!(rx.try_pop(), Some(QueueItem::EndOfStream));
    }
}
