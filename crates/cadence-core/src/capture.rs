//! Capture pump: the producer half of the frame pipeline.
//!
//! Frames flow through a small bounded channel. When the channel is full the
//! newest frame is dropped (its buffer goes straight back to the pool) so
//! the producer never waits on the consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::collaborators::FrameSource;
use crate::frame::{Frame, FramePool};
use crate::types::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// Buffer full (or consumer gone); the frame was released.
    Dropped,
}

/// Producer side of the bounded frame buffer.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    tx: mpsc::Sender<Frame>,
}

/// Create a frame buffer holding at most `capacity` frames (minimum 1).
pub fn frame_buffer(capacity: usize) -> (FrameBuffer, mpsc::Receiver<Frame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameBuffer { tx }, rx)
}

impl FrameBuffer {
    /// Never blocks. On a full buffer the offered frame is discarded.
    pub fn offer(&self, frame: Frame) -> Offer {
        match self.tx.try_send(frame) {
            Ok(()) => Offer::Queued,
            Err(_) => Offer::Dropped,
        }
    }
}

/// Release every frame still queued in `rx`. Returns how many there were.
pub fn drain(rx: &mut mpsc::Receiver<Frame>) -> usize {
    rx.close();
    let mut released = 0;
    while let Ok(frame) = rx.try_recv() {
        drop(frame);
        released += 1;
    }
    released
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub queued: u64,
    pub dropped: u64,
    pub misses: u64,
}

pub struct CapturePump {
    source: Arc<dyn FrameSource>,
    pool: FramePool,
    region: watch::Receiver<Region>,
    poll: Duration,
    buffer: FrameBuffer,
}

impl CapturePump {
    pub fn new(
        source: Arc<dyn FrameSource>,
        pool: FramePool,
        region: watch::Receiver<Region>,
        poll: Duration,
        buffer: FrameBuffer,
    ) -> Self {
        Self {
            source,
            pool,
            region,
            poll,
            buffer,
        }
    }

    /// Pull frames until `cancel` flips to true or its sender goes away.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> PumpStats {
        let mut stats = PumpStats::default();
        loop {
            if *cancel.borrow() {
                break;
            }

            let region = *self.region.borrow();
            let source = Arc::clone(&self.source);
            let pool = self.pool.clone();
            match tokio::task::spawn_blocking(move || source.get_region(region, &pool)).await {
                Ok(Some(frame)) => match self.buffer.offer(frame) {
                    Offer::Queued => stats.queued += 1,
                    Offer::Dropped => stats.dropped += 1,
                },
                Ok(None) => {
                    stats.misses += 1;
                    debug!("frame source returned nothing");
                }
                Err(e) => {
                    stats.misses += 1;
                    warn!(error = %e, "frame source task failed");
                }
            }

            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll) => {}
            }
        }
        debug!(
            queued = stats.queued,
            dropped = stats.dropped,
            misses = stats.misses,
            "capture pump exited"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn third_frame_into_full_buffer_is_dropped() {
        let pool = FramePool::new(4);
        let (buffer, mut rx) = frame_buffer(2);
        let mut seqs = Vec::new();
        for _ in 0..3 {
            let frame = pool.acquire(1, 1);
            seqs.push(frame.seq());
            buffer.offer(frame);
        }

        // The dropped frame is released immediately.
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(rx.try_recv().unwrap().seq(), seqs[0]);
        assert_eq!(rx.try_recv().unwrap().seq(), seqs[1]);
        assert!(rx.try_recv().is_err());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn offer_reports_drop() {
        let pool = FramePool::new(4);
        let (buffer, _rx) = frame_buffer(2);
        assert_eq!(buffer.offer(pool.acquire(1, 1)), Offer::Queued);
        assert_eq!(buffer.offer(pool.acquire(1, 1)), Offer::Queued);
        assert_eq!(buffer.offer(pool.acquire(1, 1)), Offer::Dropped);
    }

    #[test]
    fn drain_releases_queued_frames() {
        let pool = FramePool::new(4);
        let (buffer, mut rx) = frame_buffer(2);
        buffer.offer(pool.acquire(1, 1));
        buffer.offer(pool.acquire(1, 1));
        assert_eq!(drain(&mut rx), 2);
        assert_eq!(pool.outstanding(), 0);
        // Closed: further offers are dropped.
        assert_eq!(buffer.offer(pool.acquire(1, 1)), Offer::Dropped);
        assert_eq!(pool.outstanding(), 0);
    }

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl FrameSource for CountingSource {
        fn get_region(&self, region: Region, pool: &FramePool) -> Option<Frame> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            // Every other call misses.
            (n % 2 == 0).then(|| pool.acquire(region.width, region.height))
        }
    }

    #[tokio::test]
    async fn pump_stops_on_cancel_and_tolerates_misses() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let pool = FramePool::new(4);
        let (_region_tx, region_rx) = watch::channel(Region::new(0, 0, 4, 4));
        let (buffer, mut rx) = frame_buffer(2);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let pump = CapturePump::new(
            source.clone(),
            pool.clone(),
            region_rx,
            Duration::from_millis(5),
            buffer,
        );
        let task = tokio::spawn(pump.run(cancel_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("pump did not stop")
            .unwrap();

        assert!(stats.misses > 0);
        assert!(stats.queued >= 1);
        // Nobody consumed, so everything past the first two was dropped.
        assert_eq!(stats.queued, 2);
        assert_eq!(drain(&mut rx), 2);
        assert_eq!(pool.outstanding(), 0);
    }
}
