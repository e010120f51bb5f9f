//! Frame distributor
//!
//! Each active capture session owns a bounded broadcast ring. Every
//! subscribed viewer gets its own delivery task reading the ring with its
//! own cursor, so a slow viewer only loses its own oldest frames and the
//! capture side never waits.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::frame::Frame;
use crate::error::{AppError, Result};
use crate::events::SubscriberStats;
use crate::utils::LogThrottler;

/// Default ring depth per capture session
pub const DEFAULT_FRAME_QUEUE_DEPTH: usize = 4;

/// Destination of delivered frames, typically a peer transport
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Deliver one frame; an error counts as a failed delivery
    async fn send_frame(&self, frame: &Frame) -> Result<()>;
}

/// Capture-side handle used to push frames into a session's ring
#[derive(Clone)]
pub struct FramePublisher {
    tx: broadcast::Sender<Arc<Frame>>,
}

impl FramePublisher {
    /// Push a frame; never blocks. Returns the number of subscribers.
    pub fn publish(&self, frame: Frame) -> usize {
        self.tx.send(Arc::new(frame)).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self, viewer_id: &str) -> SubscriberStats {
        SubscriberStats {
            viewer_id: viewer_id.to_string(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

struct Subscription {
    session_id: String,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

/// Fan-out of captured frames to subscribed viewers
pub struct FrameDistributor {
    depth: usize,
    rings: Mutex<HashMap<String, broadcast::Sender<Arc<Frame>>>>,
    subscribers: Mutex<HashMap<String, Subscription>>,
    throttler: Arc<LogThrottler>,
}

impl FrameDistributor {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
            rings: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            throttler: Arc::new(LogThrottler::with_secs(5)),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.depth
    }

    /// Create (or return) the ring of a capture session
    pub fn open(&self, session_id: &str) -> FramePublisher {
        let tx = self
            .rings
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.depth).0)
            .clone();
        debug!("Opened frame ring for session {} (depth {})", session_id, self.depth);
        FramePublisher { tx }
    }

    /// Register a viewer on a session's ring
    ///
    /// A viewer has at most one subscription; subscribing again replaces
    /// the previous one.
    pub fn subscribe(
        &self,
        session_id: &str,
        viewer_id: &str,
        sink: Arc<dyn FrameSink>,
    ) -> Result<()> {
        let rx = self
            .rings
            .lock()
            .get(session_id)
            .map(|tx| tx.subscribe())
            .ok_or_else(|| AppError::NotFound(format!("capture session {}", session_id)))?;

        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();
        let previous = self.subscribers.lock().insert(
            viewer_id.to_string(),
            Subscription {
                session_id: session_id.to_string(),
                counters: counters.clone(),
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        tokio::spawn(deliver(
            viewer_id.to_string(),
            rx,
            sink,
            counters,
            cancel,
            self.throttler.clone(),
        ));
        debug!("Viewer {} subscribed to session {}", viewer_id, session_id);
        Ok(())
    }

    /// Stop delivering to a viewer; returns its final counters
    pub fn unsubscribe(&self, viewer_id: &str) -> Option<SubscriberStats> {
        let sub = self.subscribers.lock().remove(viewer_id)?;
        sub.cancel.cancel();
        self.throttler.clear_prefix(&format!("{}:", viewer_id));
        let stats = sub.counters.snapshot(viewer_id);
        debug!(
            "Viewer {} unsubscribed from {}: delivered={} dropped={} failed={}",
            viewer_id, sub.session_id, stats.delivered, stats.dropped, stats.failed
        );
        Some(stats)
    }

    /// Drop a session's ring and every subscription on it
    pub fn close(&self, session_id: &str) {
        self.rings.lock().remove(session_id);
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|viewer_id, sub| {
            if sub.session_id == session_id {
                sub.cancel.cancel();
                self.throttler.clear_prefix(&format!("{}:", viewer_id));
                false
            } else {
                true
            }
        });
        debug!("Closed frame ring for session {}", session_id);
    }

    pub fn subscriber_stats(&self, viewer_id: &str) -> Option<SubscriberStats> {
        self.subscribers
            .lock()
            .get(viewer_id)
            .map(|s| s.counters.snapshot(viewer_id))
    }

    /// Counters of every subscriber of a session
    pub fn session_stats(&self, session_id: &str) -> Vec<SubscriberStats> {
        let mut stats: Vec<_> = self
            .subscribers
            .lock()
            .iter()
            .filter(|(_, s)| s.session_id == session_id)
            .map(|(viewer, s)| s.counters.snapshot(viewer))
            .collect();
        stats.sort_by(|a, b| a.viewer_id.cmp(&b.viewer_id));
        stats
    }

    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.subscribers
            .lock()
            .values()
            .filter(|s| s.session_id == session_id)
            .count()
    }

    pub fn is_subscribed(&self, viewer_id: &str) -> bool {
        self.subscribers.lock().contains_key(viewer_id)
    }
}

impl Default for FrameDistributor {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_QUEUE_DEPTH)
    }
}

/// Delivery loop of one subscriber
async fn deliver(
    viewer_id: String,
    mut rx: broadcast::Receiver<Arc<Frame>>,
    sink: Arc<dyn FrameSink>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    throttler: Arc<LogThrottler>,
) {
    let drop_key = format!("{}:drop", viewer_id);
    let fail_key = format!("{}:send", viewer_id);

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = rx.recv() => r,
        };

        match received {
            Ok(frame) => {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    r = sink.send_frame(&frame) => r,
                };
                match result {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                        trace!("Delivered frame {} to {}", frame.sequence, viewer_id);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        if let Some(suppressed) = throttler.should_log(&fail_key) {
                            warn!(
                                "Frame delivery to {} failed: {} ({} similar suppressed)",
                                viewer_id, e, suppressed
                            );
                        }
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                counters.dropped.fetch_add(n, Ordering::Relaxed);
                if let Some(suppressed) = throttler.should_log(&drop_key) {
                    debug!(
                        "Viewer {} lagging, dropped {} frames ({} similar suppressed)",
                        viewer_id, n, suppressed
                    );
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    trace!("Delivery task for {} finished", viewer_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Resolution, StreamFormat, StreamType};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn frame(seq: u64) -> Frame {
        Frame::new(
            Bytes::from_static(b"abcd"),
            StreamType::Depth,
            StreamFormat::Z16,
            Resolution::new(2, 1),
            seq,
        )
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<u64>>,
        fail: bool,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&self, frame: &Frame) -> Result<()> {
            if self.fail {
                return Err(AppError::Internal("closed".into()));
            }
            self.seen.lock().push(frame.sequence);
            Ok(())
        }
    }

    /// Blocks on every frame until released
    struct GatedSink {
        gate: Notify,
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl FrameSink for GatedSink {
        async fn send_frame(&self, frame: &Frame) -> Result<()> {
            self.gate.notified().await;
            self.seen.lock().push(frame.sequence);
            Ok(())
        }
    }

    async fn wait_until(f: impl Fn() -> bool) {
        for _ in 0..200 {
            if f() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_fan_out() {
        let dist = FrameDistributor::new(4);
        let publisher = dist.open("s1");
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        dist.subscribe("s1", "v1", a.clone()).unwrap();
        dist.subscribe("s1", "v2", b.clone()).unwrap();
        assert_eq!(dist.subscriber_count("s1"), 2);

        for seq in 0..3 {
            publisher.publish(frame(seq));
        }
        wait_until(|| a.seen.lock().len() == 3 && b.seen.lock().len() == 3).await;
        assert_eq!(*a.seen.lock(), vec![0, 1, 2]);
        assert_eq!(dist.subscriber_stats("v1").unwrap().delivered, 3);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest() {
        let dist = FrameDistributor::new(2);
        let publisher = dist.open("s1");
        let slow = Arc::new(GatedSink {
            gate: Notify::new(),
            seen: Mutex::new(Vec::new()),
        });
        let fast = Arc::new(RecordingSink::default());
        dist.subscribe("s1", "slow", slow.clone()).unwrap();
        dist.subscribe("s1", "fast", fast.clone()).unwrap();

        publisher.publish(frame(0));
        // slow viewer is now parked inside send_frame with frame 0
        wait_until(|| fast.seen.lock().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        for seq in 1..6 {
            publisher.publish(frame(seq));
        }
        wait_until(|| fast.seen.lock().len() == 6).await;

        // release the slow viewer frame by frame
        for _ in 0..3 {
            slow.gate.notify_one();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let seen = slow.seen.lock().clone();
        assert_eq!(seen, vec![0, 4, 5]);
        let stats = dist.subscriber_stats("slow").unwrap();
        assert_eq!(stats.dropped, 3);
        assert_eq!(dist.subscriber_stats("fast").unwrap().dropped, 0);
    }

    #[tokio::test]
    async fn test_failed_sends_are_counted() {
        let dist = FrameDistributor::new(4);
        let publisher = dist.open("s1");
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        dist.subscribe("s1", "v1", sink).unwrap();
        publisher.publish(frame(0));
        publisher.publish(frame(1));
        wait_until(|| dist.subscriber_stats("v1").unwrap().failed == 2).await;
    }

    #[tokio::test]
    async fn test_subscribe_unknown_session() {
        let dist = FrameDistributor::default();
        let sink = Arc::new(RecordingSink::default());
        assert!(matches!(
            dist.subscribe("nope", "v1", sink),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close() {
        let dist = FrameDistributor::new(4);
        let publisher = dist.open("s1");
        let sink = Arc::new(RecordingSink::default());
        dist.subscribe("s1", "v1", sink.clone()).unwrap();
        dist.subscribe("s1", "v2", sink.clone()).unwrap();

        assert!(dist.unsubscribe("v1").is_some());
        assert!(dist.unsubscribe("v1").is_none());
        assert_eq!(dist.subscriber_count("s1"), 1);

        dist.close("s1");
        assert_eq!(dist.subscriber_count("s1"), 0);
        assert!(!dist.is_subscribed("v2"));
        // publishing after close reaches nobody
        wait_until(|| publisher.subscriber_count() == 0).await;
        assert_eq!(publisher.publish(frame(9)), 0);
    }
}
