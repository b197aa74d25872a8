//! Topic transport primitives with in-process backend.
//!
//! A backend moves opaque [`TransportEnvelope`]s between publishers and
//! subscriptions bound to the same topic name. Each subscription owns a
//! queue whose [`QueuePolicy`] decides what happens when the consumer falls
//! behind: telemetry queues are bounded and evict the oldest envelope so a
//! slow consumer never blocks a producer; service queues never evict.

use crossbeam_channel as cc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// Transport message envelope.
#[derive(Debug, Clone)]
pub struct TransportEnvelope {
    /// Topic name (e.g. `rt/lowstate`).
    pub topic: Arc<str>,
    /// Schema type name of the payload.
    pub type_name: Arc<str>,
    /// Id of the publishing endpoint.
    pub publisher_id: u64,
    /// Per-publisher sequence number, starting at 1.
    pub sequence: u64,
    /// Wall-clock timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Encoded message (Arc-backed for cheap clone fanout).
    pub payload: Arc<[u8]>,
}

impl TransportEnvelope {
    /// Construct a new envelope stamped with the current time.
    pub fn new(
        topic: impl Into<Arc<str>>,
        type_name: impl Into<Arc<str>>,
        publisher_id: u64,
        sequence: u64,
        payload: Arc<[u8]>,
    ) -> Self {
        Self {
            topic: topic.into(),
            type_name: type_name.into(),
            publisher_id,
            sequence,
            timestamp_ns: now_ns(),
            payload,
        }
    }
}

/// Backlog behavior of a subscription queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Keep at most this many envelopes; a full queue evicts its oldest.
    DropOldest(usize),
    /// Never evict; the queue grows with the backlog.
    Lossless,
}

/// Counters shared between a subscription handle and its queue.
#[derive(Debug, Default)]
pub struct QueueStats {
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl QueueStats {
    /// Envelopes evicted because the queue was full.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Producer side of a subscription queue with drop-oldest backpressure.
#[derive(Clone)]
pub(crate) struct DeliveryQueue {
    tx: cc::Sender<TransportEnvelope>,
    evict: cc::Receiver<TransportEnvelope>,
    stats: Arc<QueueStats>,
}

impl DeliveryQueue {
    /// Create a queue and the subscription handle that drains it.
    pub(crate) fn open(
        id: u64,
        topic: Arc<str>,
        policy: QueuePolicy,
    ) -> (Self, TransportSubscription) {
        let (tx, rx) = match policy {
            QueuePolicy::DropOldest(capacity) => cc::bounded(capacity.max(1)),
            QueuePolicy::Lossless => cc::unbounded(),
        };
        let stats = Arc::new(QueueStats::default());
        let queue = Self {
            tx,
            evict: rx.clone(),
            stats: stats.clone(),
        };
        let sub = TransportSubscription {
            id,
            topic,
            rx,
            stats,
        };
        (queue, sub)
    }

    /// Whether the subscription handle has been dropped.
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.stats.closed.load(Ordering::Acquire)
    }

    /// Enqueue an envelope, evicting the oldest one if the queue is full.
    ///
    /// The new envelope is always enqueued. Every round either frees a slot
    /// or finds one freed by the consumer.
    pub(crate) fn offer(&self, mut envelope: TransportEnvelope) {
        loop {
            match self.tx.try_send(envelope) {
                Ok(()) => return,
                Err(cc::TrySendError::Full(back)) => {
                    if self.evict.try_recv().is_ok() {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    envelope = back;
                }
                Err(cc::TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Subscription handle for receiving envelopes of one topic.
#[derive(Debug)]
pub struct TransportSubscription {
    id: u64,
    topic: Arc<str>,
    rx: cc::Receiver<TransportEnvelope>,
    stats: Arc<QueueStats>,
}

impl TransportSubscription {
    /// Unique subscription id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Topic this subscription is bound to.
    #[inline]
    pub fn topic(&self) -> Arc<str> {
        self.topic.clone()
    }

    /// Receive with timeout.
    ///
    /// `Ok(None)` on timeout, [`Error::ChannelClosed`] once the transport
    /// has dropped the subscription and the queue is drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<TransportEnvelope>> {
        match self.rx.recv_timeout(timeout) {
            Ok(env) => Ok(Some(env)),
            Err(cc::RecvTimeoutError::Timeout) => Ok(None),
            Err(cc::RecvTimeoutError::Disconnected) => Err(Error::ChannelClosed),
        }
    }

    /// Non-blocking receive.
    #[inline]
    pub fn try_recv(&self) -> Option<TransportEnvelope> {
        self.rx.try_recv().ok()
    }

    /// Number of queued envelopes.
    #[inline]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether queue is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Envelopes evicted from this subscription's queue.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.stats.dropped()
    }

    /// Shared counters, valid after the handle is dropped.
    pub fn stats(&self) -> Arc<QueueStats> {
        self.stats.clone()
    }
}

impl Drop for TransportSubscription {
    fn drop(&mut self) {
        self.stats.closed.store(true, Ordering::Release);
    }
}

/// Transport backend trait for topic pub/sub.
pub trait TransportBackend: Send + Sync {
    /// Deliver an envelope to every subscription of its topic.
    fn publish(&self, envelope: TransportEnvelope) -> Result<()>;

    /// Subscribe to a topic with a queue following `policy`.
    fn subscribe(&self, topic: &str, policy: QueuePolicy) -> Result<TransportSubscription>;

    /// Remove a subscription by id.
    fn unsubscribe(&self, subscription_id: u64) -> bool;

    /// Count active subscriptions.
    fn subscription_count(&self) -> usize;

    /// Drop every subscription and refuse further traffic.
    fn shutdown(&self);
}

struct SubscriptionEntry {
    id: u64,
    topic: Arc<str>,
    queue: DeliveryQueue,
}

/// In-process topic transport backend.
pub struct InprocTransport {
    subscriptions: RwLock<Vec<SubscriptionEntry>>,
    next_sub_id: AtomicU64,
    closed: AtomicBool,
}

impl InprocTransport {
    /// Create a new in-process transport backend.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_sub_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether [`TransportBackend::shutdown`] has been called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for InprocTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportBackend for InprocTransport {
    fn publish(&self, envelope: TransportEnvelope) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportSend(format!(
                "transport shut down, dropping {}",
                envelope.topic
            )));
        }

        let subscribers = self.subscriptions.read();
        let mut stale_sub_ids = Vec::new();
        for sub in &*subscribers {
            if sub.topic != envelope.topic {
                continue;
            }
            if sub.queue.is_closed() {
                stale_sub_ids.push(sub.id);
                continue;
            }
            sub.queue.offer(envelope.clone());
        }
        drop(subscribers);

        if !stale_sub_ids.is_empty() {
            self.subscriptions
                .write()
                .retain(|s| !stale_sub_ids.contains(&s.id));
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, policy: QueuePolicy) -> Result<TransportSubscription> {
        if self.is_closed() {
            return Err(Error::TopicBind(format!(
                "transport shut down, cannot subscribe to {topic}"
            )));
        }
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let topic: Arc<str> = Arc::from(topic);
        let (queue, sub) = DeliveryQueue::open(id, topic.clone(), policy);
        self.subscriptions
            .write()
            .push(SubscriptionEntry { id, topic, queue });
        Ok(sub)
    }

    fn unsubscribe(&self, subscription_id: u64) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != subscription_id);
        before != subs.len()
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscriptions.write().clear();
    }
}

pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(topic: &str, seq: u64, payload: &[u8]) -> TransportEnvelope {
        TransportEnvelope::new(topic, "test::Msg", 1, seq, Arc::from(payload))
    }

    #[test]
    fn test_publish_subscribe() {
        let transport = InprocTransport::new();
        let sub = transport.subscribe("rt/lowstate", QueuePolicy::DropOldest(8)).unwrap();
        transport
            .publish(envelope("rt/lowstate", 1, b"abc"))
            .unwrap();
        let got = sub
            .recv_timeout(Duration::from_millis(100))
            .unwrap()
            .expect("envelope");
        assert_eq!(got.sequence, 1);
        assert_eq!(got.topic.as_ref(), "rt/lowstate");
        assert_eq!(got.type_name.as_ref(), "test::Msg");
        assert_eq!(got.payload.as_ref(), b"abc");
    }

    #[test]
    fn test_exact_topic_match() {
        let transport = InprocTransport::new();
        let sub = transport.subscribe("rt/lowstate", QueuePolicy::DropOldest(8)).unwrap();
        transport.publish(envelope("rt/lowcmd", 1, b"x")).unwrap();
        transport.publish(envelope("rt/lowstate/x", 2, b"x")).unwrap();
        assert!(sub.is_empty());
    }

    #[test]
    fn test_drop_oldest() {
        let transport = InprocTransport::new();
        let sub = transport.subscribe("t", QueuePolicy::DropOldest(4)).unwrap();
        for seq in 1..=10 {
            transport.publish(envelope("t", seq, b"")).unwrap();
        }
        assert_eq!(sub.len(), 4);
        assert_eq!(sub.dropped(), 6);
        let seqs: Vec<u64> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_lossless_keeps_backlog() {
        let transport = InprocTransport::new();
        let sub = transport.subscribe("t", QueuePolicy::Lossless).unwrap();
        for seq in 1..=500 {
            transport.publish(envelope("t", seq, b"")).unwrap();
        }
        assert_eq!(sub.len(), 500);
        assert_eq!(sub.dropped(), 0);
        assert_eq!(sub.try_recv().map(|e| e.sequence), Some(1));
    }

    #[test]
    fn test_contended_offer_keeps_newest() {
        const PRODUCERS: u64 = 8;
        const PER_PRODUCER: u64 = 2000;

        let transport = Arc::new(InprocTransport::new());
        let sub = transport.subscribe("t", QueuePolicy::DropOldest(1)).unwrap();
        let barrier = Arc::new(std::sync::Barrier::new(PRODUCERS as usize));

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let transport = transport.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for seq in 1..=PER_PRODUCER {
                        let env = TransportEnvelope::new("t", "test::Msg", producer, seq, Arc::from(&b""[..]));
                        transport.publish(env).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Whoever enqueued last had nothing left to send.
        assert_eq!(sub.len(), 1);
        assert_eq!(sub.dropped(), PRODUCERS * PER_PRODUCER - 1);
        assert_eq!(sub.try_recv().map(|e| e.sequence), Some(PER_PRODUCER));
    }

    #[test]
    fn test_fanout() {
        let transport = InprocTransport::new();
        let a = transport.subscribe("t", QueuePolicy::DropOldest(4)).unwrap();
        let b = transport.subscribe("t", QueuePolicy::DropOldest(4)).unwrap();
        transport.publish(envelope("t", 1, b"x")).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let transport = InprocTransport::new();
        let sub = transport.subscribe("t", QueuePolicy::DropOldest(4)).unwrap();
        assert_eq!(transport.subscription_count(), 1);
        assert!(transport.unsubscribe(sub.id()));
        assert_eq!(transport.subscription_count(), 0);
        assert!(!transport.unsubscribe(sub.id()));
    }

    #[test]
    fn test_dropped_handle_pruned() {
        let transport = InprocTransport::new();
        let sub = transport.subscribe("t", QueuePolicy::DropOldest(4)).unwrap();
        drop(sub);
        transport.publish(envelope("t", 1, b"x")).unwrap();
        assert_eq!(transport.subscription_count(), 0);
    }

    #[test]
    fn test_shutdown_closes_subscriptions() {
        let transport = InprocTransport::new();
        let sub = transport.subscribe("t", QueuePolicy::DropOldest(4)).unwrap();
        transport.shutdown();
        assert!(matches!(
            sub.recv_timeout(Duration::from_millis(10)),
            Err(Error::ChannelClosed)
        ));
        assert!(matches!(
            transport.publish(envelope("t", 1, b"x")),
            Err(Error::TransportSend(_))
        ));
        assert!(transport.subscribe("t", QueuePolicy::DropOldest(4)).is_err());
    }
}
