//! Typed topic subscriber with a background delivery thread

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::next_endpoint_id;
use super::transport::{QueuePolicy, QueueStats, TransportEnvelope, TransportSubscription};
use crate::context::{ActiveDomain, ChannelContext};
use crate::msg::{MessageLayout, WireMessage};
use crate::{Error, Result};

type Callback<T> = Arc<Mutex<Box<dyn FnMut(T) + Send>>>;

/// Subscriber counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Envelopes taken off the queue
    pub received: u64,
    /// Messages handed to the callback that returned normally
    pub delivered: u64,
    /// Envelopes evicted because the callback fell behind
    pub dropped: u64,
    /// Envelopes with the wrong schema or undecodable bytes
    pub malformed: u64,
    /// Callback invocations that panicked
    pub callback_panics: u64,
}

/// State shared by a subscriber, its delivery thread and its monitors
#[derive(Debug, Default)]
struct SubscriberShared {
    received: AtomicU64,
    delivered: AtomicU64,
    malformed: AtomicU64,
    callback_panics: AtomicU64,
    /// Evictions from queues of earlier start/stop cycles
    retired_dropped: AtomicU64,
    queue: Mutex<Option<Arc<QueueStats>>>,
    running: Mutex<Option<Arc<AtomicBool>>>,
}

impl SubscriberShared {
    fn attach(&self, queue: Arc<QueueStats>, running: Arc<AtomicBool>) {
        let mut slot = self.queue.lock();
        if let Some(old) = slot.replace(queue) {
            self.retired_dropped
                .fetch_add(old.dropped(), Ordering::Relaxed);
        }
        *self.running.lock() = Some(running);
    }

    fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| r.load(Ordering::Acquire))
    }

    fn stats(&self) -> SubscriberStats {
        let dropped = {
            let queue = self.queue.lock();
            self.retired_dropped.load(Ordering::Relaxed)
                + queue.as_ref().map_or(0, |q| q.dropped())
        };
        SubscriberStats {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped,
            malformed: self.malformed.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of a [`Subscriber`] that does not borrow it
///
/// Stays valid while another thread stops, restarts or drops the subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberMonitor {
    shared: Arc<SubscriberShared>,
}

impl SubscriberMonitor {
    /// Whether the delivery thread is active
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn stats(&self) -> SubscriberStats {
        self.shared.stats()
    }
}

struct DeliveryWorker {
    running: Arc<AtomicBool>,
    subscription_id: u64,
    handle: Option<JoinHandle<()>>,
}

/// Receives `T` messages on one topic and hands each to a callback
///
/// The callback runs on a dedicated delivery thread, one message at a time
/// and in arrival order. It receives an owned, freshly decoded message.
/// Dropping the subscriber stops delivery.
///
/// # Example
/// ```ignore
/// let mut sub = Subscriber::<LowState>::new(&ctx, topics::LOW_STATE)?;
/// sub.init(|state| println!("tick {}", state.tick))?;
/// ```
pub struct Subscriber<T: WireMessage> {
    ctx: ChannelContext,
    topic: Arc<str>,
    id: u64,
    domain: Option<Arc<ActiveDomain>>,
    callback: Option<Callback<T>>,
    worker: Option<DeliveryWorker>,
    policy: Option<QueuePolicy>,
    shared: Arc<SubscriberShared>,
}

impl<T: WireMessage> Subscriber<T> {
    /// Create a subscriber for `topic`; the context must be initialized
    pub fn new(ctx: &ChannelContext, topic: impl Into<Arc<str>>) -> Result<Self> {
        ctx.active()?;
        Ok(Self {
            ctx: ctx.clone(),
            topic: topic.into(),
            id: next_endpoint_id(),
            domain: None,
            callback: None,
            worker: None,
            policy: None,
            shared: Arc::new(SubscriberShared::default()),
        })
    }

    /// Override the queue policy; the default drops the oldest message
    /// beyond `queue_depth`. Takes effect on the next start.
    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Register `callback` and start the delivery thread
    pub fn init<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        if self.callback.is_some() {
            return Err(Error::InvalidState(format!(
                "subscriber on {} already initialized",
                self.topic
            )));
        }
        let domain = self.ctx.active()?;
        domain.bind_topic(&self.topic, T::TYPE_NAME)?;
        tracing::info!(
            topic = %self.topic,
            type_name = T::TYPE_NAME,
            domain_id = domain.domain_id(),
            "subscriber initialized"
        );
        self.domain = Some(domain);
        self.callback = Some(Arc::new(Mutex::new(Box::new(callback))));
        self.start()
    }

    /// Resume delivery after [`stop`](Self::stop) with the same callback
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let (Some(domain), Some(callback)) = (self.domain.clone(), self.callback.clone()) else {
            return Err(Error::NotInitialized(format!(
                "subscriber on {} not initialized",
                self.topic
            )));
        };
        domain.ensure_alive(&self.topic)?;
        self.stop();

        let policy = self
            .policy
            .unwrap_or(QueuePolicy::DropOldest(domain.config().queue_depth));
        let sub = domain.transport().subscribe(&self.topic, policy)?;
        let subscription_id = sub.id();

        let running = Arc::new(AtomicBool::new(true));
        self.shared.attach(sub.stats(), running.clone());
        let delivery = DeliveryLoop {
            topic: self.topic.clone(),
            sub,
            callback,
            shared: self.shared.clone(),
            running: running.clone(),
            layout: *domain.layout(),
            poll_interval: domain.config().poll_interval,
        };

        let handle = thread::Builder::new()
            .name(format!("igris-sub-{}", self.topic))
            .spawn(move || delivery.run())
            .map_err(|e| {
                domain.transport().unsubscribe(subscription_id);
                Error::TopicBind(format!("failed to spawn delivery thread: {e}"))
            })?;

        self.worker = Some(DeliveryWorker {
            running,
            subscription_id,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Stop delivery
    ///
    /// Waits for an in-flight callback to finish, unless called from inside
    /// the callback itself; then no further message is delivered.
    pub fn stop(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        worker.running.store(false, Ordering::Release);
        if let Some(domain) = &self.domain {
            domain.transport().unsubscribe(worker.subscription_id);
        }
        if let Some(handle) = worker.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!(topic = %self.topic, "delivery thread panicked");
            }
        }
    }

    /// Whether the delivery thread is active
    pub fn is_running(&self) -> bool {
        self.worker.is_some() && self.shared.is_running()
    }

    /// Handle for reading state without access to the subscriber
    pub fn monitor(&self) -> SubscriberMonitor {
        SubscriberMonitor {
            shared: self.shared.clone(),
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.callback.is_some()
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Endpoint id, unique within the process
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stats(&self) -> SubscriberStats {
        self.shared.stats()
    }
}

impl<T: WireMessage> Drop for Subscriber<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct DeliveryLoop<T> {
    topic: Arc<str>,
    sub: TransportSubscription,
    callback: Callback<T>,
    shared: Arc<SubscriberShared>,
    running: Arc<AtomicBool>,
    layout: MessageLayout,
    poll_interval: Duration,
}

impl<T: WireMessage> DeliveryLoop<T> {
    fn run(self) {
        tracing::debug!(topic = %self.topic, "delivery thread started");
        while self.running.load(Ordering::Acquire) {
            match self.sub.recv_timeout(self.poll_interval) {
                Ok(Some(envelope)) => {
                    // stop() may have been called while we were blocked
                    if !self.running.load(Ordering::Acquire) {
                        break;
                    }
                    self.deliver(envelope);
                }
                Ok(None) => {}
                Err(_) => {
                    tracing::debug!(topic = %self.topic, "subscription closed");
                    break;
                }
            }
        }
        self.running.store(false, Ordering::Release);
        tracing::debug!(topic = %self.topic, "delivery thread stopped");
    }

    fn deliver(&self, envelope: TransportEnvelope) {
        self.shared.received.fetch_add(1, Ordering::Relaxed);

        if envelope.type_name.as_ref() != T::TYPE_NAME {
            self.shared.malformed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                topic = %self.topic,
                expected = T::TYPE_NAME,
                got = %envelope.type_name,
                "schema mismatch, dropping message"
            );
            return;
        }

        let msg = match T::from_wire(&envelope.payload, &self.layout) {
            Ok(msg) => msg,
            Err(e) => {
                self.shared.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    topic = %self.topic,
                    sequence = envelope.sequence,
                    "dropping malformed message: {e}"
                );
                return;
            }
        };

        let mut guard = self.callback.lock();
        let callback = &mut *guard;
        match panic::catch_unwind(AssertUnwindSafe(move || callback(msg))) {
            Ok(()) => {
                self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(topic = %self.topic, sequence = envelope.sequence, "delivered");
            }
            Err(_) => {
                self.shared.callback_panics.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    topic = %self.topic,
                    sequence = envelope.sequence,
                    "subscriber callback panicked"
                );
            }
        }
    }
}
