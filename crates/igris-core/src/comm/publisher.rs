//! Typed topic publisher

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::next_endpoint_id;
use super::transport::TransportEnvelope;
use crate::context::{ActiveDomain, ChannelContext};
use crate::msg::WireMessage;
use crate::{Error, Result};

/// Publisher counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Messages handed to the transport
    pub published: u64,
    /// Writes that failed to encode or send
    pub send_failures: u64,
}

/// Fire-and-forget writer of `T` messages on one topic
///
/// # Example
/// ```ignore
/// let mut publisher = Publisher::<LowCmd>::new(&ctx, topics::LOW_CMD)?;
/// publisher.init()?;
/// publisher.write(&cmd)?;
/// ```
pub struct Publisher<T: WireMessage> {
    ctx: ChannelContext,
    topic: Arc<str>,
    id: u64,
    domain: Option<Arc<ActiveDomain>>,
    sequence: AtomicU64,
    published: AtomicU64,
    send_failures: AtomicU64,
    _marker: PhantomData<fn(&T)>,
}

impl<T: WireMessage> Publisher<T> {
    /// Create a publisher bound to `topic`; the context must be initialized
    pub fn new(ctx: &ChannelContext, topic: impl Into<Arc<str>>) -> Result<Self> {
        ctx.active()?;
        Ok(Self {
            ctx: ctx.clone(),
            topic: topic.into(),
            id: next_endpoint_id(),
            domain: None,
            sequence: AtomicU64::new(0),
            published: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            _marker: PhantomData,
        })
    }

    /// Register the topic with the context and acquire the transport writer
    pub fn init(&mut self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let domain = self.ctx.active()?;
        domain.bind_topic(&self.topic, T::TYPE_NAME)?;
        tracing::info!(
            topic = %self.topic,
            type_name = T::TYPE_NAME,
            domain_id = domain.domain_id(),
            "publisher initialized"
        );
        self.domain = Some(domain);
        Ok(())
    }

    /// Encode `msg` and hand it to the transport
    ///
    /// Non-blocking; delivery is not acknowledged.
    pub fn write(&self, msg: &T) -> Result<()> {
        let domain = self.domain.as_ref().ok_or_else(|| {
            Error::NotInitialized(format!("publisher on {} not initialized", self.topic))
        })?;
        domain.ensure_alive(&self.topic)?;

        let payload = msg.to_wire(domain.layout()).map_err(|e| {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(topic = %self.topic, "failed to encode message: {e}");
            e
        })?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = TransportEnvelope::new(
            self.topic.clone(),
            T::TYPE_NAME,
            self.id,
            sequence,
            Arc::from(payload.into_boxed_slice()),
        );

        match domain.transport().publish(envelope) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(topic = %self.topic, sequence, "published");
                Ok(())
            }
            Err(e) => {
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(topic = %self.topic, sequence, "send failed: {e}");
                Err(match e {
                    Error::TransportSend(_) => e,
                    other => Error::TransportSend(other.to_string()),
                })
            }
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.domain.is_some()
    }

    #[inline]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.published.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::QueuePolicy;
    use crate::msg::{topics, KinematicMode, LowCmd, LowState};
    use crate::ChannelConfig;
    use std::time::Duration;

    #[test]
    fn test_new_requires_initialized_context() {
        let ctx = ChannelContext::new(ChannelConfig::default()).unwrap();
        assert!(matches!(
            Publisher::<LowCmd>::new(&ctx, topics::LOW_CMD),
            Err(Error::NotInitialized(_))
        ));
    }

    #[test]
    fn test_write_before_init() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let publisher = Publisher::<LowCmd>::new(&ctx, topics::LOW_CMD).unwrap();
        let err = publisher
            .write(&LowCmd::new(31, KinematicMode::MS))
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[test]
    fn test_type_conflict_on_topic() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let mut a = Publisher::<LowCmd>::new(&ctx, "rt/shared").unwrap();
        a.init().unwrap();
        let mut b = Publisher::<LowState>::new(&ctx, "rt/shared").unwrap();
        assert!(matches!(b.init(), Err(Error::TopicBind(_))));
    }

    #[test]
    fn test_wrong_length_counts_failure() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let mut publisher = Publisher::<LowCmd>::new(&ctx, topics::LOW_CMD).unwrap();
        publisher.init().unwrap();
        let err = publisher
            .write(&LowCmd::new(30, KinematicMode::MS))
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert_eq!(publisher.stats().send_failures, 1);
        assert_eq!(publisher.stats().published, 0);
    }

    #[test]
    fn test_sequence_per_publisher() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let sub = ctx
            .active()
            .unwrap()
            .transport()
            .subscribe(topics::LOW_CMD, QueuePolicy::DropOldest(8))
            .unwrap();
        let mut publisher = Publisher::<LowCmd>::new(&ctx, topics::LOW_CMD).unwrap();
        publisher.init().unwrap();
        let cmd = LowCmd::new(31, KinematicMode::MS);
        publisher.write(&cmd).unwrap();
        publisher.write(&cmd).unwrap();

        let first = sub.recv_timeout(Duration::from_millis(100)).unwrap().unwrap();
        let second = sub.recv_timeout(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(first.publisher_id, second.publisher_id);
        assert_eq!(first.type_name.as_ref(), LowCmd::TYPE_NAME);
        assert_eq!(publisher.stats().published, 2);
    }

    #[test]
    fn test_write_after_release() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let mut publisher = Publisher::<LowCmd>::new(&ctx, topics::LOW_CMD).unwrap();
        publisher.init().unwrap();
        ctx.release();
        assert!(matches!(
            publisher.write(&LowCmd::new(31, KinematicMode::MS)),
            Err(Error::NotInitialized(_))
        ));
    }
}
