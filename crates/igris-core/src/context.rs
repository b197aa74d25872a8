//! Channel context: domain initialization and transport ownership
//!
//! Every publisher, subscriber and control client is built from a
//! [`ChannelContext`]. Clones share the same underlying domain, so peers that
//! must talk to each other in-process hold clones of one context.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::comm::{InprocTransport, TransportBackend};
use crate::config::{ChannelConfig, TransportKind};
use crate::msg::MessageLayout;
use crate::{Error, Result};

/// Highest valid domain id.
pub const MAX_DOMAIN_ID: u32 = 232;

/// Handle to a (possibly not yet initialized) transport domain
///
/// `init` activates the domain, `release` tears it down again. Components
/// created from the handle check the domain on every operation and fail with
/// [`Error::NotInitialized`] once it has been released.
#[derive(Clone)]
pub struct ChannelContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    config: ChannelConfig,
    active: RwLock<Option<Arc<ActiveDomain>>>,
}

impl ChannelContext {
    /// Create an uninitialized context
    pub fn new(config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ContextInner {
                config,
                active: RwLock::new(None),
            }),
        })
    }

    /// Create a context with the default config and join `domain_id`
    pub fn with_domain(domain_id: u32) -> Result<Self> {
        let ctx = Self::new(ChannelConfig::default())?;
        ctx.init(domain_id)?;
        Ok(ctx)
    }

    /// Join `domain_id`
    ///
    /// Calling again with the same domain is a no-op; a different domain is
    /// rejected until [`release`](Self::release) is called.
    pub fn init(&self, domain_id: u32) -> Result<()> {
        if domain_id > MAX_DOMAIN_ID {
            return Err(Error::TransportInit(format!(
                "domain id {domain_id} out of range 0..={MAX_DOMAIN_ID}"
            )));
        }

        let mut active = self.inner.active.write();
        if let Some(current) = active.as_ref() {
            if current.domain_id == domain_id {
                tracing::debug!(domain_id, "context already initialized");
                return Ok(());
            }
            return Err(Error::TransportInit(format!(
                "context already bound to domain {}, cannot join {domain_id}",
                current.domain_id
            )));
        }

        let transport: Arc<dyn TransportBackend> = match &self.inner.config.transport {
            TransportKind::Inproc => Arc::new(InprocTransport::new()),
            #[cfg(feature = "transport-zenoh")]
            TransportKind::Zenoh(zenoh) => Arc::new(crate::comm::ZenohTransport::new(
                zenoh.clone(),
                domain_id,
            )?),
        };

        *active = Some(Arc::new(ActiveDomain {
            domain_id,
            transport,
            topics: Mutex::new(HashMap::new()),
            layout: MessageLayout::from(&self.inner.config),
            config: self.inner.config.clone(),
            alive: AtomicBool::new(true),
        }));
        tracing::info!(
            domain_id,
            num_motors = self.inner.config.num_motors,
            "channel context initialized"
        );
        Ok(())
    }

    /// Tear down the domain
    ///
    /// Delivery tasks of every subscriber exit, and further writes or calls
    /// fail. The context can be initialized again afterwards.
    pub fn release(&self) {
        let released = self.inner.active.write().take();
        if let Some(domain) = released {
            domain.shutdown();
            tracing::info!(domain_id = domain.domain_id, "channel context released");
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.inner.active.read().is_some()
    }

    /// Domain id, if initialized
    pub fn domain_id(&self) -> Option<u32> {
        self.inner.active.read().as_ref().map(|d| d.domain_id)
    }

    #[inline]
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// The live domain, or `NotInitialized`
    pub(crate) fn active(&self) -> Result<Arc<ActiveDomain>> {
        self.inner
            .active
            .read()
            .clone()
            .ok_or_else(|| Error::NotInitialized("ChannelContext not initialized".into()))
    }
}

impl std::fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelContext")
            .field("domain_id", &self.domain_id())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(domain) = self.active.get_mut().take() {
            domain.shutdown();
        }
    }
}

/// State of an initialized domain, shared by every component bound to it
pub(crate) struct ActiveDomain {
    domain_id: u32,
    transport: Arc<dyn TransportBackend>,
    /// topic name -> schema type name
    topics: Mutex<HashMap<String, &'static str>>,
    layout: MessageLayout,
    config: ChannelConfig,
    alive: AtomicBool,
}

impl ActiveDomain {
    #[inline]
    pub(crate) fn domain_id(&self) -> u32 {
        self.domain_id
    }

    #[inline]
    pub(crate) fn transport(&self) -> &Arc<dyn TransportBackend> {
        &self.transport
    }

    #[inline]
    pub(crate) fn layout(&self) -> &MessageLayout {
        &self.layout
    }

    #[inline]
    pub(crate) fn config(&self) -> &ChannelConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Fail unless the domain is still live
    pub(crate) fn ensure_alive(&self, what: &str) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(Error::NotInitialized(format!(
                "{what}: channel context released"
            )))
        }
    }

    /// Register `topic` as carrying `type_name`
    pub(crate) fn bind_topic(&self, topic: &str, type_name: &'static str) -> Result<()> {
        self.ensure_alive(topic)?;
        let mut topics = self.topics.lock();
        match topics.get(topic) {
            Some(&bound) if bound != type_name => Err(Error::TopicBind(format!(
                "topic {topic} already bound to {bound}, cannot bind {type_name}"
            ))),
            Some(_) => Ok(()),
            None => {
                topics.insert(topic.to_owned(), type_name);
                tracing::debug!(topic, type_name, "topic registered");
                Ok(())
            }
        }
    }

    fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
        self.transport.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_context() {
        let ctx = ChannelContext::new(ChannelConfig::default()).unwrap();
        assert!(!ctx.is_initialized());
        assert_eq!(ctx.domain_id(), None);
        assert!(matches!(ctx.active(), Err(Error::NotInitialized(_))));
    }

    #[test]
    fn test_init_idempotent_same_domain() {
        let ctx = ChannelContext::with_domain(3).unwrap();
        ctx.init(3).unwrap();
        assert_eq!(ctx.domain_id(), Some(3));
    }

    #[test]
    fn test_init_other_domain_rejected() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        assert!(matches!(ctx.init(1), Err(Error::TransportInit(_))));
        assert_eq!(ctx.domain_id(), Some(0));
    }

    #[test]
    fn test_domain_range() {
        let ctx = ChannelContext::new(ChannelConfig::default()).unwrap();
        assert!(ctx.init(MAX_DOMAIN_ID).is_ok());
        ctx.release();
        assert!(matches!(
            ctx.init(MAX_DOMAIN_ID + 1),
            Err(Error::TransportInit(_))
        ));
        assert!(!ctx.is_initialized());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ChannelConfig::new(0);
        assert!(matches!(ChannelContext::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_release_and_reinit() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let domain = ctx.active().unwrap();
        ctx.release();
        assert!(!ctx.is_initialized());
        assert!(!domain.is_alive());
        assert!(domain.ensure_alive("rt/lowcmd").is_err());

        ctx.init(1).unwrap();
        assert_eq!(ctx.domain_id(), Some(1));
    }

    #[test]
    fn test_topic_registry() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let domain = ctx.active().unwrap();
        domain.bind_topic("rt/lowstate", "A").unwrap();
        domain.bind_topic("rt/lowstate", "A").unwrap();
        assert!(matches!(
            domain.bind_topic("rt/lowstate", "B"),
            Err(Error::TopicBind(_))
        ));
        domain.bind_topic("rt/lowcmd", "B").unwrap();
    }

    #[test]
    fn test_clones_share_domain() {
        let ctx = ChannelContext::new(ChannelConfig::default()).unwrap();
        let other = ctx.clone();
        ctx.init(7).unwrap();
        assert_eq!(other.domain_id(), Some(7));
        other.release();
        assert!(!ctx.is_initialized());
    }
}
