//! Zenoh-backed transport backend for cross-process pub/sub.
//!
//! Uses a bridge pattern: `ZenohTransport` keeps the `TransportBackend` trait
//! fully synchronous by calling Zenoh's sync `.wait()` methods under the hood.
//! Topics map to key expressions `<prefix>/d<domain>/<topic>`, so two domains
//! sharing a Zenoh network never see each other's traffic.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use zenoh::bytes::ZBytes;
use zenoh::pubsub::Subscriber;
use zenoh::Wait;

use super::transport::{
    now_ns, DeliveryQueue, QueuePolicy, TransportBackend, TransportEnvelope,
    TransportSubscription,
};
use crate::{Error, Result};

/// Configuration for the Zenoh transport backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZenohTransportConfig {
    /// Zenoh endpoints to connect to (e.g. `["tcp/192.168.1.1:7447"]`).
    pub connect: Vec<String>,
    /// Zenoh endpoints to listen on (e.g. `["tcp/0.0.0.0:7447"]`).
    pub listen: Vec<String>,
    /// Enable shared-memory transport for same-machine zero-copy.
    pub shared_memory: bool,
    /// Prefix prepended to all key expressions.
    pub key_prefix: String,
}

impl Default for ZenohTransportConfig {
    fn default() -> Self {
        Self {
            connect: Vec::new(),
            listen: Vec::new(),
            shared_memory: true,
            key_prefix: "igris".into(),
        }
    }
}

/// Envelope metadata encoded as Zenoh attachment bytes.
#[derive(Debug, Serialize, Deserialize)]
struct AttachmentMeta {
    ty: String,
    pid: u64,
    seq: u64,
    ts: u64,
}

/// Active Zenoh subscription entry.
struct ZenohSubscriptionEntry {
    id: u64,
    queue: DeliveryQueue,
    /// Dropping this undeclares the Zenoh subscriber.
    _subscriber: Subscriber<()>,
}

/// Zenoh-backed topic transport backend.
pub struct ZenohTransport {
    session: zenoh::Session,
    subscriptions: RwLock<Vec<ZenohSubscriptionEntry>>,
    next_sub_id: AtomicU64,
    domain_prefix: String,
    closed: AtomicBool,
}

impl ZenohTransport {
    /// Open a new Zenoh session for `domain_id`.
    ///
    /// Blocks the caller while the session is established.
    pub fn new(config: ZenohTransportConfig, domain_id: u32) -> Result<Self> {
        let mut zenoh_config = zenoh::Config::default();

        if !config.connect.is_empty() {
            zenoh_config
                .insert_json5("connect/endpoints", &json_array(&config.connect))
                .map_err(|e| Error::Config(format!("invalid connect endpoints: {e}")))?;
        }

        if !config.listen.is_empty() {
            zenoh_config
                .insert_json5("listen/endpoints", &json_array(&config.listen))
                .map_err(|e| Error::Config(format!("invalid listen endpoints: {e}")))?;
        }

        if config.shared_memory {
            zenoh_config
                .insert_json5("transport/shared_memory/enabled", "true")
                .map_err(|e| Error::Config(format!("failed to enable shared memory: {e}")))?;
        }

        let session = zenoh::open(zenoh_config)
            .wait()
            .map_err(|e| Error::TransportInit(format!("failed to open zenoh session: {e}")))?;

        let domain_prefix = if config.key_prefix.is_empty() {
            format!("d{domain_id}")
        } else {
            format!("{}/d{domain_id}", config.key_prefix)
        };
        tracing::info!(prefix = %domain_prefix, "zenoh session opened");

        Ok(Self {
            session,
            subscriptions: RwLock::new(Vec::new()),
            next_sub_id: AtomicU64::new(1),
            domain_prefix,
            closed: AtomicBool::new(false),
        })
    }

    /// Key expression for a topic in this domain.
    fn full_key(&self, topic: &str) -> String {
        format!("{}/{}", self.domain_prefix, topic)
    }
}

fn json_array(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("\"{}\"", s)).collect();
    format!("[{}]", quoted.join(","))
}

impl TransportBackend for ZenohTransport {
    fn publish(&self, envelope: TransportEnvelope) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::TransportSend("zenoh session closed".into()));
        }

        let attachment = AttachmentMeta {
            ty: envelope.type_name.to_string(),
            pid: envelope.publisher_id,
            seq: envelope.sequence,
            ts: envelope.timestamp_ns,
        };
        let attachment_bytes = serde_json::to_vec(&attachment)
            .map_err(|e| Error::Serialization(format!("attachment: {e}")))?;

        self.session
            .put(self.full_key(&envelope.topic), ZBytes::from(envelope.payload.to_vec()))
            .attachment(ZBytes::from(attachment_bytes))
            .wait()
            .map_err(|e| Error::TransportSend(format!("zenoh put on {}: {e}", envelope.topic)))
    }

    fn subscribe(&self, topic: &str, policy: QueuePolicy) -> Result<TransportSubscription> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::TopicBind("zenoh session closed".into()));
        }

        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let topic_arc: Arc<str> = Arc::from(topic);
        let (queue, sub) = DeliveryQueue::open(id, topic_arc.clone(), policy);

        let sink = queue.clone();
        let subscriber = self
            .session
            .declare_subscriber(self.full_key(topic))
            .callback(move |sample| {
                let meta = sample
                    .attachment()
                    .and_then(|att| serde_json::from_slice::<AttachmentMeta>(&att.to_bytes()).ok());
                let Some(meta) = meta else {
                    tracing::warn!(topic = %topic_arc, "sample without envelope metadata, dropping");
                    return;
                };
                let payload: Vec<u8> = sample.payload().to_bytes().to_vec();
                sink.offer(TransportEnvelope {
                    topic: topic_arc.clone(),
                    type_name: Arc::from(meta.ty),
                    publisher_id: meta.pid,
                    sequence: meta.seq,
                    timestamp_ns: if meta.ts == 0 { now_ns() } else { meta.ts },
                    payload: Arc::from(payload.into_boxed_slice()),
                });
            })
            .wait()
            .map_err(|e| Error::TopicBind(format!("failed to declare zenoh subscriber: {e}")))?;

        self.subscriptions.write().push(ZenohSubscriptionEntry {
            id,
            queue,
            _subscriber: subscriber,
        });
        Ok(sub)
    }

    fn unsubscribe(&self, subscription_id: u64) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        // Dropping the entry undeclares the Zenoh subscriber.
        subs.retain(|s| s.id != subscription_id && !s.queue.is_closed());
        before != subs.len()
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.subscriptions.write().clear();
        if let Err(e) = self.session.close().wait() {
            tracing::warn!("zenoh session close failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zenoh_config_defaults() {
        let config = ZenohTransportConfig::default();
        assert!(config.connect.is_empty());
        assert!(config.listen.is_empty());
        assert!(config.shared_memory);
        assert_eq!(config.key_prefix, "igris");
    }

    #[test]
    fn test_json_array() {
        assert_eq!(
            json_array(&["tcp/10.0.0.2:7447".into(), "udp/10.0.0.3:7447".into()]),
            r#"["tcp/10.0.0.2:7447","udp/10.0.0.3:7447"]"#
        );
    }

    #[test]
    fn test_attachment_meta_roundtrip() {
        let meta = AttachmentMeta {
            ty: "igris_c::msg::dds::LowState".into(),
            pid: 3,
            seq: 42,
            ts: 1234567890,
        };
        let bytes = serde_json::to_vec(&meta).unwrap();
        let decoded: AttachmentMeta = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.ty, meta.ty);
        assert_eq!(decoded.pid, 3);
        assert_eq!(decoded.seq, 42);
        assert_eq!(decoded.ts, 1234567890);
    }

    // Integration tests that require Zenoh peer connectivity.
    #[test]
    #[ignore]
    fn test_zenoh_pub_sub_roundtrip() {
        let transport = ZenohTransport::new(ZenohTransportConfig::default(), 0)
            .expect("failed to open zenoh session");

        let sub = transport.subscribe("rt/lowstate", QueuePolicy::DropOldest(16)).unwrap();
        transport
            .publish(TransportEnvelope::new(
                "rt/lowstate",
                "test::Msg",
                9,
                1,
                Arc::from(&b"world"[..]),
            ))
            .unwrap();

        let got = sub
            .recv_timeout(Duration::from_secs(2))
            .unwrap()
            .expect("expected to receive a message");
        assert_eq!(got.topic.as_ref(), "rt/lowstate");
        assert_eq!(got.type_name.as_ref(), "test::Msg");
        assert_eq!(got.publisher_id, 9);
        assert_eq!(got.payload.as_ref(), b"world");
        transport.shutdown();
    }

    #[test]
    #[ignore]
    fn test_zenoh_domains_isolated() {
        let d0 = ZenohTransport::new(ZenohTransportConfig::default(), 0).unwrap();
        let d1 = ZenohTransport::new(ZenohTransportConfig::default(), 1).unwrap();

        let sub = d1.subscribe("rt/lowstate", QueuePolicy::DropOldest(4)).unwrap();
        d0.publish(TransportEnvelope::new(
            "rt/lowstate",
            "test::Msg",
            1,
            1,
            Arc::from(&b"x"[..]),
        ))
        .unwrap();
        assert!(sub.recv_timeout(Duration::from_millis(500)).unwrap().is_none());
    }
}
