//! Communication primitives for igris-core
//!
//! Provides the topic transport, typed publishers and callback subscribers.
//! Designed for both same-process (lock-free) and multi-process scenarios.

mod publisher;
mod subscriber;
mod transport;
#[cfg(feature = "transport-zenoh")]
mod zenoh;

use std::sync::atomic::{AtomicU64, Ordering};

pub use publisher::{Publisher, PublisherStats};
pub use subscriber::{Subscriber, SubscriberMonitor, SubscriberStats};
pub use transport::{
    InprocTransport, QueuePolicy, QueueStats, TransportBackend, TransportEnvelope,
    TransportSubscription,
};
pub(crate) use transport::now_ns;
#[cfg(feature = "transport-zenoh")]
pub use zenoh::{ZenohTransport, ZenohTransportConfig};

/// Process-wide id for publishers and subscribers.
pub(crate) fn next_endpoint_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
