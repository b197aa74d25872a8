//! igris-core: telemetry pub/sub and control RPC for IGRIS humanoid robots
//!
//! A small real-time messaging layer: a domain-scoped transport context,
//! typed topic publishers and subscribers carrying fixed-schema telemetry and
//! command records, and a synchronous request/response control client with
//! per-call timeouts.
//!
//! # Modules
//!
//! - [`context`] - Domain initialization and transport ownership
//! - [`comm`] - Transports, publishers and subscribers
//! - [`msg`] - Wire schemas (`LowState`, `LowCmd`, service messages)
//! - [`client`] - Control RPC client (BMS init, torque, control mode)
//! - [`server`] - Responding side of the control channel
//! - [`joints`] - Motor/joint indices and names
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────────────────┐
//!                 │   ChannelContext   │  domain id, transport, topic registry
//!                 └─────────┬──────────┘
//!          ┌────────────────┼──────────────────┐
//!   ┌──────┴──────┐  ┌──────┴──────┐   ┌───────┴───────┐
//!   │ Publisher<T>│  │Subscriber<T>│   │ ControlClient │
//!   │ fire&forget │  │delivery task│   │ req/resp + id │
//!   └─────────────┘  └─────────────┘   └───────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use igris_core::{ChannelContext, ControlClient, LowCmd, LowState, Publisher, Subscriber};
//! use igris_core::msg::{topics, BmsInitType, KinematicMode};
//!
//! let ctx = ChannelContext::with_domain(0)?;
//!
//! let mut state_sub = Subscriber::<LowState>::new(&ctx, topics::LOW_STATE)?;
//! state_sub.init(|state| println!("tick {}", state.tick))?;
//!
//! let mut cmd_pub = Publisher::<LowCmd>::new(&ctx, topics::LOW_CMD)?;
//! cmd_pub.init()?;
//! cmd_pub.write(&LowCmd::new(ctx.config().num_motors, KinematicMode::MS))?;
//!
//! let client = ControlClient::new(&ctx)?;
//! client.init()?;
//! let res = client.init_bms(BmsInitType::BmsInit, Some(5000));
//! ```

#![warn(unused_must_use)]

pub mod client;
pub mod comm;
pub mod config;
pub mod context;
pub mod joints;
pub mod msg;
pub mod server;
pub mod util;

pub use client::{ControlClient, ControlResult};
pub use comm::{Publisher, QueuePolicy, Subscriber, SubscriberMonitor, SubscriberStats};
pub use config::{ChannelConfig, TransportKind};
pub use context::{ChannelContext, MAX_DOMAIN_ID};
pub use msg::{
    BmsState, HandCmd, HandState, JointState, LowCmd, LowState, MotorCmd, MotorState, WireMessage,
};
pub use server::{ControlHandler, ControlServer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for igris-core
///
/// Transport- and message-level failures are contained at the component
/// boundary. RPC outcomes are not errors: they come back as
/// [`ControlResult`].
///
/// # Example
/// ```ignore
/// match publisher.write(&cmd) {
///     Ok(()) => {}
///     Err(Error::TransportSend(msg)) => tracing::warn!("dropped command: {msg}"),
///     Err(e) => return Err(e),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
#[must_use = "errors must be handled or explicitly ignored with let _ = ..."]
#[non_exhaustive]
pub enum Error {
    /// The domain is invalid or transport resources could not be acquired.
    /// Handle by: fixing the domain id / endpoints, retrying at process level.
    #[error("Transport init error: {0}")]
    TransportInit(String),

    /// A component was used before its context (or itself) was initialized.
    /// Handle by: calling `ChannelContext::init` first. This is an ordering bug.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Topic already bound with an incompatible schema, or the transport
    /// refused the binding.
    /// Handle by: checking topic names, retrying with backoff.
    #[error("Topic bind error: {0}")]
    TopicBind(String),

    /// Message could not be encoded (e.g. wrong array length).
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Received bytes could not be decoded into the expected schema.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The transport failed to send. Non-fatal; the message is lost.
    #[error("Transport send error: {0}")]
    TransportSend(String),

    /// Invalid configuration parameter.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The underlying channel was closed (context released).
    #[error("Channel closed")]
    ChannelClosed,

    /// Operation attempted in an invalid state (e.g. `init` twice).
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransportInit(_) | Error::TopicBind(_) | Error::TransportSend(_)
        )
    }
}

/// Result type alias for igris-core operations
pub type Result<T> = std::result::Result<T, Error>;
