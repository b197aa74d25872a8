//! Channel configuration
//!
//! Hardware-specific numbers (motor count, RPC timeout) live here as
//! instantiation parameters rather than constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "transport-zenoh")]
use crate::comm::ZenohTransportConfig;
use crate::joints::{DEFAULT_NUM_HAND_MOTORS, DEFAULT_NUM_MOTORS};
use crate::{Error, Result};

/// Which transport backend a [`ChannelContext`](crate::ChannelContext) creates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum TransportKind {
    /// Lock-free in-process bus owned by the context.
    #[default]
    Inproc,
    /// Zenoh session for cross-process / cross-host traffic.
    #[cfg(feature = "transport-zenoh")]
    Zenoh(ZenohTransportConfig),
}

/// Configuration shared by every component built on a context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Number of motors/joints in every fixed-length array (IGRIS-C: 31)
    pub num_motors: usize,
    /// Number of hand actuators in [`HandCmd`](crate::msg::HandCmd) and
    /// [`HandState`](crate::msg::HandState)
    #[serde(default = "default_num_hand_motors")]
    pub num_hand_motors: usize,
    /// Maximum messages buffered per subscriber before oldest are dropped
    pub queue_depth: usize,
    /// How often an idle delivery task re-checks its stop flag
    pub poll_interval: Duration,
    /// Timeout used by control RPCs that do not pass one explicitly
    pub default_rpc_timeout: Duration,
    /// Transport backend
    pub transport: TransportKind,
}

fn default_num_hand_motors() -> usize {
    DEFAULT_NUM_HAND_MOTORS
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            num_motors: DEFAULT_NUM_MOTORS,
            num_hand_motors: DEFAULT_NUM_HAND_MOTORS,
            queue_depth: 16,
            poll_interval: Duration::from_millis(20),
            default_rpc_timeout: Duration::from_millis(5000),
            transport: TransportKind::Inproc,
        }
    }
}

impl ChannelConfig {
    /// Create a config for a robot with `num_motors` joints
    pub fn new(num_motors: usize) -> Self {
        Self {
            num_motors,
            ..Default::default()
        }
    }

    /// Set the hand actuator count
    pub fn with_hand_motors(mut self, num_hand_motors: usize) -> Self {
        self.num_hand_motors = num_hand_motors;
        self
    }

    /// Set the per-subscriber queue depth
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the delivery-task poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the default RPC timeout
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.default_rpc_timeout = timeout;
        self
    }

    /// Use a Zenoh session instead of the in-process bus
    #[cfg(feature = "transport-zenoh")]
    pub fn with_zenoh(mut self, zenoh: ZenohTransportConfig) -> Self {
        self.transport = TransportKind::Zenoh(zenoh);
        self
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.num_motors == 0 {
            return Err(Error::Config("num_motors must be at least 1".into()));
        }
        if self.num_motors > u16::MAX as usize {
            return Err(Error::Config(format!(
                "num_motors {} exceeds motor id range",
                self.num_motors
            )));
        }
        if self.num_hand_motors > u16::MAX as usize {
            return Err(Error::Config(format!(
                "num_hand_motors {} exceeds motor id range",
                self.num_hand_motors
            )));
        }
        if self.queue_depth == 0 {
            return Err(Error::Config("queue_depth must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll_interval must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.num_motors, 31);
        assert_eq!(config.num_hand_motors, 12);
        assert_eq!(config.queue_depth, 16);
        assert_eq!(config.default_rpc_timeout, Duration::from_secs(5));
        assert!(matches!(config.transport, TransportKind::Inproc));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ChannelConfig::new(12)
            .with_queue_depth(4)
            .with_poll_interval(Duration::from_millis(5))
            .with_rpc_timeout(Duration::from_secs(30));
        assert_eq!(config.num_motors, 12);
        assert_eq!(config.queue_depth, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.default_rpc_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(matches!(
            ChannelConfig::new(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ChannelConfig::default().with_queue_depth(0).validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = ChannelConfig::new(20).with_queue_depth(8);
        let json = serde_json::to_string(&config).unwrap();
        let back: ChannelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.num_motors, 20);
        assert_eq!(back.queue_depth, 8);
    }

    #[test]
    fn test_hand_motors_default_when_absent() {
        let mut json: serde_json::Value =
            serde_json::to_value(ChannelConfig::new(31).with_hand_motors(4)).unwrap();
        assert_eq!(json["num_hand_motors"], 4);
        json.as_object_mut().unwrap().remove("num_hand_motors");
        let back: ChannelConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.num_hand_motors, 12);
    }
}
