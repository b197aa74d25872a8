//! Wire message schemas
//!
//! Field order and the fixed array length `N` are part of the compatibility
//! contract: publishers and subscribers on a topic must agree on both.
//!
//! # Topics
//!
//! - `rt/lowstate` - [`LowState`] telemetry (subscribe)
//! - `rt/lowcmd` - [`LowCmd`] motor setpoints (publish)
//! - `rt/controlmodestate` - [`ControlModeState`] (subscribe)
//! - `rt/bmsstate` - [`BmsState`] battery and power state (subscribe)
//! - `rt/handstate` - [`HandState`] hand telemetry (subscribe)
//! - `rt/handcmd` - [`HandCmd`] hand setpoints (publish)
//! - `rt/service/*/request|response` - control RPC channel

/// `TryFrom<u8>` and `Display` for a `#[repr(u8)]` wire enum
macro_rules! wire_enum {
    ($name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        impl TryFrom<u8> for $name {
            type Error = crate::Error;

            fn try_from(v: u8) -> crate::Result<Self> {
                match v {
                    $($value => Ok(Self::$variant),)+
                    other => Err(crate::Error::Deserialization(format!(
                        concat!("unknown ", stringify!($name), " {}"),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str(stringify!($variant)),)+
                }
            }
        }
    };
}

mod bms;
pub mod cdr;
pub mod crc;
mod hand;
mod low_level;
mod service;

pub use bms::{BmsConnState, BmsInitState, BmsState, EStopState, RelayState};
pub use cdr::{CdrReader, CdrWriter};
pub use hand::{HandCmd, HandState};
pub use low_level::{
    motor_error, ImuState, JointState, KinematicMode, LowCmd, LowState, MotorCmd, MotorState,
};
pub use service::{
    BmsInitCmd, BmsInitType, ControlMode, ControlModeCmd, ControlModeState, ServiceRequest,
    ServiceResponse, TorqueCmd, TorqueType,
};

use crate::{ChannelConfig, Result};

/// Shape parameters a message needs to encode or decode itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageLayout {
    /// Length of every per-motor array
    pub num_motors: usize,
    /// Length of every per-motor array in hand messages
    pub num_hand_motors: usize,
}

impl MessageLayout {
    pub fn new(num_motors: usize) -> Self {
        Self {
            num_motors,
            num_hand_motors: crate::joints::DEFAULT_NUM_HAND_MOTORS,
        }
    }

    pub fn with_hand_motors(mut self, num_hand_motors: usize) -> Self {
        self.num_hand_motors = num_hand_motors;
        self
    }
}

impl Default for MessageLayout {
    fn default() -> Self {
        Self::new(crate::joints::DEFAULT_NUM_MOTORS)
    }
}

impl From<&ChannelConfig> for MessageLayout {
    fn from(config: &ChannelConfig) -> Self {
        Self::new(config.num_motors).with_hand_motors(config.num_hand_motors)
    }
}

/// A message type that can travel over a topic
///
/// `TYPE_NAME` identifies the schema; binding the same topic name to two
/// different type names is rejected.
pub trait WireMessage: Sized + Send + 'static {
    /// Schema identifier carried with every sample
    const TYPE_NAME: &'static str;

    /// Append the message body to `w`
    fn encode(&self, w: &mut CdrWriter, layout: &MessageLayout) -> Result<()>;

    /// Read a message body from `r`
    fn decode(r: &mut CdrReader<'_>, layout: &MessageLayout) -> Result<Self>;

    /// Serialize to wire bytes (header + body)
    fn to_wire(&self, layout: &MessageLayout) -> Result<Vec<u8>> {
        let mut w = CdrWriter::new();
        self.encode(&mut w, layout)?;
        Ok(w.finish())
    }

    /// Deserialize from wire bytes, rejecting trailing data
    fn from_wire(bytes: &[u8], layout: &MessageLayout) -> Result<Self> {
        let mut r = CdrReader::new(bytes)?;
        let msg = Self::decode(&mut r, layout)?;
        r.finish()?;
        Ok(msg)
    }
}

/// Topic names used by IGRIS robots
pub mod topics {
    /// Low-level state (motor positions/velocities/torques, IMU)
    pub const LOW_STATE: &str = "rt/lowstate";

    /// Low-level motor command
    pub const LOW_CMD: &str = "rt/lowcmd";

    /// Current control mode
    pub const CONTROL_MODE_STATE: &str = "rt/controlmodestate";

    /// Battery, relay and e-stop state
    pub const BMS_STATE: &str = "rt/bmsstate";

    pub const HAND_STATE: &str = "rt/handstate";
    pub const HAND_CMD: &str = "rt/handcmd";

    pub const BMS_INIT_REQUEST: &str = "rt/service/bms_init/request";
    pub const BMS_INIT_RESPONSE: &str = "rt/service/bms_init/response";
    pub const TORQUE_REQUEST: &str = "rt/service/torque/request";
    pub const TORQUE_RESPONSE: &str = "rt/service/torque/response";
    pub const CONTROL_MODE_REQUEST: &str = "rt/service/control_mode/request";
    pub const CONTROL_MODE_RESPONSE: &str = "rt/service/control_mode/response";
}
