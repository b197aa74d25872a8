//! Battery management and power-path state

use serde::{Deserialize, Serialize};

use super::cdr::{CdrReader, CdrWriter};
use super::{MessageLayout, WireMessage};
use crate::Result;

/// Main power relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RelayState {
    #[default]
    Off = 0,
    On = 1,
}

wire_enum!(RelayState { Off = 0, On = 1 });

/// Emergency stop button
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EStopState {
    #[default]
    Released = 0,
    Pressed = 1,
}

wire_enum!(EStopState {
    Released = 0,
    Pressed = 1,
});

/// Link between the robot controller and the battery pack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BmsConnState {
    #[default]
    Disconnected = 0,
    Connected = 1,
}

wire_enum!(BmsConnState {
    Disconnected = 0,
    Connected = 1,
});

/// Progress of the procedure started by
/// [`ControlClient::init_bms`](crate::ControlClient::init_bms)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BmsInitState {
    #[default]
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Failed = 3,
}

wire_enum!(BmsInitState {
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Failed = 3,
});

/// Battery pack and power-path state published by the robot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BmsState {
    pub tick: u32,
    pub relay: RelayState,
    pub estop: EStopState,
    pub conn: BmsConnState,
    pub init: BmsInitState,
    /// Pack voltage (V)
    pub voltage: f32,
    /// Pack current (A), positive when discharging
    pub current: f32,
    /// State of charge in `[0, 1]`
    pub soc: f32,
}

impl BmsState {
    /// Whether motors can be powered: pack connected and initialized, relay
    /// closed and e-stop released
    pub fn is_power_ready(&self) -> bool {
        self.conn == BmsConnState::Connected
            && self.init == BmsInitState::Initialized
            && self.relay == RelayState::On
            && self.estop == EStopState::Released
    }
}

impl WireMessage for BmsState {
    const TYPE_NAME: &'static str = "igris_c::msg::dds::BmsState";

    fn encode(&self, w: &mut CdrWriter, _layout: &MessageLayout) -> Result<()> {
        w.write_u32(self.tick);
        w.write_u8(self.relay as u8);
        w.write_u8(self.estop as u8);
        w.write_u8(self.conn as u8);
        w.write_u8(self.init as u8);
        w.write_f32(self.voltage);
        w.write_f32(self.current);
        w.write_f32(self.soc);
        Ok(())
    }

    fn decode(r: &mut CdrReader<'_>, _layout: &MessageLayout) -> Result<Self> {
        Ok(Self {
            tick: r.read_u32()?,
            relay: RelayState::try_from(r.read_u8()?)?,
            estop: EStopState::try_from(r.read_u8()?)?,
            conn: BmsConnState::try_from(r.read_u8()?)?,
            init: BmsInitState::try_from(r.read_u8()?)?,
            voltage: r.read_f32()?,
            current: r.read_f32()?,
            soc: r.read_f32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn ready() -> BmsState {
        BmsState {
            tick: 77,
            relay: RelayState::On,
            estop: EStopState::Released,
            conn: BmsConnState::Connected,
            init: BmsInitState::Initialized,
            voltage: 50.4,
            current: 3.2,
            soc: 0.86,
        }
    }

    #[test]
    fn test_bms_state_roundtrip() {
        let layout = MessageLayout::default();
        let state = ready();
        let bytes = state.to_wire(&layout).unwrap();
        // header + tick + 4 states + 3 floats
        assert_eq!(bytes.len(), 4 + 4 + 4 + 12);
        let back = BmsState::from_wire(&bytes, &layout).unwrap();
        assert_eq!(back, state);
        assert!(back.is_power_ready());
    }

    #[test]
    fn test_power_not_ready() {
        let pressed = BmsState {
            estop: EStopState::Pressed,
            ..ready()
        };
        assert!(!pressed.is_power_ready());
        let failed = BmsState {
            init: BmsInitState::Failed,
            ..ready()
        };
        assert!(!failed.is_power_ready());
        assert!(!BmsState::default().is_power_ready());
    }

    #[test]
    fn test_unknown_init_state_rejected() {
        let layout = MessageLayout::default();
        let mut bytes = ready().to_wire(&layout).unwrap();
        // init is the fourth state byte after header and tick
        bytes[4 + 4 + 3] = 9;
        let err = BmsState::from_wire(&bytes, &layout).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
        assert!(err.to_string().contains("unknown BmsInitState 9"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BmsInitState::Initializing.to_string(), "Initializing");
        assert_eq!(EStopState::Pressed.to_string(), "Pressed");
    }
}
