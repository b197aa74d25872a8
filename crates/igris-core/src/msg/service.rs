//! Control service requests, responses and mode state

use std::fmt;

use serde::{Deserialize, Serialize};

use super::cdr::{CdrReader, CdrWriter};
use super::{topics, MessageLayout, WireMessage};
use crate::Result;

/// Battery/motor initialization procedure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BmsInitType {
    #[default]
    BmsInitNone = 0,
    BmsInit = 1,
    MotorInit = 2,
    BmsAndMotorInit = 3,
}

wire_enum!(BmsInitType {
    BmsInitNone = 0,
    BmsInit = 1,
    MotorInit = 2,
    BmsAndMotorInit = 3,
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TorqueType {
    TorqueOn = 0,
    #[default]
    TorqueOff = 1,
}

wire_enum!(TorqueType {
    TorqueOn = 0,
    TorqueOff = 1,
});

/// Who drives the motors: the SDK (low level) or the onboard controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ControlMode {
    LowLevel = 0,
    #[default]
    HighLevel = 1,
}

wire_enum!(ControlMode {
    LowLevel = 0,
    HighLevel = 1,
});

/// A request message of the control channel
///
/// Each request kind travels on its own request topic and is answered with a
/// [`ServiceResponse`] on the paired response topic carrying the same
/// `request_id`.
pub trait ServiceRequest: WireMessage + Clone + fmt::Debug {
    /// Operation selector carried by the request
    type Kind: Copy + fmt::Display + Send + 'static;

    const REQUEST_TOPIC: &'static str;
    const RESPONSE_TOPIC: &'static str;

    fn new(request_id: String, kind: Self::Kind) -> Self;

    /// Correlation id echoed by the response
    fn request_id(&self) -> &str;

    fn kind(&self) -> Self::Kind;
}

macro_rules! service_request {
    ($(#[$meta:meta])* $name:ident, $field:ident: $kind:ty, $type_name:literal, $req:path, $resp:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            pub request_id: String,
            pub $field: $kind,
        }

        impl ServiceRequest for $name {
            type Kind = $kind;

            const REQUEST_TOPIC: &'static str = $req;
            const RESPONSE_TOPIC: &'static str = $resp;

            fn new(request_id: String, kind: $kind) -> Self {
                Self {
                    request_id,
                    $field: kind,
                }
            }

            fn request_id(&self) -> &str {
                &self.request_id
            }

            fn kind(&self) -> $kind {
                self.$field
            }
        }

        impl WireMessage for $name {
            const TYPE_NAME: &'static str = $type_name;

            fn encode(&self, w: &mut CdrWriter, _layout: &MessageLayout) -> Result<()> {
                w.write_string(&self.request_id)?;
                w.write_u8(self.$field as u8);
                Ok(())
            }

            fn decode(r: &mut CdrReader<'_>, _layout: &MessageLayout) -> Result<Self> {
                let request_id = r.read_string()?;
                let $field = <$kind>::try_from(r.read_u8()?)?;
                Ok(Self { request_id, $field })
            }
        }
    };
}

service_request!(
    /// Request a BMS and/or motor initialization
    BmsInitCmd,
    init: BmsInitType,
    "igris_c::msg::dds::BmsInitCmd",
    topics::BMS_INIT_REQUEST,
    topics::BMS_INIT_RESPONSE
);

service_request!(
    /// Request motor torque on or off
    TorqueCmd,
    torque: TorqueType,
    "igris_c::msg::dds::TorqueCmd",
    topics::TORQUE_REQUEST,
    topics::TORQUE_RESPONSE
);

service_request!(
    /// Request a control mode switch
    ControlModeCmd,
    mode: ControlMode,
    "igris_c::msg::dds::ControlModeCmd",
    topics::CONTROL_MODE_REQUEST,
    topics::CONTROL_MODE_RESPONSE
);

/// Reply to any control request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub request_id: String,
    pub success: bool,
    pub message: String,
}

impl ServiceResponse {
    pub fn new(request_id: impl Into<String>, success: bool, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success,
            message: message.into(),
        }
    }
}

impl WireMessage for ServiceResponse {
    const TYPE_NAME: &'static str = "igris_c::msg::dds::ServiceResponse";

    fn encode(&self, w: &mut CdrWriter, _layout: &MessageLayout) -> Result<()> {
        w.write_string(&self.request_id)?;
        w.write_bool(self.success);
        w.write_string(&self.message)
    }

    fn decode(r: &mut CdrReader<'_>, _layout: &MessageLayout) -> Result<Self> {
        Ok(Self {
            request_id: r.read_string()?,
            success: r.read_bool()?,
            message: r.read_string()?,
        })
    }
}

/// Control mode reported by the robot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlModeState {
    pub tick: u32,
    pub mode: ControlMode,
}

impl WireMessage for ControlModeState {
    const TYPE_NAME: &'static str = "igris_c::msg::dds::ControlModeState";

    fn encode(&self, w: &mut CdrWriter, _layout: &MessageLayout) -> Result<()> {
        w.write_u32(self.tick);
        w.write_u8(self.mode as u8);
        Ok(())
    }

    fn decode(r: &mut CdrReader<'_>, _layout: &MessageLayout) -> Result<Self> {
        Ok(Self {
            tick: r.read_u32()?,
            mode: ControlMode::try_from(r.read_u8()?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn layout() -> MessageLayout {
        MessageLayout::default()
    }

    #[test]
    fn test_enum_discriminants() {
        assert_eq!(BmsInitType::BmsAndMotorInit as u8, 3);
        assert_eq!(TorqueType::TorqueOff as u8, 1);
        assert_eq!(ControlMode::LowLevel as u8, 0);
        assert_eq!(BmsInitType::try_from(2).unwrap(), BmsInitType::MotorInit);
        assert!(matches!(
            TorqueType::try_from(2),
            Err(Error::Deserialization(_))
        ));
        assert_eq!(ControlMode::HighLevel.to_string(), "HighLevel");
    }

    #[test]
    fn test_request_roundtrip() {
        let req = BmsInitCmd::new("abc-1".into(), BmsInitType::BmsAndMotorInit);
        let bytes = req.to_wire(&layout()).unwrap();
        let back = BmsInitCmd::from_wire(&bytes, &layout()).unwrap();
        assert_eq!(back, req);
        assert_eq!(back.request_id(), "abc-1");
        assert_eq!(back.kind(), BmsInitType::BmsAndMotorInit);
    }

    #[test]
    fn test_request_topics_distinct() {
        let topics = [
            BmsInitCmd::REQUEST_TOPIC,
            TorqueCmd::REQUEST_TOPIC,
            ControlModeCmd::REQUEST_TOPIC,
            BmsInitCmd::RESPONSE_TOPIC,
            TorqueCmd::RESPONSE_TOPIC,
            ControlModeCmd::RESPONSE_TOPIC,
        ];
        let unique: std::collections::HashSet<_> = topics.iter().collect();
        assert_eq!(unique.len(), topics.len());
    }

    #[test]
    fn test_unknown_request_kind() {
        let mut bytes = TorqueCmd::new("x".into(), TorqueType::TorqueOn)
            .to_wire(&layout())
            .unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 9;
        assert!(TorqueCmd::from_wire(&bytes, &layout()).is_err());
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = ServiceResponse::new("id-7", false, "motor 3 not responding");
        let bytes = resp.to_wire(&layout()).unwrap();
        assert_eq!(ServiceResponse::from_wire(&bytes, &layout()).unwrap(), resp);
    }

    #[test]
    fn test_control_mode_state_roundtrip() {
        let state = ControlModeState {
            tick: 1000,
            mode: ControlMode::LowLevel,
        };
        let bytes = state.to_wire(&layout()).unwrap();
        assert_eq!(bytes.len(), 4 + 4 + 1);
        assert_eq!(ControlModeState::from_wire(&bytes, &layout()).unwrap(), state);
    }
}
