//! Hand setpoints and telemetry
//!
//! Both hands share one message. Slots `0..n/2` belong to the left hand and
//! `n/2..n` to the right, where `n` is [`MessageLayout::num_hand_motors`].

use serde::{Deserialize, Serialize};

use super::cdr::{CdrReader, CdrWriter};
use super::crc::compute_crc;
use super::low_level::{check_crc, read_motor_cmds, read_u32_seq, write_motor_cmds, write_u32_seq};
use super::{MessageLayout, MotorCmd, MotorState, WireMessage};
use crate::{Error, Result};

/// Setpoints for every hand actuator, CRC-protected like
/// [`LowCmd`](super::LowCmd)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandCmd {
    pub motors: Vec<MotorCmd>,
}

impl HandCmd {
    /// All-zero command for `num_hand_motors` actuators with ids `0..n`
    pub fn new(num_hand_motors: usize) -> Self {
        Self {
            motors: (0..num_hand_motors)
                .map(|i| MotorCmd::zero(i as u16))
                .collect(),
        }
    }

    /// Set a PD position target on one slot
    pub fn set_position(&mut self, index: usize, q: f32, kp: f32, kd: f32) -> Result<()> {
        let motor = self.motors.get_mut(index).ok_or_else(|| {
            Error::InvalidState(format!("hand motor index {index} out of range"))
        })?;
        *motor = MotorCmd::position(motor.id, q, kp, kd);
        Ok(())
    }

    pub fn left(&self) -> &[MotorCmd] {
        &self.motors[..self.motors.len() / 2]
    }

    pub fn right(&self) -> &[MotorCmd] {
        &self.motors[self.motors.len() / 2..]
    }
}

impl WireMessage for HandCmd {
    const TYPE_NAME: &'static str = "igris_c::msg::dds::HandCmd";

    fn encode(&self, w: &mut CdrWriter, layout: &MessageLayout) -> Result<()> {
        let start = w.position();
        write_motor_cmds(w, &self.motors, layout.num_hand_motors)?;
        let crc = compute_crc(w.written_since(start));
        w.write_u32(crc);
        Ok(())
    }

    fn decode(r: &mut CdrReader<'_>, layout: &MessageLayout) -> Result<Self> {
        let start = r.position();
        let motors = read_motor_cmds(r, layout.num_hand_motors)?;
        check_crc(r, start, "HandCmd")?;
        Ok(Self { motors })
    }
}

/// Hand telemetry, one entry per hand actuator in every array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandState {
    pub tick: u32,
    pub position: Vec<f32>,
    pub velocity: Vec<f32>,
    pub torque: Vec<f32>,
    /// Per-actuator [`motor_error`](super::motor_error) bit flags
    pub motor_status: Vec<u32>,
}

impl HandState {
    pub fn new(num_hand_motors: usize) -> Self {
        Self {
            tick: 0,
            position: vec![0.0; num_hand_motors],
            velocity: vec![0.0; num_hand_motors],
            torque: vec![0.0; num_hand_motors],
            motor_status: vec![0; num_hand_motors],
        }
    }

    pub fn num_motors(&self) -> usize {
        self.position.len()
    }

    /// Feedback of hand slot `index`, `None` when out of range
    pub fn motor_state(&self, index: usize) -> Option<MotorState> {
        Some(MotorState {
            q: *self.position.get(index)?,
            dq: *self.velocity.get(index)?,
            tau: *self.torque.get(index)?,
            status: *self.motor_status.get(index)?,
        })
    }

    pub fn motor_states(&self) -> Vec<MotorState> {
        (0..self.num_motors())
            .filter_map(|i| self.motor_state(i))
            .collect()
    }
}

impl WireMessage for HandState {
    const TYPE_NAME: &'static str = "igris_c::msg::dds::HandState";

    fn encode(&self, w: &mut CdrWriter, layout: &MessageLayout) -> Result<()> {
        let n = layout.num_hand_motors;
        w.write_u32(self.tick);
        w.write_f32_seq("position", &self.position, n)?;
        w.write_f32_seq("velocity", &self.velocity, n)?;
        w.write_f32_seq("torque", &self.torque, n)?;
        write_u32_seq(w, "motor_status", &self.motor_status, n)
    }

    fn decode(r: &mut CdrReader<'_>, layout: &MessageLayout) -> Result<Self> {
        let n = layout.num_hand_motors;
        Ok(Self {
            tick: r.read_u32()?,
            position: r.read_f32_seq("position", n)?,
            velocity: r.read_f32_seq("velocity", n)?,
            torque: r.read_f32_seq("torque", n)?,
            motor_status: read_u32_seq(r, "motor_status", n)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::motor_error;

    fn layout() -> MessageLayout {
        MessageLayout::new(31).with_hand_motors(12)
    }

    #[test]
    fn test_hand_cmd_roundtrip() {
        let mut cmd = HandCmd::new(12);
        cmd.set_position(0, 0.8, 2.0, 0.05).unwrap();
        cmd.set_position(11, -0.3, 2.0, 0.05).unwrap();
        let bytes = cmd.to_wire(&layout()).unwrap();
        let back = HandCmd::from_wire(&bytes, &layout()).unwrap();
        assert_eq!(back, cmd);
        assert_eq!(back.left()[0].q, 0.8);
        assert_eq!(back.right().len(), 6);
        assert_eq!(back.right()[5].q, -0.3);
    }

    #[test]
    fn test_hand_cmd_crc_detects_corruption() {
        let mut bytes = HandCmd::new(12).to_wire(&layout()).unwrap();
        // Flip a bit inside slot 1's q.
        bytes[4 + 4 + 22 + 2] ^= 0x10;
        let err = HandCmd::from_wire(&bytes, &layout()).unwrap_err();
        assert!(err.to_string().contains("HandCmd CRC mismatch"));
    }

    #[test]
    fn test_hand_cmd_wrong_length_rejected() {
        assert!(matches!(
            HandCmd::new(10).to_wire(&layout()),
            Err(Error::Serialization(_))
        ));
        assert!(HandCmd::new(12).set_position(12, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_hand_state_roundtrip() {
        let mut state = HandState::new(12);
        state.tick = 900;
        state.position[4] = 1.1;
        state.velocity[4] = -0.2;
        state.torque[4] = 0.05;
        state.motor_status[9] = motor_error::OVER_CURRENT_ERROR;

        let bytes = state.to_wire(&layout()).unwrap();
        let back = HandState::from_wire(&bytes, &layout()).unwrap();
        assert_eq!(back, state);

        let slot = back.motor_state(4).unwrap();
        assert_eq!((slot.q, slot.dq, slot.tau), (1.1, -0.2, 0.05));
        assert!(back.motor_state(9).unwrap().has_error());
        assert!(back.motor_state(12).is_none());
        assert_eq!(back.motor_states().len(), 12);
    }

    #[test]
    fn test_hand_state_layout_mismatch() {
        let bytes = HandState::new(12).to_wire(&layout()).unwrap();
        let other = MessageLayout::new(31).with_hand_motors(10);
        assert!(matches!(
            HandState::from_wire(&bytes, &other),
            Err(Error::Deserialization(_))
        ));
    }
}
