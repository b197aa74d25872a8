//! Low-level telemetry and motor command records

use serde::{Deserialize, Serialize};

use super::cdr::{CdrReader, CdrWriter};
use super::crc::compute_crc;
use super::{MessageLayout, WireMessage};
use crate::{Error, Result};

/// Which space the setpoints of a [`LowCmd`] are expressed in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KinematicMode {
    /// Motor space: one setpoint per actuator
    #[default]
    MS = 0,
    /// Parallel joint space: setpoints per kinematic joint
    PJS = 1,
}

impl TryFrom<u8> for KinematicMode {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::MS),
            1 => Ok(Self::PJS),
            other => Err(Error::Deserialization(format!(
                "unknown kinematic mode {other}"
            ))),
        }
    }
}

/// Single motor command
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorCmd {
    /// Motor (or joint) slot this setpoint targets
    pub id: u16,
    /// Target position (rad)
    pub q: f32,
    /// Target velocity (rad/s)
    pub dq: f32,
    /// Feedforward torque (Nm)
    pub tau: f32,
    /// Position gain
    pub kp: f32,
    /// Velocity gain
    pub kd: f32,
}

impl MotorCmd {
    /// Create a command with every field set
    pub fn new(id: u16, q: f32, dq: f32, tau: f32, kp: f32, kd: f32) -> Self {
        Self {
            id,
            q,
            dq,
            tau,
            kp,
            kd,
        }
    }

    /// All-zero command for slot `id` (motor goes limp)
    pub fn zero(id: u16) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// PD position hold
    pub fn position(id: u16, q: f32, kp: f32, kd: f32) -> Self {
        Self::new(id, q, 0.0, 0.0, kp, kd)
    }
}

/// Low-level command to the robot
///
/// Must carry exactly one [`MotorCmd`] per motor; a short or long array is
/// rejected by the publisher with a serialization error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowCmd {
    pub kinematic_mode: KinematicMode,
    pub motors: Vec<MotorCmd>,
}

impl LowCmd {
    /// All-zero command for `num_motors` motors with ids `0..num_motors`
    pub fn new(num_motors: usize, kinematic_mode: KinematicMode) -> Self {
        Self {
            kinematic_mode,
            motors: (0..num_motors).map(|i| MotorCmd::zero(i as u16)).collect(),
        }
    }

    /// Pure damping on every motor (safe stop)
    pub fn damping(num_motors: usize, kd: f32) -> Self {
        let mut cmd = Self::new(num_motors, KinematicMode::MS);
        for m in &mut cmd.motors {
            m.kd = kd;
        }
        cmd
    }

    /// Set a PD position target on one slot
    pub fn set_position(&mut self, index: usize, q: f32, kp: f32, kd: f32) -> Result<()> {
        let motor = self.motors.get_mut(index).ok_or_else(|| {
            Error::InvalidState(format!("motor index {index} out of range"))
        })?;
        *motor = MotorCmd::position(motor.id, q, kp, kd);
        Ok(())
    }
}

impl WireMessage for LowCmd {
    const TYPE_NAME: &'static str = "igris_c::msg::dds::LowCmd";

    fn encode(&self, w: &mut CdrWriter, layout: &MessageLayout) -> Result<()> {
        let start = w.position();
        w.write_u8(self.kinematic_mode as u8);
        write_motor_cmds(w, &self.motors, layout.num_motors)?;
        let crc = compute_crc(w.written_since(start));
        w.write_u32(crc);
        Ok(())
    }

    fn decode(r: &mut CdrReader<'_>, layout: &MessageLayout) -> Result<Self> {
        let start = r.position();
        let kinematic_mode = KinematicMode::try_from(r.read_u8()?)?;
        let motors = read_motor_cmds(r, layout.num_motors)?;
        check_crc(r, start, "LowCmd")?;

        Ok(Self {
            kinematic_mode,
            motors,
        })
    }
}

pub(super) fn write_motor_cmds(
    w: &mut CdrWriter,
    motors: &[MotorCmd],
    expected: usize,
) -> Result<()> {
    w.write_seq_len("motors", motors.len(), expected)?;
    for m in motors {
        w.write_u16(m.id);
        w.write_f32(m.q);
        w.write_f32(m.dq);
        w.write_f32(m.tau);
        w.write_f32(m.kp);
        w.write_f32(m.kd);
    }
    Ok(())
}

pub(super) fn read_motor_cmds(r: &mut CdrReader<'_>, expected: usize) -> Result<Vec<MotorCmd>> {
    let n = r.read_seq_len("motors", expected)?;
    let mut motors = Vec::with_capacity(n);
    for _ in 0..n {
        motors.push(MotorCmd {
            id: r.read_u16()?,
            q: r.read_f32()?,
            dq: r.read_f32()?,
            tau: r.read_f32()?,
            kp: r.read_f32()?,
            kd: r.read_f32()?,
        });
    }
    Ok(motors)
}

/// Read the trailing CRC and compare it with everything consumed since `start`
pub(super) fn check_crc(r: &mut CdrReader<'_>, start: usize, what: &str) -> Result<()> {
    let computed = compute_crc(r.consumed_since(start));
    let crc = r.read_u32()?;
    if crc != computed {
        return Err(Error::Deserialization(format!(
            "{what} CRC mismatch: wire={crc:#010x}, computed={computed:#010x}"
        )));
    }
    Ok(())
}

pub(super) fn write_u32_seq(
    w: &mut CdrWriter,
    field: &str,
    values: &[u32],
    expected: usize,
) -> Result<()> {
    w.write_seq_len(field, values.len(), expected)?;
    for &v in values {
        w.write_u32(v);
    }
    Ok(())
}

pub(super) fn read_u32_seq(r: &mut CdrReader<'_>, field: &str, expected: usize) -> Result<Vec<u32>> {
    let len = r.read_seq_len(field, expected)?;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(r.read_u32()?);
    }
    Ok(values)
}

/// Feedback of one actuator, read out of a [`LowState`] or hand state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MotorState {
    /// Position (rad)
    pub q: f32,
    /// Velocity (rad/s)
    pub dq: f32,
    /// Torque (Nm)
    pub tau: f32,
    /// [`motor_error`] bit flags
    pub status: u32,
}

impl MotorState {
    pub fn has_error(&self) -> bool {
        self.status != motor_error::NO_ERROR
    }
}

/// Feedback of one kinematic joint
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub q: f32,
    pub dq: f32,
    pub tau: f32,
}

/// IMU sensor state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuState {
    /// Quaternion orientation [w, x, y, z]
    pub quaternion: [f32; 4],
    /// Angular velocity [x, y, z] (rad/s)
    pub gyroscope: [f32; 3],
    /// Linear acceleration [x, y, z] (m/s²)
    pub accelerometer: [f32; 3],
    /// Roll, pitch, yaw angles (rad)
    pub rpy: [f32; 3],
}

impl ImuState {
    pub fn roll(&self) -> f32 {
        self.rpy[0]
    }

    pub fn pitch(&self) -> f32 {
        self.rpy[1]
    }

    pub fn yaw(&self) -> f32 {
        self.rpy[2]
    }
}

/// Low-level state from the robot
///
/// A fresh instance is produced for every delivery. Every array has one
/// entry per slot: `position`, `velocity`, `torque` and `motor_status` are
/// in motor space, the `joint_*` arrays in parallel joint space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowState {
    /// Controller tick of this sample
    pub tick: u32,
    pub imu: ImuState,
    /// Motor positions (rad)
    pub position: Vec<f32>,
    /// Motor velocities (rad/s)
    pub velocity: Vec<f32>,
    /// Motor torques (Nm)
    pub torque: Vec<f32>,
    /// Per-motor [`motor_error`] bit flags
    pub motor_status: Vec<u32>,
    /// Joint positions (rad)
    pub joint_position: Vec<f32>,
    /// Joint velocities (rad/s)
    pub joint_velocity: Vec<f32>,
    /// Joint torques (Nm)
    pub joint_torque: Vec<f32>,
}

impl LowState {
    /// All-zero state for `num_motors` motors
    pub fn new(num_motors: usize) -> Self {
        Self {
            tick: 0,
            imu: ImuState::default(),
            position: vec![0.0; num_motors],
            velocity: vec![0.0; num_motors],
            torque: vec![0.0; num_motors],
            motor_status: vec![motor_error::NO_ERROR; num_motors],
            joint_position: vec![0.0; num_motors],
            joint_velocity: vec![0.0; num_motors],
            joint_torque: vec![0.0; num_motors],
        }
    }

    /// Number of motors in this sample
    pub fn num_motors(&self) -> usize {
        self.position.len()
    }

    /// Feedback of motor slot `index`, `None` when out of range
    pub fn motor_state(&self, index: usize) -> Option<MotorState> {
        Some(MotorState {
            q: *self.position.get(index)?,
            dq: *self.velocity.get(index)?,
            tau: *self.torque.get(index)?,
            status: *self.motor_status.get(index)?,
        })
    }

    /// Feedback of joint slot `index`, `None` when out of range
    pub fn joint_state(&self, index: usize) -> Option<JointState> {
        Some(JointState {
            q: *self.joint_position.get(index)?,
            dq: *self.joint_velocity.get(index)?,
            tau: *self.joint_torque.get(index)?,
        })
    }

    pub fn motor_states(&self) -> Vec<MotorState> {
        (0..self.num_motors())
            .filter_map(|i| self.motor_state(i))
            .collect()
    }

    pub fn joint_states(&self) -> Vec<JointState> {
        (0..self.joint_position.len())
            .filter_map(|i| self.joint_state(i))
            .collect()
    }

    /// Indices of motors reporting any error flag
    pub fn faulted_motors(&self) -> Vec<usize> {
        self.motor_status
            .iter()
            .enumerate()
            .filter(|(_, &bits)| bits != motor_error::NO_ERROR)
            .map(|(i, _)| i)
            .collect()
    }
}

impl WireMessage for LowState {
    const TYPE_NAME: &'static str = "igris_c::msg::dds::LowState";

    fn encode(&self, w: &mut CdrWriter, layout: &MessageLayout) -> Result<()> {
        let n = layout.num_motors;
        w.write_u32(self.tick);
        w.write_f32_array(&self.imu.quaternion);
        w.write_f32_array(&self.imu.gyroscope);
        w.write_f32_array(&self.imu.accelerometer);
        w.write_f32_array(&self.imu.rpy);
        w.write_f32_seq("position", &self.position, n)?;
        w.write_f32_seq("velocity", &self.velocity, n)?;
        w.write_f32_seq("torque", &self.torque, n)?;
        write_u32_seq(w, "motor_status", &self.motor_status, n)?;
        w.write_f32_seq("joint_position", &self.joint_position, n)?;
        w.write_f32_seq("joint_velocity", &self.joint_velocity, n)?;
        w.write_f32_seq("joint_torque", &self.joint_torque, n)?;
        Ok(())
    }

    fn decode(r: &mut CdrReader<'_>, layout: &MessageLayout) -> Result<Self> {
        let n = layout.num_motors;
        let tick = r.read_u32()?;
        let imu = ImuState {
            quaternion: r.read_f32_array()?,
            gyroscope: r.read_f32_array()?,
            accelerometer: r.read_f32_array()?,
            rpy: r.read_f32_array()?,
        };
        let position = r.read_f32_seq("position", n)?;
        let velocity = r.read_f32_seq("velocity", n)?;
        let torque = r.read_f32_seq("torque", n)?;
        let motor_status = read_u32_seq(r, "motor_status", n)?;
        Ok(Self {
            tick,
            imu,
            position,
            velocity,
            torque,
            motor_status,
            joint_position: r.read_f32_seq("joint_position", n)?,
            joint_velocity: r.read_f32_seq("joint_velocity", n)?,
            joint_torque: r.read_f32_seq("joint_torque", n)?,
        })
    }
}

/// Motor error flags reported in [`LowState::motor_status`]
pub mod motor_error {
    pub const NO_ERROR: u32 = 0x0000_0000;

    pub const INITIALIZE_ERROR: u32 = 0x0000_0001;
    pub const PACKET_NOT_RECEIVED_ERROR: u32 = 0x0000_0002;

    /// Bits raised by the robot controller rather than the motor driver
    pub const ROBOT_LEVEL_MASK: u32 = 0x0000_0003;

    /// Stall current reached at near-zero speed for a sustained period
    pub const MOTOR_STALL_ERROR: u32 = 0x0000_0004;
    pub const LOW_VOLTAGE_ERROR: u32 = 0x0000_0008;
    pub const OVER_VOLTAGE_ERROR: u32 = 0x0000_0010;
    pub const OVER_CURRENT_ERROR: u32 = 0x0000_0020;
    pub const POWER_OVERRUN_ERROR: u32 = 0x0000_0040;
    pub const CALIBRATION_PARAMETER_WRITING_ERROR: u32 = 0x0000_0080;
    pub const SPEEDING_ERROR: u32 = 0x0000_0100;
    pub const COMPONENT_OVERTEMPERATURE_ERROR: u32 = 0x0000_0200;
    pub const MOTOR_TEMPERATURE_OVER_TEMPERATURE_ERROR: u32 = 0x0000_0400;
    pub const ENCODER_CALIBRATION_ERROR: u32 = 0x0000_0800;
    pub const ENCODER_DATA_ERROR: u32 = 0x0000_1000;
    pub const MOTOR_BRAKE_VOLTAGE_TOO_HIGH_ERROR: u32 = 0x0000_2000;
    pub const DRV_DRIVE_ERROR: u32 = 0x0000_4000;

    const NAMES: [(u32, &str); 15] = [
        (INITIALIZE_ERROR, "INITIALIZE_ERROR"),
        (PACKET_NOT_RECEIVED_ERROR, "PACKET_NOT_RECEIVED_ERROR"),
        (MOTOR_STALL_ERROR, "MOTOR_STALL_ERROR"),
        (LOW_VOLTAGE_ERROR, "LOW_VOLTAGE_ERROR"),
        (OVER_VOLTAGE_ERROR, "OVER_VOLTAGE_ERROR"),
        (OVER_CURRENT_ERROR, "OVER_CURRENT_ERROR"),
        (POWER_OVERRUN_ERROR, "POWER_OVERRUN_ERROR"),
        (
            CALIBRATION_PARAMETER_WRITING_ERROR,
            "CALIBRATION_PARAMETER_WRITING_ERROR",
        ),
        (SPEEDING_ERROR, "SPEEDING_ERROR"),
        (
            COMPONENT_OVERTEMPERATURE_ERROR,
            "COMPONENT_OVERTEMPERATURE_ERROR",
        ),
        (
            MOTOR_TEMPERATURE_OVER_TEMPERATURE_ERROR,
            "MOTOR_TEMPERATURE_OVER_TEMPERATURE_ERROR",
        ),
        (ENCODER_CALIBRATION_ERROR, "ENCODER_CALIBRATION_ERROR"),
        (ENCODER_DATA_ERROR, "ENCODER_DATA_ERROR"),
        (
            MOTOR_BRAKE_VOLTAGE_TOO_HIGH_ERROR,
            "MOTOR_BRAKE_VOLTAGE_TOO_HIGH_ERROR",
        ),
        (DRV_DRIVE_ERROR, "DRV_DRIVE_ERROR"),
    ];

    /// Names of every flag set in `bits`
    pub fn describe(bits: u32) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(flag, _)| bits & flag != 0)
            .map(|&(_, name)| name)
            .collect()
    }

    /// Whether the robot controller (not the driver) raised an error
    pub fn is_robot_level(bits: u32) -> bool {
        bits & ROBOT_LEVEL_MASK != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> MessageLayout {
        MessageLayout::new(31)
    }

    #[test]
    fn test_low_cmd_roundtrip_31_motors() {
        let mut cmd = LowCmd::new(31, KinematicMode::PJS);
        for (i, m) in cmd.motors.iter_mut().enumerate() {
            *m = MotorCmd::new(i as u16, i as f32 * 0.1, -0.5, 1.25, 50.0 + i as f32, 0.8);
        }
        let bytes = cmd.to_wire(&layout()).unwrap();
        let back = LowCmd::from_wire(&bytes, &layout()).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_low_cmd_wrong_length_rejected() {
        let cmd = LowCmd::new(12, KinematicMode::MS);
        let err = cmd.to_wire(&layout()).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_low_cmd_byte_count() {
        let bytes = LowCmd::new(31, KinematicMode::MS).to_wire(&layout()).unwrap();
        // header + mode + count + motors(2 + 5*4) + crc
        assert_eq!(bytes.len(), 4 + 1 + 4 + 31 * 22 + 4);
    }

    #[test]
    fn test_low_cmd_crc_detects_corruption() {
        let mut bytes = LowCmd::new(31, KinematicMode::MS)
            .to_wire(&layout())
            .unwrap();
        // Flip a bit inside motor 3's q.
        bytes[4 + 1 + 4 + 3 * 22 + 2] ^= 0x40;
        let err = LowCmd::from_wire(&bytes, &layout()).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_unknown_kinematic_mode() {
        let mut bytes = LowCmd::new(31, KinematicMode::MS)
            .to_wire(&layout())
            .unwrap();
        bytes[4] = 7;
        assert!(matches!(
            LowCmd::from_wire(&bytes, &layout()),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_set_position() {
        let mut cmd = LowCmd::new(31, KinematicMode::MS);
        cmd.set_position(30, 0.3, 5.0, 0.1).unwrap();
        assert_eq!(cmd.motors[30], MotorCmd::new(30, 0.3, 0.0, 0.0, 5.0, 0.1));
        assert!(cmd.set_position(31, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_damping() {
        let cmd = LowCmd::damping(31, 3.0);
        assert!(cmd.motors.iter().all(|m| m.kd == 3.0 && m.kp == 0.0));
    }

    #[test]
    fn test_low_state_roundtrip() {
        let mut state = LowState::new(31);
        state.tick = 42;
        state.imu.rpy = [0.1, -0.2, 0.3];
        state.imu.quaternion = [1.0, 0.0, 0.0, 0.0];
        state.position[5] = 1.5;
        state.velocity[6] = -2.0;
        state.torque[30] = 0.75;
        state.motor_status[2] = motor_error::OVER_CURRENT_ERROR;
        state.joint_position[7] = -0.4;
        state.joint_torque[8] = 3.5;

        let bytes = state.to_wire(&layout()).unwrap();
        let back = LowState::from_wire(&bytes, &layout()).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.faulted_motors(), vec![2]);
    }

    #[test]
    fn test_motor_and_joint_state_views() {
        let mut state = LowState::new(31);
        state.position[3] = 0.5;
        state.velocity[3] = 1.0;
        state.torque[3] = -2.0;
        state.motor_status[3] = motor_error::SPEEDING_ERROR;
        state.joint_position[7] = 0.25;
        state.joint_velocity[7] = -0.5;
        state.joint_torque[7] = 4.0;

        let bytes = state.to_wire(&layout()).unwrap();
        let back = LowState::from_wire(&bytes, &layout()).unwrap();

        let motor = back.motor_state(3).unwrap();
        assert_eq!(motor.q, 0.5);
        assert_eq!(motor.dq, 1.0);
        assert_eq!(motor.tau, -2.0);
        assert!(motor.has_error());
        assert_eq!(
            back.joint_state(7),
            Some(JointState {
                q: 0.25,
                dq: -0.5,
                tau: 4.0
            })
        );
        assert_eq!(back.motor_states().len(), 31);
        assert_eq!(back.joint_states()[7].q, 0.25);
        assert!(back.motor_state(31).is_none());
        assert!(back.joint_state(31).is_none());
    }

    #[test]
    fn test_low_state_short_joint_array_rejected() {
        let mut state = LowState::new(31);
        state.joint_velocity.pop();
        assert!(matches!(
            state.to_wire(&layout()),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_low_state_layout_mismatch() {
        let bytes = LowState::new(12).to_wire(&MessageLayout::new(12)).unwrap();
        assert!(matches!(
            LowState::from_wire(&bytes, &layout()),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_low_state_truncated() {
        let bytes = LowState::new(31).to_wire(&layout()).unwrap();
        assert!(LowState::from_wire(&bytes[..bytes.len() - 3], &layout()).is_err());
    }

    #[test]
    fn test_motor_error_describe() {
        let bits = motor_error::LOW_VOLTAGE_ERROR | motor_error::DRV_DRIVE_ERROR;
        assert_eq!(
            motor_error::describe(bits),
            vec!["LOW_VOLTAGE_ERROR", "DRV_DRIVE_ERROR"]
        );
        assert!(motor_error::describe(motor_error::NO_ERROR).is_empty());
        assert!(motor_error::is_robot_level(motor_error::PACKET_NOT_RECEIVED_ERROR));
        assert!(!motor_error::is_robot_level(motor_error::SPEEDING_ERROR));
    }
}
