//! Small helpers for control loops

use std::time::{SystemTime, UNIX_EPOCH};

use crate::msg::{JointState, LowState, MotorCmd, MotorState};

/// Linear interpolation from `start` to `end`; `t` is not clamped
#[inline]
pub fn lerp(start: f32, end: f32, t: f32) -> f32 {
    start + (end - start) * t
}

/// Clamp `value` into `[min, max]`
///
/// Unlike [`f32::clamp`] this never panics: swapped bounds are reordered and
/// a NaN `value` is returned unchanged.
#[inline]
pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    if value < lo {
        lo
    } else if value > hi {
        hi
    } else {
        value
    }
}

#[inline]
pub fn deg2rad(deg: f32) -> f32 {
    deg.to_radians()
}

#[inline]
pub fn rad2deg(rad: f32) -> f32 {
    rad.to_degrees()
}

/// Microseconds since the Unix epoch (0 if the clock is before it)
pub fn timestamp_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Build a motor command with every field set
pub fn create_motor_cmd(id: u16, q: f32, dq: f32, tau: f32, kp: f32, kd: f32) -> MotorCmd {
    MotorCmd::new(id, q, dq, tau, kp, kd)
}

pub fn get_motor_state(state: &LowState, motor_id: usize) -> Option<MotorState> {
    state.motor_state(motor_id)
}

pub fn get_joint_state(state: &LowState, joint_id: usize) -> Option<JointState> {
    state.joint_state(joint_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(0.0, 10.0, 0.0), 0.0);
        assert_eq!(lerp(0.0, 10.0, 1.0), 10.0);
        assert_eq!(lerp(2.0, 4.0, 0.5), 3.0);
        assert_eq!(lerp(1.0, -1.0, 0.25), 0.5);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(5.0, -1.0, 1.0), 1.0);
        assert_eq!(clamp(-5.0, -1.0, 1.0), -1.0);
        assert_eq!(clamp(0.3, -1.0, 1.0), 0.3);
        assert_eq!(clamp(5.0, 1.0, -1.0), 1.0);
        assert!(clamp(f32::NAN, -1.0, 1.0).is_nan());
    }

    #[test]
    fn test_angle_conversion() {
        assert!((deg2rad(180.0) - std::f32::consts::PI).abs() < 1e-6);
        assert!((rad2deg(std::f32::consts::FRAC_PI_2) - 90.0).abs() < 1e-4);
    }

    #[test]
    fn test_timestamp_after_2020() {
        assert!(timestamp_us() > 1_577_836_800_000_000);
    }

    #[test]
    fn test_state_lookups() {
        let mut state = LowState::new(31);
        state.position[10] = 0.7;
        state.joint_velocity[10] = -1.5;
        assert_eq!(get_motor_state(&state, 10).map(|m| m.q), Some(0.7));
        assert_eq!(get_joint_state(&state, 10).map(|j| j.dq), Some(-1.5));
        assert!(get_motor_state(&state, 40).is_none());
        assert_eq!(
            create_motor_cmd(3, 0.1, 0.0, 0.0, 20.0, 1.0),
            MotorCmd::position(3, 0.1, 20.0, 1.0)
        );
    }
}
