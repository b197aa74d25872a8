//! Motor and joint indices for the IGRIS-C humanoid
//!
//! Motor space (MS) addresses actuators directly; joint space (PJS) addresses
//! the kinematic joints after the parallel ankle/waist linkages are resolved.
//! Both spaces use the same 31 slots, only the names of a few slots differ.

/// Motor count of the IGRIS-C. Other robots pass their own count through
/// [`ChannelConfig`](crate::ChannelConfig).
pub const DEFAULT_NUM_MOTORS: usize = 31;

/// Hand actuator count of the IGRIS-C (six per hand, left first)
pub const DEFAULT_NUM_HAND_MOTORS: usize = 12;

/// Slot indices shared by motor and joint space
pub mod idx {
    // Waist
    pub const WAIST_YAW: usize = 0;
    pub const WAIST_1: usize = 1;
    pub const WAIST_2: usize = 2;

    // Left leg
    pub const HIP_PITCH_L: usize = 3;
    pub const HIP_ROLL_L: usize = 4;
    pub const HIP_YAW_L: usize = 5;
    pub const KNEE_PITCH_L: usize = 6;
    pub const ANKLE_1_L: usize = 7;
    pub const ANKLE_2_L: usize = 8;

    // Right leg
    pub const HIP_PITCH_R: usize = 9;
    pub const HIP_ROLL_R: usize = 10;
    pub const HIP_YAW_R: usize = 11;
    pub const KNEE_PITCH_R: usize = 12;
    pub const ANKLE_1_R: usize = 13;
    pub const ANKLE_2_R: usize = 14;

    // Left arm
    pub const SHOULDER_PITCH_L: usize = 15;
    pub const SHOULDER_ROLL_L: usize = 16;
    pub const SHOULDER_YAW_L: usize = 17;
    pub const ELBOW_PITCH_L: usize = 18;
    pub const WRIST_YAW_L: usize = 19;
    pub const WRIST_1_L: usize = 20;
    pub const WRIST_2_L: usize = 21;

    // Right arm
    pub const SHOULDER_PITCH_R: usize = 22;
    pub const SHOULDER_ROLL_R: usize = 23;
    pub const SHOULDER_YAW_R: usize = 24;
    pub const ELBOW_PITCH_R: usize = 25;
    pub const WRIST_YAW_R: usize = 26;
    pub const WRIST_1_R: usize = 27;
    pub const WRIST_2_R: usize = 28;

    // Neck
    pub const NECK_YAW: usize = 29;
    pub const NECK_PITCH: usize = 30;
}

/// Actuator names in motor space (MS)
pub const MOTOR_NAMES: [&str; DEFAULT_NUM_MOTORS] = [
    "Waist_Yaw",
    "Waist_L",
    "Waist_R",
    "Hip_Pitch_L",
    "Hip_Roll_L",
    "Hip_Yaw_L",
    "Knee_Pitch_L",
    "Ankle_Out_L",
    "Ankle_In_L",
    "Hip_Pitch_R",
    "Hip_Roll_R",
    "Hip_Yaw_R",
    "Knee_Pitch_R",
    "Ankle_Out_R",
    "Ankle_In_R",
    "Shoulder_Pitch_L",
    "Shoulder_Roll_L",
    "Shoulder_Yaw_L",
    "Elbow_Pitch_L",
    "Wrist_Yaw_L",
    "Wrist_Front_L",
    "Wrist_Back_L",
    "Shoulder_Pitch_R",
    "Shoulder_Roll_R",
    "Shoulder_Yaw_R",
    "Elbow_Pitch_R",
    "Wrist_Yaw_R",
    "Wrist_Front_R",
    "Wrist_Back_R",
    "Neck_Yaw",
    "Neck_Pitch",
];

/// Joint names in joint space (PJS)
pub const JOINT_NAMES: [&str; DEFAULT_NUM_MOTORS] = [
    "Waist_Yaw",
    "Waist_Roll",
    "Waist_Pitch",
    "Hip_Pitch_L",
    "Hip_Roll_L",
    "Hip_Yaw_L",
    "Knee_Pitch_L",
    "Ankle_Pitch_L",
    "Ankle_Roll_L",
    "Hip_Pitch_R",
    "Hip_Roll_R",
    "Hip_Yaw_R",
    "Knee_Pitch_R",
    "Ankle_Pitch_R",
    "Ankle_Roll_R",
    "Shoulder_Pitch_L",
    "Shoulder_Roll_L",
    "Shoulder_Yaw_L",
    "Elbow_Pitch_L",
    "Wrist_Yaw_L",
    "Wrist_Roll_L",
    "Wrist_Pitch_L",
    "Shoulder_Pitch_R",
    "Shoulder_Roll_R",
    "Shoulder_Yaw_R",
    "Elbow_Pitch_R",
    "Wrist_Yaw_R",
    "Wrist_Roll_R",
    "Wrist_Pitch_R",
    "Neck_Yaw",
    "Neck_Pitch",
];

/// Get motor index by motor-space name
pub fn motor_index_by_name(name: &str) -> Option<usize> {
    MOTOR_NAMES.iter().position(|&n| n == name)
}

/// Get joint index by joint-space name
pub fn joint_index_by_name(name: &str) -> Option<usize> {
    JOINT_NAMES.iter().position(|&n| n == name)
}
