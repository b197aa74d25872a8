//! Python bindings for igris-core, importable as `igris_c_sdk`
//!
//! Mirrors the C++ SDK surface (`ChannelFactory`, `IgrisC_Client`,
//! `LowStateSubscriber`, `LowCmdPublisher`, hand and BMS channels). Blocking
//! calls release the GIL; subscriber callbacks reacquire it on the delivery
//! thread.

use pyo3::prelude::*;

mod bindings;

use bindings::*;

/// The igris_c_sdk Python module
#[pymodule]
fn igris_c_sdk(m: &Bound<'_, PyModule>) -> PyResult<()> {
    let _ = tracing_subscriber::fmt::try_init();

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    m.add("VERSION", igris_core::VERSION)?;

    // Channel
    m.add_class::<PyChannelFactory>()?;
    m.add_class::<PyLowStateSubscriber>()?;
    m.add_class::<PyControlModeStateSubscriber>()?;
    m.add_class::<PyLowCmdPublisher>()?;
    m.add_class::<PyBmsStateSubscriber>()?;
    m.add_class::<PyHandStateSubscriber>()?;
    m.add_class::<PyHandCmdPublisher>()?;

    // Messages
    m.add_class::<PyKinematicMode>()?;
    m.add_class::<PyMotorCmd>()?;
    m.add_class::<PyLowCmd>()?;
    m.add_class::<PyImuState>()?;
    m.add_class::<PyLowState>()?;
    m.add_class::<PyMotorState>()?;
    m.add_class::<PyJointState>()?;
    m.add_class::<PyControlModeState>()?;
    m.add_class::<PyHandCmd>()?;
    m.add_class::<PyHandState>()?;
    m.add_class::<PyRelayState>()?;
    m.add_class::<PyEStopState>()?;
    m.add_class::<PyBmsConnState>()?;
    m.add_class::<PyBmsInitState>()?;
    m.add_class::<PyBmsState>()?;

    // Control client
    m.add_class::<PyBmsInitType>()?;
    m.add_class::<PyTorqueType>()?;
    m.add_class::<PyControlMode>()?;
    m.add_class::<PyServiceResponse>()?;
    m.add_class::<PyIgrisC_Client>()?;

    // Default topic names
    let topics = PyModule::new(m.py(), "topics")?;
    topics.add("LOW_STATE", igris_core::msg::topics::LOW_STATE)?;
    topics.add("LOW_CMD", igris_core::msg::topics::LOW_CMD)?;
    topics.add(
        "CONTROL_MODE_STATE",
        igris_core::msg::topics::CONTROL_MODE_STATE,
    )?;
    topics.add("BMS_STATE", igris_core::msg::topics::BMS_STATE)?;
    topics.add("HAND_STATE", igris_core::msg::topics::HAND_STATE)?;
    topics.add("HAND_CMD", igris_core::msg::topics::HAND_CMD)?;
    m.add_submodule(&topics)?;

    m.add("NUM_MOTORS", igris_core::joints::DEFAULT_NUM_MOTORS)?;
    m.add("NUM_HAND_MOTORS", igris_core::joints::DEFAULT_NUM_HAND_MOTORS)?;
    m.add("MOTOR_NAMES", igris_core::joints::MOTOR_NAMES.to_vec())?;
    m.add("JOINT_NAMES", igris_core::joints::JOINT_NAMES.to_vec())?;

    m.add_function(wrap_pyfunction!(motor_index_by_name, m)?)?;
    m.add_function(wrap_pyfunction!(joint_index_by_name, m)?)?;
    m.add_function(wrap_pyfunction!(describe_motor_error, m)?)?;

    // Control-loop helpers
    m.add_function(wrap_pyfunction!(create_motor_cmd, m)?)?;
    m.add_function(wrap_pyfunction!(lerp, m)?)?;
    m.add_function(wrap_pyfunction!(clamp, m)?)?;
    m.add_function(wrap_pyfunction!(deg2rad, m)?)?;
    m.add_function(wrap_pyfunction!(rad2deg, m)?)?;
    m.add_function(wrap_pyfunction!(get_timestamp_us, m)?)?;

    Ok(())
}

/// Get motor index by motor-space name
#[pyfunction]
#[must_use]
fn motor_index_by_name(name: &str) -> Option<usize> {
    igris_core::joints::motor_index_by_name(name)
}

/// Get joint index by joint-space name
#[pyfunction]
#[must_use]
fn joint_index_by_name(name: &str) -> Option<usize> {
    igris_core::joints::joint_index_by_name(name)
}

/// Names of the motor error flags set in `bits`
#[pyfunction]
fn describe_motor_error(bits: u32) -> Vec<&'static str> {
    igris_core::msg::motor_error::describe(bits)
}

#[pyfunction]
#[pyo3(signature = (id, q = 0.0, dq = 0.0, tau = 0.0, kp = 0.0, kd = 0.0))]
fn create_motor_cmd(id: u16, q: f32, dq: f32, tau: f32, kp: f32, kd: f32) -> PyMotorCmd {
    PyMotorCmd {
        inner: igris_core::util::create_motor_cmd(id, q, dq, tau, kp, kd),
    }
}

#[pyfunction]
fn lerp(start: f32, end: f32, t: f32) -> f32 {
    igris_core::util::lerp(start, end, t)
}

#[pyfunction]
fn clamp(value: f32, min: f32, max: f32) -> f32 {
    igris_core::util::clamp(value, min, max)
}

#[pyfunction]
fn deg2rad(deg: f32) -> f32 {
    igris_core::util::deg2rad(deg)
}

#[pyfunction]
fn rad2deg(rad: f32) -> f32 {
    igris_core::util::rad2deg(rad)
}

/// Microseconds since the Unix epoch
#[pyfunction]
fn get_timestamp_us() -> u64 {
    igris_core::util::timestamp_us()
}
