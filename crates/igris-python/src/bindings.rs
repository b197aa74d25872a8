//! PyO3 wrappers around igris-core types

#![allow(non_camel_case_types)]

use parking_lot::Mutex;
use pyo3::exceptions::{PyIndexError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::{PyClass, PyClassInitializer};
use std::sync::OnceLock;
use std::time::Duration;

use igris_core::msg::{self, topics};
use igris_core::{
    ChannelConfig, ChannelContext, ControlClient, ControlResult, Error, Publisher, Subscriber,
    SubscriberMonitor, WireMessage,
};

fn to_py_err(e: Error) -> PyErr {
    match e {
        Error::Serialization(_) | Error::Config(_) => PyValueError::new_err(e.to_string()),
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

static CONTEXT: OnceLock<ChannelContext> = OnceLock::new();

/// Process-wide context behind `ChannelFactory`
fn global_context() -> PyResult<&'static ChannelContext> {
    if let Some(ctx) = CONTEXT.get() {
        return Ok(ctx);
    }
    let ctx = ChannelContext::new(ChannelConfig::default()).map_err(to_py_err)?;
    Ok(CONTEXT.get_or_init(|| ctx))
}

// ============================================================================
// Channel factory
// ============================================================================

/// Entry point that joins a transport domain
#[pyclass(name = "ChannelFactory")]
pub struct PyChannelFactory {
    ctx: &'static ChannelContext,
}

#[pymethods]
impl PyChannelFactory {
    /// The process-wide factory
    #[staticmethod]
    #[pyo3(name = "Instance")]
    fn instance() -> PyResult<Self> {
        Ok(Self {
            ctx: global_context()?,
        })
    }

    /// Join `domain_id`; repeated calls with the same id are ignored
    #[pyo3(name = "Init")]
    fn init(&self, py: Python<'_>, domain_id: u32) -> PyResult<()> {
        let ctx = self.ctx;
        py.allow_threads(|| ctx.init(domain_id)).map_err(to_py_err)
    }

    #[pyo3(name = "IsInitialized")]
    fn is_initialized(&self) -> bool {
        self.ctx.is_initialized()
    }

    /// Leave the domain; subscribers stop and publishers start failing
    #[pyo3(name = "Release")]
    fn release(&self, py: Python<'_>) {
        let ctx = self.ctx;
        py.allow_threads(|| ctx.release());
    }

    #[getter]
    fn domain_id(&self) -> Option<u32> {
        self.ctx.domain_id()
    }

    fn __repr__(&self) -> String {
        match self.ctx.domain_id() {
            Some(id) => format!("ChannelFactory(domain_id={id})"),
            None => "ChannelFactory(uninitialized)".into(),
        }
    }
}

// ============================================================================
// Enums
// ============================================================================

#[pyclass(name = "KinematicMode", eq, eq_int)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PyKinematicMode {
    MS = 0,
    PJS = 1,
}

impl From<PyKinematicMode> for msg::KinematicMode {
    fn from(m: PyKinematicMode) -> Self {
        match m {
            PyKinematicMode::MS => Self::MS,
            PyKinematicMode::PJS => Self::PJS,
        }
    }
}

impl From<msg::KinematicMode> for PyKinematicMode {
    fn from(m: msg::KinematicMode) -> Self {
        match m {
            msg::KinematicMode::MS => Self::MS,
            msg::KinematicMode::PJS => Self::PJS,
        }
    }
}

#[pyclass(name = "BmsInitType", eq, eq_int)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PyBmsInitType {
    BMS_INIT_NONE = 0,
    BMS_INIT = 1,
    MOTOR_INIT = 2,
    BMS_AND_MOTOR_INIT = 3,
}

impl From<PyBmsInitType> for msg::BmsInitType {
    fn from(t: PyBmsInitType) -> Self {
        match t {
            PyBmsInitType::BMS_INIT_NONE => Self::BmsInitNone,
            PyBmsInitType::BMS_INIT => Self::BmsInit,
            PyBmsInitType::MOTOR_INIT => Self::MotorInit,
            PyBmsInitType::BMS_AND_MOTOR_INIT => Self::BmsAndMotorInit,
        }
    }
}

#[pyclass(name = "TorqueType", eq, eq_int)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PyTorqueType {
    TORQUE_ON = 0,
    TORQUE_OFF = 1,
}

impl From<PyTorqueType> for msg::TorqueType {
    fn from(t: PyTorqueType) -> Self {
        match t {
            PyTorqueType::TORQUE_ON => Self::TorqueOn,
            PyTorqueType::TORQUE_OFF => Self::TorqueOff,
        }
    }
}

#[pyclass(name = "ControlMode", eq, eq_int)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum PyControlMode {
    CONTROL_MODE_LOW_LEVEL = 0,
    CONTROL_MODE_HIGH_LEVEL = 1,
}

impl From<PyControlMode> for msg::ControlMode {
    fn from(m: PyControlMode) -> Self {
        match m {
            PyControlMode::CONTROL_MODE_LOW_LEVEL => Self::LowLevel,
            PyControlMode::CONTROL_MODE_HIGH_LEVEL => Self::HighLevel,
        }
    }
}

impl From<msg::ControlMode> for PyControlMode {
    fn from(m: msg::ControlMode) -> Self {
        match m {
            msg::ControlMode::LowLevel => Self::CONTROL_MODE_LOW_LEVEL,
            msg::ControlMode::HighLevel => Self::CONTROL_MODE_HIGH_LEVEL,
        }
    }
}

/// Core-to-Python conversion for the read-only BMS state enums
macro_rules! state_enum {
    ($py:ident, $name:tt, $core:ident { $($variant:ident => $core_variant:ident = $value:tt),+ $(,)? }) => {
        #[pyclass(name = $name, eq, eq_int)]
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub enum $py {
            $($variant = $value,)+
        }

        impl From<msg::$core> for $py {
            fn from(v: msg::$core) -> Self {
                match v {
                    $(msg::$core::$core_variant => Self::$variant,)+
                }
            }
        }
    };
}

state_enum!(PyRelayState, "RelayState", RelayState {
    RELAY_OFF => Off = 0,
    RELAY_ON => On = 1,
});

state_enum!(PyEStopState, "EStopState", EStopState {
    ESTOP_RELEASED => Released = 0,
    ESTOP_PRESSED => Pressed = 1,
});

state_enum!(PyBmsConnState, "BmsConnState", BmsConnState {
    BMS_DISCONNECTED => Disconnected = 0,
    BMS_CONNECTED => Connected = 1,
});

state_enum!(PyBmsInitState, "BmsInitState", BmsInitState {
    BMS_UNINITIALIZED => Uninitialized = 0,
    BMS_INITIALIZING => Initializing = 1,
    BMS_INITIALIZED => Initialized = 2,
    BMS_INIT_FAILED => Failed = 3,
});

// ============================================================================
// Messages
// ============================================================================

/// Motor command
///
/// Accessors follow the `field()` / `field(value)` convention of the C++ SDK.
#[pyclass(name = "MotorCmd")]
#[derive(Clone)]
pub struct PyMotorCmd {
    pub(crate) inner: msg::MotorCmd,
}

#[pymethods]
impl PyMotorCmd {
    #[new]
    #[pyo3(signature = (id = 0, q = 0.0, dq = 0.0, tau = 0.0, kp = 0.0, kd = 0.0))]
    fn new(id: u16, q: f32, dq: f32, tau: f32, kp: f32, kd: f32) -> Self {
        Self {
            inner: msg::MotorCmd::new(id, q, dq, tau, kp, kd),
        }
    }

    #[pyo3(signature = (value = None))]
    fn id(&mut self, value: Option<u16>) -> u16 {
        if let Some(v) = value {
            self.inner.id = v;
        }
        self.inner.id
    }

    #[pyo3(signature = (value = None))]
    fn q(&mut self, value: Option<f32>) -> f32 {
        if let Some(v) = value {
            self.inner.q = v;
        }
        self.inner.q
    }

    #[pyo3(signature = (value = None))]
    fn dq(&mut self, value: Option<f32>) -> f32 {
        if let Some(v) = value {
            self.inner.dq = v;
        }
        self.inner.dq
    }

    #[pyo3(signature = (value = None))]
    fn tau(&mut self, value: Option<f32>) -> f32 {
        if let Some(v) = value {
            self.inner.tau = v;
        }
        self.inner.tau
    }

    #[pyo3(signature = (value = None))]
    fn kp(&mut self, value: Option<f32>) -> f32 {
        if let Some(v) = value {
            self.inner.kp = v;
        }
        self.inner.kp
    }

    #[pyo3(signature = (value = None))]
    fn kd(&mut self, value: Option<f32>) -> f32 {
        if let Some(v) = value {
            self.inner.kd = v;
        }
        self.inner.kd
    }

    fn __repr__(&self) -> String {
        format!(
            "MotorCmd(id={}, q={:.3}, dq={:.3}, tau={:.3}, kp={:.1}, kd={:.1})",
            self.inner.id, self.inner.q, self.inner.dq, self.inner.tau, self.inner.kp, self.inner.kd
        )
    }
}

/// Low-level command; `motors()` entries are live references
#[pyclass(name = "LowCmd")]
pub struct PyLowCmd {
    kinematic_mode: PyKinematicMode,
    motors: Vec<Py<PyMotorCmd>>,
}

#[pymethods]
impl PyLowCmd {
    /// All-zero command; motor count defaults to the factory config
    #[new]
    #[pyo3(signature = (num_motors = None))]
    fn new(py: Python<'_>, num_motors: Option<usize>) -> PyResult<Self> {
        let n = match num_motors {
            Some(n) => n,
            None => global_context()?.config().num_motors,
        };
        let cmd = msg::LowCmd::new(n, msg::KinematicMode::MS);
        let motors = cmd
            .motors
            .into_iter()
            .map(|inner| Py::new(py, PyMotorCmd { inner }))
            .collect::<PyResult<Vec<_>>>()?;
        Ok(Self {
            kinematic_mode: PyKinematicMode::MS,
            motors,
        })
    }

    #[pyo3(signature = (value = None))]
    fn kinematic_mode(&mut self, value: Option<PyKinematicMode>) -> PyKinematicMode {
        if let Some(v) = value {
            self.kinematic_mode = v;
        }
        self.kinematic_mode
    }

    fn motors(&self, py: Python<'_>) -> Vec<Py<PyMotorCmd>> {
        self.motors.iter().map(|m| m.clone_ref(py)).collect()
    }

    /// Replace the command at `index`
    fn set_motor(&self, py: Python<'_>, index: usize, cmd: PyMotorCmd) -> PyResult<()> {
        let slot = self
            .motors
            .get(index)
            .ok_or_else(|| PyIndexError::new_err(format!("motor index {index} out of range")))?;
        slot.borrow_mut(py).inner = cmd.inner;
        Ok(())
    }

    fn __len__(&self) -> usize {
        self.motors.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "LowCmd(kinematic_mode={}, motors={})",
            match self.kinematic_mode {
                PyKinematicMode::MS => "MS",
                PyKinematicMode::PJS => "PJS",
            },
            self.motors.len()
        )
    }
}

impl PyLowCmd {
    fn to_core(&self, py: Python<'_>) -> msg::LowCmd {
        msg::LowCmd {
            kinematic_mode: self.kinematic_mode.into(),
            motors: self.motors.iter().map(|m| m.borrow(py).inner).collect(),
        }
    }
}

/// IMU sensor state
#[pyclass(name = "ImuState")]
#[derive(Clone)]
pub struct PyImuState {
    inner: msg::ImuState,
}

#[pymethods]
impl PyImuState {
    #[getter]
    #[inline]
    fn quaternion(&self) -> [f32; 4] {
        self.inner.quaternion
    }

    #[getter]
    #[inline]
    fn gyroscope(&self) -> [f32; 3] {
        self.inner.gyroscope
    }

    #[getter]
    #[inline]
    fn accelerometer(&self) -> [f32; 3] {
        self.inner.accelerometer
    }

    #[getter]
    #[inline]
    fn rpy(&self) -> [f32; 3] {
        self.inner.rpy
    }

    fn __repr__(&self) -> String {
        format!(
            "ImuState(roll={:.3}, pitch={:.3}, yaw={:.3})",
            self.inner.roll(),
            self.inner.pitch(),
            self.inner.yaw()
        )
    }
}

/// Feedback of one motor
#[pyclass(name = "MotorState")]
#[derive(Clone)]
pub struct PyMotorState {
    inner: msg::MotorState,
}

#[pymethods]
impl PyMotorState {
    fn q(&self) -> f32 {
        self.inner.q
    }

    fn dq(&self) -> f32 {
        self.inner.dq
    }

    fn tau(&self) -> f32 {
        self.inner.tau
    }

    fn status(&self) -> u32 {
        self.inner.status
    }

    fn __repr__(&self) -> String {
        format!(
            "MotorState(q={:.3}, dq={:.3}, tau={:.3}, status={:#x})",
            self.inner.q, self.inner.dq, self.inner.tau, self.inner.status
        )
    }
}

/// Feedback of one kinematic joint
#[pyclass(name = "JointState")]
#[derive(Clone)]
pub struct PyJointState {
    inner: msg::JointState,
}

#[pymethods]
impl PyJointState {
    fn q(&self) -> f32 {
        self.inner.q
    }

    fn dq(&self) -> f32 {
        self.inner.dq
    }

    fn tau(&self) -> f32 {
        self.inner.tau
    }

    fn __repr__(&self) -> String {
        format!(
            "JointState(q={:.3}, dq={:.3}, tau={:.3})",
            self.inner.q, self.inner.dq, self.inner.tau
        )
    }
}

fn motor_state_list(states: Vec<msg::MotorState>) -> Vec<PyMotorState> {
    states.into_iter().map(|inner| PyMotorState { inner }).collect()
}

/// Low-level robot state
#[pyclass(name = "LowState")]
#[derive(Clone)]
pub struct PyLowState {
    inner: msg::LowState,
}

impl From<msg::LowState> for PyLowState {
    fn from(inner: msg::LowState) -> Self {
        Self { inner }
    }
}

#[pymethods]
impl PyLowState {
    #[getter]
    #[inline]
    fn tick(&self) -> u32 {
        self.inner.tick
    }

    #[getter]
    fn imu(&self) -> PyImuState {
        PyImuState {
            inner: self.inner.imu,
        }
    }

    #[getter]
    fn position(&self) -> Vec<f32> {
        self.inner.position.clone()
    }

    #[getter]
    fn velocity(&self) -> Vec<f32> {
        self.inner.velocity.clone()
    }

    #[getter]
    fn torque(&self) -> Vec<f32> {
        self.inner.torque.clone()
    }

    #[getter]
    fn motor_status(&self) -> Vec<u32> {
        self.inner.motor_status.clone()
    }

    #[getter]
    fn joint_position(&self) -> Vec<f32> {
        self.inner.joint_position.clone()
    }

    #[getter]
    fn joint_velocity(&self) -> Vec<f32> {
        self.inner.joint_velocity.clone()
    }

    #[getter]
    fn joint_torque(&self) -> Vec<f32> {
        self.inner.joint_torque.clone()
    }

    /// Per-motor feedback, indexed like `MOTOR_NAMES`
    fn motor_state(&self) -> Vec<PyMotorState> {
        motor_state_list(self.inner.motor_states())
    }

    /// Per-joint feedback, indexed like `JOINT_NAMES`
    fn joint_state(&self) -> Vec<PyJointState> {
        self.inner
            .joint_states()
            .into_iter()
            .map(|inner| PyJointState { inner })
            .collect()
    }

    fn imu_state(&self) -> PyImuState {
        PyImuState {
            inner: self.inner.imu,
        }
    }

    /// Names of the error flags raised by motor `index`
    fn motor_errors(&self, index: usize) -> PyResult<Vec<&'static str>> {
        self.inner
            .motor_status
            .get(index)
            .map(|&bits| msg::motor_error::describe(bits))
            .ok_or_else(|| PyIndexError::new_err(format!("motor index {index} out of range")))
    }

    fn __repr__(&self) -> String {
        format!(
            "LowState(tick={}, motors={}, faulted={:?})",
            self.inner.tick,
            self.inner.num_motors(),
            self.inner.faulted_motors()
        )
    }
}

/// Hand command; `motors()` entries are live references
#[pyclass(name = "HandCmd")]
pub struct PyHandCmd {
    motors: Vec<Py<PyMotorCmd>>,
}

#[pymethods]
impl PyHandCmd {
    /// All-zero command; actuator count defaults to the factory config
    #[new]
    #[pyo3(signature = (num_motors = None))]
    fn new(py: Python<'_>, num_motors: Option<usize>) -> PyResult<Self> {
        let n = match num_motors {
            Some(n) => n,
            None => global_context()?.config().num_hand_motors,
        };
        let motors = msg::HandCmd::new(n)
            .motors
            .into_iter()
            .map(|inner| Py::new(py, PyMotorCmd { inner }))
            .collect::<PyResult<Vec<_>>>()?;
        Ok(Self { motors })
    }

    fn motors(&self, py: Python<'_>) -> Vec<Py<PyMotorCmd>> {
        self.motors.iter().map(|m| m.clone_ref(py)).collect()
    }

    fn set_motor(&self, py: Python<'_>, index: usize, cmd: PyMotorCmd) -> PyResult<()> {
        let slot = self.motors.get(index).ok_or_else(|| {
            PyIndexError::new_err(format!("hand motor index {index} out of range"))
        })?;
        slot.borrow_mut(py).inner = cmd.inner;
        Ok(())
    }

    fn __len__(&self) -> usize {
        self.motors.len()
    }

    fn __repr__(&self) -> String {
        format!("HandCmd(motors={})", self.motors.len())
    }
}

impl PyHandCmd {
    fn to_core(&self, py: Python<'_>) -> msg::HandCmd {
        msg::HandCmd {
            motors: self.motors.iter().map(|m| m.borrow(py).inner).collect(),
        }
    }
}

#[pyclass(name = "HandState")]
#[derive(Clone)]
pub struct PyHandState {
    inner: msg::HandState,
}

impl From<msg::HandState> for PyHandState {
    fn from(inner: msg::HandState) -> Self {
        Self { inner }
    }
}

#[pymethods]
impl PyHandState {
    #[getter]
    fn tick(&self) -> u32 {
        self.inner.tick
    }

    #[getter]
    fn position(&self) -> Vec<f32> {
        self.inner.position.clone()
    }

    #[getter]
    fn velocity(&self) -> Vec<f32> {
        self.inner.velocity.clone()
    }

    #[getter]
    fn torque(&self) -> Vec<f32> {
        self.inner.torque.clone()
    }

    fn motor_state(&self) -> Vec<PyMotorState> {
        motor_state_list(self.inner.motor_states())
    }

    fn __repr__(&self) -> String {
        format!(
            "HandState(tick={}, motors={})",
            self.inner.tick,
            self.inner.num_motors()
        )
    }
}

/// Battery and power-path state
#[pyclass(name = "BmsState")]
#[derive(Clone)]
pub struct PyBmsState {
    inner: msg::BmsState,
}

impl From<msg::BmsState> for PyBmsState {
    fn from(inner: msg::BmsState) -> Self {
        Self { inner }
    }
}

#[pymethods]
impl PyBmsState {
    #[getter]
    fn tick(&self) -> u32 {
        self.inner.tick
    }

    #[getter]
    fn relay(&self) -> PyRelayState {
        self.inner.relay.into()
    }

    #[getter]
    fn estop(&self) -> PyEStopState {
        self.inner.estop.into()
    }

    #[getter]
    fn conn(&self) -> PyBmsConnState {
        self.inner.conn.into()
    }

    #[getter]
    fn init(&self) -> PyBmsInitState {
        self.inner.init.into()
    }

    #[getter]
    fn voltage(&self) -> f32 {
        self.inner.voltage
    }

    #[getter]
    fn current(&self) -> f32 {
        self.inner.current
    }

    #[getter]
    fn soc(&self) -> f32 {
        self.inner.soc
    }

    fn is_power_ready(&self) -> bool {
        self.inner.is_power_ready()
    }

    fn __repr__(&self) -> String {
        format!(
            "BmsState(tick={}, relay={}, estop={}, conn={}, init={}, voltage={:.2}, soc={:.2})",
            self.inner.tick,
            self.inner.relay,
            self.inner.estop,
            self.inner.conn,
            self.inner.init,
            self.inner.voltage,
            self.inner.soc
        )
    }
}

#[pyclass(name = "ControlModeState")]
#[derive(Clone)]
pub struct PyControlModeState {
    inner: msg::ControlModeState,
}

impl From<msg::ControlModeState> for PyControlModeState {
    fn from(inner: msg::ControlModeState) -> Self {
        Self { inner }
    }
}

#[pymethods]
impl PyControlModeState {
    #[getter]
    #[inline]
    fn tick(&self) -> u32 {
        self.inner.tick
    }

    #[getter]
    fn mode(&self) -> PyControlMode {
        self.inner.mode.into()
    }

    fn __repr__(&self) -> String {
        format!(
            "ControlModeState(tick={}, mode={})",
            self.inner.tick, self.inner.mode
        )
    }
}

/// Outcome of a control call
#[pyclass(name = "ServiceResponse")]
#[derive(Clone)]
pub struct PyServiceResponse {
    inner: ControlResult,
}

#[pymethods]
impl PyServiceResponse {
    fn success(&self) -> bool {
        self.inner.success
    }

    fn message(&self) -> String {
        self.inner.message.clone()
    }

    fn __bool__(&self) -> bool {
        self.inner.success
    }

    fn __repr__(&self) -> String {
        format!(
            "ServiceResponse(success={}, message={:?})",
            self.inner.success, self.inner.message
        )
    }
}

// ============================================================================
// Publishers / subscribers
// ============================================================================

/// Wrap a Python callable as a subscriber callback
fn python_callback<T, P>(topic: String, callback: PyObject) -> impl FnMut(T) + Send + 'static
where
    T: WireMessage,
    P: PyClass + From<T> + Into<PyClassInitializer<P>>,
{
    move |msg: T| {
        Python::with_gil(|py| {
            let result = Py::new(py, P::from(msg)).and_then(|obj| callback.call1(py, (obj,)));
            if let Err(e) = result {
                tracing::warn!(topic = %topic, "python subscriber callback raised");
                e.print(py);
            }
        })
    }
}

/// Subscriber whose delivery thread may need the GIL
///
/// The subscriber lock is only taken with the GIL released, and reads go
/// through a monitor that never takes it, so a thread joining the delivery
/// thread cannot block a callback waiting for the GIL.
struct SubscriberCell<T: WireMessage> {
    sub: Mutex<Subscriber<T>>,
    monitor: SubscriberMonitor,
}

impl<T: WireMessage> SubscriberCell<T> {
    fn new(topic: Option<String>, default_topic: &str) -> PyResult<Self> {
        let ctx = global_context()?;
        let topic = topic.unwrap_or_else(|| default_topic.to_owned());
        let sub = Subscriber::new(ctx, topic).map_err(to_py_err)?;
        Ok(Self {
            monitor: sub.monitor(),
            sub: Mutex::new(sub),
        })
    }

    fn init<P: PyClass + From<T> + Into<PyClassInitializer<P>>>(&self, py: Python<'_>, callback: PyObject) -> PyResult<()> {
        if !callback.bind(py).is_callable() {
            return Err(PyValueError::new_err("callback must be callable"));
        }
        let sub = &self.sub;
        py.allow_threads(move || {
            let mut sub = sub.lock();
            let cb = python_callback::<T, P>(sub.topic().to_owned(), callback);
            sub.init(cb)
        })
        .map_err(to_py_err)
    }

    fn stop(&self, py: Python<'_>) {
        py.allow_threads(|| self.sub.lock().stop());
    }

    fn start(&self, py: Python<'_>) -> PyResult<()> {
        py.allow_threads(|| self.sub.lock().start()).map_err(to_py_err)
    }

    fn is_running(&self) -> bool {
        self.monitor.is_running()
    }

    fn stats(&self) -> (u64, u64, u64, u64, u64) {
        let s = self.monitor.stats();
        (s.received, s.delivered, s.dropped, s.malformed, s.callback_panics)
    }
}

impl<T: WireMessage> Drop for SubscriberCell<T> {
    fn drop(&mut self) {
        let sub = &self.sub;
        Python::with_gil(|py| py.allow_threads(|| sub.lock().stop()));
    }
}

/// Python class around a [`SubscriberCell`] for one message type
macro_rules! subscriber_class {
    ($(#[$meta:meta])* $py:ident, $name:tt, $msg:ty, $wrapper:ty, $topic:expr) => {
        $(#[$meta])*
        #[pyclass(name = $name)]
        pub struct $py {
            cell: SubscriberCell<$msg>,
        }

        #[pymethods]
        impl $py {
            #[new]
            #[pyo3(signature = (topic = None))]
            fn new(topic: Option<String>) -> PyResult<Self> {
                Ok(Self {
                    cell: SubscriberCell::new(topic, $topic)?,
                })
            }

            /// Start delivering messages to `callback(msg)`
            fn init(&self, py: Python<'_>, callback: PyObject) -> PyResult<()> {
                self.cell.init::<$wrapper>(py, callback)
            }

            fn stop(&self, py: Python<'_>) {
                self.cell.stop(py)
            }

            fn start(&self, py: Python<'_>) -> PyResult<()> {
                self.cell.start(py)
            }

            fn is_running(&self) -> bool {
                self.cell.is_running()
            }

            /// (received, delivered, dropped, malformed, callback_panics)
            fn stats(&self) -> (u64, u64, u64, u64, u64) {
                self.cell.stats()
            }
        }
    };
}

subscriber_class!(
    /// LowState subscriber
    PyLowStateSubscriber,
    "LowStateSubscriber",
    msg::LowState,
    PyLowState,
    topics::LOW_STATE
);

subscriber_class!(
    PyControlModeStateSubscriber,
    "ControlModeStateSubscriber",
    msg::ControlModeState,
    PyControlModeState,
    topics::CONTROL_MODE_STATE
);

subscriber_class!(
    /// BmsState subscriber
    PyBmsStateSubscriber,
    "BmsStateSubscriber",
    msg::BmsState,
    PyBmsState,
    topics::BMS_STATE
);

subscriber_class!(
    PyHandStateSubscriber,
    "HandStateSubscriber",
    msg::HandState,
    PyHandState,
    topics::HAND_STATE
);

/// LowCmd publisher
#[pyclass(name = "LowCmdPublisher")]
pub struct PyLowCmdPublisher {
    inner: Mutex<Publisher<msg::LowCmd>>,
}

#[pymethods]
impl PyLowCmdPublisher {
    #[new]
    #[pyo3(signature = (topic = None))]
    fn new(topic: Option<String>) -> PyResult<Self> {
        let ctx = global_context()?;
        let topic = topic.unwrap_or_else(|| topics::LOW_CMD.to_owned());
        let publisher = Publisher::new(ctx, topic).map_err(to_py_err)?;
        Ok(Self {
            inner: Mutex::new(publisher),
        })
    }

    fn init(&self) -> PyResult<()> {
        self.inner.lock().init().map_err(to_py_err)
    }

    fn write(&self, py: Python<'_>, msg: PyRef<'_, PyLowCmd>) -> PyResult<()> {
        let cmd = msg.to_core(py);
        let publisher = &self.inner;
        py.allow_threads(|| publisher.lock().write(&cmd))
            .map_err(to_py_err)
    }

    /// (published, send_failures)
    fn stats(&self) -> (u64, u64) {
        let s = self.inner.lock().stats();
        (s.published, s.send_failures)
    }
}

/// HandCmd publisher
#[pyclass(name = "HandCmdPublisher")]
pub struct PyHandCmdPublisher {
    inner: Mutex<Publisher<msg::HandCmd>>,
}

#[pymethods]
impl PyHandCmdPublisher {
    #[new]
    #[pyo3(signature = (topic = None))]
    fn new(topic: Option<String>) -> PyResult<Self> {
        let ctx = global_context()?;
        let topic = topic.unwrap_or_else(|| topics::HAND_CMD.to_owned());
        let publisher = Publisher::new(ctx, topic).map_err(to_py_err)?;
        Ok(Self {
            inner: Mutex::new(publisher),
        })
    }

    fn init(&self) -> PyResult<()> {
        self.inner.lock().init().map_err(to_py_err)
    }

    fn write(&self, py: Python<'_>, msg: PyRef<'_, PyHandCmd>) -> PyResult<()> {
        let cmd = msg.to_core(py);
        let publisher = &self.inner;
        py.allow_threads(|| publisher.lock().write(&cmd))
            .map_err(to_py_err)
    }

    /// (published, send_failures)
    fn stats(&self) -> (u64, u64) {
        let s = self.inner.lock().stats();
        (s.published, s.send_failures)
    }
}

// ============================================================================
// Control client
// ============================================================================

/// Control RPC client
#[pyclass(name = "IgrisC_Client")]
pub struct PyIgrisC_Client {
    client: Mutex<Option<ControlClient>>,
    timeout: Mutex<Option<Duration>>,
}

#[pymethods]
impl PyIgrisC_Client {
    #[new]
    fn new() -> Self {
        Self {
            client: Mutex::new(None),
            timeout: Mutex::new(None),
        }
    }

    /// Bind the request/response topics; the factory must be initialized
    #[pyo3(name = "Init")]
    fn init(&self, py: Python<'_>) -> PyResult<()> {
        let ctx = global_context()?;
        let client = py
            .allow_threads(|| {
                let client = ControlClient::new(ctx)?;
                client.init()?;
                Ok::<_, Error>(client)
            })
            .map_err(to_py_err)?;
        if let Some(timeout) = *self.timeout.lock() {
            client.set_timeout(timeout);
        }
        *self.client.lock() = Some(client);
        Ok(())
    }

    /// Default timeout in seconds for calls without an explicit one
    #[pyo3(name = "SetTimeout")]
    fn set_timeout(&self, seconds: f64) -> PyResult<()> {
        let timeout = Duration::try_from_secs_f64(seconds)
            .map_err(|e| PyValueError::new_err(format!("invalid timeout {seconds}: {e}")))?;
        *self.timeout.lock() = Some(timeout);
        if let Some(client) = self.client.lock().as_ref() {
            client.set_timeout(timeout);
        }
        Ok(())
    }

    #[pyo3(name = "InitBms", signature = (init_type, timeout_ms = None))]
    fn init_bms(
        &self,
        py: Python<'_>,
        init_type: PyBmsInitType,
        timeout_ms: Option<u64>,
    ) -> PyServiceResponse {
        self.call(py, |c| c.init_bms(init_type.into(), timeout_ms))
    }

    #[pyo3(name = "SetTorque", signature = (torque_type, timeout_ms = None))]
    fn set_torque(
        &self,
        py: Python<'_>,
        torque_type: PyTorqueType,
        timeout_ms: Option<u64>,
    ) -> PyServiceResponse {
        self.call(py, |c| c.set_torque(torque_type.into(), timeout_ms))
    }

    #[pyo3(name = "SetControlMode", signature = (mode, timeout_ms = None))]
    fn set_control_mode(
        &self,
        py: Python<'_>,
        mode: PyControlMode,
        timeout_ms: Option<u64>,
    ) -> PyServiceResponse {
        self.call(py, |c| c.set_control_mode(mode.into(), timeout_ms))
    }
}

impl PyIgrisC_Client {
    fn call<F>(&self, py: Python<'_>, f: F) -> PyServiceResponse
    where
        F: FnOnce(&ControlClient) -> ControlResult + Send,
    {
        let Some(client) = self.client.lock().clone() else {
            return PyServiceResponse {
                inner: ControlResult::failure("client not initialized"),
            };
        };
        PyServiceResponse {
            inner: py.allow_threads(|| f(&client)),
        }
    }
}
