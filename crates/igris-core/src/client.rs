//! Control client: request/response RPC over topics
//!
//! Each operation publishes a request carrying a fresh correlation id and
//! blocks until the matching [`ServiceResponse`] arrives or the timeout
//! elapses. Outcomes are always a [`ControlResult`]; the client never panics
//! or returns an error for a failed call.

use crossbeam_channel as cc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::comm::{Publisher, QueuePolicy, Subscriber};
use crate::context::ChannelContext;
use crate::msg::cdr::{CdrReader, CdrWriter};
use crate::msg::{
    BmsInitCmd, BmsInitType, ControlMode, ControlModeCmd, MessageLayout, ServiceRequest,
    ServiceResponse, TorqueCmd, TorqueType, WireMessage,
};
use crate::{Error, Result};

/// Outcome of a control call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResult {
    pub success: bool,
    pub message: String,
}

impl ControlResult {
    /// Message of a call that got no response in time
    pub const TIMEOUT_MESSAGE: &'static str = "timeout";

    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::failure(Self::TIMEOUT_MESSAGE)
    }

    /// Whether this result is a timeout rather than a robot-side failure
    pub fn is_timeout(&self) -> bool {
        !self.success && self.message == Self::TIMEOUT_MESSAGE
    }
}

impl From<ServiceResponse> for ControlResult {
    fn from(resp: ServiceResponse) -> Self {
        Self {
            success: resp.success,
            message: resp.message,
        }
    }
}

/// Response as seen by the client: either complete, or carrying only a
/// readable correlation id so the waiting call can still be failed.
#[derive(Debug)]
enum ResponseFrame {
    Complete(ServiceResponse),
    Malformed { request_id: String, reason: String },
}

impl WireMessage for ResponseFrame {
    const TYPE_NAME: &'static str = ServiceResponse::TYPE_NAME;

    fn encode(&self, w: &mut CdrWriter, layout: &MessageLayout) -> Result<()> {
        match self {
            Self::Complete(resp) => resp.encode(w, layout),
            Self::Malformed { .. } => Err(Error::Serialization(
                "malformed response frames are receive-only".into(),
            )),
        }
    }

    fn decode(r: &mut CdrReader<'_>, layout: &MessageLayout) -> Result<Self> {
        ServiceResponse::decode(r, layout).map(Self::Complete)
    }

    fn from_wire(bytes: &[u8], _layout: &MessageLayout) -> Result<Self> {
        let mut r = CdrReader::new(bytes)?;
        let request_id = r.read_string()?;
        match read_response_body(r) {
            Ok((success, message)) => Ok(Self::Complete(ServiceResponse {
                request_id,
                success,
                message,
            })),
            Err(e) => Ok(Self::Malformed {
                request_id,
                reason: e.to_string(),
            }),
        }
    }
}

fn read_response_body(mut r: CdrReader<'_>) -> Result<(bool, String)> {
    let success = r.read_bool()?;
    let message = r.read_string()?;
    r.finish()?;
    Ok((success, message))
}

struct Endpoints {
    bms_init: Publisher<BmsInitCmd>,
    torque: Publisher<TorqueCmd>,
    control_mode: Publisher<ControlModeCmd>,
    _responses: Vec<Subscriber<ResponseFrame>>,
}

/// Request types the client can send
trait ClientRequest: ServiceRequest {
    fn publisher(endpoints: &Endpoints) -> &Publisher<Self>;
}

impl ClientRequest for BmsInitCmd {
    fn publisher(endpoints: &Endpoints) -> &Publisher<Self> {
        &endpoints.bms_init
    }
}

impl ClientRequest for TorqueCmd {
    fn publisher(endpoints: &Endpoints) -> &Publisher<Self> {
        &endpoints.torque
    }
}

impl ClientRequest for ControlModeCmd {
    fn publisher(endpoints: &Endpoints) -> &Publisher<Self> {
        &endpoints.control_mode
    }
}

type PendingCalls = Arc<Mutex<HashMap<String, cc::Sender<ControlResult>>>>;

struct ClientInner {
    ctx: ChannelContext,
    token: u64,
    next_seq: AtomicU64,
    timeout: RwLock<Duration>,
    pending: PendingCalls,
    endpoints: RwLock<Option<Arc<Endpoints>>>,
}

/// Synchronous control RPC client
///
/// Cheap to clone; clones share the correlation state, so concurrent calls
/// from several threads each receive their own response.
///
/// # Example
/// ```ignore
/// let client = ControlClient::new(&ctx)?;
/// client.init()?;
/// let res = client.set_torque(TorqueType::TorqueOn, Some(2000));
/// if !res.success {
///     eprintln!("torque on failed: {}", res.message);
/// }
/// ```
#[derive(Clone)]
pub struct ControlClient {
    inner: Arc<ClientInner>,
}

impl ControlClient {
    /// Create a client; the context must be initialized
    pub fn new(ctx: &ChannelContext) -> Result<Self> {
        ctx.active()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                ctx: ctx.clone(),
                token: client_token(),
                next_seq: AtomicU64::new(0),
                timeout: RwLock::new(ctx.config().default_rpc_timeout),
                pending: Arc::new(Mutex::new(HashMap::new())),
                endpoints: RwLock::new(None),
            }),
        })
    }

    /// Bind the request publishers and response subscribers
    pub fn init(&self) -> Result<()> {
        let mut slot = self.inner.endpoints.write();
        if slot.is_some() {
            return Ok(());
        }
        let ctx = &self.inner.ctx;

        let mut bms_init = Publisher::<BmsInitCmd>::new(ctx, BmsInitCmd::REQUEST_TOPIC)?;
        bms_init.init()?;
        let mut torque = Publisher::<TorqueCmd>::new(ctx, TorqueCmd::REQUEST_TOPIC)?;
        torque.init()?;
        let mut control_mode = Publisher::<ControlModeCmd>::new(ctx, ControlModeCmd::REQUEST_TOPIC)?;
        control_mode.init()?;

        let mut responses = Vec::with_capacity(3);
        for topic in [
            BmsInitCmd::RESPONSE_TOPIC,
            TorqueCmd::RESPONSE_TOPIC,
            ControlModeCmd::RESPONSE_TOPIC,
        ] {
            // Responses are never evicted.
            let mut sub = Subscriber::<ResponseFrame>::new(ctx, topic)?
                .with_queue_policy(QueuePolicy::Lossless);
            let pending = self.inner.pending.clone();
            sub.init(move |frame| complete_call(&pending, frame))?;
            responses.push(sub);
        }

        *slot = Some(Arc::new(Endpoints {
            bms_init,
            torque,
            control_mode,
            _responses: responses,
        }));
        let token = format!("{:016x}", self.inner.token);
        tracing::info!(%token, "control client initialized");
        Ok(())
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.inner.endpoints.read().is_some()
    }

    /// Default timeout for calls that pass `None`
    pub fn set_timeout(&self, timeout: Duration) {
        *self.inner.timeout.write() = timeout;
    }

    pub fn timeout(&self) -> Duration {
        *self.inner.timeout.read()
    }

    /// Run a BMS and/or motor initialization
    pub fn init_bms(&self, init: BmsInitType, timeout_ms: Option<u64>) -> ControlResult {
        self.call::<BmsInitCmd>(init, timeout_ms)
    }

    /// Switch motor torque on or off
    pub fn set_torque(&self, torque: TorqueType, timeout_ms: Option<u64>) -> ControlResult {
        self.call::<TorqueCmd>(torque, timeout_ms)
    }

    /// Switch between low-level (SDK) and high-level control
    pub fn set_control_mode(&self, mode: ControlMode, timeout_ms: Option<u64>) -> ControlResult {
        self.call::<ControlModeCmd>(mode, timeout_ms)
    }

    /// [`init_bms`](Self::init_bms) on the blocking pool
    pub async fn init_bms_async(&self, init: BmsInitType, timeout_ms: Option<u64>) -> ControlResult {
        let client = self.clone();
        run_blocking(move || client.init_bms(init, timeout_ms)).await
    }

    /// [`set_torque`](Self::set_torque) on the blocking pool
    pub async fn set_torque_async(&self, torque: TorqueType, timeout_ms: Option<u64>) -> ControlResult {
        let client = self.clone();
        run_blocking(move || client.set_torque(torque, timeout_ms)).await
    }

    /// [`set_control_mode`](Self::set_control_mode) on the blocking pool
    pub async fn set_control_mode_async(
        &self,
        mode: ControlMode,
        timeout_ms: Option<u64>,
    ) -> ControlResult {
        let client = self.clone();
        run_blocking(move || client.set_control_mode(mode, timeout_ms)).await
    }

    /// Number of calls waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }

    fn call<R: ClientRequest>(&self, kind: R::Kind, timeout_ms: Option<u64>) -> ControlResult {
        let Some(endpoints) = self.inner.endpoints.read().clone() else {
            return ControlResult::failure("client not initialized");
        };
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.timeout());

        let request_id = self.next_request_id();
        let (tx, rx) = cc::bounded(1);
        self.inner.pending.lock().insert(request_id.clone(), tx);

        let request = R::new(request_id.clone(), kind);
        if let Err(e) = R::publisher(&endpoints).write(&request) {
            self.inner.pending.lock().remove(&request_id);
            return ControlResult::failure(format!("send failed: {e}"));
        }
        tracing::debug!(request_id = %request_id, %kind, topic = R::REQUEST_TOPIC, "request sent");

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => {
                self.inner.pending.lock().remove(&request_id);
                // The response may have landed between the timeout and removal.
                if let Ok(result) = rx.try_recv() {
                    return result;
                }
                tracing::warn!(
                    request_id = %request_id,
                    %kind,
                    timeout_ms = timeout.as_millis() as u64,
                    "control call timed out"
                );
                ControlResult::timeout()
            }
        }
    }

    fn next_request_id(&self) -> String {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{:016x}-{seq}", self.inner.token)
    }
}

fn complete_call(pending: &PendingCalls, frame: ResponseFrame) {
    let (request_id, result) = match frame {
        ResponseFrame::Complete(resp) => (resp.request_id.clone(), ControlResult::from(resp)),
        ResponseFrame::Malformed { request_id, reason } => {
            tracing::warn!(request_id = %request_id, "malformed control response: {reason}");
            let result = ControlResult::failure(format!("malformed response: {reason}"));
            (request_id, result)
        }
    };
    match pending.lock().remove(&request_id) {
        Some(tx) => {
            let _ = tx.try_send(result);
        }
        None => tracing::debug!(request_id = %request_id, "no pending call for response, dropping"),
    }
}

async fn run_blocking<F>(f: F) -> ControlResult
where
    F: FnOnce() -> ControlResult + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|e| ControlResult::failure(format!("rpc task failed: {e}")))
}

/// Per-client id prefix, distinct across clients and processes
fn client_token() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = crate::comm::now_ns();
    let pid = u64::from(std::process::id());
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    nanos ^ pid.rotate_left(40) ^ n.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::topics;
    use crate::ChannelConfig;

    fn layout() -> MessageLayout {
        MessageLayout::default()
    }

    #[test]
    fn test_new_requires_initialized_context() {
        let ctx = ChannelContext::new(ChannelConfig::default()).unwrap();
        assert!(matches!(
            ControlClient::new(&ctx),
            Err(Error::NotInitialized(_))
        ));
    }

    #[test]
    fn test_call_before_init() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let client = ControlClient::new(&ctx).unwrap();
        let res = client.set_torque(TorqueType::TorqueOn, Some(10));
        assert_eq!(res, ControlResult::failure("client not initialized"));
    }

    #[test]
    fn test_timeout_without_server() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let client = ControlClient::new(&ctx).unwrap();
        client.init().unwrap();
        let res = client.set_control_mode(ControlMode::LowLevel, Some(50));
        assert!(res.is_timeout());
        assert_eq!(client.pending_calls(), 0);
    }

    #[test]
    fn test_default_timeout_from_config() {
        let config = ChannelConfig::default().with_rpc_timeout(Duration::from_millis(1234));
        let ctx = ChannelContext::new(config).unwrap();
        ctx.init(0).unwrap();
        let client = ControlClient::new(&ctx).unwrap();
        assert_eq!(client.timeout(), Duration::from_millis(1234));
        client.set_timeout(Duration::from_secs(2));
        assert_eq!(client.clone().timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_request_ids_unique() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let a = ControlClient::new(&ctx).unwrap();
        let b = ControlClient::new(&ctx).unwrap();
        let ids = [a.next_request_id(), a.next_request_id(), b.next_request_id()];
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
        assert!(ids[1].ends_with("-2"));
    }

    #[test]
    fn test_response_frame_complete() {
        let bytes = ServiceResponse::new("id-1", true, "done")
            .to_wire(&layout())
            .unwrap();
        match ResponseFrame::from_wire(&bytes, &layout()).unwrap() {
            ResponseFrame::Complete(resp) => {
                assert_eq!(resp.request_id, "id-1");
                assert!(resp.success);
                assert_eq!(resp.message, "done");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_response_frame_malformed_keeps_id() {
        let mut w = CdrWriter::new();
        w.write_string("id-9").unwrap();
        w.write_u8(5); // not a bool
        let bytes = w.finish();
        match ResponseFrame::from_wire(&bytes, &layout()).unwrap() {
            ResponseFrame::Malformed { request_id, .. } => assert_eq!(request_id, "id-9"),
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(ResponseFrame::from_wire(&bytes[..6], &layout()).is_err());
    }

    #[test]
    fn test_malformed_response_fails_call() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let client = ControlClient::new(&ctx).unwrap();
        client.init().unwrap();

        // Answer every torque request with a truncated response body.
        let mut requests = Subscriber::<TorqueCmd>::new(&ctx, topics::TORQUE_REQUEST).unwrap();
        let transport = ctx.active().unwrap().transport().clone();
        requests
            .init(move |req: TorqueCmd| {
                let mut w = CdrWriter::new();
                w.write_string(&req.request_id).unwrap();
                let payload = w.finish();
                let _ = transport.publish(crate::comm::TransportEnvelope::new(
                    topics::TORQUE_RESPONSE,
                    ServiceResponse::TYPE_NAME,
                    0,
                    1,
                    Arc::from(payload.into_boxed_slice()),
                ));
            })
            .unwrap();

        let res = client.set_torque(TorqueType::TorqueOff, Some(2000));
        assert!(!res.success);
        assert!(res.message.starts_with("malformed response: "), "{}", res.message);
    }

    #[test]
    fn test_send_failure_after_release() {
        let ctx = ChannelContext::with_domain(0).unwrap();
        let client = ControlClient::new(&ctx).unwrap();
        client.init().unwrap();
        ctx.release();
        let res = client.init_bms(BmsInitType::BmsInit, Some(50));
        assert!(!res.success);
        assert!(res.message.starts_with("send failed: "));
        assert_eq!(client.pending_calls(), 0);
    }
}
