//! Responding side of the control channel
//!
//! A [`ControlServer`] listens on the three request topics, runs the
//! matching [`ControlHandler`] method and answers with a
//! [`ServiceResponse`] that echoes the request's correlation id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::client::ControlResult;
use crate::comm::{Publisher, QueuePolicy, Subscriber};
use crate::context::ChannelContext;
use crate::msg::{
    BmsInitCmd, BmsInitType, ControlMode, ControlModeCmd, ServiceRequest, ServiceResponse,
    TorqueCmd, TorqueType,
};
use crate::{Error, Result};

/// Robot-side implementation of the control operations
///
/// Methods run on the delivery thread of the corresponding request topic.
pub trait ControlHandler: Send + Sync {
    fn init_bms(&self, init: BmsInitType) -> ControlResult;

    fn set_torque(&self, torque: TorqueType) -> ControlResult;

    fn set_control_mode(&self, mode: ControlMode) -> ControlResult;
}

impl<H: ControlHandler + ?Sized> ControlHandler for Arc<H> {
    fn init_bms(&self, init: BmsInitType) -> ControlResult {
        (**self).init_bms(init)
    }

    fn set_torque(&self, torque: TorqueType) -> ControlResult {
        (**self).set_torque(torque)
    }

    fn set_control_mode(&self, mode: ControlMode) -> ControlResult {
        (**self).set_control_mode(mode)
    }
}

struct Serving {
    _bms_init: Subscriber<BmsInitCmd>,
    _torque: Subscriber<TorqueCmd>,
    _control_mode: Subscriber<ControlModeCmd>,
}

/// Serves control requests with a [`ControlHandler`]
pub struct ControlServer {
    ctx: ChannelContext,
    serving: Option<Serving>,
    served: Arc<AtomicU64>,
}

impl ControlServer {
    pub fn new(ctx: &ChannelContext) -> Result<Self> {
        ctx.active()?;
        Ok(Self {
            ctx: ctx.clone(),
            serving: None,
            served: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Start answering requests with `handler`
    pub fn serve<H: ControlHandler + 'static>(&mut self, handler: H) -> Result<()> {
        if self.serving.is_some() {
            return Err(Error::InvalidState("control server already serving".into()));
        }
        let handler: Arc<dyn ControlHandler> = Arc::new(handler);

        self.serving = Some(Serving {
            _bms_init: self.bind::<BmsInitCmd>(handler.clone(), |h, k| h.init_bms(k))?,
            _torque: self.bind::<TorqueCmd>(handler.clone(), |h, k| h.set_torque(k))?,
            _control_mode: self
                .bind::<ControlModeCmd>(handler, |h, k| h.set_control_mode(k))?,
        });
        tracing::info!(
            domain_id = self.ctx.domain_id(),
            "control server serving"
        );
        Ok(())
    }

    /// Stop answering; requests sent afterwards time out on the client
    pub fn stop(&mut self) {
        if self.serving.take().is_some() {
            tracing::info!("control server stopped");
        }
    }

    #[inline]
    pub fn is_serving(&self) -> bool {
        self.serving.is_some()
    }

    /// Requests answered so far
    pub fn requests_served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    fn bind<R: ServiceRequest>(
        &self,
        handler: Arc<dyn ControlHandler>,
        dispatch: fn(&dyn ControlHandler, R::Kind) -> ControlResult,
    ) -> Result<Subscriber<R>> {
        let mut responder = Publisher::<ServiceResponse>::new(&self.ctx, R::RESPONSE_TOPIC)?;
        responder.init()?;

        let served = self.served.clone();
        // Requests are never evicted.
        let mut requests = Subscriber::<R>::new(&self.ctx, R::REQUEST_TOPIC)?
            .with_queue_policy(QueuePolicy::Lossless);
        requests.init(move |req: R| {
            let kind = req.kind();
            let result = dispatch(handler.as_ref(), kind);
            tracing::debug!(
                request_id = %req.request_id(),
                %kind,
                success = result.success,
                "control request handled"
            );
            let resp = ServiceResponse::new(req.request_id(), result.success, result.message);
            match responder.write(&resp) {
                Ok(()) => {
                    served.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => tracing::warn!(topic = R::RESPONSE_TOPIC, "failed to send response: {e}"),
            }
        })?;
        Ok(requests)
    }
}
