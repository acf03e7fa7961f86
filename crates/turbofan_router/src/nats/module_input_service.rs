use chrono::Utc;
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, error};

use super::inbound_message_from_request;
use crate::domain::{ChannelRouter, InboundChannel};

/// Tower service feeding one inbound subject into the channel router.
///
/// The channel tag is fixed per instance, so the router never has to infer
/// it from the subject. Every message is acknowledged once examined, even
/// when routing panics.
#[derive(Clone)]
pub struct ModuleInputService {
    router: Arc<ChannelRouter>,
    channel: InboundChannel,
}

impl ModuleInputService {
    pub fn new(router: Arc<ChannelRouter>, channel: InboundChannel) -> Self {
        Self { router, channel }
    }

    pub fn channel(&self) -> InboundChannel {
        self.channel
    }
}

impl Service<ConsumeRequest> for ModuleInputService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let router = Arc::clone(&self.router);
        let channel = self.channel;

        Box::pin(async move {
            let message = inbound_message_from_request(&req, Utc::now());
            let routed = AssertUnwindSafe(router.route(channel, message))
                .catch_unwind()
                .await;

            match routed {
                Ok(outcome) => debug!(
                    subject = %req.subject,
                    channel = %channel,
                    disposition = ?outcome.disposition,
                    delivered = outcome.delivered.len(),
                    failed = outcome.failed.len(),
                    "routed message"
                ),
                Err(panic) => error!(
                    subject = %req.subject,
                    channel = %channel,
                    panic = panic_message(panic.as_ref()),
                    "routing panicked, acknowledging message"
                ),
            }

            Ok(ConsumeResponse::ack())
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
