use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::debug;

use crate::domain::ChannelRouter;

/// Tower service applying desired-property documents published on the twin
/// subject. Bad documents are logged by the router and acknowledged.
#[derive(Clone)]
pub struct DesiredPropertiesService {
    router: Arc<ChannelRouter>,
}

impl DesiredPropertiesService {
    pub fn new(router: Arc<ChannelRouter>) -> Self {
        Self { router }
    }
}

impl Service<ConsumeRequest> for DesiredPropertiesService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let router = Arc::clone(&self.router);

        Box::pin(async move {
            if let Some(level) = router.handle_desired_properties(&req.payload) {
                debug!(subject = %req.subject, logging_level = %level, "applied desired properties");
            }
            Ok(ConsumeResponse::ack())
        })
    }
}
