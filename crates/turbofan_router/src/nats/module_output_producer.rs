use async_trait::async_trait;
use common::nats::{
    JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, NatsTracingConfig, PublishRequest,
};
use std::sync::Arc;
use tower::Service;
use tracing::debug;

use super::outbound_headers;
use crate::domain::{ModuleOutput, OutboundMessage, OutputChannel, RoutingError, RoutingResult};

/// Publishes routed messages to `{subject_prefix}.{output name}`
pub struct NatsModuleOutput {
    publisher: LayeredPublisher,
    subject_prefix: String,
}

impl NatsModuleOutput {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, subject_prefix: String) -> Self {
        debug!(
            subject_prefix = %subject_prefix,
            "initialized NatsModuleOutput"
        );

        let publisher = NatsPublisherBuilder::new(jetstream)
            .with_tracing(NatsTracingConfig::new("turbofan_router"))
            .with_logging()
            .build();

        Self {
            publisher,
            subject_prefix,
        }
    }

    pub fn subject_for(&self, output: OutputChannel) -> String {
        format!("{}.{}", self.subject_prefix, output.name())
    }
}

#[async_trait]
impl ModuleOutput for NatsModuleOutput {
    async fn send_event(
        &self,
        output: OutputChannel,
        message: OutboundMessage,
    ) -> RoutingResult<()> {
        let headers = outbound_headers(&message);
        let request =
            PublishRequest::new(self.subject_for(output), message.payload).with_headers(headers);

        // Tower services are Clone; each send gets its own handle
        self.publisher
            .clone()
            .call(request)
            .await
            .map_err(RoutingError::Transport)?;

        Ok(())
    }
}
