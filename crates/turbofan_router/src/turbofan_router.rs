use crate::domain::{ChannelRouter, InboundChannel, RouterContext};
use crate::nats::{DesiredPropertiesService, ModuleInputService, NatsModuleOutput};
use common::nats::{
    ConsumeRequest, ConsumeResponse, NatsClient, NatsConsumeLoggingLayer,
    NatsConsumeLoggingService, NatsConsumeTracingConfig, NatsConsumeTracingLayer,
    NatsConsumeTracingService, TowerConsumer,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceBuilder};
use tracing::info;

pub struct TurbofanRouterConfig {
    pub stream: String,
    pub device_input_subject: String,
    pub classifier_input_subject: String,
    pub desired_properties_subject: String,
    pub output_subject_prefix: String,
    pub device_consumer_name: String,
    pub classifier_consumer_name: String,
    pub desired_properties_consumer_name: String,
    pub nats_batch_size: usize,
    pub nats_batch_wait_secs: u64,
}

impl Default for TurbofanRouterConfig {
    fn default() -> Self {
        Self {
            stream: "turbofan".to_string(),
            device_input_subject: "turbofan.inputs.deviceInput".to_string(),
            classifier_input_subject: "turbofan.inputs.rulInput".to_string(),
            desired_properties_subject: "turbofan.twin.desired".to_string(),
            output_subject_prefix: "turbofan.outputs".to_string(),
            device_consumer_name: "turbofan-router-device-input".to_string(),
            classifier_consumer_name: "turbofan-router-rul-input".to_string(),
            desired_properties_consumer_name: "turbofan-router-desired".to_string(),
            nats_batch_size: 10,
            nats_batch_wait_secs: 5,
        }
    }
}

pub type RunnerProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send,
>;

type ConsumerStack<S> = NatsConsumeTracingService<NatsConsumeLoggingService<S>>;

/// The router module: one consumer per inbound subject, all sharing one
/// channel router and publishing through one NATS output.
pub struct TurbofanRouter {
    device_consumer: TowerConsumer<ConsumerStack<ModuleInputService>>,
    classifier_consumer: TowerConsumer<ConsumerStack<ModuleInputService>>,
    desired_properties_consumer: TowerConsumer<ConsumerStack<DesiredPropertiesService>>,
}

impl TurbofanRouter {
    pub async fn new(
        nats_client: Arc<NatsClient>,
        context: Arc<RouterContext>,
        config: TurbofanRouterConfig,
    ) -> anyhow::Result<Self> {
        info!("Initializing turbofan router module");

        let output = Arc::new(NatsModuleOutput::new(
            nats_client.create_publisher_client(),
            config.output_subject_prefix.clone(),
        ));
        let router = Arc::new(ChannelRouter::new(context, output));

        let device_consumer = TowerConsumer::new(
            nats_client.create_consumer_client(),
            &config.stream,
            &config.device_consumer_name,
            &config.device_input_subject,
            config.nats_batch_size,
            config.nats_batch_wait_secs,
            layered(
                &config.device_consumer_name,
                ModuleInputService::new(Arc::clone(&router), InboundChannel::FromDevice),
            ),
        )
        .await?;

        let classifier_consumer = TowerConsumer::new(
            nats_client.create_consumer_client(),
            &config.stream,
            &config.classifier_consumer_name,
            &config.classifier_input_subject,
            config.nats_batch_size,
            config.nats_batch_wait_secs,
            layered(
                &config.classifier_consumer_name,
                ModuleInputService::new(Arc::clone(&router), InboundChannel::FromClassifier),
            ),
        )
        .await?;

        let desired_properties_consumer = TowerConsumer::new(
            nats_client.create_consumer_client(),
            &config.stream,
            &config.desired_properties_consumer_name,
            &config.desired_properties_subject,
            config.nats_batch_size,
            config.nats_batch_wait_secs,
            layered(
                &config.desired_properties_consumer_name,
                DesiredPropertiesService::new(Arc::clone(&router)),
            ),
        )
        .await?;

        info!(
            device_input = %config.device_input_subject,
            classifier_input = %config.classifier_input_subject,
            desired_properties = %config.desired_properties_subject,
            output_prefix = %config.output_subject_prefix,
            "Turbofan router initialized"
        );

        Ok(Self {
            device_consumer,
            classifier_consumer,
            desired_properties_consumer,
        })
    }

    /// One named runner process per inbound subject, so channels are consumed
    /// independently of each other.
    pub fn into_runner_processes(self) -> Vec<(&'static str, RunnerProcess)> {
        vec![
            ("device_input_consumer", consumer_process(self.device_consumer)),
            (
                "classifier_input_consumer",
                consumer_process(self.classifier_consumer),
            ),
            (
                "desired_properties_consumer",
                consumer_process(self.desired_properties_consumer),
            ),
        ]
    }
}

fn consumer_process<S>(consumer: TowerConsumer<S>) -> RunnerProcess
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await }))
}

/// Wrap a consumer service with tracing (outermost) and logging
fn layered<S>(consumer_name: &str, service: S) -> ConsumerStack<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>,
{
    ServiceBuilder::new()
        .layer(NatsConsumeTracingLayer::new(NatsConsumeTracingConfig::new(
            consumer_name,
        )))
        .layer(NatsConsumeLoggingLayer::new())
        .service(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_subjects() {
        let config = TurbofanRouterConfig::default();

        assert_eq!(config.stream, "turbofan");
        assert!(config.device_input_subject.starts_with("turbofan."));
        assert!(config.classifier_input_subject.ends_with("rulInput"));
        assert!(config.output_subject_prefix.starts_with("turbofan."));
        assert_ne!(config.device_consumer_name, config.classifier_consumer_name);
    }
}
