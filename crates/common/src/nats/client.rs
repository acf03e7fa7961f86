use crate::nats::traits::{JetStreamConsumer, JetStreamPublisher, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_nats::{Event, HeaderMap};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const CLIENT_NAME: &str = "turbofan-router";

/// Connection shared by every consumer and publisher of the process
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .name(CLIENT_NAME)
            .connection_timeout(timeout)
            .event_callback(|event| async move {
                match event {
                    Event::Disconnected => warn!("NATS connection lost, reconnecting"),
                    Event::Connected => info!("NATS connection (re)established"),
                    other => debug!(event = %other, "NATS connection event"),
                }
            })
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Ensure `stream_name` captures every subject in `subjects`.
    ///
    /// A missing stream is created. An existing one keeps its own subjects and
    /// gains any requested subject it does not already bind.
    pub async fn ensure_stream(&self, stream_name: &str, subjects: Vec<String>) -> Result<()> {
        info!(stream = %stream_name, subjects = ?subjects, "Ensuring stream exists");

        let existing = match self.jetstream.get_stream(stream_name).await {
            Ok(stream) => stream,
            Err(_) => {
                self.jetstream
                    .create_stream(StreamConfig {
                        name: stream_name.to_string(),
                        subjects,
                        description: Some("Turbofan module inputs and outputs".to_string()),
                        ..Default::default()
                    })
                    .await
                    .context("Failed to create stream")?;
                info!(stream = %stream_name, "Created stream");
                return Ok(());
            }
        };

        let mut config = existing.cached_info().config.clone();
        let missing: Vec<String> = subjects
            .into_iter()
            .filter(|subject| !config.subjects.contains(subject))
            .collect();

        if missing.is_empty() {
            info!(stream = %stream_name, "Stream already exists");
            return Ok(());
        }

        config.subjects.extend(missing.iter().cloned());
        self.jetstream
            .update_stream(&config)
            .await
            .context("Failed to add subjects to stream")?;
        info!(stream = %stream_name, added = ?missing, "Added subjects to existing stream");

        Ok(())
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    /// Flush buffered publishes and drop the connection.
    pub async fn close(self) {
        info!("Closing NATS connection");
        if let Err(e) = self.client.flush().await {
            error!(error = %e, "Failed to flush NATS connection on close");
        }
    }
}

pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let name = config
            .durable_name
            .clone()
            .unwrap_or_else(|| "ephemeral".to_string());

        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .with_context(|| format!("Failed to create consumer {name} on {stream_name}"))?;

        Ok(Box::new(NatsPullConsumer { consumer, name }))
    }
}

pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
    name: String,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<jetstream::Message>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("Failed to fetch messages")?;

        let mut batch = Vec::with_capacity(max_messages);
        while let Some(next) = messages.next().await {
            match next {
                Ok(message) => batch.push(message),
                // Skip the bad delivery and keep the rest of the batch
                Err(e) => error!(consumer = %self.name, error = %e, "Error receiving message"),
            }
        }
        Ok(batch)
    }
}

pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    #[instrument(skip(self, headers, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: bytes::Bytes,
    ) -> Result<()> {
        let ack = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .context("Failed to publish message to JetStream")?;

        ack.await
            .context("Failed to receive JetStream acknowledgment")?;
        Ok(())
    }
}
