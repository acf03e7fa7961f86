use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::{
    decide, DeadLetterReason, Disposition, EnvelopeError, EnvelopeResult, InboundChannel,
    InboundMessage, LogSeverity, MessageEnvelope, OutboundMessage, OutputChannel, RouterContext,
    RoutingResult,
};

/// Where routed messages are handed to the transport
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ModuleOutput: Send + Sync {
    /// Send one message on a named output and wait for the transport to
    /// accept it
    async fn send_event(&self, output: OutputChannel, message: OutboundMessage)
        -> RoutingResult<()>;
}

/// What happened to one delivery
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingOutcome {
    pub disposition: Disposition,
    /// Outputs the transport accepted a message on
    pub delivered: Vec<OutputChannel>,
    /// Outputs where building or sending the message failed
    pub failed: Vec<OutputChannel>,
}

impl RoutingOutcome {
    fn new(disposition: Disposition) -> Self {
        Self {
            disposition,
            delivered: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Routes each delivery to the classifier, the hub and archive writer, or the
/// dead-letter output.
///
/// Holds no per-message state: deliveries on different channels can be
/// routed concurrently through the same router.
pub struct ChannelRouter {
    context: Arc<RouterContext>,
    output: Arc<dyn ModuleOutput>,
}

impl ChannelRouter {
    pub fn new(context: Arc<RouterContext>, output: Arc<dyn ModuleOutput>) -> Self {
        Self { context, output }
    }

    pub fn context(&self) -> &Arc<RouterContext> {
        &self.context
    }

    pub async fn handle_device_message(&self, message: InboundMessage) -> RoutingOutcome {
        self.route(InboundChannel::FromDevice, message).await
    }

    pub async fn handle_classifier_message(&self, message: InboundMessage) -> RoutingOutcome {
        self.route(InboundChannel::FromClassifier, message).await
    }

    /// Apply a desired-property update. Failures are logged and the current
    /// threshold is kept.
    pub fn handle_desired_properties(&self, payload: &[u8]) -> Option<LogSeverity> {
        match self.context.log_level().apply_desired_properties(payload) {
            Ok(applied) => applied,
            Err(e) => {
                error!(error = %e, "error when receiving desired property");
                None
            }
        }
    }

    /// Count, parse, decide and dispatch one delivery.
    ///
    /// Never fails: every problem ends up either on the dead-letter output or
    /// in the outcome's `failed` list.
    #[instrument(skip(self, message), fields(channel = %channel, payload_size = message.payload.len()))]
    pub async fn route(&self, channel: InboundChannel, message: InboundMessage) -> RoutingOutcome {
        let count = self.context.counters().record_delivery(channel);
        debug!(channel = %channel, count, "received message");

        let parsed = MessageEnvelope::from_inbound(&message);
        let disposition = decide(channel, parsed.as_ref());
        let mut outcome = RoutingOutcome::new(disposition);

        match (disposition, &parsed) {
            (Disposition::ForwardToClassifier, Ok(envelope)) => {
                self.forward(
                    OutputChannel::Classifier,
                    envelope.to_classifier_message(),
                    envelope,
                    &mut outcome,
                )
                .await;
            }
            (Disposition::ForwardToArchiveAndHub, Ok(envelope)) => {
                // Independent sends: the archive copy goes out even when the
                // hub projection cannot be built.
                self.forward(
                    OutputChannel::Hub,
                    envelope.to_hub_message(),
                    envelope,
                    &mut outcome,
                )
                .await;
                self.forward(
                    OutputChannel::AvroWriter,
                    envelope.to_archive_message(),
                    envelope,
                    &mut outcome,
                )
                .await;
            }
            (Disposition::DeadLetter(reason), _) => {
                log_dead_letter(channel, reason, parsed.as_ref().err());
                self.dead_letter(&message, &mut outcome).await;
            }
            (_, Err(e)) => {
                // decide() never forwards a failed parse
                log_dead_letter(channel, DeadLetterReason::Unparseable, Some(e));
                outcome.disposition = Disposition::DeadLetter(DeadLetterReason::Unparseable);
                self.dead_letter(&message, &mut outcome).await;
            }
        }

        outcome
    }

    async fn forward(
        &self,
        output: OutputChannel,
        projection: EnvelopeResult<OutboundMessage>,
        envelope: &MessageEnvelope,
        outcome: &mut RoutingOutcome,
    ) {
        let message = match projection {
            Ok(message) => message,
            Err(e) => {
                error!(
                    output = %output,
                    correlation_id = envelope.correlation_id().unwrap_or_default(),
                    error = %e,
                    "couldn't create outbound message"
                );
                outcome.failed.push(output);
                return;
            }
        };

        match self.output.send_event(output, message).await {
            Ok(()) => {
                info!(
                    output = %output,
                    device_id = envelope.device_id().unwrap_or("unknown"),
                    cycle_time = envelope.cycle_time().ok(),
                    "sent message"
                );
                outcome.delivered.push(output);
            }
            Err(e) => {
                error!(
                    output = %output,
                    correlation_id = envelope.correlation_id().unwrap_or_default(),
                    error = %e,
                    "failed to send message"
                );
                outcome.failed.push(output);
            }
        }
    }

    async fn dead_letter(&self, inbound: &InboundMessage, outcome: &mut RoutingOutcome) {
        let output = OutputChannel::DeadLetter;
        match self
            .output
            .send_event(output, OutboundMessage::dead_letter(inbound))
            .await
        {
            Ok(()) => outcome.delivered.push(output),
            Err(e) => {
                error!(output = %output, error = %e, "failed to dead-letter message");
                outcome.failed.push(output);
            }
        }
    }
}

fn log_dead_letter(
    channel: InboundChannel,
    reason: DeadLetterReason,
    parse_error: Option<&EnvelopeError>,
) {
    let error = parse_error.map(|e| e.to_string());
    match reason.severity() {
        LogSeverity::Warning => warn!(
            channel = %channel,
            reason = reason.description(),
            error = error.as_deref(),
            "dead-lettering message"
        ),
        _ => error!(
            channel = %channel,
            reason = reason.description(),
            error = error.as_deref(),
            "dead-lettering message"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        MessageProperties, RoutingError, TransportMetadata, CORRELATION_ID, DEAD_LETTER,
    };
    use bytes::Bytes;
    use chrono::Utc;
    use mockall::predicate::eq;

    fn inbound(payload: &'static [u8]) -> InboundMessage {
        InboundMessage::new(
            Bytes::from_static(payload),
            MessageProperties::new(),
            TransportMetadata {
                connection_device_id: Some("Client_001".to_string()),
                creation_time: Some(Utc::now()),
                enqueued_time: Some(Utc::now()),
                ..Default::default()
            },
        )
    }

    fn router(output: MockModuleOutput) -> ChannelRouter {
        ChannelRouter::new(Arc::new(RouterContext::default()), Arc::new(output))
    }

    #[tokio::test]
    async fn test_device_message_is_forwarded_to_classifier() {
        let mut output = MockModuleOutput::new();
        output
            .expect_send_event()
            .with(eq(OutputChannel::Classifier), mockall::predicate::always())
            .times(1)
            .returning(|_, message: OutboundMessage| {
                assert!(message.properties.contains_key(CORRELATION_ID));
                Ok(())
            });

        let router = router(output);
        let outcome = router
            .handle_device_message(inbound(br#"{"CycleTime": 12, "Sensor1": 642.1}"#))
            .await;

        assert_eq!(outcome.disposition, Disposition::ForwardToClassifier);
        assert_eq!(outcome.delivered, vec![OutputChannel::Classifier]);
        assert!(outcome.failed.is_empty());
        assert_eq!(
            router.context().counters().count(InboundChannel::FromDevice),
            1
        );
    }

    #[tokio::test]
    async fn test_counter_increments_before_parse() {
        let mut output = MockModuleOutput::new();
        output
            .expect_send_event()
            .with(eq(OutputChannel::DeadLetter), mockall::predicate::always())
            .times(2)
            .returning(|_, _| Ok(()));

        let router = router(output);
        router.handle_classifier_message(inbound(b"not json")).await;
        router.handle_classifier_message(inbound(b"")).await;

        assert_eq!(
            router
                .context()
                .counters()
                .count(InboundChannel::FromClassifier),
            2
        );
    }

    #[tokio::test]
    async fn test_empty_payload_is_dead_lettered_untouched() {
        let mut output = MockModuleOutput::new();
        output
            .expect_send_event()
            .withf(|output: &OutputChannel, message: &OutboundMessage| {
                *output == OutputChannel::DeadLetter
                    && message.payload.is_empty()
                    && message.properties.get(DEAD_LETTER).map(String::as_str) == Some("true")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = router(output).handle_device_message(inbound(b"")).await;

        assert_eq!(
            outcome.disposition,
            Disposition::DeadLetter(DeadLetterReason::Unparseable)
        );
    }

    #[tokio::test]
    async fn test_hub_failure_does_not_stop_archive_send() {
        let mut output = MockModuleOutput::new();
        output
            .expect_send_event()
            .with(eq(OutputChannel::Hub), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Err(RoutingError::Transport(anyhow::anyhow!("hub unavailable"))));
        output
            .expect_send_event()
            .with(eq(OutputChannel::AvroWriter), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = router(output)
            .handle_classifier_message(inbound(br#"[{"CycleTime": 12, "PredictedRul": 87.3}]"#))
            .await;

        assert_eq!(outcome.disposition, Disposition::ForwardToArchiveAndHub);
        assert_eq!(outcome.failed, vec![OutputChannel::Hub]);
        assert_eq!(outcome.delivered, vec![OutputChannel::AvroWriter]);
    }

    #[tokio::test]
    async fn test_classified_message_without_cycle_time_still_archived() {
        let mut output = MockModuleOutput::new();
        output
            .expect_send_event()
            .with(eq(OutputChannel::AvroWriter), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = router(output)
            .handle_classifier_message(inbound(br#"{"PredictedRul": 87.3}"#))
            .await;

        assert_eq!(outcome.failed, vec![OutputChannel::Hub]);
        assert_eq!(outcome.delivered, vec![OutputChannel::AvroWriter]);
    }

    #[tokio::test]
    async fn test_dead_letter_send_failure_is_swallowed() {
        let mut output = MockModuleOutput::new();
        output
            .expect_send_event()
            .times(1)
            .returning(|_, _| Err(RoutingError::Transport(anyhow::anyhow!("down"))));

        let outcome = router(output)
            .handle_device_message(inbound(br#"{"CycleTime": 5, "PredictedRul": 10}"#))
            .await;

        assert_eq!(
            outcome.disposition,
            Disposition::DeadLetter(DeadLetterReason::AlreadyClassified)
        );
        assert_eq!(outcome.failed, vec![OutputChannel::DeadLetter]);
        assert!(outcome.delivered.is_empty());
    }

    #[tokio::test]
    async fn test_desired_properties_update() {
        let router = router(MockModuleOutput::new());

        assert_eq!(
            router.handle_desired_properties(br#"{"LoggingLevel": "Warning"}"#),
            Some(LogSeverity::Warning)
        );
        assert_eq!(router.handle_desired_properties(b"garbage"), None);
        assert_eq!(
            router.context().log_level().threshold(),
            LogSeverity::Warning
        );
    }
}
