use std::fmt;

use super::{EnvelopeError, LogSeverity, MessageEnvelope};

/// The channel a delivery arrived on, resolved once at the transport boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundChannel {
    /// Raw readings from leaf devices
    FromDevice,
    /// Responses coming back from the classifier
    FromClassifier,
}

impl InboundChannel {
    pub fn name(&self) -> &'static str {
        match self {
            InboundChannel::FromDevice => "deviceInput",
            InboundChannel::FromClassifier => "rulInput",
        }
    }
}

impl fmt::Display for InboundChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputChannel {
    Classifier,
    Hub,
    AvroWriter,
    DeadLetter,
}

impl OutputChannel {
    pub fn name(&self) -> &'static str {
        match self {
            OutputChannel::Classifier => "classOutput",
            OutputChannel::Hub => "hubOutput",
            OutputChannel::AvroWriter => "avroOutput",
            OutputChannel::DeadLetter => "deadMessages",
        }
    }
}

impl fmt::Display for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The payload could not be decoded
    Unparseable,
    /// The payload decoded to an empty object
    EmptyBody,
    /// A device sent a reading that already carries a prediction
    AlreadyClassified,
    /// The classifier answered without a prediction
    NotClassified,
}

impl DeadLetterReason {
    pub fn severity(&self) -> LogSeverity {
        match self {
            DeadLetterReason::AlreadyClassified => LogSeverity::Warning,
            DeadLetterReason::Unparseable
            | DeadLetterReason::EmptyBody
            | DeadLetterReason::NotClassified => LogSeverity::Error,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeadLetterReason::Unparseable => "could not parse message",
            DeadLetterReason::EmptyBody => "message body is empty",
            DeadLetterReason::AlreadyClassified => "already classified, stop processing",
            DeadLetterReason::NotClassified => "not classified, stop processing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    ForwardToClassifier,
    ForwardToArchiveAndHub,
    DeadLetter(DeadLetterReason),
}

/// Decide what happens to a delivery.
///
/// The arrival channel is consulted before the body: a message can only be
/// trusted as pre- or post-classification based on who delivered it.
pub fn decide(
    channel: InboundChannel,
    parsed: Result<&MessageEnvelope, &EnvelopeError>,
) -> Disposition {
    let envelope = match parsed {
        Ok(envelope) => envelope,
        Err(EnvelopeError::EmptyBody) => {
            return Disposition::DeadLetter(DeadLetterReason::EmptyBody)
        }
        Err(_) => return Disposition::DeadLetter(DeadLetterReason::Unparseable),
    };

    if envelope.body().is_empty() {
        return Disposition::DeadLetter(DeadLetterReason::EmptyBody);
    }

    match (channel, envelope.is_classified()) {
        (InboundChannel::FromDevice, true) => {
            Disposition::DeadLetter(DeadLetterReason::AlreadyClassified)
        }
        (InboundChannel::FromDevice, false) => Disposition::ForwardToClassifier,
        (InboundChannel::FromClassifier, false) => {
            Disposition::DeadLetter(DeadLetterReason::NotClassified)
        }
        (InboundChannel::FromClassifier, true) => Disposition::ForwardToArchiveAndHub,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageProperties, TransportMetadata};

    fn envelope(payload: &[u8]) -> MessageEnvelope {
        MessageEnvelope::parse(payload, &MessageProperties::new(), &TransportMetadata::default())
            .unwrap()
    }

    #[test]
    fn test_raw_reading_from_device_goes_to_classifier() {
        let raw = envelope(br#"{"CycleTime": 12, "OperationalSetting1": 0.5, "Sensor1": 642.1}"#);
        assert_eq!(
            decide(InboundChannel::FromDevice, Ok(&raw)),
            Disposition::ForwardToClassifier
        );
    }

    #[test]
    fn test_classified_reading_from_device_is_dead_lettered() {
        let classified = envelope(br#"{"CycleTime": 5, "PredictedRul": 10}"#);
        let disposition = decide(InboundChannel::FromDevice, Ok(&classified));

        assert_eq!(
            disposition,
            Disposition::DeadLetter(DeadLetterReason::AlreadyClassified)
        );
        assert_eq!(
            DeadLetterReason::AlreadyClassified.severity(),
            LogSeverity::Warning
        );
    }

    #[test]
    fn test_classifier_channel() {
        let classified = envelope(br#"[{"CycleTime": 12, "PredictedRul": 87.3}]"#);
        let unclassified = envelope(br#"{"CycleTime": 5}"#);

        assert_eq!(
            decide(InboundChannel::FromClassifier, Ok(&classified)),
            Disposition::ForwardToArchiveAndHub
        );
        assert_eq!(
            decide(InboundChannel::FromClassifier, Ok(&unclassified)),
            Disposition::DeadLetter(DeadLetterReason::NotClassified)
        );
        assert_eq!(
            DeadLetterReason::NotClassified.severity(),
            LogSeverity::Error
        );
    }

    #[test]
    fn test_parse_failures_are_dead_lettered_on_every_channel() {
        for channel in [InboundChannel::FromDevice, InboundChannel::FromClassifier] {
            assert_eq!(
                decide(channel, Err(&EnvelopeError::EmptyPayload)),
                Disposition::DeadLetter(DeadLetterReason::Unparseable)
            );
            assert_eq!(
                decide(channel, Err(&EnvelopeError::InvalidJson("x".to_string()))),
                Disposition::DeadLetter(DeadLetterReason::Unparseable)
            );
            assert_eq!(
                decide(channel, Err(&EnvelopeError::EmptyBody)),
                Disposition::DeadLetter(DeadLetterReason::EmptyBody)
            );
        }
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(InboundChannel::FromDevice.name(), "deviceInput");
        assert_eq!(InboundChannel::FromClassifier.name(), "rulInput");
        assert_eq!(OutputChannel::Classifier.name(), "classOutput");
        assert_eq!(OutputChannel::Hub.name(), "hubOutput");
        assert_eq!(OutputChannel::AvroWriter.name(), "avroOutput");
        assert_eq!(OutputChannel::DeadLetter.name(), "deadMessages");
    }
}
