use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    EnvelopeError, EnvelopeResult, InboundMessage, MessageBody, MessageEnvelope,
    MessageProperties, CORRELATION_ID, DEAD_LETTER,
};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_ENCODING_UTF8: &str = "utf-8";

/// Minimal remaining-useful-life record sent upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HubProjection {
    pub connection_device_id: String,
    pub correlation_id: String,
    pub predicted_rul: f64,
    pub cycle_time: f64,
}

impl TryFrom<&MessageEnvelope> for HubProjection {
    type Error = EnvelopeError;

    fn try_from(envelope: &MessageEnvelope) -> EnvelopeResult<Self> {
        Ok(Self {
            connection_device_id: envelope.device_id()?.to_string(),
            correlation_id: envelope.correlation_id()?.to_string(),
            predicted_rul: envelope.predicted_rul()?,
            cycle_time: envelope.cycle_time()?,
        })
    }
}

/// Full record handed to the long-term storage writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveProjection {
    pub correlation_id: String,
    pub connection_device_id: String,
    pub creation_time_utc: DateTime<Utc>,
    pub enqueued_time_utc: DateTime<Utc>,
    pub body: MessageBody,
}

impl TryFrom<&MessageEnvelope> for ArchiveProjection {
    type Error = EnvelopeError;

    fn try_from(envelope: &MessageEnvelope) -> EnvelopeResult<Self> {
        Ok(Self {
            correlation_id: envelope.correlation_id()?.to_string(),
            connection_device_id: envelope.device_id()?.to_string(),
            creation_time_utc: envelope.creation_time()?,
            enqueued_time_utc: envelope.enqueued_time()?,
            body: envelope.body().clone(),
        })
    }
}

/// A message ready to hand to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub payload: Bytes,
    pub properties: MessageProperties,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

impl OutboundMessage {
    /// Wrap a JSON payload with the envelope's properties, declaring it as
    /// UTF-8 JSON so downstream routes can match on content.
    fn json(payload: Vec<u8>, properties: &MessageProperties) -> Self {
        Self {
            payload: Bytes::from(payload),
            properties: properties.clone(),
            correlation_id: properties.get(CORRELATION_ID).cloned(),
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            content_encoding: Some(CONTENT_ENCODING_UTF8.to_string()),
        }
    }

    /// The original delivery, untouched apart from the `DeadLetter` marker
    pub fn dead_letter(inbound: &InboundMessage) -> Self {
        let mut properties = inbound.properties.clone();
        properties.insert(DEAD_LETTER.to_string(), "true".to_string());

        Self {
            payload: inbound.payload.clone(),
            properties,
            correlation_id: inbound.transport.correlation_id.clone(),
            content_type: inbound.transport.content_type.clone(),
            content_encoding: inbound.transport.content_encoding.clone(),
        }
    }
}

impl MessageEnvelope {
    /// The body exactly as received, for the classifier
    pub fn to_classifier_message(&self) -> EnvelopeResult<OutboundMessage> {
        self.ensure_body()?;
        let payload = serde_json::to_vec(self.body())?;
        Ok(OutboundMessage::json(payload, self.properties()))
    }

    pub fn to_hub_message(&self) -> EnvelopeResult<OutboundMessage> {
        self.ensure_body()?;
        let projection = HubProjection::try_from(self)?;
        let payload = serde_json::to_vec(&projection)?;
        Ok(OutboundMessage::json(payload, self.properties()))
    }

    pub fn to_archive_message(&self) -> EnvelopeResult<OutboundMessage> {
        self.ensure_body()?;
        let projection = ArchiveProjection::try_from(self)?;
        let payload = serde_json::to_vec(&projection)?;
        Ok(OutboundMessage::json(payload, self.properties()))
    }

    fn ensure_body(&self) -> EnvelopeResult<()> {
        if self.body().is_empty() {
            return Err(EnvelopeError::EmptyBody);
        }
        Ok(())
    }
}
