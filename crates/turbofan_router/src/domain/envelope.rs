use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

use super::{EnvelopeError, EnvelopeResult};

pub const CORRELATION_ID: &str = "CorrelationId";
pub const CONNECTION_DEVICE_ID: &str = "ConnectionDeviceId";
pub const CREATION_TIME_UTC: &str = "CreationTimeUtc";
pub const ENQUEUED_TIME_UTC: &str = "EnqueuedTimeUtc";
pub const PREDICTED_RUL: &str = "PredictedRul";
pub const CYCLE_TIME: &str = "CycleTime";
pub const DEAD_LETTER: &str = "DeadLetter";

/// Field name to numeric reading
pub type MessageBody = BTreeMap<String, f64>;

/// Application properties carried with a message across module hops
pub type MessageProperties = BTreeMap<String, String>;

/// Metadata the transport assigns to a delivery, separate from the
/// application property bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportMetadata {
    pub correlation_id: Option<String>,
    pub connection_device_id: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub enqueued_time: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

/// A delivery as handed over by the transport, before any parsing
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub payload: Bytes,
    pub properties: MessageProperties,
    pub transport: TransportMetadata,
}

impl InboundMessage {
    pub fn new(
        payload: impl Into<Bytes>,
        properties: MessageProperties,
        transport: TransportMetadata,
    ) -> Self {
        Self {
            payload: payload.into(),
            properties,
            transport,
        }
    }
}

/// Parsed telemetry or classification message.
///
/// The body is never empty and the properties always hold a
/// `CorrelationId`. Both are fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    body: MessageBody,
    properties: MessageProperties,
}

impl MessageEnvelope {
    /// Build an envelope from an already decoded body, merging transport
    /// metadata into the properties.
    pub fn new(
        body: MessageBody,
        mut properties: MessageProperties,
        transport: &TransportMetadata,
    ) -> EnvelopeResult<Self> {
        if body.is_empty() {
            return Err(EnvelopeError::EmptyBody);
        }

        merge_transport_properties(&mut properties, transport);
        Ok(Self { body, properties })
    }

    /// Decode a UTF-8 JSON payload.
    ///
    /// Accepts a flat object of numbers, or a single-element array wrapping
    /// one (the shape classifier responses arrive in). Both normalise to the
    /// same body.
    pub fn parse(
        payload: &[u8],
        properties: &MessageProperties,
        transport: &TransportMetadata,
    ) -> EnvelopeResult<Self> {
        if payload.is_empty() {
            warn!("received message was empty");
            return Err(EnvelopeError::EmptyPayload);
        }

        let text = std::str::from_utf8(payload).map_err(|e| {
            error!(error = %e, "failed to decode message as UTF-8");
            EnvelopeError::InvalidUtf8(e.to_string())
        })?;

        let body = decode_body(text).inspect_err(|e| {
            error!(message = %text, error = %e, "failed to load message");
        })?;

        debug!(message = %text, "received message");
        Self::new(body, properties.clone(), transport)
    }

    pub fn from_inbound(message: &InboundMessage) -> EnvelopeResult<Self> {
        Self::parse(&message.payload, &message.properties, &message.transport)
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    /// A message is classified once the classifier has added a predicted
    /// remaining useful life.
    pub fn is_classified(&self) -> bool {
        self.body.contains_key(PREDICTED_RUL)
    }

    pub fn correlation_id(&self) -> EnvelopeResult<&str> {
        self.property(CORRELATION_ID)
    }

    pub fn device_id(&self) -> EnvelopeResult<&str> {
        self.property(CONNECTION_DEVICE_ID)
    }

    pub fn creation_time(&self) -> EnvelopeResult<DateTime<Utc>> {
        self.timestamp(CREATION_TIME_UTC)
    }

    pub fn enqueued_time(&self) -> EnvelopeResult<DateTime<Utc>> {
        self.timestamp(ENQUEUED_TIME_UTC)
    }

    pub fn cycle_time(&self) -> EnvelopeResult<f64> {
        self.field(CYCLE_TIME)
    }

    pub fn predicted_rul(&self) -> EnvelopeResult<f64> {
        self.field(PREDICTED_RUL)
    }

    fn property(&self, name: &'static str) -> EnvelopeResult<&str> {
        self.properties
            .get(name)
            .map(String::as_str)
            .ok_or(EnvelopeError::MissingProperty(name))
    }

    fn field(&self, name: &'static str) -> EnvelopeResult<f64> {
        self.body
            .get(name)
            .copied()
            .ok_or(EnvelopeError::MissingField(name))
    }

    fn timestamp(&self, name: &'static str) -> EnvelopeResult<DateTime<Utc>> {
        let value = self.property(name)?;
        parse_timestamp(value).ok_or_else(|| EnvelopeError::InvalidTimestamp {
            name,
            value: value.to_string(),
        })
    }
}

/// Fill in the properties the transport knows about but the sender did not
/// set. Existing properties are never overwritten, so merging twice is the
/// same as merging once.
pub fn merge_transport_properties(
    properties: &mut MessageProperties,
    transport: &TransportMetadata,
) {
    if let Some(created) = transport.creation_time {
        properties
            .entry(CREATION_TIME_UTC.to_string())
            .or_insert_with(|| format_timestamp(created));
    }

    if let Some(enqueued) = transport.enqueued_time {
        properties
            .entry(ENQUEUED_TIME_UTC.to_string())
            .or_insert_with(|| format_timestamp(enqueued));
    }

    properties
        .entry(CORRELATION_ID.to_string())
        .or_insert_with(|| {
            non_blank(transport.correlation_id.as_deref())
                .map(str::to_string)
                .unwrap_or_else(new_correlation_id)
        });

    if let Some(device_id) = non_blank(transport.connection_device_id.as_deref()) {
        properties
            .entry(CONNECTION_DEVICE_ID.to_string())
            .or_insert_with(|| device_id.to_string());
    }
}

pub fn new_correlation_id() -> String {
    xid::new().to_string()
}

/// RFC 3339 in UTC with millisecond precision
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp with any offset, normalised to UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn decode_body(text: &str) -> EnvelopeResult<MessageBody> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;

    let object = match value {
        Value::Object(object) => object,
        Value::Array(mut items) if items.len() == 1 => match items.pop() {
            Some(Value::Object(object)) => object,
            _ => return Err(EnvelopeError::UnexpectedShape(text.to_string())),
        },
        _ => return Err(EnvelopeError::UnexpectedShape(text.to_string())),
    };

    if object.is_empty() {
        return Err(EnvelopeError::EmptyBody);
    }

    object
        .into_iter()
        .map(|(name, value)| match value.as_f64() {
            Some(number) => Ok((name, number)),
            None => Err(EnvelopeError::InvalidJson(format!(
                "field {name} is not a number: {value}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn transport() -> TransportMetadata {
        TransportMetadata {
            correlation_id: None,
            connection_device_id: Some("Client_001".to_string()),
            creation_time: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()),
            enqueued_time: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 1).unwrap()),
            content_type: None,
            content_encoding: None,
        }
    }

    #[test]
    fn test_parse_flat_object() {
        let envelope = MessageEnvelope::parse(
            br#"{"CycleTime": 12, "OperationalSetting1": 0.5, "Sensor1": 642.1}"#,
            &MessageProperties::new(),
            &transport(),
        )
        .unwrap();

        assert_eq!(envelope.body().len(), 3);
        assert_eq!(envelope.cycle_time().unwrap(), 12.0);
        assert_eq!(envelope.body()["Sensor1"], 642.1);
        assert!(!envelope.is_classified());
    }

    #[test]
    fn test_parse_unwraps_single_element_array() {
        let wrapped = MessageEnvelope::parse(
            br#"[{"CycleTime": 12, "PredictedRul": 87.3}]"#,
            &MessageProperties::new(),
            &transport(),
        )
        .unwrap();
        let flat = MessageEnvelope::parse(
            br#"{"CycleTime": 12, "PredictedRul": 87.3}"#,
            &MessageProperties::new(),
            &transport(),
        )
        .unwrap();

        assert_eq!(wrapped.body(), flat.body());
        assert!(wrapped.is_classified());
        assert_eq!(wrapped.predicted_rul().unwrap(), 87.3);
    }

    #[test]
    fn test_parse_rejects_empty_payload() {
        let result = MessageEnvelope::parse(b"", &MessageProperties::new(), &transport());
        assert_eq!(result.unwrap_err(), EnvelopeError::EmptyPayload);
    }

    #[test]
    fn test_parse_rejects_empty_object() {
        let result = MessageEnvelope::parse(b"{}", &MessageProperties::new(), &transport());
        assert_eq!(result.unwrap_err(), EnvelopeError::EmptyBody);

        let result = MessageEnvelope::parse(b"[{}]", &MessageProperties::new(), &transport());
        assert_eq!(result.unwrap_err(), EnvelopeError::EmptyBody);
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        let props = MessageProperties::new();

        assert!(matches!(
            MessageEnvelope::parse(b"{not json", &props, &transport()),
            Err(EnvelopeError::InvalidJson(_))
        ));
        assert!(matches!(
            MessageEnvelope::parse(&[0xff, 0xfe, 0x00], &props, &transport()),
            Err(EnvelopeError::InvalidUtf8(_))
        ));
        assert!(matches!(
            MessageEnvelope::parse(b"[{\"CycleTime\": 1}, {\"CycleTime\": 2}]", &props, &transport()),
            Err(EnvelopeError::UnexpectedShape(_))
        ));
        assert!(matches!(
            MessageEnvelope::parse(b"42", &props, &transport()),
            Err(EnvelopeError::UnexpectedShape(_))
        ));
        assert!(matches!(
            MessageEnvelope::parse(br#"{"CycleTime": "twelve"}"#, &props, &transport()),
            Err(EnvelopeError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_classified_depends_only_on_predicted_rul() {
        let props = MessageProperties::new();
        let only_rul =
            MessageEnvelope::parse(br#"{"PredictedRul": 3}"#, &props, &transport()).unwrap();
        let many_fields = MessageEnvelope::parse(
            br#"{"Sensor1": 1, "Sensor2": 2, "OperationalSetting3": 100, "PredictedRul": 3}"#,
            &props,
            &transport(),
        )
        .unwrap();

        assert!(only_rul.is_classified());
        assert!(many_fields.is_classified());
    }

    #[test]
    fn test_merge_copies_transport_metadata() {
        let mut props = MessageProperties::new();
        props.insert("SensorBatch".to_string(), "7".to_string());

        let mut transport = transport();
        transport.correlation_id = Some("cid-from-transport".to_string());
        merge_transport_properties(&mut props, &transport);

        assert_eq!(props["SensorBatch"], "7");
        assert_eq!(props[CORRELATION_ID], "cid-from-transport");
        assert_eq!(props[CONNECTION_DEVICE_ID], "Client_001");
        assert_eq!(props[CREATION_TIME_UTC], "2024-03-01T10:00:00.000Z");
        assert_eq!(props[ENQUEUED_TIME_UTC], "2024-03-01T10:00:01.000Z");
    }

    #[test]
    fn test_merge_keeps_existing_properties() {
        let mut props = MessageProperties::new();
        props.insert(CORRELATION_ID.to_string(), "upstream".to_string());
        props.insert(CONNECTION_DEVICE_ID.to_string(), "Client_042".to_string());
        props.insert(
            CREATION_TIME_UTC.to_string(),
            "2023-12-31T23:59:59.000Z".to_string(),
        );

        let mut transport = transport();
        transport.correlation_id = Some("transport".to_string());
        merge_transport_properties(&mut props, &transport);

        assert_eq!(props[CORRELATION_ID], "upstream");
        assert_eq!(props[CONNECTION_DEVICE_ID], "Client_042");
        assert_eq!(props[CREATION_TIME_UTC], "2023-12-31T23:59:59.000Z");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = MessageProperties::new();
        merge_transport_properties(&mut once, &transport());

        let mut twice = once.clone();
        merge_transport_properties(&mut twice, &transport());

        assert_eq!(once, twice);
    }

    #[test]
    fn test_blank_transport_correlation_id_is_replaced() {
        let mut transport = transport();
        transport.correlation_id = Some("   ".to_string());
        transport.connection_device_id = Some(String::new());

        let mut props = MessageProperties::new();
        merge_transport_properties(&mut props, &transport);

        assert!(!props[CORRELATION_ID].trim().is_empty());
        assert!(!props.contains_key(CONNECTION_DEVICE_ID));
    }

    #[test]
    fn test_generated_correlation_ids_are_unique() {
        let payload = br#"{"CycleTime": 1}"#;
        let props = MessageProperties::new();

        let first = MessageEnvelope::parse(payload, &props, &transport()).unwrap();
        let second = MessageEnvelope::parse(payload, &props, &transport()).unwrap();

        let first_id = first.correlation_id().unwrap();
        let second_id = second.correlation_id().unwrap();
        assert!(!first_id.is_empty());
        assert!(!second_id.is_empty());
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn test_accessors_report_missing_metadata() {
        let envelope = MessageEnvelope::new(
            MessageBody::from([(CYCLE_TIME.to_string(), 4.0)]),
            MessageProperties::new(),
            &TransportMetadata::default(),
        )
        .unwrap();

        assert_eq!(
            envelope.device_id().unwrap_err(),
            EnvelopeError::MissingProperty(CONNECTION_DEVICE_ID)
        );
        assert_eq!(
            envelope.creation_time().unwrap_err(),
            EnvelopeError::MissingProperty(CREATION_TIME_UTC)
        );
        assert_eq!(
            envelope.predicted_rul().unwrap_err(),
            EnvelopeError::MissingField(PREDICTED_RUL)
        );
    }

    #[test]
    fn test_timestamps_are_normalised_to_utc() {
        let mut props = MessageProperties::new();
        props.insert(
            ENQUEUED_TIME_UTC.to_string(),
            "2024-03-01T12:00:00+02:00".to_string(),
        );
        props.insert(CREATION_TIME_UTC.to_string(), "yesterday".to_string());

        let envelope = MessageEnvelope::new(
            MessageBody::from([(CYCLE_TIME.to_string(), 4.0)]),
            props,
            &TransportMetadata::default(),
        )
        .unwrap();

        assert_eq!(
            envelope.enqueued_time().unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
        assert!(matches!(
            envelope.creation_time(),
            Err(EnvelopeError::InvalidTimestamp { name: CREATION_TIME_UTC, .. })
        ));
    }
}
