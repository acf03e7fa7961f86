use async_nats::HeaderMap;
use chrono::{DateTime, Utc};
use common::nats::{is_trace_context_header, ConsumeRequest, CORRELATION_ID_HEADER};

use crate::domain::{
    format_timestamp, parse_timestamp, InboundMessage, MessageProperties, OutboundMessage,
    TransportMetadata,
};

pub const CONNECTION_DEVICE_ID_HEADER: &str = "iothub-connection-device-id";
pub const CREATION_TIME_HEADER: &str = "iothub-creation-time-utc";
pub const ENQUEUED_TIME_HEADER: &str = "iothub-enqueuedtime";
pub const CONTENT_TYPE_HEADER: &str = "content-type";
pub const CONTENT_ENCODING_HEADER: &str = "content-encoding";

const SYSTEM_HEADERS: [&str; 6] = [
    CORRELATION_ID_HEADER,
    CONNECTION_DEVICE_ID_HEADER,
    CREATION_TIME_HEADER,
    ENQUEUED_TIME_HEADER,
    CONTENT_TYPE_HEADER,
    CONTENT_ENCODING_HEADER,
];

fn is_system_header(name: &str) -> bool {
    is_trace_context_header(name)
        || SYSTEM_HEADERS
            .iter()
            .any(|system| system.eq_ignore_ascii_case(name))
}

/// Split a NATS delivery into application properties and transport metadata.
///
/// System headers feed the transport metadata; every other header becomes a
/// property. Without an enqueued-time header the receipt time stands in, and
/// without a creation-time header the enqueued time does.
pub fn inbound_message_from_request(
    request: &ConsumeRequest,
    received_at: DateTime<Utc>,
) -> InboundMessage {
    let mut properties = MessageProperties::new();
    if let Some(headers) = &request.headers {
        for (name, values) in headers.iter() {
            let name = name.to_string();
            if is_system_header(&name) {
                continue;
            }
            if let Some(value) = values.last() {
                properties.insert(name, value.as_str().to_string());
            }
        }
    }

    let enqueued_time = request
        .header(ENQUEUED_TIME_HEADER)
        .and_then(parse_timestamp)
        .unwrap_or(received_at);
    let creation_time = request
        .header(CREATION_TIME_HEADER)
        .and_then(parse_timestamp)
        .unwrap_or(enqueued_time);

    let transport = TransportMetadata {
        correlation_id: request.header(CORRELATION_ID_HEADER).map(str::to_string),
        connection_device_id: request
            .header(CONNECTION_DEVICE_ID_HEADER)
            .map(str::to_string),
        creation_time: Some(creation_time),
        enqueued_time: Some(enqueued_time),
        content_type: request.header(CONTENT_TYPE_HEADER).map(str::to_string),
        content_encoding: request.header(CONTENT_ENCODING_HEADER).map(str::to_string),
    };

    InboundMessage::new(request.payload.clone(), properties, transport)
}

/// Headers for an outbound message: its properties plus the system headers it
/// declares.
pub fn outbound_headers(message: &OutboundMessage) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in &message.properties {
        headers.insert(name.as_str(), value.as_str());
    }

    if let Some(correlation_id) = &message.correlation_id {
        headers.insert(CORRELATION_ID_HEADER, correlation_id.as_str());
    }
    if let Some(content_type) = &message.content_type {
        headers.insert(CONTENT_TYPE_HEADER, content_type.as_str());
    }
    if let Some(content_encoding) = &message.content_encoding {
        headers.insert(CONTENT_ENCODING_HEADER, content_encoding.as_str());
    }

    headers
}

/// Headers a device would attach when publishing a reading, used by tests
/// and simulators talking to the router over NATS.
pub fn device_headers(
    device_id: &str,
    correlation_id: Option<&str>,
    created_at: Option<DateTime<Utc>>,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONNECTION_DEVICE_ID_HEADER, device_id);
    if let Some(correlation_id) = correlation_id {
        headers.insert(CORRELATION_ID_HEADER, correlation_id);
    }
    if let Some(created_at) = created_at {
        headers.insert(CREATION_TIME_HEADER, format_timestamp(created_at).as_str());
    }
    headers
}
