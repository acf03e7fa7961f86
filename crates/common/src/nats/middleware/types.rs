use async_nats::HeaderMap;
use bytes::Bytes;

/// System header carrying the message correlation id across module hops
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// Request to publish a message to NATS
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Application properties and system headers; trace context is injected
    /// here by the tracing layer
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.headers
            .get(CORRELATION_ID_HEADER)
            .map(|value| value.as_str())
    }
}

/// Response from a publish operation
#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_request_correlation_id() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, "cid-1");

        let req = PublishRequest::new("turbofan.outputs.hubOutput", b"{}".to_vec())
            .with_headers(headers);

        assert_eq!(req.correlation_id(), Some("cid-1"));
        assert_eq!(req.subject, "turbofan.outputs.hubOutput");
    }

    #[test]
    fn test_publish_request_without_headers() {
        let req = PublishRequest::new("s", Bytes::new());
        assert!(req.correlation_id().is_none());
    }
}
