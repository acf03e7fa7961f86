use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::nats::{ConsumeRequest, ConsumeResponse, CORRELATION_ID_HEADER};
use tower::{Layer, Service};
use tracing::{debug, error, warn, Instrument, Span};

const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_secs(1);

/// Logs the outcome and duration of every consumed message.
///
/// Acks are logged at debug. Naks, and messages that took longer than the
/// slow threshold, are logged at warn.
#[derive(Clone)]
pub struct NatsConsumeLoggingLayer {
    slow_threshold: Duration,
}

impl Default for NatsConsumeLoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl NatsConsumeLoggingLayer {
    pub fn new() -> Self {
        Self {
            slow_threshold: DEFAULT_SLOW_THRESHOLD,
        }
    }

    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }
}

impl<S> Layer<S> for NatsConsumeLoggingLayer {
    type Service = NatsConsumeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsConsumeLoggingService {
            inner: service,
            slow_threshold: self.slow_threshold,
        }
    }
}

#[derive(Clone)]
pub struct NatsConsumeLoggingService<S> {
    inner: S,
    slow_threshold: Duration,
}

impl<S> Service<ConsumeRequest> for NatsConsumeLoggingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let subject = req.subject.clone();
        let correlation_id = req.header(CORRELATION_ID_HEADER).map(str::to_string);
        let payload_size = req.payload.len();
        let slow_threshold = self.slow_threshold;
        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let elapsed = start.elapsed();
                let duration_ms = elapsed.as_millis();

                match &result {
                    Ok(ConsumeResponse::Ack) if elapsed > slow_threshold => {
                        warn!(
                            subject = %subject,
                            correlation_id = correlation_id.as_deref(),
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            "slow message on {subject}: {duration_ms}ms"
                        );
                    }
                    Ok(ConsumeResponse::Ack) => {
                        debug!(
                            subject = %subject,
                            correlation_id = correlation_id.as_deref(),
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            "consumed from {subject} in {duration_ms}ms"
                        );
                    }
                    Ok(ConsumeResponse::Nak(reason)) => {
                        warn!(
                            subject = %subject,
                            correlation_id = correlation_id.as_deref(),
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            reason = reason.as_deref().unwrap_or("unspecified"),
                            "handed {subject} message back for redelivery"
                        );
                    }
                    Err(e) => {
                        error!(
                            subject = %subject,
                            correlation_id = correlation_id.as_deref(),
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to consume from {subject} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(Span::current()),
        )
    }
}
