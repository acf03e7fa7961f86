use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use super::InboundChannel;

/// Every this many deliveries on a channel, the running count is logged
pub const COUNT_LOG_INTERVAL: u64 = 50;

/// Deliveries seen per inbound channel, successful or not
#[derive(Debug, Default)]
pub struct DiagnosticsCounters {
    device_messages: AtomicU64,
    classifier_messages: AtomicU64,
}

impl DiagnosticsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one delivery and return the new running total for the channel
    pub fn record_delivery(&self, channel: InboundChannel) -> u64 {
        let count = self.counter(channel).fetch_add(1, Ordering::Relaxed) + 1;

        if count % COUNT_LOG_INTERVAL == 0 {
            info!(channel = %channel, count, "received message count");
        }

        count
    }

    pub fn count(&self, channel: InboundChannel) -> u64 {
        self.counter(channel).load(Ordering::Relaxed)
    }

    fn counter(&self, channel: InboundChannel) -> &AtomicU64 {
        match channel {
            InboundChannel::FromDevice => &self.device_messages,
            InboundChannel::FromClassifier => &self.classifier_messages,
        }
    }
}
