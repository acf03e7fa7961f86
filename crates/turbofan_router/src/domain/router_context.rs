use std::sync::Arc;
use tracing::Metadata;

use super::{DiagnosticsCounters, LogLevelControl, LogSeverity};

/// Shared mutable state of one router process: the delivery counters and the
/// log threshold. Passed explicitly to everything that needs it.
#[derive(Debug, Default)]
pub struct RouterContext {
    counters: DiagnosticsCounters,
    log_level: LogLevelControl,
}

impl RouterContext {
    pub fn new(initial_level: LogSeverity) -> Self {
        Self {
            counters: DiagnosticsCounters::new(),
            log_level: LogLevelControl::new(initial_level),
        }
    }

    pub fn counters(&self) -> &DiagnosticsCounters {
        &self.counters
    }

    pub fn log_level(&self) -> &LogLevelControl {
        &self.log_level
    }

    /// Event filter for the tracing subscriber, backed by this context's
    /// threshold.
    pub fn log_filter(
        self: &Arc<Self>,
    ) -> impl Fn(&Metadata<'_>) -> bool + Clone + Send + Sync + 'static {
        let context = Arc::clone(self);
        move |metadata: &Metadata<'_>| context.log_level.allows(metadata)
    }
}
