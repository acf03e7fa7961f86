use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{info, Level, Metadata};

use super::ConfigurationApplyError;

/// Desired-property key holding the logging level
pub const LOGGING_LEVEL_KEY: &str = "LoggingLevel";

/// Log severity, most urgent first. A message is logged when its severity is
/// at or below the current threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogSeverity {
    Error = 0,
    Warning = 1,
    Verbose = 2,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Error => "Error",
            LogSeverity::Warning => "Warning",
            LogSeverity::Verbose => "Verbose",
        }
    }

    /// Severity a `tracing` level is judged at: `ERROR` and `WARN` map
    /// directly, everything finer is verbose.
    pub fn from_level(level: &Level) -> Self {
        if *level == Level::ERROR {
            LogSeverity::Error
        } else if *level == Level::WARN {
            LogSeverity::Warning
        } else {
            LogSeverity::Verbose
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogSeverity::Error,
            1 => LogSeverity::Warning,
            _ => LogSeverity::Verbose,
        }
    }
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogSeverity {
    type Err = ConfigurationApplyError;

    /// Accepts the level names in any case, or their numeric values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "error" | "0" => Ok(LogSeverity::Error),
            "warning" | "1" => Ok(LogSeverity::Warning),
            "verbose" | "2" => Ok(LogSeverity::Verbose),
            _ => Err(ConfigurationApplyError::UnknownLevel(trimmed.to_string())),
        }
    }
}

/// Process-wide log threshold, readable by every log call and writable by
/// desired-property updates. A single atomic slot, so readers never see a
/// torn value; a slightly stale one is acceptable.
#[derive(Debug)]
pub struct LogLevelControl {
    threshold: AtomicU8,
}

impl LogLevelControl {
    pub fn new(initial: LogSeverity) -> Self {
        Self {
            threshold: AtomicU8::new(initial as u8),
        }
    }

    pub fn threshold(&self) -> LogSeverity {
        LogSeverity::from_u8(self.threshold.load(Ordering::Relaxed))
    }

    pub fn set_threshold(&self, severity: LogSeverity) {
        self.threshold.store(severity as u8, Ordering::Relaxed);
    }

    pub fn is_enabled(&self, severity: LogSeverity) -> bool {
        severity <= self.threshold()
    }

    /// Filter predicate for the tracing subscriber. Spans always pass so
    /// trace structure is kept regardless of verbosity.
    pub fn allows(&self, metadata: &Metadata<'_>) -> bool {
        if metadata.is_span() {
            return true;
        }
        self.is_enabled(LogSeverity::from_level(metadata.level()))
    }

    /// Apply a desired-property document.
    ///
    /// Returns the new threshold when `LoggingLevel` was present and valid,
    /// `None` when the key is absent. A malformed document or unknown level
    /// leaves the threshold unchanged.
    pub fn apply_desired_properties(
        &self,
        payload: &[u8],
    ) -> Result<Option<LogSeverity>, ConfigurationApplyError> {
        let document: Value = serde_json::from_slice(payload)
            .map_err(|e| ConfigurationApplyError::InvalidJson(e.to_string()))?;

        info!(desired_properties = %document, "desired property change");

        let Value::Object(properties) = document else {
            return Err(ConfigurationApplyError::NotAnObject);
        };

        let severity = match properties.get(LOGGING_LEVEL_KEY) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::String(name)) => name.parse::<LogSeverity>()?,
            Some(Value::Number(number)) => severity_from_number(number)?,
            Some(other) => {
                return Err(ConfigurationApplyError::UnknownLevel(other.to_string()));
            }
        };

        let previous = self.threshold();
        self.set_threshold(severity);

        info!(
            previous = %previous,
            current = %severity,
            "logging level changed"
        );

        Ok(Some(severity))
    }
}

/// Numeric levels, accepting whole floats such as `1.0`
fn severity_from_number(
    number: &serde_json::Number,
) -> Result<LogSeverity, ConfigurationApplyError> {
    let whole = number.as_u64().or_else(|| {
        number
            .as_f64()
            .filter(|value| value.fract() == 0.0 && *value >= 0.0 && *value <= 2.0)
            .map(|value| value as u64)
    });

    match whole {
        Some(0) => Ok(LogSeverity::Error),
        Some(1) => Ok(LogSeverity::Warning),
        Some(2) => Ok(LogSeverity::Verbose),
        _ => Err(ConfigurationApplyError::UnknownLevel(number.to_string())),
    }
}

impl Default for LogLevelControl {
    fn default() -> Self {
        Self::new(LogSeverity::Verbose)
    }
}
