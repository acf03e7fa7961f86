use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use turbofan_router::turbofan_router::TurbofanRouterConfig;

pub const DEFAULT_LOG_FILTER: &str = "info,turbofan_router=debug,common=debug";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Static log filter, overridden by RUST_LOG. Router and common events
    /// pass at debug so the runtime severity threshold decides what is kept.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Initial router severity threshold (Error, Warning, Verbose) until a
    /// desired-property update replaces it
    #[serde(default = "default_logging_level")]
    pub logging_level: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// NATS JetStream stream holding every turbofan subject
    #[serde(default = "default_nats_stream")]
    pub nats_stream: String,

    /// Subjects bound to the stream
    #[serde(default = "default_nats_stream_subjects")]
    pub nats_stream_subjects: String,

    /// Subject carrying raw device readings
    #[serde(default = "default_device_input_subject")]
    pub device_input_subject: String,

    /// Subject carrying classifier results
    #[serde(default = "default_classifier_input_subject")]
    pub classifier_input_subject: String,

    /// Subject carrying desired-property documents
    #[serde(default = "default_desired_properties_subject")]
    pub desired_properties_subject: String,

    /// Prefix for the output subjects, one per output channel
    #[serde(default = "default_output_subject_prefix")]
    pub output_subject_prefix: String,

    #[serde(default = "default_device_consumer_name")]
    pub device_consumer_name: String,

    #[serde(default = "default_classifier_consumer_name")]
    pub classifier_consumer_name: String,

    #[serde(default = "default_desired_properties_consumer_name")]
    pub desired_properties_consumer_name: String,

    /// Batch size for consumers
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Enable OpenTelemetry export
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

fn default_logging_level() -> String {
    "Verbose".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_stream() -> String {
    "turbofan".to_string()
}

fn default_nats_stream_subjects() -> String {
    "turbofan.>".to_string()
}

fn default_device_input_subject() -> String {
    "turbofan.inputs.deviceInput".to_string()
}

fn default_classifier_input_subject() -> String {
    "turbofan.inputs.rulInput".to_string()
}

fn default_desired_properties_subject() -> String {
    "turbofan.twin.desired".to_string()
}

fn default_output_subject_prefix() -> String {
    "turbofan.outputs".to_string()
}

fn default_device_consumer_name() -> String {
    "turbofan-router-device-input".to_string()
}

fn default_classifier_consumer_name() -> String {
    "turbofan-router-rul-input".to_string()
}

fn default_desired_properties_consumer_name() -> String {
    "turbofan-router-desired".to_string()
}

fn default_nats_batch_size() -> usize {
    10
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "turbofan-router".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("TURBOFAN"))
            .build()?
            .try_deserialize()
    }

    /// Comma-separated stream subjects as a list
    pub fn stream_subjects(&self) -> Vec<String> {
        self.nats_stream_subjects
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn router_config(&self) -> TurbofanRouterConfig {
        TurbofanRouterConfig {
            stream: self.nats_stream.clone(),
            device_input_subject: self.device_input_subject.clone(),
            classifier_input_subject: self.classifier_input_subject.clone(),
            desired_properties_subject: self.desired_properties_subject.clone(),
            output_subject_prefix: self.output_subject_prefix.clone(),
            device_consumer_name: self.device_consumer_name.clone(),
            classifier_consumer_name: self.classifier_consumer_name.clone(),
            desired_properties_consumer_name: self.desired_properties_consumer_name.clone(),
            nats_batch_size: self.nats_batch_size,
            nats_batch_wait_secs: self.nats_batch_wait_secs,
        }
    }
}
