//! OpenTelemetry Tracing Integration
//!
//! Console logging through `tracing-subscriber`, with optional OTLP span
//! export for any OTLP-compatible backend.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "false" to disable span export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: odte-stream)
//! - `RUST_LOG`: Log filter (default: `odte_stream=info`)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "odte-stream";

/// Default OTLP endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Directives always added on top of `RUST_LOG`.
const DEFAULT_DIRECTIVES: [&str; 4] = ["odte_stream=info", "sqlx=warn", "hyper=warn", "h2=warn"];

/// Telemetry setup failure.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Log filter directive is invalid.
    #[error("invalid log directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// OTLP exporter could not be built.
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),

    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Whether span export is enabled.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("OTEL_ENABLED").is_none_or(|v| !v.eq_ignore_ascii_case("false"));

        let otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name =
            lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
        }
    }
}

/// Initialize telemetry with configuration from the environment.
///
/// The returned guard must be kept alive for the duration of the program.
///
/// # Errors
///
/// Returns an error if the filter, exporter or subscriber cannot be set up.
pub fn init() -> Result<TelemetryGuard, TelemetryError> {
    init_with_config(&TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// # Errors
///
/// Returns an error if the filter, exporter or subscriber cannot be set up.
pub fn init_with_config(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = DEFAULT_DIRECTIVES
        .iter()
        .try_fold(EnvFilter::from_default_env(), |filter, directive| {
            directive.parse().map(|d| filter.add_directive(d))
        })?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if !config.enabled {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;

        return Ok(TelemetryGuard {
            tracer_provider: None,
        });
    }

    let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(otlp_exporter)
        .with_resource(
            opentelemetry_sdk::Resource::builder()
                .with_service_name(config.service_name.clone())
                .build(),
        )
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(TelemetryGuard {
        tracer_provider: Some(tracer_provider),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert!(config.enabled);
        assert_eq!(config.otlp_endpoint, DEFAULT_OTLP_ENDPOINT);
        assert_eq!(config.service_name, DEFAULT_SERVICE_NAME);
    }

    #[test]
    fn disabled_only_by_false() {
        assert!(!TelemetryConfig::from_lookup(|_| Some("FALSE".into())).enabled);
        assert!(TelemetryConfig::from_lookup(|_| None).enabled);
        assert!(
            TelemetryConfig::from_lookup(|k| (k == "OTEL_ENABLED").then(|| "yes".into())).enabled
        );
    }

    #[test]
    fn default_directives_parse() {
        for directive in DEFAULT_DIRECTIVES {
            assert!(directive.parse::<tracing_subscriber::filter::Directive>().is_ok());
        }
    }
}
