use anyhow::{Context, Result};
use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

#[cfg(feature = "otlp")]
use opentelemetry::{global, trace::TracerProvider};
#[cfg(feature = "otlp")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otlp")]
use opentelemetry_sdk::{Resource, trace as sdk_trace};

type Filtered = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<Filtered> + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Keeps exporters alive until the process is done logging
#[derive(Default)]
pub struct LoggingGuard {
    #[cfg(feature = "otlp")]
    provider: Option<sdk_trace::SdkTracerProvider>,
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otlp")]
        if let Some(provider) = self.provider.take() {
            if let Err(error) = provider.shutdown() {
                eprintln!("failed to flush traces: {error}");
            }
        }
    }
}

/// Initialize logging for the CLI
///
/// Logs go to stderr; `log_file` additionally receives an ANSI-free copy.
pub fn init_logging(level: Level, format: LogFormat, log_file: Option<&Path>) -> Result<LoggingGuard> {
    let level_str = level.as_str().to_lowercase();
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("licensedesk={level_str},licensedesk_client={level_str}").into());

    #[allow(unused_mut)]
    let mut guard = LoggingGuard::default();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    #[cfg(feature = "otlp")]
    if let Some((layer, provider)) = init_opentelemetry()? {
        layers.push(layer);
        guard.provider = Some(provider);
    }

    layers.push(match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stderr).boxed(),
    });

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        layers.push(fmt::layer().with_writer(file).with_ansi(false).boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    Ok(guard)
}

/// Initialize OpenTelemetry if OTLP_ENDPOINT environment variable is set
#[cfg(feature = "otlp")]
fn init_opentelemetry() -> Result<Option<(BoxedLayer, sdk_trace::SdkTracerProvider)>> {
    let Ok(endpoint) = std::env::var("OTLP_ENDPOINT") else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;

    let provider = sdk_trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(Resource::builder().with_service_name("licensedesk").build())
        .build();

    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer("licensedesk");

    Ok(Some((
        tracing_opentelemetry::layer().with_tracer(tracer).boxed(),
        provider,
    )))
}
