// Logging Setup
//
// One registry serves both binaries: an env-filtered fmt layer (pretty
// or json) writing to stderr or to a daily-rolling file, plus the OTLP
// layer when the telemetry feature is active. The returned guard must
// outlive the process or buffered file lines are dropped.

use crate::config::{Config, LogFormat};
use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

pub fn init(config: &Config, file_prefix: &str) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("gradekeep=info"))?;

    let (writer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{file_prefix}.log"));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![env_filter.boxed()];
    match config.log_format {
        LogFormat::Json => layers.push(fmt::layer().json().with_writer(writer).boxed()),
        LogFormat::Pretty => layers.push(
            fmt::layer()
                .pretty()
                .with_ansi(config.log_dir.is_none())
                .with_writer(writer)
                .boxed(),
        ),
    }

    #[cfg(feature = "telemetry")]
    let (otlp_active, otlp_error) = match crate::telemetry::otlp_layer() {
        Ok(Some(layer)) => {
            layers.push(layer.boxed());
            (true, None)
        }
        Ok(None) => (false, None),
        Err(e) => (false, Some(e)),
    };

    tracing_subscriber::registry().with(layers).init();

    #[cfg(feature = "telemetry")]
    {
        if otlp_active {
            tracing::info!("OpenTelemetry OTLP export enabled");
        }
        if let Some(e) = otlp_error {
            tracing::warn!(error = %e, "OpenTelemetry init failed, continuing without it");
        }
    }
    #[cfg(not(feature = "telemetry"))]
    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        tracing::warn!(
            "OTEL_EXPORTER_OTLP_ENDPOINT is set but this build lacks the `telemetry` feature"
        );
    }

    Ok(guard)
}
