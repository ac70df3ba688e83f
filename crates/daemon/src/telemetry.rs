// OpenTelemetry Export
//
// Compiled behind the `telemetry` feature and activated at runtime only
// when OTEL_EXPORTER_OTLP_ENDPOINT is set:
//
//   OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//   OTEL_SERVICE_NAME=gradekeep-dev \
//       gradekeepd
//
// The layer is composed into the logging registry at startup, so spans
// from the daemon and its RPC handlers export alongside normal logs.

/// Build the OTLP tracing layer, or `None` when no endpoint is configured.
#[cfg(feature = "telemetry")]
pub fn otlp_layer<S>() -> anyhow::Result<Option<impl tracing_subscriber::Layer<S>>>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::Resource;

    let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(None);
    };
    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "gradekeepd".to_string());

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;
    let provider = opentelemetry_sdk::trace::TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_resource(Resource::new([KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();
    opentelemetry::global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer)))
}
