use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime, trace as sdktrace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install JSON logging plus an OTLP trace exporter.
///
/// An exporter that cannot be built leaves JSON logging in place; the ledger
/// keeps serving without traces.
pub fn init_tracing(service_name: &str, log_level: &str, otlp_endpoint: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .json()
        .flatten_event(true);

    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(otlp_endpoint);

    let (tracer, otlp_error) = match opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
        ])))
        .install_batch(runtime::Tokio)
    {
        Ok(tracer) => (Some(tracer), None),
        Err(e) => (None, Some(e)),
    };

    // `Option<Layer>` is a no-op layer when the exporter is missing.
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t)))
        .with(fmt_layer)
        .try_init()
        .is_ok();

    if let Some(e) = otlp_error {
        tracing::warn!(
            service = service_name,
            otlp_endpoint = otlp_endpoint,
            error = %e,
            "OTLP exporter unavailable, continuing with local logs only"
        );
    }

    if !installed {
        tracing::debug!("Global subscriber already installed, keeping it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn init_tracing_installs_a_global_subscriber() {
        init_tracing("service-core-test", "debug", "http://127.0.0.1:4317");
        assert!(tracing::dispatcher::has_been_set());

        // A second call keeps the first subscriber instead of panicking.
        init_tracing("service-core-test", "debug", "http://127.0.0.1:4317");
    }
}
