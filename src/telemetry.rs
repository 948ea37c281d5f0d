//! Open Telemetry related source code.
#[cfg(feature = "telemetry")]
mod enabled {
    use anyhow::{Context, Result};
    use clap::crate_name;
    use opentelemetry::{KeyValue, global};
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::{
        Resource, propagation::TraceContextPropagator, trace::SdkTracerProvider,
    };
    use opentelemetry_semantic_conventions::resource::PROCESS_PID;
    use std::process;

    /// The main structure of this module.
    pub struct Telemetry;

    impl Telemetry {
        /// Return the telemetry layer if tracing is enabled.
        pub fn layer(endpoint: &str) -> Result<SdkTracerProvider> {
            global::set_text_map_propagator(TraceContextPropagator::new());

            let exporter = SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint)
                .build()
                .context("build exporter")?;

            let tracer = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(
                    Resource::builder()
                        .with_service_name(crate_name!())
                        .with_attributes([KeyValue::new(PROCESS_PID, process::id() as i64)])
                        .build(),
                )
                .build();

            Ok(tracer)
        }
    }
}

#[cfg(not(feature = "telemetry"))]
mod disabled {
    use anyhow::Result;

    /// The main structure of this module (no-op when telemetry disabled).
    pub struct Telemetry;

    /// Stub type to replace SdkTracerProvider when telemetry is disabled.
    #[derive(Clone, Debug)]
    pub struct NoopTracerProvider;

    impl NoopTracerProvider {
        /// No-op shutdown method for API compatibility.
        pub fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    impl Telemetry {
        /// Return a no-op tracer provider when telemetry is disabled.
        pub fn layer(_endpoint: &str) -> Result<NoopTracerProvider> {
            Ok(NoopTracerProvider)
        }
    }
}

// Re-export the appropriate implementation based on feature flag.
#[cfg(feature = "telemetry")]
pub use enabled::*;

#[cfg(not(feature = "telemetry"))]
pub use disabled::*;
