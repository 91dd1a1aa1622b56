//! Subscriber stack construction and installation.
//!
//! [`build_subscriber`] assembles the engine's layer stack (env filter with
//! engine-crate defaults, plain or JSON fmt output, optional OpenTelemetry
//! bridge) without installing it, so tests can run the stack through
//! `tracing::subscriber::with_default`. [`init_tracing`] installs it
//! globally and hands back an [`ObserveGuard`] that flushes the OTel
//! pipeline when dropped.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter applied when `RUST_LOG` is unset: engine crates at debug, the
/// rest of the dependency tree at info.
pub const DEFAULT_DIRECTIVES: &str = "info,maestro_core=debug,maestro_infra=debug";

/// Subscriber stack options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObserveOptions {
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
    /// Bridge spans to OpenTelemetry with a stdout exporter (local
    /// development; swap the exporter for OTLP in production).
    pub otel: bool,
}

/// Errors from installing the global subscriber.
#[derive(Debug, Error)]
pub enum InitError {
    /// A global subscriber was already installed by this process.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Flushes the OTel pipeline on drop. Hold it for the process lifetime.
#[must_use = "dropping the guard shuts down the OTel pipeline"]
pub struct ObserveGuard {
    provider: Option<SdkTracerProvider>,
}

impl ObserveGuard {
    /// Explicitly flush and shut down (same as dropping).
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("Warning: OTel tracer provider shutdown error: {err}");
            }
        }
    }
}

impl Drop for ObserveGuard {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Assemble the layer stack without installing it.
///
/// Returns the subscriber plus the OTel provider when `otel` is enabled
/// (the caller registers it globally and owns its shutdown).
pub fn build_subscriber(
    options: ObserveOptions,
) -> (impl Subscriber + Send + Sync, Option<SdkTracerProvider>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let plain_layer = (!options.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
    });
    let json_layer = options.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
    });

    let (otel_layer, provider) = if options.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("maestro-engine");
        (
            Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Some(provider),
        )
    } else {
        (None, None)
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(plain_layer)
        .with(json_layer)
        .with(otel_layer);
    (subscriber, provider)
}

/// Install the global subscriber stack.
///
/// Respects `RUST_LOG`, falling back to [`DEFAULT_DIRECTIVES`]. Call once
/// from the embedding binary; the returned guard flushes OTel on drop.
pub fn init_tracing(options: ObserveOptions) -> Result<ObserveGuard, InitError> {
    let (subscriber, provider) = build_subscriber(options);
    subscriber
        .try_init()
        .map_err(|err| InitError::AlreadyInitialized(err.to_string()))?;

    if let Some(provider) = &provider {
        opentelemetry::global::set_tracer_provider(provider.clone());
    }

    Ok(ObserveGuard { provider })
}
