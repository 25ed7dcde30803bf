use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use tower_http::trace::TraceLayer;
use tracing::Span;

/// Process-wide diagnostics: `color-eyre` reports plus a `tracing` subscriber
/// that honours `RUST_LOG` and falls back to verbose output for this crate.
#[derive(Debug)]
#[must_use]
pub struct Telemetry;

impl Telemetry {
    pub fn install(&self) -> Result<(), color_eyre::eyre::Error> {
        use tracing_error::ErrorLayer;
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        color_eyre::install()?;

        let format_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(true)
            .with_writer(std::io::stderr);

        let crate_name = env!("CARGO_CRATE_NAME");
        let default_rust_log =
            format!("{crate_name}=trace,tower_http=debug,axum::rejection=trace,sqlx=warn");
        let filter_layer =
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_rust_log))?;

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(format_layer)
            .with(ErrorLayer::default())
            .try_init()?;

        Ok(())
    }
}

type Classifier =
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>;

/// One `http_request` span per request, keyed by the route template rather
/// than the raw path so product ids do not explode span cardinality.
#[must_use]
pub fn trace_layer() -> TraceLayer<Classifier, impl Clone + Fn(&Request<Body>) -> Span> {
    TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        let matched_path = request
            .extensions()
            .get::<MatchedPath>()
            .map(MatchedPath::as_str);
        let is_upgrade = request.headers().contains_key(axum::http::header::UPGRADE);
        tracing::info_span!(
            "http_request",
            method = ?request.method(),
            matched_path,
            version = ?request.version(),
            is_upgrade,
        )
    })
}
