use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from
/// `fallback_filter` (the `LOG_LEVEL` config key). `json` switches the
/// output format for log aggregation; pretty output is for local runs.
pub fn init_tracing(json: bool, fallback_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback_filter));

    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_span_events(fmt::format::FmtSpan::CLOSE);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.pretty())
            .init();
    }
}

/// Bootstrap variant used before configuration is resolved: `LOG_FORMAT`
/// and `LOG_LEVEL` are read straight from the environment so startup
/// failures (including config failures) are still logged.
pub fn init_tracing_from_env() {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let fallback = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_tracing(json, &fallback);
}
