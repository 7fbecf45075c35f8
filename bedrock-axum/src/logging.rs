use bedrock_core::config::{keys, ConfigSnapshot};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG`, else `log.level`, else `info`.
/// `log.format=json` switches from console output to JSON lines. A second
/// call is a no-op, so tests and embedders can call it freely.
pub fn init_tracing(config: &ConfigSnapshot) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.get_or(keys::LOG_LEVEL, "info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config
        .get(keys::LOG_FORMAT)
        .is_some_and(|f| f.eq_ignore_ascii_case("json"));

    let installed = if json {
        Registry::default()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    if installed.is_ok() {
        tracing::debug!(json, "tracing initialized");
    }
}
