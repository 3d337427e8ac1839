// Logging setup
// Installs a tracing subscriber; RUST_LOG overrides the configured level

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::settings::LogSettings;

fn parse_level(level: &str) -> Option<Level> {
    match level.trim().to_ascii_lowercase().as_str() {
        "off" => None,
        "error" => Some(Level::ERROR),
        "warn" => Some(Level::WARN),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => Some(Level::INFO),
    }
}

/// Initialize logging from settings. A subscriber that is already installed
/// (by the host application or an earlier call) is left in place.
pub fn init(settings: &LogSettings) {
    let Some(level) = parse_level(&settings.level) else {
        return;
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true),
        )
        .try_init();
}

/// Initialize logging with default settings (for tests and quick starts)
pub fn init_default() {
    init(&LogSettings::default());
}
