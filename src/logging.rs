//! `tracing` subscriber setup.

use tracing::Level;

use crate::config::LoggingConfig;

fn parse_level(level: &str) -> Level {
    level.parse().unwrap_or(Level::INFO)
}

/// Install a global fmt subscriber. Safe to call more than once; later calls are ignored.
pub fn init(config: &LoggingConfig) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(&config.level))
        .with_ansi(config.ansi)
        .with_target(true)
        .try_init();
}

/// Subscriber that writes through the test harness so output is captured per test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}
