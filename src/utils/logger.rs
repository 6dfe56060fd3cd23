//! Logging utilities using the tracing framework

use std::fmt::Display;

/// Log an informational message (wrapper around tracing::info)
pub fn log_info<T: Display>(msg: T) {
    tracing::info!("{}", msg);
}

/// Log a warning message (wrapper around tracing::warn)
pub fn log_warn<T: Display>(msg: T) {
    tracing::warn!("{}", msg);
}

/// Log an error message (wrapper around tracing::error)
pub fn log_error<T: Display>(msg: T) {
    tracing::error!("{}", msg);
}

/// Log a debug message (wrapper around tracing::debug)
pub fn log_debug<T: Display>(msg: T) {
    tracing::debug!("{}", msg);
}

/// Map `-v` occurrences to a default filter directive
pub fn verbosity_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over `-v`.
pub fn init(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity_directive(verbose)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Macro for convenient info logging
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::utils::logger::log_info(format!($($arg)*))
    };
}

/// Macro for convenient warning logging
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::utils::logger::log_warn(format!($($arg)*))
    };
}

/// Macro for convenient error logging
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::utils::logger::log_error(format!($($arg)*))
    };
}

/// Macro for convenient debug logging
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::utils::logger::log_debug(format!($($arg)*))
    };
}
