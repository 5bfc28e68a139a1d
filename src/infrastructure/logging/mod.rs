// Logging module - Logging infrastructure
use crate::domain::error::{BridgeError, BridgeResult};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is not set
pub fn default_directive(log_level: &str, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        match log_level {
            "error" | "warn" | "info" | "debug" | "trace" => log_level,
            _ => "info",
        }
    };
    format!("serialbridge={},warn", level)
}

/// Initialize logging system
pub fn init_logging(log_level: &str, verbose: bool) -> BridgeResult<()> {
    let env_filter = if verbose {
        EnvFilter::new(default_directive(log_level, true))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level, false)))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(verbose)
                .with_level(true)
                .with_thread_ids(verbose)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
        .map_err(|e| BridgeError::Config {
            message: format!("Failed to initialize logging: {}", e),
        })?;

    tracing::debug!("SerialBridge logging system initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive("info", false), "serialbridge=info,warn");
        assert_eq!(default_directive("trace", false), "serialbridge=trace,warn");
        assert_eq!(default_directive("loud", false), "serialbridge=info,warn");
        assert_eq!(default_directive("error", true), "serialbridge=debug,warn");
    }

    #[test]
    fn test_logging_init_twice_fails_cleanly() {
        // Only one global subscriber can exist; the second call must not panic.
        let _ = init_logging("info", false);
        assert!(init_logging("info", false).is_err());
    }
}
