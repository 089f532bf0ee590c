//! # relay-telemetry
//!
//! One-shot `tracing` subscriber setup. `RUST_LOG` wins over the configured
//! level; output is human-readable or JSON lines.

use relay_settings::LoggingSettings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Build the level filter: `RUST_LOG` if set and valid, else the configured level.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback_filter(&settings.level))
}

fn fallback_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global subscriber. Call once at startup.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_telemetry(settings: &LoggingSettings) -> bool {
    let filter = env_filter(settings);

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_level_falls_back_to_info() {
        let filter = fallback_filter("relay=loudest");
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn module_directives_are_kept() {
        let filter = fallback_filter("warn,relay_server=debug");
        let rendered = filter.to_string();
        assert!(rendered.contains("relay_server=debug"));
        assert!(rendered.contains("warn"));
    }

    #[test]
    fn second_init_reports_already_installed() {
        let settings = LoggingSettings::default();
        let _ = init_telemetry(&settings);
        assert!(!init_telemetry(&settings));
    }
}
