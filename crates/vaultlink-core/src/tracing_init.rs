//! Shared tracing/logging initialization.
//!
//! The filter is resolved as `RUST_LOG`, then the configured level applied to
//! the `vaultlink_*` crates, then the caller's default.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the env-filter directive string for the given configured level.
pub fn filter_directive(default_filter: &str, log_level: Option<&str>) -> String {
    if let Ok(from_env) = std::env::var("RUST_LOG") {
        return from_env;
    }
    match log_level.map(str::trim) {
        Some(level) if !level.is_empty() => {
            format!("vaultlink_core={level},vaultlink_crypto={level},vaultlink_daemon={level}")
        }
        _ => default_filter.to_string(),
    }
}

/// Initialise the global tracing subscriber. Logs go to stderr so command
/// output on stdout stays machine-readable.
///
/// * `default_filter` -- directive used when neither `RUST_LOG` nor a
///   configured level is present (e.g. `"vaultlink_daemon=info"`).
/// * `log_level` -- level from the `broker.log_level` setting.
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_level: Option<&str>, log_json: bool) {
    let env_filter = EnvFilter::new(filter_directive(default_filter, log_level));
    let fmt = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_applies_to_all_crates() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let directive = filter_directive("vaultlink_daemon=info", Some("debug"));
        assert!(directive.contains("vaultlink_crypto=debug"));
        assert!(directive.contains("vaultlink_daemon=debug"));
    }

    #[test]
    fn blank_level_falls_back_to_default() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert_eq!(
            filter_directive("vaultlink_daemon=info", Some("  ")),
            "vaultlink_daemon=info"
        );
    }
}
