//! Delayed self-restart after a full configuration reset.
//!
//! The process exits with [`RESTART_EXIT_CODE`] and relies on its supervisor
//! to start it again with an empty configuration.

use std::time::Duration;

use tokio::task::JoinHandle;
use vaultlink_core::config::BrokerConfig;

pub const RESTART_EXIT_CODE: i32 = 54;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub delay: Duration,
}

impl RestartPolicy {
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            delay: Duration::ZERO,
        }
    }

    pub const fn from_config(config: &BrokerConfig) -> Self {
        Self {
            enabled: config.restart_on_reset,
            delay: Duration::from_millis(config.restart_delay_ms),
        }
    }

    /// Fire-and-forget: exit after `delay` so the caller's response can go
    /// out first. Returns `None` when restarts are disabled.
    pub fn schedule(&self) -> Option<JoinHandle<()>> {
        if !self.enabled {
            tracing::info!("configuration reset, restart disabled");
            return None;
        }
        let delay = self.delay;
        tracing::warn!(delay_ms = delay.as_millis(), "configuration reset, restarting");
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            std::process::exit(RESTART_EXIT_CODE);
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn policy_follows_config() {
        let config = BrokerConfig {
            restart_on_reset: true,
            restart_delay_ms: 250,
            ..BrokerConfig::default()
        };
        let policy = RestartPolicy::from_config(&config);
        assert!(policy.enabled);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn disabled_policy_schedules_nothing() {
        assert!(RestartPolicy::disabled().schedule().is_none());
    }

    #[tokio::test]
    async fn enabled_policy_schedules_an_exit() {
        let policy = RestartPolicy {
            enabled: true,
            delay: Duration::from_secs(3600),
        };
        let handle = policy.schedule().unwrap();
        assert!(!handle.is_finished());
        handle.abort();
    }
}
