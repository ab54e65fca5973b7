//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

/// Engine-level tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to each destination call during dispatch.
    pub dispatch_timeout: Duration,
    /// Interval between mail sync runs.
    pub sync_interval: Duration,
    /// Minimum quiet period after a sync completes before the next may start.
    pub sync_cooldown: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::from_secs(30),
            sync_interval: Duration::from_secs(300), // 5 minutes
            sync_cooldown: Duration::from_secs(60),
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dispatch_timeout: env_secs("MAILFLOW_DISPATCH_TIMEOUT_SECS")
                .unwrap_or(defaults.dispatch_timeout),
            sync_interval: env_secs("MAILFLOW_SYNC_INTERVAL_SECS")
                .unwrap_or(defaults.sync_interval),
            sync_cooldown: env_secs("MAILFLOW_SYNC_COOLDOWN_SECS")
                .unwrap_or(defaults.sync_cooldown),
        }
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

/// SMTP relay settings for the email destination.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl SmtpConfig {
    /// Build from environment. Returns `None` when SMTP is not configured.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("MAILFLOW_SMTP_HOST").ok()?;
        let username = std::env::var("MAILFLOW_SMTP_USER").ok()?;
        let password = std::env::var("MAILFLOW_SMTP_PASSWORD").ok()?;
        let from_address =
            std::env::var("MAILFLOW_SMTP_FROM").unwrap_or_else(|_| username.clone());
        let port = std::env::var("MAILFLOW_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        Some(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
            from_address,
        })
    }
}

/// Telegram Bot API settings for the telegram destination.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
}

impl TelegramConfig {
    /// Build from environment. Returns `None` when no bot token is set.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("MAILFLOW_TELEGRAM_BOT_TOKEN").ok()?;
        Some(Self {
            bot_token: SecretString::from(token),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.dispatch_timeout.as_secs(), 30);
        assert_eq!(config.sync_interval.as_secs(), 300);
        assert_eq!(config.sync_cooldown.as_secs(), 60);
    }
}
