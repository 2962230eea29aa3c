use crate::error::{LotteryError, Result};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_SESSION_KEY: &str = "current";
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_COUNTDOWN_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_key: String,
    pub client_id: String,
    pub step_interval: Duration,
    pub countdown_tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_key: DEFAULT_SESSION_KEY.to_string(),
            client_id: Uuid::new_v4().to_string(),
            step_interval: DEFAULT_STEP_INTERVAL,
            countdown_tick: DEFAULT_COUNTDOWN_TICK,
        }
    }
}

impl SessionConfig {
    pub fn new(session_key: impl Into<String>) -> Self {
        Self::default().with_session_key(session_key)
    }

    /// Defaults overridden by `LOTTO_SESSION_KEY` and `LOTTO_CLIENT_ID` when set and non-blank.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(key) = read_env("LOTTO_SESSION_KEY") {
            config.session_key = key;
        }

        if let Some(id) = read_env("LOTTO_CLIENT_ID") {
            config.client_id = id;
        }

        config
    }

    pub fn with_session_key(mut self, session_key: impl Into<String>) -> Self {
        let key: String = session_key.into();
        let trimmed = key.trim();
        self.session_key = if trimmed.is_empty() {
            DEFAULT_SESSION_KEY.to_string()
        } else {
            trimmed.to_string()
        };
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_step_interval(mut self, interval: Duration) -> Self {
        self.step_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.session_key.contains('/') {
            return Err(LotteryError::config("Session key cannot contain '/'"));
        }

        if self.client_id.trim().is_empty() {
            return Err(LotteryError::config("Client id cannot be empty"));
        }

        if self.step_interval.is_zero() {
            return Err(LotteryError::config("Step interval must be greater than 0"));
        }

        if self.countdown_tick.is_zero() {
            return Err(LotteryError::config("Countdown tick must be greater than 0"));
        }

        Ok(())
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.session_key, "current");
        assert_eq!(config.step_interval, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_session_key_falls_back() {
        let config = SessionConfig::new("   ");
        assert_eq!(config.session_key, DEFAULT_SESSION_KEY);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(SessionConfig::new("a/b").validate().is_err());
        assert!(SessionConfig::default()
            .with_client_id(" ")
            .validate()
            .is_err());
        assert!(SessionConfig::default()
            .with_step_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
