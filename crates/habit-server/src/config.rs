use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, FixedOffset};

use habit_types::ReminderTime;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

/// Server settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub token_ttl: Duration,
    /// Offset in which habit days and reminder times are evaluated.
    pub tz: FixedOffset,
    /// Local time of the daily streak carry-over.
    pub carryover_at: ReminderTime,
    /// Reminders are only logged when unset.
    pub telegram_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let port: u16 = var("HABIT_PORT", "8000")
            .parse()
            .context("HABIT_PORT must be a port number")?;
        let ttl_minutes: i64 = var("HABIT_TOKEN_TTL_MINUTES", "30")
            .parse()
            .context("HABIT_TOKEN_TTL_MINUTES must be a whole number of minutes")?;
        let tz: FixedOffset = var("HABIT_UTC_OFFSET", "+03:00")
            .parse()
            .map_err(|e| anyhow::anyhow!("HABIT_UTC_OFFSET must look like +03:00: {}", e))?;
        let carryover_at: ReminderTime = var("HABIT_CARRYOVER_AT", "23:59")
            .parse()
            .context("HABIT_CARRYOVER_AT")?;

        Ok(Self {
            jwt_secret: var("HABIT_JWT_SECRET", ""),
            db_path: var("HABIT_DB_PATH", "habits.db").into(),
            host: var("HABIT_HOST", "0.0.0.0"),
            port,
            token_ttl: Duration::minutes(ttl_minutes),
            tz,
            carryover_at,
            telegram_token: get("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn secret_is_placeholder(&self) -> bool {
        self.jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.db_path, PathBuf::from("habits.db"));
        assert_eq!(config.token_ttl, Duration::minutes(30));
        assert_eq!(config.tz, FixedOffset::east_opt(3 * 3600).unwrap());
        assert_eq!(config.carryover_at.to_string(), "23:59");
        assert!(config.telegram_token.is_none());
        assert!(config.secret_is_placeholder());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("HABIT_JWT_SECRET", "s3cret"),
            ("HABIT_PORT", "9100"),
            ("HABIT_TOKEN_TTL_MINUTES", "5"),
            ("HABIT_UTC_OFFSET", "-05:30"),
            ("HABIT_CARRYOVER_AT", "0:05"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ])
        .unwrap();
        assert!(!config.secret_is_placeholder());
        assert_eq!(config.port, 9100);
        assert_eq!(config.token_ttl, Duration::minutes(5));
        assert_eq!(config.tz, FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap());
        assert_eq!(config.carryover_at.to_string(), "00:05");
        assert_eq!(config.telegram_token.as_deref(), Some("123:abc"));
    }

    #[test]
    fn rejects_placeholders_and_garbage() {
        let placeholder = config(&[("HABIT_JWT_SECRET", "dev-secret-change-me")]).unwrap();
        assert!(placeholder.secret_is_placeholder());

        assert!(config(&[("HABIT_PORT", "eighty")]).is_err());
        assert!(config(&[("HABIT_UTC_OFFSET", "Moscow")]).is_err());
        assert!(config(&[("HABIT_CARRYOVER_AT", "24:00")]).is_err());

        let blank = config(&[("TELEGRAM_BOT_TOKEN", "  ")]).unwrap();
        assert!(blank.telegram_token.is_none());
    }
}
