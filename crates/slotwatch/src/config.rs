use std::path::PathBuf;
use std::time::Duration;

use crate::types::WidgetTarget;

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_ids: Vec<String>,
}

impl TelegramConfig {
    /// `TELEGRAM_CHAT_ID` takes a comma-separated list so one monitor can
    /// notify several people.
    pub fn parse_chat_ids(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub target: WidgetTarget,
    pub interval: Duration,
    pub proxy_file: Option<PathBuf>,
    pub webhook_url: Option<String>,
    pub telegram: Option<TelegramConfig>,
    /// Replace the first real probe with a fabricated positive so the alert
    /// fan-out can be exercised end to end. Loudly logged, never implicit.
    pub simulate: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            target: WidgetTarget::default(),
            interval: Duration::from_secs(60),
            proxy_file: None,
            webhook_url: None,
            telegram: None,
            simulate: false,
        }
    }
}

impl MonitorConfig {
    pub fn validate(self) -> Result<Self, String> {
        if self.interval < Duration::from_secs(5) {
            return Err(format!(
                "Interval of {}s would hammer the provider; minimum is 5s",
                self.interval.as_secs()
            ));
        }
        if let Some(telegram) = &self.telegram {
            if telegram.bot_token.is_empty() {
                return Err("Telegram bot token is empty".to_string());
            }
            if telegram.chat_ids.is_empty() {
                return Err("Telegram configured without any chat id".to_string());
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_ids_split_and_trimmed() {
        assert_eq!(
            TelegramConfig::parse_chat_ids("123, 456 ,,789"),
            vec!["123", "456", "789"]
        );
        assert!(TelegramConfig::parse_chat_ids("").is_empty());
    }

    #[test]
    fn default_interval_is_a_minute() {
        assert_eq!(MonitorConfig::default().interval, Duration::from_secs(60));
    }

    #[test]
    fn validate_rejects_hammering_intervals() {
        let config = MonitorConfig {
            interval: Duration::from_secs(1),
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_telegram_without_chats() {
        let config = MonitorConfig {
            telegram: Some(TelegramConfig {
                bot_token: "123:abc".to_string(),
                chat_ids: Vec::new(),
            }),
            ..MonitorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(MonitorConfig::default().validate().is_ok());
    }
}
