use std::time::Duration;

use reqwest::Client;
use serde::Serialize;

use crate::config::{MonitorConfig, TelegramConfig};
use crate::proxy::PoolStatus;
use crate::types::{Availability, ProbeReport};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// What gets logged and POSTed when a probe warrants attention.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub report: ProbeReport,
    pub reason: String,
    pub cycle: u64,
    pub proxies: PoolStatus,
    /// Where a human should go, fast.
    pub booking_url: String,
}

/// Fan-out to every configured channel. Delivery failures are logged and
/// swallowed; a dead webhook must not stop the monitor.
pub struct Alerter {
    http: Client,
    webhook_url: Option<String>,
    telegram: Option<TelegramConfig>,
}

impl Alerter {
    pub fn new(config: &MonitorConfig) -> Result<Self, reqwest::Error> {
        Ok(Alerter {
            http: Client::builder().timeout(Duration::from_secs(10)).build()?,
            webhook_url: config.webhook_url.clone(),
            telegram: config.telegram.clone(),
        })
    }

    pub async fn send(&self, payload: &AlertPayload) {
        log::warn!(
            "ALERT (cycle {}): {} -- {}",
            payload.cycle,
            payload.report,
            payload.reason
        );

        if self.telegram.is_some() {
            self.send_telegram(&alert_message(payload)).await;
        }
        if let Some(url) = &self.webhook_url
            && let Err(e) = self.post_webhook(url, payload).await
        {
            log::warn!("Webhook delivery failed: {}", e);
        }
    }

    /// One startup message so recipients know the monitor is alive and what
    /// it is watching.
    pub async fn announce_start(&self, config: &MonitorConfig, proxies: PoolStatus) {
        if self.telegram.is_none() {
            return;
        }
        self.send_telegram(&start_message(config, proxies)).await;
    }

    async fn post_webhook(&self, url: &str, payload: &AlertPayload) -> Result<(), reqwest::Error> {
        self.http
            .post(url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_telegram(&self, text: &str) {
        let Some(telegram) = &self.telegram else {
            return;
        };
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, telegram.bot_token);

        for chat_id in &telegram.chat_ids {
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown",
                "disable_web_page_preview": false,
            });
            match self.http.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    log::info!("Telegram alert delivered to chat {}", chat_id);
                }
                Ok(resp) => {
                    log::warn!(
                        "Telegram rejected message for chat {}: HTTP {}",
                        chat_id,
                        resp.status()
                    );
                }
                Err(e) => log::warn!("Telegram delivery to chat {} failed: {}", chat_id, e),
            }
        }
    }
}

fn alert_message(payload: &AlertPayload) -> String {
    let headline = match payload.report.availability {
        Availability::SlotsDetected => "✅ Possible appointments found!",
        Availability::Inconclusive => "❓ Availability state unclear, check manually",
        Availability::NoSlots => "❌ No appointments available",
        Availability::Empty => "⚠️ Empty response from the widget",
    };

    let mut message = format!(
        "🚨 *SLOT MONITOR* 🚨\n\n{}\n\n\
         • Result: {}\n\
         • Reason: {}\n\
         • Response: {} chars via {}\n\
         • Cycle: #{}\n\
         • Proxies: {}\n\n\
         🔗 [Open booking page]({})",
        headline,
        payload.report.availability,
        payload.reason,
        payload.report.content_len,
        payload.report.route,
        payload.cycle,
        payload.proxies,
        payload.booking_url,
    );
    if payload.report.availability == Availability::SlotsDetected {
        message.push_str("\n\n⚡ Act fast, slots can vanish within minutes.");
    }
    message
}

fn start_message(config: &MonitorConfig, proxies: PoolStatus) -> String {
    format!(
        "🤖 *SLOT MONITOR STARTED*\n\n\
         • Watching: [{}]({})\n\
         • Interval: {}s\n\
         • Proxies: {}\n\n\
         You will be notified as soon as availability appears.",
        config.target.service_id,
        config.target.widget_url(),
        config.interval.as_secs(),
        proxies,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Route;

    fn payload(availability: Availability) -> AlertPayload {
        let report = ProbeReport::new(
            availability,
            vec!["Hueco libre".to_string()],
            "<div class=\"clsDivDatetimeSlot\">Hueco libre</div>",
            Route::Proxy("10.0.0.1:8080".to_string()),
        );
        AlertPayload {
            report,
            reason: "slot markup present".to_string(),
            cycle: 7,
            proxies: PoolStatus {
                total: 5,
                quarantined: 1,
            },
            booking_url: "https://example.test/widget".to_string(),
        }
    }

    #[test]
    fn alert_message_for_slots_urges_action() {
        let message = alert_message(&payload(Availability::SlotsDetected));
        assert!(message.contains("Possible appointments found"));
        assert!(message.contains("Cycle: #7"));
        assert!(message.contains("4/5 proxies available"));
        assert!(message.contains("Act fast"));
        assert!(message.contains("https://example.test/widget"));
    }

    #[test]
    fn inconclusive_message_does_not_urge_action() {
        let message = alert_message(&payload(Availability::Inconclusive));
        assert!(message.contains("check manually"));
        assert!(!message.contains("Act fast"));
    }

    #[test]
    fn start_message_names_target_and_interval() {
        let config = MonitorConfig::default();
        let message = start_message(
            &config,
            PoolStatus {
                total: 0,
                quarantined: 0,
            },
        );
        assert!(message.contains("bkt873048"));
        assert!(message.contains("Interval: 60s"));
        assert!(message.contains("no proxies"));
    }

    #[test]
    fn payload_serializes_for_webhooks() {
        let json = serde_json::to_value(payload(Availability::SlotsDetected)).unwrap();
        assert_eq!(json["report"]["availability"], "slots_detected");
        assert_eq!(json["cycle"], 7);
        assert_eq!(json["report"]["route"]["kind"], "proxy");
    }
}
