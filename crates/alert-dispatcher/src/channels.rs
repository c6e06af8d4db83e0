//! Delivery channels: Telegram, Slack webhook, and the opt-in email and
//! generic-webhook relays.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::json;

use crate::{Alert, AlertLevel, ChannelError, ChannelKind};

pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;
    fn name(&self) -> &str;
    async fn send(&self, alert: &Alert) -> Result<Duration, ChannelError>;
}

fn details_lines(alert: &Alert) -> String {
    let Some(details) = alert.details.as_ref().and_then(|d| d.as_object()) else {
        return String::new();
    };
    let mut out = String::from("\n*Details:*\n");
    for (key, value) in details {
        out.push_str(&format!("• {}: {}\n", key, value));
    }
    out
}

pub struct TelegramChannel {
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            client: reqwest::Client::new(),
        }
    }

    fn format_message(alert: &Alert) -> String {
        let mut message = format!(
            "{} *{}*\n\n*Level:* {}\n*Component:* {}\n*Time:* {}\n\n{}\n",
            alert.level.emoji(),
            alert.title,
            alert.level.as_str().to_uppercase(),
            alert.component,
            alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
            alert.message,
        );
        message.push_str(&details_lines(alert));

        if message.chars().count() > TELEGRAM_MESSAGE_LIMIT {
            message = message.chars().take(TELEGRAM_MESSAGE_LIMIT).collect();
        }
        message
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, alert: &Alert) -> Result<Duration, ChannelError> {
        let start = Instant::now();
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": Self::format_message(alert),
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!(
                "Telegram API error: {} - {}",
                status, body
            )));
        }
        Ok(start.elapsed())
    }
}

pub struct SlackChannel {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    fn color(level: AlertLevel) -> &'static str {
        match level {
            AlertLevel::Info => "#36a64f",
            AlertLevel::Warning => "#ff9500",
            AlertLevel::Error => "#ff0000",
            AlertLevel::Critical => "#8b0000",
        }
    }
}

#[async_trait]
impl AlertChannel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, alert: &Alert) -> Result<Duration, ChannelError> {
        let start = Instant::now();

        let mut fields = vec![
            json!({"title": "Level", "value": alert.level.as_str().to_uppercase(), "short": true}),
            json!({"title": "Component", "value": alert.component, "short": true}),
            json!({
                "title": "Timestamp",
                "value": alert.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                "short": true,
            }),
        ];
        if let Some(details) = alert.details.as_ref().and_then(|d| d.as_object()) {
            let text = details
                .iter()
                .map(|(k, v)| format!("• {}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n");
            fields.push(json!({"title": "Details", "value": text, "short": false}));
        }

        let payload = json!({
            "username": "MarketPulse Monitor",
            "icon_emoji": ":warning:",
            "attachments": [{
                "color": Self::color(alert.level),
                "title": alert.title,
                "text": alert.message,
                "fields": fields,
                "footer": "MarketPulse",
                "ts": alert.timestamp.timestamp(),
            }],
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!(
                "Slack webhook error: {} - {}",
                status, body
            )));
        }
        Ok(start.elapsed())
    }
}

/// Opt-in SMTP channel.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailChannel {
    pub fn new(
        host: &str,
        port: u16,
        username: Option<String>,
        password: Option<String>,
        from: &str,
        to: &[String],
    ) -> Result<Self, ChannelError> {
        let from: Mailbox = from
            .parse()
            .map_err(|e| ChannelError::Config(format!("Invalid from address: {}", e)))?;
        let to: Vec<Mailbox> = to.iter().filter_map(|addr| addr.parse().ok()).collect();
        if to.is_empty() {
            return Err(ChannelError::Config(
                "No valid alert email recipients".into(),
            ));
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| ChannelError::Config(format!("SMTP transport error: {}", e)))?
            .port(port);
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, alert: &Alert) -> Result<Duration, ChannelError> {
        let start = Instant::now();
        let subject = format!(
            "[{}] {} — {}",
            alert.level.as_str().to_uppercase(),
            alert.component,
            alert.title
        );
        let body = format!("{}\n{}", alert.message, details_lines(alert));

        for recipient in &self.to {
            let email = Message::builder()
                .from(self.from.clone())
                .to(recipient.clone())
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())
                .map_err(|e| ChannelError::Config(e.to_string()))?;

            self.transport
                .send(email)
                .await
                .map_err(|e| ChannelError::Api(format!("SMTP send error: {}", e)))?;
        }
        Ok(start.elapsed())
    }
}

/// Opt-in generic webhook: POSTs the alert as JSON.
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<Duration, ChannelError> {
        let start = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Api(format!(
                "Webhook error: {}",
                response.status()
            )));
        }
        Ok(start.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_telegram_message_truncated_to_limit() {
        let alert = Alert {
            title: "t".repeat(5000),
            message: "m".into(),
            level: AlertLevel::Warning,
            component: "database".into(),
            timestamp: Utc::now(),
            details: None,
        };
        let message = TelegramChannel::format_message(&alert);
        assert!(message.len() <= TELEGRAM_MESSAGE_LIMIT);
    }

    #[test]
    fn test_telegram_message_contains_details() {
        let alert = Alert {
            title: "Slow Query Detected".into(),
            message: "Query took 2.30 seconds to execute".into(),
            level: AlertLevel::Warning,
            component: "database".into(),
            timestamp: Utc::now(),
            details: Some(serde_json::json!({"query_hash": "abc123def456"})),
        };
        let message = TelegramChannel::format_message(&alert);
        assert!(message.contains("Slow Query Detected"));
        assert!(message.contains("query_hash"));
        assert!(message.contains("WARNING"));
    }

    #[test]
    fn test_slack_colors_by_severity() {
        assert_eq!(SlackChannel::color(AlertLevel::Info), "#36a64f");
        assert_eq!(SlackChannel::color(AlertLevel::Critical), "#8b0000");
    }
}
