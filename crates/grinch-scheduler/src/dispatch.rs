//! Notification dispatch — actually sends alerts to recipients.
//! Supports: SMTP email, Telegram Bot API, Discord Webhook, HTTP Webhook, log.
//!
//! Recipients are written in the configuration as plain strings:
//! ```text
//! ops@example.org / mailto:ops@example.org   → SMTP
//! telegram:-100123456                        → Telegram chat
//! discord:https://discord.com/api/webhooks/… → Discord embed
//! webhook:https://hooks.example.org/grinch   → JSON POST
//! log                                        → tracing only
//! ```

use std::fmt;
use std::time::Duration;

use grinch_core::config::{NotifyConfig, SmtpConfig};
use grinch_core::error::{GrinchError, Result};
use grinch_core::traits::{Alert, AlertPriority};

/// Where one alert copy goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyTarget {
    Email { address: String },
    /// Telegram Bot API — send via `sendMessage`.
    Telegram { chat_id: String },
    Discord { webhook_url: String },
    /// Generic HTTP webhook — POST with JSON body.
    Webhook { url: String },
    Log,
}

impl NotifyTarget {
    /// Parse a recipient identifier. Unknown schemes are configuration errors.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "log" {
            return Ok(Self::Log);
        }

        let target = match raw.split_once(':') {
            Some(("mailto", address)) => Self::Email {
                address: address.to_string(),
            },
            Some(("telegram", chat_id)) => Self::Telegram {
                chat_id: chat_id.to_string(),
            },
            Some(("discord", url)) => Self::Discord {
                webhook_url: url.to_string(),
            },
            Some(("webhook", url)) => Self::Webhook {
                url: url.to_string(),
            },
            Some((scheme, _)) => {
                return Err(GrinchError::Config(format!(
                    "recipient '{raw}' has unknown scheme '{scheme}'"
                )));
            }
            None => Self::Email {
                address: raw.to_string(),
            },
        };

        target.validate(raw)?;
        Ok(target)
    }

    fn validate(&self, raw: &str) -> Result<()> {
        let ok = match self {
            Self::Email { address } => is_address(address),
            Self::Telegram { chat_id } => !chat_id.is_empty(),
            Self::Discord { webhook_url: url } | Self::Webhook { url } => {
                url.starts_with("https://") || url.starts_with("http://")
            }
            Self::Log => true,
        };
        if ok {
            Ok(())
        } else {
            Err(GrinchError::Config(format!("malformed recipient '{raw}'")))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Email { .. } => "email",
            Self::Telegram { .. } => "telegram",
            Self::Discord { .. } => "discord",
            Self::Webhook { .. } => "webhook",
            Self::Log => "log",
        }
    }
}

fn is_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((user, host)) => !user.is_empty() && !host.is_empty() && !host.contains('@'),
        None => false,
    }
}

impl fmt::Display for NotifyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email { address } => write!(f, "mailto:{address}"),
            Self::Telegram { chat_id } => write!(f, "telegram:{chat_id}"),
            Self::Discord { webhook_url } => write!(f, "discord:{webhook_url}"),
            Self::Webhook { url } => write!(f, "webhook:{url}"),
            Self::Log => f.write_str("log"),
        }
    }
}

/// Credentials and clients shared by every send.
pub struct Transports {
    client: reqwest::Client,
    smtp: Option<SmtpConfig>,
    telegram_bot_token: Option<String>,
    timeout: Duration,
}

impl Transports {
    pub fn from_config(config: &NotifyConfig, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            smtp: config.smtp.clone(),
            telegram_bot_token: config.telegram_bot_token.clone(),
            timeout,
        }
    }
}

/// Dispatch an alert to one target.
pub async fn dispatch(alert: &Alert, target: &NotifyTarget, transports: &Transports) -> Result<()> {
    match target {
        NotifyTarget::Email { address } => match &transports.smtp {
            Some(smtp) => send_email(smtp, address, alert).await,
            None => Err(GrinchError::Notify(format!(
                "no [notify.smtp] configured for {address}"
            ))),
        },
        NotifyTarget::Telegram { chat_id } => match &transports.telegram_bot_token {
            Some(token) => send_telegram(transports, token, chat_id, alert).await,
            None => Err(GrinchError::Notify(
                "no notify.telegram_bot_token configured".into(),
            )),
        },
        NotifyTarget::Discord { webhook_url } => send_discord(transports, webhook_url, alert).await,
        NotifyTarget::Webhook { url } => send_webhook(transports, url, alert).await,
        NotifyTarget::Log => {
            tracing::warn!("🚨 {}\n{}", alert.title(), alert.body());
            Ok(())
        }
    }
}

/// Send alert via SMTP (async lettre, STARTTLS).
async fn send_email(smtp: &SmtpConfig, to: &str, alert: &Alert) -> Result<()> {
    use lettre::{
        AsyncSmtpTransport, AsyncTransport, Message, message::Mailbox,
        message::header::ContentType, transport::smtp::authentication::Credentials,
    };

    let from: Mailbox = smtp
        .from
        .parse()
        .map_err(|e| GrinchError::Notify(format!("Invalid from: {e}")))?;
    let to_mailbox: Mailbox = to
        .parse()
        .map_err(|e| GrinchError::Notify(format!("Invalid to: {e}")))?;

    let email = Message::builder()
        .from(from)
        .to(to_mailbox)
        .subject(alert.title())
        .header(ContentType::TEXT_PLAIN)
        .body(alert.body())
        .map_err(|e| GrinchError::Notify(format!("Build email: {e}")))?;

    let creds = Credentials::new(smtp.username.clone(), smtp.password.clone());
    let mailer = AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&smtp.host)
        .map_err(|e| GrinchError::Notify(format!("SMTP relay: {e}")))?
        .port(smtp.port)
        .credentials(creds)
        .build();

    mailer
        .send(email)
        .await
        .map_err(|e| GrinchError::Notify(format!("SMTP send: {e}")))?;

    tracing::info!("📤 Alert emailed to {to}: {}", alert.title());
    Ok(())
}

fn priority_emoji(priority: AlertPriority) -> &'static str {
    match priority {
        AlertPriority::Urgent => "🚨",
        AlertPriority::High => "⚠️",
        AlertPriority::Normal => "📢",
        AlertPriority::Low => "ℹ️",
    }
}

/// Send alert via Telegram Bot API.
async fn send_telegram(transports: &Transports, bot_token: &str, chat_id: &str, alert: &Alert) -> Result<()> {
    let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
    let text = format!(
        "{} *{}*\n\n{}\n\n_{}_",
        priority_emoji(alert.priority),
        escape_markdown(&alert.title()),
        escape_markdown(&alert.body()),
        alert.timestamp.format("%H:%M:%S UTC")
    );

    let resp = transports
        .client
        .post(&url)
        .json(&serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        }))
        .timeout(transports.timeout)
        .send()
        .await
        .map_err(|e| GrinchError::Notify(format!("Telegram send failed: {e}")))?;

    if resp.status().is_success() {
        tracing::info!("✅ Telegram alert sent: {}", alert.title());
        Ok(())
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(GrinchError::Notify(format!("Telegram API error {status}: {body}")))
    }
}

/// Send alert via Discord Webhook.
async fn send_discord(transports: &Transports, webhook_url: &str, alert: &Alert) -> Result<()> {
    let color = match alert.priority {
        AlertPriority::Urgent => 0xFF0000,
        AlertPriority::High => 0xFF8800,
        AlertPriority::Normal => 0x00AAFF,
        AlertPriority::Low => 0x888888,
    };

    let resp = transports
        .client
        .post(webhook_url)
        .json(&serde_json::json!({
            "embeds": [{
                "title": alert.title(),
                "description": alert.body(),
                "color": color,
                "footer": {
                    "text": format!("{} • {}", alert.event_id, alert.timestamp.format("%H:%M:%S UTC"))
                }
            }]
        }))
        .timeout(transports.timeout)
        .send()
        .await
        .map_err(|e| GrinchError::Notify(format!("Discord send failed: {e}")))?;

    if resp.status().is_success() {
        tracing::info!("✅ Discord alert sent: {}", alert.title());
        Ok(())
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(GrinchError::Notify(format!("Discord webhook error {status}: {body}")))
    }
}

/// Send alert via generic HTTP webhook. The body is the alert itself plus
/// the rendered title and text.
async fn send_webhook(transports: &Transports, url: &str, alert: &Alert) -> Result<()> {
    let mut payload = serde_json::to_value(alert)?;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("title".into(), alert.title().into());
        obj.insert("body".into(), alert.body().into());
    }

    let resp = transports
        .client
        .post(url)
        .json(&payload)
        .timeout(transports.timeout)
        .send()
        .await
        .map_err(|e| GrinchError::Notify(format!("Webhook send failed: {e}")))?;

    if resp.status().is_success() {
        tracing::info!("✅ Webhook alert sent to {url}: {}", alert.title());
        Ok(())
    } else {
        let status = resp.status();
        Err(GrinchError::Notify(format!("Webhook error {status}")))
    }
}

/// Escape Telegram MarkdownV1 special characters.
fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}
