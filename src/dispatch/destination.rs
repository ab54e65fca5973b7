//! Destination capabilities — the delivery seam of the engine.
//!
//! The coordinator only talks to [`DestinationGateway`]; the concrete
//! gateway routes to SMTP (lettre), HTTP webhooks, and the Telegram Bot API
//! (reqwest). Destinations that are not configured fail the individual
//! dispatch, never the process.

use std::collections::BTreeMap;

use async_trait::async_trait;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::config::{SmtpConfig, TelegramConfig};
use crate::error::DestinationError;

/// Result of a successful destination call.
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    /// Opaque reference from the destination (message id, status line) for
    /// the audit trail.
    pub reference: Option<String>,
}

/// Abstract delivery targets the engine can invoke.
#[async_trait]
pub trait DestinationGateway: Send + Sync {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        text: &str,
        html: Option<&str>,
    ) -> Result<SendOutcome, DestinationError>;

    async fn post_webhook(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<SendOutcome, DestinationError>;

    async fn send_telegram(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<SendOutcome, DestinationError>;
}

/// Production gateway: SMTP relay + HTTP client.
pub struct Gateway {
    smtp: Option<SmtpConfig>,
    telegram: Option<TelegramConfig>,
    client: reqwest::Client,
}

impl Gateway {
    pub fn new(smtp: Option<SmtpConfig>, telegram: Option<TelegramConfig>) -> Self {
        Self {
            smtp,
            telegram,
            client: reqwest::Client::new(),
        }
    }

    fn telegram_api_url(token: &str, method: &str) -> String {
        format!("https://api.telegram.org/bot{token}/{method}")
    }
}

#[async_trait]
impl DestinationGateway for Gateway {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        text: &str,
        html: Option<&str>,
    ) -> Result<SendOutcome, DestinationError> {
        let config = self.smtp.as_ref().ok_or_else(|| DestinationError::SendFailed {
            kind: "email".into(),
            reason: "SMTP relay not configured".into(),
        })?;

        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| DestinationError::SendFailed {
                kind: "email".into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        let builder = Message::builder()
            .from(config.from_address.parse().map_err(|e| {
                DestinationError::InvalidAddress {
                    kind: "email".into(),
                    reason: format!("invalid from address: {e}"),
                }
            })?)
            .to(to.parse().map_err(|e| DestinationError::InvalidAddress {
                kind: "email".into(),
                reason: format!("invalid to address: {e}"),
            })?)
            .subject(subject);

        let email = match html {
            Some(html) => builder
                .multipart(MultiPart::alternative_plain_html(
                    text.to_string(),
                    html.to_string(),
                ))
                .map_err(|e| DestinationError::SendFailed {
                    kind: "email".into(),
                    reason: format!("failed to build email: {e}"),
                })?,
            None => builder.body(text.to_string()).map_err(|e| {
                DestinationError::SendFailed {
                    kind: "email".into(),
                    reason: format!("failed to build email: {e}"),
                }
            })?,
        };

        let response = transport.send(&email).map_err(|e| DestinationError::SendFailed {
            kind: "email".into(),
            reason: format!("SMTP send failed: {e}"),
        })?;

        info!(to, "Email dispatched via SMTP");
        Ok(SendOutcome {
            reference: Some(response.code().to_string()),
        })
    }

    async fn post_webhook(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<SendOutcome, DestinationError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| DestinationError::SendFailed {
            kind: "webhook".into(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DestinationError::SendFailed {
                kind: "webhook".into(),
                reason: format!("POST {url} returned {status}: {detail}"),
            });
        }

        info!(url, status = %status, "Webhook dispatched");
        Ok(SendOutcome {
            reference: Some(status.as_u16().to_string()),
        })
    }

    async fn send_telegram(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<SendOutcome, DestinationError> {
        let config = self
            .telegram
            .as_ref()
            .ok_or_else(|| DestinationError::SendFailed {
                kind: "telegram".into(),
                reason: "Telegram bot token not configured".into(),
            })?;

        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = serde_json::Value::String(mode.to_string());
        }

        let url = Self::telegram_api_url(config.bot_token.expose_secret(), "sendMessage");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DestinationError::SendFailed {
                kind: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(DestinationError::SendFailed {
                kind: "telegram".into(),
                reason: format!("sendMessage returned {status}: {detail}"),
            });
        }

        // Pull the message id out of the Bot API envelope for the audit trail.
        let reference = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v["result"]["message_id"].as_i64())
            .map(|id| id.to_string());

        info!(chat_id, "Telegram message dispatched");
        Ok(SendOutcome { reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telegram_api_url_shape() {
        assert_eq!(
            Gateway::telegram_api_url("123:ABC", "sendMessage"),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }

    #[tokio::test]
    async fn unconfigured_smtp_fails_the_send() {
        let gateway = Gateway::new(None, None);
        let err = gateway
            .send_email("a@example.com", "s", "t", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DestinationError::SendFailed { .. }));
    }

    #[tokio::test]
    async fn unconfigured_telegram_fails_the_send() {
        let gateway = Gateway::new(None, None);
        let err = gateway.send_telegram("42", "hi", None).await.unwrap_err();
        assert!(matches!(err, DestinationError::SendFailed { .. }));
    }
}
