//! Inbound email event — the single trigger type of the engine.
//!
//! Events are produced by an external source (IMAP poller or inbound
//! webhook) and queued in the store; the sync task drains them through the
//! dispatch coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound email event, pre-parsed by the event source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailEvent {
    /// Stable event identifier.
    pub id: Uuid,
    /// Subject line.
    pub subject: String,
    /// Sender address.
    pub from_address: String,
    /// Human-readable sender name (if available).
    pub from_name: Option<String>,
    /// Recipient address (the owning mailbox).
    pub to_address: String,
    /// Plain-text body.
    pub text_body: Option<String>,
    /// HTML body.
    pub html_body: Option<String>,
    /// When the message was received.
    pub received_at: DateTime<Utc>,
    /// Owning user — scopes which rules are considered.
    pub owner_id: String,
    /// Mailbox the message arrived in.
    pub mailbox_id: String,
    /// Link to a rendered preview of the message, if the source provides one.
    pub preview_url: Option<String>,
}

impl EmailEvent {
    /// Build the flattened variable snapshot used for template rendering.
    ///
    /// All email fields live under `email.*`; missing optionals render as
    /// empty strings downstream.
    pub fn template_vars(&self) -> serde_json::Value {
        serde_json::json!({
            "email": {
                "id": self.id.to_string(),
                "subject": self.subject,
                "fromAddress": self.from_address,
                "fromName": self.from_name,
                "toAddress": self.to_address,
                "textBody": self.text_body,
                "htmlBody": self.html_body,
                "receivedAt": self.received_at.to_rfc3339(),
                "mailboxId": self.mailbox_id,
                "previewUrl": self.preview_url,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event() -> EmailEvent {
        EmailEvent {
            id: Uuid::new_v4(),
            subject: "Quarterly report".into(),
            from_address: "alice@example.com".into(),
            from_name: Some("Alice".into()),
            to_address: "me@inbox.test".into(),
            text_body: Some("Numbers attached.".into()),
            html_body: None,
            received_at: Utc::now(),
            owner_id: "user-1".into(),
            mailbox_id: "mbox-1".into(),
            preview_url: None,
        }
    }

    #[test]
    fn template_vars_nest_under_email() {
        let event = make_event();
        let vars = event.template_vars();
        assert_eq!(vars["email"]["subject"], "Quarterly report");
        assert_eq!(vars["email"]["fromAddress"], "alice@example.com");
        assert!(vars["email"]["htmlBody"].is_null());
    }
}
