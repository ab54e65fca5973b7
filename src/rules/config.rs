//! Rule configuration — versioned canonical shape and legacy migration.
//!
//! Rule configs are stored as untyped JSON blobs with an evolving shape.
//! `normalize()` is the single read-time entry point: it migrates legacy
//! (version-less) blobs to the canonical V2 shape and enforces that the
//! stored destination agrees with the rule's declared type. Migration is a
//! pure function; a mismatch is rejected, never silently corrected.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::rules::condition::Condition;

/// Canonical config version.
pub const CONFIG_VERSION: u32 = 2;

/// The declared destination type of a rule row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestinationKind {
    Email,
    Webhook,
    Telegram,
}

impl DestinationKind {
    /// The string tag stored in the DB type column.
    pub fn type_tag(&self) -> &'static str {
        match self {
            DestinationKind::Email => "EMAIL",
            DestinationKind::Webhook => "WEBHOOK",
            DestinationKind::Telegram => "TELEGRAM",
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

impl FromStr for DestinationKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMAIL" => Ok(DestinationKind::Email),
            "WEBHOOK" => Ok(DestinationKind::Webhook),
            "TELEGRAM" => Ok(DestinationKind::Telegram),
            other => Err(format!("unknown destination kind: {other}")),
        }
    }
}

/// A delivery target, immutable once normalized for a dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Destination {
    Email {
        to: String,
    },
    Webhook {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Telegram {
        #[serde(rename = "chatId")]
        chat_id: String,
        #[serde(default, rename = "parseMode", skip_serializing_if = "Option::is_none")]
        parse_mode: Option<String>,
    },
}

impl Destination {
    pub fn kind(&self) -> DestinationKind {
        match self {
            Destination::Email { .. } => DestinationKind::Email,
            Destination::Webhook { .. } => DestinationKind::Webhook,
            Destination::Telegram { .. } => DestinationKind::Telegram,
        }
    }
}

/// Named string templates rendered against the event snapshot.
pub type TemplateSet = BTreeMap<String, String>;

/// Canonical (V2) rule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub version: u32,
    pub destination: Destination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<TemplateSet>,
}

/// Normalize a stored config blob for a rule of the given declared kind.
///
/// - V2 blobs are validated (destination type must equal the declared type)
///   and returned unchanged — normalization is idempotent.
/// - Version-less blobs are treated as legacy V1 and reshaped.
/// - Anything else fails with [`ConfigError::Unnormalizable`].
pub fn normalize(
    raw: &serde_json::Value,
    declared: DestinationKind,
) -> Result<RuleConfig, ConfigError> {
    let obj = raw.as_object().ok_or_else(|| ConfigError::Unnormalizable {
        reason: "config is not a JSON object".into(),
    })?;

    match obj.get("version").and_then(|v| v.as_u64()) {
        Some(2) => {
            let config: RuleConfig =
                serde_json::from_value(raw.clone()).map_err(|e| ConfigError::Unnormalizable {
                    reason: format!("invalid v2 config: {e}"),
                })?;
            check_kind(&config.destination, declared)?;
            Ok(config)
        }
        Some(other) => Err(ConfigError::Unnormalizable {
            reason: format!("unsupported config version {other}"),
        }),
        None => normalize_legacy(raw, declared),
    }
}

/// Reshape a legacy (version-less) blob into the canonical form.
///
/// Legacy configs carried destination fields at the top level; the declared
/// rule type tells us which shape to expect.
fn normalize_legacy(
    raw: &serde_json::Value,
    declared: DestinationKind,
) -> Result<RuleConfig, ConfigError> {
    let destination = match declared {
        DestinationKind::Email => {
            let to = raw
                .get("to")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ConfigError::Unnormalizable {
                    reason: "legacy email config missing 'to'".into(),
                })?
                .to_string();
            Destination::Email { to }
        }
        DestinationKind::Webhook => {
            let url = raw
                .get("url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ConfigError::Unnormalizable {
                    reason: "legacy webhook config missing 'url'".into(),
                })?
                .to_string();
            let headers = raw
                .get("headers")
                .and_then(|v| v.as_object())
                .map(|map| {
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            Destination::Webhook { url, headers }
        }
        DestinationKind::Telegram => {
            // Legacy rows stored chat ids as either strings or numbers.
            let chat_id = match raw.get("chatId") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => {
                    return Err(ConfigError::Unnormalizable {
                        reason: "legacy telegram config missing 'chatId'".into(),
                    });
                }
            };
            let parse_mode = raw
                .get("parseMode")
                .and_then(|v| v.as_str())
                .map(String::from);
            Destination::Telegram {
                chat_id,
                parse_mode,
            }
        }
    };

    let conditions = raw
        .get("conditions")
        .filter(|v| !v.is_null())
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ConfigError::Unnormalizable {
            reason: format!("legacy config has invalid conditions: {e}"),
        })?;

    let templates = raw
        .get("templates")
        .filter(|v| !v.is_null())
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| ConfigError::Unnormalizable {
            reason: format!("legacy config has invalid templates: {e}"),
        })?;

    Ok(RuleConfig {
        version: CONFIG_VERSION,
        destination,
        conditions,
        templates,
    })
}

fn check_kind(destination: &Destination, declared: DestinationKind) -> Result<(), ConfigError> {
    if destination.kind() != declared {
        return Err(ConfigError::DestinationTypeMismatch {
            declared: declared.to_string(),
            found: destination.kind().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_email_config_migrates() {
        let raw = serde_json::json!({"to": "a@example.com"});
        let config = normalize(&raw, DestinationKind::Email).unwrap();
        assert_eq!(config.version, 2);
        assert_eq!(
            config.destination,
            Destination::Email {
                to: "a@example.com".into()
            }
        );
        assert!(config.conditions.is_none());
    }

    #[test]
    fn legacy_webhook_config_migrates_with_headers() {
        let raw = serde_json::json!({
            "url": "https://hooks.example/x",
            "headers": {"X-Token": "abc"}
        });
        let config = normalize(&raw, DestinationKind::Webhook).unwrap();
        match config.destination {
            Destination::Webhook { url, headers } => {
                assert_eq!(url, "https://hooks.example/x");
                assert_eq!(headers.get("X-Token").map(String::as_str), Some("abc"));
            }
            other => panic!("expected webhook destination, got {other:?}"),
        }
    }

    #[test]
    fn legacy_telegram_numeric_chat_id_migrates() {
        let raw = serde_json::json!({"chatId": 123456789});
        let config = normalize(&raw, DestinationKind::Telegram).unwrap();
        assert_eq!(
            config.destination,
            Destination::Telegram {
                chat_id: "123456789".into(),
                parse_mode: None
            }
        );
    }

    #[test]
    fn v2_mismatched_destination_is_rejected() {
        let raw = serde_json::json!({
            "version": 2,
            "destination": {"type": "EMAIL", "to": "a@example.com"}
        });
        let err = normalize(&raw, DestinationKind::Webhook).unwrap_err();
        assert!(matches!(err, ConfigError::DestinationTypeMismatch { .. }));
    }

    #[test]
    fn v2_config_roundtrips_unchanged() {
        let raw = serde_json::json!({
            "version": 2,
            "destination": {"type": "WEBHOOK", "url": "https://h.example/x", "headers": {}},
            "conditions": {"type": "match", "field": "subject",
                           "operator": "contains", "value": "alert"}
        });
        let config = normalize(&raw, DestinationKind::Webhook).unwrap();
        // Idempotent: re-serializing and normalizing again yields the same config.
        let reserialized = serde_json::to_value(&config).unwrap();
        let again = normalize(&reserialized, DestinationKind::Webhook).unwrap();
        assert_eq!(config.destination, again.destination);
        assert_eq!(config.version, again.version);
    }

    #[test]
    fn unrecognized_shape_fails_closed() {
        let raw = serde_json::json!({"something": "else"});
        let err = normalize(&raw, DestinationKind::Email).unwrap_err();
        assert!(matches!(err, ConfigError::Unnormalizable { .. }));

        let err = normalize(&serde_json::json!("not an object"), DestinationKind::Email)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Unnormalizable { .. }));
    }

    #[test]
    fn unsupported_version_fails_closed() {
        let raw = serde_json::json!({"version": 3, "destination": {"type": "EMAIL", "to": "x"}});
        let err = normalize(&raw, DestinationKind::Email).unwrap_err();
        assert!(matches!(err, ConfigError::Unnormalizable { .. }));
    }

    #[test]
    fn legacy_config_carries_conditions_and_templates() {
        let raw = serde_json::json!({
            "to": "ops@example.com",
            "conditions": {"type": "match", "field": "subject",
                           "operator": "startsWith", "value": "[ALERT]"},
            "templates": {"subject": "Fwd: {{email.subject}}"}
        });
        let config = normalize(&raw, DestinationKind::Email).unwrap();
        assert!(config.conditions.is_some());
        assert_eq!(
            config.templates.unwrap().get("subject").map(String::as_str),
            Some("Fwd: {{email.subject}}")
        );
    }

    #[test]
    fn destination_kind_display_parse() {
        for kind in [
            DestinationKind::Email,
            DestinationKind::Webhook,
            DestinationKind::Telegram,
        ] {
            let s = kind.to_string();
            let parsed: DestinationKind = s.parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }
}
