//! Condition trees — the boolean match language of rule configs.
//!
//! A condition is a recursive tree of `and`/`or`/`not` combinators over
//! `match` leaves. Evaluation is total: malformed or abusive leaves degrade
//! to `false` (fail-closed) instead of erroring, so one bad rule can never
//! crash a dispatch batch.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ingest::event::EmailEvent;

/// Candidate and expected values are truncated to this many bytes before
/// comparison. Oversized bodies cannot blow up regex matching.
pub const MAX_CANDIDATE_LEN: usize = 10_000;

/// Regex patterns longer than this are rejected (evaluate to false).
pub const MAX_PATTERN_LEN: usize = 512;

/// Compiled-program size cap passed to the regex engine.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A boolean condition tree, stored as part of a rule config blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    /// True iff every child is true. An empty list is vacuously true.
    And { conditions: Vec<Condition> },
    /// True iff any child is true. An empty list is false.
    Or { conditions: Vec<Condition> },
    /// Negation.
    Not { condition: Box<Condition> },
    /// Leaf: compare one email field against an expected value.
    Match {
        field: MatchField,
        operator: MatchOperator,
        value: String,
        #[serde(default, rename = "caseSensitive")]
        case_sensitive: bool,
    },
}

/// Which email field a match leaf reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchField {
    Subject,
    FromAddress,
    ToAddress,
    TextBody,
}

/// Text operator applied by a match leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchOperator {
    Contains,
    Equals,
    StartsWith,
    EndsWith,
    Regex,
}

/// Evaluate a condition tree against an email event.
///
/// Pure and total: no side effects, no errors. Tree depth is whatever the
/// stored config contains — bounded at write time, not here.
pub fn matches(event: &EmailEvent, condition: &Condition) -> bool {
    match condition {
        Condition::And { conditions } => conditions.iter().all(|c| matches(event, c)),
        Condition::Or { conditions } => conditions.iter().any(|c| matches(event, c)),
        Condition::Not { condition } => !matches(event, condition),
        Condition::Match {
            field,
            operator,
            value,
            case_sensitive,
        } => match_leaf(event, *field, *operator, value, *case_sensitive),
    }
}

/// Read the named field from the event. Missing optionals read as empty.
fn field_value<'a>(event: &'a EmailEvent, field: MatchField) -> &'a str {
    match field {
        MatchField::Subject => &event.subject,
        MatchField::FromAddress => &event.from_address,
        MatchField::ToAddress => &event.to_address,
        MatchField::TextBody => event.text_body.as_deref().unwrap_or(""),
    }
}

fn match_leaf(
    event: &EmailEvent,
    field: MatchField,
    operator: MatchOperator,
    value: &str,
    case_sensitive: bool,
) -> bool {
    let candidate = truncate(field_value(event, field), MAX_CANDIDATE_LEN);
    let expected = truncate(value, MAX_CANDIDATE_LEN);

    if operator == MatchOperator::Regex {
        return regex_test(candidate, expected, case_sensitive);
    }

    let (candidate, expected) = if case_sensitive {
        (candidate.to_string(), expected.to_string())
    } else {
        (candidate.to_lowercase(), expected.to_lowercase())
    };

    match operator {
        MatchOperator::Contains => candidate.contains(&expected),
        MatchOperator::Equals => candidate == expected,
        MatchOperator::StartsWith => candidate.starts_with(&expected),
        MatchOperator::EndsWith => candidate.ends_with(&expected),
        MatchOperator::Regex => unreachable!("handled above"),
    }
}

/// Test a user-supplied regex against the candidate.
///
/// Patterns are compiled fresh per evaluation, case-insensitive unless the
/// leaf says otherwise. Over-long or invalid patterns fail the match.
fn regex_test(candidate: &str, pattern: &str, case_sensitive: bool) -> bool {
    if pattern.len() > MAX_PATTERN_LEN {
        debug!(len = pattern.len(), "Regex pattern exceeds length cap, treating as non-match");
        return false;
    }

    match RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
    {
        Ok(re) => re.is_match(candidate),
        Err(e) => {
            debug!("Invalid regex pattern in condition: {e}");
            false
        }
    }
}

/// Truncate to a byte limit on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn make_event(subject: &str, from: &str, body: &str) -> EmailEvent {
        EmailEvent {
            id: Uuid::new_v4(),
            subject: subject.into(),
            from_address: from.into(),
            from_name: None,
            to_address: "me@inbox.test".into(),
            text_body: Some(body.into()),
            html_body: None,
            received_at: Utc::now(),
            owner_id: "user-1".into(),
            mailbox_id: "mbox-1".into(),
            preview_url: None,
        }
    }

    fn leaf(field: MatchField, operator: MatchOperator, value: &str) -> Condition {
        Condition::Match {
            field,
            operator,
            value: value.into(),
            case_sensitive: false,
        }
    }

    #[test]
    fn contains_is_case_insensitive_by_default() {
        let event = make_event("Hello World", "a@x.com", "");
        let cond = leaf(MatchField::Subject, MatchOperator::Contains, "hello");
        assert!(matches(&event, &cond));
    }

    #[test]
    fn contains_respects_case_sensitive_flag() {
        let event = make_event("Hello World", "a@x.com", "");
        let cond = Condition::Match {
            field: MatchField::Subject,
            operator: MatchOperator::Contains,
            value: "hello".into(),
            case_sensitive: true,
        };
        assert!(!matches(&event, &cond));
    }

    #[test]
    fn empty_and_is_true() {
        let event = make_event("x", "a@x.com", "");
        assert!(matches(&event, &Condition::And { conditions: vec![] }));
    }

    #[test]
    fn empty_or_is_false() {
        let event = make_event("x", "a@x.com", "");
        assert!(!matches(&event, &Condition::Or { conditions: vec![] }));
    }

    #[test]
    fn not_negates() {
        let event = make_event("x", "a@x.com", "");
        let cond = Condition::Not {
            condition: Box::new(Condition::And { conditions: vec![] }),
        };
        assert!(!matches(&event, &cond));
    }

    #[test]
    fn equals_prefix_suffix() {
        let event = make_event("Invoice #42", "billing@shop.example", "");
        assert!(matches(
            &event,
            &leaf(MatchField::FromAddress, MatchOperator::Equals, "BILLING@shop.example"),
        ));
        assert!(matches(
            &event,
            &leaf(MatchField::Subject, MatchOperator::StartsWith, "invoice"),
        ));
        assert!(matches(
            &event,
            &leaf(MatchField::Subject, MatchOperator::EndsWith, "#42"),
        ));
    }

    #[test]
    fn missing_body_reads_as_empty() {
        let mut event = make_event("x", "a@x.com", "");
        event.text_body = None;
        assert!(matches(
            &event,
            &leaf(MatchField::TextBody, MatchOperator::Equals, ""),
        ));
        assert!(!matches(
            &event,
            &leaf(MatchField::TextBody, MatchOperator::Contains, "anything"),
        ));
    }

    #[test]
    fn regex_matches_case_insensitively() {
        let event = make_event("Your ORDER has shipped", "a@x.com", "");
        let cond = leaf(MatchField::Subject, MatchOperator::Regex, r"order\s+has");
        assert!(matches(&event, &cond));
    }

    #[test]
    fn invalid_regex_is_false_not_panic() {
        let event = make_event("anything", "a@x.com", "");
        let cond = leaf(MatchField::Subject, MatchOperator::Regex, r"([unclosed");
        assert!(!matches(&event, &cond));
    }

    #[test]
    fn oversized_regex_pattern_is_false() {
        let event = make_event("anything", "a@x.com", "");
        let pattern = "a".repeat(MAX_PATTERN_LEN + 1);
        let cond = leaf(MatchField::Subject, MatchOperator::Regex, &pattern);
        assert!(!matches(&event, &cond));
    }

    #[test]
    fn nested_tree_evaluates() {
        let event = make_event("Weekly report", "boss@corp.example", "see attached");
        let cond = Condition::And {
            conditions: vec![
                leaf(MatchField::Subject, MatchOperator::Contains, "report"),
                Condition::Or {
                    conditions: vec![
                        leaf(MatchField::FromAddress, MatchOperator::EndsWith, "@corp.example"),
                        leaf(MatchField::FromAddress, MatchOperator::Equals, "hr@other.example"),
                    ],
                },
                Condition::Not {
                    condition: Box::new(leaf(
                        MatchField::TextBody,
                        MatchOperator::Contains,
                        "unsubscribe",
                    )),
                },
            ],
        };
        assert!(matches(&event, &cond));
    }

    #[test]
    fn condition_deserializes_from_stored_shape() {
        let json = serde_json::json!({
            "type": "and",
            "conditions": [
                {"type": "match", "field": "subject", "operator": "contains", "value": "hi"},
                {"type": "not", "condition":
                    {"type": "match", "field": "fromAddress", "operator": "startsWith",
                     "value": "noreply@", "caseSensitive": true}},
            ]
        });
        let cond: Condition = serde_json::from_value(json).unwrap();
        let event = make_event("hi there", "alice@x.com", "");
        assert!(matches(&event, &cond));
    }

    #[test]
    fn oversized_candidate_is_truncated_not_fatal() {
        let big_body = "x".repeat(MAX_CANDIDATE_LEN * 2) + "needle";
        let event = make_event("s", "a@x.com", &big_body);
        // The needle sits past the truncation point, so it must not match.
        assert!(!matches(
            &event,
            &leaf(MatchField::TextBody, MatchOperator::Contains, "needle"),
        ));
    }
}
