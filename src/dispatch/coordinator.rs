//! Dispatch coordinator — fans one email event out across the owner's
//! automations.
//!
//! Per rule: normalize config → evaluate conditions → render payload →
//! invoke destination → write the dispatch log. Rules are isolated from
//! each other: a bad config or a dead destination affects exactly one rule,
//! and every rule produces exactly one `DispatchLog` row.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::audit::model::DispatchLog;
use crate::audit::recorder::{ExecutionRecorder, NodeVisit};
use crate::config::EngineConfig;
use crate::dispatch::destination::{DestinationGateway, SendOutcome};
use crate::error::{DatabaseError, DestinationError};
use crate::ingest::event::EmailEvent;
use crate::rules::condition;
use crate::rules::config::{self, Destination, RuleConfig};
use crate::rules::template;
use crate::store::{Store, StoredRule};

/// Outcome of one rule's evaluation within a batch.
#[derive(Debug)]
pub enum RuleOutcome {
    /// Destination invoked and it succeeded.
    Dispatched {
        rule_id: Uuid,
        execution_id: Option<Uuid>,
        reference: Option<String>,
    },
    /// Destination invoked but the call failed. Still logged as dispatched —
    /// the log records the attempt, the execution records the failure.
    DispatchFailed {
        rule_id: Uuid,
        execution_id: Option<Uuid>,
        error: DestinationError,
    },
    /// Conditions did not match.
    Skipped { rule_id: Uuid },
    /// Config could not be normalized.
    BadConfig { rule_id: Uuid },
}

impl RuleOutcome {
    pub fn rule_id(&self) -> Uuid {
        match self {
            RuleOutcome::Dispatched { rule_id, .. }
            | RuleOutcome::DispatchFailed { rule_id, .. }
            | RuleOutcome::Skipped { rule_id }
            | RuleOutcome::BadConfig { rule_id } => *rule_id,
        }
    }
}

/// Coordinates rule evaluation and destination dispatch for email events.
pub struct DispatchCoordinator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn DestinationGateway>,
    config: EngineConfig,
}

impl DispatchCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn DestinationGateway>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Dispatch one inbound event against all enabled rules of its owner.
    ///
    /// Rules run concurrently; the returned outcomes are in rule order.
    /// Only the initial rule load can fail — per-rule problems are contained
    /// and reported in the outcome list.
    pub async fn dispatch_event(
        &self,
        event: &EmailEvent,
    ) -> Result<Vec<RuleOutcome>, DatabaseError> {
        let rules = self
            .store
            .list_enabled_rules_for_owner(&event.owner_id)
            .await?;

        debug!(
            event_id = %event.id,
            owner = %event.owner_id,
            rules = rules.len(),
            "Dispatching event"
        );

        let outcomes = join_all(
            rules
                .into_iter()
                .map(|rule| self.dispatch_rule(rule, event)),
        )
        .await;

        Ok(outcomes)
    }

    /// Evaluate and (maybe) fire a single rule. Never returns an error:
    /// every failure mode collapses into an outcome plus audit writes.
    async fn dispatch_rule(&self, rule: StoredRule, event: &EmailEvent) -> RuleOutcome {
        let rule_id = rule.id;

        let rule_config = match config::normalize(&rule.raw_config, rule.kind) {
            Ok(c) => c,
            Err(e) => {
                warn!(rule = %rule_id, error = %e, "Skipping rule with bad config");
                self.write_log(DispatchLog::skipped(rule_id, event.id)).await;
                return RuleOutcome::BadConfig { rule_id };
            }
        };

        // Absent conditions mean always-match.
        let matched = rule_config
            .conditions
            .as_ref()
            .map(|c| condition::matches(event, c))
            .unwrap_or(true);

        if !matched {
            debug!(rule = %rule_id, event_id = %event.id, "Conditions did not match");
            self.write_log(DispatchLog::skipped(rule_id, event.id)).await;
            return RuleOutcome::Skipped { rule_id };
        }

        if rule.workflow {
            self.dispatch_workflow(&rule, &rule_config, event).await
        } else {
            let result = self.invoke_destination(&rule_config, event).await;
            self.write_log(DispatchLog::dispatched(rule_id, event.id, None))
                .await;
            match result {
                Ok(outcome) => RuleOutcome::Dispatched {
                    rule_id,
                    execution_id: None,
                    reference: outcome.reference,
                },
                Err(e) => {
                    warn!(rule = %rule_id, error = %e, "Destination call failed");
                    RuleOutcome::DispatchFailed {
                        rule_id,
                        execution_id: None,
                        error: e,
                    }
                }
            }
        }
    }

    /// Workflow-typed rules get a full execution record: trigger and action
    /// node logs, finalized SUCCESS or FAILED.
    async fn dispatch_workflow(
        &self,
        rule: &StoredRule,
        rule_config: &RuleConfig,
        event: &EmailEvent,
    ) -> RuleOutcome {
        let rule_id = rule.id;
        let vars = event.template_vars();

        let mut recorder = match ExecutionRecorder::begin(
            Arc::clone(&self.store),
            rule_id,
            &event.id.to_string(),
            vars.clone(),
        )
        .await
        {
            Ok(r) => Some(r),
            Err(e) => {
                // Audit degradation must not stop the dispatch itself.
                error!(rule = %rule_id, error = %e, "Failed to open execution record");
                None
            }
        };

        if let Some(rec) = recorder.as_mut() {
            let visit = NodeVisit {
                node_id: "trigger".into(),
                node_type: "trigger:email".into(),
                input: serde_json::json!({"emailId": event.id.to_string()}),
                output: Some(vars.clone()),
                metadata: serde_json::json!({}),
                error: None,
                duration: std::time::Duration::ZERO,
            };
            if let Err(e) = rec.record_node(visit).await {
                error!(rule = %rule_id, error = %e, "Failed to record trigger node");
            }
        }

        let started = Instant::now();
        let result = self.invoke_destination(rule_config, event).await;
        let duration = started.elapsed();
        let execution_id = recorder.as_ref().map(|r| r.execution_id());

        if let Some(rec) = recorder.as_mut() {
            let (output, node_error) = match &result {
                Ok(outcome) => (
                    Some(serde_json::json!({"reference": outcome.reference})),
                    None,
                ),
                Err(e) => (None, Some(e.to_string())),
            };
            let visit = NodeVisit {
                node_id: "action".into(),
                node_type: format!("action:{}", rule.kind.type_tag().to_lowercase()),
                input: serde_json::json!({"destination": rule.kind.type_tag()}),
                output,
                metadata: serde_json::json!({}),
                error: node_error,
                duration,
            };
            if let Err(e) = rec.record_node(visit).await {
                error!(rule = %rule_id, error = %e, "Failed to record action node");
            }

            let finalize = match &result {
                Ok(outcome) => {
                    rec.finish_success(serde_json::json!({
                        "delivered": true,
                        "reference": outcome.reference,
                    }))
                    .await
                }
                Err(e) => rec.finish_failure(&e.to_string()).await,
            };
            if let Err(e) = finalize {
                error!(rule = %rule_id, error = %e, "Failed to finalize execution");
            }
        }

        self.write_log(DispatchLog::dispatched(rule_id, event.id, execution_id))
            .await;

        match result {
            Ok(outcome) => RuleOutcome::Dispatched {
                rule_id,
                execution_id,
                reference: outcome.reference,
            },
            Err(e) => {
                warn!(rule = %rule_id, error = %e, "Workflow destination call failed");
                RuleOutcome::DispatchFailed {
                    rule_id,
                    execution_id,
                    error: e,
                }
            }
        }
    }

    /// Render the payload for the rule's destination and invoke it, bounded
    /// by the dispatch timeout.
    async fn invoke_destination(
        &self,
        rule_config: &RuleConfig,
        event: &EmailEvent,
    ) -> Result<SendOutcome, DestinationError> {
        let vars = event.template_vars();
        let templates = rule_config.templates.as_ref();

        let render_or = |name: &str, fallback: &str| -> String {
            let tpl = templates
                .and_then(|t| t.get(name))
                .map(String::as_str)
                .unwrap_or(fallback);
            template::render(tpl, &vars)
        };

        let call = async {
            match &rule_config.destination {
                Destination::Email { to } => {
                    let subject = render_or("subject", "{{email.subject}}");
                    let text = render_or("text", "{{email.textBody}}");
                    let html = templates
                        .and_then(|t| t.get("html"))
                        .map(|tpl| template::render(tpl, &vars));
                    self.gateway
                        .send_email(to, &subject, &text, html.as_deref())
                        .await
                }
                Destination::Webhook { url, headers } => {
                    // Default webhook payload is the event snapshot itself;
                    // a "body" template overrides it with rendered text.
                    let body = match templates.and_then(|t| t.get("body")) {
                        Some(tpl) => serde_json::json!({"body": template::render(tpl, &vars)}),
                        None => vars.clone(),
                    };
                    self.gateway.post_webhook(url, headers, &body).await
                }
                Destination::Telegram {
                    chat_id,
                    parse_mode,
                } => {
                    let text = render_or(
                        "text",
                        "New mail from {{email.fromAddress}}: {{email.subject}}",
                    );
                    self.gateway
                        .send_telegram(chat_id, &text, parse_mode.as_deref())
                        .await
                }
            }
        };

        let kind = rule_config.destination.kind().type_tag().to_lowercase();
        match tokio::time::timeout(self.config.dispatch_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DestinationError::Timeout {
                kind,
                timeout: self.config.dispatch_timeout,
            }),
        }
    }

    /// Audit writes are best-effort from the dispatch path's point of view:
    /// a failed write is logged loudly but cannot cancel sibling dispatches.
    async fn write_log(&self, log: DispatchLog) {
        if let Err(e) = self.store.insert_dispatch_log(&log).await {
            error!(
                rule = %log.rule_id,
                email = %log.email_id,
                error = %e,
                "Failed to write dispatch log"
            );
        }
    }
}
