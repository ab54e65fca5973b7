//! End-to-end dispatch tests over the in-memory store.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use mailflow::config::EngineConfig;
use mailflow::dispatch::destination::{DestinationGateway, SendOutcome};
use mailflow::dispatch::{DispatchCoordinator, RuleOutcome};
use mailflow::error::DestinationError;
use mailflow::ingest::event::EmailEvent;
use mailflow::ingest::sync::run_mail_sync;
use mailflow::ingest::{Claim, IdempotencyGuard, SyncLock};
use mailflow::rules::config::DestinationKind;
use mailflow::store::{LibSqlStore, Store, StoredRule};

/// Records every destination call; fails calls whose label contains the
/// configured needle.
#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<String>>,
    fail_needle: Option<String>,
}

impl RecordingGateway {
    fn failing_on(needle: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_needle: Some(needle.to_string()),
        }
    }

    fn call(&self, label: String) -> Result<SendOutcome, DestinationError> {
        self.calls.lock().unwrap().push(label.clone());
        if let Some(needle) = &self.fail_needle {
            if label.contains(needle.as_str()) {
                return Err(DestinationError::SendFailed {
                    kind: "test".into(),
                    reason: "simulated outage".into(),
                });
            }
        }
        Ok(SendOutcome {
            reference: Some("ok".into()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl DestinationGateway for RecordingGateway {
    async fn send_email(
        &self,
        to: &str,
        _subject: &str,
        _text: &str,
        _html: Option<&str>,
    ) -> Result<SendOutcome, DestinationError> {
        self.call(format!("email:{to}"))
    }

    async fn post_webhook(
        &self,
        url: &str,
        _headers: &BTreeMap<String, String>,
        _body: &serde_json::Value,
    ) -> Result<SendOutcome, DestinationError> {
        self.call(format!("webhook:{url}"))
    }

    async fn send_telegram(
        &self,
        chat_id: &str,
        _text: &str,
        _parse_mode: Option<&str>,
    ) -> Result<SendOutcome, DestinationError> {
        self.call(format!("telegram:{chat_id}"))
    }
}

fn make_event(owner: &str) -> EmailEvent {
    EmailEvent {
        id: Uuid::new_v4(),
        subject: "Build failed on main".into(),
        from_address: "ci@builds.example".into(),
        from_name: Some("CI".into()),
        to_address: "me@inbox.test".into(),
        text_body: Some("Pipeline 1042 failed at the test stage.".into()),
        html_body: None,
        received_at: Utc::now(),
        owner_id: owner.into(),
        mailbox_id: "mbox-1".into(),
        preview_url: None,
    }
}

fn make_rule(owner: &str, kind: DestinationKind, raw_config: serde_json::Value) -> StoredRule {
    StoredRule {
        id: Uuid::new_v4(),
        owner_id: owner.into(),
        name: format!("{kind} automation"),
        kind,
        workflow: false,
        enabled: true,
        raw_config,
        created_at: Utc::now(),
    }
}

async fn seed_three_rules(store: &Arc<LibSqlStore>) {
    store
        .insert_rule(&make_rule(
            "user-1",
            DestinationKind::Email,
            serde_json::json!({"to": "archive@example.com"}),
        ))
        .await
        .unwrap();
    store
        .insert_rule(&make_rule(
            "user-1",
            DestinationKind::Webhook,
            serde_json::json!({"url": "https://hooks.example/ci"}),
        ))
        .await
        .unwrap();
    store
        .insert_rule(&make_rule(
            "user-1",
            DestinationKind::Telegram,
            serde_json::json!({"chatId": "42"}),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn failing_destination_does_not_abort_the_batch() {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    seed_three_rules(&store).await;

    let coordinator = DispatchCoordinator::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::new(RecordingGateway::failing_on("webhook")),
        EngineConfig::default(),
    );

    let event = make_event("user-1");
    let outcomes = coordinator.dispatch_event(&event).await.unwrap();

    assert_eq!(outcomes.len(), 3);
    let dispatched = outcomes
        .iter()
        .filter(|o| matches!(o, RuleOutcome::Dispatched { .. }))
        .count();
    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, RuleOutcome::DispatchFailed { .. }))
        .count();
    assert_eq!(dispatched, 2);
    assert_eq!(failed, 1);

    // Exactly 3 dispatch logs, all recording an attempt.
    let logs = store.list_dispatch_logs_for_email(event.id).await.unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|l| l.dispatched));
}

#[tokio::test]
async fn sync_drains_pending_events_and_marks_them_processed() {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    seed_three_rules(&store).await;

    let gateway = Arc::new(RecordingGateway::default());
    let coordinator = Arc::new(DispatchCoordinator::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&gateway) as Arc<dyn DestinationGateway>,
        EngineConfig::default(),
    ));

    let first = make_event("user-1");
    let second = make_event("user-1");
    store.enqueue_event(&first).await.unwrap();
    store.enqueue_event(&second).await.unwrap();

    let store_dyn: Arc<dyn Store> = Arc::clone(&store) as Arc<dyn Store>;
    let lock = SyncLock::new(Duration::from_millis(10));
    run_mail_sync(&store_dyn, &coordinator, &lock).await;

    assert!(store.list_pending_events().await.unwrap().is_empty());
    // 2 events × 3 rules
    assert_eq!(gateway.call_count(), 6);
    assert_eq!(
        store.list_dispatch_logs_for_email(first.id).await.unwrap().len(),
        3
    );
    assert_eq!(
        store.list_dispatch_logs_for_email(second.id).await.unwrap().len(),
        3
    );
}

#[tokio::test]
async fn redelivered_webhook_event_is_ingested_once() {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let guard = IdempotencyGuard::new(Arc::clone(&store) as Arc<dyn Store>);

    // Same external update delivered three times; only the first claim wins,
    // so only one event reaches the queue.
    let external_id = "telegram-update-991";
    for _ in 0..3 {
        if guard.claim(external_id).await.unwrap() == Claim::Claimed {
            store.enqueue_event(&make_event("user-1")).await.unwrap();
        }
    }

    assert_eq!(store.list_pending_events().await.unwrap().len(), 1);
}
