use std::sync::Arc;

use mailflow::config::{EngineConfig, SmtpConfig, TelegramConfig};
use mailflow::dispatch::{DispatchCoordinator, Gateway};
use mailflow::ingest::scheduler::TaskHandler;
use mailflow::ingest::{sync, IngestionScheduler, SyncLock};
use mailflow::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env();

    eprintln!("📬 Mailflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Sync interval: {}s", config.sync_interval.as_secs());
    eprintln!("   Sync cooldown: {}s", config.sync_cooldown.as_secs());

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("MAILFLOW_DB_PATH").unwrap_or_else(|_| "./data/mailflow.db".to_string());

    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {db_path}");

    // ── Destinations ─────────────────────────────────────────────────────
    let smtp = SmtpConfig::from_env();
    let telegram = TelegramConfig::from_env();
    eprintln!(
        "   Email destination: {}",
        smtp.as_ref()
            .map(|c| c.host.clone())
            .unwrap_or_else(|| "disabled (no SMTP config)".into())
    );
    eprintln!(
        "   Telegram destination: {}",
        if telegram.is_some() { "enabled" } else { "disabled (no bot token)" }
    );

    let gateway = Arc::new(Gateway::new(smtp, telegram));
    let coordinator = Arc::new(DispatchCoordinator::new(
        Arc::clone(&store),
        gateway,
        config.clone(),
    ));

    // ── Sync scheduling ──────────────────────────────────────────────────
    let scheduler = Arc::new(IngestionScheduler::new());
    let lock = Arc::new(SyncLock::new(config.sync_cooldown));

    let handler: TaskHandler = {
        let store = Arc::clone(&store);
        let coordinator = Arc::clone(&coordinator);
        let lock = Arc::clone(&lock);
        Arc::new(move || {
            let store = Arc::clone(&store);
            let coordinator = Arc::clone(&coordinator);
            let lock = Arc::clone(&lock);
            Box::pin(async move {
                sync::run_mail_sync(&store, &coordinator, &lock).await;
                Ok(())
            })
        })
    };

    scheduler
        .schedule("mail-sync", config.sync_interval, handler)
        .await?;

    eprintln!("   Scheduler: mail-sync armed\n");

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    eprintln!("Shutting down…");
    scheduler.stop().await;

    Ok(())
}
