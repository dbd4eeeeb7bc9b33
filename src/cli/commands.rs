//! CLI command implementations.

use std::sync::Arc;

use anyhow::Context;
use console::style;

use crate::automation::{SessionManager, StrategyRegistry};
use crate::config::Settings;
use crate::crypto::CredentialVault;
use crate::ingest::Ingestor;
use crate::notify::{Dispatcher, HttpPushClient};
use crate::rate_limit::ServiceGates;
use crate::repository::{
    ensure_schema, AsyncSqlitePool, CredentialRepository, DeviceRepository, ListingRepository,
    NotificationRepository, RunRepository, SearchConfigRepository, ServiceRepository,
    StatusRepository,
};
use crate::scheduler::{Scheduler, SchedulerConfig, WatchRunner};

/// Create the database file and apply the schema.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let pool = AsyncSqlitePool::from_path(&db_path);
    ensure_schema(&pool).await?;

    println!(
        "{} Database ready at {}",
        style("✓").green(),
        db_path.display()
    );
    if settings.credential_key.is_none() {
        println!(
            "{} No credential key configured. Generate one with `listwatch generate-key` \
             and set {}.",
            style("!").yellow(),
            crate::config::ENV_CREDENTIAL_KEY
        );
    }
    Ok(())
}

/// Print a fresh credential encryption key.
pub fn cmd_generate_key() -> anyhow::Result<()> {
    println!("{}", CredentialVault::generate_key());
    Ok(())
}

/// Run the watcher: scheduler, session pool, ingestion, dispatch.
pub async fn cmd_run(settings: &Settings, once: bool) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    let pool = AsyncSqlitePool::from_path(&db_path);
    ensure_schema(&pool).await?;

    let key = settings
        .credential_key
        .as_deref()
        .with_context(|| {
            format!(
                "credential key missing; set {} or the credential_key config field",
                crate::config::ENV_CREDENTIAL_KEY
            )
        })?;
    let vault = CredentialVault::from_base64_key(key)?;

    let registry = StrategyRegistry::from_configs(&settings.strategies);
    let gates = ServiceGates::new(settings.rate_limit.clone());

    #[cfg(feature = "browser")]
    let driver: Arc<dyn crate::automation::AutomationDriver> = Arc::new(
        crate::automation::BrowserDriver::launch(&settings.automation)
            .await
            .map_err(|e| anyhow::anyhow!("browser unavailable: {}", e))?,
    );
    #[cfg(not(feature = "browser"))]
    anyhow::bail!("built without browser support; rebuild with --features browser");

    #[cfg(feature = "browser")]
    {
        let sessions = Arc::new(SessionManager::new(
            driver,
            registry,
            gates,
            &settings.automation,
        ));

        let ingestor = Ingestor::new(ListingRepository::new(pool.clone()));
        let dispatcher = Dispatcher::new(
            NotificationRepository::new(pool.clone()),
            DeviceRepository::new(pool.clone()),
            Arc::new(HttpPushClient::new(&settings.push)),
            &settings.push,
        );
        let runner = Arc::new(WatchRunner::new(
            ServiceRepository::new(pool.clone()),
            CredentialRepository::new(pool.clone()),
            vault,
            sessions.clone(),
            ingestor,
            dispatcher,
        ));

        let scheduler = Scheduler::new(
            SearchConfigRepository::new(pool.clone()),
            CredentialRepository::new(pool.clone()),
            RunRepository::new(pool.clone()),
            StatusRepository::new(pool),
            runner,
            SchedulerConfig::from(&settings.scheduler),
        );

        scheduler.start().await?;
        println!("{} Watcher running ({})", style("→").cyan(), db_path.display());

        if once {
            scheduler.wait_until_idle().await;
        } else {
            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            println!("{} Shutting down…", style("→").cyan());
        }

        scheduler.stop().await;
        sessions.close_all().await;
        println!("{} Stopped", style("✓").green());
        Ok(())
    }
}
