//! The work behind one scheduled run.

use std::sync::Arc;

use async_trait::async_trait;

use crate::automation::{ScrapeError, SessionManager};
use crate::crypto::CredentialVault;
use crate::ingest::Ingestor;
use crate::models::{RunStats, SearchConfig};
use crate::notify::Dispatcher;
use crate::repository::{CredentialRepository, ServiceRepository};

/// Executes one run of one config. The scheduler only sees this trait,
/// which keeps it testable without a browser or database pipeline.
#[async_trait]
pub trait RunHandler: Send + Sync {
    async fn run(&self, config: &SearchConfig) -> Result<RunStats, ScrapeError>;
}

/// Production pipeline: credentials → scrape → ingest → dispatch.
pub struct WatchRunner {
    services: ServiceRepository,
    credentials: CredentialRepository,
    vault: CredentialVault,
    sessions: Arc<SessionManager>,
    ingestor: Ingestor,
    dispatcher: Dispatcher,
}

impl WatchRunner {
    pub fn new(
        services: ServiceRepository,
        credentials: CredentialRepository,
        vault: CredentialVault,
        sessions: Arc<SessionManager>,
        ingestor: Ingestor,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            services,
            credentials,
            vault,
            sessions,
            ingestor,
            dispatcher,
        }
    }
}

#[async_trait]
impl RunHandler for WatchRunner {
    async fn run(&self, config: &SearchConfig) -> Result<RunStats, ScrapeError> {
        let service = self
            .services
            .get(&config.service_id)
            .await
            .map_err(db_transient)?
            .ok_or_else(|| {
                ScrapeError::Parse(format!("unknown service '{}'", config.service_id))
            })?;

        let credential = self
            .credentials
            .get(&config.user_id, &config.service_id)
            .await
            .map_err(db_transient)?
            .ok_or_else(|| {
                ScrapeError::Credential("no credential registered for service".to_string())
            })?;
        if !credential.is_valid() {
            return Err(ScrapeError::Credential(
                "credential is invalidated".to_string(),
            ));
        }

        let creds = self
            .vault
            .open(&credential.secret)
            .map_err(|e| ScrapeError::Credential(format!("credential unusable: {}", e)))?;

        let records = self
            .sessions
            .execute(&service, credential.id, &creds, config)
            .await?;

        let outcome = self
            .ingestor
            .ingest(&service.id, &records)
            .await
            .map_err(db_transient)?;

        let notifications_created = self
            .dispatcher
            .dispatch(config, &outcome.listings)
            .await
            .map_err(db_transient)?;

        Ok(RunStats {
            listings_seen: records.len(),
            listings_new: outcome.new_count(),
            notifications_created,
        })
    }
}

/// Database hiccups during a run are transient for scheduling purposes.
fn db_transient(e: crate::repository::DieselError) -> ScrapeError {
    ScrapeError::Transient(format!("database error: {}", e))
}
