//! Sync engine wiring shared by the commands.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use icsync_providers::{Fetcher, SourceFetcher};
use icsync_server::{
    CalendarStore, DesktopNotifier, SqliteCalendarStore, SubscriptionRepository, SyncOrchestrator,
};

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// The repository, fetcher and orchestrator every command works with.
pub struct Engine {
    pub repository: Arc<SubscriptionRepository>,
    pub fetcher: Arc<dyn Fetcher>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub max_redirects: usize,
}

impl Engine {
    /// Opens the databases named in `config`, creating their directories.
    pub async fn open(config: &ClientConfig) -> ClientResult<Self> {
        let database_path = config.storage.database_path();
        let calendar_path = config.storage.calendar_path();
        create_parent(&database_path).await?;
        create_parent(&calendar_path).await?;

        debug!(
            database = %database_path.display(),
            calendars = %calendar_path.display(),
            "Opening sync engine"
        );

        let repository = Arc::new(SubscriptionRepository::open(&database_path).await?);
        let store = Arc::new(SqliteCalendarStore::open(&calendar_path).await?);
        let fetcher = Arc::new(SourceFetcher::new(config.fetcher_config())?);

        Ok(Self::from_parts(config, repository, store, fetcher))
    }

    /// Builds an engine around existing components.
    pub fn from_parts(
        config: &ClientConfig,
        repository: Arc<SubscriptionRepository>,
        store: Arc<dyn CalendarStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let notifier = Arc::new(DesktopNotifier::new(config.notify_config()));
        let orchestrator = SyncOrchestrator::new(repository.clone(), store, fetcher.clone())
            .with_notifier(notifier)
            .with_config(config.orchestrator_config());

        Self {
            repository,
            fetcher,
            orchestrator: Arc::new(orchestrator),
            max_redirects: config.sync.max_redirects,
        }
    }
}

async fn create_parent(path: &Path) -> ClientResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}
