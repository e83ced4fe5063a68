//! The sync pass state machine.
//!
//! A pass walks through these states, in order:
//!
//! ```text
//! Idle ─▶ Migrating ─▶ Provisioning ─▶ PerSubscriptionLoop ─▶ Finalizing
//!                                                               │
//!                                     Success / Failure / Retry ◀┘
//! ```
//!
//! - **Migrating** turns calendars that predate subscription records into
//!   subscriptions, see [`SyncOrchestrator::migrate_legacy_calendars`].
//! - **Provisioning** makes the calendar set match the subscription set,
//!   see [`SyncOrchestrator::update_calendars`].
//! - **PerSubscriptionLoop** runs fetch, parse, reconcile and apply for every
//!   enabled subscription accepted by the pass's [`SyncFilter`], one at a
//!   time. A failing subscription records its error and the loop moves on.
//! - **Finalizing** folds the per-subscription results into a
//!   [`PassOutcome`].
//!
//! Migrating and Provisioning change the calendar set shared by every flow,
//! so concurrent passes take turns through them. Only the per-subscription
//! work of different flows overlaps.
//!
//! Storage becoming unreachable stops the pass at once with
//! [`PassOutcome::Retry`]; revoked storage access stops it with
//! [`PassOutcome::Failure`] and a user notification.

mod policy;
mod provision;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use icsync_core::{
    ChangeCounts, PassOutcome, PassReport, ReconcileOptions, Subscription, SubscriptionReport,
    SyncFilter, SyncResult, reconcile,
};
use icsync_providers::{
    BasicCredentials, FetchOutcome, FetchRequest, Fetcher, SyncError, SyncErrorCode,
    follow_redirects, parse_calendar,
};

use crate::config::OrchestratorConfig;
use crate::error::{ServerError, ServerResult};
use crate::notify::{NoopNotifier, Notifier};
use crate::repository::SubscriptionRepository;
use crate::store::CalendarStore;

pub use policy::SubscriptionPolicy;

/// Parameters of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassRequest {
    /// Which subscriptions the pass processes.
    pub filter: SyncFilter,
    /// Ignore cache validators and re-apply every entry.
    pub force_resync: bool,
    /// Stop after legacy migration.
    pub only_migrate: bool,
}

impl PassRequest {
    /// Creates a regular pass for the given flow.
    pub fn new(filter: SyncFilter) -> Self {
        Self {
            filter,
            force_resync: false,
            only_migrate: false,
        }
    }

    /// Builder method to set force resync.
    #[must_use]
    pub fn with_force_resync(mut self, force: bool) -> Self {
        self.force_resync = force;
        self
    }

    /// Builder method to stop after migration.
    #[must_use]
    pub fn with_only_migrate(mut self, only_migrate: bool) -> Self {
        self.only_migrate = only_migrate;
        self
    }
}

/// Returns true if the error stops the whole pass instead of one
/// subscription.
fn aborts_pass(error: &SyncError) -> bool {
    error.is_systemic() || error.code() == SyncErrorCode::PermissionDenied
}

/// Runs sync passes against one repository and one calendar store.
pub struct SyncOrchestrator {
    repository: Arc<SubscriptionRepository>,
    store: Arc<dyn CalendarStore>,
    fetcher: Arc<dyn Fetcher>,
    notifier: Arc<dyn Notifier>,
    config: OrchestratorConfig,
    /// Held while the calendar set is migrated or reconciled.
    provisioning: Mutex<()>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator that does not notify the user.
    pub fn new(
        repository: Arc<SubscriptionRepository>,
        store: Arc<dyn CalendarStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            repository,
            store,
            fetcher,
            notifier: Arc::new(NoopNotifier),
            config: OrchestratorConfig::default(),
            provisioning: Mutex::new(()),
        }
    }

    /// Builder method to set the notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Builder method to set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the subscription repository.
    pub fn repository(&self) -> &Arc<SubscriptionRepository> {
        &self.repository
    }

    /// Runs one pass and reports what it did.
    ///
    /// This never fails: errors that stop the pass become its outcome, and
    /// the results of subscriptions processed before the stop are kept.
    #[instrument(skip(self), fields(filter = %request.filter))]
    pub async fn run_pass(&self, request: PassRequest) -> PassReport {
        let mut report = PassReport::new(PassOutcome::Success);

        if let Err(e) = self.execute(request, &mut report).await {
            report.outcome = match &e {
                ServerError::Sync(sync) if sync.code() == SyncErrorCode::PermissionDenied => {
                    error!(error = %e, "Calendar storage access denied");
                    if self.config.notify_on_error {
                        self.notifier.permission_denied(sync.message());
                    }
                    PassOutcome::Failure
                }
                e if e.is_retryable() => {
                    warn!(error = %e, "Pass interrupted, will retry");
                    PassOutcome::Retry
                }
                e => {
                    error!(error = %e, "Pass failed");
                    PassOutcome::Failure
                }
            };
        }

        let changes = report.total_changes();
        info!(
            outcome = %report.outcome,
            subscriptions = report.results.len(),
            migrated = report.migrated,
            inserted = changes.inserted,
            updated = changes.updated,
            deleted = changes.deleted,
            "Sync pass finished"
        );
        report
    }

    async fn execute(&self, request: PassRequest, report: &mut PassReport) -> ServerResult<()> {
        self.store.check_access().await?;

        let provisioning = self.provisioning.lock().await;

        // Migrating
        report.migrated = self.migrate().await?;
        if report.migrated > 0 {
            info!(migrated = report.migrated, "Migrated legacy calendars");
        }
        if request.only_migrate {
            report.outcome = PassOutcome::Success;
            return Ok(());
        }

        // Provisioning
        self.provision().await?;
        drop(provisioning);

        // PerSubscriptionLoop
        for subscription in self.repository.list_for_filter(request.filter).await? {
            if !subscription.is_provisioned() {
                warn!(
                    subscription_id = subscription.id,
                    "Subscription has no calendar, skipping"
                );
                continue;
            }

            let result = match self.sync_subscription(&subscription, request).await {
                Ok(result) => {
                    self.notifier.sync_recovered(subscription.id);
                    result
                }
                Err(ServerError::Sync(e)) if !aborts_pass(&e) => {
                    self.record_failure(&subscription, e).await?
                }
                Err(e) => return Err(e),
            };

            report.results.push(SubscriptionReport {
                subscription_id: subscription.id,
                url: subscription.url.clone(),
                result,
            });
        }

        // Finalizing
        report.outcome = PassOutcome::from_results(report.results.iter().map(|r| &r.result));
        Ok(())
    }

    /// Fetches, parses, reconciles and applies one subscription, then
    /// records the new sync state.
    #[instrument(skip_all, fields(subscription_id = subscription.id))]
    async fn sync_subscription(
        &self,
        subscription: &Subscription,
        request: PassRequest,
    ) -> ServerResult<SyncResult> {
        let Some(calendar_id) = subscription.calendar_id else {
            return Err(SyncError::internal("Subscription has no calendar").into());
        };

        let credentials = self
            .repository
            .get_credential(subscription.id)
            .await?
            .map(|c| BasicCredentials::new(c.username, c.password));
        let fetch_request = FetchRequest::new(subscription.url.as_str())
            .with_credentials(credentials)
            .with_validators(subscription.etag.clone(), subscription.last_modified)
            .with_force_resync(request.force_resync);

        debug!(url = %subscription.url, fetcher = self.fetcher.name(), "Fetching");
        let followed = follow_redirects(
            self.fetcher.as_ref(),
            fetch_request,
            self.config.max_redirects,
        )
        .await
        .map_err(|e| e.with_subscription(subscription.id))?;

        if let Some(url) = &followed.permanent_url {
            info!(from = %subscription.url, to = %url, "Updating subscription source");
            self.repository.set_url(subscription.id, url).await?;
        }

        let fetched = match followed.outcome {
            FetchOutcome::NotModified => {
                debug!("Source not modified");
                self.repository
                    .update_status_not_modified(subscription.id)
                    .await?;
                return Ok(SyncResult::NotModified);
            }
            FetchOutcome::Success(fetched) => fetched,
            FetchOutcome::Redirected { location, .. } => {
                return Err(SyncError::malformed(format!("Unfollowed redirect to {}", location))
                    .with_subscription(subscription.id)
                    .into());
            }
        };

        let parsed = parse_calendar(
            &fetched.body,
            fetched.charset.as_deref(),
            fetched.display_name.as_deref(),
        )
        .map_err(|e| e.with_subscription(subscription.id))?;

        let policy = SubscriptionPolicy::from_subscription(subscription);
        let incoming = parsed
            .entries
            .into_iter()
            .map(|entry| policy.apply(entry))
            .collect();

        let stored = self.store.read_entries(calendar_id).await?;
        let plan = reconcile(
            &stored,
            incoming,
            ReconcileOptions::default()
                .with_complete(true)
                .with_force_resync(request.force_resync),
        );

        for rejected in &plan.rejected {
            warn!(
                index = rejected.index,
                reason = %rejected.reason,
                "Skipping entry"
            );
        }

        let counts = if plan.is_noop() {
            ChangeCounts {
                skipped: plan.rejected.len(),
                ..Default::default()
            }
        } else {
            self.store.apply_plan(calendar_id, plan).await?
        };

        self.repository
            .update_status_success(subscription.id, fetched.etag, fetched.last_modified)
            .await?;

        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            deleted = counts.deleted,
            skipped = counts.skipped,
            "Subscription synced"
        );
        Ok(SyncResult::Updated { counts })
    }

    /// Records a subscription-level failure and turns it into a result.
    async fn record_failure(
        &self,
        subscription: &Subscription,
        error: SyncError,
    ) -> ServerResult<SyncResult> {
        warn!(
            subscription_id = subscription.id,
            url = %subscription.url,
            error = %error,
            "Subscription sync failed"
        );

        self.repository
            .update_status_error(subscription.id, error.message())
            .await?;
        if self.config.notify_on_error {
            self.notifier.sync_failed(subscription, error.message());
        }

        Ok(SyncResult::Failed {
            code: error.code().as_str().to_string(),
            message: error.message().to_string(),
            retryable: error.is_retryable(),
        })
    }
}
