//! Keeping native calendars and subscription records in step.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use icsync_core::{Credential, Subscription};

use crate::error::ServerResult;
use crate::store::{CalendarProperties, NativeCalendar};

use super::SyncOrchestrator;

impl SyncOrchestrator {
    /// Creates subscription records for calendars that predate them.
    ///
    /// A calendar is unmanaged until it has been migrated once, so running
    /// this again does nothing. Returns the number of subscriptions created.
    pub async fn migrate_legacy_calendars(&self) -> ServerResult<usize> {
        let _provisioning = self.provisioning.lock().await;
        self.migrate().await
    }

    /// Makes the set of managed calendars match the set of subscriptions.
    ///
    /// Subscriptions without a calendar (or whose calendar vanished) get a
    /// new one, calendars whose metadata drifted are updated, and managed
    /// calendars no subscription points to are deleted.
    pub async fn update_calendars(&self) -> ServerResult<()> {
        let _provisioning = self.provisioning.lock().await;
        self.provision().await
    }

    /// Migration body; the caller holds the provisioning lock.
    pub(super) async fn migrate(&self) -> ServerResult<usize> {
        let legacy: Vec<NativeCalendar> = self
            .store
            .list_calendars()
            .await?
            .into_iter()
            .filter(|calendar| !calendar.managed)
            .collect();

        let mut created = 0;
        for calendar in legacy {
            let Some(url) = calendar.url.clone() else {
                debug!(calendar_id = calendar.id, "Calendar has no source, not migrating");
                continue;
            };

            match self.repository.find_by_url(&url).await? {
                Some(existing) => {
                    info!(
                        calendar_id = calendar.id,
                        subscription_id = existing.id,
                        "Linking legacy calendar to existing subscription"
                    );
                    self.repository
                        .set_calendar_id(existing.id, Some(calendar.id))
                        .await?;
                }
                None => {
                    let subscription = Subscription {
                        calendar_id: Some(calendar.id),
                        color: Some(calendar.color),
                        visible: calendar.visible,
                        ..Subscription::new(url.as_str(), calendar.display_name.as_str())
                    };
                    let id = self.repository.add(subscription).await?;
                    if let Some(credentials) = calendar.legacy_credentials {
                        self.repository
                            .put_credential(Credential::new(
                                id,
                                credentials.username,
                                credentials.password,
                            ))
                            .await?;
                    }
                    info!(
                        calendar_id = calendar.id,
                        subscription_id = id,
                        url = %url,
                        "Migrated legacy calendar"
                    );
                    created += 1;
                }
            }

            self.store.mark_managed(calendar.id).await?;
        }

        Ok(created)
    }

    /// Provisioning body; the caller holds the provisioning lock.
    pub(super) async fn provision(&self) -> ServerResult<()> {
        let mut managed: BTreeMap<i64, NativeCalendar> = self
            .store
            .list_calendars()
            .await?
            .into_iter()
            .filter(|calendar| calendar.managed)
            .map(|calendar| (calendar.id, calendar))
            .collect();

        for subscription in self.repository.list().await? {
            let properties = CalendarProperties::from_subscription(&subscription);
            let existing = subscription
                .calendar_id
                .and_then(|calendar_id| managed.remove(&calendar_id));

            match existing {
                Some(calendar) if properties.matches(&calendar) => {}
                Some(calendar) => {
                    debug!(
                        subscription_id = subscription.id,
                        calendar_id = calendar.id,
                        "Updating calendar metadata"
                    );
                    self.store.update_calendar(calendar.id, properties).await?;
                }
                None => {
                    if let Some(stale) = subscription.calendar_id {
                        warn!(
                            subscription_id = subscription.id,
                            calendar_id = stale,
                            "Calendar vanished, creating a new one"
                        );
                    }
                    let calendar_id = self.store.create_calendar(properties).await?;
                    self.repository
                        .set_calendar_id(subscription.id, Some(calendar_id))
                        .await?;
                    info!(
                        subscription_id = subscription.id,
                        calendar_id, "Created calendar for subscription"
                    );
                }
            }
        }

        for orphan in managed.into_keys() {
            info!(calendar_id = orphan, "Deleting calendar of removed subscription");
            self.store.delete_calendar(orphan).await?;
        }

        Ok(())
    }
}
