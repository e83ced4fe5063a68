//! Whole-database export and import.
//!
//! A backup is a JSON document holding every subscription and credential in
//! their stable JSON form:
//!
//! ```json
//! {"subscriptions": [{"id": 1, "url": "...", ...}], "credentials": [...]}
//! ```

use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use icsync_core::{Credential, Subscription};

use crate::error::{ServerError, ServerResult};

use super::{
    SUBSCRIPTION_COLUMNS, SubscriptionRepository, insert_subscription, subscription_from_row,
    update_subscription,
};

/// Snapshot of the subscription database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub credentials: Vec<Credential>,
}

impl Backup {
    /// Encodes the backup as JSON bytes.
    pub fn to_bytes(&self) -> ServerResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decodes a backup from JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> ServerResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ServerError::invalid_backup(e.to_string()))
    }
}

/// What a restore changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    /// Subscriptions whose id was unknown.
    pub inserted: usize,
    /// Known subscriptions replaced by a newer backup copy.
    pub overwritten: usize,
    /// Known subscriptions kept because the stored copy was as new.
    pub kept: usize,
    pub credentials_added: usize,
    /// Credentials dropped because their subscription already had one or
    /// is missing.
    pub credentials_skipped: usize,
}

/// Returns true if `candidate` carries newer sync state than `current`.
fn is_newer(candidate: &Subscription, current: &Subscription) -> bool {
    candidate.last_sync > current.last_sync || candidate.last_modified > current.last_modified
}

impl SubscriptionRepository {
    /// Returns a snapshot of every subscription and credential.
    pub async fn export_backup(&self) -> ServerResult<Backup> {
        let backup = Backup {
            subscriptions: self.list().await?,
            credentials: self.list_credentials().await?,
        };
        info!(
            subscriptions = backup.subscriptions.len(),
            credentials = backup.credentials.len(),
            "Exported backup"
        );
        Ok(backup)
    }

    /// Restores a snapshot in one transaction.
    ///
    /// With `clear` the database is emptied first. Otherwise unknown
    /// subscriptions are inserted, known ones are overwritten only by a newer
    /// copy, and a credential is added only where none exists.
    pub async fn restore_backup(&self, backup: Backup, clear: bool) -> ServerResult<RestoreSummary> {
        let summary = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if clear {
                    tx.execute_batch("DELETE FROM credentials; DELETE FROM subscriptions;")?;
                }

                let mut summary = RestoreSummary::default();
                for candidate in &backup.subscriptions {
                    let mut candidate = candidate.clone();

                    // A calendar can back only one subscription.
                    if let Some(calendar_id) = candidate.calendar_id {
                        let taken = tx
                            .query_row(
                                "SELECT id FROM subscriptions WHERE calendar_id = ?1 AND id != ?2",
                                params![calendar_id, candidate.id],
                                |row| row.get::<_, i64>(0),
                            )
                            .optional()?;
                        if taken.is_some() {
                            candidate.calendar_id = None;
                        }
                    }

                    let current = tx
                        .query_row(
                            &format!(
                                "SELECT {} FROM subscriptions WHERE id = ?1",
                                SUBSCRIPTION_COLUMNS
                            ),
                            params![candidate.id],
                            subscription_from_row,
                        )
                        .optional()?;

                    match current {
                        None => {
                            insert_subscription(&tx, &candidate, true)?;
                            summary.inserted += 1;
                        }
                        Some(current) if is_newer(&candidate, &current) => {
                            update_subscription(&tx, &candidate)?;
                            summary.overwritten += 1;
                        }
                        Some(_) => summary.kept += 1,
                    }
                }

                for credential in &backup.credentials {
                    let owner_exists = tx
                        .query_row(
                            "SELECT 1 FROM subscriptions WHERE id = ?1",
                            params![credential.subscription_id],
                            |_| Ok(()),
                        )
                        .optional()?
                        .is_some();
                    if !owner_exists {
                        summary.credentials_skipped += 1;
                        continue;
                    }
                    let added = tx.execute(
                        "INSERT INTO credentials (subscription_id, username, password)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT(subscription_id) DO NOTHING",
                        params![
                            credential.subscription_id,
                            credential.username,
                            credential.password
                        ],
                    )?;
                    if added > 0 {
                        summary.credentials_added += 1;
                    } else {
                        summary.credentials_skipped += 1;
                    }
                }

                tx.commit()?;
                Ok(summary)
            })
            .await?;

        if summary.credentials_skipped > 0 {
            warn!(
                skipped = summary.credentials_skipped,
                "Some credentials were not restored"
            );
        }
        info!(
            inserted = summary.inserted,
            overwritten = summary.overwritten,
            kept = summary.kept,
            clear,
            "Restored backup"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(url: &str, last_sync: Option<i64>) -> Subscription {
        Subscription {
            last_sync,
            ..Subscription::new(url, url)
        }
    }

    #[tokio::test]
    async fn export_then_restore_into_empty_database() {
        let source = SubscriptionRepository::open_in_memory().await.unwrap();
        let id = source
            .add(subscription("https://example.com/a.ics", Some(10)).with_color(0xFF112233))
            .await
            .unwrap();
        source
            .put_credential(Credential::new(id, "alice", "pw"))
            .await
            .unwrap();

        let bytes = source.export_backup().await.unwrap().to_bytes().unwrap();

        let target = SubscriptionRepository::open_in_memory().await.unwrap();
        let summary = target
            .restore_backup(Backup::from_bytes(&bytes).unwrap(), false)
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.credentials_added, 1);

        assert_eq!(target.list().await.unwrap(), source.list().await.unwrap());
        assert_eq!(
            target.get_credential(id).await.unwrap().unwrap().username,
            "alice"
        );
    }

    #[tokio::test]
    async fn merge_keeps_newer_local_state() {
        let repo = SubscriptionRepository::open_in_memory().await.unwrap();
        let id = repo
            .add(subscription("https://example.com/a.ics", Some(500)))
            .await
            .unwrap();
        repo.put_credential(Credential::new(id, "local", "pw"))
            .await
            .unwrap();

        let mut stale = subscription("https://example.com/stale.ics", Some(100));
        stale.id = id;
        let mut fresh = subscription("https://example.com/b.ics", Some(1));
        fresh.id = id + 1;

        let backup = Backup {
            subscriptions: vec![stale, fresh],
            credentials: vec![Credential::new(id, "remote", "pw")],
        };
        let summary = repo.restore_backup(backup, false).await.unwrap();

        assert_eq!(summary.kept, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.credentials_skipped, 1);
        assert_eq!(
            repo.require(id).await.unwrap().url,
            "https://example.com/a.ics"
        );
        assert_eq!(
            repo.get_credential(id).await.unwrap().unwrap().username,
            "local"
        );
    }

    #[tokio::test]
    async fn merge_overwrites_with_newer_backup_copy() {
        let repo = SubscriptionRepository::open_in_memory().await.unwrap();
        let id = repo
            .add(subscription("https://example.com/a.ics", Some(100)))
            .await
            .unwrap();

        let mut newer = subscription("https://example.com/moved.ics", Some(900));
        newer.id = id;
        let summary = repo
            .restore_backup(
                Backup {
                    subscriptions: vec![newer],
                    credentials: Vec::new(),
                },
                false,
            )
            .await
            .unwrap();

        assert_eq!(summary.overwritten, 1);
        let stored = repo.require(id).await.unwrap();
        assert_eq!(stored.url, "https://example.com/moved.ics");
        assert_eq!(stored.last_sync, Some(900));
    }

    #[tokio::test]
    async fn clear_replaces_everything() {
        let repo = SubscriptionRepository::open_in_memory().await.unwrap();
        repo.add(subscription("https://example.com/old.ics", Some(1)))
            .await
            .unwrap();

        let mut only = subscription("https://example.com/new.ics", None);
        only.id = 40;
        let summary = repo
            .restore_backup(
                Backup {
                    subscriptions: vec![only],
                    credentials: vec![Credential::new(41, "nobody", "pw")],
                },
                true,
            )
            .await
            .unwrap();

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.credentials_skipped, 1);
        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, 40);
    }

    #[test]
    fn garbage_is_an_invalid_backup() {
        let err = Backup::from_bytes(b"{\"credentials\": []}").unwrap_err();
        assert!(matches!(err, ServerError::InvalidBackup { .. }));
    }

    #[test]
    fn backup_json_uses_stable_keys() {
        let backup = Backup {
            subscriptions: vec![Subscription::new("https://example.com/a.ics", "A")],
            credentials: vec![Credential::new(1, "u", "p")],
        };
        let value: serde_json::Value =
            serde_json::from_slice(&backup.to_bytes().unwrap()).unwrap();
        assert_eq!(value["subscriptions"][0]["displayName"], "A");
        assert_eq!(value["credentials"][0]["subscriptionId"], 1);
        assert!(value["subscriptions"][0].get("eTag").is_none());
    }
}
