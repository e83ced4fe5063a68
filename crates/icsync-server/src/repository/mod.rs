//! Persistent subscription and credential records.
//!
//! Subscriptions live in a small SQLite database accessed through
//! `tokio-rusqlite`, so every query runs on the connection's own thread and
//! the async callers never block.

mod backup;
mod schema;

use rusqlite::{OptionalExtension, Row, params};
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use icsync_core::{Credential, Subscription, SyncFilter, now_millis};

use crate::error::{ServerError, ServerResult};

pub use backup::{Backup, RestoreSummary};
pub use schema::SCHEMA;

const SUBSCRIPTION_COLUMNS: &str = "id, calendar_id, url, etag, display_name, last_modified, \
     last_sync, error_message, ignore_embedded_alerts, default_alarm_minutes, \
     default_all_day_alarm_minutes, ignore_description, color, sync_enabled, visible";

/// Stores subscriptions and their credentials.
pub struct SubscriptionRepository {
    conn: Connection,
}

impl SubscriptionRepository {
    /// Opens (and creates if needed) the database at `path`.
    pub async fn open(path: impl AsRef<std::path::Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path).await?;
        info!(path = %path.display(), "Opened subscription database");
        Self::init(conn).await
    }

    /// Opens a database that lives only as long as this value.
    pub async fn open_in_memory() -> ServerResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> ServerResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    // Subscription operations

    /// Stores a new subscription and returns its id. The `id` field is ignored.
    pub async fn add(&self, subscription: Subscription) -> ServerResult<i64> {
        let id = self
            .conn
            .call(move |conn| Ok(insert_subscription(conn, &subscription, false)?))
            .await?;
        debug!(subscription_id = id, "Added subscription");
        Ok(id)
    }

    /// Returns a subscription by id.
    pub async fn get(&self, id: i64) -> ServerResult<Option<Subscription>> {
        let subscription = self
            .conn
            .call(move |conn| {
                let subscription = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM subscriptions WHERE id = ?1",
                            SUBSCRIPTION_COLUMNS
                        ),
                        params![id],
                        subscription_from_row,
                    )
                    .optional()?;
                Ok(subscription)
            })
            .await?;
        Ok(subscription)
    }

    /// Returns a subscription by id, failing if it does not exist.
    pub async fn require(&self, id: i64) -> ServerResult<Subscription> {
        self.get(id)
            .await?
            .ok_or_else(|| ServerError::subscription_not_found(id))
    }

    /// Returns every subscription, ordered by id.
    pub async fn list(&self) -> ServerResult<Vec<Subscription>> {
        let subscriptions = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM subscriptions ORDER BY id",
                    SUBSCRIPTION_COLUMNS
                ))?;
                let subscriptions = stmt
                    .query_map([], subscription_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(subscriptions)
            })
            .await?;
        Ok(subscriptions)
    }

    /// Returns the enabled subscriptions a pass with `filter` processes.
    pub async fn list_for_filter(&self, filter: SyncFilter) -> ServerResult<Vec<Subscription>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|subscription| subscription.matches(filter))
            .collect())
    }

    /// Returns the first subscription with the given locator.
    pub async fn find_by_url(&self, url: &str) -> ServerResult<Option<Subscription>> {
        let url = url.to_string();
        let subscription = self
            .conn
            .call(move |conn| {
                let subscription = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM subscriptions WHERE url = ?1 ORDER BY id LIMIT 1",
                            SUBSCRIPTION_COLUMNS
                        ),
                        params![url],
                        subscription_from_row,
                    )
                    .optional()?;
                Ok(subscription)
            })
            .await?;
        Ok(subscription)
    }

    /// Overwrites every stored field of an existing subscription.
    pub async fn update(&self, subscription: Subscription) -> ServerResult<()> {
        let id = subscription.id;
        let changed = self
            .conn
            .call(move |conn| Ok(update_subscription(conn, &subscription)?))
            .await?;
        if changed == 0 {
            return Err(ServerError::subscription_not_found(id));
        }
        Ok(())
    }

    /// Deletes a subscription and its credential. Returns false if it did
    /// not exist.
    pub async fn delete(&self, id: i64) -> ServerResult<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute("DELETE FROM subscriptions WHERE id = ?1", params![id])?;
                Ok(deleted)
            })
            .await?;
        if deleted > 0 {
            info!(subscription_id = id, "Deleted subscription");
        }
        Ok(deleted > 0)
    }

    /// Links a subscription to a native calendar, or unlinks it with `None`.
    pub async fn set_calendar_id(&self, id: i64, calendar_id: Option<i64>) -> ServerResult<()> {
        self.execute_for(
            id,
            "UPDATE subscriptions SET calendar_id = ?2 WHERE id = ?1",
            calendar_id,
        )
        .await
    }

    /// Replaces the source locator, e.g. after a permanent redirect.
    pub async fn set_url(&self, id: i64, url: &str) -> ServerResult<()> {
        self.execute_for(
            id,
            "UPDATE subscriptions SET url = ?2 WHERE id = ?1",
            url.to_string(),
        )
        .await
    }

    /// Records a successful sync: new validators, sync time, no error.
    pub async fn update_status_success(
        &self,
        id: i64,
        etag: Option<String>,
        last_modified: Option<i64>,
    ) -> ServerResult<()> {
        let now = now_millis();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE subscriptions SET etag = ?2, last_modified = ?3, last_sync = ?4,
                     error_message = NULL WHERE id = ?1",
                    params![id, etag, last_modified, now],
                )?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(ServerError::subscription_not_found(id));
        }
        Ok(())
    }

    /// Records a sync the source answered with "not modified".
    ///
    /// The stored validators are left untouched.
    pub async fn update_status_not_modified(&self, id: i64) -> ServerResult<()> {
        self.execute_for(
            id,
            "UPDATE subscriptions SET last_sync = ?2, error_message = NULL WHERE id = ?1",
            now_millis(),
        )
        .await
    }

    /// Records a failed sync.
    pub async fn update_status_error(&self, id: i64, message: &str) -> ServerResult<()> {
        self.execute_for(
            id,
            "UPDATE subscriptions SET error_message = ?2 WHERE id = ?1",
            message.to_string(),
        )
        .await
    }

    async fn execute_for<V>(&self, id: i64, sql: &'static str, value: V) -> ServerResult<()>
    where
        V: rusqlite::ToSql + Send + 'static,
    {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(sql, params![id, value])?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(ServerError::subscription_not_found(id));
        }
        Ok(())
    }

    // Credential operations

    /// Creates or replaces the credential of a subscription.
    pub async fn put_credential(&self, credential: Credential) -> ServerResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO credentials (subscription_id, username, password)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(subscription_id) DO UPDATE SET
                         username = excluded.username,
                         password = excluded.password",
                    params![
                        credential.subscription_id,
                        credential.username,
                        credential.password
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Returns the credential of a subscription.
    pub async fn get_credential(&self, subscription_id: i64) -> ServerResult<Option<Credential>> {
        let credential = self
            .conn
            .call(move |conn| {
                let credential = conn
                    .query_row(
                        "SELECT subscription_id, username, password FROM credentials
                         WHERE subscription_id = ?1",
                        params![subscription_id],
                        credential_from_row,
                    )
                    .optional()?;
                Ok(credential)
            })
            .await?;
        Ok(credential)
    }

    /// Removes the credential of a subscription. Returns false if there was
    /// none.
    pub async fn remove_credential(&self, subscription_id: i64) -> ServerResult<bool> {
        let removed = self
            .conn
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM credentials WHERE subscription_id = ?1",
                    params![subscription_id],
                )?;
                Ok(removed)
            })
            .await?;
        Ok(removed > 0)
    }

    /// Returns every credential, ordered by subscription id.
    pub async fn list_credentials(&self) -> ServerResult<Vec<Credential>> {
        let credentials = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT subscription_id, username, password FROM credentials
                     ORDER BY subscription_id",
                )?;
                let credentials = stmt
                    .query_map([], credential_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(credentials)
            })
            .await?;
        Ok(credentials)
    }
}

/// Inserts a subscription row. With `keep_id` a positive `id` is kept,
/// otherwise SQLite assigns one.
fn insert_subscription(
    conn: &rusqlite::Connection,
    subscription: &Subscription,
    keep_id: bool,
) -> rusqlite::Result<i64> {
    let id = Some(subscription.id).filter(|id| keep_id && *id > 0);
    conn.execute(
        "INSERT INTO subscriptions (id, calendar_id, url, etag, display_name, last_modified,
         last_sync, error_message, ignore_embedded_alerts, default_alarm_minutes,
         default_all_day_alarm_minutes, ignore_description, color, sync_enabled, visible)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            id,
            subscription.calendar_id,
            subscription.url,
            subscription.etag,
            subscription.display_name,
            subscription.last_modified,
            subscription.last_sync,
            subscription.error_message,
            subscription.ignore_embedded_alerts,
            subscription.default_alarm_minutes,
            subscription.default_all_day_alarm_minutes,
            subscription.ignore_description,
            subscription.color.map(i64::from),
            subscription.sync_enabled,
            subscription.visible,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Overwrites every column of the row with the subscription's id.
fn update_subscription(
    conn: &rusqlite::Connection,
    subscription: &Subscription,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE subscriptions SET calendar_id = ?2, url = ?3, etag = ?4,
         display_name = ?5, last_modified = ?6, last_sync = ?7, error_message = ?8,
         ignore_embedded_alerts = ?9, default_alarm_minutes = ?10,
         default_all_day_alarm_minutes = ?11, ignore_description = ?12, color = ?13,
         sync_enabled = ?14, visible = ?15
         WHERE id = ?1",
        params![
            subscription.id,
            subscription.calendar_id,
            subscription.url,
            subscription.etag,
            subscription.display_name,
            subscription.last_modified,
            subscription.last_sync,
            subscription.error_message,
            subscription.ignore_embedded_alerts,
            subscription.default_alarm_minutes,
            subscription.default_all_day_alarm_minutes,
            subscription.ignore_description,
            subscription.color.map(i64::from),
            subscription.sync_enabled,
            subscription.visible,
        ],
    )
}

fn subscription_from_row(row: &Row) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        calendar_id: row.get(1)?,
        url: row.get(2)?,
        etag: row.get(3)?,
        display_name: row.get(4)?,
        last_modified: row.get(5)?,
        last_sync: row.get(6)?,
        error_message: row.get(7)?,
        ignore_embedded_alerts: row.get(8)?,
        default_alarm_minutes: row.get(9)?,
        default_all_day_alarm_minutes: row.get(10)?,
        ignore_description: row.get(11)?,
        color: row.get::<_, Option<i64>>(12)?.map(|color| color as u32),
        sync_enabled: row.get(13)?,
        visible: row.get(14)?,
    })
}

fn credential_from_row(row: &Row) -> rusqlite::Result<Credential> {
    Ok(Credential {
        subscription_id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repository() -> SubscriptionRepository {
        SubscriptionRepository::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn add_and_get_preserve_fields() {
        let repo = repository().await;
        let sub = Subscription::new("https://example.com/a.ics", "A")
            .with_color(0xFFADD8E6)
            .with_default_alarms(Some(15), None)
            .with_ignore_description(true);

        let id = repo.add(sub.clone()).await.unwrap();
        let stored = repo.get(id).await.unwrap().unwrap();

        assert_eq!(stored, Subscription { id, ..sub });
        assert!(repo.get(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_for_filter_splits_network_and_local() {
        let repo = repository().await;
        repo.add(Subscription::new("https://example.com/a.ics", "A"))
            .await
            .unwrap();
        repo.add(Subscription::new("file:///tmp/b.ics", "B"))
            .await
            .unwrap();
        let mut disabled = Subscription::new("webcal://example.com/c.ics", "C");
        disabled.sync_enabled = false;
        repo.add(disabled).await.unwrap();

        let network = repo.list_for_filter(SyncFilter::NetworkOnly).await.unwrap();
        let local = repo.list_for_filter(SyncFilter::LocalOnly).await.unwrap();
        assert_eq!(network.len(), 1);
        assert_eq!(network[0].display_name, "A");
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].display_name, "B");
    }

    #[tokio::test]
    async fn status_updates() {
        let repo = repository().await;
        let id = repo
            .add(Subscription::new("https://example.com/a.ics", "A"))
            .await
            .unwrap();

        repo.update_status_error(id, "boom").await.unwrap();
        assert_eq!(
            repo.require(id).await.unwrap().error_message.as_deref(),
            Some("boom")
        );

        repo.update_status_success(id, Some("\"abc\"".to_string()), Some(1_000))
            .await
            .unwrap();
        let sub = repo.require(id).await.unwrap();
        assert_eq!(sub.etag.as_deref(), Some("\"abc\""));
        assert_eq!(sub.last_modified, Some(1_000));
        assert!(sub.last_sync.is_some());
        assert!(sub.error_message.is_none());

        repo.update_status_error(id, "again").await.unwrap();
        repo.update_status_not_modified(id).await.unwrap();
        let after = repo.require(id).await.unwrap();
        assert_eq!(after.etag.as_deref(), Some("\"abc\""));
        assert_eq!(after.last_modified, Some(1_000));
        assert!(after.error_message.is_none());
        assert!(after.last_sync >= sub.last_sync);
    }

    #[tokio::test]
    async fn unknown_id_is_reported() {
        let repo = repository().await;
        let err = repo.update_status_not_modified(9).await.unwrap_err();
        assert!(matches!(err, ServerError::SubscriptionNotFound { id: 9 }));
        assert!(!repo.delete(9).await.unwrap());
    }

    #[tokio::test]
    async fn url_and_calendar_links() {
        let repo = repository().await;
        let id = repo
            .add(Subscription::new("http://old.example.com/a.ics", "A"))
            .await
            .unwrap();

        repo.set_url(id, "https://new.example.com/a.ics").await.unwrap();
        repo.set_calendar_id(id, Some(12)).await.unwrap();

        let found = repo
            .find_by_url("https://new.example.com/a.ics")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.calendar_id, Some(12));
        assert!(
            repo.find_by_url("http://old.example.com/a.ics")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn credentials_cascade_on_delete() {
        let repo = repository().await;
        let id = repo
            .add(Subscription::new("https://example.com/a.ics", "A"))
            .await
            .unwrap();

        repo.put_credential(Credential::new(id, "alice", "one"))
            .await
            .unwrap();
        repo.put_credential(Credential::new(id, "alice", "two"))
            .await
            .unwrap();
        assert_eq!(
            repo.get_credential(id).await.unwrap().unwrap().password,
            "two"
        );

        assert!(repo.delete(id).await.unwrap());
        assert!(repo.get_credential(id).await.unwrap().is_none());
        assert!(repo.list_credentials().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn credential_requires_subscription() {
        let repo = repository().await;
        let err = repo
            .put_credential(Credential::new(77, "alice", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Database(_)));
    }

    #[tokio::test]
    async fn remove_credential_reports_presence() {
        let repo = repository().await;
        let id = repo
            .add(Subscription::new("https://example.com/a.ics", "A"))
            .await
            .unwrap();
        assert!(!repo.remove_credential(id).await.unwrap());
        repo.put_credential(Credential::new(id, "u", "p"))
            .await
            .unwrap();
        assert!(repo.remove_credential(id).await.unwrap());
    }
}
