//! Calendar store backed by its own SQLite database.
//!
//! Each entry row keeps the UID, the change-detection record and the full
//! entry as JSON. A plan is applied inside one transaction, so a batch is
//! either fully written or not at all.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{ErrorCode, OptionalExtension, Row, params};
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use icsync_core::{ChangeCounts, ReconcilePlan, StoredEntry};
use icsync_providers::{BasicCredentials, BoxFuture, ProviderResult, SyncError};

use crate::error::ServerResult;

use super::{CalendarProperties, CalendarStore, NativeCalendar};

pub const CALENDAR_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS calendars (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subscription_id INTEGER,
    url TEXT,
    display_name TEXT NOT NULL,
    color INTEGER NOT NULL,
    visible INTEGER NOT NULL DEFAULT 1,
    managed INTEGER NOT NULL DEFAULT 0,
    legacy_username TEXT,
    legacy_password TEXT
);

CREATE INDEX IF NOT EXISTS idx_calendars_subscription_id ON calendars(subscription_id);

CREATE TABLE IF NOT EXISTS events (
    calendar_id INTEGER NOT NULL REFERENCES calendars(id) ON DELETE CASCADE,
    uid TEXT NOT NULL,
    last_modified INTEGER,
    fingerprint TEXT,
    payload TEXT NOT NULL,
    PRIMARY KEY (calendar_id, uid)
);
"#;

const CALENDAR_COLUMNS: &str =
    "id, subscription_id, url, display_name, color, visible, managed, legacy_username, legacy_password";

/// Calendar storage in a standalone SQLite file.
pub struct SqliteCalendarStore {
    conn: Connection,
}

impl SqliteCalendarStore {
    /// Opens (and creates if needed) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let conn = Connection::open(path).await?;
        info!(path = %path.display(), "Opened calendar store");
        Self::init(conn).await
    }

    /// Opens a store that lives only as long as this value.
    pub async fn open_in_memory() -> ServerResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> ServerResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(CALENDAR_SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

impl CalendarStore for SqliteCalendarStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn check_access(&self) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            self.conn
                .call(|conn| {
                    // Takes the write lock, so a read-only database fails here.
                    conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;")?;
                    Ok(())
                })
                .await
                .map_err(storage_error)
        })
    }

    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<NativeCalendar>>> {
        Box::pin(async move {
            self.conn
                .call(|conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM calendars ORDER BY id",
                        CALENDAR_COLUMNS
                    ))?;
                    let calendars = stmt
                        .query_map([], calendar_from_row)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(calendars)
                })
                .await
                .map_err(storage_error)
        })
    }

    fn create_calendar(
        &self,
        properties: CalendarProperties,
    ) -> BoxFuture<'_, ProviderResult<i64>> {
        Box::pin(async move {
            let id = self
                .conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO calendars (subscription_id, url, display_name, color, visible, managed)
                         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
                        params![
                            properties.subscription_id,
                            properties.url,
                            properties.display_name,
                            i64::from(properties.color),
                            properties.visible,
                        ],
                    )?;
                    Ok(conn.last_insert_rowid())
                })
                .await
                .map_err(storage_error)?;
            debug!(calendar_id = id, "Created calendar");
            Ok(id)
        })
    }

    fn update_calendar(
        &self,
        id: i64,
        properties: CalendarProperties,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            let changed = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        "UPDATE calendars SET subscription_id = ?2, url = ?3, display_name = ?4,
                         color = ?5, visible = ?6 WHERE id = ?1",
                        params![
                            id,
                            properties.subscription_id,
                            properties.url,
                            properties.display_name,
                            i64::from(properties.color),
                            properties.visible,
                        ],
                    )?;
                    Ok(changed)
                })
                .await
                .map_err(storage_error)?;
            if changed == 0 {
                return Err(SyncError::storage_unavailable(format!(
                    "Calendar {} does not exist",
                    id
                )));
            }
            Ok(())
        })
    }

    fn delete_calendar(&self, id: i64) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    conn.execute("DELETE FROM calendars WHERE id = ?1", params![id])?;
                    Ok(())
                })
                .await
                .map_err(storage_error)
        })
    }

    fn mark_managed(&self, id: i64) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "UPDATE calendars SET managed = 1, legacy_username = NULL,
                         legacy_password = NULL WHERE id = ?1",
                        params![id],
                    )?;
                    Ok(())
                })
                .await
                .map_err(storage_error)
        })
    }

    fn read_entries(
        &self,
        calendar_id: i64,
    ) -> BoxFuture<'_, ProviderResult<HashMap<String, StoredEntry>>> {
        Box::pin(async move {
            self.conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT uid, last_modified, fingerprint FROM events WHERE calendar_id = ?1",
                    )?;
                    let entries = stmt
                        .query_map(params![calendar_id], |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                StoredEntry {
                                    last_modified: row.get(1)?,
                                    fingerprint: row.get(2)?,
                                },
                            ))
                        })?
                        .collect::<Result<HashMap<_, _>, _>>()?;
                    Ok(entries)
                })
                .await
                .map_err(storage_error)
        })
    }

    fn apply_plan(
        &self,
        calendar_id: i64,
        plan: ReconcilePlan,
    ) -> BoxFuture<'_, ProviderResult<ChangeCounts>> {
        Box::pin(async move {
            let counts = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;

                    let exists = tx
                        .query_row(
                            "SELECT 1 FROM calendars WHERE id = ?1",
                            params![calendar_id],
                            |_| Ok(()),
                        )
                        .optional()?;
                    if exists.is_none() {
                        return Ok(None);
                    }

                    let mut counts = ChangeCounts {
                        skipped: plan.rejected.len(),
                        ..Default::default()
                    };

                    {
                        let mut insert = tx.prepare(
                            "INSERT INTO events (calendar_id, uid, last_modified, fingerprint, payload)
                             VALUES (?1, ?2, ?3, ?4, ?5)
                             ON CONFLICT(calendar_id, uid) DO NOTHING",
                        )?;
                        for planned in &plan.to_insert {
                            let Ok(payload) = serde_json::to_string(&planned.entry) else {
                                warn!(uid = %planned.uid, "Cannot encode entry, skipping");
                                counts.skipped += 1;
                                continue;
                            };
                            let stored = planned.entry.stored();
                            let written = insert.execute(params![
                                calendar_id,
                                planned.uid,
                                stored.last_modified,
                                stored.fingerprint,
                                payload,
                            ])?;
                            if written == 0 {
                                warn!(uid = %planned.uid, "Entry already exists, skipping insert");
                                counts.skipped += 1;
                            } else {
                                counts.inserted += 1;
                            }
                        }

                        let mut update = tx.prepare(
                            "UPDATE events SET last_modified = ?3, fingerprint = ?4, payload = ?5
                             WHERE calendar_id = ?1 AND uid = ?2",
                        )?;
                        for planned in &plan.to_update {
                            let Ok(payload) = serde_json::to_string(&planned.entry) else {
                                warn!(uid = %planned.uid, "Cannot encode entry, skipping");
                                counts.skipped += 1;
                                continue;
                            };
                            let stored = planned.entry.stored();
                            let written = update.execute(params![
                                calendar_id,
                                planned.uid,
                                stored.last_modified,
                                stored.fingerprint,
                                payload,
                            ])?;
                            if written == 0 {
                                warn!(uid = %planned.uid, "Entry vanished, skipping update");
                                counts.skipped += 1;
                            } else {
                                counts.updated += 1;
                            }
                        }

                        let mut delete =
                            tx.prepare("DELETE FROM events WHERE calendar_id = ?1 AND uid = ?2")?;
                        for uid in &plan.to_delete {
                            counts.deleted += delete.execute(params![calendar_id, uid])?;
                        }
                    }

                    tx.commit()?;
                    Ok(Some(counts))
                })
                .await
                .map_err(storage_error)?;

            counts.ok_or_else(|| {
                SyncError::storage_unavailable(format!("Calendar {} does not exist", calendar_id))
            })
        })
    }
}

fn calendar_from_row(row: &Row) -> rusqlite::Result<NativeCalendar> {
    let username: Option<String> = row.get(7)?;
    let password: Option<String> = row.get(8)?;
    Ok(NativeCalendar {
        id: row.get(0)?,
        subscription_id: row.get(1)?,
        url: row.get(2)?,
        display_name: row.get(3)?,
        color: row.get::<_, i64>(4)? as u32,
        visible: row.get(5)?,
        managed: row.get(6)?,
        legacy_credentials: username
            .zip(password)
            .map(|(username, password)| BasicCredentials::new(username, password)),
    })
}

/// Maps a database failure to the store error taxonomy.
fn storage_error(err: tokio_rusqlite::Error) -> SyncError {
    let denied = matches!(
        &err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(failure, _))
            if matches!(
                failure.code,
                ErrorCode::ReadOnly | ErrorCode::PermissionDenied | ErrorCode::CannotOpen
            )
    );
    if denied {
        SyncError::permission_denied(format!("Calendar storage refused access: {}", err))
            .with_source(err)
    } else {
        SyncError::storage_unavailable(format!("Calendar storage failed: {}", err)).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icsync_core::{CalendarEntry, EventData, PlannedEntry, RejectedEntry};

    fn props(subscription_id: i64, name: &str) -> CalendarProperties {
        CalendarProperties {
            subscription_id,
            url: format!("https://example.com/{}.ics", name),
            display_name: name.to_string(),
            color: 0xFFADD8E6,
            visible: true,
        }
    }

    fn planned(uid: &str, ts: Option<i64>) -> PlannedEntry {
        let event = EventData {
            summary: Some(format!("event {}", uid)),
            last_modified: ts,
            ..Default::default()
        };
        PlannedEntry {
            uid: uid.to_string(),
            entry: CalendarEntry::new(Some(uid.to_string()), event, format!("fp-{}", uid)),
        }
    }

    #[tokio::test]
    async fn calendars_round_trip_through_sqlite() {
        let store = SqliteCalendarStore::open_in_memory().await.unwrap();
        let id = store.create_calendar(props(1, "team")).await.unwrap();

        let calendars = store.list_calendars().await.unwrap();
        assert_eq!(calendars.len(), 1);
        assert_eq!(calendars[0].id, id);
        assert_eq!(calendars[0].color, 0xFFADD8E6);
        assert!(calendars[0].managed);
        assert!(calendars[0].legacy_credentials.is_none());

        store.update_calendar(id, props(1, "renamed")).await.unwrap();
        let calendars = store.list_calendars().await.unwrap();
        assert_eq!(calendars[0].display_name, "renamed");

        store.delete_calendar(id).await.unwrap();
        assert!(store.list_calendars().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn apply_plan_writes_one_batch() {
        let store = SqliteCalendarStore::open_in_memory().await.unwrap();
        let id = store.create_calendar(props(1, "team")).await.unwrap();

        let plan = ReconcilePlan {
            to_insert: vec![planned("a", Some(100)), planned("b", None)],
            rejected: vec![RejectedEntry {
                index: 2,
                reason: "entry has no UID".to_string(),
            }],
            ..Default::default()
        };
        let counts = store.apply_plan(id, plan).await.unwrap();
        assert_eq!(counts.inserted, 2);
        assert_eq!(counts.skipped, 1);

        let stored = store.read_entries(id).await.unwrap();
        assert_eq!(stored["a"].last_modified, Some(100));
        assert_eq!(stored["b"].last_modified, None);
        assert_eq!(stored["b"].fingerprint.as_deref(), Some("fp-b"));

        let plan = ReconcilePlan {
            to_update: vec![planned("a", Some(200))],
            to_delete: vec!["b".to_string(), "never-there".to_string()],
            ..Default::default()
        };
        let counts = store.apply_plan(id, plan).await.unwrap();
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.deleted, 1);

        let stored = store.read_entries(id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored["a"].last_modified, Some(200));
    }

    #[tokio::test]
    async fn deleting_calendar_drops_its_entries() {
        let store = SqliteCalendarStore::open_in_memory().await.unwrap();
        let id = store.create_calendar(props(1, "team")).await.unwrap();
        let plan = ReconcilePlan {
            to_insert: vec![planned("a", Some(1))],
            ..Default::default()
        };
        store.apply_plan(id, plan).await.unwrap();

        store.delete_calendar(id).await.unwrap();
        assert!(store.read_entries(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn apply_to_missing_calendar_fails() {
        let store = SqliteCalendarStore::open_in_memory().await.unwrap();
        let err = store
            .apply_plan(99, ReconcilePlan::default())
            .await
            .unwrap_err();
        assert!(err.is_systemic());
    }

    #[tokio::test]
    async fn file_store_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("calendars.db");

        let store = SqliteCalendarStore::open(&path).await.unwrap();
        store.check_access().await.unwrap();
        assert!(path.exists());
    }
}
