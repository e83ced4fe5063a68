//! In-memory calendar store.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use icsync_core::{CalendarEntry, ChangeCounts, ReconcilePlan, StoredEntry};
use icsync_providers::{BoxFuture, ProviderResult, SyncError};

use super::{CalendarProperties, CalendarStore, NativeCalendar};

/// A failure the store can be told to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// Every call fails with `StorageUnavailable`.
    Unavailable,
    /// Every call fails with `PermissionDenied`.
    PermissionDenied,
}

impl StoreFault {
    fn error(self) -> SyncError {
        match self {
            Self::Unavailable => SyncError::storage_unavailable("Calendar storage is unreachable"),
            Self::PermissionDenied => {
                SyncError::permission_denied("Calendar storage access was revoked")
            }
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    calendars: BTreeMap<i64, NativeCalendar>,
    entries: HashMap<i64, BTreeMap<String, CalendarEntry>>,
    next_id: i64,
    fault: Option<StoreFault>,
    operations: usize,
}

impl MemoryState {
    fn check(&self) -> ProviderResult<()> {
        match self.fault {
            Some(fault) => Err(fault.error()),
            None => Ok(()),
        }
    }

    fn insert_calendar(&mut self, mut calendar: NativeCalendar) -> i64 {
        self.next_id += 1;
        calendar.id = self.next_id;
        self.calendars.insert(calendar.id, calendar);
        self.entries.entry(self.next_id).or_default();
        self.next_id
    }
}

/// Calendar storage kept in memory, with fault injection.
#[derive(Debug, Default)]
pub struct MemoryCalendarStore {
    state: RwLock<MemoryState>,
}

impl MemoryCalendarStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail, or clears the fault with `None`.
    pub async fn set_fault(&self, fault: Option<StoreFault>) {
        self.state.write().await.fault = fault;
    }

    /// Adds a calendar as it was before subscription records existed.
    ///
    /// The id field of `calendar` is ignored; the assigned id is returned.
    pub async fn add_calendar(&self, calendar: NativeCalendar) -> i64 {
        self.state.write().await.insert_calendar(calendar)
    }

    /// Returns a calendar by id.
    pub async fn calendar(&self, id: i64) -> Option<NativeCalendar> {
        self.state.read().await.calendars.get(&id).cloned()
    }

    /// Returns the entries of a calendar, ordered by UID.
    pub async fn entries(&self, calendar_id: i64) -> Vec<CalendarEntry> {
        self.state
            .read()
            .await
            .entries
            .get(&calendar_id)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of entry writes and deletes performed so far.
    pub async fn operations(&self) -> usize {
        self.state.read().await.operations
    }
}

impl CalendarStore for MemoryCalendarStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn check_access(&self) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move { self.state.read().await.check() })
    }

    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<NativeCalendar>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            state.check()?;
            Ok(state.calendars.values().cloned().collect())
        })
    }

    fn create_calendar(
        &self,
        properties: CalendarProperties,
    ) -> BoxFuture<'_, ProviderResult<i64>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.check()?;
            let id = state.insert_calendar(NativeCalendar {
                id: 0,
                subscription_id: Some(properties.subscription_id),
                url: Some(properties.url),
                display_name: properties.display_name,
                color: properties.color,
                visible: properties.visible,
                managed: true,
                legacy_credentials: None,
            });
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
            let mut state = self.state.write().await;
            state.check()?;
            let calendar = state.calendars.get_mut(&id).ok_or_else(|| {
                SyncError::storage_unavailable(format!("Calendar {} does not exist", id))
            })?;
            calendar.subscription_id = Some(properties.subscription_id);
            calendar.url = Some(properties.url);
            calendar.display_name = properties.display_name;
            calendar.color = properties.color;
            calendar.visible = properties.visible;
            Ok(())
        })
    }

    fn delete_calendar(&self, id: i64) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.check()?;
            state.calendars.remove(&id);
            state.entries.remove(&id);
            Ok(())
        })
    }

    fn mark_managed(&self, id: i64) -> BoxFuture<'_, ProviderResult<()>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.check()?;
            if let Some(calendar) = state.calendars.get_mut(&id) {
                calendar.managed = true;
            }
            Ok(())
        })
    }

    fn read_entries(
        &self,
        calendar_id: i64,
    ) -> BoxFuture<'_, ProviderResult<HashMap<String, StoredEntry>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            state.check()?;
            Ok(state
                .entries
                .get(&calendar_id)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|(uid, entry)| (uid.clone(), entry.stored()))
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn apply_plan(
        &self,
        calendar_id: i64,
        plan: ReconcilePlan,
    ) -> BoxFuture<'_, ProviderResult<ChangeCounts>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            state.check()?;
            if !state.calendars.contains_key(&calendar_id) {
                return Err(SyncError::storage_unavailable(format!(
                    "Calendar {} does not exist",
                    calendar_id
                )));
            }

            let mut counts = ChangeCounts {
                skipped: plan.rejected.len(),
                ..Default::default()
            };
            let mut operations = 0;
            let entries = state.entries.entry(calendar_id).or_default();

            for planned in plan.to_insert {
                if entries.contains_key(&planned.uid) {
                    warn!(uid = %planned.uid, "Entry already exists, skipping insert");
                    counts.skipped += 1;
                    continue;
                }
                entries.insert(planned.uid, planned.entry);
                counts.inserted += 1;
                operations += 1;
            }

            for planned in plan.to_update {
                match entries.get_mut(&planned.uid) {
                    Some(existing) => {
                        *existing = planned.entry;
                        counts.updated += 1;
                        operations += 1;
                    }
                    None => {
                        warn!(uid = %planned.uid, "Entry vanished, skipping update");
                        counts.skipped += 1;
                    }
                }
            }

            for uid in plan.to_delete {
                if entries.remove(&uid).is_some() {
                    counts.deleted += 1;
                    operations += 1;
                }
            }

            state.operations += operations;
            Ok(counts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icsync_core::{EventData, PlannedEntry, RejectedEntry};
    use icsync_providers::SyncErrorCode;

    fn props(subscription_id: i64) -> CalendarProperties {
        CalendarProperties {
            subscription_id,
            url: "https://example.com/a.ics".to_string(),
            display_name: "A".to_string(),
            color: 0xFF000000,
            visible: true,
        }
    }

    fn planned(uid: &str, ts: i64) -> PlannedEntry {
        let event = EventData {
            summary: Some(uid.to_string()),
            last_modified: Some(ts),
            ..Default::default()
        };
        PlannedEntry {
            uid: uid.to_string(),
            entry: CalendarEntry::new(Some(uid.to_string()), event, format!("fp-{}", uid)),
        }
    }

    #[tokio::test]
    async fn calendar_lifecycle() {
        let store = MemoryCalendarStore::new();
        let id = store.create_calendar(props(1)).await.unwrap();

        let calendar = store.calendar(id).await.unwrap();
        assert!(calendar.managed);
        assert_eq!(calendar.subscription_id, Some(1));

        let mut renamed = props(1);
        renamed.display_name = "B".to_string();
        store.update_calendar(id, renamed).await.unwrap();
        assert_eq!(store.calendar(id).await.unwrap().display_name, "B");

        store.delete_calendar(id).await.unwrap();
        assert!(store.list_calendars().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn apply_plan_counts_and_skips() {
        let store = MemoryCalendarStore::new();
        let id = store.create_calendar(props(1)).await.unwrap();

        let plan = ReconcilePlan {
            to_insert: vec![planned("a", 1), planned("b", 1)],
            rejected: vec![RejectedEntry {
                index: 2,
                reason: "entry has no UID".to_string(),
            }],
            ..Default::default()
        };
        let counts = store.apply_plan(id, plan).await.unwrap();
        assert_eq!(counts.inserted, 2);
        assert_eq!(counts.skipped, 1);

        let plan = ReconcilePlan {
            to_update: vec![planned("a", 2), planned("ghost", 2)],
            to_delete: vec!["b".to_string()],
            ..Default::default()
        };
        let counts = store.apply_plan(id, plan).await.unwrap();
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.deleted, 1);
        assert_eq!(counts.skipped, 1);

        let stored = store.read_entries(id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored["a"].last_modified, Some(2));
        assert_eq!(store.operations().await, 4);
    }

    #[tokio::test]
    async fn faults_are_reported_with_their_code() {
        let store = MemoryCalendarStore::new();

        store.set_fault(Some(StoreFault::Unavailable)).await;
        let err = store.list_calendars().await.unwrap_err();
        assert_eq!(err.code(), SyncErrorCode::StorageUnavailable);
        assert!(err.is_systemic());

        store.set_fault(Some(StoreFault::PermissionDenied)).await;
        let err = store.check_access().await.unwrap_err();
        assert_eq!(err.code(), SyncErrorCode::PermissionDenied);

        store.set_fault(None).await;
        assert!(store.check_access().await.is_ok());
    }

    #[tokio::test]
    async fn apply_to_missing_calendar_is_storage_failure() {
        let store = MemoryCalendarStore::new();
        let err = store
            .apply_plan(42, ReconcilePlan::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), SyncErrorCode::StorageUnavailable);
    }
}
