//! Diff engine between stored and freshly parsed entries.
//!
//! [`reconcile`] is a pure function: it compares the entries currently held
//! by the calendar store for one subscription against a newly parsed set and
//! produces a [`ReconcilePlan`] of disjoint insert/update/delete operations.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::entry::{CalendarEntry, StoredEntry};

/// Options controlling how a plan is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Re-apply every known entry regardless of its timestamp.
    pub force_resync: bool,
    /// The incoming set is the complete feed, so absent UIDs may be deleted.
    pub complete: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            force_resync: false,
            complete: true,
        }
    }
}

impl ReconcileOptions {
    /// Builder method to set force resync.
    #[must_use]
    pub fn with_force_resync(mut self, force: bool) -> Self {
        self.force_resync = force;
        self
    }

    /// Builder method to set completeness of the incoming set.
    #[must_use]
    pub fn with_complete(mut self, complete: bool) -> Self {
        self.complete = complete;
        self
    }
}

/// An entry scheduled for insert or update, keyed by its UID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub uid: String,
    pub entry: CalendarEntry,
}

/// An incoming entry that could not be planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    /// Position of the entry in the incoming set.
    pub index: usize,
    /// Why it was rejected.
    pub reason: String,
}

/// Operation counts of a plan or of its application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Entries that were rejected or failed to apply.
    pub skipped: usize,
}

impl ChangeCounts {
    /// Returns the number of applied operations.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// The add/update/delete plan for one subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_insert: Vec<PlannedEntry>,
    pub to_update: Vec<PlannedEntry>,
    /// UIDs to remove, sorted.
    pub to_delete: Vec<String>,
    pub rejected: Vec<RejectedEntry>,
}

impl ReconcilePlan {
    /// Returns true if applying the plan would change nothing.
    pub fn is_noop(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Returns the planned operation counts.
    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            inserted: self.to_insert.len(),
            updated: self.to_update.len(),
            deleted: self.to_delete.len(),
            skipped: self.rejected.len(),
        }
    }
}

/// Computes the plan turning `stored` into `incoming`.
///
/// - A UID not in `stored` is inserted.
/// - A known UID is updated when `force_resync` is set or it changed (see
///   [`has_changed`]).
/// - Stored UIDs missing from `incoming` are deleted only when `complete`.
/// - Entries without a usable UID, or repeating a UID already seen, are
///   rejected individually.
pub fn reconcile(
    stored: &HashMap<String, StoredEntry>,
    incoming: Vec<CalendarEntry>,
    options: ReconcileOptions,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(incoming.len());

    for (index, entry) in incoming.into_iter().enumerate() {
        let Some(uid) = entry.usable_uid().map(str::to_string) else {
            plan.rejected.push(RejectedEntry {
                index,
                reason: "entry has no UID".to_string(),
            });
            continue;
        };

        if !seen.insert(uid.clone()) {
            plan.rejected.push(RejectedEntry {
                index,
                reason: format!("duplicate UID {}", uid),
            });
            continue;
        }

        match stored.get(&uid) {
            None => plan.to_insert.push(PlannedEntry { uid, entry }),
            Some(previous) if options.force_resync || has_changed(previous, &entry) => {
                plan.to_update.push(PlannedEntry { uid, entry })
            }
            Some(_) => {}
        }
    }

    if options.complete {
        plan.to_delete = stored
            .keys()
            .filter(|uid| !seen.contains(*uid))
            .cloned()
            .collect();
        plan.to_delete.sort();
    }

    plan
}

/// Decides whether an incoming entry differs from what was stored.
///
/// When both sides carry a timestamp the entry changed only if the new one
/// is strictly greater. Without a new timestamp the content fingerprints are
/// compared instead.
pub fn has_changed(previous: &StoredEntry, entry: &CalendarEntry) -> bool {
    match (previous.last_modified, entry.last_modified()) {
        (Some(old), Some(new)) => new > old,
        (None, Some(_)) => true,
        (_, None) => previous.fingerprint.as_deref() != Some(entry.fingerprint.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EventData;

    fn entry(uid: &str, ts: Option<i64>) -> CalendarEntry {
        let event = EventData {
            summary: Some(format!("event {}", uid)),
            last_modified: ts,
            ..Default::default()
        };
        CalendarEntry::new(Some(uid.to_string()), event, format!("fp-{}", uid))
    }

    fn stored(pairs: &[(&str, i64)]) -> HashMap<String, StoredEntry> {
        pairs
            .iter()
            .map(|(uid, ts)| (uid.to_string(), StoredEntry::with_timestamp(*ts)))
            .collect()
    }

    fn uids(planned: &[PlannedEntry]) -> Vec<&str> {
        planned.iter().map(|p| p.uid.as_str()).collect()
    }

    #[test]
    fn inserts_new_deletes_missing_and_skips_unchanged() {
        let stored = stored(&[("A", 100), ("B", 100)]);
        let incoming = vec![entry("A", Some(100)), entry("C", Some(50))];

        let plan = reconcile(&stored, incoming, ReconcileOptions::default());

        assert_eq!(uids(&plan.to_insert), vec!["C"]);
        assert!(plan.to_update.is_empty());
        assert_eq!(plan.to_delete, vec!["B".to_string()]);
        assert!(plan.rejected.is_empty());
    }

    #[test]
    fn force_resync_updates_unchanged_entries() {
        let stored = stored(&[("A", 100), ("B", 100)]);
        let incoming = vec![entry("A", Some(100)), entry("C", Some(50))];

        let plan = reconcile(
            &stored,
            incoming,
            ReconcileOptions::default().with_force_resync(true),
        );

        assert_eq!(uids(&plan.to_insert), vec!["C"]);
        assert_eq!(uids(&plan.to_update), vec!["A"]);
        assert_eq!(plan.to_delete, vec!["B".to_string()]);
    }

    #[test]
    fn newer_timestamp_updates_and_older_does_not() {
        let stored = stored(&[("A", 100), ("B", 100)]);
        let incoming = vec![entry("A", Some(101)), entry("B", Some(99))];

        let plan = reconcile(&stored, incoming, ReconcileOptions::default());

        assert_eq!(uids(&plan.to_update), vec!["A"]);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn incomplete_set_never_deletes() {
        let stored = stored(&[("A", 100), ("B", 100)]);

        let plan = reconcile(
            &stored,
            Vec::new(),
            ReconcileOptions::default().with_complete(false),
        );

        assert!(plan.to_delete.is_empty());
        assert!(plan.is_noop());
    }

    #[test]
    fn missing_uid_is_rejected_without_aborting() {
        let mut nameless = entry("x", Some(1));
        nameless.uid = None;
        let incoming = vec![nameless, entry("A", Some(1))];

        let plan = reconcile(&HashMap::new(), incoming, ReconcileOptions::default());

        assert_eq!(uids(&plan.to_insert), vec!["A"]);
        assert_eq!(plan.rejected.len(), 1);
        assert_eq!(plan.rejected[0].index, 0);
        assert_eq!(plan.counts().skipped, 1);
    }

    #[test]
    fn duplicate_uid_is_rejected() {
        let incoming = vec![entry("A", Some(1)), entry("A", Some(2))];

        let plan = reconcile(&HashMap::new(), incoming, ReconcileOptions::default());

        assert_eq!(plan.to_insert.len(), 1);
        assert_eq!(plan.rejected.len(), 1);
        assert!(plan.rejected[0].reason.contains("duplicate"));
    }

    #[test]
    fn applying_the_same_feed_twice_is_a_noop() {
        let incoming = vec![entry("A", Some(100)), entry("B", None)];
        let first = reconcile(&HashMap::new(), incoming.clone(), ReconcileOptions::default());
        assert_eq!(first.counts().inserted, 2);

        let after_first: HashMap<String, StoredEntry> = first
            .to_insert
            .iter()
            .map(|p| (p.uid.clone(), p.entry.stored()))
            .collect();

        let second = reconcile(&after_first, incoming, ReconcileOptions::default());
        assert!(second.is_noop());
    }

    #[test]
    fn missing_timestamp_falls_back_to_fingerprint() {
        let previous = StoredEntry {
            last_modified: None,
            fingerprint: Some("fp-A".to_string()),
        };
        assert!(!has_changed(&previous, &entry("A", None)));

        let mut edited = entry("A", None);
        edited.fingerprint = "fp-A-edited".to_string();
        assert!(has_changed(&previous, &edited));

        assert!(has_changed(&previous, &entry("A", Some(5))));
    }

    #[test]
    fn change_counts_total() {
        let counts = ChangeCounts {
            inserted: 2,
            updated: 1,
            deleted: 3,
            skipped: 4,
        };
        assert_eq!(counts.total(), 6);
    }
}
