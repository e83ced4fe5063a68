//! Results of a sync pass.
//!
//! Each processed subscription yields a [`SyncResult`]; the pass folds them
//! into a single [`PassOutcome`] for the scheduler.

use serde::Serialize;

use crate::reconcile::ChangeCounts;

/// What happened to one subscription during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncResult {
    /// The source confirmed nothing changed.
    NotModified,
    /// The feed was fetched and applied.
    Updated {
        #[serde(flatten)]
        counts: ChangeCounts,
    },
    /// The subscription could not be synced.
    Failed {
        /// Error code name.
        code: String,
        /// Error message recorded on the subscription.
        message: String,
        /// Whether a later pass may succeed without user action.
        retryable: bool,
    },
}

impl SyncResult {
    /// Returns true if this is a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Result for one subscription, tagged with its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionReport {
    pub subscription_id: i64,
    pub url: String,
    pub result: SyncResult,
}

/// Overall outcome of a pass, as reported to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// Every subscription synced or was already current.
    Success,
    /// At least one subscription failed in a way retrying will not fix.
    Failure,
    /// The pass should run again later.
    Retry,
}

impl PassOutcome {
    /// Folds per-subscription results into a pass outcome.
    ///
    /// Any non-retryable failure fails the pass. Otherwise any retryable
    /// failure asks for a retry.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a SyncResult>) -> Self {
        let mut outcome = Self::Success;
        for result in results {
            match result {
                SyncResult::Failed {
                    retryable: false, ..
                } => return Self::Failure,
                SyncResult::Failed {
                    retryable: true, ..
                } => outcome = Self::Retry,
                _ => {}
            }
        }
        outcome
    }

    /// Merges the outcomes of two passes; Failure beats Retry beats Success.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Failure, _) | (_, Self::Failure) => Self::Failure,
            (Self::Retry, _) | (_, Self::Retry) => Self::Retry,
            _ => Self::Success,
        }
    }

    /// Process exit code for this outcome (75 is `EX_TEMPFAIL`).
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Retry => 75,
        }
    }

    /// Returns a short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Retry => "retry",
        }
    }
}

impl std::fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a pass did, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub outcome: PassOutcome,
    /// Subscriptions created by legacy migration.
    pub migrated: usize,
    pub results: Vec<SubscriptionReport>,
}

impl PassReport {
    /// Creates a report with the given outcome and no results.
    pub fn new(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            migrated: 0,
            results: Vec::new(),
        }
    }

    /// Returns the result recorded for a subscription.
    pub fn result_for(&self, subscription_id: i64) -> Option<&SyncResult> {
        self.results
            .iter()
            .find(|r| r.subscription_id == subscription_id)
            .map(|r| &r.result)
    }

    /// Sums the change counts of every updated subscription.
    pub fn total_changes(&self) -> ChangeCounts {
        self.results
            .iter()
            .fold(ChangeCounts::default(), |mut acc, report| {
                if let SyncResult::Updated { counts } = &report.result {
                    acc.inserted += counts.inserted;
                    acc.updated += counts.updated;
                    acc.deleted += counts.deleted;
                    acc.skipped += counts.skipped;
                }
                acc
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(retryable: bool) -> SyncResult {
        SyncResult::Failed {
            code: "x".to_string(),
            message: "boom".to_string(),
            retryable,
        }
    }

    #[test]
    fn non_retryable_failure_wins() {
        let results = [failed(true), SyncResult::NotModified, failed(false)];
        assert_eq!(PassOutcome::from_results(&results), PassOutcome::Failure);
    }

    #[test]
    fn retryable_failure_retries() {
        let results = [
            SyncResult::Updated {
                counts: ChangeCounts::default(),
            },
            failed(true),
        ];
        assert_eq!(PassOutcome::from_results(&results), PassOutcome::Retry);
    }

    #[test]
    fn empty_pass_succeeds() {
        let none: [SyncResult; 0] = [];
        assert_eq!(PassOutcome::from_results(&none), PassOutcome::Success);
        assert_eq!(PassOutcome::Success.exit_code(), 0);
        assert_eq!(PassOutcome::Failure.exit_code(), 1);
        assert_eq!(PassOutcome::Retry.exit_code(), 75);
    }

    #[test]
    fn combined_outcomes_keep_the_worst() {
        use PassOutcome::*;
        assert_eq!(Success.combine(Success), Success);
        assert_eq!(Success.combine(Retry), Retry);
        assert_eq!(Retry.combine(Failure), Failure);
        assert_eq!(Failure.combine(Success), Failure);
    }

    #[test]
    fn report_serializes_status_tag() {
        let report = SubscriptionReport {
            subscription_id: 1,
            url: "https://example.com/a.ics".to_string(),
            result: SyncResult::Updated {
                counts: ChangeCounts {
                    inserted: 2,
                    ..Default::default()
                },
            },
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["result"]["status"], "updated");
        assert_eq!(json["result"]["inserted"], 2);
    }
}
