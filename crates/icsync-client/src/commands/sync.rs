//! One-shot sync pass and feed validation.

use serde_json::json;

use icsync_core::{PassOutcome, PassReport, SyncFilter, SyncResult, color_to_hex};
use icsync_providers::{BasicCredentials, FeedInfo, FetchRequest, Fetcher, validate_feed};
use icsync_server::PassRequest;

use crate::engine::Engine;
use crate::error::ClientResult;

/// Options of `icsync sync`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub force: bool,
    pub only_migrate: bool,
    pub json: bool,
}

/// Runs one pass per flow and returns the combined outcome.
///
/// Migration does not depend on the flow, so `only_migrate` runs once.
pub async fn run(
    engine: &Engine,
    flows: &[SyncFilter],
    options: SyncOptions,
) -> ClientResult<PassOutcome> {
    let mut outcome = PassOutcome::Success;
    let mut reports = Vec::with_capacity(flows.len());

    for &filter in flows {
        let request = PassRequest::new(filter)
            .with_force_resync(options.force)
            .with_only_migrate(options.only_migrate);
        let report = engine.orchestrator.run_pass(request).await;
        outcome = outcome.combine(report.outcome);
        reports.push((filter, report));
        if options.only_migrate {
            break;
        }
    }

    if options.json {
        let flows: Vec<_> = reports
            .iter()
            .map(|(filter, report)| json!({ "flow": filter.as_str(), "report": report }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "outcome": outcome, "flows": flows }))?
        );
    } else {
        for (filter, report) in &reports {
            print_report(*filter, report);
        }
    }

    Ok(outcome)
}

fn print_report(filter: SyncFilter, report: &PassReport) {
    let totals = report.total_changes();
    println!(
        "{}: {} ({} subscriptions, {} inserted, {} updated, {} deleted)",
        filter,
        report.outcome,
        report.results.len(),
        totals.inserted,
        totals.updated,
        totals.deleted
    );
    if report.migrated > 0 {
        println!("  migrated {} legacy calendars", report.migrated);
    }
    for entry in &report.results {
        println!(
            "  #{} {}: {}",
            entry.subscription_id,
            entry.url,
            describe(&entry.result)
        );
    }
}

fn describe(result: &SyncResult) -> String {
    match result {
        SyncResult::NotModified => "not modified".to_string(),
        SyncResult::Updated { counts } if counts.skipped > 0 => format!(
            "{} inserted, {} updated, {} deleted, {} skipped",
            counts.inserted, counts.updated, counts.deleted, counts.skipped
        ),
        SyncResult::Updated { counts } => format!(
            "{} inserted, {} updated, {} deleted",
            counts.inserted, counts.updated, counts.deleted
        ),
        SyncResult::Failed {
            code,
            message,
            retryable,
        } => format!(
            "failed ({}{}): {}",
            code,
            if *retryable { ", will retry" } else { "" },
            message
        ),
    }
}

/// Fetches and parses a feed, printing what a subscription would get.
pub async fn validate(
    fetcher: &dyn Fetcher,
    max_redirects: usize,
    url: &str,
    credentials: Option<BasicCredentials>,
) -> ClientResult<FeedInfo> {
    let request = FetchRequest::new(url.trim()).with_credentials(credentials);
    let feed = validate_feed(fetcher, request, max_redirects).await?;

    println!("Feed is valid: {}", feed.url);
    if let Some(ref permanent) = feed.permanent_url {
        println!("  moved permanently to {}", permanent);
    }
    if let Some(ref name) = feed.name {
        println!("  name:   {}", name);
    }
    if let Some(color) = feed.color {
        println!("  color:  {}", color_to_hex(color));
    }
    println!("  events: {}", feed.event_count);

    Ok(feed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::subscriptions::{AddRequest, add};
    use crate::commands::testing::{TEAM_FEED, engine, write_feed};
    use crate::config::ClientConfig;
    use icsync_core::ChangeCounts;

    #[tokio::test]
    async fn local_pass_fills_calendar() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_feed(dir.path(), "team.ics", TEAM_FEED);
        let config = ClientConfig::default();
        let (engine, store) = engine(&config).await;
        let subscription = add(
            &engine,
            &config,
            AddRequest {
                url,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let outcome = run(&engine, &[SyncFilter::LocalOnly], SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Success);

        let calendar_id = engine
            .repository
            .require(subscription.id)
            .await
            .unwrap()
            .calendar_id
            .unwrap();
        assert_eq!(store.entries(calendar_id).await.len(), 2);
    }

    #[tokio::test]
    async fn network_flow_skips_local_sources() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_feed(dir.path(), "team.ics", TEAM_FEED);
        let config = ClientConfig::default();
        let (engine, _) = engine(&config).await;
        add(
            &engine,
            &config,
            AddRequest {
                url,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let outcome = run(&engine, &[SyncFilter::NetworkOnly], SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Success);
        let subscriptions = engine.repository.list().await.unwrap();
        assert_eq!(subscriptions[0].last_sync, None);
    }

    #[tokio::test]
    async fn unreadable_source_fails_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::default();
        let (engine, _) = engine(&config).await;
        let missing = dir.path().join("missing.ics");
        let subscription = add(
            &engine,
            &config,
            AddRequest {
                url: missing.to_string_lossy().into_owned(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let outcome = run(
            &engine,
            &[SyncFilter::NetworkOnly, SyncFilter::LocalOnly],
            SyncOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, PassOutcome::Failure);
        let stored = engine.repository.require(subscription.id).await.unwrap();
        assert!(stored.error_message.is_some());
    }

    #[tokio::test]
    async fn validate_reports_feed_details() {
        let dir = tempfile::tempdir().unwrap();
        let url = write_feed(dir.path(), "team.ics", TEAM_FEED);
        let config = ClientConfig::default();
        let (engine, _) = engine(&config).await;

        let feed = validate(engine.fetcher.as_ref(), 5, &url, None).await.unwrap();
        assert_eq!(feed.name.as_deref(), Some("Team"));
        assert_eq!(feed.event_count, 2);
        assert!(engine.repository.list().await.unwrap().is_empty());
    }

    #[test]
    fn describe_results() {
        assert_eq!(describe(&SyncResult::NotModified), "not modified");
        let updated = SyncResult::Updated {
            counts: ChangeCounts {
                inserted: 1,
                skipped: 2,
                ..Default::default()
            },
        };
        assert_eq!(describe(&updated), "1 inserted, 0 updated, 0 deleted, 2 skipped");
        let failed = SyncResult::Failed {
            code: "network".to_string(),
            message: "timed out".to_string(),
            retryable: true,
        };
        assert_eq!(describe(&failed), "failed (network, will retry): timed out");
    }
}
