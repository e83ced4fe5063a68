//! Backup export and import.

use std::io::Write;
use std::path::Path;

use icsync_server::{Backup, RestoreSummary};

use crate::engine::Engine;
use crate::error::ClientResult;

/// Writes every subscription and credential to `file`, or to stdout.
pub async fn export(engine: &Engine, file: Option<&Path>) -> ClientResult<Backup> {
    let backup = engine.repository.export_backup().await?;
    let bytes = backup.to_bytes()?;

    match file {
        Some(path) => {
            tokio::fs::write(path, &bytes).await?;
            println!(
                "Exported {} subscriptions to {}",
                backup.subscriptions.len(),
                path.display()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            writeln!(stdout)?;
        }
    }

    Ok(backup)
}

/// Restores a backup and brings the calendars in line with it.
pub async fn import(engine: &Engine, file: &Path, clear: bool) -> ClientResult<RestoreSummary> {
    let bytes = tokio::fs::read(file).await?;
    let backup = Backup::from_bytes(&bytes)?;
    let summary = engine.repository.restore_backup(backup, clear).await?;
    engine.orchestrator.update_calendars().await?;

    println!(
        "Restored {} new and {} updated subscriptions ({} unchanged)",
        summary.inserted, summary.overwritten, summary.kept
    );
    if summary.credentials_added > 0 || summary.credentials_skipped > 0 {
        println!(
            "Credentials: {} added, {} skipped",
            summary.credentials_added, summary.credentials_skipped
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::subscriptions::{AddRequest, add};
    use crate::commands::testing::engine;
    use crate::config::ClientConfig;
    use icsync_providers::BasicCredentials;

    #[tokio::test]
    async fn export_then_import_into_empty_engine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        let config = ClientConfig::default();

        let (source, _) = engine(&config).await;
        add(
            &source,
            &config,
            AddRequest {
                url: "https://example.com/team.ics".to_string(),
                name: Some("Team".to_string()),
                credentials: Some(BasicCredentials::new("alice", "secret")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let exported = export(&source, Some(&path)).await.unwrap();
        assert_eq!(exported.subscriptions.len(), 1);

        let (target, store) = engine(&config).await;
        let summary = import(&target, &path, false).await.unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.credentials_added, 1);

        let restored = target.repository.list().await.unwrap();
        assert_eq!(restored[0].display_name, "Team");
        let calendar_id = restored[0].calendar_id.unwrap();
        assert!(store.calendar(calendar_id).await.is_some());
    }

    #[tokio::test]
    async fn import_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        std::fs::write(&path, b"not json").unwrap();
        let config = ClientConfig::default();
        let (engine, _) = engine(&config).await;

        assert!(import(&engine, &path, false).await.is_err());
        assert!(import(&engine, &dir.path().join("missing.json"), false).await.is_err());
    }
}
