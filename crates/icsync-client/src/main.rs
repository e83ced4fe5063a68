//! icsync CLI entry point.

use std::process::ExitCode;

use clap::Parser;

use icsync_client::cli::{BackupAction, Cli, Command, ConfigAction, CredentialsAction};
use icsync_client::commands::subscriptions::{AddRequest, EditRequest};
use icsync_client::commands::sync::SyncOptions;
use icsync_client::commands::{backup, config as config_cmd, daemon, subscriptions, sync};
use icsync_client::config::ClientConfig;
use icsync_client::engine::Engine;
use icsync_client::error::{ClientError, ClientResult};
use icsync_core::{PassOutcome, SyncFilter, TracingConfig, init_tracing};
use icsync_providers::{BasicCredentials, SourceFetcher};
use icsync_server::FLOWS;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn credentials(username: Option<String>, password: Option<String>) -> Option<BasicCredentials> {
    match (username, password) {
        (Some(username), Some(password)) => Some(BasicCredentials::new(username, password)),
        _ => None,
    }
}

fn init_logging(cli: &Cli, config: &ClientConfig) -> ClientResult<()> {
    let format = config.log_format().map_err(ClientError::Config)?;
    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else if matches!(cli.command, Command::Daemon { .. }) {
        TracingConfig::daemon()
    } else {
        TracingConfig::default()
    };
    init_tracing(tracing_config.with_format(format))?;
    Ok(())
}

async fn run(cli: Cli) -> ClientResult<PassOutcome> {
    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let config = if cli.config.is_some() {
        ClientConfig::load_from(&config_path).map_err(ClientError::Config)?
    } else {
        ClientConfig::load().map_err(ClientError::Config)?
    };

    init_logging(&cli, &config)?;

    match cli.command {
        Command::Add {
            url,
            name,
            color,
            username,
            password,
            no_validate,
            policy,
        } => {
            let engine = Engine::open(&config).await?;
            let request = AddRequest {
                url,
                name,
                color,
                credentials: credentials(username, password),
                validate: !no_validate,
                policy,
            };
            subscriptions::add(&engine, &config, request).await?;
        }
        Command::List { json } => {
            let engine = Engine::open(&config).await?;
            subscriptions::list(&engine, json).await?;
        }
        Command::Remove { id } => {
            let engine = Engine::open(&config).await?;
            subscriptions::remove(&engine, id).await?;
        }
        Command::Edit {
            id,
            url,
            name,
            color,
            sync_enabled,
            visible,
            clear_default_alarm,
            clear_default_all_day_alarm,
            policy,
        } => {
            let engine = Engine::open(&config).await?;
            let request = EditRequest {
                url,
                name,
                color,
                sync_enabled,
                visible,
                clear_default_alarm,
                clear_default_all_day_alarm,
                policy,
            };
            subscriptions::edit(&engine, id, request).await?;
        }
        Command::Credentials { action } => {
            let engine = Engine::open(&config).await?;
            match action {
                CredentialsAction::Set {
                    id,
                    username,
                    password,
                } => subscriptions::set_credentials(&engine, id, username, password).await?,
                CredentialsAction::Clear { id } => {
                    subscriptions::clear_credentials(&engine, id).await?
                }
            }
        }
        Command::Sync {
            force,
            only_migrate,
            local,
            all,
            json,
        } => {
            let engine = Engine::open(&config).await?;
            let flows: &[SyncFilter] = if all {
                &FLOWS
            } else if local {
                &[SyncFilter::LocalOnly]
            } else {
                &[SyncFilter::NetworkOnly]
            };
            let options = SyncOptions {
                force,
                only_migrate,
                json,
            };
            return sync::run(&engine, flows, options).await;
        }
        Command::Daemon { interval } => daemon::run(&config, interval).await?,
        Command::Validate {
            url,
            username,
            password,
        } => {
            let fetcher = SourceFetcher::new(config.fetcher_config())?;
            sync::validate(
                &fetcher,
                config.sync.max_redirects,
                &url,
                credentials(username, password),
            )
            .await?;
        }
        Command::Backup { action } => {
            let engine = Engine::open(&config).await?;
            match action {
                BackupAction::Export { file } => {
                    backup::export(&engine, file.as_deref()).await?;
                }
                BackupAction::Import { file, clear } => {
                    backup::import(&engine, &file, clear).await?;
                }
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Dump => config_cmd::dump(&config, &config_path)?,
            ConfigAction::Validate => config_cmd::validate(&config)?,
            ConfigAction::Path => config_cmd::path(&config_path)?,
        },
    }

    Ok(PassOutcome::Success)
}
