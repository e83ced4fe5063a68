//! Subscription and credential management commands.

use chrono::Local;
use tracing::info;

use icsync_core::{Credential, Subscription, color_from_string, color_to_hex, millis_to_datetime};
use icsync_providers::{BasicCredentials, FetchRequest, validate_feed};

use crate::cli::PolicyArgs;
use crate::config::ClientConfig;
use crate::engine::Engine;
use crate::error::{ClientError, ClientResult};

/// Arguments of `icsync add`.
#[derive(Debug, Clone, Default)]
pub struct AddRequest {
    pub url: String,
    pub name: Option<String>,
    pub color: Option<String>,
    pub credentials: Option<BasicCredentials>,
    /// Fetch the feed first, taking its name and color as defaults.
    pub validate: bool,
    pub policy: PolicyArgs,
}

/// Arguments of `icsync edit`.
#[derive(Debug, Clone, Default)]
pub struct EditRequest {
    pub url: Option<String>,
    pub name: Option<String>,
    pub color: Option<String>,
    pub sync_enabled: Option<bool>,
    pub visible: Option<bool>,
    pub clear_default_alarm: bool,
    pub clear_default_all_day_alarm: bool,
    pub policy: PolicyArgs,
}

fn parse_color(value: &str) -> ClientResult<u32> {
    color_from_string(value).ok_or_else(|| {
        ClientError::Usage(format!(
            "invalid color {:?}, expected a CSS3 name or #RRGGBB",
            value
        ))
    })
}

fn check_alarm(flag: &str, minutes: Option<i64>) -> ClientResult<()> {
    match minutes {
        Some(m) if m < 0 => Err(ClientError::Usage(format!(
            "--{} must not be negative",
            flag
        ))),
        _ => Ok(()),
    }
}

fn check_policy(policy: &PolicyArgs) -> ClientResult<()> {
    check_alarm("default-alarm", policy.default_alarm)?;
    check_alarm("default-all-day-alarm", policy.default_all_day_alarm)
}

async fn ensure_unique_url(engine: &Engine, url: &str, own_id: Option<i64>) -> ClientResult<()> {
    match engine.repository.find_by_url(url).await? {
        Some(existing) if Some(existing.id) != own_id => Err(ClientError::Usage(format!(
            "{} is already subscribed as #{}",
            url, existing.id
        ))),
        _ => Ok(()),
    }
}

/// Subscribes to a feed.
pub async fn add(
    engine: &Engine,
    config: &ClientConfig,
    request: AddRequest,
) -> ClientResult<Subscription> {
    check_policy(&request.policy)?;
    let explicit_color = request.color.as_deref().map(parse_color).transpose()?;

    let mut url = request.url.trim().to_string();
    if url.is_empty() {
        return Err(ClientError::Usage("feed URL must not be empty".to_string()));
    }

    let mut feed_name = None;
    let mut feed_color = None;
    if request.validate {
        let fetch = FetchRequest::new(url.clone()).with_credentials(request.credentials.clone());
        let feed = validate_feed(engine.fetcher.as_ref(), fetch, engine.max_redirects).await?;
        if let Some(permanent) = feed.permanent_url {
            info!(from = %url, to = %permanent, "Feed moved permanently, subscribing to new URL");
            url = permanent;
        }
        feed_name = feed.name;
        feed_color = feed.color;
    }

    ensure_unique_url(engine, &url, None).await?;

    let name = request
        .name
        .or(feed_name)
        .unwrap_or_else(|| url.clone());
    let policy = &request.policy;
    let mut subscription = Subscription::new(url, name)
        .with_default_alarms(
            policy.default_alarm.or(config.sync.default_alarm_minutes),
            policy
                .default_all_day_alarm
                .or(config.sync.default_all_day_alarm_minutes),
        )
        .with_ignore_embedded_alerts(policy.ignore_embedded_alerts.unwrap_or(false))
        .with_ignore_description(policy.ignore_description.unwrap_or(false));
    if let Some(color) = explicit_color.or(feed_color) {
        subscription = subscription.with_color(color);
    }

    let id = engine.repository.add(subscription).await?;
    if let Some(credentials) = request.credentials {
        engine
            .repository
            .put_credential(Credential::new(
                id,
                credentials.username,
                credentials.password,
            ))
            .await?;
    }

    let subscription = engine.repository.require(id).await?;
    println!(
        "Subscribed #{} {} ({})",
        subscription.id, subscription.display_name, subscription.url
    );
    Ok(subscription)
}

fn last_sync_label(subscription: &Subscription) -> String {
    subscription
        .last_sync
        .and_then(millis_to_datetime)
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn status_label(subscription: &Subscription) -> String {
    if !subscription.sync_enabled {
        return "disabled".to_string();
    }
    match subscription.error_message {
        Some(ref message) => format!("error: {}", message),
        None if subscription.last_sync.is_some() => "ok".to_string(),
        None => "pending".to_string(),
    }
}

/// Prints all subscriptions.
pub async fn list(engine: &Engine, json: bool) -> ClientResult<()> {
    let subscriptions = engine.repository.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&subscriptions)?);
        return Ok(());
    }

    if subscriptions.is_empty() {
        println!("No subscriptions. Add one with `icsync add <url>`.");
        return Ok(());
    }

    println!(
        "{:>4}  {:<24}  {:<7}  {:<16}  {:<8}  URL",
        "ID", "NAME", "COLOR", "LAST SYNC", "STATUS"
    );
    for subscription in &subscriptions {
        println!(
            "{:>4}  {:<24}  {:<7}  {:<16}  {:<8}  {}",
            subscription.id,
            subscription.display_name,
            color_to_hex(subscription.effective_color()),
            last_sync_label(subscription),
            status_label(subscription),
            subscription.url
        );
    }
    Ok(())
}

/// Removes a subscription; its calendar goes with it.
pub async fn remove(engine: &Engine, id: i64) -> ClientResult<()> {
    let subscription = engine.repository.require(id).await?;
    engine.repository.delete(id).await?;
    engine.orchestrator.update_calendars().await?;
    println!("Removed #{} {}", id, subscription.display_name);
    Ok(())
}

/// Changes a subscription and updates its calendar.
pub async fn edit(engine: &Engine, id: i64, request: EditRequest) -> ClientResult<Subscription> {
    check_policy(&request.policy)?;
    let mut subscription = engine.repository.require(id).await?;

    if let Some(url) = request.url {
        let url = url.trim();
        if url.is_empty() {
            return Err(ClientError::Usage("feed URL must not be empty".to_string()));
        }
        if url != subscription.url {
            ensure_unique_url(engine, url, Some(id)).await?;
            subscription.url = url.to_string();
            // Validators of the old source mean nothing for the new one.
            subscription.etag = None;
            subscription.last_modified = None;
        }
    }
    if let Some(name) = request.name {
        subscription.display_name = name;
    }
    if let Some(ref color) = request.color {
        subscription.color = Some(parse_color(color)?);
    }
    if let Some(enabled) = request.sync_enabled {
        subscription.sync_enabled = enabled;
    }
    if let Some(visible) = request.visible {
        subscription.visible = visible;
    }

    let before = (
        subscription.default_alarm_minutes,
        subscription.default_all_day_alarm_minutes,
        subscription.ignore_embedded_alerts,
        subscription.ignore_description,
    );
    let policy = request.policy;
    if request.clear_default_alarm {
        subscription.default_alarm_minutes = None;
    } else if let Some(minutes) = policy.default_alarm {
        subscription.default_alarm_minutes = Some(minutes);
    }
    if request.clear_default_all_day_alarm {
        subscription.default_all_day_alarm_minutes = None;
    } else if let Some(minutes) = policy.default_all_day_alarm {
        subscription.default_all_day_alarm_minutes = Some(minutes);
    }
    if let Some(ignore) = policy.ignore_embedded_alerts {
        subscription.ignore_embedded_alerts = ignore;
    }
    if let Some(ignore) = policy.ignore_description {
        subscription.ignore_description = ignore;
    }
    let policy_changed = before
        != (
            subscription.default_alarm_minutes,
            subscription.default_all_day_alarm_minutes,
            subscription.ignore_embedded_alerts,
            subscription.ignore_description,
        );

    engine.repository.update(subscription).await?;
    engine.orchestrator.update_calendars().await?;

    let subscription = engine.repository.require(id).await?;
    println!("Updated #{} {}", subscription.id, subscription.display_name);
    if policy_changed {
        println!("Run `icsync sync --force` to apply the new settings to existing events.");
    }
    Ok(subscription)
}

/// Stores credentials for a subscription.
pub async fn set_credentials(
    engine: &Engine,
    id: i64,
    username: String,
    password: String,
) -> ClientResult<()> {
    engine.repository.require(id).await?;
    engine
        .repository
        .put_credential(Credential::new(id, username, password))
        .await?;
    println!("Stored credentials for #{}", id);
    Ok(())
}

/// Forgets the credentials of a subscription.
pub async fn clear_credentials(engine: &Engine, id: i64) -> ClientResult<()> {
    engine.repository.require(id).await?;
    if engine.repository.remove_credential(id).await? {
        println!("Removed credentials of #{}", id);
    } else {
        println!("#{} has no stored credentials", id);
    }
    Ok(())
}
