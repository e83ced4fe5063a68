//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// icsync - Keep calendars in sync with iCalendar subscriptions
#[derive(Debug, Parser)]
#[command(name = "icsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "ICSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Subscribe to a calendar feed
    Add {
        /// Feed URL (http, https, webcal, webcals) or local file
        url: String,

        /// Calendar name (defaults to the feed's own name)
        #[arg(long)]
        name: Option<String>,

        /// Calendar color, a CSS3 name or #RRGGBB
        #[arg(long)]
        color: Option<String>,

        /// Username for HTTP Basic authentication
        #[arg(long, requires = "password")]
        username: Option<String>,

        /// Password for HTTP Basic authentication
        #[arg(long, env = "ICSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Don't fetch the feed before subscribing
        #[arg(long)]
        no_validate: bool,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// List subscriptions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove a subscription and its calendar
    Remove {
        /// Subscription id
        id: i64,
    },

    /// Change a subscription
    Edit {
        /// Subscription id
        id: i64,

        /// New feed URL
        #[arg(long)]
        url: Option<String>,

        /// New calendar name
        #[arg(long)]
        name: Option<String>,

        /// New calendar color, a CSS3 name or #RRGGBB
        #[arg(long)]
        color: Option<String>,

        /// Enable or disable syncing
        #[arg(long)]
        sync_enabled: Option<bool>,

        /// Show or hide the calendar
        #[arg(long)]
        visible: Option<bool>,

        /// Remove the timed default alarm
        #[arg(long, conflicts_with = "default_alarm")]
        clear_default_alarm: bool,

        /// Remove the all-day default alarm
        #[arg(long, conflicts_with = "default_all_day_alarm")]
        clear_default_all_day_alarm: bool,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Manage subscription credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },

    /// Run a sync pass now
    Sync {
        /// Ignore stored validators and rewrite every entry
        #[arg(long)]
        force: bool,

        /// Only migrate legacy calendars
        #[arg(long)]
        only_migrate: bool,

        /// Sync local sources instead of network ones
        #[arg(long, conflicts_with = "all")]
        local: bool,

        /// Sync network and local sources
        #[arg(long)]
        all: bool,

        /// Output the pass report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the sync daemon in the foreground
    Daemon {
        /// Periodic sync interval in seconds (overrides the config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Fetch and parse a feed without subscribing
    Validate {
        /// Feed URL or local file
        url: String,

        /// Username for HTTP Basic authentication
        #[arg(long, requires = "password")]
        username: Option<String>,

        /// Password for HTTP Basic authentication
        #[arg(long, env = "ICSYNC_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Export or import all subscriptions
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Per-subscription alarm and content options.
#[derive(Debug, Clone, Default, Args)]
pub struct PolicyArgs {
    /// Alarm for timed events, in minutes before the start
    #[arg(long)]
    pub default_alarm: Option<i64>,

    /// Alarm for all-day events, in minutes before the start
    #[arg(long)]
    pub default_all_day_alarm: Option<i64>,

    /// Drop the alarms that come with the feed
    #[arg(long)]
    pub ignore_embedded_alerts: Option<bool>,

    /// Drop event descriptions
    #[arg(long)]
    pub ignore_description: Option<bool>,
}

/// Credential actions.
#[derive(Debug, Subcommand)]
pub enum CredentialsAction {
    /// Store a username and password
    Set {
        /// Subscription id
        id: i64,

        /// Username
        #[arg(long)]
        username: String,

        /// Password
        #[arg(long, env = "ICSYNC_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Forget the stored credentials
    Clear {
        /// Subscription id
        id: i64,
    },
}

/// Backup actions.
#[derive(Debug, Subcommand)]
pub enum BackupAction {
    /// Write every subscription and credential as JSON
    Export {
        /// Output file (stdout if omitted)
        file: Option<PathBuf>,
    },

    /// Restore subscriptions and credentials from a JSON backup
    Import {
        /// Backup file
        file: PathBuf,

        /// Remove existing subscriptions first
        #[arg(long)]
        clear: bool,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}
