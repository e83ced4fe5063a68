pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- subscriptions table
CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    calendar_id INTEGER UNIQUE,
    url TEXT NOT NULL,
    etag TEXT,
    display_name TEXT NOT NULL,
    last_modified INTEGER,
    last_sync INTEGER,
    error_message TEXT,
    ignore_embedded_alerts INTEGER NOT NULL DEFAULT 0,
    default_alarm_minutes INTEGER,
    default_all_day_alarm_minutes INTEGER,
    ignore_description INTEGER NOT NULL DEFAULT 0,
    color INTEGER,
    sync_enabled INTEGER NOT NULL DEFAULT 1,
    visible INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_url ON subscriptions(url);

-- credentials table, one row per subscription
CREATE TABLE IF NOT EXISTS credentials (
    subscription_id INTEGER PRIMARY KEY REFERENCES subscriptions(id) ON DELETE CASCADE,
    username TEXT NOT NULL,
    password TEXT NOT NULL
);
"#;
