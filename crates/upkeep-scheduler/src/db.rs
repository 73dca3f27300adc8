use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the PM scheduling schema in `conn`.
///
/// Creates the `pm_rules`, `work_orders` and `pm_evaluation_logs` tables plus
/// the collaborator tables (`assets`, `organizations`) the engine reads from.
/// Idempotent.
///
/// `idx_pm_rules_due` backs the due-rule query so its cost tracks the number
/// of currently-due rules rather than the total rule count.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS organizations (
            id          TEXT    NOT NULL PRIMARY KEY,
            name        TEXT    NOT NULL,
            is_demo     INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        CREATE TABLE IF NOT EXISTS assets (
            id              TEXT NOT NULL PRIMARY KEY,
            organization_id TEXT NOT NULL,
            name            TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'operational'
        ) STRICT;

        CREATE TABLE IF NOT EXISTS pm_rules (
            id                  TEXT    NOT NULL PRIMARY KEY,
            organization_id     TEXT    NOT NULL,
            asset_id            TEXT    NOT NULL,
            interval_days       INTEGER NOT NULL,
            tolerance_days      INTEGER NOT NULL DEFAULT 0,
            next_due            TEXT    NOT NULL,   -- ISO-8601 UTC, millis, 'Z'
            is_active           INTEGER NOT NULL DEFAULT 1,
            cooldown_hours      INTEGER NOT NULL DEFAULT 0,
            priority            TEXT    NOT NULL DEFAULT 'medium',
            checklist           TEXT    NOT NULL DEFAULT '[]',  -- JSON array
            last_evaluated_at   TEXT,
            last_triggered_at   TEXT,
            last_work_order_id  TEXT,
            blocked_reason      TEXT,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL
        ) STRICT;

        -- Due query: WHERE organization_id = ? AND is_active = 1 AND next_due <= ?
        CREATE INDEX IF NOT EXISTS idx_pm_rules_due
            ON pm_rules (organization_id, is_active, next_due);

        CREATE TABLE IF NOT EXISTS work_orders (
            id                  TEXT NOT NULL PRIMARY KEY,
            organization_id     TEXT NOT NULL,
            asset_id            TEXT NOT NULL,
            title               TEXT NOT NULL,
            description         TEXT NOT NULL DEFAULT '',
            status              TEXT NOT NULL,
            priority            TEXT NOT NULL,
            work_type           TEXT NOT NULL,
            checklist           TEXT NOT NULL DEFAULT '[]',
            pm_rule_id          TEXT,
            pm_trigger_reason   TEXT,
            due_date            TEXT,
            idempotency_key     TEXT UNIQUE,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_work_orders_pm_rule
            ON work_orders (pm_rule_id, status);

        CREATE TABLE IF NOT EXISTS pm_evaluation_logs (
            id               TEXT    NOT NULL PRIMARY KEY,   -- {rule_id}_{epoch_seconds}
            rule_id          TEXT    NOT NULL,
            organization_id  TEXT    NOT NULL,
            decision         TEXT    NOT NULL,
            trigger_reason   TEXT,
            blocked_reason   TEXT,
            message          TEXT    NOT NULL,
            created_wo_id    TEXT,
            latency_ms       INTEGER NOT NULL,
            evaluated_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_pm_evaluation_logs_at
            ON pm_evaluation_logs (evaluated_at);
        ",
    )?;
    Ok(())
}

/// Canonical stored form: RFC 3339, millisecond precision, `Z` suffix.
///
/// A fixed width and offset keep lexical order equal to chronological order,
/// which the `next_due <= ?` index range scan depends on.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse any RFC 3339 timestamp into UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Rewrite a parseable timestamp into the canonical stored form. Anything
/// else is returned unchanged so rule validation can report it.
pub fn canonical_timestamp(s: &str) -> String {
    parse_timestamp(s).map_or_else(|| s.to_string(), format_timestamp)
}
