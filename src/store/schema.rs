// src/store/schema.rs
//! SQLite DDL. Every statement uses `IF NOT EXISTS`, so applying the schema
//! is idempotent. Timestamps are unix seconds from the injected clock.

use rusqlite::Connection;

pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS rss_entries (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_key    TEXT NOT NULL,          -- normalized dedupe key
    entry_id     TEXT NOT NULL,          -- short hash of entry_key
    source       TEXT NOT NULL,
    title        TEXT NOT NULL,
    url          TEXT,
    description  TEXT,
    published_at TEXT NOT NULL,          -- RFC 3339
    priority     INTEGER NOT NULL DEFAULT 0,
    tags         TEXT NOT NULL DEFAULT '[]',
    created_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_triggers (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger_name     TEXT NOT NULL,
    entry_id         TEXT NOT NULL,
    source           TEXT,
    title            TEXT,
    url              TEXT,
    matched_keywords TEXT NOT NULL DEFAULT '[]',
    confidence       REAL NOT NULL,
    snippet          TEXT,
    created_at       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_actions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger_id  INTEGER NOT NULL REFERENCES agent_triggers(id),
    action_type TEXT NOT NULL,
    action_data TEXT,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS arbitrage_alerts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger_id  INTEGER NOT NULL REFERENCES agent_triggers(id),
    source      TEXT NOT NULL,
    title       TEXT NOT NULL,
    url         TEXT,
    description TEXT,
    price       TEXT,
    location    TEXT,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS competitive_intel (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger_id  INTEGER NOT NULL REFERENCES agent_triggers(id),
    source      TEXT NOT NULL,
    data_type   TEXT NOT NULL,
    content     TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS job_alerts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger_id   INTEGER NOT NULL REFERENCES agent_triggers(id),
    source       TEXT NOT NULL,
    job_title    TEXT,
    company      TEXT,
    location     TEXT,
    url          TEXT,
    salary_range TEXT,
    created_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS trend_alerts (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    trigger_id  INTEGER NOT NULL REFERENCES agent_triggers(id),
    source      TEXT NOT NULL,
    trend_type  TEXT NOT NULL,
    trend_name  TEXT,
    data        TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS system_health (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    check_type TEXT NOT NULL,
    status     TEXT NOT NULL,
    message    TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rss_entries_key_created ON rss_entries(entry_key, created_at);
CREATE INDEX IF NOT EXISTS idx_rss_entries_source      ON rss_entries(source);
CREATE INDEX IF NOT EXISTS idx_agent_triggers_name     ON agent_triggers(trigger_name);
CREATE INDEX IF NOT EXISTS idx_agent_actions_trigger   ON agent_actions(trigger_id);
"#;

/// Tables reported by `Store::stats`, in display order.
pub(crate) const COUNTED_TABLES: [&str; 8] = [
    "rss_entries",
    "agent_triggers",
    "agent_actions",
    "arbitrage_alerts",
    "competitive_intel",
    "job_alerts",
    "trend_alerts",
    "system_health",
];

pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
        for t in COUNTED_TABLES {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {t}"), [], |r| r.get(0))
                .unwrap();
            assert_eq!(n, 0, "{t}");
        }
    }
}
