// src/store/mod.rs
//! # Entry Store
//! SQLite persistence for entries, matches, actions, agent alerts and health
//! checks.
//!
//! Deduplication: an entry is new unless an entry with the same dedupe key
//! was ingested within the dedupe window (inclusive). The lookup and the
//! insert run in one transaction under the connection lock, so two callers
//! cannot both insert the same key inside the window.
//!
//! [`Store::transaction`] groups a whole cycle's writes (entries, matches,
//! actions, alerts, the health row) so a failure leaves none of them behind.

mod schema;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::clock::Clock;
use crate::dispatch::{Action, Alert};
use crate::error::StorageError;
use crate::ingest::types::Entry;
use crate::matcher::Match;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate,
}

impl InsertOutcome {
    pub fn is_new(self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub row_id: i64,
    pub entry: Entry,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMatch {
    pub row_id: i64,
    pub rule: String,
    pub entry_id: String,
    pub title: String,
    pub confidence: f32,
    pub matched_keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

pub struct Store {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    dedup_window: ChronoDuration,
}

impl Store {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(
        path: &Path,
        clock: Arc<dyn Clock>,
        dedup_window: ChronoDuration,
    ) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn, clock, dedup_window)
    }

    pub fn open_in_memory(
        clock: Arc<dyn Clock>,
        dedup_window: ChronoDuration,
    ) -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?, clock, dedup_window)
    }

    fn init(
        conn: Connection,
        clock: Arc<dyn Clock>,
        dedup_window: ChronoDuration,
    ) -> Result<Self, StorageError> {
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            dedup_window,
        })
    }

    pub fn dedup_window(&self) -> ChronoDuration {
        self.dedup_window
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    fn window_start(&self, now: DateTime<Utc>) -> i64 {
        (now - self.dedup_window).timestamp()
    }

    /// Whether an entry with the same key was ingested within the window.
    /// Read-only; the cycle checks this before anything is written.
    pub fn is_duplicate(&self, entry: &Entry) -> Result<bool, StorageError> {
        let since = self.window_start(self.clock.now());
        let conn = self.lock()?;
        let hit: Option<i64> = conn
            .query_row(
                "SELECT id FROM rss_entries WHERE entry_key = ?1 AND created_at >= ?2 LIMIT 1",
                params![entry.dedupe_key(), since],
                |r| r.get(0),
            )
            .optional()?;
        if hit.is_some() {
            metrics::counter!("store_duplicates_total").increment(1);
        }
        Ok(hit.is_some())
    }

    /// Insert unless a same-key entry exists within the dedupe window.
    pub fn insert_if_new(&self, entry: &Entry) -> Result<InsertOutcome, StorageError> {
        let now = self.clock.now();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = insert_entry(&tx, entry, now, self.window_start(now))?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` inside one transaction. Everything written through the
    /// [`CycleWriter`] is committed when `f` returns `Ok` and rolled back
    /// when it returns an error.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&CycleWriter<'_>) -> Result<T, StorageError>,
    {
        let now = self.clock.now();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&CycleWriter {
            conn: &tx,
            now,
            window_start: self.window_start(now),
        })?;
        tx.commit()?;
        Ok(out)
    }

    /// Entries ingested within `window` of now, newest first.
    pub fn recent(&self, window: ChronoDuration) -> Result<Vec<StoredEntry>, StorageError> {
        let since = (self.clock.now() - window).timestamp();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, entry_id, source, title, url, description, published_at, priority, tags, created_at
             FROM rss_entries WHERE created_at >= ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![since], stored_entry_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn record_match(&self, m: &Match) -> Result<i64, StorageError> {
        insert_match(&*self.lock()?, m)
    }

    /// Persist an action. Actions without a stored match are rejected by the
    /// foreign key, so callers only pass actions from non-dry runs.
    pub fn record_action(&self, action: &Action) -> Result<i64, StorageError> {
        insert_action(&*self.lock()?, action)
    }

    pub fn record_alert(&self, trigger_id: i64, alert: &Alert) -> Result<i64, StorageError> {
        let now = self.clock.now();
        insert_alert(&*self.lock()?, trigger_id, alert, now)
    }

    /// Most recent matches, newest first.
    pub fn recent_matches(&self, limit: usize) -> Result<Vec<StoredMatch>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, trigger_name, entry_id, title, confidence, matched_keywords, created_at
             FROM agent_triggers ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |r| {
            let keywords: String = r.get(5)?;
            Ok(StoredMatch {
                row_id: r.get(0)?,
                rule: r.get(1)?,
                entry_id: r.get(2)?,
                title: r.get::<_, Option<String>>(3)?.unwrap_or_default(),
                confidence: r.get::<_, f64>(4)? as f32,
                matched_keywords: serde_json::from_str(&keywords).unwrap_or_default(),
                created_at: ts_from_secs(r.get(6)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn log_health_check(
        &self,
        check_type: &str,
        status: &str,
        message: Option<&str>,
    ) -> Result<(), StorageError> {
        let now = self.clock.now();
        insert_health(&*self.lock()?, check_type, status, message, now)
    }

    /// Row counts per table.
    pub fn stats(&self) -> Result<BTreeMap<String, i64>, StorageError> {
        let conn = self.lock()?;
        let mut out = BTreeMap::new();
        for table in schema::COUNTED_TABLES {
            out.insert(table.to_string(), count(&conn, table)?);
        }
        Ok(out)
    }

    pub fn entry_count(&self) -> Result<i64, StorageError> {
        Ok(count(&*self.lock()?, "rss_entries")?)
    }

    pub fn match_count(&self) -> Result<i64, StorageError> {
        Ok(count(&*self.lock()?, "agent_triggers")?)
    }

    pub fn action_count(&self) -> Result<i64, StorageError> {
        Ok(count(&*self.lock()?, "agent_actions")?)
    }
}

/// Writes that belong to one cycle, sharing a single transaction.
pub struct CycleWriter<'a> {
    conn: &'a Connection,
    now: DateTime<Utc>,
    window_start: i64,
}

impl CycleWriter<'_> {
    pub fn insert_if_new(&self, entry: &Entry) -> Result<InsertOutcome, StorageError> {
        insert_entry(self.conn, entry, self.now, self.window_start)
    }

    pub fn record_match(&self, m: &Match) -> Result<i64, StorageError> {
        insert_match(self.conn, m)
    }

    pub fn record_action(&self, action: &Action) -> Result<i64, StorageError> {
        insert_action(self.conn, action)
    }

    pub fn record_alert(&self, trigger_id: i64, alert: &Alert) -> Result<i64, StorageError> {
        insert_alert(self.conn, trigger_id, alert, self.now)
    }

    pub fn log_health_check(
        &self,
        check_type: &str,
        status: &str,
        message: Option<&str>,
    ) -> Result<(), StorageError> {
        insert_health(self.conn, check_type, status, message, self.now)
    }
}

// Callers hold a transaction so the lookup and the insert see the same state.
fn insert_entry(
    conn: &Connection,
    entry: &Entry,
    now: DateTime<Utc>,
    window_start: i64,
) -> Result<InsertOutcome, StorageError> {
    let key = entry.dedupe_key();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM rss_entries WHERE entry_key = ?1 AND created_at >= ?2 LIMIT 1",
            params![key, window_start],
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_some() {
        metrics::counter!("store_duplicates_total").increment(1);
        tracing::trace!(key = %key, "duplicate entry");
        return Ok(InsertOutcome::Duplicate);
    }

    let tags = serde_json::to_string(&entry.tags)?;
    conn.execute(
        "INSERT INTO rss_entries
            (entry_key, entry_id, source, title, url, description, published_at, priority, tags, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            key,
            entry.id,
            entry.source,
            entry.title,
            entry.link,
            entry.description,
            entry.published.to_rfc3339(),
            entry.priority,
            tags,
            now.timestamp(),
        ],
    )?;
    Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
}

fn insert_match(conn: &Connection, m: &Match) -> Result<i64, StorageError> {
    let keywords = serde_json::to_string(&m.matched_keywords)?;
    conn.execute(
        "INSERT INTO agent_triggers
            (trigger_name, entry_id, source, title, url, matched_keywords, confidence, snippet, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            m.rule,
            m.entry_id,
            m.source,
            m.entry_title,
            m.entry_link,
            keywords,
            f64::from(m.confidence),
            m.snippet,
            m.matched_at.timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_action(conn: &Connection, action: &Action) -> Result<i64, StorageError> {
    let data = serde_json::to_string(&action.payload)?;
    conn.execute(
        "INSERT INTO agent_actions (trigger_id, action_type, action_data, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            action.match_id,
            action.action_type.as_str(),
            data,
            action.created_at.timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_alert(
    conn: &Connection,
    trigger_id: i64,
    alert: &Alert,
    now: DateTime<Utc>,
) -> Result<i64, StorageError> {
    let now = now.timestamp();
    match alert {
        Alert::Arbitrage {
            source,
            title,
            url,
            description,
            price,
            location,
        } => conn.execute(
            "INSERT INTO arbitrage_alerts
                (trigger_id, source, title, url, description, price, location, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![trigger_id, source, title, url, description, price, location, now],
        )?,
        Alert::CompetitiveIntel {
            source,
            data_type,
            content,
        } => conn.execute(
            "INSERT INTO competitive_intel (trigger_id, source, data_type, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![trigger_id, source, data_type, content, now],
        )?,
        Alert::Job {
            source,
            job_title,
            company,
            location,
            url,
            salary_range,
        } => conn.execute(
            "INSERT INTO job_alerts
                (trigger_id, source, job_title, company, location, url, salary_range, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![trigger_id, source, job_title, company, location, url, salary_range, now],
        )?,
        Alert::Trend {
            source,
            trend_type,
            trend_name,
            data,
        } => conn.execute(
            "INSERT INTO trend_alerts (trigger_id, source, trend_type, trend_name, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![trigger_id, source, trend_type, trend_name, data, now],
        )?,
    };
    Ok(conn.last_insert_rowid())
}

fn insert_health(
    conn: &Connection,
    check_type: &str,
    status: &str,
    message: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO system_health (check_type, status, message, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![check_type, status, message, now.timestamp()],
    )?;
    Ok(())
}

// `table` only ever comes from the fixed table list.
fn count(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
}

fn ts_from_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn stored_entry_from_row(r: &Row<'_>) -> rusqlite::Result<StoredEntry> {
    let published: String = r.get(6)?;
    let published = DateTime::parse_from_rfc3339(&published)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let tags: String = r.get(8)?;
    Ok(StoredEntry {
        row_id: r.get(0)?,
        entry: Entry {
            id: r.get(1)?,
            source: r.get(2)?,
            title: r.get(3)?,
            link: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
            description: r.get::<_, Option<String>>(5)?.unwrap_or_default(),
            published,
            priority: r.get(7)?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
        },
        ingested_at: ts_from_secs(r.get(9)?),
    })
}
