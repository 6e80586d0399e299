use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Result, TripwireError};
use crate::model::{ChannelConfig, Extraction, KeywordRule, LogEntry, MatchMode, Target};
use crate::registry::Registry;

/// Safely convert a Unix timestamp to DateTime<Utc>, falling back to current time if invalid
fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

const TARGET_COLUMNS: &str = "id, name, url, interval_secs, enabled, extraction, created_at";

fn target_from_row(row: &Row<'_>) -> rusqlite::Result<Target> {
    let id: String = row.get(0)?;
    let raw_extraction: String = row.get(5)?;
    let extraction = match serde_json::from_str(&raw_extraction) {
        Ok(extraction) => extraction,
        Err(e) => {
            warn!(target_id = %id, error = %e, "unreadable extraction settings, checking target as a plain document");
            Extraction::Document
        }
    };
    Ok(Target {
        id: parse_uuid(&id),
        name: row.get(1)?,
        url: row.get(2)?,
        interval_secs: row.get::<_, i64>(3)? as u64,
        enabled: row.get(4)?,
        extraction,
        created_at: timestamp_to_datetime(row.get(6)?),
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<KeywordRule> {
    let id: String = row.get(0)?;
    let target_id: String = row.get(1)?;
    let mode: String = row.get(3)?;
    Ok(KeywordRule {
        id: parse_uuid(&id),
        target_id: parse_uuid(&target_id),
        keyword: row.get(2)?,
        mode: if mode == "exact" { MatchMode::Exact } else { MatchMode::Fuzzy },
        created_at: timestamp_to_datetime(row.get(4)?),
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    let target_id: String = row.get(1)?;
    Ok(LogEntry {
        id: row.get(0)?,
        target_id: parse_uuid(&target_id),
        keyword: row.get(2)?,
        found: row.get(3)?,
        message: row.get(4)?,
        created_at: timestamp_to_datetime(row.get(5)?),
    })
}

/// Database connection wrapper
///
/// The connection sits behind a mutex so the registry can be shared by the
/// sweep worker threads; every call is a short serialized statement.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database
    pub fn open() -> Result<Self> {
        Self::open_at(&Config::db_path()?)
    }

    /// Open or create the database at a specific path
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (tests and dry runs)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        embedded::migrations::runner().run(&mut conn)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========== Target operations ==========

    /// Insert a new target
    pub fn insert_target(&self, target: &Target) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO targets (id, name, url, interval_secs, enabled, extraction, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                target.id.to_string(),
                target.name,
                target.url,
                target.interval_secs as i64,
                target.enabled,
                serde_json::to_string(&target.extraction)?,
                target.created_at.timestamp(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(TripwireError::DuplicateTargetName(target.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get a target by ID or name
    pub fn get_target(&self, id_or_name: &str) -> Result<Option<Target>> {
        let target = self.conn().query_row(
            &format!("SELECT {} FROM targets WHERE id = ?1 OR name = ?1", TARGET_COLUMNS),
            params![id_or_name],
            target_from_row,
        ).optional()?;
        Ok(target)
    }

    /// Get a target by ID or name, failing if it does not exist
    pub fn require_target(&self, id_or_name: &str) -> Result<Target> {
        self.get_target(id_or_name)?
            .ok_or_else(|| TripwireError::TargetNotFound(id_or_name.to_string()))
    }

    /// List all targets, newest first
    pub fn list_targets(&self) -> Result<Vec<Target>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM targets ORDER BY created_at DESC, rowid DESC",
            TARGET_COLUMNS
        ))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }

    /// Update a target
    pub fn update_target(&self, target: &Target) -> Result<()> {
        let result = self.conn().execute(
            "UPDATE targets SET name = ?2, url = ?3, interval_secs = ?4, enabled = ?5, extraction = ?6
             WHERE id = ?1",
            params![
                target.id.to_string(),
                target.name,
                target.url,
                target.interval_secs as i64,
                target.enabled,
                serde_json::to_string(&target.extraction)?,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(TripwireError::DuplicateTargetName(target.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Enable or disable a target
    pub fn set_target_enabled(&self, id: &Uuid, enabled: bool) -> Result<()> {
        self.conn().execute(
            "UPDATE targets SET enabled = ?2 WHERE id = ?1",
            params![id.to_string(), enabled],
        )?;
        Ok(())
    }

    /// Delete a target together with its rules, logs and seen records
    pub fn delete_target(&self, id: &Uuid) -> Result<()> {
        self.conn().execute("DELETE FROM targets WHERE id = ?1", params![id.to_string()])?;
        Ok(())
    }

    // ========== Rule operations ==========

    /// Arm a keyword rule on a target
    pub fn insert_rule(&self, rule: &KeywordRule) -> Result<()> {
        self.conn().execute(
            "INSERT INTO rules (id, target_id, keyword, mode, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rule.id.to_string(),
                rule.target_id.to_string(),
                rule.keyword,
                rule.mode.as_str(),
                rule.created_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    /// All armed rules across targets, oldest first
    pub fn list_all_rules(&self) -> Result<Vec<KeywordRule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, target_id, keyword, mode, created_at FROM rules
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rules = stmt
            .query_map([], rule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    /// Find a rule by ID, or by keyword text within a target
    pub fn find_rule(&self, target_id: &Uuid, id_or_keyword: &str) -> Result<Option<KeywordRule>> {
        let rule = self.conn().query_row(
            "SELECT id, target_id, keyword, mode, created_at FROM rules
             WHERE target_id = ?1 AND (id = ?2 OR keyword = ?2)
             ORDER BY created_at ASC, rowid ASC LIMIT 1",
            params![target_id.to_string(), id_or_keyword],
            rule_from_row,
        ).optional()?;
        Ok(rule)
    }

    // ========== Log operations ==========

    /// Recent log entries, newest first, optionally for one target
    pub fn recent_logs(&self, target_id: Option<&Uuid>, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.conn();
        let logs = match target_id {
            Some(id) => {
                let mut stmt = conn.prepare(
                    "SELECT id, target_id, keyword, found, message, created_at FROM logs
                     WHERE target_id = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![id.to_string(), limit as i64], log_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, target_id, keyword, found, message, created_at FROM logs
                     ORDER BY id DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], log_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(logs)
    }

    /// Total number of log entries
    pub fn count_logs(&self) -> Result<usize> {
        let count: i64 = self.conn().query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========== Channel config ==========

    /// Replace the notification channel config
    pub fn set_channel_config(&self, config: &ChannelConfig) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM channel_config", [])?;
        tx.execute(
            "INSERT INTO channel_config (bot_token, chat_id, proxy_url, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                config.bot_token,
                config.chat_id,
                config.proxy_url,
                Utc::now().timestamp(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove the notification channel config
    pub fn clear_channel_config(&self) -> Result<()> {
        self.conn().execute("DELETE FROM channel_config", [])?;
        Ok(())
    }
}

impl Registry for Database {
    fn list_enabled_targets(&self) -> Result<Vec<Target>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM targets WHERE enabled = 1 ORDER BY created_at DESC, rowid DESC",
            TARGET_COLUMNS
        ))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }

    fn list_rules(&self, target_id: &Uuid) -> Result<Vec<KeywordRule>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, target_id, keyword, mode, created_at FROM rules
             WHERE target_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rules = stmt
            .query_map(params![target_id.to_string()], rule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    fn delete_rule(&self, rule_id: &Uuid) -> Result<()> {
        self.conn().execute("DELETE FROM rules WHERE id = ?1", params![rule_id.to_string()])?;
        Ok(())
    }

    fn append_log(
        &self,
        target_id: &Uuid,
        keyword: Option<&str>,
        found: bool,
        message: &str,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO logs (target_id, keyword, found, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                target_id.to_string(),
                keyword,
                found,
                message,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    fn channel_config(&self) -> Result<Option<ChannelConfig>> {
        let config = self.conn().query_row(
            "SELECT bot_token, chat_id, proxy_url FROM channel_config ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(ChannelConfig {
                    bot_token: row.get(0)?,
                    chat_id: row.get(1)?,
                    proxy_url: row.get(2)?,
                })
            },
        ).optional()?;
        Ok(config)
    }

    fn is_record_seen(&self, target_id: &Uuid, record_id: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM seen_records WHERE target_id = ?1 AND record_id = ?2",
            params![target_id.to_string(), record_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn mark_record_seen(&self, target_id: &Uuid, record_id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO seen_records (target_id, record_id, seen_at) VALUES (?1, ?2, ?3)",
            params![target_id.to_string(), record_id, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn prune_logs(&self, keep: usize) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM logs WHERE id NOT IN (
                 SELECT id FROM logs ORDER BY id DESC LIMIT ?1
             )",
            params![keep as i64],
        )?;
        if removed > 0 {
            debug!(removed, keep, "pruned audit log");
        }
        Ok(removed)
    }

    fn acquire_sweep_lease(&self, holder: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

        let mut conn = self.conn();
        // IMMEDIATE takes the write lock up front so two processes cannot both read a free lease
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<(String, i64)> = tx
            .query_row("SELECT holder, expires_at FROM sweep_lease WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;

        if let Some((current_holder, current_expiry)) = current {
            if current_holder != holder && current_expiry > now {
                return Ok(false);
            }
            if current_holder != holder {
                warn!(previous = %current_holder, "taking over an expired sweep lease");
            }
        }

        tx.execute(
            "INSERT INTO sweep_lease (id, holder, expires_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at",
            params![holder, expires_at],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn release_sweep_lease(&self, holder: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM sweep_lease WHERE id = 1 AND holder = ?1",
            params![holder],
        )?;
        Ok(())
    }
}
