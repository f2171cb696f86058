use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use core_model::{
    Card, ChatMessage, ChatRole, ChatThread, DEFAULT_RETENTION_LIMIT, Evidence, FileBlob, Run,
    RunStatus, format_ts, now_micros, parse_ts,
};
use rusqlite::{Connection, OptionalExtension, Row, params, types::Type};
use serde_json::Value;
use tracing::{debug, warn};

mod error;
mod retention;
mod sanitize;
mod snapshot;

pub use error::{StoreError, StoreResult};
pub use sanitize::sanitize_evidence;
pub use snapshot::snapshot_file_name;

use error::{is_foreign_key_violation, owner_not_found};

/// Handle to the run database. One connection guarded by a mutex; every
/// public operation holds the lock only for its own duration.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    retention_limit: usize,
}

/// Result of an insert-or-ignore write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Ignored,
}

/// Dependent rows removed alongside an owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedRows {
    pub cards: usize,
    pub evidence: usize,
    pub threads: usize,
    pub messages: usize,
    pub files: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub runs: i64,
    pub cards: i64,
    pub evidence: i64,
    pub threads: i64,
    pub messages: i64,
    pub files: i64,
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("runvault")
        .join("runvault.db")
}

impl SqliteStore {
    pub fn open_default() -> StoreResult<Self> {
        Self::open(default_db_path())
    }

    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::configure(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::configure(Connection::open_in_memory()?, None)
    }

    fn configure(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
            retention_limit: DEFAULT_RETENTION_LIMIT,
        })
    }

    /// Ceiling applied after every run creation. Clamped to at least one so a
    /// freshly created run is never evicted by its own creation.
    pub fn with_retention_limit(mut self, limit: usize) -> Self {
        self.retention_limit = limit.max(1);
        self
    }

    pub fn retention_limit(&self) -> usize {
        self.retention_limit
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn init_schema(&self) -> StoreResult<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              status TEXT NOT NULL DEFAULT 'pending',
              created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS runs_created_idx ON runs(created_at, id);
            CREATE TABLE IF NOT EXISTS cards (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              run_id INTEGER NOT NULL,
              type TEXT NOT NULL,
              data TEXT NOT NULL,
              UNIQUE(run_id, type),
              FOREIGN KEY(run_id) REFERENCES runs(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS cards_run_idx ON cards(run_id);
            CREATE TABLE IF NOT EXISTS evidence (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              card_id INTEGER NOT NULL,
              raw TEXT NOT NULL,
              created_at TEXT NOT NULL,
              FOREIGN KEY(card_id) REFERENCES cards(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS evidence_card_idx ON evidence(card_id);
            CREATE TABLE IF NOT EXISTS chat_threads (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              run_id INTEGER NOT NULL,
              title TEXT NOT NULL,
              created_at TEXT NOT NULL,
              FOREIGN KEY(run_id) REFERENCES runs(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS chat_threads_run_idx ON chat_threads(run_id);
            CREATE TABLE IF NOT EXISTS chat_messages (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              thread_id INTEGER NOT NULL,
              role TEXT NOT NULL,
              content TEXT NOT NULL,
              created_at TEXT NOT NULL,
              FOREIGN KEY(thread_id) REFERENCES chat_threads(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS chat_messages_thread_idx ON chat_messages(thread_id);
            CREATE TABLE IF NOT EXISTS files (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              run_id INTEGER NOT NULL,
              name TEXT NOT NULL,
              data BLOB NOT NULL,
              FOREIGN KEY(run_id) REFERENCES runs(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS files_run_idx ON files(run_id);
            "#,
        )?;
        Ok(())
    }

    // -- runs ---------------------------------------------------------------

    /// Inserts a `pending` run, then trims history down to the retention
    /// limit. Eviction failures are logged and do not fail the creation.
    pub fn create_run(&self) -> StoreResult<Run> {
        let run = self.insert_run(now_micros())?;
        if let Err(err) = self.enforce_retention(self.retention_limit) {
            warn!(run_id = run.id, error = %err, "retention enforcement failed");
        }
        Ok(run)
    }

    pub(crate) fn insert_run(&self, created_at: DateTime<Utc>) -> StoreResult<Run> {
        self.conn()
            .query_row(
                "INSERT INTO runs (status, created_at) VALUES (?1, ?2) RETURNING id, status, created_at",
                params![RunStatus::Pending.as_str(), format_ts(&created_at)],
                run_from_row,
            )
            .map_err(Into::into)
    }

    pub fn get_run(&self, run_id: i64) -> StoreResult<Option<Run>> {
        self.conn()
            .query_row(
                "SELECT id, status, created_at FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn require_run(&self, run_id: i64) -> StoreResult<Run> {
        self.get_run(run_id)?.ok_or(StoreError::NotFound {
            entity: "run",
            id: run_id,
        })
    }

    /// Newest first.
    pub fn list_runs(&self) -> StoreResult<Vec<Run>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, status, created_at FROM runs ORDER BY created_at DESC, id DESC")?;
        let rows = stmt.query_map([], run_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn update_run_status(&self, run_id: i64, status: RunStatus) -> StoreResult<Run> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = tx
            .query_row(
                "SELECT id, status, created_at FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound {
                entity: "run",
                id: run_id,
            })?;
        if !current.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }
        tx.execute(
            "UPDATE runs SET status = ?2 WHERE id = ?1",
            params![run_id, status.as_str()],
        )?;
        tx.commit()?;
        Ok(Run { status, ..current })
    }

    /// Deletes a run and everything it owns in one transaction, children
    /// first, without relying on the schema's declarative cascade.
    pub fn delete_run(&self, run_id: i64) -> StoreResult<DeletedRows> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let deleted = DeletedRows {
            messages: tx.execute(
                "DELETE FROM chat_messages WHERE thread_id IN (SELECT id FROM chat_threads WHERE run_id = ?1)",
                params![run_id],
            )?,
            threads: tx.execute("DELETE FROM chat_threads WHERE run_id = ?1", params![run_id])?,
            evidence: tx.execute(
                "DELETE FROM evidence WHERE card_id IN (SELECT id FROM cards WHERE run_id = ?1)",
                params![run_id],
            )?,
            cards: tx.execute("DELETE FROM cards WHERE run_id = ?1", params![run_id])?,
            files: tx.execute("DELETE FROM files WHERE run_id = ?1", params![run_id])?,
        };
        if tx.execute("DELETE FROM runs WHERE id = ?1", params![run_id])? == 0 {
            return Err(StoreError::NotFound {
                entity: "run",
                id: run_id,
            });
        }
        tx.commit()?;
        debug!(run_id, ?deleted, "run deleted");
        Ok(deleted)
    }

    // -- cards --------------------------------------------------------------

    /// At most one card per `(run_id, kind)`: a repeated kind replaces the
    /// payload of the existing row and keeps its id.
    pub fn upsert_card(&self, run_id: i64, kind: &str, data: &Value) -> StoreResult<Card> {
        let payload = serde_json::to_string(data)?;
        let conn = self.conn();
        ensure_exists(&conn, "runs", "run", run_id)?;
        conn.query_row(
            r#"INSERT INTO cards (run_id, type, data) VALUES (?1, ?2, ?3)
            ON CONFLICT(run_id, type) DO UPDATE SET data = excluded.data
            RETURNING id, run_id, type, data"#,
            params![run_id, kind, payload],
            card_from_row,
        )
        .map_err(|err| owner_not_found(err, "run", run_id))
    }

    pub fn get_card(&self, card_id: i64) -> StoreResult<Option<Card>> {
        self.conn()
            .query_row(
                "SELECT id, run_id, type, data FROM cards WHERE id = ?1",
                params![card_id],
                card_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insertion order.
    pub fn list_cards(&self, run_id: i64) -> StoreResult<Vec<Card>> {
        self.page(
            "SELECT id, run_id, type, data FROM cards WHERE run_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
            run_id,
            i64::MIN,
            usize::MAX,
            card_from_row,
        )
    }

    pub fn cards_after(&self, run_id: i64, after_id: i64, limit: usize) -> StoreResult<Vec<Card>> {
        self.page(
            "SELECT id, run_id, type, data FROM cards WHERE run_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
            run_id,
            after_id,
            limit,
            card_from_row,
        )
    }

    pub fn delete_card(&self, card_id: i64) -> StoreResult<DeletedRows> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let evidence = tx.execute("DELETE FROM evidence WHERE card_id = ?1", params![card_id])?;
        if tx.execute("DELETE FROM cards WHERE id = ?1", params![card_id])? == 0 {
            return Err(StoreError::NotFound {
                entity: "card",
                id: card_id,
            });
        }
        tx.commit()?;
        Ok(DeletedRows {
            evidence,
            ..DeletedRows::default()
        })
    }

    // -- evidence -----------------------------------------------------------

    /// Returns the stored row so callers can see what sanitizing changed.
    pub fn append_evidence(&self, card_id: i64, raw: &str) -> StoreResult<Evidence> {
        let clean = sanitize_evidence(raw)?;
        let conn = self.conn();
        ensure_exists(&conn, "cards", "card", card_id)?;
        conn.query_row(
            "INSERT INTO evidence (card_id, raw, created_at) VALUES (?1, ?2, ?3) RETURNING id, card_id, raw, created_at",
            params![card_id, clean, format_ts(&now_micros())],
            evidence_from_row,
        )
        .map_err(|err| owner_not_found(err, "card", card_id))
    }

    pub fn list_evidence(&self, card_id: i64) -> StoreResult<Vec<Evidence>> {
        self.page(
            "SELECT id, card_id, raw, created_at FROM evidence WHERE card_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
            card_id,
            i64::MIN,
            usize::MAX,
            evidence_from_row,
        )
    }

    /// Evidence of every card owned by `run_id`, in id order.
    pub fn evidence_for_run_after(
        &self,
        run_id: i64,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<Evidence>> {
        self.page(
            r#"SELECT e.id, e.card_id, e.raw, e.created_at FROM evidence e
            INNER JOIN cards c ON e.card_id = c.id
            WHERE c.run_id = ?1 AND e.id > ?2 ORDER BY e.id LIMIT ?3"#,
            run_id,
            after_id,
            limit,
            evidence_from_row,
        )
    }

    pub fn delete_evidence(&self, evidence_id: i64) -> StoreResult<()> {
        let removed = self
            .conn()
            .execute("DELETE FROM evidence WHERE id = ?1", params![evidence_id])?;
        if removed == 0 {
            return Err(StoreError::NotFound {
                entity: "evidence",
                id: evidence_id,
            });
        }
        Ok(())
    }

    // -- chat ---------------------------------------------------------------

    pub fn create_thread(&self, run_id: i64, title: &str) -> StoreResult<ChatThread> {
        let conn = self.conn();
        ensure_exists(&conn, "runs", "run", run_id)?;
        conn.query_row(
            "INSERT INTO chat_threads (run_id, title, created_at) VALUES (?1, ?2, ?3) RETURNING id, run_id, title, created_at",
            params![run_id, title, format_ts(&now_micros())],
            thread_from_row,
        )
        .map_err(|err| owner_not_found(err, "run", run_id))
    }

    pub fn get_thread(&self, thread_id: i64) -> StoreResult<Option<ChatThread>> {
        self.conn()
            .query_row(
                "SELECT id, run_id, title, created_at FROM chat_threads WHERE id = ?1",
                params![thread_id],
                thread_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_threads(&self, run_id: i64) -> StoreResult<Vec<ChatThread>> {
        self.threads_after(run_id, i64::MIN, usize::MAX)
    }

    pub fn threads_after(
        &self,
        run_id: i64,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<ChatThread>> {
        self.page(
            "SELECT id, run_id, title, created_at FROM chat_threads WHERE run_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
            run_id,
            after_id,
            limit,
            thread_from_row,
        )
    }

    pub fn delete_thread(&self, thread_id: i64) -> StoreResult<DeletedRows> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let messages = tx.execute(
            "DELETE FROM chat_messages WHERE thread_id = ?1",
            params![thread_id],
        )?;
        if tx.execute("DELETE FROM chat_threads WHERE id = ?1", params![thread_id])? == 0 {
            return Err(StoreError::NotFound {
                entity: "thread",
                id: thread_id,
            });
        }
        tx.commit()?;
        Ok(DeletedRows {
            messages,
            ..DeletedRows::default()
        })
    }

    pub fn append_message(
        &self,
        thread_id: i64,
        role: ChatRole,
        content: &str,
    ) -> StoreResult<ChatMessage> {
        let conn = self.conn();
        ensure_exists(&conn, "chat_threads", "thread", thread_id)?;
        conn.query_row(
            "INSERT INTO chat_messages (thread_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4) RETURNING id, thread_id, role, content, created_at",
            params![thread_id, role.as_str(), content, format_ts(&now_micros())],
            message_from_row,
        )
        .map_err(|err| owner_not_found(err, "thread", thread_id))
    }

    pub fn list_messages(&self, thread_id: i64) -> StoreResult<Vec<ChatMessage>> {
        self.page(
            "SELECT id, thread_id, role, content, created_at FROM chat_messages WHERE thread_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
            thread_id,
            i64::MIN,
            usize::MAX,
            message_from_row,
        )
    }

    /// Messages of every thread owned by `run_id`, in id order.
    pub fn messages_for_run_after(
        &self,
        run_id: i64,
        after_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessage>> {
        self.page(
            r#"SELECT m.id, m.thread_id, m.role, m.content, m.created_at FROM chat_messages m
            INNER JOIN chat_threads t ON m.thread_id = t.id
            WHERE t.run_id = ?1 AND m.id > ?2 ORDER BY m.id LIMIT ?3"#,
            run_id,
            after_id,
            limit,
            message_from_row,
        )
    }

    // -- files --------------------------------------------------------------

    pub fn add_file(&self, run_id: i64, name: &str, data: &[u8]) -> StoreResult<FileBlob> {
        let conn = self.conn();
        ensure_exists(&conn, "runs", "run", run_id)?;
        conn.query_row(
            "INSERT INTO files (run_id, name, data) VALUES (?1, ?2, ?3) RETURNING id, run_id, name, data",
            params![run_id, name, data],
            file_from_row,
        )
        .map_err(|err| owner_not_found(err, "run", run_id))
    }

    pub fn get_file(&self, file_id: i64) -> StoreResult<Option<FileBlob>> {
        self.conn()
            .query_row(
                "SELECT id, run_id, name, data FROM files WHERE id = ?1",
                params![file_id],
                file_from_row,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_files(&self, run_id: i64) -> StoreResult<Vec<FileBlob>> {
        self.page(
            "SELECT id, run_id, name, data FROM files WHERE run_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
            run_id,
            i64::MIN,
            usize::MAX,
            file_from_row,
        )
    }

    pub fn delete_file(&self, file_id: i64) -> StoreResult<()> {
        let removed = self
            .conn()
            .execute("DELETE FROM files WHERE id = ?1", params![file_id])?;
        if removed == 0 {
            return Err(StoreError::NotFound {
                entity: "file",
                id: file_id,
            });
        }
        Ok(())
    }

    // -- insert-or-ignore (import) -------------------------------------------

    pub fn insert_run_if_absent(&self, run: &Run) -> StoreResult<InsertOutcome> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO runs (id, status, created_at) VALUES (?1, ?2, ?3)",
            params![run.id, run.status.as_str(), format_ts(&run.created_at)],
        )?;
        Ok(outcome(changed))
    }

    pub fn insert_card_if_absent(&self, card: &Card) -> StoreResult<InsertOutcome> {
        let payload = serde_json::to_string(&card.data)?;
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO cards (id, run_id, type, data) VALUES (?1, ?2, ?3, ?4)",
                params![card.id, card.run_id, card.kind, payload],
            )
            .map(outcome)
            .map_err(|err| missing_owner(err, "card", card.id, "run"))
    }

    /// Imported evidence goes through the same sanitizer and ceiling as
    /// [`SqliteStore::append_evidence`].
    pub fn insert_evidence_if_absent(&self, evidence: &Evidence) -> StoreResult<InsertOutcome> {
        let clean = sanitize_evidence(&evidence.raw)?;
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO evidence (id, card_id, raw, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    evidence.id,
                    evidence.card_id,
                    clean,
                    format_ts(&evidence.created_at)
                ],
            )
            .map(outcome)
            .map_err(|err| missing_owner(err, "evidence", evidence.id, "card"))
    }

    pub fn insert_thread_if_absent(&self, thread: &ChatThread) -> StoreResult<InsertOutcome> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO chat_threads (id, run_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    thread.id,
                    thread.run_id,
                    thread.title,
                    format_ts(&thread.created_at)
                ],
            )
            .map(outcome)
            .map_err(|err| missing_owner(err, "thread", thread.id, "run"))
    }

    pub fn insert_message_if_absent(&self, message: &ChatMessage) -> StoreResult<InsertOutcome> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO chat_messages (id, thread_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    message.thread_id,
                    message.role.as_str(),
                    message.content,
                    format_ts(&message.created_at)
                ],
            )
            .map(outcome)
            .map_err(|err| missing_owner(err, "message", message.id, "thread"))
    }

    // -- diagnostics --------------------------------------------------------

    pub fn counts(&self) -> StoreResult<TableCounts> {
        let conn = self.conn();
        let count = |table: &str| -> rusqlite::Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        };
        Ok(TableCounts {
            runs: count("runs")?,
            cards: count("cards")?,
            evidence: count("evidence")?,
            threads: count("chat_threads")?,
            messages: count("chat_messages")?,
            files: count("files")?,
        })
    }

    pub fn integrity_check(&self) -> StoreResult<String> {
        self.conn()
            .query_row("PRAGMA integrity_check;", [], |r| r.get(0))
            .map_err(Into::into)
    }

    fn page<T>(
        &self,
        sql: &str,
        owner_id: i64,
        after_id: i64,
        limit: usize,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Vec<T>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![owner_id, after_id, limit], map)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }
}

fn ensure_exists(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: i64,
) -> StoreResult<()> {
    let found: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)"),
        params![id],
        |r| r.get(0),
    )?;
    if found {
        Ok(())
    } else {
        Err(StoreError::NotFound { entity, id })
    }
}

fn outcome(changed: usize) -> InsertOutcome {
    if changed == 0 {
        InsertOutcome::Ignored
    } else {
        InsertOutcome::Inserted
    }
}

fn missing_owner(
    err: rusqlite::Error,
    entity: &'static str,
    id: i64,
    owner: &'static str,
) -> StoreError {
    if is_foreign_key_violation(&err) {
        StoreError::MissingOwner { entity, id, owner }
    } else {
        err.into()
    }
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn ts_at(r: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = r.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e))
}

fn run_from_row(r: &Row<'_>) -> rusqlite::Result<Run> {
    let status: String = r.get(1)?;
    Ok(Run {
        id: r.get(0)?,
        status: status.parse().map_err(|e| conversion_error(1, e))?,
        created_at: ts_at(r, 2)?,
    })
}

fn card_from_row(r: &Row<'_>) -> rusqlite::Result<Card> {
    let data: String = r.get(3)?;
    Ok(Card {
        id: r.get(0)?,
        run_id: r.get(1)?,
        kind: r.get(2)?,
        data: serde_json::from_str(&data).map_err(|e| conversion_error(3, e))?,
    })
}

fn evidence_from_row(r: &Row<'_>) -> rusqlite::Result<Evidence> {
    Ok(Evidence {
        id: r.get(0)?,
        card_id: r.get(1)?,
        raw: r.get(2)?,
        created_at: ts_at(r, 3)?,
    })
}

fn thread_from_row(r: &Row<'_>) -> rusqlite::Result<ChatThread> {
    Ok(ChatThread {
        id: r.get(0)?,
        run_id: r.get(1)?,
        title: r.get(2)?,
        created_at: ts_at(r, 3)?,
    })
}

fn message_from_row(r: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role: String = r.get(2)?;
    Ok(ChatMessage {
        id: r.get(0)?,
        thread_id: r.get(1)?,
        role: role.parse().map_err(|e| conversion_error(2, e))?,
        content: r.get(3)?,
        created_at: ts_at(r, 4)?,
    })
}

fn file_from_row(r: &Row<'_>) -> rusqlite::Result<FileBlob> {
    Ok(FileBlob {
        id: r.get(0)?,
        run_id: r.get(1)?,
        name: r.get(2)?,
        data: r.get(3)?,
    })
}
