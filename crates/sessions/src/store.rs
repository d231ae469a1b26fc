//! The relational session store.
//!
//! Two tables: `sessions` (header) and `messages` (append-only log,
//! ordered by a per-session monotonic `seq`). Duplicate prevention for the
//! active `(owner_id, country, service_type)` tuple is enforced both by a
//! transactional lookup-then-insert and a partial unique index.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use gb_domain::error::{Error, Result};

const TITLE_MAX_CHARS: usize = 60;
const MAX_ATTEMPTS: u32 = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A session header.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: Uuid,
    pub owner_id: Option<i64>,
    pub country: String,
    pub service_type: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(Error::Db(format!("unknown message role '{other}'"))),
        }
    }
}

/// One line of a session's message log.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub session_id: Uuid,
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Open (or create) the sessions database and run the idempotent
    /// migration.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "session store opened");
        Ok(store)
    }

    /// In-memory store (tests). Single connection: every pooled
    /// connection to `:memory:` would otherwise see its own empty
    /// database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in [
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id    TEXT PRIMARY KEY,
                owner_id      INTEGER,
                country       TEXT NOT NULL,
                service_type  TEXT NOT NULL,
                title         TEXT NOT NULL,
                created_at    TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                active        INTEGER NOT NULL DEFAULT 1
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_tuple
                ON sessions(owner_id, country, service_type) WHERE active = 1",
            "CREATE TABLE IF NOT EXISTS messages (
                session_id TEXT NOT NULL REFERENCES sessions(session_id),
                seq        INTEGER NOT NULL,
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_id, seq)
            )",
            "CREATE INDEX IF NOT EXISTS idx_sessions_owner_activity
                ON sessions(owner_id, last_activity DESC)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    // ── get_or_create ─────────────────────────────────────────────

    /// Resolve a session for the caller, creating one only when neither an
    /// explicit id nor an active tuple match exists. Returns
    /// `(session, created)`.
    pub async fn get_or_create(
        &self,
        session_id: Option<Uuid>,
        owner_id: Option<i64>,
        country: &str,
        service_type: &str,
    ) -> Result<(Session, bool)> {
        retrying(|| self.get_or_create_inner(session_id, owner_id, country, service_type)).await
    }

    async fn get_or_create_inner(
        &self,
        session_id: Option<Uuid>,
        owner_id: Option<i64>,
        country: &str,
        service_type: &str,
    ) -> Result<(Session, bool)> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // 1. Explicit id wins when it exists (after the ownership check).
        if let Some(id) = session_id {
            let row: Option<SessionRow> = sqlx::query_as(SELECT_SESSION)
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
            if let Some(row) = row {
                let session = row.decode()?;
                if let (Some(caller), Some(owner)) = (owner_id, session.owner_id) {
                    if caller != owner {
                        return Err(Error::Forbidden(format!("session {id}")));
                    }
                }
                tx.commit().await.map_err(db_err)?;
                return Ok((session, false));
            }
        }

        // 2. Active session for the same tuple is reused, never duplicated.
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, owner_id, country, service_type, title,
                    created_at, last_activity, active
             FROM sessions
             WHERE owner_id IS ?1 AND country = ?2 AND service_type = ?3 AND active = 1",
        )
        .bind(owner_id)
        .bind(country)
        .bind(service_type)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        if let Some(row) = row {
            tx.commit().await.map_err(db_err)?;
            return Ok((row.decode()?, false));
        }

        // 3. Create.
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4(),
            owner_id,
            country: country.to_owned(),
            service_type: service_type.to_owned(),
            title: format!("{service_type} in {country}"),
            created_at: now,
            last_activity: now,
            active: true,
        };
        let inserted = sqlx::query(
            "INSERT INTO sessions (session_id, owner_id, country, service_type, title,
                                   created_at, last_activity, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
        )
        .bind(session.session_id.to_string())
        .bind(session.owner_id)
        .bind(&session.country)
        .bind(&session.service_type)
        .bind(&session.title)
        .bind(session.created_at)
        .bind(session.last_activity)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await.map_err(db_err)?;
                tracing::info!(session_id = %session.session_id, country, service_type, "session created");
                Ok((session, true))
            }
            // Lost a race on the partial unique index: another request
            // created the tuple's session first, so hand that one back.
            Err(e) if e.to_string().contains("UNIQUE constraint failed") => {
                drop(tx);
                let row: Option<SessionRow> = sqlx::query_as(
                    "SELECT session_id, owner_id, country, service_type, title,
                            created_at, last_activity, active
                     FROM sessions
                     WHERE owner_id IS ?1 AND country = ?2 AND service_type = ?3 AND active = 1",
                )
                .bind(owner_id)
                .bind(country)
                .bind(service_type)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
                match row {
                    Some(row) => Ok((row.decode()?, false)),
                    None => Err(db_err(e)),
                }
            }
            Err(e) => Err(db_err(e)),
        }
    }

    // ── Reads ─────────────────────────────────────────────────────

    pub async fn get(&self, session_id: Uuid) -> Result<Session> {
        let row: Option<SessionRow> = sqlx::query_as(SELECT_SESSION)
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.ok_or_else(|| Error::NotFound(format!("session {session_id}")))?
            .decode()
    }

    /// The most recent `limit` messages, in ascending `seq` order.
    pub async fn history(&self, session_id: Uuid, limit: usize) -> Result<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT session_id, seq, role, content, created_at
             FROM messages WHERE session_id = ?1
             ORDER BY seq DESC LIMIT ?2",
        )
        .bind(session_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut messages: Vec<ChatMessage> =
            rows.into_iter().map(|r| r.decode()).collect::<Result<_>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// The full log grouped into (user, assistant) turns, in order.
    /// Consecutive user messages collapse to the latest one; a trailing
    /// unanswered user message is dropped.
    pub async fn history_as_turns(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<(ChatMessage, ChatMessage)>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT session_id, seq, role, content, created_at
             FROM messages WHERE session_id = ?1 ORDER BY seq ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut turns = Vec::new();
        let mut pending_user: Option<ChatMessage> = None;
        for row in rows {
            let msg = row.decode()?;
            match msg.role {
                MessageRole::User => pending_user = Some(msg),
                MessageRole::Assistant => {
                    if let Some(user) = pending_user.take() {
                        turns.push((user, msg));
                    }
                }
            }
        }
        Ok(turns)
    }

    /// Sessions for a user, most recently active first.
    pub async fn list_for_owner(&self, owner_id: i64, active_only: bool) -> Result<Vec<Session>> {
        let sql = if active_only {
            "SELECT session_id, owner_id, country, service_type, title,
                    created_at, last_activity, active
             FROM sessions WHERE owner_id = ?1 AND active = 1
             ORDER BY last_activity DESC"
        } else {
            "SELECT session_id, owner_id, country, service_type, title,
                    created_at, last_activity, active
             FROM sessions WHERE owner_id = ?1
             ORDER BY last_activity DESC"
        };
        let rows: Vec<SessionRow> = sqlx::query_as(sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(|r| r.decode()).collect()
    }

    // ── Writes ────────────────────────────────────────────────────

    /// Append one message, assigning the next `seq` and touching
    /// `last_activity` in the same transaction.
    pub async fn append_message(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage> {
        retrying(|| self.append_message_inner(session_id, role, content)).await
    }

    async fn append_message_inner(
        &self,
        session_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row: Option<SessionRow> = sqlx::query_as(SELECT_SESSION)
            .bind(session_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let session = row
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))?
            .decode()?;
        if !session.active {
            return Err(Error::SessionClosed(session_id.to_string()));
        }

        let (next_seq,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM messages WHERE session_id = ?1",
        )
        .bind(session_id.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let message = ChatMessage {
            session_id,
            seq: next_seq,
            role,
            content: content.to_owned(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO messages (session_id, seq, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(session_id.to_string())
        .bind(message.seq)
        .bind(role.as_str())
        .bind(content)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("UPDATE sessions SET last_activity = ?1 WHERE session_id = ?2")
            .bind(message.created_at)
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        // First user message names the session.
        if next_seq == 0 && role == MessageRole::User {
            sqlx::query("UPDATE sessions SET title = ?1 WHERE session_id = ?2")
                .bind(derive_title(content))
                .bind(session_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(message)
    }

    /// Update `last_activity` without appending.
    pub async fn touch(&self, session_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET last_activity = ?1 WHERE session_id = ?2")
            .bind(Utc::now())
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("session {session_id}")));
        }
        Ok(())
    }

    /// Deactivate sessions idle longer than `max_idle`. Returns the count.
    pub async fn deactivate_older_than(&self, max_idle: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_idle)
                .map_err(|e| Error::Other(format!("bad idle duration: {e}")))?;
        let result = sqlx::query(
            "UPDATE sessions SET active = 0 WHERE active = 1 AND last_activity < ?1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SELECT_SESSION: &str = "SELECT session_id, owner_id, country, service_type, title,
        created_at, last_activity, active
 FROM sessions WHERE session_id = ?1";

type SessionRow = (
    String,
    Option<i64>,
    String,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    bool,
);

type MessageRow = (String, i64, String, String, DateTime<Utc>);

trait DecodeRow<T> {
    fn decode(self) -> Result<T>;
}

impl DecodeRow<Session> for SessionRow {
    fn decode(self) -> Result<Session> {
        let (id, owner_id, country, service_type, title, created_at, last_activity, active) = self;
        Ok(Session {
            session_id: parse_uuid(&id)?,
            owner_id,
            country,
            service_type,
            title,
            created_at,
            last_activity,
            active,
        })
    }
}

impl DecodeRow<ChatMessage> for MessageRow {
    fn decode(self) -> Result<ChatMessage> {
        let (id, seq, role, content, created_at) = self;
        Ok(ChatMessage {
            session_id: parse_uuid(&id)?,
            seq,
            role: MessageRole::parse(&role)?,
            content,
            created_at,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Db(format!("corrupt session id '{s}': {e}")))
}

fn db_err(e: sqlx::Error) -> Error {
    Error::Db(e.to_string())
}

/// Trim the first user message into a session title.
fn derive_title(content: &str) -> String {
    let trimmed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        trimmed
    } else {
        trimmed.chars().take(TITLE_MAX_CHARS).collect()
    }
}

fn is_transient(e: &Error) -> bool {
    match e {
        Error::Db(msg) => {
            msg.contains("database is locked")
                || msg.contains("database table is locked")
                || msg.contains("busy")
                || msg.contains("pool timed out")
        }
        _ => false,
    }
}

/// Run a store operation, retrying transient failures with jittered
/// backoff (up to 3 attempts).
async fn retrying<T, F, Fut>(op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Err(e) if is_transient(&e) && attempt < MAX_ATTEMPTS => {
                let jitter = {
                    use rand::Rng;
                    rand::thread_rng().gen_range(0..50)
                };
                let delay = Duration::from_millis(50 * attempt as u64 + jitter);
                tracing::warn!(attempt, error = %e, "transient store error, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
