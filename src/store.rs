//! Durable append-only persistence over a single SQLite file.
//!
//! The store owns every table and the two hard invariants the rest of the
//! backend leans on: messages are immutable and events are append-only.
//! Both are enforced with SQLite triggers so that not even a privileged
//! connection can violate them. Ids are AUTOINCREMENT and serve as the
//! canonical ordering; the timestamp columns are informational.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

// ── Row types ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(anyhow!("unknown message role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Dismissed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Dismissed => "dismissed",
        }
    }
}

impl FromStr for ProposalStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ProposalStatus::Pending),
            "approved" => Ok(ProposalStatus::Approved),
            "rejected" => Ok(ProposalStatus::Rejected),
            "dismissed" => Ok(ProposalStatus::Dismissed),
            other => Err(anyhow!("unknown proposal status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    pub corrects_message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub title: Option<String>,
    pub created_at: String,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: String,
    pub conversation_id: Option<i64>,
    pub causality_message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreferenceRow {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub scope: String,
    pub created_at: String,
    pub approved_event_id: Option<i64>,
    pub source_proposal_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetRow {
    pub id: i64,
    pub scope: String,
    pub created_at: String,
    pub reset_event_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposalRow {
    pub id: i64,
    pub conversation_id: i64,
    pub key: String,
    pub value: String,
    pub proposal_text: String,
    pub rationale: Option<String>,
    pub status: ProposalStatus,
    pub created_at: String,
    pub decided_at: Option<String>,
    pub causality_message_id: Option<i64>,
    pub assistant_message_id: Option<i64>,
}

/// Fields for a new proposal row; status starts out `pending`.
#[derive(Debug, Clone)]
pub struct NewProposal<'a> {
    pub conversation_id: i64,
    pub key: &'a str,
    pub value: &'a str,
    pub proposal_text: &'a str,
    pub rationale: Option<&'a str>,
    pub causality_message_id: Option<i64>,
    pub assistant_message_id: Option<i64>,
}

// ── Store ──────────────────────────────────────────────

/// Millisecond-resolution timestamp default. The original schema used
/// second-resolution CURRENT_TIMESTAMP; milliseconds keep the
/// strictly-newer-than-reset comparison meaningful for back-to-back writes.
const NOW: &str = "(strftime('%Y-%m-%d %H:%M:%f','now'))";

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database file, initialize the schema
    /// idempotently, and guarantee a default conversation exists with all
    /// orphan messages backfilled into the oldest one.
    pub async fn open(path: &Path) -> Result<Store> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating data dir {}", parent.display()))?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("opening database {}", path.display()))?;

        let store = Store { pool };
        store.init_schema().await?;
        store.bootstrap_default_conversation().await?;
        Ok(store)
    }

    /// Raw pool access, used by the read-only `sql_query` tool tests and the
    /// integration suite to set up fixtures.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS conversations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT,
                    created_at TEXT NOT NULL DEFAULT {NOW}
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    role TEXT NOT NULL CHECK (role IN ('user','assistant')),
                    content TEXT NOT NULL CHECK (length(content) > 0),
                    timestamp TEXT NOT NULL DEFAULT {NOW},
                    corrects_message_id INTEGER REFERENCES messages(id)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS conversation_messages (
                    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                    message_id INTEGER NOT NULL REFERENCES messages(id),
                    created_at TEXT NOT NULL DEFAULT {NOW},
                    PRIMARY KEY (conversation_id, message_id)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    type TEXT NOT NULL,
                    payload_json TEXT NOT NULL,
                    conversation_id INTEGER,
                    causality_message_id INTEGER,
                    created_at TEXT NOT NULL DEFAULT {NOW}
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS preferences (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    scope TEXT NOT NULL DEFAULT 'global',
                    created_at TEXT NOT NULL DEFAULT {NOW},
                    approved_event_id INTEGER REFERENCES events(id),
                    source_proposal_id INTEGER REFERENCES preference_proposals(id)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS preference_resets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    scope TEXT NOT NULL DEFAULT 'global',
                    created_at TEXT NOT NULL DEFAULT {NOW},
                    reset_event_id INTEGER REFERENCES events(id)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS preference_proposals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    proposal_text TEXT NOT NULL,
                    rationale TEXT,
                    status TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending','approved','rejected','dismissed')),
                    created_at TEXT NOT NULL DEFAULT {NOW},
                    decided_at TEXT,
                    causality_message_id INTEGER REFERENCES messages(id),
                    assistant_message_id INTEGER REFERENCES messages(id)
                )"
            ),
        ];
        for sql in &statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        // Immutability is enforced here, below the application layer, so a
        // direct connection cannot rewrite history either.
        let triggers = [
            "CREATE TRIGGER IF NOT EXISTS messages_no_update
             BEFORE UPDATE ON messages
             BEGIN SELECT RAISE(ABORT, 'Messages are immutable'); END",
            "CREATE TRIGGER IF NOT EXISTS messages_no_delete
             BEFORE DELETE ON messages
             BEGIN SELECT RAISE(ABORT, 'Messages are immutable'); END",
            "CREATE TRIGGER IF NOT EXISTS events_no_update
             BEFORE UPDATE ON events
             BEGIN SELECT RAISE(ABORT, 'Events are append-only'); END",
            "CREATE TRIGGER IF NOT EXISTS events_no_delete
             BEFORE DELETE ON events
             BEGIN SELECT RAISE(ABORT, 'Events are append-only'); END",
        ];
        for sql in &triggers {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// First-launch guarantee: a "Legacy" conversation exists and any message
    /// without a conversation membership is attached to the oldest one.
    async fn bootstrap_default_conversation(&self) -> Result<()> {
        let oldest: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM conversations ORDER BY id LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        let conversation_id = match oldest {
            Some((id,)) => id,
            None => {
                sqlx::query("INSERT INTO conversations (title) VALUES ('Legacy')")
                    .execute(&self.pool)
                    .await?
                    .last_insert_rowid()
            }
        };

        sqlx::query(
            "INSERT OR IGNORE INTO conversation_messages (conversation_id, message_id)
             SELECT ?, m.id
             FROM messages m
             LEFT JOIN conversation_messages cm ON cm.message_id = m.id
             WHERE cm.message_id IS NULL",
        )
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Conversations ──────────────────────────────────

    pub async fn create_conversation(&self, title: Option<&str>) -> Result<i64> {
        let result = sqlx::query("INSERT INTO conversations (title) VALUES (?)")
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest conversation id, creating the "Legacy" conversation when the
    /// table is empty so callers always have somewhere to append.
    pub async fn latest_conversation_id(&self) -> Result<i64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM conversations ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((id,)) => Ok(id),
            None => self.create_conversation(Some("Legacy")).await,
        }
    }

    pub async fn conversation_exists(&self, conversation_id: i64) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query_as::<_, (i64, Option<String>, String, i64)>(
            "SELECT c.id, c.title, c.created_at, COUNT(cm.message_id) AS message_count
             FROM conversations c
             LEFT JOIN conversation_messages cm ON cm.conversation_id = c.id
             GROUP BY c.id
             ORDER BY c.id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, title, created_at, message_count)| ConversationSummary {
                id,
                title,
                created_at,
                message_count,
            })
            .collect())
    }

    // ── Messages ───────────────────────────────────────

    /// Insert a message and its conversation membership in one transaction.
    /// Membership is idempotent (`INSERT OR IGNORE`).
    pub async fn insert_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        corrects_message_id: Option<i64>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let message_id = sqlx::query(
            "INSERT INTO messages (content, role, corrects_message_id) VALUES (?, ?, ?)",
        )
        .bind(content)
        .bind(role.as_str())
        .bind(corrects_message_id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "INSERT OR IGNORE INTO conversation_messages (conversation_id, message_id)
             VALUES (?, ?)",
        )
        .bind(conversation_id)
        .bind(message_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(message_id)
    }

    pub async fn list_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, Option<i64>)>(
            "SELECT m.id, m.content, m.role, m.timestamp, m.corrects_message_id
             FROM messages m
             JOIN conversation_messages cm ON cm.message_id = m.id
             WHERE cm.conversation_id = ?
             ORDER BY m.id",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, content, role, timestamp, corrects_message_id)| {
                Ok(Message {
                    id,
                    role: role.parse()?,
                    content,
                    timestamp,
                    corrects_message_id,
                })
            })
            .collect()
    }

    pub async fn last_message_role(&self, conversation_id: i64) -> Result<Option<Role>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT m.role
             FROM messages m
             JOIN conversation_messages cm ON cm.message_id = m.id
             WHERE cm.conversation_id = ?
             ORDER BY m.id DESC
             LIMIT 1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(role,)| role.parse()).transpose()
    }

    pub async fn message_role(&self, message_id: i64) -> Result<Option<Role>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT role FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(role,)| role.parse()).transpose()
    }

    pub async fn conversation_id_for_message(&self, message_id: i64) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT conversation_id
             FROM conversation_messages
             WHERE message_id = ?
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    // ── Events ─────────────────────────────────────────

    pub async fn insert_event(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        conversation_id: Option<i64>,
        causality_message_id: Option<i64>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO events (type, payload_json, conversation_id, causality_message_id)
             VALUES (?, ?, ?, ?)",
        )
        .bind(event_type)
        .bind(payload.to_string())
        .bind(conversation_id)
        .bind(causality_message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Tail of the event log, newest first, optionally filtered by type and
    /// conversation. `limit` is clamped to 1..=2000.
    pub async fn list_events(
        &self,
        event_type: Option<&str>,
        conversation_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<EventRow>> {
        let safe_limit = limit.clamp(1, 2000);
        let mut clauses: Vec<&str> = Vec::new();
        if event_type.is_some() {
            clauses.push("type = ?");
        }
        if conversation_id.is_some() {
            clauses.push("conversation_id = ?");
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT id, type, payload_json, created_at, conversation_id, causality_message_id
             FROM events {where_clause} ORDER BY id DESC LIMIT ?"
        );

        let mut query =
            sqlx::query_as::<_, (i64, String, String, String, Option<i64>, Option<i64>)>(&sql);
        if let Some(t) = event_type {
            query = query.bind(t);
        }
        if let Some(c) = conversation_id {
            query = query.bind(c);
        }
        let rows = query.bind(safe_limit).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, event_type, payload_json, created_at, conversation_id, causality)| EventRow {
                    id,
                    event_type,
                    payload: serde_json::from_str(&payload_json)
                        .unwrap_or(serde_json::Value::Null),
                    created_at,
                    conversation_id,
                    causality_message_id: causality,
                },
            )
            .collect())
    }

    // ── Preferences ────────────────────────────────────

    pub async fn insert_preference(
        &self,
        key: &str,
        value: &str,
        scope: &str,
        approved_event_id: Option<i64>,
        source_proposal_id: Option<i64>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO preferences (key, value, scope, approved_event_id, source_proposal_id)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(key)
        .bind(value)
        .bind(scope)
        .bind(approved_event_id)
        .bind(source_proposal_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_preferences(&self, scope: &str) -> Result<Vec<PreferenceRow>> {
        let rows = sqlx::query_as::<
            _,
            (i64, String, String, String, String, Option<i64>, Option<i64>),
        >(
            "SELECT id, key, value, scope, created_at, approved_event_id, source_proposal_id
             FROM preferences
             WHERE scope = ?
             ORDER BY id",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(
                |(id, key, value, scope, created_at, approved_event_id, source_proposal_id)| {
                    PreferenceRow {
                        id,
                        key,
                        value,
                        scope,
                        created_at,
                        approved_event_id,
                        source_proposal_id,
                    }
                },
            )
            .collect())
    }

    /// Key/value pairs in id order, restricted to entries strictly newer
    /// than `cutoff` when one is given.
    pub async fn preferences_since(
        &self,
        scope: &str,
        cutoff: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let rows = match cutoff {
            None => {
                sqlx::query_as::<_, (String, String)>(
                    "SELECT key, value FROM preferences WHERE scope = ? ORDER BY id",
                )
                .bind(scope)
                .fetch_all(&self.pool)
                .await?
            }
            Some(cutoff) => {
                sqlx::query_as::<_, (String, String)>(
                    "SELECT key, value FROM preferences
                     WHERE scope = ? AND created_at > ?
                     ORDER BY id",
                )
                .bind(scope)
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn insert_preference_reset(
        &self,
        scope: &str,
        reset_event_id: Option<i64>,
    ) -> Result<i64> {
        let result =
            sqlx::query("INSERT INTO preference_resets (scope, reset_event_id) VALUES (?, ?)")
                .bind(scope)
                .bind(reset_event_id)
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn latest_preference_reset(&self, scope: &str) -> Result<Option<ResetRow>> {
        let row: Option<(i64, String, String, Option<i64>)> = sqlx::query_as(
            "SELECT id, scope, created_at, reset_event_id
             FROM preference_resets
             WHERE scope = ?
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, scope, created_at, reset_event_id)| ResetRow {
            id,
            scope,
            created_at,
            reset_event_id,
        }))
    }

    // ── Preference proposals ───────────────────────────

    pub async fn insert_proposal(&self, proposal: NewProposal<'_>) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO preference_proposals (
                conversation_id, key, value, proposal_text, rationale,
                status, causality_message_id, assistant_message_id
             ) VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(proposal.conversation_id)
        .bind(proposal.key)
        .bind(proposal.value)
        .bind(proposal.proposal_text)
        .bind(proposal.rationale)
        .bind(proposal.causality_message_id)
        .bind(proposal.assistant_message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_proposal(&self, proposal_id: i64) -> Result<Option<ProposalRow>> {
        let rows = self
            .proposal_rows(
                "SELECT id, conversation_id, key, value, proposal_text, rationale,
                        status, created_at, decided_at, causality_message_id, assistant_message_id
                 FROM preference_proposals
                 WHERE id = ?",
                Some(proposal_id),
                None,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Newest pending proposal for a conversation, if any.
    pub async fn pending_proposal(&self, conversation_id: i64) -> Result<Option<ProposalRow>> {
        let rows = self
            .proposal_rows(
                "SELECT id, conversation_id, key, value, proposal_text, rationale,
                        status, created_at, decided_at, causality_message_id, assistant_message_id
                 FROM preference_proposals
                 WHERE conversation_id = ? AND status = 'pending'
                 ORDER BY id DESC
                 LIMIT 1",
                Some(conversation_id),
                None,
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn list_proposals(
        &self,
        conversation_id: i64,
        status: &str,
    ) -> Result<Vec<ProposalRow>> {
        self.proposal_rows(
            "SELECT id, conversation_id, key, value, proposal_text, rationale,
                    status, created_at, decided_at, causality_message_id, assistant_message_id
             FROM preference_proposals
             WHERE conversation_id = ? AND status = ?
             ORDER BY id DESC",
            Some(conversation_id),
            Some(status),
        )
        .await
    }

    pub async fn update_proposal_status(
        &self,
        proposal_id: i64,
        status: ProposalStatus,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE preference_proposals
             SET status = ?, decided_at = strftime('%Y-%m-%d %H:%M:%f','now')
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(proposal_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn proposal_rows(
        &self,
        sql: &str,
        first_bind: Option<i64>,
        second_bind: Option<&str>,
    ) -> Result<Vec<ProposalRow>> {
        type Tuple = (
            i64,
            i64,
            String,
            String,
            String,
            Option<String>,
            String,
            String,
            Option<String>,
            Option<i64>,
            Option<i64>,
        );
        let mut query = sqlx::query_as::<_, Tuple>(sql);
        if let Some(id) = first_bind {
            query = query.bind(id);
        }
        if let Some(status) = second_bind {
            query = query.bind(status);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(
                |(
                    id,
                    conversation_id,
                    key,
                    value,
                    proposal_text,
                    rationale,
                    status,
                    created_at,
                    decided_at,
                    causality_message_id,
                    assistant_message_id,
                )| {
                    Ok(ProposalRow {
                        id,
                        conversation_id,
                        key,
                        value,
                        proposal_text,
                        rationale,
                        status: status.parse()?,
                        created_at,
                        decided_at,
                        causality_message_id,
                        assistant_message_id,
                    })
                },
            )
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Store;
    use tempfile::TempDir;

    /// Store on a throwaway database file. The TempDir must stay alive for
    /// as long as the store is used.
    pub async fn temp_store() -> (Store, TempDir) {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let store = Store::open(&tmp.path().join("chat.db"))
            .await
            .expect("failed to open store");
        (store, tmp)
    }
}
