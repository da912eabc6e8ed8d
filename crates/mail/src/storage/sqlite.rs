//! SQLite-based mirror storage

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::MailStore;
use crate::models::{Message, MessageId, Sender, SyncState, ThreadId};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Single-row sync cursor
            CREATE TABLE sync_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                account_id TEXT NOT NULL,
                history_id TEXT NOT NULL,
                last_sync_at TEXT NOT NULL,
                sync_version INTEGER NOT NULL DEFAULT 1
            );

            -- Message metadata, one row per provider message ID
            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                label_ids TEXT NOT NULL DEFAULT '[]',
                sender_name TEXT,
                sender_email TEXT NOT NULL,
                sender_domain TEXT NOT NULL,
                snippet TEXT NOT NULL,
                history_id TEXT NOT NULL,
                internal_date INTEGER NOT NULL,
                size_estimate INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_sender_email ON messages(sender_email);
            CREATE INDEX idx_messages_internal_date ON messages(internal_date ASC);
            "#,
        ),
    ])
}

const MESSAGE_COLUMNS: &str = "id, thread_id, label_ids, sender_name, sender_email, sender_domain,
     snippet, history_id, internal_date, size_estimate";

/// SQLite-based mirror storage
///
/// One database per mailbox. All access goes through a single connection
/// guarded by a mutex, so batch writes are serialized.
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed while a batch is being written and keeps
        // a crash mid-transaction from leaving a partial batch behind.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
        let label_json: String = row.get(2)?;
        // Labels are written by us as JSON; a damaged value degrades to no labels
        let label_ids: Vec<String> = serde_json::from_str(&label_json).unwrap_or_default();

        Ok(Message {
            id: MessageId::new(row.get::<_, String>(0)?),
            thread_id: ThreadId::new(row.get::<_, String>(1)?),
            label_ids,
            sender: Sender {
                display_name: row.get(3)?,
                email: row.get(4)?,
                domain: row.get(5)?,
            },
            snippet: row.get(6)?,
            history_id: row.get(7)?,
            internal_date: row.get(8)?,
            size_estimate: row.get(9)?,
        })
    }
}

impl MailStore for SqliteMailStore {
    fn upsert_messages(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages
                 (id, thread_id, label_ids, sender_name, sender_email, sender_domain,
                  snippet, history_id, internal_date, size_estimate)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    thread_id = excluded.thread_id,
                    label_ids = excluded.label_ids,
                    sender_name = excluded.sender_name,
                    sender_email = excluded.sender_email,
                    sender_domain = excluded.sender_domain,
                    snippet = excluded.snippet,
                    history_id = excluded.history_id,
                    internal_date = excluded.internal_date,
                    size_estimate = excluded.size_estimate",
            )?;

            for message in messages {
                let label_json = serde_json::to_string(&message.label_ids)?;
                stmt.execute(params![
                    message.id.as_str(),
                    message.thread_id.as_str(),
                    label_json,
                    message.sender.display_name,
                    message.sender.email,
                    message.sender.domain,
                    message.snippet,
                    message.history_id,
                    message.internal_date,
                    message.size_estimate,
                ])
                .with_context(|| format!("Failed to store message {}", message.id))?;
            }
        }
        tx.commit().context("Failed to commit message batch")?;

        Ok(())
    }

    fn remove_message(&self, id: &MessageId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE id = ?", [id.as_str()])?;
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        let message = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"),
                [id.as_str()],
                Self::message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE id = ?",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn known_ids(&self) -> Result<HashSet<MessageId>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM messages")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|id| id.map(MessageId::new))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    fn list_messages(&self) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY internal_date ASC, id ASC"
        ))?;
        let messages = stmt
            .query_map([], Self::message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn count_messages(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn get_sync_state(&self) -> Result<Option<SyncState>> {
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, String, String, u32)> = conn
            .query_row(
                "SELECT account_id, history_id, last_sync_at, sync_version
                 FROM sync_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((account_id, history_id, last_sync_at_str, sync_version)) = row else {
            return Ok(None);
        };

        let last_sync_at = chrono::DateTime::parse_from_rfc3339(&last_sync_at_str)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .with_context(|| format!("Invalid last_sync_at in sync_state: {last_sync_at_str}"))?;

        Ok(Some(SyncState {
            account_id,
            history_id,
            last_sync_at,
            sync_version,
        }))
    }

    fn save_sync_state(&self, state: SyncState) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO sync_state (id, account_id, history_id, last_sync_at, sync_version)
             VALUES (1, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                history_id = excluded.history_id,
                last_sync_at = excluded.last_sync_at,
                sync_version = excluded.sync_version",
            params![
                state.account_id,
                state.history_id,
                state.last_sync_at.to_rfc3339(),
                state.sync_version,
            ],
        )
        .context("Failed to save sync cursor")?;

        Ok(())
    }

    fn delete_sync_state(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM sync_state", [])?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            DELETE FROM messages;
            DELETE FROM sync_state;
            "#,
        )?;
        Ok(())
    }
}
