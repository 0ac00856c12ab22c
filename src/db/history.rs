//! Chat history repository

use super::DbPool;
use crate::client::{ChatMessage, HistoryStore, MessageStatus};
use crate::{Error, Result};

const CLIENT_ID_KEY: &str = "client_id";

/// Persists the chat transcript and client id
#[derive(Clone)]
pub struct MessageRepo {
    pool: DbPool,
}

impl MessageRepo {
    /// Create a new message repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Read a setting
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .ok();
        Ok(value)
    }

    /// Write a setting
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            [key, value],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Number of stored messages
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self) -> Result<usize> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl HistoryStore for MessageRepo {
    fn load_messages(&self) -> Result<Vec<ChatMessage>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, content, is_user, timestamp, audio_data, status, show_text
                 FROM messages ORDER BY position ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let messages = stmt
            .query_map([], |row| {
                Ok(ChatMessage {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    is_user: row.get(2)?,
                    timestamp: row.get(3)?,
                    audio_data: row.get(4)?,
                    status: row
                        .get::<_, Option<String>>(5)?
                        .as_deref()
                        .and_then(MessageStatus::parse),
                    show_text: row.get(6)?,
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(messages)
    }

    fn save_messages(&self, messages: &[ChatMessage]) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages (id, position, content, is_user, timestamp, audio_data, status, show_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (position, msg) in messages.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    msg.id,
                    i64::try_from(position).unwrap_or(i64::MAX),
                    msg.content,
                    msg.is_user,
                    msg.timestamp,
                    msg.audio_data,
                    msg.status.map(MessageStatus::as_str),
                    msg.show_text,
                ])?;
            }
        }
        tx.commit()?;

        tracing::trace!(count = messages.len(), "saved chat messages");
        Ok(())
    }

    fn load_client_id(&self) -> Result<Option<String>> {
        self.get_setting(CLIENT_ID_KEY)
    }

    fn save_client_id(&self, client_id: &str) -> Result<()> {
        self.set_setting(CLIENT_ID_KEY, client_id)
    }
}
