//! SQLite persistence: per-user chat state and a log of messages for
//! walking reply chains.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::bot::state::ChatState;
use crate::error::BotError;

/// How far back a reply chain is followed.
pub const MAX_CHAIN_DEPTH: usize = 50;

pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// In-memory store.
    pub fn new() -> Result<Self, BotError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, BotError> {
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;

        let (states, messages) = store.counts()?;
        info!("Loaded database from {:?} ({} chat states, {} messages)", path, states, messages);
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), BotError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chat_state (
                user_id INTEGER PRIMARY KEY,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                chat_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                reply_to_id INTEGER,
                text TEXT NOT NULL,
                PRIMARY KEY (chat_id, message_id)
            );
        "#,
        )?;
        Ok(())
    }

    fn counts(&self) -> Result<(usize, usize), BotError> {
        let conn = self.conn.lock().unwrap();
        let states: i64 = conn.query_row("SELECT COUNT(*) FROM chat_state", [], |row| row.get(0))?;
        let messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok((states as usize, messages as usize))
    }

    // ==================== CHAT STATE ====================

    /// The stored state for `user_id`, or a fresh one.
    pub fn load(&self, user_id: u64) -> Result<ChatState, BotError> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM chat_state WHERE user_id = ?1",
                params![user_id as i64],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => serde_json::from_str(&json).map_err(|e| BotError::parse("chat state", e)),
            None => Ok(ChatState::default()),
        }
    }

    pub fn save(&self, user_id: u64, state: &ChatState) -> Result<(), BotError> {
        let json = serde_json::to_string(state).map_err(|e| BotError::parse("chat state", e))?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chat_state (user_id, state_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET state_json = ?2, updated_at = ?3",
            params![user_id as i64, json, chrono::Utc::now().to_rfc3339()],
        )?;
        debug!("Saved state for user {} ({} bytes)", user_id, json.len());
        Ok(())
    }

    /// Forget `user_id`: their chat state and the message log of `chat_id`,
    /// the conversation they cleared from.
    pub fn clear(&self, user_id: u64, chat_id: i64) -> Result<(), BotError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chat_state WHERE user_id = ?1", params![user_id as i64])?;
        let messages = tx.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
        tx.commit()?;
        info!("🧹 Cleared state for user {} and {} message(s) in chat {}", user_id, messages, chat_id);
        Ok(())
    }

    // ==================== MESSAGE LOG ====================

    pub fn record_message(
        &self,
        chat_id: i64,
        message_id: i32,
        reply_to_id: Option<i32>,
        text: &str,
    ) -> Result<(), BotError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO messages (chat_id, message_id, reply_to_id, text) VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, message_id, reply_to_id, text],
        )?;
        Ok(())
    }

    /// Texts of `start` and its recorded ancestors, oldest first.
    ///
    /// Stops at the first message that is not in the log, or after
    /// [`MAX_CHAIN_DEPTH`] messages.
    pub fn reply_chain(&self, chat_id: i64, start: i32) -> Result<Vec<String>, BotError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT text, reply_to_id FROM messages WHERE chat_id = ?1 AND message_id = ?2")?;

        let mut chain = Vec::new();
        let mut next = Some(start);
        while let Some(id) = next {
            if chain.len() >= MAX_CHAIN_DEPTH {
                break;
            }
            let row: Option<(String, Option<i32>)> = stmt
                .query_row(params![chat_id, id], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;
            let Some((text, reply_to_id)) = row else {
                break;
            };
            chain.push(text);
            // A row replying to itself would loop.
            next = reply_to_id.filter(|&parent| parent != id);
        }

        chain.reverse();
        Ok(chain)
    }
}
