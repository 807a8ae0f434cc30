//! Conversation history storage - append-only per-conversation message log.
//!
//! Two-table design: `history:data` holds the serialized message keyed by
//! `{conversation}:{message_id}`, `history:index` orders messages by
//! submission time with key `{conversation}:{submitted_at:020}:{message_id}`.
//! Appends are idempotent by message id; the log is never rewritten.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

use crate::range_utils::prefix_end_bound;

const HISTORY_DATA: TableDefinition<&str, &[u8]> = TableDefinition::new("history:data");
const HISTORY_INDEX: TableDefinition<&str, &str> = TableDefinition::new("history:index");

/// Low-level conversation history storage with byte-level API
#[derive(Debug, Clone)]
pub struct HistoryStorage {
    db: Arc<Database>,
}

impl HistoryStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(HISTORY_DATA)?;
        write_txn.open_table(HISTORY_INDEX)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append a message to a conversation's log.
    ///
    /// Idempotent by `(conversation_id, message_id)`: returns `false` and
    /// leaves the log untouched when the id is already present.
    pub fn append_raw(
        &self,
        conversation_id: &str,
        message_id: &str,
        submitted_at_ms: i64,
        data: &[u8],
    ) -> Result<bool> {
        let data_key = Self::data_key(conversation_id, message_id);
        let index_key = Self::index_key(conversation_id, submitted_at_ms, message_id);

        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut data_table = write_txn.open_table(HISTORY_DATA)?;
            if data_table.get(data_key.as_str())?.is_some() {
                false
            } else {
                data_table.insert(data_key.as_str(), data)?;
                drop(data_table);

                let mut index_table = write_txn.open_table(HISTORY_INDEX)?;
                index_table.insert(index_key.as_str(), message_id)?;
                true
            }
        };
        write_txn.commit()?;

        Ok(inserted)
    }

    /// Read all messages of a conversation in ascending submission order.
    ///
    /// Returns an empty vec for an unknown conversation id.
    pub fn read_raw(&self, conversation_id: &str) -> Result<Vec<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(HISTORY_INDEX)?;
        let data_table = read_txn.open_table(HISTORY_DATA)?;

        let prefix = format!("{conversation_id}:");
        let end = prefix_end_bound(&prefix);

        let mut messages = Vec::new();
        for entry in index_table.range(prefix.as_str()..end.as_str())? {
            let (_, message_id) = entry?;
            let data_key = Self::data_key(conversation_id, message_id.value());
            if let Some(data) = data_table.get(data_key.as_str())? {
                messages.push(data.value().to_vec());
            }
        }

        Ok(messages)
    }

    fn data_key(conversation_id: &str, message_id: &str) -> String {
        format!("{conversation_id}:{message_id}")
    }

    fn index_key(conversation_id: &str, submitted_at_ms: i64, message_id: &str) -> String {
        let submitted_at_ms = submitted_at_ms.max(0) as u64;
        format!("{conversation_id}:{submitted_at_ms:020}:{message_id}")
    }
}
