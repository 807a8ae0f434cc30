//! Stream event log - retained chunk events per stream channel.
//!
//! Events are append-only and keyed `{channel}:{seq:010}` so a prefix
//! range scan replays them in publish order. One producer per channel
//! assigns sequence numbers; the log is the replay source for late and
//! reconnecting subscribers.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

use crate::range_utils::prefix_end_bound;

const STREAM_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("stream:events");

/// Low-level stream event storage with byte-level API
#[derive(Debug, Clone)]
pub struct StreamLogStorage {
    db: Arc<Database>,
}

impl StreamLogStorage {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(STREAM_EVENTS)?;
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append an event to a channel's retained log, returning its
    /// sequence number. Sequence numbers start at 0 and are assigned
    /// inside the write transaction, so the single producer per channel
    /// always sees a gapless log.
    pub fn append_raw(&self, channel_id: &str, data: &[u8]) -> Result<u64> {
        let write_txn = self.db.begin_write()?;
        let seq = {
            let mut table = write_txn.open_table(STREAM_EVENTS)?;
            let seq = Self::last_seq(&table, channel_id)?.map_or(0, |last| last + 1);
            let key = Self::event_key(channel_id, seq);
            table.insert(key.as_str(), data)?;
            seq
        };
        write_txn.commit()?;

        Ok(seq)
    }

    /// Read all retained events of a channel in publish order, starting
    /// at `from_seq`.
    pub fn read_from(&self, channel_id: &str, from_seq: u64) -> Result<Vec<(u64, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STREAM_EVENTS)?;

        let start = Self::event_key(channel_id, from_seq);
        let end = prefix_end_bound(&format!("{channel_id}:"));

        let mut events = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (key, value) = entry?;
            let seq = Self::parse_seq(key.value());
            events.push((seq, value.value().to_vec()));
        }

        Ok(events)
    }

    /// Read a channel's full retained log in publish order.
    pub fn read_all(&self, channel_id: &str) -> Result<Vec<(u64, Vec<u8>)>> {
        self.read_from(channel_id, 0)
    }

    /// Number of retained events for a channel.
    pub fn len(&self, channel_id: &str) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STREAM_EVENTS)?;
        Ok(Self::last_seq(&table, channel_id)?.map_or(0, |last| last + 1))
    }

    /// Whether the channel has any retained events.
    pub fn exists(&self, channel_id: &str) -> Result<bool> {
        Ok(self.len(channel_id)? > 0)
    }

    fn last_seq(table: &impl ReadableTable<&'static str, &'static [u8]>, channel_id: &str) -> Result<Option<u64>> {
        let prefix = format!("{channel_id}:");
        let end = prefix_end_bound(&prefix);
        let last = table
            .range(prefix.as_str()..end.as_str())?
            .next_back()
            .transpose()?;
        Ok(last.map(|(key, _)| Self::parse_seq(key.value())))
    }

    fn event_key(channel_id: &str, seq: u64) -> String {
        format!("{channel_id}:{seq:010}")
    }

    fn parse_seq(key: &str) -> u64 {
        key.rsplit(':')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup() -> (StreamLogStorage, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(Database::create(db_path).unwrap());
        let storage = StreamLogStorage::new(db).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_append_assigns_sequence() {
        let (storage, _temp_dir) = setup();

        assert_eq!(storage.append_raw("m1", b"a").unwrap(), 0);
        assert_eq!(storage.append_raw("m1", b"b").unwrap(), 1);
        assert_eq!(storage.append_raw("m1", b"c").unwrap(), 2);
    }

    #[test]
    fn test_read_all_in_publish_order() {
        let (storage, _temp_dir) = setup();

        storage.append_raw("m1", b"a").unwrap();
        storage.append_raw("m1", b"b").unwrap();
        storage.append_raw("m1", b"c").unwrap();

        let events = storage.read_all("m1").unwrap();
        assert_eq!(
            events,
            vec![
                (0, b"a".to_vec()),
                (1, b"b".to_vec()),
                (2, b"c".to_vec()),
            ]
        );
    }

    #[test]
    fn test_read_from_offset() {
        let (storage, _temp_dir) = setup();

        for chunk in [b"a", b"b", b"c", b"d"] {
            storage.append_raw("m1", chunk).unwrap();
        }

        let events = storage.read_from("m1", 2).unwrap();
        assert_eq!(events, vec![(2, b"c".to_vec()), (3, b"d".to_vec())]);
    }

    #[test]
    fn test_channels_are_isolated() {
        let (storage, _temp_dir) = setup();

        storage.append_raw("m1", b"one").unwrap();
        storage.append_raw("m2", b"two").unwrap();

        assert_eq!(storage.len("m1").unwrap(), 1);
        assert_eq!(storage.len("m2").unwrap(), 1);
        assert!(!storage.exists("m3").unwrap());
        assert!(storage.read_all("m3").unwrap().is_empty());
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        {
            let db = Arc::new(Database::create(&db_path).unwrap());
            let storage = StreamLogStorage::new(db).unwrap();
            storage.append_raw("m1", b"a").unwrap();
            storage.append_raw("m1", b"b").unwrap();
        }

        let db = Arc::new(Database::create(&db_path).unwrap());
        let storage = StreamLogStorage::new(db).unwrap();
        assert_eq!(storage.append_raw("m1", b"c").unwrap(), 2);
        assert_eq!(storage.len("m1").unwrap(), 3);
    }
}
