use std::path::Path;

use async_trait::async_trait;
use rocksdb::{Options, DB};
use thiserror::Error;
use uuid::Uuid;

use crate::model::chat_record::ChatRecord;

const RECORD_PREFIX: &str = "chat_record:";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("rocksdb: {0}")]
    Backend(#[from] rocksdb::Error),

    #[error("record encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Append-only destination for finished exchanges.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn append(&self, record: &ChatRecord) -> Result<(), StorageError>;
}

pub struct DBLayer {
    db: DB,
}

impl DBLayer {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    fn record_key(ts: i64, id: &str) -> String {
        // zero-padded so lexical order == insertion order
        format!("{RECORD_PREFIX}{:020}:{id}", ts.max(0))
    }
}

#[async_trait]
impl ChatSink for DBLayer {
    async fn append(&self, record: &ChatRecord) -> Result<(), StorageError> {
        let key = Self::record_key(record.created_ts, &Uuid::new_v4().to_string());
        let val = serde_json::to_vec(record)?;
        self.db.put(key, val)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocksdb::{Direction, IteratorMode};

    impl DBLayer {
        /// Most recent `limit` records, oldest first.
        fn list_records(&self, limit: usize) -> Result<Vec<ChatRecord>, StorageError> {
            let mut newest_first = Vec::with_capacity(limit);
            let mut upper = RECORD_PREFIX.as_bytes().to_vec();
            upper.push(0xff);

            for item in self
                .db
                .iterator(IteratorMode::From(upper.as_slice(), Direction::Reverse))
            {
                if newest_first.len() == limit {
                    break;
                }
                let (key, val) = item?;
                if !key.starts_with(RECORD_PREFIX.as_bytes()) {
                    break;
                }
                newest_first.push(serde_json::from_slice::<ChatRecord>(&val)?);
            }

            newest_first.reverse();
            Ok(newest_first)
        }
    }

    #[tokio::test]
    async fn appended_records_are_listed_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = DBLayer::new(dir.path()).unwrap();

        for i in 0..5 {
            let mut record = ChatRecord::new(format!("pytanie {i}"), format!("odpowiedź {i}"));
            record.created_ts = 1_700_000_000_000 + i;
            db.append(&record).await.unwrap();
        }

        let all = db.list_records(10).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].user_input, "pytanie 0");
        assert_eq!(all[4].bot_response, "odpowiedź 4");

        let last_two = db.list_records(2).unwrap();
        let inputs: Vec<_> = last_two.iter().map(|r| r.user_input.as_str()).collect();
        assert_eq!(inputs, ["pytanie 3", "pytanie 4"]);

        assert!(db.list_records(0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn identical_exchanges_are_kept_separately() {
        let dir = tempfile::tempdir().unwrap();
        let db = DBLayer::new(dir.path()).unwrap();

        let record = ChatRecord {
            user_input: "hej".into(),
            bot_response: "cześć".into(),
            created_ts: 42,
        };
        db.append(&record).await.unwrap();
        db.append(&record).await.unwrap();

        assert_eq!(db.list_records(10).unwrap(), vec![record.clone(), record]);
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = DBLayer::new(dir.path()).unwrap();
            db.append(&ChatRecord::new("a", "b")).await.unwrap();
        }
        let db = DBLayer::new(dir.path()).unwrap();
        assert_eq!(db.list_records(1).unwrap()[0].bot_response, "b");
    }
}
