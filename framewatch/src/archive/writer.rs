//! Frame archive and daily ingest log.

use std::sync::Arc;

use bytes::Bytes;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::store::BlobStore;
use crate::domain::{ArchiveKey, ArchiveLayout, FrameSubmission, LogEntry, daily_log_key};
use crate::{Error, Result};

/// Persists frames and appends to the per-day log.
///
/// The daily log is a single JSON array object that is read, extended and
/// rewritten; appends to the same day are serialized through a per-key async
/// lock so concurrent requests cannot drop each other's entries.
pub struct ArchiveWriter {
    store: Arc<dyn BlobStore>,
    layout: ArchiveLayout,
    log_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ArchiveWriter {
    pub fn new(store: Arc<dyn BlobStore>, layout: ArchiveLayout) -> Self {
        Self {
            store,
            layout,
            log_locks: DashMap::new(),
        }
    }

    /// Store the frame bytes under their archive key.
    pub async fn archive_frame(&self, submission: &FrameSubmission) -> Result<ArchiveKey> {
        let key = ArchiveKey::for_submission(self.layout, submission);
        self.store
            .put(key.as_str(), submission.bytes.clone())
            .await?;
        debug!(key = %key, bytes = submission.bytes.len(), "Archived frame");
        Ok(key)
    }

    /// Append `entry` to the log of the day it belongs to.
    pub async fn append_log(&self, entry: LogEntry) -> Result<()> {
        let key = daily_log_key(entry.ts.date_naive());
        let lock = self
            .log_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        {
            let _guard = lock.lock().await;
            let mut entries = self.load_log(&key).await?;
            entries.push(entry);
            let body = serde_json::to_vec(&entries)?;
            self.store.put(&key, Bytes::from(body)).await?;
        }

        // Locks of past days are only needed while someone still holds them.
        self.log_locks
            .retain(|k, lock| k == &key || Arc::strong_count(lock) > 1);
        Ok(())
    }

    /// Entries logged on `date`, oldest first.
    pub async fn read_log(&self, date: NaiveDate) -> Result<Vec<LogEntry>> {
        self.load_log(&daily_log_key(date)).await
    }

    /// Archived frame keys under `prefix`.
    pub async fn list_frames(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = self.store.list(prefix).await?;
        Ok(keys.into_iter().filter(|k| !is_log_key(k)).collect())
    }

    /// Bytes of the archived frame at `key`.
    pub async fn read_frame(&self, key: &str) -> Result<Bytes> {
        if is_log_key(key) {
            return Err(Error::FrameNotFound(key.to_string()));
        }
        self.store
            .get(key)
            .await?
            .ok_or_else(|| Error::FrameNotFound(key.to_string()))
    }

    async fn load_log(&self, key: &str) -> Result<Vec<LogEntry>> {
        match self.store.get(key).await? {
            Some(data) => serde_json::from_slice(&data).map_err(|e| {
                warn!(key, error = %e, "Daily log is unreadable; refusing to overwrite it");
                Error::storage(format!("daily log {key} is corrupt: {e}"))
            }),
            None => Ok(Vec::new()),
        }
    }
}

fn is_log_key(key: &str) -> bool {
    key.starts_with("logs/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryBlobStore;
    use chrono::{DateTime, TimeZone, Utc};
    use frame_analysis::FrameStatus;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn submission(width: Option<u32>, height: Option<u32>) -> FrameSubmission {
        FrameSubmission {
            feed_id: "f1".into(),
            stream_id: "s1".into(),
            timestamp: ts(1_700_000_000_000),
            width,
            height,
            bytes: Bytes::from_static(b"frame"),
        }
    }

    fn entry(ms: i64, status: FrameStatus) -> LogEntry {
        LogEntry {
            ts: ts(ms),
            feed_id: "f1".into(),
            stream_id: "s1".into(),
            status,
            extra: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_archive_frame_tiered() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = ArchiveWriter::new(store.clone(), ArchiveLayout::Tiered);

        let key = writer.archive_frame(&submission(Some(854), Some(480))).await.unwrap();
        assert_eq!(key.as_str(), "f1/s1/high/2023-11-14T22:13:20.000Z.jpg");
        assert_eq!(
            store.get(key.as_str()).await.unwrap(),
            Some(Bytes::from_static(b"frame"))
        );
    }

    #[tokio::test]
    async fn test_resubmission_overwrites() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = ArchiveWriter::new(store.clone(), ArchiveLayout::Flat);

        let first = writer.archive_frame(&submission(None, None)).await.unwrap();
        let second = writer.archive_frame(&submission(None, None)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "f1/s1/2023-11-14T22:13:20.000Z.jpg");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_append_log_groups_by_day() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = ArchiveWriter::new(store, ArchiveLayout::Tiered);

        writer.append_log(entry(1_700_000_000_000, FrameStatus::Ok)).await.unwrap();
        writer.append_log(entry(1_700_000_001_000, FrameStatus::Black)).await.unwrap();
        // 2023-11-15
        writer.append_log(entry(1_700_100_000_000, FrameStatus::Corrupt)).await.unwrap();

        let day = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();
        let entries = writer.read_log(day).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].status, FrameStatus::Black);

        let next = NaiveDate::from_ymd_opt(2023, 11, 15).unwrap();
        assert_eq!(writer.read_log(next).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = Arc::new(ArchiveWriter::new(store, ArchiveLayout::Tiered));

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let writer = writer.clone();
                tokio::spawn(async move {
                    writer
                        .append_log(entry(1_700_000_000_000 + i, FrameStatus::Ok))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let day = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();
        assert_eq!(writer.read_log(day).await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_corrupt_log_is_not_overwritten() {
        let store = Arc::new(MemoryBlobStore::new());
        store
            .put("logs/2023-11-14.json", Bytes::from_static(b"{not json"))
            .await
            .unwrap();
        let writer = ArchiveWriter::new(store.clone(), ArchiveLayout::Tiered);

        assert!(writer.append_log(entry(1_700_000_000_000, FrameStatus::Ok)).await.is_err());
        assert_eq!(
            store.get("logs/2023-11-14.json").await.unwrap(),
            Some(Bytes::from_static(b"{not json"))
        );
    }

    #[tokio::test]
    async fn test_read_frame() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = ArchiveWriter::new(store, ArchiveLayout::Flat);
        let key = writer.archive_frame(&submission(None, None)).await.unwrap();
        writer.append_log(entry(1_700_000_000_000, FrameStatus::Ok)).await.unwrap();

        assert_eq!(
            writer.read_frame(key.as_str()).await.unwrap(),
            Bytes::from_static(b"frame")
        );
        assert!(matches!(
            writer.read_frame("f1/s1/missing.jpg").await,
            Err(Error::FrameNotFound(_))
        ));
        assert!(matches!(
            writer.read_frame("logs/2023-11-14.json").await,
            Err(Error::FrameNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_frames_skips_logs() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = ArchiveWriter::new(store, ArchiveLayout::Flat);
        writer.archive_frame(&submission(None, None)).await.unwrap();
        writer.append_log(entry(1_700_000_000_000, FrameStatus::Ok)).await.unwrap();

        assert_eq!(
            writer.list_frames("").await.unwrap(),
            vec!["f1/s1/2023-11-14T22:13:20.000Z.jpg".to_string()]
        );
    }
}
