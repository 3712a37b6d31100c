//! Durable reading store backed by a JSON-lines append log.
//!
//! Each stored reading is one line. On open the whole file is replayed into a
//! [`ReadingLog`], so queries never touch the disk and the next id continues
//! from the highest id on file.
//!
//! A reading becomes visible to readers only after its line has been written
//! and synced. If the write fails the insert returns [`StoreError::Io`], the
//! file is cut back to its previous length and the id is retired, so a later
//! insert never reuses it.
//!
//! A crash mid-write can leave an unterminated last line. That line was never
//! acknowledged; `open` drops it and truncates the file.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use super::{ReadingLog, ReadingStore};
use crate::error::{StoreError, StoreResult};
use crate::types::{NewReading, SensorReading};

#[derive(Debug)]
pub struct FileReadingStore {
    path: PathBuf,
    log: RwLock<ReadingLog>,
    // also serializes writers
    file: Mutex<File>,
}

impl FileReadingStore {
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let (log, committed) = replay(&data)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if committed < data.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = data.len() - committed,
                "reading log ends in a partial line; truncating"
            );
            file.set_len(committed as u64).await?;
            file.sync_data().await?;
        }
        tracing::info!(path = %path.display(), readings = log.len(), "reading log opened");
        Ok(Self {
            path,
            log: RwLock::new(log),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rebuild the index from the log bytes. Returns the index and the length of
/// the newline-terminated prefix it was built from.
fn replay(data: &[u8]) -> StoreResult<(ReadingLog, usize)> {
    let committed = data
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |pos| pos + 1);
    let mut log = ReadingLog::default();
    for (idx, line) in data[..committed].split(|b| *b == b'\n').enumerate() {
        if line.trim_ascii().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let reading: SensorReading = serde_json::from_slice(line)
            .map_err(|source| StoreError::Corrupt { line: line_no, source })?;
        if reading.id < log.next_id() {
            return Err(StoreError::IdOutOfOrder {
                line: line_no,
                id: reading.id,
            });
        }
        log.push(reading);
    }
    Ok((log, committed))
}

async fn append_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

#[async_trait]
impl ReadingStore for FileReadingStore {
    async fn insert(&self, reading: NewReading) -> StoreResult<SensorReading> {
        let mut file = self.file.lock().await;
        let stored = self.log.read().await.stamp(reading);
        let mut line = serde_json::to_vec(&stored).map_err(StoreError::Serialize)?;
        line.push(b'\n');

        let committed_len = file.metadata().await?.len();
        if let Err(e) = append_line(&mut file, &line).await {
            // the id may already be on disk in part; never hand it out again
            self.log.write().await.burn(stored.id);
            if let Err(trunc) = file.set_len(committed_len).await {
                tracing::error!(
                    path = %self.path.display(),
                    error = %trunc,
                    "failed to cut back reading log after write error"
                );
            }
            return Err(e.into());
        }
        self.log.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn latest_global(&self, limit: usize) -> StoreResult<Vec<SensorReading>> {
        Ok(self.log.read().await.latest_global(limit))
    }

    async fn latest_for_bin(&self, bin_id: &str, limit: usize) -> StoreResult<Vec<SensorReading>> {
        Ok(self.log.read().await.latest_for_bin(bin_id, limit))
    }

    async fn most_recent_for_bin(&self, bin_id: &str) -> StoreResult<Option<SensorReading>> {
        Ok(self.log.read().await.most_recent_for_bin(bin_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn reading(bin: &str, distance_mm: i32) -> NewReading {
        NewReading {
            bin_id: bin.into(),
            distance_mm,
            weight_g: 12.5,
            water_adc: 300,
            need_collection: true,
            lat: Some(37.5),
            lng: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reopen_replays_readings_and_continues_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");

        let last_id = {
            let store = FileReadingStore::open(&path).await.unwrap();
            store.insert(reading("Bin-A", 1)).await.unwrap();
            store.insert(reading("Bin-B", 2)).await.unwrap();
            store.insert(reading("Bin-A", 3)).await.unwrap().id
        };

        let store = FileReadingStore::open(&path).await.unwrap();
        let bin_a = store.latest_for_bin("Bin-A", 10).await.unwrap();
        assert_eq!(
            bin_a.iter().map(|r| r.distance_mm).collect::<Vec<_>>(),
            vec![3, 1]
        );
        assert_eq!(bin_a[0].lat, Some(37.5));
        assert_eq!(bin_a[0].lng, None);

        let next = store.insert(reading("Bin-A", 4)).await.unwrap();
        assert_eq!(next.id, last_id + 1);
        let newest = store.most_recent_for_bin("Bin-A").await.unwrap().unwrap();
        assert_eq!(newest.id, next.id);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReadingStore::open(dir.path().join("new.jsonl"))
            .await
            .unwrap();
        assert!(store.latest_global(10).await.unwrap().is_empty());
        assert!(store.path().ends_with("new.jsonl"));
    }

    #[tokio::test]
    async fn corrupt_line_is_reported_with_its_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        {
            let store = FileReadingStore::open(&path).await.unwrap();
            store.insert(reading("Bin-A", 1)).await.unwrap();
        }
        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{not json\n");
        tokio::fs::write(&path, contents).await.unwrap();

        let err = FileReadingStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { line: 2, .. }));
    }

    #[tokio::test]
    async fn unwritable_path_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be opened as the log file
        let err = FileReadingStore::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[tokio::test]
    async fn partial_last_line_is_dropped_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let first_id = {
            let store = FileReadingStore::open(&path).await.unwrap();
            store.insert(reading("Bin-A", 1)).await.unwrap().id
        };
        let intact_len = tokio::fs::metadata(&path).await.unwrap().len();
        let mut contents = tokio::fs::read(&path).await.unwrap();
        contents.extend_from_slice(br#"{"id":2,"binId":"Bin-A","dist"#);
        tokio::fs::write(&path, contents).await.unwrap();

        let store = FileReadingStore::open(&path).await.unwrap();
        assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), intact_len);
        let next = store.insert(reading("Bin-A", 2)).await.unwrap();
        assert_eq!(next.id, first_id + 1);
        drop(store);

        let store = FileReadingStore::open(&path).await.unwrap();
        let bin_a = store.latest_for_bin("Bin-A", 10).await.unwrap();
        assert_eq!(
            bin_a.iter().map(|r| r.distance_mm).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[tokio::test]
    async fn repeated_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        {
            let store = FileReadingStore::open(&path).await.unwrap();
            store.insert(reading("Bin-A", 1)).await.unwrap();
        }
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::write(&path, format!("{contents}{contents}"))
            .await
            .unwrap();

        let err = FileReadingStore::open(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::IdOutOfOrder { line: 2, id: 1 }));
    }

    #[tokio::test]
    async fn failed_write_retires_the_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        tokio::fs::write(&path, b"").await.unwrap();
        // a read-only handle makes every append fail
        let file = OpenOptions::new().read(true).open(&path).await.unwrap();
        let store = FileReadingStore {
            path: path.clone(),
            log: RwLock::new(ReadingLog::default()),
            file: Mutex::new(file),
        };

        let err = store.insert(reading("Bin-A", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.latest_global(10).await.unwrap().is_empty());
        assert_eq!(store.log.read().await.next_id(), 2);
        assert!(tokio::fs::read(&path).await.unwrap().is_empty());
    }
}
