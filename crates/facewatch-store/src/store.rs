//! Async SQLite store. Every record is a JSON document keyed by id, one
//! table per collection.

use crate::record::{Collection, Record};
use crate::schema;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store used before init()")]
    NotInitialized,
    #[error("record for {0} has an empty id")]
    MissingKey(Collection),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("record encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the database. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    conn: Arc<OnceLock<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("initialized", &self.conn.get().is_some())
            .finish()
    }
}

impl Store {
    /// Create an uninitialized store. Nothing touches the disk until [`Store::init`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Arc::new(OnceLock::new()),
        }
    }

    /// Create and initialize in one step.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::new(path);
        store.init().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the database file and apply pending migrations. Calling it again
    /// after success is a no-op.
    pub async fn init(&self) -> Result<(), StoreError> {
        if self.conn.get().is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&self.path).await?;
        let found = conn
            .call(|conn| Ok(schema::migrate(conn)?))
            .await?;

        if self.conn.set(conn).is_err() {
            tracing::debug!(path = %self.path.display(), "store initialized concurrently");
        }
        tracing::info!(
            path = %self.path.display(),
            from_version = found,
            version = schema::SCHEMA_VERSION,
            "store ready"
        );
        Ok(())
    }

    fn conn(&self) -> Result<&Connection, StoreError> {
        self.conn.get().ok_or(StoreError::NotInitialized)
    }

    /// Insert or overwrite a record by id.
    pub async fn put<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let conn = self.conn()?;
        if record.id().is_empty() {
            return Err(StoreError::MissingKey(R::COLLECTION));
        }
        let id = record.id().to_string();
        let body = serde_json::to_string(record)?;
        let table = R::COLLECTION.table();

        conn.call(move |conn| {
            conn.execute(
                &format!("INSERT OR REPLACE INTO {table} (id, body) VALUES (?1, ?2)"),
                rusqlite::params![id, body],
            )?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Insert each record independently. Failures are logged and skipped;
    /// returns how many records were written.
    pub async fn put_many<R: Record>(&self, records: &[R]) -> Result<usize, StoreError> {
        self.conn()?;
        let mut written = 0;
        for record in records {
            match self.put(record).await {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(
                    collection = %R::COLLECTION,
                    id = record.id(),
                    error = %e,
                    "bulk write skipped record"
                ),
            }
        }
        Ok(written)
    }

    /// Every record in the collection. Rows that no longer decode are logged
    /// and left out.
    pub async fn get_all<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let conn = self.conn()?;
        let table = R::COLLECTION.table();
        let rows: Vec<(String, String)> = conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("SELECT id, body FROM {table} ORDER BY rowid"))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (id, body) in rows {
            match serde_json::from_str(&body) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(collection = %R::COLLECTION, id = %id, error = %e, "undecodable row"),
            }
        }
        Ok(records)
    }

    pub async fn get_by_id<R: Record>(&self, id: &str) -> Result<Option<R>, StoreError> {
        let conn = self.conn()?;
        let table = R::COLLECTION.table();
        let id = id.to_string();
        let body: Option<String> = conn
            .call(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT body FROM {table} WHERE id = ?1"),
                    [id],
                    |row| row.get(0),
                );
                match result {
                    Ok(body) => Ok(Some(body)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Remove a record. Deleting an absent id succeeds.
    pub async fn delete<R: Record>(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let table = R::COLLECTION.table();
        let id = id.to_string();
        conn.call(move |conn| {
            conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [id])?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Remove every record in the collection.
    pub async fn clear<R: Record>(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let table = R::COLLECTION.table();
        let removed = conn
            .call(move |conn| Ok(conn.execute(&format!("DELETE FROM {table}"), [])?))
            .await?;
        tracing::info!(collection = %R::COLLECTION, removed, "collection cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use facewatch_core::{
        AccessLevel, Descriptor, DetectionRecord, EncodedImage, Expression, KnownFace,
        NotificationRecord, PersonDetails, Settings, SettingsRecord, DESCRIPTOR_LEN,
    };

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    fn detection(id: &str, ms: i64) -> DetectionRecord {
        DetectionRecord {
            id: id.to_string(),
            timestamp: ts(ms),
            confidence: 0.91,
            dominant_expression: Expression::Neutral,
            expression_confidence: 0.8,
            face_thumbnail: Some(EncodedImage(vec![0xff, 0xd8, 0x01, 0x02])),
            context_image: Some(EncodedImage(vec![0xff, 0xd8, 0x03])),
            person_name: "alice".into(),
            is_known: true,
            estimated_distance_meters: 1.75,
            person_details: Some(PersonDetails {
                name: "alice".into(),
                role: "staff".into(),
                access_level: AccessLevel::Admin,
            }),
            face_descriptor: Descriptor((0..DESCRIPTOR_LEN).map(|i| i as f32 * 0.001).collect()),
        }
    }

    async fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db").join("facewatch.db"))
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_detection_round_trip() {
        let (_dir, store) = open_temp().await;
        let rec = detection("face-1", 1_700_000_000_123);
        store.put(&rec).await.unwrap();

        let loaded: DetectionRecord = store.get_by_id("face-1").await.unwrap().unwrap();
        assert_eq!(loaded, rec);
    }

    #[tokio::test]
    async fn test_get_by_id_absent_is_none() {
        let (_dir, store) = open_temp().await;
        let loaded: Option<KnownFace> = store.get_by_id("person-404").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_by_id() {
        let (_dir, store) = open_temp().await;
        let mut rec = detection("face-1", 0);
        store.put(&rec).await.unwrap();
        rec.person_name = "bob".into();
        store.put(&rec).await.unwrap();

        let all: Vec<DetectionRecord> = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].person_name, "bob");
    }

    #[tokio::test]
    async fn test_put_rejects_empty_id() {
        let (_dir, store) = open_temp().await;
        let err = store.put(&detection("", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingKey(Collection::Detections)));
    }

    #[tokio::test]
    async fn test_put_many_skips_bad_records() {
        let (_dir, store) = open_temp().await;
        let mut records: Vec<_> = (0..5).map(|i| detection(&format!("face-{i}"), i)).collect();
        records[2].id.clear();

        let written = store.put_many(&records).await.unwrap();
        assert_eq!(written, 4);
        let all: Vec<DetectionRecord> = store.get_all().await.unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn test_uninitialized_store_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("facewatch.db"));

        assert!(matches!(
            store.put(&detection("face-1", 0)).await,
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            store.get_all::<NotificationRecord>().await,
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            store.put_many::<DetectionRecord>(&[]).await,
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            store.clear::<KnownFace>().await,
            Err(StoreError::NotInitialized)
        ));
        assert!(!dir.path().join("facewatch.db").exists());

        store.init().await.unwrap();
        store.put(&detection("face-1", 0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = open_temp().await;
        store.put(&detection("face-1", 0)).await.unwrap();
        store.delete::<DetectionRecord>("face-1").await.unwrap();
        store.delete::<DetectionRecord>("face-1").await.unwrap();
        assert!(store.get_all::<DetectionRecord>().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_only_touches_one_collection() {
        let (_dir, store) = open_temp().await;
        let rec = detection("face-1", 0);
        store.put(&rec).await.unwrap();
        store.put(&NotificationRecord::for_detection(&rec)).await.unwrap();

        store.clear::<NotificationRecord>().await.unwrap();
        assert!(store.get_all::<NotificationRecord>().await.unwrap().is_empty());
        assert_eq!(store.get_all::<DetectionRecord>().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facewatch.db");
        {
            let store = Store::open(&path).await.unwrap();
            store.put(&SettingsRecord::new(Settings::default())).await.unwrap();
            store.put(&detection("face-1", 0)).await.unwrap();
        }

        let store = Store::open(&path).await.unwrap();
        let settings: Vec<SettingsRecord> = store.get_all().await.unwrap();
        assert_eq!(settings, vec![SettingsRecord::new(Settings::default())]);
        assert_eq!(store.get_all::<DetectionRecord>().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_init_twice_is_noop() {
        let (_dir, store) = open_temp().await;
        store.put(&detection("face-1", 0)).await.unwrap();
        store.init().await.unwrap();
        assert_eq!(store.get_all::<DetectionRecord>().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_skipped() {
        let (_dir, store) = open_temp().await;
        store.put(&detection("face-1", 0)).await.unwrap();
        store
            .conn()
            .unwrap()
            .call(|conn| {
                conn.execute("INSERT INTO detections (id, body) VALUES ('junk', 'not json')", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let all: Vec<DetectionRecord> = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(store.get_by_id::<DetectionRecord>("junk").await.is_err());
    }
}
