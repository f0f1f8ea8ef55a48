// Dedup store: which source posts have been mirrored, and as what.
//
// A single JSON document maps source post id -> destination post id plus the
// time it was recorded. It is read on every lookup and rewritten after every
// successful forward. Stale entries are purged when saving, never when
// loading, so a lookup can still see an old entry until the next save.
//
// Writes go to a temp file that is renamed over the real one. Within one
// process, `record` calls are serialized; nothing guards against a second
// process sharing the same file.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{MirrorError, Result};

/// How long a record is kept after it was written.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRecord {
    pub destination_post_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Source post id -> record. Ordered so the file diffs cleanly.
pub type ForwardMap = BTreeMap<String, ForwardRecord>;

pub struct DedupStore {
    path: PathBuf,
    retention: Duration,
    write_lock: Mutex<()>,
}

impl DedupStore {
    pub fn new(path: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            path: path.into(),
            retention,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Read the whole mapping. A missing file is an empty mapping; any other
    /// read or parse failure is an error.
    pub async fn load(&self) -> Result<ForwardMap> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ForwardMap::new()),
            Err(e) => return Err(self.persistence_error(e)),
        };
        serde_json::from_slice(&content).map_err(|e| self.persistence_error(e))
    }

    /// Purge stale entries and write the mapping.
    pub async fn save(&self, map: ForwardMap) -> Result<()> {
        self.save_at(map, Utc::now()).await
    }

    /// `save` with an explicit notion of "now".
    pub async fn save_at(&self, mut map: ForwardMap, now: DateTime<Utc>) -> Result<()> {
        let before = map.len();
        map.retain(|_, record| now - record.recorded_at < self.retention);
        if map.len() < before {
            debug!(purged = before - map.len(), "Purged stale forward records");
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.persistence_error(e))?;
            }
        }

        let json = serde_json::to_vec_pretty(&map).map_err(|e| self.persistence_error(e))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.persistence_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.persistence_error(e))
    }

    /// Remember that `source_id` was mirrored as `destination_id`.
    pub async fn record(&self, source_id: &str, destination_id: &str) -> Result<()> {
        self.record_at(source_id, destination_id, Utc::now()).await
    }

    pub async fn record_at(
        &self,
        source_id: &str,
        destination_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        map.insert(
            source_id.to_string(),
            ForwardRecord {
                destination_post_id: destination_id.to_string(),
                recorded_at: now,
            },
        );
        self.save_at(map, now).await
    }

    /// Destination post id for a source post, if it was mirrored.
    pub async fn lookup(&self, source_id: &str) -> Result<Option<String>> {
        Ok(self
            .load()
            .await?
            .remove(source_id)
            .map(|record| record.destination_post_id))
    }

    fn persistence_error(&self, err: impl std::fmt::Display) -> MirrorError {
        MirrorError::Persistence {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}
