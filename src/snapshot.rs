//! Replace-by-prefix snapshot persistence.
//!
//! Each logical collection key owns exactly one file on disk: writing a new
//! snapshot first deletes every prior file matching `{key}-{tags}-*`, then
//! writes `{key}-{tags}-{timestamp}.json`. Last writer wins; there are no
//! transactional guarantees beyond that.

use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::model::CaseRecord;

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot directory '{dir}' unavailable: {source}")]
    Directory {
        dir: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Timestamp component of snapshot file names, `YYYYMMDD-HHMMSS` in UTC.
pub fn snapshot_timestamp() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Writes collection snapshots under one directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persists one harvested collection, replacing any prior snapshot for
    /// the same (key, tags) pair.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] on directory, serialization or write
    /// failure. Prior files already deleted stay deleted; the caller's
    /// retry simply writes the next snapshot.
    pub fn write(
        &self,
        collection_key: &str,
        filter_tags: &str,
        timestamp: &str,
        records: &[CaseRecord],
    ) -> Result<PathBuf, SnapshotError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::Directory {
            dir: self.dir.display().to_string(),
            source,
        })?;

        let prefix = format!("{collection_key}-{filter_tags}-");
        self.delete_matching(&prefix)?;

        let file_path = self.dir.join(format!("{prefix}{timestamp}.json"));
        let body = serde_json::to_vec_pretty(records)?;
        std::fs::write(&file_path, body)?;

        info!(
            path = %file_path.display(),
            records = records.len(),
            "snapshot written"
        );
        Ok(file_path)
    }

    fn delete_matching(&self, prefix: &str) -> Result<(), SnapshotError> {
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if file_name_matches(&entry.path(), prefix) {
                debug!(path = %entry.path().display(), "deleting stale snapshot");
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

fn file_name_matches(path: &Path, prefix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(count: usize) -> Vec<CaseRecord> {
        (0..count)
            .map(|i| {
                serde_json::from_value(json!({
                    "id": i,
                    "numeroProcesso": format!("{i:07}-23.2024.5.03.0001"),
                    "nomeParteAutora": "Parte"
                }))
                .unwrap()
            })
            .collect()
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn write_replaces_every_prior_file_for_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());

        writer.write("pend", "I", "20260101-010101", &records(2)).unwrap();
        writer.write("pend", "I", "20260102-020202", &records(3)).unwrap();
        writer.write("pend", "I", "20260103-030303", &records(1)).unwrap();

        assert_eq!(names(dir.path()), vec!["pend-I-20260103-030303.json"]);
    }

    #[test]
    fn write_leaves_other_keys_alone() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());

        writer.write("pend", "I", "20260101-010101", &records(1)).unwrap();
        writer.write("acervo", "geral", "20260101-010101", &records(1)).unwrap();
        writer.write("pend", "I", "20260102-020202", &records(1)).unwrap();

        assert_eq!(
            names(dir.path()),
            vec![
                "acervo-geral-20260101-010101.json",
                "pend-I-20260102-020202.json"
            ]
        );
    }

    #[test]
    fn snapshot_round_trips_records_with_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path());

        let original = records(2);
        let path = writer
            .write("arq", "todos", "20260101-010101", &original)
            .unwrap();

        let body = std::fs::read(path).unwrap();
        let restored: Vec<CaseRecord> = serde_json::from_slice(&body).unwrap();
        assert_eq!(restored, original);
        assert_eq!(
            restored[0].extra.get("nomeParteAutora").and_then(|v| v.as_str()),
            Some("Parte")
        );
    }

    #[test]
    fn timestamp_has_the_snapshot_shape() {
        let stamp = snapshot_timestamp();
        assert_eq!(stamp.len(), 15);
        assert_eq!(stamp.as_bytes()[8], b'-');
        assert!(stamp[..8].bytes().all(|b| b.is_ascii_digit()));
    }
}
