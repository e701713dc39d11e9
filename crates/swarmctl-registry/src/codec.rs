use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::RegistryError;

pub const RECORD_SUFFIX: &str = "json";

pub fn record_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.{RECORD_SUFFIX}"))
}

/// Serializes `record` to `<dir>/<id>.json`, creating `dir` if necessary.
/// Used by `swarmctl-registry`, and reused verbatim by `swarmctl-health` and
/// `swarmctl-migration` for their own per-id record directories (§4.C).
pub async fn write_record<T: Serialize + Sync>(dir: &Path, id: &str, record: &T) -> Result<(), RegistryError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RegistryError::Io { path: dir.display().to_string(), source: e })?;
    let path = record_path(dir, id);
    let body = serde_json::to_string_pretty(record)
        .map_err(|e| RegistryError::Parse { path: path.display().to_string(), source: e })?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|e| RegistryError::Io { path: path.display().to_string(), source: e })
}

pub async fn read_record<T: DeserializeOwned>(dir: &Path, id: &str) -> Result<Option<T>, RegistryError> {
    let path = record_path(dir, id);
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => {
            let record = serde_json::from_str(&body)
                .map_err(|e| RegistryError::Parse { path: path.display().to_string(), source: e })?;
            Ok(Some(record))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RegistryError::Io { path: path.display().to_string(), source: e }),
    }
}

/// Best-effort: a failure to delete is logged, never raised (§4.C "Removal").
pub async fn remove_record(dir: &Path, id: &str) -> bool {
    let path = record_path(dir, id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to remove record file");
            false
        }
    }
}

/// Loads every well-formed record under `dir`. A single unparseable file is
/// logged and skipped rather than aborting the whole load (§4.C "Startup").
/// A missing directory is treated as empty, not an error — the first-run case.
pub async fn load_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, RegistryError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RegistryError::Io { path: dir.display().to_string(), source: e }),
    };

    let mut out = Vec::new();
    loop {
        let entry = match entries
            .next_entry()
            .await
            .map_err(|e| RegistryError::Io { path: dir.display().to_string(), source: e })?
        {
            Some(e) => e,
            None => break,
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(RECORD_SUFFIX) {
            continue;
        }
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read record file, skipping");
                continue;
            }
        };
        match serde_json::from_str::<T>(&body) {
            Ok(record) => out.push(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt record, skipping");
                continue;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        id: String,
        value: u32,
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let sample = Sample { id: "a".into(), value: 7 };
        write_record(dir.path(), "a", &sample).await.unwrap();
        let loaded: Option<Sample> = read_record(dir.path(), "a").await.unwrap();
        assert_eq!(loaded, Some(sample));
    }

    #[tokio::test]
    async fn read_missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Sample> = read_record(dir.path(), "missing").await.unwrap();
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn load_all_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), "good", &Sample { id: "good".into(), value: 1 }).await.unwrap();
        tokio::fs::write(dir.path().join("bad.json"), "{ not json").await.unwrap();

        let all: Vec<Sample> = load_all(dir.path()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "good");
    }

    #[tokio::test]
    async fn load_all_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing_dir = dir.path().join("nonexistent");
        let all: Vec<Sample> = load_all(&missing_dir).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn remove_record_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        write_record(dir.path(), "a", &Sample { id: "a".into(), value: 1 }).await.unwrap();
        assert!(remove_record(dir.path(), "a").await);
        assert!(!remove_record(dir.path(), "a").await);
    }
}
