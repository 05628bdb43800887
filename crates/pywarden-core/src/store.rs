use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::ids::ConsumerId;

/// What was installed for one consumer's isolated directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEnvironmentRecord {
    pub consumer_id: ConsumerId,
    pub target_directory: PathBuf,
    pub interpreter_version: String,
    pub requirements_digest: Option<String>,
    pub updated_at: OffsetDateTime,
}

impl ToolEnvironmentRecord {
    pub fn new(
        consumer_id: ConsumerId,
        target_directory: PathBuf,
        interpreter_version: impl Into<String>,
        requirements_digest: Option<String>,
    ) -> Self {
        Self {
            consumer_id,
            target_directory,
            interpreter_version: interpreter_version.into(),
            requirements_digest,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// Whether a manifest install can be skipped for this record.
    pub fn is_current(&self, interpreter_version: &str, digest: Option<&str>) -> bool {
        self.interpreter_version == interpreter_version
            && digest.is_some()
            && self.requirements_digest.as_deref() == digest
    }
}

impl ToolEnvironmentRecord {
    /// Reads a single record file; a missing file is `None`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read environment record {}", path.display()))?;
        let record = serde_json::from_str(&contents)
            .with_context(|| format!("parse environment record {}", path.display()))?;
        Ok(Some(record))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create record dir {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("render environment record")?;
        fs::write(path, contents)
            .with_context(|| format!("write environment record {}", path.display()))?;
        Ok(())
    }
}

/// SHA-256 of a manifest file, hex encoded.
pub fn manifest_digest(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read manifest {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// JSON-file persistence for isolated-directory records, for embedding
/// applications that want it. The runtime manager never writes this store.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RecordStore {
    pub records: BTreeMap<String, ToolEnvironmentRecord>,
}

impl RecordStore {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read record store {}", path.display()))?;
        let store = serde_json::from_str(&contents).context("parse record store JSON")?;
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create record dir {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("render record store JSON")?;
        fs::write(path, contents)
            .with_context(|| format!("write record store {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, consumer: &ConsumerId) -> Option<&ToolEnvironmentRecord> {
        self.records.get(consumer.as_str())
    }

    pub fn upsert(&mut self, record: ToolEnvironmentRecord) {
        self.records.insert(record.consumer_id.as_str().to_string(), record);
    }

    pub fn remove(&mut self, consumer: &ConsumerId) -> Option<ToolEnvironmentRecord> {
        self.records.remove(consumer.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(consumer: &str, digest: Option<&str>) -> ToolEnvironmentRecord {
        ToolEnvironmentRecord::new(
            ConsumerId::new(consumer).unwrap(),
            PathBuf::from("/data/tool-packages").join(consumer),
            "3.12",
            digest.map(str::to_string),
        )
    }

    #[test]
    fn digest_tracks_manifest_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requirements.txt");
        fs::write(&path, "requests==2.32.3\n").unwrap();
        let first = manifest_digest(&path).unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(first, manifest_digest(&path).unwrap());

        fs::write(&path, "requests==2.32.4\n").unwrap();
        assert_ne!(first, manifest_digest(&path).unwrap());
    }

    #[test]
    fn current_only_when_version_and_digest_match() {
        let rec = record("tool-a", Some("abc"));
        assert!(rec.is_current("3.12", Some("abc")));
        assert!(!rec.is_current("3.13", Some("abc")));
        assert!(!rec.is_current("3.12", Some("def")));
        assert!(!rec.is_current("3.12", None));
    }

    #[test]
    fn store_overwrites_and_removes_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        let mut store = RecordStore::load(&path).unwrap();
        assert!(store.records.is_empty());
        store.upsert(record("tool-a", Some("one")));
        store.upsert(record("tool-a", Some("two")));
        store.upsert(record("tool-b", None));
        store.save(&path).unwrap();

        let mut loaded = RecordStore::load(&path).unwrap();
        assert_eq!(loaded.records.len(), 2);
        let a = ConsumerId::new("tool-a").unwrap();
        assert_eq!(
            loaded.get(&a).unwrap().requirements_digest.as_deref(),
            Some("two")
        );
        assert!(loaded.remove(&a).is_some());
        assert!(loaded.get(&a).is_none());
    }

    #[test]
    fn single_record_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool-a").join("meta.json");
        assert!(ToolEnvironmentRecord::load(&path).unwrap().is_none());

        let rec = record("tool-a", Some("abc"));
        rec.save(&path).unwrap();
        assert_eq!(ToolEnvironmentRecord::load(&path).unwrap(), Some(rec));

        fs::write(&path, "{not json").unwrap();
        assert!(ToolEnvironmentRecord::load(&path).is_err());
    }
}
