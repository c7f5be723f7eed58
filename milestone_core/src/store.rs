use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::StoreError,
    record::{now_millis, ProofRecord},
};

/// The two proof collections served by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    /// `data/proofs.json`, stored as `{ "proofs": [...] }`, submitter field `submitter`.
    Proofs,
    /// `data/milestone-proofs.json`, stored as a bare array, submitter field `account`.
    MilestoneProofs,
}

impl Collection {
    pub fn file_name(&self) -> &'static str {
        match self {
            Collection::Proofs => "proofs.json",
            Collection::MilestoneProofs => "milestone-proofs.json",
        }
    }

    fn submitter_field(&self) -> &'static str {
        match self {
            Collection::Proofs => "submitter",
            Collection::MilestoneProofs => "account",
        }
    }

    /// JSON form of a record as this collection presents it.
    pub fn encode(&self, record: &ProofRecord) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(record)?;
        if let (Collection::MilestoneProofs, Some(map)) = (self, value.as_object_mut()) {
            if let Some(submitter) = map.remove("submitter") {
                map.insert(self.submitter_field().to_string(), submitter);
            }
        }
        Ok(value)
    }

    pub fn encode_all(&self, records: &[ProofRecord]) -> Result<Vec<Value>, serde_json::Error> {
        records.iter().map(|r| self.encode(r)).collect()
    }
}

#[derive(Serialize, Deserialize)]
struct Wrapped {
    #[serde(default)]
    proofs: Vec<Value>,
}

/// Whole-file JSON persistence for one collection.
#[derive(Debug, Clone)]
pub struct FlatFileStore {
    path: PathBuf,
    collection: Collection,
}

impl FlatFileStore {
    pub fn new(path: impl Into<PathBuf>, collection: Collection) -> Self {
        Self {
            path: path.into(),
            collection,
        }
    }

    pub fn in_dir(dir: impl AsRef<Path>, collection: Collection) -> Self {
        Self::new(dir.as_ref().join(collection.file_name()), collection)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Reads every record. A missing file is created empty; an unparseable one
    /// is logged and treated as empty.
    pub fn read_all(&self) -> Result<Vec<ProofRecord>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("initializing empty proof file at {}", self.path.display());
                self.write_all(&[])?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        match decode(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                log::error!(
                    "unreadable proof file {}, treating as empty: {}",
                    self.path.display(),
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    /// Overwrites the file with the full collection.
    pub fn write_all(&self, records: &[ProofRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let entries = self.collection.encode_all(records)?;
        let body = match self.collection {
            Collection::Proofs => serde_json::to_string_pretty(&Wrapped { proofs: entries })?,
            Collection::MilestoneProofs => serde_json::to_string_pretty(&entries)?,
        };
        fs::write(&self.path, body)?;
        Ok(())
    }
}

// Either layout is accepted on read. Entries that do not describe a proof are
// skipped so one bad entry cannot empty the collection.
fn decode(raw: &str) -> Result<Vec<ProofRecord>, serde_json::Error> {
    let entries = match serde_json::from_str::<Value>(raw)? {
        Value::Array(entries) => entries,
        other => serde_json::from_value::<Wrapped>(other)?.proofs,
    };
    let now = now_millis();
    let records = entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match serde_json::from_value::<ProofRecord>(entry) {
            Ok(mut record) => {
                record.fill_missing(now);
                Some(record)
            }
            Err(e) => {
                log::warn!("skipping proof entry {i}: {e}");
                None
            }
        })
        .collect();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ProofKey, ProofStatus, ProofSubmission};

    fn record(campaign: &str, index: u32) -> ProofRecord {
        ProofRecord::new(
            ProofSubmission {
                key: ProofKey::new(campaign, index),
                proof_content: format!("proof for {campaign}/{index}"),
                submitter: Some("0xabc".into()),
                status: None,
                transaction_hash: Some(format!("0x{index:02x}")),
            },
            1_700_000_000_000,
        )
    }

    #[test]
    fn missing_file_is_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileStore::in_dir(dir.path().join("data"), Collection::Proofs);

        assert!(store.read_all().unwrap().is_empty());
        let raw = fs::read_to_string(store.path()).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({ "proofs": [] }));
    }

    #[test]
    fn write_then_read_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        for collection in [Collection::Proofs, Collection::MilestoneProofs] {
            let store = FlatFileStore::in_dir(dir.path(), collection);
            let mut records = vec![record("c1", 0), record("c1", 1), record("c2", 0)];
            records[1].status = ProofStatus::Rejected;
            records[2].submitter = None;

            store.write_all(&records).unwrap();
            assert_eq!(store.read_all().unwrap(), records);
        }
    }

    #[test]
    fn milestone_collection_uses_bare_array_and_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileStore::in_dir(dir.path(), Collection::MilestoneProofs);
        store.write_all(&[record("c1", 3)]).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        let entries = value.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["account"], "0xabc");
        assert!(entries[0].get("submitter").is_none());
        assert_eq!(entries[0]["milestoneIndex"], 3);
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileStore::in_dir(dir.path(), Collection::Proofs);
        fs::write(store.path(), "{ not json").unwrap();

        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn wrapped_file_is_readable_as_milestone_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.json");
        FlatFileStore::new(&path, Collection::Proofs)
            .write_all(&[record("c9", 0)])
            .unwrap();

        let records = FlatFileStore::new(&path, Collection::MilestoneProofs)
            .read_all()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].campaign_id, "c9");
    }

    #[test]
    fn account_and_timestamp_layout_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileStore::in_dir(dir.path(), Collection::MilestoneProofs);
        fs::write(
            store.path(),
            r#"[{"campaignId":"old","milestoneIndex":0,"proofContent":"legacy",
                "status":"pending","account":"0x1","timestamp":1700000000000}]"#,
        )
        .unwrap();

        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].campaign_id, "old");
        assert_eq!(records[0].submitter.as_deref(), Some("0x1"));
        assert_eq!(records[0].created_at, 1_700_000_000_000);
        assert_eq!(records[0].updated_at, 1_700_000_000_000);
        assert!(records[0].id.starts_with("proof-"));
    }

    #[test]
    fn bad_entry_is_skipped_not_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileStore::in_dir(dir.path(), Collection::Proofs);
        fs::write(
            store.path(),
            r#"{"proofs":[
                {"campaignId":"c1","milestoneIndex":0,"proofContent":"ok","createdAt":5},
                {"campaignId":"c1","proofContent":"no index"}
            ]}"#,
        )
        .unwrap();

        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].proof_content, "ok");
        assert_eq!(records[0].timestamp, 5);
    }
}
