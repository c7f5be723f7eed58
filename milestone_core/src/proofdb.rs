use std::thread::{self, JoinHandle};

use async_channel::Sender;
use crossbeam::channel::{Receiver as CBReceiver, Sender as CBSender};

use crate::{
    error::StoreError,
    record::{now_millis, ProofFilter, ProofPatch, ProofRecord, ProofSelector, ProofSubmission},
    store::{Collection, FlatFileStore},
};

type Reply<T> = Sender<Result<T, StoreError>>;

pub enum ProofDbMessage {
    Upsert {
        submission: ProofSubmission,
        reply: Reply<UpsertOutcome>,
    },
    List {
        filter: ProofFilter,
        reply: Reply<Vec<ProofRecord>>,
    },
    /// Patches the first matching record.
    UpdateFirst {
        selector: ProofSelector,
        patch: ProofPatch,
        reply: Reply<Option<ProofRecord>>,
    },
    /// Patches every matching record.
    UpdateAll {
        selector: ProofSelector,
        patch: ProofPatch,
        reply: Reply<Vec<ProofRecord>>,
    },
    Delete {
        selector: ProofSelector,
        reply: Reply<usize>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub proof: ProofRecord,
    pub created: bool,
}

/// Owns one proof file. Every request is a full read, and for mutations a full
/// write, executed one at a time on the database thread.
#[derive(Debug)]
pub struct ProofDb {
    store: FlatFileStore,
}

impl ProofDb {
    pub fn new(store: FlatFileStore) -> Self {
        Self { store }
    }

    /// Starts the database thread. It stops once every handle is dropped or a
    /// shutdown message arrives.
    pub fn spawn(store: FlatFileStore) -> std::io::Result<(ProofDbHandle, JoinHandle<()>)> {
        let (sender, receiver) = crossbeam::channel::unbounded::<ProofDbMessage>();
        let collection = store.collection();
        let db = ProofDb::new(store);
        let handle = thread::Builder::new()
            .name(format!("proofdb-{}", collection.file_name()))
            .spawn(move || db.run(receiver))?;
        Ok((ProofDbHandle { sender, collection }, handle))
    }

    fn run(self, receiver: CBReceiver<ProofDbMessage>) {
        log::info!("ProofDB starting for {}", self.store.path().display());

        while let Ok(message) = receiver.recv() {
            match message {
                ProofDbMessage::Upsert { submission, reply } => {
                    let _ = reply.send_blocking(self.upsert(submission));
                }
                ProofDbMessage::List { filter, reply } => {
                    let _ = reply.send_blocking(self.list(&filter));
                }
                ProofDbMessage::UpdateFirst {
                    selector,
                    patch,
                    reply,
                } => {
                    let _ = reply.send_blocking(self.update_first(&selector, patch));
                }
                ProofDbMessage::UpdateAll {
                    selector,
                    patch,
                    reply,
                } => {
                    let _ = reply.send_blocking(self.update_all(&selector, patch));
                }
                ProofDbMessage::Delete { selector, reply } => {
                    let _ = reply.send_blocking(self.delete(&selector));
                }
                ProofDbMessage::Shutdown => break,
            }
        }

        log::info!("ProofDB stopped for {}", self.store.path().display());
    }

    pub fn upsert(&self, submission: ProofSubmission) -> Result<UpsertOutcome, StoreError> {
        let mut records = self.store.read_all()?;
        let now = now_millis();

        let outcome = match records.iter_mut().find(|r| submission.key.matches(r)) {
            Some(existing) => {
                log::info!("updating proof {} for {}", existing.id, submission.key);
                existing.apply(submission.as_patch(), now);
                UpsertOutcome {
                    proof: existing.clone(),
                    created: false,
                }
            }
            None => {
                let record = ProofRecord::new(submission, now);
                log::info!("adding proof {} for {}", record.id, record.key());
                records.push(record.clone());
                UpsertOutcome {
                    proof: record,
                    created: true,
                }
            }
        };

        self.store.write_all(&records)?;
        Ok(outcome)
    }

    pub fn list(&self, filter: &ProofFilter) -> Result<Vec<ProofRecord>, StoreError> {
        Ok(filter.apply(self.store.read_all()?))
    }

    pub fn update_first(
        &self,
        selector: &ProofSelector,
        patch: ProofPatch,
    ) -> Result<Option<ProofRecord>, StoreError> {
        let mut records = self.store.read_all()?;
        let Some(record) = records.iter_mut().find(|r| selector.matches(r)) else {
            log::warn!("no proof found for {selector}");
            return Ok(None);
        };
        record.apply(patch, now_millis());
        let updated = record.clone();

        self.store.write_all(&records)?;
        Ok(Some(updated))
    }

    pub fn update_all(
        &self,
        selector: &ProofSelector,
        patch: ProofPatch,
    ) -> Result<Vec<ProofRecord>, StoreError> {
        let mut records = self.store.read_all()?;
        let now = now_millis();
        let mut updated = Vec::new();
        for record in records.iter_mut().filter(|r| selector.matches(r)) {
            record.apply(patch.clone(), now);
            updated.push(record.clone());
        }

        if updated.is_empty() {
            log::warn!("no proof found for {selector}");
            return Ok(updated);
        }
        self.store.write_all(&records)?;
        Ok(updated)
    }

    /// Returns how many records were removed.
    pub fn delete(&self, selector: &ProofSelector) -> Result<usize, StoreError> {
        let mut records = self.store.read_all()?;
        let before = records.len();
        records.retain(|r| !selector.matches(r));
        let removed = before - records.len();

        if removed > 0 {
            self.store.write_all(&records)?;
            log::info!("deleted {removed} proof(s) for {selector}");
        }
        Ok(removed)
    }
}

/// Cloneable async front for a running [`ProofDb`].
#[derive(Clone, Debug)]
pub struct ProofDbHandle {
    sender: CBSender<ProofDbMessage>,
    collection: Collection,
}

impl ProofDbHandle {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ProofDbMessage,
    ) -> Result<T, StoreError> {
        let (reply, response) = async_channel::bounded(1);
        self.sender
            .send(build(reply))
            .map_err(|_| StoreError::Closed)?;
        response.recv().await.map_err(|_| StoreError::Closed)?
    }

    pub async fn upsert(&self, submission: ProofSubmission) -> Result<UpsertOutcome, StoreError> {
        self.request(|reply| ProofDbMessage::Upsert { submission, reply })
            .await
    }

    pub async fn list(&self, filter: ProofFilter) -> Result<Vec<ProofRecord>, StoreError> {
        self.request(|reply| ProofDbMessage::List { filter, reply })
            .await
    }

    pub async fn update_first(
        &self,
        selector: ProofSelector,
        patch: ProofPatch,
    ) -> Result<Option<ProofRecord>, StoreError> {
        self.request(|reply| ProofDbMessage::UpdateFirst {
            selector,
            patch,
            reply,
        })
        .await
    }

    pub async fn update_all(
        &self,
        selector: ProofSelector,
        patch: ProofPatch,
    ) -> Result<Vec<ProofRecord>, StoreError> {
        self.request(|reply| ProofDbMessage::UpdateAll {
            selector,
            patch,
            reply,
        })
        .await
    }

    pub async fn delete(&self, selector: ProofSelector) -> Result<usize, StoreError> {
        self.request(|reply| ProofDbMessage::Delete { selector, reply })
            .await
    }

    pub fn shutdown(&self) {
        if self.sender.send(ProofDbMessage::Shutdown).is_err() {
            log::debug!("ProofDB already stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ProofKey, ProofStatus};

    fn submission(campaign: &str, index: u32, content: &str) -> ProofSubmission {
        ProofSubmission {
            key: ProofKey::new(campaign, index),
            proof_content: content.into(),
            submitter: Some("0xabc".into()),
            status: None,
            transaction_hash: None,
        }
    }

    fn db() -> (tempfile::TempDir, ProofDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = ProofDb::new(FlatFileStore::in_dir(dir.path(), Collection::Proofs));
        (dir, db)
    }

    #[test]
    fn repeated_upsert_keeps_one_record() {
        let (_dir, db) = db();
        let first = db.upsert(submission("c1", 0, "first")).unwrap();
        assert!(first.created);

        let mut again = submission("c1", 0, "second");
        again.submitter = None;
        let second = db.upsert(again).unwrap();
        assert!(!second.created);
        assert_eq!(second.proof.id, first.proof.id);
        assert_eq!(second.proof.proof_content, "second");
        assert_eq!(second.proof.submitter.as_deref(), Some("0xabc"));

        let all = db.list(&ProofFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn update_first_without_match_leaves_file_alone() {
        let (_dir, db) = db();
        db.upsert(submission("c1", 0, "done")).unwrap();
        let before = db.list(&ProofFilter::default()).unwrap();

        let selector = ProofSelector::Transaction("0xmissing".into());
        let result = db
            .update_first(&selector, ProofPatch::status(ProofStatus::Confirmed))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(db.list(&ProofFilter::default()).unwrap(), before);
    }

    #[test]
    fn update_all_touches_every_match() {
        let (_dir, db) = db();
        for index in 0..2 {
            let mut s = submission("c1", index, "done");
            s.transaction_hash = Some("0xbatch".into());
            db.upsert(s).unwrap();
        }

        let updated = db
            .update_all(
                &ProofSelector::Transaction("0xbatch".into()),
                ProofPatch::status(ProofStatus::Rejected),
            )
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|r| r.status == ProofStatus::Rejected));
    }

    #[test]
    fn delete_reports_removed_count() {
        let (_dir, db) = db();
        db.upsert(submission("c1", 0, "done")).unwrap();
        db.upsert(submission("c1", 1, "done")).unwrap();

        let key = ProofSelector::Key(ProofKey::new("c1", 0));
        assert_eq!(db.delete(&key).unwrap(), 1);
        assert_eq!(db.delete(&key).unwrap(), 0);
        assert_eq!(db.list(&ProofFilter::default()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handle_serializes_requests_through_thread() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, thread) =
            ProofDb::spawn(FlatFileStore::in_dir(dir.path(), Collection::Proofs)).unwrap();

        let mut tasks = Vec::new();
        for index in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.upsert(submission("c1", index % 4, "done")).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let all = handle.list(ProofFilter::campaign("c1")).await.unwrap();
        assert_eq!(all.len(), 4);

        handle.shutdown();
        thread.join().unwrap();
        assert!(matches!(
            handle.list(ProofFilter::default()).await,
            Err(StoreError::Closed)
        ));
    }

    #[test]
    fn upsert_keeps_records_written_in_account_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileStore::in_dir(dir.path(), Collection::MilestoneProofs);
        std::fs::write(
            store.path(),
            r#"[{"campaignId":"old","milestoneIndex":0,"proofContent":"legacy",
                "status":"pending","account":"0x1","timestamp":1700000000000}]"#,
        )
        .unwrap();
        let db = ProofDb::new(store);

        let before = db.list(&ProofFilter::default()).unwrap();
        assert_eq!(before.len(), 1);
        db.upsert(submission("new", 0, "fresh")).unwrap();

        let old = db.list(&ProofFilter::campaign("old")).unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].proof_content, "legacy");
        assert_eq!(old[0].submitter.as_deref(), Some("0x1"));
        assert_eq!(old[0].id, before[0].id);
        assert_eq!(db.list(&ProofFilter::default()).unwrap().len(), 2);
    }
}
