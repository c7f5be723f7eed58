use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Off-chain status of a milestone proof.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProofStatus {
    #[default]
    Pending,
    Confirmed,
    Rejected,
}

impl ProofStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofStatus::Pending => "pending",
            ProofStatus::Confirmed => "confirmed",
            ProofStatus::Rejected => "rejected",
        }
    }

    /// Maps the status words used by transaction notifiers onto our three states.
    pub fn from_external(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "confirmed" | "completed" | "mined" => {
                Some(ProofStatus::Confirmed)
            }
            "failed" | "failure" | "reverted" | "rejected" | "dropped" | "error" => {
                Some(ProofStatus::Rejected)
            }
            "pending" | "submitted" | "processing" => Some(ProofStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProofStatus::Pending),
            "confirmed" => Ok(ProofStatus::Confirmed),
            "rejected" => Ok(ProofStatus::Rejected),
            other => Err(format!("unknown proof status '{other}'")),
        }
    }
}

/// One off-chain note that a milestone was completed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProofRecord {
    #[serde(default)]
    pub id: String,
    pub campaign_id: String,
    pub milestone_index: u32,
    pub proof_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub status: ProofStatus,
    #[serde(default, alias = "account", skip_serializing_if = "Option::is_none")]
    pub submitter: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl ProofRecord {
    pub fn new(submission: ProofSubmission, now: i64) -> Self {
        Self {
            id: format!("proof-{}", uuid::Uuid::new_v4()),
            campaign_id: submission.key.campaign_id,
            milestone_index: submission.key.milestone_index,
            proof_content: submission.proof_content,
            transaction_hash: submission.transaction_hash,
            status: submission.status.unwrap_or_default(),
            submitter: submission.submitter,
            timestamp: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fills fields that older files may omit. A missing id is derived from the
    /// key so it stays the same across reads; records carrying only one of
    /// `timestamp`, `createdAt` or `updatedAt` take it for all three.
    pub fn fill_missing(&mut self, now: i64) {
        if self.id.trim().is_empty() {
            self.id = format!("proof-{}-{}", self.campaign_id, self.milestone_index);
        }
        let known = [self.created_at, self.timestamp, self.updated_at]
            .into_iter()
            .find(|t| *t > 0)
            .unwrap_or(now);
        for field in [&mut self.timestamp, &mut self.created_at, &mut self.updated_at] {
            if *field <= 0 {
                *field = known;
            }
        }
    }

    pub fn key(&self) -> ProofKey {
        ProofKey::new(self.campaign_id.clone(), self.milestone_index)
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProofStatus::Pending
    }

    /// Merges `patch` into the record. Absent fields keep their current value.
    pub fn apply(&mut self, patch: ProofPatch, now: i64) {
        if let Some(content) = patch.proof_content {
            self.proof_content = content;
        }
        if let Some(hash) = patch.transaction_hash {
            self.transaction_hash = Some(hash);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(submitter) = patch.submitter {
            self.submitter = Some(submitter);
        }
        self.updated_at = now;
    }
}

/// Partial update for a [`ProofRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofPatch {
    pub proof_content: Option<String>,
    pub transaction_hash: Option<String>,
    pub status: Option<ProofStatus>,
    pub submitter: Option<String>,
}

impl ProofPatch {
    pub fn status(status: ProofStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_transaction_hash(mut self, hash: Option<String>) -> Self {
        self.transaction_hash = hash;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProofKey {
    pub campaign_id: String,
    pub milestone_index: u32,
}

impl ProofKey {
    pub fn new(campaign_id: impl Into<String>, milestone_index: u32) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            milestone_index,
        }
    }

    pub fn matches(&self, record: &ProofRecord) -> bool {
        record.campaign_id == self.campaign_id && record.milestone_index == self.milestone_index
    }
}

impl fmt::Display for ProofKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.campaign_id, self.milestone_index)
    }
}

/// Validated input for create-or-update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofSubmission {
    pub key: ProofKey,
    pub proof_content: String,
    pub submitter: Option<String>,
    pub status: Option<ProofStatus>,
    pub transaction_hash: Option<String>,
}

impl ProofSubmission {
    /// Fields an existing record takes from a repeated submission.
    pub fn as_patch(&self) -> ProofPatch {
        ProofPatch {
            proof_content: Some(self.proof_content.clone()),
            transaction_hash: self.transaction_hash.clone(),
            status: self.status,
            submitter: self.submitter.clone(),
        }
    }
}

/// Picks the records an update or delete applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofSelector {
    Key(ProofKey),
    Transaction(String),
}

impl ProofSelector {
    /// A complete `(campaignId, milestoneIndex)` pair selects by key; otherwise the
    /// transaction hash is used. Returns `None` when neither is usable.
    pub fn from_parts(
        campaign_id: Option<&str>,
        milestone_index: Option<u32>,
        transaction_hash: Option<&str>,
    ) -> Option<Self> {
        let campaign_id = campaign_id.map(str::trim).filter(|s| !s.is_empty());
        let transaction_hash = transaction_hash.map(str::trim).filter(|s| !s.is_empty());
        match (campaign_id, milestone_index, transaction_hash) {
            (Some(campaign), Some(index), _) => {
                Some(ProofSelector::Key(ProofKey::new(campaign, index)))
            }
            (_, _, Some(hash)) => Some(ProofSelector::Transaction(hash.to_string())),
            _ => None,
        }
    }

    pub fn matches(&self, record: &ProofRecord) -> bool {
        match self {
            ProofSelector::Key(key) => key.matches(record),
            ProofSelector::Transaction(hash) => record.transaction_hash.as_deref() == Some(hash),
        }
    }
}

impl fmt::Display for ProofSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofSelector::Key(key) => write!(f, "milestone {key}"),
            ProofSelector::Transaction(hash) => write!(f, "transaction {hash}"),
        }
    }
}

/// Equality filters for listing, combined with AND.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProofFilter {
    pub campaign_id: Option<String>,
    pub milestone_index: Option<u32>,
    pub transaction_hash: Option<String>,
}

impl ProofFilter {
    pub fn campaign(campaign_id: impl Into<String>) -> Self {
        Self {
            campaign_id: Some(campaign_id.into()),
            ..Self::default()
        }
    }

    pub fn apply(&self, records: Vec<ProofRecord>) -> Vec<ProofRecord> {
        let mut filtered = records;
        if let Some(campaign_id) = &self.campaign_id {
            filtered.retain(|r| &r.campaign_id == campaign_id);
        }
        if let Some(index) = self.milestone_index {
            filtered.retain(|r| r.milestone_index == index);
        }
        if let Some(hash) = &self.transaction_hash {
            filtered.retain(|r| r.transaction_hash.as_ref() == Some(hash));
        }
        filtered
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
