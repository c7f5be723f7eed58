use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OnChainMilestone {
    pub description: String,
    /// Amount released on completion, in wei.
    pub amount: String,
    pub is_completed: bool,
    pub is_under_review: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub creator: String,
    pub milestones: Vec<OnChainMilestone>,
}

/// The contract/wallet layer, which is authoritative for milestone state.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_campaign(&self, campaign_id: &str) -> Result<Campaign>;

    /// Returns the transaction hash when the wallet reports one.
    async fn submit_milestone_completion(
        &self,
        campaign_id: &str,
        milestone_index: u32,
        proof: &str,
    ) -> Result<Option<String>>;

    async fn release_milestone_funds(&self, campaign_id: &str, milestone_index: u32)
        -> Result<String>;
}
