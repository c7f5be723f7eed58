use anyhow::Result;
use milestone_core::{
    error::ErrorBody,
    frontend::{
        MessageResponse, ProofResponse, SaveProofRequest, StatusUpdateRequest, WebhookRequest,
        WebhookResponse,
    },
    record::{ProofRecord, ProofStatus},
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use thiserror::Error;

pub mod chain;
pub mod reconcile;

pub use chain::{Campaign, ChainClient, OnChainMilestone};
pub use reconcile::{MilestonePhase, MilestoneView, Reconciler, RefreshOutcome};

/// A non-2xx answer from the proof API, carrying the server's message.
#[derive(Debug, Error)]
#[error("proof API returned {status}: {message}")]
pub struct ApiStatusError {
    pub status: StatusCode,
    pub message: String,
}

/// Turns a response into `T`, or into an [`ApiStatusError`] for non-2xx statuses.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string(),
    };
    Err(ApiStatusError { status, message }.into())
}

/// Thin client for the proof API.
#[derive(Clone, Debug)]
pub struct ProofTracker {
    client: Client,
    base_url: String,
}

impl ProofTracker {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health_check(&self) -> Result<HashMap<String, String>> {
        let resp = self.client.get(self.url("/")).send().await?;
        read_json(resp).await
    }

    /// Creates the proof for a milestone, or updates the existing one.
    pub async fn save_proof(
        &self,
        campaign_id: &str,
        milestone_index: u32,
        proof_content: &str,
        submitter: Option<&str>,
    ) -> Result<ProofRecord> {
        let request = SaveProofRequest {
            campaign_id: Some(campaign_id.to_string()),
            milestone_index: Some(milestone_index),
            proof_content: Some(proof_content.to_string()),
            submitter: submitter.map(str::to_string),
            status: Some(ProofStatus::Pending),
            transaction_hash: None,
        };

        let resp = self
            .client
            .post(self.url("/api/proofs"))
            .json(&request)
            .send()
            .await?;
        let saved: ProofResponse<ProofRecord> = read_json(resp).await?;
        log::debug!("{}: {}", saved.message, saved.proof.id);
        Ok(saved.proof)
    }

    pub async fn get_campaign_proofs(&self, campaign_id: &str) -> Result<Vec<ProofRecord>> {
        let resp = self
            .client
            .get(self.url("/api/proofs"))
            .query(&[("campaignId", campaign_id)])
            .send()
            .await?;
        read_json(resp).await
    }

    /// Sets the status of a milestone's proof and, when given, its transaction hash.
    pub async fn update_milestone_proof_status(
        &self,
        campaign_id: &str,
        milestone_index: u32,
        status: ProofStatus,
        transaction_hash: Option<&str>,
    ) -> Result<ProofRecord> {
        let request = StatusUpdateRequest {
            campaign_id: Some(campaign_id.to_string()),
            milestone_index: Some(milestone_index),
            transaction_hash: transaction_hash.map(str::to_string),
            status: Some(status),
            ..StatusUpdateRequest::default()
        };

        let resp = self
            .client
            .patch(self.url("/api/proofs"))
            .json(&request)
            .send()
            .await?;
        let updated: ProofResponse<ProofRecord> = read_json(resp).await?;
        Ok(updated.proof)
    }

    /// Returns `false` when there was nothing to delete.
    pub async fn delete_proof(&self, campaign_id: &str, milestone_index: u32) -> Result<bool> {
        let index = milestone_index.to_string();
        let resp = self
            .client
            .delete(self.url("/api/proofs"))
            .query(&[("campaignId", campaign_id), ("milestoneIndex", index.as_str())])
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            log::debug!("no proof to delete for {campaign_id}#{milestone_index}");
            return Ok(false);
        }
        let _: MessageResponse = read_json(resp).await?;
        Ok(true)
    }

    /// Forwards an externally observed transaction status to the webhook.
    pub async fn report_transaction(&self, transaction_hash: &str, status: &str) -> Result<()> {
        let request = WebhookRequest {
            transaction_hash: Some(transaction_hash.to_string()),
            status: Some(status.to_string()),
        };
        let resp = self
            .client
            .post(self.url("/api/transaction-webhook"))
            .json(&request)
            .send()
            .await?;
        let _: WebhookResponse = read_json(resp).await?;
        Ok(())
    }
}

/// Status code of a tracker error, if the server produced one.
pub fn api_status(err: &anyhow::Error) -> Option<StatusCode> {
    err.downcast_ref::<ApiStatusError>().map(|e| e.status)
}
