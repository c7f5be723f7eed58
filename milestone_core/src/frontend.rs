use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::ApiError,
    proofdb::ProofDbHandle,
    record::{ProofFilter, ProofKey, ProofPatch, ProofSelector, ProofStatus, ProofSubmission},
    server::AppState,
};

/// Body of `POST /api/proofs` and `POST /api/milestone-proofs`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SaveProofRequest {
    pub campaign_id: Option<String>,
    pub milestone_index: Option<u32>,
    pub proof_content: Option<String>,
    #[serde(alias = "account", skip_serializing_if = "Option::is_none")]
    pub submitter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProofStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

impl SaveProofRequest {
    fn into_submission(self) -> Result<ProofSubmission, ApiError> {
        let campaign_id = non_empty(self.campaign_id);
        let proof_content = non_empty(self.proof_content);
        let (Some(campaign_id), Some(milestone_index), Some(proof_content)) =
            (campaign_id, self.milestone_index, proof_content)
        else {
            return Err(ApiError::BadRequest(
                "Missing required fields: campaignId, milestoneIndex, proofContent".into(),
            ));
        };

        Ok(ProofSubmission {
            key: ProofKey::new(campaign_id, milestone_index),
            proof_content,
            submitter: non_empty(self.submitter),
            status: self.status,
            transaction_hash: non_empty(self.transaction_hash),
        })
    }
}

/// Body of `PATCH /api/proofs` and `PUT /api/milestone-proofs`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProofStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_content: Option<String>,
    #[serde(alias = "account", skip_serializing_if = "Option::is_none")]
    pub submitter: Option<String>,
}

impl StatusUpdateRequest {
    fn selector(&self) -> Result<ProofSelector, ApiError> {
        ProofSelector::from_parts(
            self.campaign_id.as_deref(),
            self.milestone_index,
            self.transaction_hash.as_deref(),
        )
        .ok_or_else(|| {
            ApiError::BadRequest(
                "Provide campaignId and milestoneIndex, or transactionHash".into(),
            )
        })
    }

    /// The transaction hash is written only when the record is selected by key.
    fn hash_to_write(&self, selector: &ProofSelector) -> Option<String> {
        match selector {
            ProofSelector::Key(_) => non_empty(self.transaction_hash.clone()),
            ProofSelector::Transaction(_) => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProofResponse<P = Value> {
    pub message: String,
    pub proof: P,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub transaction_hash: Option<String>,
    pub status: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub message: String,
    pub transaction_hash: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TxStatusQuery {
    pub transaction_hash: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Malformed JSON bodies are reported as a generic server error.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        log::warn!("rejecting malformed request body: {err}");
        ApiError::Internal("Invalid request body".into()).into()
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(health))
        .service(
            web::resource("/api/proofs")
                .route(web::get().to(list_proofs))
                .route(web::post().to(save_proof))
                .route(web::patch().to(patch_proof))
                .route(web::delete().to(delete_proof)),
        )
        .service(
            web::resource("/api/milestone-proofs")
                .route(web::get().to(list_milestone_proofs))
                .route(web::post().to(save_milestone_proof))
                .route(web::put().to(put_milestone_proof))
                .route(web::delete().to(delete_milestone_proof)),
        )
        .route(
            "/api/transaction-webhook",
            web::post().to(transaction_webhook),
        )
        .route("/api/transaction-status", web::get().to(transaction_status));
}

pub async fn health() -> HttpResponse {
    log::debug!("health check");
    HttpResponse::Ok().json(HashMap::from([("status", "ok")]))
}

async fn list(db: &ProofDbHandle, filter: ProofFilter) -> Result<HttpResponse, ApiError> {
    log::info!("listing {} with {:?}", db.collection().file_name(), filter);
    let records = db.list(filter).await?;
    Ok(HttpResponse::Ok().json(db.collection().encode_all(&records)?))
}

async fn save(db: &ProofDbHandle, body: SaveProofRequest) -> Result<HttpResponse, ApiError> {
    let submission = body.into_submission()?;
    log::info!("saving proof for {}", submission.key);
    let outcome = db.upsert(submission).await?;

    let message = if outcome.created {
        "Proof saved successfully"
    } else {
        "Proof updated successfully"
    };
    Ok(HttpResponse::Ok().json(ProofResponse {
        message: message.into(),
        proof: db.collection().encode(&outcome.proof)?,
        updated: None,
    }))
}

async fn delete(db: &ProofDbHandle, query: ProofFilter) -> Result<HttpResponse, ApiError> {
    let selector = ProofSelector::from_parts(
        query.campaign_id.as_deref(),
        query.milestone_index,
        query.transaction_hash.as_deref(),
    )
    .ok_or_else(|| {
        ApiError::BadRequest("Provide campaignId and milestoneIndex, or transactionHash".into())
    })?;

    log::info!("deleting proof for {selector}");
    match db.delete(selector).await? {
        0 => Err(ApiError::NotFound("Proof not found".into())),
        _ => Ok(HttpResponse::Ok().json(MessageResponse {
            message: "Proof deleted successfully".into(),
        })),
    }
}

pub async fn list_proofs(
    state: web::Data<AppState>,
    query: web::Query<ProofFilter>,
) -> Result<HttpResponse, ApiError> {
    list(&state.proofs, query.into_inner()).await
}

pub async fn save_proof(
    state: web::Data<AppState>,
    body: web::Json<SaveProofRequest>,
) -> Result<HttpResponse, ApiError> {
    save(&state.proofs, body.into_inner()).await
}

pub async fn patch_proof(
    state: web::Data<AppState>,
    body: web::Json<StatusUpdateRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    if request.proof_content.is_some() || request.submitter.is_some() {
        return Err(ApiError::BadRequest(
            "PATCH only sets status and transactionHash".into(),
        ));
    }
    let status = request
        .status
        .ok_or_else(|| ApiError::BadRequest("Missing required field: status".into()))?;
    let selector = request.selector()?;
    let patch = ProofPatch::status(status).with_transaction_hash(request.hash_to_write(&selector));

    log::info!("setting {selector} to {status}");
    match state.proofs.update_first(selector, patch).await? {
        Some(proof) => Ok(HttpResponse::Ok().json(ProofResponse {
            message: "Proof status updated".into(),
            proof: state.proofs.collection().encode(&proof)?,
            updated: None,
        })),
        None => Err(ApiError::NotFound("Proof not found".into())),
    }
}

pub async fn delete_proof(
    state: web::Data<AppState>,
    query: web::Query<ProofFilter>,
) -> Result<HttpResponse, ApiError> {
    delete(&state.proofs, query.into_inner()).await
}

pub async fn list_milestone_proofs(
    state: web::Data<AppState>,
    query: web::Query<ProofFilter>,
) -> Result<HttpResponse, ApiError> {
    list(&state.milestone_proofs, query.into_inner()).await
}

pub async fn save_milestone_proof(
    state: web::Data<AppState>,
    body: web::Json<SaveProofRequest>,
) -> Result<HttpResponse, ApiError> {
    save(&state.milestone_proofs, body.into_inner()).await
}

/// Updates every record the selector matches.
pub async fn put_milestone_proof(
    state: web::Data<AppState>,
    body: web::Json<StatusUpdateRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    let selector = request.selector()?;
    let patch = ProofPatch {
        proof_content: non_empty(request.proof_content.clone()),
        transaction_hash: request.hash_to_write(&selector),
        status: request.status,
        submitter: non_empty(request.submitter.clone()),
    };
    if patch == ProofPatch::default() {
        return Err(ApiError::BadRequest(
            "Nothing to update: provide status, proofContent, transactionHash or account".into(),
        ));
    }

    log::info!("updating milestone proofs for {selector}");
    let db = &state.milestone_proofs;
    let updated = db.update_all(selector, patch).await?;
    let Some(first) = updated.first() else {
        return Err(ApiError::NotFound("Proof not found".into()));
    };
    Ok(HttpResponse::Ok().json(ProofResponse {
        message: "Milestone proof updated".into(),
        proof: db.collection().encode(first)?,
        updated: Some(updated.len()),
    }))
}

pub async fn delete_milestone_proof(
    state: web::Data<AppState>,
    query: web::Query<ProofFilter>,
) -> Result<HttpResponse, ApiError> {
    delete(&state.milestone_proofs, query.into_inner()).await
}

/// Applies an externally reported transaction status to every proof holding the hash.
pub async fn transaction_webhook(
    state: web::Data<AppState>,
    body: web::Json<WebhookRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    let (Some(transaction_hash), Some(reported)) = (
        non_empty(request.transaction_hash),
        non_empty(request.status),
    ) else {
        return Err(ApiError::BadRequest(
            "Missing required fields: transactionHash, status".into(),
        ));
    };
    let status = ProofStatus::from_external(&reported).ok_or_else(|| {
        ApiError::BadRequest(format!("Unsupported transaction status '{reported}'"))
    })?;
    log::info!("webhook: transaction {transaction_hash} reported '{reported}' -> {status}");

    let selector = ProofSelector::Transaction(transaction_hash.clone());
    let mut matched = 0;
    for db in [&state.proofs, &state.milestone_proofs] {
        match db.update_all(selector.clone(), ProofPatch::status(status)).await {
            Ok(updated) => matched += updated.len(),
            Err(e) => {
                // Earlier collections are already written; keep the registry in step.
                if matched > 0 {
                    log::error!(
                        "webhook: {matched} proof(s) for {transaction_hash} set to {status}, \
                         but {} failed: {e}",
                        db.collection().file_name()
                    );
                    state.tx_status.record(&transaction_hash, status).await;
                }
                return Err(e.into());
            }
        }
    }
    if matched == 0 {
        log::warn!("webhook: no proof holds transaction {transaction_hash}");
        return Err(ApiError::NotFound(format!(
            "No proof found for transaction {transaction_hash}"
        )));
    }

    state.tx_status.record(&transaction_hash, status).await;
    Ok(HttpResponse::Ok().json(WebhookResponse {
        message: "Transaction status updated".into(),
        transaction_hash,
    }))
}

pub async fn transaction_status(
    state: web::Data<AppState>,
    query: web::Query<TxStatusQuery>,
) -> Result<HttpResponse, ApiError> {
    let Some(transaction_hash) = non_empty(query.into_inner().transaction_hash) else {
        return Err(ApiError::BadRequest(
            "Missing required query parameter: transactionHash".into(),
        ));
    };
    match state.tx_status.get(&transaction_hash).await {
        Some(report) => Ok(HttpResponse::Ok().json(report)),
        None => Err(ApiError::NotFound(format!(
            "No recent status for transaction {transaction_hash}"
        ))),
    }
}
