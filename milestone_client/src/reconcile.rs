//! Merges on-chain milestone state with off-chain proof records.
//!
//! The chain is authoritative: once a milestone carries `isCompleted` or
//! `isUnderReview`, any off-chain proof for it is ignored and eventually deleted.
//! Until then the proof is shown as a placeholder awaiting confirmation.

use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, bail, Result};
use milestone_core::record::{ProofRecord, ProofStatus};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::{
    chain::{ChainClient, OnChainMilestone},
    ProofTracker,
};

/// Display model for one milestone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestoneView {
    pub index: u32,
    pub description: String,
    pub amount: String,
    pub is_completed: bool,
    pub is_under_review: bool,
    pub proof_of_completion: Option<String>,
    pub pending_review: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestonePhase {
    Open,
    AwaitingConfirmation,
    UnderReview,
    Completed,
}

impl MilestoneView {
    fn from_chain(index: u32, milestone: &OnChainMilestone) -> Self {
        Self {
            index,
            description: milestone.description.clone(),
            amount: milestone.amount.clone(),
            is_completed: milestone.is_completed,
            is_under_review: milestone.is_under_review,
            proof_of_completion: None,
            pending_review: false,
        }
    }

    pub fn has_on_chain_status(&self) -> bool {
        self.is_completed || self.is_under_review
    }

    pub fn phase(&self) -> MilestonePhase {
        if self.is_completed {
            MilestonePhase::Completed
        } else if self.is_under_review {
            MilestonePhase::UnderReview
        } else if self.pending_review {
            MilestonePhase::AwaitingConfirmation
        } else {
            MilestonePhase::Open
        }
    }

    fn overlay(&mut self, proof_content: &str, status: ProofStatus) {
        self.proof_of_completion = Some(proof_content.to_string());
        self.pending_review = status == ProofStatus::Pending;
    }
}

/// Builds the view list. Proofs only fill in milestones the chain has not yet
/// flagged; proofs for unknown indices are dropped.
pub fn merge_milestones(
    on_chain: &[OnChainMilestone],
    proofs: &[ProofRecord],
) -> Vec<MilestoneView> {
    let mut views: Vec<MilestoneView> = on_chain
        .iter()
        .enumerate()
        .map(|(i, m)| MilestoneView::from_chain(i as u32, m))
        .collect();

    for proof in proofs {
        match views.get_mut(proof.milestone_index as usize) {
            Some(view) if !view.has_on_chain_status() => {
                view.overlay(&proof.proof_content, proof.status)
            }
            Some(_) => {}
            None => log::warn!(
                "proof {} points at missing milestone {}",
                proof.id,
                proof.milestone_index
            ),
        }
    }
    views
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The chain picked the milestone up; the off-chain record was dropped.
    Resolved { removed_record: bool },
    StillPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub proof: ProofRecord,
    pub transaction_hash: Option<String>,
}

fn statuses(proofs: &[ProofRecord]) -> HashMap<(u32, &str), ProofStatus> {
    proofs
        .iter()
        .map(|p| ((p.milestone_index, p.id.as_str()), p.status))
        .collect()
}

/// Keeps one campaign's milestone views converging with chain and proof API.
pub struct Reconciler<C> {
    tracker: ProofTracker,
    chain: C,
    campaign_id: String,
    milestones: Vec<OnChainMilestone>,
    proofs: Vec<ProofRecord>,
    views: Vec<MilestoneView>,
}

impl<C: ChainClient> Reconciler<C> {
    pub fn new(tracker: ProofTracker, chain: C, campaign_id: impl Into<String>) -> Self {
        Self {
            tracker,
            chain,
            campaign_id: campaign_id.into(),
            milestones: Vec::new(),
            proofs: Vec::new(),
            views: Vec::new(),
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn views(&self) -> &[MilestoneView] {
        &self.views
    }

    pub fn proofs(&self) -> &[ProofRecord] {
        &self.proofs
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn has_pending(&self) -> bool {
        self.proofs.iter().any(ProofRecord::is_pending)
    }

    fn remerge(&mut self) {
        self.views = merge_milestones(&self.milestones, &self.proofs);
    }

    pub async fn load(&mut self) -> Result<()> {
        let campaign = self.chain.get_campaign(&self.campaign_id).await?;
        let proofs = self.tracker.get_campaign_proofs(&self.campaign_id).await?;
        log::info!(
            "loaded campaign {}: {} milestones, {} off-chain proofs",
            self.campaign_id,
            campaign.milestones.len(),
            proofs.len()
        );

        self.milestones = campaign.milestones;
        self.proofs = proofs;
        self.remerge();
        Ok(())
    }

    /// Re-fetches proofs and, if any status moved, the campaign as well.
    /// Returns whether a change was seen.
    pub async fn poll_once(&mut self) -> Result<bool> {
        let fresh = self.tracker.get_campaign_proofs(&self.campaign_id).await?;
        let changed = statuses(&fresh) != statuses(&self.proofs);
        if !changed {
            return Ok(false);
        }

        log::info!("proof status changed for campaign {}", self.campaign_id);
        let campaign = self.chain.get_campaign(&self.campaign_id).await?;
        self.milestones = campaign.milestones;
        self.proofs = fresh;
        self.remerge();
        Ok(true)
    }

    /// Polls every `every` while any held proof is pending. Failed polls are
    /// logged and retried on the next tick.
    pub async fn run_polling(&mut self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(every.max(Duration::from_millis(1)));
        ticker.tick().await;

        loop {
            if !self.has_pending() {
                log::info!("no pending proofs for campaign {}; polling stopped", self.campaign_id);
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        log::warn!("proof status poll failed: {e:#}");
                    }
                }
                _ = shutdown.cancelled() => {
                    log::debug!("proof polling cancelled");
                    break;
                }
            }
        }
    }

    /// Forces an on-chain refetch. When the chain already shows the milestone
    /// under review or completed, the off-chain record is deleted.
    pub async fn refresh_status(&mut self, milestone_index: u32) -> Result<RefreshOutcome> {
        let campaign = self.chain.get_campaign(&self.campaign_id).await?;
        let milestone = campaign
            .milestones
            .get(milestone_index as usize)
            .ok_or_else(|| {
                anyhow!(
                    "milestone {milestone_index} does not exist for campaign {}",
                    self.campaign_id
                )
            })?;

        let outcome = if milestone.is_under_review || milestone.is_completed {
            let removed_record = self
                .tracker
                .delete_proof(&self.campaign_id, milestone_index)
                .await?;
            self.proofs.retain(|p| p.milestone_index != milestone_index);
            RefreshOutcome::Resolved { removed_record }
        } else {
            log::info!("milestone {milestone_index} is still pending on chain");
            RefreshOutcome::StillPending
        };

        self.milestones = campaign.milestones;
        self.remerge();
        Ok(outcome)
    }

    /// Shows the proof immediately, persists it, then submits on chain. On
    /// failure the record is marked rejected on a best-effort basis.
    pub async fn submit_proof(
        &mut self,
        milestone_index: u32,
        proof_content: &str,
        account: Option<&str>,
    ) -> Result<SubmitOutcome> {
        let slot = milestone_index as usize;
        let Some(view) = self.views.get_mut(slot) else {
            bail!(
                "milestone {milestone_index} does not exist for campaign {}",
                self.campaign_id
            );
        };
        if view.has_on_chain_status() {
            bail!("milestone {milestone_index} is already under review or completed");
        }
        view.overlay(proof_content, ProofStatus::Pending);

        match self
            .persist_and_submit(milestone_index, proof_content, account)
            .await
        {
            Ok(outcome) => {
                self.proofs
                    .retain(|p| p.milestone_index != milestone_index);
                self.proofs.push(outcome.proof.clone());
                Ok(outcome)
            }
            Err(err) => {
                log::error!("milestone {milestone_index} submission failed: {err:#}");
                if let Err(mark_err) = self
                    .tracker
                    .update_milestone_proof_status(
                        &self.campaign_id,
                        milestone_index,
                        ProofStatus::Rejected,
                        None,
                    )
                    .await
                {
                    log::warn!(
                        "could not mark milestone {milestone_index} proof rejected: {mark_err:#}"
                    );
                }
                if let Some(view) = self.views.get_mut(slot) {
                    view.pending_review = false;
                }
                Err(err)
            }
        }
    }

    async fn persist_and_submit(
        &self,
        milestone_index: u32,
        proof_content: &str,
        account: Option<&str>,
    ) -> Result<SubmitOutcome> {
        let mut proof = self
            .tracker
            .save_proof(&self.campaign_id, milestone_index, proof_content, account)
            .await?;

        let transaction_hash = self
            .chain
            .submit_milestone_completion(&self.campaign_id, milestone_index, proof_content)
            .await?;

        if let Some(hash) = transaction_hash.as_deref() {
            log::info!("milestone {milestone_index} submitted in transaction {hash}");
            proof = self
                .tracker
                .update_milestone_proof_status(
                    &self.campaign_id,
                    milestone_index,
                    ProofStatus::Pending,
                    Some(hash),
                )
                .await?;
        }

        Ok(SubmitOutcome {
            proof,
            transaction_hash,
        })
    }

    /// Releases funds for a milestone the chain reports as completed.
    pub async fn release_funds(&mut self, milestone_index: u32) -> Result<String> {
        let campaign = self.chain.get_campaign(&self.campaign_id).await?;
        let completed = campaign
            .milestones
            .get(milestone_index as usize)
            .map(|m| m.is_completed)
            .unwrap_or(false);
        self.milestones = campaign.milestones;
        self.remerge();

        if !completed {
            bail!("milestone {milestone_index} is not completed on chain");
        }
        self.chain
            .release_milestone_funds(&self.campaign_id, milestone_index)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn milestone(completed: bool, under_review: bool) -> OnChainMilestone {
        OnChainMilestone {
            description: "ship it".into(),
            amount: "1000".into(),
            is_completed: completed,
            is_under_review: under_review,
        }
    }

    fn proof(index: u32, status: ProofStatus) -> ProofRecord {
        ProofRecord {
            id: format!("proof-{index}"),
            campaign_id: "c1".into(),
            milestone_index: index,
            proof_content: format!("evidence {index}"),
            transaction_hash: None,
            status,
            submitter: None,
            timestamp: 1,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn proof_overlays_unflagged_milestone() {
        let views = merge_milestones(
            &[milestone(false, false)],
            &[proof(0, ProofStatus::Pending)],
        );
        assert_eq!(views[0].proof_of_completion.as_deref(), Some("evidence 0"));
        assert!(views[0].pending_review);
        assert_eq!(views[0].phase(), MilestonePhase::AwaitingConfirmation);
    }

    #[test]
    fn chain_flags_take_precedence() {
        let views = merge_milestones(
            &[milestone(false, true), milestone(true, false)],
            &[proof(0, ProofStatus::Pending), proof(1, ProofStatus::Pending)],
        );
        assert!(views.iter().all(|v| v.proof_of_completion.is_none()));
        assert!(views.iter().all(|v| !v.pending_review));
        assert_eq!(views[0].phase(), MilestonePhase::UnderReview);
        assert_eq!(views[1].phase(), MilestonePhase::Completed);
    }

    #[test]
    fn settled_proof_shows_content_without_pending_flag() {
        let views = merge_milestones(
            &[milestone(false, false), milestone(false, false)],
            &[proof(1, ProofStatus::Rejected)],
        );
        assert_eq!(views[0].phase(), MilestonePhase::Open);
        assert_eq!(views[1].proof_of_completion.as_deref(), Some("evidence 1"));
        assert_eq!(views[1].phase(), MilestonePhase::Open);
    }

    #[test]
    fn proofs_past_the_milestone_list_are_ignored() {
        let views = merge_milestones(&[milestone(false, false)], &[proof(4, ProofStatus::Pending)]);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].proof_of_completion, None);
    }

    #[test]
    fn completed_outranks_review() {
        let view = MilestoneView {
            pending_review: true,
            ..MilestoneView::from_chain(0, &milestone(true, true))
        };
        assert_eq!(view.phase(), MilestonePhase::Completed);
    }
}
