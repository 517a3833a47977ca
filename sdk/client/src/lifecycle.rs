//! Commitment Lifecycle
//!
//! The active set is what the next send spends: the commitment of the
//! latest send plus the top ups made after it, or only top ups when nothing
//! was sent yet. A proof takes at most [`SEND_ARITY`] inputs, so a full set
//! has to be merged before another top up can be spent.

use elusiv_privacy::{ActivatedCommitment, CommitmentMetadata, IncompleteCommitment, SeedKeys};
use std::sync::Arc;

use crate::error::{ElusivError, Result};
use crate::history::HistoryManager;
use crate::transaction::{ElusivTransaction, topup_commitment};
use crate::tree::manager::TreeManager;

/// Maximum number of input commitments of one send
pub const SEND_ARITY: usize = 4;

pub struct CommitmentLifecycle {
    history: Arc<HistoryManager>,
    keys: Arc<SeedKeys>,
}

impl CommitmentLifecycle {
    pub fn new(history: Arc<HistoryManager>, keys: Arc<SeedKeys>) -> Self {
        Self { history, keys }
    }

    fn tree(&self) -> &Arc<TreeManager> {
        self.history.tree()
    }

    /// Records whose commitments are not spent yet, oldest first.
    ///
    /// Fails while a record of the set is not confirmed: building on top of
    /// it could spend the same commitment twice.
    pub async fn active_transactions(&self, token_id: u16) -> Result<Vec<ElusivTransaction>> {
        let recent = self
            .history
            .fetch_last(SEND_ARITY, Some(token_id), None)
            .await?;
        let mut active = Vec::with_capacity(SEND_ARITY);
        for tx in recent.into_iter().take(SEND_ARITY) {
            if !tx.is_confirmed() {
                return Err(ElusivError::UnconfirmedTransaction { nonce: tx.nonce });
            }
            let is_send = tx.is_send();
            active.push(tx);
            if is_send {
                break;
            }
        }
        active.reverse();
        Ok(active)
    }

    /// Rebuild the commitment behind `tx` and check it against the chain
    fn rebuild(&self, tx: &ElusivTransaction) -> Result<IncompleteCommitment> {
        let commitment = if tx.is_topup() {
            topup_commitment(
                &self.keys,
                tx.nonce,
                tx.amount,
                tx.token_id,
                tx.merkle_start_index,
            )?
        } else {
            let ciphertext = tx
                .send
                .as_ref()
                .and_then(|d| d.encrypted_metadata)
                .ok_or_else(|| {
                    ElusivError::InvalidAccess(format!("send at nonce {} has no metadata", tx.nonce))
                })?;
            let metadata = CommitmentMetadata::decrypt(
                &ciphertext,
                self.keys.root_viewing_key(),
                &tx.commitment_hash,
            )?;
            IncompleteCommitment::new(
                self.keys.nullifier(tx.nonce)?,
                metadata.balance(),
                tx.token_id,
                metadata.assoc_comm_index(),
            )
        };

        if commitment.hash() != tx.commitment_hash {
            return Err(ElusivError::InvalidAccess(format!(
                "rebuilt commitment of nonce {} does not match {:?}",
                tx.nonce, tx.commitment_hash
            )));
        }
        Ok(commitment)
    }

    /// Active commitments with their tree openings, oldest first.
    /// All openings are taken against one root.
    pub async fn active_commitments(&self, token_id: u16) -> Result<Vec<ActivatedCommitment>> {
        let active = self.active_transactions(token_id).await?;
        let commitments = active
            .iter()
            .map(|tx| self.rebuild(tx))
            .collect::<Result<Vec<_>>>()?;

        let requests: Vec<_> = active
            .iter()
            .map(|tx| (tx.commitment_hash, tx.merkle_start_index as u64))
            .collect();
        let infos = self.tree().get_commitments_info(&requests).await?;

        Ok(commitments
            .iter()
            .zip(infos)
            .map(|(commitment, info)| commitment.activate(info.opening, info.root))
            .collect())
    }
}

/// A full active set has to be merged before anything else is spent
pub fn needs_merge(active: &[ElusivTransaction]) -> bool {
    active.len() >= SEND_ARITY
}
